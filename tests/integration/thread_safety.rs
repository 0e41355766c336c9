// Shared state crosses task boundaries; these fail to compile if that regresses

use business_hub::api::AppState;
use business_hub::auth::AuthState;
use business_hub::core::token::TokenService;
use business_hub::metrics::Metrics;
use business_hub::queue::{MemoryBroker, MessageQueue, RedisBroker};
use business_hub::services::{BusinessService, NotificationDispatcher, UserService};
use business_hub::state::{MemoryCache, RedisCache};
use static_assertions::assert_impl_all;

assert_impl_all!(AppState: Send, Sync, Clone);
assert_impl_all!(AuthState: Send, Sync);
assert_impl_all!(TokenService: Send, Sync);
assert_impl_all!(MessageQueue: Send, Sync);
assert_impl_all!(MemoryBroker: Send, Sync);
assert_impl_all!(RedisBroker: Send, Sync);
assert_impl_all!(MemoryCache: Send, Sync);
assert_impl_all!(RedisCache: Send, Sync);
assert_impl_all!(UserService: Send, Sync);
assert_impl_all!(BusinessService: Send, Sync);
assert_impl_all!(NotificationDispatcher: Send, Sync);
assert_impl_all!(Metrics: Send, Sync);

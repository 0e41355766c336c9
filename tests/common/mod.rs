// Common test utilities and in-memory fakes shared by the test harnesses

#![allow(dead_code)]

use async_trait::async_trait;
use axum::Router;
use business_hub::api::{create_router, AppState};
use business_hub::auth::audit_logger::AuditLogger;
use business_hub::auth::{AuthState, UserDirectory};
use business_hub::config::Config;
use business_hub::core::errors::{NotificationError, StoreError};
use business_hub::core::models::{Business, BusinessFilter, BusinessUpdate, NewBusiness, NewUser, User, UserRole};
use business_hub::core::token::TokenService;
use business_hub::metrics::Metrics;
use business_hub::queue::{ConsumerSettings, MemoryBroker, MessageQueue, NOTIFICATIONS_QUEUE};
use business_hub::services::{
    BusinessService, CacheTtls, CredentialTtls, Mailer, NotificationPublisher, OutgoingEmail, UserService,
};
use business_hub::state::MemoryCache;
use business_hub::store::{Accounts, BusinessRepository, TransactionalStore, UnitOfWork, UserTables};
use chrono::Utc;
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use uuid::Uuid;

pub const TEST_SECRET: &str = "test-secret-that-is-long-enough-for-hs256";

pub fn test_tokens() -> Arc<TokenService> {
    Arc::new(TokenService::new(TEST_SECRET, Duration::from_secs(3600)).unwrap())
}

pub fn test_user(is_active: bool, is_verified: bool, is_entrepreneur: bool) -> User {
    let id = Uuid::new_v4();
    User {
        id,
        email: format!("{}@example.com", id.simple()),
        full_name: "Test User".to_string(),
        role: if is_entrepreneur {
            UserRole::Entrepreneur
        } else {
            UserRole::Member
        },
        is_active,
        is_verified,
        is_entrepreneur,
        created_at: Utc::now(),
    }
}

pub fn new_user(email: &str) -> NewUser {
    NewUser {
        email: email.to_string(),
        full_name: "Ada Lovelace".to_string(),
        is_entrepreneur: true,
    }
}

pub fn new_business(name: &str, city: &str) -> NewBusiness {
    NewBusiness {
        name: name.to_string(),
        category: "bakery".to_string(),
        city: city.to_string(),
        description: String::new(),
    }
}

/// Committed contents of the fake relational store
#[derive(Debug, Default)]
pub struct FakeDb {
    pub users: HashMap<Uuid, User>,
    pub preferences: HashSet<Uuid>,
    pub profiles: HashMap<Uuid, String>,
}

/// Writes staged by an open fake transaction
#[derive(Debug, Default)]
pub struct FakeTx {
    users: Vec<User>,
    preferences: Vec<Uuid>,
    profiles: Vec<(Uuid, String)>,
    verified: Vec<Uuid>,
}

/// Transactional store whose writes only become visible on commit
#[derive(Default)]
pub struct FakeStore {
    pub db: Arc<Mutex<FakeDb>>,
    pub commits: AtomicUsize,
    pub rollbacks: AtomicUsize,
    pub commit_should_fail: AtomicBool,
}

#[async_trait]
impl TransactionalStore for FakeStore {
    type Tx = FakeTx;

    async fn begin(&self) -> Result<FakeTx, StoreError> {
        Ok(FakeTx::default())
    }

    async fn commit(&self, tx: FakeTx) -> Result<(), StoreError> {
        if self.commit_should_fail.load(Ordering::SeqCst) {
            return Err(StoreError::Backend("connection reset during commit".to_string()));
        }

        let mut db = self.db.lock().unwrap();
        for user in tx.users {
            db.users.insert(user.id, user);
        }
        db.preferences.extend(tx.preferences);
        db.profiles.extend(tx.profiles);
        for id in tx.verified {
            if let Some(user) = db.users.get_mut(&id) {
                user.is_verified = true;
            }
        }
        self.commits.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn rollback(&self, _tx: FakeTx) -> Result<(), StoreError> {
        self.rollbacks.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

/// User tables over `FakeStore`
pub struct FakeUserTables {
    pub db: Arc<Mutex<FakeDb>>,
    pub fail_profile_insert: AtomicBool,
}

impl FakeUserTables {
    pub fn new(db: Arc<Mutex<FakeDb>>) -> Self {
        Self {
            db,
            fail_profile_insert: AtomicBool::new(false),
        }
    }

    pub fn seed(&self, user: User) {
        let mut db = self.db.lock().unwrap();
        db.preferences.insert(user.id);
        db.profiles.insert(user.id, user.full_name.clone());
        db.users.insert(user.id, user);
    }

    pub fn user_count(&self) -> usize {
        self.db.lock().unwrap().users.len()
    }
}

#[async_trait]
impl UserTables for FakeUserTables {
    type Tx = FakeTx;

    async fn insert_user(&self, tx: &mut FakeTx, id: Uuid, user: &NewUser) -> Result<User, StoreError> {
        let taken = self.db.lock().unwrap().users.values().any(|u| u.email == user.email)
            || tx.users.iter().any(|u| u.email == user.email);
        if taken {
            return Err(StoreError::UniqueViolation("users_email_key".to_string()));
        }

        let created = User {
            id,
            email: user.email.clone(),
            full_name: user.full_name.clone(),
            role: user.role(),
            is_active: true,
            is_verified: false,
            is_entrepreneur: user.is_entrepreneur,
            created_at: Utc::now(),
        };
        tx.users.push(created.clone());
        Ok(created)
    }

    async fn insert_preferences(&self, tx: &mut FakeTx, user_id: Uuid) -> Result<(), StoreError> {
        tx.preferences.push(user_id);
        Ok(())
    }

    async fn insert_profile(&self, tx: &mut FakeTx, user_id: Uuid, display_name: &str) -> Result<(), StoreError> {
        if self.fail_profile_insert.load(Ordering::SeqCst) {
            return Err(StoreError::Backend("profile insert failed".to_string()));
        }
        tx.profiles.push((user_id, display_name.to_string()));
        Ok(())
    }

    async fn set_verified(&self, tx: &mut FakeTx, user_id: Uuid) -> Result<bool, StoreError> {
        if !self.db.lock().unwrap().users.contains_key(&user_id) {
            return Ok(false);
        }
        tx.verified.push(user_id);
        Ok(true)
    }

    async fn find_by_id(&self, id: Uuid) -> Result<Option<User>, StoreError> {
        Ok(self.db.lock().unwrap().users.get(&id).cloned())
    }

    async fn find_by_email(&self, email: &str) -> Result<Option<User>, StoreError> {
        Ok(self.db.lock().unwrap().users.values().find(|u| u.email == email).cloned())
    }
}

pub type FakeAccounts = Accounts<FakeStore, FakeUserTables>;

/// Account repository over the fakes, plus handles to inspect them
pub fn fake_accounts() -> (Arc<FakeStore>, Arc<FakeUserTables>, FakeAccounts) {
    let store = Arc::new(FakeStore::default());
    let tables = Arc::new(FakeUserTables::new(store.db.clone()));
    let accounts = Accounts::new(UnitOfWork::new(store.clone()), tables.clone());
    (store, tables, accounts)
}

/// In-memory business repository that counts store reads
#[derive(Default)]
pub struct InMemoryBusinessRepository {
    pub rows: Mutex<HashMap<Uuid, Business>>,
    pub reads: AtomicUsize,
    pub should_fail: AtomicBool,
}

impl InMemoryBusinessRepository {
    pub fn reads(&self) -> usize {
        self.reads.load(Ordering::SeqCst)
    }

    fn check(&self) -> Result<(), StoreError> {
        if self.should_fail.load(Ordering::SeqCst) {
            return Err(StoreError::Backend("database unavailable".to_string()));
        }
        Ok(())
    }
}

#[async_trait]
impl BusinessRepository for InMemoryBusinessRepository {
    async fn insert(&self, owner_id: Uuid, business: &NewBusiness) -> Result<Business, StoreError> {
        self.check()?;
        let now = Utc::now();
        let created = Business {
            id: Uuid::new_v4(),
            owner_id,
            name: business.name.clone(),
            category: business.category.clone(),
            city: business.city.clone(),
            description: business.description.clone(),
            created_at: now,
            updated_at: now,
        };
        self.rows.lock().unwrap().insert(created.id, created.clone());
        Ok(created)
    }

    async fn find(&self, id: Uuid) -> Result<Option<Business>, StoreError> {
        self.check()?;
        self.reads.fetch_add(1, Ordering::SeqCst);
        Ok(self.rows.lock().unwrap().get(&id).cloned())
    }

    async fn list(&self, filter: &BusinessFilter) -> Result<Vec<Business>, StoreError> {
        self.check()?;
        self.reads.fetch_add(1, Ordering::SeqCst);
        let rows = self.rows.lock().unwrap();
        let mut matching: Vec<Business> = rows
            .values()
            .filter(|b| filter.category.as_ref().map_or(true, |c| &b.category == c))
            .filter(|b| filter.city.as_ref().map_or(true, |c| &b.city == c))
            .cloned()
            .collect();
        matching.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(matching
            .into_iter()
            .skip(filter.offset() as usize)
            .take(filter.per_page as usize)
            .collect())
    }

    async fn update(&self, id: Uuid, update: &BusinessUpdate) -> Result<Option<Business>, StoreError> {
        self.check()?;
        let mut rows = self.rows.lock().unwrap();
        Ok(rows.get_mut(&id).map(|business| {
            update.apply(business);
            business.updated_at = Utc::now();
            business.clone()
        }))
    }

    async fn delete(&self, id: Uuid) -> Result<bool, StoreError> {
        self.check()?;
        Ok(self.rows.lock().unwrap().remove(&id).is_some())
    }
}

/// Mailer that records every message instead of sending it
#[derive(Default)]
pub struct RecordingMailer {
    pub sent: Mutex<Vec<OutgoingEmail>>,
    pub should_fail: AtomicBool,
    pub attempts: AtomicUsize,
}

impl RecordingMailer {
    pub fn sent(&self) -> Vec<OutgoingEmail> {
        self.sent.lock().unwrap().clone()
    }
}

#[async_trait]
impl Mailer for RecordingMailer {
    async fn send(&self, email: &OutgoingEmail) -> Result<(), NotificationError> {
        self.attempts.fetch_add(1, Ordering::SeqCst);
        if self.should_fail.load(Ordering::SeqCst) {
            return Err(NotificationError::Send("relay unreachable".to_string()));
        }
        self.sent.lock().unwrap().push(email.clone());
        Ok(())
    }
}

/// User directory with a lookup counter
#[derive(Default)]
pub struct MockUserDirectory {
    pub users: Mutex<HashMap<Uuid, User>>,
    pub lookups: AtomicUsize,
    pub should_fail: AtomicBool,
}

impl MockUserDirectory {
    pub fn with_user(user: User) -> Self {
        let directory = Self::default();
        directory.users.lock().unwrap().insert(user.id, user);
        directory
    }

    pub fn lookups(&self) -> usize {
        self.lookups.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl UserDirectory for MockUserDirectory {
    async fn find_user(&self, user_id: Uuid) -> Result<Option<User>, StoreError> {
        self.lookups.fetch_add(1, Ordering::SeqCst);
        if self.should_fail.load(Ordering::SeqCst) {
            return Err(StoreError::Backend("database unavailable".to_string()));
        }
        Ok(self.users.lock().unwrap().get(&user_id).cloned())
    }
}

/// Fully wired application over in-memory backends
pub struct TestApp {
    pub router: Router,
    pub tokens: Arc<TokenService>,
    pub users: Arc<UserService>,
    pub businesses: Arc<BusinessService>,
    pub cache: Arc<MemoryCache>,
    pub broker: Arc<MemoryBroker>,
    pub queue: Arc<MessageQueue>,
    pub store: Arc<FakeStore>,
    pub tables: Arc<FakeUserTables>,
    pub business_repo: Arc<InMemoryBusinessRepository>,
}

impl TestApp {
    pub async fn new() -> Self {
        let config = Config::test_config();
        let metrics = Arc::new(Metrics::new().unwrap());
        let tokens = test_tokens();
        let cache = Arc::new(MemoryCache::default());
        let broker = Arc::new(MemoryBroker::new());
        let queue = Arc::new(MessageQueue::new(
            broker.clone(),
            ConsumerSettings {
                poll_interval: Duration::from_millis(20),
                poison_warn_threshold: 10,
                visibility_timeout: Duration::from_secs(30),
            },
        ));
        queue.declare_queue(NOTIFICATIONS_QUEUE).await.unwrap();

        let (store, tables, accounts) = fake_accounts();
        let users = Arc::new(
            UserService::new(Arc::new(accounts), cache.clone(), tokens.clone(), CredentialTtls::default())
                .with_notifications(Arc::new(NotificationPublisher::new(queue.clone(), "no-reply@example.com"))),
        );

        let business_repo = Arc::new(InMemoryBusinessRepository::default());
        let businesses = Arc::new(
            BusinessService::new(business_repo.clone(), cache.clone(), CacheTtls::default())
                .with_metrics(metrics.clone()),
        );

        let auth_state = Arc::new(AuthState {
            tokens: tokens.clone(),
            directory: users.clone(),
            audit_logger: Arc::new(AuditLogger::new(None)),
            metrics: Some(metrics.clone()),
        });

        let app_state = AppState {
            config: Arc::new(config),
            users: users.clone(),
            businesses: businesses.clone(),
            cache: cache.clone(),
            queue: queue.clone(),
            database: None,
            metrics,
        };

        Self {
            router: create_router(app_state, auth_state),
            tokens,
            users,
            businesses,
            cache,
            broker,
            queue,
            store,
            tables,
            business_repo,
        }
    }

    /// Seed an account and return it with a valid access token
    pub fn seed_user(&self, is_active: bool, is_verified: bool, is_entrepreneur: bool) -> (User, String) {
        let user = test_user(is_active, is_verified, is_entrepreneur);
        self.tables.seed(user.clone());
        let token = self.tokens.issue(&user.id.to_string()).unwrap();
        (user, token)
    }
}

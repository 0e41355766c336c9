// Authentication & authorization module

pub mod audit_logger;
pub mod gate;

pub use gate::{auth_middleware, require_entrepreneur, require_role, AuthState, UserDirectory};

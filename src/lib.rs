// Library root for business-hub

pub mod api;
pub mod auth;
pub mod config;
pub mod core;
pub mod metrics;
pub mod queue;
pub mod services;
pub mod state;
pub mod store;

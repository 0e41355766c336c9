// Integration tests organized by module

#[path = "../common/mod.rs"]
mod common;

pub mod thread_safety;

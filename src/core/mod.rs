// Core domain: errors, models, token signing

pub mod errors;
pub mod models;
pub mod token;

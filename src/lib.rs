pub mod auth;
pub mod config;
pub mod error;
pub mod models;
pub mod openapi;
pub mod password;
pub mod policy;
pub mod quote;
pub mod repo;
pub mod routes;
pub mod scheduler;

// Re-export commonly used items for tests / the binary
pub use routes::{config, not_found, AppState};
pub use scheduler::Scheduler;

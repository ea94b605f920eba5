// Public API for integration tests and the server binary

pub mod api;
pub mod auth;
pub mod buzz;
pub mod config;
pub mod error;
pub mod protocol;
pub mod questions;
pub mod state;
pub mod types;
pub mod ws;

// Re-export broadcast for testing
pub mod broadcast;

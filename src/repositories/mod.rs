//! # Repositories
//!
//! Database access for the runsync service.

pub mod user_integration;

pub use user_integration::{TokenUpdate, UserIntegrationRepository};

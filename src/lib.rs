//! # runsync
//!
//! Connects users to external fitness platforms over OAuth2, keeps their
//! tokens fresh and moves activities between connected platforms.

pub mod auth;
pub mod config;
pub mod db;
pub mod error;
pub mod handlers;
pub mod integrations;
pub mod models;
pub mod oauth_flow;
pub mod repositories;
pub mod server;
pub mod sync;
pub mod telemetry;
pub mod token_guard;
pub use migration;

//! # Data Models
//!
//! SeaORM entities and shared response types for the runsync service.

use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

pub mod user_integration;

pub use user_integration::{
    ConnectionMetadata, ConnectionStatus, Entity as UserIntegration, ProviderName,
};

/// Basic service information response
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct ServiceInfo {
    /// The name of the service
    pub service: String,
    /// The version of the service
    pub version: String,
}

impl Default for ServiceInfo {
    fn default() -> Self {
        Self {
            service: "runsync".to_string(),
            version: env!("CARGO_PKG_VERSION").to_string(),
        }
    }
}

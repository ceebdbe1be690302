//! # Integrations
//!
//! Provider-agnostic contract for external fitness platforms, the registry
//! that resolves provider identifiers, and the Fitbit and Strava clients.

pub mod error;
pub mod filter;
pub mod fitbit;
pub mod http;
pub mod pkce;
pub mod provider;
pub mod registry;
pub mod strava;

pub use error::IntegrationError;
pub use fitbit::{FitbitConfig, FitbitProvider};
pub use provider::{
    AccessToken, ActivityFile, FileMetadata, NewActivity, Provider, ProviderMetadata,
    TokenResponse, UploadDetails,
};
pub use registry::{Registry, RegistryError};
pub use strava::{StravaConfig, StravaProvider};

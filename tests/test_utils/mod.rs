//! Test utilities shared by the integration tests.
//!
//! Provides in-memory SQLite databases with migrations applied, seeded
//! connection records and provider clients pointed at mock servers.

#![allow(dead_code)]

use std::sync::Arc;

use anyhow::Result;
use chrono::{DateTime, Duration, Utc};
use migration::{Migrator, MigratorTrait};
use runsync::config::AppConfig;
use runsync::integrations::{StravaConfig, StravaProvider, FitbitConfig, FitbitProvider};
use runsync::models::{ConnectionMetadata, ProviderName, user_integration};
use runsync::repositories::{TokenUpdate, UserIntegrationRepository};
use sea_orm::{Database, DatabaseConnection};
use uuid::Uuid;

pub const JWT_SECRET: &str = "integration-test-secret";

/// Sets up an in-memory SQLite database with all migrations applied.
pub async fn setup_test_db() -> Result<DatabaseConnection> {
    let db = Database::connect("sqlite::memory:").await?;
    Migrator::up(&db, None).await?;
    Ok(db)
}

/// Sets up an in-memory SQLite database with all migrations applied and returns an Arc.
pub async fn setup_test_db_arc() -> Result<Arc<DatabaseConnection>> {
    Ok(Arc::new(setup_test_db().await?))
}

/// Configuration whose provider endpoints all point at `mock_uri`.
pub fn test_config(mock_uri: &str) -> AppConfig {
    AppConfig {
        profile: "test".into(),
        jwt_secret_key: Some(JWT_SECRET.into()),
        integration_callback_redirect_url_success: "https://app.example/connected".into(),
        integration_callback_redirect_url_error: "https://app.example/failed".into(),
        fitbit_client_id: Some("fitbit-client".into()),
        fitbit_client_secret: Some("fitbit-secret".into()),
        fitbit_token_url: Some(format!("{mock_uri}/oauth2/token")),
        fitbit_api_base: Some(mock_uri.to_string()),
        strava_client_id: Some("strava-client".into()),
        strava_client_secret: Some("strava-secret".into()),
        strava_token_url: Some(format!("{mock_uri}/oauth/token")),
        strava_api_base: Some(format!("{mock_uri}/api/v3")),
        ..AppConfig::default()
    }
}

pub fn strava_provider(mock_uri: &str) -> Arc<StravaProvider> {
    let mut config = StravaConfig::new("strava-client", "strava-secret");
    config.token_url = format!("{mock_uri}/oauth/token");
    config.api_base = format!("{mock_uri}/api/v3");
    Arc::new(StravaProvider::new(config, reqwest::Client::new()))
}

pub fn fitbit_provider(mock_uri: &str) -> Arc<FitbitProvider> {
    let mut config = FitbitConfig::new("fitbit-client", "fitbit-secret");
    config.token_url = format!("{mock_uri}/oauth2/token");
    config.api_base = mock_uri.to_string();
    Arc::new(FitbitProvider::new(config, reqwest::Client::new()))
}

/// Inserts a `completed` connection holding the given credentials.
pub async fn insert_completed_connection(
    repo: &UserIntegrationRepository,
    user_id: Uuid,
    provider: ProviderName,
    access_token: &str,
    refresh_token: &str,
    expires_at: DateTime<Utc>,
) -> Result<user_integration::Model> {
    let pending = repo
        .create_pending(user_id, provider, &format!("seed-{}", Uuid::new_v4()))
        .await?;
    let completed = repo
        .complete(
            pending.id,
            TokenUpdate {
                access_token,
                refresh_token,
                expires_at,
            },
            ConnectionMetadata::default(),
        )
        .await?
        .ok_or_else(|| anyhow::anyhow!("seeded connection was not pending"))?;
    Ok(completed)
}

/// A completed connection whose token stays valid for an hour.
pub async fn insert_fresh_connection(
    repo: &UserIntegrationRepository,
    user_id: Uuid,
    provider: ProviderName,
    access_token: &str,
) -> Result<user_integration::Model> {
    insert_completed_connection(
        repo,
        user_id,
        provider,
        access_token,
        "refresh-unused",
        Utc::now() + Duration::hours(1),
    )
    .await
}

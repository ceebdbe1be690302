//! # Integration Handlers
//!
//! Listing providers and connections, starting the OAuth flow and reading
//! activities through a connected provider.

use axum::{
    extract::{Path, Query, State, rejection::QueryRejection},
    response::Json,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use utoipa::{IntoParams, ToSchema};
use uuid::Uuid;

use crate::auth::AuthUser;
use crate::error::ApiError;
use crate::integrations::IntegrationError;
use crate::models::{ConnectionStatus, ProviderName};
use crate::server::AppState;

/// One provider as seen by the current user
#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct AppInfo {
    /// Display name (e.g. "Strava")
    pub name: String,
    /// Provider identifier used in URLs
    #[serde(rename = "type")]
    pub provider_type: String,
    pub connect_url: String,
    pub activities_url: String,
    /// `connected` or `not_connected`
    pub status: String,
    /// OAuth scopes requested when connecting
    pub scopes: Vec<String>,
    /// Accepts activity files as a sync target
    pub supports_upload: bool,
    /// Accepts structured activity creation
    pub supports_push: bool,
}

/// A completed connection owned by the current user
#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct ConnectedIntegration {
    pub id: Uuid,
    pub integration_name: ProviderName,
    pub status: ConnectionStatus,
    pub created_at: DateTime<Utc>,
    pub last_synced_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct RedirectUrlResponse {
    /// Provider authorization URL the client should navigate to
    pub redirect_url: String,
}

#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct ActivitiesResponse {
    #[schema(value_type = Vec<Object>)]
    pub activities: Vec<Value>,
}

#[derive(Debug, Deserialize, IntoParams)]
#[into_params(parameter_in = Query)]
pub struct ActivitiesQuery {
    /// Only return activities after this instant (RFC 3339); defaults to the provider lookback
    pub since: Option<DateTime<Utc>>,
}

/// List every supported provider with the caller's connection status
#[utoipa::path(
    get,
    path = "/integrations",
    security(("bearer_auth" = [])),
    responses(
        (status = 200, description = "Supported providers", body = [AppInfo]),
        (status = 401, description = "Missing or invalid bearer token", body = ApiError)
    ),
    tag = "integrations"
)]
pub async fn list_apps(
    State(state): State<AppState>,
    user: AuthUser,
) -> Result<Json<Vec<AppInfo>>, ApiError> {
    let connected: Vec<ProviderName> = state
        .repo()
        .list_completed_by_user(user.user_id)
        .await?
        .into_iter()
        .map(|record| record.provider_name)
        .collect();

    let apps = state
        .registry
        .list_metadata()
        .into_iter()
        .map(|metadata| {
            let name = metadata.name.as_str();
            AppInfo {
                name: metadata.display_name,
                provider_type: name.to_string(),
                connect_url: format!("/integrations/{name}/connect"),
                activities_url: format!("/integrations/{name}/activities"),
                status: if connected.contains(&metadata.name) {
                    "connected".to_string()
                } else {
                    "not_connected".to_string()
                },
                scopes: metadata.scopes,
                supports_upload: metadata.supports_upload,
                supports_push: metadata.supports_push,
            }
        })
        .collect();

    Ok(Json(apps))
}

/// List the caller's completed connections, newest first
#[utoipa::path(
    get,
    path = "/integrations/connected",
    security(("bearer_auth" = [])),
    responses(
        (status = 200, description = "Completed connections", body = [ConnectedIntegration]),
        (status = 401, description = "Missing or invalid bearer token", body = ApiError)
    ),
    tag = "integrations"
)]
pub async fn list_connected(
    State(state): State<AppState>,
    user: AuthUser,
) -> Result<Json<Vec<ConnectedIntegration>>, ApiError> {
    let connections = state
        .repo()
        .list_completed_by_user(user.user_id)
        .await?
        .into_iter()
        .rev()
        .map(|record| ConnectedIntegration {
            id: record.id,
            integration_name: record.provider_name,
            status: record.status,
            created_at: record.created_at.with_timezone(&Utc),
            last_synced_at: record.last_synced_at.map(|at| at.with_timezone(&Utc)),
        })
        .collect();

    Ok(Json(connections))
}

/// Start the OAuth flow for a provider
#[utoipa::path(
    get,
    path = "/integrations/{provider}/connect",
    security(("bearer_auth" = [])),
    params(
        ("provider" = String, Path, description = "Provider identifier, e.g. 'strava'")
    ),
    responses(
        (status = 200, description = "Authorization URL generated", body = RedirectUrlResponse),
        (status = 400, description = "Invalid integration type", body = ApiError),
        (status = 401, description = "Missing or invalid bearer token", body = ApiError)
    ),
    tag = "integrations"
)]
pub async fn connect(
    State(state): State<AppState>,
    user: AuthUser,
    Path(provider): Path<String>,
) -> Result<Json<RedirectUrlResponse>, ApiError> {
    let provider = state
        .registry
        .resolve(&provider)
        .map_err(IntegrationError::from)?;

    let url = state
        .oauth_flow()
        .authorization_url(provider.as_ref(), user.user_id)
        .await?;

    Ok(Json(RedirectUrlResponse {
        redirect_url: url.to_string(),
    }))
}

/// List distance-bearing activities from a connected provider
#[utoipa::path(
    get,
    path = "/integrations/{provider}/activities",
    security(("bearer_auth" = [])),
    params(
        ("provider" = String, Path, description = "Provider identifier, e.g. 'fitbit'"),
        ActivitiesQuery
    ),
    responses(
        (status = 200, description = "Activity summaries", body = ActivitiesResponse),
        (status = 400, description = "Invalid integration type, invalid query or integration not connected", body = ApiError),
        (status = 401, description = "Missing or invalid bearer token", body = ApiError),
        (status = 502, description = "Provider request failed", body = ApiError)
    ),
    tag = "integrations"
)]
pub async fn list_activities(
    State(state): State<AppState>,
    user: AuthUser,
    Path(provider): Path<String>,
    query: Result<Query<ActivitiesQuery>, QueryRejection>,
) -> Result<Json<ActivitiesResponse>, ApiError> {
    let Query(query) = query?;
    let mut session = state.session(user.user_id, &provider).await?;
    let activities = session.fetch_activities(query.since).await?;

    Ok(Json(ActivitiesResponse { activities }))
}

/// Fetch one activity's full details from a connected provider
#[utoipa::path(
    get,
    path = "/integrations/{provider}/activities/{activity_ref}",
    security(("bearer_auth" = [])),
    params(
        ("provider" = String, Path, description = "Provider identifier"),
        ("activity_ref" = String, Path, description = "Provider-specific activity identifier")
    ),
    responses(
        (status = 200, description = "Activity details as returned by the provider"),
        (status = 400, description = "Invalid integration type or integration not connected", body = ApiError),
        (status = 401, description = "Missing or invalid bearer token", body = ApiError),
        (status = 502, description = "Provider request failed", body = ApiError)
    ),
    tag = "integrations"
)]
pub async fn activity_details(
    State(state): State<AppState>,
    user: AuthUser,
    Path((provider, activity_ref)): Path<(String, String)>,
) -> Result<Json<Value>, ApiError> {
    let mut session = state.session(user.user_id, &provider).await?;
    let details = session.get_activity_details(&activity_ref).await?;

    Ok(Json(details))
}

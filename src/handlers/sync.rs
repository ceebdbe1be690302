//! # Sync Handler
//!
//! On-demand transfer of one activity between two of the caller's connections.

use axum::{extract::State, response::Json};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use utoipa::ToSchema;

use crate::auth::AuthUser;
use crate::error::ApiError;
use crate::sync::ActivitySyncer;
use crate::server::AppState;

#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct SyncRequest {
    /// Provider the activity is read from
    pub source_integration_name: String,
    /// Provider the activity is uploaded to
    pub target_integration_name: String,
    /// Activity identifier at the source provider
    pub source_activity_ref: String,
}

#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct SyncResponse {
    pub message: String,
    /// Target provider's upload response, unchanged
    #[schema(value_type = Object)]
    pub target_activity_file: Value,
}

/// Copy one activity from a source connection to a target connection
#[utoipa::path(
    post,
    path = "/sync",
    security(("bearer_auth" = [])),
    request_body = SyncRequest,
    responses(
        (status = 200, description = "Activity synced", body = SyncResponse),
        (status = 400, description = "Invalid integration type or integration not connected", body = ApiError),
        (status = 401, description = "Missing or invalid bearer token", body = ApiError),
        (status = 501, description = "Target provider cannot accept uploads", body = ApiError),
        (status = 502, description = "Provider request failed", body = ApiError)
    ),
    tag = "sync"
)]
pub async fn sync_activity(
    State(state): State<AppState>,
    user: AuthUser,
    request: Result<Json<SyncRequest>, axum::extract::rejection::JsonRejection>,
) -> Result<Json<SyncResponse>, ApiError> {
    let Json(request) = request?;

    let source = state
        .session(user.user_id, &request.source_integration_name)
        .await?;
    let target = state
        .session(user.user_id, &request.target_integration_name)
        .await?;

    let target_activity_file = ActivitySyncer::new(source, target)
        .sync(&request.source_activity_ref)
        .await?;

    Ok(Json(SyncResponse {
        message: "Synced activity".to_string(),
        target_activity_file,
    }))
}

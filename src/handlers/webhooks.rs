//! # Webhook Handlers
//!
//! Provider push notifications. Payloads are handed to the provider, which
//! currently only logs them.

use axum::{
    extract::{Path, State},
    response::Json,
};
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use utoipa::ToSchema;

use crate::error::ApiError;
use crate::integrations::IntegrationError;
use crate::server::AppState;

/// Webhook accept response
#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct WebhookAcceptResponse {
    /// Acceptance status
    pub status: String,
}

/// Receive a provider webhook
#[utoipa::path(
    post,
    path = "/integrations/{provider}/webhook",
    params(
        ("provider" = String, Path, description = "Provider identifier")
    ),
    responses(
        (status = 200, description = "Webhook accepted", body = WebhookAcceptResponse),
        (status = 400, description = "Invalid integration type or malformed body", body = ApiError)
    ),
    tag = "webhooks"
)]
pub async fn receive_webhook(
    State(state): State<AppState>,
    Path(provider): Path<String>,
    payload: Result<Json<JsonValue>, axum::extract::rejection::JsonRejection>,
) -> Result<Json<WebhookAcceptResponse>, ApiError> {
    let Json(payload) = payload?;
    let provider = state
        .registry
        .resolve(&provider)
        .map_err(IntegrationError::from)?;

    provider.handle_webhook(&payload).await?;

    Ok(Json(WebhookAcceptResponse {
        status: "received".to_string(),
    }))
}

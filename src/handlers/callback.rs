//! # OAuth Callback Handlers
//!
//! Unauthenticated endpoints providers redirect the browser to. Every outcome
//! ends in a redirect to the configured success or error page; failure detail
//! is only logged.

use axum::{
    extract::{Path, Query, State},
    response::Redirect,
};
use tracing::{error, info};

use crate::integrations::IntegrationError;
use crate::models::ProviderName;
use crate::oauth_flow::CallbackParams;
use crate::server::AppState;

/// Complete the OAuth flow for a provider
#[utoipa::path(
    get,
    path = "/integrations/callback/{provider}/oauth",
    params(
        ("provider" = String, Path, description = "Provider identifier, e.g. 'strava'"),
        CallbackParams
    ),
    responses(
        (status = 303, description = "Redirect to the success or error page")
    ),
    tag = "integrations"
)]
pub async fn oauth_callback(
    State(state): State<AppState>,
    Path(provider): Path<String>,
    Query(params): Query<CallbackParams>,
) -> Redirect {
    finish_callback(&state, &provider, &params).await
}

/// Fitbit callback kept at its original fixed path
#[utoipa::path(
    get,
    path = "/integrations/callback/fitbit",
    params(CallbackParams),
    responses(
        (status = 303, description = "Redirect to the success or error page")
    ),
    tag = "integrations"
)]
pub async fn fitbit_callback(
    State(state): State<AppState>,
    Query(params): Query<CallbackParams>,
) -> Redirect {
    finish_callback(&state, ProviderName::Fitbit.as_str(), &params).await
}

async fn finish_callback(state: &AppState, provider: &str, params: &CallbackParams) -> Redirect {
    let outcome = match state.registry.resolve(provider) {
        Ok(provider) => {
            state
                .oauth_flow()
                .handle_callback(provider.as_ref(), params)
                .await
        }
        Err(err) => Err(IntegrationError::from(err)),
    };

    match outcome {
        Ok(record) => {
            info!(provider, connection_id = %record.id, "OAuth callback completed");
            Redirect::to(&state.config.integration_callback_redirect_url_success)
        }
        Err(err) => {
            error!(provider, kind = err.kind(), error = %err, "Error handling OAuth callback");
            Redirect::to(&state.config.integration_callback_redirect_url_error)
        }
    }
}

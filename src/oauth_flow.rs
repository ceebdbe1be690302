//! # OAuth Flow
//!
//! Drives a provider through the authorization-code grant: issuing the
//! authorization URL backed by a `pending` connection record, then resolving
//! the provider's callback into a `completed` or `failed` record.

use chrono::Utc;
use metrics::counter;
use serde::Deserialize;
use tracing::{info, instrument, warn};
use url::Url;
use utoipa::IntoParams;
use uuid::Uuid;

use crate::integrations::{IntegrationError, Provider, pkce};
use crate::models::user_integration;
use crate::repositories::{TokenUpdate, UserIntegrationRepository};

/// Query parameters a provider appends when redirecting back to us.
#[derive(Debug, Clone, Default, Deserialize, IntoParams)]
#[into_params(parameter_in = Query)]
pub struct CallbackParams {
    /// Authorization code issued by the provider
    pub code: Option<String>,
    /// State token issued with the authorization URL
    pub state: Option<String>,
    /// Error code reported by the provider when the user denied access
    pub error: Option<String>,
}

/// Authorization-code flow controller shared by every provider.
#[derive(Debug, Clone)]
pub struct OAuthFlow {
    repo: UserIntegrationRepository,
}

impl OAuthFlow {
    pub fn new(repo: UserIntegrationRepository) -> Self {
        Self { repo }
    }

    /// Creates a `pending` record bound to a fresh state token and returns the
    /// provider's authorize URL carrying that state.
    #[instrument(skip(self, provider), fields(provider = %provider.name()))]
    pub async fn authorization_url(
        &self,
        provider: &dyn Provider,
        user_id: Uuid,
    ) -> Result<Url, IntegrationError> {
        let state_token = pkce::generate_state_token();
        let url = provider.authorization_url(&state_token)?;

        let record = self
            .repo
            .create_pending(user_id, provider.name(), &state_token)
            .await?;

        info!(
            connection_id = %record.id,
            user_id = %user_id,
            "Issued authorization URL"
        );

        Ok(url)
    }

    /// Consumes a provider callback.
    ///
    /// Missing `code` or `state` is rejected before any lookup or network call.
    /// An exchange failure marks the record `failed` and is then returned; a
    /// failure to persist that transition is logged, never substituted for it.
    #[instrument(skip(self, provider, params), fields(provider = %provider.name()))]
    pub async fn handle_callback(
        &self,
        provider: &dyn Provider,
        params: &CallbackParams,
    ) -> Result<user_integration::Model, IntegrationError> {
        let result = self.complete_connection(provider, params).await;

        let outcome = match &result {
            Ok(_) => "completed",
            Err(err) => err.kind(),
        };
        counter!(
            "runsync_oauth_callbacks_total",
            "provider" => provider.name().as_str(),
            "outcome" => outcome
        )
        .increment(1);

        result
    }

    async fn complete_connection(
        &self,
        provider: &dyn Provider,
        params: &CallbackParams,
    ) -> Result<user_integration::Model, IntegrationError> {
        let code = non_empty(params.code.as_deref()).ok_or_else(|| {
            if let Some(error) = params.error.as_deref() {
                warn!(provider_error = %error, "Provider reported authorization error");
            }
            IntegrationError::MissingParameter("code")
        })?;
        let state = non_empty(params.state.as_deref())
            .ok_or(IntegrationError::MissingParameter("state"))?;

        let record = self
            .repo
            .find_pending_by_state(provider.name(), state)
            .await?
            .ok_or(IntegrationError::RecordNotFound)?;

        // The stored token is the PKCE verifier for providers that need one.
        let verifier = record.state_token.as_deref().unwrap_or(state);

        let exchanged = provider
            .exchange_code_for_token(code, verifier)
            .await
            .and_then(|tokens| {
                let expires_at = tokens.expiry(provider.name(), Utc::now())?;
                Ok((tokens, expires_at))
            });
        let (tokens, expires_at) = match exchanged {
            Ok(exchanged) => exchanged,
            Err(err) => {
                warn!(connection_id = %record.id, error = %err, "Code exchange failed");
                if let Err(store_err) = self.repo.mark_failed(record.id, &err.to_string()).await {
                    warn!(
                        connection_id = %record.id,
                        error = %store_err,
                        "Failed to record exchange failure"
                    );
                }
                return Err(err);
            }
        };

        let update = TokenUpdate {
            access_token: &tokens.access_token,
            refresh_token: &tokens.refresh_token,
            expires_at,
        };

        // A concurrent callback with the same state may have won the transition.
        let completed = self
            .repo
            .complete(record.id, update, tokens.metadata())
            .await?
            .ok_or(IntegrationError::RecordNotFound)?;

        info!(
            connection_id = %completed.id,
            user_id = %completed.user_id,
            "Integration connected"
        );

        Ok(completed)
    }
}

fn non_empty(value: Option<&str>) -> Option<&str> {
    value.filter(|v| !v.is_empty())
}

//! The uniform contract every external fitness provider implements.

use std::collections::BTreeMap;
use std::fmt;

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use url::Url;
use utoipa::ToSchema;

use super::error::IntegrationError;
use crate::models::{ConnectionMetadata, ProviderName};

/// Bearer credential handed to authenticated provider calls.
///
/// Only the token guard can mint one, so every authenticated call is forced
/// through the refresh check.
#[derive(Clone, PartialEq, Eq)]
pub struct AccessToken(String);

impl AccessToken {
    pub(crate) fn new(token: impl Into<String>) -> Self {
        Self(token.into())
    }

    pub fn secret(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for AccessToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("AccessToken([REDACTED])")
    }
}

/// Token endpoint payload. Anything beyond the three token fields is kept in
/// `extra` and ends up in the connection metadata.
#[derive(Clone, Deserialize)]
pub struct TokenResponse {
    pub access_token: String,
    pub refresh_token: String,
    pub expires_in: i64,
    #[serde(flatten)]
    pub extra: BTreeMap<String, Value>,
}

impl TokenResponse {
    /// Parse a token payload, rejecting it if any token field is absent.
    ///
    /// An `expires_in` too large to turn into a timestamp is rejected here too.
    pub fn from_json(provider: ProviderName, payload: Value) -> Result<Self, IntegrationError> {
        let tokens: Self = serde_json::from_value(payload).map_err(|err| {
            IntegrationError::malformed(provider, format!("invalid token payload: {err}"))
        })?;
        tokens.expiry(provider, Utc::now())?;
        Ok(tokens)
    }

    /// `None` when `issued_at + expires_in` is not representable.
    pub fn expires_at(&self, issued_at: DateTime<Utc>) -> Option<DateTime<Utc>> {
        Duration::try_seconds(self.expires_in).and_then(|ttl| issued_at.checked_add_signed(ttl))
    }

    /// [`expires_at`](Self::expires_at), reporting an unrepresentable expiry as a malformed response.
    pub fn expiry(
        &self,
        provider: ProviderName,
        issued_at: DateTime<Utc>,
    ) -> Result<DateTime<Utc>, IntegrationError> {
        self.expires_at(issued_at).ok_or_else(|| {
            IntegrationError::malformed(
                provider,
                format!("expires_in {} is out of range", self.expires_in),
            )
        })
    }

    pub fn metadata(&self) -> ConnectionMetadata {
        ConnectionMetadata::from_extras(self.extra.clone())
    }
}

impl fmt::Debug for TokenResponse {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TokenResponse")
            .field("access_token", &"[REDACTED]")
            .field("refresh_token", &"[REDACTED]")
            .field("expires_in", &self.expires_in)
            .field("extra", &self.extra)
            .finish()
    }
}

/// Interchange file (TCX/GPX family) moved between providers during a sync.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ActivityFile {
    pub content: Vec<u8>,
    pub content_type: String,
}

/// Describes an uploaded file; serialized as `{"type": "<content type>"}`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileMetadata {
    #[serde(rename = "type")]
    pub content_type: String,
}

/// Optional descriptive fields sent alongside an uploaded file.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct UploadDetails {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub external_id: Option<String>,
}

/// Structured activity for providers with native activity creation.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct NewActivity {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, rename = "type", skip_serializing_if = "Option::is_none")]
    pub activity_type: Option<String>,
    /// ISO 8601 local start time
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub start_date_local: Option<String>,
    /// Elapsed time in seconds
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub elapsed_time: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    /// Distance in meters
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub distance: Option<f64>,
}

/// Static description of a provider's capabilities.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, ToSchema)]
pub struct ProviderMetadata {
    pub name: ProviderName,
    pub display_name: String,
    pub scopes: Vec<String>,
    pub supports_upload: bool,
    pub supports_push: bool,
}

#[async_trait]
pub trait Provider: Send + Sync {
    fn name(&self) -> ProviderName;

    fn metadata(&self) -> ProviderMetadata;

    /// Authorize-endpoint URL for a freshly issued state token.
    fn authorization_url(&self, state_token: &str) -> Result<Url, IntegrationError>;

    /// `state_token` is the one stored on the pending record; PKCE providers
    /// send it back as the `code_verifier`.
    async fn exchange_code_for_token(
        &self,
        code: &str,
        state_token: &str,
    ) -> Result<TokenResponse, IntegrationError>;

    async fn exchange_refresh_token_for_token(
        &self,
        refresh_token: &str,
    ) -> Result<TokenResponse, IntegrationError>;

    /// Unfiltered activity summaries from the listing endpoint.
    ///
    /// `since` falls back to the provider's default lookback window.
    async fn list_activities(
        &self,
        token: &AccessToken,
        since: Option<DateTime<Utc>>,
    ) -> Result<Vec<Value>, IntegrationError>;

    async fn get_activity_details(
        &self,
        token: &AccessToken,
        activity_ref: &str,
    ) -> Result<Value, IntegrationError>;

    async fn get_activity_file(
        &self,
        token: &AccessToken,
        activity_ref: &str,
    ) -> Result<ActivityFile, IntegrationError>;

    async fn upload_activity(
        &self,
        token: &AccessToken,
        file: &ActivityFile,
        file_metadata: Option<&FileMetadata>,
        details: Option<&UploadDetails>,
    ) -> Result<Value, IntegrationError>;

    async fn push_activity(
        &self,
        token: &AccessToken,
        activity: &NewActivity,
    ) -> Result<Value, IntegrationError>;

    /// Inbound provider notifications are acknowledged and logged only.
    async fn handle_webhook(&self, payload: &Value) -> Result<(), IntegrationError> {
        tracing::info!(provider = %self.name(), payload = %payload, "Webhook received");
        Ok(())
    }
}

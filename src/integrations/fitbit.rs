//! Fitbit provider
//!
//! Authorization code flow with PKCE (S256). The state token issued for the
//! pending record is reused as the code verifier. Token calls authenticate with
//! HTTP Basic client credentials. Fitbit offers no write API for activities.

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use reqwest::{Client, header};
use serde::Deserialize;
use serde_json::Value;
use tracing::{debug, instrument};
use url::Url;

use super::error::IntegrationError;
use super::http::{
    activity_ref as checked_ref, bearer, endpoint, ensure_success, json_body,
};
use super::pkce::{CODE_CHALLENGE_METHOD, code_challenge};
use super::provider::{
    AccessToken, ActivityFile, FileMetadata, NewActivity, Provider, ProviderMetadata,
    TokenResponse, UploadDetails,
};
use crate::models::ProviderName;

const PROVIDER: ProviderName = ProviderName::Fitbit;
const SCOPES: &str = "activity profile";
const DEFAULT_LOOKBACK_DAYS: i64 = 30;
const PAGE_SIZE: u32 = 20;
const TCX_CONTENT_TYPE: &str = "application/vnd.garmin.tcx+xml";

/// Fitbit credentials and endpoints.
#[derive(Debug, Clone)]
pub struct FitbitConfig {
    pub client_id: String,
    pub client_secret: String,
    pub redirect_uri: Option<String>,
    pub authorize_url: String,
    pub token_url: String,
    pub api_base: String,
}

impl FitbitConfig {
    /// Production endpoints for the given credentials.
    pub fn new(client_id: impl Into<String>, client_secret: impl Into<String>) -> Self {
        Self {
            client_id: client_id.into(),
            client_secret: client_secret.into(),
            redirect_uri: None,
            authorize_url: "https://www.fitbit.com/oauth2/authorize".to_string(),
            token_url: "https://api.fitbit.com/oauth2/token".to_string(),
            api_base: "https://api.fitbit.com".to_string(),
        }
    }
}

#[derive(Debug, Deserialize)]
struct ActivityList {
    #[serde(default)]
    activities: Vec<Value>,
}

pub struct FitbitProvider {
    config: FitbitConfig,
    client: Client,
}

impl FitbitProvider {
    pub fn new(config: FitbitConfig, client: Client) -> Self {
        Self { config, client }
    }

    fn api_url(&self, segments: &[&str]) -> Result<Url, IntegrationError> {
        endpoint(PROVIDER, &self.config.api_base, segments)
    }

    async fn token_request(&self, params: &[(&str, &str)]) -> Result<TokenResponse, IntegrationError> {
        let response = self
            .client
            .post(&self.config.token_url)
            .basic_auth(&self.config.client_id, Some(&self.config.client_secret))
            .form(params)
            .send()
            .await
            .map_err(IntegrationError::transport(PROVIDER))?;

        let payload: Value = json_body(PROVIDER, response).await?;
        TokenResponse::from_json(PROVIDER, payload)
    }
}

#[async_trait]
impl Provider for FitbitProvider {
    fn name(&self) -> ProviderName {
        PROVIDER
    }

    fn metadata(&self) -> ProviderMetadata {
        ProviderMetadata {
            name: PROVIDER,
            display_name: "Fitbit".to_string(),
            scopes: SCOPES.split(' ').map(str::to_string).collect(),
            supports_upload: false,
            supports_push: false,
        }
    }

    fn authorization_url(&self, state_token: &str) -> Result<Url, IntegrationError> {
        let mut url = Url::parse(&self.config.authorize_url).map_err(|err| {
            IntegrationError::malformed(PROVIDER, format!("invalid authorize URL: {err}"))
        })?;

        {
            let mut query = url.query_pairs_mut();
            query
                .append_pair("client_id", &self.config.client_id)
                .append_pair("scope", SCOPES)
                .append_pair("response_type", "code")
                .append_pair("code_challenge", &code_challenge(state_token))
                .append_pair("code_challenge_method", CODE_CHALLENGE_METHOD)
                .append_pair("state", state_token);
            if let Some(redirect_uri) = &self.config.redirect_uri {
                query.append_pair("redirect_uri", redirect_uri);
            }
        }

        Ok(url)
    }

    #[instrument(skip_all, fields(provider = %PROVIDER))]
    async fn exchange_code_for_token(
        &self,
        code: &str,
        state_token: &str,
    ) -> Result<TokenResponse, IntegrationError> {
        let mut params = vec![
            ("client_id", self.config.client_id.as_str()),
            ("grant_type", "authorization_code"),
            ("code", code),
            ("code_verifier", state_token),
        ];
        if let Some(redirect_uri) = &self.config.redirect_uri {
            params.push(("redirect_uri", redirect_uri.as_str()));
        }

        self.token_request(&params).await
    }

    #[instrument(skip_all, fields(provider = %PROVIDER))]
    async fn exchange_refresh_token_for_token(
        &self,
        refresh_token: &str,
    ) -> Result<TokenResponse, IntegrationError> {
        self.token_request(&[
            ("client_id", self.config.client_id.as_str()),
            ("grant_type", "refresh_token"),
            ("refresh_token", refresh_token),
        ])
        .await
    }

    async fn list_activities(
        &self,
        token: &AccessToken,
        since: Option<DateTime<Utc>>,
    ) -> Result<Vec<Value>, IntegrationError> {
        let since = since.unwrap_or_else(|| Utc::now() - Duration::days(DEFAULT_LOOKBACK_DAYS));
        let after_date = since.format("%Y-%m-%d").to_string();
        let limit = PAGE_SIZE.to_string();
        debug!(after_date = %after_date, "Listing Fitbit activities");

        // Fitbit only accepts ascending order together with afterDate
        let response = self
            .client
            .get(self.api_url(&["1", "user", "-", "activities", "list.json"])?)
            .header(header::AUTHORIZATION, bearer(token))
            .query(&[
                ("afterDate", after_date.as_str()),
                ("sort", "asc"),
                ("offset", "0"),
                ("limit", limit.as_str()),
            ])
            .send()
            .await
            .map_err(IntegrationError::transport(PROVIDER))?;

        let list: ActivityList = json_body(PROVIDER, response).await?;
        Ok(list.activities)
    }

    async fn get_activity_details(
        &self,
        token: &AccessToken,
        activity_ref: &str,
    ) -> Result<Value, IntegrationError> {
        let resource = format!("{}.json", checked_ref(activity_ref)?);
        let response = self
            .client
            .get(self.api_url(&["1", "user", "-", "activities", resource.as_str()])?)
            .header(header::AUTHORIZATION, bearer(token))
            .send()
            .await
            .map_err(IntegrationError::transport(PROVIDER))?;

        json_body(PROVIDER, response).await
    }

    async fn get_activity_file(
        &self,
        token: &AccessToken,
        activity_ref: &str,
    ) -> Result<ActivityFile, IntegrationError> {
        let resource = format!("{}.tcx", checked_ref(activity_ref)?);
        let response = self
            .client
            .get(self.api_url(&["1", "user", "-", "activities", resource.as_str()])?)
            .header(header::AUTHORIZATION, bearer(token))
            .send()
            .await
            .map_err(IntegrationError::transport(PROVIDER))?;

        let response = ensure_success(PROVIDER, response).await?;
        let content_type = response
            .headers()
            .get(header::CONTENT_TYPE)
            .and_then(|value| value.to_str().ok())
            .unwrap_or(TCX_CONTENT_TYPE)
            .to_string();
        let content = response
            .bytes()
            .await
            .map_err(IntegrationError::transport(PROVIDER))?
            .to_vec();

        Ok(ActivityFile {
            content,
            content_type,
        })
    }

    async fn upload_activity(
        &self,
        _token: &AccessToken,
        _file: &ActivityFile,
        _file_metadata: Option<&FileMetadata>,
        _details: Option<&UploadDetails>,
    ) -> Result<Value, IntegrationError> {
        Err(IntegrationError::NotSupported {
            provider: PROVIDER,
            capability: "activity upload",
        })
    }

    async fn push_activity(
        &self,
        _token: &AccessToken,
        _activity: &NewActivity,
    ) -> Result<Value, IntegrationError> {
        Err(IntegrationError::NotSupported {
            provider: PROVIDER,
            capability: "activity push",
        })
    }
}

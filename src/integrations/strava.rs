//! Strava provider
//!
//! Client credentials travel as request parameters on the token endpoint; no
//! PKCE. Strava is the only provider here that accepts uploads and native
//! activity creation.

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use reqwest::{Client, header};
use reqwest::multipart::{Form, Part};
use serde_json::Value;
use tracing::{debug, instrument};
use url::Url;

use super::error::IntegrationError;
use super::http::{
    activity_ref as checked_ref, bearer, endpoint, ensure_success, json_body,
};
use super::provider::{
    AccessToken, ActivityFile, FileMetadata, NewActivity, Provider, ProviderMetadata,
    TokenResponse, UploadDetails,
};
use crate::models::ProviderName;

const PROVIDER: ProviderName = ProviderName::Strava;
const SCOPES: &str = "read,activity:read_all,activity:write";
const DEFAULT_LOOKBACK_DAYS: i64 = 25;
const PAGE_SIZE: u32 = 30;
const DEFAULT_UPLOAD_CONTENT_TYPE: &str = "application/xml";

/// Strava credentials and endpoints.
#[derive(Debug, Clone)]
pub struct StravaConfig {
    pub client_id: String,
    pub client_secret: String,
    pub redirect_uri: Option<String>,
    pub authorize_url: String,
    pub token_url: String,
    pub api_base: String,
}

impl StravaConfig {
    /// Production endpoints for the given credentials.
    pub fn new(client_id: impl Into<String>, client_secret: impl Into<String>) -> Self {
        Self {
            client_id: client_id.into(),
            client_secret: client_secret.into(),
            redirect_uri: None,
            authorize_url: "https://www.strava.com/oauth/authorize".to_string(),
            token_url: "https://www.strava.com/oauth/token".to_string(),
            api_base: "https://www.strava.com/api/v3".to_string(),
        }
    }
}

pub struct StravaProvider {
    config: StravaConfig,
    client: Client,
}

impl StravaProvider {
    pub fn new(config: StravaConfig, client: Client) -> Self {
        Self { config, client }
    }

    fn api_url(&self, segments: &[&str]) -> Result<Url, IntegrationError> {
        endpoint(PROVIDER, &self.config.api_base, segments)
    }

    async fn token_request(&self, params: &[(&str, &str)]) -> Result<TokenResponse, IntegrationError> {
        let response = self
            .client
            .post(&self.config.token_url)
            .query(params)
            .send()
            .await
            .map_err(IntegrationError::transport(PROVIDER))?;

        let mut payload: Value = json_body(PROVIDER, response).await?;
        // Absolute expiry is recomputed locally from `expires_in`
        if let Some(fields) = payload.as_object_mut() {
            fields.remove("expires_at");
        }
        TokenResponse::from_json(PROVIDER, payload)
    }
}

#[async_trait]
impl Provider for StravaProvider {
    fn name(&self) -> ProviderName {
        PROVIDER
    }

    fn metadata(&self) -> ProviderMetadata {
        ProviderMetadata {
            name: PROVIDER,
            display_name: "Strava".to_string(),
            scopes: SCOPES.split(',').map(str::to_string).collect(),
            supports_upload: true,
            supports_push: true,
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
                .append_pair("response_type", "code");
            if let Some(redirect_uri) = &self.config.redirect_uri {
                query.append_pair("redirect_uri", redirect_uri);
            }
            query
                .append_pair("approval_prompt", "auto")
                .append_pair("scope", SCOPES)
                .append_pair("state", state_token);
        }

        Ok(url)
    }

    #[instrument(skip_all, fields(provider = %PROVIDER))]
    async fn exchange_code_for_token(
        &self,
        code: &str,
        _state_token: &str,
    ) -> Result<TokenResponse, IntegrationError> {
        self.token_request(&[
            ("client_id", self.config.client_id.as_str()),
            ("client_secret", self.config.client_secret.as_str()),
            ("code", code),
            ("grant_type", "authorization_code"),
        ])
        .await
    }

    #[instrument(skip_all, fields(provider = %PROVIDER))]
    async fn exchange_refresh_token_for_token(
        &self,
        refresh_token: &str,
    ) -> Result<TokenResponse, IntegrationError> {
        self.token_request(&[
            ("client_id", self.config.client_id.as_str()),
            ("client_secret", self.config.client_secret.as_str()),
            ("refresh_token", refresh_token),
            ("grant_type", "refresh_token"),
        ])
        .await
    }

    async fn list_activities(
        &self,
        token: &AccessToken,
        since: Option<DateTime<Utc>>,
    ) -> Result<Vec<Value>, IntegrationError> {
        let since = since.unwrap_or_else(|| Utc::now() - Duration::days(DEFAULT_LOOKBACK_DAYS));
        debug!(after = since.timestamp(), "Listing Strava activities");

        let response = self
            .client
            .get(self.api_url(&["athlete", "activities"])?)
            .header(header::AUTHORIZATION, bearer(token))
            .query(&[
                ("after", since.timestamp().to_string()),
                ("per_page", PAGE_SIZE.to_string()),
            ])
            .send()
            .await
            .map_err(IntegrationError::transport(PROVIDER))?;

        json_body(PROVIDER, response).await
    }

    async fn get_activity_details(
        &self,
        token: &AccessToken,
        activity_ref: &str,
    ) -> Result<Value, IntegrationError> {
        let response = self
            .client
            .get(self.api_url(&["activities", checked_ref(activity_ref)?])?)
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
        let response = self
            .client
            .get(self.api_url(&[
                "activities",
                checked_ref(activity_ref)?,
                "export_tcx",
            ])?)
            .header(header::AUTHORIZATION, bearer(token))
            .header(header::ACCEPT, "application/gpx+xml")
            .send()
            .await
            .map_err(IntegrationError::transport(PROVIDER))?;

        let response = ensure_success(PROVIDER, response).await?;
        let content_type = response
            .headers()
            .get(header::CONTENT_TYPE)
            .and_then(|value| value.to_str().ok())
            .unwrap_or(DEFAULT_UPLOAD_CONTENT_TYPE)
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
        token: &AccessToken,
        file: &ActivityFile,
        file_metadata: Option<&FileMetadata>,
        details: Option<&UploadDetails>,
    ) -> Result<Value, IntegrationError> {
        let content_type = file_metadata
            .map(|metadata| metadata.content_type.as_str())
            .unwrap_or(DEFAULT_UPLOAD_CONTENT_TYPE);

        let part = Part::bytes(file.content.clone())
            .file_name("activity.tcx")
            .mime_str(content_type)
            .map_err(IntegrationError::transport(PROVIDER))?;

        let mut form = Form::new().part("file", part).text("data_type", "tcx");
        if let Some(details) = details {
            if let Some(name) = &details.name {
                form = form.text("name", name.clone());
            }
            if let Some(description) = &details.description {
                form = form.text("description", description.clone());
            }
            if let Some(external_id) = &details.external_id {
                form = form.text("external_id", external_id.clone());
            }
        }

        let response = self
            .client
            .post(self.api_url(&["uploads"])?)
            .header(header::AUTHORIZATION, bearer(token))
            .multipart(form)
            .send()
            .await
            .map_err(IntegrationError::transport(PROVIDER))?;

        json_body(PROVIDER, response).await
    }

    async fn push_activity(
        &self,
        token: &AccessToken,
        activity: &NewActivity,
    ) -> Result<Value, IntegrationError> {
        let start_date_local = activity.start_date_local.as_deref().ok_or(
            IntegrationError::MissingParameter("start_date_local"),
        )?;
        let elapsed_time = activity
            .elapsed_time
            .ok_or(IntegrationError::MissingParameter("elapsed_time"))?;

        let form = [
            (
                "name",
                activity
                    .name
                    .clone()
                    .unwrap_or_else(|| "Synced Activity".to_string()),
            ),
            (
                "type",
                activity
                    .activity_type
                    .clone()
                    .unwrap_or_else(|| "Run".to_string()),
            ),
            ("start_date_local", start_date_local.to_string()),
            ("elapsed_time", elapsed_time.to_string()),
            (
                "description",
                activity.description.clone().unwrap_or_default(),
            ),
            ("distance", activity.distance.unwrap_or(0.0).to_string()),
        ];

        let response = self
            .client
            .post(self.api_url(&["activities"])?)
            .header(header::AUTHORIZATION, bearer(token))
            .form(&form)
            .send()
            .await
            .map_err(IntegrationError::transport(PROVIDER))?;

        json_body(PROVIDER, response).await
    }
}

//! Shared outbound HTTP plumbing for provider clients.

use std::time::Duration;

use reqwest::{Client, Response, StatusCode};
use serde::de::DeserializeOwned;
use tracing::{error, warn};
use url::Url;

use super::error::IntegrationError;
use crate::models::ProviderName;

const USER_AGENT: &str = concat!("runsync/", env!("CARGO_PKG_VERSION"));

/// Build the client shared by every provider. Without a timeout the reqwest
/// defaults apply.
pub fn build_client(timeout: Option<Duration>) -> Result<Client, reqwest::Error> {
    let mut builder = Client::builder().user_agent(USER_AGENT);
    if let Some(timeout) = timeout {
        builder = builder.timeout(timeout);
    }
    builder.build()
}

/// Append `segments` to the API base, percent-encoding each one so a segment
/// can never climb out of or extend the intended path.
pub fn endpoint(
    provider: ProviderName,
    api_base: &str,
    segments: &[&str],
) -> Result<Url, IntegrationError> {
    let mut url = Url::parse(api_base).map_err(|err| {
        IntegrationError::malformed(provider, format!("invalid API base URL: {err}"))
    })?;
    url.path_segments_mut()
        .map_err(|_| IntegrationError::malformed(provider, "API base URL cannot carry a path"))?
        .pop_if_empty()
        .extend(segments);
    Ok(url)
}

/// Activity identifiers are opaque provider ids: ASCII letters, digits, `-` or `_`.
pub fn activity_ref(activity_ref: &str) -> Result<&str, IntegrationError> {
    let valid = !activity_ref.is_empty()
        && activity_ref.len() <= 64
        && activity_ref
            .bytes()
            .all(|b| b.is_ascii_alphanumeric() || b == b'-' || b == b'_');

    if valid {
        Ok(activity_ref)
    } else {
        Err(IntegrationError::InvalidParameter {
            name: "activity_ref",
            value: activity_ref.chars().take(64).collect(),
        })
    }
}

/// Pass successful responses through; turn everything else into `UpstreamExchange`.
pub async fn ensure_success(
    provider: ProviderName,
    response: Response,
) -> Result<Response, IntegrationError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }

    let body = response.text().await.unwrap_or_default();
    match status {
        StatusCode::TOO_MANY_REQUESTS => {
            warn!(provider = %provider, status = status.as_u16(), "Provider rate limit hit")
        }
        StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => {
            warn!(provider = %provider, status = status.as_u16(), "Provider rejected credentials")
        }
        s if s.is_server_error() => {
            error!(provider = %provider, status = status.as_u16(), "Provider server error")
        }
        _ => warn!(provider = %provider, status = status.as_u16(), "Provider request failed"),
    }

    Err(IntegrationError::upstream(provider, status.as_u16(), &body))
}

/// Check the status, then decode the JSON body.
pub async fn json_body<T: DeserializeOwned>(
    provider: ProviderName,
    response: Response,
) -> Result<T, IntegrationError> {
    let response = ensure_success(provider, response).await?;
    let bytes = response
        .bytes()
        .await
        .map_err(IntegrationError::transport(provider))?;
    serde_json::from_slice(&bytes)
        .map_err(|err| IntegrationError::malformed(provider, format!("invalid JSON body: {err}")))
}

pub fn bearer(token: &super::AccessToken) -> String {
    format!("Bearer {}", token.secret())
}

//! Failure kinds shared by every provider and by the flows built on top of them.

use thiserror::Error;

use crate::models::ProviderName;

/// Upstream bodies are clipped to this many characters before being stored or logged.
const BODY_SNIPPET_CHARS: usize = 512;

#[derive(Debug, Error)]
pub enum IntegrationError {
    /// Callback arrived without `code` or `state`.
    #[error("missing required parameter '{0}'")]
    MissingParameter(&'static str),

    /// A caller-supplied value cannot be used as given.
    #[error("invalid value for parameter '{name}'")]
    InvalidParameter { name: &'static str, value: String },

    /// No pending connection attempt matches the callback's state token.
    #[error("no pending connection matches the supplied state")]
    RecordNotFound,

    /// Provider token or API endpoint answered with a non-success status.
    #[error("{provider} returned HTTP {status}: {body}")]
    UpstreamExchange {
        provider: ProviderName,
        status: u16,
        body: String,
    },

    /// The provider does not offer this capability at all.
    #[error("{provider} does not support {capability}")]
    NotSupported {
        provider: ProviderName,
        capability: &'static str,
    },

    /// Caller has no completed connection for the provider.
    #[error("no completed {provider} integration for this user")]
    IntegrationNotConnected { provider: ProviderName },

    #[error("unknown provider '{name}'")]
    UnknownProvider { name: String },

    #[error("request to {provider} failed: {source}")]
    Transport {
        provider: ProviderName,
        #[source]
        source: reqwest::Error,
    },

    #[error("unexpected response from {provider}: {message}")]
    MalformedResponse {
        provider: ProviderName,
        message: String,
    },

    #[error("storage error: {0}")]
    Storage(#[from] sea_orm::DbErr),
}

impl IntegrationError {
    pub fn upstream(provider: ProviderName, status: u16, body: &str) -> Self {
        IntegrationError::UpstreamExchange {
            provider,
            status,
            body: snippet(body),
        }
    }

    pub fn transport(provider: ProviderName) -> impl FnOnce(reqwest::Error) -> Self {
        move |source| IntegrationError::Transport { provider, source }
    }

    pub fn malformed(provider: ProviderName, message: impl Into<String>) -> Self {
        IntegrationError::MalformedResponse {
            provider,
            message: message.into(),
        }
    }

    /// Short machine-readable label for metrics and logs.
    pub fn kind(&self) -> &'static str {
        match self {
            IntegrationError::MissingParameter(_) => "missing_parameter",
            IntegrationError::InvalidParameter { .. } => "invalid_parameter",
            IntegrationError::RecordNotFound => "record_not_found",
            IntegrationError::UpstreamExchange { .. } => "upstream_exchange",
            IntegrationError::NotSupported { .. } => "not_supported",
            IntegrationError::IntegrationNotConnected { .. } => "not_connected",
            IntegrationError::UnknownProvider { .. } => "unknown_provider",
            IntegrationError::Transport { .. } => "transport",
            IntegrationError::MalformedResponse { .. } => "malformed_response",
            IntegrationError::Storage(_) => "storage",
        }
    }
}

fn snippet(body: &str) -> String {
    if body.chars().count() > BODY_SNIPPET_CHARS {
        let truncated: String = body.chars().take(BODY_SNIPPET_CHARS).collect();
        format!("{}...", truncated)
    } else {
        body.to_string()
    }
}

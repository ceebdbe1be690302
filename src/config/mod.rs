//! Configuration loading for the runsync service.
//!
//! Loads layered `.env` files and environment variables prefixed with
//! `RUNSYNC_`, producing a typed [`AppConfig`].

use std::{collections::BTreeMap, env, net::SocketAddr, path::PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::integrations::{FitbitConfig, StravaConfig};

const ENV_PREFIX: &str = "RUNSYNC_";
const REDACTED: &str = "[REDACTED]";

/// Application configuration derived from `RUNSYNC_*` environment variables.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub struct AppConfig {
    #[serde(default = "default_profile")]
    pub profile: String,
    #[serde(default = "default_api_bind_addr")]
    pub api_bind_addr: String,
    #[serde(default = "default_log_level")]
    pub log_level: String,
    #[serde(default = "default_log_format")]
    pub log_format: String,
    #[serde(default = "default_database_url")]
    pub database_url: String,
    #[serde(default = "default_db_max_connections")]
    pub db_max_connections: u32,
    #[serde(default = "default_db_acquire_timeout_ms")]
    pub db_acquire_timeout_ms: u64,
    /// HS256 secret used to verify caller bearer tokens
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub jwt_secret_key: Option<String>,
    #[serde(default = "default_callback_success_url")]
    pub integration_callback_redirect_url_success: String,
    #[serde(default = "default_callback_error_url")]
    pub integration_callback_redirect_url_error: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fitbit_client_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fitbit_client_secret: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fitbit_redirect_uri: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fitbit_token_url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fitbit_api_base: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub strava_client_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub strava_client_secret: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub strava_redirect_uri: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub strava_token_url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub strava_api_base: Option<String>,
    /// Outbound provider request timeout; unset keeps the HTTP client default
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub provider_http_timeout_seconds: Option<u64>,
    /// Serialize token refreshes per connection within this process
    #[serde(default)]
    pub token_refresh_single_flight: bool,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            profile: default_profile(),
            api_bind_addr: default_api_bind_addr(),
            log_level: default_log_level(),
            log_format: default_log_format(),
            database_url: default_database_url(),
            db_max_connections: default_db_max_connections(),
            db_acquire_timeout_ms: default_db_acquire_timeout_ms(),
            jwt_secret_key: None,
            integration_callback_redirect_url_success: default_callback_success_url(),
            integration_callback_redirect_url_error: default_callback_error_url(),
            fitbit_client_id: None,
            fitbit_client_secret: None,
            fitbit_redirect_uri: None,
            fitbit_token_url: None,
            fitbit_api_base: None,
            strava_client_id: None,
            strava_client_secret: None,
            strava_redirect_uri: None,
            strava_token_url: None,
            strava_api_base: None,
            provider_http_timeout_seconds: None,
            token_refresh_single_flight: false,
        }
    }
}

impl AppConfig {
    /// Returns the configured bind address as a socket address.
    pub fn bind_addr(&self) -> Result<SocketAddr, std::net::AddrParseError> {
        self.api_bind_addr.parse()
    }

    fn is_local_profile(&self) -> bool {
        matches!(self.profile.as_str(), "local" | "test")
    }

    /// Fitbit client settings, falling back to production endpoints.
    pub fn fitbit_config(&self) -> FitbitConfig {
        let mut config = FitbitConfig::new(
            self.fitbit_client_id.clone().unwrap_or_default(),
            self.fitbit_client_secret.clone().unwrap_or_default(),
        );
        config.redirect_uri = self.fitbit_redirect_uri.clone();
        if let Some(token_url) = &self.fitbit_token_url {
            config.token_url = token_url.clone();
        }
        if let Some(api_base) = &self.fitbit_api_base {
            config.api_base = api_base.clone();
        }
        config
    }

    /// Strava client settings, falling back to production endpoints.
    pub fn strava_config(&self) -> StravaConfig {
        let mut config = StravaConfig::new(
            self.strava_client_id.clone().unwrap_or_default(),
            self.strava_client_secret.clone().unwrap_or_default(),
        );
        config.redirect_uri = self.strava_redirect_uri.clone();
        if let Some(token_url) = &self.strava_token_url {
            config.token_url = token_url.clone();
        }
        if let Some(api_base) = &self.strava_api_base {
            config.api_base = api_base.clone();
        }
        config
    }

    /// Returns a redacted JSON representation (secrets are redacted).
    pub fn redacted_json(&self) -> serde_json::Result<String> {
        let mut config = self.clone();
        for secret in [
            &mut config.jwt_secret_key,
            &mut config.fitbit_client_secret,
            &mut config.strava_client_secret,
        ] {
            if secret.is_some() {
                *secret = Some(REDACTED.to_string());
            }
        }
        serde_json::to_string_pretty(&config)
    }

    /// Validates the configuration, returning an error if required settings are missing.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !matches!(self.log_format.as_str(), "json" | "pretty") {
            return Err(ConfigError::InvalidLogFormat {
                value: self.log_format.clone(),
            });
        }

        if self.provider_http_timeout_seconds == Some(0) {
            return Err(ConfigError::InvalidProviderTimeout);
        }

        if self.is_local_profile() {
            return Ok(());
        }

        if self.jwt_secret_key.is_none() {
            return Err(ConfigError::MissingSetting {
                key: "JWT_SECRET_KEY",
            });
        }
        let required = [
            ("FITBIT_CLIENT_ID", &self.fitbit_client_id),
            ("FITBIT_CLIENT_SECRET", &self.fitbit_client_secret),
            ("STRAVA_CLIENT_ID", &self.strava_client_id),
            ("STRAVA_CLIENT_SECRET", &self.strava_client_secret),
        ];
        for (key, value) in required {
            if value.is_none() {
                return Err(ConfigError::MissingSetting { key });
            }
        }

        Ok(())
    }
}

fn default_profile() -> String {
    "local".to_string()
}

fn default_api_bind_addr() -> String {
    "0.0.0.0:8080".to_string()
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_log_format() -> String {
    "json".to_string()
}

fn default_database_url() -> String {
    "sqlite://runsync.db?mode=rwc".to_string()
}

fn default_db_max_connections() -> u32 {
    10
}

fn default_db_acquire_timeout_ms() -> u64 {
    5000
}

fn default_callback_success_url() -> String {
    "http://localhost:3000/integrations?status=connected".to_string()
}

fn default_callback_error_url() -> String {
    "http://localhost:3000/integrations?status=error".to_string()
}

/// Errors that can occur while loading configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to load environment file {path}: {source}")]
    EnvFile {
        path: PathBuf,
        source: dotenvy::Error,
    },
    #[error("invalid api bind address '{value}': {source}")]
    InvalidBindAddr {
        value: String,
        source: std::net::AddrParseError,
    },
    #[error("invalid value '{value}' for {key}")]
    InvalidValue { key: &'static str, value: String },
    #[error("log format must be 'json' or 'pretty', got '{value}'")]
    InvalidLogFormat { value: String },
    #[error("provider HTTP timeout must be positive")]
    InvalidProviderTimeout,
    #[error("{key} is required outside local/test profiles; set RUNSYNC_{key}")]
    MissingSetting { key: &'static str },
}

/// Loads configuration using layered `.env` files and `RUNSYNC_*` env vars.
pub struct ConfigLoader {
    base_dir: PathBuf,
}

impl ConfigLoader {
    /// Creates a new loader rooted at the current working directory.
    pub fn new() -> Self {
        Self {
            base_dir: env::current_dir().unwrap_or_else(|_| PathBuf::from(".")),
        }
    }

    /// Creates a loader rooted at the provided directory (useful for tests).
    pub fn with_base_dir(base_dir: PathBuf) -> Self {
        Self { base_dir }
    }

    /// Loads `.env`, `.env.local`, `.env.<profile>`, `.env.<profile>.local`,
    /// then the process environment, later sources winning.
    pub fn load(&self) -> Result<AppConfig, ConfigError> {
        let (mut layered, profile_hint) = self.collect_layered_env()?;

        // Overlay process environment last so it wins.
        for (key, value) in env::vars() {
            if let Some(stripped) = key.strip_prefix(ENV_PREFIX) {
                layered.insert(stripped.to_string(), value);
            }
        }

        let mut take = |key: &str| {
            layered
                .remove(key)
                .map(|v| v.trim().to_string())
                .filter(|v| !v.is_empty())
        };

        let profile = take("PROFILE").unwrap_or(profile_hint);
        let api_bind_addr = take("API_BIND_ADDR").unwrap_or_else(default_api_bind_addr);
        let log_level = take("LOG_LEVEL").unwrap_or_else(default_log_level);
        let log_format = take("LOG_FORMAT").unwrap_or_else(default_log_format);
        let database_url = take("DATABASE_URL").unwrap_or_else(default_database_url);
        let db_max_connections = parse_or("DB_MAX_CONNECTIONS", take("DB_MAX_CONNECTIONS"))?
            .unwrap_or_else(default_db_max_connections);
        let db_acquire_timeout_ms =
            parse_or("DB_ACQUIRE_TIMEOUT_MS", take("DB_ACQUIRE_TIMEOUT_MS"))?
                .unwrap_or_else(default_db_acquire_timeout_ms);
        let provider_http_timeout_seconds = parse_or(
            "PROVIDER_HTTP_TIMEOUT_SECONDS",
            take("PROVIDER_HTTP_TIMEOUT_SECONDS"),
        )?;
        let token_refresh_single_flight = parse_or(
            "TOKEN_REFRESH_SINGLE_FLIGHT",
            take("TOKEN_REFRESH_SINGLE_FLIGHT"),
        )?
        .unwrap_or(false);

        let config = AppConfig {
            profile,
            api_bind_addr,
            log_level,
            log_format,
            database_url,
            db_max_connections,
            db_acquire_timeout_ms,
            jwt_secret_key: take("JWT_SECRET_KEY"),
            integration_callback_redirect_url_success: take(
                "INTEGRATION_CALLBACK_REDIRECT_URL_SUCCESS",
            )
            .unwrap_or_else(default_callback_success_url),
            integration_callback_redirect_url_error: take(
                "INTEGRATION_CALLBACK_REDIRECT_URL_ERROR",
            )
            .unwrap_or_else(default_callback_error_url),
            fitbit_client_id: take("FITBIT_CLIENT_ID"),
            fitbit_client_secret: take("FITBIT_CLIENT_SECRET"),
            fitbit_redirect_uri: take("FITBIT_REDIRECT_URI"),
            fitbit_token_url: take("FITBIT_TOKEN_URL"),
            fitbit_api_base: take("FITBIT_API_BASE"),
            strava_client_id: take("STRAVA_CLIENT_ID"),
            strava_client_secret: take("STRAVA_CLIENT_SECRET"),
            strava_redirect_uri: take("STRAVA_REDIRECT_URI"),
            strava_token_url: take("STRAVA_TOKEN_URL"),
            strava_api_base: take("STRAVA_API_BASE"),
            provider_http_timeout_seconds,
            token_refresh_single_flight,
        };

        config.validate()?;

        match config.bind_addr() {
            Ok(_) => Ok(config),
            Err(source) => Err(ConfigError::InvalidBindAddr {
                value: config.api_bind_addr.clone(),
                source,
            }),
        }
    }

    fn collect_layered_env(&self) -> Result<(BTreeMap<String, String>, String), ConfigError> {
        let mut values = BTreeMap::new();

        self.merge_dotenv(self.base_dir.join(".env"), &mut values)?;
        self.merge_dotenv(self.base_dir.join(".env.local"), &mut values)?;

        let profile = env::var(format!("{ENV_PREFIX}PROFILE"))
            .ok()
            .or_else(|| values.get("PROFILE").cloned())
            .unwrap_or_else(default_profile);

        self.merge_dotenv(
            self.base_dir.join(format!(".env.{}", &profile)),
            &mut values,
        )?;
        self.merge_dotenv(
            self.base_dir.join(format!(".env.{}.local", &profile)),
            &mut values,
        )?;

        Ok((values, profile))
    }

    fn merge_dotenv(
        &self,
        path: PathBuf,
        values: &mut BTreeMap<String, String>,
    ) -> Result<(), ConfigError> {
        match dotenvy::from_path_iter(&path) {
            Ok(iter) => {
                for item in iter {
                    let (key, value) = item.map_err(|source| ConfigError::EnvFile {
                        path: path.clone(),
                        source,
                    })?;
                    if let Some(stripped) = key.strip_prefix(ENV_PREFIX) {
                        values.insert(stripped.to_string(), value);
                    }
                }
                Ok(())
            }
            Err(dotenvy::Error::Io(ref io_err))
                if io_err.kind() == std::io::ErrorKind::NotFound =>
            {
                Ok(())
            }
            Err(err) => Err(ConfigError::EnvFile { path, source: err }),
        }
    }
}

impl Default for ConfigLoader {
    fn default() -> Self {
        Self::new()
    }
}

fn parse_or<T: std::str::FromStr>(
    key: &'static str,
    raw: Option<String>,
) -> Result<Option<T>, ConfigError> {
    raw.map(|value| {
        value
            .parse::<T>()
            .map_err(|_| ConfigError::InvalidValue { key, value })
    })
    .transpose()
}

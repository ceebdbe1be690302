//! User integration entity model
//!
//! One row per connection attempt between a user and an external fitness
//! provider. A row is created `pending` when an authorization URL is issued and
//! resolves to `completed` or `failed` when the provider redirects back.

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use chrono::Utc;
use sea_orm::FromJsonQueryResult;
use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use utoipa::ToSchema;
use uuid::Uuid;

/// Closed set of providers this service knows how to talk to.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    PartialOrd,
    Ord,
    EnumIter,
    DeriveActiveEnum,
    Serialize,
    Deserialize,
    ToSchema,
)]
#[sea_orm(rs_type = "String", db_type = "Text")]
#[serde(rename_all = "snake_case")]
pub enum ProviderName {
    #[sea_orm(string_value = "fitbit")]
    Fitbit,
    #[sea_orm(string_value = "strava")]
    Strava,
}

impl ProviderName {
    pub fn as_str(&self) -> &'static str {
        match self {
            ProviderName::Fitbit => "fitbit",
            ProviderName::Strava => "strava",
        }
    }

    pub fn all() -> [ProviderName; 2] {
        [ProviderName::Fitbit, ProviderName::Strava]
    }
}

impl fmt::Display for ProviderName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Returned when a string does not name a known provider.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown provider '{0}'")]
pub struct UnknownProviderName(pub String);

impl FromStr for ProviderName {
    type Err = UnknownProviderName;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "fitbit" => Ok(ProviderName::Fitbit),
            "strava" => Ok(ProviderName::Strava),
            other => Err(UnknownProviderName(other.to_string())),
        }
    }
}

/// Lifecycle of a connection attempt.
///
/// `pending -> completed` on a successful callback, `pending -> failed` on an
/// exchange error. Both outcomes are terminal.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, EnumIter, DeriveActiveEnum, Serialize, Deserialize, ToSchema,
)]
#[sea_orm(rs_type = "String", db_type = "Text")]
#[serde(rename_all = "snake_case")]
pub enum ConnectionStatus {
    #[sea_orm(string_value = "pending")]
    Pending,
    #[sea_orm(string_value = "completed")]
    Completed,
    #[sea_orm(string_value = "failed")]
    Failed,
}

impl ConnectionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ConnectionStatus::Pending => "pending",
            ConnectionStatus::Completed => "completed",
            ConnectionStatus::Failed => "failed",
        }
    }
}

/// Provider-specific fields returned alongside the tokens at exchange time.
///
/// Known keys are typed; anything else a provider sends lands in `extra`.
/// Token fields (`access_token`, `refresh_token`, `expires_in`) never appear
/// here.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize, FromJsonQueryResult)]
pub struct ConnectionMetadata {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub token_type: Option<String>,
    /// Scopes granted by the user (Fitbit and Strava both echo this back)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub scope: Option<String>,
    /// Fitbit's encoded user id
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_id: Option<String>,
    /// Strava's summary athlete object
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub athlete: Option<JsonValue>,
    /// Description of the failure that moved the record to `failed`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(flatten)]
    pub extra: BTreeMap<String, JsonValue>,
}

impl ConnectionMetadata {
    /// Split the non-token remainder of a token payload into typed and extra fields.
    pub fn from_extras(mut fields: BTreeMap<String, JsonValue>) -> Self {
        let mut take_string = |key: &str| match fields.remove(key) {
            Some(JsonValue::String(value)) => Some(value),
            Some(JsonValue::Null) | None => None,
            Some(other) => Some(other.to_string()),
        };

        let token_type = take_string("token_type");
        let scope = take_string("scope");
        let user_id = take_string("user_id");
        let athlete = fields.remove("athlete");

        Self {
            token_type,
            scope,
            user_id,
            athlete,
            error: None,
            extra: fields,
        }
    }

    pub fn failure(message: impl Into<String>) -> Self {
        Self {
            error: Some(message.into()),
            ..Default::default()
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel)]
#[sea_orm(table_name = "user_integrations")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: Uuid,

    /// Owning user; users live outside this service
    pub user_id: Uuid,

    pub provider_name: ProviderName,

    pub status: ConnectionStatus,

    /// Single-use nonce bound to the authorization attempt; doubles as the
    /// PKCE verifier for providers that require one
    pub state_token: Option<String>,

    pub access_token: Option<String>,

    pub refresh_token: Option<String>,

    pub expires_at: Option<DateTimeWithTimeZone>,

    /// Advisory only
    pub last_synced_at: Option<DateTimeWithTimeZone>,

    #[sea_orm(column_type = "JsonBinary")]
    pub metadata: ConnectionMetadata,

    pub created_at: DateTimeWithTimeZone,

    pub updated_at: DateTimeWithTimeZone,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {}

impl ActiveModelBehavior for ActiveModel {}

impl Model {
    /// A token with no recorded expiry is treated as still valid.
    pub fn is_token_expired(&self) -> bool {
        match self.expires_at {
            Some(expires_at) => Utc::now() >= expires_at,
            None => false,
        }
    }
}

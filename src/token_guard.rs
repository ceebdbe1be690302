//! # Token Refresh Guard
//!
//! [`IntegrationSession`] is the only place stored credentials are turned into
//! an [`AccessToken`]. Every authenticated provider call goes through
//! [`IntegrationSession::get_access_token`], which refreshes and persists an
//! expired token before handing it out.
//!
//! Two requests racing on the same expired connection may both refresh. With
//! [`RefreshLocks`] attached, refreshes are serialized per connection inside
//! this process and the loser reuses the winner's token.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use metrics::counter;
use serde_json::Value;
use tokio::sync::Mutex;
use tracing::{debug, info, instrument, warn};
use uuid::Uuid;

use crate::integrations::{
    AccessToken, ActivityFile, FileMetadata, IntegrationError, NewActivity, Provider,
    UploadDetails, filter,
};
use crate::models::ProviderName;
use crate::models::user_integration;
use crate::repositories::{TokenUpdate, UserIntegrationRepository};

/// Per-connection refresh mutexes shared across requests.
#[derive(Debug, Clone, Default)]
pub struct RefreshLocks {
    inner: Arc<Mutex<HashMap<Uuid, Arc<Mutex<()>>>>>,
}

impl RefreshLocks {
    pub fn new() -> Self {
        Self::default()
    }

    async fn lock_for(&self, connection_id: Uuid) -> Arc<Mutex<()>> {
        let mut locks = self.inner.lock().await;
        Arc::clone(locks.entry(connection_id).or_default())
    }

    /// Drops the map entry once the caller holds the last outside reference.
    async fn release(&self, connection_id: Uuid, lock: Arc<Mutex<()>>) {
        let mut locks = self.inner.lock().await;
        // One reference lives in the map, the other is `lock`.
        if Arc::strong_count(&lock) == 2 {
            locks.remove(&connection_id);
        }
    }

    /// Number of connections with a refresh in flight or queued.
    pub async fn in_flight(&self) -> usize {
        self.inner.lock().await.len()
    }
}

/// A completed connection bound to its provider.
pub struct IntegrationSession {
    provider: Arc<dyn Provider>,
    connection: user_integration::Model,
    repo: UserIntegrationRepository,
    locks: Option<RefreshLocks>,
}

impl IntegrationSession {
    pub fn new(
        provider: Arc<dyn Provider>,
        connection: user_integration::Model,
        repo: UserIntegrationRepository,
    ) -> Self {
        Self {
            provider,
            connection,
            repo,
            locks: None,
        }
    }

    /// Opens a session on the user's most recent completed connection.
    pub async fn for_user(
        provider: Arc<dyn Provider>,
        repo: UserIntegrationRepository,
        user_id: Uuid,
    ) -> Result<Self, IntegrationError> {
        let name = provider.name();
        let connection = repo
            .find_latest_completed(user_id, name)
            .await?
            .ok_or(IntegrationError::IntegrationNotConnected { provider: name })?;

        Ok(Self::new(provider, connection, repo))
    }

    /// Serialize refreshes for this connection through `locks`.
    pub fn with_refresh_locks(mut self, locks: Option<RefreshLocks>) -> Self {
        self.locks = locks;
        self
    }

    pub fn connection(&self) -> &user_integration::Model {
        &self.connection
    }

    pub fn provider_name(&self) -> ProviderName {
        self.provider.name()
    }

    /// Returns a usable access token, refreshing first when `now >= expires_at`.
    pub async fn get_access_token(&mut self) -> Result<AccessToken, IntegrationError> {
        if self.connection.is_token_expired() {
            match self.locks.clone() {
                Some(locks) => self.refresh_single_flight(&locks).await?,
                None => self.refresh().await?,
            }
        }

        self.connection
            .access_token
            .as_deref()
            .map(AccessToken::new)
            .ok_or(IntegrationError::IntegrationNotConnected {
                provider: self.provider.name(),
            })
    }

    async fn refresh_single_flight(&mut self, locks: &RefreshLocks) -> Result<(), IntegrationError> {
        let connection_id = self.connection.id;
        let lock = locks.lock_for(connection_id).await;
        let result = {
            let _guard = lock.lock().await;
            self.refresh_if_still_expired().await
        };
        locks.release(connection_id, lock).await;
        result
    }

    async fn refresh_if_still_expired(&mut self) -> Result<(), IntegrationError> {
        if let Some(current) = self.repo.find_by_id(self.connection.id).await? {
            self.connection = current;
        }

        if self.connection.is_token_expired() {
            self.refresh().await
        } else {
            debug!(connection_id = %self.connection.id, "Token already refreshed by another task");
            Ok(())
        }
    }

    #[instrument(skip(self), fields(connection_id = %self.connection.id, provider = %self.provider.name()))]
    async fn refresh(&mut self) -> Result<(), IntegrationError> {
        let provider = self.provider.name();
        let refresh_token = self
            .connection
            .refresh_token
            .as_deref()
            .ok_or(IntegrationError::IntegrationNotConnected { provider })?;

        let exchanged = self
            .provider
            .exchange_refresh_token_for_token(refresh_token)
            .await;
        counter!(
            "runsync_token_refresh_total",
            "provider" => provider.as_str(),
            "outcome" => if exchanged.is_ok() { "success" } else { "failure" }
        )
        .increment(1);

        let tokens = exchanged.inspect_err(|err| {
            warn!(error = %err, "Token refresh failed");
        })?;

        let update = TokenUpdate {
            access_token: &tokens.access_token,
            refresh_token: &tokens.refresh_token,
            expires_at: tokens.expiry(provider, Utc::now())?,
        };
        let updated = self
            .repo
            .update_tokens(self.connection.id, update)
            .await?
            .ok_or(IntegrationError::IntegrationNotConnected { provider })?;

        info!(expires_at = ?updated.expires_at, "Refreshed access token");
        self.connection = updated;
        Ok(())
    }

    /// Activity summaries since `since`, keeping only distance-bearing entries.
    pub async fn fetch_activities(
        &mut self,
        since: Option<DateTime<Utc>>,
    ) -> Result<Vec<Value>, IntegrationError> {
        let token = self.get_access_token().await?;
        let activities = self.provider.list_activities(&token, since).await?;
        Ok(filter::retain_distance_bearing(activities))
    }

    pub async fn get_activity_details(
        &mut self,
        activity_ref: &str,
    ) -> Result<Value, IntegrationError> {
        let token = self.get_access_token().await?;
        self.provider.get_activity_details(&token, activity_ref).await
    }

    pub async fn get_activity_file(
        &mut self,
        activity_ref: &str,
    ) -> Result<ActivityFile, IntegrationError> {
        let token = self.get_access_token().await?;
        self.provider.get_activity_file(&token, activity_ref).await
    }

    pub async fn upload_activity(
        &mut self,
        file: &ActivityFile,
        file_metadata: Option<&FileMetadata>,
        details: Option<&UploadDetails>,
    ) -> Result<Value, IntegrationError> {
        let token = self.get_access_token().await?;
        self.provider
            .upload_activity(&token, file, file_metadata, details)
            .await
    }

    pub async fn push_activity(&mut self, activity: &NewActivity) -> Result<Value, IntegrationError> {
        let token = self.get_access_token().await?;
        self.provider.push_activity(&token, activity).await
    }

    pub(crate) async fn mark_synced(&self) {
        if let Err(err) = self.repo.touch_last_synced(self.connection.id).await {
            warn!(connection_id = %self.connection.id, error = %err, "Failed to record sync time");
        }
    }
}

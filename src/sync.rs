//! # Activity Sync
//!
//! Moves one activity between two connected providers using the interchange
//! file as the only shared format.

use metrics::counter;
use serde_json::Value;
use tracing::{info, instrument};

use crate::integrations::{FileMetadata, IntegrationError};
use crate::token_guard::IntegrationSession;

/// Copies activities from a source connection to a target connection.
pub struct ActivitySyncer {
    source: IntegrationSession,
    target: IntegrationSession,
}

impl ActivitySyncer {
    pub fn new(source: IntegrationSession, target: IntegrationSession) -> Self {
        Self { source, target }
    }

    /// Exports `source_ref` from the source provider and uploads it to the
    /// target, returning the target's response untouched. Either failure
    /// aborts the sync.
    #[instrument(
        skip(self),
        fields(
            source = %self.source.provider_name(),
            target = %self.target.provider_name()
        )
    )]
    pub async fn sync(&mut self, source_ref: &str) -> Result<Value, IntegrationError> {
        let result = self.transfer(source_ref).await;

        counter!(
            "runsync_activity_sync_total",
            "source" => self.source.provider_name().as_str(),
            "target" => self.target.provider_name().as_str(),
            "outcome" => match &result {
                Ok(_) => "success",
                Err(err) => err.kind(),
            }
        )
        .increment(1);

        if result.is_ok() {
            self.source.mark_synced().await;
            self.target.mark_synced().await;
        }

        result
    }

    async fn transfer(&mut self, source_ref: &str) -> Result<Value, IntegrationError> {
        let file = self.source.get_activity_file(source_ref).await?;
        info!(
            bytes = file.content.len(),
            content_type = %file.content_type,
            "Fetched source activity file"
        );

        let metadata = FileMetadata {
            content_type: file.content_type.clone(),
        };
        self.target
            .upload_activity(&file, Some(&metadata), None)
            .await
    }
}

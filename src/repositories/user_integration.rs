//! User integration repository
//!
//! Every state transition on a connection record is a single UPDATE statement
//! whose WHERE clause pins the expected current status, so a reader never sees
//! new tokens next to a stale expiry and a record can only leave `pending` once.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use sea_orm::{
    ColumnTrait, DatabaseConnection, DbErr, EntityTrait, QueryFilter, QueryOrder, Set,
};
use uuid::Uuid;

use crate::models::user_integration::{
    self, ConnectionMetadata, ConnectionStatus, Entity as UserIntegration, ProviderName,
};

/// Fresh credentials produced by a code or refresh-token exchange.
#[derive(Debug, Clone, Copy)]
pub struct TokenUpdate<'a> {
    pub access_token: &'a str,
    pub refresh_token: &'a str,
    pub expires_at: DateTime<Utc>,
}

/// Repository for `user_integrations` rows
#[derive(Debug, Clone)]
pub struct UserIntegrationRepository {
    db: Arc<DatabaseConnection>,
}

impl UserIntegrationRepository {
    pub fn new(db: Arc<DatabaseConnection>) -> Self {
        Self { db }
    }

    /// Insert a `pending` record bound to `state_token`.
    pub async fn create_pending(
        &self,
        user_id: Uuid,
        provider: ProviderName,
        state_token: &str,
    ) -> Result<user_integration::Model, DbErr> {
        let id = Uuid::new_v4();
        let now = Utc::now().fixed_offset();

        let record = user_integration::ActiveModel {
            id: Set(id),
            user_id: Set(user_id),
            provider_name: Set(provider),
            status: Set(ConnectionStatus::Pending),
            state_token: Set(Some(state_token.to_string())),
            access_token: Set(None),
            refresh_token: Set(None),
            expires_at: Set(None),
            last_synced_at: Set(None),
            metadata: Set(ConnectionMetadata::default()),
            created_at: Set(now),
            updated_at: Set(now),
        };

        UserIntegration::insert(record)
            .exec_without_returning(&*self.db)
            .await?;

        self.require(id).await
    }

    pub async fn find_by_id(&self, id: Uuid) -> Result<Option<user_integration::Model>, DbErr> {
        UserIntegration::find_by_id(id).one(&*self.db).await
    }

    /// Most recently created `pending` record for the provider/state pair.
    pub async fn find_pending_by_state(
        &self,
        provider: ProviderName,
        state_token: &str,
    ) -> Result<Option<user_integration::Model>, DbErr> {
        UserIntegration::find()
            .filter(user_integration::Column::ProviderName.eq(provider))
            .filter(user_integration::Column::StateToken.eq(state_token))
            .filter(user_integration::Column::Status.eq(ConnectionStatus::Pending))
            .order_by_desc(user_integration::Column::CreatedAt)
            .one(&*self.db)
            .await
    }

    /// Most recently created `completed` record for the user/provider pair.
    pub async fn find_latest_completed(
        &self,
        user_id: Uuid,
        provider: ProviderName,
    ) -> Result<Option<user_integration::Model>, DbErr> {
        UserIntegration::find()
            .filter(user_integration::Column::UserId.eq(user_id))
            .filter(user_integration::Column::ProviderName.eq(provider))
            .filter(user_integration::Column::Status.eq(ConnectionStatus::Completed))
            .order_by_desc(user_integration::Column::CreatedAt)
            .one(&*self.db)
            .await
    }

    /// All completed records for a user, oldest first.
    pub async fn list_completed_by_user(
        &self,
        user_id: Uuid,
    ) -> Result<Vec<user_integration::Model>, DbErr> {
        UserIntegration::find()
            .filter(user_integration::Column::UserId.eq(user_id))
            .filter(user_integration::Column::Status.eq(ConnectionStatus::Completed))
            .order_by_asc(user_integration::Column::CreatedAt)
            .order_by_asc(user_integration::Column::Id)
            .all(&*self.db)
            .await
    }

    /// `pending -> completed`. Returns `None` if the record is no longer pending.
    pub async fn complete(
        &self,
        id: Uuid,
        tokens: TokenUpdate<'_>,
        metadata: ConnectionMetadata,
    ) -> Result<Option<user_integration::Model>, DbErr> {
        let changes = user_integration::ActiveModel {
            status: Set(ConnectionStatus::Completed),
            access_token: Set(Some(tokens.access_token.to_string())),
            refresh_token: Set(Some(tokens.refresh_token.to_string())),
            expires_at: Set(Some(tokens.expires_at.fixed_offset())),
            metadata: Set(metadata),
            updated_at: Set(Utc::now().fixed_offset()),
            ..Default::default()
        };

        self.transition(id, ConnectionStatus::Pending, changes).await
    }

    /// `pending -> failed`, recording the failure description in metadata.
    pub async fn mark_failed(
        &self,
        id: Uuid,
        error: &str,
    ) -> Result<Option<user_integration::Model>, DbErr> {
        let changes = user_integration::ActiveModel {
            status: Set(ConnectionStatus::Failed),
            metadata: Set(ConnectionMetadata::failure(error)),
            updated_at: Set(Utc::now().fixed_offset()),
            ..Default::default()
        };

        self.transition(id, ConnectionStatus::Pending, changes).await
    }

    /// Replace the credentials of a `completed` record after a refresh.
    pub async fn update_tokens(
        &self,
        id: Uuid,
        tokens: TokenUpdate<'_>,
    ) -> Result<Option<user_integration::Model>, DbErr> {
        let changes = user_integration::ActiveModel {
            access_token: Set(Some(tokens.access_token.to_string())),
            refresh_token: Set(Some(tokens.refresh_token.to_string())),
            expires_at: Set(Some(tokens.expires_at.fixed_offset())),
            updated_at: Set(Utc::now().fixed_offset()),
            ..Default::default()
        };

        self.transition(id, ConnectionStatus::Completed, changes).await
    }

    pub async fn touch_last_synced(&self, id: Uuid) -> Result<(), DbErr> {
        let now = Utc::now().fixed_offset();
        let changes = user_integration::ActiveModel {
            last_synced_at: Set(Some(now)),
            updated_at: Set(now),
            ..Default::default()
        };

        UserIntegration::update_many()
            .set(changes)
            .filter(user_integration::Column::Id.eq(id))
            .exec(&*self.db)
            .await?;

        Ok(())
    }

    async fn transition(
        &self,
        id: Uuid,
        expected: ConnectionStatus,
        changes: user_integration::ActiveModel,
    ) -> Result<Option<user_integration::Model>, DbErr> {
        let result = UserIntegration::update_many()
            .set(changes)
            .filter(user_integration::Column::Id.eq(id))
            .filter(user_integration::Column::Status.eq(expected))
            .exec(&*self.db)
            .await?;

        if result.rows_affected == 0 {
            tracing::debug!(
                connection_id = %id,
                expected_status = expected.as_str(),
                "Connection record not in expected state; update skipped"
            );
            return Ok(None);
        }

        self.find_by_id(id).await
    }

    async fn require(&self, id: Uuid) -> Result<user_integration::Model, DbErr> {
        self.find_by_id(id)
            .await?
            .ok_or_else(|| DbErr::RecordNotFound(format!("user_integration {id}")))
    }
}

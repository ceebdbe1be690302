//! Creates the `user_integrations` table holding one row per connection attempt
//! between a user and an external fitness provider.

use sea_orm_migration::prelude::*;

#[derive(DeriveMigrationName)]
pub struct Migration;

#[async_trait::async_trait]
impl MigrationTrait for Migration {
    async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .create_table(
                Table::create()
                    .table(UserIntegrations::Table)
                    .if_not_exists()
                    .col(
                        ColumnDef::new(UserIntegrations::Id)
                            .uuid()
                            .not_null()
                            .primary_key(),
                    )
                    .col(ColumnDef::new(UserIntegrations::UserId).uuid().not_null())
                    .col(
                        ColumnDef::new(UserIntegrations::ProviderName)
                            .text()
                            .not_null(),
                    )
                    .col(
                        ColumnDef::new(UserIntegrations::Status)
                            .text()
                            .not_null()
                            .default("pending"),
                    )
                    .col(ColumnDef::new(UserIntegrations::StateToken).text().null())
                    .col(ColumnDef::new(UserIntegrations::AccessToken).text().null())
                    .col(ColumnDef::new(UserIntegrations::RefreshToken).text().null())
                    .col(
                        ColumnDef::new(UserIntegrations::ExpiresAt)
                            .timestamp_with_time_zone()
                            .null(),
                    )
                    .col(
                        ColumnDef::new(UserIntegrations::LastSyncedAt)
                            .timestamp_with_time_zone()
                            .null(),
                    )
                    .col(
                        ColumnDef::new(UserIntegrations::Metadata)
                            .json_binary()
                            .not_null(),
                    )
                    .col(
                        ColumnDef::new(UserIntegrations::CreatedAt)
                            .timestamp_with_time_zone()
                            .not_null()
                            .default(Expr::current_timestamp()),
                    )
                    .col(
                        ColumnDef::new(UserIntegrations::UpdatedAt)
                            .timestamp_with_time_zone()
                            .not_null()
                            .default(Expr::current_timestamp()),
                    )
                    .to_owned(),
            )
            .await?;

        // Lookup path for "the caller's completed connection to provider X"
        manager
            .create_index(
                Index::create()
                    .name("idx_user_integrations_user_provider_status")
                    .table(UserIntegrations::Table)
                    .col(UserIntegrations::UserId)
                    .col(UserIntegrations::ProviderName)
                    .col(UserIntegrations::Status)
                    .to_owned(),
            )
            .await?;

        // Lookup path for OAuth callbacks
        manager
            .create_index(
                Index::create()
                    .name("idx_user_integrations_provider_state")
                    .table(UserIntegrations::Table)
                    .col(UserIntegrations::ProviderName)
                    .col(UserIntegrations::StateToken)
                    .to_owned(),
            )
            .await?;

        Ok(())
    }

    async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .drop_index(
                Index::drop()
                    .name("idx_user_integrations_provider_state")
                    .to_owned(),
            )
            .await?;

        manager
            .drop_index(
                Index::drop()
                    .name("idx_user_integrations_user_provider_status")
                    .to_owned(),
            )
            .await?;

        manager
            .drop_table(Table::drop().table(UserIntegrations::Table).to_owned())
            .await
    }
}

#[derive(DeriveIden)]
enum UserIntegrations {
    Table,
    Id,
    UserId,
    ProviderName,
    Status,
    StateToken,
    AccessToken,
    RefreshToken,
    ExpiresAt,
    LastSyncedAt,
    Metadata,
    CreatedAt,
    UpdatedAt,
}

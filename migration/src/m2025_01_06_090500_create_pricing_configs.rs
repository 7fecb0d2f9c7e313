//! Creates the pricing_configs table. Only the active row is consulted.

use sea_orm_migration::prelude::*;

#[derive(DeriveMigrationName)]
pub struct Migration;

#[async_trait::async_trait]
impl MigrationTrait for Migration {
    async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .create_table(
                Table::create()
                    .table(PricingConfigs::Table)
                    .if_not_exists()
                    .col(
                        ColumnDef::new(PricingConfigs::Id)
                            .uuid()
                            .not_null()
                            .primary_key(),
                    )
                    .col(
                        ColumnDef::new(PricingConfigs::IsActive)
                            .boolean()
                            .not_null()
                            .default(false),
                    )
                    .col(
                        ColumnDef::new(PricingConfigs::CompletionAutoApprovalHours)
                            .integer()
                            .null(),
                    )
                    .col(
                        ColumnDef::new(PricingConfigs::CreatedAt)
                            .timestamp_with_time_zone()
                            .not_null()
                            .default(Expr::current_timestamp()),
                    )
                    .col(
                        ColumnDef::new(PricingConfigs::UpdatedAt)
                            .timestamp_with_time_zone()
                            .not_null()
                            .default(Expr::current_timestamp()),
                    )
                    .to_owned(),
            )
            .await
    }

    async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .drop_table(Table::drop().table(PricingConfigs::Table).to_owned())
            .await
    }
}

#[derive(DeriveIden)]
enum PricingConfigs {
    Table,
    Id,
    IsActive,
    CompletionAutoApprovalHours,
    CreatedAt,
    UpdatedAt,
}

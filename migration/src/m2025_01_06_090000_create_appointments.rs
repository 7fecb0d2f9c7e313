//! Creates the appointments table.
//!
//! Appointments carry the gross price and platform fee of a booked cleaning along with
//! the release state of the payer's retained share.

use sea_orm_migration::prelude::*;

#[derive(DeriveMigrationName)]
pub struct Migration;

#[async_trait::async_trait]
impl MigrationTrait for Migration {
    async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .create_table(
                Table::create()
                    .table(Appointments::Table)
                    .if_not_exists()
                    .col(
                        ColumnDef::new(Appointments::Id)
                            .uuid()
                            .not_null()
                            .primary_key(),
                    )
                    .col(ColumnDef::new(Appointments::HomeownerId).uuid().not_null())
                    .col(ColumnDef::new(Appointments::PayerId).uuid().not_null())
                    .col(
                        ColumnDef::new(Appointments::ScheduledFor)
                            .timestamp_with_time_zone()
                            .not_null(),
                    )
                    .col(ColumnDef::new(Appointments::Price).big_integer().not_null())
                    .col(
                        ColumnDef::new(Appointments::PlatformFee)
                            .big_integer()
                            .not_null()
                            .default(0),
                    )
                    .col(
                        ColumnDef::new(Appointments::PaymentStatus)
                            .text()
                            .not_null()
                            .default("pending"),
                    )
                    .col(
                        ColumnDef::new(Appointments::OwnerTransferReference)
                            .text()
                            .null(),
                    )
                    .col(
                        ColumnDef::new(Appointments::OwnerPaidAmount)
                            .big_integer()
                            .null(),
                    )
                    .col(
                        ColumnDef::new(Appointments::PaymentFailureReason)
                            .text()
                            .null(),
                    )
                    .col(
                        ColumnDef::new(Appointments::ReleasedAt)
                            .timestamp_with_time_zone()
                            .null(),
                    )
                    .col(
                        ColumnDef::new(Appointments::CreatedAt)
                            .timestamp_with_time_zone()
                            .not_null()
                            .default(Expr::current_timestamp()),
                    )
                    .col(
                        ColumnDef::new(Appointments::UpdatedAt)
                            .timestamp_with_time_zone()
                            .not_null()
                            .default(Expr::current_timestamp()),
                    )
                    .to_owned(),
            )
            .await?;

        manager
            .create_index(
                Index::create()
                    .name("idx_appointments_payer_id")
                    .table(Appointments::Table)
                    .col(Appointments::PayerId)
                    .to_owned(),
            )
            .await
    }

    async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .drop_index(Index::drop().name("idx_appointments_payer_id").to_owned())
            .await?;
        manager
            .drop_table(Table::drop().table(Appointments::Table).to_owned())
            .await
    }
}

#[derive(DeriveIden)]
enum Appointments {
    Table,
    Id,
    HomeownerId,
    PayerId,
    ScheduledFor,
    Price,
    PlatformFee,
    PaymentStatus,
    OwnerTransferReference,
    OwnerPaidAmount,
    PaymentFailureReason,
    ReleasedAt,
    CreatedAt,
    UpdatedAt,
}

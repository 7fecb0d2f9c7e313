//! Creates the completion_records table used by the two-step completion approval flow.

use sea_orm_migration::prelude::*;

#[derive(DeriveMigrationName)]
pub struct Migration;

#[async_trait::async_trait]
impl MigrationTrait for Migration {
    async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .create_table(
                Table::create()
                    .table(CompletionRecords::Table)
                    .if_not_exists()
                    .col(
                        ColumnDef::new(CompletionRecords::Id)
                            .uuid()
                            .not_null()
                            .primary_key(),
                    )
                    .col(
                        ColumnDef::new(CompletionRecords::AppointmentId)
                            .uuid()
                            .not_null(),
                    )
                    .col(
                        ColumnDef::new(CompletionRecords::CleanerId)
                            .uuid()
                            .not_null(),
                    )
                    .col(
                        ColumnDef::new(CompletionRecords::Status)
                            .text()
                            .not_null()
                            .default("not_submitted"),
                    )
                    .col(
                        ColumnDef::new(CompletionRecords::SubmittedAt)
                            .timestamp_with_time_zone()
                            .null(),
                    )
                    .col(
                        ColumnDef::new(CompletionRecords::AutoApprovalExpiresAt)
                            .timestamp_with_time_zone()
                            .null(),
                    )
                    .col(
                        ColumnDef::new(CompletionRecords::ApprovedAt)
                            .timestamp_with_time_zone()
                            .null(),
                    )
                    .col(ColumnDef::new(CompletionRecords::ApprovedBy).uuid().null())
                    .col(
                        ColumnDef::new(CompletionRecords::DisputeReason)
                            .text()
                            .null(),
                    )
                    .col(
                        ColumnDef::new(CompletionRecords::CreatedAt)
                            .timestamp_with_time_zone()
                            .not_null()
                            .default(Expr::current_timestamp()),
                    )
                    .col(
                        ColumnDef::new(CompletionRecords::UpdatedAt)
                            .timestamp_with_time_zone()
                            .not_null()
                            .default(Expr::current_timestamp()),
                    )
                    .foreign_key(
                        ForeignKey::create()
                            .name("fk_completion_records_appointment_id")
                            .from(CompletionRecords::Table, CompletionRecords::AppointmentId)
                            .to(Appointments::Table, Appointments::Id)
                            .on_delete(ForeignKeyAction::Cascade),
                    )
                    .to_owned(),
            )
            .await?;

        manager
            .create_index(
                Index::create()
                    .name("idx_completion_records_appointment_cleaner")
                    .table(CompletionRecords::Table)
                    .col(CompletionRecords::AppointmentId)
                    .col(CompletionRecords::CleanerId)
                    .unique()
                    .to_owned(),
            )
            .await?;

        // Monitor scan: submitted records ordered by expiry
        manager
            .create_index(
                Index::create()
                    .name("idx_completion_records_status_expires")
                    .table(CompletionRecords::Table)
                    .col(CompletionRecords::Status)
                    .col(CompletionRecords::AutoApprovalExpiresAt)
                    .to_owned(),
            )
            .await
    }

    async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        for name in [
            "idx_completion_records_appointment_cleaner",
            "idx_completion_records_status_expires",
        ] {
            manager
                .drop_index(Index::drop().name(name).to_owned())
                .await?;
        }
        manager
            .drop_table(Table::drop().table(CompletionRecords::Table).to_owned())
            .await
    }
}

#[derive(DeriveIden)]
enum CompletionRecords {
    Table,
    Id,
    AppointmentId,
    CleanerId,
    Status,
    SubmittedAt,
    AutoApprovalExpiresAt,
    ApprovedAt,
    ApprovedBy,
    DisputeReason,
    CreatedAt,
    UpdatedAt,
}

#[derive(DeriveIden)]
enum Appointments {
    Table,
    Id,
}

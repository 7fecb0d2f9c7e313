//! Creates the pending_payouts ledger table.
//!
//! Each row is money earned by an employee on one job assignment and not yet settled.

use sea_orm_migration::prelude::*;

#[derive(DeriveMigrationName)]
pub struct Migration;

#[async_trait::async_trait]
impl MigrationTrait for Migration {
    async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .create_table(
                Table::create()
                    .table(PendingPayouts::Table)
                    .if_not_exists()
                    .col(
                        ColumnDef::new(PendingPayouts::Id)
                            .uuid()
                            .not_null()
                            .primary_key(),
                    )
                    .col(ColumnDef::new(PendingPayouts::PayeeId).uuid().not_null())
                    .col(ColumnDef::new(PendingPayouts::PayerId).uuid().not_null())
                    .col(
                        ColumnDef::new(PendingPayouts::JobAssignmentId)
                            .uuid()
                            .not_null(),
                    )
                    .col(
                        ColumnDef::new(PendingPayouts::AppointmentId)
                            .uuid()
                            .not_null(),
                    )
                    .col(
                        ColumnDef::new(PendingPayouts::Amount)
                            .big_integer()
                            .not_null(),
                    )
                    .col(ColumnDef::new(PendingPayouts::PayType).text().not_null())
                    .col(ColumnDef::new(PendingPayouts::HoursWorked).double().null())
                    .col(
                        ColumnDef::new(PendingPayouts::Status)
                            .text()
                            .not_null()
                            .default("pending"),
                    )
                    .col(
                        ColumnDef::new(PendingPayouts::EarnedAt)
                            .timestamp_with_time_zone()
                            .not_null(),
                    )
                    .col(
                        ColumnDef::new(PendingPayouts::ScheduledFor)
                            .date()
                            .not_null(),
                    )
                    .col(ColumnDef::new(PendingPayouts::BatchId).uuid().null())
                    .col(
                        ColumnDef::new(PendingPayouts::TransferReference)
                            .text()
                            .null(),
                    )
                    .col(
                        ColumnDef::new(PendingPayouts::PaidAt)
                            .timestamp_with_time_zone()
                            .null(),
                    )
                    .col(ColumnDef::new(PendingPayouts::FailureReason).text().null())
                    .col(
                        ColumnDef::new(PendingPayouts::RetryCount)
                            .integer()
                            .not_null()
                            .default(0),
                    )
                    .col(
                        ColumnDef::new(PendingPayouts::CancelledReason)
                            .text()
                            .null(),
                    )
                    .col(
                        ColumnDef::new(PendingPayouts::CreatedAt)
                            .timestamp_with_time_zone()
                            .not_null()
                            .default(Expr::current_timestamp()),
                    )
                    .col(
                        ColumnDef::new(PendingPayouts::UpdatedAt)
                            .timestamp_with_time_zone()
                            .not_null()
                            .default(Expr::current_timestamp()),
                    )
                    .foreign_key(
                        ForeignKey::create()
                            .name("fk_pending_payouts_job_assignment_id")
                            .from(PendingPayouts::Table, PendingPayouts::JobAssignmentId)
                            .to(JobAssignments::Table, JobAssignments::Id)
                            .on_delete(ForeignKeyAction::Restrict),
                    )
                    .to_owned(),
            )
            .await?;

        // Due-row selection for scheduled runs
        manager
            .create_index(
                Index::create()
                    .name("idx_pending_payouts_status_scheduled_for")
                    .table(PendingPayouts::Table)
                    .col(PendingPayouts::Status)
                    .col(PendingPayouts::ScheduledFor)
                    .to_owned(),
            )
            .await?;

        manager
            .create_index(
                Index::create()
                    .name("idx_pending_payouts_payee_status")
                    .table(PendingPayouts::Table)
                    .col(PendingPayouts::PayeeId)
                    .col(PendingPayouts::Status)
                    .to_owned(),
            )
            .await?;

        manager
            .create_index(
                Index::create()
                    .name("idx_pending_payouts_payer_status")
                    .table(PendingPayouts::Table)
                    .col(PendingPayouts::PayerId)
                    .col(PendingPayouts::Status)
                    .to_owned(),
            )
            .await
    }

    async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        for name in [
            "idx_pending_payouts_status_scheduled_for",
            "idx_pending_payouts_payee_status",
            "idx_pending_payouts_payer_status",
        ] {
            manager
                .drop_index(Index::drop().name(name).to_owned())
                .await?;
        }
        manager
            .drop_table(Table::drop().table(PendingPayouts::Table).to_owned())
            .await
    }
}

#[derive(DeriveIden)]
enum PendingPayouts {
    Table,
    Id,
    PayeeId,
    PayerId,
    JobAssignmentId,
    AppointmentId,
    Amount,
    PayType,
    HoursWorked,
    Status,
    EarnedAt,
    ScheduledFor,
    BatchId,
    TransferReference,
    PaidAt,
    FailureReason,
    RetryCount,
    CancelledReason,
    CreatedAt,
    UpdatedAt,
}

#[derive(DeriveIden)]
enum JobAssignments {
    Table,
    Id,
}

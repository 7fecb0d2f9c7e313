//! Creates the job_assignments table.
//!
//! One row per worker on an appointment. `pay_amount` is computed when the worker is
//! assigned; settlement only moves `payout_status` forward and records what was paid.

use sea_orm_migration::prelude::*;

#[derive(DeriveMigrationName)]
pub struct Migration;

#[async_trait::async_trait]
impl MigrationTrait for Migration {
    async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .create_table(
                Table::create()
                    .table(JobAssignments::Table)
                    .if_not_exists()
                    .col(
                        ColumnDef::new(JobAssignments::Id)
                            .uuid()
                            .not_null()
                            .primary_key(),
                    )
                    .col(
                        ColumnDef::new(JobAssignments::AppointmentId)
                            .uuid()
                            .not_null(),
                    )
                    .col(ColumnDef::new(JobAssignments::BusinessId).uuid().not_null())
                    .col(ColumnDef::new(JobAssignments::WorkerId).uuid().not_null())
                    .col(ColumnDef::new(JobAssignments::PayType).text().not_null())
                    .col(
                        ColumnDef::new(JobAssignments::HourlyRate)
                            .big_integer()
                            .null(),
                    )
                    .col(ColumnDef::new(JobAssignments::FlatRate).big_integer().null())
                    .col(ColumnDef::new(JobAssignments::HoursWorked).double().null())
                    .col(
                        ColumnDef::new(JobAssignments::PayAmount)
                            .big_integer()
                            .not_null(),
                    )
                    .col(
                        ColumnDef::new(JobAssignments::PayoutStatus)
                            .text()
                            .not_null()
                            .default("unpaid"),
                    )
                    .col(
                        ColumnDef::new(JobAssignments::PendingPayoutId)
                            .uuid()
                            .null(),
                    )
                    .col(
                        ColumnDef::new(JobAssignments::PaidAmount)
                            .big_integer()
                            .null(),
                    )
                    .col(
                        ColumnDef::new(JobAssignments::TransferReference)
                            .text()
                            .null(),
                    )
                    .col(
                        ColumnDef::new(JobAssignments::PaidAt)
                            .timestamp_with_time_zone()
                            .null(),
                    )
                    .col(
                        ColumnDef::new(JobAssignments::CreatedAt)
                            .timestamp_with_time_zone()
                            .not_null()
                            .default(Expr::current_timestamp()),
                    )
                    .col(
                        ColumnDef::new(JobAssignments::UpdatedAt)
                            .timestamp_with_time_zone()
                            .not_null()
                            .default(Expr::current_timestamp()),
                    )
                    .foreign_key(
                        ForeignKey::create()
                            .name("fk_job_assignments_appointment_id")
                            .from(JobAssignments::Table, JobAssignments::AppointmentId)
                            .to(Appointments::Table, Appointments::Id)
                            .on_delete(ForeignKeyAction::Cascade),
                    )
                    .to_owned(),
            )
            .await?;

        manager
            .create_index(
                Index::create()
                    .name("idx_job_assignments_appointment_worker")
                    .table(JobAssignments::Table)
                    .col(JobAssignments::AppointmentId)
                    .col(JobAssignments::WorkerId)
                    .to_owned(),
            )
            .await
    }

    async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .drop_index(
                Index::drop()
                    .name("idx_job_assignments_appointment_worker")
                    .to_owned(),
            )
            .await?;
        manager
            .drop_table(Table::drop().table(JobAssignments::Table).to_owned())
            .await
    }
}

#[derive(DeriveIden)]
enum JobAssignments {
    Table,
    Id,
    AppointmentId,
    BusinessId,
    WorkerId,
    PayType,
    HourlyRate,
    FlatRate,
    HoursWorked,
    PayAmount,
    PayoutStatus,
    PendingPayoutId,
    PaidAmount,
    TransferReference,
    PaidAt,
    CreatedAt,
    UpdatedAt,
}

#[derive(DeriveIden)]
enum Appointments {
    Table,
    Id,
}

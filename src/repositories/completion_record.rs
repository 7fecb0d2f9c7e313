//! # Completion Record Repository
//!
//! Transitions out of `submitted` are conditional on the row still being `submitted`,
//! which is what makes approval, auto-approval and dispute mutually exclusive.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use sea_orm::sea_query::Expr;
use sea_orm::{
    ActiveModelTrait, ColumnTrait, ConnectionTrait, DatabaseConnection, DbErr, EntityTrait,
    QueryFilter, QueryOrder, QuerySelect, Set,
};
use uuid::Uuid;

use super::to_db_time;
use crate::models::completion_record::{
    ActiveModel, ApprovedBy, Column, CompletionStatus, Entity, Model,
};

pub struct CompletionRecordRepository {
    db: Arc<DatabaseConnection>,
}

impl CompletionRecordRepository {
    pub fn new(db: Arc<DatabaseConnection>) -> Self {
        Self { db }
    }

    pub async fn find_by_id<C: ConnectionTrait>(
        conn: &C,
        id: Uuid,
    ) -> Result<Option<Model>, DbErr> {
        Entity::find_by_id(id).one(conn).await
    }

    pub async fn find_for_cleaner<C: ConnectionTrait>(
        conn: &C,
        appointment_id: Uuid,
        cleaner_id: Uuid,
    ) -> Result<Option<Model>, DbErr> {
        Entity::find()
            .filter(Column::AppointmentId.eq(appointment_id))
            .filter(Column::CleanerId.eq(cleaner_id))
            .one(conn)
            .await
    }

    pub async fn list_for_appointment<C: ConnectionTrait>(
        conn: &C,
        appointment_id: Uuid,
    ) -> Result<Vec<Model>, DbErr> {
        Entity::find()
            .filter(Column::AppointmentId.eq(appointment_id))
            .all(conn)
            .await
    }

    /// Creates a `not_submitted` record for a cleaner on an appointment.
    pub async fn create_pending<C: ConnectionTrait>(
        conn: &C,
        appointment_id: Uuid,
        cleaner_id: Uuid,
        now: DateTime<Utc>,
    ) -> Result<Model, DbErr> {
        ActiveModel {
            id: Set(Uuid::new_v4()),
            appointment_id: Set(appointment_id),
            cleaner_id: Set(cleaner_id),
            status: Set(CompletionStatus::NotSubmitted),
            submitted_at: Set(None),
            auto_approval_expires_at: Set(None),
            approved_at: Set(None),
            approved_by: Set(None),
            dispute_reason: Set(None),
            created_at: Set(to_db_time(now)),
            updated_at: Set(to_db_time(now)),
        }
        .insert(conn)
        .await
    }

    /// `not_submitted → submitted` with the auto-approval deadline.
    pub async fn mark_submitted<C: ConnectionTrait>(
        conn: &C,
        id: Uuid,
        now: DateTime<Utc>,
        expires_at: DateTime<Utc>,
    ) -> Result<bool, DbErr> {
        let result = Entity::update_many()
            .col_expr(Column::Status, Expr::value(CompletionStatus::Submitted))
            .col_expr(Column::SubmittedAt, Expr::value(to_db_time(now)))
            .col_expr(
                Column::AutoApprovalExpiresAt,
                Expr::value(to_db_time(expires_at)),
            )
            .col_expr(Column::UpdatedAt, Expr::value(to_db_time(now)))
            .filter(Column::Id.eq(id))
            .filter(Column::Status.eq(CompletionStatus::NotSubmitted))
            .exec(conn)
            .await?;
        Ok(result.rows_affected == 1)
    }

    /// `submitted → approved | auto_approved`. False when another path got there first.
    pub async fn mark_approved<C: ConnectionTrait>(
        conn: &C,
        id: Uuid,
        approved_by: ApprovedBy,
        now: DateTime<Utc>,
    ) -> Result<bool, DbErr> {
        let result = Entity::update_many()
            .col_expr(Column::Status, Expr::value(approved_by.resulting_status()))
            .col_expr(Column::ApprovedBy, Expr::value(approved_by.approver_id()))
            .col_expr(Column::ApprovedAt, Expr::value(to_db_time(now)))
            .col_expr(Column::UpdatedAt, Expr::value(to_db_time(now)))
            .filter(Column::Id.eq(id))
            .filter(Column::Status.eq(CompletionStatus::Submitted))
            .exec(conn)
            .await?;
        Ok(result.rows_affected == 1)
    }

    /// `submitted → disputed`.
    pub async fn mark_disputed<C: ConnectionTrait>(
        conn: &C,
        id: Uuid,
        reason: &str,
        now: DateTime<Utc>,
    ) -> Result<bool, DbErr> {
        let result = Entity::update_many()
            .col_expr(Column::Status, Expr::value(CompletionStatus::Disputed))
            .col_expr(Column::DisputeReason, Expr::value(reason.to_string()))
            .col_expr(Column::UpdatedAt, Expr::value(to_db_time(now)))
            .filter(Column::Id.eq(id))
            .filter(Column::Status.eq(CompletionStatus::Submitted))
            .exec(conn)
            .await?;
        Ok(result.rows_affected == 1)
    }

    /// Records a dispute raised after approval; status stays terminal.
    pub async fn record_late_dispute<C: ConnectionTrait>(
        conn: &C,
        id: Uuid,
        reason: &str,
        now: DateTime<Utc>,
    ) -> Result<u64, DbErr> {
        let result = Entity::update_many()
            .col_expr(Column::DisputeReason, Expr::value(reason.to_string()))
            .col_expr(Column::UpdatedAt, Expr::value(to_db_time(now)))
            .filter(Column::Id.eq(id))
            .exec(conn)
            .await?;
        Ok(result.rows_affected)
    }

    /// Submitted records whose approval window closed before `now`, oldest deadline first.
    pub async fn list_expired(&self, now: DateTime<Utc>, limit: u64) -> Result<Vec<Model>, DbErr> {
        Entity::find()
            .filter(Column::Status.eq(CompletionStatus::Submitted))
            .filter(Column::AutoApprovalExpiresAt.lt(to_db_time(now)))
            .order_by_asc(Column::AutoApprovalExpiresAt)
            .limit(limit)
            .all(self.db.as_ref())
            .await
    }
}

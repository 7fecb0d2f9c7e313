//! # Job Assignment Repository

use std::sync::Arc;

use chrono::{DateTime, Utc};
use sea_orm::sea_query::Expr;
use sea_orm::{
    ActiveModelTrait, ColumnTrait, ConnectionTrait, DatabaseConnection, DbErr, EntityTrait,
    QueryFilter, QueryOrder, Set,
};
use uuid::Uuid;

use super::to_db_time;
use crate::models::job_assignment::{
    ActiveModel, AssignmentPayoutStatus, Column, Entity, Model, PayType,
};

/// Input for assigning a worker to an appointment.
#[derive(Debug, Clone)]
pub struct NewJobAssignment {
    pub appointment_id: Uuid,
    pub business_id: Uuid,
    pub worker_id: Uuid,
    pub pay_type: PayType,
    pub hourly_rate: Option<i64>,
    pub flat_rate: Option<i64>,
    pub hours_worked: Option<f64>,
}

pub struct JobAssignmentRepository {
    db: Arc<DatabaseConnection>,
}

impl JobAssignmentRepository {
    pub fn new(db: Arc<DatabaseConnection>) -> Self {
        Self { db }
    }

    /// Creates an assignment with its pay computed up front. Returns `None` when the
    /// pay inputs do not match the pay type.
    pub async fn create(
        &self,
        input: NewJobAssignment,
        now: DateTime<Utc>,
    ) -> Result<Option<Model>, DbErr> {
        let Some(pay_amount) =
            input
                .pay_type
                .compute_pay(input.hourly_rate, input.flat_rate, input.hours_worked)
        else {
            return Ok(None);
        };

        let row = ActiveModel {
            id: Set(Uuid::new_v4()),
            appointment_id: Set(input.appointment_id),
            business_id: Set(input.business_id),
            worker_id: Set(input.worker_id),
            pay_type: Set(input.pay_type),
            hourly_rate: Set(input.hourly_rate),
            flat_rate: Set(input.flat_rate),
            hours_worked: Set(input.hours_worked),
            pay_amount: Set(pay_amount),
            payout_status: Set(AssignmentPayoutStatus::Unpaid),
            pending_payout_id: Set(None),
            paid_amount: Set(None),
            transfer_reference: Set(None),
            paid_at: Set(None),
            created_at: Set(to_db_time(now)),
            updated_at: Set(to_db_time(now)),
        };
        row.insert(self.db.as_ref()).await.map(Some)
    }

    pub async fn find_by_id<C: ConnectionTrait>(
        conn: &C,
        id: Uuid,
    ) -> Result<Option<Model>, DbErr> {
        Entity::find_by_id(id).one(conn).await
    }

    pub async fn list_for_appointment<C: ConnectionTrait>(
        conn: &C,
        appointment_id: Uuid,
    ) -> Result<Vec<Model>, DbErr> {
        Entity::find()
            .filter(Column::AppointmentId.eq(appointment_id))
            .order_by_asc(Column::CreatedAt)
            .all(conn)
            .await
    }

    pub async fn list_for_worker_on_appointment<C: ConnectionTrait>(
        conn: &C,
        appointment_id: Uuid,
        worker_id: Uuid,
    ) -> Result<Vec<Model>, DbErr> {
        Entity::find()
            .filter(Column::AppointmentId.eq(appointment_id))
            .filter(Column::WorkerId.eq(worker_id))
            .order_by_asc(Column::CreatedAt)
            .all(conn)
            .await
    }

    /// Links an unpaid assignment to its new ledger row.
    pub async fn mark_pending_batch<C: ConnectionTrait>(
        conn: &C,
        id: Uuid,
        pending_payout_id: Uuid,
        now: DateTime<Utc>,
    ) -> Result<u64, DbErr> {
        let result = Entity::update_many()
            .col_expr(
                Column::PayoutStatus,
                Expr::value(AssignmentPayoutStatus::PendingBatch),
            )
            .col_expr(Column::PendingPayoutId, Expr::value(pending_payout_id))
            .col_expr(Column::UpdatedAt, Expr::value(to_db_time(now)))
            .filter(Column::Id.eq(id))
            .exec(conn)
            .await?;
        Ok(result.rows_affected)
    }

    pub async fn mark_paid<C: ConnectionTrait>(
        conn: &C,
        id: Uuid,
        paid_amount: i64,
        transfer_reference: &str,
        now: DateTime<Utc>,
    ) -> Result<u64, DbErr> {
        let result = Entity::update_many()
            .col_expr(Column::PayoutStatus, Expr::value(AssignmentPayoutStatus::Paid))
            .col_expr(Column::PaidAmount, Expr::value(paid_amount))
            .col_expr(
                Column::TransferReference,
                Expr::value(transfer_reference.to_string()),
            )
            .col_expr(Column::PaidAt, Expr::value(to_db_time(now)))
            .col_expr(Column::UpdatedAt, Expr::value(to_db_time(now)))
            .filter(Column::Id.eq(id))
            .exec(conn)
            .await?;
        Ok(result.rows_affected)
    }

    /// Clears the ledger link after the active row was cancelled.
    pub async fn mark_cancelled<C: ConnectionTrait>(
        conn: &C,
        id: Uuid,
        now: DateTime<Utc>,
    ) -> Result<u64, DbErr> {
        let result = Entity::update_many()
            .col_expr(
                Column::PayoutStatus,
                Expr::value(AssignmentPayoutStatus::Cancelled),
            )
            .col_expr(Column::PendingPayoutId, Expr::value(Option::<Uuid>::None))
            .col_expr(Column::UpdatedAt, Expr::value(to_db_time(now)))
            .filter(Column::Id.eq(id))
            .exec(conn)
            .await?;
        Ok(result.rows_affected)
    }
}

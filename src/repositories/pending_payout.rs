//! # Pending Payout Repository
//!
//! Ledger row storage. Status changes that act as locks (`pending → processing`,
//! `processing → completed | failed`) are conditional updates whose affected row
//! count tells the caller what it actually owns.

use std::sync::Arc;

use chrono::{DateTime, NaiveDate, Utc};
use sea_orm::sea_query::Expr;
use sea_orm::{
    ActiveModelTrait, ColumnTrait, ConnectionTrait, DatabaseConnection, DbErr, EntityTrait,
    QueryFilter, QueryOrder, QuerySelect,
};
use uuid::Uuid;

use super::to_db_time;
use crate::models::pending_payout::{ActiveModel, Column, Entity, Model, PendingPayoutStatus};

pub struct PendingPayoutRepository {
    db: Arc<DatabaseConnection>,
}

impl PendingPayoutRepository {
    pub fn new(db: Arc<DatabaseConnection>) -> Self {
        Self { db }
    }

    pub async fn find_by_id(&self, id: Uuid) -> Result<Option<Model>, DbErr> {
        Entity::find_by_id(id).one(self.db.as_ref()).await
    }

    /// Rows owed to a payee in the given statuses, oldest first.
    pub async fn list_for_payee(
        &self,
        payee_id: Uuid,
        statuses: &[PendingPayoutStatus],
    ) -> Result<Vec<Model>, DbErr> {
        Entity::find()
            .filter(Column::PayeeId.eq(payee_id))
            .filter(Column::Status.is_in(statuses.iter().copied()))
            .order_by_asc(Column::EarnedAt)
            .all(self.db.as_ref())
            .await
    }

    /// Rows a payer owes across all of its employees, grouped by payee order.
    pub async fn list_for_payer(
        &self,
        payer_id: Uuid,
        statuses: &[PendingPayoutStatus],
    ) -> Result<Vec<Model>, DbErr> {
        Entity::find()
            .filter(Column::PayerId.eq(payer_id))
            .filter(Column::Status.is_in(statuses.iter().copied()))
            .order_by_asc(Column::PayeeId)
            .order_by_asc(Column::EarnedAt)
            .all(self.db.as_ref())
            .await
    }

    /// Pending rows scheduled on or before `date`. Rows from missed runs are included.
    pub async fn list_due(&self, date: NaiveDate) -> Result<Vec<Model>, DbErr> {
        Entity::find()
            .filter(Column::Status.eq(PendingPayoutStatus::Pending))
            .filter(Column::ScheduledFor.lte(date))
            .order_by_asc(Column::PayeeId)
            .order_by_asc(Column::EarnedAt)
            .all(self.db.as_ref())
            .await
    }

    /// Pending rows for a payee regardless of date, optionally scoped to one payer.
    pub async fn list_pending_for_payee(
        &self,
        payee_id: Uuid,
        payer_id: Option<Uuid>,
    ) -> Result<Vec<Model>, DbErr> {
        let mut query = Entity::find()
            .filter(Column::PayeeId.eq(payee_id))
            .filter(Column::Status.eq(PendingPayoutStatus::Pending));
        if let Some(payer_id) = payer_id {
            query = query.filter(Column::PayerId.eq(payer_id));
        }
        query
            .order_by_asc(Column::EarnedAt)
            .all(self.db.as_ref())
            .await
    }

    pub async fn list_failed(&self, limit: u64) -> Result<Vec<Model>, DbErr> {
        Entity::find()
            .filter(Column::Status.eq(PendingPayoutStatus::Failed))
            .order_by_desc(Column::UpdatedAt)
            .limit(limit)
            .all(self.db.as_ref())
            .await
    }

    /// Processing rows not touched since `cutoff`, oldest first.
    pub async fn list_processing_before(
        &self,
        cutoff: DateTime<Utc>,
        limit: u64,
    ) -> Result<Vec<Model>, DbErr> {
        Entity::find()
            .filter(Column::Status.eq(PendingPayoutStatus::Processing))
            .filter(Column::UpdatedAt.lt(to_db_time(cutoff)))
            .order_by_asc(Column::UpdatedAt)
            .limit(limit)
            .all(self.db.as_ref())
            .await
    }

    pub async fn find_by_id_in<C: ConnectionTrait>(
        conn: &C,
        id: Uuid,
    ) -> Result<Option<Model>, DbErr> {
        Entity::find_by_id(id).one(conn).await
    }

    pub async fn find_active_for_assignment<C: ConnectionTrait>(
        conn: &C,
        assignment_id: Uuid,
    ) -> Result<Option<Model>, DbErr> {
        Entity::find()
            .filter(Column::JobAssignmentId.eq(assignment_id))
            .filter(Column::Status.is_in(PendingPayoutStatus::ACTIVE))
            .one(conn)
            .await
    }

    pub async fn find_pending_for_assignment<C: ConnectionTrait>(
        conn: &C,
        assignment_id: Uuid,
    ) -> Result<Option<Model>, DbErr> {
        Entity::find()
            .filter(Column::JobAssignmentId.eq(assignment_id))
            .filter(Column::Status.eq(PendingPayoutStatus::Pending))
            .one(conn)
            .await
    }

    pub async fn insert<C: ConnectionTrait>(conn: &C, row: ActiveModel) -> Result<Model, DbErr> {
        row.insert(conn).await
    }

    /// Flips the given pending rows to processing under `batch_id`. Rows that are no
    /// longer pending are left alone; the return value is how many were claimed.
    pub async fn claim<C: ConnectionTrait>(
        conn: &C,
        ids: &[Uuid],
        batch_id: Uuid,
        now: DateTime<Utc>,
    ) -> Result<u64, DbErr> {
        if ids.is_empty() {
            return Ok(0);
        }
        let result = Entity::update_many()
            .col_expr(Column::Status, Expr::value(PendingPayoutStatus::Processing))
            .col_expr(Column::BatchId, Expr::value(batch_id))
            .col_expr(Column::UpdatedAt, Expr::value(to_db_time(now)))
            .filter(Column::Id.is_in(ids.iter().copied()))
            .filter(Column::Status.eq(PendingPayoutStatus::Pending))
            .exec(conn)
            .await?;
        Ok(result.rows_affected)
    }

    pub async fn find_by_batch<C: ConnectionTrait>(
        conn: &C,
        batch_id: Uuid,
    ) -> Result<Vec<Model>, DbErr> {
        Entity::find()
            .filter(Column::BatchId.eq(batch_id))
            .order_by_asc(Column::EarnedAt)
            .all(conn)
            .await
    }

    pub async fn mark_batch_completed<C: ConnectionTrait>(
        conn: &C,
        batch_id: Uuid,
        transfer_reference: &str,
        now: DateTime<Utc>,
    ) -> Result<u64, DbErr> {
        let result = Entity::update_many()
            .col_expr(Column::Status, Expr::value(PendingPayoutStatus::Completed))
            .col_expr(
                Column::TransferReference,
                Expr::value(transfer_reference.to_string()),
            )
            .col_expr(Column::PaidAt, Expr::value(to_db_time(now)))
            .col_expr(Column::FailureReason, Expr::value(Option::<String>::None))
            .col_expr(Column::UpdatedAt, Expr::value(to_db_time(now)))
            .filter(Column::BatchId.eq(batch_id))
            .filter(Column::Status.eq(PendingPayoutStatus::Processing))
            .exec(conn)
            .await?;
        Ok(result.rows_affected)
    }

    pub async fn mark_batch_failed<C: ConnectionTrait>(
        conn: &C,
        batch_id: Uuid,
        reason: &str,
        now: DateTime<Utc>,
    ) -> Result<u64, DbErr> {
        let result = Entity::update_many()
            .col_expr(Column::Status, Expr::value(PendingPayoutStatus::Failed))
            .col_expr(Column::FailureReason, Expr::value(reason.to_string()))
            .col_expr(Column::RetryCount, Expr::col(Column::RetryCount).add(1))
            .col_expr(Column::UpdatedAt, Expr::value(to_db_time(now)))
            .filter(Column::BatchId.eq(batch_id))
            .filter(Column::Status.eq(PendingPayoutStatus::Processing))
            .exec(conn)
            .await?;
        Ok(result.rows_affected)
    }

    /// `pending → cancelled` for one row. Returns false if the row was no longer pending.
    pub async fn cancel<C: ConnectionTrait>(
        conn: &C,
        id: Uuid,
        reason: &str,
        now: DateTime<Utc>,
    ) -> Result<bool, DbErr> {
        let result = Entity::update_many()
            .col_expr(Column::Status, Expr::value(PendingPayoutStatus::Cancelled))
            .col_expr(Column::CancelledReason, Expr::value(reason.to_string()))
            .col_expr(Column::UpdatedAt, Expr::value(to_db_time(now)))
            .filter(Column::Id.eq(id))
            .filter(Column::Status.eq(PendingPayoutStatus::Pending))
            .exec(conn)
            .await?;
        Ok(result.rows_affected == 1)
    }

    /// `failed → pending` with a new settlement date. Returns false if the row was not failed.
    pub async fn requeue<C: ConnectionTrait>(
        conn: &C,
        id: Uuid,
        scheduled_for: NaiveDate,
        now: DateTime<Utc>,
    ) -> Result<bool, DbErr> {
        let result = Entity::update_many()
            .col_expr(Column::Status, Expr::value(PendingPayoutStatus::Pending))
            .col_expr(Column::ScheduledFor, Expr::value(scheduled_for))
            .col_expr(Column::BatchId, Expr::value(Option::<Uuid>::None))
            .col_expr(Column::UpdatedAt, Expr::value(to_db_time(now)))
            .filter(Column::Id.eq(id))
            .filter(Column::Status.eq(PendingPayoutStatus::Failed))
            .exec(conn)
            .await?;
        Ok(result.rows_affected == 1)
    }
}

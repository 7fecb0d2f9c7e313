//! # Appointment Repository
//!
//! Release of the payer's retained share is guarded by a `pending → releasing`
//! conditional update so a second approval path cannot pay the owner again.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use sea_orm::sea_query::Expr;
use sea_orm::{
    ActiveModelTrait, ColumnTrait, ConnectionTrait, DatabaseConnection, DbErr, EntityTrait,
    QueryFilter, Set,
};
use uuid::Uuid;

use super::to_db_time;
use crate::models::appointment::{ActiveModel, AppointmentPaymentStatus, Column, Entity, Model};

#[derive(Debug, Clone)]
pub struct NewAppointment {
    pub homeowner_id: Uuid,
    pub payer_id: Uuid,
    pub scheduled_for: DateTime<Utc>,
    pub price: i64,
    pub platform_fee: i64,
}

pub struct AppointmentRepository {
    db: Arc<DatabaseConnection>,
}

impl AppointmentRepository {
    pub fn new(db: Arc<DatabaseConnection>) -> Self {
        Self { db }
    }

    pub async fn create(&self, input: NewAppointment, now: DateTime<Utc>) -> Result<Model, DbErr> {
        ActiveModel {
            id: Set(Uuid::new_v4()),
            homeowner_id: Set(input.homeowner_id),
            payer_id: Set(input.payer_id),
            scheduled_for: Set(to_db_time(input.scheduled_for)),
            price: Set(input.price),
            platform_fee: Set(input.platform_fee),
            payment_status: Set(AppointmentPaymentStatus::Pending),
            owner_transfer_reference: Set(None),
            owner_paid_amount: Set(None),
            payment_failure_reason: Set(None),
            released_at: Set(None),
            created_at: Set(to_db_time(now)),
            updated_at: Set(to_db_time(now)),
        }
        .insert(self.db.as_ref())
        .await
    }

    pub async fn find_by_id<C: ConnectionTrait>(
        conn: &C,
        id: Uuid,
    ) -> Result<Option<Model>, DbErr> {
        Entity::find_by_id(id).one(conn).await
    }

    /// Claims the owner release. True only for the caller that moved the row out of `pending`.
    pub async fn claim_release<C: ConnectionTrait>(
        conn: &C,
        id: Uuid,
        now: DateTime<Utc>,
    ) -> Result<bool, DbErr> {
        let result = Entity::update_many()
            .col_expr(
                Column::PaymentStatus,
                Expr::value(AppointmentPaymentStatus::Releasing),
            )
            .col_expr(Column::UpdatedAt, Expr::value(to_db_time(now)))
            .filter(Column::Id.eq(id))
            .filter(Column::PaymentStatus.eq(AppointmentPaymentStatus::Pending))
            .exec(conn)
            .await?;
        Ok(result.rows_affected == 1)
    }

    pub async fn mark_released<C: ConnectionTrait>(
        conn: &C,
        id: Uuid,
        owner_paid_amount: i64,
        transfer_reference: Option<&str>,
        now: DateTime<Utc>,
    ) -> Result<u64, DbErr> {
        let result = Entity::update_many()
            .col_expr(
                Column::PaymentStatus,
                Expr::value(AppointmentPaymentStatus::Released),
            )
            .col_expr(Column::OwnerPaidAmount, Expr::value(owner_paid_amount))
            .col_expr(
                Column::OwnerTransferReference,
                Expr::value(transfer_reference.map(str::to_string)),
            )
            .col_expr(Column::ReleasedAt, Expr::value(to_db_time(now)))
            .col_expr(Column::UpdatedAt, Expr::value(to_db_time(now)))
            .filter(Column::Id.eq(id))
            .filter(Column::PaymentStatus.eq(AppointmentPaymentStatus::Releasing))
            .exec(conn)
            .await?;
        Ok(result.rows_affected)
    }

    pub async fn mark_owner_transfer_failed<C: ConnectionTrait>(
        conn: &C,
        id: Uuid,
        reason: &str,
        now: DateTime<Utc>,
    ) -> Result<u64, DbErr> {
        let result = Entity::update_many()
            .col_expr(
                Column::PaymentStatus,
                Expr::value(AppointmentPaymentStatus::OwnerTransferFailed),
            )
            .col_expr(Column::PaymentFailureReason, Expr::value(reason.to_string()))
            .col_expr(Column::UpdatedAt, Expr::value(to_db_time(now)))
            .filter(Column::Id.eq(id))
            .filter(Column::PaymentStatus.eq(AppointmentPaymentStatus::Releasing))
            .exec(conn)
            .await?;
        Ok(result.rows_affected)
    }
}

//! # Pending Payout Model
//!
//! A ledger row for money an employee has earned on one job assignment and not yet
//! received. Rows move `pending → processing → completed | failed`, or
//! `pending → cancelled`. At most one row per assignment may be active
//! (`pending` or `processing`); a partial unique index backs this up.

use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use super::job_assignment::PayType;

#[derive(Clone, Debug, PartialEq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "pending_payouts")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: Uuid,

    pub payee_id: Uuid,
    pub payer_id: Uuid,
    pub job_assignment_id: Uuid,
    pub appointment_id: Uuid,

    /// Minor units
    pub amount: i64,

    /// Snapshot of how the amount was earned
    pub pay_type: PayType,
    pub hours_worked: Option<f64>,

    pub status: PendingPayoutStatus,

    pub earned_at: DateTimeWithTimeZone,

    /// Settlement date the row becomes due on
    pub scheduled_for: Date,

    /// Set when a settlement pass claims the row
    pub batch_id: Option<Uuid>,

    pub transfer_reference: Option<String>,
    pub paid_at: Option<DateTimeWithTimeZone>,
    pub failure_reason: Option<String>,
    pub retry_count: i32,
    pub cancelled_reason: Option<String>,

    pub created_at: DateTimeWithTimeZone,
    pub updated_at: DateTimeWithTimeZone,
}

#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    EnumIter,
    DeriveActiveEnum,
    Serialize,
    Deserialize,
    ToSchema,
    Default,
)]
#[sea_orm(rs_type = "String", db_type = "Text")]
pub enum PendingPayoutStatus {
    #[sea_orm(string_value = "pending")]
    #[serde(rename = "pending")]
    #[default]
    Pending,

    #[sea_orm(string_value = "processing")]
    #[serde(rename = "processing")]
    Processing,

    #[sea_orm(string_value = "completed")]
    #[serde(rename = "completed")]
    Completed,

    #[sea_orm(string_value = "failed")]
    #[serde(rename = "failed")]
    Failed,

    #[sea_orm(string_value = "cancelled")]
    #[serde(rename = "cancelled")]
    Cancelled,
}

impl PendingPayoutStatus {
    /// Statuses covered by the one-active-row-per-assignment guard.
    pub const ACTIVE: [PendingPayoutStatus; 2] =
        [PendingPayoutStatus::Pending, PendingPayoutStatus::Processing];

    pub fn is_active(&self) -> bool {
        Self::ACTIVE.contains(self)
    }
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    #[sea_orm(
        belongs_to = "super::job_assignment::Entity",
        from = "Column::JobAssignmentId",
        to = "super::job_assignment::Column::Id"
    )]
    JobAssignment,
}

impl Related<super::job_assignment::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::JobAssignment.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}

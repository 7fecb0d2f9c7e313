//! # Job Assignment Model
//!
//! One worker on one appointment, with the pay computed when the worker was assigned.

use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

#[derive(Clone, Debug, PartialEq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "job_assignments")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: Uuid,

    pub appointment_id: Uuid,

    /// Business owner paying this worker
    pub business_id: Uuid,

    /// Worker receiving the pay; equal to `business_id` when the owner works the job
    pub worker_id: Uuid,

    pub pay_type: PayType,
    pub hourly_rate: Option<i64>,
    pub flat_rate: Option<i64>,
    pub hours_worked: Option<f64>,

    /// Minor units, fixed at assignment time
    pub pay_amount: i64,

    pub payout_status: AssignmentPayoutStatus,

    /// Active ledger entry while `payout_status` is `pending_batch`
    pub pending_payout_id: Option<Uuid>,

    pub paid_amount: Option<i64>,
    pub transfer_reference: Option<String>,
    pub paid_at: Option<DateTimeWithTimeZone>,

    pub created_at: DateTimeWithTimeZone,
    pub updated_at: DateTimeWithTimeZone,
}

impl Model {
    /// True when the business owner is working their own job.
    pub fn is_owner_self_assignment(&self) -> bool {
        self.worker_id == self.business_id
    }
}

#[derive(
    Debug, Clone, Copy, PartialEq, Eq, EnumIter, DeriveActiveEnum, Serialize, Deserialize, ToSchema,
)]
#[sea_orm(rs_type = "String", db_type = "Text")]
pub enum PayType {
    #[sea_orm(string_value = "hourly")]
    #[serde(rename = "hourly")]
    Hourly,

    #[sea_orm(string_value = "flat")]
    #[serde(rename = "flat")]
    Flat,
}

impl PayType {
    /// Computes pay in minor units. Hourly pay rounds to the nearest minor unit.
    /// Returns `None` unless the result is a positive amount.
    pub fn compute_pay(&self, hourly_rate: Option<i64>, flat_rate: Option<i64>, hours: Option<f64>) -> Option<i64> {
        let amount = match self {
            PayType::Flat => flat_rate?,
            PayType::Hourly => {
                let rate = hourly_rate?;
                let hours = hours?;
                if !hours.is_finite() || hours < 0.0 {
                    return None;
                }
                (rate as f64 * hours).round() as i64
            }
        };
        (amount > 0).then_some(amount)
    }
}

#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    EnumIter,
    DeriveActiveEnum,
    Serialize,
    Deserialize,
    ToSchema,
    Default,
)]
#[sea_orm(rs_type = "String", db_type = "Text")]
pub enum AssignmentPayoutStatus {
    #[sea_orm(string_value = "unpaid")]
    #[serde(rename = "unpaid")]
    #[default]
    Unpaid,

    #[sea_orm(string_value = "pending_batch")]
    #[serde(rename = "pending_batch")]
    PendingBatch,

    #[sea_orm(string_value = "paid")]
    #[serde(rename = "paid")]
    Paid,

    #[sea_orm(string_value = "cancelled")]
    #[serde(rename = "cancelled")]
    Cancelled,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    #[sea_orm(
        belongs_to = "super::appointment::Entity",
        from = "Column::AppointmentId",
        to = "super::appointment::Column::Id"
    )]
    Appointment,
}

impl Related<super::appointment::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Appointment.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn flat_pay_uses_flat_rate() {
        assert_eq!(PayType::Flat.compute_pay(None, Some(4000), None), Some(4000));
    }

    #[test]
    fn hourly_pay_rounds_to_minor_units() {
        assert_eq!(
            PayType::Hourly.compute_pay(Some(2000), None, Some(1.75)),
            Some(3500)
        );
        assert_eq!(
            PayType::Hourly.compute_pay(Some(1999), None, Some(0.5)),
            Some(1000)
        );
    }

    #[test]
    fn hourly_pay_requires_rate_and_hours() {
        assert_eq!(PayType::Hourly.compute_pay(Some(2000), None, None), None);
        assert_eq!(PayType::Hourly.compute_pay(None, None, Some(2.0)), None);
        assert_eq!(
            PayType::Hourly.compute_pay(Some(2000), None, Some(-1.0)),
            None
        );
    }

    #[test]
    fn zero_and_negative_pay_is_rejected() {
        assert_eq!(PayType::Flat.compute_pay(None, Some(0), None), None);
        assert_eq!(PayType::Flat.compute_pay(None, Some(-500), None), None);
        assert_eq!(PayType::Hourly.compute_pay(Some(2000), None, Some(0.0)), None);
        assert_eq!(PayType::Hourly.compute_pay(Some(-2000), None, Some(1.0)), None);
        assert_eq!(PayType::Hourly.compute_pay(Some(1), None, Some(0.1)), None);
    }
}

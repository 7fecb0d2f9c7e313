//! # Appointment Model
//!
//! A booked cleaning between a homeowner and a payer (business owner or independent
//! cleaner). Only the fields the payment release path needs are modelled here.

use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

#[derive(Clone, Debug, PartialEq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "appointments")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: Uuid,

    pub homeowner_id: Uuid,

    /// Business owner or independent cleaner who receives the retained share
    pub payer_id: Uuid,

    pub scheduled_for: DateTimeWithTimeZone,

    /// Gross price in minor units
    pub price: i64,

    /// Platform fee in minor units, already deducted from what the payer side receives
    pub platform_fee: i64,

    pub payment_status: AppointmentPaymentStatus,

    pub owner_transfer_reference: Option<String>,
    pub owner_paid_amount: Option<i64>,
    pub payment_failure_reason: Option<String>,
    pub released_at: Option<DateTimeWithTimeZone>,

    pub created_at: DateTimeWithTimeZone,
    pub updated_at: DateTimeWithTimeZone,
}

impl Model {
    /// Amount left for the payer side after the platform fee.
    pub fn net_amount(&self) -> i64 {
        self.price - self.platform_fee
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
pub enum AppointmentPaymentStatus {
    #[sea_orm(string_value = "pending")]
    #[serde(rename = "pending")]
    #[default]
    Pending,

    /// Claimed by the release path; the owner transfer is in flight
    #[sea_orm(string_value = "releasing")]
    #[serde(rename = "releasing")]
    Releasing,

    #[sea_orm(string_value = "released")]
    #[serde(rename = "released")]
    Released,

    #[sea_orm(string_value = "owner_transfer_failed")]
    #[serde(rename = "owner_transfer_failed")]
    OwnerTransferFailed,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    #[sea_orm(has_many = "super::job_assignment::Entity")]
    JobAssignment,

    #[sea_orm(has_many = "super::completion_record::Entity")]
    CompletionRecord,
}

impl Related<super::job_assignment::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::JobAssignment.def()
    }
}

impl Related<super::completion_record::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::CompletionRecord.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}

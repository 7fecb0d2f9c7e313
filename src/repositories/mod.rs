//! # Repository Layer
//!
//! SeaORM access for each table. Methods that take part in a caller's transaction
//! are associated functions generic over [`sea_orm::ConnectionTrait`]; read paths
//! hang off repository instances holding the shared pool.

use chrono::{DateTime, Utc};
use sea_orm::prelude::DateTimeWithTimeZone;

pub mod appointment;
pub mod completion_record;
pub mod job_assignment;
pub mod notification;
pub mod payout_account;
pub mod pending_payout;
pub mod pricing_config;

pub use appointment::AppointmentRepository;
pub use completion_record::CompletionRecordRepository;
pub use job_assignment::JobAssignmentRepository;
pub use notification::NotificationRepository;
pub use payout_account::PayoutAccountRepository;
pub use pending_payout::PendingPayoutRepository;
pub use pricing_config::PricingConfigRepository;

pub(crate) fn to_db_time(dt: DateTime<Utc>) -> DateTimeWithTimeZone {
    dt.fixed_offset()
}

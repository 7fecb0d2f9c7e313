//! # Data Models
//!
//! SeaORM entities for the payroll settlement service.

use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

pub mod appointment;
pub mod completion_record;
pub mod job_assignment;
pub mod notification;
pub mod payout_account;
pub mod pending_payout;
pub mod pricing_config;

pub use appointment::Entity as Appointment;
pub use completion_record::Entity as CompletionRecord;
pub use job_assignment::Entity as JobAssignment;
pub use notification::Entity as Notification;
pub use payout_account::Entity as PayoutAccount;
pub use pending_payout::Entity as PendingPayout;
pub use pricing_config::Entity as PricingConfig;

/// Basic service information response
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct ServiceInfo {
    /// The name of the service
    pub service: String,
    /// The version of the service
    pub version: String,
}

impl Default for ServiceInfo {
    fn default() -> Self {
        Self {
            service: "payroll".to_string(),
            version: env!("CARGO_PKG_VERSION").to_string(),
        }
    }
}

//! Database migrations for the payroll settlement service.

pub use sea_orm_migration::prelude::*;

mod m2025_01_06_090000_create_appointments;
mod m2025_01_06_090100_create_job_assignments;
mod m2025_01_06_090200_create_pending_payouts;
mod m2025_01_06_090300_create_completion_records;
mod m2025_01_06_090400_create_payout_accounts;
mod m2025_01_06_090500_create_pricing_configs;
mod m2025_01_06_090600_create_notifications;
mod m2025_01_08_120000_add_pending_payout_active_guard;

pub struct Migrator;

#[async_trait::async_trait]
impl MigratorTrait for Migrator {
    fn migrations() -> Vec<Box<dyn MigrationTrait>> {
        vec![
            Box::new(m2025_01_06_090000_create_appointments::Migration),
            Box::new(m2025_01_06_090100_create_job_assignments::Migration),
            Box::new(m2025_01_06_090200_create_pending_payouts::Migration),
            Box::new(m2025_01_06_090300_create_completion_records::Migration),
            Box::new(m2025_01_06_090400_create_payout_accounts::Migration),
            Box::new(m2025_01_06_090500_create_pricing_configs::Migration),
            Box::new(m2025_01_06_090600_create_notifications::Migration),
            Box::new(m2025_01_08_120000_add_pending_payout_active_guard::Migration),
        ]
    }
}

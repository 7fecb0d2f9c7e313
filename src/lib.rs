//! # Payroll Settlement Library
//!
//! Employee payout ledger, bi-weekly batch settlement, on-demand payouts and the
//! completion approval workflow that feeds them, plus the HTTP surface and
//! background tasks of the payroll service.

pub mod approval;
pub mod approval_monitor;
pub mod auth;
pub mod calendar;
pub mod clock;
pub mod config;
pub mod db;
pub mod error;
pub mod handlers;
pub mod ledger;
pub mod models;
pub mod money;
pub mod notifications;
pub mod repositories;
pub mod scheduler;
pub mod server;
pub mod settlement;
pub mod telemetry;
pub mod transfers;
pub use migration;

//! Test utilities for database-backed payroll tests.
//!
//! Provides an in-memory SQLite database with migrations applied, fakes for the
//! transfer processor and notification channels, and fixtures for appointments,
//! assignments and payout accounts.

#![allow(dead_code)]

use std::sync::{Arc, Mutex};

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use migration::{Migrator, MigratorTrait};
use payroll::approval::CompletionApprovalService;
use payroll::clock::FixedClock;
use payroll::config::AppConfig;
use payroll::ledger::PayoutLedger;
use payroll::models::job_assignment::{AssignmentPayoutStatus, PayType};
use payroll::models::pending_payout::PendingPayoutStatus;
use payroll::models::{appointment, job_assignment, pending_payout, pricing_config};
use payroll::notifications::{Notification, NotificationKind, Notifier};
use payroll::repositories::appointment::NewAppointment;
use payroll::repositories::job_assignment::NewJobAssignment;
use payroll::repositories::{
    AppointmentRepository, JobAssignmentRepository, PayoutAccountRepository,
    PendingPayoutRepository,
};
use payroll::server::AppState;
use payroll::settlement::SettlementProcessor;
use payroll::transfers::{TransferClient, TransferError, TransferReceipt, TransferRequest};
use sea_orm::{ActiveModelTrait, ConnectionTrait, Database, DatabaseConnection, Set, Statement};
use uuid::Uuid;

/// Sets up an in-memory SQLite database with all migrations applied.
pub async fn setup_test_db() -> Result<DatabaseConnection> {
    let db = Database::connect("sqlite::memory:").await?;
    Migrator::up(&db, None).await?;

    db.execute(Statement::from_string(
        db.get_database_backend(),
        "PRAGMA foreign_keys = ON".to_string(),
    ))
    .await?;

    Ok(db)
}

/// Wednesday between the 2024-01-05 anchor and the 2024-01-19 settlement Friday.
pub fn mid_cycle() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 1, 10, 15, 0, 0).unwrap()
}

/// Settlement Friday following [`mid_cycle`].
pub fn settlement_friday() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 1, 19, 6, 0, 0).unwrap()
}

/// Transfer processor fake that records every request.
#[derive(Default)]
pub struct FakeTransferClient {
    requests: Mutex<Vec<TransferRequest>>,
    failure: Mutex<Option<TransferError>>,
    counter: Mutex<u32>,
}

impl FakeTransferClient {
    pub fn new() -> Self {
        Self::default()
    }

    /// Every following transfer fails with `error` until cleared.
    pub fn fail_with(&self, error: TransferError) {
        *self.failure.lock().unwrap() = Some(error);
    }

    pub fn succeed(&self) {
        *self.failure.lock().unwrap() = None;
    }

    pub fn requests(&self) -> Vec<TransferRequest> {
        self.requests.lock().unwrap().clone()
    }
}

#[async_trait]
impl TransferClient for FakeTransferClient {
    async fn transfer(&self, request: TransferRequest) -> Result<TransferReceipt, TransferError> {
        self.requests.lock().unwrap().push(request);
        if let Some(error) = self.failure.lock().unwrap().clone() {
            return Err(error);
        }
        let mut counter = self.counter.lock().unwrap();
        *counter += 1;
        Ok(TransferReceipt {
            reference: format!("tr_test_{}", *counter),
        })
    }
}

/// Notifier fake that keeps everything it was asked to deliver.
#[derive(Default)]
pub struct RecordingNotifier {
    sent: Mutex<Vec<Notification>>,
}

impl RecordingNotifier {
    pub fn sent(&self) -> Vec<Notification> {
        self.sent.lock().unwrap().clone()
    }

    pub fn kinds_for(&self, user_id: Uuid) -> Vec<NotificationKind> {
        self.sent()
            .into_iter()
            .filter(|notification| notification.user_id == user_id)
            .map(|notification| notification.kind)
            .collect()
    }
}

#[async_trait]
impl Notifier for RecordingNotifier {
    async fn notify(&self, notification: &Notification) -> anyhow::Result<()> {
        self.sent.lock().unwrap().push(notification.clone());
        Ok(())
    }
}

/// Fully wired services over one in-memory database and a manual clock.
pub struct Harness {
    pub db: Arc<DatabaseConnection>,
    pub clock: FixedClock,
    pub transfers: Arc<FakeTransferClient>,
    pub notifier: Arc<RecordingNotifier>,
    pub ledger: Arc<PayoutLedger>,
    pub settlement: Arc<SettlementProcessor>,
    pub approvals: Arc<CompletionApprovalService>,
    pub state: AppState,
}

impl Harness {
    pub async fn new(now: DateTime<Utc>) -> Result<Self> {
        let db = Arc::new(setup_test_db().await?);
        let clock = FixedClock::new(now);
        let transfers = Arc::new(FakeTransferClient::new());
        let notifier = Arc::new(RecordingNotifier::default());

        let state = AppState::new(
            Arc::new(AppConfig::default()),
            db.clone(),
            transfers.clone(),
            notifier.clone(),
            Arc::new(clock.clone()),
        )
        .context("wiring services")?;

        Ok(Self {
            db,
            clock,
            transfers,
            notifier,
            ledger: state.ledger.clone(),
            settlement: state.settlement.clone(),
            approvals: state.approvals.clone(),
            state,
        })
    }

    pub async fn appointment(
        &self,
        homeowner_id: Uuid,
        payer_id: Uuid,
        price: i64,
        platform_fee: i64,
    ) -> Result<appointment::Model> {
        let now = payroll::clock::Clock::now(&self.clock);
        Ok(AppointmentRepository::new(self.db.clone())
            .create(
                NewAppointment {
                    homeowner_id,
                    payer_id,
                    scheduled_for: now,
                    price,
                    platform_fee,
                },
                now,
            )
            .await?)
    }

    /// Flat-rate assignment of `worker_id` on an appointment paid by its payer.
    pub async fn flat_assignment(
        &self,
        appointment: &appointment::Model,
        worker_id: Uuid,
        flat_rate: i64,
    ) -> Result<job_assignment::Model> {
        let now = payroll::clock::Clock::now(&self.clock);
        JobAssignmentRepository::new(self.db.clone())
            .create(
                NewJobAssignment {
                    appointment_id: appointment.id,
                    business_id: appointment.payer_id,
                    worker_id,
                    pay_type: PayType::Flat,
                    hourly_rate: None,
                    flat_rate: Some(flat_rate),
                    hours_worked: None,
                },
                now,
            )
            .await?
            .context("flat assignment has a pay amount")
    }

    /// Assignment row stored with a zero pay amount, as written before pay inputs were
    /// validated.
    pub async fn zero_pay_assignment(
        &self,
        appointment: &appointment::Model,
        worker_id: Uuid,
    ) -> Result<job_assignment::Model> {
        let now = payroll::clock::Clock::now(&self.clock).fixed_offset();
        Ok(job_assignment::ActiveModel {
            id: Set(Uuid::new_v4()),
            appointment_id: Set(appointment.id),
            business_id: Set(appointment.payer_id),
            worker_id: Set(worker_id),
            pay_type: Set(PayType::Flat),
            hourly_rate: Set(None),
            flat_rate: Set(Some(0)),
            hours_worked: Set(None),
            pay_amount: Set(0),
            payout_status: Set(AssignmentPayoutStatus::Unpaid),
            pending_payout_id: Set(None),
            paid_amount: Set(None),
            transfer_reference: Set(None),
            paid_at: Set(None),
            created_at: Set(now),
            updated_at: Set(now),
        }
        .insert(self.db.as_ref())
        .await?)
    }

    /// Active ledger row for an assignment that was never linked to it, so recording
    /// the assignment's earning collides with it.
    pub async fn unlinked_active_payout(&self, assignment: &job_assignment::Model) -> Result<Uuid> {
        let clock_now = payroll::clock::Clock::now(&self.clock);
        let now = clock_now.fixed_offset();
        let row = pending_payout::ActiveModel {
            id: Set(Uuid::new_v4()),
            payee_id: Set(assignment.worker_id),
            payer_id: Set(assignment.business_id),
            job_assignment_id: Set(assignment.id),
            appointment_id: Set(assignment.appointment_id),
            amount: Set(assignment.pay_amount),
            pay_type: Set(assignment.pay_type),
            hours_worked: Set(assignment.hours_worked),
            status: Set(PendingPayoutStatus::Pending),
            earned_at: Set(now),
            scheduled_for: Set(self.ledger.calendar().next_settlement_date(clock_now.date_naive())),
            batch_id: Set(None),
            transfer_reference: Set(None),
            paid_at: Set(None),
            failure_reason: Set(None),
            retry_count: Set(0),
            cancelled_reason: Set(None),
            created_at: Set(now),
            updated_at: Set(now),
        };
        Ok(PendingPayoutRepository::insert(self.db.as_ref(), row).await?.id)
    }

    pub async fn verified_account(&self, user_id: Uuid) -> Result<()> {
        let now = payroll::clock::Clock::now(&self.clock);
        PayoutAccountRepository::new(self.db.clone())
            .upsert(user_id, &format!("acct_{}", user_id.simple()), true, now)
            .await?;
        Ok(())
    }

    pub async fn unverified_account(&self, user_id: Uuid) -> Result<()> {
        let now = payroll::clock::Clock::now(&self.clock);
        PayoutAccountRepository::new(self.db.clone())
            .upsert(user_id, &format!("acct_{}", user_id.simple()), false, now)
            .await?;
        Ok(())
    }

    pub async fn pricing_window(&self, hours: Option<i32>) -> Result<()> {
        let now = payroll::clock::Clock::now(&self.clock).fixed_offset();
        pricing_config::ActiveModel {
            id: Set(Uuid::new_v4()),
            is_active: Set(true),
            completion_auto_approval_hours: Set(hours),
            created_at: Set(now),
            updated_at: Set(now),
        }
        .insert(self.db.as_ref())
        .await?;
        Ok(())
    }

    /// Records an earning for an assignment at its own pay amount.
    pub async fn earn(&self, assignment: &job_assignment::Model) -> Result<Uuid> {
        let appointment = AppointmentRepository::find_by_id(self.db.as_ref(), assignment.appointment_id)
            .await?
            .context("appointment exists")?;
        let entry = self
            .ledger
            .record_earning(assignment, assignment.pay_amount, &appointment)
            .await?;
        Ok(entry.id)
    }
}

//! # Pending Payout Ledger
//!
//! Durable record of money employees have earned and not yet received. Rows are
//! written when a completion is approved, read for balance views, and consumed by
//! the settlement processor.

use std::collections::BTreeMap;
use std::sync::Arc;

use chrono::{Duration, NaiveDate};
use sea_orm::prelude::DateTimeWithTimeZone;
use sea_orm::{ConnectionTrait, DatabaseConnection, Set, TransactionTrait};
use serde::Serialize;
use tracing::{info, instrument, warn};
use utoipa::ToSchema;
use uuid::Uuid;

use crate::calendar::SettlementCalendar;
use crate::clock::Clock;
use crate::error::{SettlementError, is_unique_violation};
use crate::models::appointment;
use crate::models::job_assignment::{self, PayType};
use crate::models::pending_payout::{self, PendingPayoutStatus};
use crate::repositories::{JobAssignmentRepository, PendingPayoutRepository, to_db_time};

/// A ledger row as exposed to callers.
#[derive(Debug, Clone, PartialEq, Serialize, ToSchema)]
pub struct PayoutEntry {
    pub id: Uuid,
    pub payee_id: Uuid,
    pub payer_id: Uuid,
    pub job_assignment_id: Uuid,
    pub appointment_id: Uuid,
    pub amount: i64,
    pub pay_type: PayType,
    pub hours_worked: Option<f64>,
    pub status: PendingPayoutStatus,
    #[schema(value_type = String, example = "2024-01-10T15:00:00Z")]
    pub earned_at: DateTimeWithTimeZone,
    pub scheduled_for: NaiveDate,
    pub transfer_reference: Option<String>,
    pub failure_reason: Option<String>,
    pub retry_count: i32,
}

impl From<pending_payout::Model> for PayoutEntry {
    fn from(model: pending_payout::Model) -> Self {
        Self {
            id: model.id,
            payee_id: model.payee_id,
            payer_id: model.payer_id,
            job_assignment_id: model.job_assignment_id,
            appointment_id: model.appointment_id,
            amount: model.amount,
            pay_type: model.pay_type,
            hours_worked: model.hours_worked,
            status: model.status,
            earned_at: model.earned_at,
            scheduled_for: model.scheduled_for,
            transfer_reference: model.transfer_reference,
            failure_reason: model.failure_reason,
            retry_count: model.retry_count,
        }
    }
}

/// Totals and itemized rows for one slice of the ledger.
#[derive(Debug, Clone, Default, PartialEq, Serialize, ToSchema)]
pub struct LedgerTotals {
    pub total_amount: i64,
    pub count: usize,
    pub entries: Vec<PayoutEntry>,
}

impl LedgerTotals {
    fn from_entries(entries: Vec<PayoutEntry>) -> Self {
        Self {
            total_amount: entries.iter().map(|entry| entry.amount).sum(),
            count: entries.len(),
            entries,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, ToSchema)]
pub struct PayeePendingSummary {
    pub payee_id: Uuid,
    pub pending: LedgerTotals,
    /// Rows claimed by a settlement pass that has not recorded an outcome yet
    pub processing: LedgerTotals,
    /// Rows whose transfer failed; they wait for operator action
    pub failed: LedgerTotals,
    pub next_settlement_date: NaiveDate,
}

#[derive(Debug, Clone, PartialEq, Serialize, ToSchema)]
pub struct EmployeeBreakdown {
    pub payee_id: Uuid,
    pub total_amount: i64,
    pub count: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize, ToSchema)]
pub struct PayerPendingSummary {
    pub payer_id: Uuid,
    pub pending: LedgerTotals,
    pub processing: LedgerTotals,
    pub failed: LedgerTotals,
    pub by_employee: Vec<EmployeeBreakdown>,
    pub next_settlement_date: NaiveDate,
}

#[derive(Debug, Clone, PartialEq, Serialize, ToSchema)]
#[serde(tag = "result", rename_all = "snake_case")]
pub enum CancelOutcome {
    Cancelled { entry: PayoutEntry },
    NotFound,
}

pub struct PayoutLedger {
    db: Arc<DatabaseConnection>,
    payouts: PendingPayoutRepository,
    calendar: SettlementCalendar,
    clock: Arc<dyn Clock>,
}

impl PayoutLedger {
    pub fn new(
        db: Arc<DatabaseConnection>,
        calendar: SettlementCalendar,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            payouts: PendingPayoutRepository::new(db.clone()),
            db,
            calendar,
            clock,
        }
    }

    pub fn calendar(&self) -> &SettlementCalendar {
        &self.calendar
    }

    /// Records an employee's earning for one assignment in its own transaction.
    pub async fn record_earning(
        &self,
        assignment: &job_assignment::Model,
        amount: i64,
        appointment: &appointment::Model,
    ) -> Result<PayoutEntry, SettlementError> {
        let txn = self.db.begin().await?;
        let entry = self
            .record_earning_in(&txn, assignment, amount, appointment)
            .await?;
        txn.commit().await?;
        Ok(entry)
    }

    /// Records an earning inside the caller's transaction: inserts a pending row due on
    /// the next settlement date and links the assignment to it.
    #[instrument(skip_all, fields(assignment_id = %assignment.id, payee_id = %assignment.worker_id))]
    pub async fn record_earning_in<C: ConnectionTrait>(
        &self,
        conn: &C,
        assignment: &job_assignment::Model,
        amount: i64,
        appointment: &appointment::Model,
    ) -> Result<PayoutEntry, SettlementError> {
        if amount <= 0 {
            return Err(SettlementError::Validation(format!(
                "earning amount must be positive, got {amount}"
            )));
        }
        if assignment.appointment_id != appointment.id {
            return Err(SettlementError::Validation(format!(
                "job assignment {} does not belong to appointment {}",
                assignment.id, appointment.id
            )));
        }
        if assignment.is_owner_self_assignment() {
            return Err(SettlementError::Validation(
                "business owners are paid through the retained share, not the ledger".into(),
            ));
        }

        if PendingPayoutRepository::find_active_for_assignment(conn, assignment.id)
            .await?
            .is_some()
        {
            return Err(SettlementError::DuplicateActiveEarning {
                assignment_id: assignment.id,
            });
        }

        let now = self.clock.now();
        let scheduled_for = self.calendar.next_settlement_date(now.date_naive());
        let row = pending_payout::ActiveModel {
            id: Set(Uuid::new_v4()),
            payee_id: Set(assignment.worker_id),
            payer_id: Set(assignment.business_id),
            job_assignment_id: Set(assignment.id),
            appointment_id: Set(appointment.id),
            amount: Set(amount),
            pay_type: Set(assignment.pay_type),
            hours_worked: Set(assignment.hours_worked),
            status: Set(PendingPayoutStatus::Pending),
            earned_at: Set(to_db_time(now)),
            scheduled_for: Set(scheduled_for),
            batch_id: Set(None),
            transfer_reference: Set(None),
            paid_at: Set(None),
            failure_reason: Set(None),
            retry_count: Set(0),
            cancelled_reason: Set(None),
            created_at: Set(to_db_time(now)),
            updated_at: Set(to_db_time(now)),
        };

        let inserted = PendingPayoutRepository::insert(conn, row)
            .await
            .map_err(|err| {
                if is_unique_violation(&err) {
                    SettlementError::DuplicateActiveEarning {
                        assignment_id: assignment.id,
                    }
                } else {
                    SettlementError::Database(err)
                }
            })?;

        JobAssignmentRepository::mark_pending_batch(conn, assignment.id, inserted.id, now).await?;

        info!(
            payout_id = %inserted.id,
            payer_id = %inserted.payer_id,
            amount = inserted.amount,
            scheduled_for = %inserted.scheduled_for,
            "Earning recorded in payout ledger"
        );
        metrics::counter!("payroll_ledger_earnings_recorded_total").increment(1);

        Ok(inserted.into())
    }

    /// What a payee is owed. A payee with no rows gets a zero summary.
    pub async fn pending_for_payee(
        &self,
        payee_id: Uuid,
    ) -> Result<PayeePendingSummary, SettlementError> {
        let rows = self
            .payouts
            .list_for_payee(payee_id, &SUMMARY_STATUSES)
            .await?;
        let (pending, processing, failed) = split_by_status(rows);

        Ok(PayeePendingSummary {
            payee_id,
            pending: LedgerTotals::from_entries(pending),
            processing: LedgerTotals::from_entries(processing),
            failed: LedgerTotals::from_entries(failed),
            next_settlement_date: self.next_settlement_date(),
        })
    }

    /// What a payer owes across its employees, with a per-employee breakdown.
    pub async fn pending_for_payer(
        &self,
        payer_id: Uuid,
    ) -> Result<PayerPendingSummary, SettlementError> {
        let rows = self
            .payouts
            .list_for_payer(payer_id, &SUMMARY_STATUSES)
            .await?;
        let (pending, processing, failed) = split_by_status(rows);

        let mut by_employee: BTreeMap<Uuid, EmployeeBreakdown> = BTreeMap::new();
        for entry in &pending {
            let breakdown = by_employee
                .entry(entry.payee_id)
                .or_insert_with(|| EmployeeBreakdown {
                    payee_id: entry.payee_id,
                    total_amount: 0,
                    count: 0,
                });
            breakdown.total_amount += entry.amount;
            breakdown.count += 1;
        }

        Ok(PayerPendingSummary {
            payer_id,
            pending: LedgerTotals::from_entries(pending),
            processing: LedgerTotals::from_entries(processing),
            failed: LedgerTotals::from_entries(failed),
            by_employee: by_employee.into_values().collect(),
            next_settlement_date: self.next_settlement_date(),
        })
    }

    /// Cancels the pending row for an assignment, e.g. after a dispute. Rows already
    /// claimed by a settlement pass are not touched and report `NotFound`.
    #[instrument(skip(self, reason))]
    pub async fn cancel(
        &self,
        assignment_id: Uuid,
        reason: &str,
    ) -> Result<CancelOutcome, SettlementError> {
        let reason = reason.trim();
        if reason.is_empty() {
            return Err(SettlementError::Validation(
                "a cancellation reason is required".into(),
            ));
        }

        let now = self.clock.now();
        let txn = self.db.begin().await?;

        let Some(row) = PendingPayoutRepository::find_pending_for_assignment(&txn, assignment_id)
            .await?
        else {
            return Ok(CancelOutcome::NotFound);
        };

        if !PendingPayoutRepository::cancel(&txn, row.id, reason, now).await? {
            warn!(payout_id = %row.id, "Payout left pending state before it could be cancelled");
            return Ok(CancelOutcome::NotFound);
        }
        JobAssignmentRepository::mark_cancelled(&txn, assignment_id, now).await?;
        txn.commit().await?;

        info!(payout_id = %row.id, amount = row.amount, "Pending payout cancelled");
        metrics::counter!("payroll_ledger_cancellations_total").increment(1);

        let mut entry = PayoutEntry::from(row);
        entry.status = PendingPayoutStatus::Cancelled;
        Ok(CancelOutcome::Cancelled { entry })
    }

    pub async fn failed_payouts(&self, limit: u64) -> Result<Vec<PayoutEntry>, SettlementError> {
        Ok(self
            .payouts
            .list_failed(limit)
            .await?
            .into_iter()
            .map(PayoutEntry::from)
            .collect())
    }

    /// Rows left `processing` for longer than `older_than`. A pass that transferred
    /// money but could not record it, or could not mark its batch failed, leaves rows
    /// here for an operator to reconcile against the processor.
    pub async fn stuck_payouts(
        &self,
        older_than: Duration,
        limit: u64,
    ) -> Result<Vec<PayoutEntry>, SettlementError> {
        let cutoff = self.clock.now() - older_than;
        Ok(self
            .payouts
            .list_processing_before(cutoff, limit)
            .await?
            .into_iter()
            .map(PayoutEntry::from)
            .collect())
    }

    /// Puts a failed row back in the queue for the next settlement date. Retries are
    /// never automatic; this is the operator's remediation path.
    #[instrument(skip(self))]
    pub async fn requeue_failed(&self, payout_id: Uuid) -> Result<PayoutEntry, SettlementError> {
        let now = self.clock.now();
        let txn = self.db.begin().await?;

        let row = PendingPayoutRepository::find_by_id_in(&txn, payout_id)
            .await?
            .ok_or_else(|| SettlementError::not_found("pending payout", payout_id))?;

        if row.status != PendingPayoutStatus::Failed {
            return Err(SettlementError::Validation(format!(
                "only failed payouts can be requeued; payout {payout_id} is {:?}",
                row.status
            )));
        }
        if PendingPayoutRepository::find_active_for_assignment(&txn, row.job_assignment_id)
            .await?
            .is_some()
        {
            return Err(SettlementError::DuplicateActiveEarning {
                assignment_id: row.job_assignment_id,
            });
        }

        let scheduled_for = self.calendar.next_settlement_date(now.date_naive());
        if !PendingPayoutRepository::requeue(&txn, payout_id, scheduled_for, now).await? {
            return Err(SettlementError::Validation(format!(
                "payout {payout_id} changed state while being requeued"
            )));
        }
        JobAssignmentRepository::mark_pending_batch(&txn, row.job_assignment_id, payout_id, now)
            .await?;

        let updated = PendingPayoutRepository::find_by_id_in(&txn, payout_id)
            .await?
            .ok_or_else(|| SettlementError::not_found("pending payout", payout_id))?;
        txn.commit().await?;

        info!(
            scheduled_for = %scheduled_for,
            retry_count = updated.retry_count,
            "Failed payout requeued"
        );
        Ok(updated.into())
    }

    fn next_settlement_date(&self) -> NaiveDate {
        self.calendar.next_settlement_date(self.clock.today())
    }
}

const SUMMARY_STATUSES: [PendingPayoutStatus; 3] = [
    PendingPayoutStatus::Pending,
    PendingPayoutStatus::Processing,
    PendingPayoutStatus::Failed,
];

fn split_by_status(
    rows: Vec<pending_payout::Model>,
) -> (Vec<PayoutEntry>, Vec<PayoutEntry>, Vec<PayoutEntry>) {
    let (mut pending, mut processing, mut failed) = (Vec::new(), Vec::new(), Vec::new());
    for entry in rows.into_iter().map(PayoutEntry::from) {
        match entry.status {
            PendingPayoutStatus::Pending => pending.push(entry),
            PendingPayoutStatus::Processing => processing.push(entry),
            _ => failed.push(entry),
        }
    }
    (pending, processing, failed)
}

//! # Settlement Processor
//!
//! Turns due ledger rows into money movement. Rows are grouped per payee so each
//! payee receives one transfer per pass, no matter how many jobs it covers.
//!
//! Each payee batch follows the same sequence:
//! 1. claim the rows (`pending → processing`) in a short transaction
//! 2. resolve the payee's verified payout destination
//! 3. call the transfer processor with a deterministic idempotency key
//! 4. record `completed` (plus assignment paid markers) or `failed`
//!
//! A failure for one payee never stops the pass for the others.

use std::collections::BTreeMap;
use std::sync::Arc;

use chrono::NaiveDate;
use sea_orm::{DatabaseConnection, TransactionTrait};
use serde::Serialize;
use serde_json::json;
use tracing::{debug, error, info, instrument, warn};
use utoipa::ToSchema;
use uuid::Uuid;

use crate::calendar::SettlementCalendar;
use crate::clock::Clock;
use crate::error::SettlementError;
use crate::models::pending_payout;
use crate::money::format_minor_units;
use crate::notifications::{Notification, NotificationKind, Notifier, notify_quietly};
use crate::repositories::{
    JobAssignmentRepository, PayoutAccountRepository, PendingPayoutRepository,
};
use crate::transfers::{TransferClient, TransferRequest, idempotency_key};

pub const NO_DESTINATION_REASON: &str = "payee has no verified payout destination";

/// What started a settlement pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum SettlementTrigger {
    Scheduled,
    Manual,
    EarlyPayout,
    Termination,
}

impl SettlementTrigger {
    pub fn as_str(&self) -> &'static str {
        match self {
            SettlementTrigger::Scheduled => "scheduled",
            SettlementTrigger::Manual => "manual",
            SettlementTrigger::EarlyPayout => "early_payout",
            SettlementTrigger::Termination => "termination",
        }
    }
}

/// Rows owed to one payee, settled with a single transfer.
#[derive(Debug, Clone, PartialEq)]
pub struct PayeeBatch {
    pub payee_id: Uuid,
    pub entries: Vec<pending_payout::Model>,
}

impl PayeeBatch {
    pub fn total(&self) -> i64 {
        self.entries.iter().map(|entry| entry.amount).sum()
    }

    pub fn ids(&self) -> Vec<Uuid> {
        self.entries.iter().map(|entry| entry.id).collect()
    }
}

/// Due rows grouped by payee, in payee order.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SettlementBatches {
    groups: BTreeMap<Uuid, PayeeBatch>,
}

impl SettlementBatches {
    pub fn from_entries(entries: impl IntoIterator<Item = pending_payout::Model>) -> Self {
        let mut groups: BTreeMap<Uuid, PayeeBatch> = BTreeMap::new();
        for entry in entries {
            groups
                .entry(entry.payee_id)
                .or_insert_with(|| PayeeBatch {
                    payee_id: entry.payee_id,
                    entries: Vec::new(),
                })
                .entries
                .push(entry);
        }
        Self { groups }
    }

    pub fn len(&self) -> usize {
        self.groups.len()
    }

    pub fn is_empty(&self) -> bool {
        self.groups.is_empty()
    }

    pub fn total(&self) -> i64 {
        self.groups.values().map(PayeeBatch::total).sum()
    }

    pub fn get(&self, payee_id: &Uuid) -> Option<&PayeeBatch> {
        self.groups.get(payee_id)
    }

    pub fn into_batches(self) -> impl Iterator<Item = PayeeBatch> {
        self.groups.into_values()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, ToSchema)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum PayeeOutcome {
    Paid {
        transfer_reference: String,
    },
    /// Money moved but the ledger could not be updated; rows stay `processing`
    /// until an operator reconciles them against the reference.
    PaidUnrecorded {
        transfer_reference: String,
        error: String,
    },
    Failed {
        reason: String,
    },
    /// Nothing was claimed, usually because a concurrent pass took the rows.
    Skipped {
        reason: String,
    },
}

#[derive(Debug, Clone, PartialEq, Serialize, ToSchema)]
pub struct PayeeSettlement {
    pub payee_id: Uuid,
    pub payout_ids: Vec<Uuid>,
    pub amount: i64,
    pub outcome: PayeeOutcome,
}

impl PayeeSettlement {
    pub fn is_paid(&self) -> bool {
        matches!(
            self.outcome,
            PayeeOutcome::Paid { .. } | PayeeOutcome::PaidUnrecorded { .. }
        )
    }

    fn skipped(payee_id: Uuid, reason: impl Into<String>) -> Self {
        Self {
            payee_id,
            payout_ids: Vec::new(),
            amount: 0,
            outcome: PayeeOutcome::Skipped {
                reason: reason.into(),
            },
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, ToSchema)]
pub struct SettlementRunSummary {
    pub run_date: NaiveDate,
    pub trigger: SettlementTrigger,
    /// True when the date was not a settlement date and nothing ran
    pub skipped: bool,
    /// Ledger rows the pass attempted
    pub processed: usize,
    pub succeeded: usize,
    pub failed: usize,
    pub total_paid: i64,
    pub payees: Vec<PayeeSettlement>,
}

impl SettlementRunSummary {
    fn empty(run_date: NaiveDate, trigger: SettlementTrigger, skipped: bool) -> Self {
        Self {
            run_date,
            trigger,
            skipped,
            processed: 0,
            succeeded: 0,
            failed: 0,
            total_paid: 0,
            payees: Vec::new(),
        }
    }

    fn record(&mut self, result: PayeeSettlement) {
        let rows = result.payout_ids.len();
        self.processed += rows;
        match &result.outcome {
            PayeeOutcome::Paid { .. } | PayeeOutcome::PaidUnrecorded { .. } => {
                self.succeeded += rows;
                self.total_paid += result.amount;
            }
            PayeeOutcome::Failed { .. } => self.failed += rows,
            PayeeOutcome::Skipped { .. } => {}
        }
        self.payees.push(result);
    }
}

/// Result of an early or termination payout.
#[derive(Debug, Clone, PartialEq, Serialize, ToSchema)]
#[serde(tag = "result", rename_all = "snake_case")]
pub enum OnDemandOutcome {
    NothingPending,
    Settled { settlement: PayeeSettlement },
}

pub struct SettlementProcessor {
    db: Arc<DatabaseConnection>,
    payouts: PendingPayoutRepository,
    transfers: Arc<dyn TransferClient>,
    notifier: Arc<dyn Notifier>,
    calendar: SettlementCalendar,
    clock: Arc<dyn Clock>,
    currency: String,
}

impl SettlementProcessor {
    pub fn new(
        db: Arc<DatabaseConnection>,
        transfers: Arc<dyn TransferClient>,
        notifier: Arc<dyn Notifier>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            payouts: PendingPayoutRepository::new(db.clone()),
            db,
            transfers,
            notifier,
            calendar: SettlementCalendar::default(),
            clock,
            currency: "usd".to_string(),
        }
    }

    pub fn with_calendar(mut self, calendar: SettlementCalendar) -> Self {
        self.calendar = calendar;
        self
    }

    pub fn with_currency(mut self, currency: impl Into<String>) -> Self {
        self.currency = currency.into();
        self
    }

    pub fn calendar(&self) -> &SettlementCalendar {
        &self.calendar
    }

    /// Scheduled entry point. Does nothing unless today is a settlement date.
    pub async fn run_scheduled(&self) -> Result<SettlementRunSummary, SettlementError> {
        self.run_for_date(self.clock.today(), false).await
    }

    /// Settles everything due on or before `date`. Without `force`, non-settlement
    /// dates are skipped.
    pub async fn run_for_date(
        &self,
        date: NaiveDate,
        force: bool,
    ) -> Result<SettlementRunSummary, SettlementError> {
        if !force && !self.calendar.is_settlement_date(date) {
            debug!(
                date = %date,
                next = %self.calendar.next_settlement_date(date),
                "Not a settlement date; skipping"
            );
            return Ok(SettlementRunSummary::empty(
                date,
                SettlementTrigger::Scheduled,
                true,
            ));
        }
        let trigger = if force {
            SettlementTrigger::Manual
        } else {
            SettlementTrigger::Scheduled
        };
        self.process_due(date, trigger).await
    }

    /// Runs one pass over rows due on or before `date`.
    #[instrument(skip(self), fields(trigger = trigger.as_str()))]
    pub async fn process_due(
        &self,
        date: NaiveDate,
        trigger: SettlementTrigger,
    ) -> Result<SettlementRunSummary, SettlementError> {
        let started = std::time::Instant::now();
        let due = self.payouts.list_due(date).await?;
        let batches = SettlementBatches::from_entries(due);
        let mut summary = SettlementRunSummary::empty(date, trigger, false);

        info!(
            payees = batches.len(),
            total = batches.total(),
            "Settlement pass starting"
        );

        for batch in batches.into_batches() {
            let payee_id = batch.payee_id;
            match self.settle_batch(batch, trigger).await {
                Ok(result) => summary.record(result),
                Err(err) => {
                    error!(error = ?err, payee_id = %payee_id, "Failed to settle payee batch");
                    summary.record(PayeeSettlement::skipped(
                        payee_id,
                        format!("settlement error: {err}"),
                    ));
                }
            }
        }

        metrics::histogram!("payroll_settlement_pass_seconds", "trigger" => trigger.as_str())
            .record(started.elapsed().as_secs_f64());
        info!(
            processed = summary.processed,
            succeeded = summary.succeeded,
            failed = summary.failed,
            total_paid = summary.total_paid,
            "Settlement pass finished"
        );
        Ok(summary)
    }

    /// Pays out everything a payer owes one payee right now, regardless of date.
    #[instrument(skip(self))]
    pub async fn early_payout(
        &self,
        payee_id: Uuid,
        payer_id: Uuid,
    ) -> Result<OnDemandOutcome, SettlementError> {
        let entries = self
            .payouts
            .list_pending_for_payee(payee_id, Some(payer_id))
            .await?;
        self.settle_on_demand(payee_id, entries, SettlementTrigger::EarlyPayout)
            .await
    }

    /// Final payout for a departing employee across every payer.
    #[instrument(skip(self))]
    pub async fn termination_payout(
        &self,
        payee_id: Uuid,
    ) -> Result<OnDemandOutcome, SettlementError> {
        let entries = self.payouts.list_pending_for_payee(payee_id, None).await?;
        self.settle_on_demand(payee_id, entries, SettlementTrigger::Termination)
            .await
    }

    async fn settle_on_demand(
        &self,
        payee_id: Uuid,
        entries: Vec<pending_payout::Model>,
        trigger: SettlementTrigger,
    ) -> Result<OnDemandOutcome, SettlementError> {
        if entries.is_empty() {
            info!(payee_id = %payee_id, "No pending payouts to settle");
            return Ok(OnDemandOutcome::NothingPending);
        }
        let settlement = self
            .settle_batch(PayeeBatch { payee_id, entries }, trigger)
            .await?;
        Ok(OnDemandOutcome::Settled { settlement })
    }

    #[instrument(skip_all, fields(payee_id = %batch.payee_id, rows = batch.entries.len()))]
    async fn settle_batch(
        &self,
        batch: PayeeBatch,
        trigger: SettlementTrigger,
    ) -> Result<PayeeSettlement, SettlementError> {
        let payee_id = batch.payee_id;
        let batch_id = Uuid::new_v4();
        let now = self.clock.now();

        let txn = self.db.begin().await?;
        let claimed_count =
            PendingPayoutRepository::claim(&txn, &batch.ids(), batch_id, now).await?;
        let claimed = if claimed_count > 0 {
            PendingPayoutRepository::find_by_batch(&txn, batch_id).await?
        } else {
            Vec::new()
        };
        txn.commit().await?;

        if claimed.is_empty() {
            warn!("No rows claimed; another pass already owns them");
            return Ok(PayeeSettlement::skipped(
                payee_id,
                "rows were claimed by another settlement pass",
            ));
        }
        if claimed.len() != batch.entries.len() {
            warn!(
                requested = batch.entries.len(),
                claimed = claimed.len(),
                "Settling a partial batch"
            );
        }

        let payout_ids: Vec<Uuid> = claimed.iter().map(|row| row.id).collect();
        let amount: i64 = claimed.iter().map(|row| row.amount).sum();
        let attempt = claimed.iter().map(|row| row.retry_count).max().unwrap_or(0);

        let transfer_result = match PayoutAccountRepository::find_verified(self.db.as_ref(), payee_id)
            .await
        {
            Ok(Some(account)) => {
                let mut metadata = BTreeMap::new();
                metadata.insert("batch_id".to_string(), batch_id.to_string());
                metadata.insert("payee_id".to_string(), payee_id.to_string());
                metadata.insert("trigger".to_string(), trigger.as_str().to_string());
                metadata.insert(
                    "payout_ids".to_string(),
                    payout_ids
                        .iter()
                        .map(Uuid::to_string)
                        .collect::<Vec<_>>()
                        .join(","),
                );
                let request = TransferRequest {
                    amount,
                    currency: self.currency.clone(),
                    destination: account.destination_id,
                    idempotency_key: idempotency_key(&payout_ids, attempt),
                    description: format!("Payroll settlement for {} job(s)", claimed.len()),
                    metadata,
                };
                self.transfers
                    .transfer(request)
                    .await
                    .map_err(|err| err.failure_reason())
            }
            Ok(None) => Err(NO_DESTINATION_REASON.to_string()),
            Err(err) => Err(format!("payout destination lookup failed: {err}")),
        };

        let outcome = match transfer_result {
            Ok(receipt) => match self.record_success(&claimed, batch_id, &receipt.reference).await
            {
                Ok(()) => {
                    info!(
                        transfer_reference = %receipt.reference,
                        amount,
                        "Payee batch settled"
                    );
                    PayeeOutcome::Paid {
                        transfer_reference: receipt.reference,
                    }
                }
                Err(err) => {
                    error!(
                        error = ?err,
                        batch_id = %batch_id,
                        transfer_reference = %receipt.reference,
                        amount,
                        "Transfer succeeded but ledger update failed; reconcile manually"
                    );
                    PayeeOutcome::PaidUnrecorded {
                        transfer_reference: receipt.reference,
                        error: err.to_string(),
                    }
                }
            },
            Err(reason) => {
                if let Err(err) = PendingPayoutRepository::mark_batch_failed(
                    self.db.as_ref(),
                    batch_id,
                    &reason,
                    self.clock.now(),
                )
                .await
                {
                    error!(error = ?err, batch_id = %batch_id, "Failed to record transfer failure");
                }
                warn!(reason = %reason, amount, "Payee batch transfer failed");
                PayeeOutcome::Failed { reason }
            }
        };

        let label = match outcome {
            PayeeOutcome::Failed { .. } => "failed",
            _ => "paid",
        };
        metrics::counter!("payroll_settlement_batches_total", "outcome" => label, "trigger" => trigger.as_str())
            .increment(1);

        let result = PayeeSettlement {
            payee_id,
            payout_ids,
            amount,
            outcome,
        };
        self.notify_payee(&result).await;
        Ok(result)
    }

    async fn record_success(
        &self,
        claimed: &[pending_payout::Model],
        batch_id: Uuid,
        reference: &str,
    ) -> Result<(), SettlementError> {
        let now = self.clock.now();
        let txn = self.db.begin().await?;
        PendingPayoutRepository::mark_batch_completed(&txn, batch_id, reference, now).await?;
        for row in claimed {
            JobAssignmentRepository::mark_paid(&txn, row.job_assignment_id, row.amount, reference, now)
                .await?;
        }
        txn.commit().await?;
        Ok(())
    }

    async fn notify_payee(&self, result: &PayeeSettlement) {
        let amount = format_minor_units(result.amount, &self.currency);
        let notification = match &result.outcome {
            PayeeOutcome::Paid { transfer_reference }
            | PayeeOutcome::PaidUnrecorded {
                transfer_reference, ..
            } => Notification::new(
                result.payee_id,
                NotificationKind::PayoutSent,
                "Payout sent",
                format!(
                    "{amount} for {} job(s) is on its way to your account.",
                    result.payout_ids.len()
                ),
            )
            .with_payload(json!({
                "amount": result.amount,
                "transfer_reference": transfer_reference,
                "payout_ids": result.payout_ids,
            })),
            PayeeOutcome::Failed { reason } => Notification::new(
                result.payee_id,
                NotificationKind::PayoutFailed,
                "Payout delayed",
                format!("We could not send your payout of {amount}. Our team has been alerted."),
            )
            .with_payload(json!({
                "amount": result.amount,
                "reason": reason,
                "payout_ids": result.payout_ids,
            })),
            PayeeOutcome::Skipped { .. } => return,
        };
        notify_quietly(self.notifier.as_ref(), notification).await;
    }
}

//! # Completion Approvals
//!
//! Cleaners submit a completion, homeowners approve or dispute it, and the
//! auto-approval monitor approves it once the window lapses. Manual and automatic
//! approval share one gate, a conditional `submitted → approved | auto_approved`
//! update, so exactly one of them can trigger payment.
//!
//! Approval records the cleaner's employee earnings in the ledger in the same
//! transaction. Once every assigned cleaner on the appointment is approved, the
//! payer's retained share is transferred straight away.

use std::collections::BTreeSet;
use std::sync::Arc;

use chrono::Duration;
use sea_orm::{DatabaseConnection, TransactionTrait};
use serde::Serialize;
use serde_json::json;
use tracing::{error, info, instrument, warn};
use utoipa::ToSchema;
use uuid::Uuid;

use crate::clock::Clock;
use crate::error::{SettlementError, is_unique_violation};
use crate::ledger::{CancelOutcome, PayoutEntry, PayoutLedger};
use crate::models::appointment;
use crate::models::completion_record::{self, ApprovedBy, CompletionStatus};
use crate::models::job_assignment::AssignmentPayoutStatus;
use crate::money::format_minor_units;
use crate::notifications::{Notification, NotificationKind, Notifier, notify_quietly};
use crate::repositories::{
    AppointmentRepository, CompletionRecordRepository, JobAssignmentRepository,
    PayoutAccountRepository, PricingConfigRepository,
};
use crate::settlement::NO_DESTINATION_REASON;
use crate::transfers::{TransferClient, TransferRequest};

/// Approval window used when the pricing store has none.
pub const DEFAULT_APPROVAL_WINDOW_HOURS: i64 = 4;

/// Picks the configured window when it is positive, otherwise the fallback.
pub fn resolve_window_hours(configured: Option<i32>, fallback: i64) -> i64 {
    match configured {
        Some(hours) if hours > 0 => i64::from(hours),
        _ => fallback,
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, ToSchema)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum OwnerRelease {
    Released {
        amount: i64,
        transfer_reference: String,
    },
    /// Employee pay consumed the whole net amount
    NothingRetained,
    Failed {
        amount: i64,
        reason: String,
    },
}

#[derive(Debug, Clone, PartialEq, Serialize, ToSchema)]
pub struct ApprovalOutcome {
    #[schema(value_type = Object)]
    pub record: completion_record::Model,
    pub approved_by: ApprovedBy,
    /// Ledger rows created by this approval
    pub earnings: Vec<PayoutEntry>,
    /// Present when this approval completed the appointment
    pub owner_release: Option<OwnerRelease>,
}

#[derive(Debug, Clone, PartialEq, Serialize, ToSchema)]
pub struct DisputeOutcome {
    #[schema(value_type = Object)]
    pub record: completion_record::Model,
    /// Pending ledger rows cancelled because the dispute came after approval
    pub cancelled_payouts: Vec<PayoutEntry>,
}

pub struct CompletionApprovalService {
    db: Arc<DatabaseConnection>,
    ledger: Arc<PayoutLedger>,
    transfers: Arc<dyn TransferClient>,
    notifier: Arc<dyn Notifier>,
    pricing: PricingConfigRepository,
    clock: Arc<dyn Clock>,
    default_window_hours: i64,
    currency: String,
}

impl CompletionApprovalService {
    pub fn new(
        db: Arc<DatabaseConnection>,
        ledger: Arc<PayoutLedger>,
        transfers: Arc<dyn TransferClient>,
        notifier: Arc<dyn Notifier>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            pricing: PricingConfigRepository::new(db.clone()),
            db,
            ledger,
            transfers,
            notifier,
            clock,
            default_window_hours: DEFAULT_APPROVAL_WINDOW_HOURS,
            currency: "usd".to_string(),
        }
    }

    pub fn with_default_window_hours(mut self, hours: i64) -> Self {
        self.default_window_hours = hours;
        self
    }

    pub fn with_currency(mut self, currency: impl Into<String>) -> Self {
        self.currency = currency.into();
        self
    }

    /// Cleaner marks their part of the job done and starts the approval window.
    #[instrument(skip(self))]
    pub async fn submit(
        &self,
        appointment_id: Uuid,
        cleaner_id: Uuid,
    ) -> Result<completion_record::Model, SettlementError> {
        let appointment = AppointmentRepository::find_by_id(self.db.as_ref(), appointment_id)
            .await?
            .ok_or_else(|| SettlementError::not_found("appointment", appointment_id))?;

        let assignments = JobAssignmentRepository::list_for_worker_on_appointment(
            self.db.as_ref(),
            appointment_id,
            cleaner_id,
        )
        .await?;
        if assignments.is_empty() && appointment.payer_id != cleaner_id {
            return Err(SettlementError::Forbidden(format!(
                "cleaner {cleaner_id} is not assigned to appointment {appointment_id}"
            )));
        }

        let window_hours = resolve_window_hours(
            self.pricing.active_approval_window_hours().await?,
            self.default_window_hours,
        );
        let now = self.clock.now();
        let expires_at = now + Duration::hours(window_hours);

        let txn = self.db.begin().await?;
        let record =
            match CompletionRecordRepository::find_for_cleaner(&txn, appointment_id, cleaner_id)
                .await?
            {
                Some(existing) => existing,
                None => CompletionRecordRepository::create_pending(
                    &txn,
                    appointment_id,
                    cleaner_id,
                    now,
                )
                .await
                .map_err(|err| {
                    if is_unique_violation(&err) {
                        SettlementError::Validation(
                            "completion is already being submitted".into(),
                        )
                    } else {
                        SettlementError::Database(err)
                    }
                })?,
            };

        if !record.status.can_transition_to(CompletionStatus::Submitted)
            || !CompletionRecordRepository::mark_submitted(&txn, record.id, now, expires_at).await?
        {
            return Err(SettlementError::InvalidTransition {
                record_id: record.id,
                current: record.status,
                attempted: CompletionStatus::Submitted,
            });
        }
        let submitted = CompletionRecordRepository::find_by_id(&txn, record.id)
            .await?
            .ok_or_else(|| SettlementError::not_found("completion record", record.id))?;
        txn.commit().await?;

        info!(
            record_id = %submitted.id,
            window_hours,
            expires_at = %expires_at,
            "Completion submitted"
        );

        notify_quietly(
            self.notifier.as_ref(),
            Notification::new(
                appointment.homeowner_id,
                NotificationKind::CompletionSubmitted,
                "Cleaning completed",
                format!(
                    "Please review the cleaning. It will be approved automatically in {window_hours} hours."
                ),
            )
            .with_payload(json!({
                "appointment_id": appointment_id,
                "completion_record_id": submitted.id,
                "auto_approval_expires_at": expires_at,
            })),
        )
        .await;

        Ok(submitted)
    }

    /// Homeowner confirms the work.
    #[instrument(skip(self))]
    pub async fn approve(
        &self,
        record_id: Uuid,
        homeowner_id: Uuid,
    ) -> Result<ApprovalOutcome, SettlementError> {
        let record = self.load_record(record_id).await?;
        let appointment = self.load_appointment(record.appointment_id).await?;
        if appointment.homeowner_id != homeowner_id {
            return Err(SettlementError::Forbidden(format!(
                "homeowner {homeowner_id} does not own appointment {}",
                appointment.id
            )));
        }
        self.finalize(record, ApprovedBy::Homeowner(homeowner_id))
            .await
    }

    /// System approval once the window has lapsed without a homeowner response.
    #[instrument(skip(self))]
    pub async fn auto_approve(&self, record_id: Uuid) -> Result<ApprovalOutcome, SettlementError> {
        let record = self.load_record(record_id).await?;
        if !record.status.can_transition_to(CompletionStatus::AutoApproved) {
            return Err(SettlementError::InvalidTransition {
                record_id,
                current: record.status,
                attempted: CompletionStatus::AutoApproved,
            });
        }
        let now = self.clock.now();
        match record.auto_approval_expires_at {
            Some(expires_at) if expires_at < now.fixed_offset() => {}
            Some(expires_at) => {
                return Err(SettlementError::Validation(format!(
                    "approval window for record {record_id} is open until {expires_at}"
                )));
            }
            None => {
                return Err(SettlementError::Validation(format!(
                    "record {record_id} has no approval deadline"
                )));
            }
        }
        self.finalize(record, ApprovedBy::System).await
    }

    /// Homeowner rejects the work. Before approval this blocks payment; after
    /// approval it cancels whatever ledger rows have not been claimed yet.
    #[instrument(skip(self, reason))]
    pub async fn dispute(
        &self,
        record_id: Uuid,
        homeowner_id: Uuid,
        reason: &str,
    ) -> Result<DisputeOutcome, SettlementError> {
        let reason = reason.trim();
        if reason.is_empty() {
            return Err(SettlementError::Validation(
                "a dispute reason is required".into(),
            ));
        }

        let record = self.load_record(record_id).await?;
        let appointment = self.load_appointment(record.appointment_id).await?;
        if appointment.homeowner_id != homeowner_id {
            return Err(SettlementError::Forbidden(format!(
                "homeowner {homeowner_id} does not own appointment {}",
                appointment.id
            )));
        }

        let now = self.clock.now();
        let mut cancelled_payouts = Vec::new();

        if record.status.can_transition_to(CompletionStatus::Disputed) {
            if !CompletionRecordRepository::mark_disputed(self.db.as_ref(), record_id, reason, now)
                .await?
            {
                let current = self.load_record(record_id).await?.status;
                return Err(SettlementError::InvalidTransition {
                    record_id,
                    current,
                    attempted: CompletionStatus::Disputed,
                });
            }
        } else if record.status.is_approved() {
            CompletionRecordRepository::record_late_dispute(self.db.as_ref(), record_id, reason, now)
                .await?;
            let assignments = JobAssignmentRepository::list_for_worker_on_appointment(
                self.db.as_ref(),
                record.appointment_id,
                record.cleaner_id,
            )
            .await?;
            for assignment in assignments {
                if let CancelOutcome::Cancelled { entry } =
                    self.ledger.cancel(assignment.id, reason).await?
                {
                    cancelled_payouts.push(entry);
                }
            }
            if cancelled_payouts.is_empty() {
                warn!("Late dispute found no pending payouts to cancel");
            }
        } else {
            return Err(SettlementError::InvalidTransition {
                record_id,
                current: record.status,
                attempted: CompletionStatus::Disputed,
            });
        }

        let record = self.load_record(record_id).await?;
        info!(
            cancelled = cancelled_payouts.len(),
            status = ?record.status,
            "Completion disputed"
        );
        metrics::counter!("payroll_completion_disputes_total").increment(1);

        notify_quietly(
            self.notifier.as_ref(),
            Notification::new(
                record.cleaner_id,
                NotificationKind::CompletionDisputed,
                "Completion disputed",
                format!("The homeowner disputed this cleaning: {reason}"),
            )
            .with_payload(json!({
                "appointment_id": record.appointment_id,
                "completion_record_id": record.id,
            })),
        )
        .await;

        Ok(DisputeOutcome {
            record,
            cancelled_payouts,
        })
    }

    /// The shared approval gate.
    async fn finalize(
        &self,
        record: completion_record::Model,
        approved_by: ApprovedBy,
    ) -> Result<ApprovalOutcome, SettlementError> {
        let now = self.clock.now();
        let attempted = approved_by.resulting_status();
        if !record.status.can_transition_to(attempted) {
            return Err(SettlementError::InvalidTransition {
                record_id: record.id,
                current: record.status,
                attempted,
            });
        }

        let txn = self.db.begin().await?;
        if !CompletionRecordRepository::mark_approved(&txn, record.id, approved_by, now).await? {
            let current = CompletionRecordRepository::find_by_id(&txn, record.id)
                .await?
                .map(|current| current.status)
                .unwrap_or(record.status);
            return Err(SettlementError::InvalidTransition {
                record_id: record.id,
                current,
                attempted,
            });
        }

        let appointment = AppointmentRepository::find_by_id(&txn, record.appointment_id)
            .await?
            .ok_or_else(|| SettlementError::not_found("appointment", record.appointment_id))?;
        let assignments = JobAssignmentRepository::list_for_worker_on_appointment(
            &txn,
            record.appointment_id,
            record.cleaner_id,
        )
        .await?;

        let mut earnings = Vec::new();
        for assignment in assignments
            .iter()
            .filter(|a| !a.is_owner_self_assignment())
            .filter(|a| a.payout_status == AssignmentPayoutStatus::Unpaid)
        {
            if assignment.pay_amount <= 0 {
                warn!(
                    assignment_id = %assignment.id,
                    pay_amount = assignment.pay_amount,
                    "Skipping assignment without a positive pay amount"
                );
                continue;
            }
            let entry = self
                .ledger
                .record_earning_in(&txn, assignment, assignment.pay_amount, &appointment)
                .await?;
            earnings.push(entry);
        }

        let approved = CompletionRecordRepository::find_by_id(&txn, record.id)
            .await?
            .ok_or_else(|| SettlementError::not_found("completion record", record.id))?;
        txn.commit().await?;

        let approver = match approved_by {
            ApprovedBy::Homeowner(_) => "homeowner",
            ApprovedBy::System => "system",
        };
        info!(
            record_id = %approved.id,
            approver,
            earnings = earnings.len(),
            "Completion approved"
        );
        metrics::counter!("payroll_completion_approvals_total", "approver" => approver)
            .increment(1);

        notify_quietly(
            self.notifier.as_ref(),
            Notification::new(
                approved.cleaner_id,
                NotificationKind::CompletionApproved,
                "Completion approved",
                match approved_by {
                    ApprovedBy::Homeowner(_) => "The homeowner approved your cleaning.",
                    ApprovedBy::System => "Your cleaning was approved automatically.",
                },
            )
            .with_payload(json!({
                "appointment_id": approved.appointment_id,
                "completion_record_id": approved.id,
                "approved_by": approved_by,
            })),
        )
        .await;

        let owner_release = match self.release_owner_share(appointment.id).await {
            Ok(release) => release,
            Err(err) => {
                error!(error = ?err, appointment_id = %appointment.id, "Owner share release failed");
                None
            }
        };

        Ok(ApprovalOutcome {
            record: approved,
            approved_by,
            earnings,
            owner_release,
        })
    }

    /// Transfers the payer's retained share once every assigned cleaner is approved.
    /// Returns `None` while approvals are outstanding or when the release was already
    /// claimed.
    #[instrument(skip(self))]
    async fn release_owner_share(
        &self,
        appointment_id: Uuid,
    ) -> Result<Option<OwnerRelease>, SettlementError> {
        let appointment = self.load_appointment(appointment_id).await?;
        let assignments =
            JobAssignmentRepository::list_for_appointment(self.db.as_ref(), appointment_id).await?;
        let records =
            CompletionRecordRepository::list_for_appointment(self.db.as_ref(), appointment_id)
                .await?;

        let mut required: BTreeSet<Uuid> = assignments.iter().map(|a| a.worker_id).collect();
        if required.is_empty() {
            required.insert(appointment.payer_id);
        }
        let approved: BTreeSet<Uuid> = records
            .iter()
            .filter(|record| record.status.is_approved())
            .map(|record| record.cleaner_id)
            .collect();
        if !required.is_subset(&approved) {
            return Ok(None);
        }

        let now = self.clock.now();
        if !AppointmentRepository::claim_release(self.db.as_ref(), appointment_id, now).await? {
            return Ok(None);
        }

        let employee_pay: i64 = assignments
            .iter()
            .filter(|a| !a.is_owner_self_assignment())
            .filter(|a| a.payout_status != AssignmentPayoutStatus::Cancelled)
            .map(|a| a.pay_amount)
            .sum();
        let retained = appointment.net_amount() - employee_pay;

        if retained <= 0 {
            AppointmentRepository::mark_released(self.db.as_ref(), appointment_id, 0, None, now)
                .await?;
            info!(employee_pay, "Appointment released with nothing retained by the payer");
            return Ok(Some(OwnerRelease::NothingRetained));
        }

        let result = match PayoutAccountRepository::find_verified(
            self.db.as_ref(),
            appointment.payer_id,
        )
        .await?
        {
            Some(account) => {
                let mut metadata = std::collections::BTreeMap::new();
                metadata.insert("appointment_id".to_string(), appointment_id.to_string());
                metadata.insert("payer_id".to_string(), appointment.payer_id.to_string());
                self.transfers
                    .transfer(TransferRequest {
                        amount: retained,
                        currency: self.currency.clone(),
                        destination: account.destination_id,
                        idempotency_key: format!("owner-release-{appointment_id}"),
                        description: "Cleaning payment".to_string(),
                        metadata,
                    })
                    .await
                    .map_err(|err| err.failure_reason())
            }
            None => Err(NO_DESTINATION_REASON.to_string()),
        };

        let now = self.clock.now();
        let release = match result {
            Ok(receipt) => {
                AppointmentRepository::mark_released(
                    self.db.as_ref(),
                    appointment_id,
                    retained,
                    Some(&receipt.reference),
                    now,
                )
                .await?;
                info!(amount = retained, transfer_reference = %receipt.reference, "Owner share released");
                notify_quietly(
                    self.notifier.as_ref(),
                    Notification::new(
                        appointment.payer_id,
                        NotificationKind::PaymentReleased,
                        "Payment released",
                        format!(
                            "{} for your cleaning has been sent to your account.",
                            format_minor_units(retained, &self.currency)
                        ),
                    )
                    .with_payload(json!({
                        "appointment_id": appointment_id,
                        "amount": retained,
                        "transfer_reference": receipt.reference,
                    })),
                )
                .await;
                OwnerRelease::Released {
                    amount: retained,
                    transfer_reference: receipt.reference,
                }
            }
            Err(reason) => {
                AppointmentRepository::mark_owner_transfer_failed(
                    self.db.as_ref(),
                    appointment_id,
                    &reason,
                    now,
                )
                .await?;
                warn!(amount = retained, reason = %reason, "Owner share transfer failed");
                OwnerRelease::Failed {
                    amount: retained,
                    reason,
                }
            }
        };

        let label = match release {
            OwnerRelease::Failed { .. } => "failed",
            _ => "released",
        };
        metrics::counter!("payroll_owner_releases_total", "outcome" => label).increment(1);
        Ok(Some(release))
    }

    async fn load_record(
        &self,
        record_id: Uuid,
    ) -> Result<completion_record::Model, SettlementError> {
        CompletionRecordRepository::find_by_id(self.db.as_ref(), record_id)
            .await?
            .ok_or_else(|| SettlementError::not_found("completion record", record_id))
    }

    async fn load_appointment(
        &self,
        appointment_id: Uuid,
    ) -> Result<appointment::Model, SettlementError> {
        AppointmentRepository::find_by_id(self.db.as_ref(), appointment_id)
            .await?
            .ok_or_else(|| SettlementError::not_found("appointment", appointment_id))
    }
}

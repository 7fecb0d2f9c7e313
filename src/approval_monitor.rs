//! # Auto-Approval Monitor
//!
//! Periodically approves submitted completions whose approval window has lapsed.
//! Each record is handled independently; one failure is counted and the scan moves on.

use std::sync::Arc;

use metrics::{counter, histogram};
use serde::Serialize;
use tokio::time::{Duration as TokioDuration, Instant, sleep};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument, warn};

use crate::approval::CompletionApprovalService;
use crate::clock::Clock;
use crate::config::ApprovalConfig;
use crate::error::SettlementError;
use crate::repositories::CompletionRecordRepository;

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct AutoApprovalSummary {
    pub scanned: u64,
    pub approved: u64,
    /// Records another path resolved between the scan and the approval attempt
    pub skipped: u64,
    pub errors: u64,
}

pub struct AutoApprovalMonitor {
    approvals: Arc<CompletionApprovalService>,
    records: CompletionRecordRepository,
    clock: Arc<dyn Clock>,
    tick_interval: TokioDuration,
    batch_size: u64,
}

impl AutoApprovalMonitor {
    pub fn new(
        approvals: Arc<CompletionApprovalService>,
        records: CompletionRecordRepository,
        clock: Arc<dyn Clock>,
        config: &ApprovalConfig,
    ) -> Self {
        Self {
            approvals,
            records,
            clock,
            tick_interval: TokioDuration::from_secs(config.monitor_tick_seconds),
            batch_size: config.batch_size.max(1),
        }
    }

    /// Run the monitor loop until the provided shutdown token fires.
    #[instrument(skip_all)]
    pub async fn run(self, shutdown: CancellationToken) {
        info!(
            tick_seconds = self.tick_interval.as_secs(),
            "Starting auto-approval monitor"
        );

        loop {
            tokio::select! {
                _ = shutdown.cancelled() => {
                    info!("Auto-approval monitor shutdown requested");
                    break;
                }
                _ = sleep(self.tick_interval) => {
                    let tick_started = Instant::now();
                    if let Err(err) = self.tick().await {
                        error!(error = ?err, "Auto-approval tick failed");
                    }
                    histogram!("payroll_auto_approval_tick_duration_ms")
                        .record(tick_started.elapsed().as_secs_f64() * 1_000.0);
                }
            }
        }

        info!("Auto-approval monitor stopped");
    }

    /// One scan over expired submissions.
    pub async fn tick(&self) -> Result<AutoApprovalSummary, SettlementError> {
        let now = self.clock.now();
        let expired = self.records.list_expired(now, self.batch_size).await?;
        let mut summary = AutoApprovalSummary {
            scanned: expired.len() as u64,
            ..Default::default()
        };

        for record in expired {
            match self.approvals.auto_approve(record.id).await {
                Ok(outcome) => {
                    summary.approved += 1;
                    debug!(
                        record_id = %record.id,
                        earnings = outcome.earnings.len(),
                        "Completion auto-approved"
                    );
                }
                Err(SettlementError::InvalidTransition { current, .. }) => {
                    summary.skipped += 1;
                    debug!(record_id = %record.id, ?current, "Record resolved before auto-approval");
                }
                Err(err) => {
                    summary.errors += 1;
                    warn!(error = ?err, record_id = %record.id, "Auto-approval failed");
                }
            }
        }

        counter!("payroll_auto_approvals_total").increment(summary.approved);
        if summary.errors > 0 {
            counter!("payroll_auto_approval_errors_total").increment(summary.errors);
        }
        debug!(
            scanned = summary.scanned,
            approved = summary.approved,
            skipped = summary.skipped,
            errors = summary.errors,
            "Auto-approval tick completed"
        );
        Ok(summary)
    }
}

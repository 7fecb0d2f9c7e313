//! # Settlement Scheduler
//!
//! Background task that wakes once a day at the configured UTC hour and runs the
//! settlement processor. The processor itself decides whether the day is a
//! settlement date, so waking daily is enough to catch every bi-weekly Friday.

use std::sync::Arc;

use chrono::{DateTime, Duration, NaiveTime, Utc};
use metrics::histogram;
use tokio::time::{Instant, sleep};
use tokio_util::sync::CancellationToken;
use tracing::{error, info, instrument};

use crate::clock::Clock;
use crate::settlement::SettlementProcessor;

/// Background settlement scheduler.
pub struct SettlementScheduler {
    processor: Arc<SettlementProcessor>,
    clock: Arc<dyn Clock>,
    run_hour_utc: u32,
}

impl SettlementScheduler {
    pub fn new(processor: Arc<SettlementProcessor>, clock: Arc<dyn Clock>, run_hour_utc: u32) -> Self {
        Self {
            processor,
            clock,
            run_hour_utc: run_hour_utc.min(23),
        }
    }

    /// Run the scheduler loop until the provided shutdown token fires.
    #[instrument(skip_all)]
    pub async fn run(self, shutdown: CancellationToken) {
        info!(run_hour_utc = self.run_hour_utc, "Starting settlement scheduler");

        loop {
            let now = self.clock.now();
            let next_run = next_run_after(now, self.run_hour_utc);
            let wait = (next_run - now).to_std().unwrap_or_default();
            info!(next_run = %next_run, "Settlement scheduler sleeping");

            tokio::select! {
                _ = shutdown.cancelled() => {
                    info!("Settlement scheduler shutdown requested");
                    break;
                }
                _ = sleep(wait) => {
                    let tick_started = Instant::now();
                    self.tick().await;
                    histogram!("payroll_settlement_tick_duration_ms")
                        .record(tick_started.elapsed().as_secs_f64() * 1_000.0);
                }
            }
        }

        info!("Settlement scheduler stopped");
    }

    async fn tick(&self) {
        match self.processor.run_scheduled().await {
            Ok(summary) if summary.skipped => {
                info!(date = %summary.run_date, "No settlement scheduled today");
            }
            Ok(summary) => {
                info!(
                    date = %summary.run_date,
                    processed = summary.processed,
                    succeeded = summary.succeeded,
                    failed = summary.failed,
                    total_paid = summary.total_paid,
                    "Scheduled settlement completed"
                );
            }
            Err(err) => {
                error!(error = ?err, "Scheduled settlement failed");
            }
        }
    }
}

/// Next instant strictly after `now` at `hour`:00 UTC.
pub fn next_run_after(now: DateTime<Utc>, hour: u32) -> DateTime<Utc> {
    let time = NaiveTime::from_hms_opt(hour.min(23), 0, 0).unwrap_or(NaiveTime::MIN);
    let today = now.date_naive().and_time(time).and_utc();
    if today > now {
        today
    } else {
        today + Duration::days(1)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn at(value: &str) -> DateTime<Utc> {
        DateTime::parse_from_rfc3339(value)
            .unwrap()
            .with_timezone(&Utc)
    }

    #[test]
    fn runs_later_the_same_day() {
        assert_eq!(
            next_run_after(at("2024-01-19T02:30:00Z"), 6),
            at("2024-01-19T06:00:00Z")
        );
    }

    #[test]
    fn rolls_to_tomorrow_once_the_hour_passed() {
        assert_eq!(
            next_run_after(at("2024-01-19T06:00:00Z"), 6),
            at("2024-01-20T06:00:00Z")
        );
        assert_eq!(
            next_run_after(at("2024-01-19T23:59:59Z"), 6),
            at("2024-01-20T06:00:00Z")
        );
    }

    #[test]
    fn out_of_range_hour_is_clamped() {
        assert_eq!(
            next_run_after(at("2024-01-19T10:00:00Z"), 42),
            at("2024-01-19T23:00:00Z")
        );
    }
}

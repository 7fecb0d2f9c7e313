use std::sync::Arc;

use anyhow::{Context, Result};
use chrono::{NaiveDate, Utc};
use clap::{Parser, Subcommand};
use payroll::{
    approval_monitor::AutoApprovalMonitor,
    calendar::SettlementCalendar,
    clock::{Clock, SystemClock},
    config::{AppConfig, ConfigLoader},
    db,
    money::format_minor_units,
    notifications::{FanoutNotifier, InAppNotifier, Notifier, RelayNotifier},
    repositories::CompletionRecordRepository,
    server::AppState,
    telemetry,
    transfers::{HttpTransferClient, TransferClient},
};
use uuid::Uuid;

/// Operator tooling for payroll settlement.
#[derive(Parser, Debug)]
#[command(name = "payoutctl", version)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Settle everything due on a date (default: today)
    RunSettlement {
        #[arg(long)]
        date: Option<NaiveDate>,
        /// Run even when the date is not a settlement date
        #[arg(long)]
        force: bool,
    },
    /// Run one auto-approval scan
    AutoApprove,
    /// List failed payouts
    ListFailed {
        #[arg(long, default_value_t = 50)]
        limit: u64,
    },
    /// List payouts stuck in processing, to reconcile against the processor
    ListStuck {
        #[arg(long, default_value_t = 60)]
        older_than_minutes: i64,
        #[arg(long, default_value_t = 50)]
        limit: u64,
    },
    /// Requeue a failed payout for the next settlement date
    Requeue { payout_id: Uuid },
    /// Print the next settlement date
    NextSettlement {
        #[arg(long)]
        from: Option<NaiveDate>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let config = ConfigLoader::new().load().context("loading configuration")?;
    telemetry::init_tracing(&config).context("initializing tracing")?;

    match cli.command {
        Command::NextSettlement { from } => {
            let calendar = SettlementCalendar::new(config.settlement.anchor_date)
                .context("building settlement calendar")?;
            let from = from.unwrap_or_else(|| Utc::now().date_naive());
            let next = calendar.next_settlement_date(from);
            println!("{next}");
        }
        Command::RunSettlement { date, force } => {
            let state = build_state(config).await?;
            let date = date.unwrap_or_else(|| Utc::now().date_naive());
            let summary = state
                .settlement
                .run_for_date(date, force)
                .await
                .context("running settlement")?;
            if summary.skipped {
                println!(
                    "{date} is not a settlement date; next is {} (use --force to run anyway)",
                    state.settlement.calendar().next_settlement_date(date)
                );
            } else {
                println!(
                    "processed={} succeeded={} failed={} total_paid={}",
                    summary.processed,
                    summary.succeeded,
                    summary.failed,
                    format_minor_units(summary.total_paid, &state.config.currency)
                );
                println!("{}", serde_json::to_string_pretty(&summary.payees)?);
            }
        }
        Command::AutoApprove => {
            let clock: Arc<dyn Clock> = Arc::new(SystemClock);
            let state = build_state(config).await?;
            let monitor = AutoApprovalMonitor::new(
                state.approvals.clone(),
                CompletionRecordRepository::new(state.db.clone()),
                clock,
                &state.config.approval,
            );
            let summary = monitor.tick().await.context("running auto-approval scan")?;
            println!(
                "scanned={} approved={} skipped={} errors={}",
                summary.scanned, summary.approved, summary.skipped, summary.errors
            );
        }
        Command::ListFailed { limit } => {
            let state = build_state(config).await?;
            let failed = state
                .ledger
                .failed_payouts(limit)
                .await
                .context("listing failed payouts")?;
            for payout in &failed {
                println!(
                    "{}  payee={}  {}  retries={}  {}",
                    payout.id,
                    payout.payee_id,
                    format_minor_units(payout.amount, &state.config.currency),
                    payout.retry_count,
                    payout.failure_reason.as_deref().unwrap_or("-")
                );
            }
            println!("{} failed payout(s)", failed.len());
        }
        Command::ListStuck {
            older_than_minutes,
            limit,
        } => {
            let older_than = chrono::Duration::try_minutes(older_than_minutes)
                .filter(|age| *age >= chrono::Duration::zero())
                .context("--older-than-minutes must be a non-negative number of minutes")?;
            let state = build_state(config).await?;
            let stuck = state
                .ledger
                .stuck_payouts(older_than, limit)
                .await
                .context("listing stuck payouts")?;
            for payout in &stuck {
                println!(
                    "{}  payee={}  {}  earned={}",
                    payout.id,
                    payout.payee_id,
                    format_minor_units(payout.amount, &state.config.currency),
                    payout.earned_at
                );
            }
            println!("{} payout(s) stuck in processing", stuck.len());
        }
        Command::Requeue { payout_id } => {
            let state = build_state(config).await?;
            let payout = state
                .ledger
                .requeue_failed(payout_id)
                .await
                .with_context(|| format!("requeueing payout {payout_id}"))?;
            println!(
                "requeued {} for {} (retries so far: {})",
                payout.id, payout.scheduled_for, payout.retry_count
            );
        }
    }

    Ok(())
}

async fn build_state(config: AppConfig) -> Result<AppState> {
    let db = Arc::new(
        db::connect_and_migrate(&config)
            .await
            .context("initializing database connection pool")?,
    );
    let config = Arc::new(config);

    let transfers: Arc<dyn TransferClient> =
        Arc::new(HttpTransferClient::new(&config.transfer).context("building transfer client")?);
    let mut channels: Vec<Arc<dyn Notifier>> = vec![Arc::new(InAppNotifier::new(db.clone()))];
    if let Some(relay) = RelayNotifier::from_config(&config.notifications)? {
        channels.push(Arc::new(relay));
    }
    let notifier: Arc<dyn Notifier> = Arc::new(FanoutNotifier::new(channels));

    AppState::new(config, db, transfers, notifier, Arc::new(SystemClock))
        .context("wiring payroll services")
}

//! # Payroll Service Entry Point
//!
//! Loads configuration, connects and migrates the database, starts the settlement
//! scheduler and auto-approval monitor, and serves the HTTP API until Ctrl-C.

use std::sync::Arc;

use payroll::{
    approval_monitor::AutoApprovalMonitor,
    clock::{Clock, SystemClock},
    config::ConfigLoader,
    db,
    notifications::{FanoutNotifier, InAppNotifier, Notifier, RelayNotifier},
    repositories::CompletionRecordRepository,
    scheduler::SettlementScheduler,
    server::{AppState, run_server},
    telemetry,
    transfers::{HttpTransferClient, TransferClient},
};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load configuration from layered env files and variables
    let config = ConfigLoader::new().load()?;
    telemetry::init_tracing(&config)?;

    info!(profile = %config.profile, "Loaded configuration");
    if let Ok(redacted_json) = config.redacted_json() {
        debug!(config = %redacted_json, "Effective configuration");
    }

    let db = Arc::new(db::connect_and_migrate(&config).await?);
    let config = Arc::new(config);

    let transfers: Arc<dyn TransferClient> = Arc::new(HttpTransferClient::new(&config.transfer)?);
    let mut channels: Vec<Arc<dyn Notifier>> = vec![Arc::new(InAppNotifier::new(db.clone()))];
    if let Some(relay) = RelayNotifier::from_config(&config.notifications)? {
        channels.push(Arc::new(relay));
    }
    let notifier: Arc<dyn Notifier> = Arc::new(FanoutNotifier::new(channels));
    let clock: Arc<dyn Clock> = Arc::new(SystemClock);

    let state = AppState::new(
        config.clone(),
        db.clone(),
        transfers,
        notifier,
        clock.clone(),
    )?;

    let shutdown = CancellationToken::new();
    let mut tasks = Vec::new();

    if config.settlement.enabled {
        let scheduler = SettlementScheduler::new(
            state.settlement.clone(),
            clock.clone(),
            config.settlement.run_hour_utc,
        );
        tasks.push(tokio::spawn(scheduler.run(shutdown.clone())));
    } else {
        warn!("Settlement scheduler disabled by configuration");
    }

    if config.approval.monitor_enabled {
        let monitor = AutoApprovalMonitor::new(
            state.approvals.clone(),
            CompletionRecordRepository::new(db.clone()),
            clock.clone(),
            &config.approval,
        );
        tasks.push(tokio::spawn(monitor.run(shutdown.clone())));
    } else {
        warn!("Auto-approval monitor disabled by configuration");
    }

    tokio::spawn({
        let shutdown = shutdown.clone();
        async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                info!("Shutdown signal received");
                shutdown.cancel();
            }
        }
    });

    let served = run_server(state, shutdown.clone()).await;
    shutdown.cancel();
    for task in tasks {
        if let Err(err) = task.await {
            warn!(error = %err, "Background task ended abnormally");
        }
    }
    served
}

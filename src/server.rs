//! # Server Configuration
//!
//! Router, shared state and OpenAPI document for the payroll settlement API.

use std::sync::Arc;

use axum::{
    Router, middleware,
    routing::{get, post},
};
use sea_orm::DatabaseConnection;
use tokio_util::sync::CancellationToken;
use tower_http::trace::TraceLayer;
use tracing::info;
use utoipa::OpenApi;
use utoipa_swagger_ui::SwaggerUi;

use crate::approval::CompletionApprovalService;
use crate::auth::auth_middleware;
use crate::calendar::{CalendarError, SettlementCalendar};
use crate::clock::Clock;
use crate::config::AppConfig;
use crate::handlers;
use crate::ledger::PayoutLedger;
use crate::notifications::Notifier;
use crate::settlement::SettlementProcessor;
use crate::telemetry::trace_context_middleware;
use crate::transfers::TransferClient;

/// Application state containing shared resources
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<AppConfig>,
    pub db: Arc<DatabaseConnection>,
    pub ledger: Arc<PayoutLedger>,
    pub settlement: Arc<SettlementProcessor>,
    pub approvals: Arc<CompletionApprovalService>,
}

impl AppState {
    /// Wires the ledger, settlement processor and approval service over one pool.
    pub fn new(
        config: Arc<AppConfig>,
        db: Arc<DatabaseConnection>,
        transfers: Arc<dyn TransferClient>,
        notifier: Arc<dyn Notifier>,
        clock: Arc<dyn Clock>,
    ) -> Result<Self, CalendarError> {
        let calendar = SettlementCalendar::new(config.settlement.anchor_date)?;

        let ledger = Arc::new(PayoutLedger::new(db.clone(), calendar, clock.clone()));
        let settlement = Arc::new(
            SettlementProcessor::new(db.clone(), transfers.clone(), notifier.clone(), clock.clone())
                .with_calendar(calendar)
                .with_currency(config.currency.clone()),
        );
        let approvals = Arc::new(
            CompletionApprovalService::new(db.clone(), ledger.clone(), transfers, notifier, clock)
                .with_default_window_hours(config.approval.default_window_hours)
                .with_currency(config.currency.clone()),
        );

        Ok(Self {
            config,
            db,
            ledger,
            settlement,
            approvals,
        })
    }
}

/// Creates and configures the Axum application router
pub fn create_app(state: AppState) -> Router {
    let protected = Router::new()
        .route(
            "/payouts/employees/{payee_id}/pending",
            get(handlers::payouts::get_employee_pending),
        )
        .route(
            "/payouts/businesses/{payer_id}/pending",
            get(handlers::payouts::get_business_pending),
        )
        .route("/payouts/early", post(handlers::payouts::post_early_payout))
        .route(
            "/payouts/termination",
            post(handlers::payouts::post_termination_payout),
        )
        .route(
            "/payouts/assignments/{assignment_id}/cancel",
            post(handlers::payouts::cancel_assignment_payout),
        )
        .route("/payouts/failed", get(handlers::payouts::list_failed_payouts))
        .route("/payouts/processing", get(handlers::payouts::list_stuck_payouts))
        .route(
            "/payouts/{payout_id}/requeue",
            post(handlers::payouts::requeue_failed_payout),
        )
        .route(
            "/appointments/{appointment_id}/completions",
            post(handlers::completions::submit_completion),
        )
        .route(
            "/completions/{record_id}/approve",
            post(handlers::completions::approve_completion),
        )
        .route(
            "/completions/{record_id}/dispute",
            post(handlers::completions::dispute_completion),
        )
        .layer(middleware::from_fn_with_state(
            Arc::clone(&state.config),
            auth_middleware,
        ));

    Router::new()
        .route("/", get(handlers::root))
        .route("/healthz", get(handlers::healthz))
        .merge(protected)
        .with_state(state)
        .merge(SwaggerUi::new("/docs").url("/openapi.json", ApiDoc::openapi()))
        .layer(middleware::from_fn(trace_context_middleware))
        .layer(TraceLayer::new_for_http())
}

/// Serves the API until `shutdown` fires, then drains in-flight requests.
pub async fn run_server(state: AppState, shutdown: CancellationToken) -> anyhow::Result<()> {
    let addr = state
        .config
        .bind_addr()
        .map_err(|e| anyhow::anyhow!("invalid server address: {e}"))?;
    let profile = state.config.profile.clone();
    let app = create_app(state);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    info!(%addr, %profile, "Server listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown.cancelled_owned())
        .await?;

    info!("Server stopped");
    Ok(())
}

/// OpenAPI documentation
#[derive(OpenApi)]
#[openapi(
    paths(
        crate::handlers::root,
        crate::handlers::healthz,
        crate::handlers::payouts::get_employee_pending,
        crate::handlers::payouts::get_business_pending,
        crate::handlers::payouts::post_early_payout,
        crate::handlers::payouts::post_termination_payout,
        crate::handlers::payouts::cancel_assignment_payout,
        crate::handlers::payouts::list_failed_payouts,
        crate::handlers::payouts::list_stuck_payouts,
        crate::handlers::payouts::requeue_failed_payout,
        crate::handlers::completions::submit_completion,
        crate::handlers::completions::approve_completion,
        crate::handlers::completions::dispute_completion,
    ),
    components(
        schemas(
            crate::models::ServiceInfo,
            crate::error::ApiError,
            crate::handlers::HealthResponse,
            crate::handlers::payouts::EmployeePendingResponse,
            crate::handlers::payouts::BusinessPendingResponse,
            crate::handlers::payouts::EarlyPayoutRequest,
            crate::handlers::payouts::TerminationPayoutRequest,
            crate::handlers::payouts::OnDemandPayoutResponse,
            crate::handlers::payouts::CancelPayoutRequest,
            crate::handlers::payouts::CancelPayoutResponse,
            crate::handlers::payouts::PayoutListResponse,
            crate::handlers::payouts::RequeuePayoutResponse,
            crate::handlers::completions::SubmitCompletionRequest,
            crate::handlers::completions::ApproveCompletionRequest,
            crate::handlers::completions::DisputeCompletionRequest,
            crate::handlers::completions::CompletionView,
            crate::handlers::completions::SubmitCompletionResponse,
            crate::handlers::completions::ApproveCompletionResponse,
            crate::handlers::completions::DisputeCompletionResponse,
            crate::ledger::PayoutEntry,
            crate::ledger::LedgerTotals,
            crate::ledger::PayeePendingSummary,
            crate::ledger::PayerPendingSummary,
            crate::ledger::EmployeeBreakdown,
            crate::ledger::CancelOutcome,
            crate::settlement::OnDemandOutcome,
            crate::settlement::PayeeSettlement,
            crate::settlement::PayeeOutcome,
            crate::approval::OwnerRelease,
        )
    ),
    tags(
        (name = "payouts", description = "Pending payout ledger and settlement"),
        (name = "completions", description = "Completion approval workflow"),
    ),
    info(
        title = "Payroll Settlement API",
        description = "Employee payout ledger, bi-weekly settlement and completion approvals",
        version = env!("CARGO_PKG_VERSION"),
    )
)]
pub struct ApiDoc;

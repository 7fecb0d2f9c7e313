//! # Payout API Handlers
//!
//! Ledger views for employees and businesses, on-demand settlement triggers, and
//! operator remediation for failed and stuck payouts.

use axum::{
    extract::{Path, Query, State, rejection::JsonRejection},
    response::Json,
};
use serde::{Deserialize, Serialize};
use utoipa::{IntoParams, ToSchema};
use uuid::Uuid;

use crate::auth::OperatorAuth;
use crate::error::{ApiError, validation_error};
use crate::ledger::{CancelOutcome, PayeePendingSummary, PayerPendingSummary, PayoutEntry};
use crate::money::format_minor_units;
use crate::server::AppState;
use crate::settlement::OnDemandOutcome;

const DEFAULT_LIST_LIMIT: u64 = 50;
const MAX_LIST_LIMIT: u64 = 500;
const DEFAULT_STUCK_AFTER_MINUTES: i64 = 60;
const MAX_STUCK_AFTER_MINUTES: i64 = 60 * 24 * 90;

/// Pending balance owed to one employee
#[derive(Debug, Serialize, ToSchema)]
pub struct EmployeePendingResponse {
    pub success: bool,
    pub summary: PayeePendingSummary,
    #[schema(example = "$75.00")]
    pub total_formatted: String,
    pub failed_total_formatted: String,
}

/// Pending balance a business owes across its employees
#[derive(Debug, Serialize, ToSchema)]
pub struct BusinessPendingResponse {
    pub success: bool,
    pub summary: PayerPendingSummary,
    #[schema(example = "$120.50")]
    pub total_formatted: String,
    pub failed_total_formatted: String,
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct EarlyPayoutRequest {
    pub payee_id: Uuid,
    pub payer_id: Uuid,
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct TerminationPayoutRequest {
    pub payee_id: Uuid,
}

/// Result of an early or termination payout
#[derive(Debug, Serialize, ToSchema)]
pub struct OnDemandPayoutResponse {
    /// False when a transfer was attempted and failed
    pub success: bool,
    pub result: OnDemandOutcome,
    pub amount: i64,
    pub amount_formatted: String,
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct CancelPayoutRequest {
    pub reason: String,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct CancelPayoutResponse {
    /// True when a pending payout was cancelled
    pub success: bool,
    pub result: CancelOutcome,
}

#[derive(Debug, Deserialize, IntoParams)]
pub struct FailedPayoutsQuery {
    /// Maximum rows to return (default 50, max 500)
    pub limit: Option<u64>,
}

#[derive(Debug, Deserialize, IntoParams)]
pub struct StuckPayoutsQuery {
    /// Only rows processing for at least this many minutes (default 60, max 90 days)
    pub older_than_minutes: Option<i64>,
    /// Maximum rows to return (default 50, max 500)
    pub limit: Option<u64>,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct PayoutListResponse {
    pub success: bool,
    pub payouts: Vec<PayoutEntry>,
    pub total_amount: i64,
    pub total_formatted: String,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct RequeuePayoutResponse {
    pub success: bool,
    pub payout: PayoutEntry,
    pub amount_formatted: String,
}

/// Pending payouts owed to an employee
#[utoipa::path(
    get,
    path = "/payouts/employees/{payee_id}/pending",
    security(("bearer_auth" = [])),
    params(("payee_id" = Uuid, Path, description = "Employee receiving the payouts")),
    responses(
        (status = 200, description = "Pending and failed payouts with totals", body = EmployeePendingResponse),
        (status = 401, description = "Missing or invalid bearer token", body = ApiError),
        (status = 500, description = "Internal server error", body = ApiError)
    ),
    tag = "payouts"
)]
pub async fn get_employee_pending(
    State(state): State<AppState>,
    _operator_auth: OperatorAuth,
    Path(payee_id): Path<Uuid>,
) -> Result<Json<EmployeePendingResponse>, ApiError> {
    let summary = state.ledger.pending_for_payee(payee_id).await?;
    let currency = &state.config.currency;

    Ok(Json(EmployeePendingResponse {
        success: true,
        total_formatted: format_minor_units(summary.pending.total_amount, currency),
        failed_total_formatted: format_minor_units(summary.failed.total_amount, currency),
        summary,
    }))
}

/// Pending payouts a business owes its employees
#[utoipa::path(
    get,
    path = "/payouts/businesses/{payer_id}/pending",
    security(("bearer_auth" = [])),
    params(("payer_id" = Uuid, Path, description = "Business owner paying the employees")),
    responses(
        (status = 200, description = "Pending payouts with a per-employee breakdown", body = BusinessPendingResponse),
        (status = 401, description = "Missing or invalid bearer token", body = ApiError),
        (status = 500, description = "Internal server error", body = ApiError)
    ),
    tag = "payouts"
)]
pub async fn get_business_pending(
    State(state): State<AppState>,
    _operator_auth: OperatorAuth,
    Path(payer_id): Path<Uuid>,
) -> Result<Json<BusinessPendingResponse>, ApiError> {
    let summary = state.ledger.pending_for_payer(payer_id).await?;
    let currency = &state.config.currency;

    Ok(Json(BusinessPendingResponse {
        success: true,
        total_formatted: format_minor_units(summary.pending.total_amount, currency),
        failed_total_formatted: format_minor_units(summary.failed.total_amount, currency),
        summary,
    }))
}

/// Pay an employee everything one business owes them, ahead of the schedule
#[utoipa::path(
    post,
    path = "/payouts/early",
    security(("bearer_auth" = [])),
    request_body = EarlyPayoutRequest,
    responses(
        (status = 200, description = "Settlement attempted or nothing pending", body = OnDemandPayoutResponse),
        (status = 400, description = "Invalid request body", body = ApiError),
        (status = 401, description = "Missing or invalid bearer token", body = ApiError),
        (status = 500, description = "Internal server error", body = ApiError)
    ),
    tag = "payouts"
)]
pub async fn post_early_payout(
    State(state): State<AppState>,
    _operator_auth: OperatorAuth,
    payload: Result<Json<EarlyPayoutRequest>, JsonRejection>,
) -> Result<Json<OnDemandPayoutResponse>, ApiError> {
    let Json(request) = payload?;
    if request.payee_id == request.payer_id {
        return Err(validation_error(
            "Invalid early payout request",
            serde_json::json!({ "payee_id": "Must differ from payer_id" }),
        ));
    }

    let outcome = state
        .settlement
        .early_payout(request.payee_id, request.payer_id)
        .await?;
    Ok(Json(on_demand_response(outcome, &state.config.currency)))
}

/// Final payout for a departing employee across every business
#[utoipa::path(
    post,
    path = "/payouts/termination",
    security(("bearer_auth" = [])),
    request_body = TerminationPayoutRequest,
    responses(
        (status = 200, description = "Settlement attempted or nothing pending", body = OnDemandPayoutResponse),
        (status = 400, description = "Invalid request body", body = ApiError),
        (status = 401, description = "Missing or invalid bearer token", body = ApiError),
        (status = 500, description = "Internal server error", body = ApiError)
    ),
    tag = "payouts"
)]
pub async fn post_termination_payout(
    State(state): State<AppState>,
    _operator_auth: OperatorAuth,
    payload: Result<Json<TerminationPayoutRequest>, JsonRejection>,
) -> Result<Json<OnDemandPayoutResponse>, ApiError> {
    let Json(request) = payload?;
    let outcome = state.settlement.termination_payout(request.payee_id).await?;
    Ok(Json(on_demand_response(outcome, &state.config.currency)))
}

/// Cancel the pending payout for a job assignment
#[utoipa::path(
    post,
    path = "/payouts/assignments/{assignment_id}/cancel",
    security(("bearer_auth" = [])),
    params(("assignment_id" = Uuid, Path, description = "Job assignment whose payout is cancelled")),
    request_body = CancelPayoutRequest,
    responses(
        (status = 200, description = "Cancelled, or no pending payout existed", body = CancelPayoutResponse),
        (status = 400, description = "Missing reason", body = ApiError),
        (status = 401, description = "Missing or invalid bearer token", body = ApiError),
        (status = 500, description = "Internal server error", body = ApiError)
    ),
    tag = "payouts"
)]
pub async fn cancel_assignment_payout(
    State(state): State<AppState>,
    _operator_auth: OperatorAuth,
    Path(assignment_id): Path<Uuid>,
    payload: Result<Json<CancelPayoutRequest>, JsonRejection>,
) -> Result<Json<CancelPayoutResponse>, ApiError> {
    let Json(request) = payload?;
    let result = state.ledger.cancel(assignment_id, &request.reason).await?;

    Ok(Json(CancelPayoutResponse {
        success: matches!(result, CancelOutcome::Cancelled { .. }),
        result,
    }))
}

/// Payouts whose transfer failed and that wait for operator action
#[utoipa::path(
    get,
    path = "/payouts/failed",
    security(("bearer_auth" = [])),
    params(FailedPayoutsQuery),
    responses(
        (status = 200, description = "Failed payouts, most recent first", body = PayoutListResponse),
        (status = 400, description = "Invalid limit", body = ApiError),
        (status = 401, description = "Missing or invalid bearer token", body = ApiError),
        (status = 500, description = "Internal server error", body = ApiError)
    ),
    tag = "payouts"
)]
pub async fn list_failed_payouts(
    State(state): State<AppState>,
    _operator_auth: OperatorAuth,
    Query(params): Query<FailedPayoutsQuery>,
) -> Result<Json<PayoutListResponse>, ApiError> {
    let limit = list_limit(params.limit)?;
    let payouts = state.ledger.failed_payouts(limit).await?;
    Ok(Json(payout_list(payouts, &state.config.currency)))
}

/// Payouts claimed by a settlement pass that never recorded an outcome
#[utoipa::path(
    get,
    path = "/payouts/processing",
    security(("bearer_auth" = [])),
    params(StuckPayoutsQuery),
    responses(
        (status = 200, description = "Stuck payouts, oldest first", body = PayoutListResponse),
        (status = 400, description = "Invalid limit or age", body = ApiError),
        (status = 401, description = "Missing or invalid bearer token", body = ApiError),
        (status = 500, description = "Internal server error", body = ApiError)
    ),
    tag = "payouts"
)]
pub async fn list_stuck_payouts(
    State(state): State<AppState>,
    _operator_auth: OperatorAuth,
    Query(params): Query<StuckPayoutsQuery>,
) -> Result<Json<PayoutListResponse>, ApiError> {
    let limit = list_limit(params.limit)?;
    let minutes = params
        .older_than_minutes
        .unwrap_or(DEFAULT_STUCK_AFTER_MINUTES);
    if !(0..=MAX_STUCK_AFTER_MINUTES).contains(&minutes) {
        return Err(validation_error(
            "Invalid age",
            serde_json::json!({ "older_than_minutes": "Must be between 0 and 129600" }),
        ));
    }

    let payouts = state
        .ledger
        .stuck_payouts(chrono::Duration::minutes(minutes), limit)
        .await?;
    Ok(Json(payout_list(payouts, &state.config.currency)))
}

/// Put a failed payout back in the queue for the next settlement date
#[utoipa::path(
    post,
    path = "/payouts/{payout_id}/requeue",
    security(("bearer_auth" = [])),
    params(("payout_id" = Uuid, Path, description = "Failed payout to requeue")),
    responses(
        (status = 200, description = "Payout requeued", body = RequeuePayoutResponse),
        (status = 400, description = "Payout is not failed", body = ApiError),
        (status = 401, description = "Missing or invalid bearer token", body = ApiError),
        (status = 404, description = "Payout not found", body = ApiError),
        (status = 409, description = "Assignment already has an active payout", body = ApiError),
        (status = 500, description = "Internal server error", body = ApiError)
    ),
    tag = "payouts"
)]
pub async fn requeue_failed_payout(
    State(state): State<AppState>,
    _operator_auth: OperatorAuth,
    Path(payout_id): Path<Uuid>,
) -> Result<Json<RequeuePayoutResponse>, ApiError> {
    let payout = state.ledger.requeue_failed(payout_id).await?;

    Ok(Json(RequeuePayoutResponse {
        success: true,
        amount_formatted: format_minor_units(payout.amount, &state.config.currency),
        payout,
    }))
}

fn list_limit(limit: Option<u64>) -> Result<u64, ApiError> {
    match limit {
        None => Ok(DEFAULT_LIST_LIMIT),
        Some(limit) if (1..=MAX_LIST_LIMIT).contains(&limit) => Ok(limit),
        Some(_) => Err(validation_error(
            "Invalid limit",
            serde_json::json!({ "limit": "Must be between 1 and 500" }),
        )),
    }
}

fn payout_list(payouts: Vec<PayoutEntry>, currency: &str) -> PayoutListResponse {
    let total_amount = payouts.iter().map(|payout| payout.amount).sum();
    PayoutListResponse {
        success: true,
        total_formatted: format_minor_units(total_amount, currency),
        total_amount,
        payouts,
    }
}

fn on_demand_response(outcome: OnDemandOutcome, currency: &str) -> OnDemandPayoutResponse {
    let (success, amount) = match &outcome {
        OnDemandOutcome::NothingPending => (true, 0),
        OnDemandOutcome::Settled { settlement } => (settlement.is_paid(), settlement.amount),
    };
    OnDemandPayoutResponse {
        success,
        result: outcome,
        amount,
        amount_formatted: format_minor_units(amount, currency),
    }
}

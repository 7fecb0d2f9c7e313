//! # Completion API Handlers
//!
//! Cleaner submissions, homeowner approvals and disputes.

use axum::{
    extract::{Path, State, rejection::JsonRejection},
    http::StatusCode,
    response::Json,
};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;
use uuid::Uuid;

use crate::approval::{ApprovalOutcome, DisputeOutcome, OwnerRelease};
use crate::auth::OperatorAuth;
use crate::error::ApiError;
use crate::models::completion_record::{self, CompletionStatus};
use crate::money::format_minor_units;
use crate::server::AppState;

#[derive(Debug, Deserialize, ToSchema)]
pub struct SubmitCompletionRequest {
    pub cleaner_id: Uuid,
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct ApproveCompletionRequest {
    pub homeowner_id: Uuid,
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct DisputeCompletionRequest {
    pub homeowner_id: Uuid,
    pub reason: String,
}

/// Completion record as returned by the API
#[derive(Debug, Serialize, ToSchema)]
pub struct CompletionView {
    pub id: Uuid,
    pub appointment_id: Uuid,
    pub cleaner_id: Uuid,
    pub status: CompletionStatus,
    #[schema(example = "2024-01-10T19:00:00Z")]
    pub submitted_at: Option<String>,
    #[schema(example = "2024-01-10T23:00:00Z")]
    pub auto_approval_expires_at: Option<String>,
    pub approved_at: Option<String>,
    pub approved_by: Option<Uuid>,
    pub dispute_reason: Option<String>,
}

impl From<completion_record::Model> for CompletionView {
    fn from(model: completion_record::Model) -> Self {
        Self {
            id: model.id,
            appointment_id: model.appointment_id,
            cleaner_id: model.cleaner_id,
            status: model.status,
            submitted_at: model.submitted_at.map(|dt| dt.to_rfc3339()),
            auto_approval_expires_at: model.auto_approval_expires_at.map(|dt| dt.to_rfc3339()),
            approved_at: model.approved_at.map(|dt| dt.to_rfc3339()),
            approved_by: model.approved_by,
            dispute_reason: model.dispute_reason,
        }
    }
}

#[derive(Debug, Serialize, ToSchema)]
pub struct SubmitCompletionResponse {
    pub success: bool,
    pub completion: CompletionView,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct ApproveCompletionResponse {
    pub success: bool,
    pub completion: CompletionView,
    /// Total employee pay added to the ledger by this approval
    pub earnings_amount: i64,
    pub earnings_formatted: String,
    pub earnings_count: usize,
    pub owner_release: Option<OwnerRelease>,
    pub owner_release_formatted: Option<String>,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct DisputeCompletionResponse {
    pub success: bool,
    pub completion: CompletionView,
    pub cancelled_payout_ids: Vec<Uuid>,
    pub cancelled_amount: i64,
    pub cancelled_formatted: String,
}

/// Cleaner submits a completed job for homeowner approval
#[utoipa::path(
    post,
    path = "/appointments/{appointment_id}/completions",
    security(("bearer_auth" = [])),
    params(("appointment_id" = Uuid, Path, description = "Appointment the cleaner worked")),
    request_body = SubmitCompletionRequest,
    responses(
        (status = 201, description = "Completion submitted", body = SubmitCompletionResponse),
        (status = 401, description = "Missing or invalid bearer token", body = ApiError),
        (status = 403, description = "Cleaner is not assigned to the appointment", body = ApiError),
        (status = 404, description = "Appointment not found", body = ApiError),
        (status = 409, description = "Completion already submitted", body = ApiError),
        (status = 500, description = "Internal server error", body = ApiError)
    ),
    tag = "completions"
)]
pub async fn submit_completion(
    State(state): State<AppState>,
    _operator_auth: OperatorAuth,
    Path(appointment_id): Path<Uuid>,
    payload: Result<Json<SubmitCompletionRequest>, JsonRejection>,
) -> Result<(StatusCode, Json<SubmitCompletionResponse>), ApiError> {
    let Json(request) = payload?;
    let record = state
        .approvals
        .submit(appointment_id, request.cleaner_id)
        .await?;

    Ok((
        StatusCode::CREATED,
        Json(SubmitCompletionResponse {
            success: true,
            completion: record.into(),
        }),
    ))
}

/// Homeowner approves a submitted completion
#[utoipa::path(
    post,
    path = "/completions/{record_id}/approve",
    security(("bearer_auth" = [])),
    params(("record_id" = Uuid, Path, description = "Completion record to approve")),
    request_body = ApproveCompletionRequest,
    responses(
        (status = 200, description = "Completion approved and earnings recorded", body = ApproveCompletionResponse),
        (status = 401, description = "Missing or invalid bearer token", body = ApiError),
        (status = 403, description = "Homeowner does not own the appointment", body = ApiError),
        (status = 404, description = "Completion record not found", body = ApiError),
        (status = 409, description = "Completion is not awaiting approval", body = ApiError),
        (status = 500, description = "Internal server error", body = ApiError)
    ),
    tag = "completions"
)]
pub async fn approve_completion(
    State(state): State<AppState>,
    _operator_auth: OperatorAuth,
    Path(record_id): Path<Uuid>,
    payload: Result<Json<ApproveCompletionRequest>, JsonRejection>,
) -> Result<Json<ApproveCompletionResponse>, ApiError> {
    let Json(request) = payload?;
    let outcome: ApprovalOutcome = state
        .approvals
        .approve(record_id, request.homeowner_id)
        .await?;
    let currency = &state.config.currency;

    let earnings_amount: i64 = outcome.earnings.iter().map(|entry| entry.amount).sum();
    let owner_release_formatted = outcome.owner_release.as_ref().map(|release| match release {
        OwnerRelease::Released { amount, .. } | OwnerRelease::Failed { amount, .. } => {
            format_minor_units(*amount, currency)
        }
        OwnerRelease::NothingRetained => format_minor_units(0, currency),
    });

    Ok(Json(ApproveCompletionResponse {
        success: true,
        completion: outcome.record.into(),
        earnings_amount,
        earnings_formatted: format_minor_units(earnings_amount, currency),
        earnings_count: outcome.earnings.len(),
        owner_release: outcome.owner_release,
        owner_release_formatted,
    }))
}

/// Homeowner disputes a completion
#[utoipa::path(
    post,
    path = "/completions/{record_id}/dispute",
    security(("bearer_auth" = [])),
    params(("record_id" = Uuid, Path, description = "Completion record to dispute")),
    request_body = DisputeCompletionRequest,
    responses(
        (status = 200, description = "Dispute recorded", body = DisputeCompletionResponse),
        (status = 400, description = "Missing reason", body = ApiError),
        (status = 401, description = "Missing or invalid bearer token", body = ApiError),
        (status = 403, description = "Homeowner does not own the appointment", body = ApiError),
        (status = 404, description = "Completion record not found", body = ApiError),
        (status = 409, description = "Completion cannot be disputed in its current state", body = ApiError),
        (status = 500, description = "Internal server error", body = ApiError)
    ),
    tag = "completions"
)]
pub async fn dispute_completion(
    State(state): State<AppState>,
    _operator_auth: OperatorAuth,
    Path(record_id): Path<Uuid>,
    payload: Result<Json<DisputeCompletionRequest>, JsonRejection>,
) -> Result<Json<DisputeCompletionResponse>, ApiError> {
    let Json(request) = payload?;
    let DisputeOutcome {
        record,
        cancelled_payouts,
    } = state
        .approvals
        .dispute(record_id, request.homeowner_id, &request.reason)
        .await?;

    let cancelled_amount: i64 = cancelled_payouts.iter().map(|entry| entry.amount).sum();
    Ok(Json(DisputeCompletionResponse {
        success: true,
        completion: record.into(),
        cancelled_payout_ids: cancelled_payouts.iter().map(|entry| entry.id).collect(),
        cancelled_formatted: format_minor_units(cancelled_amount, &state.config.currency),
        cancelled_amount,
    }))
}

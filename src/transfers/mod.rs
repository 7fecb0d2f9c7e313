//! # Transfers
//!
//! Boundary to the payment processor. Settlement and owner payouts only see the
//! [`TransferClient`] trait; [`http::HttpTransferClient`] is the production
//! implementation.

use std::collections::BTreeMap;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use thiserror::Error;
use uuid::Uuid;

pub mod http;

pub use http::HttpTransferClient;

/// One money movement from the platform balance to a connected destination.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TransferRequest {
    /// Minor units
    pub amount: i64,
    pub currency: String,
    pub destination: String,
    pub idempotency_key: String,
    pub description: String,
    pub metadata: BTreeMap<String, String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransferReceipt {
    pub reference: String,
}

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum TransferError {
    #[error("insufficient platform balance: {message}")]
    InsufficientPlatformBalance { message: String },

    #[error("destination {destination} cannot receive payouts: {message}")]
    DestinationNotReady {
        destination: String,
        message: String,
    },

    #[error("transfer rejected ({status}): {message}")]
    Rejected { status: u16, message: String },

    #[error("transfer request failed: {message}")]
    Network { message: String },
}

impl TransferError {
    /// Stable short code stored alongside the failure reason.
    pub fn code(&self) -> &'static str {
        match self {
            TransferError::InsufficientPlatformBalance { .. } => "insufficient_platform_balance",
            TransferError::DestinationNotReady { .. } => "destination_not_ready",
            TransferError::Rejected { .. } => "rejected",
            TransferError::Network { .. } => "network",
        }
    }

    /// Text persisted on failed ledger rows.
    pub fn failure_reason(&self) -> String {
        format!("{}: {}", self.code(), self)
    }
}

#[async_trait]
pub trait TransferClient: Send + Sync {
    async fn transfer(&self, request: TransferRequest) -> Result<TransferReceipt, TransferError>;
}

/// Deterministic idempotency key for a set of ledger rows.
///
/// Independent of row order. `attempt` separates a manual requeue from the original
/// attempt so the processor does not replay a cached failure.
pub fn idempotency_key(payout_ids: &[Uuid], attempt: i32) -> String {
    let mut ids: Vec<Uuid> = payout_ids.to_vec();
    ids.sort();

    let mut hasher = Sha256::new();
    for id in &ids {
        hasher.update(id.as_bytes());
    }
    hasher.update(attempt.to_be_bytes());
    format!("payout-{}", hex::encode(&hasher.finalize()[..16]))
}

//! HTTP transfer client.
//!
//! Posts JSON to `{api_base}/v1/transfers` with bearer auth and an `Idempotency-Key`
//! header. Network errors and 5xx responses are retried with exponential backoff;
//! the idempotency key makes the retries safe.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde::Deserialize;
use tracing::{info, warn};
use url::Url;

use super::{TransferClient, TransferError, TransferReceipt, TransferRequest};
use crate::config::TransferConfig;

const MAX_ATTEMPTS: u32 = 3;

#[derive(Debug, Deserialize)]
struct TransferResponse {
    id: String,
}

#[derive(Debug, Deserialize)]
struct ErrorEnvelope {
    error: ErrorBody,
}

#[derive(Debug, Deserialize)]
struct ErrorBody {
    #[serde(default)]
    code: Option<String>,
    #[serde(default)]
    message: Option<String>,
}

#[derive(Clone)]
pub struct HttpTransferClient {
    client: Client,
    endpoint: Url,
    api_key: Option<String>,
    initial_backoff: Duration,
}

impl HttpTransferClient {
    pub fn new(config: &TransferConfig) -> Result<Self, anyhow::Error> {
        let base = Url::parse(&config.api_base)?;
        let endpoint = base.join("v1/transfers")?;
        let client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_seconds))
            .build()?;
        Ok(Self {
            client,
            endpoint,
            api_key: config.api_key.clone(),
            initial_backoff: Duration::from_millis(500),
        })
    }

    /// Shortens the retry backoff; used by tests.
    pub fn with_initial_backoff(mut self, backoff: Duration) -> Self {
        self.initial_backoff = backoff;
        self
    }

    async fn send_once(&self, request: &TransferRequest) -> Result<TransferReceipt, Attempt> {
        let mut builder = self
            .client
            .post(self.endpoint.clone())
            .header("Idempotency-Key", &request.idempotency_key)
            .json(&serde_json::json!({
                "amount": request.amount,
                "currency": request.currency,
                "destination": request.destination,
                "description": request.description,
                "metadata": request.metadata,
            }));
        if let Some(api_key) = &self.api_key {
            builder = builder.bearer_auth(api_key);
        }

        let response = builder.send().await.map_err(|err| {
            Attempt::Retryable(TransferError::Network {
                message: err.to_string(),
            })
        })?;

        let status = response.status();
        if status.is_success() {
            let body: TransferResponse = response.json().await.map_err(|err| {
                Attempt::Final(TransferError::Rejected {
                    status: status.as_u16(),
                    message: format!("unreadable transfer response: {err}"),
                })
            })?;
            return Ok(TransferReceipt { reference: body.id });
        }

        let text = response.text().await.unwrap_or_default();
        let (code, message) = match serde_json::from_str::<ErrorEnvelope>(&text) {
            Ok(envelope) => (
                envelope.error.code,
                envelope.error.message.unwrap_or_else(|| text.clone()),
            ),
            Err(_) => (None, text),
        };

        let error = classify(status, code.as_deref(), message, &request.destination);
        if status.is_server_error() || status == StatusCode::TOO_MANY_REQUESTS {
            Err(Attempt::Retryable(error))
        } else {
            Err(Attempt::Final(error))
        }
    }
}

enum Attempt {
    Retryable(TransferError),
    Final(TransferError),
}

fn classify(
    status: StatusCode,
    code: Option<&str>,
    message: String,
    destination: &str,
) -> TransferError {
    match code {
        Some("balance_insufficient") | Some("insufficient_funds") => {
            TransferError::InsufficientPlatformBalance { message }
        }
        Some("account_invalid") | Some("payouts_not_enabled") | Some("destination_not_ready") => {
            TransferError::DestinationNotReady {
                destination: destination.to_string(),
                message,
            }
        }
        _ => TransferError::Rejected {
            status: status.as_u16(),
            message,
        },
    }
}

#[async_trait]
impl TransferClient for HttpTransferClient {
    async fn transfer(&self, request: TransferRequest) -> Result<TransferReceipt, TransferError> {
        let mut delay = self.initial_backoff;
        let mut attempt = 1;
        loop {
            match self.send_once(&request).await {
                Ok(receipt) => {
                    info!(
                        reference = %receipt.reference,
                        amount = request.amount,
                        idempotency_key = %request.idempotency_key,
                        attempt,
                        "Transfer created"
                    );
                    return Ok(receipt);
                }
                Err(Attempt::Final(err)) => return Err(err),
                Err(Attempt::Retryable(err)) if attempt >= MAX_ATTEMPTS => return Err(err),
                Err(Attempt::Retryable(err)) => {
                    warn!(
                        error = %err,
                        attempt,
                        idempotency_key = %request.idempotency_key,
                        "Transfer attempt failed, retrying"
                    );
                    tokio::time::sleep(delay).await;
                    delay *= 2;
                    attempt += 1;
                }
            }
        }
    }
}

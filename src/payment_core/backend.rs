use async_trait::async_trait;
use serde::Serialize;
use std::fmt;
use thiserror::Error;

/// What the backend hands back for an accepted payment request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PaymentReceipt {
    /// BOLT11 invoice string. Stored in the ledger as the payment reference.
    pub payment_reference: String,
    pub payment_hash: Option<String>,
}

/// Classification of a failed dispatch, shared by the backend and the ledger.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    /// Backend unreachable, or no answer before the deadline.
    Connection,
    BackendRejected,
    MalformedResponse,
    Ledger,
}

impl FailureKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            FailureKind::Connection => "connection",
            FailureKind::BackendRejected => "backend_rejected",
            FailureKind::MalformedResponse => "malformed_response",
            FailureKind::Ledger => "ledger",
        }
    }
}

impl fmt::Display for FailureKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Error, Clone, PartialEq)]
pub enum BackendError {
    #[error("payment backend unreachable: {0}")]
    Connection(String),
    #[error("payment backend rejected request (HTTP {status}): {body}")]
    Rejected { status: u16, body: String },
    #[error("malformed payment backend response: {0}")]
    MalformedResponse(String),
}

impl BackendError {
    pub fn kind(&self) -> FailureKind {
        match self {
            BackendError::Connection(_) => FailureKind::Connection,
            BackendError::Rejected { .. } => FailureKind::BackendRejected,
            BackendError::MalformedResponse(_) => FailureKind::MalformedResponse,
        }
    }
}

/// Lightning payment provider.
#[async_trait]
pub trait PaymentBackend: Send + Sync {
    async fn request_payment(&self, amount_units: u64, memo: &str) -> Result<PaymentReceipt, BackendError>;

    /// Backend name for logging
    fn backend_type(&self) -> &'static str;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_kinds() {
        assert_eq!(BackendError::Connection("refused".into()).kind(), FailureKind::Connection);
        assert_eq!(
            BackendError::Rejected {
                status: 401,
                body: "bad key".into()
            }
            .kind(),
            FailureKind::BackendRejected
        );
        assert_eq!(
            BackendError::MalformedResponse("no invoice".into()).kind(),
            FailureKind::MalformedResponse
        );
    }

    #[test]
    fn test_failure_kind_serializes_snake_case() {
        assert_eq!(serde_json::to_string(&FailureKind::BackendRejected).unwrap(), "\"backend_rejected\"");
        assert_eq!(FailureKind::MalformedResponse.to_string(), "malformed_response");
    }
}

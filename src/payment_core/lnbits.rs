//! LNbits payment backend
//!
//! Requests a BOLT11 invoice from an LNbits wallet for every qualifying repost.
//!
//! ## API Reference
//!
//! Endpoint: `POST {base_url}/api/v1/payments`
//! Auth: `X-Api-Key: <wallet key>`
//! Body: `{"out": false, "amount": <units>, "memo": "<text>"}`
//! Returns: JSON object with `payment_request` (BOLT11) and usually `payment_hash`

use crate::payment_core::backend::{BackendError, PaymentBackend, PaymentReceipt};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::time::Duration;

const PAYMENTS_PATH: &str = "/api/v1/payments";
const MAX_ERROR_BODY: usize = 256;

#[derive(Debug, Clone)]
pub struct LnbitsConfig {
    pub base_url: String,
    pub api_key: String,
    pub timeout: Duration,
}

#[derive(Debug, Serialize)]
struct CreateInvoiceRequest<'a> {
    out: bool,
    amount: u64,
    memo: &'a str,
}

#[derive(Debug, Deserialize)]
struct CreateInvoiceResponse {
    #[serde(default)]
    payment_request: Option<String>,
    #[serde(default)]
    payment_hash: Option<String>,
}

pub struct LnbitsClient {
    client: reqwest::Client,
    endpoint: String,
    api_key: String,
}

impl LnbitsClient {
    pub fn new(config: &LnbitsConfig) -> Result<Self, BackendError> {
        let client = reqwest::Client::builder()
            .timeout(config.timeout)
            .build()
            .map_err(|e| BackendError::Connection(format!("failed to build HTTP client: {}", e)))?;

        Ok(Self {
            client,
            endpoint: format!("{}{}", config.base_url.trim_end_matches('/'), PAYMENTS_PATH),
            api_key: config.api_key.clone(),
        })
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }
}

fn connection_error(err: reqwest::Error) -> BackendError {
    if err.is_timeout() {
        BackendError::Connection(format!("request timed out: {}", err))
    } else {
        BackendError::Connection(err.to_string())
    }
}

fn truncate_body(mut body: String) -> String {
    if body.len() > MAX_ERROR_BODY {
        let mut cut = MAX_ERROR_BODY;
        while !body.is_char_boundary(cut) {
            cut -= 1;
        }
        body.truncate(cut);
        body.push_str("...");
    }
    body
}

#[async_trait]
impl PaymentBackend for LnbitsClient {
    async fn request_payment(&self, amount_units: u64, memo: &str) -> Result<PaymentReceipt, BackendError> {
        let body = CreateInvoiceRequest {
            out: false,
            amount: amount_units,
            memo,
        };

        let response = self
            .client
            .post(&self.endpoint)
            .header("X-Api-Key", &self.api_key)
            .json(&body)
            .send()
            .await
            .map_err(connection_error)?;

        let status = response.status();
        let text = response.text().await.map_err(connection_error)?;

        if !status.is_success() {
            return Err(BackendError::Rejected {
                status: status.as_u16(),
                body: truncate_body(text),
            });
        }

        let parsed: CreateInvoiceResponse =
            serde_json::from_str(&text).map_err(|e| BackendError::MalformedResponse(e.to_string()))?;

        let payment_reference = parsed
            .payment_request
            .filter(|invoice| !invoice.trim().is_empty())
            .ok_or_else(|| BackendError::MalformedResponse("response carries no payment_request".to_string()))?;

        log::debug!(
            "LNbits invoice created (hash: {})",
            parsed.payment_hash.as_deref().unwrap_or("none")
        );

        Ok(PaymentReceipt {
            payment_reference,
            payment_hash: parsed.payment_hash,
        })
    }

    fn backend_type(&self) -> &'static str {
        "LNbits"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::payment_core::backend::FailureKind;
    use axum::http::{HeaderMap, StatusCode};
    use axum::response::IntoResponse;
    use axum::routing::post;
    use axum::{Json, Router};
    use serde_json::{json, Value};

    async fn serve(app: Router) -> String {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        format!("http://{}", addr)
    }

    fn client(base_url: String, timeout: Duration) -> LnbitsClient {
        LnbitsClient::new(&LnbitsConfig {
            base_url,
            api_key: "test-key".to_string(),
            timeout,
        })
        .unwrap()
    }

    #[test]
    fn test_endpoint_strips_trailing_slash() {
        let lnbits = client("https://lnbits.example.com/".to_string(), Duration::from_secs(1));
        assert_eq!(lnbits.endpoint(), "https://lnbits.example.com/api/v1/payments");
    }

    #[test]
    fn test_truncate_body() {
        let long = "x".repeat(1000);
        let truncated = truncate_body(long);
        assert_eq!(truncated.len(), MAX_ERROR_BODY + 3);
        assert_eq!(truncate_body("short".to_string()), "short");
    }

    #[tokio::test]
    async fn test_successful_invoice() {
        let app = Router::new().route(
            PAYMENTS_PATH,
            post(|headers: HeaderMap, Json(body): Json<Value>| async move {
                let key_ok = headers.get("X-Api-Key").and_then(|v| v.to_str().ok()) == Some("test-key");
                let body_ok = body["out"] == json!(false) && body["amount"] == json!(21) && body["memo"].is_string();
                if key_ok && body_ok {
                    Json(json!({ "payment_request": "lnbc210n1ptest", "payment_hash": "abc123" })).into_response()
                } else {
                    (StatusCode::BAD_REQUEST, "unexpected request").into_response()
                }
            }),
        );
        let lnbits = client(serve(app).await, Duration::from_secs(5));

        let receipt = lnbits.request_payment(21, "thanks").await.unwrap();
        assert_eq!(receipt.payment_reference, "lnbc210n1ptest");
        assert_eq!(receipt.payment_hash.as_deref(), Some("abc123"));
    }

    #[tokio::test]
    async fn test_missing_payment_request_is_malformed() {
        let app = Router::new().route(PAYMENTS_PATH, post(|| async { Json(json!({ "payment_hash": "abc" })) }));
        let lnbits = client(serve(app).await, Duration::from_secs(5));

        let err = lnbits.request_payment(1, "memo").await.unwrap_err();
        assert_eq!(err.kind(), FailureKind::MalformedResponse);
    }

    #[tokio::test]
    async fn test_non_json_body_is_malformed() {
        let app = Router::new().route(PAYMENTS_PATH, post(|| async { "<html>oops</html>" }));
        let lnbits = client(serve(app).await, Duration::from_secs(5));

        let err = lnbits.request_payment(1, "memo").await.unwrap_err();
        assert_eq!(err.kind(), FailureKind::MalformedResponse);
    }

    #[tokio::test]
    async fn test_unauthorized_is_rejected() {
        let app = Router::new().route(
            PAYMENTS_PATH,
            post(|| async { (StatusCode::UNAUTHORIZED, r#"{"detail":"Invalid key"}"#) }),
        );
        let lnbits = client(serve(app).await, Duration::from_secs(5));

        let err = lnbits.request_payment(1, "memo").await.unwrap_err();
        match err {
            BackendError::Rejected { status, body } => {
                assert_eq!(status, 401);
                assert!(body.contains("Invalid key"));
            }
            other => panic!("expected rejection, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_unreachable_backend_is_connection_error() {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let lnbits = client(format!("http://{}", addr), Duration::from_secs(2));
        let err = lnbits.request_payment(1, "memo").await.unwrap_err();
        assert_eq!(err.kind(), FailureKind::Connection);
    }

    #[tokio::test]
    async fn test_slow_backend_times_out() {
        let app = Router::new().route(
            PAYMENTS_PATH,
            post(|| async {
                tokio::time::sleep(Duration::from_secs(5)).await;
                Json(json!({ "payment_request": "lnbc1late" }))
            }),
        );
        let lnbits = client(serve(app).await, Duration::from_millis(200));

        let err = lnbits.request_payment(1, "memo").await.unwrap_err();
        assert_eq!(err.kind(), FailureKind::Connection);
    }
}

//! In-process stand-ins for a Nostr relay and an LNbits wallet.

#![allow(dead_code)]

use axum::extract::State;
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::routing::post;
use axum::{Json, Router};
use futures::{SinkExt, StreamExt};
use serde_json::{json, Value};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::Message;

pub const NOTE: &str = "0987e3bd97d23819c65b50361b17c9a6ba693e2b72665802a12765836301bf94";

pub fn repost(id: &str, actor: &str) -> Value {
    json!({
        "id": id,
        "pubkey": actor,
        "created_at": 1700000000,
        "kind": 6,
        "tags": [["e", NOTE, "wss://relay.example"], ["p", "f".repeat(64)]],
        "content": "",
        "sig": "00",
    })
}

pub fn quote(id: &str, actor: &str, text: &str) -> Value {
    json!({
        "id": id,
        "pubkey": actor,
        "created_at": 1700000000,
        "kind": 1,
        "tags": [["q", NOTE]],
        "content": text,
        "sig": "00",
    })
}

pub fn unrelated(id: &str, actor: &str) -> Value {
    json!({
        "id": id,
        "pubkey": actor,
        "created_at": 1700000000,
        "kind": 6,
        "tags": [["e", "a".repeat(64)]],
        "content": "",
        "sig": "00",
    })
}

/// Relay that answers every `REQ` with the given events followed by `EOSE`.
pub struct FakeRelay {
    pub url: String,
    /// Text frames received from clients, in arrival order.
    pub frames: mpsc::UnboundedReceiver<String>,
}

/// Start a relay. With `hang_up_after_req` the relay drops the connection
/// right after serving its events and stops accepting new ones.
pub async fn spawn_relay(events: Vec<Value>, hang_up_after_req: bool) -> FakeRelay {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let url = format!("ws://{}", listener.local_addr().unwrap());
    let (frames_tx, frames) = mpsc::unbounded_channel();

    tokio::spawn(async move {
        loop {
            let Ok((stream, _)) = listener.accept().await else {
                return;
            };
            let Ok(mut ws) = tokio_tungstenite::accept_async(stream).await else {
                continue;
            };
            let events = events.clone();
            let frames_tx = frames_tx.clone();

            let connection = async move {
                while let Some(Ok(message)) = ws.next().await {
                    let Message::Text(text) = message else {
                        continue;
                    };
                    let _ = frames_tx.send(text.clone());

                    let frame: Value = serde_json::from_str(&text).unwrap_or(Value::Null);
                    if frame[0] != "REQ" {
                        continue;
                    }
                    let subscription_id = frame[1].clone();
                    for event in &events {
                        let out = json!(["EVENT", subscription_id, event]).to_string();
                        if ws.send(Message::Text(out)).await.is_err() {
                            return;
                        }
                    }
                    let _ = ws.send(Message::Text(json!(["EOSE", subscription_id]).to_string())).await;

                    if hang_up_after_req {
                        let _ = ws.close(None).await;
                        return;
                    }
                }
            };

            if hang_up_after_req {
                connection.await;
                // Dropping the listener refuses every reconnect.
                return;
            }
            tokio::spawn(connection);
        }
    });

    FakeRelay { url, frames }
}

/// A `ws://` address with nothing listening on it.
pub async fn dead_relay_url() -> String {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);
    format!("ws://{}", addr)
}

#[derive(Clone, Copy)]
pub enum WalletBehavior {
    Pay,
    Slow(Duration),
    NoReference,
}

pub struct FakeWallet {
    behavior: WalletBehavior,
    pub calls: AtomicUsize,
    pub requests: Mutex<Vec<Value>>,
}

impl FakeWallet {
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

async fn create_invoice(State(wallet): State<Arc<FakeWallet>>, Json(body): Json<Value>) -> impl IntoResponse {
    let n = wallet.calls.fetch_add(1, Ordering::SeqCst);
    let amount = body["amount"].as_u64().unwrap_or(0);
    if let Ok(mut requests) = wallet.requests.lock() {
        requests.push(body);
    }

    match wallet.behavior {
        WalletBehavior::Pay => (
            StatusCode::CREATED,
            Json(json!({
                "payment_request": format!("lnbc{}n1fake{}", amount, n),
                "payment_hash": format!("{:064x}", n),
            })),
        ),
        WalletBehavior::Slow(delay) => {
            tokio::time::sleep(delay).await;
            (StatusCode::CREATED, Json(json!({ "payment_request": "lnbc1late" })))
        }
        WalletBehavior::NoReference => (StatusCode::CREATED, Json(json!({ "payment_hash": "00" }))),
    }
}

/// Start an LNbits stand-in; returns its base URL and the shared state.
pub async fn spawn_wallet(behavior: WalletBehavior) -> (String, Arc<FakeWallet>) {
    let wallet = Arc::new(FakeWallet {
        behavior,
        calls: AtomicUsize::new(0),
        requests: Mutex::new(Vec::new()),
    });
    let app = Router::new()
        .route("/api/v1/payments", post(create_invoice))
        .with_state(wallet.clone());

    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });

    (format!("http://{}", addr), wallet)
}

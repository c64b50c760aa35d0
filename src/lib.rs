//! AutoZap: pays a small Lightning invoice to everyone who reposts a tracked Nostr note.
//!
//! ```text
//! [RelayPool] → [MonitorLoop] → [EventFilter] → [PaymentDispatcher] → [LNbits]
//!                                                      ↕
//!                                                  [Ledger]
//! ```
//!
//! - `relay_core` - relay transport, raw event shape, repost filter, reconnect backoff
//! - `payment_core` - SQLite ledger, payment backend client, idempotent dispatcher
//! - `monitor` - loop state machine and the long-running poll cycle
//! - `config` - environment configuration shared by the binaries

pub mod config;
pub mod monitor;
pub mod payment_core;
pub mod relay_core;
pub mod sqlite_pragma;

/// Abbreviate a hex identity for log lines.
pub fn short_id(id: &str) -> &str {
    match id.char_indices().nth(8) {
        Some((idx, _)) => &id[..idx],
        None => id,
    }
}

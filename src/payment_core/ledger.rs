//! Durable record of payment attempts.
//!
//! The ledger is the only source of truth for "has this actor already been
//! paid for this note recently". Rows are never deleted; a row starts as
//! `pending` and moves exactly once to `paid` or `failed`.

use crate::sqlite_pragma::apply_ledger_pragmas;
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use rusqlite::types::{FromSql, FromSqlError, FromSqlResult, ToSqlOutput, ValueRef};
use rusqlite::{params, Connection, OptionalExtension, Row, ToSql, TransactionBehavior};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard};
use thiserror::Error;

pub type AttemptId = i64;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PaymentStatus {
    Pending,
    Paid,
    Failed,
}

impl PaymentStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            PaymentStatus::Pending => "pending",
            PaymentStatus::Paid => "paid",
            PaymentStatus::Failed => "failed",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "pending" => Some(PaymentStatus::Pending),
            "paid" => Some(PaymentStatus::Paid),
            "failed" => Some(PaymentStatus::Failed),
            _ => None,
        }
    }
}

impl fmt::Display for PaymentStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.pad(self.as_str())
    }
}

impl ToSql for PaymentStatus {
    fn to_sql(&self) -> rusqlite::Result<ToSqlOutput<'_>> {
        Ok(ToSqlOutput::from(self.as_str()))
    }
}

impl FromSql for PaymentStatus {
    fn column_result(value: ValueRef<'_>) -> FromSqlResult<Self> {
        let text = value.as_str()?;
        PaymentStatus::parse(text)
            .ok_or_else(|| FromSqlError::Other(format!("unknown payment status '{}'", text).into()))
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PaymentRecord {
    pub attempt_id: AttemptId,
    pub actor_id: String,
    pub target_post_id: String,
    pub amount_units: u64,
    /// Empty until the backend hands one out.
    pub payment_reference: String,
    pub status: PaymentStatus,
    pub failure_reason: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// A payment attempt about to be inserted.
#[derive(Debug, Clone, PartialEq)]
pub struct NewPaymentRecord {
    pub actor_id: String,
    pub target_post_id: String,
    pub amount_units: u64,
    pub created_at: DateTime<Utc>,
}

impl NewPaymentRecord {
    pub fn new(actor_id: impl Into<String>, target_post_id: impl Into<String>, amount_units: u64) -> Self {
        Self {
            actor_id: actor_id.into(),
            target_post_id: target_post_id.into(),
            amount_units,
            created_at: Utc::now(),
        }
    }

    pub fn created_at(mut self, created_at: DateTime<Utc>) -> Self {
        self.created_at = created_at;
        self
    }
}

/// Terminal status for a pending attempt.
#[derive(Debug, Clone, PartialEq)]
pub enum StatusUpdate {
    Paid { payment_reference: String },
    Failed { reason: String },
}

impl StatusUpdate {
    pub fn status(&self) -> PaymentStatus {
        match self {
            StatusUpdate::Paid { .. } => PaymentStatus::Paid,
            StatusUpdate::Failed { .. } => PaymentStatus::Failed,
        }
    }
}

/// Result of the atomic eligibility check + pending insert.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Claim {
    Recorded(AttemptId),
    /// A `paid` row for the pair exists inside the window.
    RateLimited,
    /// A `pending` row for the pair exists inside the window.
    InFlight,
}

#[derive(Debug, Error)]
pub enum LedgerError {
    #[error("invalid status transition for attempt {attempt_id}: {from} -> {to}")]
    InvalidTransition {
        attempt_id: AttemptId,
        from: PaymentStatus,
        to: PaymentStatus,
    },
    #[error("payment attempt {0} not found")]
    NotFound(AttemptId),
    #[error("amount must be between 1 and i64::MAX units, got {0}")]
    InvalidAmount(u64),
    #[error("storage error: {0}")]
    Storage(#[from] rusqlite::Error),
    #[error("failed to prepare ledger directory: {0}")]
    Io(#[from] std::io::Error),
    #[error("ledger connection lock poisoned")]
    LockPoisoned,
}

const SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS payments (
    id                INTEGER PRIMARY KEY AUTOINCREMENT,
    actor_id          TEXT NOT NULL,
    target_post_id    TEXT NOT NULL,
    amount_units      INTEGER NOT NULL CHECK (amount_units >= 1),
    payment_reference TEXT NOT NULL DEFAULT '',
    status            TEXT NOT NULL CHECK (status IN ('pending', 'paid', 'failed')),
    failure_reason    TEXT,
    created_at        INTEGER NOT NULL,
    updated_at        INTEGER NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_payments_pair
    ON payments(actor_id, target_post_id, status, created_at DESC);
CREATE INDEX IF NOT EXISTS idx_payments_created
    ON payments(created_at DESC);
"#;

const SELECT_COLUMNS: &str = "SELECT id, actor_id, target_post_id, amount_units, payment_reference, \
     status, failure_reason, created_at, updated_at FROM payments";

/// SQLite-backed ledger. Cloning shares the underlying connection.
#[derive(Clone)]
pub struct Ledger {
    conn: Arc<Mutex<Connection>>,
}

impl Ledger {
    /// Open (or create) the ledger file, creating the schema if absent.
    pub fn open(db_path: impl AsRef<Path>) -> Result<Self, LedgerError> {
        let db_path = db_path.as_ref();
        if let Some(parent) = db_path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }

        let conn = Connection::open(db_path)?;
        apply_ledger_pragmas(&conn)?;
        Self::from_connection(conn)
    }

    pub fn open_in_memory() -> Result<Self, LedgerError> {
        Self::from_connection(Connection::open_in_memory()?)
    }

    fn from_connection(conn: Connection) -> Result<Self, LedgerError> {
        conn.execute_batch(SCHEMA)?;
        log::debug!("Ledger schema ready");
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    fn lock(&self) -> Result<MutexGuard<'_, Connection>, LedgerError> {
        self.conn.lock().map_err(|_| LedgerError::LockPoisoned)
    }

    /// Insert a `pending` attempt and return its id.
    pub fn record_attempt(&self, record: &NewPaymentRecord) -> Result<AttemptId, LedgerError> {
        let conn = self.lock()?;
        insert_pending(&conn, record)
    }

    /// Move a `pending` attempt to its terminal status.
    pub fn update_status(&self, attempt_id: AttemptId, update: StatusUpdate) -> Result<(), LedgerError> {
        let conn = self.lock()?;
        let to = update.status();
        let (reference, reason) = match &update {
            StatusUpdate::Paid { payment_reference } => (Some(payment_reference.as_str()), None),
            StatusUpdate::Failed { reason } => (None, Some(reason.as_str())),
        };

        let changed = conn.execute(
            "UPDATE payments
             SET status = ?1,
                 payment_reference = COALESCE(?2, payment_reference),
                 failure_reason = ?3,
                 updated_at = ?4
             WHERE id = ?5 AND status = 'pending'",
            params![to, reference, reason, Utc::now().timestamp(), attempt_id],
        )?;

        if changed == 1 {
            return Ok(());
        }

        let current: Option<PaymentStatus> = conn
            .query_row("SELECT status FROM payments WHERE id = ?1", [attempt_id], |row| row.get(0))
            .optional()?;

        match current {
            None => Err(LedgerError::NotFound(attempt_id)),
            Some(from) => Err(LedgerError::InvalidTransition { attempt_id, from, to }),
        }
    }

    /// True when a `paid` attempt for the pair was created within the last `window_hours`.
    pub fn has_paid_within_window(
        &self,
        actor_id: &str,
        target_post_id: &str,
        window_hours: u32,
    ) -> Result<bool, LedgerError> {
        self.has_paid_within_window_at(actor_id, target_post_id, window_hours, Utc::now())
    }

    pub fn has_paid_within_window_at(
        &self,
        actor_id: &str,
        target_post_id: &str,
        window_hours: u32,
        now: DateTime<Utc>,
    ) -> Result<bool, LedgerError> {
        let conn = self.lock()?;
        Ok(exists_within_window(
            &conn,
            actor_id,
            target_post_id,
            PaymentStatus::Paid,
            window_hours,
            now,
        )?)
    }

    /// Check eligibility and insert the `pending` row in one transaction.
    ///
    /// The window is measured back from `record.created_at`.
    pub fn claim_attempt(&self, record: &NewPaymentRecord, window_hours: u32) -> Result<Claim, LedgerError> {
        let mut conn = self.lock()?;
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
        let now = record.created_at;

        if exists_within_window(&tx, &record.actor_id, &record.target_post_id, PaymentStatus::Paid, window_hours, now)? {
            return Ok(Claim::RateLimited);
        }
        if exists_within_window(&tx, &record.actor_id, &record.target_post_id, PaymentStatus::Pending, window_hours, now)? {
            return Ok(Claim::InFlight);
        }

        let attempt_id = insert_pending(&tx, record)?;
        tx.commit()?;
        Ok(Claim::Recorded(attempt_id))
    }

    /// All attempts, or those for one actor, newest first.
    pub fn history(&self, actor_id: Option<&str>) -> Result<Vec<PaymentRecord>, LedgerError> {
        let conn = self.lock()?;
        let records = match actor_id {
            Some(actor) => {
                let mut stmt = conn.prepare(&format!(
                    "{} WHERE actor_id = ?1 ORDER BY created_at DESC, id DESC",
                    SELECT_COLUMNS
                ))?;
                let records = stmt
                    .query_map([actor], row_to_record)?
                    .collect::<Result<Vec<_>, _>>()?;
                records
            }
            None => {
                let mut stmt = conn.prepare(&format!("{} ORDER BY created_at DESC, id DESC", SELECT_COLUMNS))?;
                let records = stmt
                    .query_map([], row_to_record)?
                    .collect::<Result<Vec<_>, _>>()?;
                records
            }
        };
        Ok(records)
    }

    pub fn get(&self, attempt_id: AttemptId) -> Result<Option<PaymentRecord>, LedgerError> {
        let conn = self.lock()?;
        let record = conn
            .query_row(&format!("{} WHERE id = ?1", SELECT_COLUMNS), [attempt_id], row_to_record)
            .optional()?;
        Ok(record)
    }
}

fn insert_pending(conn: &Connection, record: &NewPaymentRecord) -> Result<AttemptId, LedgerError> {
    let amount = i64::try_from(record.amount_units)
        .ok()
        .filter(|amount| *amount >= 1)
        .ok_or(LedgerError::InvalidAmount(record.amount_units))?;
    let created_at = record.created_at.timestamp();

    conn.execute(
        "INSERT INTO payments
            (actor_id, target_post_id, amount_units, payment_reference, status, created_at, updated_at)
         VALUES (?1, ?2, ?3, '', ?4, ?5, ?5)",
        params![
            record.actor_id,
            record.target_post_id,
            amount,
            PaymentStatus::Pending,
            created_at,
        ],
    )?;

    Ok(conn.last_insert_rowid())
}

fn exists_within_window(
    conn: &Connection,
    actor_id: &str,
    target_post_id: &str,
    status: PaymentStatus,
    window_hours: u32,
    now: DateTime<Utc>,
) -> rusqlite::Result<bool> {
    let cutoff = now - ChronoDuration::hours(i64::from(window_hours));
    let mut stmt = conn.prepare_cached(
        "SELECT 1 FROM payments
         WHERE actor_id = ?1 AND target_post_id = ?2 AND status = ?3
           AND created_at >= ?4
         LIMIT 1",
    )?;
    // No upper bound: a row stamped ahead of `now` (clock stepped back) still blocks.
    stmt.exists(params![actor_id, target_post_id, status, cutoff.timestamp()])
}

fn from_unix(secs: i64) -> DateTime<Utc> {
    DateTime::from_timestamp(secs, 0).unwrap_or_default()
}

fn row_to_record(row: &Row<'_>) -> rusqlite::Result<PaymentRecord> {
    let amount: i64 = row.get(3)?;
    Ok(PaymentRecord {
        attempt_id: row.get(0)?,
        actor_id: row.get(1)?,
        target_post_id: row.get(2)?,
        amount_units: u64::try_from(amount).unwrap_or_default(),
        payment_reference: row.get(4)?,
        status: row.get(5)?,
        failure_reason: row.get(6)?,
        created_at: from_unix(row.get(7)?),
        updated_at: from_unix(row.get(8)?),
    })
}

//! Connection tuning shared by every SQLite handle the bot opens.

use rusqlite::Connection;
use std::time::Duration;

/// Pages between automatic WAL checkpoints.
pub const WAL_AUTOCHECKPOINT_PAGES: i64 = 1000;

/// How long a writer waits on a locked database before giving up.
pub const BUSY_TIMEOUT: Duration = Duration::from_secs(5);

/// Apply WAL journaling and durability settings to a freshly opened connection.
///
/// The ledger is small and written once or twice per payment, so durability
/// matters more than throughput: `synchronous = FULL` keeps a committed
/// `paid` row on disk even across power loss.
pub fn apply_ledger_pragmas(conn: &Connection) -> rusqlite::Result<()> {
    conn.busy_timeout(BUSY_TIMEOUT)?;
    conn.pragma_update(None, "journal_mode", "WAL")?;
    conn.pragma_update(None, "synchronous", "FULL")?;
    conn.pragma_update(None, "foreign_keys", "ON")?;
    conn.pragma_update(None, "wal_autocheckpoint", WAL_AUTOCHECKPOINT_PAGES)?;
    Ok(())
}

//! Embedded SQLite store.
//!
//! Single source of truth for all mutation. One connection per worker in
//! WAL mode; every write path goes through [`Store::with_tx`], whose
//! closure receives a [`StoreTx`] handle. Composite operations nest on the
//! same handle and share the outermost commit/rollback boundary, which is
//! what makes "save prediction, update firm stats" style operations atomic
//! without each helper opening its own transaction.

mod schema;
mod queries;

use rusqlite::Connection;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::Mutex;
use tracing::warn;

use crate::errors::EngineError;

/// Attempts for SQLITE_BUSY/LOCKED before surfacing the failure.
const TX_RETRY_ATTEMPTS: u32 = 3;
const TX_RETRY_BASE_DELAY: Duration = Duration::from_millis(50);

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("write conflict: {0}")]
    Conflict(String),
    #[error("integrity violation: {0}")]
    Integrity(String),
    #[error("transient storage error: {0}")]
    Transient(String),
    #[error("storage error: {0}")]
    Other(String),
}

impl From<rusqlite::Error> for StoreError {
    fn from(e: rusqlite::Error) -> Self {
        match &e {
            rusqlite::Error::SqliteFailure(err, _) => match err.code {
                rusqlite::ErrorCode::DatabaseBusy | rusqlite::ErrorCode::DatabaseLocked => {
                    StoreError::Transient(e.to_string())
                }
                rusqlite::ErrorCode::ConstraintViolation => StoreError::Integrity(e.to_string()),
                _ => StoreError::Other(e.to_string()),
            },
            _ => StoreError::Other(e.to_string()),
        }
    }
}

impl From<StoreError> for EngineError {
    fn from(e: StoreError) -> Self {
        match e {
            StoreError::Transient(m) => EngineError::Transient(m),
            StoreError::Integrity(m) | StoreError::Conflict(m) => EngineError::Integrity(m),
            StoreError::Other(m) => EngineError::Storage(m),
        }
    }
}

/// Handle to the embedded database. Cheap to clone; all clones share the
/// worker's single connection.
#[derive(Clone)]
pub struct Store {
    conn: Arc<Mutex<Connection>>,
}

impl Store {
    pub fn open(path: &str) -> Result<Self, StoreError> {
        let conn = Connection::open(path)?;
        conn.pragma_update(None, "journal_mode", "WAL").ok();
        conn.pragma_update(None, "synchronous", "NORMAL").ok();
        conn.busy_timeout(Duration::from_secs(5))?;

        schema::init(&conn)?;
        schema::migrate(&conn)?;

        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    /// Open a scoped transaction: run `f`, commit on `Ok`, roll back on any
    /// `Err`. Transient lock errors are retried with backoff up to 3
    /// attempts. Nothing partial ever escapes.
    pub async fn with_tx<T>(
        &self,
        mut f: impl FnMut(&mut StoreTx<'_>) -> Result<T, StoreError>,
    ) -> Result<T, StoreError> {
        let mut attempt = 0u32;
        loop {
            attempt += 1;
            let conn = self.conn.lock().await;
            let result = run_outermost(&conn, &mut f);
            drop(conn);
            match result {
                Err(StoreError::Transient(msg)) if attempt < TX_RETRY_ATTEMPTS => {
                    let delay = TX_RETRY_BASE_DELAY * 2u32.saturating_pow(attempt - 1);
                    warn!(attempt, error = %msg, "store busy, retrying transaction");
                    tokio::time::sleep(delay).await;
                }
                other => return other,
            }
        }
    }

    /// Store reachability probe for `/health`. Not transactional.
    pub async fn ping(&self) -> Result<(), StoreError> {
        let conn = self.conn.lock().await;
        conn.query_row("SELECT 1", [], |_| Ok(()))?;
        Ok(())
    }
}

fn run_outermost<T>(
    conn: &Connection,
    f: &mut impl FnMut(&mut StoreTx<'_>) -> Result<T, StoreError>,
) -> Result<T, StoreError> {
    conn.execute_batch("BEGIN IMMEDIATE")?;
    let mut tx = StoreTx { conn, depth: 0 };
    match f(&mut tx) {
        Ok(value) => {
            conn.execute_batch("COMMIT")?;
            Ok(value)
        }
        Err(e) => {
            // Roll back the whole outer transaction; a rollback failure is
            // secondary to the original error.
            let _ = conn.execute_batch("ROLLBACK");
            Err(e)
        }
    }
}

/// A live transaction. All entity operations are methods on this handle
/// (see `queries.rs`), so nested composite operations cannot accidentally
/// open a second boundary.
pub struct StoreTx<'c> {
    pub(crate) conn: &'c Connection,
    depth: u32,
}

impl StoreTx<'_> {
    /// Re-entrant scope: runs `f` inside the current transaction. No new
    /// BEGIN is issued; commit/rollback stays with the outermost caller.
    pub fn nested<T>(
        &mut self,
        f: impl FnOnce(&mut Self) -> Result<T, StoreError>,
    ) -> Result<T, StoreError> {
        self.depth += 1;
        let result = f(self);
        self.depth -= 1;
        result
    }

    pub fn depth(&self) -> u32 {
        self.depth
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{default_roster, Portfolio};
    use chrono::Utc;

    async fn temp_store() -> (tempfile::TempDir, Store) {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("test.db");
        let store = Store::open(path.to_str().unwrap()).unwrap();
        (dir, store)
    }

    #[tokio::test]
    async fn commit_and_rollback() {
        let (_dir, store) = temp_store().await;
        let now = Utc::now();

        store
            .with_tx(|tx| tx.upsert_portfolio(&Portfolio::new("ChatGPT", 50.0, now)))
            .await
            .unwrap();

        // A failing closure must leave no trace of its writes.
        let result: Result<(), StoreError> = store
            .with_tx(|tx| {
                tx.upsert_portfolio(&Portfolio::new("Claude", 50.0, now))?;
                Err(StoreError::Integrity("forced".into()))
            })
            .await;
        assert!(result.is_err());

        let portfolios = store.with_tx(|tx| tx.list_portfolios()).await.unwrap();
        assert_eq!(portfolios.len(), 1);
        assert_eq!(portfolios[0].firm, "ChatGPT");
    }

    #[tokio::test]
    async fn nested_scope_shares_outer_boundary() {
        let (_dir, store) = temp_store().await;
        let now = Utc::now();

        let result: Result<(), StoreError> = store
            .with_tx(|tx| {
                tx.nested(|inner| {
                    inner.upsert_portfolio(&Portfolio::new("Gemini", 50.0, now))?;
                    assert_eq!(inner.depth(), 1);
                    Ok(())
                })?;
                // An error after the nested scope unwinds its writes too.
                Err(StoreError::Integrity("outer failure".into()))
            })
            .await;
        assert!(result.is_err());

        let portfolios = store.with_tx(|tx| tx.list_portfolios()).await.unwrap();
        assert!(portfolios.is_empty());
    }

    #[tokio::test]
    async fn reopen_preserves_rows() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("test.db");
        let now = Utc::now();
        {
            let store = Store::open(path.to_str().unwrap()).unwrap();
            store
                .with_tx(|tx| {
                    for firm in default_roster() {
                        tx.upsert_portfolio(&Portfolio::new(&firm.name, 50.0, now))?;
                    }
                    Ok(())
                })
                .await
                .unwrap();
        }
        let store = Store::open(path.to_str().unwrap()).unwrap();
        let portfolios = store.with_tx(|tx| tx.list_portfolios()).await.unwrap();
        assert_eq!(portfolios.len(), 5);
    }
}

// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! State store: connection ownership and the transaction wrapper

use crate::tx::StoreTx;
use amphora_core::SyncError;
use parking_lot::Mutex;
use rusqlite::{Connection, TransactionBehavior};
use std::path::Path;
use std::time::Duration;
use thiserror::Error;

/// Initial backoff window when the database is locked, in seconds.
const BUSY_INIT_WAIT: f64 = 0.4;
/// Backoff window multiplier per retry.
const BUSY_BACKOFF: f64 = 1.1;
/// Total wall-clock budget before a busy database is surfaced, in seconds.
const BUSY_MAX_WAIT: f64 = 60.0;

/// Errors from the state store
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("sqlite error: {0}")]
    Sqlite(#[from] rusqlite::Error),
    #[error("database busy after {waited:.1}s")]
    BusyTimeout { waited: f64 },
    #[error("state encoding error: {0}")]
    Encoding(#[from] serde_json::Error),
}

impl StoreError {
    fn is_busy(&self) -> bool {
        match self {
            StoreError::Sqlite(rusqlite::Error::SqliteFailure(err, _)) => matches!(
                err.code,
                rusqlite::ErrorCode::DatabaseBusy | rusqlite::ErrorCode::DatabaseLocked
            ),
            _ => false,
        }
    }
}

impl From<StoreError> for SyncError {
    fn from(err: StoreError) -> Self {
        SyncError::Database(err.to_string())
    }
}

const SCHEMA: &str = "\
create table if not exists archives(\
    archive text, objname text, serial integer, info text, \
    primary key (archive, objname));\n\
create table if not exists serials(\
    objname text, nextserial bigint, primary key (objname));\n\
create table if not exists config(\
    key text, value text, primary key (key));\n\
create table if not exists cachenames(\
    cachename text, client text, objname text, primary key (cachename));";

/// Durable, transactional store for archive rows, serials, config, and
/// cache-file-name bindings. One connection, serialized writers; every
/// access goes through [`StateStore::with_tx`].
pub struct StateStore {
    conn: Mutex<Connection>,
}

impl StateStore {
    pub fn open(path: &Path) -> Result<Self, StoreError> {
        let conn = Connection::open(path)?;
        // WAL supports concurrent readers with serialized writers.
        let _mode: String =
            conn.query_row("pragma journal_mode = wal", [], |row| row.get(0))?;
        Self::from_connection(conn)
    }

    /// In-memory store for tests.
    pub fn open_in_memory() -> Result<Self, StoreError> {
        Self::from_connection(Connection::open_in_memory()?)
    }

    fn from_connection(conn: Connection) -> Result<Self, StoreError> {
        conn.execute_batch(SCHEMA)?;
        Ok(Self { conn: Mutex::new(conn) })
    }

    /// Run `f` inside one `begin immediate` transaction.
    ///
    /// Commits when `f` returns `Ok`, rolls back otherwise; no partial
    /// effects survive an error. A busy database is retried with
    /// randomized exponential backoff until the wall-clock cap, then
    /// surfaced as [`StoreError::BusyTimeout`].
    pub fn with_tx<T, F>(&self, mut f: F) -> Result<T, StoreError>
    where
        F: FnMut(&StoreTx<'_>) -> Result<T, StoreError>,
    {
        let mut window = BUSY_INIT_WAIT;
        let mut waited = 0.0;
        let mut attempt = 0u32;
        loop {
            let outcome = {
                let mut conn = self.conn.lock();
                Self::attempt_tx(&mut conn, &mut f)
            };
            match outcome {
                Ok(value) => return Ok(value),
                Err(err) if err.is_busy() => {
                    if waited > BUSY_MAX_WAIT {
                        tracing::error!(attempt, waited, "database busy; giving up");
                        return Err(StoreError::BusyTimeout { waited });
                    }
                    attempt += 1;
                    let sleep = rand::random::<f64>() * window;
                    tracing::warn!(attempt, sleep, "database busy; retrying");
                    std::thread::sleep(Duration::from_secs_f64(sleep));
                    waited += sleep;
                    window *= BUSY_BACKOFF;
                }
                Err(err) => return Err(err),
            }
        }
    }

    fn attempt_tx<T, F>(conn: &mut Connection, f: &mut F) -> Result<T, StoreError>
    where
        F: FnMut(&StoreTx<'_>) -> Result<T, StoreError>,
    {
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
        let stx = StoreTx::new(tx);
        match f(&stx) {
            Ok(value) => {
                stx.commit()?;
                Ok(value)
            }
            // Transaction drops here, rolling back.
            Err(err) => Err(err),
        }
    }
}

#[cfg(test)]
#[path = "store_tests.rs"]
mod tests;

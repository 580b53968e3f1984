//! Transaction timing
//!
//! Wraps a SQLite transaction and logs how long its connection was held, so
//! slow verse writes show up when workers start contending for the pool.

use sqlx::{Sqlite, SqliteConnection, SqlitePool, Transaction};
use std::time::Instant;
use stripey_common::Result;

/// Logs hold time when released; a timer dropped unreleased marks an error path
struct HoldTimer {
    caller: &'static str,
    acquired_at: Instant,
    released: bool,
}

impl HoldTimer {
    fn release(mut self, how: &'static str) {
        self.released = true;
        let held_ms = self.acquired_at.elapsed().as_millis();
        if held_ms > 2000 {
            tracing::warn!(caller = self.caller, held_ms, how, "Long transaction held its connection (>2s)");
        } else if held_ms > 1000 {
            tracing::info!(caller = self.caller, held_ms, how, "Transaction held longer than expected (>1s)");
        } else {
            tracing::debug!(caller = self.caller, held_ms, how, "Connection released");
        }
    }
}

impl Drop for HoldTimer {
    fn drop(&mut self) {
        if !self.released {
            tracing::debug!(
                caller = self.caller,
                held_ms = self.acquired_at.elapsed().as_millis(),
                "Transaction dropped without commit"
            );
        }
    }
}

/// A transaction that reports how long it held its connection
pub struct MonitoredTransaction<'c> {
    tx: Transaction<'c, Sqlite>,
    timer: HoldTimer,
}

impl<'c> MonitoredTransaction<'c> {
    pub fn conn(&mut self) -> &mut SqliteConnection {
        &mut self.tx
    }

    pub async fn commit(self) -> Result<()> {
        self.tx.commit().await?;
        self.timer.release("commit");
        Ok(())
    }

    pub async fn rollback(self) -> Result<()> {
        self.tx.rollback().await?;
        self.timer.release("rollback");
        Ok(())
    }
}

/// Begin a transaction, logging slow connection acquisition
pub async fn begin_monitored<'c>(pool: &'c SqlitePool, caller: &'static str) -> Result<MonitoredTransaction<'c>> {
    let start = Instant::now();
    let tx = pool.begin().await?;

    let wait_ms = start.elapsed().as_millis();
    if wait_ms > 1000 {
        tracing::warn!(caller, wait_ms, "Slow connection acquisition (>1s) - pool may be saturated");
    } else {
        tracing::trace!(caller, wait_ms, "Connection acquired");
    }

    Ok(MonitoredTransaction {
        tx,
        timer: HoldTimer {
            caller,
            acquired_at: Instant::now(),
            released: false,
        },
    })
}

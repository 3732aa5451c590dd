//! Poll a [Ledger] for newly anchored transactions.
//!
//! [Cursor] remembers the last transaction number returned by the ledger and pages through
//! everything after it. [Watcher] drives a cursor on a fixed interval and emits each non-empty
//! set of new transactions as one ordered batch.
//!
//! The watcher never exits because of a ledger error: the failing tick emits whatever it
//! collected before the error and the next tick resumes from the cursor.

use crate::{Ledger, Metrics, SidetreeTxn};
use futures::{channel::mpsc, SinkExt};
use std::time::Duration;
use tokio::time::{self, Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

/// Shortest interval between polls.
pub const MIN_POLL_INTERVAL: Duration = Duration::from_millis(1);

/// Configuration for a [Watcher].
#[derive(Clone, Debug)]
pub struct Config {
    /// Transaction number to resume after (`None` starts from the beginning of the ledger).
    pub since: Option<u64>,

    /// Interval between polls (raised to [MIN_POLL_INTERVAL] if shorter).
    pub poll_interval: Duration,

    /// Maximum number of reads issued in a single poll. Anything left over is picked up on the
    /// next poll.
    pub max_batch_size: usize,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            since: None,
            poll_interval: Duration::from_millis(500),
            max_batch_size: 1_000,
        }
    }
}

/// Position in a [Ledger].
pub struct Cursor<L: Ledger> {
    ledger: L,
    since: Option<u64>,
}

impl<L: Ledger> Cursor<L> {
    /// Create a cursor that resumes after `since`.
    pub fn new(ledger: L, since: Option<u64>) -> Self {
        Self { ledger, since }
    }

    /// Last transaction number returned (`None` if nothing has been read).
    pub fn position(&self) -> Option<u64> {
        self.since
    }

    /// Read transactions after the cursor into `batch` until the ledger reports no more or
    /// `limit` reads have been issued.
    ///
    /// Transactions are appended to `batch` as they are read, so on error `batch` holds
    /// everything read before the failure (and the cursor has advanced past it).
    pub async fn drain(
        &mut self,
        batch: &mut Vec<SidetreeTxn>,
        limit: usize,
    ) -> Result<(), L::Error> {
        for _ in 0..limit {
            let (more, txn) = self.ledger.read(self.since).await?;
            if let Some(txn) = txn {
                if self
                    .since
                    .is_some_and(|since| txn.transaction_number <= since)
                {
                    warn!(
                        cursor = ?self.since,
                        transaction_number = txn.transaction_number,
                        "ledger returned stale transaction"
                    );
                    return Ok(());
                }
                debug!(
                    transaction_number = txn.transaction_number,
                    namespace = %txn.namespace,
                    "found sidetree transaction in ledger"
                );
                self.since = Some(txn.transaction_number);
                batch.push(txn);
            }
            if !more {
                return Ok(());
            }
        }
        debug!(limit, cursor = ?self.since, "poll limit reached");
        Ok(())
    }
}

/// Periodically drains a [Ledger] and emits batches of new transactions.
pub struct Watcher<L: Ledger> {
    cursor: Cursor<L>,
    poll_interval: Duration,
    max_batch_size: usize,
    metrics: Metrics,
}

impl<L: Ledger> Watcher<L> {
    /// Create a new watcher.
    pub fn new(ledger: L, cfg: Config, metrics: Metrics) -> Self {
        metrics.set_cursor(cfg.since);
        Self {
            cursor: Cursor::new(ledger, cfg.since),
            poll_interval: cfg.poll_interval.max(MIN_POLL_INTERVAL),
            max_batch_size: cfg.max_batch_size.max(1),
            metrics,
        }
    }

    /// Last transaction number observed.
    pub fn cursor(&self) -> Option<u64> {
        self.cursor.position()
    }

    /// Drain all transactions currently available after the cursor.
    pub async fn poll(&mut self) -> Vec<SidetreeTxn> {
        let mut batch = Vec::new();
        if let Err(err) = self.cursor.drain(&mut batch, self.max_batch_size).await {
            warn!(
                ?err,
                cursor = ?self.cursor.position(),
                collected = batch.len(),
                "failed to read ledger"
            );
        }
        self.metrics.set_cursor(self.cursor.position());
        batch
    }

    /// Poll until `token` is cancelled or `sender` is closed, sending every non-empty batch.
    pub async fn run(
        mut self,
        mut sender: mpsc::Sender<Vec<SidetreeTxn>>,
        token: CancellationToken,
    ) {
        let mut interval =
            time::interval_at(Instant::now() + self.poll_interval, self.poll_interval);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
        loop {
            tokio::select! {
                biased;
                _ = token.cancelled() => break,
                _ = interval.tick() => {},
            }

            let batch = tokio::select! {
                biased;
                _ = token.cancelled() => break,
                batch = self.poll() => batch,
            };
            if batch.is_empty() {
                continue;
            }

            // Waits for room if the processor is behind
            tokio::select! {
                biased;
                _ = token.cancelled() => break,
                result = sender.send(batch) => {
                    if result.is_err() {
                        debug!("batch receiver dropped");
                        break;
                    }
                },
            }
        }
        debug!(cursor = ?self.cursor.position(), "watcher stopped");
    }
}

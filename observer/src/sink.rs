//! Forward assembled operations to an [OperationStore].

use crate::{AnchoredOperation, Error, Metrics, OperationStore, SidetreeTxn};
use std::time::Duration;
use tracing::{debug, warn};

/// What to do when the store rejects the operations of a transaction.
///
/// The ledger cursor is never rolled back, so under every policy a transaction whose `put`
/// ultimately fails is not revisited until the observer restarts.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum FailurePolicy {
    /// Log the failure and continue with the next transaction.
    #[default]
    Skip,
    /// Retry `attempts` more times, waiting `backoff` between attempts, then continue with the
    /// next transaction.
    Retry { attempts: u32, backoff: Duration },
    /// Log the failure and stop the observer.
    Halt,
}

/// Hands operations to an [OperationStore] under a [FailurePolicy].
#[derive(Clone)]
pub struct Sink<S: OperationStore> {
    store: S,
    policy: FailurePolicy,
    metrics: Metrics,
}

impl<S: OperationStore> Sink<S> {
    /// Create a new sink.
    pub fn new(store: S, policy: FailurePolicy, metrics: Metrics) -> Self {
        Self {
            store,
            policy,
            metrics,
        }
    }

    /// Returns true if a failed `put` should stop the observer.
    pub fn halts(&self) -> bool {
        matches!(self.policy, FailurePolicy::Halt)
    }

    /// Store the `operations` anchored by `txn`.
    ///
    /// Returns an error only once the policy has given up on the transaction.
    pub async fn put(
        &self,
        txn: &SidetreeTxn,
        operations: Vec<AnchoredOperation>,
    ) -> Result<(), Error> {
        let (retries, backoff) = match self.policy {
            FailurePolicy::Retry { attempts, backoff } => (attempts, backoff),
            FailurePolicy::Skip | FailurePolicy::Halt => (0, Duration::ZERO),
        };
        let count = operations.len() as u64;
        let mut attempt = 0;
        loop {
            match self.store.put(operations.clone()).await {
                Ok(()) => {
                    self.metrics.operations.inc_by(count);
                    debug!(
                        namespace = %txn.namespace,
                        transaction_number = txn.transaction_number,
                        operations = count,
                        "stored operations"
                    );
                    return Ok(());
                }
                Err(err) => {
                    self.metrics.store_failures.inc();
                    warn!(
                        namespace = %txn.namespace,
                        transaction_number = txn.transaction_number,
                        attempt,
                        ?err,
                        "failed to store operations"
                    );
                    if attempt >= retries {
                        return Err(Error::Store {
                            reason: err.to_string(),
                        });
                    }
                }
            }
            attempt += 1;
            tokio::time::sleep(backoff).await;
        }
    }
}

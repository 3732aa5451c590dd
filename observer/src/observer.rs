//! Compose the ledger watcher, resolver, assembler and sink into a running observer.
//!
//! [Observer::start] spawns two tasks connected by a bounded channel: the watcher polls the
//! ledger and the processor ingests each received transaction in order. Both exit when the
//! returned [Handle] is stopped, or when the processor halts on a store failure.

use crate::{
    assembler, ledger,
    resolver::{self, Resolver},
    sink::{FailurePolicy, Sink},
    Cas, Error, Ledger, Metrics, OperationStore, Protocols, SidetreeTxn,
};
use futures::{channel::mpsc, StreamExt};
use prometheus_client::registry::Registry;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// Configuration for an [Observer].
#[derive(Clone, Debug)]
pub struct Config {
    /// Namespace to ingest. Transactions of other namespaces are ignored.
    pub namespace: String,

    /// Transaction number to resume after (`None` observes the ledger from the beginning).
    pub since: Option<u64>,

    /// Interval between ledger polls.
    pub poll_interval: Duration,

    /// Maximum number of ledger reads per poll.
    pub max_batch_size: usize,

    /// Number of transaction batches that can be buffered between the watcher and the
    /// processor.
    pub mailbox_size: usize,

    /// Abandon anchors whose record count differs from the count they declare.
    pub enforce_operation_count: bool,

    /// How to handle store failures.
    pub failure_policy: FailurePolicy,
}

impl Config {
    /// Create a configuration with defaults for `namespace`.
    pub fn new(namespace: impl Into<String>) -> Self {
        let watcher = ledger::Config::default();
        Self {
            namespace: namespace.into(),
            since: watcher.since,
            poll_interval: watcher.poll_interval,
            max_batch_size: watcher.max_batch_size,
            mailbox_size: 100,
            enforce_operation_count: resolver::Config::default().enforce_operation_count,
            failure_policy: FailurePolicy::default(),
        }
    }
}

/// Ingests the operations anchored under a single namespace.
pub struct Observer<L: Ledger, C: Cas, S: OperationStore, P: Protocols> {
    namespace: String,
    mailbox_size: usize,

    watcher: ledger::Watcher<L>,
    resolver: Resolver<C>,
    sink: Sink<S>,
    protocols: P,

    metrics: Metrics,
}

impl<L: Ledger, C: Cas, S: OperationStore, P: Protocols> Observer<L, C, S, P> {
    /// Create a new observer, registering its metrics with `registry`.
    pub fn new(
        cfg: Config,
        ledger: L,
        cas: C,
        store: S,
        protocols: P,
        registry: &mut Registry,
    ) -> Self {
        // Create metrics
        let metrics = Metrics::init(registry);

        // Create components
        let watcher = ledger::Watcher::new(
            ledger,
            ledger::Config {
                since: cfg.since,
                poll_interval: cfg.poll_interval,
                max_batch_size: cfg.max_batch_size,
            },
            metrics.clone(),
        );
        let resolver = Resolver::new(
            cas,
            resolver::Config {
                enforce_operation_count: cfg.enforce_operation_count,
            },
        );
        let sink = Sink::new(store, cfg.failure_policy, metrics.clone());

        Self {
            namespace: cfg.namespace,
            mailbox_size: cfg.mailbox_size.max(1),
            watcher,
            resolver,
            sink,
            protocols,
            metrics,
        }
    }

    /// Metrics updated by the observer.
    pub fn metrics(&self) -> &Metrics {
        &self.metrics
    }

    /// Spawn the watcher and processor tasks.
    ///
    /// Must be called from within a tokio runtime. Returns immediately with a [Handle] that can
    /// stop the observer or wait for it to exit.
    pub fn start(self) -> Handle {
        let token = CancellationToken::new();
        let (sender, receiver) = mpsc::channel(self.mailbox_size);
        info!(
            namespace = %self.namespace,
            since = ?self.watcher.cursor(),
            "starting observer"
        );

        let Self {
            namespace,
            watcher,
            resolver,
            sink,
            protocols,
            metrics,
            ..
        } = self;
        let processor = Processor {
            namespace,
            resolver,
            sink,
            protocols,
            metrics: metrics.clone(),
        };
        let watcher = tokio::spawn(watcher.run(sender, token.clone()));
        let processor = tokio::spawn(processor.run(receiver, token.clone()));
        Handle {
            token,
            watcher,
            processor,
            metrics,
        }
    }
}

/// Resolves, assembles and stores each received transaction in order.
struct Processor<C: Cas, S: OperationStore, P: Protocols> {
    namespace: String,
    resolver: Resolver<C>,
    sink: Sink<S>,
    protocols: P,
    metrics: Metrics,
}

impl<C: Cas, S: OperationStore, P: Protocols> Processor<C, S, P> {
    async fn run(
        self,
        mut batches: mpsc::Receiver<Vec<SidetreeTxn>>,
        token: CancellationToken,
    ) -> Result<(), Error> {
        // Stop the watcher if we exit for any reason
        let _guard = token.clone().drop_guard();
        loop {
            let batch = tokio::select! {
                biased;
                _ = token.cancelled() => break,
                batch = batches.next() => match batch {
                    Some(batch) => batch,
                    None => break,
                },
            };
            for txn in batch {
                tokio::select! {
                    biased;
                    _ = token.cancelled() => {
                        debug!(transaction_number = txn.transaction_number, "processing cancelled");
                        return Ok(());
                    },
                    result = self.process(&txn) => {
                        if let Err(err) = result {
                            error!(namespace = %self.namespace, ?err, "observer halted");
                            return Err(err);
                        }
                    },
                }
            }
        }
        debug!(namespace = %self.namespace, "processor stopped");
        Ok(())
    }

    /// Ingest a single transaction.
    ///
    /// Only returns an error if the observer must stop.
    async fn process(&self, txn: &SidetreeTxn) -> Result<(), Error> {
        self.metrics.transactions.inc();
        if txn.namespace != self.namespace {
            debug!(
                namespace = %txn.namespace,
                transaction_number = txn.transaction_number,
                "skipping transaction of foreign namespace"
            );
            return Ok(());
        }

        // Resolve the anchored batch
        let protocol = match self.protocols.get(txn.transaction_time) {
            Ok(protocol) => protocol,
            Err(err) => {
                self.abandon(txn, &err);
                return Ok(());
            }
        };
        let batch = match self.resolver.resolve(&txn.anchor_string, &protocol).await {
            Ok(batch) => batch,
            Err(err) => {
                self.abandon(txn, &err);
                return Ok(());
            }
        };
        let operations = match assembler::assemble(txn, batch, &protocol) {
            Ok(operations) => operations,
            Err(err) => {
                self.abandon(txn, &err);
                return Ok(());
            }
        };
        if operations.is_empty() {
            debug!(
                namespace = %txn.namespace,
                transaction_number = txn.transaction_number,
                "no supported operations in transaction"
            );
            return Ok(());
        }

        // Store
        if self.sink.put(txn, operations).await.is_err() && self.sink.halts() {
            return Err(Error::Halted(txn.transaction_number));
        }
        Ok(())
    }

    fn abandon(&self, txn: &SidetreeTxn, err: &Error) {
        self.metrics.anchor_failures.inc();
        if err.is_malformed() {
            error!(
                namespace = %txn.namespace,
                transaction_number = txn.transaction_number,
                anchor = %txn.anchor_string,
                ?err,
                "skipping malformed anchor"
            );
        } else {
            warn!(
                namespace = %txn.namespace,
                transaction_number = txn.transaction_number,
                anchor = %txn.anchor_string,
                ?err,
                "failed to resolve anchor"
            );
        }
    }
}

/// Handle to a running [Observer].
pub struct Handle {
    token: CancellationToken,
    watcher: JoinHandle<()>,
    processor: JoinHandle<Result<(), Error>>,
    metrics: Metrics,
}

impl Handle {
    /// Metrics updated by the observer.
    pub fn metrics(&self) -> &Metrics {
        &self.metrics
    }

    /// Returns true once both tasks have exited.
    pub fn is_finished(&self) -> bool {
        self.watcher.is_finished() && self.processor.is_finished()
    }

    /// Stop the observer and wait for its tasks to exit.
    ///
    /// The transaction being processed (if any) is abandoned.
    pub async fn stop(self) -> Result<(), Error> {
        self.token.cancel();
        self.join().await
    }

    /// Wait for the observer to exit on its own (only happens when halted).
    pub async fn join(self) -> Result<(), Error> {
        let processed = self
            .processor
            .await
            .map_err(|err| Error::Task(err.to_string()))?;
        self.watcher
            .await
            .map_err(|err| Error::Task(err.to_string()))?;
        processed
    }
}

/// Create and start an [Observer] for `cfg.namespace`.
pub fn start<L: Ledger, C: Cas, S: OperationStore, P: Protocols>(
    cfg: Config,
    ledger: L,
    cas: C,
    store: S,
    protocols: P,
    registry: &mut Registry,
) -> Handle {
    Observer::new(cfg, ledger, cas, store, protocols, registry).start()
}

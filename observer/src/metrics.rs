//! Prometheus metrics exported by an observer.

use prometheus_client::{
    metrics::{counter::Counter, gauge::Gauge},
    registry::Registry,
};

/// Metrics for an [crate::Observer].
///
/// Cloned handles share the same underlying values.
#[derive(Clone, Debug, Default)]
pub struct Metrics {
    /// Transactions received from the ledger.
    pub transactions: Counter,
    /// Operations handed to the store.
    pub operations: Counter,
    /// Transactions abandoned because their anchor could not be resolved.
    pub anchor_failures: Counter,
    /// Failed store calls (including retries).
    pub store_failures: Counter,
    /// Last transaction number observed (-1 before the first).
    pub cursor: Gauge,
}

impl Metrics {
    /// Create metrics and register them with `registry`.
    pub fn init(registry: &mut Registry) -> Self {
        let metrics = Self::default();
        metrics.cursor.set(-1);
        registry.register(
            "transactions",
            "transactions received from the ledger",
            metrics.transactions.clone(),
        );
        registry.register(
            "operations",
            "operations handed to the store",
            metrics.operations.clone(),
        );
        registry.register(
            "anchor_failures",
            "transactions abandoned because their anchor could not be resolved",
            metrics.anchor_failures.clone(),
        );
        registry.register(
            "store_failures",
            "failed calls to the operation store",
            metrics.store_failures.clone(),
        );
        registry.register(
            "cursor",
            "last transaction number observed",
            metrics.cursor.clone(),
        );
        metrics
    }

    /// Record the position of the ledger cursor.
    pub(crate) fn set_cursor(&self, cursor: Option<u64>) {
        let value = cursor.map_or(-1, |number| i64::try_from(number).unwrap_or(i64::MAX));
        self.cursor.set(value);
    }
}

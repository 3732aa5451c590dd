//! Discover anchored Sidetree batches and ingest their operations.
//!
//! A Sidetree node writes batches of DID operations to content-addressable storage (CAS) and
//! anchors a reference to each batch on an append-only ledger. The [Observer] is the other half
//! of that arrangement: it polls the ledger for new anchors, walks the file graph each anchor
//! points to and hands the decoded operations to a namespace-scoped [OperationStore].
//!
//! # Pipeline
//!
//! ```text
//! Ledger --poll--> ledger::Watcher --batches--> Observer
//!                                                  |
//!                          resolver::Resolver <----+----> assembler::assemble
//!                          (core index file ->              (stamp ledger metadata)
//!                           provisional index file ->              |
//!                           chunk files)                           v
//!                                                           sink::Sink --> OperationStore
//! ```
//!
//! # Cursor
//!
//! The watcher keeps the last transaction number it has seen in memory only. Every restart
//! re-observes the ledger from the configured starting point, so stores must tolerate seeing
//! the same operation more than once.
//!
//! # Failures
//!
//! Failures are scoped to a single transaction. A transaction whose anchor graph cannot be
//! fetched or decoded is abandoned (nothing it contains is stored) and the observer moves on to
//! the next one. What happens when the store itself rejects a batch is governed by
//! [sink::FailurePolicy].

use bytes::Bytes;
use serde::{Deserialize, Serialize};
use std::{fmt, future::Future};
use thiserror::Error;

pub mod assembler;
pub mod compression;
pub mod files;
pub mod ledger;
mod metrics;
pub use metrics::Metrics;
#[cfg(any(test, feature = "mocks"))]
pub mod mocks;
mod observer;
pub use observer::{start, Config, Handle, Observer};
pub mod protocol;
pub use protocol::{Protocol, Protocols};
pub mod resolver;
pub mod sink;

/// A Sidetree anchor recorded on the ledger.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SidetreeTxn {
    /// Namespace the anchor was written under.
    pub namespace: String,
    /// Reference to the batch in CAS (`<count>.<address>`).
    pub anchor_string: String,
    /// Position of the transaction in the ledger.
    pub transaction_number: u64,
    /// Ledger time at which the transaction was recorded.
    pub transaction_time: u64,
}

/// Kind of DID operation.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OperationType {
    Create,
    Update,
    Recover,
    Deactivate,
}

impl fmt::Display for OperationType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            OperationType::Create => "create",
            OperationType::Update => "update",
            OperationType::Recover => "recover",
            OperationType::Deactivate => "deactivate",
        };
        f.write_str(name)
    }
}

/// An operation decoded from an anchored batch, stamped with the ledger metadata of the
/// transaction that anchored it.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AnchoredOperation {
    #[serde(rename = "type")]
    pub operation_type: OperationType,
    /// Suffix of the DID the operation applies to.
    pub unique_suffix: String,
    /// Suffix data (only present for creates).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub suffix_data: Option<files::SuffixData>,
    /// Patches and next update commitment (absent for deactivates).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub delta: Option<files::Delta>,
    /// Reveal value proving control of the previous commitment (absent for creates).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reveal_value: Option<String>,
    pub transaction_number: u64,
    pub transaction_time: u64,
    pub namespace: String,
    /// Position of the operation within its transaction.
    pub operation_index: u32,
}

/// Source of anchored transactions.
pub trait Ledger: Send + 'static {
    /// Error returned when the ledger cannot be read.
    type Error: std::error::Error + Send + Sync + 'static;

    /// Returns the first transaction strictly after `since` (or the first transaction if `since`
    /// is `None`) and whether more transactions remain after it.
    fn read(
        &mut self,
        since: Option<u64>,
    ) -> impl Future<Output = Result<(bool, Option<SidetreeTxn>), Self::Error>> + Send;
}

/// Read access to content-addressable storage.
pub trait Cas: Clone + Send + Sync + 'static {
    /// Error returned when content cannot be fetched.
    type Error: std::error::Error + Send + Sync + 'static;

    /// Fetch the content stored at `address`.
    fn read(&self, address: &str) -> impl Future<Output = Result<Bytes, Self::Error>> + Send;
}

/// Destination for anchored operations.
///
/// Implementations must be safe to call concurrently from observers of different namespaces.
pub trait OperationStore: Clone + Send + Sync + 'static {
    /// Error returned when operations cannot be stored.
    type Error: std::error::Error + Send + Sync + 'static;

    /// Store all `operations` of a single transaction.
    fn put(
        &self,
        operations: Vec<AnchoredOperation>,
    ) -> impl Future<Output = Result<(), Self::Error>> + Send;
}

/// Errors that can occur while observing anchors.
#[derive(Debug, Error)]
pub enum Error {
    #[error("invalid anchor string: {0}")]
    InvalidAnchor(String),
    #[error("failed to read {address} from cas: {reason}")]
    Cas { address: String, reason: String },
    #[error("unsupported compression algorithm: {0}")]
    UnsupportedCompression(String),
    #[error("compression failed: {0}")]
    Compression(String),
    #[error("decompression failed: {0}")]
    Decompression(String),
    #[error("{file} exceeds maximum size ({size} > {max})")]
    FileTooLarge {
        file: files::FileKind,
        size: usize,
        max: usize,
    },
    #[error("failed to parse {file}: {reason}")]
    Parse {
        file: files::FileKind,
        reason: String,
    },
    #[error("anchor declares {expected} operations but {actual} were found")]
    OperationCountMismatch { expected: u64, actual: u64 },
    #[error("anchor declares {count} operations (max {max})")]
    TooManyOperations { count: u64, max: u64 },
    #[error("chunk files contain {actual} deltas but {expected} are referenced")]
    DeltaCountMismatch { expected: usize, actual: usize },
    #[error("unsupported multihash code: {0}")]
    UnsupportedHashAlgorithm(u64),
    #[error("no protocol defined at transaction time {0}")]
    ProtocolNotFound(u64),
    #[error("failed to put operations: {reason}")]
    Store { reason: String },
    #[error("halted at transaction {0}")]
    Halted(u64),
    #[error("task failed: {0}")]
    Task(String),
    #[error("invalid configuration: {0}")]
    Config(String),
    #[error("serialization failed: {0}")]
    Serialization(String),
}

impl Error {
    /// Returns true if the error was caused by anchored content that can never be ingested (as
    /// opposed to a collaborator that may recover).
    pub fn is_malformed(&self) -> bool {
        matches!(
            self,
            Error::InvalidAnchor(_)
                | Error::Decompression(_)
                | Error::FileTooLarge { .. }
                | Error::Parse { .. }
                | Error::OperationCountMismatch { .. }
                | Error::TooManyOperations { .. }
                | Error::DeltaCountMismatch { .. }
        )
    }
}

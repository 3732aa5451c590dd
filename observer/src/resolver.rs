//! Resolve an anchor string into the operations of its batch.
//!
//! Resolution walks the file graph top-down on every call and keeps no state between calls, so
//! resolving the same anchor against the same CAS content always yields the same batch.

use crate::{
    compression,
    files::{
        self, ChunkFile, CoreIndexFile, CreateReference, Delta, FileKind, OperationReference,
        ProvisionalIndexFile,
    },
    Cas, Error, Protocol,
};
use futures::future::try_join_all;
use serde::de::DeserializeOwned;
use std::{collections::BTreeMap, fmt, str::FromStr};
use tracing::{debug, warn};

/// Parsed form of `<operation count>.<core index file address>`.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct AnchorString {
    /// Number of operations the anchored batch declares.
    pub operation_count: u64,
    /// CAS address of the core index file.
    pub core_index_file_uri: String,
}

impl FromStr for AnchorString {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (count, uri) = s
            .split_once('.')
            .ok_or_else(|| Error::InvalidAnchor(format!("missing delimiter: {s}")))?;
        let operation_count = count
            .parse::<u64>()
            .map_err(|_| Error::InvalidAnchor(format!("invalid operation count: {count}")))?;
        if operation_count == 0 {
            return Err(Error::InvalidAnchor("operation count must be positive".into()));
        }
        if uri.is_empty() {
            return Err(Error::InvalidAnchor("missing core index file address".into()));
        }
        Ok(Self {
            operation_count,
            core_index_file_uri: uri.to_string(),
        })
    }
}

impl fmt::Display for AnchorString {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.operation_count, self.core_index_file_uri)
    }
}

/// An operation reference paired with the delta found for it in a chunk file.
#[derive(Clone, Debug, PartialEq)]
pub struct DeltaReference {
    pub reference: OperationReference,
    pub delta: Delta,
}

/// Every operation found by walking an anchored batch, in file order.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct ResolvedBatch {
    pub creates: Vec<CreateReference>,
    pub recovers: Vec<DeltaReference>,
    pub deactivates: Vec<OperationReference>,
    pub updates: Vec<DeltaReference>,
    /// Operation groups that were found but are not supported, with their record counts.
    pub unsupported: Vec<(String, usize)>,
}

impl ResolvedBatch {
    /// Number of supported operations.
    pub fn len(&self) -> usize {
        self.creates.len() + self.recovers.len() + self.deactivates.len() + self.updates.len()
    }

    /// Returns true if the batch has no supported operations.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Number of records found, including unsupported ones.
    pub fn records(&self) -> usize {
        self.len()
            + self
                .unsupported
                .iter()
                .map(|(_, count)| count)
                .sum::<usize>()
    }
}

/// Configuration for a [Resolver].
#[derive(Clone, Debug)]
pub struct Config {
    /// Fail resolution when the number of records found differs from the count declared in
    /// the anchor string. When unset, a mismatch is only logged.
    pub enforce_operation_count: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            enforce_operation_count: true,
        }
    }
}

/// Walks the file graph of anchored batches.
#[derive(Clone)]
pub struct Resolver<C: Cas> {
    cas: C,
    enforce_operation_count: bool,
}

impl<C: Cas> Resolver<C> {
    /// Create a new resolver reading from `cas`.
    pub fn new(cas: C, cfg: Config) -> Self {
        Self {
            cas,
            enforce_operation_count: cfg.enforce_operation_count,
        }
    }

    /// Resolve `anchor` using the encoding rules of `protocol`.
    pub async fn resolve(&self, anchor: &str, protocol: &Protocol) -> Result<ResolvedBatch, Error> {
        let anchor: AnchorString = anchor.parse()?;
        if anchor.operation_count > protocol.max_operation_count {
            return Err(Error::TooManyOperations {
                count: anchor.operation_count,
                max: protocol.max_operation_count,
            });
        }

        // Fetch the root of the graph
        let core: CoreIndexFile = self
            .fetch(FileKind::CoreIndex, &anchor.core_index_file_uri, protocol)
            .await?;
        let mut unsupported = unsupported_groups(&core.operations.unsupported);

        // Fetch the provisional index file and its chunks (if any)
        let mut updates = Vec::new();
        let mut deltas = Vec::new();
        if let Some(uri) = &core.provisional_index_file_uri {
            let provisional: ProvisionalIndexFile = self
                .fetch(FileKind::ProvisionalIndex, uri, protocol)
                .await?;
            unsupported.extend(unsupported_groups(&provisional.operations.unsupported));
            updates = provisional.operations.update;

            // Chunks are fetched concurrently but their deltas are kept in reference order
            let chunks: Vec<ChunkFile> = try_join_all(
                provisional
                    .chunks
                    .iter()
                    .map(|chunk| self.fetch(FileKind::Chunk, &chunk.chunk_file_uri, protocol)),
            )
            .await?;
            deltas = chunks.into_iter().flat_map(|chunk| chunk.deltas).collect();
        }

        // Deltas cover recovers first, then updates
        let expected = core.operations.recover.len() + updates.len();
        if deltas.len() != expected {
            return Err(Error::DeltaCountMismatch {
                expected,
                actual: deltas.len(),
            });
        }
        let mut deltas = deltas.into_iter();
        let recovers = pair(core.operations.recover, &mut deltas);
        let updates = pair(updates, &mut deltas);

        let batch = ResolvedBatch {
            creates: core.operations.create,
            recovers,
            deactivates: core.operations.deactivate,
            updates,
            unsupported,
        };

        // Reconcile with the count declared by the anchor
        let found = batch.records() as u64;
        if found != anchor.operation_count {
            if self.enforce_operation_count {
                return Err(Error::OperationCountMismatch {
                    expected: anchor.operation_count,
                    actual: found,
                });
            }
            warn!(
                anchor = %anchor,
                expected = anchor.operation_count,
                found,
                "operation count mismatch"
            );
        }
        debug!(anchor = %anchor, operations = batch.len(), "resolved anchor");
        Ok(batch)
    }

    /// Fetch, decompress and parse the file of `kind` stored at `address`.
    async fn fetch<T: DeserializeOwned>(
        &self,
        kind: FileKind,
        address: &str,
        protocol: &Protocol,
    ) -> Result<T, Error> {
        let algorithm = protocol.compression()?;
        let compressed = self.cas.read(address).await.map_err(|err| Error::Cas {
            address: address.to_string(),
            reason: err.to_string(),
        })?;
        let max = protocol.max_file_size(kind);
        if compressed.len() > max {
            return Err(Error::FileTooLarge {
                file: kind,
                size: compressed.len(),
                max,
            });
        }
        let raw = compression::decompress(
            algorithm,
            &compressed,
            protocol.max_decompressed_size(kind),
        )?;
        files::parse(kind, &raw)
    }
}

fn pair(
    references: Vec<OperationReference>,
    deltas: &mut impl Iterator<Item = Delta>,
) -> Vec<DeltaReference> {
    references
        .into_iter()
        .zip(deltas)
        .map(|(reference, delta)| DeltaReference { reference, delta })
        .collect()
}

fn unsupported_groups(groups: &BTreeMap<String, serde_json::Value>) -> Vec<(String, usize)> {
    groups
        .iter()
        .map(|(name, group)| (name.clone(), files::records(group)))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{compression::Algorithm, mocks};
    use serde_json::json;

    fn protocol() -> Protocol {
        Protocol::default()
    }

    fn resolver(cas: &mocks::Cas) -> Resolver<mocks::Cas> {
        Resolver::new(cas.clone(), Config::default())
    }

    /// Compress a JSON document and store it in `cas`.
    fn store(cas: &mocks::Cas, document: serde_json::Value) -> String {
        let compressed =
            compression::compress(Algorithm::Gzip, document.to_string().as_bytes()).unwrap();
        cas.write(&compressed)
    }

    fn delta(commitment: &str) -> serde_json::Value {
        json!({ "patches": [{ "action": "replace" }], "updateCommitment": commitment })
    }

    #[test]
    fn test_parse_anchor_string() {
        let anchor: AnchorString = "3.EiAbc".parse().unwrap();
        assert_eq!(anchor.operation_count, 3);
        assert_eq!(anchor.core_index_file_uri, "EiAbc");
        assert_eq!(anchor.to_string(), "3.EiAbc");

        // Only the first delimiter splits
        let anchor: AnchorString = "1.a.b".parse().unwrap();
        assert_eq!(anchor.core_index_file_uri, "a.b");

        for invalid in ["EiAbc", "x.EiAbc", "0.EiAbc", "-1.EiAbc", "2.", ""] {
            assert!(
                matches!(invalid.parse::<AnchorString>(), Err(Error::InvalidAnchor(_))),
                "{invalid} should be rejected"
            );
        }
    }

    #[tokio::test]
    async fn test_graph_traversal() {
        let cas = mocks::Cas::default();

        // Two chunks: the first carries the recover delta and one update delta, the second the
        // remaining update delta
        let first = store(&cas, json!({ "deltas": [delta("r1"), delta("u1")] }));
        let second = store(&cas, json!({ "deltas": [delta("u2")] }));
        let provisional = store(
            &cas,
            json!({
                "chunks": [{ "chunkFileUri": first }, { "chunkFileUri": second }],
                "operations": { "update": [{ "didSuffix": "u1" }, { "didSuffix": "u2" }] }
            }),
        );
        let core = store(
            &cas,
            json!({
                "provisionalIndexFileUri": provisional,
                "operations": {
                    "create": [{
                        "suffixData": { "deltaHash": "hash", "recoveryCommitment": "commitment" },
                        "delta": delta("c1"),
                    }],
                    "recover": [{ "didSuffix": "r1", "revealValue": "reveal" }],
                    "deactivate": [{ "didSuffix": "d1" }],
                }
            }),
        );

        let batch = resolver(&cas)
            .resolve(&format!("5.{core}"), &protocol())
            .await
            .expect("Failed to resolve anchor");
        assert_eq!(batch.len(), 5);

        // Creates keep their suffix data and inline delta
        assert_eq!(batch.creates[0].suffix_data.delta_hash, "hash");
        assert_eq!(batch.creates[0].suffix_data.recovery_commitment, "commitment");
        assert_eq!(
            batch.creates[0].delta.as_ref().unwrap().update_commitment,
            "c1"
        );

        // Deltas are assigned to recovers, then updates, across chunk boundaries
        assert_eq!(batch.recovers[0].reference.did_suffix, "r1");
        assert_eq!(batch.recovers[0].delta.update_commitment, "r1");
        assert_eq!(batch.deactivates[0].did_suffix, "d1");
        let updates: Vec<_> = batch
            .updates
            .iter()
            .map(|update| {
                (
                    update.reference.did_suffix.as_str(),
                    update.delta.update_commitment.as_str(),
                )
            })
            .collect();
        assert_eq!(updates, vec![("u1", "u1"), ("u2", "u2")]);
    }

    #[tokio::test]
    async fn test_core_index_only() {
        let cas = mocks::Cas::default();
        let core = store(
            &cas,
            json!({ "operations": { "create": [{
                "suffixData": { "deltaHash": "hash", "recoveryCommitment": "commitment" }
            }] } }),
        );
        let batch = resolver(&cas)
            .resolve(&format!("1.{core}"), &protocol())
            .await
            .expect("Failed to resolve anchor");
        assert_eq!(batch.creates.len(), 1);
        assert!(batch.creates[0].delta.is_none());
        assert_eq!(batch.len(), 1);
    }

    #[tokio::test]
    async fn test_resolution_is_idempotent() {
        let cas = mocks::Cas::default();
        let writer = mocks::BatchWriter::new(cas.clone(), mocks::Ledger::default(), "did:sidetree");
        let anchor = writer
            .write(&[
                mocks::create(1),
                mocks::update("suffix", 2),
                mocks::recover("other", 3),
            ])
            .expect("Failed to write batch");

        let resolver = resolver(&cas);
        let first = resolver.resolve(&anchor, &protocol()).await.unwrap();
        let second = resolver.resolve(&anchor, &protocol()).await.unwrap();
        assert_eq!(first, second);
        assert_eq!(first.len(), 3);
    }

    #[tokio::test]
    async fn test_operation_count_mismatch() {
        let cas = mocks::Cas::default();
        let core = store(
            &cas,
            json!({ "operations": { "deactivate": [{ "didSuffix": "d1" }] } }),
        );
        let anchor = format!("2.{core}");

        // Enforced by default
        let result = resolver(&cas).resolve(&anchor, &protocol()).await;
        assert!(matches!(
            result,
            Err(Error::OperationCountMismatch {
                expected: 2,
                actual: 1
            })
        ));

        // Tolerated when disabled
        let lenient = Resolver::new(
            cas.clone(),
            Config {
                enforce_operation_count: false,
            },
        );
        let batch = lenient.resolve(&anchor, &protocol()).await.unwrap();
        assert_eq!(batch.deactivates.len(), 1);
    }

    #[tokio::test]
    async fn test_unsupported_groups_are_counted() {
        let cas = mocks::Cas::default();
        let core = store(
            &cas,
            json!({ "operations": {
                "deactivate": [{ "didSuffix": "d1" }],
                "migrate": [{ "didSuffix": "m1" }, { "didSuffix": "m2" }],
            } }),
        );
        let batch = resolver(&cas)
            .resolve(&format!("3.{core}"), &protocol())
            .await
            .expect("Failed to resolve anchor");
        assert_eq!(batch.len(), 1);
        assert_eq!(batch.unsupported, vec![("migrate".to_string(), 2)]);
        assert_eq!(batch.records(), 3);
    }

    #[tokio::test]
    async fn test_malformed_provisional_index_file() {
        let cas = mocks::Cas::default();
        let provisional = cas.write(b"not compressed at all");
        let core = store(
            &cas,
            json!({
                "provisionalIndexFileUri": provisional,
                "operations": { "create": [{
                    "suffixData": { "deltaHash": "hash", "recoveryCommitment": "commitment" }
                }] }
            }),
        );
        let result = resolver(&cas)
            .resolve(&format!("1.{core}"), &protocol())
            .await;
        assert!(matches!(result, Err(Error::Decompression(_))));
    }

    #[tokio::test]
    async fn test_delta_count_mismatch() {
        let cas = mocks::Cas::default();
        let chunk = store(&cas, json!({ "deltas": [] }));
        let provisional = store(
            &cas,
            json!({
                "chunks": [{ "chunkFileUri": chunk }],
                "operations": { "update": [{ "didSuffix": "u1" }] }
            }),
        );
        let core = store(&cas, json!({ "provisionalIndexFileUri": provisional }));
        let result = resolver(&cas)
            .resolve(&format!("1.{core}"), &protocol())
            .await;
        assert!(matches!(
            result,
            Err(Error::DeltaCountMismatch {
                expected: 1,
                actual: 0
            })
        ));
    }

    #[tokio::test]
    async fn test_missing_file() {
        let cas = mocks::Cas::default();
        let result = resolver(&cas).resolve("1.unknown", &protocol()).await;
        assert!(matches!(result, Err(Error::Cas { address, .. }) if address == "unknown"));
    }

    #[tokio::test]
    async fn test_limits() {
        let cas = mocks::Cas::default();
        let core = store(
            &cas,
            json!({ "operations": { "deactivate": [{ "didSuffix": "d1" }] } }),
        );
        let anchor = format!("1.{core}");

        // Compressed size
        let protocol = Protocol {
            max_core_index_file_size: 8,
            ..Default::default()
        };
        let result = resolver(&cas).resolve(&anchor, &protocol).await;
        assert!(matches!(
            result,
            Err(Error::FileTooLarge {
                file: FileKind::CoreIndex,
                max: 8,
                ..
            })
        ));

        // Declared operation count
        let protocol = Protocol {
            max_operation_count: 1,
            ..Default::default()
        };
        let result = resolver(&cas)
            .resolve(&format!("2.{core}"), &protocol)
            .await;
        assert!(matches!(
            result,
            Err(Error::TooManyOperations { count: 2, max: 1 })
        ));
    }

    #[tokio::test]
    async fn test_compression_follows_protocol() {
        let cas = mocks::Cas::default();
        let document = json!({ "operations": { "deactivate": [{ "didSuffix": "d1" }] } });
        let compressed =
            compression::compress(Algorithm::Zstd, document.to_string().as_bytes()).unwrap();
        let core = cas.write(&compressed);
        let anchor = format!("1.{core}");

        // Default protocol expects gzip
        let result = resolver(&cas).resolve(&anchor, &protocol()).await;
        assert!(matches!(result, Err(Error::Decompression(_))));

        let zstd = Protocol {
            compression_algorithm: "ZSTD".into(),
            ..Default::default()
        };
        let batch = resolver(&cas).resolve(&anchor, &zstd).await.unwrap();
        assert_eq!(batch.deactivates.len(), 1);
    }
}

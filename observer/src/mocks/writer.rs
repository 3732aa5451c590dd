use super::{Cas, Ledger};
use crate::{
    compression::{self, Algorithm},
    files::{
        canonicalize, ChunkFile, ChunkReference, CoreIndexFile, CoreOperations, CreateReference,
        Delta, OperationReference, ProvisionalIndexFile, ProvisionalOperations, SuffixData,
        SHA2_256,
    },
    Error, SidetreeTxn,
};
use serde::Serialize;
use serde_json::json;

/// An operation to include in a batch.
#[derive(Clone, Debug, PartialEq)]
pub enum Operation {
    Create {
        suffix_data: SuffixData,
        delta: Option<Delta>,
    },
    Update {
        reference: OperationReference,
        delta: Delta,
    },
    Recover {
        reference: OperationReference,
        delta: Delta,
    },
    Deactivate {
        reference: OperationReference,
    },
}

impl Operation {
    /// Suffix of the DID the operation applies to.
    pub fn unique_suffix(&self) -> Result<String, Error> {
        match self {
            Operation::Create { suffix_data, .. } => suffix_data.unique_suffix(SHA2_256),
            Operation::Update { reference, .. }
            | Operation::Recover { reference, .. }
            | Operation::Deactivate { reference } => Ok(reference.did_suffix.clone()),
        }
    }
}

fn delta(seed: u64) -> Delta {
    Delta {
        patches: vec![json!({
            "action": "add-services",
            "services": [{ "id": format!("service-{seed}"), "type": "LinkedDomains" }],
        })],
        update_commitment: format!("update-commitment-{seed}"),
    }
}

fn reference(did_suffix: &str, seed: u64) -> OperationReference {
    OperationReference {
        did_suffix: did_suffix.to_string(),
        reveal_value: Some(format!("reveal-{seed}")),
    }
}

/// A create with an inline delta, unique per `seed`.
pub fn create(seed: u64) -> Operation {
    Operation::Create {
        suffix_data: SuffixData {
            delta_hash: format!("delta-hash-{seed}"),
            recovery_commitment: format!("recovery-commitment-{seed}"),
            kind: None,
        },
        delta: Some(delta(seed)),
    }
}

/// An update of `did_suffix`.
pub fn update(did_suffix: &str, seed: u64) -> Operation {
    Operation::Update {
        reference: reference(did_suffix, seed),
        delta: delta(seed),
    }
}

/// A recover of `did_suffix`.
pub fn recover(did_suffix: &str, seed: u64) -> Operation {
    Operation::Recover {
        reference: reference(did_suffix, seed),
        delta: delta(seed),
    }
}

/// A deactivate of `did_suffix`.
pub fn deactivate(did_suffix: &str) -> Operation {
    Operation::Deactivate {
        reference: reference(did_suffix, 0),
    }
}

/// Writes batches to a [Cas] and anchors them on a [Ledger].
#[derive(Clone)]
pub struct BatchWriter {
    cas: Cas,
    ledger: Ledger,
    namespace: String,
    algorithm: Algorithm,
    chunks: usize,
}

impl BatchWriter {
    /// Create a writer that anchors under `namespace` using gzip and a single chunk file.
    pub fn new(cas: Cas, ledger: Ledger, namespace: &str) -> Self {
        Self {
            cas,
            ledger,
            namespace: namespace.to_string(),
            algorithm: Algorithm::Gzip,
            chunks: 1,
        }
    }

    /// Compress files with `algorithm`.
    pub fn algorithm(mut self, algorithm: Algorithm) -> Self {
        self.algorithm = algorithm;
        self
    }

    /// Spread deltas across (up to) `chunks` chunk files.
    pub fn chunks(mut self, chunks: usize) -> Self {
        self.chunks = chunks.max(1);
        self
    }

    /// Write the files of a batch containing `operations`, returning its anchor string.
    pub fn write(&self, operations: &[Operation]) -> Result<String, Error> {
        if operations.is_empty() {
            return Err(Error::InvalidAnchor("batch has no operations".into()));
        }

        // Sort operations into their groups
        let mut core = CoreOperations::default();
        let mut updates = Vec::new();
        let mut recover_deltas = Vec::new();
        let mut update_deltas = Vec::new();
        for operation in operations.iter().cloned() {
            match operation {
                Operation::Create { suffix_data, delta } => {
                    core.create.push(CreateReference { suffix_data, delta });
                }
                Operation::Recover { reference, delta } => {
                    core.recover.push(reference);
                    recover_deltas.push(delta);
                }
                Operation::Deactivate { reference } => core.deactivate.push(reference),
                Operation::Update { reference, delta } => {
                    updates.push(reference);
                    update_deltas.push(delta);
                }
            }
        }

        // Chunk files carry recover deltas, then update deltas
        let deltas: Vec<Delta> = recover_deltas.into_iter().chain(update_deltas).collect();
        let mut provisional_index_file_uri = None;
        if !deltas.is_empty() {
            let size = deltas.len().div_ceil(self.chunks);
            let chunks = deltas
                .chunks(size)
                .map(|deltas| {
                    let chunk_file_uri = self.store(&ChunkFile {
                        deltas: deltas.to_vec(),
                    })?;
                    Ok(ChunkReference { chunk_file_uri })
                })
                .collect::<Result<Vec<_>, Error>>()?;
            let provisional = ProvisionalIndexFile {
                chunks,
                operations: ProvisionalOperations {
                    update: updates,
                    ..Default::default()
                },
            };
            provisional_index_file_uri = Some(self.store(&provisional)?);
        }

        let core_index_file_uri = self.store(&CoreIndexFile {
            provisional_index_file_uri,
            operations: core,
        })?;
        Ok(format!("{}.{}", operations.len(), core_index_file_uri))
    }

    /// Write a batch containing `operations` and anchor it on the ledger.
    pub fn anchor(
        &self,
        operations: &[Operation],
        transaction_time: u64,
    ) -> Result<SidetreeTxn, Error> {
        let anchor_string = self.write(operations)?;
        let transaction_number = self
            .ledger
            .anchor(&self.namespace, &anchor_string, transaction_time);
        Ok(SidetreeTxn {
            namespace: self.namespace.clone(),
            anchor_string,
            transaction_number,
            transaction_time,
        })
    }

    fn store<T: Serialize>(&self, file: &T) -> Result<String, Error> {
        let raw = canonicalize(file)?;
        let compressed = compression::compress(self.algorithm, &raw)?;
        Ok(self.cas.write(&compressed))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{resolver, Protocol};

    #[tokio::test]
    async fn test_write_spreads_deltas_across_chunks() {
        let cas = Cas::default();
        let writer = BatchWriter::new(cas.clone(), Ledger::default(), "did:sidetree").chunks(2);
        let anchor = writer
            .write(&[
                update("a", 1),
                recover("b", 2),
                update("c", 3),
                deactivate("d"),
            ])
            .expect("Failed to write batch");
        assert!(anchor.starts_with("4."));

        let batch = resolver::Resolver::new(cas, resolver::Config::default())
            .resolve(&anchor, &Protocol::default())
            .await
            .expect("Failed to resolve anchor");
        assert_eq!(batch.recovers[0].delta, delta(2));
        assert_eq!(batch.updates[0].delta, delta(1));
        assert_eq!(batch.updates[1].delta, delta(3));
        assert_eq!(batch.deactivates[0].did_suffix, "d");
    }

    #[test]
    fn test_anchor_appends_to_ledger() {
        let ledger = Ledger::default();
        let writer = BatchWriter::new(Cas::default(), ledger.clone(), "did:sidetree");
        let first = writer.anchor(&[create(1)], 5).unwrap();
        let second = writer.anchor(&[create(2)], 6).unwrap();
        assert_eq!(first.transaction_number, 0);
        assert_eq!(second.transaction_number, 1);
        assert_eq!(ledger.transactions(), vec![first, second]);
    }

    #[test]
    fn test_write_rejects_empty_batch() {
        let writer = BatchWriter::new(Cas::default(), Ledger::default(), "did:sidetree");
        assert!(writer.write(&[]).is_err());
    }
}

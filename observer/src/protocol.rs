//! Protocol parameters in force at a given ledger time.

use crate::{compression::Algorithm, files::FileKind, Error};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// Default maximum size (in bytes) of any anchored file.
const MAX_FILE_SIZE: usize = 2_000_000;

/// Parameters that govern how anchored batches are encoded.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Protocol {
    /// Ledger time from which these parameters apply.
    pub genesis_time: u64,
    /// Multihash code of the hash algorithm used to derive suffixes.
    pub hash_algorithm_in_multihash_code: u64,
    /// Maximum number of operations a single anchor may declare.
    pub max_operation_count: u64,
    /// Name of the compression algorithm applied to every file.
    pub compression_algorithm: String,
    /// Maximum compressed size of a core index file.
    pub max_core_index_file_size: usize,
    /// Maximum compressed size of a provisional index file.
    pub max_provisional_index_file_size: usize,
    /// Maximum compressed size of a chunk file.
    pub max_chunk_file_size: usize,
    /// Maximum ratio between the decompressed and compressed size limits of a file.
    pub max_memory_decompression_factor: usize,
}

impl Default for Protocol {
    fn default() -> Self {
        Self {
            genesis_time: 0,
            hash_algorithm_in_multihash_code: crate::files::SHA2_256,
            max_operation_count: 10_000,
            compression_algorithm: "GZIP".to_string(),
            max_core_index_file_size: MAX_FILE_SIZE,
            max_provisional_index_file_size: MAX_FILE_SIZE,
            max_chunk_file_size: MAX_FILE_SIZE,
            max_memory_decompression_factor: 3,
        }
    }
}

impl Protocol {
    /// Compression algorithm selected by these parameters.
    pub fn compression(&self) -> Result<Algorithm, Error> {
        self.compression_algorithm.parse()
    }

    /// Maximum compressed size of a file of the given `kind`.
    pub fn max_file_size(&self, kind: FileKind) -> usize {
        match kind {
            FileKind::CoreIndex => self.max_core_index_file_size,
            FileKind::ProvisionalIndex => self.max_provisional_index_file_size,
            FileKind::Chunk => self.max_chunk_file_size,
        }
    }

    /// Maximum decompressed size of a file of the given `kind`.
    pub fn max_decompressed_size(&self, kind: FileKind) -> usize {
        self.max_file_size(kind)
            .saturating_mul(self.max_memory_decompression_factor)
    }
}

/// Lookup of the [Protocol] in force at a transaction time.
pub trait Protocols: Clone + Send + Sync + 'static {
    /// Returns the parameters that apply to a transaction recorded at `transaction_time`.
    fn get(&self, transaction_time: u64) -> Result<Protocol, Error>;
}

/// A set of protocol versions, each starting at its genesis time.
#[derive(Clone, Debug)]
pub struct Versions {
    versions: Arc<Vec<Protocol>>,
}

impl Versions {
    /// Create a new set of versions.
    ///
    /// Returns an error if no versions are provided or two versions share a genesis time.
    pub fn new(mut versions: Vec<Protocol>) -> Result<Self, Error> {
        if versions.is_empty() {
            return Err(Error::Config("at least one protocol version is required".into()));
        }
        versions.sort_by_key(|version| version.genesis_time);
        for pair in versions.windows(2) {
            if pair[0].genesis_time == pair[1].genesis_time {
                return Err(Error::Config(format!(
                    "duplicate protocol genesis time: {}",
                    pair[0].genesis_time
                )));
            }
        }
        for version in &versions {
            version.compression()?;
        }
        Ok(Self {
            versions: Arc::new(versions),
        })
    }

    /// Returns the most recent version.
    pub fn current(&self) -> &Protocol {
        // Non-empty by construction
        &self.versions[self.versions.len() - 1]
    }
}

impl Default for Versions {
    fn default() -> Self {
        Self {
            versions: Arc::new(vec![Protocol::default()]),
        }
    }
}

impl Protocols for Versions {
    fn get(&self, transaction_time: u64) -> Result<Protocol, Error> {
        self.versions
            .iter()
            .rev()
            .find(|version| transaction_time >= version.genesis_time)
            .cloned()
            .ok_or(Error::ProtocolNotFound(transaction_time))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn version(genesis_time: u64, compression: &str) -> Protocol {
        Protocol {
            genesis_time,
            compression_algorithm: compression.to_string(),
            ..Default::default()
        }
    }

    #[test]
    fn test_versions_select_by_time() {
        let versions = Versions::new(vec![version(100, "ZSTD"), version(10, "GZIP")])
            .expect("Failed to create versions");
        assert!(matches!(versions.get(0), Err(Error::ProtocolNotFound(0))));
        assert_eq!(versions.get(10).unwrap().compression_algorithm, "GZIP");
        assert_eq!(versions.get(99).unwrap().compression_algorithm, "GZIP");
        assert_eq!(versions.get(100).unwrap().compression_algorithm, "ZSTD");
        assert_eq!(versions.get(u64::MAX).unwrap().genesis_time, 100);
        assert_eq!(versions.current().genesis_time, 100);
    }

    #[test]
    fn test_versions_reject_invalid() {
        assert!(matches!(Versions::new(Vec::new()), Err(Error::Config(_))));
        assert!(matches!(
            Versions::new(vec![version(5, "GZIP"), version(5, "ZSTD")]),
            Err(Error::Config(_))
        ));
        assert!(matches!(
            Versions::new(vec![version(0, "BROTLI")]),
            Err(Error::UnsupportedCompression(_))
        ));
    }

    #[test]
    fn test_size_limits() {
        let protocol = Protocol {
            max_chunk_file_size: 10,
            max_memory_decompression_factor: 4,
            ..Default::default()
        };
        assert_eq!(protocol.max_file_size(FileKind::Chunk), 10);
        assert_eq!(protocol.max_decompressed_size(FileKind::Chunk), 40);
        assert_eq!(
            protocol.max_decompressed_size(FileKind::CoreIndex),
            MAX_FILE_SIZE * 4
        );
    }

    #[test]
    fn test_deserialize_with_defaults() {
        let protocol: Protocol =
            serde_json::from_str(r#"{"genesisTime": 7, "compressionAlgorithm": "ZSTD"}"#).unwrap();
        assert_eq!(protocol.genesis_time, 7);
        assert_eq!(protocol.compression().unwrap(), Algorithm::Zstd);
        assert_eq!(protocol.max_chunk_file_size, MAX_FILE_SIZE);
    }
}

//! Files that make up an anchored batch.
//!
//! An anchor string points at a core index file. The core index file lists creates (with their
//! suffix data), recovers and deactivates, and may reference a provisional index file. The
//! provisional index file lists updates and references the chunk files that carry the deltas of
//! every recover and update in the batch:
//!
//! ```text
//! core index file
//! ├── operations.create[]      (suffix data, optional inline delta)
//! ├── operations.recover[]
//! ├── operations.deactivate[]
//! └── provisionalIndexFileUri
//!     └── provisional index file
//!         ├── operations.update[]
//!         └── chunks[].chunkFileUri
//!             └── chunk file
//!                 └── deltas[]  (recovers first, then updates)
//! ```
//!
//! All files are JSON documents stored compressed in CAS.

use crate::Error;
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::{collections::BTreeMap, fmt};

/// Multihash code for sha2-256.
pub const SHA2_256: u64 = 0x12;

/// Length of a sha2-256 digest.
const SHA2_256_LENGTH: u8 = 32;

/// Kind of file in an anchored batch.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FileKind {
    CoreIndex,
    ProvisionalIndex,
    Chunk,
}

impl fmt::Display for FileKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FileKind::CoreIndex => f.write_str("core index file"),
            FileKind::ProvisionalIndex => f.write_str("provisional index file"),
            FileKind::Chunk => f.write_str("chunk file"),
        }
    }
}

/// Root of an anchored batch.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CoreIndexFile {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub provisional_index_file_uri: Option<String>,
    #[serde(default)]
    pub operations: CoreOperations,
}

/// Operations listed in a [CoreIndexFile].
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct CoreOperations {
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub create: Vec<CreateReference>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub recover: Vec<OperationReference>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub deactivate: Vec<OperationReference>,
    /// Operation groups this node does not understand.
    #[serde(flatten)]
    pub unsupported: BTreeMap<String, serde_json::Value>,
}

/// Index of updates and chunk files.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct ProvisionalIndexFile {
    #[serde(default)]
    pub chunks: Vec<ChunkReference>,
    #[serde(default)]
    pub operations: ProvisionalOperations,
}

/// Operations listed in a [ProvisionalIndexFile].
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct ProvisionalOperations {
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub update: Vec<OperationReference>,
    /// Operation groups this node does not understand.
    #[serde(flatten)]
    pub unsupported: BTreeMap<String, serde_json::Value>,
}

/// Reference to a chunk file.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChunkReference {
    pub chunk_file_uri: String,
}

/// Deltas for the recovers and updates of a batch.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct ChunkFile {
    #[serde(default)]
    pub deltas: Vec<Delta>,
}

/// A create listed in a [CoreIndexFile].
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateReference {
    pub suffix_data: SuffixData,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub delta: Option<Delta>,
}

/// A recover, deactivate or update listed in an index file.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OperationReference {
    pub did_suffix: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reveal_value: Option<String>,
}

/// Data from which the suffix of a created DID is derived.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SuffixData {
    pub delta_hash: String,
    pub recovery_commitment: String,
    #[serde(rename = "type", default, skip_serializing_if = "Option::is_none")]
    pub kind: Option<String>,
}

impl SuffixData {
    /// Derive the unique suffix of the DID created with this suffix data.
    ///
    /// The suffix is the unpadded base64url encoding of the multihash of the canonical JSON
    /// encoding (sorted keys, no whitespace) of the suffix data.
    pub fn unique_suffix(&self, multihash_code: u64) -> Result<String, Error> {
        if multihash_code != SHA2_256 {
            return Err(Error::UnsupportedHashAlgorithm(multihash_code));
        }
        let canonical = canonicalize(self)?;
        let mut multihash = vec![SHA2_256 as u8, SHA2_256_LENGTH];
        multihash.extend_from_slice(&Sha256::digest(&canonical));
        Ok(multibase::Base::Base64Url.encode(multihash))
    }
}

/// Patches to apply to a DID document and the commitment for the next update.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Delta {
    #[serde(default)]
    pub patches: Vec<serde_json::Value>,
    pub update_commitment: String,
}

/// Encode `value` as JSON with lexicographically sorted keys and no whitespace.
pub fn canonicalize<T: Serialize>(value: &T) -> Result<Vec<u8>, Error> {
    // Objects in `serde_json::Value` are backed by a sorted map
    let value = serde_json::to_value(value).map_err(|err| Error::Serialization(err.to_string()))?;
    serde_json::to_vec(&value).map_err(|err| Error::Serialization(err.to_string()))
}

/// Parse a decompressed file of the given `kind`.
pub fn parse<T: DeserializeOwned>(kind: FileKind, bytes: &[u8]) -> Result<T, Error> {
    serde_json::from_slice(bytes).map_err(|err| Error::Parse {
        file: kind,
        reason: err.to_string(),
    })
}

/// Number of records in an operation group (a group that is not an array counts as one).
pub fn records(group: &serde_json::Value) -> usize {
    match group {
        serde_json::Value::Array(records) => records.len(),
        _ => 1,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn suffix_data() -> SuffixData {
        SuffixData {
            delta_hash: "EiBkRSeixqX-PhOij6PIpuGfPld5Nif5MxcrgtGCw-t6LA".to_string(),
            recovery_commitment: "EiBfOZdMtU6OBw8Pk879QtZ-2J-9FbbjSZyoaA_bqD4zhA".to_string(),
            kind: None,
        }
    }

    #[test]
    fn test_parse_core_index_file() {
        let raw = json!({
            "provisionalIndexFileUri": "provisional",
            "operations": {
                "create": [{ "suffixData": { "deltaHash": "a", "recoveryCommitment": "b" } }],
                "recover": [{ "didSuffix": "c", "revealValue": "d" }],
                "deactivate": [{ "didSuffix": "e" }],
            }
        });
        let file: CoreIndexFile = parse(FileKind::CoreIndex, raw.to_string().as_bytes())
            .expect("Failed to parse core index file");
        assert_eq!(file.provisional_index_file_uri.as_deref(), Some("provisional"));
        assert_eq!(file.operations.create.len(), 1);
        assert_eq!(file.operations.create[0].suffix_data.delta_hash, "a");
        assert_eq!(file.operations.recover[0].reveal_value.as_deref(), Some("d"));
        assert_eq!(file.operations.deactivate[0].reveal_value, None);
        assert!(file.operations.unsupported.is_empty());
    }

    #[test]
    fn test_parse_collects_unsupported_groups() {
        let raw = json!({
            "operations": {
                "create": [{ "suffixData": { "deltaHash": "a", "recoveryCommitment": "b" } }],
                "migrate": [{ "didSuffix": "x" }, { "didSuffix": "y" }],
                "annotate": "z",
            }
        });
        let file: CoreIndexFile = parse(FileKind::CoreIndex, raw.to_string().as_bytes())
            .expect("Failed to parse core index file");
        assert_eq!(file.operations.create.len(), 1);
        assert_eq!(file.operations.unsupported.len(), 2);
        assert_eq!(records(&file.operations.unsupported["migrate"]), 2);
        assert_eq!(records(&file.operations.unsupported["annotate"]), 1);
    }

    #[test]
    fn test_parse_rejects_malformed() {
        let result = parse::<ChunkFile>(FileKind::Chunk, b"{\"deltas\": [");
        assert!(matches!(
            result,
            Err(Error::Parse {
                file: FileKind::Chunk,
                ..
            })
        ));

        // Deltas must carry an update commitment
        let result = parse::<ChunkFile>(FileKind::Chunk, br#"{"deltas":[{"patches":[]}]}"#);
        assert!(result.is_err());
    }

    #[test]
    fn test_canonicalize_sorts_keys() {
        let data = SuffixData {
            kind: Some("profile".to_string()),
            ..suffix_data()
        };
        let canonical = canonicalize(&data).unwrap();
        let expected = format!(
            r#"{{"deltaHash":"{}","recoveryCommitment":"{}","type":"profile"}}"#,
            data.delta_hash, data.recovery_commitment
        );
        assert_eq!(String::from_utf8(canonical).unwrap(), expected);
    }

    #[test]
    fn test_canonicalize_rejects_non_string_keys() {
        let mut data = BTreeMap::new();
        data.insert((1u8, 2u8), "value");
        let result = canonicalize(&data);
        assert!(matches!(result, Err(Error::Serialization(_))));
        assert!(!result.unwrap_err().is_malformed());
    }

    #[test]
    fn test_unique_suffix() {
        let data = suffix_data();
        let suffix = data.unique_suffix(SHA2_256).unwrap();

        // Multihash prefix (0x12 0x20) always encodes to "EiA"/"EiB"/"EiC"/"EiD"
        assert!(suffix.starts_with("Ei"));
        assert_eq!(suffix.len(), 46);
        assert!(!suffix.contains('='));

        // Stable across calls
        assert_eq!(suffix, data.unique_suffix(SHA2_256).unwrap());

        // Sensitive to content
        let other = SuffixData {
            delta_hash: "other".to_string(),
            ..suffix_data()
        };
        assert_ne!(suffix, other.unique_suffix(SHA2_256).unwrap());
    }

    #[test]
    fn test_unique_suffix_unsupported_hash() {
        let result = suffix_data().unique_suffix(0x13);
        assert!(matches!(result, Err(Error::UnsupportedHashAlgorithm(0x13))));
    }
}

//! Compression codecs used for anchored files.
//!
//! The algorithm is selected by name from the [crate::Protocol] in force when a file was
//! anchored. Decompression is always bounded: a payload that inflates beyond the caller's limit
//! is rejected before it is fully materialized.

use crate::Error;
use flate2::{read::GzDecoder, write::GzEncoder};
use std::{
    fmt,
    io::{Read, Write},
    str::FromStr,
};

/// Compression level used when writing `zstd` payloads.
const ZSTD_LEVEL: i32 = 3;

/// Supported compression algorithms.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Algorithm {
    Gzip,
    Zstd,
}

impl FromStr for Algorithm {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_uppercase().as_str() {
            "GZIP" => Ok(Algorithm::Gzip),
            "ZSTD" => Ok(Algorithm::Zstd),
            _ => Err(Error::UnsupportedCompression(s.to_string())),
        }
    }
}

impl fmt::Display for Algorithm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Algorithm::Gzip => f.write_str("GZIP"),
            Algorithm::Zstd => f.write_str("ZSTD"),
        }
    }
}

/// Compress `data` with `algorithm`.
pub fn compress(algorithm: Algorithm, data: &[u8]) -> Result<Vec<u8>, Error> {
    match algorithm {
        Algorithm::Gzip => {
            let mut encoder = GzEncoder::new(Vec::new(), flate2::Compression::default());
            encoder
                .write_all(data)
                .map_err(|err| Error::Compression(err.to_string()))?;
            encoder
                .finish()
                .map_err(|err| Error::Compression(err.to_string()))
        }
        Algorithm::Zstd => zstd::bulk::compress(data, ZSTD_LEVEL)
            .map_err(|err| Error::Compression(err.to_string())),
    }
}

/// Decompress `data` with `algorithm`, failing if the output would exceed `max_size` bytes.
pub fn decompress(algorithm: Algorithm, data: &[u8], max_size: usize) -> Result<Vec<u8>, Error> {
    let reader: Box<dyn Read + '_> = match algorithm {
        Algorithm::Gzip => Box::new(GzDecoder::new(data)),
        Algorithm::Zstd => Box::new(
            zstd::stream::read::Decoder::new(data)
                .map_err(|err| Error::Decompression(err.to_string()))?,
        ),
    };

    // Read one byte past the limit so oversized payloads are detected without inflating them
    let mut out = Vec::new();
    reader
        .take(max_size as u64 + 1)
        .read_to_end(&mut out)
        .map_err(|err| Error::Decompression(err.to_string()))?;
    if out.len() > max_size {
        return Err(Error::Decompression(format!(
            "decompressed size exceeds {max_size} bytes"
        )));
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use test_case::test_case;

    #[test_case(Algorithm::Gzip; "gzip")]
    #[test_case(Algorithm::Zstd; "zstd")]
    fn test_decompress_restores_payload(algorithm: Algorithm) {
        let payload = br#"{"deltas":[]}"#;
        let compressed = compress(algorithm, payload).expect("Failed to compress");
        let restored = decompress(algorithm, &compressed, 1024).expect("Failed to decompress");
        assert_eq!(restored, payload);
    }

    #[test_case(Algorithm::Gzip; "gzip")]
    #[test_case(Algorithm::Zstd; "zstd")]
    fn test_decompress_rejects_garbage(algorithm: Algorithm) {
        let result = decompress(algorithm, b"definitely not compressed", 1024);
        assert!(matches!(result, Err(Error::Decompression(_))));
    }

    #[test_case(Algorithm::Gzip; "gzip")]
    #[test_case(Algorithm::Zstd; "zstd")]
    fn test_decompress_enforces_limit(algorithm: Algorithm) {
        let payload = vec![b'a'; 4096];
        let compressed = compress(algorithm, &payload).expect("Failed to compress");

        // Exactly at the limit is fine
        assert!(decompress(algorithm, &compressed, 4096).is_ok());

        // One byte short is not
        let result = decompress(algorithm, &compressed, 4095);
        assert!(matches!(result, Err(Error::Decompression(_))));
    }

    #[test]
    fn test_algorithm_from_name() {
        assert_eq!("GZIP".parse::<Algorithm>().unwrap(), Algorithm::Gzip);
        assert_eq!("gzip".parse::<Algorithm>().unwrap(), Algorithm::Gzip);
        assert_eq!("ZSTD".parse::<Algorithm>().unwrap(), Algorithm::Zstd);
        assert!(matches!(
            "LZ4".parse::<Algorithm>(),
            Err(Error::UnsupportedCompression(name)) if name == "LZ4"
        ));
    }
}

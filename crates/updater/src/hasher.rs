use crate::error::{Result, UpdaterError};
use md5::Md5;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fmt;
use std::fs::File;
use std::io::{self, BufReader};
use std::path::Path;

const READ_BUFFER: usize = 64 * 1024;

/// Hex-encoded digest of a byte stream.
///
/// Equality is an exact string comparison: `"ABC"` and `"abc"` are different
/// digests. Digests computed locally are always lowercase.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ContentDigest(String);

impl ContentDigest {
    pub fn new(hex: impl Into<String>) -> Self {
        ContentDigest(hex.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ContentDigest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl PartialEq<str> for ContentDigest {
    fn eq(&self, other: &str) -> bool {
        self.0 == other
    }
}

/// Hash function used for content digests.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DigestAlgorithm {
    /// 128-bit MD5, matching the `md5` field published by existing manifests.
    #[default]
    Md5,
    Sha256,
}

impl DigestAlgorithm {
    /// Length of the hex encoding produced by this algorithm.
    pub fn hex_len(self) -> usize {
        match self {
            DigestAlgorithm::Md5 => 32,
            DigestAlgorithm::Sha256 => 64,
        }
    }

    /// Digest an in-memory buffer.
    pub fn digest_bytes(self, bytes: &[u8]) -> ContentDigest {
        let hex = match self {
            DigestAlgorithm::Md5 => hex::encode(Md5::digest(bytes)),
            DigestAlgorithm::Sha256 => hex::encode(Sha256::digest(bytes)),
        };
        ContentDigest(hex)
    }
}

/// Computes the content digest of a file on disk.
pub trait FileHasher: Send + Sync {
    fn digest(&self, path: &Path) -> Result<ContentDigest>;
}

/// Streaming [`FileHasher`] backed by RustCrypto hashers.
#[derive(Debug, Clone, Copy, Default)]
pub struct ContentHasher {
    algorithm: DigestAlgorithm,
}

impl ContentHasher {
    pub fn new(algorithm: DigestAlgorithm) -> Self {
        Self { algorithm }
    }

    pub fn algorithm(&self) -> DigestAlgorithm {
        self.algorithm
    }
}

impl FileHasher for ContentHasher {
    fn digest(&self, path: &Path) -> Result<ContentDigest> {
        let file = File::open(path).map_err(|err| UpdaterError::io(path, err))?;
        let mut reader = BufReader::with_capacity(READ_BUFFER, file);
        let hex = match self.algorithm {
            DigestAlgorithm::Md5 => stream_into(Md5::new(), &mut reader),
            DigestAlgorithm::Sha256 => stream_into(Sha256::new(), &mut reader),
        }
        .map_err(|err| UpdaterError::io(path, err))?;
        Ok(ContentDigest(hex))
    }
}

fn stream_into<D>(mut hasher: D, reader: &mut impl io::Read) -> io::Result<String>
where
    D: Digest + io::Write,
{
    io::copy(reader, &mut hasher)?;
    Ok(hex::encode(hasher.finalize()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::tempdir;

    #[test]
    fn md5_matches_known_vector() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("abc");
        fs::write(&path, b"abc").unwrap();

        let digest = ContentHasher::new(DigestAlgorithm::Md5)
            .digest(&path)
            .unwrap();
        assert_eq!(digest.as_str(), "900150983cd24fb0d6963f7d28e17f72");
    }

    #[test]
    fn sha256_matches_known_vector() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("abc");
        fs::write(&path, b"abc").unwrap();

        let digest = ContentHasher::new(DigestAlgorithm::Sha256)
            .digest(&path)
            .unwrap();
        assert_eq!(
            digest.as_str(),
            "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad"
        );
        assert_eq!(digest.as_str().len(), DigestAlgorithm::Sha256.hex_len());
    }

    #[test]
    fn digest_is_deterministic_across_buffer_boundaries() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("large");
        let payload: Vec<u8> = (0..(READ_BUFFER * 3 + 17)).map(|i| (i % 251) as u8).collect();
        fs::write(&path, &payload).unwrap();

        let hasher = ContentHasher::default();
        let first = hasher.digest(&path).unwrap();
        let second = hasher.digest(&path).unwrap();
        assert_eq!(first, second);
        assert_eq!(first, DigestAlgorithm::Md5.digest_bytes(&payload));
    }

    #[test]
    fn missing_file_is_io_failure() {
        let dir = tempdir().unwrap();
        let err = ContentHasher::default()
            .digest(&dir.path().join("absent"))
            .unwrap_err();
        assert!(matches!(err, UpdaterError::Io { .. }));
    }

    #[test]
    fn comparison_is_case_sensitive() {
        let lower = ContentDigest::new("abcdef");
        assert_ne!(lower, ContentDigest::new("ABCDEF"));
        assert!(lower == *"abcdef");
    }
}

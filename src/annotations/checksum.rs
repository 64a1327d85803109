// SHA-256 checksums of source files
//
// The checksum recorded for the measured binary's sources is compared with
// the bytes on disk before any source file is rewritten.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};

/// SHA-256 digest of a file's bytes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SourceChecksum([u8; 32]);

impl SourceChecksum {
    pub fn of_bytes(bytes: &[u8]) -> Self {
        let digest = Sha256::digest(bytes);
        let mut out = [0u8; 32];
        out.copy_from_slice(&digest);
        Self(out)
    }

    pub fn of_file(path: &Path) -> std::io::Result<Self> {
        fs::read(path).map(|bytes| Self::of_bytes(&bytes))
    }

    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }

    pub fn from_hex(text: &str) -> Result<Self> {
        let bytes = hex::decode(text.trim()).context("Checksum is not valid hex")?;
        let array: [u8; 32] = bytes
            .try_into()
            .map_err(|b: Vec<u8>| anyhow::anyhow!("Expected 32 checksum bytes, got {}", b.len()))?;
        Ok(Self(array))
    }
}

impl fmt::Display for SourceChecksum {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_hex())
    }
}

/// Checksums of source files recorded at build time
///
/// Stored as JSON:
///
/// ```json
/// { "files": { "benches/sorting.rs": "9f86d08...b0f00a08" } }
/// ```
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChecksumManifest {
    #[serde(default)]
    files: BTreeMap<PathBuf, String>,
}

impl ChecksumManifest {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let content = fs::read_to_string(path)
            .with_context(|| format!("Failed to read checksum manifest {}", path.display()))?;
        serde_json::from_str(&content).context("Invalid checksum manifest JSON")
    }

    /// Hash a file as it is now and record it
    pub fn record(&mut self, path: &Path) -> Result<SourceChecksum> {
        let checksum = SourceChecksum::of_file(path)
            .with_context(|| format!("Failed to hash {}", path.display()))?;
        self.files.insert(path.to_path_buf(), checksum.to_hex());
        Ok(checksum)
    }

    pub fn get(&self, path: &Path) -> Result<Option<SourceChecksum>> {
        self.files
            .get(path)
            .map(|hex| SourceChecksum::from_hex(hex))
            .transpose()
            .with_context(|| format!("Invalid checksum recorded for {}", path.display()))
    }

    pub fn to_json(&self) -> Result<String> {
        serde_json::to_string_pretty(self).context("Failed to serialize checksum manifest")
    }

    pub fn len(&self) -> usize {
        self.files.len()
    }

    pub fn is_empty(&self) -> bool {
        self.files.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_known_digest() {
        // sha256("test")
        assert_eq!(
            SourceChecksum::of_bytes(b"test").to_hex(),
            "9f86d081884c7d659a2feaa0c55ad015a3bf4f1b2b0b822cd15d6c15b0f00a08"
        );
    }

    #[test]
    fn test_hex_roundtrip_and_errors() {
        let checksum = SourceChecksum::of_bytes(b"fn main() {}");
        assert_eq!(SourceChecksum::from_hex(&checksum.to_hex()).unwrap(), checksum);
        assert!(SourceChecksum::from_hex("zz").is_err());
        assert!(SourceChecksum::from_hex("abcd").is_err());
    }

    #[test]
    fn test_manifest_record_and_reload() {
        let dir = TempDir::new().unwrap();
        let source = dir.path().join("bench.rs");
        fs::write(&source, "fn bench() {}\n").unwrap();

        let mut manifest = ChecksumManifest::new();
        let recorded = manifest.record(&source).unwrap();

        let manifest_path = dir.path().join("checksums.json");
        fs::write(&manifest_path, manifest.to_json().unwrap()).unwrap();

        let reloaded = ChecksumManifest::from_file(&manifest_path).unwrap();
        assert_eq!(reloaded.len(), 1);
        assert_eq!(reloaded.get(&source).unwrap(), Some(recorded));
        assert_eq!(reloaded.get(Path::new("missing.rs")).unwrap(), None);
    }
}

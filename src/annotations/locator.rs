// Source location lookup for measured methods
//
// The analyser and rewriter only depend on the `SourceLocator` trait. The
// production implementation reads DWARF debug info (see `dwarf.rs`);
// `FakeSourceLocator` serves tests and callers that already know where
// their benchmarks live.

use crate::annotations::SourceChecksum;
use crate::competition::MethodId;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Errors raised while resolving a method's source location
#[derive(Error, Debug)]
pub enum LocatorError {
    #[error("No symbol found for {method}")]
    SymbolNotFound { method: String },

    #[error("No source line information for {method} at {address:#x}")]
    NoLineInfo { method: String, address: u64 },

    #[error("Cannot compute checksum of {}: {source}", path.display())]
    Checksum {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Invalid checksum manifest: {0}")]
    Manifest(String),

    #[error("Source locator state is poisoned")]
    Poisoned,
}

/// Where a method's limit directive should be looked for
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceAnnotationInfo {
    /// Source file containing the method
    pub path: PathBuf,

    /// 1-based line of the method's definition
    pub method_line: u32,

    /// Checksum of the source file as it was when the measured binary was built
    pub checksum: SourceChecksum,
}

/// Resolves the source file and line of a measured method
pub trait SourceLocator {
    fn locate(&self, method: &MethodId) -> Result<SourceAnnotationInfo, LocatorError>;
}

/// In-memory locator with explicitly registered methods
#[derive(Debug, Clone, Default)]
pub struct FakeSourceLocator {
    entries: HashMap<MethodId, SourceAnnotationInfo>,
}

impl FakeSourceLocator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a method, snapshotting the file's current checksum
    pub fn with_file(
        mut self,
        method: &str,
        path: &Path,
        method_line: u32,
    ) -> Result<Self, LocatorError> {
        let checksum = SourceChecksum::of_file(path).map_err(|source| LocatorError::Checksum {
            path: path.to_path_buf(),
            source,
        })?;
        self.insert(
            MethodId::new(method),
            SourceAnnotationInfo {
                path: path.to_path_buf(),
                method_line,
                checksum,
            },
        );
        Ok(self)
    }

    pub fn insert(&mut self, method: MethodId, info: SourceAnnotationInfo) {
        self.entries.insert(method, info);
    }
}

impl SourceLocator for FakeSourceLocator {
    fn locate(&self, method: &MethodId) -> Result<SourceAnnotationInfo, LocatorError> {
        self.entries
            .get(method)
            .cloned()
            .ok_or_else(|| LocatorError::SymbolNotFound {
                method: method.to_string(),
            })
    }
}

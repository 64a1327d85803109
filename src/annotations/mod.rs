//! Persisted limit annotations
//!
//! Limits live either inline in source, as a directive above the benchmark
//! method:
//!
//! ```text
//! #[competition_bench(0.95, 1.20)]
//! fn quick_sort(b: &mut Bencher) { ... }
//! ```
//!
//! or in a sidecar TOML file shared by many methods. Both are loaded into an
//! [`AnnotationContext`], patched in memory, and flushed to disk in a single
//! [`ContextScope::save`] once every target of the pass has been processed.
//!
//! Source files are checksum-gated: a file that changed since the measured
//! binary was built is never rewritten.

mod checksum;
mod context;
mod directive;
mod dwarf;
mod locator;
mod rewriter;
mod run_log;
mod sidecar;

pub use checksum::{ChecksumManifest, SourceChecksum};
pub use context::{
    AnnotationContext, AnnotationDocument, ContentKind, ContextScope, DocumentContent,
    SaveOutcome, UNKNOWN_ORIGIN,
};
pub use directive::{
    find_directive, format_bound, parse_args, render_args, DirectiveArgs, DirectiveMatch,
    BASELINE_LITERAL, DIRECTIVE_NAME, EMPTY_LITERAL, IGNORED_LITERAL,
};
pub use dwarf::DwarfSourceLocator;
pub use locator::{FakeSourceLocator, LocatorError, SourceAnnotationInfo, SourceLocator};
pub use rewriter::{AnnotationRewriter, StoredLimits};
pub use run_log::{
    extract_blocks, parse_run_log, render_block, RunLogCache, BLOCK_END_MARKER,
    BLOCK_START_MARKER,
};
pub use sidecar::{CandidateLimits, SidecarLimits};

use crate::metrics::MetricError;
use std::path::PathBuf;
use thiserror::Error;

/// Errors raised while reading or rewriting annotations
#[derive(Error, Debug)]
pub enum AnnotationError {
    #[error("Annotation lock contract violated: {0}")]
    LockContract(String),

    #[error("Annotation context has been disposed")]
    Disposed,

    #[error("Document '{origin}' was loaded as {loaded:?}, cannot access it as {requested:?}")]
    ContentKindMismatch {
        origin: String,
        loaded: ContentKind,
        requested: ContentKind,
    },

    #[error("Cannot save the unknown-origin document: the target's source could not be resolved")]
    UnknownOrigin,

    #[error(
        "Checksum mismatch for {}: file changed since the measured binary was built \
         (expected {expected}, found {actual})",
        path.display()
    )]
    ChecksumMismatch {
        path: PathBuf,
        expected: String,
        actual: String,
    },

    #[error("{} was modified on disk while limits were being updated", path.display())]
    ConcurrentModification { path: PathBuf },

    #[error(
        "No #[{}] directive found above line {line} of {} for {method}",
        DIRECTIVE_NAME,
        path.display()
    )]
    DirectiveNotFound {
        path: PathBuf,
        line: u32,
        method: String,
    },

    #[error("Invalid directive at {}:{line}: {reason}", path.display())]
    InvalidDirective {
        path: PathBuf,
        line: usize,
        reason: String,
    },

    #[error("Invalid limits file {origin}: {reason}")]
    InvalidSidecar { origin: String, reason: String },

    #[error("Unsupported run log location '{0}': expected a path or file:// URI")]
    UnsupportedRunLog(String),

    #[error("Failed to parse TOML in {origin}: {source}")]
    TomlParse {
        origin: String,
        #[source]
        source: toml_edit::TomlError,
    },

    #[error("I/O error on {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error(transparent)]
    Locator(#[from] LocatorError),

    #[error(transparent)]
    Metric(#[from] MetricError),
}

impl AnnotationError {
    pub(crate) fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }

    /// Errors that must abort the whole pass rather than a single target
    pub fn is_critical(&self) -> bool {
        matches!(self, Self::LockContract(_) | Self::Disposed)
    }
}

//! Limits exchanged through a previous run's log output
//!
//! A run that adjusted limits prints a block like
//!
//! ```text
//! ----- limitador limits begin -----
//! [[competition]]
//! target = "benches::sorting"
//!
//! [[competition.candidate]]
//! target = "quick_sort"
//! min_ratio = 0.95
//! max_ratio = 1.2
//! ----- limitador limits end -----
//! ```
//!
//! A later run can seed its limits from that log. The payload uses the
//! sidecar schema.

use super::{AnnotationError, SidecarLimits};
use crate::competition::CompetitionTarget;
use crate::metrics::MetricInfo;
use std::collections::HashMap;
use std::fs;
use std::path::PathBuf;
use std::sync::Arc;
use toml_edit::DocumentMut;
use url::Url;

pub const BLOCK_START_MARKER: &str = "----- limitador limits begin -----";
pub const BLOCK_END_MARKER: &str = "----- limitador limits end -----";

const FILE_SCHEME: &str = "file";

/// Payloads of every complete block in `text`
pub fn extract_blocks(text: &str) -> Vec<String> {
    let mut blocks = Vec::new();
    let mut current: Option<String> = None;

    for line in text.lines() {
        match line.trim() {
            BLOCK_START_MARKER => {
                if current.is_some() {
                    tracing::warn!("Run log block started before the previous one ended");
                }
                current = Some(String::new());
            }
            BLOCK_END_MARKER => match current.take() {
                Some(block) => blocks.push(block),
                None => tracing::warn!("Run log block end without a start marker"),
            },
            _ => {
                if let Some(block) = current.as_mut() {
                    block.push_str(line);
                    block.push('\n');
                }
            }
        }
    }

    if current.is_some() {
        tracing::warn!("Ignoring unterminated run log block");
    }
    blocks
}

/// Limits from every block of a run log, in log order
pub fn parse_run_log(
    origin: &str,
    text: &str,
    metrics: &[Arc<MetricInfo>],
) -> Result<SidecarLimits, AnnotationError> {
    let mut limits = SidecarLimits::new();
    for block in extract_blocks(text) {
        let document = block
            .parse::<DocumentMut>()
            .map_err(|source| AnnotationError::TomlParse {
                origin: origin.to_string(),
                source,
            })?;
        let parsed =
            SidecarLimits::parse(&document, metrics).map_err(|reason| AnnotationError::InvalidSidecar {
                origin: origin.to_string(),
                reason,
            })?;
        limits.extend(parsed);
    }
    Ok(limits)
}

/// Render the limits of `targets` as a run log block
///
/// Baseline targets and empty ranges are skipped.
pub fn render_block(targets: &[CompetitionTarget]) -> Result<String, AnnotationError> {
    let mut document = DocumentMut::new();
    for target in targets.iter().filter(|t| !t.is_baseline()) {
        for value in target.metric_values() {
            let range = value.values_range();
            if range.is_empty() {
                continue;
            }
            SidecarLimits::patch(&mut document, target.method(), value.metric(), &range).map_err(
                |reason| AnnotationError::InvalidSidecar {
                    origin: "run log".to_string(),
                    reason,
                },
            )?;
        }
    }

    Ok(format!(
        "{}\n{}{}\n",
        BLOCK_START_MARKER, document, BLOCK_END_MARKER
    ))
}

/// Local path for a run log location: a plain path, or a `file://` URI
/// with percent-escapes decoded
fn resolve_location(location: &str) -> Result<PathBuf, AnnotationError> {
    if !location.contains("://") {
        return Ok(PathBuf::from(location));
    }

    let unsupported = || AnnotationError::UnsupportedRunLog(location.to_string());
    let url = Url::parse(location).map_err(|_| unsupported())?;
    if url.scheme() != FILE_SCHEME {
        return Err(unsupported());
    }
    url.to_file_path().map_err(|()| unsupported())
}

/// Run log texts read during a session, keyed by location
#[derive(Debug, Default)]
pub struct RunLogCache {
    texts: HashMap<String, Arc<str>>,
}

impl RunLogCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Read a run log once; later calls return the cached text
    pub fn read(&mut self, location: &str) -> Result<Arc<str>, AnnotationError> {
        if let Some(text) = self.texts.get(location) {
            return Ok(Arc::clone(text));
        }

        let path = resolve_location(location)?;
        let text: Arc<str> = fs::read_to_string(&path)
            .map_err(|e| AnnotationError::io(&path, e))?
            .into();
        tracing::debug!("Read run log {} ({} bytes)", location, text.len());
        self.texts.insert(location.to_string(), Arc::clone(&text));
        Ok(text)
    }

    /// Read and parse a run log
    pub fn load(
        &mut self,
        location: &str,
        metrics: &[Arc<MetricInfo>],
    ) -> Result<SidecarLimits, AnnotationError> {
        let text = self.read(location)?;
        parse_run_log(location, &text, metrics)
    }

    pub fn len(&self) -> usize {
        self.texts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.texts.is_empty()
    }

    /// Forget every cached log
    pub fn reset(&mut self) {
        self.texts.clear();
    }
}

//! Per-pass cache of annotation documents
//!
//! An [`AnnotationContext`] owns every document loaded during one analysis
//! pass. All access goes through a [`ContextScope`], which only exists inside
//! [`AnnotationContext::run_in_context`] while the context mutex is held.
//! Re-entering the context on the same thread fails fast instead of
//! deadlocking.

use super::{AnnotationError, SourceChecksum};
use std::collections::HashMap;
use std::fs;
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use std::thread::{self, ThreadId};
use tempfile::NamedTempFile;
use toml_edit::DocumentMut;

/// Origin key of the stub document used when a target's source is unknown
pub const UNKNOWN_ORIGIN: &str = "<unknown>";

/// How a document's content was loaded
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContentKind {
    Lines,
    Tree,
    Unknown,
}

/// Document content, fixed at first load
#[derive(Debug, Clone)]
pub enum DocumentContent {
    /// Source text, one entry per line with its terminator kept
    Lines(Vec<String>),
    /// Parsed sidecar TOML, formatting and comments included
    Tree(DocumentMut),
    Unknown,
}

impl DocumentContent {
    pub fn kind(&self) -> ContentKind {
        match self {
            Self::Lines(_) => ContentKind::Lines,
            Self::Tree(_) => ContentKind::Tree,
            Self::Unknown => ContentKind::Unknown,
        }
    }

    fn render(&self) -> Option<String> {
        match self {
            Self::Lines(lines) => Some(lines.concat()),
            Self::Tree(document) => Some(document.to_string()),
            Self::Unknown => None,
        }
    }
}

/// One cached document
#[derive(Debug, Clone)]
pub struct AnnotationDocument {
    origin: String,
    path: Option<PathBuf>,
    content: DocumentContent,
    /// Checksum of the bytes first read from disk; `None` if the file did
    /// not exist
    initial_checksum: Option<SourceChecksum>,
    /// Checksum of the bytes last read or written
    loaded_checksum: Option<SourceChecksum>,
    dirty: bool,
}

impl AnnotationDocument {
    fn new(
        origin: String,
        path: Option<PathBuf>,
        content: DocumentContent,
        loaded_checksum: Option<SourceChecksum>,
    ) -> Self {
        Self {
            origin,
            path,
            content,
            initial_checksum: loaded_checksum,
            loaded_checksum,
            dirty: false,
        }
    }

    pub fn origin(&self) -> &str {
        &self.origin
    }

    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    pub fn content(&self) -> &DocumentContent {
        &self.content
    }

    pub fn kind(&self) -> ContentKind {
        self.content.kind()
    }

    /// Checksum of the file as first loaded in this context, unaffected by
    /// later saves
    pub fn initial_checksum(&self) -> Option<SourceChecksum> {
        self.initial_checksum
    }

    pub fn loaded_checksum(&self) -> Option<SourceChecksum> {
        self.loaded_checksum
    }

    pub fn is_dirty(&self) -> bool {
        self.dirty
    }

    pub fn mark_dirty(&mut self) {
        self.dirty = true;
    }

    pub fn lines(&self) -> Option<&[String]> {
        match &self.content {
            DocumentContent::Lines(lines) => Some(lines),
            _ => None,
        }
    }

    /// Replace one line, keeping its original terminator. Returns whether
    /// the content changed.
    pub fn replace_line(&mut self, index: usize, text: &str) -> bool {
        let DocumentContent::Lines(lines) = &mut self.content else {
            return false;
        };
        let Some(line) = lines.get_mut(index) else {
            return false;
        };

        let terminator = line_terminator(line);
        let replacement = format!("{}{}", text.trim_end_matches(['\r', '\n']), terminator);
        if *line == replacement {
            return false;
        }
        *line = replacement;
        self.dirty = true;
        true
    }

    pub fn tree(&self) -> Option<&DocumentMut> {
        match &self.content {
            DocumentContent::Tree(document) => Some(document),
            _ => None,
        }
    }

    /// Mutable access to the tree; the caller marks the document dirty
    pub fn tree_mut(&mut self) -> Option<&mut DocumentMut> {
        match &mut self.content {
            DocumentContent::Tree(document) => Some(document),
            _ => None,
        }
    }
}

fn line_terminator(line: &str) -> &'static str {
    if line.ends_with("\r\n") {
        "\r\n"
    } else if line.ends_with('\n') {
        "\n"
    } else {
        ""
    }
}

/// Result of [`ContextScope::save`]
#[derive(Debug, Default)]
pub struct SaveOutcome {
    /// Origins written to disk
    pub saved: Vec<String>,
    /// Origins that could not be written, with the reason
    pub failed: Vec<(String, AnnotationError)>,
}

impl SaveOutcome {
    pub fn is_success(&self) -> bool {
        self.failed.is_empty()
    }

    pub fn failure_for(&self, origin: &str) -> Option<&AnnotationError> {
        self.failed
            .iter()
            .find(|(failed, _)| failed == origin)
            .map(|(_, error)| error)
    }
}

#[derive(Debug, Default)]
struct ContextState {
    documents_by_origin: HashMap<String, AnnotationDocument>,
    origins_by_target_key: HashMap<String, String>,
    disposed: bool,
}

/// Document cache for one analysis pass
#[derive(Debug, Default)]
pub struct AnnotationContext {
    state: Mutex<ContextState>,
    owner: Mutex<Option<ThreadId>>,
}

impl AnnotationContext {
    pub fn new() -> Self {
        Self::default()
    }

    /// Run `f` with exclusive access to the context
    pub fn run_in_context<R, F>(&self, f: F) -> Result<R, AnnotationError>
    where
        F: FnOnce(&mut ContextScope<'_>) -> Result<R, AnnotationError>,
    {
        if self.is_held_by_current_thread()? {
            return Err(AnnotationError::LockContract(
                "run_in_context re-entered on the owning thread".to_string(),
            ));
        }

        let mut state = self
            .state
            .lock()
            .map_err(|_| AnnotationError::LockContract("context mutex is poisoned".to_string()))?;
        if state.disposed {
            return Err(AnnotationError::Disposed);
        }

        let _owner = OwnerGuard::acquire(&self.owner)?;
        let mut scope = ContextScope {
            state: &mut *state,
            owner: &self.owner,
        };
        f(&mut scope)
    }

    /// Drop every cached document; later use fails with `Disposed`
    pub fn dispose(&self) -> Result<(), AnnotationError> {
        if self.is_held_by_current_thread()? {
            return Err(AnnotationError::LockContract(
                "cannot dispose the context from inside run_in_context".to_string(),
            ));
        }
        let mut state = self
            .state
            .lock()
            .map_err(|_| AnnotationError::LockContract("context mutex is poisoned".to_string()))?;
        let dropped = state.documents_by_origin.len();
        state.documents_by_origin.clear();
        state.origins_by_target_key.clear();
        state.disposed = true;
        tracing::debug!("Disposed annotation context ({} documents)", dropped);
        Ok(())
    }

    pub fn is_disposed(&self) -> bool {
        self.state.lock().map(|state| state.disposed).unwrap_or(true)
    }

    fn is_held_by_current_thread(&self) -> Result<bool, AnnotationError> {
        held_by_current_thread(&self.owner)
    }
}

fn held_by_current_thread(owner: &Mutex<Option<ThreadId>>) -> Result<bool, AnnotationError> {
    let owner = owner
        .lock()
        .map_err(|_| AnnotationError::LockContract("owner mutex is poisoned".to_string()))?;
    Ok(*owner == Some(thread::current().id()))
}

/// Records the owning thread for the lifetime of a scope, also on unwind
struct OwnerGuard<'a> {
    owner: &'a Mutex<Option<ThreadId>>,
}

impl<'a> OwnerGuard<'a> {
    fn acquire(owner: &'a Mutex<Option<ThreadId>>) -> Result<Self, AnnotationError> {
        let mut slot = owner
            .lock()
            .map_err(|_| AnnotationError::LockContract("owner mutex is poisoned".to_string()))?;
        *slot = Some(thread::current().id());
        Ok(Self { owner })
    }
}

impl Drop for OwnerGuard<'_> {
    fn drop(&mut self) {
        if let Ok(mut slot) = self.owner.lock() {
            *slot = None;
        }
    }
}

/// Access to the context's documents while its lock is held
pub struct ContextScope<'a> {
    state: &'a mut ContextState,
    owner: &'a Mutex<Option<ThreadId>>,
}

impl ContextScope<'_> {
    /// Fails with [`AnnotationError::LockContract`] unless the calling
    /// thread is the one running [`AnnotationContext::run_in_context`]
    fn ensure_held(&self) -> Result<(), AnnotationError> {
        if held_by_current_thread(self.owner)? {
            Ok(())
        } else {
            Err(AnnotationError::LockContract(
                "annotation context accessed from a thread that does not hold it".to_string(),
            ))
        }
    }

    pub fn try_get_document(&self, origin: &str) -> Option<&AnnotationDocument> {
        self.state.documents_by_origin.get(origin)
    }

    pub fn try_get_document_mut(&mut self, origin: &str) -> Option<&mut AnnotationDocument> {
        self.state.documents_by_origin.get_mut(origin)
    }

    /// Document previously bound to a target key
    pub fn try_get_document_for_target(&self, target_key: &str) -> Option<&AnnotationDocument> {
        let origin = self.state.origins_by_target_key.get(target_key)?;
        self.state.documents_by_origin.get(origin)
    }

    pub fn bind_target(&mut self, target_key: &str, origin: &str) {
        self.state
            .origins_by_target_key
            .insert(target_key.to_string(), origin.to_string());
    }

    pub fn document_count(&self) -> usize {
        self.state.documents_by_origin.len()
    }

    /// Load a source file as lines, once per origin
    pub fn load_lines(&mut self, path: &Path) -> Result<&mut AnnotationDocument, AnnotationError> {
        self.ensure_held()?;
        let origin = origin_of(path);
        if !self.state.documents_by_origin.contains_key(&origin) {
            let bytes = fs::read(path).map_err(|e| AnnotationError::io(path, e))?;
            let checksum = SourceChecksum::of_bytes(&bytes);
            let text = String::from_utf8(bytes).map_err(|e| {
                AnnotationError::io(path, std::io::Error::new(ErrorKind::InvalidData, e))
            })?;
            let lines = text.split_inclusive('\n').map(str::to_string).collect();
            tracing::debug!("Loaded source document {}", origin);
            self.insert(AnnotationDocument::new(
                origin.clone(),
                Some(path.to_path_buf()),
                DocumentContent::Lines(lines),
                Some(checksum),
            ));
        }
        self.cached(&origin, ContentKind::Lines)
    }

    /// Load a sidecar TOML file, once per origin. A missing file loads as an
    /// empty tree.
    pub fn load_tree(&mut self, path: &Path) -> Result<&mut AnnotationDocument, AnnotationError> {
        self.ensure_held()?;
        let origin = origin_of(path);
        if !self.state.documents_by_origin.contains_key(&origin) {
            let (document, checksum) = match fs::read(path) {
                Ok(bytes) => {
                    let checksum = SourceChecksum::of_bytes(&bytes);
                    let text = String::from_utf8(bytes).map_err(|e| {
                        AnnotationError::io(path, std::io::Error::new(ErrorKind::InvalidData, e))
                    })?;
                    let document = text
                        .parse::<DocumentMut>()
                        .map_err(|source| AnnotationError::TomlParse {
                            origin: origin.clone(),
                            source,
                        })?;
                    (document, Some(checksum))
                }
                Err(e) if e.kind() == ErrorKind::NotFound => (DocumentMut::new(), None),
                Err(e) => return Err(AnnotationError::io(path, e)),
            };
            tracing::debug!("Loaded limits document {}", origin);
            self.insert(AnnotationDocument::new(
                origin.clone(),
                Some(path.to_path_buf()),
                DocumentContent::Tree(document),
                checksum,
            ));
        }
        self.cached(&origin, ContentKind::Tree)
    }

    /// Stub document for targets whose source could not be resolved
    pub fn unknown_origin_document(&mut self) -> &mut AnnotationDocument {
        self.state
            .documents_by_origin
            .entry(UNKNOWN_ORIGIN.to_string())
            .or_insert_with(|| {
                AnnotationDocument::new(
                    UNKNOWN_ORIGIN.to_string(),
                    None,
                    DocumentContent::Unknown,
                    None,
                )
            })
    }

    /// Write every dirty document to disk
    pub fn save(&mut self) -> SaveOutcome {
        let mut outcome = SaveOutcome::default();

        let mut origins: Vec<String> = self
            .state
            .documents_by_origin
            .values()
            .filter(|document| document.dirty)
            .map(|document| document.origin.clone())
            .collect();
        origins.sort();

        for origin in origins {
            let Some(document) = self.state.documents_by_origin.get_mut(&origin) else {
                continue;
            };
            match write_document(document) {
                Ok(checksum) => {
                    document.loaded_checksum = Some(checksum);
                    document.dirty = false;
                    tracing::info!("Saved limits to {}", origin);
                    outcome.saved.push(origin);
                }
                Err(error) => {
                    tracing::warn!("Failed to save {}: {}", origin, error);
                    outcome.failed.push((origin, error));
                }
            }
        }

        outcome
    }

    fn insert(&mut self, document: AnnotationDocument) {
        self.state
            .documents_by_origin
            .insert(document.origin.clone(), document);
    }

    fn cached(
        &mut self,
        origin: &str,
        requested: ContentKind,
    ) -> Result<&mut AnnotationDocument, AnnotationError> {
        let document = self
            .state
            .documents_by_origin
            .get_mut(origin)
            .ok_or(AnnotationError::UnknownOrigin)?;
        if document.kind() != requested {
            return Err(AnnotationError::ContentKindMismatch {
                origin: origin.to_string(),
                loaded: document.kind(),
                requested,
            });
        }
        Ok(document)
    }
}

/// Cache key of a file: its canonical path, so different spellings of one
/// file share a document. A file that does not exist yet is keyed by its
/// canonical parent directory; failing that, by the path as given.
fn origin_of(path: &Path) -> String {
    if let Ok(canonical) = fs::canonicalize(path) {
        return canonical.display().to_string();
    }
    let parent = match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent,
        _ => Path::new("."),
    };
    match (fs::canonicalize(parent), path.file_name()) {
        (Ok(dir), Some(name)) => dir.join(name).display().to_string(),
        _ => path.display().to_string(),
    }
}

/// Re-check the on-disk bytes, then replace the file via temp file + rename
fn write_document(document: &AnnotationDocument) -> Result<SourceChecksum, AnnotationError> {
    let path = document.path.as_deref().ok_or(AnnotationError::UnknownOrigin)?;
    let content = document.content.render().ok_or(AnnotationError::UnknownOrigin)?;

    let on_disk = match fs::read(path) {
        Ok(bytes) => Some(SourceChecksum::of_bytes(&bytes)),
        Err(e) if e.kind() == ErrorKind::NotFound => None,
        Err(e) => return Err(AnnotationError::io(path, e)),
    };
    if on_disk != document.loaded_checksum {
        return Err(AnnotationError::ConcurrentModification {
            path: path.to_path_buf(),
        });
    }

    let dir = match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent,
        _ => Path::new("."),
    };
    fs::create_dir_all(dir).map_err(|e| AnnotationError::io(dir, e))?;

    let mut temp_file = NamedTempFile::new_in(dir).map_err(|e| AnnotationError::io(dir, e))?;
    temp_file
        .write_all(content.as_bytes())
        .map_err(|e| AnnotationError::io(temp_file.path().to_path_buf(), e))?;
    temp_file
        .as_file()
        .sync_all()
        .map_err(|e| AnnotationError::io(temp_file.path().to_path_buf(), e))?;
    temp_file
        .persist(path)
        .map_err(|e| AnnotationError::io(path, e.error))?;

    Ok(SourceChecksum::of_bytes(content.as_bytes()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn write(dir: &TempDir, name: &str, content: &str) -> PathBuf {
        let path = dir.path().join(name);
        fs::write(&path, content).unwrap();
        path
    }

    #[test]
    fn test_documents_are_loaded_once_per_origin() {
        let dir = TempDir::new().unwrap();
        let path = write(&dir, "bench.rs", "fn a() {}\r\nfn b() {}\n");
        let context = AnnotationContext::new();

        context
            .run_in_context(|scope| {
                let document = scope.load_lines(&path)?;
                assert_eq!(
                    document.lines().unwrap(),
                    &["fn a() {}\r\n".to_string(), "fn b() {}\n".to_string()]
                );
                document.replace_line(1, "fn c() {}");

                // Second load returns the cached, modified document
                let again = scope.load_lines(&path)?;
                assert_eq!(again.lines().unwrap()[1], "fn c() {}\n");
                assert_eq!(scope.document_count(), 1);
                Ok(())
            })
            .unwrap();
    }

    #[test]
    fn test_content_kind_is_fixed_at_first_load() {
        let dir = TempDir::new().unwrap();
        let path = write(&dir, "limits.toml", "");
        let context = AnnotationContext::new();

        let result = context.run_in_context(|scope| {
            scope.load_tree(&path)?;
            scope.load_lines(&path).map(|_| ())
        });
        assert!(matches!(
            result,
            Err(AnnotationError::ContentKindMismatch {
                loaded: ContentKind::Tree,
                requested: ContentKind::Lines,
                ..
            })
        ));
    }

    #[test]
    fn test_reentrant_access_fails_fast() {
        let context = AnnotationContext::new();
        let inner = context
            .run_in_context(|scope| {
                scope.ensure_held()?;
                Ok(context.run_in_context(|_| Ok(())))
            })
            .unwrap();
        assert!(matches!(inner, Err(AnnotationError::LockContract(_))));

        // Released after the callback returns
        assert!(context.run_in_context(|_| Ok(())).is_ok());
    }

    #[test]
    fn test_scope_used_from_another_thread_fails_fast() {
        let dir = TempDir::new().unwrap();
        let path = write(&dir, "bench.rs", "fn a() {}\n");
        let context = AnnotationContext::new();

        context
            .run_in_context(|scope| {
                let result = thread::scope(|threads| {
                    threads
                        .spawn(|| scope.load_lines(&path).map(|_| ()))
                        .join()
                        .unwrap()
                });
                assert!(matches!(result, Err(AnnotationError::LockContract(_))));
                assert_eq!(scope.document_count(), 0);
                Ok(())
            })
            .unwrap();
    }

    #[test]
    fn test_different_spellings_share_one_document() {
        let dir = TempDir::new().unwrap();
        let path = write(&dir, "bench.rs", "fn a() {}\n");
        fs::create_dir(dir.path().join("sub")).unwrap();
        let detour = dir.path().join("sub").join("..").join("bench.rs");
        let sidecar = dir.path().join("limits.toml");
        let sidecar_detour = dir.path().join(".").join("limits.toml");
        let context = AnnotationContext::new();

        context
            .run_in_context(|scope| {
                scope.load_lines(&path)?.replace_line(0, "fn b() {}");
                assert_eq!(scope.load_lines(&detour)?.lines().unwrap()[0], "fn b() {}\n");

                // Not on disk yet
                let origin = scope.load_tree(&sidecar)?.origin().to_string();
                assert_eq!(scope.load_tree(&sidecar_detour)?.origin(), origin);
                assert_eq!(scope.document_count(), 2);
                Ok(())
            })
            .unwrap();
    }

    #[test]
    fn test_disposed_context_rejects_use() {
        let context = AnnotationContext::new();
        context.run_in_context(|scope| {
            scope.unknown_origin_document();
            Ok(())
        })
        .unwrap();

        context.dispose().unwrap();
        assert!(context.is_disposed());
        assert!(matches!(
            context.run_in_context(|_| Ok(())),
            Err(AnnotationError::Disposed)
        ));
    }

    #[test]
    fn test_save_writes_only_dirty_documents() {
        let dir = TempDir::new().unwrap();
        let clean = write(&dir, "clean.rs", "fn a() {}\n");
        let dirty = write(&dir, "dirty.rs", "fn a() {}\n");
        let context = AnnotationContext::new();

        let outcome = context
            .run_in_context(|scope| {
                scope.load_lines(&clean)?;
                scope.load_lines(&dirty)?.replace_line(0, "fn b() {}");
                Ok(scope.save())
            })
            .unwrap();

        assert!(outcome.is_success());
        assert_eq!(outcome.saved, vec![origin_of(&dirty)]);
        assert_eq!(fs::read_to_string(&dirty).unwrap(), "fn b() {}\n");
        assert_eq!(fs::read_to_string(&clean).unwrap(), "fn a() {}\n");
    }

    #[test]
    fn test_save_detects_concurrent_modification() {
        let dir = TempDir::new().unwrap();
        let path = write(&dir, "bench.rs", "fn a() {}\n");
        let context = AnnotationContext::new();

        let outcome = context
            .run_in_context(|scope| {
                scope.load_lines(&path)?.replace_line(0, "fn b() {}");
                fs::write(&path, "fn edited() {}\n").unwrap();
                Ok(scope.save())
            })
            .unwrap();

        assert!(matches!(
            outcome.failure_for(&origin_of(&path)),
            Some(AnnotationError::ConcurrentModification { .. })
        ));
        assert_eq!(fs::read_to_string(&path).unwrap(), "fn edited() {}\n");
    }

    #[test]
    fn test_missing_sidecar_is_created_on_save() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("limits").join("bench.toml");
        let context = AnnotationContext::new();

        context
            .run_in_context(|scope| {
                let document = scope.load_tree(&path)?;
                assert!(document.tree().unwrap().is_empty());
                document
                    .tree_mut()
                    .unwrap()
                    .insert("version", toml_edit::value(1));
                document.mark_dirty();
                assert!(scope.save().is_success());
                Ok(())
            })
            .unwrap();

        assert_eq!(fs::read_to_string(&path).unwrap().trim(), "version = 1");
    }

    #[test]
    fn test_dirty_unknown_origin_cannot_be_saved() {
        let context = AnnotationContext::new();
        let outcome = context
            .run_in_context(|scope| {
                scope.unknown_origin_document().mark_dirty();
                Ok(scope.save())
            })
            .unwrap();
        assert!(matches!(
            outcome.failure_for(UNKNOWN_ORIGIN),
            Some(AnnotationError::UnknownOrigin)
        ));
    }

    #[test]
    fn test_target_binding_lookup() {
        let dir = TempDir::new().unwrap();
        let path = write(&dir, "bench.rs", "fn a() {}\n");
        let context = AnnotationContext::new();

        context
            .run_in_context(|scope| {
                assert!(scope.try_get_document_for_target("bench::a").is_none());
                scope.load_lines(&path)?;
                scope.bind_target("bench::a", &origin_of(&path));
                let document = scope.try_get_document_for_target("bench::a").unwrap();
                assert_eq!(document.path(), Some(path.as_path()));
                assert!(scope.try_get_document(&origin_of(&path)).is_some());
                Ok(())
            })
            .unwrap();
    }
}

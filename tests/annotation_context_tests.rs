//! Annotation context: locking, disposal and safe persistence
//!
//! These exercise the public context API directly, outside a competition
//! pass, the way an embedding harness would.

use limitador::annotations::{AnnotationContext, AnnotationError, ContentKind};
use std::fs;
use std::sync::Arc;
use std::thread;
use tempfile::TempDir;

const SOURCE: &str = "fn a() {}\nfn b() {}\nfn c() {}\n";

fn write_source() -> (TempDir, std::path::PathBuf) {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("bench.rs");
    fs::write(&path, SOURCE).unwrap();
    (dir, path)
}

#[test]
fn test_reentry_violates_lock_contract() {
    let context = AnnotationContext::new();

    let result = context.run_in_context(|_| context.run_in_context(|_| Ok(())));

    assert!(matches!(result, Err(AnnotationError::LockContract(_))));
    // The outer call released ownership on the way out
    assert!(context.run_in_context(|_| Ok(())).is_ok());
}

#[test]
fn test_scope_lent_to_another_thread_fails_fast() {
    let (_dir, path) = write_source();
    let context = AnnotationContext::new();

    let result = context
        .run_in_context(|scope| {
            Ok(thread::scope(|threads| {
                threads
                    .spawn(|| scope.load_tree(&path).map(|_| ()))
                    .join()
                    .unwrap()
            }))
        })
        .unwrap();

    assert!(matches!(result, Err(AnnotationError::LockContract(_))));
}

#[test]
fn test_disposed_context_rejects_use() {
    let (_dir, path) = write_source();
    let context = AnnotationContext::new();
    context
        .run_in_context(|scope| scope.load_lines(&path).map(|_| ()))
        .unwrap();

    context.dispose().unwrap();

    assert!(context.is_disposed());
    assert!(matches!(
        context.run_in_context(|_| Ok(())),
        Err(AnnotationError::Disposed)
    ));
}

#[test]
fn test_document_kind_is_fixed_at_first_load() {
    let (_dir, path) = write_source();
    let context = AnnotationContext::new();

    let result = context.run_in_context(|scope| {
        scope.load_lines(&path)?;
        scope.load_tree(&path).map(|_| ())
    });

    match result {
        Err(AnnotationError::ContentKindMismatch {
            loaded, requested, ..
        }) => {
            assert_eq!(loaded, ContentKind::Lines);
            assert_eq!(requested, ContentKind::Tree);
        }
        other => panic!("expected kind mismatch, got {other:?}"),
    }
}

#[test]
fn test_external_edit_is_detected_on_save() {
    let (_dir, path) = write_source();
    let context = AnnotationContext::new();
    let external = "fn a() {}\n// someone else was here\n";

    let (origin, outcome) = context
        .run_in_context(|scope| {
            let document = scope.load_lines(&path)?;
            assert!(document.replace_line(1, "fn b_renamed() {}"));
            let origin = document.origin().to_string();
            fs::write(&path, external).unwrap();
            Ok((origin, scope.save()))
        })
        .unwrap();

    assert!(!outcome.is_success());
    assert!(matches!(
        outcome.failure_for(&origin),
        Some(AnnotationError::ConcurrentModification { .. })
    ));
    assert_eq!(fs::read_to_string(&path).unwrap(), external);

    // The document stays dirty for a later retry
    let dirty = context
        .run_in_context(|scope| Ok(scope.try_get_document(&origin).map(|d| d.is_dirty())))
        .unwrap();
    assert_eq!(dirty, Some(true));
}

#[test]
fn test_concurrent_passes_serialize_updates() {
    let (_dir, path) = write_source();
    let context = Arc::new(AnnotationContext::new());

    let handles: Vec<_> = [(0usize, "fn a_checked() {}"), (2, "fn c_checked() {}")]
        .into_iter()
        .map(|(index, text)| {
            let context = Arc::clone(&context);
            let path = path.clone();
            thread::spawn(move || {
                context
                    .run_in_context(|scope| {
                        scope.load_lines(&path)?.replace_line(index, text);
                        Ok(scope.save().is_success())
                    })
                    .unwrap()
            })
        })
        .collect();

    for handle in handles {
        assert!(handle.join().unwrap());
    }

    assert_eq!(
        fs::read_to_string(&path).unwrap(),
        "fn a_checked() {}\nfn b() {}\nfn c_checked() {}\n"
    );
}

#[test]
fn test_missing_sidecar_loads_empty_and_is_created() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("nested-limits.toml");
    let context = AnnotationContext::new();

    context
        .run_in_context(|scope| {
            let document = scope.load_tree(&path)?;
            assert_eq!(document.initial_checksum(), None);
            let tree = document.tree_mut().unwrap();
            assert!(tree.is_empty());
            tree.insert("note", toml_edit::value("kept"));
            document.mark_dirty();
            assert!(scope.save().is_success());
            Ok(())
        })
        .unwrap();

    let written = fs::read_to_string(&path).unwrap();
    assert!(written.contains("note = \"kept\""));
}

#[test]
fn test_sidecar_save_keeps_comments_and_layout() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("limits.toml");
    let original = "# Owned by perf team, do not reorder\nzeta = 1\nalpha = 2 # tuned\n";
    fs::write(&path, original).unwrap();
    let context = AnnotationContext::new();

    context
        .run_in_context(|scope| {
            let document = scope.load_tree(&path)?;
            document.tree_mut().unwrap().insert("omega", toml_edit::value(3));
            document.mark_dirty();
            assert!(scope.save().is_success());
            Ok(())
        })
        .unwrap();

    assert_eq!(
        fs::read_to_string(&path).unwrap(),
        format!("{original}omega = 3\n")
    );
}

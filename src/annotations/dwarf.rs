//! DWARF-backed source locator
//!
//! Resolves a benchmark method to `file:line` by finding its symbol in the
//! binary's symbol table and mapping the symbol address through the DWARF
//! `.debug_line` program.
//!
//! Uses addr2line crate for robust DWARF parsing

use crate::annotations::{
    ChecksumManifest, LocatorError, SourceAnnotationInfo, SourceChecksum, SourceLocator,
};
use crate::competition::MethodId;
use anyhow::{Context, Result};
use object::{Object, ObjectSection, ObjectSymbol, SymbolKind};
use std::collections::HashMap;
use std::fs::File;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

/// Source locator for a compiled benchmark binary
///
/// The checksum for a source file comes from the build-time
/// [`ChecksumManifest`] when one is given. Otherwise the file is hashed the
/// first time any of its methods is located, which pins the file's state at
/// the start of the pass.
pub struct DwarfSourceLocator {
    /// addr2line context for DWARF lookups
    context: addr2line::Context<gimli::EndianRcSlice<gimli::RunTimeEndian>>,
    /// Text symbols: (mangled name, address)
    symbols: Vec<(String, u64)>,
    manifest: Option<ChecksumManifest>,
    snapshots: Mutex<HashMap<PathBuf, SourceChecksum>>,
}

impl DwarfSourceLocator {
    /// Load symbols and DWARF debug info from an ELF binary
    pub fn load(binary_path: &Path) -> Result<Self> {
        // Verify binary exists
        if !binary_path.exists() {
            anyhow::bail!("Binary does not exist: {}", binary_path.display());
        }

        let file = File::open(binary_path)
            .with_context(|| format!("Failed to open binary: {}", binary_path.display()))?;

        let mmap = unsafe { memmap2::Mmap::map(&file) }.context("Failed to memory-map binary")?;

        let object = object::File::parse(&*mmap).context("Failed to parse ELF binary")?;

        let symbols = object
            .symbols()
            .filter(|symbol| symbol.kind() == SymbolKind::Text && symbol.address() != 0)
            .filter_map(|symbol| {
                symbol
                    .name()
                    .ok()
                    .map(|name| (name.to_string(), symbol.address()))
            })
            .collect();

        let endian = if object.is_little_endian() {
            gimli::RunTimeEndian::Little
        } else {
            gimli::RunTimeEndian::Big
        };

        // Helper to load a DWARF section
        let load_section =
            |id: gimli::SectionId| -> Result<gimli::EndianRcSlice<gimli::RunTimeEndian>> {
                let data = object
                    .section_by_name(id.name())
                    .and_then(|section| section.uncompressed_data().ok())
                    .unwrap_or(std::borrow::Cow::Borrowed(&[]));
                let bytes: std::rc::Rc<[u8]> = std::rc::Rc::from(data.into_owned());
                Ok(gimli::EndianRcSlice::new(bytes, endian))
            };

        let dwarf = gimli::Dwarf::load(&load_section).context(
            "Failed to load DWARF sections - binary may not have debug symbols. Compile with -g flag.",
        )?;

        let context =
            addr2line::Context::from_dwarf(dwarf).context("Failed to create DWARF context")?;

        Ok(Self {
            context,
            symbols,
            manifest: None,
            snapshots: Mutex::new(HashMap::new()),
        })
    }

    /// Use checksums recorded at build time instead of first-use snapshots
    pub fn with_manifest(mut self, manifest: ChecksumManifest) -> Self {
        self.manifest = Some(manifest);
        self
    }

    /// Address of the method's symbol
    ///
    /// Matches the legacy Rust mangling `_ZN<len><seg>...17h<hash>E` as well
    /// as unmangled (`#[no_mangle]`) names.
    fn find_symbol(&self, method: &MethodId) -> Option<u64> {
        let prefix = legacy_mangled_prefix(method);
        self.symbols
            .iter()
            .find(|(name, _)| {
                name == method.path()
                    || name
                        .strip_prefix(&prefix)
                        .is_some_and(|rest| rest.starts_with("17h"))
            })
            .map(|(_, address)| *address)
    }

    /// First user-code source line for an address
    fn lookup_line(&self, address: u64) -> Option<(String, u32)> {
        let location = self.context.find_location(address).ok()??;
        let file = location.file?;
        // Filter out libc/std paths - we want user code
        if file.contains("/rustc/") || file.contains("library/") {
            return None;
        }
        match location.line {
            Some(line) if line > 0 => Some((file.to_string(), line)),
            _ => None,
        }
    }

    fn checksum_for(&self, path: &Path) -> Result<SourceChecksum, LocatorError> {
        if let Some(manifest) = &self.manifest {
            let recorded = manifest
                .get(path)
                .map_err(|e| LocatorError::Manifest(e.to_string()))?;
            if let Some(checksum) = recorded {
                return Ok(checksum);
            }
        }

        let mut snapshots = self.snapshots.lock().map_err(|_| LocatorError::Poisoned)?;
        if let Some(checksum) = snapshots.get(path) {
            return Ok(*checksum);
        }
        let checksum = SourceChecksum::of_file(path).map_err(|source| LocatorError::Checksum {
            path: path.to_path_buf(),
            source,
        })?;
        snapshots.insert(path.to_path_buf(), checksum);
        Ok(checksum)
    }
}

impl SourceLocator for DwarfSourceLocator {
    fn locate(&self, method: &MethodId) -> Result<SourceAnnotationInfo, LocatorError> {
        let address = self
            .find_symbol(method)
            .ok_or_else(|| LocatorError::SymbolNotFound {
                method: method.to_string(),
            })?;

        let (file, line) = self
            .lookup_line(address)
            .ok_or_else(|| LocatorError::NoLineInfo {
                method: method.to_string(),
                address,
            })?;

        let path = PathBuf::from(file);
        let checksum = self.checksum_for(&path)?;
        tracing::debug!("Located {} at {}:{}", method, path.display(), line);

        Ok(SourceAnnotationInfo {
            path,
            method_line: line,
            checksum,
        })
    }
}

/// `a::b::c` → `_ZN1a1b1c`
fn legacy_mangled_prefix(method: &MethodId) -> String {
    method
        .segments()
        .fold(String::from("_ZN"), |mut acc, segment| {
            acc.push_str(&segment.len().to_string());
            acc.push_str(segment);
            acc
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use std::process::Command;
    use tempfile::TempDir;

    const TARGET_SOURCE: &str = "\
#[inline(never)]
pub fn measured_fn() -> u64 {
    (0..10u64).sum()
}

fn main() {
    println!(\"{}\", measured_fn());
}
";

    fn compile_test_binary() -> (TempDir, PathBuf, PathBuf) {
        let temp_dir = TempDir::new().unwrap();
        let src_file = temp_dir.path().join("bench_target.rs");
        let bin_file = temp_dir.path().join("bench_target");

        fs::write(&src_file, TARGET_SOURCE).unwrap();

        Command::new("rustc")
            .arg(&src_file)
            .arg("-o")
            .arg(&bin_file)
            .arg("-g")
            .status()
            .unwrap();

        (temp_dir, src_file, bin_file)
    }

    #[test]
    fn test_legacy_mangled_prefix() {
        let id = MethodId::new("bench_target::measured_fn");
        assert_eq!(legacy_mangled_prefix(&id), "_ZN12bench_target11measured_fn");
    }

    #[test]
    fn test_load_missing_binary() {
        assert!(DwarfSourceLocator::load(Path::new("/nonexistent/binary")).is_err());
    }

    #[test]
    fn test_locates_method_in_compiled_binary() {
        let (_temp_dir, src_file, bin_file) = compile_test_binary();
        let locator = DwarfSourceLocator::load(&bin_file).unwrap();

        let info = locator
            .locate(&MethodId::new("bench_target::measured_fn"))
            .unwrap();
        assert!(info.path.ends_with("bench_target.rs"), "{:?}", info.path);
        // `pub fn measured_fn` is on line 2
        assert!((2..=3).contains(&info.method_line), "line {}", info.method_line);
        assert_eq!(info.checksum, SourceChecksum::of_file(&src_file).unwrap());
    }

    #[test]
    fn test_unknown_method() {
        let (_temp_dir, _src_file, bin_file) = compile_test_binary();
        let locator = DwarfSourceLocator::load(&bin_file).unwrap();
        assert!(matches!(
            locator.locate(&MethodId::new("bench_target::missing_fn")),
            Err(LocatorError::SymbolNotFound { .. })
        ));
    }

    #[test]
    fn test_manifest_checksum_takes_precedence() {
        let (_temp_dir, src_file, bin_file) = compile_test_binary();
        let mut manifest = ChecksumManifest::new();
        let recorded = manifest.record(&src_file).unwrap();

        // Edit after recording: the manifest still reports the build-time state
        fs::write(&src_file, format!("{TARGET_SOURCE}// edited\n")).unwrap();

        let locator = DwarfSourceLocator::load(&bin_file)
            .unwrap()
            .with_manifest(manifest);
        let info = locator
            .locate(&MethodId::new("bench_target::measured_fn"))
            .unwrap();
        assert_eq!(info.checksum, recorded);
    }
}

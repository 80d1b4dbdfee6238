use std::fs;
use std::path::{Path, PathBuf};

use tracing::{debug, info};

use crate::mode::Toolchain;
use crate::shim::SignatureCount;

/// Result of the cold-start project detection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ProjectKind {
    #[default]
    Undetected,
    /// Go shim on disk, or Go sources found.
    Standard,
    /// TinyGo shim on disk.
    Enhanced,
    Unrecognized,
}

impl ProjectKind {
    pub fn is_wasm_project(self) -> bool {
        matches!(self, ProjectKind::Standard | ProjectKind::Enhanced)
    }

    fn from_toolchain(toolchain: Toolchain) -> Self {
        match toolchain {
            Toolchain::Go => ProjectKind::Standard,
            Toolchain::TinyGo => ProjectKind::Enhanced,
        }
    }
}

/// Paths inspected by [`detect`].
#[derive(Debug, Clone)]
pub struct DetectInput<'a> {
    pub root_dir: &'a Path,
    /// Relative to `root_dir`.
    pub source_dir: &'a Path,
    pub main_input_file: &'a str,
    /// Absolute location of a previously written shim.
    pub shim_path: Option<PathBuf>,
}

/// Classifies the project rooted at `input.root_dir`.
///
/// An existing shim decides first; a tie or no hit falls through to a scan
/// of the source tree.
pub fn detect(input: &DetectInput<'_>) -> ProjectKind {
    if let Some(kind) = input.shim_path.as_deref().and_then(from_existing_shim) {
        return kind;
    }
    if has_go_entry(input) {
        debug!(root = %input.root_dir.display(), "go sources found");
        return ProjectKind::Standard;
    }
    info!(root = %input.root_dir.display(), "no wasm project detected");
    ProjectKind::Unrecognized
}

fn from_existing_shim(path: &Path) -> Option<ProjectKind> {
    let content = fs::read_to_string(path).ok()?;
    let count = SignatureCount::scan(&content);
    let kind = count.winner().map(ProjectKind::from_toolchain);
    debug!(
        path = %path.display(),
        go = count.go,
        tinygo = count.tinygo,
        kind = ?kind,
        "scanned existing shim"
    );
    kind
}

fn has_go_entry(input: &DetectInput<'_>) -> bool {
    let expected = input.source_dir.join(input.main_input_file);
    let mut pending = vec![input.root_dir.to_path_buf()];

    while let Some(dir) = pending.pop() {
        let Ok(entries) = fs::read_dir(&dir) else {
            continue;
        };
        for entry in entries.flatten() {
            let Ok(file_type) = entry.file_type() else {
                continue;
            };
            let path = entry.path();
            if file_type.is_dir() {
                pending.push(path);
                continue;
            }
            if entry.file_name().to_string_lossy().ends_with(".wasm.go") {
                return true;
            }
            if path.strip_prefix(input.root_dir).is_ok_and(|rel| rel == expected) {
                return true;
            }
        }
    }
    false
}

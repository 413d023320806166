//! Derivative cache layout and existence checks.
//!
//! Every indexed image gets one JPEG derivative per configured size, stored
//! under the cache root in a mirror of the library layout:
//!
//! ```text
//! <cache>/<relative folder>/<stem>-<size>.jpg
//!
//! photos/2023/beach.jpg  →  cache/photos/2023/beach-1080.jpg
//!                           cache/photos/2023/beach-250.jpg
//! ```
//!
//! Derivative names depend only on the source name and the size, never on
//! content. A derivative is considered present when a file exists at its
//! path; [`check_existing`] answers from a pre-scanned set
//! ([`ExistingDerivatives`]) so a reconciliation does not stat every file.
//!
//! Sizes are expected largest first: the pipeline chains each derivative
//! from the previous one, and the last (smallest) is what dimension reads
//! come from.

use crate::imaging::ResizeTarget;
use crate::tree::Node;
use log::debug;
use std::collections::HashSet;
use std::io;
use std::path::{Path, PathBuf};
use walkdir::WalkDir;

/// File name of the derivative of `file_name` at `size`.
pub fn derivative_name(file_name: &str, size: u32) -> String {
    let stem = Path::new(file_name)
        .file_stem()
        .map(|s| s.to_string_lossy().to_string())
        .unwrap_or_else(|| file_name.to_string());
    format!("{stem}-{size}.jpg")
}

/// Folder holding the derivatives of the image at `relative_path`.
pub fn derivative_folder(cache_root: &Path, relative_path: &str) -> PathBuf {
    let parent = relative_path.rsplit_once('/').map_or("", |(parent, _)| parent);
    mirror_folder(cache_root, parent)
}

/// Cache folder mirroring a library folder (`source/dir`).
pub fn mirror_folder(cache_root: &Path, folder_path: &str) -> PathBuf {
    folder_path
        .split('/')
        .filter(|s| !s.is_empty())
        .fold(cache_root.to_path_buf(), |acc, s| acc.join(s))
}

/// Every derivative path of one image, in size order.
pub fn derivative_paths(cache_root: &Path, relative_path: &str, sizes: &[u32]) -> Vec<PathBuf> {
    let folder = derivative_folder(cache_root, relative_path);
    let name = relative_path.rsplit('/').next().unwrap_or(relative_path);
    sizes
        .iter()
        .map(|&size| folder.join(derivative_name(name, size)))
        .collect()
}

/// Resize targets for one image, one per size, bounded by height.
pub fn targets_for(folder: &Path, file_name: &str, sizes: &[u32]) -> Vec<ResizeTarget> {
    sizes
        .iter()
        .map(|&size| ResizeTarget::with_height(folder.join(derivative_name(file_name, size)), size))
        .collect()
}

/// Snapshot of the derivative files present under part of the cache.
#[derive(Debug, Clone, Default)]
pub struct ExistingDerivatives {
    paths: HashSet<PathBuf>,
}

impl ExistingDerivatives {
    pub fn empty() -> Self {
        Self::default()
    }

    /// Walk `dir` and record every file. A missing directory is an empty set.
    pub fn scan(dir: &Path) -> Self {
        let paths: HashSet<PathBuf> = WalkDir::new(dir)
            .into_iter()
            .filter_map(|e| e.ok())
            .filter(|e| e.file_type().is_file())
            .map(|e| e.into_path())
            .collect();
        debug!("{} existing derivatives under {}", paths.len(), dir.display());
        Self { paths }
    }

    pub fn contains(&self, path: &Path) -> bool {
        self.paths.contains(path)
    }
}

impl FromIterator<PathBuf> for ExistingDerivatives {
    fn from_iter<I: IntoIterator<Item = PathBuf>>(iter: I) -> Self {
        Self {
            paths: iter.into_iter().collect(),
        }
    }
}

/// Build the targets for an image and report whether all of them already
/// exist in `existing`.
pub fn check_existing(
    folder: &Path,
    file_name: &str,
    sizes: &[u32],
    existing: &ExistingDerivatives,
) -> (Vec<ResizeTarget>, bool) {
    let targets = targets_for(folder, file_name, sizes);
    let all_exist = !targets.is_empty() && targets.iter().all(|t| existing.contains(&t.output));
    (targets, all_exist)
}

/// Delete every derivative of a leaf. Missing files are not an error.
///
/// Returns how many files were actually removed.
pub fn remove_derivatives(cache_root: &Path, node: &Node, sizes: &[u32]) -> io::Result<usize> {
    let mut removed = 0;
    for path in derivative_paths(cache_root, &node.relative_path, sizes) {
        match std::fs::remove_file(&path) {
            Ok(()) => {
                debug!("removed derivative {}", path.display());
                removed += 1;
            }
            Err(e) if e.kind() == io::ErrorKind::NotFound => {}
            Err(e) => return Err(e),
        }
    }
    Ok(removed)
}

/// Move the derivative folder of `from` (a library folder path) to `to`.
///
/// Nothing to move is fine: the folder may never have had derivatives.
pub fn move_folder(cache_root: &Path, from: &str, to: &str) -> io::Result<()> {
    let source = mirror_folder(cache_root, from);
    if !source.exists() {
        return Ok(());
    }
    let target = mirror_folder(cache_root, to);
    if let Some(parent) = target.parent() {
        std::fs::create_dir_all(parent)?;
    }
    std::fs::rename(source, target)
}

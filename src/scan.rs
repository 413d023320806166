//! Filesystem scanning.
//!
//! Builds a fresh [`Node`] tree for a folder of a source. This is the
//! "current" side of every reconciliation: the scan knows nothing about
//! dimensions, dates or derivatives, only what exists on disk.
//!
//! ## Rules
//!
//! - Images are recognised by extension, case-insensitively: `jpg`, `jpeg`,
//!   `png` (see [`supported_input_extensions`]).
//! - Folders that contain no image anywhere below them are left out, so the
//!   tree never carries empty folders.
//! - Hidden entries (leading `.`) are skipped.
//! - Symlinked images are indexed; symlinked folders are never entered.
//!
//! A scanned path that cannot be read fails with [`ScanError`]. A folder
//! below it that cannot be read is listed in [`Scan::unreadable`] and the
//! walk carries on with its siblings.

use crate::imaging::supported_input_extensions;
use crate::tree::{Files, Node, TreeError, insert_into, join_path, parent_path, relative_path_in};
use std::ffi::OsStr;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use thiserror::Error;
use walkdir::WalkDir;

#[derive(Error, Debug)]
pub enum ScanError {
    #[error("cannot read {path}: {source}")]
    Io {
        path: PathBuf,
        source: io::Error,
    },
    #[error("{path} is outside source folder {root}")]
    OutsideSource { path: PathBuf, root: PathBuf },
    #[error(transparent)]
    Tree(#[from] TreeError),
}

/// What a scan found below one path.
#[derive(Debug, Default)]
pub struct Scan {
    /// At most one node, keyed by the scanned name.
    pub files: Files,
    /// Folders below the scanned path that could not be read, by library
    /// path. Their content is unknown, not gone.
    pub unreadable: Vec<(String, ScanError)>,
}

/// Scan `path`, a file or folder inside `source_root`.
///
/// `files` is empty when `path` is missing, is not an image, or is a folder
/// without images.
pub fn analyse_tree(source_name: &str, source_root: &Path, path: &Path) -> Result<Scan, ScanError> {
    let relative_path = library_path(source_name, source_root, path)?;
    let base = parent_path(&relative_path).to_string();
    let name = relative_path.rsplit('/').next().unwrap_or(relative_path.as_str()).to_string();
    let mut scan = Scan::default();

    let meta = match fs::symlink_metadata(path) {
        Ok(meta) => meta,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(scan),
        Err(source) => {
            return Err(ScanError::Io {
                path: path.to_path_buf(),
                source,
            });
        }
    };
    if !meta.is_dir() {
        if is_image(path) {
            scan.files.insert(name.clone(), Node::image(relative_path, name));
        }
        return Ok(scan);
    }

    let walker = WalkDir::new(path)
        .into_iter()
        .filter_entry(|e| e.depth() == 0 || !is_hidden(e.file_name()));
    for item in walker {
        let entry = match item {
            Ok(entry) => entry,
            Err(e) if e.depth() == 0 => return Err(walk_error(path, e)),
            Err(e) => {
                let folder = library_path(source_name, source_root, e.path().unwrap_or(path))?;
                scan.unreadable.push((folder, walk_error(path, e)));
                continue;
            }
        };
        if entry.file_type().is_dir() || !is_image(entry.path()) {
            continue;
        }
        let Ok(below) = entry.path().strip_prefix(path) else {
            continue;
        };
        let rest = below.components().fold(name.clone(), |acc, c| {
            join_path(&acc, &c.as_os_str().to_string_lossy())
        });
        let leaf = Node::image(
            join_path(&base, &rest),
            entry.file_name().to_string_lossy().to_string(),
        );
        insert_into(&mut scan.files, &base, &rest, leaf)?;
    }
    Ok(scan)
}

fn library_path(source_name: &str, source_root: &Path, path: &Path) -> Result<String, ScanError> {
    relative_path_in(source_name, source_root, path).ok_or_else(|| ScanError::OutsideSource {
        path: path.to_path_buf(),
        root: source_root.to_path_buf(),
    })
}

fn walk_error(scanned: &Path, error: walkdir::Error) -> ScanError {
    let path = error.path().unwrap_or(scanned).to_path_buf();
    let source = error
        .into_io_error()
        .unwrap_or_else(|| io::Error::other("filesystem loop"));
    ScanError::Io { path, source }
}

/// Names of the entries directly inside a source folder that a scan would
/// consider (real folders and images).
pub fn list_top_level(source_root: &Path) -> Result<Vec<String>, ScanError> {
    let read = fs::read_dir(source_root).map_err(|source| ScanError::Io {
        path: source_root.to_path_buf(),
        source,
    })?;
    let mut names: Vec<String> = read
        .filter_map(Result::ok)
        .filter(|e| !is_hidden(&e.file_name()))
        .filter(|e| e.file_type().is_ok_and(|t| t.is_dir()) || is_image(&e.path()))
        .map(|e| e.file_name().to_string_lossy().to_string())
        .collect();
    names.sort();
    Ok(names)
}

fn is_hidden(name: &OsStr) -> bool {
    name.to_string_lossy().starts_with('.')
}

pub fn is_image(path: &Path) -> bool {
    if !path.is_file() {
        return false;
    }
    let ext = path
        .extension()
        .map(|e| e.to_string_lossy().to_lowercase())
        .unwrap_or_default();
    supported_input_extensions().contains(&ext.as_str())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_helpers::create_test_jpeg;
    use tempfile::TempDir;

    fn touch(path: &Path) {
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(path, b"x").unwrap();
    }

    #[test]
    fn scan_builds_nested_tree() {
        let tmp = TempDir::new().unwrap();
        let root = tmp.path();
        create_test_jpeg(&root.join("2023/summer/beach.jpg"), 8, 8);
        touch(&root.join("2023/summer/dunes.JPEG"));
        touch(&root.join("2023/winter.png"));

        let files = analyse_tree("photos", root, &root.join("2023")).unwrap().files;
        assert_eq!(files.len(), 1);
        let year = &files["2023"];
        assert!(year.is_folder);
        assert_eq!(year.relative_path, "photos/2023");
        assert_eq!(year.leaf_count(), 3);
        let summer = &year.files["summer"];
        assert_eq!(
            summer.files["dunes.JPEG"].relative_path,
            "photos/2023/summer/dunes.JPEG"
        );
    }

    #[test]
    fn non_images_are_ignored() {
        let tmp = TempDir::new().unwrap();
        let root = tmp.path();
        touch(&root.join("album/a.jpg"));
        touch(&root.join("album/notes.txt"));
        touch(&root.join("album/clip.mov"));

        let files = analyse_tree("photos", root, &root.join("album")).unwrap().files;
        let names: Vec<_> = files["album"].files.keys().cloned().collect();
        assert_eq!(names, vec!["a.jpg"]);
    }

    #[test]
    fn folders_without_images_are_left_out() {
        let tmp = TempDir::new().unwrap();
        let root = tmp.path();
        touch(&root.join("album/a.jpg"));
        fs::create_dir_all(root.join("album/empty/deeper")).unwrap();
        touch(&root.join("album/docs/readme.txt"));

        let files = analyse_tree("photos", root, &root.join("album")).unwrap().files;
        let names: Vec<_> = files["album"].files.keys().cloned().collect();
        assert_eq!(names, vec!["a.jpg"]);

        let empty = analyse_tree("photos", root, &root.join("album/empty")).unwrap().files;
        assert!(empty.is_empty());
    }

    #[test]
    fn hidden_entries_are_skipped() {
        let tmp = TempDir::new().unwrap();
        let root = tmp.path();
        touch(&root.join("album/a.jpg"));
        touch(&root.join("album/.b.jpg"));
        touch(&root.join("album/.thumbs/c.jpg"));

        let files = analyse_tree("photos", root, &root.join("album")).unwrap().files;
        assert_eq!(files["album"].leaf_count(), 1);
    }

    #[test]
    fn scanning_a_single_image() {
        let tmp = TempDir::new().unwrap();
        let root = tmp.path();
        touch(&root.join("solo.jpg"));

        let files = analyse_tree("photos", root, &root.join("solo.jpg")).unwrap().files;
        assert_eq!(files["solo.jpg"].relative_path, "photos/solo.jpg");
        assert!(files["solo.jpg"].is_leaf());
    }

    #[test]
    fn missing_folder_is_empty() {
        let tmp = TempDir::new().unwrap();
        let scan = analyse_tree("photos", tmp.path(), &tmp.path().join("gone")).unwrap();
        assert!(scan.files.is_empty());
        assert!(scan.unreadable.is_empty());
    }

    #[test]
    fn path_outside_source_is_error() {
        let tmp = TempDir::new().unwrap();
        let other = TempDir::new().unwrap();
        let result = analyse_tree("photos", tmp.path(), other.path());
        assert!(matches!(result, Err(ScanError::OutsideSource { .. })));
    }

    // =========================================================================
    // Symlinks and unreadable folders
    // =========================================================================

    #[cfg(unix)]
    #[test]
    fn linked_folders_are_not_entered() {
        use std::os::unix::fs::symlink;
        let tmp = TempDir::new().unwrap();
        let root = tmp.path();
        touch(&root.join("trip/a.jpg"));
        touch(&root.join("elsewhere/b.jpg"));
        symlink(".", root.join("trip/latest")).unwrap();
        symlink(root.join("elsewhere"), root.join("trip/linked")).unwrap();

        let scan = analyse_tree("photos", root, &root.join("trip")).unwrap();
        let names: Vec<_> = scan.files["trip"].files.keys().cloned().collect();
        assert_eq!(names, vec!["a.jpg"]);
        assert!(scan.unreadable.is_empty());
    }

    #[cfg(unix)]
    #[test]
    fn linked_images_are_indexed() {
        use std::os::unix::fs::symlink;
        let tmp = TempDir::new().unwrap();
        let root = tmp.path();
        touch(&root.join("trip/a.jpg"));
        touch(&root.join("outside/b.jpg"));
        symlink(root.join("outside/b.jpg"), root.join("trip/b.jpg")).unwrap();

        let scan = analyse_tree("photos", root, &root.join("trip")).unwrap();
        assert_eq!(scan.files["trip"].leaf_count(), 2);
    }

    #[cfg(unix)]
    #[test]
    fn linked_top_level_folder_is_skipped() {
        use std::os::unix::fs::symlink;
        let tmp = TempDir::new().unwrap();
        let root = tmp.path();
        touch(&root.join("trip/a.jpg"));
        symlink(root.join("trip"), root.join("mirror")).unwrap();

        assert_eq!(list_top_level(root).unwrap(), vec!["trip"]);
        let scan = analyse_tree("photos", root, &root.join("mirror")).unwrap();
        assert!(scan.files.is_empty());
    }

    #[cfg(unix)]
    #[test]
    fn unreadable_folder_does_not_stop_its_siblings() {
        use std::os::unix::fs::PermissionsExt;
        let tmp = TempDir::new().unwrap();
        let root = tmp.path();
        touch(&root.join("2023/locked/a.jpg"));
        touch(&root.join("2023/b/new.jpg"));
        let locked = root.join("2023/locked");
        fs::set_permissions(&locked, fs::Permissions::from_mode(0o000)).unwrap();
        // root reads through permissions
        let denied = fs::read_dir(&locked).is_err();

        let scan = analyse_tree("photos", root, &root.join("2023"));
        fs::set_permissions(&locked, fs::Permissions::from_mode(0o755)).unwrap();
        let scan = scan.unwrap();

        assert!(scan.files["2023"].files["b"].files.contains_key("new.jpg"));
        if denied {
            assert_eq!(scan.unreadable.len(), 1);
            assert_eq!(scan.unreadable[0].0, "photos/2023/locked");
            assert!(!scan.files["2023"].files.contains_key("locked"));
        }
    }

    #[test]
    fn top_level_lists_folders_and_images_only() {
        let tmp = TempDir::new().unwrap();
        let root = tmp.path();
        touch(&root.join("b/x.jpg"));
        touch(&root.join("a.png"));
        touch(&root.join("notes.txt"));
        touch(&root.join(".hidden/x.jpg"));

        assert_eq!(list_top_level(root).unwrap(), vec!["a.png", "b"]);
    }

    #[test]
    fn top_level_of_missing_source_is_error() {
        let tmp = TempDir::new().unwrap();
        let result = list_top_level(&tmp.path().join("missing"));
        assert!(matches!(result, Err(ScanError::Io { .. })));
    }
}

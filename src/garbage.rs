//! Deleting images without losing them.
//!
//! Deleted originals are not unlinked: they are moved into a flat garbage
//! folder, named after their library path with separators replaced by dots
//! (`photos/2023/beach.jpg` → `<garbage>/photos.2023.beach.jpg`). Their
//! derivatives are really deleted, they can always be rebuilt.
//!
//! Moving is copy-then-remove, so the garbage folder may sit on another
//! filesystem than the library. A file already in the garbage whose original
//! is gone counts as moved, which makes a retried deletion succeed.

use log::info;
use std::path::{Path, PathBuf};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum GarbageError {
    #[error("garbage folder {0} is not an existing directory")]
    Unavailable(PathBuf),
    #[error("cannot move {from} to {to}: {source}")]
    Move {
        from: PathBuf,
        to: PathBuf,
        source: std::io::Error,
    },
}

#[derive(Debug, Clone)]
pub struct GarbageManager {
    folder: PathBuf,
}

impl GarbageManager {
    /// The folder must already exist.
    pub fn new(folder: impl Into<PathBuf>) -> Result<Self, GarbageError> {
        let folder = folder.into();
        if !folder.is_dir() {
            return Err(GarbageError::Unavailable(folder));
        }
        Ok(Self { folder })
    }

    /// Where the original of `relative_path` ends up.
    pub fn target_for(&self, relative_path: &str) -> PathBuf {
        self.folder.join(relative_path.replace(['/', '\\'], "."))
    }

    /// Move an original into the garbage folder.
    pub fn discard(&self, original: &Path, relative_path: &str) -> Result<PathBuf, GarbageError> {
        let target = self.target_for(relative_path);
        if target.exists() && !original.exists() {
            info!("{} is already in the garbage", original.display());
            return Ok(target);
        }
        let move_error = |source| GarbageError::Move {
            from: original.to_path_buf(),
            to: target.clone(),
            source,
        };
        std::fs::copy(original, &target).map_err(move_error)?;
        std::fs::remove_file(original).map_err(move_error)?;
        info!("moved {} to garbage {}", original.display(), target.display());
        Ok(target)
    }
}

//! Persisted library tree.
//!
//! The whole [`SourceNodes`] tree is stored as one JSON document, a map from
//! source name to `{ folder, name, Files }`. It is written after every
//! reconciliation and admin mutation, and read once at startup.
//!
//! Writes go to a sibling temporary file first and are renamed into place,
//! so readers never see a half-written snapshot. A missing snapshot is an
//! empty library; an unreadable one is an error the caller can log while
//! keeping whatever tree it already has in memory.

use crate::tree::SourceNodes;
use log::debug;
use std::path::PathBuf;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum SnapshotError {
    #[error("cannot access snapshot {path}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("snapshot {path} is not valid: {source}")]
    Json {
        path: PathBuf,
        source: serde_json::Error,
    },
}

#[derive(Debug, Clone)]
pub struct SnapshotStore {
    path: PathBuf,
}

impl SnapshotStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Load the tree. A missing file is an empty tree.
    pub fn load(&self) -> Result<SourceNodes, SnapshotError> {
        let content = match std::fs::read_to_string(&self.path) {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                debug!("no snapshot at {}, starting empty", self.path.display());
                return Ok(SourceNodes::new());
            }
            Err(source) => return Err(self.io_error(source)),
        };
        serde_json::from_str(&content).map_err(|source| SnapshotError::Json {
            path: self.path.clone(),
            source,
        })
    }

    /// Write the tree atomically.
    pub fn save(&self, nodes: &SourceNodes) -> Result<(), SnapshotError> {
        let json = serde_json::to_string_pretty(nodes).map_err(|source| SnapshotError::Json {
            path: self.path.clone(),
            source,
        })?;
        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent).map_err(|e| self.io_error(e))?;
        }
        let tmp = self.path.with_extension("json.tmp");
        std::fs::write(&tmp, json).map_err(|e| self.io_error(e))?;
        std::fs::rename(&tmp, &self.path).map_err(|e| self.io_error(e))?;
        debug!("saved snapshot to {}", self.path.display());
        Ok(())
    }

    fn io_error(&self, source: std::io::Error) -> SnapshotError {
        SnapshotError::Io {
            path: self.path.clone(),
            source,
        }
    }
}

//! Library reconciliation and administration.
//!
//! [`FoldersManager`] owns the in-memory tree, the [`Reducer`], the snapshot
//! store and the single-flight coordinator. Every operation that changes the
//! tree holds the coordinator for its whole duration:
//!
//! - reconciliations ([`reconcile_all`](FoldersManager::reconcile_all),
//!   [`reconcile_folder`](FoldersManager::reconcile_folder)) wait only a
//!   short grace window and otherwise fail with
//!   [`ManagerError::AlreadyRunning`];
//! - admin mutations (index, move, remove, delete, exif refresh) wait their
//!   turn.
//!
//! The tree itself sits behind an `RwLock` that is only held for short
//! lookups and for applying results, so readers (browse, dates, count) are
//! never blocked by a running scan or resize batch.
//!
//! ## Reconciliation
//!
//! Work is split by top-level entry of each source. For every entry the
//! filesystem is scanned (entries in parallel), diffed against the persisted
//! subtree, and then:
//!
//! 1. added leaves go to the reducer; the batch waits on a
//!    [`WaitGroup`] until every callback has fired,
//! 2. removed leaves lose their derivatives,
//! 3. the scanned subtree replaces the persisted one and resize results are
//!    written onto its leaves.
//!
//! A scan failure skips that entry and is recorded in the
//! [`ReconcileReport`]; siblings carry on. A folder deeper down that cannot
//! be read keeps its previous subtree for this run. The snapshot is written once at
//! the end. A failed write is logged and the in-memory tree stays
//! authoritative until the next successful save.

use crate::cache::{self, ExistingDerivatives, mirror_folder};
use crate::config::ServerConfig;
use crate::coordinator::{AlreadyRunning, ReconcileCoordinator};
use crate::diff::diff;
use crate::garbage::{GarbageError, GarbageManager};
use crate::imaging::ImageBackend;
use crate::metadata::read_capture_info;
use crate::progress::{Progress, ProgressRegistry, ProgressStat};
use crate::reducer::{ReduceRequest, ReduceResult, Reducer, ReducerStats};
use crate::scan::{Scan, ScanError, analyse_tree, list_top_level};
use crate::snapshot::SnapshotStore;
use crate::tree::{
    Files, Node, SourceNode, SourceNodes, TreeError, find_in, insert_into, join_path,
    normalize_path, parent_path, split_source,
};
use chrono::NaiveDate;
use crossbeam::sync::WaitGroup;
use log::{debug, info, warn};
use rayon::prelude::*;
use serde::Serialize;
use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ManagerError {
    #[error(transparent)]
    AlreadyRunning(#[from] AlreadyRunning),
    #[error(transparent)]
    Tree(#[from] TreeError),
    #[error(transparent)]
    Scan(#[from] ScanError),
    #[error(transparent)]
    Garbage(#[from] GarbageError),
    #[error("{path}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("folder is not empty: {0}")]
    NotEmpty(String),
    #[error("not an image: {0}")]
    NotAnImage(String),
    #[error("cannot move {from} to {to}: different sources")]
    CrossSource { from: String, to: String },
    #[error("no image found at {0}")]
    NothingToIndex(String),
    #[error("deleting images needs a garbage_folder")]
    NoGarbageFolder,
}

/// A folder (or image) a reconciliation could not process.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FolderFailure {
    pub path: String,
    pub error: String,
}

/// Outcome of a reconciliation or indexing run.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ReconcileReport {
    pub progress_id: String,
    pub added: usize,
    pub removed: usize,
    pub unchanged: usize,
    /// Added images whose derivatives were produced or found in the cache.
    pub resized: usize,
    /// Added images whose reduction failed.
    pub failed: usize,
    pub failures: Vec<FolderFailure>,
}

impl ReconcileReport {
    fn new(progress: &Progress) -> Self {
        Self {
            progress_id: progress.id().to_string(),
            ..Self::default()
        }
    }

    fn fail(&mut self, path: impl Into<String>, error: impl ToString) {
        let path = path.into();
        let error = error.to_string();
        warn!("{path}: {error}");
        self.failures.push(FolderFailure { path, error });
    }
}

pub struct FoldersManager {
    tree: RwLock<SourceNodes>,
    reducer: Reducer,
    coordinator: ReconcileCoordinator,
    snapshot: SnapshotStore,
    progress: ProgressRegistry,
    garbage: Option<GarbageManager>,
}

impl FoldersManager {
    /// Load the snapshot, register the configured sources and start the
    /// reducer. An unreadable snapshot is logged and replaced by an empty
    /// tree.
    pub fn new(
        config: &ServerConfig,
        backend: Arc<dyn ImageBackend>,
    ) -> Result<Self, ManagerError> {
        let snapshot = SnapshotStore::new(&config.snapshot);
        let mut tree = snapshot.load().unwrap_or_else(|e| {
            warn!("{e}; starting with an empty library");
            SourceNodes::new()
        });
        for (name, folder) in &config.sources {
            match tree.get_mut(name) {
                Some(source) => source.folder = folder.clone(),
                None => tree.insert(SourceNode::new(name.clone(), folder.clone())),
            }
        }

        let garbage = config
            .garbage_folder
            .as_ref()
            .map(GarbageManager::new)
            .transpose()?;
        let reducer = Reducer::new(backend, config.reducer_settings()).map_err(|source| {
            ManagerError::Io {
                path: config.cache_folder.clone(),
                source,
            }
        })?;

        Ok(Self {
            tree: RwLock::new(tree),
            reducer,
            coordinator: ReconcileCoordinator::new(config.reconcile.grace()),
            snapshot,
            progress: ProgressRegistry::new(),
            garbage,
        })
    }

    // =========================================================================
    // Reconciliation
    // =========================================================================

    /// Reconcile every source against the filesystem.
    pub fn reconcile_all(&self) -> Result<ReconcileReport, ManagerError> {
        let _guard = self.coordinator.try_acquire()?;
        let progress = self.progress.start();
        let mut report = ReconcileReport::new(&progress);

        let sources: Vec<(String, PathBuf)> = self
            .read_tree()
            .sources()
            .map(|s| (s.name.clone(), s.folder.clone()))
            .collect();
        for (name, folder) in sources {
            self.reconcile_source(&name, &folder, &progress, &mut report);
        }

        progress.end();
        self.persist();
        log_report("update", &report);
        Ok(report)
    }

    /// Reconcile one existing folder (or a whole source).
    pub fn reconcile_folder(&self, path: &str) -> Result<ReconcileReport, ManagerError> {
        let _guard = self.coordinator.try_acquire()?;
        let path = normalize_path(path);
        let (source_name, folder) = {
            let tree = self.read_tree();
            let (source, rest) = tree.resolve(&path)?;
            if !rest.is_empty() {
                tree.find(&path)?;
            }
            (source.name.clone(), source.folder.clone())
        };

        let progress = self.progress.start();
        let mut report = ReconcileReport::new(&progress);
        if split_source(&path).1.is_empty() {
            self.reconcile_source(&source_name, &folder, &progress, &mut report);
        } else {
            let on_disk = self.read_tree().absolute_path(&path)?;
            match analyse_tree(&source_name, &folder, &on_disk) {
                Ok(scan) => self.reconcile_entry(&path, scan, false, &progress, &mut report),
                Err(e) => report.fail(path.clone(), e),
            }
        }

        progress.end();
        self.persist();
        log_report(&path, &report);
        Ok(report)
    }

    fn reconcile_source(
        &self,
        name: &str,
        folder: &Path,
        progress: &Arc<Progress>,
        report: &mut ReconcileReport,
    ) {
        let on_disk = match list_top_level(folder) {
            Ok(entries) => entries,
            Err(e) => {
                report.fail(name, e);
                return;
            }
        };
        let mut entries: BTreeSet<String> = on_disk.into_iter().collect();
        if let Some(source) = self.read_tree().get(name) {
            entries.extend(source.files.keys().cloned());
        }

        let scanned: Vec<(String, Result<Scan, ScanError>)> = entries
            .par_iter()
            .map(|entry| (entry.clone(), analyse_tree(name, folder, &folder.join(entry))))
            .collect();

        for (entry, scan) in scanned {
            let path = join_path(name, &entry);
            match scan {
                Ok(scan) => self.reconcile_entry(&path, scan, false, progress, report),
                Err(e) => report.fail(path, e),
            }
        }
    }

    /// Diff the scan of one entry against the tree, reduce what was added,
    /// clean up what was removed and write the result back.
    ///
    /// The scan holds at most one node, the entry at `path`. Folders it could
    /// not read keep their previous subtree.
    fn reconcile_entry(
        &self,
        path: &str,
        scan: Scan,
        force_rotate: bool,
        progress: &Arc<Progress>,
        report: &mut ReconcileReport,
    ) {
        let previous: Files = self
            .read_tree()
            .find(path)
            .map(|node| Files::from([(node.name.clone(), node.clone())]))
            .unwrap_or_default();

        let Scan {
            files: mut current,
            unreadable,
        } = scan;
        let base = parent_path(path);
        for (folder, error) in unreadable {
            let rest = folder
                .strip_prefix(base)
                .unwrap_or(folder.as_str())
                .trim_start_matches('/');
            if let Some(kept) = find_in(&previous, rest)
                && let Err(e) = insert_into(&mut current, base, rest, kept.clone())
            {
                warn!("cannot keep {folder}: {e}");
            }
            report.fail(folder, error);
        }

        let changes = diff(&mut current, &previous);
        report.added += changes.added.len();
        report.removed += changes.removed.len();
        report.unchanged += changes.unchanged.len();
        if changes.is_empty() {
            debug!("{path}: no change");
        }

        let existing = self.existing_derivatives(path, &current);
        let results = self.reduce(&changes.added, existing, force_rotate, progress);

        for node in changes.removed.values() {
            self.remove_derivatives(node);
        }

        let mut tree = self.write_tree();
        let written = match current.into_values().next() {
            Some(node) => tree.insert_at(path, node),
            None => tree.remove(path).map(|_| ()).or_else(|e| match e {
                TreeError::NotFound(_) => Ok(()),
                other => Err(other),
            }),
        };
        if let Err(e) = written {
            report.fail(path, e);
            return;
        }

        for (relative_path, result) in results {
            match result {
                Ok(reduced) => {
                    if let Ok(node) = tree.find_mut(&relative_path) {
                        node.width = reduced.width;
                        node.height = reduced.height;
                        node.date = reduced.date.or(node.date);
                        node.images_resized = true;
                    }
                    report.resized += 1;
                }
                Err(e) => {
                    report.failed += 1;
                    report.fail(relative_path, e);
                }
            }
        }
    }

    /// Derivatives already present for an entry, scanned once up front.
    fn existing_derivatives(&self, path: &str, current: &Files) -> ExistingDerivatives {
        let is_folder = current.values().next().is_some_and(|n| n.is_folder);
        if is_folder {
            ExistingDerivatives::scan(&mirror_folder(self.reducer.cache_root(), path))
        } else {
            self.reducer
                .derivative_paths(path)
                .into_iter()
                .filter(|p| p.is_file())
                .collect()
        }
    }

    /// Send leaves through the reducer and wait for every answer.
    fn reduce(
        &self,
        leaves: &[Node],
        existing: ExistingDerivatives,
        force_rotate: bool,
        progress: &Arc<Progress>,
    ) -> Vec<(String, ReduceResult)> {
        if leaves.is_empty() {
            return Vec::new();
        }
        let requests: Vec<ReduceRequest> = {
            let tree = self.read_tree();
            let existing = Arc::new(existing);
            leaves
                .iter()
                .filter_map(|leaf| {
                    let source = tree.absolute_path(&leaf.relative_path).ok()?;
                    Some(ReduceRequest {
                        source,
                        relative_path: leaf.relative_path.clone(),
                        force_rotate,
                        existing: Arc::clone(&existing),
                    })
                })
                .collect()
        };

        progress.add(requests.len());
        let results = Arc::new(Mutex::new(Vec::with_capacity(requests.len())));
        let wg = WaitGroup::new();
        for request in requests {
            let wg = wg.clone();
            let results = Arc::clone(&results);
            let progress = Arc::clone(progress);
            let relative_path = request.relative_path.clone();
            self.reducer.resize_async(request, move |result| {
                match &result {
                    Ok(_) => progress.done(),
                    Err(_) => progress.fail(),
                }
                results
                    .lock()
                    .unwrap_or_else(PoisonError::into_inner)
                    .push((relative_path, result));
                drop(wg);
            });
        }
        wg.wait();

        std::mem::take(&mut *results.lock().unwrap_or_else(PoisonError::into_inner))
    }

    // =========================================================================
    // Administration
    // =========================================================================

    /// Index a folder that is not in the tree yet.
    ///
    /// `force_rotate` rotates already-cached derivatives according to EXIF.
    pub fn index_folder(
        &self,
        path: &str,
        force_rotate: bool,
    ) -> Result<ReconcileReport, ManagerError> {
        let _guard = self.coordinator.acquire();
        let path = normalize_path(path);
        let (source_name, folder, on_disk) = {
            let tree = self.read_tree();
            let (source, rest) = tree.resolve(&path)?;
            if rest.is_empty() {
                return Err(TreeError::InvalidPath(path).into());
            }
            if tree.find(&path).is_ok() {
                return Err(TreeError::AlreadyExists(path).into());
            }
            (source.name.clone(), source.folder.clone(), source.absolute_path(rest))
        };

        let scan = analyse_tree(&source_name, &folder, &on_disk)?;
        if scan.files.is_empty() {
            return Err(ManagerError::NothingToIndex(path));
        }

        let progress = self.progress.start();
        let mut report = ReconcileReport::new(&progress);
        self.reconcile_entry(&path, scan, force_rotate, &progress, &mut report);
        progress.end();
        self.persist();
        log_report(&path, &report);
        Ok(report)
    }

    /// Register a new source and index everything in it.
    pub fn add_source(&self, name: &str, folder: &Path) -> Result<ReconcileReport, ManagerError> {
        let _guard = self.coordinator.acquire();
        if name.is_empty() || name.contains(['/', '\\']) {
            return Err(TreeError::InvalidPath(name.to_string()).into());
        }
        if self.read_tree().get(name).is_some() {
            return Err(TreeError::AlreadyExists(name.to_string()).into());
        }
        if !folder.is_dir() {
            return Err(ManagerError::Io {
                path: folder.to_path_buf(),
                source: std::io::Error::new(std::io::ErrorKind::NotFound, "not a folder"),
            });
        }
        self.write_tree().insert(SourceNode::new(name, folder));

        let progress = self.progress.start();
        let mut report = ReconcileReport::new(&progress);
        self.reconcile_source(name, folder, &progress, &mut report);
        progress.end();
        self.persist();
        log_report(name, &report);
        Ok(report)
    }

    /// Drop an image or an empty folder from the tree. Nothing on disk is
    /// touched.
    pub fn remove_node(&self, path: &str) -> Result<Node, ManagerError> {
        let _guard = self.coordinator.acquire();
        let path = normalize_path(path);
        let removed = {
            let mut tree = self.write_tree();
            let node = tree.find(&path)?;
            if node.is_folder && !node.files.is_empty() {
                return Err(ManagerError::NotEmpty(path));
            }
            tree.remove(&path)?
        };
        info!("removed {path} from the library");
        self.persist();
        Ok(removed)
    }

    /// Move a folder within its source, on disk, in the cache and in the
    /// tree.
    pub fn move_folder(&self, from: &str, to: &str) -> Result<(), ManagerError> {
        let _guard = self.coordinator.acquire();
        let from = normalize_path(from);
        let to = normalize_path(to);
        if split_source(&from).0 != split_source(&to).0 {
            return Err(ManagerError::CrossSource { from, to });
        }

        let (from_disk, to_disk) = {
            let tree = self.read_tree();
            let node = tree.find(&from)?;
            if !node.is_folder {
                return Err(TreeError::NotAFolder(from).into());
            }
            if split_source(&to).1.is_empty() {
                return Err(TreeError::InvalidPath(to).into());
            }
            if tree.find(&to).is_ok() {
                return Err(TreeError::AlreadyExists(to).into());
            }
            (tree.absolute_path(&from)?, tree.absolute_path(&to)?)
        };
        if to_disk.exists() {
            return Err(TreeError::AlreadyExists(to).into());
        }

        if let Some(parent) = to_disk.parent() {
            std::fs::create_dir_all(parent).map_err(|source| ManagerError::Io {
                path: parent.to_path_buf(),
                source,
            })?;
        }
        std::fs::rename(&from_disk, &to_disk).map_err(|source| ManagerError::Io {
            path: from_disk.clone(),
            source,
        })?;
        if let Err(e) = cache::move_folder(self.reducer.cache_root(), &from, &to) {
            warn!("cannot move derivatives of {from} to {to}: {e}");
        }

        {
            let mut tree = self.write_tree();
            let mut node = tree.remove(&from)?;
            node.name = to.rsplit('/').next().unwrap_or(&to).to_string();
            node.rebase(to.clone());
            tree.insert_at(&to, node)?;
        }
        info!("moved {from} to {to}");
        self.persist();
        Ok(())
    }

    /// Move originals to the garbage folder, delete their derivatives and
    /// drop them from the tree.
    ///
    /// Stops at the first failure; images handled before it stay deleted.
    pub fn delete_images(&self, paths: &[String]) -> Result<usize, ManagerError> {
        let garbage = self.garbage.as_ref().ok_or(ManagerError::NoGarbageFolder)?;
        let _guard = self.coordinator.acquire();

        let mut deleted = 0;
        let outcome: Result<(), ManagerError> = paths.iter().try_for_each(|path| {
            let path = normalize_path(path);
            let (node, original) = {
                let tree = self.read_tree();
                let node = tree.find(&path)?;
                if node.is_folder {
                    return Err(ManagerError::NotAnImage(path));
                }
                (node.clone(), tree.absolute_path(&path)?)
            };
            garbage.discard(&original, &path)?;
            self.remove_derivatives(&node);
            self.write_tree().remove(&path)?;
            deleted += 1;
            Ok(())
        });

        if deleted > 0 {
            self.persist();
        }
        outcome.map(|()| deleted)
    }

    /// Re-read capture dates of every image under `path`.
    pub fn update_exif(&self, path: &str) -> Result<usize, ManagerError> {
        let _guard = self.coordinator.acquire();
        let path = normalize_path(path);
        let leaves: Vec<String> = {
            let tree = self.read_tree();
            let (source, rest) = tree.resolve(&path)?;
            if rest.is_empty() {
                source
                    .files
                    .values()
                    .flat_map(Node::leaves)
                    .map(|n| n.relative_path.clone())
                    .collect()
            } else {
                tree.find(&path)?
                    .leaves()
                    .into_iter()
                    .map(|n| n.relative_path.clone())
                    .collect()
            }
        };
        Ok(self.refresh_dates(&leaves))
    }

    /// Re-read capture dates of every image taken on `day`.
    pub fn update_exif_of_date(&self, day: NaiveDate) -> Result<usize, ManagerError> {
        let _guard = self.coordinator.acquire();
        let leaves = self
            .read_tree()
            .photos_by_date()
            .remove(&day)
            .unwrap_or_default();
        Ok(self.refresh_dates(&leaves))
    }

    fn refresh_dates(&self, leaves: &[String]) -> usize {
        let located: Vec<(String, PathBuf)> = {
            let tree = self.read_tree();
            leaves
                .iter()
                .filter_map(|p| Some((p.clone(), tree.absolute_path(p).ok()?)))
                .collect()
        };
        let dates: Vec<_> = located
            .par_iter()
            .map(|(path, on_disk)| (path, read_capture_info(on_disk).date))
            .collect();

        let mut changed = 0;
        {
            let mut tree = self.write_tree();
            for (path, date) in dates {
                if let Ok(node) = tree.find_mut(path)
                    && node.date != date
                {
                    node.date = date;
                    changed += 1;
                }
            }
        }
        info!("refreshed capture dates of {} images, {changed} changed", leaves.len());
        if changed > 0 {
            self.persist();
        }
        changed
    }

    // =========================================================================
    // Queries
    // =========================================================================

    /// Children of a folder, without their own children. The empty path
    /// lists the sources.
    pub fn browse(&self, path: &str) -> Result<Vec<Node>, ManagerError> {
        let path = normalize_path(path);
        let tree = self.read_tree();
        if path.is_empty() {
            return Ok(tree
                .sources()
                .map(|s| {
                    let mut node = Node::folder(s.name.clone(), s.name.clone(), Files::new());
                    node.images_resized = s.files.values().all(|n| n.images_resized);
                    node
                })
                .collect());
        }
        let (source, rest) = tree.resolve(&path)?;
        let children = if rest.is_empty() {
            &source.files
        } else {
            let node = tree.find(&path)?;
            if node.is_leaf() {
                return Ok(vec![node.shallow()]);
            }
            &node.files
        };
        Ok(children.values().map(Node::shallow).collect())
    }

    pub fn photos_by_date(&self, day: NaiveDate) -> Vec<String> {
        self.read_tree()
            .photos_by_date()
            .remove(&day)
            .unwrap_or_default()
    }

    /// Every capture day with its number of images, oldest first.
    pub fn all_dates(&self) -> Vec<(NaiveDate, usize)> {
        self.read_tree()
            .photos_by_date()
            .into_iter()
            .map(|(day, photos)| (day, photos.len()))
            .collect()
    }

    pub fn count(&self) -> usize {
        self.read_tree().count()
    }

    pub fn progress(&self, id: &str) -> Option<ProgressStat> {
        self.progress.get(id)
    }

    pub fn reducer_stats(&self) -> ReducerStats {
        self.reducer.stats()
    }

    pub fn is_updating(&self) -> bool {
        self.coordinator.is_running()
    }

    /// Copy of the whole tree.
    pub fn tree(&self) -> SourceNodes {
        self.read_tree().clone()
    }

    // =========================================================================
    // Internals
    // =========================================================================

    fn persist(&self) {
        let mut tree = self.write_tree();
        for source in tree.sources_mut() {
            for node in source.files.values_mut() {
                node.refresh_resized_flags();
            }
        }
        tree.assign_folder_ids();
        if let Err(e) = self.snapshot.save(&tree) {
            warn!("{e}; keeping the in-memory library");
        }
    }

    /// Missing derivatives are fine; other failures are only logged.
    fn remove_derivatives(&self, node: &Node) {
        let cache_root = self.reducer.cache_root();
        if let Err(e) = cache::remove_derivatives(cache_root, node, self.reducer.sizes()) {
            warn!("cannot remove derivatives of {}: {e}", node.relative_path);
        }
    }

    fn read_tree(&self) -> RwLockReadGuard<'_, SourceNodes> {
        self.tree.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write_tree(&self) -> RwLockWriteGuard<'_, SourceNodes> {
        self.tree.write().unwrap_or_else(PoisonError::into_inner)
    }
}

fn log_report(scope: &str, report: &ReconcileReport) {
    info!(
        "{scope}: {} added, {} removed, {} unchanged, {} resized, {} failed",
        report.added, report.removed, report.unchanged, report.resized, report.failed
    );
    if !report.failures.is_empty() {
        warn!("{scope}: {} failures", report.failures.len());
    }
}

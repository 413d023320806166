//! The photo library tree.
//!
//! A library is a set of named [`SourceNode`]s, each mapping a root folder on
//! disk to a tree of [`Node`]s. Folders own their children by name; leaves
//! are images. Every node knows its `relative_path`, rooted at the source
//! name:
//!
//! ```text
//! photos/2023/beach.jpg
//! ^^^^^^ ^^^^^^^^^^^^^^
//! source path within the source folder
//! ```
//!
//! The tree is a plain owned value. Concurrent access goes through the
//! [`FoldersManager`](crate::manager::FoldersManager), which keeps it behind
//! a lock; nothing in here hands out shared mutable references.
//!
//! The serialized form is the on-disk snapshot format (see
//! [`snapshot`](crate::snapshot)).

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Children of a folder, keyed by name.
pub type Files = BTreeMap<String, Node>;

#[derive(Error, Debug, PartialEq, Eq)]
pub enum TreeError {
    #[error("source not found: {0}")]
    SourceNotFound(String),
    #[error("path not found: {0}")]
    NotFound(String),
    #[error("not a folder: {0}")]
    NotAFolder(String),
    #[error("already exists: {0}")]
    AlreadyExists(String),
    #[error("invalid path: {0}")]
    InvalidPath(String),
}

/// A folder or an image in the library.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct Node {
    pub relative_path: String,
    pub name: String,
    pub is_folder: bool,
    #[serde(default)]
    pub width: u32,
    #[serde(default)]
    pub height: u32,
    /// Capture date (EXIF, or file modification time).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub date: Option<DateTime<Utc>>,
    /// Every configured derivative exists for this image (or, on a folder,
    /// for every image below it).
    #[serde(default)]
    pub images_resized: bool,
    #[serde(rename = "id", default, skip_serializing_if = "Option::is_none")]
    pub id: Option<u64>,
    #[serde(rename = "title", default, skip_serializing_if = "String::is_empty")]
    pub title: String,
    #[serde(
        rename = "description",
        default,
        skip_serializing_if = "String::is_empty"
    )]
    pub description: String,
    #[serde(default, skip_serializing_if = "Files::is_empty")]
    pub files: Files,
}

impl Node {
    pub fn image(relative_path: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            relative_path: relative_path.into(),
            name: name.into(),
            is_folder: false,
            width: 0,
            height: 0,
            date: None,
            images_resized: false,
            id: None,
            title: String::new(),
            description: String::new(),
            files: Files::new(),
        }
    }

    pub fn folder(relative_path: impl Into<String>, name: impl Into<String>, files: Files) -> Self {
        Self {
            is_folder: true,
            files,
            ..Self::image(relative_path, name)
        }
    }

    pub fn is_leaf(&self) -> bool {
        !self.is_folder
    }

    /// All leaves at or below this node, depth first in name order.
    pub fn leaves(&self) -> Vec<&Node> {
        let mut out = Vec::new();
        collect_leaves(self, &mut out);
        out
    }

    pub fn leaf_count(&self) -> usize {
        if self.is_leaf() {
            1
        } else {
            self.files.values().map(Node::leaf_count).sum()
        }
    }

    /// Recompute `images_resized` on every folder from its descendants.
    pub fn refresh_resized_flags(&mut self) -> bool {
        if self.is_folder {
            let mut all = true;
            for child in self.files.values_mut() {
                all &= child.refresh_resized_flags();
            }
            self.images_resized = all;
        }
        self.images_resized
    }

    /// Copy without children, for listings.
    pub fn shallow(&self) -> Node {
        Node {
            files: Files::new(),
            ..self.clone()
        }
    }

    /// Rewrite the relative path of this node and everything below it.
    pub fn rebase(&mut self, relative_path: String) {
        for child in self.files.values_mut() {
            child.rebase(join_path(&relative_path, &child.name));
        }
        self.relative_path = relative_path;
    }
}

fn collect_leaves<'a>(node: &'a Node, out: &mut Vec<&'a Node>) {
    if node.is_leaf() {
        out.push(node);
    } else {
        for child in node.files.values() {
            collect_leaves(child, out);
        }
    }
}

/// A configured library root.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SourceNode {
    pub folder: PathBuf,
    pub name: String,
    #[serde(rename = "Files", default)]
    pub files: Files,
}

impl SourceNode {
    pub fn new(name: impl Into<String>, folder: impl Into<PathBuf>) -> Self {
        Self {
            folder: folder.into(),
            name: name.into(),
            files: Files::new(),
        }
    }

    /// Absolute location on disk of a path within this source.
    pub fn absolute_path(&self, path_in_source: &str) -> PathBuf {
        if path_in_source.is_empty() {
            return self.folder.clone();
        }
        path_in_source
            .split('/')
            .fold(self.folder.clone(), |acc, segment| acc.join(segment))
    }
}

/// The whole library: every source, keyed by name.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SourceNodes(pub BTreeMap<String, SourceNode>);

impl SourceNodes {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, source: SourceNode) {
        self.0.insert(source.name.clone(), source);
    }

    pub fn get(&self, name: &str) -> Option<&SourceNode> {
        self.0.get(name)
    }

    pub fn get_mut(&mut self, name: &str) -> Option<&mut SourceNode> {
        self.0.get_mut(name)
    }

    pub fn sources(&self) -> impl Iterator<Item = &SourceNode> {
        self.0.values()
    }

    pub fn sources_mut(&mut self) -> impl Iterator<Item = &mut SourceNode> {
        self.0.values_mut()
    }

    /// Split a library path into its source and the path within it.
    pub fn resolve<'p>(&self, path: &'p str) -> Result<(&SourceNode, &'p str), TreeError> {
        check_segments(path)?;
        let (source, rest) = split_source(path);
        let node = self
            .0
            .get(source)
            .ok_or_else(|| TreeError::SourceNotFound(source.to_string()))?;
        Ok((node, rest))
    }

    /// Find a node by library path (`source/dir/file.jpg`).
    pub fn find(&self, path: &str) -> Result<&Node, TreeError> {
        let path = normalize_path(path);
        let (source, rest) = self.resolve(&path)?;
        find_in(&source.files, rest).ok_or(TreeError::NotFound(path))
    }

    pub fn find_mut(&mut self, path: &str) -> Result<&mut Node, TreeError> {
        let path = normalize_path(path);
        let (source, rest) = split_source(&path);
        let source = self
            .0
            .get_mut(source)
            .ok_or_else(|| TreeError::SourceNotFound(source.to_string()))?;
        match find_in_mut(&mut source.files, rest) {
            Some(node) => Ok(node),
            None => Err(TreeError::NotFound(path)),
        }
    }

    /// The children map a node at `path` lives in, plus the node's name.
    pub fn parent_files_mut(&mut self, path: &str) -> Result<(&mut Files, String), TreeError> {
        let path = normalize_path(path);
        check_segments(&path)?;
        let (source_name, rest) = split_source(&path);
        if rest.is_empty() {
            return Err(TreeError::InvalidPath(path));
        }
        let source = self
            .0
            .get_mut(source_name)
            .ok_or_else(|| TreeError::SourceNotFound(source_name.to_string()))?;
        let (parent, name) = match rest.rsplit_once('/') {
            Some((parent, name)) => (parent, name.to_string()),
            None => ("", rest.to_string()),
        };
        if parent.is_empty() {
            return Ok((&mut source.files, name));
        }
        match find_in_mut(&mut source.files, parent) {
            Some(node) if node.is_folder => Ok((&mut node.files, name)),
            Some(_) => Err(TreeError::NotAFolder(format!("{source_name}/{parent}"))),
            None => Err(TreeError::NotFound(format!("{source_name}/{parent}"))),
        }
    }

    /// Detach the node at `path` from the tree.
    pub fn remove(&mut self, path: &str) -> Result<Node, TreeError> {
        let (files, name) = self.parent_files_mut(path)?;
        files
            .remove(&name)
            .ok_or_else(|| TreeError::NotFound(normalize_path(path)))
    }

    /// Place `node` at `path`, creating missing intermediate folders.
    /// Replaces whatever was there.
    pub fn insert_at(&mut self, path: &str, node: Node) -> Result<(), TreeError> {
        let path = normalize_path(path);
        check_segments(&path)?;
        let (source_name, rest) = split_source(&path);
        if rest.is_empty() {
            return Err(TreeError::InvalidPath(path.clone()));
        }
        let source = self
            .0
            .get_mut(source_name)
            .ok_or_else(|| TreeError::SourceNotFound(source_name.to_string()))?;
        insert_into(&mut source.files, source_name, rest, node)
    }

    /// Absolute path on disk of a library path.
    pub fn absolute_path(&self, path: &str) -> Result<PathBuf, TreeError> {
        let path = normalize_path(path);
        let (source, rest) = self.resolve(&path)?;
        Ok(source.absolute_path(rest))
    }

    pub fn leaves(&self) -> Vec<&Node> {
        let mut out = Vec::new();
        for source in self.0.values() {
            for node in source.files.values() {
                collect_leaves(node, &mut out);
            }
        }
        out
    }

    /// Number of images across every source.
    pub fn count(&self) -> usize {
        self.0
            .values()
            .flat_map(|s| s.files.values())
            .map(Node::leaf_count)
            .sum()
    }

    /// Images grouped by capture day. Undated images are left out.
    pub fn photos_by_date(&self) -> BTreeMap<NaiveDate, Vec<String>> {
        let mut by_day: BTreeMap<NaiveDate, Vec<String>> = BTreeMap::new();
        for leaf in self.leaves() {
            if let Some(date) = leaf.date {
                by_day
                    .entry(date.date_naive())
                    .or_default()
                    .push(leaf.relative_path.clone());
            }
        }
        by_day
    }

    /// Give every folder without an id the next free one.
    pub fn assign_folder_ids(&mut self) {
        let mut next = self.max_folder_id() + 1;
        for source in self.0.values_mut() {
            for node in source.files.values_mut() {
                assign_ids(node, &mut next);
            }
        }
    }

    fn max_folder_id(&self) -> u64 {
        fn max_in(node: &Node) -> u64 {
            node.files
                .values()
                .map(max_in)
                .fold(node.id.unwrap_or(0), u64::max)
        }
        self.0
            .values()
            .flat_map(|s| s.files.values())
            .map(max_in)
            .max()
            .unwrap_or(0)
    }
}

fn assign_ids(node: &mut Node, next: &mut u64) {
    if !node.is_folder {
        return;
    }
    if node.id.is_none() {
        node.id = Some(*next);
        *next += 1;
    }
    for child in node.files.values_mut() {
        assign_ids(child, next);
    }
}

/// Place `node` at `rest` below `files`, a children map whose owner sits at
/// library path `base`. Missing intermediate folders are created.
pub fn insert_into(files: &mut Files, base: &str, rest: &str, node: Node) -> Result<(), TreeError> {
    let segments: Vec<&str> = rest.split('/').filter(|s| !s.is_empty()).collect();
    let Some((name, parents)) = segments.split_last() else {
        return Err(TreeError::InvalidPath(join_path(base, rest)));
    };
    let mut files = files;
    let mut walked = base.to_string();
    for segment in parents {
        walked = join_path(&walked, segment);
        let folder = files
            .entry(segment.to_string())
            .or_insert_with(|| Node::folder(walked.clone(), *segment, Files::new()));
        if !folder.is_folder {
            return Err(TreeError::NotAFolder(walked));
        }
        files = &mut folder.files;
    }
    files.insert(name.to_string(), node);
    Ok(())
}

/// Look up a `/`-separated path within a children map.
pub fn find_in<'a>(files: &'a Files, path: &str) -> Option<&'a Node> {
    let mut segments = path.split('/').filter(|s| !s.is_empty());
    let mut node = files.get(segments.next()?)?;
    for segment in segments {
        node = node.files.get(segment)?;
    }
    Some(node)
}

pub fn find_in_mut<'a>(files: &'a mut Files, path: &str) -> Option<&'a mut Node> {
    let mut segments = path.split('/').filter(|s| !s.is_empty());
    let mut node = files.get_mut(segments.next()?)?;
    for segment in segments {
        node = node.files.get_mut(segment)?;
    }
    Some(node)
}

/// Canonical library path: forward slashes, no leading or trailing slash.
pub fn normalize_path(path: &str) -> String {
    path.replace('\\', "/")
        .split('/')
        .filter(|s| !s.is_empty() && *s != ".")
        .collect::<Vec<_>>()
        .join("/")
}

/// Library paths never climb out of their source.
fn check_segments(path: &str) -> Result<(), TreeError> {
    if path.split(['/', '\\']).any(|segment| segment == "..") {
        return Err(TreeError::InvalidPath(path.to_string()));
    }
    Ok(())
}

/// Library path of the folder holding `path` (empty for a source name).
pub fn parent_path(path: &str) -> &str {
    path.rsplit_once('/').map_or("", |(parent, _)| parent)
}

/// Split `source/rest` into `("source", "rest")`.
pub fn split_source(path: &str) -> (&str, &str) {
    let path = path.trim_start_matches('/');
    match path.split_once('/') {
        Some((source, rest)) => (source, rest),
        None => (path, ""),
    }
}

pub fn join_path(parent: &str, name: &str) -> String {
    if parent.is_empty() {
        name.to_string()
    } else {
        format!("{parent}/{name}")
    }
}

/// The library path of `path` on disk, given the source it belongs to.
pub fn relative_path_in(source_name: &str, source_root: &Path, path: &Path) -> Option<String> {
    let rest = path.strip_prefix(source_root).ok()?;
    let mut relative = source_name.to_string();
    for component in rest.components() {
        relative.push('/');
        relative.push_str(&component.as_os_str().to_string_lossy());
    }
    Some(relative)
}

//! Tree diff between a fresh scan and the persisted tree.
//!
//! [`diff`] walks both trees by name and partitions every leaf into
//! `added`, `removed` or `unchanged`:
//!
//! | current | previous | outcome |
//! |---|---|---|
//! | leaf | none | added |
//! | folder | none | every leaf below it added |
//! | none | leaf | removed |
//! | none | folder | every leaf below it removed |
//! | leaf | leaf | unchanged; width, height, date and resized flag carried forward |
//! | folder | folder | recurse; id, title and description carried forward |
//! | leaf | folder | folder's leaves removed, leaf added |
//! | folder | leaf | leaf removed, folder's leaves added |
//!
//! The scan side is updated in place with the carried-forward metadata, so
//! after a diff it can replace the persisted subtree wholesale. Folders never
//! appear in any partition.
//!
//! Removed leaves are keyed by relative path: the same file name in two
//! folders is two distinct removals.

use crate::tree::{Files, Node};
use std::collections::BTreeMap;

/// Partition of leaves produced by [`diff`].
#[derive(Debug, Default, Clone, PartialEq)]
pub struct TreeDiff {
    pub added: Vec<Node>,
    pub removed: BTreeMap<String, Node>,
    pub unchanged: Vec<Node>,
}

impl TreeDiff {
    pub fn is_empty(&self) -> bool {
        self.added.is_empty() && self.removed.is_empty()
    }

    fn absorb(&mut self, other: TreeDiff) {
        self.added.extend(other.added);
        self.removed.extend(other.removed);
        self.unchanged.extend(other.unchanged);
    }
}

/// Compare `current` (fresh scan) with `previous` (persisted tree).
///
/// `current` gains the metadata of matching `previous` nodes. `previous` is
/// only read.
pub fn diff(current: &mut Files, previous: &Files) -> TreeDiff {
    let mut out = TreeDiff::default();

    for (name, node) in current.iter_mut() {
        match previous.get(name) {
            None => add_all(node, &mut out),
            Some(old) => out.absorb(diff_node(node, old)),
        }
    }

    for (name, old) in previous {
        if !current.contains_key(name) {
            remove_all(old, &mut out);
        }
    }

    out
}

fn diff_node(node: &mut Node, old: &Node) -> TreeDiff {
    let mut out = TreeDiff::default();
    match (node.is_folder, old.is_folder) {
        (false, false) => {
            node.width = old.width;
            node.height = old.height;
            node.images_resized = old.images_resized;
            if node.date.is_none() {
                node.date = old.date;
            }
            out.unchanged.push(node.clone());
        }
        (true, true) => {
            if node.id.is_none() {
                node.id = old.id;
            }
            if node.title.is_empty() {
                node.title = old.title.clone();
            }
            if node.description.is_empty() {
                node.description = old.description.clone();
            }
            out = diff(&mut node.files, &old.files);
        }
        _ => {
            remove_all(old, &mut out);
            add_all(node, &mut out);
        }
    }
    out
}

fn add_all(node: &Node, out: &mut TreeDiff) {
    for leaf in node.leaves() {
        out.added.push(leaf.clone());
    }
}

fn remove_all(node: &Node, out: &mut TreeDiff) {
    for leaf in node.leaves() {
        out.removed
            .insert(leaf.relative_path.clone(), leaf.clone());
    }
}

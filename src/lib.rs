//! # Photos Server
//!
//! The indexing core of a self-hosted photo server. A library is a set of
//! named source folders; the server keeps a persisted tree of their folders
//! and images, and a cache of resized JPEG derivatives for every image.
//!
//! # Architecture: Reconcile, Then Reduce
//!
//! ```text
//! filesystem ──scan──▶ fresh tree ──diff──▶ added ──▶ Reducer ──▶ ResizePipeline ──▶ cache/
//!                          ▲                 removed ──▶ derivative cleanup
//!                          │                 unchanged (metadata carried forward)
//!                  persisted snapshot ◀──────────────── updated tree
//! ```
//!
//! A reconciliation scans each source, diffs the scan against the persisted
//! tree, sends new images through the reducer, deletes derivatives of
//! vanished images, and saves the result. Only one reconciliation (or tree
//! mutation) runs at a time.
//!
//! # Module Map
//!
//! | Module | Role |
//! |--------|------|
//! | [`manager`] | `FoldersManager`: reconciliation, admin mutations, queries |
//! | [`reducer`] | Intake queue: EXIF read, cache probe, skip-if-exists, pipeline submission |
//! | [`pipeline`] | Three-stage open → resize → save pipeline on bounded queues |
//! | [`imaging`] | Decode, orient, resize and JPEG-encode behind the `ImageBackend` trait |
//! | [`cache`] | Derivative layout, existence probe, cleanup |
//! | [`diff`] | Added / removed / unchanged partition of two trees |
//! | [`scan`] | Filesystem walk into a fresh tree |
//! | [`tree`] | `Node` / `SourceNode` model and path resolution |
//! | [`snapshot`] | JSON persistence of the tree |
//! | [`coordinator`] | Single-flight guard for tree mutations |
//! | [`progress`] | Pollable progress of long runs |
//! | [`garbage`] | Deleted originals go to a garbage folder |
//! | [`metadata`] | Capture date and orientation from EXIF |
//! | [`config`] | TOML config loading, merging and validation |
//! | [`output`] | CLI output formatting |
//!
//! # Design Decisions
//!
//! ## Chained Derivatives
//!
//! Sizes are processed largest first and each derivative is resized from the
//! previous one rather than from the original. The original is decoded and
//! rotated once per image; only the smallest derivative's dimensions are
//! reported upward, since that is the one the tree records.
//!
//! ## Exactly-Once Completion
//!
//! Every resize request carries a completion that can only fire once. If a
//! request is dropped inside the pipeline without an answer (shutdown, a
//! worker gone), the completion fires with an `Aborted` error on drop, so a
//! waiting reconciliation never hangs.
//!
//! ## Owned Trees
//!
//! The tree is a plain owned value behind one lock. Diffing copies carried
//! metadata onto the fresh scan instead of sharing nodes between the old and
//! new trees, and resize results are applied back by relative path.

pub mod cache;
pub mod config;
pub mod coordinator;
pub mod diff;
pub mod garbage;
pub mod imaging;
pub mod manager;
pub mod metadata;
pub mod output;
pub mod pipeline;
pub mod progress;
pub mod reducer;
pub mod scan;
pub mod snapshot;
pub mod tree;

#[cfg(test)]
pub(crate) mod test_helpers;

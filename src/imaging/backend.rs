//! Image codec backend trait and shared types.
//!
//! The [`ImageBackend`] trait defines the three codec operations the resize
//! pipeline needs: identify, decode and save. Pixel transforms (resize,
//! rotate) are pure functions in [`operations`](super::operations) and work
//! on the decoded [`DynamicImage`].
//!
//! The production implementation is
//! [`RustBackend`](super::rust_backend::RustBackend), pure Rust.

use super::params::Quality;
use image::DynamicImage;
use std::path::{Path, PathBuf};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum BackendError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Failed to decode {path}: {message}")]
    Decode { path: PathBuf, message: String },
    #[error("Unsupported image format: {0}")]
    UnsupportedFormat(PathBuf),
    #[error("Failed to encode {path}: {message}")]
    Encode { path: PathBuf, message: String },
}

/// Result of an identify operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Dimensions {
    pub width: u32,
    pub height: u32,
}

/// Trait for image codec backends.
///
/// Shared across the pipeline's stage threads, hence `Send + Sync`.
pub trait ImageBackend: Send + Sync {
    /// Get image dimensions without decoding pixels.
    fn identify(&self, path: &Path) -> Result<Dimensions, BackendError>;

    /// Decode an image, choosing the decoder from the file extension.
    fn decode(&self, path: &Path) -> Result<DynamicImage, BackendError>;

    /// Encode `image` as JPEG and write it to `path`.
    fn save_jpeg(
        &self,
        image: &DynamicImage,
        path: &Path,
        quality: Quality,
    ) -> Result<(), BackendError>;
}

//! Parameter types for image operations.
//!
//! These structs describe *what* to produce, not *how*. The
//! [`pipeline`](crate::pipeline) turns a list of [`ResizeTarget`]s into
//! decode/resize/save work; the [`backend`](super::backend) does the pixel
//! work.
//!
//! ## Types
//!
//! - [`Quality`]: JPEG encoding quality (1–100, default 75). Clamped on construction.
//! - [`ResizeTarget`]: one derivative to write: output path plus requested bounds.

use std::path::PathBuf;

/// Quality setting for JPEG encoding (1-100).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Quality(pub u32);

impl Quality {
    pub fn new(value: u32) -> Self {
        Self(value.clamp(1, 100))
    }

    pub fn value(self) -> u32 {
        self.0
    }
}

impl Default for Quality {
    fn default() -> Self {
        Self(75)
    }
}

/// A single derivative to produce.
///
/// A zero `width` or `height` means "derive from the aspect ratio". Both
/// zero keeps the natural size.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResizeTarget {
    pub output: PathBuf,
    pub width: u32,
    pub height: u32,
}

impl ResizeTarget {
    /// A target bounded by height only, the way library derivatives are built.
    pub fn with_height(output: impl Into<PathBuf>, height: u32) -> Self {
        Self {
            output: output.into(),
            width: 0,
            height,
        }
    }
}

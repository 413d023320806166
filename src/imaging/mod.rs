//! Image codec and pixel operations, all in pure Rust.
//!
//! | Operation | Crate / function |
//! |---|---|
//! | **Identify** | `image::image_dimensions` |
//! | **Decode** | JPEG / PNG decoders, chosen by extension |
//! | **Resize** | `resize_exact` with CatmullRom (bicubic), never upscaling |
//! | **Rotate** | quarter turns driven by the EXIF orientation tag |
//! | **Encode** | JPEG at quality 75 by default |
//!
//! The module is split into:
//! - **Calculations**: Pure functions for dimension and rotation math (unit testable)
//! - **Parameters**: Data structures describing derivatives to produce
//! - **Backend**: [`ImageBackend`] trait + [`RustBackend`]
//! - **Operations**: Resize and rotate on decoded images

pub mod backend;
mod calculations;
pub mod operations;
mod params;
pub mod rust_backend;

pub use backend::{BackendError, Dimensions, ImageBackend};
pub use calculations::{fit_dimensions, rotation_angle, swaps_dimensions};
pub use params::{Quality, ResizeTarget};
pub use rust_backend::{RustBackend, supported_input_extensions};

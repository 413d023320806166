//! Pixel operations on decoded images.
//!
//! These functions combine the pure [`calculations`](super::calculations)
//! with the `image` crate's transforms. They never touch the filesystem.

use super::calculations::{fit_dimensions, rotation_angle};
use image::DynamicImage;
use image::imageops::FilterType;
use std::sync::Arc;

/// Bicubic resampling, as used for every derivative.
const FILTER: FilterType = FilterType::CatmullRom;

/// Resize a shared image to the requested bounds.
///
/// When [`fit_dimensions`] says the image must stay as is (upscale or no
/// bounds), the same `Arc` is handed back without copying pixels.
pub fn resize(image: Arc<DynamicImage>, width: u32, height: u32) -> Arc<DynamicImage> {
    match fit_dimensions((image.width(), image.height()), (width, height)) {
        Some((w, h)) if (w, h) != (image.width(), image.height()) => {
            Arc::new(image.resize_exact(w, h, FILTER))
        }
        _ => image,
    }
}

/// Rotate counter-clockwise by a multiple of 90 degrees.
///
/// Any angle that is not a quarter turn leaves the image untouched.
pub fn rotate(image: &DynamicImage, angle: i32) -> Option<DynamicImage> {
    match angle.rem_euclid(360) {
        90 => Some(image.rotate270()),
        180 => Some(image.rotate180()),
        270 => Some(image.rotate90()),
        _ => None,
    }
}

/// Apply the correction for an EXIF orientation, then resize.
///
/// Returns the new image and the orientation it now has (always 1: the
/// pixels are upright afterwards, whatever the input said).
pub fn orient_and_resize(
    image: Arc<DynamicImage>,
    orientation: u32,
    width: u32,
    height: u32,
) -> (Arc<DynamicImage>, u32) {
    let upright = match rotate(&image, rotation_angle(orientation)) {
        Some(rotated) => Arc::new(rotated),
        None => image,
    };
    (resize(upright, width, height), 1)
}

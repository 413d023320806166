//! Shared test utilities for the photos-server test suite.
//!
//! Synthetic images (optionally carrying an EXIF block) and small builders
//! for library folders on disk.
//!
//! # Usage
//!
//! ```rust
//! use crate::test_helpers::*;
//!
//! let tmp = TempDir::new().unwrap();
//! write_album(&tmp.path().join("photos/trip"), &["a.jpg", "b.jpg"], 64, 48);
//! ```

use image::{ExtendedColorType, ImageEncoder, RgbImage};
use std::path::Path;

// =========================================================================
// Synthetic images
// =========================================================================

fn gradient(width: u32, height: u32) -> RgbImage {
    RgbImage::from_fn(width, height, |x, y| {
        image::Rgb([(x % 256) as u8, (y % 256) as u8, 128])
    })
}

fn ensure_parent(path: &Path) {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent).unwrap();
    }
}

fn encode_jpeg(width: u32, height: u32) -> Vec<u8> {
    let img = gradient(width, height);
    let mut bytes = Vec::new();
    image::codecs::jpeg::JpegEncoder::new(&mut bytes)
        .write_image(img.as_raw(), width, height, ExtendedColorType::Rgb8)
        .unwrap();
    bytes
}

/// Create a small valid JPEG file, creating parent folders as needed.
pub fn create_test_jpeg(path: &Path, width: u32, height: u32) {
    ensure_parent(path);
    std::fs::write(path, encode_jpeg(width, height)).unwrap();
}

/// Create a small valid PNG file, creating parent folders as needed.
pub fn create_test_png(path: &Path, width: u32, height: u32) {
    ensure_parent(path);
    let img = gradient(width, height);
    let file = std::fs::File::create(path).unwrap();
    image::codecs::png::PngEncoder::new(std::io::BufWriter::new(file))
        .write_image(img.as_raw(), width, height, ExtendedColorType::Rgb8)
        .unwrap();
}

/// Create a JPEG with an APP1 EXIF block holding `Orientation` and,
/// optionally, `DateTime` (`"YYYY:MM:DD HH:MM:SS"`).
pub fn create_test_jpeg_with_exif(
    path: &Path,
    width: u32,
    height: u32,
    orientation: u16,
    datetime: Option<&str>,
) {
    ensure_parent(path);
    let jpeg = encode_jpeg(width, height);
    let tiff = tiff_block(orientation, datetime);

    let mut app1 = Vec::new();
    app1.extend_from_slice(&[0xFF, 0xE1]);
    app1.extend_from_slice(&((2 + 6 + tiff.len()) as u16).to_be_bytes());
    app1.extend_from_slice(b"Exif\0\0");
    app1.extend_from_slice(&tiff);

    // SOI, then our APP1, then the rest of the encoder's stream
    let mut out = Vec::with_capacity(jpeg.len() + app1.len());
    out.extend_from_slice(&jpeg[..2]);
    out.extend_from_slice(&app1);
    out.extend_from_slice(&jpeg[2..]);
    std::fs::write(path, out).unwrap();
}

/// Little-endian TIFF header plus a single IFD0.
fn tiff_block(orientation: u16, datetime: Option<&str>) -> Vec<u8> {
    let entry_count: u16 = if datetime.is_some() { 2 } else { 1 };
    let data_offset = 8 + 2 + entry_count as u32 * 12 + 4;

    let mut tiff = Vec::new();
    tiff.extend_from_slice(b"II");
    tiff.extend_from_slice(&42u16.to_le_bytes());
    tiff.extend_from_slice(&8u32.to_le_bytes());
    tiff.extend_from_slice(&entry_count.to_le_bytes());

    // Orientation: SHORT, inline value
    tiff.extend_from_slice(&0x0112u16.to_le_bytes());
    tiff.extend_from_slice(&3u16.to_le_bytes());
    tiff.extend_from_slice(&1u32.to_le_bytes());
    tiff.extend_from_slice(&orientation.to_le_bytes());
    tiff.extend_from_slice(&[0, 0]);

    let mut data = Vec::new();
    if let Some(dt) = datetime {
        let mut ascii = dt.as_bytes().to_vec();
        ascii.push(0);
        // DateTime: ASCII, stored after the IFD
        tiff.extend_from_slice(&0x0132u16.to_le_bytes());
        tiff.extend_from_slice(&2u16.to_le_bytes());
        tiff.extend_from_slice(&(ascii.len() as u32).to_le_bytes());
        tiff.extend_from_slice(&data_offset.to_le_bytes());
        data = ascii;
    }

    tiff.extend_from_slice(&0u32.to_le_bytes());
    tiff.extend_from_slice(&data);
    tiff
}

// =========================================================================
// Library fixtures
// =========================================================================

/// Write one JPEG per name into `folder`.
pub fn write_album(folder: &Path, names: &[&str], width: u32, height: u32) {
    for name in names {
        create_test_jpeg(&folder.join(name), width, height);
    }
}

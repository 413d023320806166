//! Capture metadata read from the image file.
//!
//! Two values matter to the library: when the photo was taken, and how it
//! must be rotated to display upright.
//!
//! ## Capture date
//!
//! The first available source wins:
//!
//! 1. EXIF `DateTimeDigitized`
//! 2. EXIF `DateTime`
//! 3. file modification time
//!
//! EXIF dates carry no timezone and are taken as UTC, so grouping by day
//! uses the wall-clock date the camera recorded.
//!
//! ## Orientation
//!
//! The EXIF `Orientation` tag (1–8). Files without EXIF, or without the tag,
//! report 0 ("unknown"), which the rotation mapping treats like upright.
//!
//! Reading is best-effort: a missing or corrupt EXIF block never fails the
//! caller, it just falls back.

use chrono::{DateTime, NaiveDate, Utc};
use exif::{In, Reader as ExifReader, Tag, Value};
use std::fs::File;
use std::io::BufReader;
use std::path::Path;

/// What the library records about a photo at index time.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CaptureInfo {
    pub date: Option<DateTime<Utc>>,
    pub orientation: u32,
}

/// Read capture date and orientation, falling back as described in the
/// [module docs](self).
pub fn read_capture_info(path: &Path) -> CaptureInfo {
    let exif = read_exif(path);
    let date = exif
        .as_ref()
        .and_then(|e| exif_date(e, Tag::DateTimeDigitized).or_else(|| exif_date(e, Tag::DateTime)))
        .or_else(|| file_date(path));
    let orientation = exif
        .as_ref()
        .and_then(|e| e.get_field(Tag::Orientation, In::PRIMARY))
        .and_then(|field| field.value.get_uint(0))
        .unwrap_or(0);
    CaptureInfo { date, orientation }
}

fn read_exif(path: &Path) -> Option<exif::Exif> {
    let file = File::open(path).ok()?;
    let mut reader = BufReader::new(file);
    ExifReader::new().read_from_container(&mut reader).ok()
}

fn exif_date(exif: &exif::Exif, tag: Tag) -> Option<DateTime<Utc>> {
    let field = exif.get_field(tag, In::PRIMARY)?;
    let Value::Ascii(ref values) = field.value else {
        return None;
    };
    let raw = values.first()?;
    let dt = exif::DateTime::from_ascii(raw).ok()?;
    NaiveDate::from_ymd_opt(dt.year as i32, dt.month as u32, dt.day as u32)?
        .and_hms_opt(dt.hour as u32, dt.minute as u32, dt.second as u32)
        .map(|naive| naive.and_utc())
}

fn file_date(path: &Path) -> Option<DateTime<Utc>> {
    let modified = std::fs::metadata(path).ok()?.modified().ok()?;
    Some(DateTime::<Utc>::from(modified))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_helpers::{create_test_jpeg, create_test_jpeg_with_exif};
    use chrono::TimeZone;
    use tempfile::TempDir;

    #[test]
    fn plain_jpeg_uses_file_time_and_unknown_orientation() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("plain.jpg");
        create_test_jpeg(&path, 16, 16);

        let info = read_capture_info(&path);
        assert_eq!(info.orientation, 0);
        let modified: DateTime<Utc> = std::fs::metadata(&path).unwrap().modified().unwrap().into();
        assert_eq!(info.date, Some(modified));
    }

    #[test]
    fn exif_orientation_and_date_are_read() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("rotated.jpg");
        create_test_jpeg_with_exif(&path, 40, 30, 6, Some("2021:06:15 10:30:00"));

        let info = read_capture_info(&path);
        assert_eq!(info.orientation, 6);
        assert_eq!(
            info.date,
            Some(Utc.with_ymd_and_hms(2021, 6, 15, 10, 30, 0).unwrap())
        );
    }

    #[test]
    fn exif_without_date_falls_back_to_file_time() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("nodate.jpg");
        create_test_jpeg_with_exif(&path, 40, 30, 3, None);

        let info = read_capture_info(&path);
        assert_eq!(info.orientation, 3);
        assert!(info.date.is_some());
    }

    #[test]
    fn missing_file_has_nothing() {
        let info = read_capture_info(Path::new("/nonexistent/photo.jpg"));
        assert_eq!(
            info,
            CaptureInfo {
                date: None,
                orientation: 0
            }
        );
    }
}

//! Pure calculation functions for image dimensions and orientation.
//!
//! All functions here are pure and testable without any I/O or images.

/// Compute the output size of a resize request.
///
/// Returns `None` when the image must be left as is: both requested
/// dimensions are zero, or a non-zero request exceeds the natural size
/// (derivatives are never upscaled). Otherwise the result fits inside the
/// requested box with the natural aspect ratio; a zero dimension leaves that
/// side unbounded.
///
/// # Examples
/// ```
/// # use photos_server::imaging::fit_dimensions;
/// // Height-bounded: 4000x3000 → height 1080
/// assert_eq!(fit_dimensions((4000, 3000), (0, 1080)), Some((1440, 1080)));
///
/// // Never upscaled
/// assert_eq!(fit_dimensions((800, 600), (0, 1080)), None);
/// ```
pub fn fit_dimensions(natural: (u32, u32), requested: (u32, u32)) -> Option<(u32, u32)> {
    let (nat_w, nat_h) = natural;
    let (req_w, req_h) = requested;

    if (req_w == 0 && req_h == 0) || req_w > nat_w || req_h > nat_h {
        return None;
    }
    if nat_w == 0 || nat_h == 0 {
        return None;
    }

    let width_bound = req_h == 0
        || (req_w != 0
            && u64::from(req_w) * u64::from(nat_h) <= u64::from(req_h) * u64::from(nat_w));
    let scaled = |side: u32, num: u32, den: u32| {
        (side as f64 * num as f64 / den as f64).round().max(1.0) as u32
    };
    Some(if width_bound {
        (req_w, scaled(req_w, nat_h, nat_w))
    } else {
        (scaled(req_h, nat_w, nat_h), req_h)
    })
}

/// Map an EXIF orientation tag to the rotation, in degrees counter-clockwise,
/// that displays the image upright.
///
/// Mirrored orientations (2, 4, 5, 7) and unknown values map to 0.
pub fn rotation_angle(orientation: u32) -> i32 {
    match orientation {
        8 => 90,
        3 => 180,
        6 => -90,
        _ => 0,
    }
}

/// Whether rotating by `angle` swaps width and height.
pub fn swaps_dimensions(angle: i32) -> bool {
    angle.rem_euclid(180) == 90
}

#[cfg(test)]
mod tests {
    use super::*;

    // =========================================================================
    // fit_dimensions tests
    // =========================================================================

    #[test]
    fn fit_derives_width_from_height() {
        assert_eq!(fit_dimensions((4000, 3000), (0, 1080)), Some((1440, 1080)));
    }

    #[test]
    fn fit_derives_height_from_width() {
        assert_eq!(fit_dimensions((4000, 3000), (1000, 0)), Some((1000, 750)));
    }

    #[test]
    fn fit_both_given_stays_inside_the_box() {
        assert_eq!(fit_dimensions((4000, 3000), (100, 100)), Some((100, 75)));
        assert_eq!(fit_dimensions((3000, 4000), (100, 100)), Some((75, 100)));
        assert_eq!(fit_dimensions((4000, 3000), (2000, 1000)), Some((1333, 1000)));
    }

    #[test]
    fn fit_both_zero_is_unchanged() {
        assert_eq!(fit_dimensions((4000, 3000), (0, 0)), None);
    }

    #[test]
    fn fit_never_upscales_height() {
        assert_eq!(fit_dimensions((800, 600), (0, 1080)), None);
    }

    #[test]
    fn fit_never_upscales_width() {
        assert_eq!(fit_dimensions((800, 600), (900, 0)), None);
    }

    #[test]
    fn fit_equal_height_is_a_resize_to_same_size() {
        assert_eq!(fit_dimensions((800, 600), (0, 600)), Some((800, 600)));
    }

    #[test]
    fn fit_portrait_keeps_aspect() {
        // 3000x4000 portrait bounded to 250 high → 188x250 (187.5 rounds up)
        assert_eq!(fit_dimensions((3000, 4000), (0, 250)), Some((188, 250)));
    }

    #[test]
    fn fit_extreme_panorama_never_collapses_to_zero() {
        assert_eq!(fit_dimensions((10, 10000), (0, 100)), Some((1, 100)));
    }

    // =========================================================================
    // rotation tests
    // =========================================================================

    #[test]
    fn rotation_angle_mapping() {
        assert_eq!(rotation_angle(1), 0);
        assert_eq!(rotation_angle(8), 90);
        assert_eq!(rotation_angle(3), 180);
        assert_eq!(rotation_angle(6), -90);
    }

    #[test]
    fn rotation_angle_unknown_is_zero() {
        assert_eq!(rotation_angle(0), 0);
        assert_eq!(rotation_angle(2), 0);
        assert_eq!(rotation_angle(5), 0);
        assert_eq!(rotation_angle(42), 0);
    }

    #[test]
    fn quarter_turns_swap_dimensions() {
        assert!(swaps_dimensions(90));
        assert!(swaps_dimensions(-90));
        assert!(!swaps_dimensions(180));
        assert!(!swaps_dimensions(0));
    }
}

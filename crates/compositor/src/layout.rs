use serde::{Deserialize, Serialize};

use crate::error::{ComposeError, ComposeResult};

pub const MAX_OVERLAYS: usize = 3;

/// Fraction of the frame height kept free above the top overlay and below
/// the bottom row.
const EDGE_MARGIN: f64 = 0.1;

/// Top-left corner of an overlay in frame coordinates. May be negative when
/// the overlay is larger than the frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Placement {
    pub x: i64,
    pub y: i64,
}

impl Placement {
    pub fn new(x: i64, y: i64) -> Self {
        Self { x, y }
    }
}

/// Overlay width relative to the frame width when the caller does not pick one.
pub fn default_scale(count: usize) -> f32 {
    if count <= 1 { 0.5 } else { 0.3 }
}

pub fn validate_count(count: usize) -> ComposeResult<()> {
    if (1..=MAX_OVERLAYS).contains(&count) {
        Ok(())
    } else {
        Err(ComposeError::validation(format!(
            "Expected 1, 2, or 3 images, got {count}"
        )))
    }
}

pub fn validate_scale(scale: f32) -> ComposeResult<()> {
    if scale.is_finite() && scale > 0.0 && scale <= 1.0 {
        Ok(())
    } else {
        Err(ComposeError::validation(format!(
            "image scale must be in (0, 1], got {scale}"
        )))
    }
}

/// Target size of an overlay: its width is `scale` of the frame width and the
/// height follows the source aspect ratio. Both dimensions are truncated.
pub fn overlay_size(frame_width: u32, image: (u32, u32), scale: f32) -> ComposeResult<(u32, u32)> {
    let (img_w, img_h) = image;
    if img_w == 0 || img_h == 0 {
        return Err(ComposeError::validation("overlay image has no pixels"));
    }

    let width = (frame_width as f64 * scale as f64) as u32;
    let height = (img_h as f64 * (width as f64 / img_w as f64)) as u32;

    if width == 0 || height == 0 {
        return Err(ComposeError::validation(format!(
            "overlay of {img_w}x{img_h} scaled by {scale} collapses to {width}x{height}"
        )));
    }

    Ok((width, height))
}

/// Positions for 1–3 overlays of the given sizes, in input order.
///
/// One overlay is centred. Two overlays sit centre-top and centre-bottom. With
/// three, the first is centre-top and the other two share the bottom row,
/// separated by half an overlay width. Multi-overlay layouts are computed
/// from the first overlay's size alone, so differently shaped overlays share
/// its anchors.
pub fn placements(frame: (u32, u32), sizes: &[(u32, u32)]) -> ComposeResult<Vec<Placement>> {
    validate_count(sizes.len())?;

    let frame_w = frame.0 as i64;
    let frame_h = frame.1 as i64;
    let margin = (frame.1 as f64 * EDGE_MARGIN) as i64;

    let (w, h) = (sizes[0].0 as i64, sizes[0].1 as i64);
    let centred_x = (frame_w - w).div_euclid(2);
    let top = Placement::new(centred_x, margin);
    let bottom_y = frame_h - h - margin;

    let positions = match sizes.len() {
        1 => vec![Placement::new(centred_x, (frame_h - h).div_euclid(2))],
        2 => vec![top, Placement::new(centred_x, bottom_y)],
        _ => {
            let spacing = w.div_euclid(2);
            let left = (frame_w - 2 * w - spacing).div_euclid(2);
            let right = left + w + spacing;
            vec![
                top,
                Placement::new(left, bottom_y),
                Placement::new(right, bottom_y),
            ]
        }
    };

    Ok(positions)
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn overlay_size_keeps_aspect_ratio() {
        assert_eq!(overlay_size(1080, (400, 200), 0.5).unwrap(), (540, 270));
        assert_eq!(overlay_size(1080, (300, 300), 0.3).unwrap(), (324, 324));
    }

    #[test]
    fn overlay_size_truncates() {
        // 101 * 0.5 = 50.5 -> 50, 33 * 50 / 100 = 16.5 -> 16
        assert_eq!(overlay_size(101, (100, 33), 0.5).unwrap(), (50, 16));
    }

    #[test]
    fn overlay_size_rejects_degenerate_results() {
        assert!(overlay_size(10, (100, 1), 0.05).is_err());
        assert!(overlay_size(1080, (0, 10), 0.5).is_err());
    }

    #[test]
    fn single_overlay_is_centred() {
        let got = placements((1080, 1920), &[(540, 270)]).unwrap();
        assert_eq!(got, vec![Placement::new(270, 825)]);
    }

    #[test]
    fn two_overlays_top_and_bottom() {
        // The bottom anchor comes from the first overlay's height.
        let got = placements((1080, 1920), &[(324, 200), (324, 100)]).unwrap();
        assert_eq!(
            got,
            vec![Placement::new(378, 192), Placement::new(378, 1920 - 200 - 192)]
        );
    }

    #[test]
    fn three_overlays_share_bottom_row() {
        let got = placements((1080, 1920), &[(324, 324), (324, 324), (324, 324)]).unwrap();
        // spacing 162, left = (1080 - 648 - 162) / 2 = 135, right = 135 + 324 + 162
        assert_eq!(
            got,
            vec![
                Placement::new(378, 192),
                Placement::new(135, 1404),
                Placement::new(621, 1404),
            ]
        );
    }

    #[test]
    fn mixed_sizes_follow_the_first_overlay() {
        let got = placements((1080, 1920), &[(300, 100), (500, 900), (200, 50)]).unwrap();
        // spacing 150, left = (1080 - 600 - 150) / 2 = 165, bottom y = 1920 - 100 - 192
        assert_eq!(
            got,
            vec![
                Placement::new(390, 192),
                Placement::new(165, 1628),
                Placement::new(615, 1628),
            ]
        );
    }

    #[test]
    fn oversized_overlay_floors_towards_negative() {
        let got = placements((100, 100), &[(103, 103)]).unwrap();
        assert_eq!(got, vec![Placement::new(-2, -2)]);
    }

    #[test]
    fn rejects_bad_counts() {
        assert!(placements((100, 100), &[]).is_err());
        assert!(placements((100, 100), &[(1, 1); 4]).is_err());
        let err = validate_count(0).unwrap_err();
        assert_eq!(err.to_string(), "validation error: Expected 1, 2, or 3 images, got 0");
    }

    #[test]
    fn default_scale_depends_on_count() {
        assert_eq!(default_scale(1), 0.5);
        assert_eq!(default_scale(2), 0.3);
        assert_eq!(default_scale(3), 0.3);
    }

    #[test]
    fn scale_bounds() {
        assert!(validate_scale(0.5).is_ok());
        assert!(validate_scale(1.0).is_ok());
        assert!(validate_scale(0.0).is_err());
        assert!(validate_scale(1.5).is_err());
        assert!(validate_scale(f32::NAN).is_err());
    }
}

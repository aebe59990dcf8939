use std::path::Path;

use image::{DynamicImage, RgbImage, RgbaImage, imageops::FilterType};
use tracing::{info, warn};

use crate::error::ComposeResult;
use crate::layout::Placement;

/// A still image sized and positioned for compositing onto video frames.
#[derive(Debug, Clone)]
pub struct Overlay {
    pixels: RgbaImage,
    has_alpha: bool,
    placement: Placement,
}

impl Overlay {
    pub fn new(pixels: RgbaImage, has_alpha: bool, placement: Placement) -> Self {
        Self {
            pixels,
            has_alpha,
            placement,
        }
    }

    /// Builds an overlay from a decoded image, resizing it to `size` with
    /// bilinear filtering.
    pub fn from_image(image: &DynamicImage, size: (u32, u32), placement: Placement) -> Self {
        let has_alpha = image.color().has_alpha();
        let pixels = image::imageops::resize(&image.to_rgba8(), size.0, size.1, FilterType::Triangle);
        Self::new(pixels, has_alpha, placement)
    }

    pub fn open(path: &Path) -> ComposeResult<DynamicImage> {
        info!("Loading overlay image from {}", path.display());
        let image = image::open(path)?;
        info!(
            "Overlay image loaded ({}x{}, alpha: {})",
            image.width(),
            image.height(),
            image.color().has_alpha()
        );
        Ok(image)
    }

    pub fn dimensions(&self) -> (u32, u32) {
        self.pixels.dimensions()
    }

    pub fn placement(&self) -> Placement {
        self.placement
    }

    pub fn has_alpha(&self) -> bool {
        self.has_alpha
    }

    /// Whether the overlay lies completely inside a frame of the given size.
    pub fn fits(&self, frame: (u32, u32)) -> bool {
        let (w, h) = self.dimensions();
        let Placement { x, y } = self.placement;
        x >= 0 && y >= 0 && x + w as i64 <= frame.0 as i64 && y + h as i64 <= frame.1 as i64
    }
}

/// Drops overlays that would leave the frame, logging each one.
pub fn retain_fitting(overlays: Vec<Overlay>, frame: (u32, u32)) -> Vec<Overlay> {
    overlays
        .into_iter()
        .enumerate()
        .filter_map(|(idx, overlay)| {
            if overlay.fits(frame) {
                Some(overlay)
            } else {
                let Placement { x, y } = overlay.placement();
                warn!(
                    "Overlay {} at ({x}, {y}) exceeds frame boundaries {}x{}, skipping",
                    idx + 1,
                    frame.0,
                    frame.1
                );
                None
            }
        })
        .collect()
}

/// Paints `overlay` onto `frame`.
///
/// Overlays with an alpha channel are blended per channel as
/// `a * src + (1 - a) * dst` in double precision, truncated to 8 bits.
/// Opaque overlays replace the covered pixels. Overlays that do not fit the
/// frame are left out entirely.
pub fn composite(frame: &mut RgbImage, overlay: &Overlay) {
    if !overlay.fits(frame.dimensions()) {
        return;
    }

    let Placement { x, y } = overlay.placement;
    let (x0, y0) = (x as u32, y as u32);

    for (ox, oy, src) in overlay.pixels.enumerate_pixels() {
        let dst = frame.get_pixel_mut(x0 + ox, y0 + oy);
        if overlay.has_alpha {
            let alpha = src[3] as f64 / 255.0;
            for c in 0..3 {
                let blended = alpha * src[c] as f64 + (1.0 - alpha) * dst[c] as f64;
                dst[c] = blended as u8;
            }
        } else {
            dst[0] = src[0];
            dst[1] = src[1];
            dst[2] = src[2];
        }
    }
}

pub fn composite_frame(frame: &mut RgbImage, overlays: &[Overlay]) {
    for overlay in overlays {
        composite(frame, overlay);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{Rgb, Rgba};
    use pretty_assertions::assert_eq;

    fn solid_overlay(w: u32, h: u32, px: [u8; 4], has_alpha: bool, at: (i64, i64)) -> Overlay {
        Overlay::new(
            RgbaImage::from_pixel(w, h, Rgba(px)),
            has_alpha,
            Placement::new(at.0, at.1),
        )
    }

    #[test]
    fn opaque_overlay_replaces_pixels() {
        let mut frame = RgbImage::from_pixel(4, 4, Rgb([10, 10, 10]));
        let overlay = solid_overlay(2, 2, [200, 100, 50, 0], false, (1, 1));

        composite(&mut frame, &overlay);

        assert_eq!(frame.get_pixel(0, 0), &Rgb([10, 10, 10]));
        assert_eq!(frame.get_pixel(1, 1), &Rgb([200, 100, 50]));
        assert_eq!(frame.get_pixel(2, 2), &Rgb([200, 100, 50]));
        assert_eq!(frame.get_pixel(3, 3), &Rgb([10, 10, 10]));
    }

    #[test]
    fn alpha_overlay_blends_and_truncates() {
        let mut frame = RgbImage::from_pixel(2, 2, Rgb([100, 0, 201]));
        // alpha 128/255 ~ 0.50196
        let overlay = solid_overlay(1, 1, [200, 101, 0, 128], true, (0, 0));

        composite(&mut frame, &overlay);

        // 0.50196 * 200 + 0.49804 * 100 = 150.196
        // 0.50196 * 101 + 0.49804 * 0 = 50.698
        // 0.50196 * 0 + 0.49804 * 201 = 100.106
        assert_eq!(frame.get_pixel(0, 0), &Rgb([150, 50, 100]));
        assert_eq!(frame.get_pixel(1, 1), &Rgb([100, 0, 201]));
    }

    #[test]
    fn blending_truncates_in_double_precision() {
        // 5/255 * 1 + 250/255 * 103 is just below 101 in f64 and rounds up to 101 in f32.
        let mut frame = RgbImage::from_pixel(1, 1, Rgb([103, 103, 103]));
        let overlay = solid_overlay(1, 1, [1, 1, 1, 5], true, (0, 0));

        composite(&mut frame, &overlay);

        assert_eq!(frame.get_pixel(0, 0), &Rgb([100, 100, 100]));
    }

    #[test]
    fn fully_transparent_overlay_keeps_frame() {
        let mut frame = RgbImage::from_pixel(3, 3, Rgb([1, 2, 3]));
        let overlay = solid_overlay(3, 3, [255, 255, 255, 0], true, (0, 0));
        composite(&mut frame, &overlay);
        assert!(frame.pixels().all(|p| *p == Rgb([1, 2, 3])));
    }

    #[test]
    fn fully_opaque_alpha_overlay_replaces() {
        let mut frame = RgbImage::from_pixel(3, 3, Rgb([1, 2, 3]));
        let overlay = solid_overlay(3, 3, [9, 8, 7, 255], true, (0, 0));
        composite(&mut frame, &overlay);
        assert!(frame.pixels().all(|p| *p == Rgb([9, 8, 7])));
    }

    #[test]
    fn overlays_outside_frame_are_skipped() {
        let mut frame = RgbImage::from_pixel(4, 4, Rgb([0, 0, 0]));
        let negative = solid_overlay(2, 2, [255, 255, 255, 255], false, (-1, 0));
        let overflow = solid_overlay(2, 2, [255, 255, 255, 255], false, (3, 0));

        assert!(!negative.fits((4, 4)));
        assert!(!overflow.fits((4, 4)));

        composite_frame(&mut frame, &[negative.clone(), overflow.clone()]);
        assert!(frame.pixels().all(|p| *p == Rgb([0, 0, 0])));

        let kept = retain_fitting(vec![negative, solid_overlay(1, 1, [0; 4], false, (3, 3)), overflow], (4, 4));
        assert_eq!(kept.len(), 1);
        assert_eq!(kept[0].placement(), Placement::new(3, 3));
    }

    #[test]
    fn later_overlays_paint_over_earlier_ones() {
        let mut frame = RgbImage::from_pixel(2, 1, Rgb([0, 0, 0]));
        let first = solid_overlay(2, 1, [10, 10, 10, 255], false, (0, 0));
        let second = solid_overlay(1, 1, [20, 20, 20, 255], false, (1, 0));
        composite_frame(&mut frame, &[first, second]);
        assert_eq!(frame.get_pixel(0, 0), &Rgb([10, 10, 10]));
        assert_eq!(frame.get_pixel(1, 0), &Rgb([20, 20, 20]));
    }

    #[test]
    fn from_image_resizes_and_detects_alpha() {
        let rgb = DynamicImage::ImageRgb8(RgbImage::from_pixel(8, 4, Rgb([5, 5, 5])));
        let overlay = Overlay::from_image(&rgb, (4, 2), Placement::new(0, 0));
        assert_eq!(overlay.dimensions(), (4, 2));
        assert!(!overlay.has_alpha());

        let rgba = DynamicImage::ImageRgba8(RgbaImage::from_pixel(8, 4, Rgba([5, 5, 5, 5])));
        assert!(Overlay::from_image(&rgba, (2, 1), Placement::new(0, 0)).has_alpha());
    }
}

//! Pixel mutation for one image. Every region is erased before any text is
//! drawn, so glyphs of one region can never be wiped by the white fill of
//! an overlapping neighbour.

use image::{DynamicImage, Rgb, RgbImage};
use imageproc::drawing::draw_filled_rect_mut;
use imageproc::rect::Rect;
use tracing::debug;

use crate::layout::{LayoutResult, Typeface};
use crate::ocr::BBox;

pub const ERASE_COLOR: Rgb<u8> = Rgb([255, 255, 255]);
pub const TEXT_COLOR: Rgb<u8> = Rgb([0, 0, 0]);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Padding {
    pub x: u32,
    pub y: u32,
    /// Padded boxes narrower or shorter than this are erased but never
    /// drawn into.
    pub min_box: u32,
}

impl Default for Padding {
    fn default() -> Self {
        Self {
            x: 12,
            y: 10,
            min_box: 10,
        }
    }
}

impl Padding {
    /// Grows `bbox` on every side; the left and top edges stop at 0.
    pub fn apply(&self, bbox: &BBox) -> BBox {
        BBox {
            x0: (bbox.x0 - self.x as i32).max(0),
            y0: (bbox.y0 - self.y as i32).max(0),
            x1: bbox.x1 + self.x as i32,
            y1: bbox.y1 + self.y as i32,
        }
    }

    pub fn is_drawable(&self, padded: &BBox) -> bool {
        let min = self.min_box as i32;
        padded.width() >= min && padded.height() >= min
    }
}

/// RGB pixel buffer exclusively owned by the renderer while one image is
/// processed.
pub struct Canvas {
    image: RgbImage,
}

impl Canvas {
    pub fn new(image: RgbImage) -> Self {
        Self { image }
    }

    pub fn from_dynamic(image: DynamicImage) -> Self {
        Self::new(image.to_rgb8())
    }

    pub fn image(&self) -> &RgbImage {
        &self.image
    }

    pub fn into_image(self) -> RgbImage {
        self.image
    }

    /// Paints the rectangle including its `x1`/`y1` edge, clipped to the
    /// image.
    pub fn fill_rect(&mut self, rect: &BBox, color: Rgb<u8>) {
        let width = rect.width() + 1;
        let height = rect.height() + 1;
        if width <= 0 || height <= 0 {
            return;
        }
        let rect = Rect::at(rect.x0, rect.y0).of_size(width as u32, height as u32);
        draw_filled_rect_mut(&mut self.image, rect, color);
    }

    pub fn draw_text(
        &mut self,
        face: &dyn Typeface,
        x: i32,
        y: i32,
        size: u32,
        text: &str,
        color: Rgb<u8>,
    ) {
        face.draw_text(&mut self.image, x, y, size, text, color);
    }
}

/// A region as the renderer sees it: its OCR box and, when the
/// translation was accepted, the layout to draw inside the padded box.
#[derive(Debug, Clone)]
pub struct RenderRegion {
    pub bbox: BBox,
    pub layout: Option<LayoutResult>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RenderStats {
    pub erased: usize,
    pub drawn: usize,
    pub too_small: usize,
}

pub struct Renderer<'f> {
    face: &'f dyn Typeface,
    padding: Padding,
}

impl<'f> Renderer<'f> {
    pub fn new(face: &'f dyn Typeface, padding: Padding) -> Self {
        Self { face, padding }
    }

    pub fn render(&self, canvas: &mut Canvas, regions: &[RenderRegion]) -> RenderStats {
        let mut stats = RenderStats::default();

        for region in regions {
            canvas.fill_rect(&self.padding.apply(&region.bbox), ERASE_COLOR);
            stats.erased += 1;
        }

        for region in regions {
            let padded = self.padding.apply(&region.bbox);
            if !self.padding.is_drawable(&padded) {
                debug!("skipping draw for undersized box {:?}", padded);
                stats.too_small += 1;
                continue;
            }
            let Some(layout) = region.layout.as_ref() else {
                continue;
            };
            for line in &layout.lines {
                canvas.draw_text(
                    self.face,
                    padded.x0 + line.x,
                    padded.y0 + line.y,
                    layout.font_size,
                    &line.text,
                    TEXT_COLOR,
                );
            }
            stats.drawn += 1;
        }

        stats
    }
}

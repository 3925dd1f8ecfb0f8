use ab_glyph::{Font, FontArc, PxScale, ScaleFont};
use image::{Rgba, RgbaImage};
use imageproc::drawing::{draw_hollow_rect_mut, draw_line_segment_mut, draw_text_mut};
use imageproc::rect::Rect;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

use crate::config::RenderConfig;
use crate::detection::BoundingBox;
use crate::error::{Result, ReviewError};

/// Fonts tried when no label font is configured
const FALLBACK_FONTS: &[&str] = &[
    "/usr/share/fonts/truetype/dejavu/DejaVuSans.ttf",
    "/usr/share/fonts/TTF/DejaVuSans.ttf",
    "/usr/share/fonts/dejavu/DejaVuSans.ttf",
    "/System/Library/Fonts/Supplemental/Arial.ttf",
    "C:/Windows/Fonts/arial.ttf",
];

/// Placeholder size when a frame is unavailable before anything was drawn
const PLACEHOLDER_SIZE: (u32, u32) = (320, 180);

/// Widest box stroke drawn, in pixels
const MAX_STROKE_WIDTH: u32 = 64;

/// Furthest a label may start outside the surface, in pixels
const MAX_TEXT_REACH: f64 = 1_000_000.0;

/// Stroke and text settings shared by every overlay element
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct OverlayStyle {
    pub color: [u8; 3],
    pub line_width: u32,
    pub font_size: f32,
}

impl Default for OverlayStyle {
    fn default() -> Self {
        Self::from(&RenderConfig::default())
    }
}

impl From<&RenderConfig> for OverlayStyle {
    fn from(config: &RenderConfig) -> Self {
        Self {
            color: config.accent_color,
            line_width: config.line_width,
            font_size: config.font_size,
        }
    }
}

impl OverlayStyle {
    fn rgba(&self) -> Rgba<u8> {
        let [r, g, b] = self.color;
        Rgba([r, g, b, 255])
    }
}

/// Drawing surface the overlay renderer paints on
pub trait Canvas {
    /// Reallocate the surface at `width` x `height`, discarding its content
    fn resize(&mut self, width: u32, height: u32);

    /// Copy `bitmap` onto the surface at the origin
    fn draw_bitmap(&mut self, bitmap: &RgbaImage);

    /// Stroke the outline of `bbox`
    fn stroke_rect(&mut self, bbox: &BoundingBox, style: &OverlayStyle);

    /// Draw `text` with its baseline starting at `(x, y)`
    fn fill_text(&mut self, text: &str, x: f64, y: f64, style: &OverlayStyle);

    /// Replace the content with a "frame unavailable" placeholder
    fn show_unavailable(&mut self, style: &OverlayStyle);

    fn dimensions(&self) -> (u32, u32);
}

/// In-memory RGBA raster surface
pub struct ImageCanvas {
    surface: RgbaImage,
    font: Option<FontArc>,
}

impl Default for ImageCanvas {
    fn default() -> Self {
        Self::new()
    }
}

impl ImageCanvas {
    /// Canvas without a label font; boxes are drawn, labels are skipped
    pub fn new() -> Self {
        Self {
            surface: RgbaImage::new(0, 0),
            font: None,
        }
    }

    pub fn with_font(font: FontArc) -> Self {
        Self {
            surface: RgbaImage::new(0, 0),
            font: Some(font),
        }
    }

    /// Canvas using the configured font, or the first system font found
    pub fn from_config(config: &RenderConfig) -> Self {
        match find_font(config.font_path.as_deref()) {
            Some(font) => Self::with_font(font),
            None => {
                info!("No label font available, overlays will be drawn without labels");
                Self::new()
            }
        }
    }

    pub fn has_font(&self) -> bool {
        self.font.is_some()
    }

    pub fn surface(&self) -> &RgbaImage {
        &self.surface
    }

    pub fn into_image(self) -> RgbaImage {
        self.surface
    }

    pub fn save_png(&self, path: &Path) -> Result<()> {
        self.surface
            .save_with_format(path, image::ImageFormat::Png)?;
        debug!("Saved surface to {}", path.display());
        Ok(())
    }
}

/// Load a TrueType/OpenType font from disk
pub fn load_font(path: &Path) -> Result<FontArc> {
    let data = std::fs::read(path)?;
    FontArc::try_from_vec(data).map_err(|e| {
        ReviewError::Configuration(format!("invalid font {}: {}", path.display(), e))
    })
}

fn find_font(configured: Option<&Path>) -> Option<FontArc> {
    if let Some(path) = configured {
        match load_font(path) {
            Ok(font) => return Some(font),
            Err(e) => tracing::warn!("Cannot use label font {}: {}", path.display(), e),
        }
    }

    FALLBACK_FONTS
        .iter()
        .map(PathBuf::from)
        .filter(|path| path.exists())
        .find_map(|path| load_font(&path).ok())
}

/// Round `value` to a pixel index no further than `margin` outside `0..=extent`
fn surface_coord(value: f64, extent: u32, margin: f64) -> i32 {
    value.round().clamp(-margin, f64::from(extent) + margin) as i32
}

impl Canvas for ImageCanvas {
    fn resize(&mut self, width: u32, height: u32) {
        self.surface = RgbaImage::new(width, height);
    }

    fn draw_bitmap(&mut self, bitmap: &RgbaImage) {
        image::imageops::replace(&mut self.surface, bitmap, 0, 0);
    }

    fn stroke_rect(&mut self, bbox: &BoundingBox, style: &OverlayStyle) {
        let (surface_w, surface_h) = self.surface.dimensions();
        let line_width = style.line_width.clamp(1, MAX_STROKE_WIDTH) as i32;

        // Edges far off the surface are pinned just beyond it, so they stay invisible.
        let margin = f64::from(line_width + 1);
        let left = surface_coord(bbox.x1.min(bbox.x2), surface_w, margin);
        let top = surface_coord(bbox.y1.min(bbox.y2), surface_h, margin);
        let width = (surface_coord(bbox.x1.max(bbox.x2), surface_w, margin) - left).max(0);
        let height = (surface_coord(bbox.y1.max(bbox.y2), surface_h, margin) - top).max(0);

        // Stroke is centred on the box edge, one nested outline per pixel of width.
        let half = line_width / 2;
        for step in 0..line_width {
            let inset = step - half;
            let w = width - 2 * inset;
            let h = height - 2 * inset;
            if w <= 0 || h <= 0 {
                continue;
            }
            let rect = Rect::at(left + inset, top + inset).of_size(w as u32, h as u32);
            draw_hollow_rect_mut(&mut self.surface, rect, style.rgba());
        }
    }

    fn fill_text(&mut self, text: &str, x: f64, y: f64, style: &OverlayStyle) {
        let Some(font) = &self.font else {
            return;
        };

        let (surface_w, surface_h) = self.surface.dimensions();
        let scale = PxScale::from(style.font_size);
        let ascent = font.as_scaled(scale).ascent() as f64;
        let reach = (f64::from(style.font_size) * (text.chars().count() as f64 + 1.0))
            .clamp(1.0, MAX_TEXT_REACH);

        draw_text_mut(
            &mut self.surface,
            style.rgba(),
            surface_coord(x, surface_w, reach),
            surface_coord(y - ascent, surface_h, reach),
            scale,
            font,
            text,
        );
    }

    fn show_unavailable(&mut self, style: &OverlayStyle) {
        let (mut width, mut height) = self.surface.dimensions();
        if width == 0 || height == 0 {
            (width, height) = PLACEHOLDER_SIZE;
        }

        self.surface = RgbaImage::from_pixel(width, height, Rgba([40, 40, 40, 255]));
        let (w, h) = (width as f32 - 1.0, height as f32 - 1.0);
        draw_line_segment_mut(&mut self.surface, (0.0, 0.0), (w, h), style.rgba());
        draw_line_segment_mut(&mut self.surface, (0.0, h), (w, 0.0), style.rgba());
    }

    fn dimensions(&self) -> (u32, u32) {
        self.surface.dimensions()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const RED: Rgba<u8> = Rgba([255, 0, 0, 255]);

    fn black(width: u32, height: u32) -> RgbaImage {
        RgbaImage::from_pixel(width, height, Rgba([0, 0, 0, 255]))
    }

    #[test]
    fn test_resize_discards_content() {
        let mut canvas = ImageCanvas::new();
        canvas.resize(8, 8);
        canvas.draw_bitmap(&RgbaImage::from_pixel(8, 8, RED));
        canvas.resize(4, 6);
        assert_eq!(canvas.dimensions(), (4, 6));
        assert!(canvas.surface().pixels().all(|p| p.0 == [0, 0, 0, 0]));
    }

    #[test]
    fn test_two_pixel_stroke() {
        let mut canvas = ImageCanvas::new();
        canvas.resize(40, 40);
        canvas.draw_bitmap(&black(40, 40));
        canvas.stroke_rect(&BoundingBox::new(10.0, 10.0, 20.0, 20.0), &OverlayStyle::default());

        let px = |x, y| *canvas.surface().get_pixel(x, y);
        assert_eq!(px(9, 15), RED);
        assert_eq!(px(10, 15), RED);
        assert_eq!(px(19, 15), RED);
        assert_eq!(px(20, 15), RED);
        assert_eq!(px(15, 9), RED);
        assert_eq!(px(15, 20), RED);
        assert_ne!(px(15, 15), RED);
        assert_ne!(px(8, 15), RED);
        assert_ne!(px(21, 15), RED);
    }

    #[test]
    fn test_malformed_boxes_do_not_panic() {
        let mut canvas = ImageCanvas::new();
        canvas.resize(20, 20);
        let style = OverlayStyle::default();
        canvas.stroke_rect(&BoundingBox::new(5.0, 5.0, 5.0, 5.0), &style);
        canvas.stroke_rect(&BoundingBox::new(15.0, 15.0, 2.0, 3.0), &style);
        canvas.stroke_rect(&BoundingBox::new(-50.0, -50.0, 500.0, 500.0), &style);
        assert_eq!(*canvas.surface().get_pixel(2, 10), RED);
    }

    #[test]
    fn test_huge_coordinates_are_pinned_to_surface() {
        let mut canvas = ImageCanvas::new();
        canvas.resize(20, 12);
        canvas.draw_bitmap(&black(20, 12));
        let style = OverlayStyle::default();

        canvas.stroke_rect(&BoundingBox::new(-3e9, 0.0, 3e9, 10.0), &style);
        canvas.stroke_rect(&BoundingBox::new(f64::MAX, f64::MIN, -f64::MAX, 5.0), &style);

        let px = |x, y| *canvas.surface().get_pixel(x, y);
        assert_eq!(px(10, 0), RED);
        assert_eq!(px(10, 10), RED);
        assert_ne!(px(0, 3), RED);
        assert_ne!(px(19, 3), RED);
    }

    #[test]
    fn test_far_away_label_does_not_panic() {
        let Some(font) = find_font(None) else {
            return;
        };
        let mut canvas = ImageCanvas::with_font(font);
        canvas.resize(30, 30);
        let style = OverlayStyle::default();

        canvas.fill_text("car (1)", -3e9, 10.0, &style);
        canvas.fill_text("car (1)", 3e9, -3e9, &style);
        canvas.fill_text("car (1)", f64::MIN, f64::MAX, &style);
        assert!(canvas.surface().pixels().all(|p| p.0 == [0, 0, 0, 0]));
    }

    #[test]
    fn test_text_without_font_is_skipped() {
        let mut canvas = ImageCanvas::new();
        canvas.resize(30, 30);
        canvas.fill_text("car (1)", 2.0, 20.0, &OverlayStyle::default());
        assert!(canvas.surface().pixels().all(|p| p.0 == [0, 0, 0, 0]));
    }

    #[test]
    fn test_unavailable_placeholder() {
        let mut canvas = ImageCanvas::new();
        canvas.show_unavailable(&OverlayStyle::default());
        assert_eq!(canvas.dimensions(), PLACEHOLDER_SIZE);

        canvas.resize(50, 30);
        canvas.draw_bitmap(&black(50, 30));
        canvas.show_unavailable(&OverlayStyle::default());
        assert_eq!(canvas.dimensions(), (50, 30));
        assert_eq!(*canvas.surface().get_pixel(0, 0), RED);
        assert_eq!(*canvas.surface().get_pixel(25, 2), Rgba([40, 40, 40, 255]));
    }

    #[test]
    fn test_save_png() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("frame.png");
        let mut canvas = ImageCanvas::new();
        canvas.resize(5, 5);
        canvas.save_png(&path).unwrap();

        let reloaded = image::open(&path).unwrap();
        assert_eq!((reloaded.width(), reloaded.height()), (5, 5));
    }
}

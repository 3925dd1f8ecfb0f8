//! Overlay renderer: paints one frame's image and its detections on a canvas.
//!
//! Decoding runs off the event loop. Each decode carries the ticket it was
//! issued for, and a finished decode whose ticket no longer matches the
//! current selection is discarded instead of painted.

pub mod canvas;

use base64::{engine::general_purpose::STANDARD as BASE64, Engine};
use image::RgbaImage;
use tracing::{debug, warn};

use crate::config::RenderConfig;
use crate::detection::{FrameRecord, VehicleDetection};
use crate::error::{Result, ReviewError};

pub use canvas::{load_font, Canvas, ImageCanvas, OverlayStyle};

/// Identifies which result and frame a render was started for
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct RenderTicket {
    pub generation: u64,
    pub frame_index: usize,
}

/// A frame waiting to be decoded; owns its data so it can leave the loop
#[derive(Debug, Clone)]
pub struct RenderJob {
    ticket: RenderTicket,
    image_data: String,
    vehicles: Vec<VehicleDetection>,
}

/// Outcome of decoding a `RenderJob`
#[derive(Debug)]
pub struct DecodedFrame {
    pub ticket: RenderTicket,
    pub vehicles: Vec<VehicleDetection>,
    pub bitmap: Result<RgbaImage>,
}

/// What happened to the surface
#[derive(Debug, Clone, PartialEq)]
pub enum RenderOutcome {
    /// Image and boxes painted
    Drawn {
        frame_index: usize,
        width: u32,
        height: u32,
        boxes: usize,
    },

    /// Image could not be decoded; the surface shows the placeholder
    Unavailable { frame_index: usize, reason: String },

    /// Selection moved on before the decode finished; surface untouched
    Stale { ticket: RenderTicket },
}

impl RenderJob {
    pub fn new(ticket: RenderTicket, frame: &FrameRecord) -> Self {
        Self {
            ticket,
            image_data: frame.image_data.clone(),
            vehicles: frame.vehicles.clone(),
        }
    }

    pub fn ticket(&self) -> RenderTicket {
        self.ticket
    }

    pub async fn decode(self) -> DecodedFrame {
        let RenderJob {
            ticket,
            image_data,
            vehicles,
        } = self;

        let bitmap = match tokio::task::spawn_blocking(move || decode_frame_image(&image_data)).await
        {
            Ok(bitmap) => bitmap,
            Err(e) => Err(ReviewError::Decode(format!("decode task failed: {}", e))),
        };

        DecodedFrame {
            ticket,
            vehicles,
            bitmap,
        }
    }
}

/// Decode a base64 frame payload (a `data:` URL prefix is tolerated)
pub fn decode_frame_image(data: &str) -> Result<RgbaImage> {
    let payload = data.trim();
    let payload = payload
        .split_once(";base64,")
        .map_or(payload, |(_, encoded)| encoded);

    let bytes = BASE64
        .decode(payload)
        .map_err(|e| ReviewError::Decode(format!("invalid base64: {}", e)))?;
    let image = image::load_from_memory(&bytes)
        .map_err(|e| ReviewError::Decode(format!("invalid image: {}", e)))?;

    Ok(image.to_rgba8())
}

/// Text drawn above a vehicle's box
pub fn vehicle_label(vehicle: &VehicleDetection) -> String {
    format!("{} ({})", vehicle.class_label, vehicle.id)
}

pub struct OverlayRenderer {
    style: OverlayStyle,
    label_offset: f64,
}

impl Default for OverlayRenderer {
    fn default() -> Self {
        Self::from_config(&RenderConfig::default())
    }
}

impl OverlayRenderer {
    pub fn new(style: OverlayStyle, label_offset: f64) -> Self {
        Self {
            style,
            label_offset,
        }
    }

    pub fn from_config(config: &RenderConfig) -> Self {
        Self::new(OverlayStyle::from(config), config.label_offset)
    }

    pub fn style(&self) -> &OverlayStyle {
        &self.style
    }

    /// Full redraw: resize to the bitmap, paint it, then one box and label per vehicle
    pub fn draw<C: Canvas + ?Sized>(
        &self,
        canvas: &mut C,
        bitmap: &RgbaImage,
        vehicles: &[VehicleDetection],
    ) {
        canvas.resize(bitmap.width(), bitmap.height());
        canvas.draw_bitmap(bitmap);

        for vehicle in vehicles {
            let bbox = &vehicle.bounding_box;
            canvas.stroke_rect(bbox, &self.style);
            canvas.fill_text(
                &vehicle_label(vehicle),
                bbox.x1,
                bbox.y1 - self.label_offset,
                &self.style,
            );
        }
    }

    /// Paint a decoded frame if it still matches `current`
    pub fn finish<C: Canvas + ?Sized>(
        &self,
        decoded: DecodedFrame,
        current: Option<RenderTicket>,
        canvas: &mut C,
    ) -> RenderOutcome {
        let ticket = decoded.ticket;
        if current != Some(ticket) {
            debug!(
                "Discarding stale decode for frame {} (generation {})",
                ticket.frame_index, ticket.generation
            );
            return RenderOutcome::Stale { ticket };
        }

        match decoded.bitmap {
            Ok(bitmap) => {
                self.draw(canvas, &bitmap, &decoded.vehicles);
                RenderOutcome::Drawn {
                    frame_index: ticket.frame_index,
                    width: bitmap.width(),
                    height: bitmap.height(),
                    boxes: decoded.vehicles.len(),
                }
            }
            Err(e) => {
                warn!("Frame {} unavailable: {}", ticket.frame_index, e);
                canvas.show_unavailable(&self.style);
                RenderOutcome::Unavailable {
                    frame_index: ticket.frame_index,
                    reason: e.to_string(),
                }
            }
        }
    }

    /// Decode and paint one frame with nothing else in flight
    pub async fn render<C: Canvas + ?Sized>(
        &self,
        ticket: RenderTicket,
        frame: &FrameRecord,
        canvas: &mut C,
    ) -> RenderOutcome {
        let decoded = RenderJob::new(ticket, frame).decode().await;
        self.finish(decoded, Some(ticket), canvas)
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::detection::{BoundingBox, DetectionStore, VehicleId};
    use crate::navigator::FrameNavigator;
    use image::{DynamicImage, ImageFormat, Rgba, RgbImage};
    use std::io::Cursor;

    /// Canvas that records every call
    #[derive(Debug, Default)]
    pub(crate) struct RecordingCanvas {
        pub ops: Vec<String>,
        pub size: (u32, u32),
    }

    impl Canvas for RecordingCanvas {
        fn resize(&mut self, width: u32, height: u32) {
            self.ops.clear();
            self.size = (width, height);
            self.ops.push(format!("resize {}x{}", width, height));
        }

        fn draw_bitmap(&mut self, bitmap: &RgbaImage) {
            self.ops
                .push(format!("bitmap {}x{}", bitmap.width(), bitmap.height()));
        }

        fn stroke_rect(&mut self, bbox: &BoundingBox, style: &OverlayStyle) {
            self.ops.push(format!(
                "rect {} {} {} {} w{}",
                bbox.x1, bbox.y1, bbox.x2, bbox.y2, style.line_width
            ));
        }

        fn fill_text(&mut self, text: &str, x: f64, y: f64, _style: &OverlayStyle) {
            self.ops.push(format!("text '{}' at {} {}", text, x, y));
        }

        fn show_unavailable(&mut self, _style: &OverlayStyle) {
            self.ops.clear();
            self.ops.push("unavailable".to_string());
        }

        fn dimensions(&self) -> (u32, u32) {
            self.size
        }
    }

    pub(crate) fn png_base64(width: u32, height: u32) -> String {
        let image = RgbImage::from_pixel(width, height, image::Rgb([0, 0, 80]));
        let mut buf = Vec::new();
        DynamicImage::ImageRgb8(image)
            .write_to(&mut Cursor::new(&mut buf), ImageFormat::Png)
            .unwrap();
        BASE64.encode(buf)
    }

    fn vehicle(id: i64, class: &str, bbox: [f64; 4]) -> VehicleDetection {
        VehicleDetection {
            id: VehicleId::Number(id),
            class_label: class.to_string(),
            bounding_box: BoundingBox::from(bbox),
            confidence: None,
        }
    }

    fn frame(width: u32, height: u32) -> FrameRecord {
        FrameRecord {
            image_data: png_base64(width, height),
            vehicles: vec![
                vehicle(1, "car", [10.0, 20.0, 30.0, 40.0]),
                vehicle(7, "truck", [40.0, 5.0, 60.0, 25.0]),
            ],
            source_frame: None,
        }
    }

    fn ticket(frame_index: usize) -> RenderTicket {
        RenderTicket {
            generation: 1,
            frame_index,
        }
    }

    #[test]
    fn test_decode_png_and_jpeg() {
        let decoded = decode_frame_image(&png_base64(64, 48)).unwrap();
        assert_eq!(decoded.dimensions(), (64, 48));

        let mut jpeg = Vec::new();
        DynamicImage::ImageRgb8(RgbImage::new(32, 16))
            .write_to(&mut Cursor::new(&mut jpeg), ImageFormat::Jpeg)
            .unwrap();
        let data_url = format!("data:image/jpeg;base64,{}", BASE64.encode(jpeg));
        assert_eq!(decode_frame_image(&data_url).unwrap().dimensions(), (32, 16));
    }

    #[test]
    fn test_decode_rejects_garbage() {
        assert!(matches!(
            decode_frame_image("!!not base64!!"),
            Err(ReviewError::Decode(_))
        ));
        assert!(matches!(
            decode_frame_image(&BASE64.encode(b"plain text, not an image")),
            Err(ReviewError::Decode(_))
        ));
    }

    #[test]
    fn test_label_format() {
        assert_eq!(vehicle_label(&vehicle(12, "bus", [0.0; 4])), "bus (12)");
        let mut named = vehicle(0, "car", [0.0; 4]);
        named.id = VehicleId::Text("a7".to_string());
        assert_eq!(vehicle_label(&named), "car (a7)");
    }

    #[tokio::test]
    async fn test_draw_order_and_label_anchor() {
        let renderer = OverlayRenderer::default();
        let mut canvas = RecordingCanvas::default();
        let outcome = renderer.render(ticket(0), &frame(80, 60), &mut canvas).await;

        assert_eq!(
            outcome,
            RenderOutcome::Drawn {
                frame_index: 0,
                width: 80,
                height: 60,
                boxes: 2
            }
        );
        assert_eq!(
            canvas.ops,
            vec![
                "resize 80x60",
                "bitmap 80x60",
                "rect 10 20 30 40 w2",
                "text 'car (1)' at 10 15",
                "rect 40 5 60 25 w2",
                "text 'truck (7)' at 40 0",
            ]
        );
    }

    #[tokio::test]
    async fn test_stale_decode_is_discarded() {
        let renderer = OverlayRenderer::default();
        let mut canvas = RecordingCanvas::default();
        canvas.resize(10, 10);

        let job = RenderJob::new(ticket(2), &frame(80, 60));
        let decoded = job.decode().await;
        let outcome = renderer.finish(decoded, Some(ticket(3)), &mut canvas);

        assert_eq!(outcome, RenderOutcome::Stale { ticket: ticket(2) });
        assert_eq!(canvas.ops, vec!["resize 10x10"]);
    }

    #[tokio::test]
    async fn test_newer_generation_makes_ticket_stale() {
        let renderer = OverlayRenderer::default();
        let mut canvas = RecordingCanvas::default();
        let decoded = RenderJob::new(ticket(0), &frame(8, 8)).decode().await;
        let newer = RenderTicket {
            generation: 2,
            frame_index: 0,
        };
        assert!(matches!(
            renderer.finish(decoded, Some(newer), &mut canvas),
            RenderOutcome::Stale { .. }
        ));
        assert!(canvas.ops.is_empty());
    }

    #[tokio::test]
    async fn test_corrupt_frame_is_reported() {
        let renderer = OverlayRenderer::default();
        let mut canvas = ImageCanvas::new();
        let mut broken = frame(8, 8);
        broken.image_data = "####".to_string();

        let outcome = renderer.render(ticket(4), &broken, &mut canvas).await;
        match outcome {
            RenderOutcome::Unavailable {
                frame_index,
                reason,
            } => {
                assert_eq!(frame_index, 4);
                assert!(reason.contains("base64"));
            }
            other => panic!("expected Unavailable, got {:?}", other),
        }
        assert_ne!(canvas.dimensions(), (0, 0));
    }

    #[tokio::test]
    async fn test_repeated_render_is_idempotent() {
        let renderer = OverlayRenderer::default();
        let record = frame(80, 60);
        let mut canvas = ImageCanvas::new();

        renderer.render(ticket(0), &record, &mut canvas).await;
        let first = canvas.surface().clone();
        renderer.render(ticket(0), &record, &mut canvas).await;
        assert_eq!(canvas.surface(), &first);

        assert_eq!(*first.get_pixel(10, 30), Rgba([255, 0, 0, 255]));
        assert_eq!(*first.get_pixel(20, 30), Rgba([0, 0, 80, 255]));
    }

    #[tokio::test]
    async fn test_switching_frames_fully_redraws() {
        let renderer = OverlayRenderer::default();
        let mut canvas = ImageCanvas::new();
        renderer.render(ticket(0), &frame(80, 60), &mut canvas).await;

        let mut empty = frame(20, 10);
        empty.vehicles.clear();
        renderer.render(ticket(1), &empty, &mut canvas).await;

        assert_eq!(canvas.dimensions(), (20, 10));
        assert!(canvas.surface().pixels().all(|p| p.0 == [0, 0, 80, 255]));
    }

    #[tokio::test]
    async fn test_extreme_box_from_service_renders() {
        let raw = format!(
            r#"{{"total_vehicles": 1, "vehicle_counts": {{"car": 1}}, "detections": [
                {{"frame_data": "{}", "vehicles": [{{"id": 1, "class": "car", "bbox": [-3e9, 0, 3e9, 10]}}]}}
            ]}}"#,
            png_base64(40, 24)
        );
        let mut store = DetectionStore::new();
        let mut navigator = FrameNavigator::default();
        store.set_result(raw.as_bytes(), &mut navigator).unwrap();

        let renderer = OverlayRenderer::default();
        let mut canvas = ImageCanvas::from_config(&RenderConfig::default());
        let record = store.frame(0).unwrap();
        let outcome = renderer.render(ticket(0), record, &mut canvas).await;

        assert_eq!(
            outcome,
            RenderOutcome::Drawn {
                frame_index: 0,
                width: 40,
                height: 24,
                boxes: 1
            }
        );
        assert_eq!(*canvas.surface().get_pixel(20, 0), Rgba([255, 0, 0, 255]));
        assert_eq!(*canvas.surface().get_pixel(20, 9), Rgba([255, 0, 0, 255]));
        assert_eq!(*canvas.surface().get_pixel(20, 15), Rgba([0, 0, 80, 255]));
    }
}

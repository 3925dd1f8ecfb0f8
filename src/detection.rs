//! Detection data model and the store that owns the latest analysis result.
//!
//! The analysis service response is the only external trust boundary of the
//! client, so it is parsed through strict serde types: required fields must be
//! present and unknown fields are rejected.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use tracing::{debug, info};

use crate::error::{Result, ReviewError};
use crate::navigator::FrameNavigator;

/// Identifier the service attaches to a detected vehicle.
///
/// Only used as a display label; no cross-frame tracking guarantee is assumed.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(untagged)]
pub enum VehicleId {
    Number(i64),
    Text(String),
}

impl fmt::Display for VehicleId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            VehicleId::Number(n) => write!(f, "{}", n),
            VehicleId::Text(s) => f.write_str(s),
        }
    }
}

/// Axis-aligned box in the frame's pixel space, `(x1, y1)` to `(x2, y2)`.
///
/// Ordering of the corners is not enforced.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(from = "[f64; 4]", into = "[f64; 4]")]
pub struct BoundingBox {
    pub x1: f64,
    pub y1: f64,
    pub x2: f64,
    pub y2: f64,
}

impl BoundingBox {
    pub fn new(x1: f64, y1: f64, x2: f64, y2: f64) -> Self {
        Self { x1, y1, x2, y2 }
    }

    /// Signed width, negative for a malformed box
    pub fn width(&self) -> f64 {
        self.x2 - self.x1
    }

    /// Signed height, negative for a malformed box
    pub fn height(&self) -> f64 {
        self.y2 - self.y1
    }

    pub fn is_well_formed(&self) -> bool {
        self.x1 <= self.x2 && self.y1 <= self.y2
    }
}

impl From<[f64; 4]> for BoundingBox {
    fn from([x1, y1, x2, y2]: [f64; 4]) -> Self {
        Self { x1, y1, x2, y2 }
    }
}

impl From<BoundingBox> for [f64; 4] {
    fn from(b: BoundingBox) -> Self {
        [b.x1, b.y1, b.x2, b.y2]
    }
}

/// One detected vehicle within a frame
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct VehicleDetection {
    pub id: VehicleId,

    #[serde(rename = "class")]
    pub class_label: String,

    #[serde(rename = "bbox")]
    pub bounding_box: BoundingBox,

    /// Detector confidence, when the service reports it
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub confidence: Option<f64>,
}

/// One still image of the source video plus its detections
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct FrameRecord {
    /// Base64 JPEG payload
    #[serde(rename = "frame_data")]
    pub image_data: String,

    pub vehicles: Vec<VehicleDetection>,

    /// Frame number in the source video, when the service reports it
    #[serde(rename = "frame", default, skip_serializing_if = "Option::is_none")]
    pub source_frame: Option<u64>,
}

/// Parsed analysis response
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct DetectionResult {
    pub total_vehicles: u64,

    pub vehicle_counts: BTreeMap<String, u64>,

    #[serde(rename = "detections")]
    pub frames: Vec<FrameRecord>,

    /// Source video frame rate, when the service reports it
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fps: Option<f64>,

    /// Service notice that came instead of detections
    #[serde(skip)]
    pub message: Option<String>,
}

/// `{"message": "..."}` answer the service gives when nothing was detected
#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct EmptyReport {
    message: String,
}

impl DetectionResult {
    /// Result with no frames and no vehicles
    pub fn empty(message: impl Into<String>) -> Self {
        Self {
            total_vehicles: 0,
            vehicle_counts: BTreeMap::new(),
            frames: Vec::new(),
            fps: None,
            message: Some(message.into()),
        }
    }

    pub fn frame_count(&self) -> usize {
        self.frames.len()
    }

    pub fn frame(&self, index: usize) -> Option<&FrameRecord> {
        self.frames.get(index)
    }

    /// Number of individual detections across all frames
    pub fn detection_count(&self) -> usize {
        self.frames.iter().map(|f| f.vehicles.len()).sum()
    }
}

/// Parse a raw service response body into a `DetectionResult`
pub fn parse_response(raw: &[u8]) -> Result<DetectionResult> {
    let value: serde_json::Value = serde_json::from_slice(raw)
        .map_err(|e| ReviewError::MalformedResponse(format!("body is not JSON: {}", e)))?;

    let is_empty_report = match value.as_object() {
        Some(object) => object.contains_key("message") && !object.contains_key("detections"),
        None => {
            return Err(ReviewError::MalformedResponse(
                "expected a JSON object".to_string(),
            ))
        }
    };

    if is_empty_report {
        let report: EmptyReport = serde_json::from_value(value)
            .map_err(|e| ReviewError::MalformedResponse(e.to_string()))?;
        debug!("Service reported no detections: {}", report.message);
        return Ok(DetectionResult::empty(report.message));
    }

    serde_json::from_value(value).map_err(|e| ReviewError::MalformedResponse(e.to_string()))
}

/// Owner of the current `DetectionResult`.
///
/// Results are only ever replaced wholesale. Every replacement or clear bumps
/// the generation so work started against an older result can be recognised.
#[derive(Debug, Default)]
pub struct DetectionStore {
    result: Option<DetectionResult>,
    generation: u64,
}

impl DetectionStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Parse `raw`, store it and move the cursor back to the first frame.
    ///
    /// On a parse error the store is left untouched.
    pub fn set_result(
        &mut self,
        raw: &[u8],
        navigator: &mut FrameNavigator,
    ) -> Result<&DetectionResult> {
        let parsed = parse_response(raw)?;
        Ok(self.replace(parsed, navigator))
    }

    /// Store an already parsed result
    pub fn replace(
        &mut self,
        result: DetectionResult,
        navigator: &mut FrameNavigator,
    ) -> &DetectionResult {
        navigator.reset(result.frame_count());
        self.generation += 1;

        info!(
            "📊 Stored detection result: {} frames, {} vehicles",
            result.frame_count(),
            result.total_vehicles
        );
        self.result.insert(result)
    }

    /// Drop the stored result
    pub fn clear(&mut self, navigator: &mut FrameNavigator) {
        if self.result.take().is_some() {
            debug!("Cleared previous detection result");
        }
        self.generation += 1;
        navigator.reset(0);
    }

    pub fn result(&self) -> Option<&DetectionResult> {
        self.result.as_ref()
    }

    pub fn has_result(&self) -> bool {
        self.result.is_some()
    }

    pub fn frame(&self, index: usize) -> Option<&FrameRecord> {
        self.result.as_ref().and_then(|r| r.frame(index))
    }

    pub fn frame_count(&self) -> usize {
        self.result.as_ref().map_or(0, DetectionResult::frame_count)
    }

    pub fn total_vehicles(&self) -> Option<u64> {
        self.result.as_ref().map(|r| r.total_vehicles)
    }

    pub fn vehicle_counts(&self) -> Option<&BTreeMap<String, u64>> {
        self.result.as_ref().map(|r| &r.vehicle_counts)
    }

    /// Bumped on every replace or clear
    pub fn generation(&self) -> u64 {
        self.generation
    }
}

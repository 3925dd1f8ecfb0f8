//! CCTV Review - client for a remote vehicle analysis service
//!
//! Uploads a video, tracks the upload/analysis lifecycle, and reviews the
//! returned per-frame vehicle detections as bounding-box overlays and an
//! aggregate vehicle-type chart.

pub mod chart;
pub mod config;
pub mod detection;
pub mod error;
pub mod navigator;
pub mod render;
pub mod review;
pub mod session;
pub mod upload;

// Re-export main types for easy access
pub use crate::chart::ChartSeries;
pub use crate::config::{Config, ConfigBuilder};
pub use crate::detection::{
    parse_response, BoundingBox, DetectionResult, DetectionStore, FrameRecord, VehicleDetection,
    VehicleId,
};
pub use crate::error::{Result, ReviewError, ValidationError};
pub use crate::navigator::FrameNavigator;
pub use crate::render::{
    Canvas, ImageCanvas, OverlayRenderer, OverlayStyle, RenderJob, RenderOutcome, RenderTicket,
};
pub use crate::review::ReviewSession;
pub use crate::session::{AnalysisSession, SessionPhase, SessionSnapshot};
pub use crate::upload::{
    AnalysisService, FileCandidate, HttpAnalysisService, SubmitOutcome, TransferEvent,
    UploadController, UploadLimits, VideoFile,
};

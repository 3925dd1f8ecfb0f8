//! Upload controller: the file-selection gate and the submit round trip.

pub mod service;

use bytes::Bytes;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::config::{Config, UploadConfig};
use crate::detection::DetectionStore;
use crate::error::{Result, ReviewError, ValidationError};
use crate::navigator::FrameNavigator;
use crate::session::{AnalysisSession, SessionPhase};

pub use service::{AnalysisService, HttpAnalysisService, ProgressSender, TransferEvent, UPLOAD_FIELD};

/// Where the bytes of a video come from
#[derive(Debug, Clone)]
pub enum FileSource {
    Path(PathBuf),
    Memory(Bytes),
}

/// A file the user picked, before validation
#[derive(Debug, Clone)]
pub struct FileCandidate {
    pub name: String,
    pub size: u64,
    /// Declared media type, e.g. `video/mp4`
    pub media_type: String,
    pub source: FileSource,
}

impl FileCandidate {
    /// Describe a file on disk; the media type is derived from its extension
    pub async fn from_path(path: &Path) -> Result<Self> {
        let metadata = tokio::fs::metadata(path).await?;
        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_else(|| "video".to_string());
        let media_type = mime_guess::from_path(path)
            .first_raw()
            .unwrap_or("application/octet-stream")
            .to_string();

        Ok(Self {
            name,
            size: metadata.len(),
            media_type,
            source: FileSource::Path(path.to_path_buf()),
        })
    }

    pub fn from_bytes(
        name: impl Into<String>,
        media_type: impl Into<String>,
        data: impl Into<Bytes>,
    ) -> Self {
        let data = data.into();
        Self {
            name: name.into(),
            size: data.len() as u64,
            media_type: media_type.into(),
            source: FileSource::Memory(data),
        }
    }

    pub fn with_media_type(mut self, media_type: impl Into<String>) -> Self {
        self.media_type = media_type.into();
        self
    }
}

/// A candidate that passed the selection gate.
///
/// Only `UploadLimits::validate` creates these.
#[derive(Debug, Clone)]
pub struct VideoFile {
    name: String,
    size: u64,
    media_type: String,
    source: FileSource,
}

impl VideoFile {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn size(&self) -> u64 {
        self.size
    }

    pub fn media_type(&self) -> &str {
        &self.media_type
    }

    pub fn source(&self) -> &FileSource {
        &self.source
    }
}

/// Size and type rules of the selection gate
#[derive(Debug, Clone)]
pub struct UploadLimits {
    pub max_file_size: u64,
    pub allowed_media_types: Vec<String>,
}

impl Default for UploadLimits {
    fn default() -> Self {
        Self::from(&UploadConfig::default())
    }
}

impl From<&UploadConfig> for UploadLimits {
    fn from(config: &UploadConfig) -> Self {
        Self {
            max_file_size: config.max_file_size,
            allowed_media_types: config.allowed_media_types.clone(),
        }
    }
}

impl UploadLimits {
    pub fn validate(&self, candidate: FileCandidate) -> std::result::Result<VideoFile, ValidationError> {
        if candidate.size > self.max_file_size {
            return Err(ValidationError::TooLarge {
                size: candidate.size,
                limit: self.max_file_size,
            });
        }

        if !self.allowed_media_types.iter().any(|t| *t == candidate.media_type) {
            return Err(ValidationError::UnsupportedType {
                media_type: candidate.media_type,
            });
        }

        Ok(VideoFile {
            name: candidate.name,
            size: candidate.size,
            media_type: candidate.media_type,
            source: candidate.source,
        })
    }
}

/// What a call to `UploadController::submit` ended with
#[derive(Debug)]
pub enum SubmitOutcome {
    /// Nothing selected, nothing happened
    NoSelection,

    /// A request was already in flight, nothing happened
    Busy(SessionPhase),

    /// Result stored, session is `Ready`
    Ready { frames: usize, total_vehicles: u64 },

    /// Session is `Failed`; the error is the diagnostic detail
    Failed(ReviewError),
}

/// Owns the current selection and drives one submission at a time
pub struct UploadController {
    limits: UploadLimits,
    timeout: Duration,
    selection: Option<VideoFile>,
    validation_error: Option<ValidationError>,
}

impl UploadController {
    pub fn new(limits: UploadLimits, timeout: Duration) -> Self {
        Self {
            limits,
            timeout,
            selection: None,
            validation_error: None,
        }
    }

    pub fn from_config(config: &Config) -> Self {
        Self::new(
            UploadLimits::from(&config.upload),
            config.service.request_timeout(),
        )
    }

    pub fn selection(&self) -> Option<&VideoFile> {
        self.selection.as_ref()
    }

    pub fn validation_error(&self) -> Option<&ValidationError> {
        self.validation_error.as_ref()
    }

    pub fn limits(&self) -> &UploadLimits {
        &self.limits
    }

    /// Validate and select a file.
    ///
    /// A rejected candidate leaves the previous selection in place.
    pub fn select_file(
        &mut self,
        candidate: FileCandidate,
    ) -> std::result::Result<&VideoFile, ValidationError> {
        match self.limits.validate(candidate) {
            Ok(video) => {
                info!(
                    "🎬 Selected {} ({} bytes, {})",
                    video.name, video.size, video.media_type
                );
                self.validation_error = None;
                Ok(self.selection.insert(video))
            }
            Err(e) => {
                warn!("File rejected: {:?}", e);
                self.validation_error = Some(e.clone());
                Err(e)
            }
        }
    }

    /// Whether the submit action should be enabled
    pub fn can_submit(&self, session: &AnalysisSession) -> bool {
        self.selection.is_some() && !session.is_busy()
    }

    /// Upload the selection and wait for the analysis on the same request.
    ///
    /// Drives `session` through Uploading -> Analyzing -> Ready, or to Failed.
    /// The previous result is dropped before anything is sent.
    pub async fn submit(
        &mut self,
        service: &dyn AnalysisService,
        session: &mut AnalysisSession,
        store: &mut DetectionStore,
        navigator: &mut FrameNavigator,
        cancel: &CancellationToken,
    ) -> SubmitOutcome {
        let Some(video) = self.selection.clone() else {
            debug!("Submit ignored: no file selected");
            return SubmitOutcome::NoSelection;
        };

        if session.begin_upload().is_err() {
            return SubmitOutcome::Busy(session.phase());
        }
        self.validation_error = None;
        store.clear(navigator);

        let (tx, mut rx) = mpsc::unbounded_channel();
        let request = service.analyze(&video, tx);
        tokio::pin!(request);
        let deadline = tokio::time::sleep(self.timeout);
        tokio::pin!(deadline);

        let response = loop {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => break Err(ReviewError::Cancelled),
                Some(event) = rx.recv() => apply_transfer_event(session, event),
                response = &mut request => break response,
                _ = &mut deadline => break Err(ReviewError::Timeout(self.timeout)),
            }
        };

        // Progress always precedes the response it belongs to.
        while let Ok(event) = rx.try_recv() {
            apply_transfer_event(session, event);
        }

        let stored = response.and_then(|body| {
            if session.phase() == SessionPhase::Uploading {
                session.transfer_complete()?;
            }
            store
                .set_result(&body, navigator)
                .map(|result| (result.frame_count(), result.total_vehicles))
        });

        match stored.and_then(|summary| session.result_received().map(|_| summary)) {
            Ok((frames, total_vehicles)) => SubmitOutcome::Ready {
                frames,
                total_vehicles,
            },
            Err(e) => {
                error!(
                    "Analysis of {} via {} failed: {}",
                    video.name(),
                    service.endpoint(),
                    e
                );
                if let Err(transition) = session.fail(e.user_message()) {
                    warn!("Could not mark session failed: {}", transition);
                }
                SubmitOutcome::Failed(e)
            }
        }
    }
}

fn apply_transfer_event(session: &mut AnalysisSession, event: TransferEvent) {
    let applied = match event {
        TransferEvent::Progress {
            bytes_sent,
            bytes_total,
        } => session.record_progress(bytes_sent, bytes_total).map(|_| ()),
        TransferEvent::Completed => session.transfer_complete(),
    };

    if let Err(e) = applied {
        debug!("Ignoring transfer event {:?}: {}", event, e);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const MIB: u64 = 1024 * 1024;

    fn sized(name: &str, media_type: &str, size: u64) -> FileCandidate {
        FileCandidate {
            name: name.to_string(),
            size,
            media_type: media_type.to_string(),
            source: FileSource::Path(PathBuf::from(name)),
        }
    }

    fn controller() -> UploadController {
        UploadController::new(UploadLimits::default(), Duration::from_secs(5))
    }

    #[test]
    fn test_accepts_allowed_types() {
        let mut ctrl = controller();
        for media_type in ["video/mp4", "video/quicktime", "video/x-msvideo"] {
            assert!(ctrl.select_file(sized("a", media_type, 10 * MIB)).is_ok());
            assert!(ctrl.validation_error().is_none());
        }
    }

    #[test]
    fn test_size_limit_is_inclusive() {
        let mut ctrl = controller();
        assert!(ctrl.select_file(sized("edge.mp4", "video/mp4", 100 * MIB)).is_ok());
        assert!(ctrl.select_file(sized("over.mp4", "video/mp4", 100 * MIB + 1)).is_err());
    }

    #[test]
    fn test_oversized_file_is_rejected_without_selection() {
        let mut ctrl = controller();
        let err = ctrl
            .select_file(sized("big.mp4", "video/mp4", 150 * MIB))
            .unwrap_err();
        assert_eq!(err.to_string(), "File size exceeds 100MB limit.");
        assert!(ctrl.selection().is_none());
        assert_eq!(ctrl.validation_error(), Some(&err));
    }

    #[test]
    fn test_rejection_keeps_prior_selection() {
        let mut ctrl = controller();
        ctrl.select_file(sized("good.mov", "video/quicktime", MIB)).unwrap();

        assert!(ctrl.select_file(sized("bad.mkv", "video/x-matroska", MIB)).is_err());
        assert!(ctrl.select_file(sized("huge.mp4", "video/mp4", 200 * MIB)).is_err());
        assert_eq!(ctrl.selection().unwrap().name(), "good.mov");

        ctrl.select_file(sized("next.avi", "video/x-msvideo", MIB)).unwrap();
        assert_eq!(ctrl.selection().unwrap().name(), "next.avi");
        assert!(ctrl.validation_error().is_none());
    }

    #[test]
    fn test_media_type_must_match_exactly() {
        let mut ctrl = controller();
        assert!(ctrl.select_file(sized("a.mp4", "video/mp4; codecs=avc1", MIB)).is_err());
        assert!(ctrl.select_file(sized("a.mp4", "VIDEO/MP4", MIB)).is_err());
        assert!(ctrl.select_file(sized("a.mp4", "", MIB)).is_err());
    }

    #[test]
    fn test_can_submit_gate() {
        let mut ctrl = controller();
        let mut session = AnalysisSession::new();
        assert!(!ctrl.can_submit(&session));

        ctrl.select_file(sized("a.mp4", "video/mp4", MIB)).unwrap();
        assert!(ctrl.can_submit(&session));

        session.begin_upload().unwrap();
        assert!(!ctrl.can_submit(&session));
    }

    #[tokio::test]
    async fn test_candidate_from_path_guesses_type() {
        let dir = tempfile::TempDir::new().unwrap();
        for (file, expected) in [
            ("clip.mp4", "video/mp4"),
            ("clip.mov", "video/quicktime"),
            ("clip.avi", "video/x-msvideo"),
        ] {
            let path = dir.path().join(file);
            tokio::fs::write(&path, b"data").await.unwrap();
            let candidate = FileCandidate::from_path(&path).await.unwrap();
            assert_eq!(candidate.media_type, expected);
            assert_eq!(candidate.size, 4);
            assert_eq!(candidate.name, file);
        }
    }
}

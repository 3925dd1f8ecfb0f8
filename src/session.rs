use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use tokio::sync::watch;
use tracing::{debug, info, warn};

use crate::error::{Result, ReviewError};

/// Lifecycle phases of one upload/analysis run
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub enum SessionPhase {
    /// Nothing submitted yet
    Idle,

    /// Video bytes are being streamed to the analysis service
    Uploading,

    /// Upload finished, waiting for the service to answer on the same request
    Analyzing,

    /// A detection result is available
    Ready,

    /// Transport, status or payload failure
    Failed,
}

impl SessionPhase {
    /// Whether a request is in flight
    pub fn is_busy(self) -> bool {
        matches!(self, SessionPhase::Uploading | SessionPhase::Analyzing)
    }

    /// Phases from which a new submission may start
    pub fn accepts_submit(self) -> bool {
        matches!(
            self,
            SessionPhase::Idle | SessionPhase::Ready | SessionPhase::Failed
        )
    }
}

impl fmt::Display for SessionPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            SessionPhase::Idle => "idle",
            SessionPhase::Uploading => "uploading",
            SessionPhase::Analyzing => "analyzing",
            SessionPhase::Ready => "ready",
            SessionPhase::Failed => "failed",
        };
        f.write_str(name)
    }
}

/// Percentage of an upload that has been handed to the transport.
///
/// Unknown or zero totals report 0 until the transfer is complete.
pub fn progress_percent(bytes_sent: u64, bytes_total: Option<u64>) -> u8 {
    match bytes_total {
        Some(total) if total > 0 => {
            let percent = (bytes_sent as f64 * 100.0 / total as f64).round();
            percent.clamp(0.0, 100.0) as u8
        }
        _ => 0,
    }
}

/// What an observer sees after each session update
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionSnapshot {
    pub phase: SessionPhase,
    pub upload_progress_percent: u8,
}

/// Single source of truth for what the review surface may show
#[derive(Debug)]
pub struct AnalysisSession {
    phase: SessionPhase,
    upload_progress_percent: u8,
    error: Option<String>,
    submissions: u32,
    started_at: Option<DateTime<Utc>>,
    finished_at: Option<DateTime<Utc>>,
    updates: watch::Sender<SessionSnapshot>,
}

impl Default for AnalysisSession {
    fn default() -> Self {
        Self::new()
    }
}

impl AnalysisSession {
    pub fn new() -> Self {
        let (updates, _) = watch::channel(SessionSnapshot {
            phase: SessionPhase::Idle,
            upload_progress_percent: 0,
        });

        Self {
            phase: SessionPhase::Idle,
            upload_progress_percent: 0,
            error: None,
            submissions: 0,
            started_at: None,
            finished_at: None,
            updates,
        }
    }

    /// Follow phase and progress changes as they are applied
    pub fn subscribe(&self) -> watch::Receiver<SessionSnapshot> {
        self.updates.subscribe()
    }

    pub fn snapshot(&self) -> SessionSnapshot {
        SessionSnapshot {
            phase: self.phase,
            upload_progress_percent: self.upload_progress_percent,
        }
    }

    fn publish(&self) {
        self.updates.send_replace(self.snapshot());
    }

    pub fn phase(&self) -> SessionPhase {
        self.phase
    }

    pub fn upload_progress_percent(&self) -> u8 {
        self.upload_progress_percent
    }

    /// Failure banner text, only set while `Failed`
    pub fn error(&self) -> Option<&str> {
        self.error.as_deref()
    }

    pub fn is_busy(&self) -> bool {
        self.phase.is_busy()
    }

    /// Number of submissions started in this session
    pub fn submissions(&self) -> u32 {
        self.submissions
    }

    pub fn started_at(&self) -> Option<DateTime<Utc>> {
        self.started_at
    }

    /// Time spent in the last finished run
    pub fn last_run_duration(&self) -> Option<chrono::Duration> {
        match (self.started_at, self.finished_at) {
            (Some(start), Some(end)) => Some(end - start),
            _ => None,
        }
    }

    fn reject(&self, event: &'static str) -> ReviewError {
        warn!("Rejected session event '{}' while {}", event, self.phase);
        ReviewError::InvalidTransition {
            from: self.phase,
            event,
        }
    }

    /// Idle/Ready/Failed -> Uploading
    pub fn begin_upload(&mut self) -> Result<()> {
        if !self.phase.accepts_submit() {
            return Err(self.reject("submit"));
        }

        self.phase = SessionPhase::Uploading;
        self.upload_progress_percent = 0;
        self.error = None;
        self.submissions += 1;
        self.started_at = Some(Utc::now());
        self.finished_at = None;

        info!("📤 Submission #{} started uploading", self.submissions);
        self.publish();
        Ok(())
    }

    /// Apply one transfer progress tick. Values never decrease within a run.
    pub fn record_progress(&mut self, bytes_sent: u64, bytes_total: Option<u64>) -> Result<u8> {
        if self.phase != SessionPhase::Uploading {
            return Err(self.reject("record progress"));
        }

        let previous = self.upload_progress_percent;
        self.upload_progress_percent = previous.max(progress_percent(bytes_sent, bytes_total));

        if self.upload_progress_percent / 10 > previous / 10 {
            info!("📤 {}% Uploaded", self.upload_progress_percent);
        } else {
            debug!(
                "Upload progress {}% ({} of {:?} bytes)",
                self.upload_progress_percent, bytes_sent, bytes_total
            );
        }
        self.publish();
        Ok(self.upload_progress_percent)
    }

    /// Uploading -> Analyzing
    pub fn transfer_complete(&mut self) -> Result<()> {
        if self.phase != SessionPhase::Uploading {
            return Err(self.reject("complete transfer"));
        }

        self.upload_progress_percent = 100;
        self.phase = SessionPhase::Analyzing;

        info!("🔍 Upload complete, waiting for analysis");
        self.publish();
        Ok(())
    }

    /// Analyzing -> Ready
    pub fn result_received(&mut self) -> Result<()> {
        if self.phase != SessionPhase::Analyzing {
            return Err(self.reject("accept result"));
        }

        self.phase = SessionPhase::Ready;
        self.finished_at = Some(Utc::now());

        info!("✅ Analysis result received");
        self.publish();
        Ok(())
    }

    /// Uploading/Analyzing -> Failed
    pub fn fail(&mut self, message: impl Into<String>) -> Result<()> {
        if !self.phase.is_busy() {
            return Err(self.reject("fail"));
        }

        let message = message.into();
        info!("❌ Session failed while {}: {}", self.phase, message);

        self.phase = SessionPhase::Failed;
        self.error = Some(message);
        self.finished_at = Some(Utc::now());
        self.publish();
        Ok(())
    }

    /// Progress line for the indicator, present only while busy
    pub fn status_text(&self) -> Option<String> {
        match self.phase {
            SessionPhase::Uploading => Some(format!("{}% Uploaded", self.upload_progress_percent)),
            SessionPhase::Analyzing => Some("Analyzing video...".to_string()),
            _ => None,
        }
    }

    /// Value the progress bar should show while busy
    pub fn progress_bar_value(&self) -> Option<u8> {
        match self.phase {
            SessionPhase::Uploading => Some(self.upload_progress_percent),
            SessionPhase::Analyzing => Some(100),
            _ => None,
        }
    }

    /// Label of the submit action
    pub fn submit_label(&self) -> &'static str {
        match self.phase {
            SessionPhase::Uploading => "Uploading...",
            SessionPhase::Analyzing => "Analyzing...",
            _ => "Analyze Video",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_session_is_idle() {
        let session = AnalysisSession::new();
        assert_eq!(session.phase(), SessionPhase::Idle);
        assert_eq!(session.upload_progress_percent(), 0);
        assert!(session.error().is_none());
        assert!(session.status_text().is_none());
        assert_eq!(session.submit_label(), "Analyze Video");
    }

    #[test]
    fn test_subscribers_see_latest_update() {
        let mut session = AnalysisSession::new();
        let mut updates = session.subscribe();
        assert!(!updates.has_changed().unwrap());

        session.begin_upload().unwrap();
        session.record_progress(40, Some(100)).unwrap();
        assert!(updates.has_changed().unwrap());
        assert_eq!(
            *updates.borrow_and_update(),
            SessionSnapshot {
                phase: SessionPhase::Uploading,
                upload_progress_percent: 40
            }
        );

        // Rejected events publish nothing.
        session.result_received().unwrap_err();
        assert!(!updates.has_changed().unwrap());

        session.transfer_complete().unwrap();
        assert_eq!(updates.borrow().phase, SessionPhase::Analyzing);
    }

    #[test]
    fn test_happy_path_transitions() {
        let mut session = AnalysisSession::new();
        session.begin_upload().unwrap();
        assert_eq!(session.phase(), SessionPhase::Uploading);
        assert_eq!(session.submit_label(), "Uploading...");

        session.record_progress(50, Some(100)).unwrap();
        assert_eq!(session.status_text().as_deref(), Some("50% Uploaded"));

        session.transfer_complete().unwrap();
        assert_eq!(session.phase(), SessionPhase::Analyzing);
        assert_eq!(session.upload_progress_percent(), 100);
        assert_eq!(session.status_text().as_deref(), Some("Analyzing video..."));
        assert_eq!(session.progress_bar_value(), Some(100));

        session.result_received().unwrap();
        assert_eq!(session.phase(), SessionPhase::Ready);
        assert!(session.last_run_duration().is_some());
    }

    #[test]
    fn test_invalid_transitions_are_rejected() {
        let mut session = AnalysisSession::new();
        assert!(session.transfer_complete().is_err());
        assert!(session.result_received().is_err());
        assert!(session.fail("boom").is_err());
        assert!(session.record_progress(1, Some(2)).is_err());
        assert_eq!(session.phase(), SessionPhase::Idle);

        session.begin_upload().unwrap();
        let err = session.begin_upload().unwrap_err();
        assert!(matches!(
            err,
            ReviewError::InvalidTransition { from: SessionPhase::Uploading, .. }
        ));
        assert!(session.result_received().is_err());
    }

    #[test]
    fn test_failure_and_resubmission() {
        let mut session = AnalysisSession::new();
        session.begin_upload().unwrap();
        session.fail("Error uploading or analyzing file. Please try again.").unwrap();
        assert_eq!(session.phase(), SessionPhase::Failed);
        assert!(session.error().is_some());

        session.begin_upload().unwrap();
        assert_eq!(session.phase(), SessionPhase::Uploading);
        assert!(session.error().is_none());
        assert_eq!(session.upload_progress_percent(), 0);
        assert_eq!(session.submissions(), 2);
    }

    #[test]
    fn test_ready_accepts_resubmission() {
        let mut session = AnalysisSession::new();
        session.begin_upload().unwrap();
        session.transfer_complete().unwrap();
        session.result_received().unwrap();

        session.begin_upload().unwrap();
        assert_eq!(session.phase(), SessionPhase::Uploading);
    }

    #[test]
    fn test_progress_is_monotonic() {
        let mut session = AnalysisSession::new();
        session.begin_upload().unwrap();
        assert_eq!(session.record_progress(60, Some(100)).unwrap(), 60);
        assert_eq!(session.record_progress(40, Some(100)).unwrap(), 60);
        assert_eq!(session.record_progress(100, Some(100)).unwrap(), 100);
    }

    #[test]
    fn test_progress_percent_rounding() {
        assert_eq!(progress_percent(0, Some(100)), 0);
        assert_eq!(progress_percent(1, Some(3)), 33);
        assert_eq!(progress_percent(2, Some(3)), 67);
        assert_eq!(progress_percent(3, Some(3)), 100);
        assert_eq!(progress_percent(500, Some(100)), 100);
        assert_eq!(progress_percent(42, None), 0);
        assert_eq!(progress_percent(42, Some(0)), 0);
    }
}

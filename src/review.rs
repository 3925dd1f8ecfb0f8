//! `ReviewSession`: one user's upload, result and frame cursor as explicit
//! owned state, plus the read-only views the review surface binds to.

use tokio_util::sync::CancellationToken;
use tracing::info;

use crate::chart::ChartSeries;
use crate::config::Config;
use crate::detection::{DetectionResult, DetectionStore, FrameRecord};
use crate::error::{Result, ValidationError};
use crate::navigator::FrameNavigator;
use crate::render::{Canvas, DecodedFrame, OverlayRenderer, RenderJob, RenderOutcome, RenderTicket};
use crate::session::AnalysisSession;
use crate::upload::{AnalysisService, FileCandidate, SubmitOutcome, UploadController, VideoFile};

pub struct ReviewSession {
    service: Box<dyn AnalysisService>,
    controller: UploadController,
    session: AnalysisSession,
    store: DetectionStore,
    navigator: FrameNavigator,
    renderer: OverlayRenderer,
    chart: Option<ChartSeries>,
    cancel: CancellationToken,
}

impl ReviewSession {
    pub fn new(config: &Config, service: Box<dyn AnalysisService>) -> Self {
        Self {
            service,
            controller: UploadController::from_config(config),
            session: AnalysisSession::new(),
            store: DetectionStore::new(),
            navigator: FrameNavigator::default(),
            renderer: OverlayRenderer::from_config(&config.render),
            chart: None,
            cancel: CancellationToken::new(),
        }
    }

    pub fn session(&self) -> &AnalysisSession {
        &self.session
    }

    pub fn store(&self) -> &DetectionStore {
        &self.store
    }

    pub fn navigator(&self) -> &FrameNavigator {
        &self.navigator
    }

    pub fn controller(&self) -> &UploadController {
        &self.controller
    }

    pub fn result(&self) -> Option<&DetectionResult> {
        self.store.result()
    }

    pub fn select_file(
        &mut self,
        candidate: FileCandidate,
    ) -> std::result::Result<&VideoFile, ValidationError> {
        self.controller.select_file(candidate)
    }

    /// Submit action enabled: a valid file is selected and nothing is in flight
    pub fn can_submit(&self) -> bool {
        self.controller.can_submit(&self.session)
    }

    /// Token that aborts the current (or next) submission when cancelled
    pub fn cancel_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Upload the selected file and wait for its analysis
    pub async fn submit(&mut self) -> SubmitOutcome {
        if self.cancel.is_cancelled() {
            self.cancel = CancellationToken::new();
        }

        let outcome = self
            .controller
            .submit(
                self.service.as_ref(),
                &mut self.session,
                &mut self.store,
                &mut self.navigator,
                &self.cancel,
            )
            .await;

        if !matches!(outcome, SubmitOutcome::NoSelection | SubmitOutcome::Busy(_)) {
            self.refresh_chart();
        }
        outcome
    }

    /// Review a response obtained elsewhere (e.g. saved to disk) without a session run
    pub fn load_response(&mut self, raw: &[u8]) -> Result<()> {
        let frames = self.store.set_result(raw, &mut self.navigator)?.frame_count();
        self.refresh_chart();
        info!("📂 Loaded saved analysis response with {} frames", frames);
        Ok(())
    }

    fn refresh_chart(&mut self) {
        self.chart = self.store.result().map(ChartSeries::from_result);
    }

    /// Single banner: validation error first, then session failure
    pub fn error_banner(&self) -> Option<String> {
        self.controller
            .validation_error()
            .map(ToString::to_string)
            .or_else(|| self.session.error().map(str::to_string))
    }

    pub fn status_text(&self) -> Option<String> {
        self.session.status_text()
    }

    pub fn submit_label(&self) -> &'static str {
        self.session.submit_label()
    }

    /// Chart series for the current result; unaffected by navigation
    pub fn chart(&self) -> Option<&ChartSeries> {
        self.chart.as_ref()
    }

    pub fn total_vehicles_text(&self) -> Option<String> {
        self.store
            .total_vehicles()
            .map(|total| format!("Total Vehicles Detected: {}", total))
    }

    pub fn next_frame(&mut self) -> bool {
        self.navigator.next()
    }

    pub fn previous_frame(&mut self) -> bool {
        self.navigator.previous()
    }

    pub fn go_to_frame(&mut self, index: usize) -> Option<usize> {
        self.navigator.go_to(index)
    }

    pub fn frame_caption(&self) -> Option<String> {
        self.navigator.caption()
    }

    pub fn current_frame(&self) -> Option<&FrameRecord> {
        self.navigator
            .current()
            .and_then(|index| self.store.frame(index))
    }

    /// Ticket for the frame the surface should currently show
    pub fn current_ticket(&self) -> Option<RenderTicket> {
        let frame_index = self.navigator.current()?;
        self.store.frame(frame_index)?;
        Some(RenderTicket {
            generation: self.store.generation(),
            frame_index,
        })
    }

    /// Start rendering the current frame; decode the job, then `finish_render`
    pub fn begin_render(&self) -> Option<RenderJob> {
        let ticket = self.current_ticket()?;
        let frame = self.store.frame(ticket.frame_index)?;
        Some(RenderJob::new(ticket, frame))
    }

    /// Paint a decoded job unless the selection moved on meanwhile
    pub fn finish_render<C: Canvas + ?Sized>(
        &self,
        decoded: DecodedFrame,
        canvas: &mut C,
    ) -> RenderOutcome {
        self.renderer.finish(decoded, self.current_ticket(), canvas)
    }

    /// Decode and paint the current frame, `None` when there is nothing to show
    pub async fn render_current<C: Canvas + ?Sized>(&self, canvas: &mut C) -> Option<RenderOutcome> {
        let job = self.begin_render()?;
        let decoded = job.decode().await;
        Some(self.finish_render(decoded, canvas))
    }
}

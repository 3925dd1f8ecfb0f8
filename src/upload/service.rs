//! Wire contract with the analysis service: one multipart POST whose `file`
//! field carries the video, answered on the same request with the detection JSON.

use async_trait::async_trait;
use bytes::Bytes;
use futures::{stream, Stream, TryStreamExt};
use std::io;
use std::pin::Pin;
use tokio::sync::mpsc;
use tokio_util::io::ReaderStream;
use tracing::{debug, info};

use super::{FileSource, VideoFile};
use crate::config::ServiceConfig;
use crate::error::{Result, ReviewError};

/// Multipart field carrying the video bytes
pub const UPLOAD_FIELD: &str = "file";

/// Transfer notifications emitted while the request body is streamed
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransferEvent {
    /// `bytes_sent` bytes have been handed to the transport so far
    Progress { bytes_sent: u64, bytes_total: Option<u64> },

    /// The whole body has been handed to the transport
    Completed,
}

pub type ProgressSender = mpsc::UnboundedSender<TransferEvent>;

type ChunkStream = Pin<Box<dyn Stream<Item = io::Result<Bytes>> + Send + Sync>>;

/// Remote service that turns a video into detections.
///
/// The same request carries the upload and the eventual analysis result.
#[async_trait]
pub trait AnalysisService: Send + Sync {
    /// Upload `video` and return the raw response body of a successful answer
    async fn analyze(&self, video: &VideoFile, progress: ProgressSender) -> Result<Bytes>;

    /// Where uploads go, for logging
    fn endpoint(&self) -> &str;
}

/// Analysis service reached over HTTP with a single multipart POST
pub struct HttpAnalysisService {
    endpoint: String,
    client: reqwest::Client,
    chunk_size: usize,
}

impl HttpAnalysisService {
    pub fn new(config: &ServiceConfig, chunk_size: usize) -> Result<Self> {
        let client = reqwest::Client::builder()
            .connect_timeout(config.connect_timeout())
            .build()?;

        Ok(Self {
            endpoint: config.endpoint.clone(),
            client,
            chunk_size: chunk_size.max(1),
        })
    }
}

/// Split the video into body chunks
async fn chunk_stream(video: &VideoFile, chunk_size: usize) -> Result<ChunkStream> {
    let chunk_size = chunk_size.max(1);
    match video.source() {
        FileSource::Path(path) => {
            let file = tokio::fs::File::open(path).await?;
            Ok(Box::pin(ReaderStream::with_capacity(file, chunk_size)))
        }
        FileSource::Memory(data) => {
            let chunks: Vec<io::Result<Bytes>> = (0..data.len())
                .step_by(chunk_size)
                .map(|start| Ok(data.slice(start..(start + chunk_size).min(data.len()))))
                .collect();
            Ok(Box::pin(stream::iter(chunks)))
        }
    }
}

/// Report every chunk pulled by the transport, then completion
fn track_progress(chunks: ChunkStream, total: u64, progress: ProgressSender) -> ChunkStream {
    let mut sent = 0u64;
    Box::pin(chunks.inspect_ok(move |chunk| {
        sent += chunk.len() as u64;
        // A closed receiver only means nobody is watching progress any more.
        let _ = progress.send(TransferEvent::Progress {
            bytes_sent: sent,
            bytes_total: Some(total),
        });
        if sent >= total {
            let _ = progress.send(TransferEvent::Completed);
        }
    }))
}

#[async_trait]
impl AnalysisService for HttpAnalysisService {
    async fn analyze(&self, video: &VideoFile, progress: ProgressSender) -> Result<Bytes> {
        let total = video.size();
        info!(
            "🌐 Uploading {} ({} bytes) to {}",
            video.name(),
            total,
            self.endpoint
        );

        let chunks = chunk_stream(video, self.chunk_size).await?;
        let body = reqwest::Body::wrap_stream(track_progress(chunks, total, progress));

        let part = reqwest::multipart::Part::stream_with_length(body, total)
            .file_name(video.name().to_string())
            .mime_str(video.media_type())?;
        let form = reqwest::multipart::Form::new().part(UPLOAD_FIELD, part);

        let response = self
            .client
            .post(&self.endpoint)
            .multipart(form)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(ReviewError::Status {
                status: status.as_u16(),
                body,
            });
        }

        let body = response.bytes().await?;
        debug!("Analysis response: {} bytes", body.len());
        Ok(body)
    }

    fn endpoint(&self) -> &str {
        &self.endpoint
    }
}

//! Display surface that pulls an MJPEG stream over HTTP.
//!
//! Each assigned source gets its own fetch task; assigning a new source or
//! clearing the surface aborts the previous task, so at most one request is
//! ever in flight. The first decoded part signals `loaded`, every part is
//! published to the shared [`FrameStore`], and any failure or the end of the
//! body signals `failed`.

use futures::StreamExt;
use reqwest::Client;
use reqwest::header::{CACHE_CONTROL, CONTENT_TYPE, PRAGMA};
use thiserror::Error;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, trace};
use url::Url;

use super::session::SourceId;
use super::surface::{DisplaySurface, Frame, FrameStore, SurfaceSignals};
use crate::mjpeg::{MjpegError, MjpegParser, boundary_from_content_type};

#[derive(Error, Debug)]
enum FetchError {
    #[error("request failed: {0}")]
    Request(#[from] reqwest::Error),

    #[error("HTTP {0}")]
    Status(reqwest::StatusCode),

    #[error("not an MJPEG stream (content type '{0}')")]
    NotMultipart(String),

    #[error("malformed stream: {0}")]
    Parse(#[from] MjpegError),

    #[error("stream ended")]
    Ended,
}

pub struct HttpStreamSurface {
    client: Client,
    signals: SurfaceSignals,
    frames: FrameStore,
    max_frame_bytes: usize,
    task: Option<JoinHandle<()>>,
}

impl HttpStreamSurface {
    pub fn new(
        client: Client,
        signals: SurfaceSignals,
        frames: FrameStore,
        max_frame_bytes: usize,
    ) -> Self {
        Self {
            client,
            signals,
            frames,
            max_frame_bytes,
            task: None,
        }
    }

    fn abort_fetch(&mut self) {
        if let Some(task) = self.task.take() {
            task.abort();
        }
    }
}

impl DisplaySurface for HttpStreamSurface {
    fn set_source(&mut self, source: SourceId, url: &Url) {
        self.abort_fetch();

        let fetch = StreamFetch {
            client: self.client.clone(),
            url: url.clone(),
            source,
            signals: self.signals.clone(),
            frames: self.frames.clone(),
            max_frame_bytes: self.max_frame_bytes,
        };
        self.task = Some(tokio::spawn(fetch.run()));
    }

    fn clear_source(&mut self) {
        self.abort_fetch();
        self.frames.clear();
    }
}

impl Drop for HttpStreamSurface {
    fn drop(&mut self) {
        self.abort_fetch();
    }
}

struct StreamFetch {
    client: Client,
    url: Url,
    source: SourceId,
    signals: SurfaceSignals,
    frames: FrameStore,
    max_frame_bytes: usize,
}

impl StreamFetch {
    async fn run(self) {
        debug!(source = %self.source, url = %self.url, "Opening stream");
        let error = match self.pump().await {
            Ok(()) => FetchError::Ended,
            Err(e) => e,
        };
        debug!(source = %self.source, "Stream fetch finished: {}", error);
        self.signals.failed(self.source, error.to_string());
    }

    async fn pump(&self) -> Result<(), FetchError> {
        let response = self
            .client
            .get(self.url.clone())
            .header(CACHE_CONTROL, "no-cache")
            .header(PRAGMA, "no-cache")
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(FetchError::Status(response.status()));
        }

        let content_type = response
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|value| value.to_str().ok())
            .unwrap_or_default()
            .to_string();
        let boundary = boundary_from_content_type(&content_type)
            .ok_or_else(|| FetchError::NotMultipart(content_type.clone()))?;

        let mut parser = MjpegParser::new(&boundary, self.max_frame_bytes);
        let mut body = response.bytes_stream();
        let mut sequence = 0u64;

        while let Some(chunk) = body.next().await {
            parser.push(&chunk?);
            while let Some(part) = parser.next_part()? {
                sequence += 1;
                trace!(source = %self.source, sequence, bytes = part.data.len(), "Frame received");
                self.frames.publish(Frame {
                    source: self.source,
                    sequence,
                    data: part.data,
                    received_at: Instant::now(),
                });
                if sequence == 1 {
                    self.signals.loaded(self.source);
                }
            }
            if parser.is_closed() {
                break;
            }
        }
        Ok(())
    }
}

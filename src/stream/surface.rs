//! The seam between the connection manager and whatever displays frames.

use bytes::Bytes;
use std::sync::Arc;
use tokio::sync::{mpsc, watch};
use tokio::time::Instant;
use tracing::debug;
use url::Url;

use super::manager::ManagerCommand;
use super::session::SourceId;
use crate::errors::StreamError;

/// Something that can be pointed at a stream URL.
///
/// Assigning a source must not block: implementations start loading in the
/// background and report the outcome through [`SurfaceSignals`] tagged with
/// the same [`SourceId`].
pub trait DisplaySurface: Send + 'static {
    fn set_source(&mut self, source: SourceId, url: &Url);

    fn clear_source(&mut self);
}

/// Read access to the frame currently on display.
pub trait FrameSampler: Send + Sync {
    /// Downscale the displayed frame to `width`×`height` RGB.
    fn sample(&self, width: u32, height: u32) -> Result<FrameSample, StreamError>;

    /// When the most recent frame arrived, if any has.
    fn last_frame_at(&self) -> Option<Instant>;
}

/// A downscaled RGB copy of a displayed frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FrameSample {
    pub width: u32,
    pub height: u32,
    /// Packed RGB triples, row-major
    pub pixels: Vec<u8>,
}

impl FrameSample {
    pub fn new(width: u32, height: u32, pixels: Vec<u8>) -> Self {
        Self {
            width,
            height,
            pixels,
        }
    }

    /// Sum of absolute per-channel differences.
    ///
    /// Returns `None` when the samples have different dimensions and are
    /// therefore not comparable.
    pub fn dissimilarity(&self, other: &FrameSample) -> Option<u64> {
        if self.width != other.width
            || self.height != other.height
            || self.pixels.len() != other.pixels.len()
        {
            return None;
        }

        Some(
            self.pixels
                .iter()
                .zip(&other.pixels)
                .map(|(a, b)| u64::from(a.abs_diff(*b)))
                .sum(),
        )
    }
}

/// An encoded frame as received from the stream
#[derive(Debug, Clone)]
pub struct Frame {
    pub source: SourceId,
    pub sequence: u64,
    pub data: Bytes,
    pub received_at: Instant,
}

/// Holds the latest displayed frame and implements [`FrameSampler`] over it.
#[derive(Debug, Clone)]
pub struct FrameStore {
    latest: Arc<watch::Sender<Option<Arc<Frame>>>>,
}

impl Default for FrameStore {
    fn default() -> Self {
        Self::new()
    }
}

impl FrameStore {
    pub fn new() -> Self {
        let (latest, _) = watch::channel(None);
        Self {
            latest: Arc::new(latest),
        }
    }

    pub fn publish(&self, frame: Frame) {
        self.latest.send_replace(Some(Arc::new(frame)));
    }

    pub fn clear(&self) {
        self.latest.send_replace(None);
    }

    pub fn latest(&self) -> Option<Arc<Frame>> {
        self.latest.borrow().clone()
    }

    /// Receive a notification for every new frame
    pub fn subscribe(&self) -> watch::Receiver<Option<Arc<Frame>>> {
        self.latest.subscribe()
    }
}

impl FrameSampler for FrameStore {
    fn sample(&self, width: u32, height: u32) -> Result<FrameSample, StreamError> {
        let frame = self
            .latest()
            .ok_or_else(|| StreamError::sample_failure("no frame on display"))?;

        let decoded = image::load_from_memory_with_format(&frame.data, image::ImageFormat::Jpeg)
            .map_err(|e| StreamError::sample_failure(format!("undecodable frame: {e}")))?;
        let scaled = decoded
            .resize_exact(width, height, image::imageops::FilterType::Triangle)
            .to_rgb8();

        Ok(FrameSample::new(width, height, scaled.into_raw()))
    }

    fn last_frame_at(&self) -> Option<Instant> {
        self.latest.borrow().as_ref().map(|frame| frame.received_at)
    }
}

/// Lets a surface report load outcomes back to the manager.
#[derive(Debug, Clone)]
pub struct SurfaceSignals {
    inbox: mpsc::WeakUnboundedSender<ManagerCommand>,
}

impl SurfaceSignals {
    pub(crate) fn new(inbox: mpsc::WeakUnboundedSender<ManagerCommand>) -> Self {
        Self { inbox }
    }

    /// The first frame of `source` has been displayed
    pub fn loaded(&self, source: SourceId) {
        self.post(ManagerCommand::Loaded { source });
    }

    /// Loading `source` failed or the stream broke off
    pub fn failed(&self, source: SourceId, reason: impl Into<String>) {
        self.post(ManagerCommand::LoadFailed {
            source,
            reason: reason.into(),
        });
    }

    fn post(&self, command: ManagerCommand) {
        let sent = self
            .inbox
            .upgrade()
            .is_some_and(|inbox| inbox.send(command).is_ok());
        if !sent {
            debug!("Stream manager has shut down, dropping surface signal");
        }
    }
}

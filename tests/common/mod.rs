//! Shared fixtures for the integration tests.

#![allow(dead_code)]

use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use url::Url;

use camfeed::config::StreamConfig;
use camfeed::errors::StreamError;
use camfeed::stream::{
    DisplaySurface, FrameSample, FrameSampler, ManagerChannel, SourceId, StreamConnectionManager,
    StreamHandle, SurfaceSignals, VariantSignals,
};

/// Display surface that records assignments and never loads on its own.
#[derive(Clone, Default)]
pub struct FakeSurface {
    assigned: Arc<Mutex<Vec<(SourceId, Url)>>>,
    clears: Arc<Mutex<usize>>,
}

impl FakeSurface {
    pub fn assignments(&self) -> usize {
        self.assigned.lock().unwrap().len()
    }

    pub fn current(&self) -> (SourceId, Url) {
        self.assigned
            .lock()
            .unwrap()
            .last()
            .cloned()
            .expect("no source assigned")
    }

    pub fn clears(&self) -> usize {
        *self.clears.lock().unwrap()
    }
}

impl DisplaySurface for FakeSurface {
    fn set_source(&mut self, source: SourceId, url: &Url) {
        self.assigned.lock().unwrap().push((source, url.clone()));
    }

    fn clear_source(&mut self) {
        *self.clears.lock().unwrap() += 1;
    }
}

pub struct Harness {
    pub handle: StreamHandle,
    pub surface: FakeSurface,
    pub signals: SurfaceSignals,
    pub task: JoinHandle<()>,
}

impl Harness {
    pub fn spawn(config: StreamConfig) -> Self {
        Self::spawn_with(config, VariantSignals::detached())
    }

    pub fn spawn_with(config: StreamConfig, variant_signals: VariantSignals) -> Self {
        let surface = FakeSurface::default();
        let channel = ManagerChannel::new();
        let signals = channel.surface_signals();
        let (manager, handle) =
            StreamConnectionManager::new(&config, surface.clone(), variant_signals, channel)
                .unwrap();
        let task = tokio::spawn(manager.run());
        Self {
            handle,
            surface,
            signals,
            task,
        }
    }

    /// Report the current source as loaded
    pub async fn load_current(&self) {
        let (source, _) = self.surface.current();
        self.signals.loaded(source);
        settle().await;
    }

    pub async fn fail_current(&self) {
        let (source, _) = self.surface.current();
        self.signals.failed(source, "connection reset");
        settle().await;
    }

    pub async fn start_active(&self) {
        self.handle.start();
        settle().await;
        self.load_current().await;
    }
}

/// Let spawned tasks process everything queued so far without moving the
/// paused clock past any real deadline.
pub async fn settle() {
    for _ in 0..16 {
        tokio::task::yield_now().await;
    }
}

/// Sampler returning a fixed picture
pub struct StaticSampler {
    pub sample: FrameSample,
    pub last_frame: Mutex<Option<Instant>>,
}

impl StaticSampler {
    pub fn new() -> Self {
        Self {
            sample: FrameSample::new(2, 2, vec![42; 12]),
            last_frame: Mutex::new(None),
        }
    }

    pub fn with_last_frame(at: Instant) -> Self {
        let sampler = Self::new();
        *sampler.last_frame.lock().unwrap() = Some(at);
        sampler
    }
}

impl FrameSampler for StaticSampler {
    fn sample(&self, _width: u32, _height: u32) -> Result<FrameSample, StreamError> {
        Ok(self.sample.clone())
    }

    fn last_frame_at(&self) -> Option<Instant> {
        *self.last_frame.lock().unwrap()
    }
}

pub const MS: Duration = Duration::from_millis(1);

/// Serve `router` on an ephemeral local port and return its base URL
pub async fn serve(router: axum::Router) -> Url {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, router).await.unwrap();
    });
    Url::parse(&format!("http://{addr}")).unwrap()
}

/// A small solid-color JPEG
pub fn jpeg(width: u32, height: u32, rgb: [u8; 3]) -> Vec<u8> {
    let image = image::RgbImage::from_pixel(width, height, image::Rgb(rgb));
    let mut out = std::io::Cursor::new(Vec::new());
    image
        .write_to(&mut out, image::ImageFormat::Jpeg)
        .unwrap();
    out.into_inner()
}

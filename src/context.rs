//! Composition root: builds every component from a [`Config`] and wires
//! their signals together.

use std::sync::Arc;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::bandwidth::{BandwidthEstimator, BandwidthTier};
use crate::camera_api::CameraApiClient;
use crate::config::Config;
use crate::diagnostics::Diagnostics;
use crate::errors::{AppResult, CameraApiResult};
use crate::lifecycle::LifecycleCoordinator;
use crate::monitor::{PerformanceState, QualityModeController, StagnationDetector};
use crate::stream::{
    FrameSampler, FrameStore, HttpStreamSurface, ManagerChannel, RefreshReason,
    StreamConnectionManager, StreamHandle, StreamVariant, VariantSignals,
};

/// Manual variant selection for testing stream quality
#[derive(Debug, Clone, Copy, PartialEq, Eq, strum::Display, strum::EnumString)]
#[strum(serialize_all = "lowercase")]
pub enum QualityPreset {
    Fast,
    Normal,
    /// Release any forced variant
    Auto,
}

pub struct ViewerContext {
    config: Config,
    handle: StreamHandle,
    bandwidth: Arc<BandwidthEstimator>,
    camera: CameraApiClient,
    frames: FrameStore,
    performance: watch::Receiver<PerformanceState>,
    monitors: CancellationToken,
    manager_task: JoinHandle<()>,
    monitor_tasks: Vec<JoinHandle<()>>,
}

impl ViewerContext {
    /// Build and start all components. Must be called inside a runtime.
    pub fn build(config: Config) -> AppResult<Self> {
        let client = reqwest::Client::builder()
            .connect_timeout(config.http.connect_timeout)
            .user_agent(config.http.user_agent.clone())
            .build()?;

        let base_url = config.stream.base_url()?;
        let probe_url = config.stream.endpoint(&config.bandwidth.probe_path)?;
        let bandwidth = Arc::new(BandwidthEstimator::new(
            client.clone(),
            probe_url,
            config.bandwidth.clone(),
        ));
        let camera = CameraApiClient::new(client.clone(), base_url, config.camera.clone());

        let quality = QualityModeController::new(config.quality.clone());
        let performance = quality.subscribe();

        let frames = FrameStore::new();
        let channel = ManagerChannel::new();
        let surface = HttpStreamSurface::new(
            client,
            channel.surface_signals(),
            frames.clone(),
            config.http.max_frame_bytes,
        );
        let signals = VariantSignals {
            bandwidth: bandwidth.subscribe(),
            performance: performance.clone(),
        };
        let (manager, handle) =
            StreamConnectionManager::new(&config.stream, surface, signals, channel)?;
        let manager_task = tokio::spawn(manager.run());

        let monitors = CancellationToken::new();
        let sampler: Arc<dyn FrameSampler> = Arc::new(frames.clone());
        let mut monitor_tasks = Vec::new();
        if config.stagnation.enabled {
            let detector = StagnationDetector::new(config.stagnation.clone());
            monitor_tasks.push(detector.spawn(
                handle.clone(),
                Arc::clone(&sampler),
                monitors.clone(),
            ));
        }
        if config.quality.enabled {
            monitor_tasks.push(quality.spawn(handle.clone(), sampler, monitors.clone()));
        }

        info!(
            base_url = %config.stream.base_url,
            stagnation = config.stagnation.enabled,
            quality = config.quality.enabled,
            "Viewer initialized"
        );

        Ok(Self {
            config,
            handle,
            bandwidth,
            camera,
            frames,
            performance,
            monitors,
            manager_task,
            monitor_tasks,
        })
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn handle(&self) -> &StreamHandle {
        &self.handle
    }

    pub fn bandwidth(&self) -> &BandwidthEstimator {
        &self.bandwidth
    }

    pub fn camera(&self) -> &CameraApiClient {
        &self.camera
    }

    pub fn frames(&self) -> &FrameStore {
        &self.frames
    }

    /// Lifecycle coordinator bound to this viewer's stream and monitors
    pub fn lifecycle(&self) -> LifecycleCoordinator {
        LifecycleCoordinator::new(
            self.handle.clone(),
            self.config.lifecycle.clone(),
            self.monitors.clone(),
        )
    }

    pub fn diagnostics(&self) -> Diagnostics {
        let latest = self.frames.latest();
        Diagnostics::collect(
            &self.handle.status(),
            &self.bandwidth.current(),
            &self.performance.borrow(),
            latest.as_deref(),
        )
    }

    /// Probe bandwidth, check the camera and start streaming. Returns
    /// whether the stream was started.
    pub async fn bootstrap(&self) -> bool {
        if self.config.bandwidth.probe_on_start {
            self.bandwidth.probe().await;
        }

        if self.config.camera.check_status {
            match self.camera.status().await {
                Ok(status) if status.is_active() => {}
                Ok(status) => {
                    warn!(
                        message = status.message.as_deref().unwrap_or(""),
                        "Camera is not active, stream not started"
                    );
                    return false;
                }
                Err(e) => {
                    warn!("Camera status unavailable, stream not started: {}", e);
                    return false;
                }
            }
        }

        tokio::time::sleep(self.config.stream.start_delay).await;
        self.handle.start();
        true
    }

    /// Measure bandwidth again. A running stream reconnects when the new tier
    /// prefers a different variant and none is forced.
    pub async fn reprobe(&self) -> BandwidthTier {
        let tier = self.bandwidth.probe().await;
        let status = self.handle.status();
        let preferred = tier.preferred_variant();
        if status.state.can_refresh()
            && status.variant_override.is_none()
            && !self.performance.borrow().performance_mode_active
            && preferred != status.variant
        {
            info!(%tier, variant = %preferred, "Bandwidth changed, switching variant");
            self.handle.refresh(RefreshReason::Bandwidth);
        }
        tier
    }

    /// Switch the camera on or off and follow with the stream
    pub async fn toggle_camera(&self) -> CameraApiResult<bool> {
        let active = self.camera.toggle().await?;
        if active {
            tokio::time::sleep(self.config.stream.start_delay).await;
            self.handle.start();
        } else {
            self.handle.stop();
        }
        Ok(active)
    }

    pub fn apply_quality_preset(&self, preset: QualityPreset) {
        let variant = match preset {
            QualityPreset::Fast => Some(StreamVariant::Fast),
            QualityPreset::Normal => Some(StreamVariant::Normal),
            QualityPreset::Auto => None,
        };
        info!(%preset, "Applying quality preset");
        self.handle.set_variant_override(variant);
    }

    /// Stop everything and wait for the background tasks to finish
    pub async fn shutdown(self) {
        self.monitors.cancel();
        self.handle.shutdown();
        if let Err(e) = self.manager_task.await {
            warn!("Stream manager task ended abnormally: {}", e);
        }
        for task in self.monitor_tasks {
            if let Err(e) = task.await {
                debug!("Monitor task ended abnormally: {}", e);
            }
        }
        info!("Viewer shut down");
    }
}

//! Frozen-frame detection
//!
//! A stream can stay connected while the picture stops changing: the camera
//! process hangs, or an intermediary keeps replaying its last frame. Once per
//! tick the detector takes a small downscaled sample of the displayed frame
//! and compares it with the previous one. A run of near-identical samples
//! means the feed is frozen and the stream is refreshed.
//!
//! The detector only runs while the stream is `Active`; in any other state
//! its counter and reference sample are discarded.

use std::sync::Arc;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::config::StagnationConfig;
use crate::errors::StreamError;
use crate::observability::metrics;
use crate::stream::{FrameSample, FrameSampler, RefreshReason, StreamHandle, StreamState};

/// Outcome of one observation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StagnationVerdict {
    /// Sampling failed; the tick is ignored
    NoSignal,
    /// First sample after a reset, nothing to compare with
    Primed,
    Changed { score: u64 },
    Unchanged { score: u64, consecutive: u32 },
    /// The run of unchanged samples reached the limit; counter reset
    Stagnant { score: u64 },
}

#[derive(Debug)]
pub struct StagnationDetector {
    config: StagnationConfig,
    previous: Option<FrameSample>,
    consecutive: u32,
}

impl StagnationDetector {
    pub fn new(config: StagnationConfig) -> Self {
        Self {
            config,
            previous: None,
            consecutive: 0,
        }
    }

    pub fn consecutive(&self) -> u32 {
        self.consecutive
    }

    pub fn reset(&mut self) {
        self.previous = None;
        self.consecutive = 0;
    }

    /// Feed one sample into the detector
    pub fn observe(&mut self, sample: Result<FrameSample, StreamError>) -> StagnationVerdict {
        let sample = match sample {
            Ok(sample) => sample,
            Err(e) => {
                debug!("Skipping stagnation check: {}", e);
                return StagnationVerdict::NoSignal;
            }
        };

        let Some(previous) = self.previous.take() else {
            self.previous = Some(sample);
            return StagnationVerdict::Primed;
        };

        // Samples of different shape are as good as a changed picture
        let score = previous.dissimilarity(&sample).unwrap_or(u64::MAX);
        self.previous = Some(sample);
        if score >= self.config.threshold {
            self.consecutive = 0;
            return StagnationVerdict::Changed { score };
        }

        self.consecutive += 1;
        if self.consecutive >= self.config.max_stagnant_ticks {
            self.consecutive = 0;
            StagnationVerdict::Stagnant { score }
        } else {
            StagnationVerdict::Unchanged {
                score,
                consecutive: self.consecutive,
            }
        }
    }

    /// Run the detector until `cancel` fires
    pub fn spawn(
        mut self,
        handle: StreamHandle,
        sampler: Arc<dyn FrameSampler>,
        cancel: CancellationToken,
    ) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(self.config.check_interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            debug!(
                interval_ms = self.config.check_interval.as_millis() as u64,
                threshold = self.config.threshold,
                "Stagnation detector started"
            );

            loop {
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    _ = ticker.tick() => {}
                }

                if handle.state() != StreamState::Active {
                    self.reset();
                    continue;
                }

                let sample = sampler.sample(self.config.sample_width, self.config.sample_height);
                if let StagnationVerdict::Stagnant { score } = self.observe(sample) {
                    info!(
                        score,
                        ticks = self.config.max_stagnant_ticks,
                        "Stream picture frozen, refreshing"
                    );
                    metrics().stagnation_detections.add(1, &[]);
                    handle.refresh(RefreshReason::Stagnation);
                }
            }
            debug!("Stagnation detector stopped");
        })
    }
}

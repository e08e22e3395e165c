//! Frame cadence tracking and performance mode
//!
//! Each check looks at how long it has been since the last frame arrived.
//! A gap above the threshold counts as a dropped-frame window and raises the
//! drop counter; a healthy gap lowers it again (never below zero). Crossing
//! the drop bound switches performance mode on, which forces the fast
//! variant; draining the counter to zero switches it back off. Every switch
//! refreshes the stream so the new variant takes effect.

use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use opentelemetry::KeyValue;

use crate::config::QualityConfig;
use crate::observability::metrics;
use crate::stream::{FrameSampler, RefreshReason, StreamHandle, StreamState};

/// Published performance tracking state
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PerformanceState {
    pub frame_drop_count: u32,
    pub last_frame_time: Option<Instant>,
    pub performance_mode_active: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ModeChange {
    Enabled,
    Disabled,
}

#[derive(Debug)]
pub struct QualityModeController {
    config: QualityConfig,
    state: PerformanceState,
    last_check: Option<Instant>,
    state_tx: watch::Sender<PerformanceState>,
}

impl QualityModeController {
    pub fn new(config: QualityConfig) -> Self {
        let (state_tx, _) = watch::channel(PerformanceState::default());
        Self {
            config,
            state: PerformanceState::default(),
            last_check: None,
            state_tx,
        }
    }

    /// Watch the performance state; the connection manager reads the mode
    /// flag from here when choosing a variant.
    pub fn subscribe(&self) -> watch::Receiver<PerformanceState> {
        self.state_tx.subscribe()
    }

    pub fn state(&self) -> PerformanceState {
        self.state
    }

    /// Note a frame arrival
    pub fn record_frame(&mut self, at: Instant) {
        self.state.last_frame_time = Some(at);
    }

    /// Evaluate cadence at `now` and return a mode switch, if any.
    ///
    /// Before the first frame the gap is measured from the previous check.
    pub fn check(&mut self, now: Instant) -> Option<ModeChange> {
        let reference = self.state.last_frame_time.or(self.last_check);
        self.last_check = Some(now);
        let gap = reference
            .map(|at| now.saturating_duration_since(at))
            .unwrap_or(Duration::ZERO);

        let mut change = None;
        if gap > self.config.frame_gap_threshold {
            self.state.frame_drop_count = self.state.frame_drop_count.saturating_add(1);
            if self.state.frame_drop_count > self.config.drop_bound
                && !self.state.performance_mode_active
            {
                self.state.performance_mode_active = true;
                change = Some(ModeChange::Enabled);
            }
        } else {
            self.state.frame_drop_count = self.state.frame_drop_count.saturating_sub(1);
            if self.state.frame_drop_count == 0 && self.state.performance_mode_active {
                self.state.performance_mode_active = false;
                change = Some(ModeChange::Disabled);
            }
        }

        let state = self.state;
        self.state_tx.send_if_modified(|current| {
            let modified = current.frame_drop_count != state.frame_drop_count
                || current.performance_mode_active != state.performance_mode_active;
            *current = state;
            modified
        });
        change
    }

    /// Run the controller until `cancel` fires
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
                gap_threshold_ms = self.config.frame_gap_threshold.as_millis() as u64,
                drop_bound = self.config.drop_bound,
                "Quality controller started"
            );

            loop {
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    _ = ticker.tick() => {}
                }

                // Cadence is meaningless while nothing is streaming
                if handle.state() != StreamState::Active {
                    continue;
                }

                if let Some(at) = sampler.last_frame_at() {
                    self.record_frame(at);
                }
                let Some(change) = self.check(Instant::now()) else {
                    continue;
                };

                let enabled = change == ModeChange::Enabled;
                info!(
                    enabled,
                    frame_drops = self.state.frame_drop_count,
                    "Performance mode {}",
                    if enabled { "enabled" } else { "disabled" }
                );
                metrics()
                    .performance_mode_changes
                    .add(1, &[KeyValue::new("enabled", enabled)]);
                handle.refresh(RefreshReason::PerformanceMode);
            }
            debug!("Quality controller stopped");
        })
    }
}

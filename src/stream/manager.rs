//! Stream connection manager
//!
//! The manager is the single owner of the connection state machine. All
//! inputs (user commands, load outcomes from the display surface, timer
//! firings) arrive as [`ManagerCommand`]s on one inbox and are applied one at
//! a time, so transitions never interleave. After every command the current
//! [`StreamStatus`] is published on a watch channel for observers.
//!
//! ```text
//! Idle ──start──▶ Connecting ──loaded──▶ Active ──keep-alive──▶ Connecting
//!                    │  ▲                  │
//!          timeout/  │  │ retry timer      │ error
//!          error     ▼  │                  ▼
//!                 Reconnecting ◀───────────┘
//!                    │ attempts exhausted
//!                    ▼
//!                  Failed ──refresh/start──▶ Connecting
//! ```
//!
//! `stop` moves any state to `Stopped`.

use std::ops::ControlFlow;
use tokio::sync::{mpsc, watch};
use tracing::{debug, error, info, warn};
use url::Url;
use uuid::Uuid;

use opentelemetry::KeyValue;

use super::cache_bust::cache_busting_url;
use super::session::{
    AssignedSource, RefreshReason, SourceId, StreamSession, StreamState, StreamStatus,
    StreamVariant, backoff_delay,
};
use super::surface::{DisplaySurface, SurfaceSignals};
use super::timers::{TimerId, TimerKind, TimerSet};
use crate::bandwidth::BandwidthSample;
use crate::config::StreamConfig;
use crate::errors::{ConfigError, StreamError};
use crate::monitor::PerformanceState;
use crate::observability::metrics;

/// Everything the manager can be asked to do
#[derive(Debug, Clone)]
pub enum ManagerCommand {
    Start,
    Stop,
    Refresh { reason: RefreshReason },
    ToggleVariantOverride,
    SetVariantOverride(Option<StreamVariant>),
    Loaded { source: SourceId },
    LoadFailed { source: SourceId, reason: String },
    TimerFired { kind: TimerKind, id: TimerId },
    Shutdown,
}

/// The manager's inbox, created before the surface so the surface can be
/// handed its [`SurfaceSignals`].
pub struct ManagerChannel {
    tx: mpsc::UnboundedSender<ManagerCommand>,
    rx: mpsc::UnboundedReceiver<ManagerCommand>,
}

impl Default for ManagerChannel {
    fn default() -> Self {
        Self::new()
    }
}

impl ManagerChannel {
    pub fn new() -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        Self { tx, rx }
    }

    pub fn surface_signals(&self) -> SurfaceSignals {
        SurfaceSignals::new(self.tx.downgrade())
    }
}

/// Inputs to variant selection owned by other components
#[derive(Debug, Clone)]
pub struct VariantSignals {
    pub bandwidth: watch::Receiver<BandwidthSample>,
    pub performance: watch::Receiver<PerformanceState>,
}

impl VariantSignals {
    /// Fixed signals: unknown bandwidth, performance mode off
    pub fn detached() -> Self {
        let (_, bandwidth) = watch::channel(BandwidthSample::default());
        let (_, performance) = watch::channel(PerformanceState::default());
        Self {
            bandwidth,
            performance,
        }
    }
}

/// Cloneable control handle for a running manager.
#[derive(Debug, Clone)]
pub struct StreamHandle {
    commands: mpsc::UnboundedSender<ManagerCommand>,
    status: watch::Receiver<StreamStatus>,
}

impl StreamHandle {
    pub fn start(&self) {
        self.send(ManagerCommand::Start);
    }

    pub fn stop(&self) {
        self.send(ManagerCommand::Stop);
    }

    pub fn refresh(&self, reason: RefreshReason) {
        self.send(ManagerCommand::Refresh { reason });
    }

    /// Force the opposite variant, or release a forced variant
    pub fn toggle_variant_override(&self) {
        self.send(ManagerCommand::ToggleVariantOverride);
    }

    pub fn set_variant_override(&self, variant: Option<StreamVariant>) {
        self.send(ManagerCommand::SetVariantOverride(variant));
    }

    /// Stop the stream and end the manager task
    pub fn shutdown(&self) {
        self.send(ManagerCommand::Shutdown);
    }

    pub fn status(&self) -> StreamStatus {
        self.status.borrow().clone()
    }

    pub fn state(&self) -> StreamState {
        self.status.borrow().state
    }

    pub fn subscribe(&self) -> watch::Receiver<StreamStatus> {
        self.status.clone()
    }

    fn send(&self, command: ManagerCommand) {
        if self.commands.send(command).is_err() {
            debug!("Stream manager has shut down, command dropped");
        }
    }
}

pub struct StreamConnectionManager<S: DisplaySurface> {
    config: StreamConfig,
    normal_url: Url,
    fast_url: Url,
    surface: S,
    signals: VariantSignals,
    session: StreamSession,
    variant_override: Option<StreamVariant>,
    timers: TimerSet,
    next_source: u64,
    inbox: mpsc::UnboundedReceiver<ManagerCommand>,
    status_tx: watch::Sender<StreamStatus>,
    session_id: Uuid,
}

impl<S: DisplaySurface> StreamConnectionManager<S> {
    pub fn new(
        config: &StreamConfig,
        surface: S,
        signals: VariantSignals,
        channel: ManagerChannel,
    ) -> Result<(Self, StreamHandle), ConfigError> {
        let normal_url = config.endpoint(&config.normal_path)?;
        let fast_url = config.endpoint(&config.fast_path)?;
        let (status_tx, status_rx) = watch::channel(StreamStatus::idle(config.max_attempts));

        let timers = TimerSet::new(channel.tx.downgrade());
        let handle = StreamHandle {
            commands: channel.tx,
            status: status_rx,
        };
        let manager = Self {
            config: config.clone(),
            normal_url,
            fast_url,
            surface,
            signals,
            session: StreamSession::default(),
            variant_override: None,
            timers,
            next_source: 0,
            inbox: channel.rx,
            status_tx,
            session_id: Uuid::new_v4(),
        };
        Ok((manager, handle))
    }

    /// Process commands until [`StreamHandle::shutdown`] or until every
    /// handle has been dropped. Timers and surface signals hold weak senders
    /// and do not keep the loop alive.
    pub async fn run(mut self) {
        info!(session_id = %self.session_id, "Stream manager started");
        while let Some(command) = self.inbox.recv().await {
            let flow = self.handle_command(command);
            self.publish();
            if flow.is_break() {
                break;
            }
        }
        self.stop();
        self.publish();
        info!(session_id = %self.session_id, "Stream manager shut down");
    }

    pub fn state(&self) -> StreamState {
        self.session.state
    }

    fn handle_command(&mut self, command: ManagerCommand) -> ControlFlow<()> {
        match command {
            ManagerCommand::Start => self.start(),
            ManagerCommand::Stop => self.stop(),
            ManagerCommand::Refresh { reason } => self.refresh(reason),
            ManagerCommand::ToggleVariantOverride => self.toggle_variant_override(),
            ManagerCommand::SetVariantOverride(variant) => self.set_variant_override(variant),
            ManagerCommand::Loaded { source } => self.on_loaded(source),
            ManagerCommand::LoadFailed { source, reason } => {
                self.on_load_error(source, StreamError::load_error(reason))
            }
            ManagerCommand::TimerFired { kind, id } => self.on_timer(kind, id),
            ManagerCommand::Shutdown => return ControlFlow::Break(()),
        }
        ControlFlow::Continue(())
    }

    fn start(&mut self) {
        if !self.session.state.can_start() {
            debug!(state = %self.session.state, "Ignoring start, stream already running");
            return;
        }
        self.session.attempt = 0;
        self.session.last_error = None;
        self.connect();
    }

    fn stop(&mut self) {
        self.timers.cancel_all();
        if self.session.source.take().is_some() {
            self.surface.clear_source();
        }
        if self.session.state != StreamState::Stopped {
            info!(session_id = %self.session_id, from = %self.session.state, "Stream stopped");
        }
        self.session.state = StreamState::Stopped;
    }

    fn refresh(&mut self, reason: RefreshReason) {
        if !self.session.state.can_refresh() {
            debug!(state = %self.session.state, %reason, "Ignoring refresh");
            return;
        }
        info!(session_id = %self.session_id, %reason, from = %self.session.state, "Refreshing stream");
        metrics()
            .refreshes
            .add(1, &[KeyValue::new("reason", reason.to_string())]);
        self.session.attempt = 0;
        self.connect();
    }

    fn toggle_variant_override(&mut self) {
        let next = match self.variant_override {
            None => Some(self.session.variant.opposite()),
            Some(_) => None,
        };
        self.set_variant_override(next);
    }

    fn set_variant_override(&mut self, variant: Option<StreamVariant>) {
        if self.variant_override == variant {
            return;
        }
        self.variant_override = variant;
        match variant {
            Some(forced) => info!(variant = %forced, "Stream variant forced"),
            None => info!("Stream variant override released"),
        }
        if self.session.state.can_refresh() {
            self.refresh(RefreshReason::VariantChange);
        }
    }

    /// Assign a fresh URL for the chosen variant and wait for the first frame
    fn connect(&mut self) {
        self.timers.cancel_all();

        let variant = self.choose_variant();
        let base = match variant {
            StreamVariant::Fast => &self.fast_url,
            StreamVariant::Normal => &self.normal_url,
        };
        let url = cache_busting_url(base);
        self.next_source += 1;
        let id = SourceId(self.next_source);

        self.session.state = StreamState::Connecting;
        self.session.variant = variant;
        self.session.last_started_at = Some(chrono::Utc::now());
        self.session.source = Some(AssignedSource {
            id,
            url: url.clone(),
        });

        info!(
            session_id = %self.session_id,
            source = %id,
            %variant,
            attempt = self.session.attempt,
            "Connecting to stream"
        );
        metrics()
            .connect_attempts
            .add(1, &[KeyValue::new("variant", variant.to_string())]);

        self.surface.set_source(id, &url);
        self.timers.arm(TimerKind::Load, self.config.load_timeout);
    }

    /// Forced override first, then performance mode, then bandwidth
    fn choose_variant(&self) -> StreamVariant {
        if let Some(forced) = self.variant_override {
            return forced;
        }
        if self.signals.performance.borrow().performance_mode_active {
            return StreamVariant::Fast;
        }
        self.signals.bandwidth.borrow().tier.preferred_variant()
    }

    fn is_current(&self, source: SourceId) -> bool {
        self.session
            .source
            .as_ref()
            .is_some_and(|assigned| assigned.id == source)
    }

    fn on_loaded(&mut self, source: SourceId) {
        if self.session.state != StreamState::Connecting || !self.is_current(source) {
            debug!(%source, state = %self.session.state, "Ignoring stale load signal");
            return;
        }
        self.timers.cancel(TimerKind::Load);
        self.session.attempt = 0;
        self.session.last_error = None;
        self.session.state = StreamState::Active;
        self.timers
            .arm(TimerKind::KeepAlive, self.config.keepalive_interval);
        info!(session_id = %self.session_id, %source, variant = %self.session.variant, "Stream active");
    }

    fn on_load_error(&mut self, source: SourceId, error: StreamError) {
        let accepting = matches!(
            self.session.state,
            StreamState::Connecting | StreamState::Active
        );
        if !accepting || !self.is_current(source) {
            debug!(%source, state = %self.session.state, "Ignoring stale load error");
            return;
        }
        metrics()
            .load_failures
            .add(1, &[KeyValue::new("kind", "error")]);
        self.fail_attempt(error);
    }

    fn on_timer(&mut self, kind: TimerKind, id: TimerId) {
        if !self.timers.take_if_current(kind, id) {
            debug!(timer = %kind, id = id.0, "Ignoring cancelled timer");
            return;
        }
        match (kind, self.session.state) {
            (TimerKind::Load, StreamState::Connecting) => {
                metrics()
                    .load_failures
                    .add(1, &[KeyValue::new("kind", "timeout")]);
                self.fail_attempt(StreamError::LoadTimeout {
                    timeout_ms: self.config.load_timeout.as_millis() as u64,
                });
            }
            (TimerKind::Retry, StreamState::Reconnecting) => self.connect(),
            (TimerKind::KeepAlive, StreamState::Active) => self.refresh(RefreshReason::KeepAlive),
            (kind, state) => {
                debug!(timer = %kind, %state, "Timer fired outside its state");
            }
        }
    }

    /// Schedule another attempt, or give up once attempts are exhausted
    fn fail_attempt(&mut self, error: StreamError) {
        self.timers.cancel(TimerKind::Load);
        self.timers.cancel(TimerKind::KeepAlive);
        self.session.last_error = Some(error.to_string());

        if self.session.attempt < self.config.max_attempts {
            self.session.attempt += 1;
            let delay = backoff_delay(
                self.session.attempt,
                self.config.retry_base_delay,
                self.config.retry_max_delay,
            );
            self.session.state = StreamState::Reconnecting;
            self.timers.arm(TimerKind::Retry, delay);
            metrics().retries.add(1, &[]);
            warn!(
                session_id = %self.session_id,
                attempt = self.session.attempt,
                max_attempts = self.config.max_attempts,
                delay_ms = delay.as_millis() as u64,
                "Stream load failed, retrying: {}",
                error
            );
        } else {
            self.timers.cancel_all();
            if self.session.source.take().is_some() {
                self.surface.clear_source();
            }
            self.session.state = StreamState::Failed;
            metrics().stream_failures.add(1, &[]);
            error!(
                session_id = %self.session_id,
                attempts = self.session.attempt,
                "Stream failed, giving up until refreshed: {}",
                error
            );
        }
    }

    fn snapshot(&self) -> StreamStatus {
        StreamStatus {
            state: self.session.state,
            attempt: self.session.attempt,
            max_attempts: self.config.max_attempts,
            variant: self.session.variant,
            variant_override: self.variant_override,
            source: self.session.source.as_ref().map(|s| s.id),
            url: self.session.source.as_ref().map(|s| s.url.to_string()),
            timers: self.timers.snapshot(),
            last_started_at: self.session.last_started_at,
            last_error: self.session.last_error.clone(),
        }
    }

    fn publish(&self) {
        let next = self.snapshot();
        self.status_tx.send_if_modified(|current| {
            if *current == next {
                false
            } else {
                *current = next;
                true
            }
        });
    }
}

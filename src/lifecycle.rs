//! Page lifecycle coordination
//!
//! Translates host events into stream actions:
//!
//! - **Unload**: stop the stream and cancel the monitors. Nothing is left
//!   scheduled afterwards.
//! - **Visible again**: while the stream is live, refresh once after a short
//!   delay. Repeated visibility changes replace the pending refresh.
//! - **Hidden**: nothing; the load timeout and retries cover a stream that
//!   stalls in the background.
//! - **Resize**: debounced and published as the new viewport size.

use serde::Serialize;
use std::sync::Arc;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::config::LifecycleConfig;
use crate::stream::{RefreshReason, StreamHandle};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Visibility {
    Visible,
    Hidden,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Viewport {
    pub width: u32,
    pub height: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PageEvent {
    Unload,
    VisibilityChanged(Visibility),
    Resize(Viewport),
}

pub struct LifecycleCoordinator {
    handle: StreamHandle,
    config: LifecycleConfig,
    monitors: CancellationToken,
    pending_refresh: Option<JoinHandle<()>>,
    pending_resize: Option<JoinHandle<()>>,
    viewport_tx: Arc<watch::Sender<Option<Viewport>>>,
    unloaded: bool,
}

impl LifecycleCoordinator {
    pub fn new(handle: StreamHandle, config: LifecycleConfig, monitors: CancellationToken) -> Self {
        let (viewport_tx, _) = watch::channel(None);
        Self {
            handle,
            config,
            monitors,
            pending_refresh: None,
            pending_resize: None,
            viewport_tx: Arc::new(viewport_tx),
            unloaded: false,
        }
    }

    /// Debounced viewport size
    pub fn viewport(&self) -> watch::Receiver<Option<Viewport>> {
        self.viewport_tx.subscribe()
    }

    pub fn is_unloaded(&self) -> bool {
        self.unloaded
    }

    /// Consume events until unload or until the sender goes away; a closed
    /// channel is treated as an unload.
    pub async fn run(mut self, mut events: mpsc::Receiver<PageEvent>) {
        while let Some(event) = events.recv().await {
            self.handle_event(event);
            if self.unloaded {
                return;
            }
        }
        self.handle_event(PageEvent::Unload);
    }

    pub fn handle_event(&mut self, event: PageEvent) {
        if self.unloaded {
            debug!(?event, "Ignoring page event after unload");
            return;
        }

        match event {
            PageEvent::Unload => self.unload(),
            PageEvent::VisibilityChanged(Visibility::Visible) => self.on_visible(),
            PageEvent::VisibilityChanged(Visibility::Hidden) => {
                debug!("Page hidden");
            }
            PageEvent::Resize(viewport) => self.on_resize(viewport),
        }
    }

    fn unload(&mut self) {
        self.unloaded = true;
        abort(&mut self.pending_refresh);
        abort(&mut self.pending_resize);
        self.monitors.cancel();
        self.handle.stop();
        info!("Page unloaded, stream stopped");
    }

    fn on_visible(&mut self) {
        let state = self.handle.state();
        if !state.is_live() {
            debug!(%state, "Page visible, stream not running");
            return;
        }

        abort(&mut self.pending_refresh);
        let handle = self.handle.clone();
        let delay = self.config.visibility_refresh_delay;
        debug!(delay_ms = delay.as_millis() as u64, "Page visible, scheduling refresh");
        self.pending_refresh = Some(tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            handle.refresh(RefreshReason::Visibility);
        }));
    }

    fn on_resize(&mut self, viewport: Viewport) {
        abort(&mut self.pending_resize);
        let viewport_tx = Arc::clone(&self.viewport_tx);
        let delay = self.config.resize_debounce;
        self.pending_resize = Some(tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            debug!(width = viewport.width, height = viewport.height, "Viewport resized");
            viewport_tx.send_replace(Some(viewport));
        }));
    }
}

impl Drop for LifecycleCoordinator {
    fn drop(&mut self) {
        abort(&mut self.pending_refresh);
        abort(&mut self.pending_resize);
    }
}

fn abort(task: &mut Option<JoinHandle<()>>) {
    if let Some(task) = task.take() {
        task.abort();
    }
}

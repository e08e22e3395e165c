//! Tracked one-shot timers for the connection manager.
//!
//! Every timer is a tokio task that sleeps and then posts
//! [`ManagerCommand::TimerFired`] back to the manager's inbox. The set keeps
//! the abort handle and id of each armed timer so that re-arming or stopping
//! always cancels the previous one, and a firing that raced with a cancel is
//! recognised by its stale id.
//!
//! Timers hold only a weak sender, so an armed timer never keeps the manager
//! alive after its last [`StreamHandle`](super::StreamHandle) is gone.

use serde::Serialize;
use std::time::Duration;
use strum::Display;
use tokio::sync::mpsc;
use tokio::task::AbortHandle;
use tracing::trace;

use super::manager::ManagerCommand;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display)]
#[strum(serialize_all = "snake_case")]
pub enum TimerKind {
    /// Bounds the wait for the first frame of a connection
    Load,
    /// Delays the next reconnect attempt
    Retry,
    /// Periodic refresh while the stream is active
    KeepAlive,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TimerId(pub u64);

/// Which timers are currently armed
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct TimerSnapshot {
    pub load: bool,
    pub retry: bool,
    pub keepalive: bool,
}

#[derive(Debug)]
struct ArmedTimer {
    id: TimerId,
    handle: AbortHandle,
}

#[derive(Debug)]
pub(crate) struct TimerSet {
    next_id: u64,
    load: Option<ArmedTimer>,
    retry: Option<ArmedTimer>,
    keepalive: Option<ArmedTimer>,
    inbox: mpsc::WeakUnboundedSender<ManagerCommand>,
}

impl TimerSet {
    pub(crate) fn new(inbox: mpsc::WeakUnboundedSender<ManagerCommand>) -> Self {
        Self {
            next_id: 0,
            load: None,
            retry: None,
            keepalive: None,
            inbox,
        }
    }

    fn slot(&mut self, kind: TimerKind) -> &mut Option<ArmedTimer> {
        match kind {
            TimerKind::Load => &mut self.load,
            TimerKind::Retry => &mut self.retry,
            TimerKind::KeepAlive => &mut self.keepalive,
        }
    }

    /// Arm `kind`, cancelling any timer of the same kind first.
    pub(crate) fn arm(&mut self, kind: TimerKind, delay: Duration) -> TimerId {
        self.cancel(kind);
        self.next_id += 1;
        let id = TimerId(self.next_id);
        let inbox = self.inbox.clone();
        let handle = tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            if let Some(inbox) = inbox.upgrade() {
                let _ = inbox.send(ManagerCommand::TimerFired { kind, id });
            }
        })
        .abort_handle();

        trace!(timer = %kind, id = id.0, delay_ms = delay.as_millis() as u64, "Timer armed");
        *self.slot(kind) = Some(ArmedTimer { id, handle });
        debug_assert!(
            !(self.load.is_some() && self.retry.is_some()),
            "load and retry timers armed together"
        );
        id
    }

    /// Cancel `kind` if armed. Returns whether a timer was cancelled.
    pub(crate) fn cancel(&mut self, kind: TimerKind) -> bool {
        match self.slot(kind).take() {
            Some(timer) => {
                timer.handle.abort();
                trace!(timer = %kind, id = timer.id.0, "Timer cancelled");
                true
            }
            None => false,
        }
    }

    pub(crate) fn cancel_all(&mut self) {
        self.cancel(TimerKind::Load);
        self.cancel(TimerKind::Retry);
        self.cancel(TimerKind::KeepAlive);
    }

    /// Consume a firing. Only the currently armed id of that kind is
    /// accepted; anything else is a leftover from a cancelled timer.
    pub(crate) fn take_if_current(&mut self, kind: TimerKind, id: TimerId) -> bool {
        let slot = self.slot(kind);
        if !slot.as_ref().is_some_and(|timer| timer.id == id) {
            return false;
        }
        if let Some(timer) = slot.take() {
            timer.handle.abort();
        }
        true
    }

    pub(crate) fn current_id(&self, kind: TimerKind) -> Option<TimerId> {
        let slot = match kind {
            TimerKind::Load => &self.load,
            TimerKind::Retry => &self.retry,
            TimerKind::KeepAlive => &self.keepalive,
        };
        slot.as_ref().map(|timer| timer.id)
    }

    pub(crate) fn snapshot(&self) -> TimerSnapshot {
        TimerSnapshot {
            load: self.load.is_some(),
            retry: self.retry.is_some(),
            keepalive: self.keepalive.is_some(),
        }
    }
}

impl Drop for TimerSet {
    fn drop(&mut self) {
        self.cancel_all();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn test_armed_timer_posts_to_inbox() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let mut timers = TimerSet::new(tx.downgrade());
        let id = timers.arm(TimerKind::Load, Duration::from_secs(5));

        tokio::time::sleep(Duration::from_secs(6)).await;
        match rx.try_recv() {
            Ok(ManagerCommand::TimerFired { kind, id: fired }) => {
                assert_eq!(kind, TimerKind::Load);
                assert_eq!(fired, id);
            }
            other => panic!("unexpected inbox content: {other:?}"),
        }
        assert!(timers.take_if_current(TimerKind::Load, id));
        assert!(!timers.snapshot().load);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancelled_timer_never_fires() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let mut timers = TimerSet::new(tx.downgrade());
        timers.arm(TimerKind::Retry, Duration::from_secs(1));
        assert!(timers.cancel(TimerKind::Retry));

        tokio::time::sleep(Duration::from_secs(10)).await;
        assert!(rx.try_recv().is_err());
        assert_eq!(timers.snapshot(), TimerSnapshot::default());
    }

    #[tokio::test(start_paused = true)]
    async fn test_rearm_replaces_previous_timer() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let mut timers = TimerSet::new(tx.downgrade());
        let first = timers.arm(TimerKind::KeepAlive, Duration::from_secs(1));
        let second = timers.arm(TimerKind::KeepAlive, Duration::from_secs(2));
        assert_ne!(first, second);

        tokio::time::sleep(Duration::from_secs(3)).await;
        let mut fired = Vec::new();
        while let Ok(cmd) = rx.try_recv() {
            fired.push(cmd);
        }
        assert_eq!(fired.len(), 1);
        assert!(!timers.take_if_current(TimerKind::KeepAlive, first));
        assert!(timers.take_if_current(TimerKind::KeepAlive, second));
    }

    #[tokio::test(start_paused = true)]
    async fn test_armed_timer_does_not_hold_inbox_open() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let mut timers = TimerSet::new(tx.downgrade());
        timers.arm(TimerKind::KeepAlive, Duration::from_secs(30));
        drop(tx);

        assert!(rx.recv().await.is_none());
        assert!(timers.snapshot().keepalive);
    }
}

mod common;

use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::sleep;
use tokio_util::sync::CancellationToken;

use camfeed::config::{LifecycleConfig, StreamConfig};
use camfeed::lifecycle::{LifecycleCoordinator, PageEvent, Viewport, Visibility};
use camfeed::stream::{StreamState, TimerSnapshot};
use common::{Harness, MS, settle};

fn coordinator(h: &Harness) -> (LifecycleCoordinator, CancellationToken) {
    let token = CancellationToken::new();
    let coordinator =
        LifecycleCoordinator::new(h.handle.clone(), LifecycleConfig::default(), token.clone());
    (coordinator, token)
}

#[tokio::test(start_paused = true)]
async fn test_unload_stops_stream_and_monitors() {
    let h = Harness::spawn(StreamConfig::default());
    h.start_active().await;
    let (mut coordinator, token) = coordinator(&h);

    coordinator.handle_event(PageEvent::Unload);
    settle().await;
    assert!(coordinator.is_unloaded());
    assert!(token.is_cancelled());
    assert_eq!(h.handle.state(), StreamState::Stopped);
    assert_eq!(h.handle.status().timers, TimerSnapshot::default());

    // Nothing after unload has any effect
    coordinator.handle_event(PageEvent::VisibilityChanged(Visibility::Visible));
    sleep(Duration::from_secs(40)).await;
    assert_eq!(h.surface.assignments(), 1);
    assert_eq!(h.handle.state(), StreamState::Stopped);
}

#[tokio::test(start_paused = true)]
async fn test_unload_cancels_scheduled_visibility_refresh() {
    let h = Harness::spawn(StreamConfig::default());
    h.start_active().await;
    let (mut coordinator, _token) = coordinator(&h);

    coordinator.handle_event(PageEvent::VisibilityChanged(Visibility::Visible));
    coordinator.handle_event(PageEvent::Unload);
    sleep(Duration::from_secs(2)).await;
    assert_eq!(h.surface.assignments(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_visible_refreshes_after_delay() {
    let h = Harness::spawn(StreamConfig::default());
    h.start_active().await;
    let (mut coordinator, _token) = coordinator(&h);

    coordinator.handle_event(PageEvent::VisibilityChanged(Visibility::Visible));
    sleep(900 * MS).await;
    assert_eq!(h.surface.assignments(), 1);

    sleep(200 * MS).await;
    assert_eq!(h.surface.assignments(), 2);
    assert_eq!(h.handle.state(), StreamState::Connecting);
}

#[tokio::test(start_paused = true)]
async fn test_repeated_visibility_changes_refresh_once() {
    let h = Harness::spawn(StreamConfig::default());
    h.start_active().await;
    let (mut coordinator, _token) = coordinator(&h);

    coordinator.handle_event(PageEvent::VisibilityChanged(Visibility::Visible));
    sleep(500 * MS).await;
    coordinator.handle_event(PageEvent::VisibilityChanged(Visibility::Hidden));
    coordinator.handle_event(PageEvent::VisibilityChanged(Visibility::Visible));

    sleep(700 * MS).await;
    assert_eq!(h.surface.assignments(), 1);
    sleep(400 * MS).await;
    assert_eq!(h.surface.assignments(), 2);
    sleep(Duration::from_secs(2)).await;
    assert_eq!(h.surface.assignments(), 2);
}

#[tokio::test(start_paused = true)]
async fn test_visible_does_nothing_when_idle() {
    let h = Harness::spawn(StreamConfig::default());
    settle().await;
    let (mut coordinator, _token) = coordinator(&h);

    coordinator.handle_event(PageEvent::VisibilityChanged(Visibility::Visible));
    sleep(Duration::from_secs(2)).await;
    assert_eq!(h.surface.assignments(), 0);
    assert_eq!(h.handle.state(), StreamState::Idle);
}

#[tokio::test(start_paused = true)]
async fn test_resize_is_debounced() {
    let h = Harness::spawn(StreamConfig::default());
    let (mut coordinator, _token) = coordinator(&h);
    let viewport = coordinator.viewport();

    coordinator.handle_event(PageEvent::Resize(Viewport {
        width: 800,
        height: 600,
    }));
    sleep(100 * MS).await;
    coordinator.handle_event(PageEvent::Resize(Viewport {
        width: 1280,
        height: 720,
    }));
    sleep(200 * MS).await;
    assert_eq!(*viewport.borrow(), None);

    sleep(100 * MS).await;
    assert_eq!(
        *viewport.borrow(),
        Some(Viewport {
            width: 1280,
            height: 720
        })
    );
}

#[tokio::test(start_paused = true)]
async fn test_closed_event_channel_counts_as_unload() {
    let h = Harness::spawn(StreamConfig::default());
    h.start_active().await;
    let (coordinator, token) = coordinator(&h);

    let (tx, rx) = mpsc::channel(4);
    let task = tokio::spawn(coordinator.run(rx));
    tx.send(PageEvent::Resize(Viewport {
        width: 640,
        height: 480,
    }))
    .await
    .unwrap();
    drop(tx);

    task.await.unwrap();
    settle().await;
    assert!(token.is_cancelled());
    assert_eq!(h.handle.state(), StreamState::Stopped);
}

//! Stream session model: states, variants and the retry arithmetic.

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::fmt;
use std::time::Duration;
use strum::{Display, EnumString};
use url::Url;

use super::timers::TimerSnapshot;

/// Connection lifecycle of the live feed.
///
/// `Idle → Connecting → Active ⇄ Reconnecting → Failed`, with `Stopped`
/// reachable from anywhere through an explicit stop.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Display, EnumString)]
#[strum(serialize_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum StreamState {
    Idle,
    Connecting,
    Active,
    Reconnecting,
    Failed,
    Stopped,
}

impl StreamState {
    /// States from which an explicit start is accepted
    pub fn can_start(self) -> bool {
        matches!(self, Self::Idle | Self::Stopped | Self::Failed)
    }

    /// States from which a refresh is accepted
    pub fn can_refresh(self) -> bool {
        matches!(self, Self::Active | Self::Reconnecting | Self::Failed)
    }

    /// Whether the stream has been started and not stopped since
    pub fn is_live(self) -> bool {
        !matches!(self, Self::Idle | Self::Stopped)
    }
}

/// Selectable stream quality level, served at distinct endpoints.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Display, EnumString)]
#[strum(serialize_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum StreamVariant {
    /// Reduced quality, cheaper to transfer
    Fast,
    /// Full quality
    Normal,
}

impl StreamVariant {
    pub fn opposite(self) -> Self {
        match self {
            Self::Fast => Self::Normal,
            Self::Normal => Self::Fast,
        }
    }
}

/// Identifies one assignment of a URL to the display surface.
///
/// Load signals carry the id they belong to so that a late success from a
/// superseded connection is never mistaken for the current one.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct SourceId(pub u64);

impl fmt::Display for SourceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "src-{}", self.0)
    }
}

/// Why a refresh was requested; carried into logs and metrics.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display)]
#[strum(serialize_all = "snake_case")]
pub enum RefreshReason {
    User,
    KeepAlive,
    Stagnation,
    PerformanceMode,
    Visibility,
    VariantChange,
    Bandwidth,
}

/// The URL currently assigned to the surface
#[derive(Debug, Clone, PartialEq)]
pub struct AssignedSource {
    pub id: SourceId,
    pub url: Url,
}

/// Mutable session data owned by the connection manager
#[derive(Debug, Clone)]
pub struct StreamSession {
    pub state: StreamState,
    pub variant: StreamVariant,
    pub attempt: u32,
    pub last_started_at: Option<DateTime<Utc>>,
    pub source: Option<AssignedSource>,
    pub last_error: Option<String>,
}

impl Default for StreamSession {
    fn default() -> Self {
        Self {
            state: StreamState::Idle,
            variant: StreamVariant::Fast,
            attempt: 0,
            last_started_at: None,
            source: None,
            last_error: None,
        }
    }
}

/// Observable snapshot of the manager, published on every transition.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StreamStatus {
    pub state: StreamState,
    pub attempt: u32,
    pub max_attempts: u32,
    pub variant: StreamVariant,
    pub variant_override: Option<StreamVariant>,
    pub source: Option<SourceId>,
    pub url: Option<String>,
    pub timers: TimerSnapshot,
    pub last_started_at: Option<DateTime<Utc>>,
    pub last_error: Option<String>,
}

impl StreamStatus {
    pub fn idle(max_attempts: u32) -> Self {
        Self {
            state: StreamState::Idle,
            attempt: 0,
            max_attempts,
            variant: StreamVariant::Fast,
            variant_override: None,
            source: None,
            url: None,
            timers: TimerSnapshot::default(),
            last_started_at: None,
            last_error: None,
        }
    }

    /// Whether the placeholder should be shown instead of the feed
    pub fn placeholder_visible(&self) -> bool {
        self.state != StreamState::Active
    }

    /// Indicator text for the placeholder. The retrying and the terminal
    /// failure indicators are deliberately distinct.
    pub fn indicator(&self) -> Option<String> {
        match self.state {
            StreamState::Idle => Some("Camera idle".to_string()),
            StreamState::Connecting => Some("Connecting...".to_string()),
            StreamState::Active => None,
            StreamState::Reconnecting => Some(format!(
                "Reconnecting... attempt {}/{}",
                self.attempt, self.max_attempts
            )),
            StreamState::Failed => Some("Connection failed - refresh to retry".to_string()),
            StreamState::Stopped => Some("Stream stopped".to_string()),
        }
    }
}

/// Linear backoff capped at `cap`: `min(base * attempt, cap)`.
pub fn backoff_delay(attempt: u32, base: Duration, cap: Duration) -> Duration {
    base.saturating_mul(attempt).min(cap)
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;
    use std::str::FromStr;

    #[rstest]
    #[case(1, 1000)]
    #[case(2, 2000)]
    #[case(3, 3000)]
    #[case(4, 4000)]
    #[case(5, 5000)]
    #[case(6, 5000)]
    #[case(50, 5000)]
    fn test_backoff_delay(#[case] attempt: u32, #[case] expected_ms: u64) {
        let delay = backoff_delay(
            attempt,
            Duration::from_millis(1000),
            Duration::from_millis(5000),
        );
        assert_eq!(delay, Duration::from_millis(expected_ms));
    }

    #[test]
    fn test_backoff_does_not_overflow() {
        let delay = backoff_delay(u32::MAX, Duration::from_secs(u64::MAX / 2), Duration::from_secs(5));
        assert_eq!(delay, Duration::from_secs(5));
    }

    #[test]
    fn test_state_guards() {
        assert!(StreamState::Idle.can_start());
        assert!(StreamState::Failed.can_start());
        assert!(!StreamState::Active.can_start());
        assert!(!StreamState::Connecting.can_start());

        assert!(StreamState::Active.can_refresh());
        assert!(StreamState::Reconnecting.can_refresh());
        assert!(StreamState::Failed.can_refresh());
        assert!(!StreamState::Connecting.can_refresh());
        assert!(!StreamState::Stopped.can_refresh());
    }

    #[test]
    fn test_variant_names() {
        assert_eq!(StreamVariant::Fast.to_string(), "fast");
        assert_eq!(StreamVariant::from_str("normal").unwrap(), StreamVariant::Normal);
        assert_eq!(StreamVariant::Fast.opposite(), StreamVariant::Normal);
    }

    #[test]
    fn test_indicators_distinguish_retrying_from_failed() {
        let mut status = StreamStatus::idle(5);
        status.state = StreamState::Reconnecting;
        status.attempt = 2;
        assert_eq!(status.indicator().unwrap(), "Reconnecting... attempt 2/5");

        status.state = StreamState::Failed;
        let failed = status.indicator().unwrap();
        assert!(failed.contains("refresh to retry"));
        assert!(!failed.contains("Reconnecting"));

        status.state = StreamState::Active;
        assert!(status.indicator().is_none());
        assert!(!status.placeholder_visible());
    }
}

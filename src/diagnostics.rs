//! Point-in-time report of the stream and its monitors.

use serde::Serialize;
use std::fmt;
use std::io::Cursor;

use crate::bandwidth::{BandwidthSample, BandwidthTier};
use crate::monitor::PerformanceState;
use crate::stream::{Frame, StreamState, StreamStatus, StreamVariant};

/// Longest URL prefix shown in a report
pub const MAX_URL_CHARS: usize = 100;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Diagnostics {
    pub bandwidth: BandwidthTier,
    pub throughput_kbps: Option<f64>,
    pub performance_mode: bool,
    pub frame_drops: u32,
    pub state: StreamState,
    pub stream_active: bool,
    pub reconnect_attempts: u32,
    pub variant: StreamVariant,
    pub variant_override: Option<StreamVariant>,
    pub frame_loaded: bool,
    pub frame_dimensions: Option<(u32, u32)>,
    pub url: Option<String>,
}

impl Diagnostics {
    pub fn collect(
        status: &StreamStatus,
        bandwidth: &BandwidthSample,
        performance: &PerformanceState,
        frame: Option<&Frame>,
    ) -> Self {
        Self {
            bandwidth: bandwidth.tier,
            throughput_kbps: bandwidth.throughput_kbps,
            performance_mode: performance.performance_mode_active,
            frame_drops: performance.frame_drop_count,
            state: status.state,
            stream_active: status.state.is_live(),
            reconnect_attempts: status.attempt,
            variant: status.variant,
            variant_override: status.variant_override,
            frame_loaded: frame.is_some(),
            frame_dimensions: frame.and_then(frame_dimensions),
            url: status.url.as_deref().map(truncate_url),
        }
    }
}

fn frame_dimensions(frame: &Frame) -> Option<(u32, u32)> {
    image::ImageReader::with_format(Cursor::new(&frame.data[..]), image::ImageFormat::Jpeg)
        .into_dimensions()
        .ok()
}

fn truncate_url(url: &str) -> String {
    if url.chars().count() <= MAX_URL_CHARS {
        url.to_string()
    } else {
        let prefix: String = url.chars().take(MAX_URL_CHARS).collect();
        format!("{prefix}...")
    }
}

impl fmt::Display for Diagnostics {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Stream diagnostics:")?;
        match self.throughput_kbps {
            Some(kbps) => writeln!(f, "- Bandwidth: {} ({kbps:.1} KB/s)", self.bandwidth)?,
            None => writeln!(f, "- Bandwidth: {}", self.bandwidth)?,
        }
        writeln!(f, "- Performance mode: {}", self.performance_mode)?;
        writeln!(f, "- Frame drops: {}", self.frame_drops)?;
        writeln!(f, "- State: {} (active: {})", self.state, self.stream_active)?;
        writeln!(f, "- Reconnect attempts: {}", self.reconnect_attempts)?;
        match self.variant_override {
            Some(forced) => writeln!(f, "- Variant: {} (forced {forced})", self.variant)?,
            None => writeln!(f, "- Variant: {}", self.variant)?,
        }
        writeln!(f, "- Frame loaded: {}", self.frame_loaded)?;
        if let Some((width, height)) = self.frame_dimensions {
            writeln!(f, "- Dimensions: {width} x {height}")?;
        }
        write!(f, "- URL: {}", self.url.as_deref().unwrap_or("none"))
    }
}

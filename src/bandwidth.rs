//! Bandwidth estimation
//!
//! A probe downloads a small resource from the camera server and classifies
//! the observed throughput into a [`BandwidthTier`]. The tier feeds variant
//! selection: only a high-bandwidth link gets the full-quality stream.
//!
//! Probing never fails outward. Network errors, timeouts and non-success
//! responses all classify as [`BandwidthTier::Medium`].

use chrono::{DateTime, Utc};
use reqwest::Client;
use reqwest::header::{CACHE_CONTROL, PRAGMA};
use serde::Serialize;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};
use strum::Display;
use tokio::sync::watch;
use tracing::{debug, info, warn};
use url::Url;

use opentelemetry::KeyValue;

use crate::config::BandwidthConfig;
use crate::errors::StreamError;
use crate::observability::metrics;
use crate::stream::StreamVariant;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Display)]
#[strum(serialize_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum BandwidthTier {
    #[default]
    Unknown,
    Low,
    Medium,
    High,
}

impl BandwidthTier {
    /// Classify a throughput in KB/s. `high` and `low` are exclusive bounds:
    /// exactly `low` or exactly `high` is medium.
    pub fn from_throughput(kbps: f64, high: f64, low: f64) -> Self {
        if kbps > high {
            Self::High
        } else if kbps < low {
            Self::Low
        } else {
            Self::Medium
        }
    }

    /// Variant to use when nothing else forces one
    pub fn preferred_variant(self) -> StreamVariant {
        match self {
            Self::High => StreamVariant::Normal,
            Self::Unknown | Self::Low | Self::Medium => StreamVariant::Fast,
        }
    }
}

/// Result of the most recent probe
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct BandwidthSample {
    pub tier: BandwidthTier,
    pub throughput_kbps: Option<f64>,
    pub measured_at: Option<DateTime<Utc>>,
}

impl BandwidthSample {
    pub fn measured(tier: BandwidthTier, throughput_kbps: f64) -> Self {
        Self {
            tier,
            throughput_kbps: Some(throughput_kbps),
            measured_at: Some(Utc::now()),
        }
    }

    /// Classification used when the probe could not measure anything
    pub fn fallback() -> Self {
        Self {
            tier: BandwidthTier::Medium,
            throughput_kbps: None,
            measured_at: Some(Utc::now()),
        }
    }
}

/// KB/s for `bytes` transferred in `elapsed`, with elapsed floored at 1ms
pub fn throughput_kbps(bytes: u64, elapsed: Duration) -> f64 {
    let seconds = elapsed.as_secs_f64().max(0.001);
    (bytes as f64 / 1024.0) / seconds
}

pub struct BandwidthEstimator {
    client: Client,
    probe_url: Url,
    config: BandwidthConfig,
    in_flight: AtomicBool,
    sample_tx: watch::Sender<BandwidthSample>,
}

/// Clears the in-flight flag however the probe future ends
struct InFlightGuard<'a>(&'a AtomicBool);

impl Drop for InFlightGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

impl BandwidthEstimator {
    pub fn new(client: Client, probe_url: Url, config: BandwidthConfig) -> Self {
        let (sample_tx, _) = watch::channel(BandwidthSample::default());
        Self {
            client,
            probe_url,
            config,
            in_flight: AtomicBool::new(false),
            sample_tx,
        }
    }

    pub fn subscribe(&self) -> watch::Receiver<BandwidthSample> {
        self.sample_tx.subscribe()
    }

    pub fn current(&self) -> BandwidthSample {
        *self.sample_tx.borrow()
    }

    pub fn preferred_variant(&self) -> StreamVariant {
        self.current().tier.preferred_variant()
    }

    /// Measure throughput and publish the new tier. While a probe is already
    /// running, returns the last known tier without probing again.
    pub async fn probe(&self) -> BandwidthTier {
        if self.in_flight.swap(true, Ordering::AcqRel) {
            debug!("Bandwidth probe already running");
            return self.current().tier;
        }
        let _guard = InFlightGuard(&self.in_flight);

        let sample = match self.measure().await {
            Ok((bytes, elapsed)) => {
                let kbps = throughput_kbps(bytes, elapsed);
                let tier =
                    BandwidthTier::from_throughput(kbps, self.config.high_kbps, self.config.low_kbps);
                info!(
                    bytes,
                    elapsed_ms = elapsed.as_millis() as u64,
                    kbps,
                    %tier,
                    "Bandwidth measured"
                );
                metrics().probe_throughput.record(kbps, &[]);
                BandwidthSample::measured(tier, kbps)
            }
            Err(e) => {
                warn!("Bandwidth probe failed, assuming medium: {}", e);
                BandwidthSample::fallback()
            }
        };

        metrics()
            .bandwidth_probes
            .add(1, &[KeyValue::new("tier", sample.tier.to_string())]);
        self.sample_tx.send_replace(sample);
        sample.tier
    }

    async fn measure(&self) -> Result<(u64, Duration), StreamError> {
        let started = Instant::now();
        let response = self
            .client
            .get(self.probe_url.clone())
            .header(CACHE_CONTROL, "no-cache")
            .header(PRAGMA, "no-cache")
            .timeout(self.config.probe_timeout)
            .send()
            .await
            .map_err(|e| StreamError::probe_failure(e.to_string()))?;

        if !response.status().is_success() {
            return Err(StreamError::probe_failure(format!(
                "HTTP {}",
                response.status()
            )));
        }

        let body = response
            .bytes()
            .await
            .map_err(|e| StreamError::probe_failure(e.to_string()))?;
        Ok((body.len() as u64, started.elapsed()))
    }
}

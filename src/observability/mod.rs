//! OpenTelemetry metrics for the stream controller.
//!
//! Instruments are created lazily from the global meter provider on first
//! use. Install a provider with [`init_meter_provider`] before anything
//! records, otherwise the instruments bind to the no-op provider.

use opentelemetry::global;
use opentelemetry::metrics::{Counter, Histogram, Meter};
use opentelemetry_sdk::metrics::SdkMeterProvider;
use std::sync::OnceLock;
use tracing::info;

/// Aggregated metric instruments for the stream controller.
pub struct StreamMetrics {
    pub connect_attempts: Counter<u64>,
    pub retries: Counter<u64>,
    pub load_failures: Counter<u64>,
    pub stream_failures: Counter<u64>,
    pub refreshes: Counter<u64>,
    pub stagnation_detections: Counter<u64>,
    pub performance_mode_changes: Counter<u64>,
    pub bandwidth_probes: Counter<u64>,
    pub probe_throughput: Histogram<f64>,
}

impl StreamMetrics {
    fn new() -> Self {
        let meter: Meter = global::meter("camfeed");
        Self {
            connect_attempts: meter
                .u64_counter("stream_connect_attempts_total")
                .with_description("Stream URLs assigned to the surface")
                .build(),
            retries: meter
                .u64_counter("stream_retries_total")
                .with_description("Reconnect attempts scheduled after a failed load")
                .build(),
            load_failures: meter
                .u64_counter("stream_load_failures_total")
                .with_description("Load errors and load timeouts")
                .build(),
            stream_failures: meter
                .u64_counter("stream_failures_total")
                .with_description("Streams given up after exhausting reconnect attempts")
                .build(),
            refreshes: meter
                .u64_counter("stream_refreshes_total")
                .with_description("Accepted stream refreshes by reason")
                .build(),
            stagnation_detections: meter
                .u64_counter("stream_stagnation_detections_total")
                .with_description("Frozen pictures detected")
                .build(),
            performance_mode_changes: meter
                .u64_counter("performance_mode_changes_total")
                .with_description("Performance mode switches")
                .build(),
            bandwidth_probes: meter
                .u64_counter("bandwidth_probes_total")
                .with_description("Completed bandwidth probes by resulting tier")
                .build(),
            probe_throughput: meter
                .f64_histogram("bandwidth_probe_throughput_kbps")
                .with_description("Measured probe throughput in KB/s")
                .build(),
        }
    }
}

static METRICS: OnceLock<StreamMetrics> = OnceLock::new();

/// Public accessor for the global metric instruments.
pub fn metrics() -> &'static StreamMetrics {
    METRICS.get_or_init(StreamMetrics::new)
}

/// Install an in-process meter provider as the global provider.
///
/// The returned provider should be shut down on exit to flush readers.
pub fn init_meter_provider() -> SdkMeterProvider {
    let provider = SdkMeterProvider::builder().build();
    global::set_meter_provider(provider.clone());
    info!("OpenTelemetry configured: local metrics only");
    provider
}

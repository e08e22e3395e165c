//! Default configuration values

use std::time::Duration;

// Stream endpoint defaults
pub const DEFAULT_BASE_URL: &str = "http://localhost:8000";
pub const DEFAULT_NORMAL_STREAM_PATH: &str = "/api/camera/stream";
pub const DEFAULT_FAST_STREAM_PATH: &str = "/api/camera/stream/fast";

// Connection policy defaults
pub const DEFAULT_LOAD_TIMEOUT: Duration = Duration::from_secs(5);
pub const DEFAULT_KEEPALIVE_INTERVAL: Duration = Duration::from_secs(30);
pub const DEFAULT_MAX_ATTEMPTS: u32 = 5;
pub const DEFAULT_RETRY_BASE_DELAY: Duration = Duration::from_secs(1);
pub const DEFAULT_RETRY_MAX_DELAY: Duration = Duration::from_secs(5);
pub const DEFAULT_START_DELAY: Duration = Duration::from_secs(1);

// Stagnation detector defaults
pub const DEFAULT_STAGNATION_INTERVAL: Duration = Duration::from_secs(1);
pub const DEFAULT_SAMPLE_SIZE: u32 = 50;
pub const DEFAULT_STAGNATION_THRESHOLD: u64 = 100;
pub const DEFAULT_MAX_STAGNANT_TICKS: u32 = 5;

// Quality controller defaults
pub const DEFAULT_QUALITY_INTERVAL: Duration = Duration::from_secs(1);
pub const DEFAULT_FRAME_GAP_THRESHOLD: Duration = Duration::from_millis(200);
pub const DEFAULT_DROP_BOUND: u32 = 5;

// Bandwidth probe defaults
pub const DEFAULT_PROBE_PATH: &str = "/api/camera/snapshot";
pub const DEFAULT_PROBE_TIMEOUT: Duration = Duration::from_secs(10);
pub const DEFAULT_HIGH_KBPS: f64 = 500.0;
pub const DEFAULT_LOW_KBPS: f64 = 200.0;

// Lifecycle defaults
pub const DEFAULT_VISIBILITY_REFRESH_DELAY: Duration = Duration::from_secs(1);
pub const DEFAULT_RESIZE_DEBOUNCE: Duration = Duration::from_millis(250);

// HTTP defaults
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(10);
pub const DEFAULT_MAX_FRAME_BYTES: usize = 8 * 1024 * 1024;

// Camera API defaults
pub const DEFAULT_CAMERA_STATUS_PATH: &str = "/api/camera/status";
pub const DEFAULT_CAMERA_START_PATH: &str = "/api/camera/start";
pub const DEFAULT_CAMERA_STOP_PATH: &str = "/api/camera/stop";
pub const DEFAULT_CAMERA_SNAPSHOT_PATH: &str = "/api/camera/snapshot";

/// Environment variable prefix for configuration overrides
pub const ENV_PREFIX: &str = "CAMFEED_";

use figment::Figment;
use figment::providers::{Env, Format, Serialized, Toml};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;
use tracing::info;
use url::Url;

use crate::errors::ConfigError;

pub mod defaults;
pub mod duration_serde;

use defaults::*;
use duration_serde::duration;

/// Stream endpoints and the connection retry policy
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StreamConfig {
    /// Scheme and authority of the camera server, e.g. `http://classroom:8000`
    #[serde(default = "default_base_url")]
    pub base_url: String,
    /// Path of the full-quality stream variant
    #[serde(default = "default_normal_path")]
    pub normal_path: String,
    /// Path of the reduced-quality stream variant
    #[serde(default = "default_fast_path")]
    pub fast_path: String,
    /// How long to wait for the first frame before treating the load as failed
    #[serde(default = "default_load_timeout", with = "duration")]
    pub load_timeout: Duration,
    /// Interval of the keep-alive refresh while the stream is active
    #[serde(default = "default_keepalive_interval", with = "duration")]
    pub keepalive_interval: Duration,
    /// Automatic reconnect attempts before giving up
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    /// Linear backoff step between reconnect attempts
    #[serde(default = "default_retry_base_delay", with = "duration")]
    pub retry_base_delay: Duration,
    /// Upper bound of the reconnect delay
    #[serde(default = "default_retry_max_delay", with = "duration")]
    pub retry_max_delay: Duration,
    /// Delay between a positive camera status check and the first start
    #[serde(default = "default_start_delay", with = "duration")]
    pub start_delay: Duration,
}

/// Frozen-frame detection
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StagnationConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default = "default_stagnation_interval", with = "duration")]
    pub check_interval: Duration,
    /// Width of the downscaled comparison sample
    #[serde(default = "default_sample_size")]
    pub sample_width: u32,
    /// Height of the downscaled comparison sample
    #[serde(default = "default_sample_size")]
    pub sample_height: u32,
    /// Dissimilarity below which two samples count as identical
    #[serde(default = "default_stagnation_threshold")]
    pub threshold: u64,
    /// Consecutive identical comparisons that trigger a refresh
    #[serde(default = "default_max_stagnant_ticks")]
    pub max_stagnant_ticks: u32,
}

/// Frame-drop tracking and performance mode
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QualityConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default = "default_quality_interval", with = "duration")]
    pub check_interval: Duration,
    /// Gap since the last frame that counts as a dropped frame window
    #[serde(default = "default_frame_gap_threshold", with = "duration")]
    pub frame_gap_threshold: Duration,
    /// Drop count that must be exceeded to enter performance mode
    #[serde(default = "default_drop_bound")]
    pub drop_bound: u32,
}

/// Bandwidth probing
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BandwidthConfig {
    /// Lightweight endpoint downloaded to measure throughput
    #[serde(default = "default_probe_path")]
    pub probe_path: String,
    #[serde(default = "default_probe_timeout", with = "duration")]
    pub probe_timeout: Duration,
    /// Throughput (KB/s) above which the link counts as high bandwidth
    #[serde(default = "default_high_kbps")]
    pub high_kbps: f64,
    /// Throughput (KB/s) below which the link counts as low bandwidth
    #[serde(default = "default_low_kbps")]
    pub low_kbps: f64,
    /// Run a probe before the first connection
    #[serde(default = "default_true")]
    pub probe_on_start: bool,
}

/// Page lifecycle handling
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LifecycleConfig {
    /// Delay before refreshing after the page becomes visible again
    #[serde(default = "default_visibility_refresh_delay", with = "duration")]
    pub visibility_refresh_delay: Duration,
    #[serde(default = "default_resize_debounce", with = "duration")]
    pub resize_debounce: Duration,
}

/// HTTP client settings shared by the surface, probe and camera API
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HttpConfig {
    #[serde(default = "default_connect_timeout", with = "duration")]
    pub connect_timeout: Duration,
    #[serde(default = "default_user_agent")]
    pub user_agent: String,
    /// Largest multipart part accepted from the stream
    #[serde(default = "default_max_frame_bytes")]
    pub max_frame_bytes: usize,
}

/// Camera REST endpoints
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CameraConfig {
    #[serde(default = "default_camera_status_path")]
    pub status_path: String,
    #[serde(default = "default_camera_start_path")]
    pub start_path: String,
    #[serde(default = "default_camera_stop_path")]
    pub stop_path: String,
    #[serde(default = "default_camera_snapshot_path")]
    pub snapshot_path: String,
    /// Only start streaming once the camera reports itself active
    #[serde(default = "default_true")]
    pub check_status: bool,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub stream: StreamConfig,
    #[serde(default)]
    pub stagnation: StagnationConfig,
    #[serde(default)]
    pub quality: QualityConfig,
    #[serde(default)]
    pub bandwidth: BandwidthConfig,
    #[serde(default)]
    pub lifecycle: LifecycleConfig,
    #[serde(default)]
    pub http: HttpConfig,
    #[serde(default)]
    pub camera: CameraConfig,
}

fn default_true() -> bool {
    true
}

// Stream defaults
fn default_base_url() -> String {
    DEFAULT_BASE_URL.to_string()
}

fn default_normal_path() -> String {
    DEFAULT_NORMAL_STREAM_PATH.to_string()
}

fn default_fast_path() -> String {
    DEFAULT_FAST_STREAM_PATH.to_string()
}

fn default_load_timeout() -> Duration {
    DEFAULT_LOAD_TIMEOUT
}

fn default_keepalive_interval() -> Duration {
    DEFAULT_KEEPALIVE_INTERVAL
}

fn default_max_attempts() -> u32 {
    DEFAULT_MAX_ATTEMPTS
}

fn default_retry_base_delay() -> Duration {
    DEFAULT_RETRY_BASE_DELAY
}

fn default_retry_max_delay() -> Duration {
    DEFAULT_RETRY_MAX_DELAY
}

fn default_start_delay() -> Duration {
    DEFAULT_START_DELAY
}

// Detector defaults
fn default_stagnation_interval() -> Duration {
    DEFAULT_STAGNATION_INTERVAL
}

fn default_sample_size() -> u32 {
    DEFAULT_SAMPLE_SIZE
}

fn default_stagnation_threshold() -> u64 {
    DEFAULT_STAGNATION_THRESHOLD
}

fn default_max_stagnant_ticks() -> u32 {
    DEFAULT_MAX_STAGNANT_TICKS
}

fn default_quality_interval() -> Duration {
    DEFAULT_QUALITY_INTERVAL
}

fn default_frame_gap_threshold() -> Duration {
    DEFAULT_FRAME_GAP_THRESHOLD
}

fn default_drop_bound() -> u32 {
    DEFAULT_DROP_BOUND
}

// Bandwidth defaults
fn default_probe_path() -> String {
    DEFAULT_PROBE_PATH.to_string()
}

fn default_probe_timeout() -> Duration {
    DEFAULT_PROBE_TIMEOUT
}

fn default_high_kbps() -> f64 {
    DEFAULT_HIGH_KBPS
}

fn default_low_kbps() -> f64 {
    DEFAULT_LOW_KBPS
}

// Lifecycle defaults
fn default_visibility_refresh_delay() -> Duration {
    DEFAULT_VISIBILITY_REFRESH_DELAY
}

fn default_resize_debounce() -> Duration {
    DEFAULT_RESIZE_DEBOUNCE
}

// HTTP defaults
fn default_connect_timeout() -> Duration {
    DEFAULT_CONNECT_TIMEOUT
}

fn default_user_agent() -> String {
    format!("camfeed/{}", env!("CARGO_PKG_VERSION"))
}

fn default_max_frame_bytes() -> usize {
    DEFAULT_MAX_FRAME_BYTES
}

// Camera API defaults
fn default_camera_status_path() -> String {
    DEFAULT_CAMERA_STATUS_PATH.to_string()
}

fn default_camera_start_path() -> String {
    DEFAULT_CAMERA_START_PATH.to_string()
}

fn default_camera_stop_path() -> String {
    DEFAULT_CAMERA_STOP_PATH.to_string()
}

fn default_camera_snapshot_path() -> String {
    DEFAULT_CAMERA_SNAPSHOT_PATH.to_string()
}

impl Default for StreamConfig {
    fn default() -> Self {
        Self {
            base_url: default_base_url(),
            normal_path: default_normal_path(),
            fast_path: default_fast_path(),
            load_timeout: default_load_timeout(),
            keepalive_interval: default_keepalive_interval(),
            max_attempts: default_max_attempts(),
            retry_base_delay: default_retry_base_delay(),
            retry_max_delay: default_retry_max_delay(),
            start_delay: default_start_delay(),
        }
    }
}

impl Default for StagnationConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            check_interval: default_stagnation_interval(),
            sample_width: default_sample_size(),
            sample_height: default_sample_size(),
            threshold: default_stagnation_threshold(),
            max_stagnant_ticks: default_max_stagnant_ticks(),
        }
    }
}

impl Default for QualityConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            check_interval: default_quality_interval(),
            frame_gap_threshold: default_frame_gap_threshold(),
            drop_bound: default_drop_bound(),
        }
    }
}

impl Default for BandwidthConfig {
    fn default() -> Self {
        Self {
            probe_path: default_probe_path(),
            probe_timeout: default_probe_timeout(),
            high_kbps: default_high_kbps(),
            low_kbps: default_low_kbps(),
            probe_on_start: true,
        }
    }
}

impl Default for LifecycleConfig {
    fn default() -> Self {
        Self {
            visibility_refresh_delay: default_visibility_refresh_delay(),
            resize_debounce: default_resize_debounce(),
        }
    }
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            connect_timeout: default_connect_timeout(),
            user_agent: default_user_agent(),
            max_frame_bytes: default_max_frame_bytes(),
        }
    }
}

impl Default for CameraConfig {
    fn default() -> Self {
        Self {
            status_path: default_camera_status_path(),
            start_path: default_camera_start_path(),
            stop_path: default_camera_stop_path(),
            snapshot_path: default_camera_snapshot_path(),
            check_status: true,
        }
    }
}

impl StreamConfig {
    /// Parsed base URL of the camera server
    pub fn base_url(&self) -> Result<Url, ConfigError> {
        Url::parse(&self.base_url)
            .map_err(|e| ConfigError::invalid("stream.base_url", e.to_string()))
    }

    /// Resolve an endpoint path against the base URL
    pub fn endpoint(&self, path: &str) -> Result<Url, ConfigError> {
        self.base_url()?
            .join(path)
            .map_err(|e| ConfigError::invalid("stream", format!("bad endpoint '{path}': {e}")))
    }
}

impl Config {
    /// Load configuration: built-in defaults, then the TOML file (if it
    /// exists), then `CAMFEED_*` environment variables.
    pub fn load_from_file<P: AsRef<Path>>(config_file: P) -> Result<Self, ConfigError> {
        let path = config_file.as_ref();
        let mut figment = Figment::from(Serialized::defaults(Config::default()));

        if path.exists() {
            figment = figment.merge(Toml::file(path));
            info!("Loading configuration from {}", path.display());
        } else {
            info!(
                "Configuration file {} not found, using defaults",
                path.display()
            );
        }

        let config: Config = figment
            .merge(Env::prefixed(ENV_PREFIX).split("__"))
            .extract()?;
        config.validate()?;
        Ok(config)
    }

    /// Reject settings that would stall or spin the controller
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.stream.base_url()?;

        let non_zero = [
            ("stream.load_timeout", self.stream.load_timeout),
            ("stream.keepalive_interval", self.stream.keepalive_interval),
            ("stagnation.check_interval", self.stagnation.check_interval),
            ("quality.check_interval", self.quality.check_interval),
            ("bandwidth.probe_timeout", self.bandwidth.probe_timeout),
        ];
        for (field, value) in non_zero {
            if value.is_zero() {
                return Err(ConfigError::invalid(field, "must be greater than zero"));
            }
        }

        if self.stream.max_attempts == 0 {
            return Err(ConfigError::invalid(
                "stream.max_attempts",
                "must be greater than zero",
            ));
        }

        if self.stream.retry_max_delay < self.stream.retry_base_delay {
            return Err(ConfigError::invalid(
                "stream.retry_max_delay",
                format!(
                    "{} is smaller than retry_base_delay {}",
                    humantime::format_duration(self.stream.retry_max_delay),
                    humantime::format_duration(self.stream.retry_base_delay)
                ),
            ));
        }

        if self.stagnation.sample_width == 0 || self.stagnation.sample_height == 0 {
            return Err(ConfigError::invalid(
                "stagnation.sample_width",
                "sample dimensions must be non-zero",
            ));
        }

        if self.bandwidth.low_kbps > self.bandwidth.high_kbps {
            return Err(ConfigError::invalid(
                "bandwidth.low_kbps",
                "must not exceed bandwidth.high_kbps",
            ));
        }

        Ok(())
    }

    /// Render the effective configuration as TOML
    pub fn to_toml(&self) -> Result<String, ConfigError> {
        Ok(toml::to_string_pretty(self)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_default_config_is_valid() {
        let config = Config::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.stream.max_attempts, 5);
        assert_eq!(config.stream.load_timeout, Duration::from_secs(5));
        assert_eq!(config.stagnation.sample_width, 50);
        assert_eq!(config.quality.frame_gap_threshold, Duration::from_millis(200));
    }

    #[test]
    fn test_load_from_file_overrides_defaults() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(
            file,
            r#"
[stream]
base_url = "http://camera.local:9000"
max_attempts = 3
retry_base_delay = "500ms"

[stagnation]
threshold = 250
"#
        )
        .unwrap();

        let config = Config::load_from_file(file.path()).unwrap();
        assert_eq!(config.stream.base_url, "http://camera.local:9000");
        assert_eq!(config.stream.max_attempts, 3);
        assert_eq!(config.stream.retry_base_delay, Duration::from_millis(500));
        assert_eq!(config.stagnation.threshold, 250);
        // Untouched sections keep their defaults
        assert_eq!(config.quality.drop_bound, 5);
    }

    #[test]
    fn test_missing_file_uses_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let config = Config::load_from_file(dir.path().join("absent.toml")).unwrap();
        assert_eq!(config.stream.base_url, DEFAULT_BASE_URL);
    }

    #[test]
    fn test_validation_rejects_zero_attempts() {
        let mut config = Config::default();
        config.stream.max_attempts = 0;
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("stream.max_attempts"));
    }

    #[test]
    fn test_validation_rejects_inverted_backoff() {
        let mut config = Config::default();
        config.stream.retry_base_delay = Duration::from_secs(10);
        config.stream.retry_max_delay = Duration::from_secs(5);
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validation_rejects_bad_base_url() {
        let mut config = Config::default();
        config.stream.base_url = "not a url".to_string();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_endpoint_resolution() {
        let config = StreamConfig::default();
        let url = config.endpoint(&config.fast_path).unwrap();
        assert_eq!(url.as_str(), "http://localhost:8000/api/camera/stream/fast");
    }

    #[test]
    fn test_render_round_trips_through_loader() {
        let rendered = Config::default().to_toml().unwrap();
        assert!(rendered.contains("load_timeout = \"5s\""));

        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(rendered.as_bytes()).unwrap();
        let loaded = Config::load_from_file(file.path()).unwrap();
        assert_eq!(loaded.stream.keepalive_interval, Duration::from_secs(30));
    }
}

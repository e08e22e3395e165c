//! Client for the camera server's REST endpoints
//!
//! | Method | Path                   | Response                                   |
//! |--------|------------------------|--------------------------------------------|
//! | GET    | `/api/camera/status`   | `{success, active, message}`               |
//! | POST   | `/api/camera/start`    | `{success, message}`                       |
//! | POST   | `/api/camera/stop`     | `{success, message}`                       |
//! | GET    | `/api/camera/snapshot` | `{success, image: "data:...;base64,", timestamp}` |

use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use bytes::Bytes;
use chrono::{DateTime, Local, TimeZone};
use reqwest::{Client, Method};
use serde::Deserialize;
use serde::de::DeserializeOwned;
use std::path::{Path, PathBuf};
use tracing::{debug, info};
use url::Url;

use crate::config::CameraConfig;
use crate::errors::{AppResult, CameraApiError, CameraApiResult};

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct CameraStatus {
    #[serde(default)]
    pub success: bool,
    #[serde(default)]
    pub active: bool,
    #[serde(default)]
    pub message: Option<String>,
}

impl CameraStatus {
    /// The server answered and reports the camera running
    pub fn is_active(&self) -> bool {
        self.success && self.active
    }
}

#[derive(Debug, Deserialize)]
struct CommandResponse {
    #[serde(default)]
    success: bool,
    #[serde(default)]
    message: Option<String>,
}

#[derive(Debug, Deserialize)]
struct SnapshotResponse {
    #[serde(default)]
    success: bool,
    #[serde(default)]
    image: Option<String>,
    #[serde(default)]
    timestamp: Option<String>,
    #[serde(default)]
    message: Option<String>,
}

/// A decoded still image
#[derive(Debug, Clone)]
pub struct Snapshot {
    pub jpeg: Bytes,
    /// Capture time as reported by the server
    pub taken_at: Option<String>,
}

impl Snapshot {
    pub async fn save(&self, path: &Path) -> std::io::Result<()> {
        tokio::fs::write(path, &self.jpeg).await?;
        info!(path = %path.display(), bytes = self.jpeg.len(), "Snapshot saved");
        Ok(())
    }
}

#[derive(Debug, Clone)]
pub struct CameraApiClient {
    client: Client,
    base_url: Url,
    config: CameraConfig,
}

impl CameraApiClient {
    pub fn new(client: Client, base_url: Url, config: CameraConfig) -> Self {
        Self {
            client,
            base_url,
            config,
        }
    }

    pub async fn status(&self) -> CameraApiResult<CameraStatus> {
        let status: CameraStatus = self.call(Method::GET, &self.config.status_path).await?;
        debug!(active = status.active, success = status.success, "Camera status");
        Ok(status)
    }

    /// Start the camera; returns the server's message
    pub async fn start(&self) -> CameraApiResult<String> {
        self.command(&self.config.start_path).await
    }

    /// Stop the camera; returns the server's message
    pub async fn stop(&self) -> CameraApiResult<String> {
        self.command(&self.config.stop_path).await
    }

    /// Flip the camera on or off based on its current status. Returns
    /// whether the camera is active afterwards.
    pub async fn toggle(&self) -> CameraApiResult<bool> {
        let active = self.status().await?.is_active();
        if active {
            self.stop().await?;
        } else {
            self.start().await?;
        }
        info!(active = !active, "Camera toggled");
        Ok(!active)
    }

    pub async fn snapshot(&self) -> CameraApiResult<Snapshot> {
        let response: SnapshotResponse =
            self.call(Method::GET, &self.config.snapshot_path).await?;
        if !response.success {
            return Err(CameraApiError::Rejected {
                message: response
                    .message
                    .unwrap_or_else(|| "snapshot unavailable".to_string()),
            });
        }

        let image = response.image.ok_or_else(|| CameraApiError::InvalidSnapshot {
            message: "response carries no image".to_string(),
        })?;
        let jpeg = decode_data_url(&image)?;
        Ok(Snapshot {
            jpeg: Bytes::from(jpeg),
            taken_at: response.timestamp,
        })
    }

    /// Take a snapshot and write it to `output`, or to a timestamped file in
    /// the working directory. Returns the path written.
    pub async fn save_snapshot(&self, output: Option<PathBuf>) -> AppResult<PathBuf> {
        let snapshot = self.snapshot().await?;
        let path = output.unwrap_or_else(|| PathBuf::from(snapshot_file_name(&Local::now())));
        snapshot.save(&path).await?;
        Ok(path)
    }

    async fn command(&self, path: &str) -> CameraApiResult<String> {
        let response: CommandResponse = self.call(Method::POST, path).await?;
        let message = response.message.unwrap_or_default();
        if response.success {
            info!(endpoint = path, "{}", message);
            Ok(message)
        } else {
            Err(CameraApiError::Rejected { message })
        }
    }

    async fn call<T: DeserializeOwned>(&self, method: Method, path: &str) -> CameraApiResult<T> {
        let url = self.base_url.join(path)?;
        let endpoint = url.to_string();
        let response = self
            .client
            .request(method, url)
            .send()
            .await
            .map_err(|source| CameraApiError::Request {
                endpoint: endpoint.clone(),
                source,
            })?;

        if !response.status().is_success() {
            return Err(CameraApiError::Status {
                endpoint,
                status: response.status().as_u16(),
            });
        }

        response
            .json()
            .await
            .map_err(|source| CameraApiError::Request { endpoint, source })
    }
}

/// Decode a `data:image/jpeg;base64,...` URL into raw bytes
pub fn decode_data_url(data_url: &str) -> CameraApiResult<Vec<u8>> {
    let payload = data_url
        .strip_prefix("data:")
        .and_then(|rest| rest.split_once(";base64,"))
        .map(|(_, payload)| payload)
        .ok_or_else(|| CameraApiError::InvalidSnapshot {
            message: "expected a base64 data URL".to_string(),
        })?;

    STANDARD
        .decode(payload.trim())
        .map_err(|e| CameraApiError::InvalidSnapshot {
            message: e.to_string(),
        })
}

/// File name for a snapshot taken at `at`, e.g.
/// `snapshot_2024-03-01T14-05-09.jpg`
pub fn snapshot_file_name<Tz: TimeZone>(at: &DateTime<Tz>) -> String
where
    Tz::Offset: std::fmt::Display,
{
    format!("snapshot_{}.jpg", at.format("%Y-%m-%dT%H-%M-%S"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    #[test]
    fn test_decode_data_url() {
        let encoded = format!("data:image/jpeg;base64,{}", STANDARD.encode(b"\xff\xd8jpeg"));
        let decoded = tokio_test::assert_ok!(decode_data_url(&encoded));
        assert_eq!(decoded, b"\xff\xd8jpeg");
    }

    #[test]
    fn test_decode_rejects_plain_base64() {
        let err = decode_data_url(&STANDARD.encode(b"raw")).unwrap_err();
        assert!(matches!(err, CameraApiError::InvalidSnapshot { .. }));
    }

    #[test]
    fn test_decode_rejects_corrupt_payload() {
        assert!(decode_data_url("data:image/jpeg;base64,!!!").is_err());
    }

    #[test]
    fn test_snapshot_file_name() {
        let at = Utc.with_ymd_and_hms(2024, 3, 1, 14, 5, 9).unwrap();
        assert_eq!(snapshot_file_name(&at), "snapshot_2024-03-01T14-05-09.jpg");
    }

    #[test]
    fn test_status_requires_success_and_active() {
        let status: CameraStatus =
            serde_json::from_str(r#"{"success": false, "active": true}"#).unwrap();
        assert!(!status.is_active());

        let status: CameraStatus =
            serde_json::from_str(r#"{"success": true, "active": true, "message": "ok"}"#).unwrap();
        assert!(status.is_active());
    }
}

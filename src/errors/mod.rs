//! Centralized error handling for camfeed
//!
//! Errors are grouped by the layer that produces them:
//!
//! - **Stream errors**: load timeouts, load failures, probe and sampling
//!   failures. These never escape the controller; they are recovered locally
//!   and surface only as state in [`crate::stream::StreamStatus`].
//! - **Camera API errors**: failures talking to the camera REST endpoints.
//! - **Configuration errors**: invalid or unreadable configuration.
//!
//! # Usage
//!
//! ```rust
//! use camfeed::errors::{AppError, AppResult};
//!
//! fn example_function() -> AppResult<String> {
//!     Ok("success".to_string())
//! }
//! ```

pub mod types;

pub use types::*;

/// Convenience type alias for Results using AppError
pub type AppResult<T> = Result<T, AppError>;

/// Convenience type alias for camera API Results
pub type CameraApiResult<T> = Result<T, CameraApiError>;

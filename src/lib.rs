//! camfeed: keeps an MJPEG live feed from a camera server healthy.
//!
//! - [`stream`]: connection state machine with load timeouts, capped retries
//!   and keep-alive refreshes, plus the HTTP display surface.
//! - [`monitor`]: frozen-picture detection and frame-drop driven
//!   performance mode.
//! - [`bandwidth`]: throughput probe that picks the default stream variant.
//! - [`lifecycle`]: host events (unload, visibility, resize) mapped to
//!   stream actions.
//! - [`camera_api`]: the camera server's REST endpoints.

pub mod bandwidth;
pub mod camera_api;
pub mod config;
pub mod console;
pub mod context;
pub mod diagnostics;
pub mod errors;
pub mod lifecycle;
pub mod mjpeg;
pub mod monitor;
pub mod observability;
pub mod stream;

pub use config::Config;
pub use context::ViewerContext;
pub use errors::{AppError, AppResult};

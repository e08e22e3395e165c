//! Live stream connection handling: the state machine, its timers and the
//! display surfaces it drives.

pub mod cache_bust;
pub mod http_surface;
pub mod manager;
pub mod session;
pub mod surface;
pub mod timers;

pub use http_surface::HttpStreamSurface;
pub use manager::{
    ManagerChannel, ManagerCommand, StreamConnectionManager, StreamHandle, VariantSignals,
};
pub use session::{
    RefreshReason, SourceId, StreamState, StreamStatus, StreamVariant, backoff_delay,
};
pub use surface::{DisplaySurface, Frame, FrameSample, FrameSampler, FrameStore, SurfaceSignals};
pub use timers::{TimerKind, TimerSnapshot};

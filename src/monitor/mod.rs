//! Background monitors that watch an active stream and request refreshes.

pub mod quality;
pub mod stagnation;

pub use quality::{ModeChange, PerformanceState, QualityModeController};
pub use stagnation::{StagnationDetector, StagnationVerdict};

// THEORY:
// This file is the main entry point for the `ontrack` library crate. It exposes
// two stages that share nothing but the trajectory file format:
//
// 1.  **Tracking** (`pipeline::TrackingSession`): frames in, one calibrated
//     `timestamp,x,y` sample per usable frame out, plus an optional annotated
//     copy of the video.
// 2.  **Analysis** (`core_modules::metrics`): pure functions over a finished
//     `Trajectory` (distance travelled, time spent inside or outside a region).
//
// The `core_modules` hold the individual stages. The most common types are
// re-exported here so that binaries need only a handful of imports.

pub mod config;
pub mod core_modules;
pub mod error;
pub mod pipeline;

pub use crate::config::{OutputConfig, TrackerConfig};
pub use crate::core_modules::calibrator::ObjectDimensions;
pub use crate::core_modules::frame::{Frame, FrameSource, ImageSequenceSource};
pub use crate::core_modules::metrics::{Region, metrics};
pub use crate::core_modules::trajectory::{Trajectory, TrajectoryRecorder, TrajectorySample};
pub use crate::core_modules::video_sink::{ImageSequenceSink, VideoSink};
pub use crate::error::{MetricsError, TrackingError};
pub use crate::pipeline::{SessionEnd, SessionSummary, TrackingSession};

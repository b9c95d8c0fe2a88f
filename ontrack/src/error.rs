// THEORY:
// Two families of failure exist in this crate and they never mix:
// 1.  **Tracking failures** abort a session. They come from setup (a source or a
//     sink that cannot be opened, a nonsensical calibration input) or from I/O
//     while the frame loop runs. Per-frame conditions such as "no blob in this
//     frame" are *not* errors; they are `Option` returns in the pipeline.
// 2.  **Metrics failures** are input-validation problems with a stored trajectory
//     or a region supplied by the user. No partial result accompanies them.

use std::path::PathBuf;

use thiserror::Error;

/// Fatal conditions of a tracking session.
#[derive(Debug, Error)]
pub enum TrackingError {
    #[error("frame source unavailable: {0}")]
    SourceUnavailable(String),

    #[error("failed to decode frame {index}: {reason}")]
    Decode { index: u64, reason: String },

    #[error("frame {index} is {actual_width}x{actual_height}, source declared {width}x{height}")]
    ResolutionMismatch {
        index: u64,
        width: u32,
        height: u32,
        actual_width: u32,
        actual_height: u32,
    },

    #[error("failed to open output {path}: {source}")]
    SinkOpen {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("output sink failed: {0}")]
    Sink(String),

    #[error("invalid calibration input: {0}")]
    InvalidCalibration(String),

    #[error("invalid configuration: {0}")]
    Config(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

/// Validation failures of the offline analysis stage.
#[derive(Debug, Error)]
pub enum MetricsError {
    #[error("cannot read trajectory {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("malformed trajectory line {line}: {content:?}")]
    Malformed { line: usize, content: String },

    #[error("trajectory line {line}: timestamp {timestamp} precedes {previous}")]
    NonMonotonic {
        line: usize,
        timestamp: f64,
        previous: f64,
    },

    #[error("invalid region: {0}")]
    InvalidRegion(String),
}

// THEORY:
// The trajectory is the only artifact that leaves a tracking session, and the
// only input of the analysis stage. Its on-disk form is deliberately flat: one
// `timestamp,x,y` line per sample, no header.
//
// Key architectural principles:
// 1.  **Quantisation Is Part Of The Format**: Timestamps are rounded to
//     hundredths of a second and coordinates to tenths of a unit *before* they
//     are written. A sample read back is identical to the sample that was
//     recorded.
// 2.  **Append-Only Recording**: The recorder only ever appends a line per
//     sample. It owns its writer exclusively and is flushed when the session
//     ends, whatever the reason.
// 3.  **Validated Loading**: Reading a trajectory either yields every sample or
//     an error naming the offending line. There are no partial results.

use std::fmt;
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::Path;
use std::str::FromStr;

use crate::error::{MetricsError, TrackingError};

pub const TIMESTAMP_DECIMALS: i32 = 2;
pub const COORDINATE_DECIMALS: i32 = 1;

/// Rounds `value` to `decimals` places, ties to the even digit.
pub fn round_to(value: f64, decimals: i32) -> f64 {
    let factor = 10f64.powi(decimals);
    (value * factor).round_ties_even() / factor
}

/// One calibrated position of the tracked object.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TrajectorySample {
    /// Seconds since the start of the stream.
    pub timestamp: f64,
    pub x: f64,
    pub y: f64,
}

impl TrajectorySample {
    pub fn new(timestamp: f64, x: f64, y: f64) -> Self {
        Self { timestamp, x, y }
    }

    /// Builds a sample rounded to the precision of the trajectory file.
    pub fn quantized(timestamp: f64, x: f64, y: f64) -> Self {
        Self {
            timestamp: round_to(timestamp, TIMESTAMP_DECIMALS),
            x: round_to(x, COORDINATE_DECIMALS),
            y: round_to(y, COORDINATE_DECIMALS),
        }
    }

    /// Euclidean distance between the two positions.
    pub fn distance_to(&self, other: &TrajectorySample) -> f64 {
        (self.x - other.x).hypot(self.y - other.y)
    }

    fn parse_line(line: usize, content: &str) -> Result<Self, MetricsError> {
        let malformed = || MetricsError::Malformed {
            line,
            content: content.to_string(),
        };
        let fields: Vec<&str> = content.split(',').map(str::trim).collect();
        let [timestamp, x, y] = fields.as_slice() else {
            return Err(malformed());
        };
        let parse = |field: &str| {
            field
                .parse::<f64>()
                .ok()
                .filter(|value| value.is_finite())
                .ok_or_else(malformed)
        };
        Ok(Self {
            timestamp: parse(*timestamp)?,
            x: parse(*x)?,
            y: parse(*y)?,
        })
    }
}

impl fmt::Display for TrajectorySample {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{:.tp$},{:.cp$},{:.cp$}",
            self.timestamp,
            self.x,
            self.y,
            tp = TIMESTAMP_DECIMALS as usize,
            cp = COORDINATE_DECIMALS as usize
        )
    }
}

/// An ordered sequence of samples from one tracking session.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Trajectory {
    samples: Vec<TrajectorySample>,
}

impl Trajectory {
    pub fn new(samples: Vec<TrajectorySample>) -> Self {
        Self { samples }
    }

    /// Reads and validates a trajectory file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, MetricsError> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|source| MetricsError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        text.parse()
    }

    pub fn samples(&self) -> &[TrajectorySample] {
        &self.samples
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    /// Time between the first and the last sample.
    pub fn duration(&self) -> f64 {
        match (self.samples.first(), self.samples.last()) {
            (Some(first), Some(last)) => last.timestamp - first.timestamp,
            _ => 0.0,
        }
    }
}

impl FromStr for Trajectory {
    type Err = MetricsError;

    fn from_str(text: &str) -> Result<Self, Self::Err> {
        let mut samples: Vec<TrajectorySample> = Vec::new();
        for (i, raw) in text.lines().enumerate() {
            let content = raw.trim();
            if content.is_empty() {
                continue;
            }
            let line = i + 1;
            let sample = TrajectorySample::parse_line(line, content)?;
            if let Some(previous) = samples.last() {
                if sample.timestamp < previous.timestamp {
                    return Err(MetricsError::NonMonotonic {
                        line,
                        timestamp: sample.timestamp,
                        previous: previous.timestamp,
                    });
                }
            }
            samples.push(sample);
        }
        Ok(Self { samples })
    }
}

/// Appends samples to a trajectory file, one line each.
pub struct TrajectoryRecorder<W: Write> {
    writer: W,
    samples_written: u64,
}

impl TrajectoryRecorder<BufWriter<File>> {
    /// Creates (or truncates) the trajectory file at `path`.
    pub fn create(path: impl AsRef<Path>) -> Result<Self, TrackingError> {
        let path = path.as_ref();
        let file = File::create(path).map_err(|source| TrackingError::SinkOpen {
            path: path.to_path_buf(),
            source,
        })?;
        log::info!("trajectory file: {}", path.display());
        Ok(Self::new(BufWriter::new(file)))
    }
}

impl<W: Write> TrajectoryRecorder<W> {
    pub fn new(writer: W) -> Self {
        Self {
            writer,
            samples_written: 0,
        }
    }

    pub fn record(&mut self, sample: &TrajectorySample) -> Result<(), TrackingError> {
        writeln!(self.writer, "{sample}")?;
        self.samples_written += 1;
        Ok(())
    }

    pub fn flush(&mut self) -> Result<(), TrackingError> {
        self.writer.flush()?;
        Ok(())
    }

    pub fn samples_written(&self) -> u64 {
        self.samples_written
    }

    pub fn into_inner(self) -> W {
        self.writer
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn quantized_sample_matches_file_precision() {
        let sample = TrajectorySample::quantized(11.0 / 30.0, 10.04, 7.96);
        assert_eq!(sample, TrajectorySample::new(0.37, 10.0, 8.0));
        assert_eq!(sample.to_string(), "0.37,10.0,8.0");
    }

    #[test]
    fn ties_round_to_even() {
        let sample = TrajectorySample::quantized(0.125, 0.25, 0.75);
        assert_eq!(sample, TrajectorySample::new(0.12, 0.2, 0.8));
        assert_eq!(sample.to_string(), "0.12,0.2,0.8");
    }

    #[test]
    fn whole_values_keep_their_decimals() {
        assert_eq!(TrajectorySample::new(1.0, 3.0, 4.0).to_string(), "1.00,3.0,4.0");
    }

    #[test]
    fn recorder_writes_one_line_per_sample() {
        let mut recorder = TrajectoryRecorder::new(Vec::new());
        recorder.record(&TrajectorySample::new(0.1, 1.0, 2.0)).unwrap();
        recorder.record(&TrajectorySample::new(0.2, 1.5, 2.5)).unwrap();
        assert_eq!(recorder.samples_written(), 2);
        let text = String::from_utf8(recorder.into_inner()).unwrap();
        assert_eq!(text, "0.10,1.0,2.0\n0.20,1.5,2.5\n");
    }

    #[test]
    fn recorded_text_parses_back() {
        let mut recorder = TrajectoryRecorder::new(Vec::new());
        let samples = [
            TrajectorySample::quantized(0.033, 1.26, 0.0),
            TrajectorySample::quantized(0.067, 1.31, 0.44),
        ];
        for sample in &samples {
            recorder.record(sample).unwrap();
        }
        let text = String::from_utf8(recorder.into_inner()).unwrap();
        let trajectory: Trajectory = text.parse().unwrap();
        assert_eq!(trajectory.samples(), &samples);
    }

    #[test]
    fn parse_tolerates_missing_final_newline_and_blank_lines() {
        let trajectory: Trajectory = "0.00,0.0,0.0\n\n1.00,3.0,4.0\r\n2.00,3.0,4.0".parse().unwrap();
        assert_eq!(trajectory.len(), 3);
        assert_eq!(trajectory.duration(), 2.0);
    }

    #[test]
    fn parse_rejects_wrong_field_count() {
        let err = "0.00,0.0\n".parse::<Trajectory>().unwrap_err();
        assert!(matches!(err, MetricsError::Malformed { line: 1, .. }));
    }

    #[test]
    fn parse_rejects_non_numeric_fields() {
        let err = "0.00,0.0,0.0\n0.10,abc,1.0\n".parse::<Trajectory>().unwrap_err();
        assert!(matches!(err, MetricsError::Malformed { line: 2, .. }));
        let err = "0.00,NaN,0.0\n".parse::<Trajectory>().unwrap_err();
        assert!(matches!(err, MetricsError::Malformed { line: 1, .. }));
    }

    #[test]
    fn parse_rejects_time_going_backwards() {
        let err = "1.00,0.0,0.0\n0.50,0.0,0.0\n".parse::<Trajectory>().unwrap_err();
        assert!(matches!(err, MetricsError::NonMonotonic { line: 2, .. }));
    }

    #[test]
    fn load_reports_missing_file() {
        let dir = tempfile::tempdir().unwrap();
        let err = Trajectory::load(dir.path().join("absent.txt")).unwrap_err();
        assert!(matches!(err, MetricsError::Io { .. }));
    }

    #[test]
    fn empty_trajectory_has_zero_duration() {
        assert_eq!(Trajectory::default().duration(), 0.0);
        assert!(Trajectory::default().is_empty());
    }
}

// THEORY:
// The `frame` module is the entry point of raw image data into the tracker. A
// `Frame` is a "dumb", immutable data container: one RGB image plus the position
// of that image in the stream (its 1-based index) and its capture time, derived
// as `index / frame_rate`.
//
// Key architectural principles:
// 1.  **Source Agnosticism**: Everything downstream only sees the `FrameSource`
//     trait. A live camera, a decoded video file and a directory of still images
//     are interchangeable as long as they can hand out frames one at a time and
//     report their frame rate and resolution.
// 2.  **Exhaustion Is Not Failure**: `next_frame` returns `Ok(None)` when the
//     stream ends. Only a source that cannot be opened, or a frame that cannot be
//     decoded, is an error.
// 3.  **Fixed Geometry**: The resolution of a session never changes. Sources are
//     responsible for rejecting frames that do not match what they declared.

use std::collections::VecDeque;
use std::path::{Path, PathBuf};

use image::RgbImage;

use crate::error::TrackingError;

const IMAGE_EXTENSIONS: [&str; 7] = ["png", "jpg", "jpeg", "bmp", "tif", "tiff", "webp"];

/// A single decoded video frame.
#[derive(Debug, Clone)]
pub struct Frame {
    index: u64,
    timestamp: f64,
    image: RgbImage,
}

impl Frame {
    /// Builds a frame; its capture time is `index / frame_rate` seconds.
    pub fn new(index: u64, frame_rate: f64, image: RgbImage) -> Self {
        Self {
            index,
            timestamp: index as f64 / frame_rate,
            image,
        }
    }

    /// The 1-based position of this frame in its stream.
    pub fn index(&self) -> u64 {
        self.index
    }

    /// Capture time in seconds since the start of the stream.
    pub fn timestamp(&self) -> f64 {
        self.timestamp
    }

    pub fn image(&self) -> &RgbImage {
        &self.image
    }

    pub fn width(&self) -> u32 {
        self.image.width()
    }

    pub fn height(&self) -> u32 {
        self.image.height()
    }
}

/// A stream of frames with a known rate and geometry.
pub trait FrameSource {
    /// Returns the next frame, or `None` once the stream is exhausted.
    fn next_frame(&mut self) -> Result<Option<Frame>, TrackingError>;

    /// Frames per second.
    fn frame_rate(&self) -> f64;

    /// `(width, height)` in pixels.
    fn resolution(&self) -> (u32, u32);
}

/// Reads a recorded session stored as a directory of still images.
///
/// Files are played back in lexical order of their names, so zero-padded
/// numbering (`000001.png`, `000002.png`, ...) is expected.
pub struct ImageSequenceSource {
    pending: VecDeque<PathBuf>,
    frame_rate: f64,
    width: u32,
    height: u32,
    frames_read: u64,
}

impl ImageSequenceSource {
    pub fn open(directory: impl AsRef<Path>, frame_rate: f64) -> Result<Self, TrackingError> {
        let directory = directory.as_ref().to_path_buf();
        if !frame_rate.is_finite() || frame_rate <= 0.0 {
            return Err(TrackingError::Config(format!(
                "frame rate must be a positive number, got {frame_rate}"
            )));
        }

        let entries = std::fs::read_dir(&directory).map_err(|e| {
            TrackingError::SourceUnavailable(format!("{}: {}", directory.display(), e))
        })?;
        let mut paths: Vec<PathBuf> = entries
            .filter_map(|entry| entry.ok().map(|e| e.path()))
            .filter(|path| path.is_file() && has_image_extension(path))
            .collect();
        paths.sort();

        let first = paths.first().ok_or_else(|| {
            TrackingError::SourceUnavailable(format!(
                "{} contains no image frames",
                directory.display()
            ))
        })?;
        let (width, height) = image::image_dimensions(first).map_err(|e| {
            TrackingError::SourceUnavailable(format!("{}: {}", first.display(), e))
        })?;

        log::info!(
            "ImageSequenceSource: opened {} ({} frames, {}x{} @ {} fps)",
            directory.display(),
            paths.len(),
            width,
            height,
            frame_rate
        );

        Ok(Self {
            pending: paths.into(),
            frame_rate,
            width,
            height,
            frames_read: 0,
        })
    }

    /// Frames not yet handed out.
    pub fn remaining(&self) -> usize {
        self.pending.len()
    }
}

impl FrameSource for ImageSequenceSource {
    fn next_frame(&mut self) -> Result<Option<Frame>, TrackingError> {
        let Some(path) = self.pending.pop_front() else {
            return Ok(None);
        };
        self.frames_read += 1;
        let index = self.frames_read;

        let image = image::open(&path)
            .map_err(|e| TrackingError::Decode {
                index,
                reason: format!("{}: {}", path.display(), e),
            })?
            .to_rgb8();

        if image.dimensions() != (self.width, self.height) {
            return Err(TrackingError::ResolutionMismatch {
                index,
                width: self.width,
                height: self.height,
                actual_width: image.width(),
                actual_height: image.height(),
            });
        }

        Ok(Some(Frame::new(index, self.frame_rate, image)))
    }

    fn frame_rate(&self) -> f64 {
        self.frame_rate
    }

    fn resolution(&self) -> (u32, u32) {
        (self.width, self.height)
    }
}

/// Frames already held in memory, e.g. generated synthetically.
pub struct MemorySource {
    frames: VecDeque<RgbImage>,
    frame_rate: f64,
    width: u32,
    height: u32,
    frames_read: u64,
}

impl MemorySource {
    pub fn new(frames: Vec<RgbImage>, frame_rate: f64) -> Self {
        let (width, height) = frames.first().map(|f| f.dimensions()).unwrap_or((0, 0));
        Self {
            frames: frames.into(),
            frame_rate,
            width,
            height,
            frames_read: 0,
        }
    }
}

impl FrameSource for MemorySource {
    fn next_frame(&mut self) -> Result<Option<Frame>, TrackingError> {
        let Some(image) = self.frames.pop_front() else {
            return Ok(None);
        };
        self.frames_read += 1;
        if image.dimensions() != (self.width, self.height) {
            return Err(TrackingError::ResolutionMismatch {
                index: self.frames_read,
                width: self.width,
                height: self.height,
                actual_width: image.width(),
                actual_height: image.height(),
            });
        }
        Ok(Some(Frame::new(self.frames_read, self.frame_rate, image)))
    }

    fn frame_rate(&self) -> f64 {
        self.frame_rate
    }

    fn resolution(&self) -> (u32, u32) {
        (self.width, self.height)
    }
}

fn has_image_extension(path: &Path) -> bool {
    path.extension()
        .and_then(|ext| ext.to_str())
        .map(|ext| {
            let ext = ext.to_ascii_lowercase();
            IMAGE_EXTENSIONS.contains(&ext.as_str())
        })
        .unwrap_or(false)
}

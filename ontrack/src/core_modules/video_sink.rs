use std::path::{Path, PathBuf};

use image::RgbImage;

use crate::error::TrackingError;

/// Receives every processed frame of a session, in order.
pub trait VideoSink {
    fn write_frame(&mut self, image: &RgbImage) -> Result<(), TrackingError>;

    /// Flushes and closes the output. Called exactly once, when the session ends.
    fn finish(&mut self) -> Result<(), TrackingError>;
}

/// Writes frames as numbered PNG files (`000001.png`, `000002.png`, ...).
pub struct ImageSequenceSink {
    directory: PathBuf,
    frames_written: u64,
}

impl ImageSequenceSink {
    /// Creates `directory` (and its parents) if needed.
    pub fn create(directory: impl AsRef<Path>) -> Result<Self, TrackingError> {
        let directory = directory.as_ref().to_path_buf();
        std::fs::create_dir_all(&directory).map_err(|source| TrackingError::SinkOpen {
            path: directory.clone(),
            source,
        })?;
        log::info!("annotated frames: {}", directory.display());
        Ok(Self {
            directory,
            frames_written: 0,
        })
    }

    pub fn directory(&self) -> &Path {
        &self.directory
    }

    pub fn frames_written(&self) -> u64 {
        self.frames_written
    }
}

impl VideoSink for ImageSequenceSink {
    fn write_frame(&mut self, image: &RgbImage) -> Result<(), TrackingError> {
        let path = self
            .directory
            .join(format!("{:06}.png", self.frames_written + 1));
        image
            .save(&path)
            .map_err(|e| TrackingError::Sink(format!("{}: {e}", path.display())))?;
        self.frames_written += 1;
        Ok(())
    }

    fn finish(&mut self) -> Result<(), TrackingError> {
        log::debug!(
            "{} frames written to {}",
            self.frames_written,
            self.directory.display()
        );
        Ok(())
    }
}

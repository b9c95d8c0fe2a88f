// THEORY:
// The `background_model` module is the temporal analysis layer of the tracker. It
// answers one question for every pixel of every frame: "does this look like the
// scene usually looks here?"
//
// Key architectural principles:
// 1.  **Stateful, Per-Pixel Memory**: For each pixel the model keeps a small bank
//     of colour samples taken from past frames. This bank *is* the learned
//     background; it is private to the model and only `observe` mutates it.
// 2.  **Nearest-Neighbour Vote**: A pixel is background when at least `knn` of its
//     stored samples lie within a squared colour distance of the current value.
//     Otherwise it is foreground, unless it is a darker, colour-consistent
//     version of the background, in which case it is reported as a shadow.
// 3.  **Adaptive Learning**: The bank is refreshed round-robin at a slow, fixed
//     cadence, so a scene change that persists long enough is absorbed into the
//     background while a moving animal is not.
// 4.  **Warm-Up**: Until enough samples exist to vote, every pixel is reported as
//     background. Classification quality during the first frames is best-effort.
// 5.  **Pluggable**: The pipeline depends on the `BackgroundModel` trait only, so
//     another adaptive subtractor can replace the KNN model without touching the
//     rest of the pipeline.

use image::{GrayImage, Luma, RgbImage};
use serde::Deserialize;

use crate::core_modules::frame::Frame;
use crate::error::TrackingError;

/// A per-pixel classification of one frame.
///
/// Values are `0` (background), `255` (foreground) and, straight out of a
/// classifier with shadow detection, an intermediate shadow level.
#[derive(Debug, Clone, PartialEq)]
pub struct ForegroundMask(GrayImage);

impl ForegroundMask {
    pub const BACKGROUND: u8 = 0;
    pub const FOREGROUND: u8 = 255;

    /// An all-background mask.
    pub fn new(width: u32, height: u32) -> Self {
        Self(GrayImage::new(width, height))
    }

    pub fn from_image(image: GrayImage) -> Self {
        Self(image)
    }

    pub fn as_image(&self) -> &GrayImage {
        &self.0
    }

    pub fn into_image(self) -> GrayImage {
        self.0
    }

    pub fn width(&self) -> u32 {
        self.0.width()
    }

    pub fn height(&self) -> u32 {
        self.0.height()
    }

    /// Number of pixels at full foreground level.
    pub fn foreground_count(&self) -> usize {
        self.0
            .pixels()
            .filter(|p| p.0[0] == Self::FOREGROUND)
            .count()
    }
}

/// Classifies the pixels of incoming frames against a learned scene model.
pub trait BackgroundModel {
    /// Classifies `frame` and folds it into the model.
    fn observe(&mut self, frame: &Frame) -> ForegroundMask;
}

/// Tuning constants of the KNN background model.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct KnnConfig {
    /// Average number of frames a background sample survives.
    pub history: u32,
    /// Size of the per-pixel sample bank.
    pub samples_per_pixel: usize,
    /// Close samples needed for a background vote.
    pub knn: usize,
    /// Squared RGB distance under which a sample counts as close.
    pub dist2_threshold: f32,
    pub detect_shadows: bool,
    /// Mask level written for shadow pixels.
    pub shadow_value: u8,
    /// Lowest brightness ratio (pixel / background) still called a shadow.
    pub shadow_tau: f32,
}

impl Default for KnnConfig {
    fn default() -> Self {
        Self {
            history: 500,
            samples_per_pixel: 7,
            knn: 2,
            dist2_threshold: 400.0,
            detect_shadows: true,
            shadow_value: 127,
            shadow_tau: 0.5,
        }
    }
}

impl KnnConfig {
    pub fn validate(&self) -> Result<(), TrackingError> {
        if self.samples_per_pixel == 0 {
            return Err(TrackingError::Config(
                "knn.samples_per_pixel must be greater than zero".into(),
            ));
        }
        if self.knn == 0 || self.knn > self.samples_per_pixel {
            return Err(TrackingError::Config(format!(
                "knn.knn must be in 1..={}, got {}",
                self.samples_per_pixel, self.knn
            )));
        }
        if self.history == 0 {
            return Err(TrackingError::Config(
                "knn.history must be greater than zero".into(),
            ));
        }
        if !(self.dist2_threshold > 0.0) {
            return Err(TrackingError::Config(
                "knn.dist2_threshold must be positive".into(),
            ));
        }
        if !(self.shadow_tau > 0.0 && self.shadow_tau < 1.0) {
            return Err(TrackingError::Config(
                "knn.shadow_tau must lie strictly between 0 and 1".into(),
            ));
        }
        if self.shadow_value == ForegroundMask::FOREGROUND {
            return Err(TrackingError::Config(
                "knn.shadow_value must differ from the foreground level".into(),
            ));
        }
        Ok(())
    }
}

/// K-nearest-neighbours background subtractor with shadow detection.
pub struct KnnBackgroundModel {
    config: KnnConfig,
    width: u32,
    height: u32,
    /// Pixel-major sample bank: pixel `i` owns `samples[i * n..(i + 1) * n]`.
    samples: Vec<[u8; 3]>,
    /// Slots filled so far (identical for every pixel).
    filled: usize,
    /// Next slot to overwrite once the bank is full.
    cursor: usize,
    frames_seen: u64,
    update_period: u64,
}

impl KnnBackgroundModel {
    /// Fails with [`TrackingError::Config`] when `config` cannot vote.
    pub fn new(width: u32, height: u32, config: KnnConfig) -> Result<Self, TrackingError> {
        config.validate()?;
        let update_period = (config.history as u64 / config.samples_per_pixel as u64).max(1);
        let mut model = Self {
            config,
            width: 0,
            height: 0,
            samples: Vec::new(),
            filled: 0,
            cursor: 0,
            frames_seen: 0,
            update_period,
        };
        model.rebuild(width, height);
        Ok(model)
    }

    pub fn config(&self) -> &KnnConfig {
        &self.config
    }

    /// `true` while the model does not yet hold enough samples to vote.
    pub fn is_warming_up(&self) -> bool {
        self.filled < self.config.knn
    }

    pub fn frames_seen(&self) -> u64 {
        self.frames_seen
    }

    fn rebuild(&mut self, width: u32, height: u32) {
        let pixel_count = (width as usize) * (height as usize);
        self.width = width;
        self.height = height;
        self.samples = vec![[0; 3]; pixel_count * self.config.samples_per_pixel];
        self.filled = 0;
        self.cursor = 0;
    }

    fn classify(&self, image: &RgbImage) -> GrayImage {
        let n = self.config.samples_per_pixel;
        let mut mask = GrayImage::new(self.width, self.height);
        for (i, (out, pixel)) in mask.pixels_mut().zip(image.pixels()).enumerate() {
            let bank = &self.samples[i * n..i * n + self.filled];
            *out = Luma([self.classify_pixel(pixel.0, bank)]);
        }
        mask
    }

    fn classify_pixel(&self, pixel: [u8; 3], bank: &[[u8; 3]]) -> u8 {
        let mut close = 0;
        let mut shadows = 0;
        for sample in bank {
            if squared_distance(pixel, *sample) < self.config.dist2_threshold {
                close += 1;
                if close >= self.config.knn {
                    return ForegroundMask::BACKGROUND;
                }
            } else if self.config.detect_shadows && self.is_shadow(pixel, *sample) {
                shadows += 1;
            }
        }
        if shadows >= self.config.knn {
            self.config.shadow_value
        } else {
            ForegroundMask::FOREGROUND
        }
    }

    /// A shadow keeps the chromaticity of the background but scales its
    /// brightness by a factor in `[shadow_tau, 1]`.
    fn is_shadow(&self, pixel: [u8; 3], sample: [u8; 3]) -> bool {
        let p = pixel.map(f32::from);
        let b = sample.map(f32::from);
        let bb = b[0] * b[0] + b[1] * b[1] + b[2] * b[2];
        if bb <= 0.0 {
            return false;
        }
        let a = (p[0] * b[0] + p[1] * b[1] + p[2] * b[2]) / bb;
        if a < self.config.shadow_tau || a > 1.0 {
            return false;
        }
        let residual: f32 = (0..3).map(|c| (p[c] - a * b[c]).powi(2)).sum();
        residual < self.config.dist2_threshold * a * a
    }

    fn learn(&mut self, image: &RgbImage) {
        let n = self.config.samples_per_pixel;
        let slot = if self.filled < n {
            let slot = self.filled;
            self.filled += 1;
            slot
        } else {
            if self.frames_seen % self.update_period != 0 {
                return;
            }
            let slot = self.cursor;
            self.cursor = (self.cursor + 1) % n;
            slot
        };
        for (i, pixel) in image.pixels().enumerate() {
            self.samples[i * n + slot] = pixel.0;
        }
    }
}

impl BackgroundModel for KnnBackgroundModel {
    fn observe(&mut self, frame: &Frame) -> ForegroundMask {
        let image = frame.image();
        if image.dimensions() != (self.width, self.height) {
            log::warn!(
                "background model resized from {}x{} to {}x{}; warming up again",
                self.width,
                self.height,
                image.width(),
                image.height()
            );
            self.rebuild(image.width(), image.height());
        }
        self.frames_seen += 1;

        let mask = if self.is_warming_up() {
            ForegroundMask::new(self.width, self.height)
        } else {
            ForegroundMask(self.classify(image))
        };
        self.learn(image);
        mask
    }
}

fn squared_distance(a: [u8; 3], b: [u8; 3]) -> f32 {
    (0..3)
        .map(|c| {
            let d = f32::from(a[c]) - f32::from(b[c]);
            d * d
        })
        .sum()
}

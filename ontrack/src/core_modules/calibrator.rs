// THEORY:
// The calibrator converts pixel space into the physical unit the user measured
// the animal in. It needs no camera model: the animal itself is the ruler. The
// larger side of the blob's bounding box is assumed to span the animal's known
// larger dimension, which yields a pixels-per-unit scale for this frame alone.
//
// The scale is recomputed every frame and never smoothed. When the box is square
// there is no "larger side" to match, so the frame has no defined scale and is
// skipped rather than guessed.

use crate::core_modules::blob_extractor::{Blob, Point};
use crate::error::TrackingError;

/// Pixels per physical unit for one frame.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CalibrationScale(f64);

impl CalibrationScale {
    pub fn pixels_per_unit(&self) -> f64 {
        self.0
    }

    pub fn to_units(&self, pixels: f64) -> f64 {
        pixels / self.0
    }
}

/// The blob centroid in both pixel and physical coordinates.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CalibratedPosition {
    pub scale: CalibrationScale,
    /// Centre pixel of the bounding box.
    pub centroid: Point,
    pub x: f64,
    pub y: f64,
}

/// Computes this frame's scale and the blob centroid in physical units.
///
/// Returns `None` for a square bounding box, where the scale is undefined.
pub fn calibrate(blob: &Blob, known_larger_dim: f64) -> Option<CalibratedPosition> {
    if blob.is_square() {
        return None;
    }
    let scale = CalibrationScale(blob.larger_dimension() as f64 / known_larger_dim);
    let centroid = Point {
        x: blob.x + blob.width / 2,
        y: blob.y + blob.height / 2,
    };
    Some(CalibratedPosition {
        scale,
        centroid,
        x: scale.to_units(centroid.x as f64),
        y: scale.to_units(centroid.y as f64),
    })
}

/// The animal's measured size, as seen from the camera.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ObjectDimensions {
    pub larger: f64,
    /// Carried for reporting only; calibration uses the larger side.
    pub smaller: f64,
}

/// Per-session calibration against a fixed object size.
#[derive(Debug, Clone)]
pub struct Calibrator {
    dimensions: ObjectDimensions,
}

impl Calibrator {
    pub fn new(dimensions: ObjectDimensions) -> Result<Self, TrackingError> {
        if !dimensions.larger.is_finite() || dimensions.larger <= 0.0 {
            return Err(TrackingError::InvalidCalibration(format!(
                "the object's larger dimension must be a positive number, got {}",
                dimensions.larger
            )));
        }
        if dimensions.smaller > dimensions.larger {
            log::warn!(
                "smaller dimension {} exceeds larger dimension {}; only the larger one is used",
                dimensions.smaller,
                dimensions.larger
            );
        }
        Ok(Self { dimensions })
    }

    pub fn dimensions(&self) -> ObjectDimensions {
        self.dimensions
    }

    pub fn calibrate(&self, blob: &Blob) -> Option<CalibratedPosition> {
        calibrate(blob, self.dimensions.larger)
    }
}

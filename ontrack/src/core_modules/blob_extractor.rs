// THEORY:
// The `BlobExtractor` is the engine of the Spatial Grouping Layer. It takes the
// raw, noisy foreground mask produced by the background model and reduces it to
// the single region that most plausibly is the tracked animal.
//
// Key architectural principles & algorithm steps:
// 1.  **Denoising**: The raw mask is fragmented (an animal's body rarely differs
//     from the floor everywhere) and speckled (sensor noise). A morphological
//     closing with a large square fuses nearby fragments and fills holes, a
//     median filter removes salt-and-pepper speckle, and a hard threshold forces
//     the result back to a strict binary mask, discarding shadow levels.
// 2.  **Region Growing**: Every foreground pixel not yet visited seeds a
//     flood-fill over its 8-connected neighbours. Seeds are taken in row-major
//     scan order, so the component list has a stable, deterministic order.
// 3.  **Data Aggregation**: Each grown region is summarised as a `Blob`: its
//     bounding box and its area in pixels.
// 4.  **Selection**: The blob with the largest area wins. On equal areas the
//     blob found first in scan order is kept.
// 5.  **Stateless Utility**: Nothing is remembered between frames. The denoiser
//     is a pluggable capability so that a different cleanup strategy can be
//     swapped in without touching the selection logic.

use imageproc::contrast::{ThresholdType, threshold};
use imageproc::filter::median_filter;
use imageproc::morphology::{Mask, grayscale_close};
use serde::Deserialize;

use crate::core_modules::background_model::ForegroundMask;
use crate::error::TrackingError;

/// A 2D pixel coordinate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Point {
    pub x: u32,
    pub y: u32,
}

/// The bounding box of one connected foreground region.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Blob {
    /// Left edge, in pixels.
    pub x: u32,
    /// Top edge, in pixels.
    pub y: u32,
    pub width: u32,
    pub height: u32,
    /// Number of foreground pixels in the region (not the box area).
    pub area: u32,
}

impl Blob {
    pub fn larger_dimension(&self) -> u32 {
        self.width.max(self.height)
    }

    /// A square box has no larger side to calibrate against.
    pub fn is_square(&self) -> bool {
        self.width == self.height
    }

    /// Last pixel covered by the box (inclusive).
    pub fn bottom_right(&self) -> Point {
        Point {
            x: self.x + self.width - 1,
            y: self.y + self.height - 1,
        }
    }
}

/// Cleans a raw foreground mask into a strict binary mask.
pub trait MaskDenoiser {
    fn denoise(&self, mask: ForegroundMask) -> ForegroundMask;
}

/// Kernel sizes and cut level of the morphological cleanup.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct DenoiseConfig {
    /// Side of the square closing element. Even sizes round up to the next odd size.
    pub close_kernel: u32,
    /// Side of the square median window. Even sizes round up to the next odd size.
    pub median_kernel: u32,
    /// Pixels strictly above this level become foreground.
    pub threshold: u8,
}

impl Default for DenoiseConfig {
    fn default() -> Self {
        Self {
            close_kernel: 30,
            median_kernel: 5,
            threshold: 127,
        }
    }
}

impl DenoiseConfig {
    pub fn validate(&self) -> Result<(), TrackingError> {
        if self.close_kernel / 2 > u8::MAX as u32 {
            return Err(TrackingError::Config(format!(
                "denoise.close_kernel must be at most {}, got {}",
                2 * u8::MAX as u32 + 1,
                self.close_kernel
            )));
        }
        Ok(())
    }
}

/// Closing, then median filtering, then binarisation.
pub struct MorphologicalDenoiser {
    config: DenoiseConfig,
}

impl MorphologicalDenoiser {
    pub fn new(config: DenoiseConfig) -> Self {
        Self { config }
    }
}

impl MaskDenoiser for MorphologicalDenoiser {
    fn denoise(&self, mask: ForegroundMask) -> ForegroundMask {
        let mut image = mask.into_image();

        // --- 1. Closing ---
        // Max then min over a (2k + 1) x (2k + 1) square. Grey levels survive,
        // so shadows are still below the cut at step 3.
        let close_radius = (self.config.close_kernel / 2).min(u8::MAX as u32) as u8;
        if close_radius > 0 {
            image = grayscale_close(&image, &Mask::square(close_radius));
        }

        // --- 2. Median ---
        let median_radius = self.config.median_kernel / 2;
        if median_radius > 0 {
            image = median_filter(&image, median_radius, median_radius);
        }

        // --- 3. Binarisation ---
        image = threshold(&image, self.config.threshold, ThresholdType::Binary);

        ForegroundMask::from_image(image)
    }
}

/// Turns a raw foreground mask into at most one blob per frame.
pub struct BlobExtractor {
    denoiser: Box<dyn MaskDenoiser>,
}

impl BlobExtractor {
    pub fn new(denoiser: Box<dyn MaskDenoiser>) -> Self {
        Self { denoiser }
    }

    pub fn with_config(config: DenoiseConfig) -> Self {
        Self::new(Box::new(MorphologicalDenoiser::new(config)))
    }

    /// Denoises `mask` and returns its largest connected region, if any.
    pub fn extract(&self, mask: ForegroundMask) -> Option<Blob> {
        let clean = self.denoiser.denoise(mask);
        largest_component(&clean)
    }
}

/// The largest 8-connected region of non-zero pixels.
///
/// Ties go to the region whose first pixel comes first in row-major order.
pub fn largest_component(mask: &ForegroundMask) -> Option<Blob> {
    let mut best: Option<Blob> = None;
    for blob in find_components(mask) {
        match best {
            Some(current) if current.area >= blob.area => {}
            _ => best = Some(blob),
        }
    }
    best
}

/// Every 8-connected region of non-zero pixels, in row-major order of their
/// first pixel.
pub fn find_components(mask: &ForegroundMask) -> Vec<Blob> {
    let image = mask.as_image();
    let (width, height) = image.dimensions();
    let is_foreground = |x: u32, y: u32| image.get_pixel(x, y).0[0] != ForegroundMask::BACKGROUND;

    let mut visited = vec![false; (width as usize) * (height as usize)];
    let mut blobs = Vec::new();

    for y in 0..height {
        for x in 0..width {
            let index = (y * width + x) as usize;
            if visited[index] || !is_foreground(x, y) {
                continue;
            }
            visited[index] = true;
            blobs.push(grow_component(
                Point { x, y },
                &is_foreground,
                &mut visited,
                width,
                height,
            ));
        }
    }

    blobs
}

/// Flood-fills one region starting from `seed`, which must already be marked visited.
fn grow_component(
    seed: Point,
    is_foreground: &impl Fn(u32, u32) -> bool,
    visited: &mut [bool],
    width: u32,
    height: u32,
) -> Blob {
    let mut stack = vec![seed];
    let mut min_x = seed.x;
    let mut min_y = seed.y;
    let mut max_x = seed.x;
    let mut max_y = seed.y;
    let mut area = 0u32;

    while let Some(current) = stack.pop() {
        area += 1;
        min_x = min_x.min(current.x);
        min_y = min_y.min(current.y);
        max_x = max_x.max(current.x);
        max_y = max_y.max(current.y);

        for dy in -1i64..=1 {
            for dx in -1i64..=1 {
                if dx == 0 && dy == 0 {
                    continue;
                }
                let nx = current.x as i64 + dx;
                let ny = current.y as i64 + dy;
                if nx < 0 || ny < 0 || nx >= width as i64 || ny >= height as i64 {
                    continue;
                }
                let (nx, ny) = (nx as u32, ny as u32);
                let index = (ny * width + nx) as usize;
                if !visited[index] && is_foreground(nx, ny) {
                    visited[index] = true;
                    stack.push(Point { x: nx, y: ny });
                }
            }
        }
    }

    Blob {
        x: min_x,
        y: min_y,
        width: max_x - min_x + 1,
        height: max_y - min_y + 1,
        area,
    }
}

// THEORY:
// The metrics module is the analysis layer. It runs after a session has ended and
// reads nothing but a finished `Trajectory`.
//
// Key architectural principles:
// 1.  **Stateless Queries**: Every metric is a pure function of a trajectory (and,
//     for dwell time, a region). They can be called in any order, repeatedly, or
//     from several threads at once.
// 2.  **Path Length, Not Net Displacement**: "Displacement" here is the distance
//     the animal actually travelled: the sum of every step between consecutive
//     samples.
// 3.  **Destination Attribution**: The time between two consecutive samples is
//     credited to the *later* sample's position. The first sample therefore
//     never contributes time.
// 4.  **Order-Normalised Regions**: A region is the closed rectangle spanned by
//     two opposite corners, whichever corners the user names first.

use std::str::FromStr;

use crate::core_modules::trajectory::TrajectorySample;
use crate::error::MetricsError;

/// A closed, axis-aligned rectangle in trajectory coordinates.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Region {
    min_x: f64,
    min_y: f64,
    max_x: f64,
    max_y: f64,
}

impl Region {
    /// The rectangle spanned by two opposite corners, in any order.
    pub fn new(x1: f64, y1: f64, x2: f64, y2: f64) -> Result<Self, MetricsError> {
        if ![x1, y1, x2, y2].iter().all(|v| v.is_finite()) {
            return Err(MetricsError::InvalidRegion(format!(
                "corners must be finite numbers, got ({x1}, {y1}) and ({x2}, {y2})"
            )));
        }
        Ok(Self {
            min_x: x1.min(x2),
            min_y: y1.min(y2),
            max_x: x1.max(x2),
            max_y: y1.max(y2),
        })
    }

    /// Boundary points are inside.
    pub fn contains(&self, x: f64, y: f64) -> bool {
        x >= self.min_x && x <= self.max_x && y >= self.min_y && y <= self.max_y
    }

    pub fn min_corner(&self) -> (f64, f64) {
        (self.min_x, self.min_y)
    }

    pub fn max_corner(&self) -> (f64, f64) {
        (self.max_x, self.max_y)
    }
}

/// Parses `x1,x2,y1,y2`, the order in which region corners are entered.
impl FromStr for Region {
    type Err = MetricsError;

    fn from_str(text: &str) -> Result<Self, Self::Err> {
        let values = text
            .split(',')
            .map(|field| field.trim().parse::<f64>())
            .collect::<Result<Vec<f64>, _>>()
            .map_err(|e| MetricsError::InvalidRegion(format!("{text:?}: {e}")))?;
        let [x1, x2, y1, y2] = values.as_slice() else {
            return Err(MetricsError::InvalidRegion(format!(
                "{text:?}: expected four values x1,x2,y1,y2"
            )));
        };
        Region::new(*x1, *y1, *x2, *y2)
    }
}

pub mod metrics {
    use super::*; // Region and the sample type.
    use crate::core_modules::trajectory::Trajectory;

    /// Total path length: the sum of the distances between consecutive samples.
    pub fn displacement(trajectory: &Trajectory) -> f64 {
        trajectory
            .samples()
            .windows(2)
            .map(|pair| pair[0].distance_to(&pair[1]))
            .sum()
    }

    /// Seconds credited to samples inside `region` (boundary included).
    pub fn time_inside_region(trajectory: &Trajectory, region: &Region) -> f64 {
        dwell_time(trajectory, |sample| region.contains(sample.x, sample.y))
    }

    /// Seconds credited to samples strictly outside `region`.
    pub fn time_outside_region(trajectory: &Trajectory, region: &Region) -> f64 {
        dwell_time(trajectory, |sample| !region.contains(sample.x, sample.y))
    }

    fn dwell_time(trajectory: &Trajectory, counts: impl Fn(&TrajectorySample) -> bool) -> f64 {
        trajectory
            .samples()
            .windows(2)
            .filter(|pair| counts(&pair[1]))
            .map(|pair| pair[1].timestamp - pair[0].timestamp)
            .sum()
    }
}

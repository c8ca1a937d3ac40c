//! # Path
//!
//! This module defines the reference path tracked by the controller. A path is an ordered
//! sequence of waypoints, each joined to the next by a straight segment, so the order of the
//! waypoints defines the direction of travel.

// ---------------------------------------------------------------------------
// IMPORTS
// ---------------------------------------------------------------------------

use nalgebra::Vector2;
use serde::{Deserialize, Serialize};
use util::maths::dist_to_segment;

// ---------------------------------------------------------------------------
// DATA STRUCTURES
// ---------------------------------------------------------------------------

/// A path defining the desired trajectory of the vehicle.
#[derive(Clone, Serialize, Deserialize, Debug, PartialEq, Default)]
pub struct Path {
    pub waypoints: Vec<Waypoint>,
}

/// A single point on a path.
#[derive(Clone, Copy, Serialize, Deserialize, Debug, PartialEq)]
pub struct Waypoint {
    /// Position of the waypoint
    pub position_m: Vector2<f64>,

    /// Desired heading at the waypoint, if the path source provides one
    pub heading_rad: Option<f64>,
}

/// Axis aligned bounding box of a path.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct PathBounds {
    pub min_m: Vector2<f64>,
    pub max_m: Vector2<f64>,
}

// -----------------------------------------------------------------------------------------------
// ENUMS
// -----------------------------------------------------------------------------------------------

/// Reasons a path cannot be tracked.
#[derive(Debug, Clone, Copy, PartialEq, thiserror::Error)]
pub enum PathError {
    #[error("The path contains no waypoints")]
    Empty,

    #[error("The path contains a single waypoint")]
    SinglePoint,

    #[error("All waypoints of the path are coincident, so the path has zero length")]
    ZeroLength,

    #[error("Waypoint {0} of the path is not finite")]
    NonFinite(usize),

    #[error("Cannot build a direct path with a point separation of {0} m")]
    InvalidSeparation(f64),
}

// ---------------------------------------------------------------------------
// IMPLEMENTATIONS
// ---------------------------------------------------------------------------

impl Waypoint {
    pub fn new(x_m: f64, y_m: f64) -> Self {
        Self {
            position_m: Vector2::new(x_m, y_m),
            heading_rad: None,
        }
    }
}

impl Path {
    /// Create a new empty path
    pub fn new_empty() -> Self {
        Self {
            waypoints: Vec::new(),
        }
    }

    /// Create a path through the given points, without headings.
    pub fn from_points<I>(points: I) -> Self
    where
        I: IntoIterator<Item = (f64, f64)>,
    {
        Self {
            waypoints: points
                .into_iter()
                .map(|(x, y)| Waypoint::new(x, y))
                .collect(),
        }
    }

    /// Produces a direct path between the two position vectors, with each point in the path having
    /// at most the given separation. Every waypoint carries the heading of the line.
    pub fn direct(
        from: Vector2<f64>,
        to: Vector2<f64>,
        point_sep_m: f64,
    ) -> Result<Self, PathError> {
        if !(point_sep_m > 0.0) || !point_sep_m.is_finite() {
            return Err(PathError::InvalidSeparation(point_sep_m));
        }

        let diff_vec = to - from;
        let dist = diff_vec.norm();
        let heading = Some(diff_vec.y.atan2(diff_vec.x));

        // Number of segments needed so that none is longer than the separation
        let num_segments = ((dist / point_sep_m).ceil() as usize).max(1);
        let delta = diff_vec / num_segments as f64;

        let waypoints = (0..=num_segments)
            .map(|i| Waypoint {
                position_m: from + delta * i as f64,
                heading_rad: heading,
            })
            .collect();

        Ok(Self { waypoints })
    }

    /// Get the number of waypoints in the path
    pub fn len(&self) -> usize {
        self.waypoints.len()
    }

    pub fn is_empty(&self) -> bool {
        self.waypoints.is_empty()
    }

    /// Iterate over the segments of the path as `(start, end)` pairs.
    pub fn segments(&self) -> impl Iterator<Item = (Vector2<f64>, Vector2<f64>)> + '_ {
        self.waypoints
            .windows(2)
            .map(|w| (w[0].position_m, w[1].position_m))
    }

    /// Return the length of the path in meters, the sum of all segment lengths.
    pub fn length_m(&self) -> f64 {
        self.segments().map(|(s, e)| (e - s).norm()).sum()
    }

    /// Shortest distance from the point to the path, treating the path as a connected polyline.
    ///
    /// A single waypoint path is treated as a point. Returns `None` for an empty path.
    pub fn distance_to(&self, point: &Vector2<f64>) -> Option<f64> {
        match self.waypoints.len() {
            0 => None,
            1 => Some((self.waypoints[0].position_m - point).norm()),
            _ => self
                .segments()
                .map(|(s, e)| dist_to_segment([point.x, point.y], [s.x, s.y], [e.x, e.y]))
                .fold(None, |min: Option<f64>, d| {
                    Some(min.map_or(d, |m| m.min(d)))
                }),
        }
    }

    /// Bounding box of all waypoints, or `None` for an empty path.
    pub fn bounds(&self) -> Option<PathBounds> {
        let first = self.waypoints.first()?.position_m;

        Some(
            self.waypoints
                .iter()
                .fold(PathBounds { min_m: first, max_m: first }, |b, w| PathBounds {
                    min_m: b.min_m.inf(&w.position_m),
                    max_m: b.max_m.sup(&w.position_m),
                }),
        )
    }

    /// Check the path can be tracked.
    ///
    /// A trackable path has at least two finite waypoints and a non-zero length.
    pub fn validate(&self) -> Result<(), PathError> {
        match self.waypoints.len() {
            0 => return Err(PathError::Empty),
            1 => return Err(PathError::SinglePoint),
            _ => (),
        }

        if let Some(i) = self.first_non_finite() {
            return Err(PathError::NonFinite(i));
        }

        if self.length_m() <= 0.0 {
            return Err(PathError::ZeroLength);
        }

        Ok(())
    }

    fn first_non_finite(&self) -> Option<usize> {
        self.waypoints.iter().position(|w| {
            !w.position_m.iter().all(|v| v.is_finite())
                || w.heading_rad.map_or(false, |h| !h.is_finite())
        })
    }
}

impl PathBounds {
    pub fn centre_m(&self) -> Vector2<f64> {
        0.5 * (self.min_m + self.max_m)
    }
}

// ------------------------------------------------------------------------------------------------
// TESTS
// ------------------------------------------------------------------------------------------------

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_direct() -> Result<(), PathError> {
        let path = Path::direct(Vector2::new(0.0, 0.0), Vector2::new(1.0, 0.0), 0.3)?;

        // ceil(1.0 / 0.3) = 4 segments
        assert_eq!(path.len(), 5);
        assert_eq!(path.waypoints[0].position_m, Vector2::new(0.0, 0.0));
        assert!((path.waypoints[4].position_m - Vector2::new(1.0, 0.0)).norm() < 1e-12);
        assert!(path.waypoints.iter().all(|w| w.heading_rad == Some(0.0)));
        assert!((path.length_m() - 1.0).abs() < 1e-12);

        assert_eq!(
            Path::direct(Vector2::zeros(), Vector2::new(1.0, 0.0), 0.0),
            Err(PathError::InvalidSeparation(0.0))
        );

        Ok(())
    }

    #[test]
    fn test_distance_to_polyline() {
        // L shaped path
        let path = Path::from_points(vec![(0.0, 0.0), (4.0, 0.0), (4.0, 4.0)]);

        // Closest to the middle of the first segment, not to a vertex
        assert_eq!(path.distance_to(&Vector2::new(2.0, -1.5)), Some(1.5));

        // Closest to the second segment
        assert_eq!(path.distance_to(&Vector2::new(5.0, 2.0)), Some(1.0));

        // On the path
        assert_eq!(path.distance_to(&Vector2::new(4.0, 1.0)), Some(0.0));

        assert_eq!(Path::new_empty().distance_to(&Vector2::zeros()), None);
        assert_eq!(
            Path::from_points(vec![(3.0, 0.0)]).distance_to(&Vector2::new(0.0, 4.0)),
            Some(5.0)
        );
    }

    #[test]
    fn test_self_overlapping_distance() {
        // Path that doubles back over itself
        let path = Path::from_points(vec![(0.0, 0.0), (5.0, 0.0), (5.0, 1.0), (0.0, -1.0)]);

        let d = path.distance_to(&Vector2::new(2.5, 0.0));
        assert_eq!(d, Some(0.0));
    }

    #[test]
    fn test_validate() {
        assert_eq!(Path::new_empty().validate(), Err(PathError::Empty));
        assert_eq!(
            Path::from_points(vec![(1.0, 1.0)]).validate(),
            Err(PathError::SinglePoint)
        );
        assert_eq!(
            Path::from_points(vec![(1.0, 1.0), (1.0, 1.0)]).validate(),
            Err(PathError::ZeroLength)
        );
        assert_eq!(
            Path::from_points(vec![(0.0, 0.0), (std::f64::NAN, 1.0)]).validate(),
            Err(PathError::NonFinite(1))
        );
        assert_eq!(
            Path::from_points(vec![(0.0, 0.0), (10.0, 0.0)]).validate(),
            Ok(())
        );
    }

    #[test]
    fn test_bounds() {
        let path = Path::from_points(vec![(1.0, -2.0), (4.0, 3.0), (-1.0, 0.5)]);
        let bounds = path.bounds().unwrap();

        assert_eq!(bounds.min_m, Vector2::new(-1.0, -2.0));
        assert_eq!(bounds.max_m, Vector2::new(4.0, 3.0));
        assert_eq!(bounds.centre_m(), Vector2::new(1.5, 0.5));
        assert!(Path::new_empty().bounds().is_none());
    }
}

//! # Cost Field
//!
//! The cost field is a dense grid covering a bounded region around the reference path. The value
//! of each cell is the distance from the cell centre to the path (treated as a connected polyline),
//! so the cost is zero on the path and grows with any deviation from it.
//!
//! ```text
//!  origin_m + (num_cells * resolution)
//!         ┌───┬───┬───┬───┐ ◄─┘
//!         │2.1│1.4│1.0│1.0│
//!         ├───┼───┼───┼───┤
//!  ───────┼───┼───┼───┼───┼──►  PATH
//!         ├───┼───┼───┼───┤
//!         │1.4│1.0│1.0│1.0│
//!         └───┴───┴───┴───┘
//!     origin_m
//! ```
//!
//! [`CostField::build`] centres the field on the centre of the path's bounding box.
//! [`CostField::build_centred`] places it anywhere, which lets the controller keep the vehicle
//! inside the field when the path is longer than the extent. Cell values are always distances to
//! the whole path, including any part of it lying outside the field.
//!
//! Queries are bilinearly interpolated between cell centres, so a query exactly on the path is not
//! exactly zero. Along a straight segment the error is at most half a cell, and close to a vertex
//! it stays below one cell. Queries outside the extent return the field's maximum cost, which is
//! finite, so any trajectory can be scored.

// ------------------------------------------------------------------------------------------------
// INCLUDES
// ------------------------------------------------------------------------------------------------

use log::debug;
use nalgebra::Vector2;
use ndarray::Array2;
use serde::{Deserialize, Serialize};

use crate::path::{Path, PathError};

// ------------------------------------------------------------------------------------------------
// STRUCTS
// ------------------------------------------------------------------------------------------------

/// Extent and resolution of a [`CostField`].
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct CostFieldParams {
    /// Size of the field along the X axis.
    ///
    /// Units: meters
    pub width_m: f64,

    /// Size of the field along the Y axis.
    ///
    /// Units: meters
    pub height_m: f64,

    /// Side length of each square cell.
    ///
    /// Units: meters
    pub resolution_m: f64,
}

/// A grid of distances to the reference path.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CostField {
    params: CostFieldParams,

    /// Position of the lower-left corner of cell (0, 0)
    origin_m: Vector2<f64>,

    /// Cost of each cell, indexed by [x cell, y cell]
    data: Array2<f64>,

    /// Cost returned for queries outside the field
    max_cost: f64,
}

/// One cell of the field, used for diagnostics.
#[derive(Debug, Clone, Copy, Serialize)]
pub struct FieldSample {
    pub x_m: f64,
    pub y_m: f64,
    pub cost: f64,
}

// ------------------------------------------------------------------------------------------------
// ENUMS
// ------------------------------------------------------------------------------------------------

/// Errors that can arise when building a cost field.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum CostFieldError {
    #[error("Cannot build a cost field from an invalid path: {0}")]
    InvalidPath(PathError),

    #[error("Invalid cost field extent {0:?}")]
    InvalidParams(CostFieldParams),

    #[error("Cost field centre {0:?} is not finite")]
    InvalidCentre(Vector2<f64>),
}

// ------------------------------------------------------------------------------------------------
// IMPLS
// ------------------------------------------------------------------------------------------------

impl CostFieldParams {
    /// Number of cells along each axis, at least one.
    pub fn num_cells(&self) -> (usize, usize) {
        (
            ((self.width_m / self.resolution_m).ceil() as usize).max(1),
            ((self.height_m / self.resolution_m).ceil() as usize).max(1),
        )
    }

    fn is_valid(&self) -> bool {
        [self.width_m, self.height_m, self.resolution_m]
            .iter()
            .all(|v| v.is_finite() && *v > 0.0)
    }
}

impl CostField {
    /// Build the cost field for the given path, centred on the path.
    ///
    /// Every cell is assigned the distance from its centre to the nearest segment of the path.
    pub fn build(params: CostFieldParams, path: &Path) -> Result<Self, CostFieldError> {
        path.validate().map_err(CostFieldError::InvalidPath)?;

        let bounds = path
            .bounds()
            .ok_or(CostFieldError::InvalidPath(PathError::Empty))?;

        Self::build_centred(params, path, bounds.centre_m())
    }

    /// Build the cost field for the given path with the field centred on `centre_m`.
    pub fn build_centred(
        params: CostFieldParams,
        path: &Path,
        centre_m: Vector2<f64>,
    ) -> Result<Self, CostFieldError> {
        if !params.is_valid() {
            return Err(CostFieldError::InvalidParams(params));
        }

        path.validate().map_err(CostFieldError::InvalidPath)?;

        if !centre_m.iter().all(|v| v.is_finite()) {
            return Err(CostFieldError::InvalidCentre(centre_m));
        }

        let (num_x, num_y) = params.num_cells();
        let size_m = Vector2::new(
            num_x as f64 * params.resolution_m,
            num_y as f64 * params.resolution_m,
        );
        let origin_m = centre_m - 0.5 * size_m;

        let mut field = Self {
            params,
            origin_m,
            data: Array2::zeros((num_x, num_y)),
            max_cost: 0.0,
        };

        let mut largest = 0f64;
        for ((ix, iy), cost) in field.data.indexed_iter_mut() {
            let centre = Vector2::new(
                origin_m.x + (ix as f64 + 0.5) * params.resolution_m,
                origin_m.y + (iy as f64 + 0.5) * params.resolution_m,
            );

            // Path is validated so distance_to always succeeds
            *cost = path.distance_to(&centre).unwrap_or(0.0);
            largest = largest.max(*cost);
        }

        field.max_cost = size_m.norm().max(largest);

        debug!(
            "Built {}x{} cost field at {:?} from path of {} waypoints, max cost {:.3}",
            num_x,
            num_y,
            [origin_m.x, origin_m.y],
            path.len(),
            field.max_cost
        );

        Ok(field)
    }

    /// Query the cost at the given point.
    ///
    /// Points inside the field are bilinearly interpolated between the four surrounding cell
    /// centres. Points outside the field return [`CostField::max_cost`].
    pub fn query(&self, point: &Vector2<f64>) -> f64 {
        if !self.contains(point) {
            return self.max_cost;
        }

        let (num_x, num_y) = self.data.dim();
        let (ix0, ix1, fx) = interp_axis(point.x - self.origin_m.x, self.params.resolution_m, num_x);
        let (iy0, iy1, fy) = interp_axis(point.y - self.origin_m.y, self.params.resolution_m, num_y);

        let bottom = self.data[[ix0, iy0]] * (1.0 - fx) + self.data[[ix1, iy0]] * fx;
        let top = self.data[[ix0, iy1]] * (1.0 - fx) + self.data[[ix1, iy1]] * fx;

        bottom * (1.0 - fy) + top * fy
    }

    /// Returns true if the point lies within the extent of the field.
    pub fn contains(&self, point: &Vector2<f64>) -> bool {
        let upper = self.upper_m();

        point.x >= self.origin_m.x
            && point.x <= upper.x
            && point.y >= self.origin_m.y
            && point.y <= upper.y
    }

    /// Returns true if the square of half-width `half_width_m` around `centre_m` lies entirely
    /// within the field.
    pub fn contains_region(&self, centre_m: &Vector2<f64>, half_width_m: f64) -> bool {
        let half = Vector2::new(half_width_m, half_width_m);

        self.contains(&(centre_m - half)) && self.contains(&(centre_m + half))
    }

    /// Add cost around obstacle points.
    ///
    /// Every cell whose centre lies within `radius_m` of an obstacle has `added_cost` added to it.
    /// Cell costs saturate at the field's maximum cost.
    pub fn inject_obstacles(&mut self, obstacles_m: &[Vector2<f64>], radius_m: f64, added_cost: f64) {
        let resolution_m = self.params.resolution_m;
        let origin_m = self.origin_m;
        let max_cost = self.max_cost;

        for ((ix, iy), cost) in self.data.indexed_iter_mut() {
            let centre = Vector2::new(
                origin_m.x + (ix as f64 + 0.5) * resolution_m,
                origin_m.y + (iy as f64 + 0.5) * resolution_m,
            );

            if obstacles_m.iter().any(|o| (o - centre).norm() <= radius_m) {
                *cost = (*cost + added_cost).min(max_cost);
            }
        }
    }

    /// Flatten the field into one sample per cell, positioned at the cell centre.
    pub fn samples(&self) -> Vec<FieldSample> {
        self.data
            .indexed_iter()
            .map(|((ix, iy), cost)| FieldSample {
                x_m: self.origin_m.x + (ix as f64 + 0.5) * self.params.resolution_m,
                y_m: self.origin_m.y + (iy as f64 + 0.5) * self.params.resolution_m,
                cost: *cost,
            })
            .collect()
    }

    /// The cost returned for any query outside the field.
    pub fn max_cost(&self) -> f64 {
        self.max_cost
    }

    /// Position of the lower-left corner of the field.
    pub fn origin_m(&self) -> Vector2<f64> {
        self.origin_m
    }

    /// Number of cells along each axis.
    pub fn num_cells(&self) -> (usize, usize) {
        self.data.dim()
    }

    /// Position of the upper-right corner of the field.
    fn upper_m(&self) -> Vector2<f64> {
        let (num_x, num_y) = self.data.dim();

        self.origin_m
            + Vector2::new(
                num_x as f64 * self.params.resolution_m,
                num_y as f64 * self.params.resolution_m,
            )
    }
}

// ------------------------------------------------------------------------------------------------
// FUNCTIONS
// ------------------------------------------------------------------------------------------------

/// Find the two cells to interpolate between along one axis and the weight of the upper one.
///
/// `offset_m` is measured from the lower edge of the field. Within half a cell of either edge
/// the edge cell is used on its own.
fn interp_axis(offset_m: f64, resolution_m: f64, num_cells: usize) -> (usize, usize, f64) {
    let last = num_cells - 1;
    let u = offset_m / resolution_m - 0.5;

    if u <= 0.0 {
        return (0, 0, 0.0);
    }

    let lower = u.floor() as usize;
    if lower >= last {
        return (last, last, 0.0);
    }

    (lower, lower + 1, u - lower as f64)
}

// ------------------------------------------------------------------------------------------------
// TESTS
// ------------------------------------------------------------------------------------------------

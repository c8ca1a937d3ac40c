//! Utility maths functions

// ---------------------------------------------------------------------------
// IMPORTS
// ---------------------------------------------------------------------------

use num_traits::Float;

/// Calculates the least nonnegative remainder of `lhs (mod rhs)`.
///
/// This function is taken from the std library as num is missing it.
pub fn rem_euclid<T>(lhs: T, rhs: T) -> T
where
    T: Float,
{
    let r = lhs % rhs;
    if r < T::zero() {
        r + rhs.abs()
    } else {
        r
    }
}

/// Wrap an angle into the range (-pi, pi].
pub fn wrap_to_pi<T>(angle: T) -> T
where
    T: Float,
{
    let pi = T::from(std::f64::consts::PI).unwrap_or_else(T::zero);
    let tau = pi + pi;

    let wrapped = rem_euclid(angle + pi, tau) - pi;

    // rem_euclid maps exactly pi onto -pi, keep the positive end of the range
    if wrapped == -pi {
        pi
    } else {
        wrapped
    }
}

/// Return the shortest distance between `point` and the segment `start`->`end`.
///
/// A segment whose ends coincide is treated as a single point.
pub fn dist_to_segment<T>(point: [T; 2], start: [T; 2], end: [T; 2]) -> T
where
    T: Float,
{
    let seg = [end[0] - start[0], end[1] - start[1]];
    let rel = [point[0] - start[0], point[1] - start[1]];

    let seg_len_sq = seg[0] * seg[0] + seg[1] * seg[1];

    // Projection of the point onto the segment, as a fraction of the segment length
    let t = if seg_len_sq > T::zero() {
        ((rel[0] * seg[0] + rel[1] * seg[1]) / seg_len_sq)
            .max(T::zero())
            .min(T::one())
    } else {
        T::zero()
    };

    let dx = rel[0] - t * seg[0];
    let dy = rel[1] - t * seg[1];

    dx.hypot(dy)
}

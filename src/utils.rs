//! Utility functions for numeric conversion and planar geometry.

pub mod safe_cast;

use crate::constants::EPSILON;
use nalgebra::Point2;

/// Arithmetic mean of a set of points
///
/// Returns the origin for an empty slice.
#[must_use]
#[allow(clippy::cast_precision_loss)] // Point counts are tiny
pub fn centroid(points: &[Point2<f64>]) -> Point2<f64> {
    if points.is_empty() {
        return Point2::origin();
    }
    let sum = points
        .iter()
        .fold(nalgebra::Vector2::zeros(), |acc, p| acc + p.coords);
    Point2::from(sum / points.len() as f64)
}

/// Twice the signed area of triangle `abc`
#[must_use]
pub fn signed_area2(a: &Point2<f64>, b: &Point2<f64>, c: &Point2<f64>) -> f64 {
    (b.x - a.x) * (c.y - a.y) - (b.y - a.y) * (c.x - a.x)
}

/// Whether any three of the given points lie on a common line
///
/// The tolerance is scaled by the squared extent of the point set so that the
/// check behaves the same for pixel and metre coordinates.
#[must_use]
pub fn any_three_collinear(points: &[Point2<f64>]) -> bool {
    let extent = points
        .iter()
        .flat_map(|p| points.iter().map(move |q| (p - q).norm_squared()))
        .fold(0.0_f64, f64::max);
    let tolerance = EPSILON.max(extent * 1e-9);

    let n = points.len();
    for i in 0..n {
        for j in (i + 1)..n {
            for k in (j + 1)..n {
                if signed_area2(&points[i], &points[j], &points[k]).abs() <= tolerance {
                    return true;
                }
            }
        }
    }
    false
}

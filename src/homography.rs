//! Planar perspective transform between camera pixels and the floor plane.
//!
//! The floor is described by four pixel-space corners picked once during
//! setup. Each frame size gets its own transform: the frame's corner points
//! are first translated so their centroid coincides with the floor
//! rectangle's centroid, then the 4-point homography from the shifted frame
//! corners onto the floor corners is solved exactly.

use crate::{
    constants::{EPSILON, FLOOR_CORNER_COUNT},
    tracker::FrameSize,
    utils::{any_three_collinear, centroid},
    Error, Result,
};
use log::{debug, info};
use nalgebra::{Matrix3, Point2, SMatrix, SVector, Vector3};
use serde::{Deserialize, Serialize};

/// Four ordered pixel-space corners of the floor region
///
/// Order is top-left, top-right, bottom-right, bottom-left. Serialized as a
/// plain array of four `[x, y]` pairs, which is also the on-disk artifact.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "[[f64; 2]; 4]", into = "[[f64; 2]; 4]")]
pub struct FloorRectangle {
    corners: [Point2<f64>; FLOOR_CORNER_COUNT],
}

impl FloorRectangle {
    /// Create a floor rectangle from four ordered corners
    ///
    /// # Errors
    ///
    /// Returns `DegenerateGeometry` if any coordinate is non-finite, corners
    /// are duplicated, or three corners are collinear.
    pub fn new(corners: [[f64; 2]; FLOOR_CORNER_COUNT]) -> Result<Self> {
        if corners.iter().flatten().any(|v| !v.is_finite()) {
            return Err(Error::DegenerateGeometry(
                "floor corners must be finite".to_string(),
            ));
        }

        let corners = corners.map(|[x, y]| Point2::new(x, y));
        if any_three_collinear(&corners) {
            return Err(Error::DegenerateGeometry(format!(
                "floor corners {:?} contain duplicated or collinear points",
                corners.map(|p| (p.x, p.y))
            )));
        }

        Ok(Self { corners })
    }

    /// Corners in top-left, top-right, bottom-right, bottom-left order
    #[must_use]
    pub const fn corners(&self) -> &[Point2<f64>; FLOOR_CORNER_COUNT] {
        &self.corners
    }

    /// Centroid of the four corners
    #[must_use]
    pub fn centroid(&self) -> Point2<f64> {
        centroid(&self.corners)
    }
}

impl TryFrom<[[f64; 2]; 4]> for FloorRectangle {
    type Error = Error;

    fn try_from(corners: [[f64; 2]; 4]) -> Result<Self> {
        Self::new(corners)
    }
}

impl From<FloorRectangle> for [[f64; 2]; 4] {
    fn from(rect: FloorRectangle) -> Self {
        rect.corners.map(|p| [p.x, p.y])
    }
}

/// 3×3 homogeneous transform mapping pixel coordinates onto the floor plane
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PerspectiveTransform {
    matrix: Matrix3<f64>,
    inverse: Matrix3<f64>,
}

impl PerspectiveTransform {
    /// Build the pixel→floor transform for a frame of the given size
    ///
    /// # Errors
    ///
    /// Returns `DegenerateGeometry` if the frame is smaller than 2×2 pixels or
    /// the linear system for the homography is singular.
    pub fn compute(frame_width: u32, frame_height: u32, floor: &FloorRectangle) -> Result<Self> {
        if frame_width < 2 || frame_height < 2 {
            return Err(Error::DegenerateGeometry(format!(
                "frame {frame_width}x{frame_height} is too small for a perspective transform"
            )));
        }

        let w = f64::from(frame_width - 1);
        let h = f64::from(frame_height - 1);
        let frame_corners = [
            Point2::new(0.0, 0.0),
            Point2::new(w, 0.0),
            Point2::new(w, h),
            Point2::new(0.0, h),
        ];

        let shift = floor.centroid() - centroid(&frame_corners);
        let src = frame_corners.map(|p| p + shift);

        let transform = Self::from_correspondences(&src, floor.corners())?;
        debug!(
            "Computed perspective transform for {}x{} frame: {:?}",
            frame_width, frame_height, transform.matrix
        );
        Ok(transform)
    }

    /// Solve the exact homography taking each `src[i]` onto `dst[i]`
    ///
    /// # Errors
    ///
    /// Returns `DegenerateGeometry` if the 8×8 system is singular or the
    /// resulting matrix cannot be inverted.
    pub fn from_correspondences(
        src: &[Point2<f64>; FLOOR_CORNER_COUNT],
        dst: &[Point2<f64>; FLOOR_CORNER_COUNT],
    ) -> Result<Self> {
        let mut a = SMatrix::<f64, 8, 8>::zeros();
        let mut b = SVector::<f64, 8>::zeros();

        for (i, (s, d)) in src.iter().zip(dst.iter()).enumerate() {
            let (x, y, u, v) = (s.x, s.y, d.x, d.y);
            let r0 = 2 * i;
            let r1 = r0 + 1;

            a[(r0, 0)] = x;
            a[(r0, 1)] = y;
            a[(r0, 2)] = 1.0;
            a[(r0, 6)] = -x * u;
            a[(r0, 7)] = -y * u;
            b[r0] = u;

            a[(r1, 3)] = x;
            a[(r1, 4)] = y;
            a[(r1, 5)] = 1.0;
            a[(r1, 6)] = -x * v;
            a[(r1, 7)] = -y * v;
            b[r1] = v;
        }

        let h = a.lu().solve(&b).ok_or_else(|| {
            Error::DegenerateGeometry("homography system is singular".to_string())
        })?;
        if h.iter().any(|v| !v.is_finite()) {
            return Err(Error::DegenerateGeometry(
                "homography solution is not finite".to_string(),
            ));
        }

        let matrix = Matrix3::new(h[0], h[1], h[2], h[3], h[4], h[5], h[6], h[7], 1.0);
        Self::from_matrix(matrix)
    }

    /// Wrap an existing homogeneous matrix
    ///
    /// # Errors
    ///
    /// Returns `DegenerateGeometry` if the matrix is not invertible.
    pub fn from_matrix(matrix: Matrix3<f64>) -> Result<Self> {
        let inverse = matrix
            .try_inverse()
            .map(normalize)
            .ok_or_else(|| Error::DegenerateGeometry("transform is not invertible".to_string()))?;
        Ok(Self { matrix, inverse })
    }

    /// The pixel→floor matrix
    #[must_use]
    pub const fn matrix(&self) -> &Matrix3<f64> {
        &self.matrix
    }

    /// Map a pixel coordinate onto the floor plane
    ///
    /// # Errors
    ///
    /// Returns `DegenerateGeometry` if the point maps to infinity.
    pub fn pixel_to_floor(&self, x: f64, y: f64) -> Result<(f64, f64)> {
        project(&self.matrix, x, y)
    }

    /// Map a floor-plane coordinate back into pixels
    ///
    /// # Errors
    ///
    /// Returns `DegenerateGeometry` if the point maps to infinity.
    pub fn floor_to_pixel(&self, x: f64, y: f64) -> Result<(f64, f64)> {
        project(&self.inverse, x, y)
    }

    /// The floor→pixel transform
    #[must_use]
    pub const fn invert(&self) -> Self {
        Self {
            matrix: self.inverse,
            inverse: self.matrix,
        }
    }
}

/// Build the pixel→floor transform for a frame; see [`PerspectiveTransform::compute`]
///
/// # Errors
///
/// Returns `DegenerateGeometry` on a degenerate frame or floor rectangle.
pub fn compute_transform(
    frame_width: u32,
    frame_height: u32,
    floor: &FloorRectangle,
) -> Result<PerspectiveTransform> {
    PerspectiveTransform::compute(frame_width, frame_height, floor)
}

/// Apply a transform to a pixel coordinate
///
/// # Errors
///
/// Returns `DegenerateGeometry` if the homogeneous coordinate vanishes.
pub fn pixel_to_floor(transform: &PerspectiveTransform, x: f64, y: f64) -> Result<(f64, f64)> {
    transform.pixel_to_floor(x, y)
}

/// Inverse of a transform (floor→pixel)
#[must_use]
pub const fn invert(transform: &PerspectiveTransform) -> PerspectiveTransform {
    transform.invert()
}

fn project(matrix: &Matrix3<f64>, x: f64, y: f64) -> Result<(f64, f64)> {
    let p = matrix * Vector3::new(x, y, 1.0);
    if !p.z.is_finite() || p.z.abs() < EPSILON {
        return Err(Error::DegenerateGeometry(format!(
            "point ({x}, {y}) maps to infinity"
        )));
    }
    Ok((p.x / p.z, p.y / p.z))
}

fn normalize(m: Matrix3<f64>) -> Matrix3<f64> {
    let scale = m[(2, 2)];
    if scale.abs() > f64::EPSILON {
        m / scale
    } else {
        m
    }
}

/// Per-session cache of the transform for the current frame size
///
/// A transform is only valid for the frame size it was built from; asking
/// for a different size rebuilds it.
#[derive(Debug, Clone)]
pub struct HomographyCache {
    floor: FloorRectangle,
    cached: Option<(FrameSize, PerspectiveTransform)>,
}

impl HomographyCache {
    /// Create an empty cache for the given floor rectangle
    #[must_use]
    pub const fn new(floor: FloorRectangle) -> Self {
        Self { floor, cached: None }
    }

    /// Floor rectangle the transforms are built from
    #[must_use]
    pub const fn floor(&self) -> &FloorRectangle {
        &self.floor
    }

    /// Replace the floor rectangle, invalidating any cached transform
    pub fn set_floor(&mut self, floor: FloorRectangle) {
        self.floor = floor;
        self.cached = None;
    }

    /// Transform for a frame of the given size, recomputing on size change
    ///
    /// # Errors
    ///
    /// Returns `DegenerateGeometry` if the transform cannot be built.
    pub fn transform_for(&mut self, frame: FrameSize) -> Result<&PerspectiveTransform> {
        let stale = !matches!(self.cached, Some((size, _)) if size == frame);
        if stale {
            if let Some((old, _)) = self.cached {
                info!(
                    "Frame size changed from {}x{} to {}x{}, recomputing floor transform",
                    old.width, old.height, frame.width, frame.height
                );
            }
            self.cached = None;
            let transform = PerspectiveTransform::compute(frame.width, frame.height, &self.floor)?;
            self.cached = Some((frame, transform));
        }

        self.cached
            .as_ref()
            .map(|(_, t)| t)
            .ok_or_else(|| Error::DegenerateGeometry("no cached transform".to_string()))
    }
}

//! Pan/tilt angle model for a floor-mounted aiming device.
//!
//! The device sits at `(0, 0, height)` above the floor-plane origin and is
//! rotated by yaw (pan), pitch (tilt) and roll relative to the floor frame.
//! Pan is measured in the device's horizontal plane; tilt is measured from
//! the horizon and becomes negative as the target drops below it.

use crate::{Error, Result};
use nalgebra::{Rotation3, Vector3};
use serde::{Deserialize, Serialize};

/// Mount pose of the device relative to the floor-plane origin
///
/// Field names double as the persisted calibration artifact keys.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ExtrinsicParams {
    /// Mount height above the floor, in metres
    pub height: f64,
    /// Yaw of the mount, in degrees
    pub initial_pan: f64,
    /// Pitch of the mount, in degrees
    pub initial_tilt: f64,
    /// Roll of the mount, in degrees
    pub initial_roll: f64,
}

impl ExtrinsicParams {
    /// Create parameters without validation
    #[must_use]
    pub const fn new(height: f64, initial_pan: f64, initial_tilt: f64, initial_roll: f64) -> Self {
        Self {
            height,
            initial_pan,
            initial_tilt,
            initial_roll,
        }
    }

    /// Check the invariants the live model relies on
    ///
    /// # Errors
    ///
    /// Returns `InvalidParameter` if any value is non-finite or the height is
    /// not strictly positive.
    pub fn validate(&self) -> Result<()> {
        if self.to_array().iter().any(|v| !v.is_finite()) {
            return Err(Error::InvalidParameter(format!(
                "extrinsic parameters must be finite: {self:?}"
            )));
        }
        if self.height <= 0.0 {
            return Err(Error::InvalidParameter(format!(
                "mount height must be positive, got {} m",
                self.height
            )));
        }
        Ok(())
    }

    /// `[height, pan, tilt, roll]`
    #[must_use]
    pub const fn to_array(&self) -> [f64; 4] {
        [self.height, self.initial_pan, self.initial_tilt, self.initial_roll]
    }

    /// Inverse of [`Self::to_array`]
    #[must_use]
    pub fn from_array(values: [f64; 4]) -> Self {
        let [height, pan, tilt, roll] = values;
        Self::new(height, pan, tilt, roll)
    }

    /// Mount orientation `Rz(pan) · Ry(tilt) · Rx(roll)`
    #[must_use]
    pub fn rotation(&self) -> Rotation3<f64> {
        Rotation3::from_euler_angles(
            self.initial_roll.to_radians(),
            self.initial_tilt.to_radians(),
            self.initial_pan.to_radians(),
        )
    }
}

impl Default for ExtrinsicParams {
    fn default() -> Self {
        Self::new(1.5, 0.0, 0.0, 0.0)
    }
}

/// Pan and tilt, in degrees, that point the device at `(x, y, z)`
///
/// Pure and unchecked: a non-positive height yields meaningless angles but
/// never panics, which is what the calibration search needs.
#[must_use]
pub fn angles_for(x: f64, y: f64, z: f64, params: &ExtrinsicParams) -> (f64, f64) {
    let target = Vector3::new(x, y, z - params.height);
    let local = params.rotation().transpose() * target;

    let pan = local.y.atan2(local.x);
    let tilt = local.x.hypot(local.y).atan2(-local.z) - std::f64::consts::FRAC_PI_2;

    (pan.to_degrees(), tilt.to_degrees())
}

/// Validated pan/tilt model for a calibrated session
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PanTiltModel {
    params: ExtrinsicParams,
}

impl PanTiltModel {
    /// Create a model from calibrated parameters
    ///
    /// # Errors
    ///
    /// Returns `InvalidParameter` if the parameters fail validation.
    pub fn new(params: ExtrinsicParams) -> Result<Self> {
        params.validate()?;
        Ok(Self { params })
    }

    /// Calibrated parameters
    #[must_use]
    pub const fn params(&self) -> &ExtrinsicParams {
        &self.params
    }

    /// Pan and tilt, in degrees, for a floor point
    #[must_use]
    pub fn angles_for(&self, x: f64, y: f64, z: f64) -> (f64, f64) {
        angles_for(x, y, z, &self.params)
    }
}

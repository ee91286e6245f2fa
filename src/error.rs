//! Error types for the sprayer targeting library.

use thiserror::Error;

/// Main error type for the library
#[derive(Error, Debug)]
pub enum Error {
    /// Floor rectangle or projected point is numerically degenerate
    #[error("Degenerate geometry: {0}")]
    DegenerateGeometry(String),

    /// Extrinsic parameters or loaded artifacts are unusable
    #[error("Invalid parameter: {0}")]
    InvalidParameter(String),

    /// Actuator channel could not be opened or written
    #[error("Connection error: {0}")]
    Connection(String),

    /// Calibration fit exceeded the caller's residual threshold
    #[error("Calibration rejected: RMS error {rms_deg:.3}° exceeds {threshold_deg:.3}°")]
    CalibrationRejected {
        /// Per-sample RMS angular error of the fit, in degrees
        rms_deg: f64,
        /// Threshold the fit was checked against, in degrees
        threshold_deg: f64,
    },

    /// File I/O operation failed
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON artifact could not be parsed or written
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// YAML document could not be parsed or written
    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    /// Invalid input values (bad casts, malformed wire records)
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// Configuration error
    #[error("Configuration error: {0}")]
    ConfigError(String),
}

/// Convenience type alias for Results with our Error type
pub type Result<T> = std::result::Result<T, Error>;

impl Error {
    /// Whether the error only invalidates the current tick.
    ///
    /// Geometry and connection failures are recovered inside the control loop;
    /// everything else is fatal at startup.
    #[must_use]
    pub const fn is_tick_local(&self) -> bool {
        matches!(self, Self::DegenerateGeometry(_) | Self::Connection(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tick_local_classification() {
        assert!(Error::DegenerateGeometry("collinear".into()).is_tick_local());
        assert!(Error::Connection("refused".into()).is_tick_local());
        assert!(!Error::InvalidParameter("height".into()).is_tick_local());
        assert!(!Error::ConfigError("port".into()).is_tick_local());
    }

    #[test]
    fn test_rejection_message() {
        let err = Error::CalibrationRejected {
            rms_deg: 4.25,
            threshold_deg: 2.0,
        };
        assert_eq!(
            err.to_string(),
            "Calibration rejected: RMS error 4.250° exceeds 2.000°"
        );
    }
}

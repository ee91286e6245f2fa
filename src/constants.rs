//! Constants used throughout the application

/// Smallest angle the actuator accepts, in degrees
pub const ANGLE_MIN_DEG: u8 = 0;

/// Largest angle the actuator accepts, in degrees
pub const ANGLE_MAX_DEG: u8 = 180;

/// Command transmissions per second
pub const DEFAULT_UPDATE_RATE_HZ: f64 = 30.0;

/// Default actuator address
pub const DEFAULT_ACTUATOR_ADDRESS: &str = "127.0.0.1";

/// Default actuator TCP port
pub const DEFAULT_ACTUATOR_PORT: u16 = 1632;

/// Connect timeout for the actuator link
pub const DEFAULT_CONNECT_TIMEOUT_MS: u64 = 1000;

/// Write timeout for a single command; a timeout counts as a send failure
pub const DEFAULT_SEND_TIMEOUT_MS: u64 = 50;

/// Automatic-mode dwell time before advancing to the next target
pub const DEFAULT_HOLD_DURATION_SECS: f64 = 5.0;

/// Shortest operator-adjustable dwell time
pub const HOLD_DURATION_MIN_SECS: f64 = 1.0;

/// Longest operator-adjustable dwell time
pub const HOLD_DURATION_MAX_SECS: f64 = 10.0;

/// Smallest accepted bounding box, as a fraction of the frame area
pub const DEFAULT_MIN_AREA_FRACTION: f64 = 0.003;

/// Largest accepted bounding box, as a fraction of the frame area
pub const DEFAULT_MAX_AREA_FRACTION: f64 = 0.9;

/// Number of corners in a floor rectangle
pub const FLOOR_CORNER_COUNT: usize = 4;

/// Minimum samples for a well-posed extrinsic fit
pub const MIN_CALIBRATION_SAMPLES: usize = 4;

/// Number of free extrinsic parameters
pub const EXTRINSIC_PARAM_COUNT: usize = 4;

/// Simplex iterations allowed across all restarts
pub const DEFAULT_SOLVER_MAX_ITERATIONS: usize = 2000;

/// Objective evaluations after which no further restart is started
pub const DEFAULT_SOLVER_MAX_EVALUATIONS: usize = 4000;

/// Restarts stop once the best point moves less than this per coordinate
pub const DEFAULT_SOLVER_X_TOLERANCE: f64 = 1e-9;

/// Standard deviation of simplex values at which a run has converged, in degrees²
pub const DEFAULT_SOLVER_F_TOLERANCE: f64 = 1e-12;

/// Initial simplex step for the mount height, in metres
pub const DEFAULT_SOLVER_HEIGHT_STEP: f64 = 0.1;

/// Initial simplex step for the mount angles, in degrees
pub const DEFAULT_SOLVER_ANGLE_STEP: f64 = 5.0;

/// Simplex rebuilds around the best point after a converged run
pub const DEFAULT_SOLVER_RESTARTS: usize = 3;

/// Calibrations with a per-sample RMS error above this are rejected by default
pub const DEFAULT_MAX_RMS_ERROR_DEG: f64 = 2.0;

/// Numeric precision epsilon
pub const EPSILON: f64 = 1e-10;

//! Configuration management for the sprayer targeting application

use crate::{
    calibration::{CalibrationSample, SolverOptions},
    constants::{
        DEFAULT_ACTUATOR_ADDRESS, DEFAULT_ACTUATOR_PORT, DEFAULT_CONNECT_TIMEOUT_MS,
        DEFAULT_HOLD_DURATION_SECS, DEFAULT_MAX_AREA_FRACTION, DEFAULT_MIN_AREA_FRACTION,
        DEFAULT_SEND_TIMEOUT_MS, DEFAULT_UPDATE_RATE_HZ, FLOOR_CORNER_COUNT,
        HOLD_DURATION_MAX_SECS, HOLD_DURATION_MIN_SECS,
    },
    command_channel::ChannelTiming,
    homography::FloorRectangle,
    pan_tilt::ExtrinsicParams,
    targeting::{FiringMode, JoystickMapping, TargetingMode},
    Error, Result,
};
use log::info;
use serde::{Deserialize, Serialize};
use std::{
    path::{Path, PathBuf},
    time::Duration,
};

/// Application configuration
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Calibration artifact locations
    pub artifacts: ArtifactConfig,

    /// Target selection behaviour
    pub targeting: TargetingConfig,

    /// Track filtering
    pub detection: DetectionConfig,

    /// Actuator link
    pub actuator: ActuatorConfig,

    /// Calibration solver tuning
    pub solver: SolverOptions,
}

/// Calibration artifact paths
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ArtifactConfig {
    /// JSON array of four `[x, y]` pixel corners
    pub floor_corners: PathBuf,

    /// JSON object with the extrinsic parameters
    pub calibration: PathBuf,
}

/// Target selection settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TargetingConfig {
    /// Mode at startup
    pub default_mode: TargetingMode,

    /// Cursor firing behaviour at startup
    pub firing_mode: FiringMode,

    /// Automatic-mode dwell time in seconds (1-10)
    pub hold_duration_secs: f64,

    /// Joystick axis polarity
    pub joystick: JoystickMapping,
}

/// Bounding box area gate applied to incoming tracks
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DetectionConfig {
    /// Smallest accepted box, as a fraction of the frame area
    pub min_area_fraction: f64,

    /// Largest accepted box, as a fraction of the frame area
    pub max_area_fraction: f64,
}

/// Actuator connection settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ActuatorConfig {
    /// Host name or IP address
    pub address: String,

    /// TCP port
    pub port: u16,

    /// Command transmissions per second
    pub update_rate_hz: f64,

    /// Connect timeout in milliseconds
    pub connect_timeout_ms: u64,

    /// Per-command write timeout in milliseconds
    pub send_timeout_ms: u64,

    /// Optional CSV file receiving every transmitted command
    pub command_log: Option<PathBuf>,
}

impl Default for ArtifactConfig {
    fn default() -> Self {
        Self {
            floor_corners: PathBuf::from("floor_corners.json"),
            calibration: PathBuf::from("calibration_result.json"),
        }
    }
}

impl Default for TargetingConfig {
    fn default() -> Self {
        Self {
            default_mode: TargetingMode::Automatic,
            firing_mode: FiringMode::Toggle,
            hold_duration_secs: DEFAULT_HOLD_DURATION_SECS,
            joystick: JoystickMapping::default(),
        }
    }
}

impl Default for DetectionConfig {
    fn default() -> Self {
        Self {
            min_area_fraction: DEFAULT_MIN_AREA_FRACTION,
            max_area_fraction: DEFAULT_MAX_AREA_FRACTION,
        }
    }
}

impl Default for ActuatorConfig {
    fn default() -> Self {
        Self {
            address: DEFAULT_ACTUATOR_ADDRESS.to_string(),
            port: DEFAULT_ACTUATOR_PORT,
            update_rate_hz: DEFAULT_UPDATE_RATE_HZ,
            connect_timeout_ms: DEFAULT_CONNECT_TIMEOUT_MS,
            send_timeout_ms: DEFAULT_SEND_TIMEOUT_MS,
            command_log: None,
        }
    }
}

impl ActuatorConfig {
    /// Channel timing derived from these settings
    #[must_use]
    pub fn timing(&self) -> ChannelTiming {
        ChannelTiming {
            update_interval: self.update_interval(),
            connect_timeout: Duration::from_millis(self.connect_timeout_ms),
            send_timeout: Duration::from_millis(self.send_timeout_ms),
        }
    }

    /// Spacing between transmissions
    #[must_use]
    pub fn update_interval(&self) -> Duration {
        Duration::from_secs_f64(1.0 / self.update_rate_hz)
    }
}

impl Config {
    /// Load configuration from a YAML file
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or parsed.
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;

        serde_yaml::from_str(&content).map_err(|e| Error::ConfigError(format!("Failed to parse config: {e}")))
    }

    /// Save configuration to a YAML file
    ///
    /// # Errors
    ///
    /// Returns an error if serialization or the write fails.
    pub fn to_file<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let content = serde_yaml::to_string(self)
            .map_err(|e| Error::ConfigError(format!("Failed to serialize config: {e}")))?;

        std::fs::write(path, content)?;

        Ok(())
    }

    /// Validate configuration
    ///
    /// # Errors
    ///
    /// Returns `ConfigError` describing the first invalid setting.
    pub fn validate(&self) -> Result<()> {
        // Targeting
        let hold = self.targeting.hold_duration_secs;
        if !(HOLD_DURATION_MIN_SECS..=HOLD_DURATION_MAX_SECS).contains(&hold) {
            return Err(Error::ConfigError(format!(
                "Hold duration must be between {HOLD_DURATION_MIN_SECS} and {HOLD_DURATION_MAX_SECS} seconds"
            )));
        }

        // Detection
        let (min, max) = (self.detection.min_area_fraction, self.detection.max_area_fraction);
        if !(0.0..=1.0).contains(&min) || !(0.0..=1.0).contains(&max) {
            return Err(Error::ConfigError(
                "Area fractions must be between 0.0 and 1.0".to_string(),
            ));
        }
        if min > max {
            return Err(Error::ConfigError(
                "Minimum area fraction must not exceed the maximum".to_string(),
            ));
        }

        // Actuator
        if self.actuator.address.trim().is_empty() {
            return Err(Error::ConfigError("Actuator address must not be empty".to_string()));
        }
        if !(self.actuator.update_rate_hz.is_finite() && self.actuator.update_rate_hz > 0.0) {
            return Err(Error::ConfigError("Update rate must be greater than 0".to_string()));
        }
        if self.actuator.connect_timeout_ms == 0 || self.actuator.send_timeout_ms == 0 {
            return Err(Error::ConfigError(
                "Actuator timeouts must be greater than 0".to_string(),
            ));
        }

        self.solver.validate()
    }
}

fn read_artifact(kind: &str, path: &Path) -> Result<String> {
    std::fs::read_to_string(path).map_err(|e| {
        Error::InvalidParameter(format!("Cannot read {kind} {}: {e}", path.display()))
    })
}

/// Load the four floor corners
///
/// # Errors
///
/// Returns `InvalidParameter` if the file is missing, malformed, or describes
/// degenerate geometry.
pub fn load_floor_rectangle<P: AsRef<Path>>(path: P) -> Result<FloorRectangle> {
    let path = path.as_ref();
    let content = read_artifact("floor corners", path)?;
    let corners: Vec<[f64; 2]> = serde_json::from_str(&content).map_err(|e| {
        Error::InvalidParameter(format!("Malformed floor corners {}: {e}", path.display()))
    })?;
    let corners: [[f64; 2]; FLOOR_CORNER_COUNT] = corners.try_into().map_err(|v: Vec<_>| {
        Error::InvalidParameter(format!(
            "Floor corners {} must hold exactly {FLOOR_CORNER_COUNT} points, found {}",
            path.display(),
            v.len()
        ))
    })?;
    let floor = FloorRectangle::new(corners).map_err(|e| {
        Error::InvalidParameter(format!("Unusable floor corners {}: {e}", path.display()))
    })?;
    info!("Loaded floor corners from {}", path.display());
    Ok(floor)
}

/// Load calibrated extrinsic parameters
///
/// # Errors
///
/// Returns `InvalidParameter` if the file is missing, malformed, or the
/// parameters fail validation.
pub fn load_extrinsics<P: AsRef<Path>>(path: P) -> Result<ExtrinsicParams> {
    let path = path.as_ref();
    let content = read_artifact("calibration", path)?;
    let params: ExtrinsicParams = serde_json::from_str(&content).map_err(|e| {
        Error::InvalidParameter(format!("Malformed calibration {}: {e}", path.display()))
    })?;
    params.validate()?;
    info!(
        "Loaded calibration from {}: height {:.3} m, pan {:.2}°, tilt {:.2}°, roll {:.2}°",
        path.display(),
        params.height,
        params.initial_pan,
        params.initial_tilt,
        params.initial_roll
    );
    Ok(params)
}

/// Write calibrated extrinsic parameters as pretty JSON
///
/// # Errors
///
/// Returns an error if serialization or the write fails.
pub fn save_extrinsics<P: AsRef<Path>>(path: P, params: &ExtrinsicParams) -> Result<()> {
    let content = serde_json::to_string_pretty(params)?;
    std::fs::write(path.as_ref(), content)?;
    info!("Saved calibration to {}", path.as_ref().display());
    Ok(())
}

/// Load calibration samples from YAML or JSON
///
/// # Errors
///
/// Returns `InvalidParameter` if the file is missing or malformed.
pub fn load_samples<P: AsRef<Path>>(path: P) -> Result<Vec<CalibrationSample>> {
    let path = path.as_ref();
    let content = read_artifact("calibration samples", path)?;
    // YAML is a superset of JSON
    serde_yaml::from_str(&content).map_err(|e| {
        Error::InvalidParameter(format!("Malformed calibration samples {}: {e}", path.display()))
    })
}

/// Example configuration file content
pub const EXAMPLE_CONFIG: &str = r#"# Sprayer Targeting Configuration

# Calibration artifacts
artifacts:
  floor_corners: "floor_corners.json"
  calibration: "calibration_result.json"

# Target selection
targeting:
  default_mode: "automatic"   # automatic, cursor, joystick
  firing_mode: "toggle"       # toggle, hold
  hold_duration_secs: 5.0
  joystick:
    invert_x: false
    invert_y: false

# Bounding box area gate (fraction of frame area)
detection:
  min_area_fraction: 0.003
  max_area_fraction: 0.9

# Actuator link
actuator:
  address: "127.0.0.1"
  port: 1632
  update_rate_hz: 30.0
  connect_timeout_ms: 1000
  send_timeout_ms: 50
  # command_log: "commands.csv"

# Calibration solver
solver:
  max_iterations: 2000
  max_evaluations: 4000
  x_tolerance: 1.0e-9
  f_tolerance: 1.0e-12
  height_step: 0.1
  angle_step: 5.0
  restarts: 3
  max_rms_error_deg: 2.0
"#;

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    fn write_temp(content: &str) -> NamedTempFile {
        let mut file = NamedTempFile::new().unwrap();
        file.write_all(content.as_bytes()).unwrap();
        file
    }

    #[test]
    fn test_example_config_matches_defaults() {
        let parsed: Config = serde_yaml::from_str(EXAMPLE_CONFIG).unwrap();
        assert_eq!(parsed, Config::default());
        assert!(parsed.validate().is_ok());
    }

    #[test]
    fn test_partial_config_uses_defaults() {
        let file = write_temp("actuator:\n  port: 9000\ntargeting:\n  default_mode: joystick\n");
        let config = Config::from_file(file.path()).unwrap();
        assert_eq!(config.actuator.port, 9000);
        assert_eq!(config.actuator.address, "127.0.0.1");
        assert_eq!(config.targeting.default_mode, TargetingMode::Joystick);
        assert_eq!(config.targeting.hold_duration_secs, 5.0);
    }

    #[test]
    fn test_config_round_trip_file() {
        let mut config = Config::default();
        config.targeting.firing_mode = FiringMode::Hold;
        config.actuator.command_log = Some(PathBuf::from("cmds.csv"));
        let file = NamedTempFile::new().unwrap();
        config.to_file(file.path()).unwrap();
        assert_eq!(Config::from_file(file.path()).unwrap(), config);
    }

    #[test]
    fn test_validation_errors() {
        let mut config = Config::default();
        config.targeting.hold_duration_secs = 0.5;
        assert!(config.validate().is_err());

        let mut config = Config::default();
        config.detection.min_area_fraction = 0.5;
        config.detection.max_area_fraction = 0.1;
        assert!(config.validate().is_err());

        let mut config = Config::default();
        config.actuator.update_rate_hz = 0.0;
        assert!(config.validate().is_err());

        let mut config = Config::default();
        config.solver.max_iterations = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_update_interval() {
        let config = ActuatorConfig::default();
        let interval = config.update_interval().as_secs_f64();
        assert!((interval - 1.0 / 30.0).abs() < 1e-9);
    }

    #[test]
    fn test_load_floor_rectangle() {
        let file = write_temp("[[100, 200], [540, 200], [600, 470], [40, 470]]");
        let floor = load_floor_rectangle(file.path()).unwrap();
        assert_eq!(floor.corners()[2].x, 600.0);

        let three = write_temp("[[0, 0], [1, 0], [1, 1]]");
        assert!(matches!(
            load_floor_rectangle(three.path()),
            Err(Error::InvalidParameter(_))
        ));

        let collinear = write_temp("[[0, 0], [1, 0], [2, 0], [0, 1]]");
        assert!(matches!(
            load_floor_rectangle(collinear.path()),
            Err(Error::InvalidParameter(_))
        ));

        assert!(matches!(
            load_floor_rectangle("/nonexistent/floor.json"),
            Err(Error::InvalidParameter(_))
        ));
    }

    #[test]
    fn test_extrinsics_round_trip() {
        let params = ExtrinsicParams::new(1.42, 3.5, -7.25, 0.5);
        let file = NamedTempFile::new().unwrap();
        save_extrinsics(file.path(), &params).unwrap();
        assert_eq!(load_extrinsics(file.path()).unwrap(), params);
    }

    #[test]
    fn test_load_extrinsics_rejects_bad_height() {
        let file = write_temp(r#"{"height": 0.0, "initial_pan": 0, "initial_tilt": 0, "initial_roll": 0}"#);
        assert!(matches!(
            load_extrinsics(file.path()),
            Err(Error::InvalidParameter(_))
        ));

        let missing_field = write_temp(r#"{"height": 1.5}"#);
        assert!(matches!(
            load_extrinsics(missing_field.path()),
            Err(Error::InvalidParameter(_))
        ));
    }

    #[test]
    fn test_load_samples() {
        let file = write_temp(
            "- point: [1.0, 2.0, 0.0]\n  angles: [26.5, -30.0]\n- point: [0.0, 3.0, 0.0]\n  angles: [0.0, -25.0]\n",
        );
        let samples = load_samples(file.path()).unwrap();
        assert_eq!(samples.len(), 2);
        assert_eq!(samples[1].point, [0.0, 3.0, 0.0]);

        let json = write_temp(r#"[{"point": [1, 1, 0], "angles": [45, -40]}]"#);
        assert_eq!(load_samples(json.path()).unwrap().len(), 1);
    }
}

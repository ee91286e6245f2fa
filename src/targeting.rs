//! Target selection state machine.
//!
//! Each tick the selector turns the current track list, or the operator's
//! pointer or joystick input, into at most one aim pixel plus a firing flag.
//! The mode is chosen by the operator; the selector never switches it itself.

use crate::{
    constants::{DEFAULT_HOLD_DURATION_SECS, HOLD_DURATION_MAX_SECS, HOLD_DURATION_MIN_SECS},
    tracker::{FrameSize, Track},
    Error,
};
use log::debug;
use serde::{Deserialize, Serialize};
use std::{
    fmt,
    str::FromStr,
    time::{Duration, Instant},
};

/// How the aim point is chosen
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TargetingMode {
    /// Cycle through tracked targets
    #[default]
    Automatic,
    /// Aim at the operator's pointer
    Cursor,
    /// Aim from joystick axes
    Joystick,
}

impl fmt::Display for TargetingMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Automatic => write!(f, "automatic"),
            Self::Cursor => write!(f, "cursor"),
            Self::Joystick => write!(f, "joystick"),
        }
    }
}

impl FromStr for TargetingMode {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "automatic" | "auto" => Ok(Self::Automatic),
            "cursor" => Ok(Self::Cursor),
            "joystick" => Ok(Self::Joystick),
            _ => Err(Error::InvalidInput(format!("Unknown targeting mode: {s}"))),
        }
    }
}

/// How pointer button events drive the trigger in cursor mode
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FiringMode {
    /// Each activation flips the trigger
    #[default]
    Toggle,
    /// Trigger is on exactly while the button is held
    Hold,
}

impl fmt::Display for FiringMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Toggle => write!(f, "toggle"),
            Self::Hold => write!(f, "hold"),
        }
    }
}

impl FromStr for FiringMode {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "toggle" => Ok(Self::Toggle),
            "hold" => Ok(Self::Hold),
            _ => Err(Error::InvalidInput(format!("Unknown firing mode: {s}"))),
        }
    }
}

/// One joystick reading
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct JoystickSample {
    /// Horizontal axis in `[-1, 1]`
    pub x: f64,
    /// Vertical axis in `[-1, 1]`, negative is up
    pub y: f64,
    /// Trigger button
    #[serde(default)]
    pub trigger: bool,
    /// Auxiliary button, forwarded to the actuator untouched
    #[serde(default)]
    pub aux: bool,
}

impl JoystickSample {
    /// Create a sample, clamping both axes into `[-1, 1]`
    ///
    /// Non-finite axis values are treated as centred.
    #[must_use]
    pub fn new(x: f64, y: f64, trigger: bool, aux: bool) -> Self {
        let axis = |v: f64| if v.is_finite() { v.clamp(-1.0, 1.0) } else { 0.0 };
        Self {
            x: axis(x),
            y: axis(y),
            trigger,
            aux,
        }
    }
}

/// Axis polarity for the attached controller
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct JoystickMapping {
    /// Negate the horizontal axis
    pub invert_x: bool,
    /// Negate the vertical axis
    pub invert_y: bool,
}

impl JoystickMapping {
    /// Virtual `(pan, tilt)` in degrees for a sample
    #[must_use]
    pub fn angles(&self, sample: &JoystickSample) -> (f64, f64) {
        let x = if self.invert_x { -sample.x } else { sample.x };
        let y = if self.invert_y { -sample.y } else { sample.y };
        ((x + 1.0) * 90.0, (y + 1.0) * 90.0)
    }
}

/// Output of one selector tick
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Selection {
    /// Nothing to aim at this tick
    NoTarget,
    /// Aim at pixel `(x, y)`
    Aim {
        /// Pixel column
        x: f64,
        /// Pixel row
        y: f64,
        /// Whether the actuator should fire
        firing: bool,
        /// Auxiliary button state
        aux: bool,
    },
}

impl Selection {
    /// Aim pixel, if any
    #[must_use]
    pub const fn pixel(&self) -> Option<(f64, f64)> {
        match *self {
            Self::NoTarget => None,
            Self::Aim { x, y, .. } => Some((x, y)),
        }
    }

    /// Whether this selection asks the actuator to fire
    #[must_use]
    pub const fn is_firing(&self) -> bool {
        matches!(self, Self::Aim { firing: true, .. })
    }
}

/// Mutable selector state
#[derive(Debug, Clone, PartialEq)]
pub struct TargetingState {
    /// Active mode
    pub mode: TargetingMode,
    /// Index into the current track list in automatic mode
    pub current_target_index: usize,
    /// Last time the automatic target advanced; `None` until the first automatic tick
    pub last_switch: Option<Instant>,
    /// Cursor firing behaviour
    pub firing_mode: FiringMode,
    /// Current trigger state for automatic and cursor modes
    pub is_firing: bool,
    /// Pointer position in pixels
    pub cursor_position: (f64, f64),
    /// Automatic-mode dwell time
    pub hold_duration: Duration,
    /// Latest joystick reading
    pub joystick: JoystickSample,
}

impl Default for TargetingState {
    fn default() -> Self {
        Self {
            mode: TargetingMode::default(),
            current_target_index: 0,
            last_switch: None,
            firing_mode: FiringMode::default(),
            is_firing: false,
            cursor_position: (0.0, 0.0),
            hold_duration: Duration::from_secs_f64(DEFAULT_HOLD_DURATION_SECS),
            joystick: JoystickSample::default(),
        }
    }
}

/// Per-tick target selection
#[derive(Debug, Clone, Default)]
pub struct TargetSelector {
    state: TargetingState,
    mapping: JoystickMapping,
    frame: Option<FrameSize>,
}

impl TargetSelector {
    /// Create a selector in the given modes
    #[must_use]
    pub fn new(mode: TargetingMode, firing_mode: FiringMode, mapping: JoystickMapping) -> Self {
        Self {
            state: TargetingState {
                mode,
                firing_mode,
                ..TargetingState::default()
            },
            mapping,
            frame: None,
        }
    }

    /// Current state
    #[must_use]
    pub const fn state(&self) -> &TargetingState {
        &self.state
    }

    /// Active mode
    #[must_use]
    pub const fn mode(&self) -> TargetingMode {
        self.state.mode
    }

    /// Switch mode
    pub fn set_mode(&mut self, mode: TargetingMode) {
        if mode != self.state.mode {
            debug!("Targeting mode {} -> {}", self.state.mode, mode);
            self.state.mode = mode;
        }
    }

    /// Switch cursor firing behaviour
    pub fn set_firing_mode(&mut self, firing_mode: FiringMode) {
        self.state.firing_mode = firing_mode;
    }

    /// Set the automatic-mode dwell time, clamped to the operator range
    ///
    /// Takes effect at the next switch check, including mid-cycle.
    pub fn set_hold_duration(&mut self, seconds: f64) {
        let seconds = if seconds.is_finite() {
            seconds.clamp(HOLD_DURATION_MIN_SECS, HOLD_DURATION_MAX_SECS)
        } else {
            DEFAULT_HOLD_DURATION_SECS
        };
        self.state.hold_duration = Duration::from_secs_f64(seconds);
    }

    /// Move the pointer, clamped into the last seen frame
    pub fn set_cursor(&mut self, x: f64, y: f64) {
        if !(x.is_finite() && y.is_finite()) {
            return;
        }
        let (max_x, max_y) = self.frame.map_or((f64::MAX, f64::MAX), |f| {
            (
                f64::from(f.width.saturating_sub(1)),
                f64::from(f.height.saturating_sub(1)),
            )
        });
        self.state.cursor_position = (x.clamp(0.0, max_x), y.clamp(0.0, max_y));
    }

    /// Pointer click; flips the trigger under [`FiringMode::Toggle`]
    pub fn activate(&mut self) {
        if self.state.mode == TargetingMode::Cursor && self.state.firing_mode == FiringMode::Toggle {
            self.state.is_firing = !self.state.is_firing;
        }
    }

    /// Pointer button down; toggles or starts firing depending on the firing mode
    pub fn press(&mut self) {
        if self.state.mode != TargetingMode::Cursor {
            return;
        }
        match self.state.firing_mode {
            FiringMode::Toggle => self.state.is_firing = !self.state.is_firing,
            FiringMode::Hold => self.state.is_firing = true,
        }
    }

    /// Pointer button up; stops firing under [`FiringMode::Hold`]
    pub fn release(&mut self) {
        if self.state.mode == TargetingMode::Cursor && self.state.firing_mode == FiringMode::Hold {
            self.state.is_firing = false;
        }
    }

    /// Record the latest joystick reading
    pub fn set_joystick(&mut self, sample: JoystickSample) {
        self.state.joystick = JoystickSample::new(sample.x, sample.y, sample.trigger, sample.aux);
    }

    /// Advance one tick
    pub fn tick(&mut self, tracks: &[Track], frame: FrameSize, now: Instant) -> Selection {
        self.frame = Some(frame);
        let selection = match self.state.mode {
            TargetingMode::Automatic => self.tick_automatic(tracks, now),
            TargetingMode::Cursor => self.tick_cursor(),
            TargetingMode::Joystick => self.tick_joystick(frame),
        };
        debug!("{} selection: {:?}", self.state.mode, selection);
        selection
    }

    fn tick_automatic(&mut self, tracks: &[Track], now: Instant) -> Selection {
        let state = &mut self.state;
        let last_switch = *state.last_switch.get_or_insert(now);

        if now.saturating_duration_since(last_switch) > state.hold_duration {
            state.current_target_index = (state.current_target_index + 1) % tracks.len().max(1);
            state.last_switch = Some(now);
        }

        let Some(last) = tracks.len().checked_sub(1) else {
            state.current_target_index = 0;
            return Selection::NoTarget;
        };
        state.current_target_index = state.current_target_index.min(last);

        let (x, y) = tracks[state.current_target_index].bounding_box.foot_point();
        Selection::Aim {
            x,
            y,
            firing: state.is_firing,
            aux: false,
        }
    }

    fn tick_cursor(&self) -> Selection {
        let (x, y) = self.state.cursor_position;
        Selection::Aim {
            x,
            y,
            firing: self.state.is_firing,
            aux: false,
        }
    }

    fn tick_joystick(&self, frame: FrameSize) -> Selection {
        let sample = &self.state.joystick;
        let (pan, tilt) = self.mapping.angles(sample);
        Selection::Aim {
            x: pan / 180.0 * f64::from(frame.width),
            y: (180.0 - tilt) / 180.0 * f64::from(frame.height),
            firing: sample.trigger,
            aux: sample.aux,
        }
    }
}

//! Geometric targeting for a remotely actuated pan/tilt sprayer.
//!
//! This library turns "a point in the camera image" into "a pan/tilt pair on
//! the wire":
//! - a planar homography maps camera pixels onto the floor plane
//! - a calibrated mount model converts a floor point into pan and tilt
//! - a derivative-free solver fits that mount model from measured samples
//! - a selector decides each tick which target (or operator input) is live
//! - a rate-limited TCP channel streams commands to the actuator
//!
//! Detection and tracking happen elsewhere; tracks arrive through the
//! [`tracker::TrackSource`] trait.
//!
//! # Examples
//!
//! ## Pixel to angles
//!
//! ```no_run
//! use sprayer_targeting::{
//!     homography::{FloorRectangle, PerspectiveTransform},
//!     pan_tilt::{ExtrinsicParams, PanTiltModel},
//! };
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let floor = FloorRectangle::new([[120.0, 80.0], [520.0, 80.0], [630.0, 470.0], [10.0, 470.0]])?;
//! let transform = PerspectiveTransform::compute(640, 480, &floor)?;
//! let model = PanTiltModel::new(ExtrinsicParams::new(1.5, 0.0, 0.0, 0.0))?;
//!
//! let (x, y) = transform.pixel_to_floor(320.0, 400.0)?;
//! let (pan, tilt) = model.angles_for(x, y, 0.0);
//! println!("pan {pan:.1}°, tilt {tilt:.1}°");
//! # Ok(())
//! # }
//! ```
//!
//! ## Streaming commands
//!
//! ```no_run
//! use sprayer_targeting::command_channel::CommandChannel;
//! use std::time::Instant;
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let mut channel = CommandChannel::default();
//! println!("{}", channel.connect("127.0.0.1", 1632));
//!
//! channel.send(90.0, 45.0, false)?;
//! channel.send(91.0, 44.0, true)?;
//! // Only the newest staged command is written
//! channel.flush(Instant::now())?;
//! # Ok(())
//! # }
//! ```

/// Planar perspective transform between pixels and the floor
pub mod homography;

/// Pan/tilt angle model for the calibrated mount
pub mod pan_tilt;

/// Extrinsic calibration solver
pub mod calibration;

/// Per-tick target selection state machine
pub mod targeting;

/// Interface to the external detector and tracker
pub mod tracker;

/// Actuator wire format and rate-limited command channel
pub mod command_channel;

/// Actuator-side command listener
pub mod receiver;

/// Main application module
pub mod app;

/// Utility functions for numeric conversion and planar geometry
pub mod utils;

/// Error types and result handling
pub mod error;

/// Constants used throughout the application
pub mod constants;

/// Configuration management
pub mod config;

pub use error::{Error, Result};

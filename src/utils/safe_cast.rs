//! Checked numeric conversions for values that leave the process

use crate::{Error, Result};

/// Round and clamp an angle in degrees into the `[min, max]` wire range
///
/// # Errors
///
/// Returns an error if the value is NaN or infinite; a non-finite angle must
/// never be clamped into a plausible-looking command.
#[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)] // Clamped into u8 range first
pub fn f64_to_u8_clamp(value: f64, min: u8, max: u8) -> Result<u8> {
    if !value.is_finite() {
        return Err(Error::InvalidInput(format!(
            "Value {value} cannot be converted to an actuator angle"
        )));
    }

    let (min, max) = if min <= max { (min, max) } else { (max, min) };
    let clamped = value.round().clamp(f64::from(min), f64::from(max));
    Ok(clamped as u8)
}

use rosc::OscType;

use crate::error::{BridgeError, Result};
use crate::events::{MAX_DATA_VALUE, PITCH_BEND_MAX, PITCH_BEND_MIN};

/// A numeric view of an inbound argument. Integers are always raw values;
/// floats may be normalized.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Numeric {
    Int(i64),
    Float(f64),
}

/// Turns a user-typed argument into a typed OSC argument. The first parse that
/// succeeds wins: int, then float, then the string itself.
pub fn coerce(raw: &str) -> OscType {
    let raw = raw.trim();
    if let Ok(value) = raw.parse::<i32>() {
        return OscType::Int(value);
    }
    if let Ok(value) = raw.parse::<i64>() {
        return OscType::Long(value);
    }
    match raw.parse::<f32>() {
        Ok(value) if value.is_finite() => OscType::Float(value),
        _ => OscType::String(raw.to_string()),
    }
}

pub fn numeric(arg: &OscType) -> Option<Numeric> {
    match arg {
        OscType::Int(v) => Some(Numeric::Int(i64::from(*v))),
        OscType::Long(v) => Some(Numeric::Int(*v)),
        OscType::Float(v) if v.is_finite() => Some(Numeric::Float(f64::from(*v))),
        OscType::Double(v) if v.is_finite() => Some(Numeric::Float(*v)),
        OscType::Bool(v) => Some(Numeric::Int(i64::from(*v))),
        OscType::String(s) => match coerce(s) {
            OscType::String(_) => None,
            other => numeric(&other),
        },
        _ => None,
    }
}

/// Floats at or below 1.0 are normalized and scaled to 0..=127; anything
/// larger is taken as already being in MIDI range and only clamped.
pub fn scale_to_data(value: f64) -> u8 {
    let max = f64::from(MAX_DATA_VALUE);
    let scaled = if value <= 1.0 { value * max } else { value };
    scaled.round().clamp(0.0, max) as u8
}

pub fn data_byte(arg: &OscType) -> Result<u8> {
    match numeric(arg) {
        Some(Numeric::Int(v)) => Ok(v.clamp(0, i64::from(MAX_DATA_VALUE)) as u8),
        Some(Numeric::Float(v)) => Ok(scale_to_data(v)),
        None => Err(BridgeError::parse(format!("expected a number, got {arg:?}"))),
    }
}

/// Pitch bend has its own signed range. Floats within -1.0..=1.0 are
/// normalized bends; larger magnitudes and integers are raw.
pub fn pitch_bend(arg: &OscType) -> Result<i16> {
    let (min, max) = (i64::from(PITCH_BEND_MIN), i64::from(PITCH_BEND_MAX));
    match numeric(arg) {
        Some(Numeric::Int(v)) => Ok(v.clamp(min, max) as i16),
        Some(Numeric::Float(v)) if v.abs() <= 1.0 => {
            Ok((v * f64::from(PITCH_BEND_MAX)).round() as i16)
        }
        Some(Numeric::Float(v)) => Ok(v.round().clamp(min as f64, max as f64) as i16),
        None => Err(BridgeError::parse(format!("expected a number, got {arg:?}"))),
    }
}

pub fn seconds(arg: &OscType) -> Result<f64> {
    match numeric(arg) {
        Some(Numeric::Int(v)) => Ok(v as f64),
        Some(Numeric::Float(v)) => Ok(v),
        None => Err(BridgeError::parse(format!("expected seconds, got {arg:?}"))),
    }
}

pub fn require(args: &[OscType], arity: usize, what: &str) -> Result<()> {
    if args.len() < arity {
        return Err(BridgeError::parse(format!(
            "{what} needs {arity} argument(s), got {}",
            args.len()
        )));
    }
    Ok(())
}

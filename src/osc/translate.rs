//! Pure mappings between performance events and OSC messages.
//!
//! Outbound, live input gets the full message shape (a value echo after notes
//! and controllers). Playback is an output-only stream and sends only the
//! primary message for each event.

use rosc::{OscMessage, OscType};

use super::address::{AddressTable, OutboundKey};
use super::args::{data_byte, pitch_bend, require};
use super::dispatch::EventKind;
use crate::error::{BridgeError, Result};
use crate::events::{EventSource, MAX_DATA_VALUE, PerformanceEvent, check_channel};

/// Channel used by the generic message, which names its kind explicitly.
pub const GENERIC_CHANNEL: u8 = 1;

fn message(addr: String, arg: OscType) -> OscMessage {
    OscMessage {
        addr,
        args: vec![arg],
    }
}

pub fn outbound(
    table: &AddressTable,
    event: &PerformanceEvent,
    source: EventSource,
) -> Vec<OscMessage> {
    let live = source == EventSource::Live;
    let ch = event.channel();
    let mut messages = Vec::with_capacity(2);
    match *event {
        PerformanceEvent::NoteOn { note, velocity, .. } => {
            messages.push(message(
                table.outbound_for(OutboundKey::Note, ch),
                OscType::Int(i32::from(note)),
            ));
            if live {
                messages.push(message(
                    table.outbound_for(OutboundKey::NoteVelocity, ch),
                    OscType::Int(i32::from(velocity)),
                ));
            }
        }
        PerformanceEvent::NoteOff { note, .. } => {
            messages.push(message(
                table.outbound_for(OutboundKey::NoteOff, ch),
                OscType::Int(i32::from(note)),
            ));
            if live {
                messages.push(message(
                    table.outbound_for(OutboundKey::NoteOffValue, ch),
                    OscType::Int(0),
                ));
            }
        }
        PerformanceEvent::ControlChange { control, value, .. } => {
            messages.push(message(
                table.outbound_for(OutboundKey::Cc, ch),
                OscType::Int(i32::from(control)),
            ));
            if live {
                messages.push(message(
                    table.outbound_for(OutboundKey::CcValue, ch),
                    OscType::Float(f32::from(value) / f32::from(MAX_DATA_VALUE)),
                ));
            }
        }
        PerformanceEvent::PitchBend { value, .. } => {
            messages.push(message(
                table.outbound_for(OutboundKey::Pitch, ch),
                OscType::Int(i32::from(value)),
            ));
        }
        PerformanceEvent::Aftertouch { value, .. } => {
            messages.push(message(
                table.outbound_for(OutboundKey::After, ch),
                OscType::Int(i32::from(value)),
            ));
        }
    }
    messages
}

/// Builds the event for a per-channel inbound address. Arity is strict: a
/// missing argument is an error, never a default.
pub fn inbound(kind: EventKind, channel: u8, args: &[OscType]) -> Result<PerformanceEvent> {
    let channel = check_channel(channel)?;
    let event = match kind {
        EventKind::NoteOn => {
            require(args, 2, "note on")?;
            let note = data_byte(&args[0])?;
            let velocity = data_byte(&args[1])?;
            if velocity == 0 {
                PerformanceEvent::NoteOff { channel, note }
            } else {
                PerformanceEvent::NoteOn {
                    channel,
                    note,
                    velocity,
                }
            }
        }
        EventKind::NoteOff => {
            require(args, 2, "note off")?;
            PerformanceEvent::NoteOff {
                channel,
                note: data_byte(&args[0])?,
            }
        }
        EventKind::ControlChange => {
            require(args, 2, "control change")?;
            PerformanceEvent::ControlChange {
                channel,
                control: data_byte(&args[0])?,
                value: data_byte(&args[1])?,
            }
        }
        EventKind::PitchBend => {
            require(args, 1, "pitch bend")?;
            PerformanceEvent::PitchBend {
                channel,
                value: pitch_bend(&args[0])?,
            }
        }
        EventKind::Aftertouch => {
            require(args, 1, "aftertouch")?;
            PerformanceEvent::Aftertouch {
                channel,
                value: data_byte(&args[0])?,
            }
        }
    };
    Ok(event)
}

pub fn kind_from_name(name: &str) -> Option<EventKind> {
    match name.to_ascii_lowercase().as_str() {
        "note" | "noteon" | "note_on" => Some(EventKind::NoteOn),
        "noteoff" | "note_off" => Some(EventKind::NoteOff),
        "cc" | "control_change" => Some(EventKind::ControlChange),
        "pitch" | "pitchwheel" | "pitch_bend" => Some(EventKind::PitchBend),
        "after" | "aftertouch" | "pressure" => Some(EventKind::Aftertouch),
        _ => None,
    }
}

/// `<generic> kind arg...`: the kind travels as the first argument and the
/// event lands on [`GENERIC_CHANNEL`].
pub fn inbound_generic(args: &[OscType]) -> Result<PerformanceEvent> {
    let (first, rest) = args
        .split_first()
        .ok_or_else(|| BridgeError::parse("generic message without a kind"))?;
    let OscType::String(name) = first else {
        return Err(BridgeError::parse(format!(
            "generic message kind must be a string, got {first:?}"
        )));
    };
    let kind = kind_from_name(name)
        .ok_or_else(|| BridgeError::parse(format!("unknown generic kind '{name}'")))?;
    inbound(kind, GENERIC_CHANNEL, rest)
}

use midly::live::LiveEvent;
use midly::num::{u4, u7};
use midly::{MidiMessage, PitchBend};

use crate::error::{BridgeError, Result};

pub const CHANNEL_COUNT: u8 = 16;
pub const MAX_DATA_VALUE: u8 = 127;
pub const PITCH_BEND_MIN: i16 = -8192;
pub const PITCH_BEND_MAX: i16 = 8191;

/// A channel voice message. Channels are 1-based (1..=16) everywhere in this
/// crate; only the MIDI byte codec converts to the 0-based wire nibble.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PerformanceEvent {
    NoteOn { channel: u8, note: u8, velocity: u8 },
    NoteOff { channel: u8, note: u8 },
    ControlChange { channel: u8, control: u8, value: u8 },
    /// Signed bend, centre 0, range -8192..=8191.
    PitchBend { channel: u8, value: i16 },
    Aftertouch { channel: u8, value: u8 },
}

/// Where an event came from. Playback is an output-only stream and gets a
/// reduced outbound message set.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventSource {
    Live,
    Playback,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimedEvent {
    pub offset_ticks: u64,
    pub event: PerformanceEvent,
}

pub fn check_channel(channel: u8) -> Result<u8> {
    if (1..=CHANNEL_COUNT).contains(&channel) {
        Ok(channel)
    } else {
        Err(BridgeError::validation(format!(
            "channel {channel}, expected 1..={CHANNEL_COUNT}"
        )))
    }
}

impl PerformanceEvent {
    pub fn channel(&self) -> u8 {
        match *self {
            PerformanceEvent::NoteOn { channel, .. }
            | PerformanceEvent::NoteOff { channel, .. }
            | PerformanceEvent::ControlChange { channel, .. }
            | PerformanceEvent::PitchBend { channel, .. }
            | PerformanceEvent::Aftertouch { channel, .. } => channel,
        }
    }

    /// Maps a decoded MIDI channel message onto a performance event. Program
    /// changes and polyphonic pressure have no counterpart and yield `None`.
    pub fn from_midi(channel: u4, message: MidiMessage) -> Option<Self> {
        let channel = channel.as_int() + 1;
        match message {
            MidiMessage::NoteOn { key, vel } if vel.as_int() == 0 => {
                Some(PerformanceEvent::NoteOff {
                    channel,
                    note: key.as_int(),
                })
            }
            MidiMessage::NoteOn { key, vel } => Some(PerformanceEvent::NoteOn {
                channel,
                note: key.as_int(),
                velocity: vel.as_int(),
            }),
            MidiMessage::NoteOff { key, .. } => Some(PerformanceEvent::NoteOff {
                channel,
                note: key.as_int(),
            }),
            MidiMessage::Controller { controller, value } => {
                Some(PerformanceEvent::ControlChange {
                    channel,
                    control: controller.as_int(),
                    value: value.as_int(),
                })
            }
            MidiMessage::PitchBend { bend } => Some(PerformanceEvent::PitchBend {
                channel,
                value: bend.as_int(),
            }),
            MidiMessage::ChannelAftertouch { vel } => Some(PerformanceEvent::Aftertouch {
                channel,
                value: vel.as_int(),
            }),
            MidiMessage::Aftertouch { .. } | MidiMessage::ProgramChange { .. } => None,
        }
    }

    pub fn from_midi_bytes(bytes: &[u8]) -> Option<Self> {
        match LiveEvent::parse(bytes) {
            Ok(LiveEvent::Midi { channel, message }) => Self::from_midi(channel, message),
            _ => None,
        }
    }

    pub fn to_midi_message(&self) -> (u4, MidiMessage) {
        let wire_channel = |channel: u8| u4::from_int_lossy(channel.saturating_sub(1));
        match *self {
            PerformanceEvent::NoteOn {
                channel,
                note,
                velocity,
            } => (
                wire_channel(channel),
                MidiMessage::NoteOn {
                    key: u7::from_int_lossy(note),
                    vel: u7::from_int_lossy(velocity),
                },
            ),
            PerformanceEvent::NoteOff { channel, note } => (
                wire_channel(channel),
                MidiMessage::NoteOff {
                    key: u7::from_int_lossy(note),
                    vel: u7::from_int_lossy(0),
                },
            ),
            PerformanceEvent::ControlChange {
                channel,
                control,
                value,
            } => (
                wire_channel(channel),
                MidiMessage::Controller {
                    controller: u7::from_int_lossy(control),
                    value: u7::from_int_lossy(value),
                },
            ),
            PerformanceEvent::PitchBend { channel, value } => (
                wire_channel(channel),
                MidiMessage::PitchBend {
                    bend: PitchBend::from_int(value.clamp(PITCH_BEND_MIN, PITCH_BEND_MAX)),
                },
            ),
            PerformanceEvent::Aftertouch { channel, value } => (
                wire_channel(channel),
                MidiMessage::ChannelAftertouch {
                    vel: u7::from_int_lossy(value),
                },
            ),
        }
    }

    pub fn to_midi_bytes(&self) -> Result<Vec<u8>> {
        let (channel, message) = self.to_midi_message();
        let mut bytes = Vec::with_capacity(3);
        LiveEvent::Midi { channel, message }.write_std(&mut bytes)?;
        Ok(bytes)
    }
}

use std::fs;
use std::path::Path;

use midly::{MetaMessage, Smf, Timing, TrackEventKind};

use crate::error::{BridgeError, Result};
use crate::events::{PerformanceEvent, TimedEvent};

/// Tempo assumed when a file carries no tempo event (500000 us per beat).
pub const DEFAULT_BPM: f64 = 120.0;

/// One loaded file: every channel event from every track merged onto a single
/// tick timeline. Immutable once built.
#[derive(Debug, Clone)]
pub struct Track {
    name: String,
    events: Vec<TimedEvent>,
    ticks_per_beat: u16,
    default_bpm: f64,
}

impl Track {
    /// Events are stably sorted by offset, so equal offsets keep source order.
    pub fn from_events(
        name: impl Into<String>,
        ticks_per_beat: u16,
        default_bpm: f64,
        mut events: Vec<TimedEvent>,
    ) -> Result<Self> {
        let name = name.into();
        if ticks_per_beat == 0 {
            return Err(BridgeError::parse(format!("{name}: ticks per beat is zero")));
        }
        if !(default_bpm.is_finite() && default_bpm > 0.0) {
            return Err(BridgeError::parse(format!("{name}: tempo {default_bpm}")));
        }
        events.sort_by_key(|e| e.offset_ticks);
        Ok(Self {
            name,
            events,
            ticks_per_beat,
            default_bpm,
        })
    }

    pub fn load(path: &Path) -> Result<Self> {
        let bytes = fs::read(path)?;
        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| path.display().to_string());
        Self::parse(name, &bytes)
    }

    pub fn parse(name: impl Into<String>, bytes: &[u8]) -> Result<Self> {
        let name = name.into();
        let smf = Smf::parse(bytes).map_err(|e| BridgeError::parse(format!("{name}: {e}")))?;

        let ticks_per_beat = match smf.header.timing {
            Timing::Metrical(ticks) => ticks.as_int(),
            Timing::Timecode(..) => {
                return Err(BridgeError::parse(format!(
                    "{name}: timecode-based files are not supported"
                )));
            }
        };

        let mut default_bpm = None;
        let mut events = Vec::new();
        for track in &smf.tracks {
            let mut offset_ticks: u64 = 0;
            for event in track {
                offset_ticks += u64::from(event.delta.as_int());
                match event.kind {
                    TrackEventKind::Meta(MetaMessage::Tempo(us_per_beat)) => {
                        let us = us_per_beat.as_int();
                        if default_bpm.is_none() && us > 0 {
                            default_bpm = Some(60_000_000.0 / f64::from(us));
                        }
                    }
                    TrackEventKind::Midi { channel, message } => {
                        if let Some(event) = PerformanceEvent::from_midi(channel, message) {
                            events.push(TimedEvent {
                                offset_ticks,
                                event,
                            });
                        }
                    }
                    _ => {}
                }
            }
        }

        Self::from_events(
            name,
            ticks_per_beat,
            default_bpm.unwrap_or(DEFAULT_BPM),
            events,
        )
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn events(&self) -> &[TimedEvent] {
        &self.events
    }

    pub fn ticks_per_beat(&self) -> u16 {
        self.ticks_per_beat
    }

    pub fn default_bpm(&self) -> f64 {
        self.default_bpm
    }
}

pub fn is_track_file(path: &Path) -> bool {
    path.extension()
        .and_then(|ext| ext.to_str())
        .is_some_and(|ext| ext.eq_ignore_ascii_case("mid") || ext.eq_ignore_ascii_case("midi"))
}

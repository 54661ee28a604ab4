mod alarm;
mod note_off;
mod scheduler;
mod sync;
mod tempo;
mod track;
mod transport;

pub use alarm::{ALARM_TICK, Alarm, AlarmScheduler};
pub use note_off::{DEFAULT_NOTE_OFF_DELAY, MAX_NOTE_OFF_DELAY, NoteOffTimer};
pub use scheduler::PlaybackScheduler;
pub use sync::{SyncClock, sync_bpm, sync_interval};
pub use tempo::{MAX_BPM, MIN_BPM, PULSE_WINDOW, SMOOTHING_ALPHA, TempoState, TempoTracker, playback_delay};
pub use track::{DEFAULT_BPM, Track, is_track_file};
pub use transport::{
    Advance, PAUSE_POLL, Playlist, RunToken, TransportController, TransportState, TransportStatus,
};

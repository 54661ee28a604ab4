use std::collections::VecDeque;
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use tracing::{debug, info};

use crate::error::{BridgeError, Result};

pub const PULSE_WINDOW: usize = 4;
pub const SMOOTHING_ALPHA: f64 = 0.2;
pub const MIN_BPM: f64 = 1.0;
pub const MAX_BPM: f64 = 420.0;

/// Real time between two events `delta_ticks` apart. The event is timed at the
/// track's native rate, then scaled by `track_bpm / user_bpm`.
pub fn playback_delay(delta_ticks: u64, ticks_per_beat: u16, track_bpm: f64, user_bpm: f64) -> Duration {
    if delta_ticks == 0 || ticks_per_beat == 0 {
        return Duration::ZERO;
    }
    let track_bpm = track_bpm.clamp(MIN_BPM, MAX_BPM);
    let user_bpm = user_bpm.clamp(MIN_BPM, MAX_BPM);
    let native = (delta_ticks as f64 / f64::from(ticks_per_beat)) * (60.0 / track_bpm);
    Duration::from_secs_f64(native * (track_bpm / user_bpm))
}

#[derive(Debug, Clone, PartialEq)]
pub struct TempoState {
    pub locked: bool,
    pub ignore_external: bool,
    pub default_bpm: f64,
    pub current_bpm: f64,
    pub smoothed_bpm: f64,
    pub pulses: VecDeque<Instant>,
}

impl Default for TempoState {
    fn default() -> Self {
        Self {
            locked: false,
            ignore_external: true,
            default_bpm: 120.0,
            current_bpm: 120.0,
            smoothed_bpm: 120.0,
            pulses: VecDeque::with_capacity(PULSE_WINDOW + 1),
        }
    }
}

/// Owns the user tempo and derives it from external timing pulses. Shared
/// between the inbound handler (writer) and the scheduler/observers (readers)
/// behind a short lock.
#[derive(Debug, Default)]
pub struct TempoTracker {
    state: Mutex<TempoState>,
}

impl TempoTracker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn snapshot(&self) -> TempoState {
        self.state.lock().clone()
    }

    pub fn current_bpm(&self) -> f64 {
        self.state.lock().current_bpm
    }

    pub fn smoothed_bpm(&self) -> f64 {
        self.state.lock().smoothed_bpm
    }

    pub fn set_user_bpm(&self, bpm: f64) -> Result<f64> {
        if !bpm.is_finite() {
            return Err(BridgeError::validation(format!("tempo {bpm}")));
        }
        let mut state = self.state.lock();
        if state.locked {
            return Err(BridgeError::state("tempo is locked"));
        }
        let bpm = bpm.clamp(MIN_BPM, MAX_BPM);
        state.current_bpm = bpm;
        state.smoothed_bpm = bpm;
        info!(bpm, "user tempo set");
        Ok(bpm)
    }

    pub fn set_locked(&self, locked: bool) {
        self.state.lock().locked = locked;
        info!(locked, "tempo lock changed");
    }

    pub fn set_ignore_external(&self, ignore: bool) {
        let mut state = self.state.lock();
        state.ignore_external = ignore;
        state.pulses.clear();
        info!(ignore, "external tempo ignore changed");
    }

    pub fn toggle_ignore_external(&self) -> bool {
        let ignore = !self.state.lock().ignore_external;
        self.set_ignore_external(ignore);
        ignore
    }

    pub fn reset(&self) -> f64 {
        let mut state = self.state.lock();
        let bpm = state.default_bpm.round().clamp(MIN_BPM, MAX_BPM);
        state.current_bpm = bpm;
        state.smoothed_bpm = bpm;
        state.pulses.clear();
        info!(bpm, "tempo reset to track default");
        bpm
    }

    pub fn adopt_track_tempo(&self, track_bpm: f64) -> Option<f64> {
        let mut state = self.state.lock();
        if state.locked {
            debug!(track_bpm, "tempo locked, keeping {}", state.current_bpm);
            return None;
        }
        let bpm = track_bpm.round().clamp(MIN_BPM, MAX_BPM);
        state.default_bpm = bpm;
        state.current_bpm = bpm;
        state.smoothed_bpm = bpm;
        info!(bpm, "track tempo adopted");
        Some(bpm)
    }

    /// Records a timing pulse. Once the window is full the mean interval gives
    /// a raw tempo that is folded into the EMA; the rounded result becomes the
    /// user tempo and is returned.
    pub fn pulse(&self, at: Instant) -> Result<Option<f64>> {
        let mut state = self.state.lock();
        if state.locked || state.ignore_external {
            return Err(BridgeError::state("external tempo is locked or ignored"));
        }
        state.pulses.push_back(at);
        while state.pulses.len() > PULSE_WINDOW {
            state.pulses.pop_front();
        }
        if state.pulses.len() < PULSE_WINDOW {
            return Ok(None);
        }

        let (first, last) = match (state.pulses.front(), state.pulses.back()) {
            (Some(first), Some(last)) => (*first, *last),
            _ => return Ok(None),
        };
        let mean_interval =
            last.saturating_duration_since(first).as_secs_f64() / (PULSE_WINDOW - 1) as f64;
        if mean_interval <= 0.0 {
            return Ok(None);
        }

        let estimate = (60.0 / mean_interval).min(MAX_BPM);
        state.smoothed_bpm =
            SMOOTHING_ALPHA * estimate + (1.0 - SMOOTHING_ALPHA) * state.smoothed_bpm;
        state.current_bpm = state.smoothed_bpm.round().clamp(MIN_BPM, MAX_BPM);
        debug!(estimate, smoothed = state.smoothed_bpm, "tempo pulse");
        Ok(Some(state.current_bpm))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn listening() -> TempoTracker {
        let tempo = TempoTracker::new();
        tempo.set_ignore_external(false);
        tempo
    }

    #[test]
    fn delay_scales_inversely_with_user_tempo() {
        // one beat at 120 BPM
        let native = playback_delay(480, 480, 120.0, 120.0);
        assert_eq!(native, Duration::from_millis(500));
        for user in [30.0, 60.0, 90.0, 240.0, 333.0] {
            let scaled = playback_delay(480, 480, 120.0, user).as_secs_f64();
            let expected = native.as_secs_f64() * 120.0 / user;
            assert!((scaled - expected).abs() < 1e-6, "{user}: {scaled} vs {expected}");
        }
    }

    #[test]
    fn delay_clamps_user_tempo() {
        assert_eq!(
            playback_delay(480, 480, 120.0, 0.0),
            playback_delay(480, 480, 120.0, 1.0)
        );
        assert_eq!(playback_delay(480, 480, 120.0, -5.0), Duration::from_secs(60));
        assert_eq!(playback_delay(0, 480, 120.0, 120.0), Duration::ZERO);
    }

    #[test]
    fn pulses_converge_toward_interval_tempo() {
        let tempo = listening();
        let base = Instant::now();
        let interval = Duration::from_millis(250);
        let target = 240.0;
        let mut previous_gap = f64::MAX;
        for i in 0..20u32 {
            let result = tempo.pulse(base + interval * i).unwrap();
            if i < 3 {
                assert_eq!(result, None);
                continue;
            }
            let gap = (tempo.smoothed_bpm() - target).abs();
            assert!(gap < previous_gap, "pulse {i}: {gap} !< {previous_gap}");
            previous_gap = gap;
        }
        assert!(previous_gap < 5.0);
    }

    #[test]
    fn ignored_or_locked_pulses_are_rejected() {
        let tempo = TempoTracker::new();
        assert!(tempo.pulse(Instant::now()).is_err());
        tempo.set_ignore_external(false);
        tempo.set_locked(true);
        assert!(tempo.pulse(Instant::now()).is_err());
        assert!(tempo.set_user_bpm(90.0).is_err());
        assert_eq!(tempo.adopt_track_tempo(90.0), None);
        assert_eq!(tempo.current_bpm(), 120.0);
    }

    #[test]
    fn track_tempo_is_rounded_and_reset_restores_it() {
        let tempo = TempoTracker::new();
        assert_eq!(tempo.adopt_track_tempo(99.6), Some(100.0));
        tempo.set_user_bpm(140.0).unwrap();
        assert_eq!(tempo.reset(), 100.0);
        assert_eq!(tempo.smoothed_bpm(), 100.0);
        assert_eq!(tempo.set_user_bpm(0.25).unwrap(), MIN_BPM);
    }

    #[test]
    fn tempo_is_capped_from_every_source() {
        let tempo = listening();
        assert_eq!(tempo.set_user_bpm(1.0e9).unwrap(), MAX_BPM);
        assert_eq!(tempo.smoothed_bpm(), MAX_BPM);
        assert_eq!(tempo.adopt_track_tempo(5000.0), Some(MAX_BPM));
        assert_eq!(tempo.reset(), MAX_BPM);

        let base = Instant::now();
        for i in 0..50u32 {
            tempo.pulse(base + Duration::from_micros(10) * i).unwrap();
        }
        assert_eq!(tempo.current_bpm(), MAX_BPM);
        assert!(tempo.smoothed_bpm() <= MAX_BPM);
        assert_eq!(
            playback_delay(480, 480, 120.0, 1.0e9),
            playback_delay(480, 480, 120.0, MAX_BPM)
        );
    }
}

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Duration;

use parking_lot::Mutex;
use rand::seq::SliceRandom;
use tracing::{info, warn};

use super::Track;
use crate::error::{BridgeError, Result};

/// How often a paused scheduler looks for resume or stop.
pub const PAUSE_POLL: Duration = Duration::from_millis(100);
const NO_JUMP: usize = usize::MAX;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransportState {
    Stopped,
    Playing,
    Paused,
}

/// Tracks in load order plus the order playback follows. `current` is always a
/// permutation of `original`.
#[derive(Debug, Default, Clone)]
pub struct Playlist {
    original: Vec<Arc<Track>>,
    current: Vec<Arc<Track>>,
}

impl Playlist {
    pub fn push(&mut self, track: Arc<Track>) {
        self.original.push(track.clone());
        self.current.push(track);
    }

    pub fn clear(&mut self) {
        self.original.clear();
        self.current.clear();
    }

    pub fn len(&self) -> usize {
        self.current.len()
    }

    pub fn is_empty(&self) -> bool {
        self.current.is_empty()
    }

    pub fn get(&self, index: usize) -> Option<&Arc<Track>> {
        self.current.get(index)
    }

    pub fn shuffle(&mut self) {
        self.current.shuffle(&mut rand::rng());
    }

    pub fn restore(&mut self) {
        self.current = self.original.clone();
    }

    pub fn names(&self) -> Vec<String> {
        self.current.iter().map(|t| t.name().to_string()).collect()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransportStatus {
    pub state: TransportState,
    pub index: usize,
    pub len: usize,
    pub looping: bool,
    pub shuffled: bool,
    pub track: Option<String>,
}

/// What the scheduler should do once a track has ended or been interrupted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Advance {
    Continue,
    Finished,
    /// Stop was requested, or a newer run replaced this one.
    Stopped,
}

/// Identifies one Play() run. A scheduler thread from an earlier run sees its
/// token go stale and unwinds even if playback was restarted meanwhile.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RunToken(u64);

#[derive(Debug)]
struct Inner {
    state: TransportState,
    playlist: Playlist,
    index: usize,
    looping: bool,
    shuffled: bool,
    run: u64,
}

/// Edge-triggered requests, consumed by the scheduler. Kept as independent
/// flags so concurrent requests are never lost to each other.
#[derive(Debug)]
struct Signals {
    skip: AtomicBool,
    back: AtomicBool,
    previous: AtomicBool,
    jump: AtomicUsize,
}

impl Signals {
    fn clear(&self) {
        self.skip.store(false, Ordering::Release);
        self.back.store(false, Ordering::Release);
        self.previous.store(false, Ordering::Release);
        self.jump.store(NO_JUMP, Ordering::Release);
    }

    fn any(&self) -> bool {
        self.skip.load(Ordering::Acquire)
            || self.back.load(Ordering::Acquire)
            || self.previous.load(Ordering::Acquire)
            || self.jump.load(Ordering::Acquire) != NO_JUMP
    }
}

struct Shared {
    inner: Mutex<Inner>,
    signals: Signals,
}

/// The playlist state machine. Cheap to clone; every clone drives the same
/// transport. Control methods return `Err` with a reason instead of acting
/// when the request does not fit the current state.
#[derive(Clone)]
pub struct TransportController {
    shared: Arc<Shared>,
}

impl Default for TransportController {
    fn default() -> Self {
        Self::new()
    }
}

impl TransportController {
    pub fn new() -> Self {
        Self {
            shared: Arc::new(Shared {
                inner: Mutex::new(Inner {
                    state: TransportState::Stopped,
                    playlist: Playlist::default(),
                    index: 0,
                    looping: true,
                    shuffled: false,
                    run: 0,
                }),
                signals: Signals {
                    skip: AtomicBool::new(false),
                    back: AtomicBool::new(false),
                    previous: AtomicBool::new(false),
                    jump: AtomicUsize::new(NO_JUMP),
                },
            }),
        }
    }

    pub fn state(&self) -> TransportState {
        self.shared.inner.lock().state
    }

    pub fn current_index(&self) -> usize {
        self.shared.inner.lock().index
    }

    pub fn len(&self) -> usize {
        self.shared.inner.lock().playlist.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn playlist(&self) -> Playlist {
        self.shared.inner.lock().playlist.clone()
    }

    pub fn status(&self) -> TransportStatus {
        let inner = self.shared.inner.lock();
        TransportStatus {
            state: inner.state,
            index: inner.index,
            len: inner.playlist.len(),
            looping: inner.looping,
            shuffled: inner.shuffled,
            track: inner
                .playlist
                .get(inner.index)
                .map(|t| t.name().to_string()),
        }
    }

    pub fn load(&self, track: Arc<Track>) -> usize {
        let mut inner = self.shared.inner.lock();
        info!(track = track.name(), "track loaded");
        inner.playlist.push(track);
        inner.playlist.len()
    }

    pub fn unload_all(&self) -> Result<()> {
        let mut inner = self.shared.inner.lock();
        if inner.state != TransportState::Stopped {
            return Err(BridgeError::state("stop playback before unloading the playlist"));
        }
        inner.playlist.clear();
        inner.index = 0;
        info!("playlist unloaded");
        Ok(())
    }

    /// Stopped -> Playing at index 0. The caller starts the scheduler run with
    /// the returned token.
    pub fn begin(&self) -> Result<RunToken> {
        let mut inner = self.shared.inner.lock();
        if inner.state != TransportState::Stopped {
            return Err(BridgeError::state("playback already running"));
        }
        if inner.playlist.is_empty() {
            return Err(BridgeError::state("no tracks loaded"));
        }
        self.shared.signals.clear();
        inner.state = TransportState::Playing;
        inner.index = 0;
        inner.run += 1;
        info!("playback started");
        Ok(RunToken(inner.run))
    }

    pub fn stop(&self) -> Result<()> {
        let mut inner = self.shared.inner.lock();
        if inner.state == TransportState::Stopped {
            return Err(BridgeError::state("stop requested but playback is not running"));
        }
        inner.state = TransportState::Stopped;
        self.shared.signals.clear();
        info!("playback stopped");
        Ok(())
    }

    pub fn pause(&self) -> Result<()> {
        let mut inner = self.shared.inner.lock();
        if inner.state != TransportState::Playing {
            return Err(BridgeError::state("pause is only valid while playing"));
        }
        inner.state = TransportState::Paused;
        info!("playback paused");
        Ok(())
    }

    pub fn resume(&self) -> Result<()> {
        let mut inner = self.shared.inner.lock();
        if inner.state != TransportState::Paused {
            return Err(BridgeError::state("resume is only valid while paused"));
        }
        inner.state = TransportState::Playing;
        info!("playback resumed");
        Ok(())
    }

    fn require_active(inner: &Inner, action: &str) -> Result<()> {
        if inner.state == TransportState::Stopped {
            return Err(BridgeError::state(format!(
                "{action} requested but playback is not running"
            )));
        }
        Ok(())
    }

    pub fn skip(&self) -> Result<()> {
        let inner = self.shared.inner.lock();
        Self::require_active(&inner, "skip")?;
        self.shared.signals.skip.store(true, Ordering::Release);
        info!("skip requested");
        Ok(())
    }

    /// Replay the current track from tick 0.
    pub fn back(&self) -> Result<()> {
        let inner = self.shared.inner.lock();
        Self::require_active(&inner, "back")?;
        self.shared.signals.back.store(true, Ordering::Release);
        info!("back requested");
        Ok(())
    }

    pub fn previous(&self) -> Result<()> {
        let inner = self.shared.inner.lock();
        Self::require_active(&inner, "previous")?;
        if inner.index == 0 {
            return Err(BridgeError::state("already at the first track"));
        }
        self.shared.signals.previous.store(true, Ordering::Release);
        info!("previous requested");
        Ok(())
    }

    pub fn jump_to(&self, position: usize) -> Result<()> {
        let inner = self.shared.inner.lock();
        Self::require_active(&inner, "jump")?;
        let len = inner.playlist.len();
        if position == 0 || position > len {
            warn!(position, len, "jump target out of range");
            return Err(BridgeError::validation(format!(
                "track number {position}, expected 1..={len}"
            )));
        }
        self.shared.signals.jump.store(position - 1, Ordering::Release);
        info!(position, "jump requested");
        Ok(())
    }

    pub fn set_looping(&self, looping: bool) {
        self.shared.inner.lock().looping = looping;
        info!(looping, "looping changed");
    }

    pub fn toggle_looping(&self) -> bool {
        let mut inner = self.shared.inner.lock();
        inner.looping = !inner.looping;
        info!(looping = inner.looping, "looping changed");
        inner.looping
    }

    /// Flips shuffle. On: the play order is permuted; off: load order returns.
    /// Either way the index goes back to 0.
    pub fn toggle_shuffle(&self) -> Result<bool> {
        let mut inner = self.shared.inner.lock();
        if inner.shuffled {
            inner.shuffled = false;
            inner.playlist.restore();
            inner.index = 0;
            info!("playlist order restored");
            return Ok(false);
        }
        if inner.playlist.len() <= 1 {
            return Err(BridgeError::state("not enough tracks to shuffle"));
        }
        inner.shuffled = true;
        inner.playlist.shuffle();
        inner.index = 0;
        info!("playlist shuffled");
        Ok(true)
    }

    pub(crate) fn is_active(&self, run: RunToken) -> bool {
        let inner = self.shared.inner.lock();
        inner.run == run.0 && inner.state != TransportState::Stopped
    }

    pub(crate) fn should_break(&self, run: RunToken) -> bool {
        !self.is_active(run) || self.shared.signals.any()
    }

    /// Blocks while paused, polling so that stop is still seen promptly.
    /// Returns whether any waiting happened.
    pub(crate) fn wait_while_paused(&self, run: RunToken) -> bool {
        let mut waited = false;
        loop {
            {
                let inner = self.shared.inner.lock();
                if inner.run != run.0 || inner.state != TransportState::Paused {
                    return waited;
                }
            }
            waited = true;
            std::thread::sleep(PAUSE_POLL);
        }
    }

    pub(crate) fn current_track(&self, run: RunToken) -> Option<(usize, Arc<Track>)> {
        let inner = self.shared.inner.lock();
        if inner.run != run.0 || inner.state == TransportState::Stopped {
            return None;
        }
        inner
            .playlist
            .get(inner.index)
            .map(|track| (inner.index, track.clone()))
    }

    /// Consumes pending requests in priority order Previous > Back > JumpTo,
    /// falling back to the end-of-track advance (which is also what Skip
    /// leads to).
    pub(crate) fn advance(&self, run: RunToken) -> Advance {
        let mut inner = self.shared.inner.lock();
        if inner.run != run.0 || inner.state == TransportState::Stopped {
            return Advance::Stopped;
        }
        let signals = &self.shared.signals;
        let len = inner.playlist.len();

        if signals.previous.swap(false, Ordering::AcqRel) {
            inner.index = inner.index.saturating_sub(1);
            info!(index = inner.index, "going to previous track");
            return Advance::Continue;
        }
        if signals.back.swap(false, Ordering::AcqRel) {
            info!(index = inner.index, "replaying current track");
            return Advance::Continue;
        }
        let jump = signals.jump.swap(NO_JUMP, Ordering::AcqRel);
        if jump != NO_JUMP {
            if jump < len {
                inner.index = jump;
                info!(position = jump + 1, "jumping to track");
            } else {
                warn!(position = jump + 1, len, "jump target no longer exists");
            }
            return Advance::Continue;
        }
        signals.skip.store(false, Ordering::Release);

        if len == 0 {
            return Advance::Finished;
        }
        if inner.looping && inner.index >= len - 1 {
            if inner.shuffled && len > 1 {
                inner.playlist.shuffle();
                info!("playlist reshuffled for looping");
            }
            inner.index = 0;
            info!("looping, restarting playlist");
            return Advance::Continue;
        }
        inner.index += 1;
        if inner.index >= len {
            inner.index = len - 1;
            return Advance::Finished;
        }
        Advance::Continue
    }

    /// Ends a run that played out. Returns false if it had already been
    /// stopped or replaced.
    pub(crate) fn finish(&self, run: RunToken) -> bool {
        let mut inner = self.shared.inner.lock();
        if inner.run != run.0 || inner.state == TransportState::Stopped {
            return false;
        }
        inner.state = TransportState::Stopped;
        self.shared.signals.clear();
        info!("playback finished");
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn track(name: &str) -> Arc<Track> {
        Arc::new(Track::from_events(name, 480, 120.0, Vec::new()).unwrap())
    }

    fn loaded(names: &[&str]) -> TransportController {
        let transport = TransportController::new();
        for name in names {
            transport.load(track(name));
        }
        transport
    }

    #[test]
    fn play_needs_tracks_and_only_starts_once() {
        let transport = TransportController::new();
        assert!(transport.begin().is_err());
        transport.load(track("a"));
        transport.begin().unwrap();
        assert_eq!(transport.state(), TransportState::Playing);
        assert!(transport.begin().is_err());
    }

    #[test]
    fn controls_are_refused_while_stopped() {
        let transport = loaded(&["a", "b"]);
        assert!(transport.pause().is_err());
        assert!(transport.resume().is_err());
        assert!(transport.skip().is_err());
        assert!(transport.back().is_err());
        assert!(transport.stop().is_err());
        assert_eq!(transport.state(), TransportState::Stopped);
    }

    #[test]
    fn pause_and_resume_only_from_matching_state() {
        let transport = loaded(&["a"]);
        transport.begin().unwrap();
        assert!(transport.resume().is_err());
        transport.pause().unwrap();
        assert!(transport.pause().is_err());
        assert_eq!(transport.state(), TransportState::Paused);
        transport.resume().unwrap();
        assert_eq!(transport.state(), TransportState::Playing);
    }

    #[test]
    fn previous_at_first_track_is_a_no_op() {
        let transport = loaded(&["a", "b", "c"]);
        let run = transport.begin().unwrap();
        assert!(transport.previous().is_err());
        assert!(!transport.should_break(run));
        assert_eq!(transport.current_index(), 0);
    }

    #[test]
    fn jump_out_of_range_is_rejected() {
        let transport = loaded(&["a", "b", "c"]);
        let run = transport.begin().unwrap();
        assert!(matches!(transport.jump_to(0), Err(BridgeError::Validation(_))));
        assert!(transport.jump_to(4).is_err());
        assert!(!transport.should_break(run));
        assert_eq!(transport.current_index(), 0);

        transport.jump_to(3).unwrap();
        assert!(transport.should_break(run));
        assert_eq!(transport.advance(run), Advance::Continue);
        assert_eq!(transport.current_index(), 2);
    }

    #[test]
    fn previous_outranks_back_and_jump() {
        let transport = loaded(&["a", "b", "c", "d"]);
        let run = transport.begin().unwrap();
        transport.jump_to(3).unwrap();
        assert_eq!(transport.advance(run), Advance::Continue);
        assert_eq!(transport.current_index(), 2);

        transport.jump_to(4).unwrap();
        transport.back().unwrap();
        transport.previous().unwrap();
        assert_eq!(transport.advance(run), Advance::Continue);
        assert_eq!(transport.current_index(), 1);
        // back was still pending and replays track 2
        assert_eq!(transport.advance(run), Advance::Continue);
        assert_eq!(transport.current_index(), 1);
        // then the jump
        assert_eq!(transport.advance(run), Advance::Continue);
        assert_eq!(transport.current_index(), 3);
    }

    #[test]
    fn skip_takes_natural_advance_and_end_finishes() {
        let transport = loaded(&["a", "b"]);
        transport.set_looping(false);
        let run = transport.begin().unwrap();
        transport.skip().unwrap();
        assert!(transport.should_break(run));
        assert_eq!(transport.advance(run), Advance::Continue);
        assert!(!transport.should_break(run));
        assert_eq!(transport.current_index(), 1);
        assert_eq!(transport.advance(run), Advance::Finished);
        assert!(transport.finish(run));
        assert_eq!(transport.state(), TransportState::Stopped);
    }

    #[test]
    fn looping_shuffle_wraps_to_a_permutation() {
        let names = ["a", "b", "c", "d", "e"];
        let transport = loaded(&names);
        transport.set_looping(true);
        assert!(transport.toggle_shuffle().unwrap());
        let run = transport.begin().unwrap();
        for _ in 0..names.len() - 1 {
            assert_eq!(transport.advance(run), Advance::Continue);
        }
        assert_eq!(transport.current_index(), names.len() - 1);
        assert_eq!(transport.advance(run), Advance::Continue);
        assert_eq!(transport.current_index(), 0);

        let mut order = transport.playlist().names();
        order.sort();
        assert_eq!(order, names);
    }

    #[test]
    fn shuffle_off_restores_load_order() {
        let transport = loaded(&["a", "b", "c"]);
        transport.toggle_shuffle().unwrap();
        assert!(!transport.toggle_shuffle().unwrap());
        assert_eq!(transport.playlist().names(), ["a", "b", "c"]);
        assert_eq!(transport.current_index(), 0);
    }

    #[test]
    fn shuffle_needs_two_tracks() {
        let transport = loaded(&["solo"]);
        assert!(transport.toggle_shuffle().is_err());
        assert!(!transport.status().shuffled);
    }

    #[test]
    fn stop_clears_signals_and_stales_the_run() {
        let transport = loaded(&["a", "b"]);
        let run = transport.begin().unwrap();
        transport.skip().unwrap();
        transport.stop().unwrap();
        assert!(!transport.is_active(run));
        assert_eq!(transport.advance(run), Advance::Stopped);

        let next = transport.begin().unwrap();
        assert!(!transport.should_break(next));
        assert!(!transport.is_active(run));
    }

    #[test]
    fn unload_only_while_stopped() {
        let transport = loaded(&["a"]);
        transport.begin().unwrap();
        assert!(transport.unload_all().is_err());
        transport.stop().unwrap();
        transport.unload_all().unwrap();
        assert!(transport.is_empty());
    }
}

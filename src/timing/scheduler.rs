use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use crossbeam::channel::Sender;
use tracing::{debug, info};

use super::tempo::{TempoTracker, playback_delay};
use super::transport::{Advance, RunToken, TransportController, TransportState};
use super::Track;
use crate::bridge::BridgeUpdate;
use crate::error::Result;
use crate::events::{EventSource, PerformanceEvent};
use crate::osc::{AddressBook, OscOutbox, outbound};

const SLEEP_SLICE: Duration = Duration::from_millis(10);

/// Replays the playlist on its own thread, one run per Play(). Events are
/// spaced by their tick deltas scaled to the current user tempo and sent out
/// as playback-sourced OSC.
#[derive(Clone)]
pub struct PlaybackScheduler {
    transport: TransportController,
    tempo: Arc<TempoTracker>,
    addresses: Arc<AddressBook>,
    outbox: OscOutbox,
    updates: Sender<BridgeUpdate>,
}

impl PlaybackScheduler {
    pub fn new(
        transport: TransportController,
        tempo: Arc<TempoTracker>,
        addresses: Arc<AddressBook>,
        outbox: OscOutbox,
        updates: Sender<BridgeUpdate>,
    ) -> Self {
        Self {
            transport,
            tempo,
            addresses,
            outbox,
            updates,
        }
    }

    pub fn start(&self) -> Result<JoinHandle<()>> {
        let run = self.transport.begin()?;
        let _ = self.updates.send(BridgeUpdate::Transport {
            state: TransportState::Playing,
        });
        let scheduler = self.clone();
        let spawned = std::thread::Builder::new()
            .name("playback".into())
            .spawn(move || scheduler.run(run));
        match spawned {
            Ok(handle) => Ok(handle),
            Err(e) => {
                self.transport.finish(run);
                Err(e.into())
            }
        }
    }

    fn run(&self, run: RunToken) {
        while let Some((index, track)) = self.transport.current_track(run) {
            info!(index, track = track.name(), "playing track");
            let _ = self.updates.send(BridgeUpdate::TrackStarted {
                index,
                name: track.name().to_string(),
            });
            if let Some(bpm) = self.tempo.adopt_track_tempo(track.default_bpm()) {
                let _ = self.updates.send(BridgeUpdate::Tempo { bpm });
            }

            self.play_track(run, &track);

            match self.transport.advance(run) {
                Advance::Continue => continue,
                Advance::Finished => break,
                Advance::Stopped => return,
            }
        }

        if self.transport.finish(run) {
            let _ = self.updates.send(BridgeUpdate::PlaybackFinished);
            let _ = self.updates.send(BridgeUpdate::Transport {
                state: TransportState::Stopped,
            });
        }
    }

    fn play_track(&self, run: RunToken, track: &Track) {
        let mut previous_offset = 0;
        let mut due = Instant::now();

        for timed in track.events() {
            if self.transport.should_break(run) {
                debug!(track = track.name(), "track interrupted");
                return;
            }
            if self.transport.wait_while_paused(run) {
                due = Instant::now();
                if self.transport.should_break(run) {
                    return;
                }
            }

            let delta = timed.offset_ticks.saturating_sub(previous_offset);
            previous_offset = timed.offset_ticks;
            due += playback_delay(
                delta,
                track.ticks_per_beat(),
                track.default_bpm(),
                self.tempo.current_bpm(),
            );
            if !self.sleep_until(run, &mut due) {
                return;
            }
            self.emit(&timed.event);
        }
    }

    /// Sleeps in short slices so that stop and track changes cut a long gap
    /// short. Time spent paused mid-gap pushes the deadline back. Returns false
    /// when interrupted.
    fn sleep_until(&self, run: RunToken, due: &mut Instant) -> bool {
        loop {
            let paused_at = Instant::now();
            if self.transport.wait_while_paused(run) {
                *due += paused_at.elapsed();
            }
            if self.transport.should_break(run) {
                return false;
            }
            let now = Instant::now();
            if now >= *due {
                return true;
            }
            std::thread::sleep((*due - now).min(SLEEP_SLICE));
        }
    }

    fn emit(&self, event: &PerformanceEvent) {
        let snapshot = self.addresses.load();
        for message in outbound(&snapshot.table, event, EventSource::Playback) {
            debug!(addr = %message.addr, "playback");
            self.outbox.post(message);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::TimedEvent;
    use crate::osc::AddressTable;
    use crossbeam::channel::Receiver;
    use rosc::{OscMessage, OscType};

    fn note(offset_ticks: u64, note: u8) -> TimedEvent {
        TimedEvent {
            offset_ticks,
            event: PerformanceEvent::NoteOn {
                channel: 1,
                note,
                velocity: 100,
            },
        }
    }

    struct Rig {
        transport: TransportController,
        tempo: Arc<TempoTracker>,
        scheduler: PlaybackScheduler,
        out: Receiver<OscMessage>,
        updates: Receiver<BridgeUpdate>,
    }

    fn rig(tracks: Vec<Track>) -> Rig {
        let transport = TransportController::new();
        for track in tracks {
            transport.load(Arc::new(track));
        }
        let tempo = Arc::new(TempoTracker::new());
        let addresses = Arc::new(AddressBook::new(AddressTable::default()).unwrap());
        let (outbox, out) = OscOutbox::bounded(64);
        let (update_tx, updates) = crossbeam::channel::unbounded();
        let scheduler = PlaybackScheduler::new(
            transport.clone(),
            tempo.clone(),
            addresses,
            outbox,
            update_tx,
        );
        Rig {
            transport,
            tempo,
            scheduler,
            out,
            updates,
        }
    }

    fn note_arg(message: &OscMessage) -> i32 {
        match message.args.first() {
            Some(OscType::Int(n)) => *n,
            other => panic!("unexpected args {other:?}"),
        }
    }

    #[test]
    fn events_are_spaced_by_scaled_tick_deltas() {
        let track = Track::from_events("t", 480, 120.0, vec![note(0, 60), note(240, 62)]).unwrap();
        let rig = rig(vec![track]);
        rig.transport.set_looping(false);

        let handle = rig.scheduler.start().unwrap();
        let first = rig.out.recv_timeout(Duration::from_secs(1)).unwrap();
        let t0 = Instant::now();
        let second = rig.out.recv_timeout(Duration::from_secs(2)).unwrap();
        let gap = t0.elapsed().as_secs_f64();
        handle.join().unwrap();

        assert_eq!((note_arg(&first), note_arg(&second)), (60, 62));
        // half a beat at 120 BPM
        assert!((gap - 0.25).abs() < 0.06, "gap {gap}");
        assert_eq!(rig.transport.state(), TransportState::Stopped);
        assert!(rig.updates.try_iter().any(|u| u == BridgeUpdate::PlaybackFinished));
    }

    #[test]
    fn pause_holds_the_gap_and_stop_unblocks_it() {
        let track = Track::from_events("t", 480, 120.0, vec![note(0, 60), note(480, 61)]).unwrap();
        let rig = rig(vec![track]);
        let handle = rig.scheduler.start().unwrap();
        rig.out.recv_timeout(Duration::from_secs(1)).unwrap();
        rig.transport.pause().unwrap();
        // the second event is due after 0.5s but is held while paused
        assert!(rig.out.recv_timeout(Duration::from_millis(800)).is_err());

        let stopped_at = Instant::now();
        rig.transport.stop().unwrap();
        handle.join().unwrap();
        assert!(stopped_at.elapsed() < Duration::from_millis(500));
        assert!(rig.out.try_recv().is_err());
        assert!(!rig.updates.try_iter().any(|u| u == BridgeUpdate::PlaybackFinished));
    }

    #[test]
    fn resume_continues_the_remaining_gap() {
        let track = Track::from_events("t", 480, 120.0, vec![note(0, 60), note(480, 61)]).unwrap();
        let rig = rig(vec![track]);
        rig.transport.set_looping(false);
        let handle = rig.scheduler.start().unwrap();
        rig.out.recv_timeout(Duration::from_secs(1)).unwrap();
        let t0 = Instant::now();
        rig.transport.pause().unwrap();
        std::thread::sleep(Duration::from_millis(300));
        rig.transport.resume().unwrap();
        let second = rig.out.recv_timeout(Duration::from_secs(2)).unwrap();
        let gap = t0.elapsed().as_secs_f64();
        handle.join().unwrap();
        assert_eq!(note_arg(&second), 61);
        // 0.5s gap plus roughly 0.3s paused, give or take one poll
        assert!(gap > 0.7 && gap < 1.0, "gap {gap}");
    }

    #[test]
    fn skip_moves_to_the_next_track() {
        let long = Track::from_events("long", 480, 120.0, vec![note(0, 1), note(48_000, 2)]).unwrap();
        let short = Track::from_events("short", 480, 120.0, vec![note(0, 3)]).unwrap();
        let rig = rig(vec![long, short]);
        rig.transport.set_looping(false);
        let handle = rig.scheduler.start().unwrap();
        assert_eq!(note_arg(&rig.out.recv_timeout(Duration::from_secs(1)).unwrap()), 1);
        rig.transport.skip().unwrap();
        assert_eq!(note_arg(&rig.out.recv_timeout(Duration::from_secs(1)).unwrap()), 3);
        handle.join().unwrap();
        assert_eq!(rig.transport.state(), TransportState::Stopped);
    }

    fn two_long_tracks() -> Rig {
        let first = Track::from_events("first", 480, 120.0, vec![note(0, 1), note(48_000, 2)]).unwrap();
        let second = Track::from_events("second", 480, 120.0, vec![note(0, 3), note(48_000, 4)]).unwrap();
        rig(vec![first, second])
    }

    fn next_note(rig: &Rig) -> i32 {
        note_arg(&rig.out.recv_timeout(Duration::from_secs(1)).unwrap())
    }

    fn started(rig: &Rig) -> Vec<usize> {
        rig.updates
            .try_iter()
            .filter_map(|u| match u {
                BridgeUpdate::TrackStarted { index, .. } => Some(index),
                _ => None,
            })
            .collect()
    }

    #[test]
    fn back_replays_the_current_track_from_its_start() {
        let rig = two_long_tracks();
        let handle = rig.scheduler.start().unwrap();
        assert_eq!(next_note(&rig), 1);
        rig.transport.back().unwrap();
        assert_eq!(next_note(&rig), 1);
        assert_eq!(rig.transport.current_index(), 0);

        rig.transport.stop().unwrap();
        handle.join().unwrap();
        assert_eq!(started(&rig), vec![0, 0]);
    }

    #[test]
    fn previous_restarts_the_prior_track() {
        let rig = two_long_tracks();
        let handle = rig.scheduler.start().unwrap();
        assert_eq!(next_note(&rig), 1);
        rig.transport.skip().unwrap();
        assert_eq!(next_note(&rig), 3);
        rig.transport.previous().unwrap();
        assert_eq!(next_note(&rig), 1);
        assert!(rig.out.recv_timeout(Duration::from_millis(200)).is_err());

        rig.transport.stop().unwrap();
        handle.join().unwrap();
        assert_eq!(started(&rig), vec![0, 1, 0]);
    }

    #[test]
    fn jump_starts_the_chosen_track() {
        let rig = two_long_tracks();
        let handle = rig.scheduler.start().unwrap();
        assert_eq!(next_note(&rig), 1);
        rig.transport.jump_to(2).unwrap();
        assert_eq!(next_note(&rig), 3);
        rig.transport.jump_to(1).unwrap();
        assert_eq!(next_note(&rig), 1);

        rig.transport.stop().unwrap();
        handle.join().unwrap();
        assert_eq!(started(&rig), vec![0, 1, 0]);
        assert!(rig.out.try_recv().is_err());
    }

    #[test]
    fn track_tempo_is_adopted_unless_locked() {
        let track = Track::from_events("t", 480, 90.4, vec![note(0, 60)]).unwrap();
        let rig = rig(vec![track]);
        rig.transport.set_looping(false);
        rig.scheduler.start().unwrap().join().unwrap();
        assert_eq!(rig.tempo.current_bpm(), 90.0);
        assert!(rig
            .updates
            .try_iter()
            .any(|u| u == BridgeUpdate::Tempo { bpm: 90.0 }));
    }
}

use std::fs;
use std::path::Path;
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Instant;

use chrono::{DateTime, Utc};
use crossbeam::channel::{Receiver, Sender};
use parking_lot::Mutex;
use rosc::{OscMessage, OscPacket};
use tracing::{debug, info, warn};

use crate::device::MidiSink;
use crate::error::{BridgeError, Result};
use crate::events::{EventSource, PerformanceEvent};
use crate::osc::{
    AddressBook, AddressKey, AddressTable, OscListener, OscOutbox, Route, inbound,
    inbound_generic, outbound, seconds,
};
use crate::timing::{
    Alarm, AlarmScheduler, NoteOffTimer, PlaybackScheduler, SyncClock, TempoTracker, Track,
    TransportController, TransportState, TransportStatus, is_track_file,
};

#[derive(Debug, Clone, PartialEq)]
pub enum BridgeUpdate {
    Transport { state: TransportState },
    TrackStarted { index: usize, name: String },
    Tempo { bpm: f64 },
    PlaybackFinished,
    AddressesChanged { table: AddressTable },
    NoteOffDelay { seconds: f64 },
    AlarmFired { address: String },
    Error { message: String },
}

#[derive(Debug, Clone, PartialEq)]
pub struct BridgeStatus {
    pub transport: TransportStatus,
    pub bpm: f64,
    pub smoothed_bpm: f64,
    pub tempo_locked: bool,
    pub ignore_external_tempo: bool,
    pub note_off_delay_secs: f64,
    pub sync: bool,
    pub listening: Option<u16>,
    pub alarms: usize,
}

/// Wires the transport, tempo, address book, timers and network together and
/// exposes the control surface. Every control method reports failure as a
/// `BridgeError` and leaves state unchanged when it refuses.
pub struct Bridge {
    transport: TransportController,
    tempo: Arc<TempoTracker>,
    addresses: Arc<AddressBook>,
    outbox: OscOutbox,
    midi_out: Arc<dyn MidiSink>,
    note_off: NoteOffTimer,
    alarms: Arc<AlarmScheduler>,
    sync: SyncClock,
    scheduler: PlaybackScheduler,
    playback: Mutex<Option<JoinHandle<()>>>,
    listener: Mutex<Option<OscListener>>,
    updates: Sender<BridgeUpdate>,
}

impl Bridge {
    pub fn new(
        table: AddressTable,
        outbox: OscOutbox,
        midi_out: Arc<dyn MidiSink>,
    ) -> Result<(Arc<Self>, Receiver<BridgeUpdate>)> {
        let (updates, update_rx) = crossbeam::channel::unbounded();
        let transport = TransportController::new();
        let tempo = Arc::new(TempoTracker::new());
        let addresses = Arc::new(AddressBook::new(table)?);
        let note_off = NoteOffTimer::spawn(midi_out.clone())?;
        let alarms = Arc::new(AlarmScheduler::new());
        alarms.start(outbox.clone(), updates.clone())?;
        let sync = SyncClock::new(tempo.clone(), addresses.clone(), outbox.clone());
        let scheduler = PlaybackScheduler::new(
            transport.clone(),
            tempo.clone(),
            addresses.clone(),
            outbox.clone(),
            updates.clone(),
        );

        let bridge = Arc::new(Self {
            transport,
            tempo,
            addresses,
            outbox,
            midi_out,
            note_off,
            alarms,
            sync,
            scheduler,
            playback: Mutex::new(None),
            listener: Mutex::new(None),
            updates,
        });
        Ok((bridge, update_rx))
    }

    fn publish(&self, update: BridgeUpdate) {
        let _ = self.updates.send(update);
    }

    pub fn play(&self) -> Result<()> {
        let mut playback = self.playback.lock();
        if self.transport.state() != TransportState::Stopped {
            return Err(BridgeError::state("playback already running"));
        }
        // a stopped run exits within one poll
        if let Some(previous) = playback.take() {
            let _ = previous.join();
        }
        *playback = Some(self.scheduler.start()?);
        Ok(())
    }

    /// Also turns the sync broadcast off.
    pub fn stop(&self) -> Result<()> {
        self.transport.stop()?;
        self.sync.disable();
        self.publish(BridgeUpdate::Transport {
            state: TransportState::Stopped,
        });
        Ok(())
    }

    pub fn pause(&self) -> Result<()> {
        self.transport.pause()?;
        self.publish(BridgeUpdate::Transport {
            state: TransportState::Paused,
        });
        Ok(())
    }

    pub fn resume(&self) -> Result<()> {
        self.transport.resume()?;
        self.publish(BridgeUpdate::Transport {
            state: TransportState::Playing,
        });
        Ok(())
    }

    pub fn skip(&self) -> Result<()> {
        self.transport.skip()
    }

    pub fn back(&self) -> Result<()> {
        self.transport.back()
    }

    pub fn previous(&self) -> Result<()> {
        self.transport.previous()
    }

    pub fn jump_to(&self, position: usize) -> Result<()> {
        self.transport.jump_to(position)
    }

    pub fn set_looping(&self, looping: bool) {
        self.transport.set_looping(looping);
    }

    pub fn toggle_loop(&self) -> bool {
        self.transport.toggle_looping()
    }

    pub fn toggle_shuffle(&self) -> Result<bool> {
        self.transport.toggle_shuffle()
    }

    pub fn set_user_tempo(&self, bpm: f64) -> Result<f64> {
        let bpm = self.tempo.set_user_bpm(bpm)?;
        self.publish(BridgeUpdate::Tempo { bpm });
        Ok(bpm)
    }

    pub fn lock_tempo(&self, locked: bool) {
        self.tempo.set_locked(locked);
    }

    pub fn set_ignore_external_tempo(&self, ignore: bool) {
        self.tempo.set_ignore_external(ignore);
    }

    pub fn reset_tempo(&self) -> f64 {
        let bpm = self.tempo.reset();
        self.publish(BridgeUpdate::Tempo { bpm });
        bpm
    }

    pub fn tempo(&self) -> &TempoTracker {
        &self.tempo
    }

    pub fn set_sync(&self, enabled: bool) -> Result<()> {
        self.sync.set_enabled(enabled)
    }

    pub fn load_track(&self, path: &Path) -> Result<usize> {
        let track = Track::load(path)?;
        Ok(self.transport.load(Arc::new(track)))
    }

    /// Loads every track file in `dir` in name order. Files that fail to
    /// parse are skipped. Returns how many were loaded.
    pub fn load_folder(&self, dir: &Path) -> Result<usize> {
        let mut paths: Vec<_> = fs::read_dir(dir)?
            .filter_map(|entry| entry.ok().map(|e| e.path()))
            .filter(|path| path.is_file() && is_track_file(path))
            .collect();
        paths.sort();

        let mut loaded = 0;
        for path in paths {
            match self.load_track(&path) {
                Ok(_) => loaded += 1,
                Err(e) => warn!(path = %path.display(), error = %e, "skipping track"),
            }
        }
        info!(dir = %dir.display(), loaded, "folder loaded");
        Ok(loaded)
    }

    pub fn unload_all(&self) -> Result<()> {
        self.transport.unload_all()
    }

    pub fn transport(&self) -> &TransportController {
        &self.transport
    }

    pub fn address_table(&self) -> AddressTable {
        self.addresses.load().table.clone()
    }

    pub fn edit_address(&self, key: AddressKey, address: &str) -> Result<AddressTable> {
        let table = self.addresses.edit(key, address)?;
        info!(%key, address, "address changed");
        self.publish(BridgeUpdate::AddressesChanged {
            table: table.clone(),
        });
        Ok(table)
    }

    pub fn replace_addresses(&self, table: AddressTable) -> Result<AddressTable> {
        let table = self.addresses.replace(table)?;
        info!("address table replaced");
        self.publish(BridgeUpdate::AddressesChanged {
            table: table.clone(),
        });
        Ok(table)
    }

    pub fn set_note_off_delay(&self, seconds: f64) -> Result<()> {
        self.note_off.set_delay_secs(seconds)?;
        self.publish(BridgeUpdate::NoteOffDelay { seconds });
        Ok(())
    }

    pub fn note_off_delay_secs(&self) -> f64 {
        self.note_off.delay().as_secs_f64()
    }

    pub fn schedule_alarm(
        &self,
        deadline: DateTime<Utc>,
        address: &str,
        args: &[String],
    ) -> Result<usize> {
        self.alarms.schedule(deadline, address, args, Utc::now())
    }

    pub fn remove_alarm(&self, index: usize) -> Result<Alarm> {
        self.alarms.remove(index)
    }

    pub fn alarms(&self) -> Vec<Alarm> {
        self.alarms.list()
    }

    pub fn status(&self) -> BridgeStatus {
        let tempo = self.tempo.snapshot();
        BridgeStatus {
            transport: self.transport.status(),
            bpm: tempo.current_bpm,
            smoothed_bpm: tempo.smoothed_bpm,
            tempo_locked: tempo.locked,
            ignore_external_tempo: tempo.ignore_external,
            note_off_delay_secs: self.note_off_delay_secs(),
            sync: self.sync.is_enabled(),
            listening: self.listening_port(),
            alarms: self.alarms.len(),
        }
    }

    /// Binds the inbound port. Fails without side effects if the port is
    /// taken or a listener is already open. Returns the bound port.
    pub fn listen(self: &Arc<Self>, port: u16) -> Result<u16> {
        let mut listener = self.listener.lock();
        if let Some(open) = listener.as_ref() {
            return Err(BridgeError::state(format!(
                "already listening on port {}",
                open.port()
            )));
        }
        let bridge = Arc::downgrade(self);
        let opened = OscListener::bind(port, move |packet| {
            if let Some(bridge) = bridge.upgrade() {
                bridge.handle_packet(packet);
            }
        })?;
        let port = opened.port();
        *listener = Some(opened);
        Ok(port)
    }

    pub fn close_listener(&self) {
        let listener = self.listener.lock().take();
        if let Some(mut listener) = listener {
            listener.close();
        }
    }

    pub fn listening_port(&self) -> Option<u16> {
        self.listener.lock().as_ref().map(OscListener::port)
    }

    /// Entry point for every inbound packet; bundles are unpacked in order.
    /// A failing message is logged and reported, never propagated.
    pub fn handle_packet(&self, packet: OscPacket) {
        match packet {
            OscPacket::Message(message) => {
                if let Err(e) = self.handle_message(&message) {
                    warn!(addr = %message.addr, error = %e, "inbound message rejected");
                    self.publish(BridgeUpdate::Error {
                        message: format!("{}: {e}", message.addr),
                    });
                }
            }
            OscPacket::Bundle(bundle) => {
                for packet in bundle.content {
                    self.handle_packet(packet);
                }
            }
        }
    }

    pub fn handle_message(&self, message: &OscMessage) -> Result<()> {
        let snapshot = self.addresses.load();
        let route = snapshot
            .dispatch
            .route(&message.addr)
            .ok_or_else(|| BridgeError::validation(format!("unmapped address {}", message.addr)))?;
        debug!(addr = %message.addr, ?route, "inbound");

        match route {
            Route::Pause => self.pause(),
            Route::Play => match self.transport.state() {
                TransportState::Paused => self.resume(),
                TransportState::Stopped => self.play(),
                TransportState::Playing => Err(BridgeError::state("already playing")),
            },
            Route::Skip => self.skip(),
            Route::Back => self.back(),
            Route::Previous => self.previous(),
            Route::JumpTo(position) => self.jump_to(position),
            Route::TempoPulse => {
                match self.tempo.pulse(Instant::now()) {
                    Ok(Some(bpm)) => self.publish(BridgeUpdate::Tempo { bpm }),
                    Ok(None) => {}
                    Err(e) => debug!(error = %e, "tempo pulse ignored"),
                }
                Ok(())
            }
            Route::ToggleIgnoreTempo => {
                let ignore = self.tempo.toggle_ignore_external();
                info!(ignore, "external tempo toggled");
                Ok(())
            }
            Route::ResetTempo => {
                self.reset_tempo();
                Ok(())
            }
            Route::SetNoteOffDelay => {
                let arg = message
                    .args
                    .first()
                    .ok_or_else(|| BridgeError::parse("note-off delay needs a value"))?;
                self.set_note_off_delay(seconds(arg)?)
            }
            Route::Performance { kind, channel } => {
                let event = inbound(kind, channel, &message.args)?;
                self.deliver(event);
                Ok(())
            }
            Route::Generic => {
                let event = inbound_generic(&message.args)?;
                self.deliver(event);
                Ok(())
            }
        }
    }

    /// Sends a network-originated event to the MIDI output. NoteOns get an
    /// automatic release; an explicit NoteOff cancels it.
    fn deliver(&self, event: PerformanceEvent) {
        if let Err(e) = self.midi_out.send(&event) {
            warn!(?event, error = %e, "MIDI send failed");
            self.publish(BridgeUpdate::Error {
                message: e.to_string(),
            });
        }
        match event {
            PerformanceEvent::NoteOn { channel, note, .. } => self.note_off.arm(channel, note),
            PerformanceEvent::NoteOff { channel, note } => self.note_off.disarm(channel, note),
            _ => {}
        }
    }

    pub fn forward_live(&self, event: &PerformanceEvent) {
        let snapshot = self.addresses.load();
        for message in outbound(&snapshot.table, event, EventSource::Live) {
            debug!(addr = %message.addr, "live");
            self.outbox.post(message);
        }
    }

    pub fn shutdown(&self) {
        self.close_listener();
        if self.transport.state() != TransportState::Stopped {
            let _ = self.stop();
        }
        self.sync.disable();
        self.alarms.stop();
        self.note_off.shutdown();
        if let Some(playback) = self.playback.lock().take() {
            let _ = playback.join();
        }
        info!("bridge shut down");
    }
}

impl Drop for Bridge {
    fn drop(&mut self) {
        self.alarms.stop();
        self.sync.disable();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::RecordingSink;
    use crate::osc::InboundKey;
    use rosc::{OscBundle, OscTime, OscType};
    use std::time::Duration;

    struct Rig {
        bridge: Arc<Bridge>,
        sink: Arc<RecordingSink>,
        out: Receiver<OscMessage>,
        updates: Receiver<BridgeUpdate>,
    }

    fn rig() -> Rig {
        let sink = Arc::new(RecordingSink::new());
        let (outbox, out) = OscOutbox::bounded(256);
        let (bridge, updates) = Bridge::new(AddressTable::default(), outbox, sink.clone()).unwrap();
        Rig {
            bridge,
            sink,
            out,
            updates,
        }
    }

    fn msg(addr: &str, args: Vec<OscType>) -> OscMessage {
        OscMessage {
            addr: addr.into(),
            args,
        }
    }

    fn loaded(rig: &Rig, tracks: usize) {
        for i in 0..tracks {
            let note = crate::events::TimedEvent {
                offset_ticks: 480_000,
                event: PerformanceEvent::NoteOn {
                    channel: 1,
                    note: 60,
                    velocity: 1,
                },
            };
            let track = Track::from_events(format!("t{i}"), 480, 120.0, vec![note]).unwrap();
            rig.bridge.transport().load(Arc::new(track));
        }
    }

    #[test]
    fn inbound_cc_reaches_the_device_immediately() {
        let rig = rig();
        rig.bridge
            .handle_message(&msg("/cc3", vec![OscType::Int(10), OscType::Float(0.5)]))
            .unwrap();
        assert_eq!(
            rig.sink.events(),
            vec![PerformanceEvent::ControlChange {
                channel: 3,
                control: 10,
                value: 64
            }]
        );
    }

    #[test]
    fn inbound_note_on_is_released_automatically() {
        let rig = rig();
        rig.bridge.set_note_off_delay(0.05).unwrap();
        rig.bridge
            .handle_message(&msg("/note2", vec![OscType::Int(64), OscType::Int(100)]))
            .unwrap();
        std::thread::sleep(Duration::from_millis(250));
        assert_eq!(
            rig.sink.events(),
            vec![
                PerformanceEvent::NoteOn {
                    channel: 2,
                    note: 64,
                    velocity: 100
                },
                PerformanceEvent::NoteOff {
                    channel: 2,
                    note: 64
                },
            ]
        );
    }

    #[test]
    fn bad_messages_are_reported_and_skipped() {
        let rig = rig();
        assert!(rig.bridge.handle_message(&msg("/nowhere", vec![])).is_err());
        assert!(matches!(
            rig.bridge.handle_message(&msg("/cc3", vec![OscType::Int(10)])),
            Err(BridgeError::Parse(_))
        ));
        rig.bridge.handle_packet(OscPacket::Message(msg("/pitch17", vec![OscType::Int(0)])));
        assert!(rig.sink.events().is_empty());
        assert!(matches!(
            rig.updates.try_recv(),
            Ok(BridgeUpdate::Error { .. })
        ));
    }

    #[test]
    fn bundles_are_dispatched_in_order() {
        let rig = rig();
        let bundle = OscBundle {
            timetag: OscTime {
                seconds: 0,
                fractional: 1,
            },
            content: vec![
                OscPacket::Message(msg("/after1", vec![OscType::Int(5)])),
                OscPacket::Message(msg("/pitch1", vec![OscType::Int(-100)])),
            ],
        };
        rig.bridge.handle_packet(OscPacket::Bundle(bundle));
        assert_eq!(
            rig.sink.events(),
            vec![
                PerformanceEvent::Aftertouch {
                    channel: 1,
                    value: 5
                },
                PerformanceEvent::PitchBend {
                    channel: 1,
                    value: -100
                },
            ]
        );
    }

    #[test]
    fn play_message_starts_then_resumes() {
        let rig = rig();
        let long = Track::from_events(
            "long",
            480,
            120.0,
            vec![crate::events::TimedEvent {
                offset_ticks: 480_000,
                event: PerformanceEvent::NoteOff {
                    channel: 1,
                    note: 1,
                },
            }],
        )
        .unwrap();
        rig.bridge.transport().load(Arc::new(long));

        rig.bridge.handle_message(&msg("/play", vec![])).unwrap();
        assert_eq!(rig.bridge.transport().state(), TransportState::Playing);
        assert!(rig.bridge.handle_message(&msg("/play", vec![])).is_err());
        rig.bridge.handle_message(&msg("/pause", vec![])).unwrap();
        assert_eq!(rig.bridge.transport().state(), TransportState::Paused);
        rig.bridge.handle_message(&msg("/play", vec![])).unwrap();
        assert_eq!(rig.bridge.transport().state(), TransportState::Playing);
        rig.bridge.shutdown();
        assert_eq!(rig.bridge.transport().state(), TransportState::Stopped);
    }

    #[test]
    fn controls_while_stopped_are_refused() {
        let rig = rig();
        loaded(&rig, 2);
        assert!(rig.bridge.pause().is_err());
        assert!(rig.bridge.skip().is_err());
        assert!(rig.bridge.stop().is_err());
        assert!(rig.bridge.handle_message(&msg("/3", vec![])).is_err());
        assert_eq!(rig.bridge.transport().current_index(), 0);
    }

    #[test]
    fn tempo_messages_follow_lock_and_ignore() {
        let rig = rig();
        // ignored by default
        for _ in 0..6 {
            rig.bridge.handle_message(&msg("/bpm", vec![])).unwrap();
        }
        assert_eq!(rig.bridge.tempo().current_bpm(), 120.0);

        rig.bridge.handle_message(&msg("/bpm1", vec![])).unwrap();
        assert!(!rig.bridge.status().ignore_external_tempo);
        rig.bridge.set_user_tempo(90.0).unwrap();
        rig.bridge.handle_message(&msg("/resetbpm", vec![])).unwrap();
        assert_eq!(rig.bridge.tempo().current_bpm(), 120.0);

        rig.bridge.lock_tempo(true);
        assert!(rig.bridge.set_user_tempo(80.0).is_err());
    }

    #[test]
    fn note_off_delay_message_is_bounded() {
        let rig = rig();
        rig.bridge
            .handle_message(&msg("/notedelay", vec![OscType::Float(1.5)]))
            .unwrap();
        assert!((rig.bridge.note_off_delay_secs() - 1.5).abs() < 1e-6);
        assert!(rig
            .bridge
            .handle_message(&msg("/notedelay", vec![OscType::Float(6.0)]))
            .is_err());
        assert!(rig.bridge.handle_message(&msg("/notedelay", vec![])).is_err());
        assert!((rig.bridge.note_off_delay_secs() - 1.5).abs() < 1e-6);
    }

    #[test]
    fn edited_addresses_apply_to_the_next_message() {
        let rig = rig();
        rig.bridge
            .edit_address(AddressKey::Inbound(InboundKey::Cc), "/knob{ch}")
            .unwrap();
        assert!(rig
            .bridge
            .handle_message(&msg("/cc1", vec![OscType::Int(1), OscType::Int(2)]))
            .is_err());
        rig.bridge
            .handle_message(&msg("/knob1", vec![OscType::Int(1), OscType::Int(2)]))
            .unwrap();
        assert_eq!(rig.sink.events().len(), 1);
        assert!(rig
            .updates
            .try_iter()
            .any(|u| matches!(u, BridgeUpdate::AddressesChanged { .. })));

        assert!(rig
            .bridge
            .edit_address(AddressKey::Inbound(InboundKey::Cc), "knob{ch}")
            .is_err());
        assert_eq!(rig.bridge.address_table().inbound(InboundKey::Cc), "/knob{ch}");
    }

    #[test]
    fn loop_toggle_flips_the_reported_state() {
        let rig = rig();
        assert!(rig.bridge.status().transport.looping);
        assert!(!rig.bridge.toggle_loop());
        assert!(!rig.bridge.status().transport.looping);
        assert!(rig.bridge.toggle_loop());
    }

    #[test]
    fn replaced_table_restores_default_routes() {
        let rig = rig();
        rig.bridge
            .edit_address(AddressKey::Inbound(InboundKey::Cc), "/knob{ch}")
            .unwrap();
        let broken: AddressTable =
            serde_json::from_str(r#"{"inbound":{"pause":"pause"}}"#).unwrap();
        assert!(rig.bridge.replace_addresses(broken).is_err());
        assert_eq!(rig.bridge.address_table().inbound(InboundKey::Cc), "/knob{ch}");

        rig.bridge.replace_addresses(AddressTable::default()).unwrap();
        rig.bridge
            .handle_message(&msg("/cc1", vec![OscType::Int(1), OscType::Int(2)]))
            .unwrap();
        assert_eq!(rig.sink.events().len(), 1);
    }

    #[test]
    fn live_events_go_out_with_the_full_message_set() {
        let rig = rig();
        rig.bridge.forward_live(&PerformanceEvent::NoteOn {
            channel: 4,
            note: 62,
            velocity: 99,
        });
        let sent: Vec<_> = rig.out.try_iter().map(|m| (m.addr, m.args)).collect();
        assert_eq!(
            sent,
            vec![
                ("/ch4note".to_string(), vec![OscType::Int(62)]),
                ("/ch4nvalue".to_string(), vec![OscType::Int(99)]),
            ]
        );
    }

    #[test]
    fn listener_closes_idempotently_and_rebinds() {
        let rig = rig();
        let port = rig.bridge.listen(0).unwrap();
        assert_eq!(rig.bridge.listening_port(), Some(port));
        assert!(rig.bridge.listen(0).is_err());
        rig.bridge.close_listener();
        rig.bridge.close_listener();
        assert_eq!(rig.bridge.listening_port(), None);
        assert_eq!(rig.bridge.listen(port).unwrap(), port);
        rig.bridge.shutdown();
    }

    #[test]
    fn unload_waits_for_stop() {
        let rig = rig();
        loaded(&rig, 1);
        rig.bridge.set_looping(true);
        rig.bridge.play().unwrap();
        assert!(rig.bridge.unload_all().is_err());
        rig.bridge.stop().unwrap();
        rig.bridge.unload_all().unwrap();
        assert!(rig.bridge.transport().is_empty());
        rig.bridge.shutdown();
    }
}

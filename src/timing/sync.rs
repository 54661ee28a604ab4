use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;

use crossbeam::channel::{RecvTimeoutError, Sender};
use parking_lot::Mutex;
use rosc::{OscMessage, OscType};
use tracing::{debug, info};

use super::tempo::{MAX_BPM, MIN_BPM, TempoTracker};
use crate::error::Result;
use crate::osc::{AddressBook, OscOutbox, OutboundKey};

/// The tempo broadcast by the sync message, rounded into the tempo range.
pub fn sync_bpm(bpm: f64) -> i32 {
    bpm.round().clamp(MIN_BPM, MAX_BPM) as i32
}

pub fn sync_interval(bpm: f64) -> Duration {
    Duration::from_secs_f64(60.0 / f64::from(sync_bpm(bpm)))
}

struct Running {
    stop: Sender<()>,
    handle: JoinHandle<()>,
}

/// Broadcasts the user tempo once per beat while enabled. The tempo is read
/// again before every send, so tempo changes take effect on the next beat.
pub struct SyncClock {
    tempo: Arc<TempoTracker>,
    addresses: Arc<AddressBook>,
    outbox: OscOutbox,
    running: Mutex<Option<Running>>,
}

impl SyncClock {
    pub fn new(tempo: Arc<TempoTracker>, addresses: Arc<AddressBook>, outbox: OscOutbox) -> Self {
        Self {
            tempo,
            addresses,
            outbox,
            running: Mutex::new(None),
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.running.lock().is_some()
    }

    pub fn set_enabled(&self, enabled: bool) -> Result<()> {
        if enabled {
            self.enable()
        } else {
            self.disable();
            Ok(())
        }
    }

    pub fn enable(&self) -> Result<()> {
        let mut running = self.running.lock();
        if running.is_some() {
            return Ok(());
        }
        let (stop, stop_rx) = crossbeam::channel::bounded(1);
        let tempo = self.tempo.clone();
        let addresses = self.addresses.clone();
        let outbox = self.outbox.clone();
        let handle = std::thread::Builder::new()
            .name("sync".into())
            .spawn(move || loop {
                let bpm = tempo.current_bpm();
                let message = OscMessage {
                    addr: addresses.load().table.outbound(OutboundKey::Sync).to_string(),
                    args: vec![OscType::Int(sync_bpm(bpm))],
                };
                debug!(addr = %message.addr, bpm, "sync");
                outbox.post(message);
                match stop_rx.recv_timeout(sync_interval(bpm)) {
                    Err(RecvTimeoutError::Timeout) => {}
                    _ => break,
                }
            })?;
        *running = Some(Running { stop, handle });
        info!("sync broadcast on");
        Ok(())
    }

    pub fn disable(&self) {
        if let Some(running) = self.running.lock().take() {
            let _ = running.stop.send(());
            let _ = running.handle.join();
            info!("sync broadcast off");
        }
    }
}

impl Drop for SyncClock {
    fn drop(&mut self) {
        self.disable();
    }
}

use std::collections::HashMap;
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use crossbeam::channel::{Receiver, RecvTimeoutError, Sender};
use parking_lot::Mutex;
use tracing::{debug, info, warn};

use crate::device::MidiSink;
use crate::error::{BridgeError, Result};
use crate::events::PerformanceEvent;

pub const DEFAULT_NOTE_OFF_DELAY: Duration = Duration::from_millis(500);
pub const MAX_NOTE_OFF_DELAY: Duration = Duration::from_secs(5);

const IDLE_WAIT: Duration = Duration::from_secs(1);

#[derive(Debug, Clone, Copy)]
enum TimerCommand {
    Arm { channel: u8, note: u8 },
    Disarm { channel: u8, note: u8 },
    Shutdown,
}

/// Sends a synthetic NoteOff some time after each NoteOn. One pending timer per
/// (channel, note): arming again moves the deadline instead of adding a second
/// release.
pub struct NoteOffTimer {
    delay: Arc<Mutex<Duration>>,
    commands: Sender<TimerCommand>,
    handle: Mutex<Option<JoinHandle<()>>>,
}

impl NoteOffTimer {
    pub fn spawn(sink: Arc<dyn MidiSink>) -> Result<Self> {
        Self::with_delay(sink, DEFAULT_NOTE_OFF_DELAY)
    }

    pub fn with_delay(sink: Arc<dyn MidiSink>, delay: Duration) -> Result<Self> {
        check_delay(delay)?;
        let delay = Arc::new(Mutex::new(delay));
        let (commands, rx) = crossbeam::channel::unbounded();
        let thread_delay = delay.clone();
        let handle = std::thread::Builder::new()
            .name("note-off".into())
            .spawn(move || timer_thread(rx, thread_delay, sink))?;
        Ok(Self {
            delay,
            commands,
            handle: Mutex::new(Some(handle)),
        })
    }

    pub fn delay(&self) -> Duration {
        *self.delay.lock()
    }

    pub fn set_delay(&self, delay: Duration) -> Result<()> {
        check_delay(delay)?;
        *self.delay.lock() = delay;
        info!(delay_secs = delay.as_secs_f64(), "note-off delay set");
        Ok(())
    }

    pub fn set_delay_secs(&self, seconds: f64) -> Result<()> {
        if !seconds.is_finite() || seconds < 0.0 {
            return Err(BridgeError::validation(format!("note-off delay {seconds}s")));
        }
        self.set_delay(Duration::from_secs_f64(seconds))
    }

    pub fn arm(&self, channel: u8, note: u8) {
        let _ = self.commands.send(TimerCommand::Arm { channel, note });
    }

    /// Drops a pending release, used when the NoteOff arrives explicitly.
    pub fn disarm(&self, channel: u8, note: u8) {
        let _ = self.commands.send(TimerCommand::Disarm { channel, note });
    }

    /// Pending releases are dropped, not sent.
    pub fn shutdown(&self) {
        let _ = self.commands.send(TimerCommand::Shutdown);
        if let Some(handle) = self.handle.lock().take() {
            let _ = handle.join();
        }
    }
}

impl Drop for NoteOffTimer {
    fn drop(&mut self) {
        self.shutdown();
    }
}

fn check_delay(delay: Duration) -> Result<()> {
    if delay > MAX_NOTE_OFF_DELAY {
        return Err(BridgeError::validation(format!(
            "note-off delay {}s, expected 0 to {}s",
            delay.as_secs_f64(),
            MAX_NOTE_OFF_DELAY.as_secs()
        )));
    }
    Ok(())
}

fn timer_thread(rx: Receiver<TimerCommand>, delay: Arc<Mutex<Duration>>, sink: Arc<dyn MidiSink>) {
    let mut pending: HashMap<(u8, u8), Instant> = HashMap::new();

    loop {
        let next = pending.values().min().copied();
        let deadline = next.unwrap_or_else(|| Instant::now() + IDLE_WAIT);

        match rx.recv_deadline(deadline) {
            Ok(TimerCommand::Arm { channel, note }) => {
                let due = Instant::now() + *delay.lock();
                if pending.insert((channel, note), due).is_some() {
                    debug!(channel, note, "note-off re-armed");
                }
            }
            Ok(TimerCommand::Disarm { channel, note }) => {
                pending.remove(&(channel, note));
            }
            Ok(TimerCommand::Shutdown) | Err(RecvTimeoutError::Disconnected) => break,
            Err(RecvTimeoutError::Timeout) => {}
        }

        let now = Instant::now();
        let due: Vec<(u8, u8)> = pending
            .iter()
            .filter(|(_, at)| **at <= now)
            .map(|(key, _)| *key)
            .collect();
        for (channel, note) in due {
            pending.remove(&(channel, note));
            let event = PerformanceEvent::NoteOff { channel, note };
            match sink.send(&event) {
                Ok(()) => debug!(channel, note, "auto note-off"),
                Err(e) => warn!(channel, note, error = %e, "auto note-off dropped"),
            }
        }
    }
}

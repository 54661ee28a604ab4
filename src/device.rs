use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread::JoinHandle;
use std::time::Duration;

use midir::{MidiInput, MidiInputConnection, MidiOutput, MidiOutputConnection};
use parking_lot::Mutex;
use ringbuf::{
    HeapRb,
    traits::{Consumer, Producer, Split},
};
use tracing::{debug, error, info, warn};

use crate::error::{BridgeError, Result};
use crate::events::PerformanceEvent;

const CLIENT_NAME: &str = "patchbridge";
const INPUT_BUFFER: usize = 1024;
const DRAIN_INTERVAL: Duration = Duration::from_millis(10);

pub trait MidiSink: Send + Sync {
    fn send(&self, event: &PerformanceEvent) -> Result<()>;
}

/// Stands in for a device when none is configured: events are only logged.
#[derive(Debug, Default)]
pub struct LogSink;

impl MidiSink for LogSink {
    fn send(&self, event: &PerformanceEvent) -> Result<()> {
        debug!(?event, "no MIDI output, dropping");
        Ok(())
    }
}

#[derive(Debug, Default)]
pub struct RecordingSink {
    events: Mutex<Vec<PerformanceEvent>>,
}

impl RecordingSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<PerformanceEvent> {
        self.events.lock().clone()
    }

    pub fn take(&self) -> Vec<PerformanceEvent> {
        std::mem::take(&mut *self.events.lock())
    }
}

impl MidiSink for RecordingSink {
    fn send(&self, event: &PerformanceEvent) -> Result<()> {
        self.events.lock().push(*event);
        Ok(())
    }
}

pub fn output_ports() -> Vec<String> {
    match MidiOutput::new(CLIENT_NAME) {
        Ok(midi_out) => midi_out
            .ports()
            .iter()
            .filter_map(|port| midi_out.port_name(port).ok())
            .collect(),
        Err(e) => {
            warn!(error = %e, "cannot enumerate MIDI outputs");
            Vec::new()
        }
    }
}

pub fn input_ports() -> Vec<String> {
    match MidiInput::new(CLIENT_NAME) {
        Ok(midi_in) => midi_in
            .ports()
            .iter()
            .filter_map(|port| midi_in.port_name(port).ok())
            .collect(),
        Err(e) => {
            warn!(error = %e, "cannot enumerate MIDI inputs");
            Vec::new()
        }
    }
}

pub struct MidirSink {
    port_name: String,
    connection: Mutex<MidiOutputConnection>,
}

impl MidirSink {
    pub fn connect(name_fragment: &str) -> Result<Self> {
        let midi_out =
            MidiOutput::new(CLIENT_NAME).map_err(|e| BridgeError::Device(e.to_string()))?;
        let ports = midi_out.ports();
        let (port, port_name) = ports
            .iter()
            .find_map(|port| {
                let name = midi_out.port_name(port).ok()?;
                name.contains(name_fragment).then(|| (port.clone(), name))
            })
            .ok_or_else(|| BridgeError::Device(format!("no MIDI output matching {name_fragment:?}")))?;

        let connection = midi_out
            .connect(&port, "patchbridge-out")
            .map_err(|e| BridgeError::Device(format!("{port_name}: {e}")))?;
        info!(port = %port_name, "MIDI output connected");
        Ok(Self {
            port_name,
            connection: Mutex::new(connection),
        })
    }
}

impl MidiSink for MidirSink {
    fn send(&self, event: &PerformanceEvent) -> Result<()> {
        let bytes = event.to_midi_bytes()?;
        self.connection
            .lock()
            .send(&bytes)
            .map_err(|e| BridgeError::Device(format!("{}: {e}", self.port_name)))
    }
}

/// Live input from a midir port. The driver callback only decodes and pushes
/// into a ring buffer; a drain thread empties it every few milliseconds and
/// hands each event to the handler, so the handler may take locks or post to
/// the network without stalling the driver.
pub struct MidiInputPump {
    port_name: String,
    connection: Option<MidiInputConnection<()>>,
    running: Arc<AtomicBool>,
    drain: Option<JoinHandle<()>>,
}

impl MidiInputPump {
    pub fn open<F>(name_fragment: &str, mut handler: F) -> Result<Self>
    where
        F: FnMut(PerformanceEvent) + Send + 'static,
    {
        let midi_in =
            MidiInput::new(CLIENT_NAME).map_err(|e| BridgeError::Device(e.to_string()))?;
        let ports = midi_in.ports();
        let (port, port_name) = ports
            .iter()
            .find_map(|port| {
                let name = midi_in.port_name(port).ok()?;
                name.contains(name_fragment).then(|| (port.clone(), name))
            })
            .ok_or_else(|| BridgeError::Device(format!("no MIDI input matching {name_fragment:?}")))?;

        let (mut producer, mut consumer) = HeapRb::<PerformanceEvent>::new(INPUT_BUFFER).split();
        let connection = midi_in
            .connect(
                &port,
                "patchbridge-in",
                move |_timestamp, bytes, _| {
                    if let Some(event) = PerformanceEvent::from_midi_bytes(bytes) {
                        if producer.try_push(event).is_err() {
                            warn!("MIDI input buffer full, dropping event");
                        }
                    }
                },
                (),
            )
            .map_err(|e| BridgeError::Device(format!("{port_name}: {e}")))?;

        let running = Arc::new(AtomicBool::new(true));
        let drain_running = running.clone();
        let drain = std::thread::Builder::new()
            .name("midi-input".into())
            .spawn(move || {
                while drain_running.load(Ordering::Acquire) {
                    while let Some(event) = consumer.try_pop() {
                        handler(event);
                    }
                    std::thread::sleep(DRAIN_INTERVAL);
                }
            });
        let drain = match drain {
            Ok(handle) => handle,
            Err(e) => {
                error!(error = %e, "cannot start MIDI input thread");
                connection.close();
                return Err(e.into());
            }
        };

        info!(port = %port_name, "MIDI input connected");
        Ok(Self {
            port_name,
            connection: Some(connection),
            running,
            drain: Some(drain),
        })
    }

    pub fn close(&mut self) {
        if let Some(connection) = self.connection.take() {
            connection.close();
        }
        self.running.store(false, Ordering::Release);
        if let Some(drain) = self.drain.take() {
            let _ = drain.join();
            info!(port = %self.port_name, "MIDI input closed");
        }
    }
}

impl Drop for MidiInputPump {
    fn drop(&mut self) {
        self.close();
    }
}

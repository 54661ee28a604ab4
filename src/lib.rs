pub mod bridge;
pub mod cli;
pub mod device;
pub mod error;
pub mod events;
pub mod osc;
pub mod settings;
pub mod timing;

pub use bridge::{Bridge, BridgeStatus, BridgeUpdate};
pub use device::{LogSink, MidiInputPump, MidiSink, MidirSink, RecordingSink};
pub use error::{BridgeError, Result};
pub use events::{EventSource, PerformanceEvent, TimedEvent};
pub use settings::Settings;

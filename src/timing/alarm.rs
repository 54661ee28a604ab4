use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;

use chrono::{DateTime, Utc};
use crossbeam::channel::{RecvTimeoutError, Sender};
use parking_lot::Mutex;
use rosc::{OscMessage, OscType};
use tracing::{info, warn};

use crate::bridge::BridgeUpdate;
use crate::error::{BridgeError, Result};
use crate::osc::{OscOutbox, coerce};

pub const ALARM_TICK: Duration = Duration::from_secs(1);

#[derive(Debug, Clone, PartialEq)]
pub struct Alarm {
    pub deadline: DateTime<Utc>,
    pub address: String,
    pub args: Vec<OscType>,
    pub fired: bool,
}

impl Alarm {
    pub fn message(&self) -> OscMessage {
        OscMessage {
            addr: self.address.clone(),
            args: self.args.clone(),
        }
    }
}

struct Ticker {
    stop: Sender<()>,
    handle: JoinHandle<()>,
}

/// Alarms stay in the list after firing; only `remove` deletes them. A fired
/// alarm is never sent again, whatever the clock does afterwards.
#[derive(Default)]
pub struct AlarmScheduler {
    alarms: Mutex<Vec<Alarm>>,
    ticker: Mutex<Option<Ticker>>,
}

impl AlarmScheduler {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn schedule(
        &self,
        deadline: DateTime<Utc>,
        address: &str,
        args: &[String],
        now: DateTime<Utc>,
    ) -> Result<usize> {
        if deadline <= now {
            return Err(BridgeError::validation(format!(
                "alarm time {deadline}, it is already {now}"
            )));
        }
        if !address.starts_with('/') || address.chars().any(char::is_whitespace) {
            return Err(BridgeError::validation(format!("alarm address {address:?}")));
        }
        let alarm = Alarm {
            deadline,
            address: address.to_string(),
            args: args.iter().map(|raw| coerce(raw)).collect(),
            fired: false,
        };
        let mut alarms = self.alarms.lock();
        alarms.push(alarm);
        info!(%deadline, address, "alarm scheduled");
        Ok(alarms.len() - 1)
    }

    pub fn remove(&self, index: usize) -> Result<Alarm> {
        let mut alarms = self.alarms.lock();
        if index >= alarms.len() {
            return Err(BridgeError::validation(format!(
                "alarm index {index}, have {}",
                alarms.len()
            )));
        }
        Ok(alarms.remove(index))
    }

    pub fn list(&self) -> Vec<Alarm> {
        self.alarms.lock().clone()
    }

    pub fn len(&self) -> usize {
        self.alarms.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.alarms.lock().is_empty()
    }

    /// Marks every unfired alarm due at `now` as fired and returns its message.
    pub fn check(&self, now: DateTime<Utc>) -> Vec<OscMessage> {
        let mut alarms = self.alarms.lock();
        alarms
            .iter_mut()
            .filter(|alarm| !alarm.fired && alarm.deadline <= now)
            .map(|alarm| {
                alarm.fired = true;
                alarm.message()
            })
            .collect()
    }

    pub fn start(self: &Arc<Self>, outbox: OscOutbox, updates: Sender<BridgeUpdate>) -> Result<()> {
        let mut ticker = self.ticker.lock();
        if ticker.is_some() {
            return Ok(());
        }
        let (stop, stop_rx) = crossbeam::channel::bounded(1);
        let scheduler = self.clone();
        let handle = std::thread::Builder::new()
            .name("alarms".into())
            .spawn(move || loop {
                match stop_rx.recv_timeout(ALARM_TICK) {
                    Err(RecvTimeoutError::Timeout) => {}
                    _ => break,
                }
                for message in scheduler.check(Utc::now()) {
                    info!(addr = %message.addr, "alarm fired");
                    let address = message.addr.clone();
                    if !outbox.post(message) {
                        warn!(%address, "alarm message dropped");
                    }
                    let _ = updates.send(BridgeUpdate::AlarmFired { address });
                }
            })?;
        *ticker = Some(Ticker { stop, handle });
        Ok(())
    }

    pub fn stop(&self) {
        if let Some(ticker) = self.ticker.lock().take() {
            let _ = ticker.stop.send(());
            let _ = ticker.handle.join();
        }
    }
}

use std::collections::HashMap;
use std::sync::Arc;

use arc_swap::ArcSwap;
use parking_lot::Mutex;

use super::address::{
    AddressKey, AddressTable, CHANNEL_PLACEHOLDER, INDEX_PLACEHOLDER, InboundKey, JUMP_TARGETS,
};
use crate::error::{BridgeError, Result};
use crate::events::CHANNEL_COUNT;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventKind {
    NoteOn,
    NoteOff,
    ControlChange,
    PitchBend,
    Aftertouch,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Route {
    Pause,
    Play,
    Skip,
    Back,
    Previous,
    TempoPulse,
    ToggleIgnoreTempo,
    ResetTempo,
    JumpTo(usize),
    Performance { kind: EventKind, channel: u8 },
    Generic,
    SetNoteOffDelay,
}

/// Literal wire address -> route. Built once from an [`AddressTable`] by
/// expanding every template, so dispatch is a single hash lookup.
#[derive(Debug, Default)]
pub struct DispatchTable {
    routes: HashMap<String, Route>,
}

impl DispatchTable {
    pub fn build(table: &AddressTable) -> Result<Self> {
        let mut routes = HashMap::new();
        let mut owners: HashMap<String, InboundKey> = HashMap::new();
        let mut insert = |address: String, route: Route, key: InboundKey| -> Result<()> {
            if let Some(previous) = owners.get(&address) {
                return Err(BridgeError::validation(format!(
                    "address '{address}' is used by both {} and {}",
                    AddressKey::Inbound(*previous),
                    AddressKey::Inbound(key)
                )));
            }
            owners.insert(address.clone(), key);
            routes.insert(address, route);
            Ok(())
        };

        for key in InboundKey::ALL {
            let template = table.inbound(key);
            match key {
                InboundKey::JumpTo => {
                    for n in 1..=JUMP_TARGETS {
                        let address = template.replace(INDEX_PLACEHOLDER, &n.to_string());
                        insert(address, Route::JumpTo(n), key)?;
                    }
                }
                InboundKey::Note
                | InboundKey::NoteOff
                | InboundKey::Cc
                | InboundKey::Pitch
                | InboundKey::After => {
                    let kind = match key {
                        InboundKey::Note => EventKind::NoteOn,
                        InboundKey::NoteOff => EventKind::NoteOff,
                        InboundKey::Cc => EventKind::ControlChange,
                        InboundKey::Pitch => EventKind::PitchBend,
                        _ => EventKind::Aftertouch,
                    };
                    for channel in 1..=CHANNEL_COUNT {
                        let address = template.replace(CHANNEL_PLACEHOLDER, &channel.to_string());
                        insert(address, Route::Performance { kind, channel }, key)?;
                    }
                }
                _ => {
                    let route = match key {
                        InboundKey::Pause => Route::Pause,
                        InboundKey::Play => Route::Play,
                        InboundKey::Skip => Route::Skip,
                        InboundKey::Back => Route::Back,
                        InboundKey::Previous => Route::Previous,
                        InboundKey::Bpm => Route::TempoPulse,
                        InboundKey::BpmIgnoreToggle => Route::ToggleIgnoreTempo,
                        InboundKey::BpmReset => Route::ResetTempo,
                        InboundKey::Generic => Route::Generic,
                        _ => Route::SetNoteOffDelay,
                    };
                    insert(template.to_string(), route, key)?;
                }
            }
        }
        Ok(Self { routes })
    }

    pub fn route(&self, address: &str) -> Option<Route> {
        self.routes.get(address).copied()
    }

    pub fn len(&self) -> usize {
        self.routes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.routes.is_empty()
    }
}

/// A table together with the dispatch built from it. Published as one unit so
/// a reader never pairs an old table with a new dispatch.
#[derive(Debug)]
pub struct AddressSnapshot {
    pub table: AddressTable,
    pub dispatch: DispatchTable,
}

/// Shared, copy-on-write owner of the active addresses. Readers `load()` a
/// snapshot without blocking; edits build a complete replacement and publish it
/// with a single pointer swap.
pub struct AddressBook {
    current: ArcSwap<AddressSnapshot>,
    edit_lock: Mutex<()>,
}

impl AddressBook {
    pub fn new(table: AddressTable) -> Result<Self> {
        table.validate()?;
        let dispatch = DispatchTable::build(&table)?;
        Ok(Self {
            current: ArcSwap::from_pointee(AddressSnapshot { table, dispatch }),
            edit_lock: Mutex::new(()),
        })
    }

    pub fn load(&self) -> Arc<AddressSnapshot> {
        self.current.load_full()
    }

    /// Edits one entry and republishes. On any validation failure the active
    /// snapshot is left as it was.
    pub fn edit(&self, key: AddressKey, address: &str) -> Result<AddressTable> {
        let _guard = self.edit_lock.lock();
        let mut table = self.current.load().table.clone();
        table.set(key, address)?;
        self.publish(table)
    }

    pub fn replace(&self, table: AddressTable) -> Result<AddressTable> {
        let _guard = self.edit_lock.lock();
        table.validate()?;
        self.publish(table)
    }

    fn publish(&self, table: AddressTable) -> Result<AddressTable> {
        let dispatch = DispatchTable::build(&table)?;
        let published = table.clone();
        self.current.store(Arc::new(AddressSnapshot { table, dispatch }));
        Ok(published)
    }
}

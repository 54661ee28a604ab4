use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::{BridgeError, Result};

/// Replaced by a decimal channel number (1..=16).
pub const CHANNEL_PLACEHOLDER: &str = "{ch}";
/// Replaced by a playlist position (1..=JUMP_TARGETS).
pub const INDEX_PLACEHOLDER: &str = "{n}";
pub const JUMP_TARGETS: usize = 50;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum InboundKey {
    Pause,
    Play,
    Skip,
    Back,
    Previous,
    Bpm,
    BpmIgnoreToggle,
    BpmReset,
    JumpTo,
    Note,
    #[serde(rename = "noteoff")]
    NoteOff,
    Cc,
    Pitch,
    After,
    Generic,
    SetNoteOffDelay,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum OutboundKey {
    Sync,
    Note,
    NoteVelocity,
    #[serde(rename = "noteoff")]
    NoteOff,
    #[serde(rename = "noteoff-value")]
    NoteOffValue,
    Cc,
    CcValue,
    Pitch,
    After,
}

impl InboundKey {
    pub const ALL: [InboundKey; 16] = [
        InboundKey::Pause,
        InboundKey::Play,
        InboundKey::Skip,
        InboundKey::Back,
        InboundKey::Previous,
        InboundKey::Bpm,
        InboundKey::BpmIgnoreToggle,
        InboundKey::BpmReset,
        InboundKey::JumpTo,
        InboundKey::Note,
        InboundKey::NoteOff,
        InboundKey::Cc,
        InboundKey::Pitch,
        InboundKey::After,
        InboundKey::Generic,
        InboundKey::SetNoteOffDelay,
    ];

    pub fn name(self) -> &'static str {
        match self {
            InboundKey::Pause => "pause",
            InboundKey::Play => "play",
            InboundKey::Skip => "skip",
            InboundKey::Back => "back",
            InboundKey::Previous => "previous",
            InboundKey::Bpm => "bpm",
            InboundKey::BpmIgnoreToggle => "bpm-ignore-toggle",
            InboundKey::BpmReset => "bpm-reset",
            InboundKey::JumpTo => "jump-to",
            InboundKey::Note => "note",
            InboundKey::NoteOff => "noteoff",
            InboundKey::Cc => "cc",
            InboundKey::Pitch => "pitch",
            InboundKey::After => "after",
            InboundKey::Generic => "generic",
            InboundKey::SetNoteOffDelay => "set-note-off-delay",
        }
    }

    pub fn placeholder(self) -> Option<&'static str> {
        match self {
            InboundKey::JumpTo => Some(INDEX_PLACEHOLDER),
            InboundKey::Note
            | InboundKey::NoteOff
            | InboundKey::Cc
            | InboundKey::Pitch
            | InboundKey::After => Some(CHANNEL_PLACEHOLDER),
            _ => None,
        }
    }

    fn default_address(self) -> &'static str {
        match self {
            InboundKey::Pause => "/pause",
            InboundKey::Play => "/play",
            InboundKey::Skip => "/skip",
            InboundKey::Back => "/back",
            InboundKey::Previous => "/previous",
            InboundKey::Bpm => "/bpm",
            InboundKey::BpmIgnoreToggle => "/bpm1",
            InboundKey::BpmReset => "/resetbpm",
            InboundKey::JumpTo => "/{n}",
            InboundKey::Note => "/note{ch}",
            InboundKey::NoteOff => "/noteoff{ch}",
            InboundKey::Cc => "/cc{ch}",
            InboundKey::Pitch => "/pitch{ch}",
            InboundKey::After => "/after{ch}",
            InboundKey::Generic => "/generic",
            InboundKey::SetNoteOffDelay => "/notedelay",
        }
    }
}

impl OutboundKey {
    pub const ALL: [OutboundKey; 9] = [
        OutboundKey::Sync,
        OutboundKey::Note,
        OutboundKey::NoteVelocity,
        OutboundKey::NoteOff,
        OutboundKey::NoteOffValue,
        OutboundKey::Cc,
        OutboundKey::CcValue,
        OutboundKey::Pitch,
        OutboundKey::After,
    ];

    pub fn name(self) -> &'static str {
        match self {
            OutboundKey::Sync => "sync",
            OutboundKey::Note => "note",
            OutboundKey::NoteVelocity => "note-velocity",
            OutboundKey::NoteOff => "noteoff",
            OutboundKey::NoteOffValue => "noteoff-value",
            OutboundKey::Cc => "cc",
            OutboundKey::CcValue => "cc-value",
            OutboundKey::Pitch => "pitch",
            OutboundKey::After => "after",
        }
    }

    pub fn placeholder(self) -> Option<&'static str> {
        match self {
            OutboundKey::Sync => None,
            _ => Some(CHANNEL_PLACEHOLDER),
        }
    }

    fn default_address(self) -> &'static str {
        match self {
            OutboundKey::Sync => "/sync",
            OutboundKey::Note => "/ch{ch}note",
            OutboundKey::NoteVelocity => "/ch{ch}nvalue",
            OutboundKey::NoteOff => "/ch{ch}noteoff",
            OutboundKey::NoteOffValue => "/ch{ch}noffvalue",
            OutboundKey::Cc => "/ch{ch}cc",
            OutboundKey::CcValue => "/ch{ch}ccvalue",
            OutboundKey::Pitch => "/ch{ch}pitch",
            OutboundKey::After => "/ch{ch}pressure",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AddressKey {
    Inbound(InboundKey),
    Outbound(OutboundKey),
}

impl AddressKey {
    fn placeholder(self) -> Option<&'static str> {
        match self {
            AddressKey::Inbound(key) => key.placeholder(),
            AddressKey::Outbound(key) => key.placeholder(),
        }
    }
}

impl fmt::Display for AddressKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AddressKey::Inbound(key) => write!(f, "in:{}", key.name()),
            AddressKey::Outbound(key) => write!(f, "out:{}", key.name()),
        }
    }
}

impl FromStr for AddressKey {
    type Err = BridgeError;

    fn from_str(s: &str) -> Result<Self> {
        let unknown = || BridgeError::validation(format!("address key '{s}'"));
        let (direction, name) = s.split_once(':').ok_or_else(unknown)?;
        match direction {
            "in" => InboundKey::ALL
                .into_iter()
                .find(|key| key.name() == name)
                .map(AddressKey::Inbound)
                .ok_or_else(unknown),
            "out" => OutboundKey::ALL
                .into_iter()
                .find(|key| key.name() == name)
                .map(AddressKey::Outbound)
                .ok_or_else(unknown),
            _ => Err(unknown()),
        }
    }
}

/// The editable mapping from logical actions to wire addresses, both
/// directions. Templated entries carry a placeholder that is substituted at
/// dispatch-build or send time.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct AddressTable {
    inbound: BTreeMap<InboundKey, String>,
    outbound: BTreeMap<OutboundKey, String>,
}

impl Default for AddressTable {
    fn default() -> Self {
        Self {
            inbound: InboundKey::ALL
                .into_iter()
                .map(|key| (key, key.default_address().to_string()))
                .collect(),
            outbound: OutboundKey::ALL
                .into_iter()
                .map(|key| (key, key.default_address().to_string()))
                .collect(),
        }
    }
}

impl AddressTable {
    pub fn inbound(&self, key: InboundKey) -> &str {
        self.inbound
            .get(&key)
            .map(String::as_str)
            .unwrap_or_else(|| key.default_address())
    }

    pub fn outbound(&self, key: OutboundKey) -> &str {
        self.outbound
            .get(&key)
            .map(String::as_str)
            .unwrap_or_else(|| key.default_address())
    }

    pub fn outbound_for(&self, key: OutboundKey, channel: u8) -> String {
        self.outbound(key)
            .replace(CHANNEL_PLACEHOLDER, &channel.to_string())
    }

    pub fn get(&self, key: AddressKey) -> &str {
        match key {
            AddressKey::Inbound(key) => self.inbound(key),
            AddressKey::Outbound(key) => self.outbound(key),
        }
    }

    pub fn set(&mut self, key: AddressKey, address: &str) -> Result<()> {
        validate_entry(key, address)?;
        match key {
            AddressKey::Inbound(key) => self.inbound.insert(key, address.to_string()),
            AddressKey::Outbound(key) => self.outbound.insert(key, address.to_string()),
        };
        Ok(())
    }

    /// Re-adds any key missing from a partially written configuration.
    pub fn fill_missing(&mut self) {
        let defaults = AddressTable::default();
        for (key, address) in defaults.inbound {
            self.inbound.entry(key).or_insert(address);
        }
        for (key, address) in defaults.outbound {
            self.outbound.entry(key).or_insert(address);
        }
    }

    pub fn validate(&self) -> Result<()> {
        for key in InboundKey::ALL {
            validate_entry(AddressKey::Inbound(key), self.inbound(key))?;
        }
        for key in OutboundKey::ALL {
            validate_entry(AddressKey::Outbound(key), self.outbound(key))?;
        }
        Ok(())
    }

    pub fn describe(&self) -> Vec<String> {
        let inbound = InboundKey::ALL
            .into_iter()
            .map(|key| format!("{:<24} {}", AddressKey::Inbound(key).to_string(), self.inbound(key)));
        let outbound = OutboundKey::ALL
            .into_iter()
            .map(|key| format!("{:<24} {}", AddressKey::Outbound(key).to_string(), self.outbound(key)));
        inbound.chain(outbound).collect()
    }
}

fn validate_entry(key: AddressKey, address: &str) -> Result<()> {
    let invalid = |reason: &str| {
        BridgeError::validation(format!("address '{address}' for {key}: {reason}"))
    };
    if !address.starts_with('/') {
        return Err(invalid("must start with '/'"));
    }
    if address.chars().any(char::is_whitespace) {
        return Err(invalid("must not contain whitespace"));
    }
    match key.placeholder() {
        Some(placeholder) => {
            if address.matches(placeholder).count() != 1 {
                return Err(invalid(&format!("must contain {placeholder} exactly once")));
            }
            let rest = address.replacen(placeholder, "", 1);
            if rest.contains(['{', '}']) {
                return Err(invalid("unknown placeholder"));
            }
        }
        None => {
            if address.contains(['{', '}']) {
                return Err(invalid("placeholders are not allowed here"));
            }
        }
    }
    Ok(())
}

use std::fs;
use std::path::Path;

use serde::{Deserialize, Serialize};
use tracing::info;

use crate::error::{BridgeError, Result};
use crate::osc::AddressTable;
use crate::timing::MAX_NOTE_OFF_DELAY;

pub const DEFAULT_OSC_IN_PORT: u16 = 3330;
pub const DEFAULT_OSC_OUT_PORT: u16 = 5550;
pub const DEFAULT_OSC_OUT_HOST: &str = "127.0.0.1";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub osc_in_port: u16,
    pub osc_out_host: String,
    pub osc_out_port: u16,
    /// Substring of the MIDI input port name; `None` disables live input.
    pub midi_input: Option<String>,
    /// Substring of the MIDI output port name; `None` logs instead.
    pub midi_output: Option<String>,
    pub note_off_delay_secs: f64,
    pub addresses: AddressTable,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            osc_in_port: DEFAULT_OSC_IN_PORT,
            osc_out_host: DEFAULT_OSC_OUT_HOST.to_string(),
            osc_out_port: DEFAULT_OSC_OUT_PORT,
            midi_input: None,
            midi_output: None,
            note_off_delay_secs: 0.5,
            addresses: AddressTable::default(),
        }
    }
}

impl Settings {
    /// A missing file yields the defaults. Entries absent from an older file
    /// are filled in.
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            info!(path = %path.display(), "no settings file, using defaults");
            return Ok(Self::default());
        }
        let json = fs::read_to_string(path)?;
        let mut settings: Settings = serde_json::from_str(&json)?;
        settings.addresses.fill_missing();
        settings.validate()?;
        info!(path = %path.display(), "settings loaded");
        Ok(settings)
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        self.validate()?;
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent)?;
        }
        let json = serde_json::to_string_pretty(self)?;
        fs::write(path, json)?;
        Ok(())
    }

    pub fn validate(&self) -> Result<()> {
        if self.osc_in_port == 0 {
            return Err(BridgeError::validation("inbound port 0"));
        }
        if self.osc_out_port == 0 {
            return Err(BridgeError::validation("outbound port 0"));
        }
        if self.osc_out_host.trim().is_empty() {
            return Err(BridgeError::validation("empty outbound host"));
        }
        let delay = self.note_off_delay_secs;
        if !(0.0..=MAX_NOTE_OFF_DELAY.as_secs_f64()).contains(&delay) {
            return Err(BridgeError::validation(format!(
                "note-off delay {delay}s, expected 0..={}s",
                MAX_NOTE_OFF_DELAY.as_secs_f64()
            )));
        }
        self.addresses.validate()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::osc::{AddressKey, InboundKey};

    fn temp_path(name: &str) -> std::path::PathBuf {
        std::env::temp_dir().join(format!("patchbridge-{}-{name}", std::process::id()))
    }

    #[test]
    fn missing_file_gives_defaults() {
        let settings = Settings::load(&temp_path("absent.json")).unwrap();
        assert_eq!(settings, Settings::default());
        assert_eq!(settings.osc_in_port, 3330);
        assert_eq!(settings.osc_out_port, 5550);
    }

    #[test]
    fn save_then_load_keeps_edits() {
        let path = temp_path("saved.json");
        let mut settings = Settings::default();
        settings.osc_out_host = "10.0.0.2".into();
        settings.midi_output = Some("IAC".into());
        settings
            .addresses
            .set(AddressKey::Inbound(InboundKey::Pause), "/hold")
            .unwrap();
        settings.save(&path).unwrap();

        let loaded = Settings::load(&path).unwrap();
        let _ = fs::remove_file(&path);
        assert_eq!(loaded, settings);
        assert_eq!(loaded.addresses.inbound(InboundKey::Pause), "/hold");
    }

    #[test]
    fn partial_file_is_completed() {
        let path = temp_path("partial.json");
        fs::write(&path, r#"{"osc_in_port": 4000}"#).unwrap();
        let loaded = Settings::load(&path).unwrap();
        let _ = fs::remove_file(&path);
        assert_eq!(loaded.osc_in_port, 4000);
        assert_eq!(loaded.addresses, AddressTable::default());
    }

    #[test]
    fn bad_ports_and_hosts_are_rejected() {
        let mut settings = Settings::default();
        settings.osc_in_port = 0;
        assert!(matches!(settings.validate(), Err(BridgeError::Validation(_))));
        settings = Settings::default();
        settings.osc_out_host = " ".into();
        assert!(settings.validate().is_err());
    }

    #[test]
    fn out_of_range_note_off_delay_fails_at_load() {
        let path = temp_path("delay.json");
        fs::write(&path, r#"{"note_off_delay_secs": 9.0}"#).unwrap();
        let result = Settings::load(&path);
        let _ = fs::remove_file(&path);
        assert!(matches!(result, Err(BridgeError::Validation(_))));

        let mut settings = Settings::default();
        settings.note_off_delay_secs = -0.1;
        assert!(settings.validate().is_err());
        settings.note_off_delay_secs = 5.0;
        assert!(settings.validate().is_ok());
    }

    #[test]
    fn malformed_json_is_an_error() {
        let path = temp_path("broken.json");
        fs::write(&path, "{ not json").unwrap();
        let result = Settings::load(&path);
        let _ = fs::remove_file(&path);
        assert!(matches!(result, Err(BridgeError::Json(_))));
    }
}

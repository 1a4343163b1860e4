//! Configuration surface (spec §6).
//!
//! Options are addressed by a stable integer index rather than by name, so
//! that a persisted configuration blob stays forward-compatible: an index
//! this build doesn't recognise is skipped on read, not rejected. A small
//! set of ephemeral options are recognised in memory but never persisted.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;

/// Stable option indices. Numbering is append-only; never renumber a
/// shipped index.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[repr(u32)]
pub enum OptionIndex {
    /// Require a sign-then-verify self-check after every signature
    /// creation (spec §4.6).
    SideChannelProtection = 0,
    /// Reject SCEP `recipientNonce`/`senderNonce` values whose length is
    /// not exactly 16 bytes, instead of tolerating up to `MAX_HASHSIZE`.
    ScepStrictNonce = 1,
    /// Apply the six-pair T61 umlaut collapse quirks mode on string decode.
    T61UmlautQuirks = 2,
    /// Connect/handshake timeout, in milliseconds.
    ConnectTimeoutMs = 3,
    /// Data-transfer timeout, in milliseconds.
    DataTimeoutMs = 4,
    /// Maximum serial number size accepted, in bytes.
    MaxSerialNumberSize = 5,
}

/// A persisted option value: BOOLEAN, INTEGER, or UTF8String (spec §6).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum OptionValue {
    /// A boolean-valued option.
    Bool(bool),
    /// An integer-valued option.
    Int(i64),
    /// A string-valued option.
    Str(String),
}

/// One persisted `{ index, value }` entry, matching spec §6's
/// `SEQUENCE { INTEGER index, value }` wire shape.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OptionEntry {
    /// The raw index. Kept as `u32` (not `OptionIndex`) on the wire so
    /// unknown indices round-trip without a parse failure.
    pub index: u32,
    /// The option's value.
    pub value: OptionValue,
}

/// Application configuration: the enumerated option table plus a handful
/// of ephemeral, never-persisted flags.
#[derive(Debug, Clone)]
pub struct Config {
    options: BTreeMap<u32, OptionValue>,
    /// Ephemeral: set after any option write, cleared on save. Never
    /// persisted.
    pub config_changed: bool,
    /// Ephemeral: requests a self-test run. Never persisted.
    pub self_test_trigger: bool,
}

impl Default for Config {
    fn default() -> Self {
        let mut options = BTreeMap::new();
        options.insert(OptionIndex::SideChannelProtection as u32, OptionValue::Bool(true));
        options.insert(OptionIndex::ScepStrictNonce as u32, OptionValue::Bool(false));
        options.insert(OptionIndex::T61UmlautQuirks as u32, OptionValue::Bool(true));
        options.insert(OptionIndex::ConnectTimeoutMs as u32, OptionValue::Int(30_000));
        options.insert(OptionIndex::DataTimeoutMs as u32, OptionValue::Int(90_000));
        options.insert(OptionIndex::MaxSerialNumberSize as u32, OptionValue::Int(32));
        Self { options, config_changed: false, self_test_trigger: false }
    }
}

impl Config {
    /// Read a boolean option, defaulting to `false` if absent or mistyped.
    pub fn get_bool(&self, index: OptionIndex) -> bool {
        matches!(self.options.get(&(index as u32)), Some(OptionValue::Bool(true)))
    }

    /// Read an integer option, defaulting to `0` if absent or mistyped.
    pub fn get_int(&self, index: OptionIndex) -> i64 {
        match self.options.get(&(index as u32)) {
            Some(OptionValue::Int(v)) => *v,
            _ => 0,
        }
    }

    /// Write an option value, marking the config changed.
    pub fn set(&mut self, index: OptionIndex, value: OptionValue) {
        self.options.insert(index as u32, value);
        self.config_changed = true;
    }

    /// `true` when side-channel-protection mode requires a sign-then-verify
    /// self-check (spec §4.6).
    pub fn side_channel_protection(&self) -> bool {
        self.get_bool(OptionIndex::SideChannelProtection)
    }

    /// `true` when SCEP nonce length is strictly enforced at 16 bytes.
    pub fn scep_strict_nonce(&self) -> bool {
        self.get_bool(OptionIndex::ScepStrictNonce)
    }

    /// `true` when the T61 umlaut quirks mode is active (spec §4.2).
    pub fn t61_umlaut_quirks(&self) -> bool {
        self.get_bool(OptionIndex::T61UmlautQuirks)
    }

    /// Connect/handshake timeout.
    pub fn connect_timeout(&self) -> std::time::Duration {
        std::time::Duration::from_millis(self.get_int(OptionIndex::ConnectTimeoutMs).max(0) as u64)
    }

    /// Data-transfer timeout.
    pub fn data_timeout(&self) -> std::time::Duration {
        std::time::Duration::from_millis(self.get_int(OptionIndex::DataTimeoutMs).max(0) as u64)
    }

    /// Maximum accepted serial number size, in bytes.
    pub fn max_serial_number_size(&self) -> usize {
        self.get_int(OptionIndex::MaxSerialNumberSize).max(0) as usize
    }

    /// Serialise to the persisted `{ index, value }` sequence. Ephemeral
    /// fields are never included.
    pub fn to_entries(&self) -> Vec<OptionEntry> {
        self.options
            .iter()
            .map(|(&index, value)| OptionEntry { index, value: value.clone() })
            .collect()
    }

    /// Rebuild from a persisted entry sequence. Indices this build doesn't
    /// recognise are kept in the map (so a future version that adds the
    /// index back sees the value) but otherwise ignored by every accessor
    /// above, which only look up known `OptionIndex` values — unknown
    /// indices are effectively skipped rather than rejected.
    pub fn from_entries(entries: Vec<OptionEntry>) -> Self {
        let mut config = Config { options: BTreeMap::new(), config_changed: false, self_test_trigger: false };
        for entry in entries {
            config.options.insert(entry.index, entry.value);
        }
        config
    }

    /// Load configuration from a TOML file on disk.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path.as_ref())
            .map_err(|e| ConfigError::Io(e.to_string()))?;
        let persisted: PersistedConfig = toml::from_str(&content)
            .map_err(|e| ConfigError::Parse(e.to_string()))?;
        Ok(Self::from_entries(persisted.options))
    }

    /// Save configuration to a TOML file on disk. `config_changed` is
    /// cleared on success.
    pub fn save(&mut self, path: impl AsRef<Path>) -> Result<(), ConfigError> {
        let persisted = PersistedConfig { options: self.to_entries() };
        let content = toml::to_string_pretty(&persisted)
            .map_err(|e| ConfigError::Serialize(e.to_string()))?;
        std::fs::write(path.as_ref(), content).map_err(|e| ConfigError::Io(e.to_string()))?;
        self.config_changed = false;
        Ok(())
    }

    /// Validate cross-option constraints.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.max_serial_number_size() == 0 || self.max_serial_number_size() > 32 {
            return Err(ConfigError::Invalid(
                "max serial number size must be in 1..=32".to_string(),
            ));
        }
        if self.connect_timeout().is_zero() || self.data_timeout().is_zero() {
            return Err(ConfigError::Invalid("timeouts must be nonzero".to_string()));
        }
        Ok(())
    }
}

#[derive(Debug, Serialize, Deserialize)]
struct PersistedConfig {
    options: Vec<OptionEntry>,
}

/// Configuration errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// Underlying filesystem error.
    #[error("IO error: {0}")]
    Io(String),
    /// TOML parse error.
    #[error("parse error: {0}")]
    Parse(String),
    /// TOML serialize error.
    #[error("serialize error: {0}")]
    Serialize(String),
    /// A cross-option constraint was violated.
    #[error("invalid configuration: {0}")]
    Invalid(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_validate() {
        let config = Config::default();
        assert!(config.validate().is_ok());
        assert!(config.side_channel_protection());
        assert!(!config.scep_strict_nonce());
        assert_eq!(config.max_serial_number_size(), 32);
    }

    #[test]
    fn round_trips_through_entries() {
        let mut config = Config::default();
        config.set(OptionIndex::ScepStrictNonce, OptionValue::Bool(true));
        let entries = config.to_entries();
        let restored = Config::from_entries(entries);
        assert!(restored.scep_strict_nonce());
    }

    #[test]
    fn unknown_index_is_skipped_not_rejected() {
        let mut entries = Config::default().to_entries();
        entries.push(OptionEntry { index: 9999, value: OptionValue::Str("future".into()) });
        let restored = Config::from_entries(entries);
        assert!(restored.validate().is_ok());
    }

    #[test]
    fn ephemeral_fields_never_persist() {
        let mut config = Config::default();
        config.self_test_trigger = true;
        config.config_changed = true;
        let entries = config.to_entries();
        let restored = Config::from_entries(entries);
        assert!(!restored.config_changed);
        assert!(!restored.self_test_trigger);
    }
}

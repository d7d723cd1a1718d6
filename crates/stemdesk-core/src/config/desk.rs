//! Desk configuration
//!
//! Stored as YAML. Default location: `~/.config/stemdesk/config.yaml`

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

use crate::audio::AudioConfig;
use crate::engine::{DeskOptions, DEFAULT_JOIN_TIMEOUT};
use crate::types::DEFAULT_RETRIGGER_DIVISIONS;

/// Root configuration structure
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DeskConfig {
    /// Output device and stream settings
    pub audio: AudioConfig,
    /// Directory relative stem files are resolved against
    pub stems_dir: PathBuf,
    /// Stems to load, in channel order
    pub stems: Vec<StemEntry>,
    /// Re-alignment ticks per loop
    pub retrigger_divisions: u32,
    /// Per-instrument wait during shutdown
    pub join_timeout_ms: u64,
}

impl Default for DeskConfig {
    fn default() -> Self {
        Self {
            audio: AudioConfig::default(),
            stems_dir: PathBuf::from("stems"),
            stems: vec![
                StemEntry::new("bass", "Bass.ogg"),
                StemEntry::new("drums", "Drums.ogg"),
                StemEntry::new("guitar", "Guitar.ogg"),
                StemEntry::new("vocals", "Vocals.ogg"),
            ],
            retrigger_divisions: DEFAULT_RETRIGGER_DIVISIONS,
            join_timeout_ms: DEFAULT_JOIN_TIMEOUT.as_millis() as u64,
        }
    }
}

impl DeskConfig {
    /// Stem names paired with their resolved file paths
    ///
    /// Absolute `file` entries are kept as they are.
    pub fn stem_paths(&self) -> Vec<(String, PathBuf)> {
        self.stems
            .iter()
            .map(|stem| (stem.name.clone(), self.stems_dir.join(&stem.file)))
            .collect()
    }

    pub fn desk_options(&self) -> DeskOptions {
        DeskOptions {
            retrigger_divisions: self.retrigger_divisions.max(1),
            join_timeout: Duration::from_millis(self.join_timeout_ms),
        }
    }
}

/// One named stem
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StemEntry {
    pub name: String,
    pub file: PathBuf,
}

impl StemEntry {
    pub fn new(name: impl Into<String>, file: impl Into<PathBuf>) -> Self {
        Self {
            name: name.into(),
            file: file.into(),
        }
    }

    /// Parse a `name=path` override
    pub fn parse_override(arg: &str) -> Option<Self> {
        let (name, file) = arg.split_once('=')?;
        let name = name.trim();
        let file = file.trim();
        if name.is_empty() || file.is_empty() {
            return None;
        }
        Some(Self::new(name, file))
    }
}

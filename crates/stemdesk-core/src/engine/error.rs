//! Desk error types
//!
//! None of these are fatal: each one is local to a single stem or command
//! and is reported back to whoever issued it.

use thiserror::Error;

use crate::audio::AudioError;
use crate::audio_file::AudioFileError;

#[derive(Error, Debug)]
pub enum DeskError {
    /// A stem with this name is already on the desk
    #[error("Instrument '{0}' already exists")]
    DuplicateName(String),

    /// Every backend channel is taken
    #[error("No channels available (capacity {capacity})")]
    ChannelCapacityExceeded { capacity: usize },

    /// The stem's buffer could not be loaded; the stem is skipped
    #[error("Failed to load instrument '{name}': {source}")]
    InstrumentLoad {
        name: String,
        #[source]
        source: AudioFileError,
    },

    /// No stem with this name is on the desk
    #[error("Instrument '{0}' not found")]
    InstrumentNotFound(String),

    /// The backend refused to hand out a channel
    #[error("Channel allocation failed: {0}")]
    Channel(#[from] AudioError),

    /// The instrument thread could not be started
    #[error("Failed to start instrument thread: {0}")]
    Spawn(#[source] std::io::Error),

    /// `stop_all` already tore the desk down
    #[error("Desk has been shut down")]
    Released,
}

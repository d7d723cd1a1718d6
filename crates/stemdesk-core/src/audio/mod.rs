//! Audio backends for Stemdesk
//!
//! The desk talks to audio through the [`AudioBackend`] and
//! [`PlaybackChannel`] traits:
//!
//! - **CpalBackend**: a single cross-platform output stream that mixes a
//!   fixed number of channels. Channel handles send commands to the audio
//!   thread over lock-free SPSC queues and read busy state from atomics.
//! - **MemoryBackend**: no device at all; playback is simulated against the
//!   wall clock. Used for tests and as a fallback when no device opens.
//!
//! # Example Usage
//!
//! ```ignore
//! use stemdesk_core::audio::{AudioBackend, AudioConfig, CpalBackend};
//!
//! let backend = CpalBackend::start(&AudioConfig::default())?;
//! let buffer = backend.load(Path::new("stems/Drums.ogg"))?;
//! let mut channel = backend.channel(ChannelId(0))?;
//! channel.play(buffer.segment_from(0));
//! ```

mod backend;
mod config;
mod cpal_backend;
mod device;
mod error;
mod memory_backend;

pub use backend::{AudioBackend, PlaybackChannel};
pub use config::{AudioConfig, BufferSize, DeviceId, DEFAULT_BUFFER_SIZE, MAX_BUFFER_SIZE};
pub use cpal_backend::{CpalBackend, CpalChannel};
pub use device::{find_device_by_id, get_default_device, get_output_devices, AudioDevice};
pub use error::{AudioError, AudioResult};
pub use memory_backend::{
    ChannelProbe, MemoryBackend, MemoryChannel, PlayRecord, PLAY_HISTORY_LEN,
};

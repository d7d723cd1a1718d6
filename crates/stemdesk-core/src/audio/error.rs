//! Backend errors

use thiserror::Error;

#[derive(Error, Debug)]
pub enum AudioError {
    #[error("No audio output devices found")]
    NoDevices,

    #[error("No default audio output device")]
    NoDefaultDevice,

    /// The configured device is not attached to any host
    #[error("Audio device not found: {0}")]
    DeviceNotFound(String),

    /// The device offers no usable f32 output format
    #[error("Unsupported device configuration: {0}")]
    UnsupportedConfig(String),

    #[error("Failed to build audio stream: {0}")]
    StreamBuild(String),

    #[error("Failed to start audio stream: {0}")]
    StreamStart(String),

    #[error("Channel {id} out of range (capacity {capacity})")]
    ChannelOutOfRange { id: usize, capacity: usize },

    /// Each channel has a single owner for its whole lifetime
    #[error("Channel {0} is already in use")]
    ChannelInUse(usize),

    #[error("Audio backend has been released")]
    Released,
}

pub type AudioResult<T> = Result<T, AudioError>;

//! Audio backend configuration
//!
//! Device selection, preferred sample rate, buffer size and the number of
//! mixer channels the backend exposes to the desk.

use serde::{Deserialize, Serialize};

use crate::types::{DEFAULT_CHANNEL_COUNT, DEFAULT_SAMPLE_RATE};

/// Maximum buffer size accepted for a fixed request (frames)
pub const MAX_BUFFER_SIZE: u32 = 8192;

/// Default buffer size when no preference is specified (frames)
/// 512 frames matches the small mixer buffer stem players usually run with
pub const DEFAULT_BUFFER_SIZE: u32 = 512;

/// Preferred buffer size for audio streams
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum BufferSize {
    /// Let the backend use its default buffer size
    #[default]
    Default,
    /// Request a specific buffer size in frames (clamped to 64..=MAX_BUFFER_SIZE)
    Fixed(u32),
}

impl BufferSize {
    /// Resolve to a concrete frame count
    pub fn as_frames(&self) -> u32 {
        match self {
            BufferSize::Default => DEFAULT_BUFFER_SIZE,
            BufferSize::Fixed(frames) => (*frames).clamp(64, MAX_BUFFER_SIZE),
        }
    }

    /// Latency in milliseconds for a given sample rate
    pub fn latency_ms(&self, sample_rate: u32) -> f32 {
        (self.as_frames() as f32 / sample_rate as f32) * 1000.0
    }
}

/// Audio device identifier
///
/// Includes both the device name and the host backend (ALSA, JACK, ...)
/// so devices from different hosts can be told apart.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceId {
    /// Device name as reported by the system
    pub name: String,
    /// Audio host identifier (e.g., "ALSA", "CoreAudio"). None = any host
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub host: Option<String>,
}

impl DeviceId {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            host: None,
        }
    }

    pub fn with_host(name: &str, host: &str) -> Self {
        Self {
            name: name.to_string(),
            host: Some(host.to_string()),
        }
    }

    /// Display label that includes the host if available
    pub fn display_label(&self) -> String {
        match &self.host {
            Some(host) => format!("[{}] {}", host, self.name),
            None => self.name.clone(),
        }
    }
}

/// Configuration for the audio backend
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AudioConfig {
    /// Output device (None = system default)
    pub device: Option<DeviceId>,

    /// Sample rate to open the device at (None = DEFAULT_SAMPLE_RATE).
    /// Stems must be encoded at this rate.
    pub sample_rate: Option<u32>,

    /// Preferred buffer size
    pub buffer_size: BufferSize,

    /// Number of independent playback channels in the mixer
    pub channel_count: usize,
}

impl Default for AudioConfig {
    fn default() -> Self {
        Self {
            device: None,
            sample_rate: None,
            buffer_size: BufferSize::default(),
            channel_count: DEFAULT_CHANNEL_COUNT,
        }
    }
}

impl AudioConfig {
    /// Sample rate the backend should run at
    pub fn target_sample_rate(&self) -> u32 {
        self.sample_rate.unwrap_or(DEFAULT_SAMPLE_RATE)
    }

    pub fn with_device(mut self, device: DeviceId) -> Self {
        self.device = Some(device);
        self
    }

    pub fn with_sample_rate(mut self, rate: u32) -> Self {
        self.sample_rate = Some(rate);
        self
    }

    pub fn with_buffer_frames(mut self, frames: u32) -> Self {
        self.buffer_size = BufferSize::Fixed(frames);
        self
    }

    pub fn with_channel_count(mut self, count: usize) -> Self {
        self.channel_count = count;
        self
    }
}

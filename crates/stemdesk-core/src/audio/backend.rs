//! Backend interface used by the desk
//!
//! The desk only ever needs three things from an audio system: decode a stem
//! at the backend's rate, hand out numbered playback channels up to a fixed
//! capacity, and release everything on teardown. Each [`PlaybackChannel`]
//! plays one clip at a time.
//!
//! Two implementations exist:
//! - [`CpalBackend`](super::CpalBackend): a real output stream with a mixer
//! - [`MemoryBackend`](super::MemoryBackend): headless, wall-clock simulated

use std::path::Path;

use crate::audio_file::{load_sample_buffer, AudioFileError};
use crate::types::{ChannelId, SampleBuffer, Segment};

use super::error::AudioResult;

/// A backend output slot that plays one clip at a time
pub trait PlaybackChannel: Send {
    /// Play `segment` from its first frame, replacing whatever was loaded.
    /// A paused channel is unpaused by a new play.
    fn play(&mut self, segment: Segment);

    /// Stop and unload the current clip
    fn stop(&mut self);

    /// Hold the current clip at its position without unloading it
    fn pause(&mut self);

    /// Continue a paused clip from where it was held
    fn resume(&mut self);

    /// Whether the channel is currently producing audio
    fn is_busy(&self) -> bool;
}

/// The audio system the desk plays through
pub trait AudioBackend: Send + Sync {
    /// Output sample rate; stems must be decoded at this rate
    fn sample_rate(&self) -> u32;

    /// Number of channels this backend can hand out
    fn channel_capacity(&self) -> usize;

    /// Claim channel `id`. Each channel can be claimed once.
    fn channel(&self, id: ChannelId) -> AudioResult<Box<dyn PlaybackChannel>>;

    /// Decode a stem into a loop buffer at [`sample_rate`](Self::sample_rate)
    fn load(&self, source: &Path) -> Result<SampleBuffer, AudioFileError> {
        load_sample_buffer(source, self.sample_rate())
    }

    /// Shut the audio system down. Idempotent.
    fn release(&self);

    fn is_released(&self) -> bool;
}

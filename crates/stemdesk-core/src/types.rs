//! Common types for Stemdesk
//!
//! This module contains the fundamental audio types shared by the backends
//! and the synchronization engine: stereo samples, the immutable loop buffer
//! each instrument owns, and the rotated playback segment cut from it.

use std::fmt;
use std::time::Duration;

use basedrop::{Handle, Shared};

use crate::engine::gc::gc_handle;

/// Default sample rate (44.1kHz, the rate most stem packs ship at)
pub const DEFAULT_SAMPLE_RATE: u32 = 44100;

/// Default number of mixer channels a backend exposes
pub const DEFAULT_CHANNEL_COUNT: usize = 8;

/// Default number of re-alignment ticks per loop (one tick every quarter loop)
pub const DEFAULT_RETRIGGER_DIVISIONS: u32 = 4;

/// Audio sample type (32-bit float for processing)
pub type Sample = f32;

/// A single stereo sample (left and right channels)
#[repr(C)]
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct StereoSample {
    pub left: Sample,
    pub right: Sample,
}

impl StereoSample {
    /// Create a new stereo sample
    #[inline]
    pub fn new(left: Sample, right: Sample) -> Self {
        Self { left, right }
    }

    /// Create a silent stereo sample
    #[inline]
    pub fn silence() -> Self {
        Self::default()
    }

    /// Create a mono sample (same value in both channels)
    #[inline]
    pub fn mono(value: Sample) -> Self {
        Self { left: value, right: value }
    }

    /// Clamp both channels to [-1.0, 1.0]
    #[inline]
    pub fn clipped(&self) -> Self {
        Self {
            left: self.left.clamp(-1.0, 1.0),
            right: self.right.clamp(-1.0, 1.0),
        }
    }
}

impl std::ops::Add for StereoSample {
    type Output = Self;

    #[inline]
    fn add(self, other: Self) -> Self {
        Self {
            left: self.left + other.left,
            right: self.right + other.right,
        }
    }
}

impl std::ops::AddAssign for StereoSample {
    #[inline]
    fn add_assign(&mut self, other: Self) {
        self.left += other.left;
        self.right += other.right;
    }
}

impl std::ops::Mul<Sample> for StereoSample {
    type Output = Self;

    #[inline]
    fn mul(self, factor: Sample) -> Self {
        Self {
            left: self.left * factor,
            right: self.right * factor,
        }
    }
}

/// Identifier of a backend playback channel
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ChannelId(pub usize);

impl ChannelId {
    #[inline]
    pub fn index(&self) -> usize {
        self.0
    }
}

impl fmt::Display for ChannelId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Reasons a buffer cannot be used as a loop
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BufferError {
    /// Zero frames: no offset inside the loop exists
    Empty,
    /// Zero sample rate: elapsed time cannot be mapped to frames
    ZeroSampleRate,
}

impl fmt::Display for BufferError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BufferError::Empty => write!(f, "buffer contains no samples"),
            BufferError::ZeroSampleRate => write!(f, "sample rate is zero"),
        }
    }
}

impl std::error::Error for BufferError {}

/// Immutable loop buffer
///
/// Loaded once when an instrument is created and never modified afterwards.
/// Cloning is cheap: the frames live behind a `basedrop::Shared`, so the
/// audio thread can hold them without ever freeing them itself.
#[derive(Clone)]
pub struct SampleBuffer {
    frames: Shared<Vec<StereoSample>>,
    sample_rate: u32,
}

impl SampleBuffer {
    /// Wrap decoded frames. Rejects empty buffers and a zero sample rate.
    pub fn new(frames: Vec<StereoSample>, sample_rate: u32) -> Result<Self, BufferError> {
        Self::with_handle(frames, sample_rate, &gc_handle())
    }

    /// Like [`new`](Self::new), with frames owned by the given collector
    pub fn with_handle(
        frames: Vec<StereoSample>,
        sample_rate: u32,
        handle: &Handle,
    ) -> Result<Self, BufferError> {
        if frames.is_empty() {
            return Err(BufferError::Empty);
        }
        if sample_rate == 0 {
            return Err(BufferError::ZeroSampleRate);
        }
        Ok(Self {
            frames: Shared::new(handle, frames),
            sample_rate,
        })
    }

    /// Build a buffer from a mono signal
    pub fn from_mono(samples: &[Sample], sample_rate: u32) -> Result<Self, BufferError> {
        Self::new(samples.iter().map(|&s| StereoSample::mono(s)).collect(), sample_rate)
    }

    /// Build a buffer of silence with the given length
    pub fn silence(total_samples: usize, sample_rate: u32) -> Result<Self, BufferError> {
        Self::new(vec![StereoSample::silence(); total_samples], sample_rate)
    }

    #[inline]
    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    /// Number of stereo frames in the loop
    #[inline]
    pub fn total_samples(&self) -> usize {
        self.frames.len()
    }

    #[inline]
    pub fn frames(&self) -> &[StereoSample] {
        self.frames.as_slice()
    }

    /// Natural duration of one pass through the loop
    pub fn duration(&self) -> Duration {
        Duration::from_secs_f64(self.total_samples() as f64 / self.sample_rate as f64)
    }

    /// Interval between re-alignment ticks: the loop duration split into
    /// `divisions` parts (a zero divisor is treated as one).
    pub fn loop_tick(&self, divisions: u32) -> Duration {
        self.duration() / divisions.max(1)
    }

    /// Cut a segment that plays the loop rotated to begin at `start_sample`
    ///
    /// `start_sample` is wrapped into the buffer, so any value is accepted.
    pub fn segment_from(&self, start_sample: usize) -> Segment {
        Segment {
            frames: Shared::clone(&self.frames),
            start: start_sample % self.frames.len(),
            sample_rate: self.sample_rate,
        }
    }
}

impl fmt::Debug for SampleBuffer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SampleBuffer")
            .field("total_samples", &self.total_samples())
            .field("sample_rate", &self.sample_rate)
            .finish()
    }
}

/// A circular rotation of a loop buffer
///
/// Frame `i` of the segment is frame `(start + i) mod total` of the buffer:
/// the tail from `start` to the end, followed by the head up to `start`.
/// Reading through the view avoids copying the buffer on every re-trigger.
#[derive(Clone)]
pub struct Segment {
    frames: Shared<Vec<StereoSample>>,
    start: usize,
    sample_rate: u32,
}

impl Segment {
    /// Offset into the source buffer where this segment begins
    #[inline]
    pub fn start_sample(&self) -> usize {
        self.start
    }

    /// Segment length in frames (always the full loop length)
    #[inline]
    pub fn len(&self) -> usize {
        self.frames.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.frames.is_empty()
    }

    #[inline]
    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    pub fn duration(&self) -> Duration {
        Duration::from_secs_f64(self.len() as f64 / self.sample_rate as f64)
    }

    /// Frame at position `index` of the rotated segment, or `None` past the end
    #[inline]
    pub fn frame(&self, index: usize) -> Option<StereoSample> {
        let len = self.frames.len();
        if index >= len {
            return None;
        }
        let mut pos = self.start + index;
        if pos >= len {
            pos -= len;
        }
        Some(self.frames[pos])
    }

    /// Iterate the rotated frames: tail first, then head
    pub fn iter(&self) -> impl Iterator<Item = StereoSample> + '_ {
        let (head, tail) = self.frames.split_at(self.start);
        tail.iter().chain(head.iter()).copied()
    }

    /// Materialize the rotation as an owned buffer
    pub fn to_vec(&self) -> Vec<StereoSample> {
        self.iter().collect()
    }
}

impl fmt::Debug for Segment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Segment")
            .field("start", &self.start)
            .field("len", &self.len())
            .field("sample_rate", &self.sample_rate)
            .finish()
    }
}

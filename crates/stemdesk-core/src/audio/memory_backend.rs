//! Headless backend
//!
//! Simulates playback against the wall clock instead of a sound card: a
//! channel is busy while a clip is loaded, not paused, and the clip's
//! duration has not yet elapsed. The most recent `play` calls are kept so
//! tests can check which offsets an instrument cut its loop at.
//!
//! Used by the test suite and as the fallback when no output device can be
//! opened, so the desk keeps running without audio.

use std::collections::{HashMap, VecDeque};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

use super::backend::{AudioBackend, PlaybackChannel};
use super::error::{AudioError, AudioResult};
use crate::audio_file::{load_sample_buffer, AudioFileError};
use crate::types::{ChannelId, SampleBuffer, Segment, DEFAULT_CHANNEL_COUNT, DEFAULT_SAMPLE_RATE};

/// `play` calls remembered per channel; older ones are only counted
pub const PLAY_HISTORY_LEN: usize = 64;

/// One recorded `play` call
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PlayRecord {
    /// Offset the played segment starts at
    pub start_sample: usize,
    /// Length of the played segment in frames
    pub len: usize,
}

#[derive(Debug, Default)]
struct ChannelState {
    /// Clip duration and the playback time accumulated before the last resume
    clip: Option<Duration>,
    played_before: Duration,
    /// Set while running, cleared while paused
    running_since: Option<Instant>,
    plays: VecDeque<PlayRecord>,
    play_count: usize,
    stops: usize,
}

impl ChannelState {
    fn played(&self) -> Duration {
        self.played_before + self.running_since.map_or(Duration::ZERO, |t| t.elapsed())
    }

    fn is_busy(&self) -> bool {
        match (self.clip, self.running_since) {
            (Some(clip), Some(_)) => self.played() < clip,
            _ => false,
        }
    }
}

/// Observer handle onto a memory channel's history
#[derive(Clone)]
pub struct ChannelProbe {
    state: Arc<Mutex<ChannelState>>,
}

impl ChannelProbe {
    fn lock(&self) -> MutexGuard<'_, ChannelState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// The last [`PLAY_HISTORY_LEN`] segments played on the channel, oldest first
    pub fn plays(&self) -> Vec<PlayRecord> {
        self.lock().plays.iter().copied().collect()
    }

    /// Every play since the backend was created
    pub fn play_count(&self) -> usize {
        self.lock().play_count
    }

    pub fn last_play(&self) -> Option<PlayRecord> {
        self.lock().plays.back().copied()
    }

    pub fn stop_count(&self) -> usize {
        self.lock().stops
    }

    pub fn is_busy(&self) -> bool {
        self.lock().is_busy()
    }

    pub fn is_paused(&self) -> bool {
        let state = self.lock();
        state.clip.is_some() && state.running_since.is_none()
    }
}

/// Channel of the headless backend
///
/// Dropping the channel frees its slot for the next claim.
pub struct MemoryChannel {
    index: usize,
    state: Arc<Mutex<ChannelState>>,
    claimed: Arc<[AtomicBool]>,
}

impl MemoryChannel {
    fn lock(&self) -> MutexGuard<'_, ChannelState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl PlaybackChannel for MemoryChannel {
    fn play(&mut self, segment: Segment) {
        let mut state = self.lock();
        state.clip = Some(segment.duration());
        state.played_before = Duration::ZERO;
        state.running_since = Some(Instant::now());
        if state.plays.len() == PLAY_HISTORY_LEN {
            state.plays.pop_front();
        }
        state.plays.push_back(PlayRecord {
            start_sample: segment.start_sample(),
            len: segment.len(),
        });
        state.play_count += 1;
    }

    fn stop(&mut self) {
        let mut state = self.lock();
        state.clip = None;
        state.played_before = Duration::ZERO;
        state.running_since = None;
        state.stops += 1;
    }

    fn pause(&mut self) {
        let mut state = self.lock();
        if let Some(since) = state.running_since.take() {
            state.played_before += since.elapsed();
        }
    }

    fn resume(&mut self) {
        let mut state = self.lock();
        if state.clip.is_some() && state.running_since.is_none() {
            state.running_since = Some(Instant::now());
        }
    }

    fn is_busy(&self) -> bool {
        self.lock().is_busy()
    }
}

impl Drop for MemoryChannel {
    fn drop(&mut self) {
        {
            let mut state = self.lock();
            state.clip = None;
            state.played_before = Duration::ZERO;
            state.running_since = None;
        }
        if let Some(flag) = self.claimed.get(self.index) {
            flag.store(false, Ordering::SeqCst);
        }
    }
}

/// Backend without an output device
pub struct MemoryBackend {
    sample_rate: u32,
    claimed: Arc<[AtomicBool]>,
    probes: Vec<ChannelProbe>,
    sources: Mutex<HashMap<PathBuf, SampleBuffer>>,
    released: AtomicBool,
}

impl MemoryBackend {
    pub fn new(sample_rate: u32, channel_count: usize) -> Self {
        Self {
            sample_rate,
            claimed: (0..channel_count).map(|_| AtomicBool::new(false)).collect(),
            probes: (0..channel_count)
                .map(|_| ChannelProbe {
                    state: Arc::new(Mutex::new(ChannelState::default())),
                })
                .collect(),
            sources: Mutex::new(HashMap::new()),
            released: AtomicBool::new(false),
        }
    }

    /// Register an in-memory buffer that `load` resolves `source` to
    pub fn insert_source(&self, source: impl Into<PathBuf>, buffer: SampleBuffer) {
        self.sources
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(source.into(), buffer);
    }

    /// Observer for channel `id`, available whether or not it is claimed
    pub fn probe(&self, id: ChannelId) -> Option<ChannelProbe> {
        self.probes.get(id.index()).cloned()
    }
}

impl Default for MemoryBackend {
    fn default() -> Self {
        Self::new(DEFAULT_SAMPLE_RATE, DEFAULT_CHANNEL_COUNT)
    }
}

impl AudioBackend for MemoryBackend {
    fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    fn channel_capacity(&self) -> usize {
        self.probes.len()
    }

    fn channel(&self, id: ChannelId) -> AudioResult<Box<dyn PlaybackChannel>> {
        if self.is_released() {
            return Err(AudioError::Released);
        }
        let index = id.index();
        let (flag, probe) = self
            .claimed
            .get(index)
            .zip(self.probes.get(index))
            .ok_or(AudioError::ChannelOutOfRange {
                id: index,
                capacity: self.probes.len(),
            })?;
        if flag.swap(true, Ordering::SeqCst) {
            return Err(AudioError::ChannelInUse(index));
        }
        Ok(Box::new(MemoryChannel {
            index,
            state: Arc::clone(&probe.state),
            claimed: Arc::clone(&self.claimed),
        }))
    }

    fn load(&self, source: &Path) -> Result<SampleBuffer, AudioFileError> {
        let registered = self
            .sources
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(source)
            .cloned();
        match registered {
            Some(buffer) if buffer.sample_rate() != self.sample_rate => {
                Err(AudioFileError::WrongSampleRate {
                    expected: self.sample_rate,
                    found: buffer.sample_rate(),
                })
            }
            Some(buffer) => Ok(buffer),
            None => load_sample_buffer(source, self.sample_rate),
        }
    }

    fn release(&self) {
        if !self.released.swap(true, Ordering::SeqCst) {
            log::info!("Memory backend released");
        }
    }

    fn is_released(&self) -> bool {
        self.released.load(Ordering::SeqCst)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn one_second_loop() -> SampleBuffer {
        SampleBuffer::silence(1000, 1000).unwrap()
    }

    #[test]
    fn test_channel_claimed_once() {
        let backend = MemoryBackend::new(1000, 2);
        let _claimed = backend.channel(ChannelId(0)).unwrap();
        assert!(matches!(
            backend.channel(ChannelId(0)),
            Err(AudioError::ChannelInUse(0))
        ));
        assert!(matches!(
            backend.channel(ChannelId(2)),
            Err(AudioError::ChannelOutOfRange { id: 2, capacity: 2 })
        ));
    }

    #[test]
    fn test_released_backend_refuses_channels() {
        let backend = MemoryBackend::new(1000, 2);
        backend.release();
        backend.release();
        assert!(backend.is_released());
        assert!(matches!(backend.channel(ChannelId(1)), Err(AudioError::Released)));
    }

    #[test]
    fn test_busy_follows_play_pause_resume_stop() {
        let backend = MemoryBackend::new(1000, 1);
        let probe = backend.probe(ChannelId(0)).unwrap();
        let mut channel = backend.channel(ChannelId(0)).unwrap();
        assert!(!channel.is_busy());

        channel.play(one_second_loop().segment_from(250));
        assert!(channel.is_busy());
        assert_eq!(
            probe.last_play(),
            Some(PlayRecord {
                start_sample: 250,
                len: 1000
            })
        );

        channel.pause();
        assert!(!channel.is_busy());
        assert!(probe.is_paused());

        channel.resume();
        assert!(channel.is_busy());

        channel.stop();
        assert!(!channel.is_busy());
        assert_eq!(probe.stop_count(), 1);
    }

    #[test]
    fn test_clip_finishes_after_its_duration() {
        let backend = MemoryBackend::new(1000, 1);
        let mut channel = backend.channel(ChannelId(0)).unwrap();
        let short = SampleBuffer::silence(10, 1000).unwrap();

        channel.play(short.segment_from(0));
        std::thread::sleep(Duration::from_millis(40));
        assert!(!channel.is_busy());
    }

    #[test]
    fn test_load_prefers_registered_source() {
        let backend = MemoryBackend::new(1000, 1);
        backend.insert_source("stems/Bass.ogg", one_second_loop());
        let buffer = backend.load(Path::new("stems/Bass.ogg")).unwrap();
        assert_eq!(buffer.total_samples(), 1000);

        backend.insert_source("stems/Drums.ogg", SampleBuffer::silence(10, 44100).unwrap());
        assert!(matches!(
            backend.load(Path::new("stems/Drums.ogg")),
            Err(AudioFileError::WrongSampleRate { .. })
        ));

        assert!(matches!(
            backend.load(Path::new("stems/Missing.ogg")),
            Err(AudioFileError::Io { .. })
        ));
    }

    #[test]
    fn test_play_history_is_bounded() {
        let backend = MemoryBackend::new(1000, 1);
        let probe = backend.probe(ChannelId(0)).unwrap();
        let mut channel = backend.channel(ChannelId(0)).unwrap();
        let buffer = one_second_loop();

        for start in 0..1000 {
            channel.play(buffer.segment_from(start));
        }
        assert_eq!(probe.play_count(), 1000);
        assert_eq!(probe.plays().len(), PLAY_HISTORY_LEN);
        assert_eq!(probe.plays()[0].start_sample, 1000 - PLAY_HISTORY_LEN);
        assert_eq!(probe.last_play().map(|p| p.start_sample), Some(999));
    }

    #[test]
    fn test_dropped_channel_can_be_claimed_again() {
        let backend = MemoryBackend::new(1000, 1);
        let mut channel = backend.channel(ChannelId(0)).unwrap();
        channel.play(one_second_loop().segment_from(0));
        drop(channel);

        assert!(!backend.probe(ChannelId(0)).unwrap().is_busy());
        assert!(backend.channel(ChannelId(0)).is_ok());
    }
}

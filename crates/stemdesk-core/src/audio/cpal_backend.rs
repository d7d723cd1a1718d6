//! CPAL audio backend implementation
//!
//! One output stream mixes every playback channel. Each channel owns the
//! producer end of its own lock-free SPSC queue into the stream callback, so
//! instrument threads never contend with each other or with the audio thread.
//!
//! ```text
//! ┌────────────────────┐  push()   ┌──────────────────┐
//! │ Instrument thread  │──────────►│ Channel queue n  │──┐
//! │  (owns channel n)  │           │ (lock-free SPSC) │  │ pop()
//! └────────────────────┘           └──────────────────┘  ▼
//!          ▲                                   ┌─────────────────────┐
//!          │ Relaxed atomics (busy)            │ CPAL Audio Thread   │
//!          └───────────────────────────────────│ (owns the Mixer)    │
//!                                              └─────────────────────┘
//! ```
//!
//! Segments reference `basedrop::Shared` frames, so a voice dropping the last
//! reference to a loop only queues it for the GC thread.
//!
//! `cpal::Stream` is not `Send` on every platform, so the stream lives on a
//! dedicated host thread that builds it, reports the negotiated format back,
//! and drops it when the backend is released.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::thread::JoinHandle;

use cpal::traits::{DeviceTrait, StreamTrait};
use cpal::{BufferSize as CpalBufferSize, SampleFormat, Stream, StreamConfig};
use crossbeam::channel::{bounded, Receiver, Sender};

use super::backend::{AudioBackend, PlaybackChannel};
use super::config::AudioConfig;
use super::device::{find_device_by_id, get_cpal_default_device};
use super::error::{AudioError, AudioResult};
use crate::types::{ChannelId, Segment, StereoSample};

/// Pending commands per channel before pushes start failing
const CHANNEL_QUEUE_CAPACITY: usize = 16;

/// Commands sent from a channel handle to its mixer voice
enum ChannelCommand {
    Play(Segment),
    Stop,
    Pause,
    Resume,
}

/// Per-channel state readable without locks
#[derive(Default)]
struct ChannelAtomics {
    /// A clip is loaded (playing or paused)
    loaded: AtomicBool,
    /// Audio is being produced right now
    busy: AtomicBool,
}

impl ChannelAtomics {
    fn set(&self, loaded: bool, busy: bool) {
        self.loaded.store(loaded, Ordering::Relaxed);
        self.busy.store(busy, Ordering::Relaxed);
    }
}

/// One mixer voice, owned by the audio thread
struct Voice {
    commands: rtrb::Consumer<ChannelCommand>,
    atomics: Arc<ChannelAtomics>,
    segment: Option<Segment>,
    position: usize,
    paused: bool,
}

impl Voice {
    fn process_commands(&mut self) {
        while let Ok(cmd) = self.commands.pop() {
            match cmd {
                ChannelCommand::Play(segment) => {
                    self.segment = Some(segment);
                    self.position = 0;
                    self.paused = false;
                    self.atomics.set(true, true);
                }
                ChannelCommand::Stop => {
                    self.segment = None;
                    self.position = 0;
                    self.paused = false;
                    self.atomics.set(false, false);
                }
                ChannelCommand::Pause => {
                    self.paused = true;
                    self.atomics.busy.store(false, Ordering::Relaxed);
                }
                ChannelCommand::Resume => {
                    self.paused = false;
                    self.atomics
                        .busy
                        .store(self.segment.is_some(), Ordering::Relaxed);
                }
            }
        }
    }

    #[inline]
    fn next_frame(&mut self) -> Option<StereoSample> {
        if self.paused {
            return None;
        }
        let segment = self.segment.as_ref()?;
        match segment.frame(self.position) {
            Some(frame) => {
                self.position += 1;
                Some(frame)
            }
            None => {
                self.segment = None;
                self.position = 0;
                self.atomics.set(false, false);
                None
            }
        }
    }
}

/// Sums every voice into the device buffer
struct Mixer {
    voices: Vec<Voice>,
}

impl Mixer {
    fn process(&mut self, data: &mut [f32], channels: usize) {
        for voice in &mut self.voices {
            voice.process_commands();
        }

        for frame in data.chunks_mut(channels) {
            let mut mix = StereoSample::silence();
            for voice in &mut self.voices {
                if let Some(sample) = voice.next_frame() {
                    mix += sample;
                }
            }
            let out = mix.clipped();
            if channels == 1 {
                frame[0] = (out.left + out.right) * 0.5;
                continue;
            }
            frame[0] = out.left;
            frame[1] = out.right;
            for ch in frame.iter_mut().skip(2) {
                *ch = 0.0;
            }
        }
    }
}

/// Producer side of a voice, waiting to be claimed
struct ChannelSlot {
    producer: rtrb::Producer<ChannelCommand>,
    atomics: Arc<ChannelAtomics>,
}

/// Format negotiated with the device
#[derive(Debug, Clone, Copy)]
struct StreamInfo {
    sample_rate: u32,
    buffer_size: u32,
}

type SlotPool = Arc<Mutex<Vec<Option<ChannelSlot>>>>;

/// Playback channel backed by a voice in the CPAL mixer
///
/// Dropping the channel returns its slot to the backend.
pub struct CpalChannel {
    id: ChannelId,
    slot: Option<ChannelSlot>,
    pool: SlotPool,
}

impl CpalChannel {
    /// Queue a command for the voice. The shared atomics only change once
    /// the command is actually queued.
    fn send(&mut self, cmd: ChannelCommand, on_queued: impl FnOnce(&ChannelAtomics)) {
        let Some(slot) = self.slot.as_mut() else {
            return;
        };
        match slot.producer.push(cmd) {
            Ok(()) => on_queued(&slot.atomics),
            Err(_) => log::warn!("Channel {} command queue full, dropping command", self.id),
        }
    }
}

impl PlaybackChannel for CpalChannel {
    fn play(&mut self, segment: Segment) {
        self.send(ChannelCommand::Play(segment), |a| a.set(true, true));
    }

    fn stop(&mut self) {
        self.send(ChannelCommand::Stop, |a| a.set(false, false));
    }

    fn pause(&mut self) {
        self.send(ChannelCommand::Pause, |a| {
            a.busy.store(false, Ordering::Relaxed)
        });
    }

    fn resume(&mut self) {
        self.send(ChannelCommand::Resume, |a| {
            a.busy.store(a.loaded.load(Ordering::Relaxed), Ordering::Relaxed)
        });
    }

    fn is_busy(&self) -> bool {
        self.slot
            .as_ref()
            .is_some_and(|slot| slot.atomics.busy.load(Ordering::Relaxed))
    }
}

impl Drop for CpalChannel {
    fn drop(&mut self) {
        self.stop();
        if let Some(slot) = self.slot.take() {
            let mut pool = self.pool.lock().unwrap_or_else(PoisonError::into_inner);
            if let Some(entry) = pool.get_mut(self.id.index()) {
                *entry = Some(slot);
            }
        }
    }
}

/// Backend playing through a CPAL output stream
pub struct CpalBackend {
    info: StreamInfo,
    slots: SlotPool,
    released: AtomicBool,
    shutdown_tx: Mutex<Option<Sender<()>>>,
    host_thread: Mutex<Option<JoinHandle<()>>>,
}

impl CpalBackend {
    /// Open the configured device and start the mixer stream
    pub fn start(config: &AudioConfig) -> AudioResult<Self> {
        let channel_count = config.channel_count;
        let mut voices = Vec::with_capacity(channel_count);
        let mut slots = Vec::with_capacity(channel_count);

        for _ in 0..channel_count {
            let (producer, consumer) = rtrb::RingBuffer::new(CHANNEL_QUEUE_CAPACITY);
            let atomics = Arc::new(ChannelAtomics::default());
            voices.push(Voice {
                commands: consumer,
                atomics: Arc::clone(&atomics),
                segment: None,
                position: 0,
                paused: false,
            });
            slots.push(Some(ChannelSlot { producer, atomics }));
        }

        let mixer = Mixer { voices };
        let (ready_tx, ready_rx) = bounded::<AudioResult<StreamInfo>>(1);
        let (shutdown_tx, shutdown_rx) = bounded::<()>(1);
        let host_config = config.clone();

        let host_thread = std::thread::Builder::new()
            .name("audio-host".to_string())
            .spawn(move || run_stream_host(host_config, mixer, ready_tx, shutdown_rx))
            .map_err(|e| AudioError::StreamBuild(e.to_string()))?;

        let info = match ready_rx.recv() {
            Ok(Ok(info)) => info,
            Ok(Err(e)) => {
                let _ = host_thread.join();
                return Err(e);
            }
            Err(_) => {
                let _ = host_thread.join();
                return Err(AudioError::StreamBuild(
                    "audio host thread exited before the stream started".to_string(),
                ));
            }
        };

        log::info!(
            "CPAL backend started: {}Hz, {} frames (~{:.1}ms), {} channels",
            info.sample_rate,
            info.buffer_size,
            (info.buffer_size as f32 / info.sample_rate as f32) * 1000.0,
            channel_count
        );

        Ok(Self {
            info,
            slots: Arc::new(Mutex::new(slots)),
            released: AtomicBool::new(false),
            shutdown_tx: Mutex::new(Some(shutdown_tx)),
            host_thread: Mutex::new(Some(host_thread)),
        })
    }

    /// Actual buffer size in frames
    pub fn buffer_size(&self) -> u32 {
        self.info.buffer_size
    }

    /// One-way output latency in milliseconds
    pub fn latency_ms(&self) -> f32 {
        (self.info.buffer_size as f32 / self.info.sample_rate as f32) * 1000.0
    }
}

impl AudioBackend for CpalBackend {
    fn sample_rate(&self) -> u32 {
        self.info.sample_rate
    }

    fn channel_capacity(&self) -> usize {
        self.slots
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    fn channel(&self, id: ChannelId) -> AudioResult<Box<dyn PlaybackChannel>> {
        if self.is_released() {
            return Err(AudioError::Released);
        }
        let mut slots = self.slots.lock().unwrap_or_else(PoisonError::into_inner);
        let capacity = slots.len();
        let slot = slots
            .get_mut(id.index())
            .ok_or(AudioError::ChannelOutOfRange {
                id: id.index(),
                capacity,
            })?
            .take()
            .ok_or(AudioError::ChannelInUse(id.index()))?;

        Ok(Box::new(CpalChannel {
            id,
            slot: Some(slot),
            pool: Arc::clone(&self.slots),
        }))
    }

    fn release(&self) {
        if self.released.swap(true, Ordering::SeqCst) {
            return;
        }
        // Dropping the sender wakes the host thread, which drops the stream
        self.shutdown_tx
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        let handle = self
            .host_thread
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(handle) = handle {
            if handle.join().is_err() {
                log::error!("Audio host thread panicked during shutdown");
            }
        }
        log::info!("CPAL backend released");
    }

    fn is_released(&self) -> bool {
        self.released.load(Ordering::SeqCst)
    }
}

impl Drop for CpalBackend {
    fn drop(&mut self) {
        self.release();
    }
}

/// Body of the audio host thread: own the stream until shutdown
fn run_stream_host(
    config: AudioConfig,
    mixer: Mixer,
    ready_tx: Sender<AudioResult<StreamInfo>>,
    shutdown_rx: Receiver<()>,
) {
    let stream = match build_stream(&config, mixer) {
        Ok((stream, info)) => {
            let _ = ready_tx.send(Ok(info));
            stream
        }
        Err(e) => {
            let _ = ready_tx.send(Err(e));
            return;
        }
    };

    // Returns once the backend drops its sender
    let _ = shutdown_rx.recv();
    if let Err(e) = stream.pause() {
        log::debug!("Pausing stream on shutdown failed: {}", e);
    }
    drop(stream);
}

fn build_stream(config: &AudioConfig, mut mixer: Mixer) -> AudioResult<(Stream, StreamInfo)> {
    let device = match &config.device {
        Some(id) => find_device_by_id(id)?,
        None => get_cpal_default_device()?,
    };
    let device_name = device.name().unwrap_or_else(|_| "Unknown".to_string());
    log::info!("Using audio device: {}", device_name);

    let (supported, buffer_size) = get_output_config(&device, config)?;
    let sample_rate = supported.sample_rate().0;
    let stream_config = StreamConfig {
        channels: supported.channels(),
        sample_rate: supported.sample_rate(),
        buffer_size: CpalBufferSize::Fixed(buffer_size),
    };
    let channels = stream_config.channels as usize;

    let stream = device
        .build_output_stream(
            &stream_config,
            move |data: &mut [f32], _info: &cpal::OutputCallbackInfo| {
                mixer.process(data, channels);
            },
            move |err| {
                log::error!("Audio stream error: {}", err);
            },
            None,
        )
        .map_err(|e| AudioError::StreamBuild(e.to_string()))?;

    stream
        .play()
        .map_err(|e| AudioError::StreamStart(e.to_string()))?;

    Ok((
        stream,
        StreamInfo {
            sample_rate,
            buffer_size,
        },
    ))
}

/// Pick an f32 stereo configuration at the requested rate
///
/// Returns (SupportedStreamConfig, buffer_size_in_frames)
fn get_output_config(
    device: &cpal::Device,
    config: &AudioConfig,
) -> AudioResult<(cpal::SupportedStreamConfig, u32)> {
    let supported_configs: Vec<_> = device
        .supported_output_configs()
        .map_err(|e| AudioError::UnsupportedConfig(e.to_string()))?
        .filter(|c| c.sample_format() == SampleFormat::F32)
        .collect();

    let target_sample_rate = config.target_sample_rate();

    let best_config = supported_configs
        .iter()
        .filter(|c| c.channels() >= 2)
        .find(|c| {
            target_sample_rate >= c.min_sample_rate().0
                && target_sample_rate <= c.max_sample_rate().0
        })
        .or_else(|| supported_configs.iter().find(|c| c.channels() >= 2))
        .or_else(|| supported_configs.first())
        .ok_or_else(|| {
            AudioError::UnsupportedConfig("No f32 output configuration available".to_string())
        })?;

    let sample_rate = if target_sample_rate >= best_config.min_sample_rate().0
        && target_sample_rate <= best_config.max_sample_rate().0
    {
        cpal::SampleRate(target_sample_rate)
    } else {
        let fallback = best_config.max_sample_rate();
        log::warn!(
            "Audio device doesn't support {}Hz, falling back to {}Hz (stems must match)",
            target_sample_rate,
            fallback.0
        );
        fallback
    };

    let buffer_size = config.buffer_size.as_frames();
    log::debug!(
        "Selected buffer size: {} frames for {:?}",
        buffer_size,
        config.buffer_size
    );

    Ok((best_config.clone().with_sample_rate(sample_rate), buffer_size))
}

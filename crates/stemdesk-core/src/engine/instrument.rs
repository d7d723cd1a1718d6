//! Per-stem synchronization loop
//!
//! An [`Instrument`] owns one loop buffer and one playback channel and runs
//! a dedicated thread that keeps the loop phase-locked to the shared
//! [`Epoch`]. The backend can only play a clip from its first frame, so on
//! every tick the thread:
//!
//! 1. computes where the loop *would* be had it been playing since the epoch
//! 2. cuts a rotated segment starting at that offset
//! 3. stops the channel and plays the segment from the top
//! 4. waits one tick (a fraction of the loop length) before re-aligning
//!
//! ```text
//!             pause()              stop()
//!   Running ──────────► Paused ──────────► Stopped
//!      ▲  ◄──────────────  │                  ▲
//!      │      resume()                        │
//!      └──────────────────────────────────────┘
//!                       stop()
//! ```
//!
//! State and channel sit behind one mutex paired with a condvar. The tick
//! wait is a timed condvar wait, so pause and stop wake the thread at once.
//! Resuming does not restore the paused offset: the loop re-derives its
//! position from the epoch, jumping ahead by the time spent paused.

use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError};
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use crossbeam::channel::{bounded, Receiver, RecvTimeoutError};

use super::phase::Epoch;
use crate::audio::PlaybackChannel;
use crate::types::{ChannelId, SampleBuffer};

/// Lifecycle of an instrument's loop
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InstrumentState {
    Running,
    Paused,
    /// Terminal
    Stopped,
}

struct Inner {
    state: InstrumentState,
    channel: Box<dyn PlaybackChannel>,
}

struct Shared {
    inner: Mutex<Inner>,
    wake: Condvar,
}

impl Shared {
    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// A looping stem running on its own thread
pub struct Instrument {
    name: String,
    channel_id: ChannelId,
    sample_rate: u32,
    total_samples: usize,
    shared: Arc<Shared>,
    handle: Option<JoinHandle<()>>,
    /// Disconnects when the loop thread exits
    finished_rx: Receiver<()>,
}

impl Instrument {
    /// Start the loop thread for `buffer` on `channel`
    ///
    /// The instrument begins in [`InstrumentState::Running`] and re-aligns
    /// every `loop duration / divisions`.
    pub fn spawn(
        name: impl Into<String>,
        buffer: SampleBuffer,
        channel: Box<dyn PlaybackChannel>,
        channel_id: ChannelId,
        epoch: Epoch,
        divisions: u32,
    ) -> std::io::Result<Self> {
        let name = name.into();
        let shared = Arc::new(Shared {
            inner: Mutex::new(Inner {
                state: InstrumentState::Running,
                channel,
            }),
            wake: Condvar::new(),
        });
        let (finished_tx, finished_rx) = bounded::<()>(1);

        let sample_rate = buffer.sample_rate();
        let total_samples = buffer.total_samples();
        let tick = buffer.loop_tick(divisions);

        let thread_shared = Arc::clone(&shared);
        let thread_name = name.clone();
        let handle = std::thread::Builder::new()
            .name(format!("instrument-{}", name))
            .spawn(move || {
                run_loop(&thread_shared, &buffer, epoch, tick, &thread_name);
                drop(finished_tx);
            })?;

        log::debug!(
            "[{}] started on channel {} ({} frames @ {}Hz, tick {:?})",
            name,
            channel_id,
            total_samples,
            sample_rate,
            tick
        );

        Ok(Self {
            name,
            channel_id,
            sample_rate,
            total_samples,
            shared,
            handle: Some(handle),
            finished_rx,
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn channel_id(&self) -> ChannelId {
        self.channel_id
    }

    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    pub fn total_samples(&self) -> usize {
        self.total_samples
    }

    pub fn state(&self) -> InstrumentState {
        self.shared.lock().state
    }

    /// Hold the channel and block the loop until resumed or stopped.
    /// Returns false if the instrument was not running.
    pub fn pause(&self) -> bool {
        let mut inner = self.shared.lock();
        if inner.state != InstrumentState::Running {
            return false;
        }
        inner.state = InstrumentState::Paused;
        inner.channel.pause();
        self.shared.wake.notify_all();
        log::debug!("[{}] paused", self.name);
        true
    }

    /// Let the loop continue; the next re-trigger recomputes the offset
    /// from the epoch. Returns false if the instrument was not paused.
    pub fn resume(&self) -> bool {
        let mut inner = self.shared.lock();
        if inner.state != InstrumentState::Paused {
            return false;
        }
        inner.state = InstrumentState::Running;
        self.shared.wake.notify_all();
        log::debug!("[{}] resumed", self.name);
        true
    }

    /// Stop the channel and make the loop thread exit. Idempotent.
    pub fn stop(&self) {
        let mut inner = self.shared.lock();
        if inner.state == InstrumentState::Stopped {
            return;
        }
        inner.state = InstrumentState::Stopped;
        inner.channel.stop();
        self.shared.wake.notify_all();
        log::debug!("[{}] stopping", self.name);
    }

    /// True while the channel produces audio and the instrument isn't paused
    pub fn is_playing(&self) -> bool {
        let inner = self.shared.lock();
        inner.state != InstrumentState::Paused && inner.channel.is_busy()
    }

    /// Wait up to `timeout` for the loop thread to exit
    ///
    /// Returns true once the thread has been joined. On timeout the handle
    /// is kept so a later call can try again.
    pub fn join(&mut self, timeout: Duration) -> bool {
        if self.handle.is_none() {
            return true;
        }
        match self.finished_rx.recv_timeout(timeout) {
            Ok(()) | Err(RecvTimeoutError::Disconnected) => {
                if let Some(handle) = self.handle.take() {
                    if handle.join().is_err() {
                        log::error!("[{}] loop thread panicked", self.name);
                    }
                }
                true
            }
            Err(RecvTimeoutError::Timeout) => {
                log::warn!(
                    "[{}] loop thread did not exit within {:?}",
                    self.name,
                    timeout
                );
                false
            }
        }
    }
}

impl Drop for Instrument {
    fn drop(&mut self) {
        // An unjoined thread is detached, but never left looping
        self.stop();
    }
}

impl std::fmt::Debug for Instrument {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Instrument")
            .field("name", &self.name)
            .field("channel_id", &self.channel_id)
            .field("state", &self.state())
            .finish()
    }
}

/// Body of the instrument thread
fn run_loop(shared: &Shared, buffer: &SampleBuffer, epoch: Epoch, tick: Duration, name: &str) {
    let mut inner = shared.lock();

    loop {
        while inner.state == InstrumentState::Paused {
            inner = shared
                .wake
                .wait(inner)
                .unwrap_or_else(PoisonError::into_inner);
        }
        if inner.state == InstrumentState::Stopped {
            break;
        }

        let start_sample = epoch.offset_at(Instant::now(), buffer);
        inner.channel.stop();
        inner.channel.play(buffer.segment_from(start_sample));
        log::trace!("[{}] re-triggered at sample {}", name, start_sample);

        let (guard, _) = shared
            .wake
            .wait_timeout_while(inner, tick, |i| i.state == InstrumentState::Running)
            .unwrap_or_else(PoisonError::into_inner);
        inner = guard;
    }

    log::debug!("[{}] loop exited", name);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio::{AudioBackend, ChannelProbe, MemoryBackend};

    const RATE: u32 = 1000;
    const JOIN_TIMEOUT: Duration = Duration::from_secs(1);

    /// Spawn an instrument over a 4-second loop at 1kHz (1s ticks)
    fn spawn_with_epoch(epoch: Epoch) -> (Instrument, ChannelProbe) {
        let backend = MemoryBackend::new(RATE, 1);
        let probe = backend.probe(ChannelId(0)).unwrap();
        let channel = backend.channel(ChannelId(0)).unwrap();
        let buffer = SampleBuffer::silence(4 * RATE as usize, RATE).unwrap();
        let instrument =
            Instrument::spawn("drums", buffer, channel, ChannelId(0), epoch, 4).unwrap();
        (instrument, probe)
    }

    fn wait_for(mut condition: impl FnMut() -> bool) -> bool {
        let deadline = Instant::now() + Duration::from_secs(2);
        while Instant::now() < deadline {
            if condition() {
                return true;
            }
            std::thread::sleep(Duration::from_millis(5));
        }
        condition()
    }

    #[test]
    fn test_first_trigger_uses_epoch_offset() {
        let epoch = Epoch::from_instant(Instant::now() - Duration::from_millis(3000));
        let (mut instrument, probe) = spawn_with_epoch(epoch);

        assert!(wait_for(|| probe.play_count() >= 1));
        let first = probe.plays()[0];
        assert_eq!(first.len, 4000);
        // 3.0s elapsed plus however long the thread took to start
        assert!((3000..3200).contains(&first.start_sample), "{:?}", first);

        instrument.stop();
        assert!(instrument.join(JOIN_TIMEOUT));
    }

    #[test]
    fn test_pause_then_resume_jumps_ahead() {
        let epoch = Epoch::now();
        let (mut instrument, probe) = spawn_with_epoch(epoch);
        assert!(wait_for(|| probe.play_count() >= 1));

        assert!(instrument.pause());
        assert!(!instrument.is_playing());
        assert_eq!(instrument.state(), InstrumentState::Paused);
        assert!(probe.is_paused());

        let plays_while_paused = probe.play_count();
        std::thread::sleep(Duration::from_millis(300));
        assert_eq!(probe.play_count(), plays_while_paused);

        let resumed_at = Instant::now();
        assert!(instrument.resume());
        assert!(wait_for(|| probe.play_count() > plays_while_paused));

        let expected = epoch.offset_at(resumed_at, &SampleBuffer::silence(4000, RATE).unwrap());
        let resumed = probe.last_play().unwrap();
        // Offset follows the epoch, not the position at which we paused
        assert!(resumed.start_sample >= expected);
        assert!(resumed.start_sample < expected + 200, "{:?}", resumed);
        assert!(resumed.start_sample >= 300);
        assert!(wait_for(|| instrument.is_playing()));

        instrument.stop();
        assert!(instrument.join(JOIN_TIMEOUT));
    }

    #[test]
    fn test_pause_resume_are_state_checked() {
        let (mut instrument, _probe) = spawn_with_epoch(Epoch::now());
        assert!(!instrument.resume());
        assert!(instrument.pause());
        assert!(!instrument.pause());
        assert!(instrument.resume());

        instrument.stop();
        assert!(!instrument.pause());
        assert!(!instrument.resume());
        assert_eq!(instrument.state(), InstrumentState::Stopped);
        assert!(instrument.join(JOIN_TIMEOUT));
    }

    #[test]
    fn test_stop_twice_joins_both_times() {
        let (mut instrument, probe) = spawn_with_epoch(Epoch::now());
        assert!(wait_for(|| probe.play_count() >= 1));

        let started = Instant::now();
        instrument.stop();
        assert!(instrument.join(JOIN_TIMEOUT));
        // The 1s tick wait was interrupted
        assert!(started.elapsed() < Duration::from_millis(500));

        instrument.stop();
        assert!(instrument.join(JOIN_TIMEOUT));
        assert!(!instrument.is_playing());
        assert!(probe.stop_count() >= 1);
    }

    #[test]
    fn test_stop_while_paused_exits() {
        let (mut instrument, _probe) = spawn_with_epoch(Epoch::now());
        instrument.pause();
        instrument.stop();
        assert!(instrument.join(JOIN_TIMEOUT));
    }

    #[test]
    fn test_retriggers_every_tick() {
        let backend = MemoryBackend::new(RATE, 1);
        let probe = backend.probe(ChannelId(0)).unwrap();
        let channel = backend.channel(ChannelId(0)).unwrap();
        // 200ms loop, 50ms ticks
        let buffer = SampleBuffer::silence(200, RATE).unwrap();
        let mut instrument =
            Instrument::spawn("hats", buffer, channel, ChannelId(0), Epoch::now(), 4).unwrap();

        assert!(wait_for(|| probe.play_count() >= 4));
        for play in probe.plays() {
            assert!(play.start_sample < 200);
        }
        // Every play is preceded by a stop of the previous clip
        assert!(probe.stop_count() >= probe.play_count() - 1);

        instrument.stop();
        assert!(instrument.join(JOIN_TIMEOUT));
    }

    #[test]
    fn test_drop_stops_thread() {
        let (instrument, probe) = spawn_with_epoch(Epoch::now());
        assert!(wait_for(|| probe.play_count() >= 1));
        drop(instrument);
        assert!(wait_for(|| !probe.is_busy()));
    }
}

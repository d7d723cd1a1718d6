//! Shared timeline arithmetic
//!
//! Every instrument derives its loop position from the same [`Epoch`], so
//! stems with the same rate and length land on the same offset without any
//! coordination between their threads.

use std::time::{Duration, Instant};

use crate::types::SampleBuffer;

const NANOS_PER_SEC: u128 = 1_000_000_000;

/// Offset into a loop of `total_samples` frames after `elapsed` time
///
/// `floor(elapsed * sample_rate) mod total_samples`, computed in integer
/// nanoseconds so long sessions don't accumulate float error. Always in
/// `0..total_samples`; returns 0 for an empty loop.
pub fn loop_offset(elapsed: Duration, sample_rate: u32, total_samples: usize) -> usize {
    if total_samples == 0 {
        return 0;
    }
    let frames = elapsed.as_nanos() * sample_rate as u128 / NANOS_PER_SEC;
    (frames % total_samples as u128) as usize
}

/// The shared reference instant all offsets are measured from
///
/// Set once by the desk and copied into each instrument; never modified.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Epoch(Instant);

impl Epoch {
    pub fn now() -> Self {
        Self(Instant::now())
    }

    pub fn from_instant(instant: Instant) -> Self {
        Self(instant)
    }

    pub fn instant(&self) -> Instant {
        self.0
    }

    /// Time since the epoch
    pub fn elapsed(&self) -> Duration {
        self.0.elapsed()
    }

    /// Time from the epoch to `at`, zero if `at` precedes it
    pub fn elapsed_at(&self, at: Instant) -> Duration {
        at.saturating_duration_since(self.0)
    }

    /// Loop offset `buffer` should be sounding at instant `at`
    pub fn offset_at(&self, at: Instant, buffer: &SampleBuffer) -> usize {
        loop_offset(
            self.elapsed_at(at),
            buffer.sample_rate(),
            buffer.total_samples(),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const RATE: u32 = 44_100;
    const FOUR_SECONDS: usize = 176_400;

    #[test]
    fn test_offset_three_seconds_into_four_second_loop() {
        assert_eq!(loop_offset(Duration::from_secs(3), RATE, FOUR_SECONDS), 132_300);
    }

    #[test]
    fn test_offset_wraps_past_loop_end() {
        assert_eq!(loop_offset(Duration::from_secs(4), RATE, FOUR_SECONDS), 0);
        assert_eq!(loop_offset(Duration::from_secs(7), RATE, FOUR_SECONDS), 132_300);
    }

    #[test]
    fn test_offset_floors_partial_frames() {
        // 1.5 frames at 1Hz-per-ms
        assert_eq!(loop_offset(Duration::from_micros(1500), 1000, 10), 1);
    }

    #[test]
    fn test_offset_always_in_range() {
        let lengths = [1usize, 7, 4410, FOUR_SECONDS];
        for &total in &lengths {
            for ms in (0..20_000u64).step_by(333) {
                let offset = loop_offset(Duration::from_millis(ms), RATE, total);
                assert!(offset < total, "offset {} for total {}", offset, total);
            }
        }
        // Very long session
        let offset = loop_offset(Duration::from_secs(60 * 60 * 24 * 365), RATE, FOUR_SECONDS);
        assert!(offset < FOUR_SECONDS);
    }

    #[test]
    fn test_empty_loop_offset_is_zero() {
        assert_eq!(loop_offset(Duration::from_secs(1), RATE, 0), 0);
    }

    #[test]
    fn test_instruments_sharing_epoch_agree() {
        let epoch = Epoch::now();
        let a = SampleBuffer::silence(FOUR_SECONDS, RATE).unwrap();
        let b = SampleBuffer::silence(FOUR_SECONDS, RATE).unwrap();
        let at = epoch.instant() + Duration::from_millis(2750);
        assert_eq!(epoch.offset_at(at, &a), epoch.offset_at(at, &b));
        assert_eq!(epoch.offset_at(at, &a), 121_275);
    }

    #[test]
    fn test_elapsed_before_epoch_saturates() {
        let epoch = Epoch::now();
        let earlier = epoch.instant() - Duration::from_millis(10);
        assert_eq!(epoch.elapsed_at(earlier), Duration::ZERO);
    }
}

//! End-to-end desk behaviour against the headless backend

use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};

use stemdesk_core::audio::{AudioBackend, MemoryBackend};
use stemdesk_core::engine::{
    loop_offset, CommandOutcome, Desk, DeskCommand, DeskError, DeskOptions, InstrumentState,
    StatusLabel,
};
use stemdesk_core::{ChannelId, SampleBuffer};

const RATE: u32 = 44_100;
const FOUR_SECONDS: usize = 4 * RATE as usize;

fn stem_path(name: &str) -> PathBuf {
    PathBuf::from(format!("stems/{}.ogg", name))
}

fn init_logging() {
    let _ = env_logger::builder().is_test(true).try_init();
}

fn backend(channels: usize, stems: &[&str]) -> Arc<MemoryBackend> {
    init_logging();
    let backend = Arc::new(MemoryBackend::new(RATE, channels));
    for stem in stems {
        backend.insert_source(
            stem_path(stem),
            SampleBuffer::silence(FOUR_SECONDS, RATE).unwrap(),
        );
    }
    backend
}

fn wait_for(mut condition: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + Duration::from_secs(3);
    while Instant::now() < deadline {
        if condition() {
            return true;
        }
        std::thread::sleep(Duration::from_millis(5));
    }
    condition()
}

#[test]
fn test_stems_start_at_epoch_offset() {
    let backend = backend(4, &["bass", "drums"]);
    let desk = Desk::new(backend.clone());
    let epoch = desk.epoch();

    let before = epoch.elapsed();
    let bass = desk.add_instrument("bass", &stem_path("bass")).unwrap();
    std::thread::sleep(Duration::from_millis(50));
    let drums = desk.add_instrument("drums", &stem_path("drums")).unwrap();

    let bass_probe = backend.probe(bass).unwrap();
    let drums_probe = backend.probe(drums).unwrap();
    assert!(wait_for(|| bass_probe.play_count() > 0 && drums_probe.play_count() > 0));
    let after = epoch.elapsed();

    let low = loop_offset(before, RATE, FOUR_SECONDS);
    let high = loop_offset(after, RATE, FOUR_SECONDS);
    let bass_start = bass_probe.plays()[0].start_sample;
    let drums_start = drums_probe.plays()[0].start_sample;

    // Both cut into the loop where the shared timeline says, not at zero
    assert!((low..=high).contains(&bass_start), "{} not in {}..={}", bass_start, low, high);
    assert!((low..=high).contains(&drums_start), "{} not in {}..={}", drums_start, low, high);
    assert_eq!(bass_probe.plays()[0].len, FOUR_SECONDS);

    desk.stop_all();
}

#[test]
fn test_capacity_exceeded_leaves_registry_unchanged() {
    let backend = backend(2, &["bass", "drums", "vocals"]);
    let desk = Desk::new(backend.clone());
    desk.add_instrument("bass", &stem_path("bass")).unwrap();
    desk.add_instrument("drums", &stem_path("drums")).unwrap();

    let err = desk.add_instrument("vocals", &stem_path("vocals")).unwrap_err();
    assert!(matches!(err, DeskError::ChannelCapacityExceeded { capacity: 2 }));
    assert_eq!(desk.instrument_names(), vec!["bass", "drums"]);
    assert!(desk.instrument_status("vocals").is_none());

    desk.stop_all();
}

#[test]
fn test_duplicate_keeps_channel_and_state() {
    let backend = backend(4, &["drums", "bass"]);
    let desk = Desk::new(backend.clone());
    let channel = desk.add_instrument("drums", &stem_path("drums")).unwrap();

    let err = desk.add_instrument("drums", &stem_path("bass")).unwrap_err();
    assert_eq!(err.to_string(), "Instrument 'drums' already exists");

    let status = desk.instrument_status("drums").unwrap();
    assert_eq!(status.channel_id, channel);
    assert_eq!(status.state, InstrumentState::Running);

    // No channel was consumed by the rejected add
    assert_eq!(desk.add_instrument("bass", &stem_path("bass")).unwrap(), ChannelId(1));
    desk.stop_all();
}

#[test]
fn test_pause_then_resume_retriggers() {
    let backend = backend(2, &["guitar"]);
    let desk = Desk::new(backend.clone());
    let channel = desk.add_instrument("guitar", &stem_path("guitar")).unwrap();
    let probe = backend.probe(channel).unwrap();
    assert!(wait_for(|| probe.play_count() == 1));

    desk.pause_instrument("guitar").unwrap();
    assert_eq!(desk.show_status()[0].label, StatusLabel::Paused);
    assert!(probe.is_paused());

    desk.resume_instrument("guitar").unwrap();
    assert!(wait_for(|| probe.play_count() >= 2));
    assert!(wait_for(|| desk.show_status()[0].label == StatusLabel::Playing));

    desk.stop_all();
}

#[test]
fn test_commands_through_dispatch() {
    let backend = backend(2, &["vocals"]);
    let desk = Desk::new(backend.clone());
    desk.add_instrument("vocals", &stem_path("vocals")).unwrap();

    let outcome = desk.dispatch("PAUSE vocals".parse::<DeskCommand>().unwrap());
    assert!(matches!(outcome, CommandOutcome::Paused(ref n) if n == "vocals"));

    let outcome = desk.dispatch("pause keys".parse::<DeskCommand>().unwrap());
    assert_eq!(outcome.to_string(), "Instrument 'keys' not found");

    match desk.dispatch(DeskCommand::Status) {
        CommandOutcome::Status(statuses) => {
            assert_eq!(statuses.len(), 1);
            assert_eq!(statuses[0].to_string(), "vocals: Paused");
        }
        other => panic!("unexpected outcome {:?}", other),
    }

    desk.stop_all();
}

#[test]
fn test_stop_all_idempotent_and_prompt() {
    let backend = backend(4, &["bass", "drums", "guitar", "vocals"]);
    let desk = Desk::with_options(
        backend.clone(),
        DeskOptions {
            retrigger_divisions: 1,
            join_timeout: Duration::from_secs(1),
        },
    );
    for name in ["bass", "drums", "guitar", "vocals"] {
        desk.add_instrument(name, &stem_path(name)).unwrap();
    }
    desk.pause_instrument("guitar").unwrap();

    // Ticks are 4s apart; stopping must not wait for them
    let started = Instant::now();
    assert_eq!(desk.stop_all(), 4);
    assert!(started.elapsed() < Duration::from_secs(1));
    assert!(backend.is_released());

    for id in 0..4 {
        let probe = backend.probe(ChannelId(id)).unwrap();
        assert!(!probe.is_busy());
    }

    assert_eq!(desk.stop_all(), 0);
    assert!(desk.show_status().is_empty());
}

#[test]
fn test_drop_releases_backend() {
    let backend = backend(2, &["bass"]);
    {
        let desk = Desk::new(backend.clone());
        desk.add_instrument("bass", &stem_path("bass")).unwrap();
    }
    assert!(backend.is_released());
}

#[test]
fn test_resume_offset_follows_epoch_not_pause_point() {
    use stemdesk_core::engine::{Epoch, Instrument};

    init_logging();
    let backend = MemoryBackend::new(RATE, 1);
    let probe = backend.probe(ChannelId(0)).unwrap();
    let channel = backend.channel(ChannelId(0)).unwrap();
    let buffer = SampleBuffer::silence(FOUR_SECONDS, RATE).unwrap();

    // Paused one second into the timeline, resumed at three seconds
    let epoch = Epoch::from_instant(Instant::now() - Duration::from_secs(1));
    let mut instrument =
        Instrument::spawn("drums", buffer, channel, ChannelId(0), epoch, 4).unwrap();
    assert!(wait_for(|| probe.play_count() == 1));
    assert!(instrument.pause());
    let paused_at = probe.plays()[0].start_sample;
    assert!(paused_at < 52_920, "{}", paused_at);

    let resume_at = epoch.instant() + Duration::from_secs(3);
    std::thread::sleep(resume_at.saturating_duration_since(Instant::now()));
    assert!(instrument.resume());
    assert!(wait_for(|| probe.play_count() == 2));

    let resumed_at = probe.plays()[1].start_sample;
    assert!(
        (132_300..132_300 + 4410).contains(&resumed_at),
        "resumed at {}",
        resumed_at
    );

    instrument.stop();
    assert!(instrument.join(Duration::from_secs(1)));
}

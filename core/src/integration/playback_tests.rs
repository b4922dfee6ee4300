//! Playback Controller Tests (seeking, speed, settings changes, savestates)

use std::path::Path;
use std::sync::Arc;

use crate::playback::{Playback, ReversiblePlayback, create_playback};
use crate::player::{GamePlayer, PlayerEvent};
use crate::settings::{GameSettings, PlaybackConfig};
use crate::test_utils::{MockCore, MockGateway};

use super::test_utils::*;

/// Test seeking back and forth within the buffered window
#[test]
fn test_seek_within_window() {
    let (playback, probe, _, _) = new_test_playback(60.0);
    play_frames(&playback, 600);
    assert_eq!(playback.time_ms(), 10_000);

    playback.seek_time_ms(5_000);
    assert_eq!(playback.time_ms(), 5_000);
    assert_eq!(playback.cache_time_ms(), 5_000);
    assert_eq!(probe.counter(), 300);
    assert_eq!(playback.total_frame_count(), 300);

    playback.seek_time_ms(7_500);
    assert_eq!(playback.time_ms(), 7_500);
    assert_eq!(probe.counter(), 450);

    // Seek restores normal speed
    assert_eq!(playback.speed(), 1.0);
}

/// Test that out-of-range seeks clamp to the buffered window
#[test]
fn test_seek_clamps_to_window() {
    let (playback, _, _, _) = new_test_playback(60.0);
    play_frames(&playback, 120);

    playback.seek_time_ms(0);
    // The oldest retained frame is still one frame in
    assert_eq!(playback.time_ms(), 17);
    assert_eq!(playback.stats().past_frames, 0);

    playback.seek_time_ms(u64::MAX);
    assert_eq!(playback.time_ms(), 2_000);
    assert_eq!(playback.cache_time_ms(), 0);
}

/// Test that seeking to a later time never lands earlier
#[test]
fn test_seek_is_monotonic() {
    let (playback, _, _, _) = new_test_playback(60.0);
    play_frames(&playback, 900);
    let start = playback.time_ms();

    let targets = [0, 250, 1_000, 4_321, 9_000, 14_999, 15_000];
    let mut landed = Vec::new();
    for target in targets {
        playback.seek_time_ms(target);
        landed.push(playback.time_ms());
        // Back to the same starting point
        playback.seek_time_ms(start);
        assert_eq!(playback.time_ms(), start);
    }

    assert!(landed.windows(2).all(|pair| pair[0] <= pair[1]), "{landed:?}");
}

/// Test reverse speed throttling
#[test]
fn test_reverse_speed_is_quarter_rate() {
    let (playback, _, _, _) = new_test_playback(60.0);

    playback.set_speed(-2.0);
    assert_eq!(playback.tick_rate(), 60.0 * 0.5);

    playback.set_speed(-1.0);
    assert_eq!(playback.tick_rate(), 15.0);
    assert_eq!(playback.speed(), -1.0);

    playback.set_speed(2.0);
    assert_eq!(playback.tick_rate(), 120.0);
}

/// Test rewinding with rewind ticks and then replaying
#[test]
fn test_rewind_ticks_then_replay() {
    let (playback, probe, _, _) = new_test_playback(60.0);
    play_frames(&playback, 100);

    rewind_ticks(&playback, 40);
    assert_eq!(playback.stats().future_frames, 40);
    assert_eq!(playback.total_frame_count(), 60);

    // Forward play discards the redo frames
    play_frames(&playback, 1);
    assert_eq!(playback.stats().future_frames, 0);
    assert_eq!(probe.counter(), 62);
}

/// Test turning rewind off mid-session
#[test]
fn test_disable_rewind_mid_session() {
    let (playback, probe, settings, _) = new_test_playback(60.0);
    play_frames(&playback, 300);
    assert!(playback.cache_time_ms() == 0 && playback.time_ms() > 0);
    rewind_ticks(&playback, 10);
    assert!(playback.cache_time_ms() > 0);

    settings.set_rewind_enabled(false);
    assert!(!playback.rewind_enabled());
    assert_eq!(playback.cache_time_ms(), 0);
    assert_eq!(playback.time_ms(), 0);
    assert_eq!(playback.total_time_ms(), 0);
    assert_eq!(playback.history_memory_usage(), 0);

    // The core keeps running without recording history
    let frames_run = probe.frames_run();
    let serialized = probe.serialize_calls();
    play_frames(&playback, 30);
    assert_eq!(probe.frames_run(), frames_run + 30);
    assert_eq!(probe.serialize_calls(), serialized);
    assert_eq!(playback.time_ms(), 0);

    // Re-enabling starts an empty buffer
    settings.set_rewind_enabled(true);
    assert!(playback.rewind_enabled());
    assert_eq!(playback.total_time_ms(), 60_000);
    assert_eq!(playback.time_ms(), 0);
}

/// Test that changing the buffer length resizes without losing recent history
#[test]
fn test_resize_rewind_buffer_mid_session() {
    let (playback, _, settings, _) = new_test_playback(60.0);
    play_frames(&playback, 900);

    settings.set_max_rewind_time_sec(10);
    assert_eq!(playback.total_time_ms(), 10_000);
    assert_eq!(playback.stats().past_frames, 599);

    // Below the minimum is raised to 10 seconds
    settings.set_max_rewind_time_sec(3);
    assert_eq!(playback.total_time_ms(), 10_000);

    settings.set_max_rewind_time_sec(120);
    assert_eq!(playback.total_time_ms(), 120_000);
    assert_eq!(playback.stats().past_frames, 599);
}

/// Test savestates for a core that cannot serialize
#[test]
fn test_unserializable_core_never_touches_gateway() {
    let settings = Arc::new(GameSettings::new(PlaybackConfig::default()));
    let gateway = MockGateway::new();
    let playback = ReversiblePlayback::new(
        Box::new(MockCore::new(0, 60.0)),
        settings.clone(),
        gateway.clone(),
    );

    assert!(!playback.rewind_enabled());
    assert!(!playback.can_seek());
    assert!(playback.create_savestate().is_none());
    assert!(!playback.load_savestate(Path::new("/mock/save-0.rpsav")));
    assert!(gateway.calls().is_empty());

    // Enabling rewind in settings cannot enable it for this core
    settings.set_max_rewind_time_sec(30);
    assert!(!playback.rewind_enabled());
}

/// Test that the factory chooses the engine from the core's capabilities
#[test]
fn test_factory_selects_engine() {
    let settings = Arc::new(GameSettings::default());
    let gateway = MockGateway::new();

    let reversible = create_playback(
        Box::new(MockCore::new(16, 60.0)),
        settings.clone(),
        gateway.clone(),
    );
    assert!(reversible.can_seek());
    assert_eq!(reversible.total_time_ms(), 60_000);

    let realtime = create_playback(Box::new(MockCore::new(0, 60.0)), settings.clone(), gateway);
    assert!(!realtime.can_seek());
    assert_eq!(realtime.total_time_ms(), 0);

    drop(reversible);
    drop(realtime);
    assert_eq!(settings.observer_count(), 0);
}

/// Test savestate round trip through the playback engine
#[test]
fn test_savestate_round_trip() {
    let (playback, probe, _, gateway) = new_test_playback(60.0);
    play_frames(&playback, 250);

    let path = playback.create_savestate().unwrap();
    assert_eq!(
        gateway.calls(),
        vec!["create_writer", "initialize", "write_save", "write_thumbnail", "commit"]
    );

    play_frames(&playback, 100);
    assert!(playback.load_savestate(&path));
    assert_eq!(probe.counter(), 250);
    assert_eq!(playback.total_frame_count(), 250);

    // Loading records the restored frame as the newest history entry
    assert_eq!(playback.stats().future_frames, 0);
}

/// Test that a failed write leaves nothing behind
#[test]
fn test_failed_savestate_write_rolls_back() {
    let (playback, _, _, gateway) = new_test_playback(60.0);
    play_frames(&playback, 10);
    gateway.set_fail_write(true);

    assert!(playback.create_savestate().is_none());
    assert_eq!(
        gateway.calls(),
        vec!["create_writer", "initialize", "write_save", "clean_up"]
    );
    assert!(gateway.saved_paths().is_empty());

    // History is intact after the failed save
    assert_eq!(playback.stats().past_frames, 9);
}

/// Test percentage and relative seeks through the player front end
#[test]
fn test_player_seek_controls() {
    let (playback, _, _, _) = new_test_playback(60.0);
    let handler = playback.tick_handler();
    for _ in 0..3600 {
        handler.on_forward_tick();
    }

    let mut player = GamePlayer::new(Box::new(playback));
    let events = player.subscribe();
    assert_eq!(player.time_ms(), 60_000);
    assert_eq!(player.cache_percentage(), 0.0);

    player.seek_percentage(25.0);
    assert_eq!(player.time_ms(), 15_000);
    assert_eq!(player.cache_percentage(), 75.0);

    assert!(player.seek_time_relative(-5_000));
    assert_eq!(player.time_ms(), 10_000);

    // Clamped to the window
    player.seek_percentage(250.0);
    assert_eq!(player.time_ms(), 60_000);
    assert!(player.seek_time_relative(-120_000));
    assert_eq!(player.time_ms(), 17);

    // Seeks run at normal speed, so nothing changed
    assert!(events.try_recv().is_err());

    player.toggle_pause();
    player.seek_percentage(50.0);
    let received: Vec<PlayerEvent> = events.try_iter().collect();
    assert_eq!(
        received,
        vec![
            PlayerEvent::Paused,
            PlayerEvent::SpeedChanged(0.0),
            PlayerEvent::Resumed,
            PlayerEvent::SpeedChanged(1.0),
        ]
    );
}

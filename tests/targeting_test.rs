//! Target selector behaviour over synthetic track sequences


use sprayer_targeting::{
    targeting::{
        FiringMode, JoystickMapping, JoystickSample, Selection, TargetSelector, TargetingMode,
    },
    tracker::FrameSize,
};
use std::time::{Duration, Instant};
use test_helpers::row_of_tracks;

const FRAME: FrameSize = FrameSize::new(640, 480);

fn millis(ms: u64) -> Duration {
    Duration::from_millis(ms)
}

#[test]
fn test_automatic_cycles_every_hold_duration() {
    let tracks = row_of_tracks(3);
    let mut selector = TargetSelector::default();
    selector.set_hold_duration(2.0);

    let t0 = Instant::now();
    let mut indices = Vec::new();
    for at in [0, 2_001, 4_002, 6_003] {
        selector.tick(&tracks, FRAME, t0 + millis(at));
        indices.push(selector.state().current_target_index);
    }
    assert_eq!(indices, vec![0, 1, 2, 0]);
}

#[test]
fn test_automatic_holds_between_switches() {
    let tracks = row_of_tracks(3);
    let mut selector = TargetSelector::default();
    selector.set_hold_duration(2.0);

    let t0 = Instant::now();
    for at in (0..=2_000).step_by(100) {
        selector.tick(&tracks, FRAME, t0 + millis(at));
        assert_eq!(selector.state().current_target_index, 0, "switched early at {at} ms");
    }
}

#[test]
fn test_automatic_aims_at_selected_track_foot() {
    let tracks = row_of_tracks(3);
    let mut selector = TargetSelector::default();
    selector.set_hold_duration(1.0);

    let t0 = Instant::now();
    selector.tick(&tracks, FRAME, t0);
    let sel = selector.tick(&tracks, FRAME, t0 + millis(1_500));
    // Second track spans x 170..230, bottom edge at y 300
    assert_eq!(sel.pixel(), Some((200.0, 300.0)));
}

#[test]
fn test_empty_track_list_yields_no_target() {
    let mut selector = TargetSelector::default();
    selector.set_hold_duration(1.0);
    let t0 = Instant::now();

    selector.tick(&row_of_tracks(3), FRAME, t0);
    selector.tick(&row_of_tracks(3), FRAME, t0 + millis(1_100));
    selector.tick(&row_of_tracks(3), FRAME, t0 + millis(2_200));
    assert_eq!(selector.state().current_target_index, 2);

    let sel = selector.tick(&[], FRAME, t0 + millis(2_300));
    assert_eq!(sel, Selection::NoTarget);
    assert_eq!(selector.state().current_target_index, 0);

    // Tracks reappear: no stale index is reused
    let sel = selector.tick(&row_of_tracks(1), FRAME, t0 + millis(2_400));
    assert_eq!(sel.pixel(), Some((50.0, 300.0)));
}

#[test]
fn test_toggle_twice_restores_firing_state() {
    let mut selector =
        TargetSelector::new(TargetingMode::Cursor, FiringMode::Toggle, JoystickMapping::default());
    let now = Instant::now();
    let before = selector.tick(&[], FRAME, now).is_firing();

    selector.activate();
    assert_ne!(selector.tick(&[], FRAME, now).is_firing(), before);
    selector.activate();
    assert_eq!(selector.tick(&[], FRAME, now).is_firing(), before);
}

#[test]
fn test_cursor_position_emitted_verbatim() {
    let mut selector =
        TargetSelector::new(TargetingMode::Cursor, FiringMode::Hold, JoystickMapping::default());
    let now = Instant::now();
    selector.tick(&row_of_tracks(2), FRAME, now);
    selector.set_cursor(123.0, 456.0);
    assert_eq!(
        selector.tick(&row_of_tracks(2), FRAME, now),
        Selection::Aim {
            x: 123.0,
            y: 456.0,
            firing: false,
            aux: false
        }
    );
}

#[test]
fn test_firing_state_carries_into_automatic_mode() {
    let mut selector =
        TargetSelector::new(TargetingMode::Cursor, FiringMode::Toggle, JoystickMapping::default());
    selector.activate();
    selector.set_mode(TargetingMode::Automatic);
    let sel = selector.tick(&row_of_tracks(1), FRAME, Instant::now());
    assert!(sel.is_firing());
}

#[test]
fn test_joystick_ignores_tracks_and_mirrors_trigger() {
    let mut selector =
        TargetSelector::new(TargetingMode::Joystick, FiringMode::Toggle, JoystickMapping::default());
    let now = Instant::now();

    selector.set_joystick(JoystickSample::new(-1.0, 1.0, false, false));
    let sel = selector.tick(&row_of_tracks(3), FRAME, now);
    // Full left: pan 0 -> x 0; full down: tilt 180 -> y 0
    assert_eq!(sel.pixel(), Some((0.0, 0.0)));
    assert!(!sel.is_firing());

    selector.set_joystick(JoystickSample::new(0.5, 0.0, true, false));
    let sel = selector.tick(&[], FRAME, now);
    assert_eq!(sel.pixel(), Some((480.0, 240.0)));
    assert!(sel.is_firing());
}

#[test]
fn test_mode_switch_changes_handler() {
    let mut selector = TargetSelector::default();
    let now = Instant::now();
    assert_eq!(selector.tick(&[], FRAME, now), Selection::NoTarget);

    selector.set_mode(TargetingMode::Cursor);
    assert!(selector.tick(&[], FRAME, now).pixel().is_some());
}

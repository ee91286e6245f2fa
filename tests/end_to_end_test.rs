//! Pixel-to-wire scenarios through the full control loop


use approx::assert_relative_eq;
use sprayer_targeting::{
    app::{OperatorEvent, SprayerApp},
    command_channel::NoopCommandLog,
    config::Config,
    homography::compute_transform,
    pan_tilt::{ExtrinsicParams, PanTiltModel},
    targeting::{Selection, TargetingMode},
    tracker::{BoundingBox, ScriptedTrackSource, Track},
    Result,
};
use std::{
    io::{BufRead, BufReader},
    time::{Duration, Instant},
};
use test_helpers::{accept_with_timeout, full_frame_floor, local_listener, vga_frame};

const LEVEL: ExtrinsicParams = ExtrinsicParams::new(1.5, 0.0, 0.0, 0.0);

#[test]
fn test_farther_targets_need_shallower_tilt() -> Result<()> {
    let transform = compute_transform(640, 480, &full_frame_floor(640, 480)?)?;
    let model = PanTiltModel::new(LEVEL)?;

    // Full-frame floor maps pixels to floor units one-to-one
    let (x, y) = transform.pixel_to_floor(0.0, 2.0)?;
    assert_relative_eq!(x, 0.0, epsilon = 1e-9);
    assert_relative_eq!(y, 2.0, epsilon = 1e-9);

    let (_, near_tilt) = model.angles_for(0.0, 2.0, 0.0);
    let (_, far_tilt) = model.angles_for(0.0, 5.0, 0.0);
    assert!(near_tilt.abs() > far_tilt.abs());
    assert_relative_eq!(near_tilt, -(1.5f64 / 2.0).atan().to_degrees(), epsilon = 1e-9);
    assert_relative_eq!(far_tilt, -(1.5f64 / 5.0).atan().to_degrees(), epsilon = 1e-9);
    Ok(())
}

#[test]
fn test_control_loop_streams_commands() -> Result<()> {
    let (listener, port) = local_listener();
    let mut config = Config::default();
    config.actuator.port = port;

    let target = Track::new(9, BoundingBox::new(290.0, 100.0, 350.0, 400.0));
    let frames = vec![vga_frame(vec![target]), vga_frame(vec![target])];
    let (mut app, handle) = SprayerApp::new(
        &config,
        full_frame_floor(640, 480)?,
        LEVEL,
        Box::new(ScriptedTrackSource::new(frames)),
        Box::new(NoopCommandLog),
    )?;
    let server = accept_with_timeout(&listener);

    let t0 = Instant::now();
    let first = app.tick(t0)?;
    assert!(first.connected);
    let sent = first.sent.expect("first tick transmits");
    let (pan, tilt) = first.angles.expect("target in view");
    // Target at floor (320, 400) relative to a mount at the origin
    assert_relative_eq!(pan, 400f64.atan2(320.0).to_degrees(), epsilon = 1e-9);
    assert!(tilt < 0.0);
    assert_eq!(sent.tilt, 0);

    // Second tick inside the same interval is held back
    let second = app.tick(t0 + Duration::from_millis(5))?;
    assert!(second.command.is_some());
    assert!(second.sent.is_none());

    handle.send(OperatorEvent::Stop);
    assert!(app.tick(t0 + Duration::from_millis(50))?.stop_requested);
    drop(app);

    let lines: Vec<String> = BufReader::new(server)
        .lines()
        .map(|l| l.expect("read record"))
        .collect();
    assert_eq!(lines, vec![sent.to_string()]);
    Ok(())
}

#[test]
fn test_held_back_command_not_sent_after_target_lost() -> Result<()> {
    let (listener, port) = local_listener();
    let mut config = Config::default();
    config.actuator.port = port;

    let a = Track::new(1, BoundingBox::new(290.0, 100.0, 350.0, 400.0));
    let b = Track::new(2, BoundingBox::new(20.0, 100.0, 80.0, 300.0));
    let frames = vec![vga_frame(vec![a]), vga_frame(vec![b]), vga_frame(vec![])];
    let (mut app, _handle) = SprayerApp::new(
        &config,
        full_frame_floor(640, 480)?,
        LEVEL,
        Box::new(ScriptedTrackSource::new(frames)),
        Box::new(NoopCommandLog),
    )?;
    let server = accept_with_timeout(&listener);

    let t0 = Instant::now();
    let first = app.tick(t0)?.sent.expect("first tick transmits");

    // Aim at B is computed but held back by the rate limit
    let second = app.tick(t0 + Duration::from_millis(5))?;
    assert!(second.command.is_some());
    assert!(second.sent.is_none());

    // Targets gone once the interval has passed: nothing goes out
    let third = app.tick(t0 + Duration::from_millis(40))?;
    assert_eq!(third.selection, Selection::NoTarget);
    assert!(third.command.is_none());
    assert!(third.sent.is_none());
    assert!(app.channel().staged().is_none());
    drop(app);

    let lines: Vec<String> = BufReader::new(server)
        .lines()
        .map(|l| l.expect("read record"))
        .collect();
    assert_eq!(lines, vec![first.to_string()]);
    Ok(())
}

#[test]
fn test_mode_switch_through_operator_handle() -> Result<()> {
    let mut config = Config::default();
    config.actuator.port = test_helpers::closed_port();
    config.actuator.connect_timeout_ms = 200;

    let (mut app, handle) = SprayerApp::new(
        &config,
        full_frame_floor(640, 480)?,
        LEVEL,
        Box::new(ScriptedTrackSource::new(vec![vga_frame(vec![]), vga_frame(vec![])])),
        Box::new(NoopCommandLog),
    )?;

    let report = app.tick(Instant::now())?;
    assert!(report.angles.is_none());

    let operator = std::thread::spawn(move || {
        handle.send(OperatorEvent::SetMode(TargetingMode::Cursor));
        handle.send(OperatorEvent::PointerMoved { x: 320.0, y: 240.0 });
    });
    operator.join().expect("operator thread");

    let report = app.tick(Instant::now())?;
    let (x, y) = report.floor_point.expect("cursor aim");
    assert_relative_eq!(x, 320.0, epsilon = 1e-6);
    assert_relative_eq!(y, 240.0, epsilon = 1e-6);
    assert!(report.command.is_some());
    assert!(!report.connected);
    Ok(())
}

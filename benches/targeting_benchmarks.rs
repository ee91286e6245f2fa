//! Benchmarks for the per-tick targeting path and the calibration solver

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use sprayer_targeting::{
    calibration::{fit, CalibrationSample},
    command_channel::ActuatorCommand,
    homography::{FloorRectangle, PerspectiveTransform},
    pan_tilt::{angles_for, ExtrinsicParams},
    targeting::TargetSelector,
    tracker::{BoundingBox, FrameSize, Track},
};
use std::time::{Duration, Instant};

fn floor() -> FloorRectangle {
    FloorRectangle::new([[180.0, 220.0], [460.0, 220.0], [620.0, 470.0], [20.0, 470.0]])
        .expect("valid floor")
}

fn benchmark_geometry(c: &mut Criterion) {
    let mut group = c.benchmark_group("geometry");
    let floor = floor();
    let transform = PerspectiveTransform::compute(640, 480, &floor).expect("transform");
    let params = ExtrinsicParams::new(1.5, 5.0, -3.0, 1.0);

    group.bench_function("compute_transform", |b| {
        b.iter(|| PerspectiveTransform::compute(black_box(640), black_box(480), black_box(&floor)));
    });

    group.bench_function("pixel_to_floor", |b| {
        b.iter(|| transform.pixel_to_floor(black_box(320.0), black_box(400.0)));
    });

    group.bench_function("angles_for", |b| {
        b.iter(|| angles_for(black_box(1.0), black_box(2.5), black_box(0.0), black_box(&params)));
    });

    group.bench_function("pixel_to_command", |b| {
        b.iter(|| {
            let (x, y) = transform.pixel_to_floor(black_box(320.0), black_box(400.0)).ok()?;
            let (pan, tilt) = angles_for(x, y, 0.0, &params);
            ActuatorCommand::from_angles(pan, tilt, false, false).ok()
        });
    });

    group.finish();
}

fn benchmark_selector(c: &mut Criterion) {
    let mut group = c.benchmark_group("selector");
    let frame = FrameSize::new(640, 480);

    for n in [1u64, 10, 50] {
        let tracks: Vec<Track> = (0..n)
            .map(|i| {
                let x = (i % 10) as f64 * 60.0;
                Track::new(i, BoundingBox::new(x, 50.0, x + 40.0, 250.0))
            })
            .collect();

        group.bench_with_input(BenchmarkId::new("automatic_tick", n), &tracks, |b, tracks| {
            let mut selector = TargetSelector::default();
            let t0 = Instant::now();
            let mut step = 0u64;
            b.iter(|| {
                step += 1;
                black_box(selector.tick(tracks, frame, t0 + Duration::from_millis(33 * step)))
            });
        });
    }

    group.finish();
}

fn benchmark_calibration(c: &mut Criterion) {
    let truth = ExtrinsicParams::new(1.4, 8.0, -6.0, 3.0);
    let samples: Vec<CalibrationSample> = [
        [-2.0, 1.0, 0.0],
        [-1.0, 2.5, 0.0],
        [0.0, 1.0, 0.0],
        [0.0, 4.0, 0.0],
        [1.0, 2.0, 0.0],
        [2.0, 1.5, 0.0],
    ]
    .iter()
    .map(|&p| {
        let (pan, tilt) = angles_for(p[0], p[1], p[2], &truth);
        CalibrationSample::new(p, [pan, tilt])
    })
    .collect();
    let guess = ExtrinsicParams::new(1.5, 0.0, 0.0, 0.0);

    c.bench_function("calibration_fit_6_samples", |b| {
        b.iter(|| fit(black_box(&samples), black_box(guess)));
    });
}

criterion_group!(benches, benchmark_geometry, benchmark_selector, benchmark_calibration);
criterion_main!(benches);

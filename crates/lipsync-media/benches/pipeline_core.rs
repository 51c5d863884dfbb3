//! Pipeline core benchmarks
//!
//! Covers the CPU-bound stages that run without FFmpeg or model files.
//!
//! # Running Benchmarks
//! ```bash
//! cargo bench --package lipsync-media --bench pipeline_core
//! ```
//!
//! # Metrics Measured
//! - Mel spectrogram throughput (seconds of audio)
//! - Box smoothing over long tracks
//! - Batch assembly (crop, resize, mask) per batch size

use std::time::Duration;

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use image::{Rgb, RgbImage};
use lipsync_media::face::{smooth_boxes, BoundingBox, BoxCoords, FaceTrack};
use lipsync_media::{BatchAssembler, Frame, FrameSequence, MelChunks, MelSpectrogram};
use lipsync_models::PixelRect;
use ndarray::Array2;

fn tone(seconds: usize) -> Vec<f32> {
    (0..16000 * seconds)
        .map(|i| 0.3 * (2.0 * std::f32::consts::PI * 220.0 * i as f32 / 16000.0).sin())
        .collect()
}

fn bench_mel(c: &mut Criterion) {
    let mut group = c.benchmark_group("mel_spectrogram");
    group.warm_up_time(Duration::from_secs(1));
    group.measurement_time(Duration::from_secs(5));

    let spectrogram = MelSpectrogram::default();
    for seconds in [1usize, 10, 60] {
        let samples = tone(seconds);
        group.throughput(Throughput::Elements(seconds as u64));
        group.bench_with_input(BenchmarkId::from_parameter(seconds), &samples, |b, samples| {
            b.iter(|| spectrogram.compute(black_box(samples)))
        });
    }
    group.finish();
}

fn bench_smoothing(c: &mut Criterion) {
    let mut group = c.benchmark_group("box_smoothing");

    let raw: Vec<Option<BoxCoords>> = (0..9000)
        .map(|i| {
            let jitter = (i % 7) as f64;
            (i % 50 != 0).then(|| BoxCoords::new(100.0 + jitter, 300.0 + jitter, 80.0, 260.0))
        })
        .collect();

    for window in [1usize, 5, 15] {
        group.throughput(Throughput::Elements(raw.len() as u64));
        group.bench_with_input(BenchmarkId::from_parameter(window), &window, |b, &window| {
            b.iter(|| smooth_boxes(black_box(&raw), window))
        });
    }
    group.finish();
}

fn bench_batch_assembly(c: &mut Criterion) {
    let mut group = c.benchmark_group("batch_assembly");
    group.warm_up_time(Duration::from_secs(1));
    group.measurement_time(Duration::from_secs(5));

    let frames = FrameSequence::from_frames(
        (0..128)
            .map(|i| Frame::new(i, RgbImage::from_pixel(640, 480, Rgb([(i % 255) as u8, 90, 160]))))
            .collect(),
        25.0,
    );
    let track = FaceTrack::new(vec![BoundingBox(PixelRect::new(200, 120, 220, 260)); 128]);
    let mel = Array2::from_elem((80, 420), 0.5f32);
    let mels = match MelChunks::slice(mel, 25.0, 16) {
        Ok(mels) => mels,
        Err(e) => panic!("mel chunking failed: {e}"),
    };

    for batch_size in [16usize, 64, 128] {
        group.throughput(Throughput::Elements(128));
        group.bench_with_input(
            BenchmarkId::from_parameter(batch_size),
            &batch_size,
            |b, &batch_size| {
                b.iter(|| {
                    BatchAssembler::new(&frames, &track, &mels, batch_size, 96)
                        .map(|batch| batch.map(|b| b.len()).unwrap_or(0))
                        .sum::<usize>()
                })
            },
        );
    }
    group.finish();
}

criterion_group!(benches, bench_mel, bench_smoothing, bench_batch_assembly);
criterion_main!(benches);

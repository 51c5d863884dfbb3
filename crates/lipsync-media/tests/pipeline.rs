//! Pipeline core tests with a deterministic generator and a scripted detector.
//!
//! Nothing here needs FFmpeg or model files.

use std::f32::consts::PI;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use image::{Rgb, RgbImage};
use lipsync_media::face::{smooth_boxes, BoxCoords};
use lipsync_media::{
    prepare_inputs, render, AudioMelExtractor, BatchAssembler, CollectingSink, Deadline,
    ErrorKind, FaceDetection, FaceDetector, FaceLocator, Frame, FrameSequence, InferenceAdapter,
    MediaError, MediaResult, MelChunks, ProgressReporter,
};
use lipsync_models::{BoxOverride, Pads, PipelineConfig};
use ndarray::{s, Array2, Array4};

/// Returns the unmasked half of the conditioning input as the patch.
struct EchoGenerator {
    calls: AtomicUsize,
    items: AtomicUsize,
}

impl EchoGenerator {
    fn new() -> Self {
        Self {
            calls: AtomicUsize::new(0),
            items: AtomicUsize::new(0),
        }
    }
}

impl InferenceAdapter for EchoGenerator {
    fn infer(&self, faces: &Array4<f32>, mels: &Array4<f32>) -> MediaResult<Array4<f32>> {
        assert_eq!(faces.dim().0, mels.dim().0);
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.items.fetch_add(faces.dim().0, Ordering::SeqCst);
        Ok(faces.slice(s![.., 3..6, .., ..]).to_owned())
    }
}

/// Finds a face at a fixed spot and counts how often it is asked.
struct CountingDetector {
    frames_seen: AtomicUsize,
}

impl FaceDetector for CountingDetector {
    fn detect(&self, frames: &[&RgbImage]) -> MediaResult<Vec<Option<FaceDetection>>> {
        self.frames_seen.fetch_add(frames.len(), Ordering::SeqCst);
        Ok(frames
            .iter()
            .map(|_| Some(FaceDetection::new(8.0, 8.0, 40.0, 40.0, 0.97)))
            .collect())
    }
}

fn counting_detector() -> Arc<CountingDetector> {
    Arc::new(CountingDetector {
        frames_seen: AtomicUsize::new(0),
    })
}

/// Frames whose pixels encode their own index.
fn video(n: usize) -> FrameSequence {
    let frames = (0..n)
        .map(|i| {
            let img = RgbImage::from_fn(48, 48, |x, y| {
                Rgb([(i % 256) as u8, (x * 5) as u8, (y * 5) as u8])
            });
            Frame::new(i, img)
        })
        .collect();
    FrameSequence::from_frames(frames, 25.0)
}

fn mel_chunks(columns: usize) -> MelChunks {
    let mel = Array2::from_shape_fn((80, columns), |(m, c)| ((m + c) % 8) as f32 - 4.0);
    MelChunks::slice(mel, 25.0, 16).unwrap()
}

fn config(batch_size: usize) -> PipelineConfig {
    PipelineConfig {
        batch_size,
        face_det_batch_size: 7,
        pads: Pads::new(0, 0, 0, 0),
        img_size: 16,
        ..Default::default()
    }
}

async fn render_all(
    frames: &FrameSequence,
    mels: &MelChunks,
    config: &PipelineConfig,
    generator: &EchoGenerator,
) -> MediaResult<CollectingSink> {
    let detector: Arc<dyn FaceDetector> = counting_detector();
    let track = FaceLocator::new(Some(detector)).locate(frames, config)?;
    let mut sink = CollectingSink::default();
    render(
        frames,
        &track,
        mels,
        config,
        generator,
        &mut sink,
        &ProgressReporter::silent(),
        &Deadline::unlimited(),
    )
    .await?;
    Ok(sink)
}

#[tokio::test]
async fn test_batch_size_does_not_change_output() {
    let frames = video(30);
    let mels = mel_chunks(100);

    let small = EchoGenerator::new();
    let large = EchoGenerator::new();
    let one = render_all(&frames, &mels, &config(1), &small).await.unwrap();
    let many = render_all(&frames, &mels, &config(64), &large).await.unwrap();

    assert_eq!(one.frames.len(), many.frames.len());
    for (a, b) in one.frames.iter().zip(&many.frames) {
        assert_eq!(a.index, b.index);
        assert_eq!(a.image, b.image);
    }
    assert_eq!(small.calls.load(Ordering::SeqCst), one.frames.len());
    assert_eq!(large.calls.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_output_count_is_shorter_stream() {
    let mels = mel_chunks(100); // 28 chunks

    let long_video = render_all(&video(40), &mels, &config(8), &EchoGenerator::new())
        .await
        .unwrap();
    assert_eq!(long_video.frames.len(), 28);

    let short_video = render_all(&video(10), &mels, &config(8), &EchoGenerator::new())
        .await
        .unwrap();
    assert_eq!(short_video.frames.len(), 10);
}

#[tokio::test]
async fn test_output_indices_are_contiguous_and_ordered() {
    let mels = mel_chunks(100);
    let sink = render_all(&video(40), &mels, &config(5), &EchoGenerator::new())
        .await
        .unwrap();

    let indices: Vec<usize> = sink.frames.iter().map(|f| f.index).collect();
    assert_eq!(indices, (0..mels.len()).collect::<Vec<_>>());
}

#[tokio::test]
async fn test_compositing_keeps_pixels_outside_the_face() {
    let frames = video(4);
    let sink = render_all(&frames, &mel_chunks(100), &config(2), &EchoGenerator::new())
        .await
        .unwrap();

    for out in &sink.frames {
        let source = &frames.frames()[out.index].image;
        assert_eq!(out.image.dimensions(), source.dimensions());
        // outside the (8..40) box
        assert_eq!(out.image.get_pixel(2, 2), source.get_pixel(2, 2));
        assert_eq!(out.image.get_pixel(45, 45), source.get_pixel(45, 45));
    }
}

#[test]
fn test_assembler_partitions_index_space() {
    let frames = video(50);
    let mels = mel_chunks(160);
    let cfg = config(6);
    let detector: Arc<dyn FaceDetector> = counting_detector();
    let track = FaceLocator::new(Some(detector)).locate(&frames, &cfg).unwrap();

    let mut seen = Vec::new();
    let mut sizes = Vec::new();
    for batch in BatchAssembler::new(&frames, &track, &mels, 6, 16) {
        let batch = batch.unwrap();
        sizes.push(batch.len());
        seen.extend(batch.indices());
    }

    let expected = frames.output_len(mels.len());
    assert_eq!(seen, (0..expected).collect::<Vec<_>>());
    assert!(sizes[..sizes.len() - 1].iter().all(|&n| n == 6));
    assert!(*sizes.last().unwrap() >= 1);
}

#[test]
fn test_box_override_never_calls_detector() {
    let frames = video(12);
    let detector = counting_detector();
    let cfg = PipelineConfig {
        face_box: BoxOverride::new(4, 36, 6, 30),
        ..config(4)
    };

    let shared: Arc<dyn FaceDetector> = detector.clone();
    let track = FaceLocator::new(Some(shared)).locate(&frames, &cfg).unwrap();
    let mels = mel_chunks(100);

    let regions: Vec<_> = BatchAssembler::new(&frames, &track, &mels, 5, 16)
        .flat_map(|b| b.unwrap().items)
        .map(|item| item.bbox.edges())
        .collect();

    assert_eq!(detector.frames_seen.load(Ordering::SeqCst), 0);
    assert_eq!(regions.len(), 12);
    assert!(regions.iter().all(|&r| r == (4, 36, 6, 30)));
}

#[tokio::test]
async fn test_static_image_repeats_for_every_chunk() {
    let still = FrameSequence::still(Frame::new(0, RgbImage::from_pixel(48, 48, Rgb([9, 9, 9]))), 25.0);
    let mels = mel_chunks(100);
    let detector = counting_detector();
    let shared: Arc<dyn FaceDetector> = detector.clone();
    let cfg = config(8);

    let track = FaceLocator::new(Some(shared)).locate(&still, &cfg).unwrap();
    let mut sink = CollectingSink::default();
    let written = render(
        &still,
        &track,
        &mels,
        &cfg,
        &EchoGenerator::new(),
        &mut sink,
        &ProgressReporter::silent(),
        &Deadline::unlimited(),
    )
    .await
    .unwrap();

    assert_eq!(detector.frames_seen.load(Ordering::SeqCst), 1);
    assert_eq!(written, mels.len());
    assert_eq!(sink.frames.len(), mels.len());
}

#[tokio::test]
async fn test_digital_silence_fails_before_frames_or_inference() {
    let detector = counting_detector();
    let locator = FaceLocator::new(Some(detector.clone() as Arc<dyn FaceDetector>));
    let generator = EchoGenerator::new();
    let frame_reads = AtomicUsize::new(0);
    let cfg = config(4);
    let mut sink = CollectingSink::default();

    let result = async {
        let prepared = prepare_inputs(
            &vec![0.0; 16000 * 2],
            25.0,
            |limit| {
                frame_reads.fetch_add(1, Ordering::SeqCst);
                async move { Ok(video(limit)) }
            },
            &locator,
            &cfg,
            &ProgressReporter::silent(),
            &Deadline::unlimited(),
        )
        .await?;
        render(
            &prepared.frames,
            &prepared.track,
            &prepared.mels,
            &cfg,
            &generator,
            &mut sink,
            &ProgressReporter::silent(),
            &Deadline::unlimited(),
        )
        .await
    }
    .await;

    let err = result.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Audio);
    assert!(matches!(err, MediaError::Audio(_)));
    assert_eq!(frame_reads.load(Ordering::SeqCst), 0);
    assert_eq!(detector.frames_seen.load(Ordering::SeqCst), 0);
    assert_eq!(generator.calls.load(Ordering::SeqCst), 0);
    assert!(sink.frames.is_empty());
}

#[tokio::test]
async fn test_frames_are_requested_up_to_the_mel_chunk_count() {
    let samples: Vec<f32> = (0..16000 * 2)
        .map(|i| 0.4 * (2.0 * PI * 180.0 * i as f32 / 16000.0).sin())
        .collect();
    let detector = counting_detector();
    let locator = FaceLocator::new(Some(detector.clone() as Arc<dyn FaceDetector>));
    let requested = AtomicUsize::new(0);

    let prepared = prepare_inputs(
        &samples,
        25.0,
        |limit| {
            requested.store(limit, Ordering::SeqCst);
            async move { Ok(video(limit)) }
        },
        &locator,
        &config(4),
        &ProgressReporter::silent(),
        &Deadline::unlimited(),
    )
    .await
    .unwrap();

    assert_eq!(requested.load(Ordering::SeqCst), prepared.mels.len());
    assert_eq!(prepared.frames.len(), prepared.mels.len());
    assert_eq!(detector.frames_seen.load(Ordering::SeqCst), prepared.frames.len());
}

#[tokio::test]
async fn test_five_seconds_at_25_fps() {
    let samples: Vec<f32> = (0..16000 * 5)
        .map(|i| 0.4 * (2.0 * PI * 180.0 * i as f32 / 16000.0).sin())
        .collect();
    let mels = AudioMelExtractor::new(16)
        .chunks_from_samples(&samples, 25.0)
        .unwrap();

    // 401 spectrogram columns; floor(i * 3.2) + 16 <= 401 for i <= 120, plus the tail chunk
    assert_eq!(mels.len(), 122);
    let last = mels.get(mels.len() - 1).unwrap();
    assert_eq!(last.start, 401 - 16);
    assert_eq!(last.data.ncols(), 16);

    let sink = render_all(&video(125), &mels, &config(32), &EchoGenerator::new())
        .await
        .unwrap();
    assert_eq!(sink.frames.len(), 122);
}

#[tokio::test]
async fn test_spent_deadline_aborts_rendering() {
    let frames = video(10);
    let mels = mel_chunks(100);
    let cfg = config(4);
    let detector: Arc<dyn FaceDetector> = counting_detector();
    let track = FaceLocator::new(Some(detector)).locate(&frames, &cfg).unwrap();
    let generator = EchoGenerator::new();
    let mut sink = CollectingSink::default();

    let err = render(
        &frames,
        &track,
        &mels,
        &cfg,
        &generator,
        &mut sink,
        &ProgressReporter::silent(),
        &Deadline::new(Some(std::time::Duration::ZERO)),
    )
    .await
    .unwrap_err();

    assert_eq!(err.kind(), ErrorKind::Timeout);
    assert_eq!(generator.calls.load(Ordering::SeqCst), 0);
}

#[test]
fn test_smoothing_matches_forward_window_mean() {
    let raw: Vec<Option<BoxCoords>> = [3.0, 7.0, 1.0, 9.0, 4.0, 6.0, 2.0]
        .iter()
        .map(|&v| Some(BoxCoords::new(v, v * 2.0, v + 1.0, v * 3.0)))
        .collect();
    let window = 3;
    let smoothed = smooth_boxes(&raw, window);

    assert_eq!(smoothed.len(), raw.len());
    for i in 0..raw.len() {
        let slice: Vec<BoxCoords> = raw[i..(i + window).min(raw.len())].iter().flatten().copied().collect();
        let mean = slice.iter().map(|b| b.top).sum::<f64>() / slice.len() as f64;
        let got = smoothed[i].unwrap();
        assert!((got.top - mean).abs() < 1e-9, "frame {i}");
    }
}

#[test]
fn test_progress_reports_every_batch() {
    let seen = Arc::new(std::sync::Mutex::new(Vec::new()));
    let sink_ref = Arc::clone(&seen);
    let reporter = ProgressReporter::new(move |u| sink_ref.lock().unwrap().push(u.percent));

    let frames = video(20);
    let mels = mel_chunks(100);
    let cfg = config(5);
    let detector: Arc<dyn FaceDetector> = counting_detector();
    let track = FaceLocator::new(Some(detector)).locate(&frames, &cfg).unwrap();

    tokio_test::block_on(render(
        &frames,
        &track,
        &mels,
        &cfg,
        &EchoGenerator::new(),
        &mut CollectingSink::default(),
        &reporter,
        &Deadline::unlimited(),
    ))
    .unwrap();

    let percents = seen.lock().unwrap().clone();
    assert_eq!(percents.len(), 4);
    assert_eq!(*percents.last().unwrap(), 90);
    assert!(percents.windows(2).all(|w| w[0] <= w[1]));
}

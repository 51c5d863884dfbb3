//! Audio preparation: any input to 16 kHz mono PCM, then samples.

use std::path::Path;

use tracing::debug;

use crate::command::{FfmpegCommand, FfmpegRunner};
use crate::error::{MediaError, MediaResult};
use crate::frames::VIDEO_EXTENSIONS;
use crate::fs_utils::ensure_input_file;

/// Sample rate every spectrogram is computed at.
pub const SAMPLE_RATE: u32 = 16000;

/// Audio containers accepted as input.
const AUDIO_EXTENSIONS: &[&str] = &["wav", "mp3", "m4a", "aac", "flac", "ogg", "opus"];

/// Reject missing files and unknown containers.
///
/// Video containers are accepted too; ffmpeg takes their first audio track.
pub fn check_audio_input(path: &Path) -> MediaResult<()> {
    ensure_input_file(path)?;
    let ext = path
        .extension()
        .and_then(|e| e.to_str())
        .map(|e| e.to_ascii_lowercase())
        .unwrap_or_default();
    if AUDIO_EXTENSIONS.contains(&ext.as_str()) || VIDEO_EXTENSIONS.contains(&ext.as_str()) {
        Ok(())
    } else {
        Err(MediaError::UnsupportedFormat(format!(
            "audio file {} (expected one of {}, {})",
            path.display(),
            AUDIO_EXTENSIONS.join(", "),
            VIDEO_EXTENSIONS.join(", ")
        )))
    }
}

/// Convert `input` into a 16 kHz mono 16-bit WAV at `wav_out`.
pub async fn prepare_audio(runner: &FfmpegRunner, input: &Path, wav_out: &Path) -> MediaResult<()> {
    check_audio_input(input)?;

    let cmd = FfmpegCommand::new(input, wav_out)
        .no_video()
        .audio_mono(SAMPLE_RATE)
        .audio_codec("pcm_s16le");
    runner.run(&cmd).await?;

    debug!(
        input = %input.display(),
        output = %wav_out.display(),
        "Prepared audio track"
    );
    Ok(())
}

/// Read a 16 kHz mono WAV into samples in `[-1, 1)`.
pub fn read_wav(path: &Path) -> MediaResult<Vec<f32>> {
    let mut reader = hound::WavReader::open(path)?;
    let spec = reader.spec();

    if spec.sample_rate != SAMPLE_RATE || spec.channels != 1 {
        return Err(MediaError::audio(format!(
            "expected {SAMPLE_RATE} Hz mono, got {} Hz with {} channels",
            spec.sample_rate, spec.channels
        )));
    }

    let samples = match spec.sample_format {
        hound::SampleFormat::Int => {
            let scale = (1i64 << (spec.bits_per_sample - 1)) as f32;
            reader
                .samples::<i32>()
                .map(|s| s.map(|v| v as f32 / scale))
                .collect::<Result<Vec<_>, _>>()?
        }
        hound::SampleFormat::Float => reader.samples::<f32>().collect::<Result<Vec<_>, _>>()?,
    };

    if samples.is_empty() {
        return Err(MediaError::audio(format!("{} has no samples", path.display())));
    }
    Ok(samples)
}

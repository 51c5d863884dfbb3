//! Audio track to time-aligned mel chunks.

mod chunks;
mod extract;
mod mel;

pub use chunks::{MelChunk, MelChunks};
pub use extract::{check_audio_input, prepare_audio, read_wav, SAMPLE_RATE};
pub use mel::{MelConfig, MelSpectrogram};

use tracing::info;

use crate::error::MediaResult;

/// Converts 16 kHz mono samples into mel chunks for a given frame rate.
pub struct AudioMelExtractor {
    spectrogram: MelSpectrogram,
    step: usize,
}

impl AudioMelExtractor {
    /// Extractor producing `mel_step_size`-column chunks.
    pub fn new(mel_step_size: usize) -> Self {
        Self {
            spectrogram: MelSpectrogram::default(),
            step: mel_step_size,
        }
    }

    /// Compute chunks from 16 kHz mono samples.
    pub fn chunks_from_samples(&self, samples: &[f32], fps: f64) -> MediaResult<MelChunks> {
        let mel = self.spectrogram.compute(samples)?;
        let columns = mel.ncols();
        let chunks = MelChunks::slice(mel, fps, self.step)?;

        info!(
            samples = samples.len(),
            mel_columns = columns,
            mel_chunks = chunks.len(),
            fps,
            "Computed mel chunks"
        );
        Ok(chunks)
    }
}

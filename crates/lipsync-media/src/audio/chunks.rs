//! Fixed-width spectrogram windows aligned to video frames.

use ndarray::{s, Array2, ArrayView2};

use lipsync_models::PipelineConfig;

use crate::error::{MediaError, MediaResult};

/// One window of the spectrogram and the frame index it drives.
#[derive(Debug, Clone, Copy)]
pub struct MelChunk<'a> {
    pub index: usize,
    /// First spectrogram column of this window
    pub start: usize,
    /// `[n_mels, mel_step_size]`
    pub data: ArrayView2<'a, f32>,
}

/// The whole spectrogram plus the start column of every chunk.
///
/// Chunks are views into one shared buffer instead of copies.
#[derive(Debug, Clone)]
pub struct MelChunks {
    mel: Array2<f32>,
    starts: Vec<usize>,
    step: usize,
}

impl MelChunks {
    /// Slice `mel` into `step`-wide windows for a video at `fps`.
    ///
    /// Chunk `i` starts at `floor(i * 80 / fps)`. The first chunk that would
    /// run past the end is replaced by the last `step` columns, and slicing
    /// stops there.
    pub fn slice(mel: Array2<f32>, fps: f64, step: usize) -> MediaResult<Self> {
        let columns = mel.ncols();
        if step == 0 {
            return Err(MediaError::internal("mel step size must be positive"));
        }
        if columns < step {
            return Err(MediaError::audio(format!(
                "audio too short: {columns} spectrogram columns, need at least {step}"
            )));
        }

        let last_start = columns - step;
        let mut starts = Vec::with_capacity((columns as f64 * fps / 80.0).ceil() as usize + 1);
        for i in 0.. {
            let start = PipelineConfig::mel_start_for(i, fps);
            if start + step > columns {
                starts.push(last_start);
                break;
            }
            starts.push(start);
        }

        Ok(Self { mel, starts, step })
    }

    /// Number of chunks (`M`).
    pub fn len(&self) -> usize {
        self.starts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.starts.is_empty()
    }

    /// Columns per chunk.
    pub fn step(&self) -> usize {
        self.step
    }

    pub fn n_mels(&self) -> usize {
        self.mel.nrows()
    }

    pub fn starts(&self) -> &[usize] {
        &self.starts
    }

    pub fn get(&self, index: usize) -> Option<MelChunk<'_>> {
        let start = *self.starts.get(index)?;
        Some(MelChunk {
            index,
            start,
            data: self.mel.slice(s![.., start..start + self.step]),
        })
    }

    pub fn iter(&self) -> impl Iterator<Item = MelChunk<'_>> + '_ {
        (0..self.len()).filter_map(move |i| self.get(i))
    }

    /// The full spectrogram.
    pub fn spectrogram(&self) -> &Array2<f32> {
        &self.mel
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ramp(columns: usize) -> Array2<f32> {
        Array2::from_shape_fn((80, columns), |(_, c)| c as f32)
    }

    #[test]
    fn test_starts_follow_frame_rate() {
        let chunks = MelChunks::slice(ramp(100), 25.0, 16).unwrap();
        let starts = chunks.starts();
        assert_eq!(&starts[..4], &[0, 3, 6, 9]);
        assert!(starts.windows(2).all(|w| w[0] <= w[1]));
    }

    #[test]
    fn test_last_chunk_is_clamped() {
        let chunks = MelChunks::slice(ramp(100), 25.0, 16).unwrap();
        // chunk 27 would start at 86 and overrun 100 columns
        assert_eq!(chunks.len(), 28);
        assert_eq!(chunks.starts()[26], 83);
        let last = chunks.get(27).unwrap();
        assert_eq!(last.start, 84);
        assert_eq!(last.data.ncols(), 16);
        assert_eq!(last.data[[0, 15]], 99.0);
    }

    #[test]
    fn test_every_chunk_is_full_width() {
        let chunks = MelChunks::slice(ramp(401), 30.0, 16).unwrap();
        assert!(chunks.iter().all(|c| c.data.dim() == (80, 16)));
        assert_eq!(chunks.iter().last().unwrap().data[[0, 15]], 400.0);
    }

    #[test]
    fn test_five_seconds_at_25_fps() {
        // 5 s of 16 kHz audio -> 401 columns
        let chunks = MelChunks::slice(ramp(401), 25.0, 16).unwrap();
        // floor(i * 3.2) + 16 <= 401 holds for i <= 120
        assert_eq!(chunks.len(), 122);
        assert_eq!(chunks.len().min(125), 122);
    }

    #[test]
    fn test_short_spectrogram_is_audio_error() {
        let err = MelChunks::slice(ramp(10), 25.0, 16).unwrap_err();
        assert_eq!(err.kind(), crate::error::ErrorKind::Audio);
    }

    #[test]
    fn test_exact_fit_still_appends_tail_chunk() {
        let chunks = MelChunks::slice(ramp(16), 25.0, 16).unwrap();
        assert_eq!(chunks.starts(), &[0, 0]);
    }
}

//! Mel-spectrogram computation.
//!
//! Produces the normalised log-mel representation the lip-sync generator was
//! trained on: 16 kHz input, 80 Slaney bands between 55 Hz and 7600 Hz,
//! hop 200 (80 columns per second), values in `[-4, 4]`.

use std::f32::consts::PI;

use ndarray::Array2;
use rustfft::{num_complex::Complex, FftPlanner};

use crate::error::{MediaError, MediaResult};

/// Configuration for mel spectrogram computation.
#[derive(Debug, Clone)]
pub struct MelConfig {
    /// Sample rate of input audio
    pub sample_rate: u32,
    /// FFT size
    pub n_fft: usize,
    /// Hop length between frames
    pub hop_length: usize,
    /// Window length
    pub win_length: usize,
    /// Number of mel bands
    pub n_mels: usize,
    pub fmin: f32,
    pub fmax: f32,
    /// Pre-emphasis coefficient (0 disables)
    pub preemphasis: f32,
    /// Reference level subtracted after dB conversion
    pub ref_level_db: f32,
    /// Lowest dB value mapped into the normalised range
    pub min_level_db: f32,
    /// Output range is `[-max_abs_value, max_abs_value]`
    pub max_abs_value: f32,
}

impl Default for MelConfig {
    fn default() -> Self {
        Self {
            sample_rate: 16000,
            n_fft: 800,
            hop_length: 200,
            win_length: 800,
            n_mels: 80,
            fmin: 55.0,
            fmax: 7600.0,
            preemphasis: 0.97,
            ref_level_db: 20.0,
            min_level_db: -100.0,
            max_abs_value: 4.0,
        }
    }
}

/// Mel-spectrogram extractor.
pub struct MelSpectrogram {
    config: MelConfig,
    /// Precomputed mel filterbank, `[n_mels][n_fft / 2 + 1]`
    mel_basis: Vec<Vec<f32>>,
    /// Precomputed Hann window, zero-padded to `n_fft`
    window: Vec<f32>,
}

impl Default for MelSpectrogram {
    fn default() -> Self {
        Self::new(MelConfig::default())
    }
}

impl MelSpectrogram {
    pub fn new(config: MelConfig) -> Self {
        let mel_basis = create_mel_filterbank(
            config.sample_rate,
            config.n_fft,
            config.n_mels,
            config.fmin,
            config.fmax,
        );
        let window = padded_hann_window(config.win_length, config.n_fft);

        Self {
            config,
            mel_basis,
            window,
        }
    }

    pub fn config(&self) -> &MelConfig {
        &self.config
    }

    /// Number of columns produced for `num_samples` samples.
    pub fn num_frames(&self, num_samples: usize) -> usize {
        1 + num_samples / self.config.hop_length
    }

    /// Compute the normalised log-mel spectrogram, shape `[n_mels, frames]`.
    ///
    /// Fails with an audio error when the input is shorter than one FFT
    /// window or when any value comes out non-finite.
    pub fn compute(&self, samples: &[f32]) -> MediaResult<Array2<f32>> {
        if samples.len() <= self.config.n_fft / 2 {
            return Err(MediaError::audio(format!(
                "audio too short for a spectrogram: {} samples",
                samples.len()
            )));
        }

        let emphasized = preemphasis(samples, self.config.preemphasis);
        let magnitudes = self.stft_magnitudes(&emphasized);
        let n_frames = magnitudes.len();

        let mut mel = Array2::<f32>::zeros((self.config.n_mels, n_frames));
        for (t, frame) in magnitudes.iter().enumerate() {
            for (m, filter) in self.mel_basis.iter().enumerate() {
                let energy: f32 = filter.iter().zip(frame.iter()).map(|(f, s)| f * s).sum();
                mel[[m, t]] = 20.0 * energy.log10() - self.config.ref_level_db;
            }
        }

        // Log of exact zeros gives -inf; normalising would hide it.
        if let Some(((band, column), value)) = mel.indexed_iter().find(|(_, v)| !v.is_finite()) {
            return Err(MediaError::audio(format!(
                "spectrogram contains non-finite value {value} at band {band}, column {column}; \
                 the audio may be digital silence"
            )));
        }

        let scale = 2.0 * self.config.max_abs_value;
        let max = self.config.max_abs_value;
        let min_db = self.config.min_level_db;
        mel.mapv_inplace(|s| (scale * ((s - min_db) / -min_db) - max).clamp(-max, max));

        Ok(mel)
    }

    /// Magnitude STFT with centred reflect padding, `[frames][n_fft / 2 + 1]`.
    fn stft_magnitudes(&self, samples: &[f32]) -> Vec<Vec<f32>> {
        let n_fft = self.config.n_fft;
        let hop_length = self.config.hop_length;
        let padded = reflect_pad(samples, n_fft / 2);

        let mut planner = FftPlanner::new();
        let fft = planner.plan_fft_forward(n_fft);

        let n_frames = (padded.len() - n_fft) / hop_length + 1;
        let mut buffer = vec![Complex::new(0.0f32, 0.0); n_fft];
        let mut result = Vec::with_capacity(n_frames);

        for i in 0..n_frames {
            let start = i * hop_length;
            for (j, slot) in buffer.iter_mut().enumerate() {
                *slot = Complex::new(padded[start + j] * self.window[j], 0.0);
            }

            fft.process(&mut buffer);

            result.push(buffer.iter().take(n_fft / 2 + 1).map(|c| c.norm()).collect());
        }

        result
    }
}

/// First-order pre-emphasis filter `y[n] = x[n] - k * x[n-1]`.
fn preemphasis(samples: &[f32], k: f32) -> Vec<f32> {
    if k == 0.0 {
        return samples.to_vec();
    }
    let mut out = Vec::with_capacity(samples.len());
    let mut prev = 0.0f32;
    for &x in samples {
        out.push(x - k * prev);
        prev = x;
    }
    out
}

/// Reflect-pad without repeating the edge sample. Requires `pad < len`.
fn reflect_pad(samples: &[f32], pad: usize) -> Vec<f32> {
    let len = samples.len();
    let mut padded = Vec::with_capacity(len + 2 * pad);
    padded.extend((1..=pad).rev().map(|i| samples[i]));
    padded.extend_from_slice(samples);
    padded.extend((0..pad).map(|i| samples[len - 2 - i]));
    padded
}

/// Periodic Hann window of `win_length`, centred inside `n_fft`.
fn padded_hann_window(win_length: usize, n_fft: usize) -> Vec<f32> {
    let win_length = win_length.min(n_fft);
    let offset = (n_fft - win_length) / 2;
    let mut window = vec![0.0f32; n_fft];
    for i in 0..win_length {
        window[offset + i] = 0.5 * (1.0 - (2.0 * PI * i as f32 / win_length as f32).cos());
    }
    window
}

/// Convert frequency in Hz to mel scale (Slaney).
fn hz_to_mel(f: f32) -> f32 {
    const F_SP: f32 = 200.0 / 3.0;
    const MIN_LOG_HZ: f32 = 1000.0;
    const MIN_LOG_MEL: f32 = MIN_LOG_HZ / F_SP;
    const LOGSTEP: f32 = 0.068_751_74; // ln(6.4) / 27

    if f < MIN_LOG_HZ {
        f / F_SP
    } else {
        MIN_LOG_MEL + (f / MIN_LOG_HZ).ln() / LOGSTEP
    }
}

/// Convert mel value to Hz (Slaney).
fn mel_to_hz(m: f32) -> f32 {
    const F_SP: f32 = 200.0 / 3.0;
    const MIN_LOG_HZ: f32 = 1000.0;
    const MIN_LOG_MEL: f32 = MIN_LOG_HZ / F_SP;
    const LOGSTEP: f32 = 0.068_751_74;

    if m < MIN_LOG_MEL {
        m * F_SP
    } else {
        MIN_LOG_HZ * ((m - MIN_LOG_MEL) * LOGSTEP).exp()
    }
}

/// Triangular, area-normalised mel filterbank.
fn create_mel_filterbank(
    sample_rate: u32,
    n_fft: usize,
    n_mels: usize,
    fmin: f32,
    fmax: f32,
) -> Vec<Vec<f32>> {
    let n_freqs = n_fft / 2 + 1;

    let mel_min = hz_to_mel(fmin);
    let mel_max = hz_to_mel(fmax);
    let hz_points: Vec<f32> = (0..=n_mels + 1)
        .map(|i| mel_to_hz(mel_min + (mel_max - mel_min) * i as f32 / (n_mels + 1) as f32))
        .collect();

    let fft_freqs: Vec<f32> = (0..n_freqs)
        .map(|i| i as f32 * sample_rate as f32 / n_fft as f32)
        .collect();

    let mut filterbank = vec![vec![0.0f32; n_freqs]; n_mels];

    for (i, filter) in filterbank.iter_mut().enumerate() {
        let (lower, center, upper) = (hz_points[i], hz_points[i + 1], hz_points[i + 2]);
        let enorm = 2.0 / (upper - lower);

        for (slot, &freq) in filter.iter_mut().zip(fft_freqs.iter()) {
            let rising = (freq - lower) / (center - lower);
            let falling = (upper - freq) / (upper - center);
            *slot = rising.min(falling).max(0.0) * enorm;
        }
    }

    filterbank
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sine(freq: f32, seconds: f32) -> Vec<f32> {
        let n = (16000.0 * seconds) as usize;
        (0..n)
            .map(|i| 0.5 * (2.0 * PI * freq * i as f32 / 16000.0).sin())
            .collect()
    }

    #[test]
    fn test_filterbank_shape() {
        let mel = MelSpectrogram::default();
        assert_eq!(mel.mel_basis.len(), 80);
        assert_eq!(mel.mel_basis[0].len(), 401);
        assert!(mel.mel_basis.iter().all(|f| f.iter().any(|&v| v > 0.0)));
    }

    #[test]
    fn test_eighty_columns_per_second() {
        let mel = MelSpectrogram::default();
        let spec = mel.compute(&sine(440.0, 1.0)).unwrap();
        assert_eq!(spec.dim(), (80, 81));
        assert_eq!(mel.num_frames(16000), 81);
    }

    #[test]
    fn test_values_are_normalised() {
        let mel = MelSpectrogram::default();
        let spec = mel.compute(&sine(440.0, 0.5)).unwrap();
        assert!(spec.iter().all(|v| (-4.0..=4.0).contains(v)));
        assert!(spec.iter().any(|&v| v > -4.0));
    }

    #[test]
    fn test_silence_is_rejected() {
        let mel = MelSpectrogram::default();
        let err = mel.compute(&vec![0.0; 16000]).unwrap_err();
        assert_eq!(err.kind(), crate::error::ErrorKind::Audio);
    }

    #[test]
    fn test_too_short_is_rejected() {
        let mel = MelSpectrogram::default();
        assert!(mel.compute(&[0.1; 100]).is_err());
    }

    #[test]
    fn test_reflect_pad() {
        let padded = reflect_pad(&[1.0, 2.0, 3.0, 4.0], 2);
        assert_eq!(padded, vec![3.0, 2.0, 1.0, 2.0, 3.0, 4.0, 3.0, 2.0]);
    }

    #[test]
    fn test_preemphasis() {
        let out = preemphasis(&[1.0, 1.0, 0.0], 0.5);
        assert_eq!(out, vec![1.0, 0.5, -0.5]);
    }

    #[test]
    fn test_hz_mel_conversion() {
        for hz in [55.0f32, 440.0, 1000.0, 7600.0] {
            assert!((mel_to_hz(hz_to_mel(hz)) - hz).abs() < hz * 1e-3);
        }
    }
}

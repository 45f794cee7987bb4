//! Mel power spectrogram from float PCM samples.
//!
//! Output is a one-channel `[n_mels][n_frames]` f32 map suitable as CNN
//! input.
//!
//! Default parameters:
//! - SampleRate: 44100
//! - FFTSize: 2048 (window length = FFT size, periodic Hann)
//! - HopSize: 512
//! - NumMels: 128
//! - LowFreq: 0 Hz
//! - HighFreq: sample_rate / 2
//!
//! Frames are centered: the signal is reflect-padded by `n_fft / 2` on both
//! sides, so `n_frames = 1 + len / hop_length`. Energies are raw power (no
//! log compression).

use std::fmt;
use std::sync::Arc;

use rustfft::{num_complex::Complex, Fft, FftPlanner};
use serde::{Deserialize, Serialize};

use crate::mel;
use crate::spectrum::validate;
use crate::FeatureError;

/// Configuration for mel spectrogram extraction.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MelConfig {
    pub sample_rate: usize,
    pub n_fft: usize,
    pub hop_length: usize,
    pub n_mels: usize,
    pub f_min: f64,
    /// Upper edge of the filterbank; `None` means Nyquist.
    pub f_max: Option<f64>,
}

impl Default for MelConfig {
    fn default() -> Self {
        Self {
            sample_rate: 44100,
            n_fft: 2048,
            hop_length: 512,
            n_mels: 128,
            f_min: 0.0,
            f_max: None,
        }
    }
}

impl MelConfig {
    /// Number of STFT frequency bins.
    pub fn n_freqs(&self) -> usize {
        self.n_fft / 2 + 1
    }

    /// Number of frames produced for `n_samples` input samples.
    pub fn n_frames(&self, n_samples: usize) -> usize {
        1 + n_samples / self.hop_length
    }

    fn high_freq(&self) -> f64 {
        self.f_max.unwrap_or((self.sample_rate / 2) as f64)
    }

    fn validate(&self) -> Result<(), FeatureError> {
        if self.sample_rate == 0 || self.n_fft == 0 || self.hop_length == 0 || self.n_mels == 0 {
            return Err(FeatureError::InvalidConfig(
                "sample_rate, n_fft, hop_length and n_mels must be positive".into(),
            ));
        }
        if self.f_min < 0.0 || self.f_min >= self.high_freq() {
            return Err(FeatureError::InvalidConfig(format!(
                "f_min {} must be in [0, {})",
                self.f_min,
                self.high_freq()
            )));
        }
        Ok(())
    }
}

/// A one-channel time-frequency energy map stored row-major as
/// `[n_mels][n_frames]`.
#[derive(Debug, Clone, PartialEq)]
pub struct FeatureMap {
    n_mels: usize,
    n_frames: usize,
    data: Vec<f32>,
}

impl FeatureMap {
    /// Wraps row-major data. Returns `None` when the length does not match.
    pub fn new(n_mels: usize, n_frames: usize, data: Vec<f32>) -> Option<Self> {
        (data.len() == n_mels * n_frames).then_some(Self { n_mels, n_frames, data })
    }

    pub fn n_mels(&self) -> usize {
        self.n_mels
    }

    pub fn n_frames(&self) -> usize {
        self.n_frames
    }

    /// Energy of mel band `m` at frame `t`.
    pub fn get(&self, m: usize, t: usize) -> f32 {
        self.data[m * self.n_frames + t]
    }

    pub fn as_slice(&self) -> &[f32] {
        &self.data
    }

    pub fn into_vec(self) -> Vec<f32> {
        self.data
    }
}

/// Mel spectrogram extractor. Window, filterbank and FFT plan are computed
/// once and shared by every call.
pub struct MelSpectrogram {
    cfg: MelConfig,
    window: Vec<f64>,
    mel_bank: Vec<Vec<f64>>,
    fft: Arc<dyn Fft<f64>>,
}

impl fmt::Debug for MelSpectrogram {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MelSpectrogram").field("cfg", &self.cfg).finish()
    }
}

impl MelSpectrogram {
    /// Creates a new extractor with the given config.
    pub fn new(cfg: MelConfig) -> Result<Self, FeatureError> {
        cfg.validate()?;
        let window = mel::hann_window(cfg.n_fft);
        let mel_bank = mel::mel_filter_bank(
            cfg.n_mels,
            cfg.n_freqs(),
            cfg.sample_rate,
            cfg.f_min,
            cfg.high_freq(),
        );
        let fft = FftPlanner::<f64>::new().plan_fft_forward(cfg.n_fft);
        Ok(Self { cfg, window, mel_bank, fft })
    }

    pub fn config(&self) -> &MelConfig {
        &self.cfg
    }

    /// Computes the mel power spectrogram of `pcm`.
    pub fn compute(&self, pcm: &[f32]) -> Result<FeatureMap, FeatureError> {
        validate(pcm)?;
        let cfg = &self.cfg;
        let pad = cfg.n_fft / 2;
        if pcm.len() <= pad {
            return Err(FeatureError::TooShort { min: pad, got: pcm.len() });
        }

        let padded = reflect_pad(pcm, pad);
        let n_frames = (padded.len() - cfg.n_fft) / cfg.hop_length + 1;
        let n_freqs = cfg.n_freqs();

        let mut data = vec![0.0f32; cfg.n_mels * n_frames];
        let mut buf = vec![Complex::new(0.0f64, 0.0); cfg.n_fft];
        let mut power = vec![0.0f64; n_freqs];

        for t in 0..n_frames {
            let start = t * cfg.hop_length;
            for (i, slot) in buf.iter_mut().enumerate() {
                *slot = Complex::new(padded[start + i] * self.window[i], 0.0);
            }
            self.fft.process(&mut buf);

            for (k, p) in power.iter_mut().enumerate() {
                *p = buf[k].norm_sqr();
            }

            for (m, filter) in self.mel_bank.iter().enumerate() {
                let energy: f64 = filter.iter().zip(&power).map(|(w, p)| w * p).sum();
                data[m * n_frames + t] = energy as f32;
            }
        }

        Ok(FeatureMap { n_mels: cfg.n_mels, n_frames, data })
    }
}

/// Mirrors `pad` samples on each side without repeating the edge sample.
/// Requires `pad < samples.len()`.
fn reflect_pad(samples: &[f32], pad: usize) -> Vec<f64> {
    let n = samples.len();
    let mut out = Vec::with_capacity(n + 2 * pad);
    out.extend((1..=pad).rev().map(|i| samples[i] as f64));
    out.extend(samples.iter().map(|&s| s as f64));
    out.extend((1..=pad).map(|i| samples[n - 1 - i] as f64));
    out
}

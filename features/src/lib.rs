//! Feature extraction for speaker classification.
//!
//! # Representations
//!
//! Raw float samples are turned into one of two model inputs:
//!
//! 1. [`FeatureKind::Spectrum`]: real part of the full DFT, one value per
//!    input sample. Consumed by the logistic regression backend.
//! 2. [`FeatureKind::MelSpectrogram`]: one-channel `[n_mels][n_frames]`
//!    power map. Consumed by the spectrogram CNN backend.
//!
//! Both are pure functions of the input and a fixed [`MelConfig`]; training
//! and inference must share the same configuration or the model sees
//! features of a different shape.
//!
//! # Example
//!
//! ```rust
//! use voxclass_features::{Extractor, FeatureKind, Features, MelConfig};
//!
//! let extractor = Extractor::new(MelConfig::default()).unwrap();
//! let audio = vec![0.1f32; 22050];
//!
//! match extractor.extract(&audio, FeatureKind::MelSpectrogram).unwrap() {
//!     Features::Map(map) => assert_eq!((map.n_mels(), map.n_frames()), (128, 44)),
//!     Features::Vector(_) => unreachable!(),
//! }
//! ```

mod error;
pub mod mel;
mod spectrogram;
mod spectrum;

pub use error::FeatureError;
pub use spectrogram::{FeatureMap, MelConfig, MelSpectrogram};
pub use spectrum::spectrum;

/// Which representation to compute.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FeatureKind {
    Spectrum,
    MelSpectrogram,
}

/// Output of [`Extractor::extract`].
#[derive(Debug, Clone, PartialEq)]
pub enum Features {
    Vector(Vec<f32>),
    Map(FeatureMap),
}

impl Features {
    /// Number of values across every dimension.
    pub fn len(&self) -> usize {
        match self {
            Features::Vector(v) => v.len(),
            Features::Map(m) => m.as_slice().len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Computes either representation with one shared mel configuration.
#[derive(Debug)]
pub struct Extractor {
    mel: MelSpectrogram,
}

impl Extractor {
    /// Creates an extractor; fails if the mel configuration is unusable.
    pub fn new(cfg: MelConfig) -> Result<Self, FeatureError> {
        Ok(Self { mel: MelSpectrogram::new(cfg)? })
    }

    pub fn mel_config(&self) -> &MelConfig {
        self.mel.config()
    }

    /// Extracts the representation selected by `kind`.
    pub fn extract(&self, pcm: &[f32], kind: FeatureKind) -> Result<Features, FeatureError> {
        match kind {
            FeatureKind::Spectrum => self.spectrum(pcm).map(Features::Vector),
            FeatureKind::MelSpectrogram => self.mel_spectrogram(pcm).map(Features::Map),
        }
    }

    /// Real part of the DFT of `pcm`.
    pub fn spectrum(&self, pcm: &[f32]) -> Result<Vec<f32>, FeatureError> {
        spectrum(pcm)
    }

    /// Mel power spectrogram of `pcm`.
    pub fn mel_spectrogram(&self, pcm: &[f32]) -> Result<FeatureMap, FeatureError> {
        self.mel.compute(pcm)
    }
}

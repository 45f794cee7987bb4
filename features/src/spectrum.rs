//! Full-length discrete Fourier transform features.

use rustfft::{num_complex::Complex, FftPlanner};

use crate::FeatureError;

/// Returns the real part of the DFT of `samples`.
///
/// The transform covers the whole sequence (any length, not only powers of
/// two) and is unnormalized, so the output has exactly one value per input
/// sample.
pub fn spectrum(samples: &[f32]) -> Result<Vec<f32>, FeatureError> {
    validate(samples)?;

    let mut planner = FftPlanner::<f64>::new();
    let fft = planner.plan_fft_forward(samples.len());

    let mut buf: Vec<Complex<f64>> = samples
        .iter()
        .map(|&s| Complex::new(s as f64, 0.0))
        .collect();
    fft.process(&mut buf);

    Ok(buf.iter().map(|c| c.re as f32).collect())
}

/// Rejects empty input and NaN/infinite samples.
pub(crate) fn validate(samples: &[f32]) -> Result<(), FeatureError> {
    if samples.is_empty() {
        return Err(FeatureError::Empty);
    }
    if let Some(index) = samples.iter().position(|s| !s.is_finite()) {
        return Err(FeatureError::NonFinite { index });
    }
    Ok(())
}

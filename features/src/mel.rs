//! Mel-scale utilities and filterbank generation.

use std::f64::consts::PI;

/// Generates a periodic Hann window of the given length.
pub fn hann_window(n: usize) -> Vec<f64> {
    if n <= 1 {
        return vec![1.0; n];
    }
    (0..n)
        .map(|i| 0.5 - 0.5 * (2.0 * PI * i as f64 / n as f64).cos())
        .collect()
}

/// Converts frequency in Hz to the HTK mel scale.
pub fn hz_to_mel(hz: f64) -> f64 {
    2595.0 * (1.0 + hz / 700.0).log10()
}

/// Converts HTK mel scale frequency back to Hz.
pub fn mel_to_hz(mel: f64) -> f64 {
    700.0 * (10.0_f64.powf(mel / 2595.0) - 1.0)
}

/// Creates the triangular mel filterbank matrix.
///
/// Filters are evaluated on the exact frequency of every STFT bin rather than
/// on rounded bin indices, and are not area-normalized, so each filter peaks
/// at 1.0 on its center frequency.
///
/// Returns `[num_mels][num_freqs]` where `num_freqs = n_fft / 2 + 1`.
pub fn mel_filter_bank(
    num_mels: usize,
    num_freqs: usize,
    sample_rate: usize,
    low_freq: f64,
    high_freq: f64,
) -> Vec<Vec<f64>> {
    let nyquist = (sample_rate / 2) as f64;
    let bin_freqs: Vec<f64> = if num_freqs > 1 {
        (0..num_freqs)
            .map(|k| k as f64 * nyquist / (num_freqs - 1) as f64)
            .collect()
    } else {
        vec![0.0; num_freqs]
    };

    // num_mels + 2 equally spaced mel points, converted back to Hz
    let low_mel = hz_to_mel(low_freq);
    let high_mel = hz_to_mel(high_freq);
    let step = (high_mel - low_mel) / (num_mels + 1) as f64;
    let hz_points: Vec<f64> = (0..num_mels + 2)
        .map(|i| mel_to_hz(low_mel + i as f64 * step))
        .collect();

    let mut bank = Vec::with_capacity(num_mels);
    for m in 0..num_mels {
        let left = hz_points[m];
        let center = hz_points[m + 1];
        let right = hz_points[m + 2];

        let filter = bin_freqs
            .iter()
            .map(|&f| {
                let rising = (f - left) / (center - left);
                let falling = (right - f) / (right - center);
                rising.min(falling).max(0.0)
            })
            .collect();
        bank.push(filter);
    }
    bank
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_hann_window() {
        let w = hann_window(2048);
        assert_eq!(w.len(), 2048);
        // Periodic window starts at zero and peaks at n/2
        assert!(w[0].abs() < 1e-12);
        assert!((w[1024] - 1.0).abs() < 1e-12);
        for i in 1..1024 {
            assert!((w[i] - w[2048 - i]).abs() < 1e-10);
        }
    }

    #[test]
    fn test_hz_mel_roundtrip() {
        for &hz in &[0.0, 100.0, 440.0, 1000.0, 4000.0, 22050.0] {
            let mel = hz_to_mel(hz);
            let back = mel_to_hz(mel);
            assert!((hz - back).abs() < 1e-6, "roundtrip failed for {} Hz", hz);
        }
    }

    #[test]
    fn test_mel_filter_bank_shape() {
        let bank = mel_filter_bank(128, 1025, 44100, 0.0, 22050.0);
        assert_eq!(bank.len(), 128);
        assert_eq!(bank[0].len(), 1025);

        for filter in &bank {
            for &v in filter {
                assert!((0.0..=1.0).contains(&v));
            }
        }
    }

    #[test]
    fn test_mel_filters_are_ordered() {
        let bank = mel_filter_bank(40, 1025, 44100, 0.0, 22050.0);
        let peaks: Vec<usize> = bank
            .iter()
            .map(|f| {
                f.iter()
                    .enumerate()
                    .fold((0, f64::MIN), |best, (k, &v)| if v > best.1 { (k, v) } else { best })
                    .0
            })
            .collect();
        for pair in peaks.windows(2) {
            assert!(pair[0] <= pair[1], "filter peaks must be non-decreasing: {:?}", pair);
        }
    }
}

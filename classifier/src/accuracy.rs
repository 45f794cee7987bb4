use std::fmt;

/// Resubstitution accuracy: measured on the very samples the model was fit
/// on, not on held-out data.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Accuracy {
    /// Share of correctly classified samples, in `[0, 100]`.
    Percent(f64),
    /// No samples to measure against, or no usable model.
    Unavailable,
}

impl Accuracy {
    /// Rendering of [`Accuracy::Unavailable`].
    pub const SENTINEL: &'static str = "--.-";

    pub fn from_counts(correct: usize, total: usize) -> Self {
        if total == 0 {
            return Self::Unavailable;
        }
        Self::Percent(100.0 * correct as f64 / total as f64)
    }

    pub fn percent(&self) -> Option<f64> {
        match self {
            Self::Percent(p) => Some(*p),
            Self::Unavailable => None,
        }
    }
}

impl fmt::Display for Accuracy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Percent(p) => write!(f, "{:.1}", p),
            Self::Unavailable => f.write_str(Self::SENTINEL),
        }
    }
}

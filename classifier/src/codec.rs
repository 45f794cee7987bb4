use crate::ClassifierError;

/// Bidirectional mapping between speaker labels and class indices.
///
/// Labels are sorted and de-duplicated when the codec is fitted, so the
/// same label set always yields the same indices. The codec is immutable
/// afterwards; persisted models stay compatible across restarts as long as
/// the configured label set does not change.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LabelCodec {
    labels: Vec<String>,
}

impl LabelCodec {
    /// Fits the codec to a closed label set.
    pub fn fit<I, S>(labels: I) -> Result<Self, ClassifierError>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut labels: Vec<String> = labels.into_iter().map(|l| l.as_ref().to_string()).collect();
        labels.sort();
        labels.dedup();
        if labels.is_empty() {
            return Err(ClassifierError::Config("label set must not be empty".into()));
        }
        Ok(Self { labels })
    }

    /// Class index of `label`.
    pub fn encode(&self, label: &str) -> Result<usize, ClassifierError> {
        self.labels
            .binary_search_by(|l| l.as_str().cmp(label))
            .map_err(|_| ClassifierError::UnknownLabel(label.to_string()))
    }

    /// Label of class index `code`.
    pub fn decode(&self, code: usize) -> Result<&str, ClassifierError> {
        self.labels
            .get(code)
            .map(String::as_str)
            .ok_or(ClassifierError::UnknownCode(code))
    }

    pub fn labels(&self) -> &[String] {
        &self.labels
    }

    pub fn len(&self) -> usize {
        self.labels.len()
    }

    pub fn is_empty(&self) -> bool {
        self.labels.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn roundtrip_for_every_label() {
        let codec = LabelCodec::fit(["Reece", "Chris"]).unwrap();
        for label in codec.labels() {
            let code = codec.encode(label).unwrap();
            assert_eq!(codec.decode(code).unwrap(), label);
        }
    }

    #[test]
    fn codes_are_sorted_and_stable() {
        let a = LabelCodec::fit(["Reece", "Chris", "Reece"]).unwrap();
        let b = LabelCodec::fit(["Chris", "Reece"]).unwrap();
        assert_eq!(a, b);
        assert_eq!(a.len(), 2);
        assert_eq!(a.encode("Chris").unwrap(), 0);
        assert_eq!(a.encode("Reece").unwrap(), 1);
    }

    #[test]
    fn unknown_label_and_code() {
        let codec = LabelCodec::fit(["Chris", "Reece"]).unwrap();
        assert!(matches!(codec.encode("Alice"), Err(ClassifierError::UnknownLabel(l)) if l == "Alice"));
        assert!(matches!(codec.decode(2), Err(ClassifierError::UnknownCode(2))));
    }

    #[test]
    fn empty_label_set_is_rejected() {
        assert!(matches!(
            LabelCodec::fit(Vec::<String>::new()),
            Err(ClassifierError::Config(_))
        ));
    }
}

//! Prediction results and their text rendering.
//!
use serde::{Deserialize, Serialize};

/// A single class label with the probability the classifier assigned to it.
#[derive(Clone, Debug, Deserialize, PartialEq, Serialize)]
pub struct Prediction {
    pub class_name: String,
    /// Probability in `[0, 1]`.
    pub probability: f32,
}

impl Prediction {
    pub fn new(class_name: impl Into<String>, probability: f32) -> Self {
        Self {
            class_name: class_name.into(),
            probability,
        }
    }

    /// Confidence as a whole percentage. Halves round up.
    pub fn percent(&self) -> u32 {
        let probability = if self.probability.is_nan() {
            0.0
        } else {
            self.probability.clamp(0.0, 1.0)
        };
        (probability * 100.0).round() as u32
    }

    /// Human readable sentence for this prediction.
    pub fn describe(&self) -> String {
        format!(
            "We think this image contains a: {} - with {}% confidence.",
            self.class_name,
            self.percent()
        )
    }
}

/// Describe the top ranked prediction of a list, if there is one.
pub fn describe_top(predictions: &[Prediction]) -> Option<String> {
    predictions.first().map(Prediction::describe)
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_percent_is_rounded() {
        assert_eq!(Prediction::new("cat", 0.8749).percent(), 87);
        assert_eq!(Prediction::new("cat", 0.875).percent(), 88);
        assert_eq!(Prediction::new("cat", 0.0).percent(), 0);
        assert_eq!(Prediction::new("cat", 1.0).percent(), 100);
    }

    #[test]
    fn test_percent_is_clamped() {
        assert_eq!(Prediction::new("cat", 1.7).percent(), 100);
        assert_eq!(Prediction::new("cat", -0.2).percent(), 0);
        assert_eq!(Prediction::new("cat", f32::NAN).percent(), 0);
    }

    #[test]
    fn test_describe() {
        let prediction = Prediction::new("tabby, tabby cat", 0.6132);
        assert_eq!(
            prediction.describe(),
            "We think this image contains a: tabby, tabby cat - with 61% confidence."
        );
    }

    #[test]
    fn test_describe_top_uses_first() {
        let predictions = vec![
            Prediction::new("goldfish, Carassius auratus", 0.9),
            Prediction::new("tench, Tinca tinca", 0.05),
        ];
        assert_eq!(
            describe_top(&predictions).as_deref(),
            Some("We think this image contains a: goldfish, Carassius auratus - with 90% confidence.")
        );
        assert_eq!(describe_top(&[]), None);
    }

    #[test]
    fn test_json_field_names() -> Result<(), serde_json::Error> {
        let json = serde_json::to_string(&Prediction::new("llama", 0.5))?;
        assert_eq!(json, r#"{"class_name":"llama","probability":0.5}"#);
        Ok(())
    }
}

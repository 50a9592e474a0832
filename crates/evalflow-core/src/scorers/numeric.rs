use anyhow::{bail, Result};
use async_trait::async_trait;
use serde_json::Value;

use crate::scorer::{ScoreOutput, Scorer, ScorerArgs};

/// Relative closeness of two numbers: `1 - |a - b| / (|a| + |b|)`, so 1 for equal
/// values and 0 for values of opposite sign.
pub struct NumericDiffScorer;

impl NumericDiffScorer {
    pub fn similarity(a: f64, b: f64) -> f64 {
        if a == b {
            return 1.0;
        }
        1.0 - (a - b).abs() / (a.abs() + b.abs())
    }
}

/// A JSON number, or a string holding one.
pub(crate) fn as_number(v: &Value) -> Option<f64> {
    match v {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

#[async_trait]
impl Scorer for NumericDiffScorer {
    fn name(&self) -> &str {
        "numeric_diff"
    }

    async fn score(&self, args: &ScorerArgs) -> Result<ScoreOutput> {
        let Some(expected) = &args.expected else {
            bail!("numeric_diff needs an expected value");
        };
        let Some(expected) = as_number(expected) else {
            bail!("expected value {expected} is not a number");
        };
        let output = match as_number(&args.output) {
            Some(n) => n,
            None => {
                return Ok(ScoreOutput::unscored()
                    .with_metadata(serde_json::json!({ "error": "output is not a number" })))
            }
        };
        Ok(ScoreOutput::value(Self::similarity(output, expected)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn similarity_is_relative() {
        assert_eq!(NumericDiffScorer::similarity(0.0, 0.0), 1.0);
        assert_eq!(NumericDiffScorer::similarity(5.0, 5.0), 1.0);
        assert_eq!(NumericDiffScorer::similarity(1.0, 3.0), 0.5);
        assert_eq!(NumericDiffScorer::similarity(-2.0, 2.0), 0.0);
        assert_eq!(NumericDiffScorer::similarity(0.0, 7.0), 0.0);
    }

    #[tokio::test]
    async fn accepts_numeric_strings() {
        let args = ScorerArgs::new(json!("q"), json!("3"), Some(json!(1)));
        let score = NumericDiffScorer.evaluate(&args).await.unwrap();
        assert_eq!(score.name, "numeric_diff");
        assert_eq!(score.score, Some(0.5));
    }

    #[tokio::test]
    async fn non_numeric_output_is_unscored() {
        let args = ScorerArgs::new(json!("q"), json!("three"), Some(json!(3)));
        let score = NumericDiffScorer.evaluate(&args).await.unwrap();
        assert_eq!(score.score, None);
    }

    #[tokio::test]
    async fn missing_expected_is_an_error() {
        let args = ScorerArgs::new(json!("q"), json!(3), None);
        assert!(NumericDiffScorer.evaluate(&args).await.is_err());
    }
}

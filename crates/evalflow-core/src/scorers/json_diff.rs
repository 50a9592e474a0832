use anyhow::{bail, Result};
use async_trait::async_trait;
use serde_json::Value;

use crate::scorer::{ScoreOutput, Scorer, ScorerArgs};
use crate::scorers::levenshtein::LevenshteinScorer;
use crate::scorers::numeric::NumericDiffScorer;

/// Structural similarity of two JSON values in `[0, 1]`.
///
/// Objects average the similarity of every key in either side (a key missing on one
/// side scores 0). Arrays compare position by position and divide by the longer
/// length. Strings use Levenshtein similarity, numbers use [`NumericDiffScorer`], and
/// any other mix of types is compared as serialized JSON text.
pub struct JsonDiffScorer;

pub fn json_similarity(a: &Value, b: &Value) -> f64 {
    match (a, b) {
        (Value::Object(a), Value::Object(b)) => {
            if a.is_empty() && b.is_empty() {
                return 1.0;
            }
            let keys: Vec<&String> = a.keys().chain(b.keys().filter(|k| !a.contains_key(*k))).collect();
            let total: f64 = keys
                .iter()
                .map(|k| match (a.get(*k), b.get(*k)) {
                    (Some(x), Some(y)) => json_similarity(x, y),
                    _ => 0.0,
                })
                .sum();
            total / keys.len() as f64
        }
        (Value::Array(a), Value::Array(b)) => {
            if a.is_empty() && b.is_empty() {
                return 1.0;
            }
            let total: f64 = a.iter().zip(b).map(|(x, y)| json_similarity(x, y)).sum();
            total / a.len().max(b.len()) as f64
        }
        (Value::String(a), Value::String(b)) => LevenshteinScorer::similarity(a, b),
        (Value::Number(x), Value::Number(y)) => match (x.as_f64(), y.as_f64()) {
            (Some(x), Some(y)) => NumericDiffScorer::similarity(x, y),
            _ => 0.0,
        },
        (Value::Null, Value::Null) => 1.0,
        (Value::Null, _) | (_, Value::Null) => 0.0,
        _ => LevenshteinScorer::similarity(&a.to_string(), &b.to_string()),
    }
}

#[async_trait]
impl Scorer for JsonDiffScorer {
    fn name(&self) -> &str {
        "json_diff"
    }

    async fn score(&self, args: &ScorerArgs) -> Result<ScoreOutput> {
        let Some(expected) = &args.expected else {
            bail!("json_diff needs an expected value");
        };
        // a string output is compared structurally when it holds JSON and the expected value is not a string
        let parsed;
        let output = match (&args.output, expected) {
            (Value::String(s), e) if !e.is_string() => match serde_json::from_str::<Value>(s) {
                Ok(v) => {
                    parsed = v;
                    &parsed
                }
                Err(_) => &args.output,
            },
            (o, _) => o,
        };
        Ok(ScoreOutput::value(json_similarity(output, expected)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn identical_documents_score_one() {
        let doc = json!({"a": [1, "x", null], "b": {"c": true}});
        assert_eq!(json_similarity(&doc, &doc), 1.0);
        assert_eq!(json_similarity(&json!({}), &json!({})), 1.0);
        assert_eq!(json_similarity(&json!([]), &json!([])), 1.0);
    }

    #[test]
    fn missing_keys_and_elements_count_as_zero() {
        assert_eq!(json_similarity(&json!({"a": 1, "b": 2}), &json!({"a": 1})), 0.5);
        assert_eq!(json_similarity(&json!([1, 2, 3, 4]), &json!([1, 2])), 0.5);
        assert_eq!(json_similarity(&json!({"a": null}), &json!({"a": 1})), 0.0);
    }

    #[test]
    fn leaves_use_text_and_numeric_similarity() {
        assert_eq!(json_similarity(&json!({"n": 1, "s": "abcd"}), &json!({"n": 3, "s": "abcx"})), (0.5 + 0.75) / 2.0);
    }

    #[tokio::test]
    async fn parses_string_output() {
        let args = ScorerArgs::new(json!("q"), json!("{\"a\": 1}"), Some(json!({"a": 1})));
        let score = JsonDiffScorer.evaluate(&args).await.unwrap();
        assert_eq!(score.name, "json_diff");
        assert_eq!(score.score, Some(1.0));
    }

    #[tokio::test]
    async fn missing_expected_is_an_error() {
        let args = ScorerArgs::new(json!("q"), json!({}), None);
        assert!(JsonDiffScorer.evaluate(&args).await.is_err());
    }
}

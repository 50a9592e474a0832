use anyhow::Result;
use async_trait::async_trait;

use crate::scorer::{value_text, ScoreOutput, Scorer, ScorerArgs};

/// Checks if output contains a substring.
pub struct ContainsScorer {
    substring: String,
    case_sensitive: bool,
}

impl ContainsScorer {
    /// Creates a case-sensitive contains scorer.
    pub fn new(substring: impl Into<String>) -> Self {
        Self {
            substring: substring.into(),
            case_sensitive: true,
        }
    }

    /// Creates a case-insensitive contains scorer.
    pub fn case_insensitive(substring: impl Into<String>) -> Self {
        Self {
            substring: substring.into(),
            case_sensitive: false,
        }
    }
}

#[async_trait]
impl Scorer for ContainsScorer {
    fn name(&self) -> &str {
        "contains"
    }

    async fn score(&self, args: &ScorerArgs) -> Result<ScoreOutput> {
        let output_str = value_text(&args.output);

        let found = if self.case_sensitive {
            output_str.contains(&self.substring)
        } else {
            output_str
                .to_lowercase()
                .contains(&self.substring.to_lowercase())
        };

        Ok(ScoreOutput::pass_fail(found).with_metadata(serde_json::json!({
            "substring": self.substring,
            "case_sensitive": self.case_sensitive,
            "found": found
        })))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn args(output: &str) -> ScorerArgs {
        ScorerArgs::new(json!("capital of France?"), json!(output), None)
    }

    #[tokio::test]
    async fn test_contains_found() {
        let scorer = ContainsScorer::new("Paris");
        let score = scorer.evaluate(&args("The capital of France is Paris")).await.unwrap();
        assert_eq!(score.score, Some(1.0));
        assert_eq!(score.metadata.unwrap()["found"], json!(true));
    }

    #[tokio::test]
    async fn test_contains_not_found() {
        let scorer = ContainsScorer::new("London");
        let score = scorer.evaluate(&args("The capital of France is Paris")).await.unwrap();
        assert_eq!(score.score, Some(0.0));
    }

    #[tokio::test]
    async fn test_contains_case_insensitive() {
        let scorer = ContainsScorer::case_insensitive("PARIS");
        let score = scorer.evaluate(&args("The capital of France is paris")).await.unwrap();
        assert_eq!(score.score, Some(1.0));
    }

    #[tokio::test]
    async fn test_contains_case_sensitive_fail() {
        let scorer = ContainsScorer::new("PARIS");
        let score = scorer.evaluate(&args("The capital of France is Paris")).await.unwrap();
        assert_eq!(score.score, Some(0.0));
    }
}

use anyhow::Result;
use async_trait::async_trait;

use crate::scorer::{ScoreOutput, Scorer, ScorerArgs};

/// 1 when the output equals the expected value, 0 otherwise. An item without `expected`
/// only matches a `null` output.
pub struct ExactMatchScorer;

#[async_trait]
impl Scorer for ExactMatchScorer {
	fn name(&self) -> &str {
		"exact_match"
	}

	async fn score(&self, args: &ScorerArgs) -> Result<ScoreOutput> {
		Ok(ScoreOutput::pass_fail(args.expected_or_null() == &args.output))
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use serde_json::json;

	#[tokio::test]
	async fn matches_structurally() {
		let args = ScorerArgs::new(json!("q"), json!({"a": [1, 2]}), Some(json!({"a": [1, 2]})));
		let score = ExactMatchScorer.evaluate(&args).await.unwrap();
		assert_eq!(score.name, "exact_match");
		assert_eq!(score.score, Some(1.0));

		let args = ScorerArgs::new(json!("q"), json!("HELLO"), Some(json!("hello")));
		assert_eq!(ExactMatchScorer.evaluate(&args).await.unwrap().score, Some(0.0));
	}

	#[tokio::test]
	async fn missing_expected_only_matches_null() {
		let args = ScorerArgs::new(json!("q"), json!(null), None);
		assert_eq!(ExactMatchScorer.evaluate(&args).await.unwrap().score, Some(1.0));
	}
}

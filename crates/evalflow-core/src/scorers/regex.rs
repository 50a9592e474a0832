use anyhow::Result;
use async_trait::async_trait;
use regex::Regex;

use crate::scorer::{value_text, ScoreOutput, Scorer, ScorerArgs};

/// Checks if output matches a regex pattern.
pub struct RegexScorer {
	pattern: Regex,
}

impl RegexScorer {
	/// Creates a regex scorer with the given pattern.
	pub fn new(pattern: &str) -> Result<Self> {
		Ok(Self {
			pattern: Regex::new(pattern)?,
		})
	}
}

#[async_trait]
impl Scorer for RegexScorer {
	fn name(&self) -> &str {
		"regex"
	}

	async fn score(&self, args: &ScorerArgs) -> Result<ScoreOutput> {
		let output_str = value_text(&args.output);
		let captures = self.pattern.captures(&output_str).map(|caps| {
			caps.iter()
				.enumerate()
				.filter_map(|(i, m)| m.map(|m| (i, m.as_str().to_string())))
				.collect::<Vec<_>>()
		});
		let matches = captures.is_some();

		Ok(ScoreOutput::pass_fail(matches).with_metadata(serde_json::json!({
			"pattern": self.pattern.as_str(),
			"matches": matches,
			"captures": captures,
		})))
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use serde_json::json;

	fn args(output: &str) -> ScorerArgs {
		ScorerArgs::new(json!(""), json!(output), None)
	}

	#[tokio::test]
	async fn test_regex_match() {
		let scorer = RegexScorer::new(r"capital.*Paris").unwrap();
		let score = scorer.evaluate(&args("The capital of France is Paris")).await.unwrap();
		assert_eq!(score.score, Some(1.0));
	}

	#[tokio::test]
	async fn test_regex_no_match() {
		let scorer = RegexScorer::new(r"capital.*London").unwrap();
		let score = scorer.evaluate(&args("The capital of France is Paris")).await.unwrap();
		assert_eq!(score.score, Some(0.0));
		assert_eq!(score.metadata.unwrap()["captures"], json!(null));
	}

	#[tokio::test]
	async fn test_regex_with_capture_groups() {
		let scorer = RegexScorer::new(r"(\d{4})-(\d{2})-(\d{2})").unwrap();
		let score = scorer.evaluate(&args("Date: 2024-11-12")).await.unwrap();
		assert_eq!(score.score, Some(1.0));
		assert_eq!(score.metadata.unwrap()["captures"][1], json!([1, "2024"]));
	}

	#[test]
	fn invalid_pattern_is_rejected() {
		assert!(RegexScorer::new("(unclosed").is_err());
	}
}

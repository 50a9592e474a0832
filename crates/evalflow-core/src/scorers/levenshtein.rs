use anyhow::Result;
use async_trait::async_trait;
use strsim::levenshtein;

use crate::scorer::{value_text, ScoreOutput, Scorer, ScorerArgs};

/// Normalized edit-distance similarity in `[0, 1]` between output and expected.
///
/// The score is the similarity itself; pass/fail is left to the eval threshold.
pub struct LevenshteinScorer;

impl LevenshteinScorer {
    pub fn similarity(a: &str, b: &str) -> f64 {
        let max_len = a.chars().count().max(b.chars().count()).max(1) as f64;
        1.0 - (levenshtein(a, b) as f64 / max_len)
    }
}

#[async_trait]
impl Scorer for LevenshteinScorer {
    fn name(&self) -> &str {
        "levenshtein"
    }

    async fn score(&self, args: &ScorerArgs) -> Result<ScoreOutput> {
        let e = value_text(args.expected_or_null());
        let o = value_text(&args.output);
        let distance = levenshtein(&e, &o);
        Ok(ScoreOutput::value(Self::similarity(&e, &o))
            .with_metadata(serde_json::json!({ "distance": distance })))
    }
}

use anyhow::{bail, Result};
use async_trait::async_trait;
use serde_json::{json, Value};

use crate::scorer::{value_text, ScoreOutput, Scorer, ScorerArgs};
use crate::scorers::levenshtein::LevenshteinScorer;

/// Pairs every output entry with at most one expected entry so that the summed
/// Levenshtein similarity is maximal, then divides by the longer list (or by the
/// expected list when extra output entries are allowed).
pub struct ListContainsScorer {
	allow_extra: bool,
}

impl ListContainsScorer {
	pub fn new() -> Self {
		Self { allow_extra: false }
	}

	/// Extra output entries do not lower the score.
	pub fn allow_extra() -> Self {
		Self { allow_extra: true }
	}
}

impl Default for ListContainsScorer {
	fn default() -> Self {
		Self::new()
	}
}

/// A JSON array, or a string holding one.
fn as_list(v: &Value) -> Option<Vec<Value>> {
	match v {
		Value::Array(items) => Some(items.clone()),
		Value::String(s) => match serde_json::from_str(s) {
			Ok(Value::Array(items)) => Some(items),
			_ => None,
		},
		_ => None,
	}
}

/// Maximum-weight one-to-one matching of rows to columns (Hungarian method on
/// `1 - weight`, padded to a square). Returns `(row, column)` pairs of real cells.
pub(crate) fn best_assignment(weights: &[Vec<f64>]) -> Vec<(usize, usize)> {
	let rows = weights.len();
	let cols = weights.first().map_or(0, Vec::len);
	let n = rows.max(cols);
	if n == 0 {
		return Vec::new();
	}
	// 1-based; padding cells cost as much as a total mismatch
	let cost = |i: usize, j: usize| weights.get(i - 1).and_then(|row| row.get(j - 1)).map_or(1.0, |w| 1.0 - w);

	let mut u = vec![0.0; n + 1];
	let mut v = vec![0.0; n + 1];
	let mut p = vec![0usize; n + 1];
	let mut way = vec![0usize; n + 1];
	for i in 1..=n {
		p[0] = i;
		let mut j0 = 0;
		let mut minv = vec![f64::INFINITY; n + 1];
		let mut used = vec![false; n + 1];
		loop {
			used[j0] = true;
			let i0 = p[j0];
			let mut delta = f64::INFINITY;
			let mut j1 = 0;
			for j in 1..=n {
				if used[j] {
					continue;
				}
				let cur = cost(i0, j) - u[i0] - v[j];
				if cur < minv[j] {
					minv[j] = cur;
					way[j] = j0;
				}
				if minv[j] < delta {
					delta = minv[j];
					j1 = j;
				}
			}
			for j in 0..=n {
				if used[j] {
					u[p[j]] += delta;
					v[j] -= delta;
				} else {
					minv[j] -= delta;
				}
			}
			j0 = j1;
			if p[j0] == 0 {
				break;
			}
		}
		while j0 != 0 {
			let j1 = way[j0];
			p[j0] = p[j1];
			j0 = j1;
		}
	}

	let mut pairs: Vec<(usize, usize)> = (1..=n)
		.filter(|&j| p[j] >= 1 && p[j] <= rows && j <= cols)
		.map(|j| (p[j] - 1, j - 1))
		.collect();
	pairs.sort_unstable();
	pairs
}

#[async_trait]
impl Scorer for ListContainsScorer {
	fn name(&self) -> &str {
		"list_contains"
	}

	async fn score(&self, args: &ScorerArgs) -> Result<ScoreOutput> {
		let Some(expected) = &args.expected else {
			bail!("list_contains needs an expected list");
		};
		let Some(expected) = as_list(expected) else {
			bail!("expected value {expected} is not a list");
		};
		let Some(output) = as_list(&args.output) else {
			return Ok(ScoreOutput::value(0.0).with_metadata(json!({ "error": "output is not a list" })));
		};

		if output.is_empty() && expected.is_empty() {
			return Ok(ScoreOutput::value(1.0));
		}
		if output.is_empty() || expected.is_empty() {
			return Ok(ScoreOutput::value(0.0));
		}

		let weights: Vec<Vec<f64>> = output
			.iter()
			.map(|o| {
				let o = value_text(o);
				expected
					.iter()
					.map(|e| LevenshteinScorer::similarity(&o, &value_text(e)))
					.collect()
			})
			.collect();
		let pairs = best_assignment(&weights);
		let total: f64 = pairs.iter().map(|&(i, j)| weights[i][j]).sum();
		let denominator = if self.allow_extra {
			expected.len()
		} else {
			output.len().max(expected.len())
		};

		let matched: Vec<Value> = pairs
			.iter()
			.map(|&(i, j)| json!({ "output": output[i], "expected": expected[j], "score": weights[i][j] }))
			.collect();
		Ok(ScoreOutput::value((total / denominator as f64).min(1.0)).with_metadata(json!({ "pairs": matched })))
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	async fn score(scorer: &ListContainsScorer, output: Value, expected: Value) -> evalflow_types::Score {
		scorer.evaluate(&ScorerArgs::new(json!("q"), output, Some(expected))).await.unwrap()
	}

	#[test]
	fn assignment_beats_greedy() {
		// greedy would take (0,0)=0.9 and leave (1,1)=0.0
		let weights = vec![vec![0.9, 0.8], vec![0.85, 0.0]];
		assert_eq!(best_assignment(&weights), vec![(0, 1), (1, 0)]);
	}

	#[test]
	fn assignment_handles_rectangles() {
		let weights = vec![vec![0.1], vec![0.7], vec![0.3]];
		assert_eq!(best_assignment(&weights), vec![(1, 0)]);
		assert!(best_assignment(&[]).is_empty());
	}

	#[tokio::test]
	async fn order_does_not_matter() {
		let s = score(&ListContainsScorer::new(), json!(["b", "a"]), json!(["a", "b"])).await;
		assert_eq!(s.name, "list_contains");
		assert_eq!(s.score, Some(1.0));
	}

	#[tokio::test]
	async fn extra_entries_count_unless_allowed() {
		let s = score(&ListContainsScorer::new(), json!(["a", "b", "zzz"]), json!(["a", "b"])).await;
		assert!((s.score.unwrap() - 2.0 / 3.0).abs() < 1e-9);

		let s = score(&ListContainsScorer::allow_extra(), json!(["a", "b", "zzz"]), json!(["a", "b"])).await;
		assert_eq!(s.score, Some(1.0));
	}

	#[tokio::test]
	async fn empty_lists() {
		assert_eq!(score(&ListContainsScorer::new(), json!([]), json!([])).await.score, Some(1.0));
		assert_eq!(score(&ListContainsScorer::new(), json!([]), json!(["a"])).await.score, Some(0.0));
	}

	#[tokio::test]
	async fn parses_list_from_string_output() {
		let s = score(&ListContainsScorer::new(), json!("[\"a\"]"), json!(["a"])).await;
		assert_eq!(s.score, Some(1.0));
		let s = score(&ListContainsScorer::new(), json!("a"), json!(["a"])).await;
		assert_eq!(s.score, Some(0.0));
	}
}

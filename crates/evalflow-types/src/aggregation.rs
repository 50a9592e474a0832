//! Pure score aggregation.
//!
//! These are the only functions that read an unscoreable (`null`) score as `0`.
//! Everywhere else a `None` score is carried through untouched.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::{EvalResult, Score};

/// How the scores of one item are folded into the value compared against its threshold.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Aggregation {
	#[default]
	Mean,
	Median,
	Sum,
}

impl Aggregation {
	pub fn apply(&self, scores: &[Score]) -> f64 {
		match self {
			Aggregation::Mean => mean(scores),
			Aggregation::Median => median(scores),
			Aggregation::Sum => sum(scores),
		}
	}

	/// The already-derived value of `result` this policy selects.
	pub fn value(&self, result: &EvalResult) -> f64 {
		match self {
			Aggregation::Mean => result.mean(),
			Aggregation::Median => result.median(),
			Aggregation::Sum => result.sum(),
		}
	}

	pub fn as_str(&self) -> &'static str {
		match self {
			Aggregation::Mean => "mean",
			Aggregation::Median => "median",
			Aggregation::Sum => "sum",
		}
	}
}

impl fmt::Display for Aggregation {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.write_str(self.as_str())
	}
}

impl FromStr for Aggregation {
	type Err = String;

	fn from_str(s: &str) -> Result<Self, Self::Err> {
		match s.trim().to_ascii_lowercase().as_str() {
			"mean" => Ok(Aggregation::Mean),
			"median" => Ok(Aggregation::Median),
			"sum" => Ok(Aggregation::Sum),
			other => Err(format!(
				"unknown aggregation '{other}', expected one of: mean, median, sum"
			)),
		}
	}
}

fn value_of(score: &Score) -> f64 {
	score.score.unwrap_or(0.0)
}

/// Arithmetic mean, `0.0` for no scores.
pub fn mean(scores: &[Score]) -> f64 {
	if scores.is_empty() {
		return 0.0;
	}
	sum(scores) / scores.len() as f64
}

/// Median of the ascending values; the two middle values are averaged for an even count.
pub fn median(scores: &[Score]) -> f64 {
	if scores.is_empty() {
		return 0.0;
	}
	let mut values: Vec<f64> = scores.iter().map(value_of).collect();
	values.sort_by(|a, b| a.total_cmp(b));

	let mid = values.len() / 2;
	if values.len() % 2 == 0 {
		(values[mid - 1] + values[mid]) / 2.0
	} else {
		values[mid]
	}
}

pub fn sum(scores: &[Score]) -> f64 {
	scores.iter().map(value_of).sum()
}

#[cfg(test)]
mod tests {
	use super::*;

	fn scores(values: &[Option<f64>]) -> Vec<Score> {
		values
			.iter()
			.enumerate()
			.map(|(i, v)| Score {
				name: format!("s{i}"),
				score: *v,
				metadata: None,
			})
			.collect()
	}

	#[test]
	fn empty_scores_aggregate_to_zero() {
		assert_eq!(mean(&[]), 0.0);
		assert_eq!(median(&[]), 0.0);
		assert_eq!(sum(&[]), 0.0);
	}

	#[test]
	fn mean_and_sum() {
		let s = scores(&[Some(10.0), Some(20.0), Some(30.0)]);
		assert_eq!(mean(&s), 20.0);
		assert_eq!(sum(&s), 60.0);
	}

	#[test]
	fn null_counts_as_zero() {
		let s = scores(&[Some(10.0), None, Some(30.0)]);
		assert_eq!(median(&s), 10.0);
		assert_eq!(sum(&s), 40.0);
		assert!((mean(&s) - 40.0 / 3.0).abs() < 1e-9);
		// the input itself still carries the null
		assert!(s[1].score.is_none());
	}

	#[test]
	fn median_even_count_averages_middle_pair() {
		let s = scores(&[Some(4.0), Some(1.0), Some(3.0), Some(2.0)]);
		assert_eq!(median(&s), 2.5);
	}

	#[test]
	fn aggregation_dispatch_and_parse() {
		let s = scores(&[Some(1.0), Some(0.0), Some(1.0)]);
		assert_eq!(Aggregation::Median.apply(&s), 1.0);
		assert_eq!(Aggregation::Sum.apply(&s), 2.0);
		let result = EvalResult::new("x", s.clone(), Aggregation::Mean, 1.0);
		assert_eq!(Aggregation::Sum.value(&result), 2.0);
		assert_eq!(Aggregation::Median.value(&result), 1.0);
		assert_eq!("MEDIAN".parse::<Aggregation>().unwrap(), Aggregation::Median);
		assert!("mode".parse::<Aggregation>().is_err());
		assert_eq!(Aggregation::default(), Aggregation::Mean);
	}
}

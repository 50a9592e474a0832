//! The run-level results document written to reporter sinks.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tabled::Tabled;

use crate::EvalResult;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RunStatus {
	Running,
	Finished,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SuiteStatus {
	/// Item results have arrived but the host has not reported the suite as done.
	Running,
	Passed,
	Failed,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SuiteSummary {
	pub mean_score: f64,
	pub median_score: f64,
	pub sum_score: f64,
	pub passed_count: usize,
	pub total_count: usize,
}

impl SuiteSummary {
	/// Recompute from scratch: averages of the per-item mean and median, total of the sums.
	pub fn from_results(results: &[EvalResult]) -> Self {
		let total_count = results.len();
		let mut mean_total = 0.0f64;
		let mut median_total = 0.0f64;
		let mut sum_total = 0.0f64;
		let mut passed_count = 0usize;

		for r in results {
			mean_total += r.mean();
			median_total += r.median();
			sum_total += r.sum();
			if r.passed() {
				passed_count += 1;
			}
		}

		let (mean_score, median_score) = if total_count == 0 {
			(0.0, 0.0)
		} else {
			(mean_total / total_count as f64, median_total / total_count as f64)
		};

		SuiteSummary {
			mean_score,
			median_score,
			sum_score: sum_total,
			passed_count,
			total_count,
		}
	}
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SuiteResult {
	pub name: String,
	/// Stable suite identifier (its source location).
	pub filepath: String,
	pub status: SuiteStatus,
	pub start_time: i64,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub end_time: Option<i64>,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub duration: Option<i64>,
	pub eval_results: Vec<EvalResult>,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub message: Option<String>,
	pub summary: SuiteSummary,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResultsDocument {
	pub status: RunStatus,
	pub success: bool,
	pub num_total_eval_suites: usize,
	pub num_passed_eval_suites: usize,
	pub num_failed_eval_suites: usize,
	pub num_total_evals: usize,
	pub num_passed_evals: usize,
	pub num_failed_evals: usize,
	pub start_time: i64,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub end_time: Option<i64>,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub duration: Option<i64>,
	pub eval_results: Vec<SuiteResult>,
}

#[derive(Debug, Clone, Tabled)]
struct SummaryRow {
	suite: String,
	name: String,
	passed: String,
	score: String,
	input: String,
	output: String,
	expected: String,
}

impl ResultsDocument {
	pub fn new(start_time: i64) -> Self {
		Self {
			status: RunStatus::Running,
			success: true,
			num_total_eval_suites: 0,
			num_passed_eval_suites: 0,
			num_failed_eval_suites: 0,
			num_total_evals: 0,
			num_passed_evals: 0,
			num_failed_evals: 0,
			start_time,
			end_time: None,
			duration: None,
			eval_results: Vec::new(),
		}
	}

	pub fn suite(&self, filepath: &str) -> Option<&SuiteResult> {
		self.eval_results.iter().find(|s| s.filepath == filepath)
	}

	pub fn is_finished(&self) -> bool {
		self.status == RunStatus::Finished
	}

	pub fn summary_table(&self) -> String {
		use tabled::Table;
		let rows: Vec<SummaryRow> = self
			.eval_results
			.iter()
			.flat_map(|suite| {
				suite.eval_results.iter().map(move |r| SummaryRow {
					suite: truncate(suite.name.clone(), 32),
					name: truncate(r.name.clone(), 32),
					passed: (if r.passed() { "✓" } else { "✗" }).to_string(),
					score: format!("{:.3} ({})", r.aggregated(), r.aggregation),
					input: truncate(value_preview(&r.input), 48),
					output: truncate(value_preview(&r.output), 48),
					expected: truncate(r.expected.as_ref().map(value_preview).unwrap_or_default(), 48),
				})
			})
			.collect();

		let table_str = Table::new(rows).to_string();

		let summary_text = format!(
			"Suites: {} passed / {} failed  Evals: {} passed / {} failed  Status: {:?}  Success: {}",
			self.num_passed_eval_suites,
			self.num_failed_eval_suites,
			self.num_passed_evals,
			self.num_failed_evals,
			self.status,
			self.success
		);

		format!("{}\n\n{}\n", table_str, summary_text)
	}
}

fn value_preview(v: &Value) -> String {
	match v {
		Value::String(s) => s.clone(),
		_ => v.to_string(),
	}
}

fn truncate(s: String, max_len: usize) -> String {
	if s.chars().count() <= max_len {
		return s;
	}
	let mut truncated = s.chars().take(max_len.saturating_sub(1)).collect::<String>();
	truncated.push('…');
	truncated
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::{Aggregation, Score};
	use serde_json::json;

	fn result(name: &str, score: f64, threshold: f64) -> EvalResult {
		EvalResult::new(name, vec![Score::new("exact", score)], Aggregation::Mean, threshold)
	}

	#[test]
	fn summary_counts_each_result_against_its_own_threshold() {
		let results = vec![result("a", 1.0, 1.0), result("b", 0.4, 0.5), result("c", 0.6, 0.5)];
		let summary = SuiteSummary::from_results(&results);
		assert_eq!(summary.total_count, 3);
		assert_eq!(summary.passed_count, 2);
		assert!((summary.sum_score - 2.0).abs() < 1e-9);
		assert!((summary.mean_score - 2.0 / 3.0).abs() < 1e-9);
	}

	#[test]
	fn empty_summary_is_zeroed() {
		assert_eq!(SuiteSummary::from_results(&[]), SuiteSummary::default());
	}

	#[test]
	fn document_uses_camel_case_keys() {
		let doc = ResultsDocument::new(1_700_000_000_000);
		let v = serde_json::to_value(&doc).unwrap();
		assert_eq!(v["status"], json!("running"));
		assert_eq!(v["numPassedEvals"], json!(0));
		assert_eq!(v["startTime"], json!(1_700_000_000_000i64));
		assert!(v.get("endTime").is_none());
	}

	#[test]
	fn summary_table_lists_items() {
		let mut doc = ResultsDocument::new(0);
		doc.eval_results.push(SuiteResult {
			name: "uppercase".into(),
			filepath: "suites/upper".into(),
			status: SuiteStatus::Passed,
			start_time: 0,
			end_time: Some(10),
			duration: Some(10),
			eval_results: vec![result("a", 1.0, 1.0).with_io(json!("a"), Some(json!("A")), json!("A"))],
			message: None,
			summary: SuiteSummary::default(),
		});
		let table = doc.summary_table();
		assert!(table.contains("uppercase"));
		assert!(table.contains("1.000 (mean)"));
	}
}

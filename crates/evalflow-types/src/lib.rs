use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

pub mod aggregation;
pub mod document;

pub use aggregation::Aggregation;
pub use document::{ResultsDocument, RunStatus, SuiteResult, SuiteStatus, SuiteSummary};

/// One evaluation case. Fields other than `name`, `input` and `expected` are kept in `extra`
/// and handed to the task and scorers unchanged.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DataItem {
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub name: Option<String>,
	pub input: Value,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub expected: Option<Value>,
	#[serde(flatten)]
	pub extra: Map<String, Value>,
}

impl DataItem {
	pub fn new(input: Value, expected: Value) -> Self {
		Self {
			name: None,
			input,
			expected: Some(expected),
			extra: Map::new(),
		}
	}

	pub fn input_only(input: Value) -> Self {
		Self {
			name: None,
			input,
			expected: None,
			extra: Map::new(),
		}
	}

	pub fn with_name(mut self, name: impl Into<String>) -> Self {
		self.name = Some(name.into());
		self
	}

	pub fn with_extra(mut self, key: impl Into<String>, value: Value) -> Self {
		self.extra.insert(key.into(), value);
		self
	}

	/// Label used for the item in reports: `name`, else the input when it is a string.
	pub fn display_name(&self) -> String {
		if let Some(name) = &self.name {
			return name.clone();
		}
		match &self.input {
			Value::String(s) => s.clone(),
			other => format!("input: {other}"),
		}
	}
}

/// A named score. `None` marks an unscoreable output and is serialized as `null`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Score {
	pub name: String,
	pub score: Option<f64>,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub metadata: Option<Value>,
}

impl Score {
	pub fn new(name: impl Into<String>, score: f64) -> Self {
		Self {
			name: name.into(),
			score: Some(score),
			metadata: None,
		}
	}

	pub fn unscored(name: impl Into<String>) -> Self {
		Self {
			name: name.into(),
			score: None,
			metadata: None,
		}
	}

	pub fn with_metadata(mut self, metadata: Value) -> Self {
		self.metadata = Some(metadata);
		self
	}
}

/// The scored outcome of one data item.
///
/// `mean`, `median` and `sum` are derived from `scores` whenever a result is built or
/// deserialized, so they can only be read through accessors.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(from = "EvalResultRecord")]
pub struct EvalResult {
	pub name: String,
	scores: Vec<Score>,
	mean: f64,
	median: f64,
	sum: f64,
	pub threshold: f64,
	pub aggregation: Aggregation,
	#[serde(default)]
	pub input: Value,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub expected: Option<Value>,
	#[serde(default)]
	pub output: Value,
	#[serde(default, skip_serializing_if = "Map::is_empty")]
	pub metadata: Map<String, Value>,
}

/// Wire shape of an `EvalResult`; derived fields in the payload are ignored.
#[derive(Deserialize)]
struct EvalResultRecord {
	name: String,
	#[serde(default)]
	scores: Vec<Score>,
	threshold: f64,
	#[serde(default)]
	aggregation: Aggregation,
	#[serde(default)]
	input: Value,
	#[serde(default)]
	expected: Option<Value>,
	#[serde(default)]
	output: Value,
	#[serde(default)]
	metadata: Map<String, Value>,
}

impl From<EvalResultRecord> for EvalResult {
	fn from(record: EvalResultRecord) -> Self {
		let mut result = EvalResult::new(record.name, record.scores, record.aggregation, record.threshold);
		result.input = record.input;
		result.expected = record.expected;
		result.output = record.output;
		result.metadata = record.metadata;
		result
	}
}

impl EvalResult {
	pub fn new(name: impl Into<String>, scores: Vec<Score>, aggregation: Aggregation, threshold: f64) -> Self {
		let mut result = Self {
			name: name.into(),
			scores: Vec::new(),
			mean: 0.0,
			median: 0.0,
			sum: 0.0,
			threshold,
			aggregation,
			input: Value::Null,
			expected: None,
			output: Value::Null,
			metadata: Map::new(),
		};
		result.set_scores(scores);
		result
	}

	pub fn with_io(mut self, input: Value, expected: Option<Value>, output: Value) -> Self {
		self.input = input;
		self.expected = expected;
		self.output = output;
		self
	}

	pub fn with_metadata(mut self, metadata: Map<String, Value>) -> Self {
		self.metadata = metadata;
		self
	}

	pub fn scores(&self) -> &[Score] {
		&self.scores
	}

	pub fn set_scores(&mut self, scores: Vec<Score>) {
		self.mean = aggregation::mean(&scores);
		self.median = aggregation::median(&scores);
		self.sum = aggregation::sum(&scores);
		self.scores = scores;
	}

	pub fn mean(&self) -> f64 {
		self.mean
	}

	pub fn median(&self) -> f64 {
		self.median
	}

	pub fn sum(&self) -> f64 {
		self.sum
	}

	/// Value selected by this result's own aggregation policy.
	pub fn aggregated(&self) -> f64 {
		self.aggregation.value(self)
	}

	pub fn passed(&self) -> bool {
		self.aggregated() >= self.threshold
	}
}

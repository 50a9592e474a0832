use anyhow::Result;
use async_trait::async_trait;
use jsonschema::JSONSchema;
use serde_json::Value;

use crate::scorer::{ScoreOutput, Scorer, ScorerArgs};

enum Mode {
	Valid,
	Schema(JSONSchema),
	Strict,
}

/// Validates JSON output, optionally against a schema or the structure of `expected`.
///
/// A string output is parsed as JSON first, so models that answer with serialized JSON
/// are scored on the parsed value.
pub struct JsonScorer {
	mode: Mode,
}

impl JsonScorer {
	/// Passes any output that is, or parses as, JSON.
	pub fn new() -> Self {
		Self { mode: Mode::Valid }
	}

	/// Returns error if schema is invalid.
	pub fn with_schema(schema: Value) -> Result<Self> {
		let compiled = JSONSchema::compile(&schema)
			.map_err(|e| anyhow::anyhow!("Invalid JSON schema: {}", e))?;
		Ok(Self {
			mode: Mode::Schema(compiled),
		})
	}

	/// Requires the same keys, array lengths and value kinds as `expected`; values may differ.
	pub fn strict() -> Self {
		Self { mode: Mode::Strict }
	}
}

impl Default for JsonScorer {
	fn default() -> Self {
		Self::new()
	}
}

#[async_trait]
impl Scorer for JsonScorer {
	fn name(&self) -> &str {
		"json"
	}

	async fn score(&self, args: &ScorerArgs) -> Result<ScoreOutput> {
		let parsed = match &args.output {
			Value::String(s) => match serde_json::from_str::<Value>(s) {
				Ok(v) => v,
				Err(e) => {
					return Ok(ScoreOutput::pass_fail(false).with_metadata(serde_json::json!({
						"valid": false,
						"error": e.to_string()
					})));
				}
			},
			other => other.clone(),
		};

		match &self.mode {
			Mode::Schema(schema) => match schema.validate(&parsed) {
				Ok(()) => Ok(ScoreOutput::pass_fail(true).with_metadata(serde_json::json!({
					"valid": true,
					"message": "Output matches JSON schema"
				}))),
				Err(errors) => {
					let error_msgs: Vec<String> = errors
						.map(|e| format!("{}: {}", e.instance_path, e))
						.collect();
					Ok(ScoreOutput::pass_fail(false).with_metadata(serde_json::json!({
						"valid": false,
						"errors": error_msgs
					})))
				}
			},
			Mode::Strict => {
				let structures_match = compare_structure(args.expected_or_null(), &parsed);
				Ok(ScoreOutput::pass_fail(structures_match).with_metadata(serde_json::json!({
					"strict": true,
					"structures_match": structures_match
				})))
			}
			Mode::Valid => Ok(ScoreOutput::pass_fail(true).with_metadata(serde_json::json!({
				"valid": true,
				"message": "Valid JSON"
			}))),
		}
	}
}

/// Recursively compare JSON structure (keys and types, not values)
fn compare_structure(expected: &Value, actual: &Value) -> bool {
	match (expected, actual) {
		(Value::Object(e), Value::Object(a)) => {
			e.len() == a.len()
				&& e.iter().all(|(key, e_val)| {
					a.get(key).is_some_and(|a_val| compare_structure(e_val, a_val))
				})
		}
		(Value::Array(e), Value::Array(a)) => {
			e.len() == a.len()
				&& e.iter()
					.zip(a.iter())
					.all(|(e_item, a_item)| compare_structure(e_item, a_item))
		}
		(Value::String(_), Value::String(_)) => true,
		(Value::Number(_), Value::Number(_)) => true,
		(Value::Bool(_), Value::Bool(_)) => true,
		(Value::Null, Value::Null) => true,
		_ => false,
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use serde_json::json;

	async fn score(scorer: &JsonScorer, output: Value, expected: Value) -> Option<f64> {
		let args = ScorerArgs::new(json!("q"), output, Some(expected));
		scorer.evaluate(&args).await.unwrap().score
	}

	#[tokio::test]
	async fn test_json_valid() {
		let scorer = JsonScorer::new();
		assert_eq!(score(&scorer, json!({"name": "John", "age": 30}), json!({})).await, Some(1.0));
		assert_eq!(score(&scorer, json!(r#"{"name": "John"}"#), json!({})).await, Some(1.0));
		assert_eq!(score(&scorer, json!("{not json"), json!({})).await, Some(0.0));
	}

	#[tokio::test]
	async fn test_json_strict_match() {
		let scorer = JsonScorer::strict();
		let expected = json!({"name": "John", "age": 30});
		// structure matches, values differ
		assert_eq!(score(&scorer, json!({"name": "Jane", "age": 25}), expected.clone()).await, Some(1.0));
		assert_eq!(score(&scorer, json!({"name": "Jane"}), expected).await, Some(0.0));
	}

	#[tokio::test]
	async fn test_json_with_schema() {
		let schema = json!({
			"type": "object",
			"properties": {
				"name": {"type": "string"},
				"age": {"type": "number"}
			},
			"required": ["name", "age"]
		});
		let scorer = JsonScorer::with_schema(schema).unwrap();
		assert_eq!(score(&scorer, json!({"name": "John", "age": 30}), json!({})).await, Some(1.0));
		assert_eq!(score(&scorer, json!({"name": "John"}), json!({})).await, Some(0.0));
	}
}

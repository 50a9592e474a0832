use std::fmt;
use std::str::FromStr;

use anyhow::Result;
use async_trait::async_trait;
use serde_json::Value;
use sqlparser::ast::Statement;
use sqlparser::dialect::{Dialect, GenericDialect, MySqlDialect, PostgreSqlDialect, SQLiteDialect};
use sqlparser::parser::Parser;

use crate::scorer::{ScoreOutput, Scorer, ScorerArgs};

/// SQL dialect to use for parsing.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum SqlDialect {
	#[default]
	Generic,
	PostgreSQL,
	MySQL,
	SQLite,
}

impl SqlDialect {
	fn to_dialect(self) -> Box<dyn Dialect> {
		match self {
			SqlDialect::Generic => Box::new(GenericDialect {}),
			SqlDialect::PostgreSQL => Box::new(PostgreSqlDialect {}),
			SqlDialect::MySQL => Box::new(MySqlDialect {}),
			SqlDialect::SQLite => Box::new(SQLiteDialect {}),
		}
	}
}

impl fmt::Display for SqlDialect {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		let s = match self {
			SqlDialect::Generic => "generic",
			SqlDialect::PostgreSQL => "postgres",
			SqlDialect::MySQL => "mysql",
			SqlDialect::SQLite => "sqlite",
		};
		f.write_str(s)
	}
}

impl FromStr for SqlDialect {
	type Err = String;

	fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
		match s.to_ascii_lowercase().as_str() {
			"" | "generic" => Ok(SqlDialect::Generic),
			"postgres" | "postgresql" => Ok(SqlDialect::PostgreSQL),
			"mysql" => Ok(SqlDialect::MySQL),
			"sqlite" => Ok(SqlDialect::SQLite),
			other => Err(format!("unknown SQL dialect '{other}'")),
		}
	}
}

/// Validates SQL syntax using sqlparser.
#[derive(Debug, Default)]
pub struct SqlScorer {
	dialect: SqlDialect,
}

impl SqlScorer {
	pub fn new(dialect: SqlDialect) -> Self {
		Self { dialect }
	}

	/// Generic SQL dialect (most permissive).
	pub fn generic() -> Self {
		Self::new(SqlDialect::Generic)
	}

	pub fn postgres() -> Self {
		Self::new(SqlDialect::PostgreSQL)
	}
}

fn statement_kind(stmt: &Statement) -> &'static str {
	match stmt {
		Statement::Query(_) => "SELECT",
		Statement::Insert { .. } => "INSERT",
		Statement::Update { .. } => "UPDATE",
		Statement::Delete { .. } => "DELETE",
		Statement::CreateTable { .. } => "CREATE TABLE",
		Statement::AlterTable { .. } => "ALTER TABLE",
		Statement::Drop { .. } => "DROP",
		_ => "OTHER",
	}
}

#[async_trait]
impl Scorer for SqlScorer {
	fn name(&self) -> &str {
		"sql"
	}

	async fn score(&self, args: &ScorerArgs) -> Result<ScoreOutput> {
		// either a bare SQL string or an object with a "sql" field
		let sql_str = match &args.output {
			Value::String(s) => s.clone(),
			other => match other.get("sql").and_then(|v| v.as_str()) {
				Some(sql) => sql.to_string(),
				None => other.to_string(),
			},
		};

		let dialect = self.dialect.to_dialect();
		let output = match Parser::parse_sql(&*dialect, &sql_str) {
			Ok(statements) => {
				let statement_types: Vec<&str> = statements.iter().map(statement_kind).collect();
				ScoreOutput::pass_fail(true).with_metadata(serde_json::json!({
					"valid": true,
					"statement_count": statements.len(),
					"statement_types": statement_types,
					"dialect": self.dialect.to_string()
				}))
			}
			Err(e) => ScoreOutput::pass_fail(false).with_metadata(serde_json::json!({
				"valid": false,
				"error": e.to_string(),
				"dialect": self.dialect.to_string()
			})),
		};
		Ok(output)
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use serde_json::json;

	async fn score(scorer: &SqlScorer, output: Value) -> evalflow_types::Score {
		scorer.evaluate(&ScorerArgs::new(json!(""), output, None)).await.unwrap()
	}

	#[tokio::test]
	async fn test_sql_valid_select() {
		let s = score(&SqlScorer::generic(), json!("SELECT * FROM users WHERE age > 18")).await;
		assert_eq!(s.score, Some(1.0));
		assert_eq!(s.metadata.unwrap()["statement_types"], json!(["SELECT"]));
	}

	#[tokio::test]
	async fn test_sql_invalid() {
		let s = score(&SqlScorer::generic(), json!("SELEC * FRM users")).await;
		assert_eq!(s.score, Some(0.0));
		assert_eq!(s.metadata.unwrap()["valid"], json!(false));
	}

	#[tokio::test]
	async fn test_sql_from_json_object() {
		let s = score(&SqlScorer::generic(), json!({ "sql": "SELECT id, name FROM products" })).await;
		assert_eq!(s.score, Some(1.0));
	}

	#[tokio::test]
	async fn test_sql_postgres_specific() {
		let s = score(&SqlScorer::postgres(), json!("SELECT * FROM users LIMIT 10 OFFSET 20")).await;
		assert_eq!(s.score, Some(1.0));
	}

	#[test]
	fn dialect_names_parse() {
		assert_eq!("postgresql".parse::<SqlDialect>(), Ok(SqlDialect::PostgreSQL));
		assert_eq!("".parse::<SqlDialect>(), Ok(SqlDialect::Generic));
		assert!("oracle".parse::<SqlDialect>().is_err());
	}
}

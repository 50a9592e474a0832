use std::future::Future;
use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;
use evalflow_types::Score;
use serde_json::{Map, Value};

/// Everything a scorer may look at for one item.
#[derive(Debug, Clone, PartialEq)]
pub struct ScorerArgs {
    pub input: Value,
    pub output: Value,
    pub expected: Option<Value>,
    pub extra: Map<String, Value>,
}

impl ScorerArgs {
    pub fn new(input: Value, output: Value, expected: Option<Value>) -> Self {
        Self {
            input,
            output,
            expected,
            extra: Map::new(),
        }
    }

    pub fn expected_or_null(&self) -> &Value {
        self.expected.as_ref().unwrap_or(&Value::Null)
    }
}

/// A possibly partial score. A missing name is filled with the scorer's own name.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ScoreOutput {
    pub name: Option<String>,
    pub score: Option<f64>,
    pub metadata: Option<Value>,
}

impl ScoreOutput {
    pub fn value(score: f64) -> Self {
        Self {
            score: Some(score),
            ..Self::default()
        }
    }

    pub fn pass_fail(passed: bool) -> Self {
        Self::value(if passed { 1.0 } else { 0.0 })
    }

    /// Unscoreable output; aggregated as 0 but reported as `null`.
    pub fn unscored() -> Self {
        Self::default()
    }

    pub fn named(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    pub fn with_metadata(mut self, metadata: Value) -> Self {
        self.metadata = Some(metadata);
        self
    }

    pub fn into_score(self, default_name: &str) -> Score {
        Score {
            name: self.name.unwrap_or_else(|| default_name.to_string()),
            score: self.score,
            metadata: self.metadata,
        }
    }
}

impl From<f64> for ScoreOutput {
    fn from(score: f64) -> Self {
        Self::value(score)
    }
}

/// Text form of a value for string-based scorers: strings as-is, `null` as empty,
/// anything else as compact JSON.
pub fn value_text(v: &Value) -> String {
    match v {
        Value::String(s) => s.clone(),
        Value::Null => String::new(),
        _ => v.to_string(),
    }
}

#[async_trait]
pub trait Scorer: Send + Sync {
    fn name(&self) -> &str;

    async fn score(&self, args: &ScorerArgs) -> Result<ScoreOutput>;

    /// Score and complete the result into a named [`Score`].
    async fn evaluate(&self, args: &ScorerArgs) -> Result<Score> {
        let output = self.score(args).await?;
        Ok(output.into_score(self.name()))
    }
}

/// Build a scorer from an async closure. The returned score always carries `name`,
/// whatever name the closure put on its output.
pub fn create_scorer<F, Fut>(name: impl Into<String>, f: F) -> Arc<dyn Scorer>
where
    F: Send + Sync + 'static + Fn(ScorerArgs) -> Fut,
    Fut: Future<Output = Result<ScoreOutput>> + Send + 'static,
{
    struct ClosureScorer<F> {
        name: String,
        f: F,
    }

    #[async_trait]
    impl<F, Fut> Scorer for ClosureScorer<F>
    where
        F: Send + Sync + 'static + Fn(ScorerArgs) -> Fut,
        Fut: Future<Output = Result<ScoreOutput>> + Send + 'static,
    {
        fn name(&self) -> &str {
            &self.name
        }

        async fn score(&self, args: &ScorerArgs) -> Result<ScoreOutput> {
            let output = (self.f)(args.clone()).await?;
            Ok(ScoreOutput {
                name: Some(self.name.clone()),
                ..output
            })
        }
    }

    Arc::new(ClosureScorer { name: name.into(), f })
}

/// Synchronous variant of [`create_scorer`].
pub fn create_sync_scorer<F>(name: impl Into<String>, f: F) -> Arc<dyn Scorer>
where
    F: Send + Sync + 'static + Fn(&ScorerArgs) -> Result<ScoreOutput>,
{
    struct SyncScorer<F> {
        name: String,
        f: F,
    }

    #[async_trait]
    impl<F> Scorer for SyncScorer<F>
    where
        F: Send + Sync + 'static + Fn(&ScorerArgs) -> Result<ScoreOutput>,
    {
        fn name(&self) -> &str {
            &self.name
        }

        async fn score(&self, args: &ScorerArgs) -> Result<ScoreOutput> {
            let output = (self.f)(args)?;
            Ok(ScoreOutput {
                name: Some(self.name.clone()),
                ..output
            })
        }
    }

    Arc::new(SyncScorer { name: name.into(), f })
}

use std::sync::Arc;
use std::time::Duration;

use evalflow_types::{Aggregation, DataItem, EvalResult};
use futures::future::try_join_all;
use futures::stream::{self, StreamExt, TryStreamExt};
use tracing::{debug, error, info};

use crate::accumulator::{now_millis, AccumulatorHandle, SuiteFinished, SuiteRef};
use crate::datasource::Data;
use crate::error::{EvalError, ItemError};
use crate::resolver::DatasetResolver;
use crate::scorer::{Scorer, ScorerArgs};
use crate::task::{Task, TaskArgs};

pub const DEFAULT_THRESHOLD: f64 = 1.0;
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(25);
pub const DEFAULT_CONCURRENCY: usize = 8;

/// Task, scorers and pass policy for one item at a time. Knows nothing about timeouts
/// or reporting.
#[derive(Clone)]
pub struct ItemRunner {
	task: Arc<dyn Task>,
	scorers: Vec<Arc<dyn Scorer>>,
	aggregation: Aggregation,
	threshold: f64,
}

impl ItemRunner {
	pub fn new(task: Arc<dyn Task>, scorers: Vec<Arc<dyn Scorer>>, aggregation: Aggregation, threshold: f64) -> Self {
		Self {
			task,
			scorers,
			aggregation,
			threshold,
		}
	}

	/// Run the task, score the output with every scorer concurrently and apply the
	/// threshold. A result below threshold is still returned, inside the error.
	pub async fn run_item(&self, item: &DataItem) -> Result<EvalResult, ItemError> {
		let name = item.display_name();
		let output = self
			.task
			.run(&TaskArgs::from_item(item))
			.await
			.map_err(|source| ItemError::Task {
				item: name.clone(),
				source,
			})?;

		let args = ScorerArgs {
			input: item.input.clone(),
			output,
			expected: item.expected.clone(),
			extra: item.extra.clone(),
		};
		let scores = try_join_all(self.scorers.iter().map(|scorer| {
			let args = &args;
			let name = &name;
			async move {
				scorer.evaluate(args).await.map_err(|source| ItemError::Scorer {
					item: name.clone(),
					scorer: scorer.name().to_string(),
					source,
				})
			}
		}))
		.await?;

		let result = EvalResult::new(name, scores, self.aggregation, self.threshold)
			.with_io(args.input, args.expected, args.output)
			.with_metadata(args.extra);

		if !result.passed() {
			return Err(ItemError::BelowThreshold {
				score: result.aggregated(),
				threshold: self.threshold,
				aggregation: self.aggregation,
				result: Box::new(result),
			});
		}
		Ok(result)
	}
}

/// What happened to one item of a suite, in dataset order.
#[derive(Debug)]
pub struct ItemOutcome {
	pub index: usize,
	pub name: String,
	pub outcome: Result<EvalResult, ItemError>,
}

impl ItemOutcome {
	/// The scored result, including one that missed its threshold.
	pub fn result(&self) -> Option<&EvalResult> {
		match &self.outcome {
			Ok(result) => Some(result),
			Err(e) => e.result(),
		}
	}

	pub fn passed(&self) -> bool {
		self.outcome.is_ok()
	}
}

#[derive(Debug)]
pub struct SuiteOutcome {
	pub suite: SuiteRef,
	pub items: Vec<ItemOutcome>,
}

impl SuiteOutcome {
	pub fn passed(&self) -> bool {
		self.items.iter().all(ItemOutcome::passed)
	}

	pub fn failures(&self) -> impl Iterator<Item = &ItemOutcome> {
		self.items.iter().filter(|o| !o.passed())
	}

	pub fn results(&self) -> Vec<EvalResult> {
		self.items.iter().filter_map(|o| o.result().cloned()).collect()
	}
}

pub struct EvalBuilder {
	id: Option<String>,
	name: String,
	data: Option<Data>,
	task: Option<Arc<dyn Task>>,
	scorers: Vec<Arc<dyn Scorer>>,
	aggregation: Aggregation,
	threshold: f64,
	timeout: Duration,
	concurrency: usize,
}

impl EvalBuilder {
	pub fn new(name: impl Into<String>) -> Self {
		Self {
			id: None,
			name: name.into(),
			data: None,
			task: None,
			scorers: Vec::new(),
			aggregation: Aggregation::default(),
			threshold: DEFAULT_THRESHOLD,
			timeout: DEFAULT_TIMEOUT,
			concurrency: DEFAULT_CONCURRENCY,
		}
	}

	/// Stable key of the suite in the results document. Defaults to the name.
	pub fn id(mut self, id: impl Into<String>) -> Self {
		self.id = Some(id.into());
		self
	}

	pub fn data(mut self, data: impl Into<Data>) -> Self {
		self.data = Some(data.into());
		self
	}

	pub fn task(mut self, task: Arc<dyn Task>) -> Self {
		self.task = Some(task);
		self
	}

	pub fn scorers<I>(mut self, scorers: I) -> Self
	where
		I: IntoIterator<Item = Arc<dyn Scorer>>,
	{
		self.scorers = scorers.into_iter().collect();
		self
	}

	pub fn add_scorer(mut self, scorer: Arc<dyn Scorer>) -> Self {
		self.scorers.push(scorer);
		self
	}

	pub fn aggregation(mut self, aggregation: Aggregation) -> Self {
		self.aggregation = aggregation;
		self
	}

	pub fn threshold(mut self, threshold: f64) -> Self {
		self.threshold = threshold;
		self
	}

	/// Per-item limit, covering the task and all of its scorers.
	pub fn timeout(mut self, timeout: Duration) -> Self {
		self.timeout = timeout;
		self
	}

	pub fn concurrency(mut self, n: usize) -> Self {
		self.concurrency = n.max(1);
		self
	}

	pub fn build(self) -> Result<Eval, EvalError> {
		let incomplete = |field| EvalError::Incomplete {
			suite: self.name.clone(),
			field,
		};
		let data = self.data.clone().ok_or_else(|| incomplete("data"))?;
		let task = self.task.clone().ok_or_else(|| incomplete("task"))?;
		if self.scorers.is_empty() {
			return Err(incomplete("scorers"));
		}
		Ok(Eval {
			suite: SuiteRef::new(self.id.unwrap_or_else(|| self.name.clone()), self.name),
			data,
			runner: ItemRunner::new(task, self.scorers, self.aggregation, self.threshold),
			timeout: self.timeout,
			concurrency: self.concurrency,
		})
	}
}

/// One evaluation suite: a dataset, a task and the scorers that judge it.
pub struct Eval {
	suite: SuiteRef,
	data: Data,
	runner: ItemRunner,
	timeout: Duration,
	concurrency: usize,
}

impl Eval {
	pub fn builder(name: impl Into<String>) -> EvalBuilder {
		EvalBuilder::new(name)
	}

	pub fn suite(&self) -> &SuiteRef {
		&self.suite
	}

	pub fn runner(&self) -> &ItemRunner {
		&self.runner
	}

	/// Resolve the dataset, run every item and report each scored result as it lands,
	/// then report the suite. Item failures are in the outcome; only dataset and
	/// reporting failures abort the suite.
	pub async fn run(&self, resolver: &DatasetResolver, reporter: &AccumulatorHandle) -> Result<SuiteOutcome, EvalError> {
		let items = self.resolve(resolver).await?;
		self.run_items(items, reporter).await
	}

	/// Materialize the suite's items without running anything.
	pub async fn resolve(&self, resolver: &DatasetResolver) -> Result<Vec<DataItem>, EvalError> {
		resolver.resolve(&self.data).await.map_err(|e| {
			error!(suite = %self.suite.id, error = %e, "failed to resolve dataset");
			EvalError::from(e)
		})
	}

	/// Run already resolved items through the task and scorers.
	pub async fn run_items(&self, items: Vec<DataItem>, reporter: &AccumulatorHandle) -> Result<SuiteOutcome, EvalError> {
		let start_time = now_millis();
		info!(suite = %self.suite.id, items = items.len(), "running suite");

		let mut outcomes: Vec<ItemOutcome> = stream::iter(items.into_iter().enumerate())
			.map(|(index, item)| self.run_one(index, item, reporter))
			.buffer_unordered(self.concurrency)
			.try_collect()
			.await?;
		outcomes.sort_by_key(|o| o.index);

		let failed: Vec<&ItemOutcome> = outcomes.iter().filter(|o| !o.passed()).collect();
		let message = failed.first().map(|first| {
			let reason = first.outcome.as_ref().err().map(ToString::to_string).unwrap_or_default();
			format!("{} of {} items failed; first: {}: {}", failed.len(), outcomes.len(), first.name, reason)
		});
		let results: Vec<EvalResult> = outcomes.iter().filter_map(|o| o.result().cloned()).collect();

		reporter
			.suite_finished(SuiteFinished {
				suite: self.suite.clone(),
				start_time,
				end_time: now_millis(),
				failed: !failed.is_empty(),
				message,
				results: Some(results),
			})
			.await?;

		Ok(SuiteOutcome {
			suite: self.suite.clone(),
			items: outcomes,
		})
	}

	async fn run_one(&self, index: usize, item: DataItem, reporter: &AccumulatorHandle) -> Result<ItemOutcome, EvalError> {
		let name = item.display_name();
		let outcome = match tokio::time::timeout(self.timeout, self.runner.run_item(&item)).await {
			Ok(outcome) => outcome,
			Err(_) => Err(ItemError::TimedOut {
				item: name.clone(),
				timeout: self.timeout,
			}),
		};

		match &outcome {
			Ok(_) => debug!(suite = %self.suite.id, item = %name, "item passed"),
			Err(e) => debug!(suite = %self.suite.id, item = %name, error = %e, "item failed"),
		}
		let outcome = ItemOutcome { index, name, outcome };
		if let Some(result) = outcome.result() {
			reporter.item_finished(&self.suite, index.to_string(), result.clone()).await?;
		}
		Ok(outcome)
	}
}

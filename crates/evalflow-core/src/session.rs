use std::sync::Arc;

use evalflow_types::ResultsDocument;
use futures::future::{join_all, try_join_all};
use tracing::info;

use crate::accumulator::{AccumulatorConfig, AccumulatorHandle, ResultsAccumulator};
use crate::error::{EvalError, ReportError};
use crate::resolver::DatasetResolver;
use crate::runner::{Eval, SuiteOutcome};
use crate::sink::ResultsSink;

/// A single evaluation run: suites share one resolver and report into one document.
#[derive(Debug)]
pub struct EvalSession {
    resolver: DatasetResolver,
    reporter: AccumulatorHandle,
}

impl EvalSession {
    pub async fn start(
        resolver: DatasetResolver,
        sinks: Vec<Arc<dyn ResultsSink>>,
        config: AccumulatorConfig,
    ) -> Result<Self, ReportError> {
        let reporter = ResultsAccumulator::start(sinks, config).await?;
        info!("evaluation run started");
        Ok(Self { resolver, reporter })
    }

    pub fn resolver(&self) -> &DatasetResolver {
        &self.resolver
    }

    /// Handle for hosts that report item and suite events themselves.
    pub fn reporter(&self) -> &AccumulatorHandle {
        &self.reporter
    }

    pub async fn run_suite(&self, eval: &Eval) -> Result<SuiteOutcome, EvalError> {
        eval.run(&self.resolver, &self.reporter).await
    }

    /// Run suites concurrently. Every dataset is resolved before any task runs, so a
    /// suite that cannot be resolved fails the call without starting the others. Once
    /// running, every suite runs to completion; the first reporting error is returned
    /// after all of them are done.
    pub async fn run_suites(&self, evals: &[Eval]) -> Result<Vec<SuiteOutcome>, EvalError> {
        let resolved = try_join_all(evals.iter().map(|eval| eval.resolve(&self.resolver))).await?;
        join_all(
            evals
                .iter()
                .zip(resolved)
                .map(|(eval, items)| eval.run_items(items, &self.reporter)),
        )
        .await
        .into_iter()
        .collect()
    }

    pub async fn snapshot(&self) -> Result<ResultsDocument, ReportError> {
        self.reporter.snapshot().await
    }

    pub async fn finish(self) -> Result<ResultsDocument, ReportError> {
        self.reporter.run_finished().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::provider::ProviderRegistry;
    use crate::scorers::exact::ExactMatchScorer;
    use crate::sink::FileSink;
    use crate::dataset::Dataset;
    use crate::error::DatasetError;
    use crate::task::{from_async_fn, from_fn, TaskArgs};
    use evalflow_store::{DatasetCache, MemoryBlobStore};
    use evalflow_types::{DataItem, RunStatus, SuiteStatus};
    use serde_json::json;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    fn memory_resolver() -> DatasetResolver {
        DatasetResolver::new(
            Arc::new(ProviderRegistry::new()),
            DatasetCache::new(Arc::new(MemoryBlobStore::new())),
        )
    }

    fn uppercase_eval(name: &str, items: Vec<DataItem>) -> Eval {
        Eval::builder(name)
            .data(items)
            .task(from_fn(|args| Ok(json!(args.input.as_str().unwrap_or_default().to_uppercase()))))
            .add_scorer(Arc::new(ExactMatchScorer))
            .build()
            .unwrap()
    }

    #[tokio::test]
    async fn uppercase_run_end_to_end() {
        let dir = tempfile::tempdir().unwrap();
        let sink = Arc::new(FileSink::default_location(dir.path()));
        let resolver = DatasetResolver::new(Arc::new(ProviderRegistry::new()), DatasetCache::in_project(dir.path()));
        let session = EvalSession::start(resolver, vec![sink.clone()], AccumulatorConfig::default())
            .await
            .unwrap();

        let eval = uppercase_eval(
            "uppercase",
            vec![DataItem::new(json!("a"), json!("A")), DataItem::new(json!("b"), json!("B"))],
        );
        let outcome = session.run_suite(&eval).await.unwrap();
        assert!(outcome.passed());

        let doc = session.finish().await.unwrap();
        assert_eq!(doc.status, RunStatus::Finished);
        assert!(doc.success);
        assert_eq!(doc.num_passed_evals, 2);
        assert_eq!(doc.num_failed_evals, 0);
        assert_eq!(doc.num_passed_eval_suites, 1);
        assert_eq!(doc.eval_results[0].status, SuiteStatus::Passed);
        assert_eq!(doc.eval_results[0].summary.mean_score, 1.0);

        let on_disk: ResultsDocument = serde_json::from_slice(&std::fs::read(sink.path()).unwrap()).unwrap();
        assert_eq!(on_disk, doc);
    }

    #[tokio::test]
    async fn unresolvable_suite_fails_before_any_task_runs() {
        let session = EvalSession::start(memory_resolver(), Vec::new(), AccumulatorConfig::default())
            .await
            .unwrap();
        let started = Arc::new(AtomicUsize::new(0));
        let counter = started.clone();
        let slow = Eval::builder("slow")
            .data(vec![DataItem::new(json!("a"), json!("A")), DataItem::new(json!("b"), json!("B"))])
            .task(from_async_fn(move |args: TaskArgs| {
                let counter = counter.clone();
                async move {
                    counter.fetch_add(1, Ordering::SeqCst);
                    tokio::time::sleep(Duration::from_millis(50)).await;
                    Ok(json!(args.input.as_str().unwrap_or_default().to_uppercase()))
                }
            }))
            .add_scorer(Arc::new(ExactMatchScorer))
            .build()
            .unwrap();
        let broken = Eval::builder("broken")
            .data(Dataset::builder("nosource").build())
            .task(from_fn(|args| Ok(args.input.clone())))
            .add_scorer(Arc::new(ExactMatchScorer))
            .build()
            .unwrap();

        let err = session.run_suites(&[slow, broken]).await.unwrap_err();
        assert!(matches!(err, EvalError::Dataset(DatasetError::MissingSource(_))));
        assert_eq!(started.load(Ordering::SeqCst), 0);

        let doc = session.finish().await.unwrap();
        assert_eq!(doc.status, RunStatus::Finished);
        assert_eq!(doc.num_total_evals, 0);
    }

    #[tokio::test]
    async fn suites_run_side_by_side() {
        let session = EvalSession::start(memory_resolver(), Vec::new(), AccumulatorConfig::default())
            .await
            .unwrap();
        let evals = vec![
            uppercase_eval("good", vec![DataItem::new(json!("x"), json!("X"))]),
            uppercase_eval("bad", vec![DataItem::new(json!("x"), json!("x"))]),
        ];
        let outcomes = session.run_suites(&evals).await.unwrap();
        assert!(outcomes[0].passed());
        assert!(!outcomes[1].passed());

        let live = session.snapshot().await.unwrap();
        assert_eq!(live.status, RunStatus::Running);
        assert_eq!(live.num_total_eval_suites, 2);

        let doc = session.finish().await.unwrap();
        assert!(!doc.success);
        assert_eq!(doc.num_failed_eval_suites, 1);
        assert_eq!(doc.num_failed_evals, 1);
    }
}

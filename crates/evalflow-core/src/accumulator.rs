//! Incremental results aggregation.
//!
//! A single actor task owns the [`ResultsDocument`]. Hosts send item, suite and run
//! lifecycle events through an [`AccumulatorHandle`]; every accepted event updates the
//! document and hands the whole document to every sink before the sender is acknowledged.
//!
//! Events may arrive in any order and more than once. Each suite remembers what it last
//! contributed to the run counters, so an update subtracts the old contribution and adds
//! the new one instead of counting twice.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use evalflow_types::{EvalResult, ResultsDocument, RunStatus, SuiteResult, SuiteStatus, SuiteSummary};
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, info, warn};

use crate::error::ReportError;
use crate::sink::ResultsSink;

pub(crate) fn now_millis() -> i64 {
    chrono::Utc::now().timestamp_millis()
}

/// Identifies a suite in the document. `id` is the stable key (its source location);
/// `name` is only displayed.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SuiteRef {
    pub id: String,
    pub name: String,
}

impl SuiteRef {
    pub fn new(id: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
        }
    }
}

/// Host-side report that a suite is done. `results` is the host's own view of the
/// suite's items; item events already received for the suite take precedence.
#[derive(Debug, Clone)]
pub struct SuiteFinished {
    pub suite: SuiteRef,
    pub start_time: i64,
    pub end_time: i64,
    pub failed: bool,
    pub message: Option<String>,
    pub results: Option<Vec<EvalResult>>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
struct Contribution {
    suites_total: usize,
    suites_passed: usize,
    suites_failed: usize,
    evals_total: usize,
    evals_passed: usize,
    evals_failed: usize,
}

#[derive(Debug)]
struct SuiteState {
    index: usize,
    /// Item events keyed by item, in arrival order.
    accumulated: Vec<(String, EvalResult)>,
    reported: Vec<EvalResult>,
    host_failed: bool,
    finished: bool,
    contribution: Contribution,
}

/// The document plus the bookkeeping needed to update it. Pure state; the actor wraps it.
#[derive(Debug)]
pub struct ResultsState {
    doc: ResultsDocument,
    suites: HashMap<String, SuiteState>,
}

impl ResultsState {
    pub fn new(start_time: i64) -> Self {
        Self {
            doc: ResultsDocument::new(start_time),
            suites: HashMap::new(),
        }
    }

    pub fn document(&self) -> &ResultsDocument {
        &self.doc
    }

    pub fn is_finished(&self) -> bool {
        self.doc.status == RunStatus::Finished
    }

    fn ensure_suite(&mut self, suite: &SuiteRef, start_time: i64) -> &mut SuiteState {
        let doc = &mut self.doc;
        self.suites.entry(suite.id.clone()).or_insert_with(|| {
            doc.eval_results.push(SuiteResult {
                name: suite.name.clone(),
                filepath: suite.id.clone(),
                status: SuiteStatus::Running,
                start_time,
                end_time: None,
                duration: None,
                eval_results: Vec::new(),
                message: None,
                summary: SuiteSummary::default(),
            });
            SuiteState {
                index: doc.eval_results.len() - 1,
                accumulated: Vec::new(),
                reported: Vec::new(),
                host_failed: false,
                finished: false,
                contribution: Contribution::default(),
            }
        })
    }

    /// Record one item result. A repeated event for the same `item` key replaces the
    /// earlier result in place.
    pub fn item_finished(
        &mut self,
        suite: &SuiteRef,
        item: &str,
        result: EvalResult,
        now: i64,
    ) -> Result<(), ReportError> {
        if self.is_finished() {
            return Err(ReportError::Finished("item"));
        }
        let accumulated = &mut self.ensure_suite(suite, now).accumulated;
        match accumulated.iter_mut().find(|(key, _)| key == item) {
            Some(slot) => {
                debug!(suite = %suite.id, item, "duplicate item event replaces earlier result");
                slot.1 = result;
            }
            None => accumulated.push((item.to_string(), result)),
        }
        self.refresh(&suite.id);
        Ok(())
    }

    /// Returns `false` when the event was ignored: an unseen suite with no results.
    pub fn suite_finished(&mut self, event: SuiteFinished) -> Result<bool, ReportError> {
        if self.is_finished() {
            return Err(ReportError::Finished("suite"));
        }
        let payload = event.results.unwrap_or_default();
        if payload.is_empty() && !self.suites.contains_key(&event.suite.id) {
            debug!(suite = %event.suite.id, "suite finished without results, not recorded");
            return Ok(false);
        }

        let state = self.ensure_suite(&event.suite, event.start_time);
        state.finished = true;
        state.host_failed = event.failed;
        if !payload.is_empty() {
            state.reported = payload;
        }
        let index = state.index;

        let block = &mut self.doc.eval_results[index];
        block.name = event.suite.name;
        block.start_time = event.start_time;
        block.end_time = Some(event.end_time);
        block.duration = Some(event.end_time - event.start_time);
        block.message = event.message;

        self.refresh(&event.suite.id);
        Ok(true)
    }

    pub fn run_finished(&mut self, now: i64) -> Result<(), ReportError> {
        if self.is_finished() {
            return Err(ReportError::Finished("run"));
        }
        self.doc.status = RunStatus::Finished;
        self.doc.end_time = Some(now);
        self.doc.duration = Some(now - self.doc.start_time);
        self.doc.success = self.doc.num_failed_eval_suites == 0;
        Ok(())
    }

    /// Recompute one suite block from scratch and swap its contribution to the run counters.
    fn refresh(&mut self, id: &str) {
        let Some(state) = self.suites.get_mut(id) else {
            return;
        };
        let results = if state.accumulated.is_empty() {
            state.reported.clone()
        } else {
            state.accumulated.iter().map(|(_, result)| result.clone()).collect()
        };

        let summary = SuiteSummary::from_results(&results);
        let all_passed = summary.passed_count == summary.total_count;
        let status = match (state.finished, state.host_failed || !all_passed) {
            (false, _) => SuiteStatus::Running,
            (true, false) => SuiteStatus::Passed,
            (true, true) => SuiteStatus::Failed,
        };

        let next = Contribution {
            suites_total: usize::from(state.finished),
            suites_passed: usize::from(status == SuiteStatus::Passed),
            suites_failed: usize::from(status == SuiteStatus::Failed),
            evals_total: summary.total_count,
            evals_passed: summary.passed_count,
            evals_failed: summary.total_count - summary.passed_count,
        };
        let prev = std::mem::replace(&mut state.contribution, next);

        let doc = &mut self.doc;
        doc.num_total_eval_suites = doc.num_total_eval_suites - prev.suites_total + next.suites_total;
        doc.num_passed_eval_suites = doc.num_passed_eval_suites - prev.suites_passed + next.suites_passed;
        doc.num_failed_eval_suites = doc.num_failed_eval_suites - prev.suites_failed + next.suites_failed;
        doc.num_total_evals = doc.num_total_evals - prev.evals_total + next.evals_total;
        doc.num_passed_evals = doc.num_passed_evals - prev.evals_passed + next.evals_passed;
        doc.num_failed_evals = doc.num_failed_evals - prev.evals_failed + next.evals_failed;
        doc.success = doc.num_failed_eval_suites == 0;

        let block = &mut doc.eval_results[state.index];
        block.status = status;
        block.summary = summary;
        block.eval_results = results;
    }
}

#[derive(Debug, Clone)]
pub struct AccumulatorConfig {
    /// How long to keep applying events after the run is reported finished.
    pub drain_grace: Duration,
    pub channel_capacity: usize,
}

impl Default for AccumulatorConfig {
    fn default() -> Self {
        Self {
            drain_grace: Duration::ZERO,
            channel_capacity: 256,
        }
    }
}

type Ack<T> = oneshot::Sender<Result<T, ReportError>>;

enum Command {
    Item {
        suite: SuiteRef,
        item: String,
        result: Box<EvalResult>,
        ack: Ack<()>,
    },
    Suite {
        event: Box<SuiteFinished>,
        ack: Ack<()>,
    },
    Finish {
        ack: Ack<ResultsDocument>,
    },
    Snapshot {
        ack: oneshot::Sender<ResultsDocument>,
    },
}

pub struct ResultsAccumulator {
    state: ResultsState,
    sinks: Vec<Arc<dyn ResultsSink>>,
    config: AccumulatorConfig,
    rx: mpsc::Receiver<Command>,
}

impl ResultsAccumulator {
    /// Write the initial `running` document to every sink and spawn the actor.
    pub async fn start(
        sinks: Vec<Arc<dyn ResultsSink>>,
        config: AccumulatorConfig,
    ) -> Result<AccumulatorHandle, ReportError> {
        let state = ResultsState::new(now_millis());
        flush(&sinks, state.document()).await?;

        let (tx, rx) = mpsc::channel(config.channel_capacity.max(1));
        let actor = ResultsAccumulator {
            state,
            sinks,
            config,
            rx,
        };
        tokio::spawn(actor.run());
        Ok(AccumulatorHandle { tx })
    }

    async fn run(mut self) {
        while let Some(command) = self.rx.recv().await {
            match command {
                Command::Finish { ack } => {
                    let result = self.finish().await;
                    let _ = ack.send(result);
                }
                other => self.apply(other).await,
            }
        }
        debug!("results accumulator stopped");
    }

    async fn apply(&mut self, command: Command) {
        match command {
            Command::Item { suite, item, result, ack } => {
                let outcome = self.state.item_finished(&suite, &item, *result, now_millis());
                let _ = ack.send(self.settle(outcome).await);
            }
            Command::Suite { event, ack } => {
                let suite = event.suite.id.clone();
                let outcome = match self.state.suite_finished(*event) {
                    Ok(true) => self.settle(Ok(())).await,
                    Ok(false) => Ok(()),
                    Err(e) => self.settle(Err(e)).await,
                };
                if outcome.is_ok() {
                    info!(%suite, "suite reported");
                }
                let _ = ack.send(outcome);
            }
            Command::Finish { ack } => {
                // a second finish while the first is still draining
                let _ = ack.send(Err(ReportError::Finished("run")));
            }
            Command::Snapshot { ack } => {
                let _ = ack.send(self.state.document().clone());
            }
        }
    }

    /// Flush after a successful mutation; log rejected events.
    async fn settle(&mut self, outcome: Result<(), ReportError>) -> Result<(), ReportError> {
        match outcome {
            Ok(()) => flush(&self.sinks, self.state.document()).await,
            Err(e) => {
                warn!(error = %e, "results event rejected");
                Err(e)
            }
        }
    }

    async fn finish(&mut self) -> Result<ResultsDocument, ReportError> {
        if self.state.is_finished() {
            warn!("run already finished");
            return Err(ReportError::Finished("run"));
        }

        if self.config.drain_grace.is_zero() {
            while let Ok(command) = self.rx.try_recv() {
                self.apply(command).await;
            }
        } else {
            let deadline = tokio::time::Instant::now() + self.config.drain_grace;
            while let Ok(Some(command)) = tokio::time::timeout_at(deadline, self.rx.recv()).await {
                self.apply(command).await;
            }
        }

        self.state.run_finished(now_millis())?;
        let doc = self.state.document();
        info!(
            success = doc.success,
            suites = doc.num_total_eval_suites,
            passed = doc.num_passed_evals,
            failed = doc.num_failed_evals,
            "run finished"
        );
        flush(&self.sinks, doc).await?;
        Ok(doc.clone())
    }
}

/// Write to every sink; the first failure is returned after all sinks were tried.
async fn flush(sinks: &[Arc<dyn ResultsSink>], doc: &ResultsDocument) -> Result<(), ReportError> {
    let mut first_err = None;
    for sink in sinks {
        if let Err(e) = sink.write(doc).await {
            warn!(sink = %sink.describe(), error = %e, "failed to write results");
            first_err.get_or_insert(e);
        }
    }
    match first_err {
        Some(e) => Err(ReportError::Sink(e)),
        None => Ok(()),
    }
}

/// Cheap to clone; every clone feeds the same actor.
#[derive(Debug, Clone)]
pub struct AccumulatorHandle {
    tx: mpsc::Sender<Command>,
}

impl AccumulatorHandle {
    async fn request<T>(&self, command: Command, rx: oneshot::Receiver<T>) -> Result<T, ReportError> {
        self.tx.send(command).await.map_err(|_| ReportError::Closed)?;
        rx.await.map_err(|_| ReportError::Closed)
    }

    /// `item` identifies the item within its suite; resending the same key replaces the result.
    pub async fn item_finished(
        &self,
        suite: &SuiteRef,
        item: impl Into<String>,
        result: EvalResult,
    ) -> Result<(), ReportError> {
        let (ack, rx) = oneshot::channel();
        let command = Command::Item {
            suite: suite.clone(),
            item: item.into(),
            result: Box::new(result),
            ack,
        };
        self.request(command, rx).await?
    }

    pub async fn suite_finished(&self, event: SuiteFinished) -> Result<(), ReportError> {
        let (ack, rx) = oneshot::channel();
        let command = Command::Suite {
            event: Box::new(event),
            ack,
        };
        self.request(command, rx).await?
    }

    /// Finalize the run and return the finished document.
    pub async fn run_finished(&self) -> Result<ResultsDocument, ReportError> {
        let (ack, rx) = oneshot::channel();
        self.request(Command::Finish { ack }, rx).await?
    }

    pub async fn snapshot(&self) -> Result<ResultsDocument, ReportError> {
        let (ack, rx) = oneshot::channel();
        self.request(Command::Snapshot { ack }, rx).await
    }
}

impl std::fmt::Debug for Command {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Command::Item { suite, item, .. } => f.debug_tuple("Item").field(&suite.id).field(item).finish(),
            Command::Suite { event, .. } => f.debug_tuple("Suite").field(&event.suite.id).finish(),
            Command::Finish { .. } => f.write_str("Finish"),
            Command::Snapshot { .. } => f.write_str("Snapshot"),
        }
    }
}

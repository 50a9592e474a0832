//! evalflow-core: evaluation orchestration with incremental results.
//! Resolve a dataset, run a task over every item, score and aggregate each output, and
//! stream results into one document that is persisted after every change.

pub mod accumulator;
pub mod config;
pub mod dataset;
pub mod datasource;
pub mod error;
pub mod provider;
pub mod resolver;
pub mod runner;
pub mod scorer;
pub mod session;
pub mod sink;
pub mod task;
pub mod telemetry;
pub mod testing;

pub mod scorers {
    pub mod contains;
    pub mod exact;
    pub mod json;
    pub mod json_diff;
    pub mod levenshtein;
    pub mod list;
    pub mod numeric;
    pub mod regex;
    pub mod sql;
}

pub use accumulator::{
    AccumulatorConfig, AccumulatorHandle, ResultsAccumulator, ResultsState, SuiteFinished, SuiteRef,
};
pub use config::EvalflowConfig;
pub use dataset::{Dataset, DatasetBuilder, StorageMode};
pub use datasource::{generator_fn, Data, DataGenerator, JsonlGenerator};
pub use error::{ConfigError, DatasetError, EvalError, ItemError, ProviderError, ReportError, SinkError};
pub use provider::{FetchOptions, Provider, ProviderMetadata, ProviderRegistry};
pub use resolver::{DatasetResolver, ResolveOptions};
pub use runner::{Eval, EvalBuilder, ItemOutcome, ItemRunner, SuiteOutcome};
pub use scorer::{create_scorer, create_sync_scorer, ScoreOutput, Scorer, ScorerArgs};
pub use scorers::{
    contains::ContainsScorer,
    exact::ExactMatchScorer,
    json::JsonScorer,
    json_diff::JsonDiffScorer,
    levenshtein::LevenshteinScorer,
    list::ListContainsScorer,
    numeric::NumericDiffScorer,
    regex::RegexScorer,
    sql::{SqlDialect, SqlScorer},
};
pub use session::EvalSession;
pub use sink::{BlobSink, FileSink, ResultsSink, StdoutSink, WatchSink};
pub use task::{from_async_fn, from_fn, Task, TaskArgs};

pub use evalflow_store as store;
pub use evalflow_types::{
    Aggregation, DataItem, EvalResult, ResultsDocument, RunStatus, Score, SuiteResult, SuiteStatus, SuiteSummary,
};

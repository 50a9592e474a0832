//! Error types, one enum per concern so callers can tell an evaluation failure from a
//! configuration mistake or a lost results sink.

use std::path::PathBuf;
use std::time::Duration;

use evalflow_store::StoreError;
use evalflow_types::{Aggregation, EvalResult};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ProviderError {
    #[error("Provider '{provider_type}' not found. Add the `{package}` plugin and register it before running evaluations.")]
    NotFound {
        provider_type: String,
        package: String,
    },

    #[error("Provider '{0}' is already registered.")]
    AlreadyRegistered(String),

    #[error("Provider '{provider_type}' configuration error: {message}")]
    Config {
        provider_type: String,
        message: String,
    },

    #[error("Provider '{provider_type}' request failed: {source}")]
    Request {
        provider_type: String,
        #[source]
        source: anyhow::Error,
    },
}

impl ProviderError {
    pub fn config(provider_type: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Config {
            provider_type: provider_type.into(),
            message: message.into(),
        }
    }
}

#[derive(Debug, Error)]
pub enum DatasetError {
    #[error("unknown dataset storage '{0}', expected 'local' or 'memory'")]
    UnknownStorage(String),

    #[error("dataset '{0}' has neither a data generator nor a provider")]
    MissingSource(String),

    #[error("dataset name '{0}' cannot name a cache file; local datasets need a name without path separators")]
    InvalidCacheName(String),

    #[error(transparent)]
    Provider(#[from] ProviderError),

    #[error("data generator for '{name}' failed: {source}")]
    Generator {
        name: String,
        #[source]
        source: anyhow::Error,
    },

    #[error("dataset cache error: {0}")]
    Store(#[from] StoreError),
}

/// Why a single item did not pass. Only `BelowThreshold` carries a scored result.
#[derive(Debug, Error)]
pub enum ItemError {
    #[error("task failed for '{item}': {source}")]
    Task {
        item: String,
        #[source]
        source: anyhow::Error,
    },

    #[error("scorer '{scorer}' failed for '{item}': {source}")]
    Scorer {
        item: String,
        scorer: String,
        #[source]
        source: anyhow::Error,
    },

    #[error("Score: {score} below threshold: {threshold} ({aggregation})")]
    BelowThreshold {
        score: f64,
        threshold: f64,
        aggregation: Aggregation,
        result: Box<EvalResult>,
    },

    #[error("'{item}' timed out after {timeout:?}")]
    TimedOut { item: String, timeout: Duration },
}

impl ItemError {
    pub fn result(&self) -> Option<&EvalResult> {
        match self {
            ItemError::BelowThreshold { result, .. } => Some(result),
            _ => None,
        }
    }
}

#[derive(Debug, Error)]
pub enum SinkError {
    #[error("Failed to write evaluation results to {target}: {source}")]
    Write {
        target: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to serialize evaluation results: {0}")]
    Serialize(#[from] serde_json::Error),

    #[error("Failed to store evaluation results: {0}")]
    Store(#[from] StoreError),
}

#[derive(Debug, Error)]
pub enum ReportError {
    #[error(transparent)]
    Sink(#[from] SinkError),

    #[error("results run already finished, late {0} event rejected")]
    Finished(&'static str),

    #[error("results accumulator is no longer running")]
    Closed,
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse config {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_yaml::Error,
    },

    #[error("invalid configuration: {0}")]
    Invalid(String),
}

/// Failures that abort a whole suite rather than a single item.
#[derive(Debug, Error)]
pub enum EvalError {
    #[error("eval '{suite}' is incomplete: {field} must be set")]
    Incomplete { suite: String, field: &'static str },

    #[error(transparent)]
    Dataset(#[from] DatasetError),

    #[error(transparent)]
    Report(#[from] ReportError),
}

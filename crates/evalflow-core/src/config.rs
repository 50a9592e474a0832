use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use evalflow_store::validate_key;
use evalflow_types::Aggregation;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::dataset::{Dataset, StorageMode};
use crate::datasource::JsonlGenerator;
use crate::error::ConfigError;
use crate::provider::DEFAULT_NAMESPACE;
use crate::runner::{DEFAULT_CONCURRENCY, DEFAULT_THRESHOLD, DEFAULT_TIMEOUT};
use crate::scorer::Scorer;
use crate::scorers::contains::ContainsScorer;
use crate::scorers::exact::ExactMatchScorer;
use crate::scorers::json::JsonScorer;
use crate::scorers::json_diff::JsonDiffScorer;
use crate::scorers::levenshtein::LevenshteinScorer;
use crate::scorers::list::ListContainsScorer;
use crate::scorers::numeric::NumericDiffScorer;
use crate::scorers::regex::RegexScorer;
use crate::scorers::sql::{SqlDialect, SqlScorer};

pub const CONFIG_FILE: &str = "evalflow.yaml";

/// Project configuration, read from `evalflow.yaml`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EvalflowConfig {
    /// Project root, relative to the config file. Defaults to the config file's directory.
    #[serde(default)]
    pub root: Option<PathBuf>,
    #[serde(default = "default_namespace")]
    pub namespace: String,
    #[serde(default)]
    pub results: ResultsConfig,
    #[serde(default)]
    pub eval: EvalDefaults,
    #[serde(default)]
    pub task: Option<TaskConfig>,
    #[serde(default)]
    pub datasets: Vec<DatasetConfig>,
    #[serde(default)]
    pub scorers: Vec<ScorerConfig>,
}

fn default_namespace() -> String {
    DEFAULT_NAMESPACE.to_string()
}

impl Default for EvalflowConfig {
    fn default() -> Self {
        Self {
            root: None,
            namespace: default_namespace(),
            results: ResultsConfig::default(),
            eval: EvalDefaults::default(),
            task: None,
            datasets: Vec::new(),
            scorers: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ResultsConfig {
    /// Results file; may contain `<timestamp>`.
    #[serde(default)]
    pub output: Option<PathBuf>,
    #[serde(default)]
    pub stdout: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EvalDefaults {
    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,
    #[serde(default = "default_concurrency")]
    pub concurrency: usize,
    #[serde(default = "default_threshold")]
    pub threshold: f64,
    #[serde(default)]
    pub aggregation: Aggregation,
}

fn default_timeout_ms() -> u64 {
    DEFAULT_TIMEOUT.as_millis() as u64
}

fn default_concurrency() -> usize {
    DEFAULT_CONCURRENCY
}

fn default_threshold() -> f64 {
    DEFAULT_THRESHOLD
}

impl Default for EvalDefaults {
    fn default() -> Self {
        Self {
            timeout_ms: default_timeout_ms(),
            concurrency: default_concurrency(),
            threshold: default_threshold(),
            aggregation: Aggregation::default(),
        }
    }
}

impl EvalDefaults {
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type")]
#[serde(rename_all = "snake_case")]
pub enum TaskConfig {
    Http {
        url: String,
        #[serde(default = "default_http_method")]
        method: String,
    },
}

fn default_http_method() -> String {
    "POST".to_string()
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatasetConfig {
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub storage: StorageMode,
    /// JSONL source, relative to the project root.
    #[serde(default)]
    pub path: Option<PathBuf>,
    #[serde(default)]
    pub provider: Option<ProviderConfig>,
}

/// `type` selects the provider; every other key is handed to its factory.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProviderConfig {
    #[serde(rename = "type")]
    pub provider_type: String,
    #[serde(flatten)]
    pub config: Map<String, Value>,
}

impl DatasetConfig {
    pub fn build(&self, root: &Path) -> Dataset {
        let mut builder = Dataset::builder(&self.name).storage(self.storage);
        if let Some(description) = &self.description {
            builder = builder.description(description);
        }
        if let Some(path) = &self.path {
            builder = builder.generator(Arc::new(JsonlGenerator::new(root.join(path))));
        }
        if let Some(provider) = &self.provider {
            builder = builder.provider(&provider.provider_type, Value::Object(provider.config.clone()));
        }
        builder.build()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type")]
#[serde(rename_all = "snake_case")]
pub enum ScorerConfig {
    Exact,
    Levenshtein,
    Contains {
        substring: String,
        #[serde(default = "default_case_sensitive")]
        case_sensitive: bool,
    },
    Regex {
        pattern: String,
    },
    Json,
    JsonStrict,
    JsonSchema {
        path: PathBuf,
    },
    Sql {
        #[serde(default)]
        dialect: String,
    },
    NumericDiff,
    ListContains {
        #[serde(default)]
        allow_extra: bool,
    },
    JsonDiff,
}

fn default_case_sensitive() -> bool {
    true
}

impl ScorerConfig {
    pub fn build(&self, root: &Path) -> Result<Arc<dyn Scorer>, ConfigError> {
        let scorer: Arc<dyn Scorer> = match self {
            ScorerConfig::Exact => Arc::new(ExactMatchScorer),
            ScorerConfig::Levenshtein => Arc::new(LevenshteinScorer),
            ScorerConfig::Contains {
                substring,
                case_sensitive: true,
            } => Arc::new(ContainsScorer::new(substring)),
            ScorerConfig::Contains { substring, .. } => Arc::new(ContainsScorer::case_insensitive(substring)),
            ScorerConfig::Regex { pattern } => {
                Arc::new(RegexScorer::new(pattern).map_err(|e| ConfigError::Invalid(e.to_string()))?)
            }
            ScorerConfig::Json => Arc::new(JsonScorer::new()),
            ScorerConfig::JsonStrict => Arc::new(JsonScorer::strict()),
            ScorerConfig::JsonSchema { path } => {
                let path = root.join(path);
                let raw = std::fs::read_to_string(&path).map_err(|source| ConfigError::Read {
                    path: path.clone(),
                    source,
                })?;
                let schema: Value = serde_json::from_str(&raw)
                    .map_err(|e| ConfigError::Invalid(format!("schema {}: {e}", path.display())))?;
                Arc::new(JsonScorer::with_schema(schema).map_err(|e| ConfigError::Invalid(e.to_string()))?)
            }
            ScorerConfig::Sql { dialect } => {
                let dialect: SqlDialect = dialect.parse().map_err(ConfigError::Invalid)?;
                Arc::new(SqlScorer::new(dialect))
            }
            ScorerConfig::NumericDiff => Arc::new(NumericDiffScorer),
            ScorerConfig::ListContains { allow_extra: false } => Arc::new(ListContainsScorer::new()),
            ScorerConfig::ListContains { allow_extra: true } => Arc::new(ListContainsScorer::allow_extra()),
            ScorerConfig::JsonDiff => Arc::new(JsonDiffScorer),
        };
        Ok(scorer)
    }
}

impl EvalflowConfig {
    pub fn from_yaml_str(raw: &str, path: &Path) -> Result<Self, ConfigError> {
        let config: EvalflowConfig = serde_yaml::from_str(raw).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })?;
        config.validate()?;
        Ok(config)
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_yaml_str(&raw, path)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let mut seen = HashSet::new();
        for ds in &self.datasets {
            if !seen.insert(ds.name.as_str()) {
                return Err(ConfigError::Invalid(format!("dataset '{}' is defined twice", ds.name)));
            }
            if ds.storage == StorageMode::Local && validate_key(&ds.name).is_err() {
                return Err(ConfigError::Invalid(format!(
                    "dataset '{}' is stored locally and its name cannot contain path separators",
                    ds.name
                )));
            }
        }
        if self.eval.concurrency == 0 {
            return Err(ConfigError::Invalid("eval.concurrency must be at least 1".into()));
        }
        if !self.eval.threshold.is_finite() {
            return Err(ConfigError::Invalid("eval.threshold must be a finite number".into()));
        }
        Ok(())
    }

    /// Project root for a config loaded from `config_path`.
    pub fn root_dir(&self, config_path: &Path) -> PathBuf {
        let base = config_path
            .parent()
            .filter(|p| !p.as_os_str().is_empty())
            .map(Path::to_path_buf)
            .unwrap_or_else(|| PathBuf::from("."));
        match &self.root {
            Some(root) => base.join(root),
            None => base,
        }
    }

    pub fn dataset(&self, name: &str) -> Option<&DatasetConfig> {
        self.datasets.iter().find(|d| d.name == name)
    }

    pub fn build_scorers(&self, root: &Path) -> Result<Vec<Arc<dyn Scorer>>, ConfigError> {
        self.scorers.iter().map(|s| s.build(root)).collect()
    }
}

/// Walk up from `start` to the first directory holding `evalflow.yaml`.
pub fn find_config(start: impl AsRef<Path>) -> Option<PathBuf> {
    start
        .as_ref()
        .ancestors()
        .map(|dir| dir.join(CONFIG_FILE))
        .find(|candidate| candidate.is_file())
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = r#"
namespace: acme
results:
  output: out/results-<timestamp>.json
eval:
  timeout_ms: 5000
  aggregation: median
task:
  type: http
  url: http://localhost:8080/answer
datasets:
  - name: colors
    path: data/colors.jsonl
  - name: remote
    storage: memory
    provider:
      type: hub
      repo: acme/colors
      split: test
scorers:
  - type: exact
  - type: contains
    substring: blue
    case_sensitive: false
  - type: sql
    dialect: postgres
"#;

    #[test]
    fn parses_full_config() {
        let config = EvalflowConfig::from_yaml_str(SAMPLE, Path::new("evalflow.yaml")).unwrap();
        assert_eq!(config.namespace, "acme");
        assert_eq!(config.eval.timeout(), Duration::from_secs(5));
        assert_eq!(config.eval.concurrency, DEFAULT_CONCURRENCY);
        assert_eq!(config.eval.threshold, 1.0);
        assert_eq!(config.eval.aggregation, Aggregation::Median);
        assert!(matches!(config.task, Some(TaskConfig::Http { ref method, .. }) if method == "POST"));

        let remote = config.dataset("remote").unwrap();
        assert_eq!(remote.storage, StorageMode::Memory);
        let provider = remote.provider.as_ref().unwrap();
        assert_eq!(provider.provider_type, "hub");
        assert_eq!(provider.config.get("split"), Some(&Value::from("test")));

        let ds = remote.build(Path::new("."));
        assert_eq!(ds.provider_source().unwrap().config["repo"], Value::from("acme/colors"));
        assert!(config.dataset("colors").unwrap().build(Path::new(".")).generator().is_some());

        let scorers = config.build_scorers(Path::new(".")).unwrap();
        let names: Vec<&str> = scorers.iter().map(|s| s.name()).collect();
        assert_eq!(names, vec!["exact_match", "contains", "sql"]);
    }

    #[test]
    fn unknown_storage_fails_at_parse_time() {
        let raw = "datasets:\n  - name: x\n    storage: redis\n";
        let err = EvalflowConfig::from_yaml_str(raw, Path::new("evalflow.yaml")).unwrap_err();
        assert!(matches!(err, ConfigError::Parse { .. }));
        assert!(err.to_string().contains("redis"));
    }

    #[test]
    fn duplicate_datasets_are_rejected() {
        let raw = "datasets:\n  - name: x\n  - name: x\n";
        let err = EvalflowConfig::from_yaml_str(raw, Path::new("evalflow.yaml")).unwrap_err();
        assert!(matches!(err, ConfigError::Invalid(_)));
    }

    #[test]
    fn structural_scorers_from_config() {
        let raw = "scorers:\n  - type: numeric_diff\n  - type: list_contains\n    allow_extra: true\n  - type: json_diff\n";
        let config = EvalflowConfig::from_yaml_str(raw, Path::new("evalflow.yaml")).unwrap();
        assert!(matches!(config.scorers[1], ScorerConfig::ListContains { allow_extra: true }));
        let scorers = config.build_scorers(Path::new(".")).unwrap();
        let names: Vec<&str> = scorers.iter().map(|s| s.name()).collect();
        assert_eq!(names, vec!["numeric_diff", "list_contains", "json_diff"]);
    }

    #[test]
    fn local_dataset_names_must_be_cacheable() {
        let raw = "datasets:\n  - name: team/colors\n";
        let err = EvalflowConfig::from_yaml_str(raw, Path::new("evalflow.yaml")).unwrap_err();
        assert!(matches!(err, ConfigError::Invalid(ref msg) if msg.contains("team/colors")));

        let raw = "datasets:\n  - name: team/colors\n    storage: memory\n";
        assert!(EvalflowConfig::from_yaml_str(raw, Path::new("evalflow.yaml")).is_ok());
    }

    #[test]
    fn bad_sql_dialect_is_invalid() {
        let scorer = ScorerConfig::Sql { dialect: "oracle".into() };
        assert!(matches!(scorer.build(Path::new(".")), Err(ConfigError::Invalid(_))));
    }

    #[test]
    fn finds_config_in_ancestors() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join(CONFIG_FILE), "{}").unwrap();
        let nested = dir.path().join("suites").join("deep");
        std::fs::create_dir_all(&nested).unwrap();

        let found = find_config(&nested).unwrap();
        assert_eq!(found, dir.path().join(CONFIG_FILE));

        let config = EvalflowConfig::load(&found).unwrap();
        assert_eq!(config.namespace, DEFAULT_NAMESPACE);
        assert_eq!(config.root_dir(&found), dir.path());
    }
}

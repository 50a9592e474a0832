use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{ArgAction, Args, Parser, Subcommand};
use evalflow_core::config::{find_config, TaskConfig};
use evalflow_core::store::DatasetCache;
use evalflow_core::{
	from_async_fn, telemetry, AccumulatorConfig, Aggregation, ContainsScorer, Data, DatasetResolver, Eval,
	EvalSession, EvalflowConfig, ExactMatchScorer, FileSink, JsonDiffScorer, JsonScorer, JsonlGenerator,
	LevenshteinScorer, ListContainsScorer, NumericDiffScorer, ProviderRegistry, RegexScorer, ResultsSink, Scorer,
	SqlDialect, SqlScorer, StdoutSink, Task, TaskArgs,
};
use serde_json::json;
use tracing::{info, Level};

#[derive(Debug, Parser)]
#[command(name = "evalflow", about = "Run evaluation suites with live results")]
struct Cli {
	/// Debug-level logging (RUST_LOG still takes precedence)
	#[arg(long, short, global = true, action = ArgAction::SetTrue)]
	verbose: bool,

	/// Emit logs as JSON lines on stderr
	#[arg(long, global = true, action = ArgAction::SetTrue)]
	json_logs: bool,

	/// Path to evalflow.yaml (default: nearest one above the current directory)
	#[arg(long, global = true)]
	config: Option<PathBuf>,

	#[command(subcommand)]
	command: Commands,
}

#[derive(Debug, Subcommand)]
enum Commands {
	/// Run evaluation suites
	Run(RunArgs),
	/// Generate and cache named datasets ahead of a run
	Data(DataArgs),
}

#[derive(Debug, Clone, Args)]
struct RunArgs {
	/// JSONL file with lines { "name"?: string, "input": any, "expected"?: any, ... }; one suite per file
	#[arg(long)]
	data: Vec<PathBuf>,

	/// Named dataset from the config file; one suite per dataset
	#[arg(long)]
	dataset: Vec<String>,

	/// Items in flight per suite
	#[arg(long)]
	concurrency: Option<usize>,

	/// Per-item timeout in milliseconds
	#[arg(long)]
	timeout_ms: Option<u64>,

	/// Minimum aggregated score for an item to pass
	#[arg(long)]
	threshold: Option<f64>,

	/// How item scores are combined: mean, median or sum
	#[arg(long)]
	aggregation: Option<Aggregation>,

	/// Use exact-match scorer
	#[arg(long, action = ArgAction::SetTrue)]
	exact: bool,

	/// Use Levenshtein similarity scorer
	#[arg(long, action = ArgAction::SetTrue)]
	levenshtein: bool,

	/// Check if output contains substring (case-sensitive)
	#[arg(long)]
	contains: Option<String>,

	/// Check if output contains substring (case-insensitive)
	#[arg(long)]
	contains_i: Option<String>,

	/// Validate output matches regex pattern
	#[arg(long)]
	regex: Option<String>,

	/// Validate output is valid JSON
	#[arg(long, action = ArgAction::SetTrue)]
	json: bool,

	/// Validate output JSON against a schema file
	#[arg(long)]
	json_schema: Option<PathBuf>,

	/// Validate output is valid SQL
	#[arg(long, action = ArgAction::SetTrue)]
	sql: bool,

	/// Relative numeric closeness of output to expected
	#[arg(long, action = ArgAction::SetTrue)]
	numeric_diff: bool,

	/// Best-match similarity between output and expected lists
	#[arg(long, action = ArgAction::SetTrue)]
	list_contains: bool,

	/// With --list-contains: extra output entries do not lower the score
	#[arg(long, action = ArgAction::SetTrue, requires = "list_contains")]
	allow_extra: bool,

	/// Structural similarity of output JSON to expected JSON
	#[arg(long, action = ArgAction::SetTrue)]
	json_diff: bool,

	/// SQL dialect: generic, postgres, mysql, sqlite
	#[arg(long, default_value = "generic")]
	sql_dialect: SqlDialect,

	/// Results file; `<timestamp>` is replaced once per run
	#[arg(long)]
	output: Option<PathBuf>,

	/// Also stream every results update to stdout as a JSON line
	#[arg(long, action = ArgAction::SetTrue)]
	stdout: bool,

	/// HTTP task endpoint (POST by default). Sends { "input": <value>, ... } and expects a JSON response.
	#[arg(long)]
	http_url: Option<String>,

	/// HTTP method for --http-url (GET or POST)
	#[arg(long, default_value = "POST")]
	http_method: String,
}

#[derive(Debug, Clone, Args)]
struct DataArgs {
	/// Datasets to materialize (default: every dataset in the config)
	names: Vec<String>,

	/// Replace existing cached snapshots
	#[arg(long, action = ArgAction::SetTrue)]
	overwrite: bool,
}

/// Loaded configuration and the project root it applies to.
struct Project {
	config: EvalflowConfig,
	root: PathBuf,
}

impl Project {
	fn load(explicit: Option<&Path>) -> Result<Self> {
		let cwd = std::env::current_dir().context("Failed to read current directory")?;
		let path = match explicit {
			Some(p) => Some(p.to_path_buf()),
			None => find_config(&cwd),
		};
		match path {
			Some(path) => {
				let config = EvalflowConfig::load(&path)?;
				let root = config.root_dir(&path);
				info!(config = %path.display(), root = %root.display(), "loaded config");
				Ok(Self { config, root })
			}
			None => Ok(Self {
				config: EvalflowConfig::default(),
				root: cwd,
			}),
		}
	}

	fn resolver(&self) -> DatasetResolver {
		DatasetResolver::new(
			Arc::new(ProviderRegistry::with_namespace(&self.config.namespace)),
			DatasetCache::in_project(&self.root),
		)
	}
}

#[tokio::main]
async fn main() -> Result<()> {
	let cli = Cli::parse();
	let level = if cli.verbose { Level::DEBUG } else { Level::INFO };
	telemetry::init_tracing(cli.json_logs, level);

	let project = Project::load(cli.config.as_deref())?;
	match cli.command {
		Commands::Run(args) => run(args, project).await?,
		Commands::Data(args) => data(args, project).await?,
	}
	Ok(())
}

fn http_task(url: String, method: String) -> Arc<dyn Task> {
	let method = method.to_uppercase();
	let client = reqwest::Client::new();
	from_async_fn(move |args: TaskArgs| {
		let client = client.clone();
		let url = url.clone();
		let method = method.clone();
		async move {
			let resp = match method.as_str() {
				"GET" => {
					// Encode input as query ?input=<json>
					let q = [("input", args.input.to_string())];
					client.get(&url).query(&q).send().await?
				}
				_ => {
					let mut body = args.extra.clone();
					body.insert("input".into(), args.input.clone());
					if let Some(expected) = &args.expected {
						body.insert("expected".into(), expected.clone());
					}
					client.post(&url).json(&body).send().await?
				}
			};
			let status = resp.status();
			let v = resp.json::<serde_json::Value>().await?;
			if !status.is_success() {
				anyhow::bail!("HTTP {}: {}", status.as_u16(), v);
			}
			Ok(v)
		}
	})
}

fn echo_task() -> Arc<dyn Task> {
	// Default "echo" task: append " World!" to string inputs
	from_async_fn(|args: TaskArgs| async move {
		let s = args.input.as_str().unwrap_or_default();
		Ok(json!(format!("{s} World!")))
	})
}

async fn scorers_from_flags(args: &RunArgs) -> Result<Vec<Arc<dyn Scorer>>> {
	let mut scorers: Vec<Arc<dyn Scorer>> = Vec::new();

	if args.exact {
		scorers.push(Arc::new(ExactMatchScorer));
	}
	if args.levenshtein {
		scorers.push(Arc::new(LevenshteinScorer));
	}
	if let Some(substring) = &args.contains {
		scorers.push(Arc::new(ContainsScorer::new(substring)));
	}
	if let Some(substring) = &args.contains_i {
		scorers.push(Arc::new(ContainsScorer::case_insensitive(substring)));
	}
	if let Some(pattern) = &args.regex {
		scorers.push(Arc::new(RegexScorer::new(pattern)?));
	}
	if args.json {
		scorers.push(Arc::new(JsonScorer::new()));
	}
	if let Some(schema_path) = &args.json_schema {
		let schema_content = tokio::fs::read_to_string(schema_path)
			.await
			.with_context(|| format!("Failed to read schema {:?}", schema_path))?;
		let schema: serde_json::Value = serde_json::from_str(&schema_content)?;
		scorers.push(Arc::new(JsonScorer::with_schema(schema)?));
	}
	if args.sql {
		scorers.push(Arc::new(SqlScorer::new(args.sql_dialect)));
	}
	if args.numeric_diff {
		scorers.push(Arc::new(NumericDiffScorer));
	}
	if args.list_contains {
		let scorer = if args.allow_extra {
			ListContainsScorer::allow_extra()
		} else {
			ListContainsScorer::new()
		};
		scorers.push(Arc::new(scorer));
	}
	if args.json_diff {
		scorers.push(Arc::new(JsonDiffScorer));
	}
	Ok(scorers)
}

/// A suite to run: `id` keys it in the results document, `name` is displayed.
struct PlannedSuite {
	id: String,
	name: String,
	data: Data,
}

/// JSONL files are keyed by their path, config datasets by `dataset:<name>`.
fn plan_suites(args: &RunArgs, config: &EvalflowConfig, root: &Path) -> Result<Vec<PlannedSuite>> {
	let mut suites = Vec::new();
	for path in &args.data {
		let name = path
			.file_stem()
			.map(|s| s.to_string_lossy().into_owned())
			.unwrap_or_else(|| path.display().to_string());
		let generator: Arc<dyn evalflow_core::DataGenerator> = Arc::new(JsonlGenerator::new(path));
		suites.push(PlannedSuite {
			id: path.display().to_string(),
			name,
			data: Data::Generator(generator),
		});
	}
	let dataset_names: Vec<String> = if args.dataset.is_empty() && args.data.is_empty() {
		config.datasets.iter().map(|d| d.name.clone()).collect()
	} else {
		args.dataset.clone()
	};
	for name in dataset_names {
		let ds = config
			.dataset(&name)
			.with_context(|| format!("Dataset '{name}' is not defined in the config"))?;
		suites.push(PlannedSuite {
			id: format!("dataset:{name}"),
			data: Data::from(ds.build(root)),
			name,
		});
	}
	if suites.is_empty() {
		anyhow::bail!("Nothing to run: pass --data <file.jsonl> or --dataset <name>, or define datasets in evalflow.yaml");
	}
	Ok(suites)
}

async fn run(args: RunArgs, project: Project) -> Result<()> {
	let Project { config, root } = &project;

	let task = match (&args.http_url, &config.task) {
		(Some(url), _) => http_task(url.clone(), args.http_method.clone()),
		(None, Some(TaskConfig::Http { url, method })) => http_task(url.clone(), method.clone()),
		(None, None) => echo_task(),
	};

	// flags, then config, then exact match
	let mut scorers = scorers_from_flags(&args).await?;
	if scorers.is_empty() {
		scorers = config.build_scorers(root)?;
	}
	if scorers.is_empty() {
		scorers.push(Arc::new(ExactMatchScorer));
	}

	let suites = plan_suites(&args, config, root)?;

	let defaults = &config.eval;
	let timeout = args.timeout_ms.map(Duration::from_millis).unwrap_or_else(|| defaults.timeout());
	let evals = suites
		.into_iter()
		.map(|planned| {
			Eval::builder(planned.name)
				.id(planned.id)
				.data(planned.data)
				.task(task.clone())
				.scorers(scorers.clone())
				.aggregation(args.aggregation.unwrap_or(defaults.aggregation))
				.threshold(args.threshold.unwrap_or(defaults.threshold))
				.timeout(timeout)
				.concurrency(args.concurrency.unwrap_or(defaults.concurrency))
				.build()
		})
		.collect::<Result<Vec<_>, _>>()?;

	let output = args
		.output
		.clone()
		.or_else(|| config.results.output.as_ref().map(|p| root.join(p)));
	let file_sink = match output {
		Some(path) => FileSink::new(path),
		None => FileSink::default_location(root),
	};
	let results_path = file_sink.path().to_path_buf();
	let stream_stdout = args.stdout || config.results.stdout;
	let mut sinks: Vec<Arc<dyn ResultsSink>> = vec![Arc::new(file_sink)];
	if stream_stdout {
		sinks.push(Arc::new(StdoutSink));
	}

	let session = EvalSession::start(project.resolver(), sinks, AccumulatorConfig::default()).await?;
	// finalize the document even when a suite could not run
	let ran = session.run_suites(&evals).await;
	let doc = session.finish().await?;
	ran?;

	let table = doc.summary_table();
	if stream_stdout {
		eprintln!("{table}");
	} else {
		println!("{table}");
	}
	info!(path = %results_path.display(), "results written");

	if !doc.success {
		anyhow::bail!(
			"{} of {} suites failed",
			doc.num_failed_eval_suites,
			doc.num_total_eval_suites
		);
	}
	Ok(())
}

async fn data(args: DataArgs, project: Project) -> Result<()> {
	let names: Vec<String> = if args.names.is_empty() {
		project.config.datasets.iter().map(|d| d.name.clone()).collect()
	} else {
		args.names.clone()
	};
	if names.is_empty() {
		anyhow::bail!("No datasets defined in evalflow.yaml");
	}

	let resolver = project.resolver();
	for name in names {
		let ds = project
			.config
			.dataset(&name)
			.with_context(|| format!("Dataset '{name}' is not defined in the config"))?
			.build(&project.root);
		let written = resolver
			.materialize(&ds, args.overwrite)
			.await
			.with_context(|| format!("Failed to materialize dataset '{name}'"))?;
		let state = if written { "written" } else { "unchanged" };
		println!("{name}: {state}");
	}
	Ok(())
}

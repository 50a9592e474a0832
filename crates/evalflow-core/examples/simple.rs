use std::sync::Arc;

use evalflow_core::store::DatasetCache;
use evalflow_core::{
    from_fn, generator_fn, telemetry, AccumulatorConfig, DataItem, Dataset, DatasetResolver, Eval,
    EvalSession, ExactMatchScorer, JsonlGenerator, LevenshteinScorer, ProviderRegistry, ResultsSink,
    Scorer, StdoutSink, StorageMode,
};
use serde_json::json;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    telemetry::init_tracing(false, tracing::Level::INFO);

    let root = std::env::current_dir()?;
    let resolver = DatasetResolver::new(Arc::new(ProviderRegistry::new()), DatasetCache::in_project(&root));
    let sinks: Vec<Arc<dyn ResultsSink>> = vec![Arc::new(StdoutSink)];
    let session = EvalSession::start(resolver, sinks, AccumulatorConfig::default()).await?;

    // Task: append " World!" to any string input
    let task = from_fn(|args| {
        let s = args.input.as_str().unwrap_or_default();
        Ok(json!(format!("{s} World!")))
    });
    let scorers: Vec<Arc<dyn Scorer>> = vec![Arc::new(ExactMatchScorer), Arc::new(LevenshteinScorer)];

    // Inline items
    let inline = Eval::builder("greetings")
        .data(vec![
            DataItem::new(json!("Hello"), json!("Hello World!")),
            DataItem::new(json!("Hi"), json!("Hi World!")),
        ])
        .task(task.clone())
        .scorers(scorers.clone())
        .threshold(0.9)
        .build()?;

    // Generated on every run, never cached
    let generated = Eval::builder("generated greetings")
        .data(
            Dataset::builder("generated")
                .storage(StorageMode::Memory)
                .generator(generator_fn(|| async {
                    Ok(vec![DataItem::new(json!("Hey"), json!("Hey World!"))])
                }))
                .build(),
        )
        .task(task.clone())
        .scorers(scorers.clone())
        .build()?;

    let mut evals = vec![inline, generated];

    // JSONL file if provided, cached under .evalflow/datasets after the first run
    if let Some(path) = std::env::args().nth(1) {
        let dataset = Dataset::builder("jsonl")
            .generator(Arc::new(JsonlGenerator::new(path)))
            .build();
        evals.push(Eval::builder("jsonl").data(dataset).task(task).scorers(scorers).build()?);
    }

    session.run_suites(&evals).await?;
    let doc = session.finish().await?;
    eprintln!("{}", doc.summary_table());
    Ok(())
}

use std::fmt;
use std::future::Future;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use evalflow_types::DataItem;
use serde_json::Value;

use crate::dataset::Dataset;

/// Produces data items on demand. Invoked every time an uncached source is resolved.
#[async_trait]
pub trait DataGenerator: Send + Sync {
    async fn generate(&self) -> Result<Vec<DataItem>>;
}

/// Wrap an async closure as a `DataGenerator`.
pub fn generator_fn<F, Fut>(f: F) -> Arc<dyn DataGenerator>
where
    F: Send + Sync + 'static + Fn() -> Fut,
    Fut: Future<Output = Result<Vec<DataItem>>> + Send + 'static,
{
    struct ClosureGenerator<F> {
        f: F,
    }

    #[async_trait]
    impl<F, Fut> DataGenerator for ClosureGenerator<F>
    where
        F: Send + Sync + 'static + Fn() -> Fut,
        Fut: Future<Output = Result<Vec<DataItem>>> + Send + 'static,
    {
        async fn generate(&self) -> Result<Vec<DataItem>> {
            (self.f)().await
        }
    }

    Arc::new(ClosureGenerator { f })
}

/// Where a suite's items come from, decided when the suite is defined.
#[derive(Clone)]
pub enum Data {
    Items(Vec<DataItem>),
    Generator(Arc<dyn DataGenerator>),
    Dataset(Arc<Dataset>),
}

impl From<Vec<DataItem>> for Data {
    fn from(items: Vec<DataItem>) -> Self {
        Data::Items(items)
    }
}

impl From<Arc<dyn DataGenerator>> for Data {
    fn from(generator: Arc<dyn DataGenerator>) -> Self {
        Data::Generator(generator)
    }
}

impl From<Dataset> for Data {
    fn from(dataset: Dataset) -> Self {
        Data::Dataset(Arc::new(dataset))
    }
}

impl From<Arc<Dataset>> for Data {
    fn from(dataset: Arc<Dataset>) -> Self {
        Data::Dataset(dataset)
    }
}

impl fmt::Debug for Data {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Data::Items(items) => f.debug_tuple("Items").field(&items.len()).finish(),
            Data::Generator(_) => f.write_str("Generator"),
            Data::Dataset(ds) => f.debug_tuple("Dataset").field(&ds.name()).finish(),
        }
    }
}

/// Read JSONL where each line is an object with a required `input`, and optional
/// `expected` and `name`. Any other keys become extra fields of the item.
#[derive(Debug, Clone)]
pub struct JsonlGenerator {
    path: PathBuf,
}

impl JsonlGenerator {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &PathBuf {
        &self.path
    }
}

pub fn parse_jsonl(content: &str) -> Result<Vec<DataItem>> {
    let mut items = Vec::new();
    for (idx, line) in content.lines().enumerate() {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        let value: Value = serde_json::from_str(line)
            .with_context(|| format!("Invalid JSON on line {}", idx + 1))?;
        let obj = value
            .as_object()
            .ok_or_else(|| anyhow!("Line {}: expected object", idx + 1))?;
        if !obj.contains_key("input") {
            return Err(anyhow!("Line {}: missing 'input'", idx + 1));
        }
        let item: DataItem = serde_json::from_value(value)
            .with_context(|| format!("Line {}: invalid data item", idx + 1))?;
        items.push(item);
    }
    Ok(items)
}

#[async_trait]
impl DataGenerator for JsonlGenerator {
    async fn generate(&self) -> Result<Vec<DataItem>> {
        let content = tokio_fs_read_to_string(&self.path).await?;
        parse_jsonl(&content).with_context(|| format!("Failed to parse {:?}", self.path))
    }
}

#[cfg(not(feature = "sync-fs"))]
async fn tokio_fs_read_to_string(path: &PathBuf) -> Result<String> {
    use tokio::fs;
    fs::read_to_string(path)
        .await
        .with_context(|| format!("Failed to read {:?}", path))
}

#[cfg(feature = "sync-fs")]
async fn tokio_fs_read_to_string(path: &PathBuf) -> Result<String> {
    use std::fs;
    use tokio::task;
    let path_clone = path.clone();
    let content = task::spawn_blocking(move || {
        fs::read_to_string(&path_clone).with_context(|| format!("Failed to read {:?}", path_clone))
    })
    .await
    .map_err(|e| anyhow!(e))??;
    Ok(content)
}

use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::{Arc, OnceLock};

use async_trait::async_trait;
use evalflow_store::{BlobStore, RESULTS_DIR, STATE_DIR};
use evalflow_types::ResultsDocument;
use tempfile::NamedTempFile;
use tokio::io::AsyncWriteExt;
use tokio::sync::watch;

use crate::error::SinkError;

pub const TIMESTAMP_PLACEHOLDER: &str = "<timestamp>";

/// Destination for the results document. Receives the whole document after every change.
#[async_trait]
pub trait ResultsSink: Send + Sync {
    fn describe(&self) -> String;

    async fn write(&self, doc: &ResultsDocument) -> Result<(), SinkError>;
}

/// JSON file on disk. A `<timestamp>` in the path is fixed at the first write, so one run
/// keeps rewriting one file.
#[derive(Debug)]
pub struct FileSink {
    template: PathBuf,
    resolved: OnceLock<PathBuf>,
}

impl FileSink {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            template: path.into(),
            resolved: OnceLock::new(),
        }
    }

    /// `<root>/.evalflow/results/results-<timestamp>.json`
    pub fn default_location(root: impl AsRef<Path>) -> Self {
        Self::new(
            root.as_ref()
                .join(STATE_DIR)
                .join(RESULTS_DIR)
                .join(format!("results-{TIMESTAMP_PLACEHOLDER}.json")),
        )
    }

    pub fn path(&self) -> &Path {
        self.resolved.get_or_init(|| {
            let template = self.template.to_string_lossy();
            if !template.contains(TIMESTAMP_PLACEHOLDER) {
                return self.template.clone();
            }
            let stamp = chrono::Utc::now().format("%Y-%m-%dT%H-%M-%S-%3fZ").to_string();
            PathBuf::from(template.replace(TIMESTAMP_PLACEHOLDER, &stamp))
        })
    }
}

#[async_trait]
impl ResultsSink for FileSink {
    fn describe(&self) -> String {
        self.path().display().to_string()
    }

    async fn write(&self, doc: &ResultsDocument) -> Result<(), SinkError> {
        let bytes = serde_json::to_vec_pretty(doc)?;
        let path = self.path().to_path_buf();
        let target = path.display().to_string();

        let written = tokio::task::spawn_blocking(move || -> std::io::Result<()> {
            let dir = match path.parent() {
                Some(p) if !p.as_os_str().is_empty() => p.to_path_buf(),
                _ => PathBuf::from("."),
            };
            std::fs::create_dir_all(&dir)?;
            let mut tmp = NamedTempFile::new_in(&dir)?;
            tmp.write_all(&bytes)?;
            tmp.flush()?;
            tmp.persist(&path).map_err(|e| e.error)?;
            Ok(())
        })
        .await
        .map_err(std::io::Error::other)
        .and_then(|r| r);

        written.map_err(|source| SinkError::Write { target, source })
    }
}

/// One compact JSON line per update on stdout.
#[derive(Debug, Default)]
pub struct StdoutSink;

#[async_trait]
impl ResultsSink for StdoutSink {
    fn describe(&self) -> String {
        "stdout".to_string()
    }

    async fn write(&self, doc: &ResultsDocument) -> Result<(), SinkError> {
        let mut line = serde_json::to_vec(doc)?;
        line.push(b'\n');
        let mut stdout = tokio::io::stdout();
        let written = async {
            stdout.write_all(&line).await?;
            stdout.flush().await
        }
        .await;
        written.map_err(|source| SinkError::Write {
            target: self.describe(),
            source,
        })
    }
}

/// Document stored as a named blob, replaced on every write.
pub struct BlobSink {
    store: Arc<dyn BlobStore>,
    key: String,
}

impl BlobSink {
    pub fn new(store: Arc<dyn BlobStore>, key: impl Into<String>) -> Self {
        Self { store, key: key.into() }
    }
}

#[async_trait]
impl ResultsSink for BlobSink {
    fn describe(&self) -> String {
        format!("blob:{}", self.key)
    }

    async fn write(&self, doc: &ResultsDocument) -> Result<(), SinkError> {
        let bytes = serde_json::to_vec(doc)?;
        self.store.put(&self.key, &bytes, true).await?;
        Ok(())
    }
}

/// Live view for in-process consumers such as a dashboard.
#[derive(Debug)]
pub struct WatchSink {
    tx: watch::Sender<Option<ResultsDocument>>,
}

impl WatchSink {
    pub fn channel() -> (Self, watch::Receiver<Option<ResultsDocument>>) {
        let (tx, rx) = watch::channel(None);
        (Self { tx }, rx)
    }

    pub fn subscribe(&self) -> watch::Receiver<Option<ResultsDocument>> {
        self.tx.subscribe()
    }
}

#[async_trait]
impl ResultsSink for WatchSink {
    fn describe(&self) -> String {
        "watch".to_string()
    }

    async fn write(&self, doc: &ResultsDocument) -> Result<(), SinkError> {
        self.tx.send_replace(Some(doc.clone()));
        Ok(())
    }
}

use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::OnceCell;

use crate::datasource::DataGenerator;
use crate::error::{DatasetError, ProviderError};
use crate::provider::{Provider, ProviderRegistry};

/// Whether a dataset is cached to durable storage under its name.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase", try_from = "String")]
pub enum StorageMode {
    #[default]
    Local,
    Memory,
}

impl StorageMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            StorageMode::Local => "local",
            StorageMode::Memory => "memory",
        }
    }
}

impl fmt::Display for StorageMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for StorageMode {
    type Err = DatasetError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "local" => Ok(StorageMode::Local),
            "memory" => Ok(StorageMode::Memory),
            other => Err(DatasetError::UnknownStorage(other.to_string())),
        }
    }
}

impl TryFrom<String> for StorageMode {
    type Error = DatasetError;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        s.parse()
    }
}

/// Provider type and the configuration handed to its factory.
#[derive(Debug, Clone, PartialEq)]
pub struct ProviderSource {
    pub provider_type: String,
    pub config: Value,
}

/// A named dataset. Items come from its generator or, failing that, from its provider.
pub struct Dataset {
    name: String,
    description: Option<String>,
    storage: StorageMode,
    generator: Option<Arc<dyn DataGenerator>>,
    provider: Option<ProviderSource>,
    instance: OnceCell<Arc<dyn Provider>>,
}

impl Dataset {
    pub fn builder(name: impl Into<String>) -> DatasetBuilder {
        DatasetBuilder::new(name)
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn description(&self) -> Option<&str> {
        self.description.as_deref()
    }

    pub fn storage(&self) -> StorageMode {
        self.storage
    }

    pub fn generator(&self) -> Option<&Arc<dyn DataGenerator>> {
        self.generator.as_ref()
    }

    pub fn provider_source(&self) -> Option<&ProviderSource> {
        self.provider.as_ref()
    }

    /// The dataset's provider, created through `registry` on first use and reused after.
    pub async fn provider(&self, registry: &ProviderRegistry) -> Result<Option<Arc<dyn Provider>>, ProviderError> {
        let Some(source) = &self.provider else {
            return Ok(None);
        };
        let provider = self
            .instance
            .get_or_try_init(|| registry.create(&source.provider_type, source.config.clone()))
            .await?;
        Ok(Some(provider.clone()))
    }
}

impl fmt::Debug for Dataset {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Dataset")
            .field("name", &self.name)
            .field("description", &self.description)
            .field("storage", &self.storage)
            .field("generator", &self.generator.is_some())
            .field("provider", &self.provider)
            .finish()
    }
}

pub struct DatasetBuilder {
    name: String,
    description: Option<String>,
    storage: StorageMode,
    generator: Option<Arc<dyn DataGenerator>>,
    provider: Option<ProviderSource>,
}

impl DatasetBuilder {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            description: None,
            storage: StorageMode::default(),
            generator: None,
            provider: None,
        }
    }

    pub fn description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    pub fn storage(mut self, storage: StorageMode) -> Self {
        self.storage = storage;
        self
    }

    pub fn generator(mut self, generator: Arc<dyn DataGenerator>) -> Self {
        self.generator = Some(generator);
        self
    }

    pub fn provider(mut self, provider_type: impl Into<String>, config: Value) -> Self {
        self.provider = Some(ProviderSource {
            provider_type: provider_type.into(),
            config,
        });
        self
    }

    pub fn build(self) -> Dataset {
        Dataset {
            name: self.name,
            description: self.description,
            storage: self.storage,
            generator: self.generator,
            provider: self.provider,
            instance: OnceCell::new(),
        }
    }
}

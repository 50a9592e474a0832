//! Remote dataset providers and the registry that creates them.
//!
//! Provider implementations live outside this crate. A host either registers a provider
//! type up front, or registers a plugin loader under the provider's package name so the
//! type is activated the first time a dataset asks for it.

use std::collections::{HashMap, HashSet};
use std::future::Future;
use std::sync::{Arc, PoisonError, RwLock};

use async_trait::async_trait;
use evalflow_types::DataItem;
use futures::future::BoxFuture;
use futures::FutureExt;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, info};

use crate::error::ProviderError;

pub const DEFAULT_NAMESPACE: &str = "evalflow";

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FetchOptions {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub limit: Option<usize>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub offset: Option<usize>,
}

impl FetchOptions {
    /// Apply `offset` then `limit` to an already fetched list, for providers that cannot
    /// page on the server side.
    pub fn apply(&self, items: Vec<DataItem>) -> Vec<DataItem> {
        let offset = self.offset.unwrap_or(0);
        let limit = self.limit.unwrap_or(usize::MAX);
        items.into_iter().skip(offset).take(limit).collect()
    }
}

#[async_trait]
pub trait Provider: Send + Sync {
    fn provider_type(&self) -> &str;

    async fn fetch(&self, options: &FetchOptions) -> Result<Vec<DataItem>, ProviderError>;

    async fn exists(&self) -> Result<bool, ProviderError>;
}

pub type ProviderFactory =
    Arc<dyn Fn(Value) -> BoxFuture<'static, Result<Arc<dyn Provider>, ProviderError>> + Send + Sync>;

/// Registers provider types on the registry it is handed. Errors with
/// [`ProviderError::AlreadyRegistered`] are tolerated during activation.
pub type PluginLoader = Arc<dyn Fn(&ProviderRegistry) -> Result<(), ProviderError> + Send + Sync>;

#[derive(Clone)]
pub struct ProviderMetadata {
    pub provider_type: String,
    /// Defaults to `<namespace>/<provider_type>` of the registry it is registered on.
    pub package_name: Option<String>,
    pub description: Option<String>,
    factory: ProviderFactory,
}

impl ProviderMetadata {
    pub fn new<F, Fut>(provider_type: impl Into<String>, factory: F) -> Self
    where
        F: Fn(Value) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Arc<dyn Provider>, ProviderError>> + Send + 'static,
    {
        Self {
            provider_type: provider_type.into(),
            package_name: None,
            description: None,
            factory: Arc::new(move |config| factory(config).boxed()),
        }
    }

    pub fn with_package(mut self, package: impl Into<String>) -> Self {
        self.package_name = Some(package.into());
        self
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }
}

impl std::fmt::Debug for ProviderMetadata {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProviderMetadata")
            .field("provider_type", &self.provider_type)
            .field("package_name", &self.package_name)
            .field("description", &self.description)
            .finish_non_exhaustive()
    }
}

pub struct ProviderRegistry {
    namespace: String,
    providers: RwLock<HashMap<String, ProviderMetadata>>,
    loaders: RwLock<HashMap<String, PluginLoader>>,
    // packages whose loader has already run
    activated: tokio::sync::Mutex<HashSet<String>>,
}

impl Default for ProviderRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl ProviderRegistry {
    pub fn new() -> Self {
        Self::with_namespace(DEFAULT_NAMESPACE)
    }

    pub fn with_namespace(namespace: impl Into<String>) -> Self {
        Self {
            namespace: namespace.into(),
            providers: RwLock::new(HashMap::new()),
            loaders: RwLock::new(HashMap::new()),
            activated: tokio::sync::Mutex::new(HashSet::new()),
        }
    }

    pub fn namespace(&self) -> &str {
        &self.namespace
    }

    /// Package expected to provide `provider_type`.
    pub fn package_for(&self, provider_type: &str) -> String {
        format!("{}/{}", self.namespace, provider_type)
    }

    pub fn register(&self, metadata: ProviderMetadata) -> Result<(), ProviderError> {
        let mut providers = self.providers.write().unwrap_or_else(PoisonError::into_inner);
        if providers.contains_key(&metadata.provider_type) {
            return Err(ProviderError::AlreadyRegistered(metadata.provider_type));
        }
        debug!(provider_type = %metadata.provider_type, "registered dataset provider");
        providers.insert(metadata.provider_type.clone(), metadata);
        Ok(())
    }

    /// Register the loader that activates `package`. A later loader for the same package
    /// replaces the earlier one.
    pub fn register_loader<F>(&self, package: impl Into<String>, loader: F)
    where
        F: Fn(&ProviderRegistry) -> Result<(), ProviderError> + Send + Sync + 'static,
    {
        let mut loaders = self.loaders.write().unwrap_or_else(PoisonError::into_inner);
        loaders.insert(package.into(), Arc::new(loader));
    }

    pub fn has(&self, provider_type: &str) -> bool {
        let providers = self.providers.read().unwrap_or_else(PoisonError::into_inner);
        providers.contains_key(provider_type)
    }

    pub fn get(&self, provider_type: &str) -> Option<ProviderMetadata> {
        let providers = self.providers.read().unwrap_or_else(PoisonError::into_inner);
        providers.get(provider_type).cloned()
    }

    /// Registered provider types, sorted.
    pub fn list(&self) -> Vec<String> {
        let providers = self.providers.read().unwrap_or_else(PoisonError::into_inner);
        let mut types: Vec<String> = providers.keys().cloned().collect();
        types.sort();
        types
    }

    fn loader(&self, package: &str) -> Option<PluginLoader> {
        let loaders = self.loaders.read().unwrap_or_else(PoisonError::into_inner);
        loaders.get(package).cloned()
    }

    /// Create a provider instance, activating the type's plugin loader when the type is
    /// not registered yet.
    pub async fn create(&self, provider_type: &str, config: Value) -> Result<Arc<dyn Provider>, ProviderError> {
        if let Some(metadata) = self.get(provider_type) {
            return (metadata.factory)(config).await;
        }

        let package = self.package_for(provider_type);
        {
            let mut activated = self.activated.lock().await;
            if !self.has(provider_type) && !activated.contains(&package) {
                if let Some(loader) = self.loader(&package) {
                    info!(%package, provider_type, "activating dataset provider plugin");
                    match loader(self) {
                        Ok(()) | Err(ProviderError::AlreadyRegistered(_)) => {
                            activated.insert(package.clone());
                        }
                        Err(e) => return Err(e),
                    }
                }
            }
        }

        match self.get(provider_type) {
            Some(metadata) => (metadata.factory)(config).await,
            None => Err(ProviderError::NotFound {
                provider_type: provider_type.to_string(),
                package,
            }),
        }
    }
}

impl std::fmt::Debug for ProviderRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProviderRegistry")
            .field("namespace", &self.namespace)
            .field("providers", &self.list())
            .finish_non_exhaustive()
    }
}

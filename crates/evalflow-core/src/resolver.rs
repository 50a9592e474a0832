use std::sync::Arc;

use evalflow_store::{validate_key, DatasetCache};
use evalflow_types::DataItem;
use tracing::{debug, info, warn};

use crate::dataset::{Dataset, StorageMode};
use crate::datasource::Data;
use crate::error::DatasetError;
use crate::provider::{FetchOptions, ProviderRegistry};

#[derive(Debug, Clone, Copy, Default)]
pub struct ResolveOptions {
    /// Regenerate and replace a cached `local` dataset.
    pub overwrite: bool,
    pub fetch: FetchOptions,
}

/// Turns any [`Data`] into its concrete, ordered items.
#[derive(Debug, Clone)]
pub struct DatasetResolver {
    registry: Arc<ProviderRegistry>,
    cache: DatasetCache,
}

impl DatasetResolver {
    pub fn new(registry: Arc<ProviderRegistry>, cache: DatasetCache) -> Self {
        Self { registry, cache }
    }

    pub fn registry(&self) -> &Arc<ProviderRegistry> {
        &self.registry
    }

    pub fn cache(&self) -> &DatasetCache {
        &self.cache
    }

    pub async fn resolve(&self, data: &Data) -> Result<Vec<DataItem>, DatasetError> {
        self.resolve_with(data, ResolveOptions::default()).await
    }

    pub async fn resolve_with(&self, data: &Data, options: ResolveOptions) -> Result<Vec<DataItem>, DatasetError> {
        match data {
            Data::Items(items) => Ok(items.clone()),
            Data::Generator(generator) => generator.generate().await.map_err(|source| DatasetError::Generator {
                name: "inline".to_string(),
                source,
            }),
            Data::Dataset(dataset) => self.resolve_dataset(dataset, options).await,
        }
    }

    async fn resolve_dataset(&self, dataset: &Dataset, options: ResolveOptions) -> Result<Vec<DataItem>, DatasetError> {
        let local = dataset.storage() == StorageMode::Local;
        if local {
            check_cache_name(dataset)?;
        }
        let mut repair = false;

        if local && !options.overwrite {
            match self.cache.load(dataset.name()).await {
                Ok(Some(items)) => {
                    debug!(dataset = dataset.name(), items = items.len(), "dataset loaded from cache");
                    return Ok(items);
                }
                Ok(None) => {}
                Err(e) => {
                    warn!(dataset = dataset.name(), error = %e, "cached dataset unreadable, regenerating");
                    repair = true;
                }
            }
        }

        let items = self.obtain(dataset, &options.fetch).await?;

        if local {
            // cache writes are best-effort; the run still has its items
            if let Err(e) = self.cache.save(dataset.name(), &items, options.overwrite || repair).await {
                warn!(dataset = dataset.name(), error = %e, "failed to cache dataset");
            }
        }
        Ok(items)
    }

    /// Items straight from the dataset's source, bypassing the cache.
    async fn obtain(&self, dataset: &Dataset, fetch: &FetchOptions) -> Result<Vec<DataItem>, DatasetError> {
        if let Some(generator) = dataset.generator() {
            debug!(dataset = dataset.name(), "generating dataset");
            return generator.generate().await.map_err(|source| DatasetError::Generator {
                name: dataset.name().to_string(),
                source,
            });
        }
        if let Some(provider) = dataset.provider(&self.registry).await? {
            debug!(dataset = dataset.name(), provider = provider.provider_type(), "fetching dataset from provider");
            return Ok(provider.fetch(fetch).await?);
        }
        Err(DatasetError::MissingSource(dataset.name().to_string()))
    }

    /// Whether the dataset can be served without generating: a cached `local` dataset,
    /// or one whose provider reports it exists. `memory` datasets never exist.
    pub async fn exists(&self, dataset: &Dataset) -> Result<bool, DatasetError> {
        if dataset.storage() == StorageMode::Memory {
            return Ok(false);
        }
        check_cache_name(dataset)?;
        if self.cache.exists(dataset.name()).await? {
            return Ok(true);
        }
        match dataset.provider(&self.registry).await? {
            Some(provider) => Ok(provider.exists().await?),
            None => Ok(false),
        }
    }

    /// Generate a `local` dataset into the cache ahead of a run. Returns whether a snapshot
    /// was written; an existing snapshot is kept unless `overwrite` is set.
    pub async fn materialize(&self, dataset: &Dataset, overwrite: bool) -> Result<bool, DatasetError> {
        if dataset.storage() == StorageMode::Memory {
            warn!(dataset = dataset.name(), "memory datasets are never cached, skipping");
            return Ok(false);
        }
        check_cache_name(dataset)?;
        if !overwrite && self.cache.exists(dataset.name()).await? {
            info!(dataset = dataset.name(), "dataset already cached");
            return Ok(false);
        }
        let items = self.obtain(dataset, &FetchOptions::default()).await?;
        let written = self.cache.save(dataset.name(), &items, overwrite).await?;
        info!(dataset = dataset.name(), items = items.len(), written, "dataset materialized");
        Ok(written)
    }
}

fn check_cache_name(dataset: &Dataset) -> Result<(), DatasetError> {
    validate_key(dataset.name()).map_err(|_| DatasetError::InvalidCacheName(dataset.name().to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::datasource::generator_fn;
    use crate::error::ProviderError;
    use crate::provider::tests::static_metadata;
    use evalflow_store::{BlobStore, MemoryBlobStore};
    use serde_json::json;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn resolver_with(store: Arc<MemoryBlobStore>) -> DatasetResolver {
        DatasetResolver::new(Arc::new(ProviderRegistry::new()), DatasetCache::new(store))
    }

    fn counting_dataset(name: &str, storage: StorageMode, calls: Arc<AtomicUsize>) -> Dataset {
        Dataset::builder(name)
            .storage(storage)
            .generator(generator_fn(move || {
                let calls = calls.clone();
                async move {
                    let n = calls.fetch_add(1, Ordering::SeqCst);
                    Ok(vec![DataItem::new(json!(format!("call {n}")), json!("x"))])
                }
            }))
            .build()
    }

    #[tokio::test]
    async fn items_are_returned_unchanged() {
        let resolver = resolver_with(Arc::new(MemoryBlobStore::new()));
        let items = vec![DataItem::new(json!("a"), json!("A")), DataItem::new(json!("b"), json!("B"))];
        assert_eq!(resolver.resolve(&Data::Items(items.clone())).await.unwrap(), items);
    }

    #[tokio::test]
    async fn local_dataset_is_served_from_cache() {
        let store = Arc::new(MemoryBlobStore::new());
        let resolver = resolver_with(store.clone());
        let calls = Arc::new(AtomicUsize::new(0));
        let data = Data::from(counting_dataset("colors", StorageMode::Local, calls.clone()));

        let first = resolver.resolve(&data).await.unwrap();
        let second = resolver.resolve(&data).await.unwrap();
        assert_eq!(first, second);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert!(store.exists("colors").await.unwrap());

        let fresh = resolver
            .resolve_with(&data, ResolveOptions { overwrite: true, ..Default::default() })
            .await
            .unwrap();
        assert_ne!(fresh, first);
        assert_eq!(resolver.resolve(&data).await.unwrap(), fresh);
    }

    #[tokio::test]
    async fn memory_dataset_never_touches_cache() {
        let store = Arc::new(MemoryBlobStore::new());
        let resolver = resolver_with(store.clone());
        let calls = Arc::new(AtomicUsize::new(0));
        let data = Data::from(counting_dataset("scratch", StorageMode::Memory, calls.clone()));

        resolver.resolve(&data).await.unwrap();
        resolver.resolve(&data).await.unwrap();
        assert_eq!(calls.load(Ordering::SeqCst), 2);
        assert!(store.is_empty().await);
        assert!(!resolver.exists(&Dataset::builder("scratch").storage(StorageMode::Memory).build()).await.unwrap());
    }

    #[tokio::test]
    async fn unreadable_cache_is_regenerated() {
        let store = Arc::new(MemoryBlobStore::new());
        store.put("colors", b"{ truncated", false).await.unwrap();
        let resolver = resolver_with(store.clone());
        let calls = Arc::new(AtomicUsize::new(0));
        let data = Data::from(counting_dataset("colors", StorageMode::Local, calls.clone()));

        let items = resolver.resolve(&data).await.unwrap();
        assert_eq!(items.len(), 1);
        // the broken snapshot was replaced
        assert_eq!(resolver.cache().load("colors").await.unwrap(), Some(items));
    }

    #[tokio::test]
    async fn provider_dataset_is_fetched_and_cached() {
        let store = Arc::new(MemoryBlobStore::new());
        let registry = Arc::new(ProviderRegistry::new());
        let fetches = Arc::new(AtomicUsize::new(0));
        registry.register(static_metadata(fetches.clone())).unwrap();
        let resolver = DatasetResolver::new(registry, DatasetCache::new(store));

        let ds = Dataset::builder("remote")
            .provider("static", json!({ "items": [{ "input": "a" }, { "input": "b" }, { "input": "c" }] }))
            .build();
        assert!(resolver.exists(&ds).await.unwrap());

        let data = Data::from(ds);
        let options = ResolveOptions {
            overwrite: false,
            fetch: FetchOptions { limit: Some(2), offset: None },
        };
        let items = resolver.resolve_with(&data, options).await.unwrap();
        assert_eq!(items.len(), 2);
        resolver.resolve(&data).await.unwrap();
        assert_eq!(fetches.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn unregistered_provider_is_a_typed_error() {
        let resolver = resolver_with(Arc::new(MemoryBlobStore::new()));
        let data = Data::from(Dataset::builder("remote").provider("voltagent", json!({})).build());
        let err = resolver.resolve(&data).await.unwrap_err();
        assert!(matches!(
            err,
            DatasetError::Provider(ProviderError::NotFound { ref package, .. }) if package == "evalflow/voltagent"
        ));
    }

    #[tokio::test]
    async fn dataset_without_source_fails_at_resolve() {
        let resolver = resolver_with(Arc::new(MemoryBlobStore::new()));
        let data = Data::from(Dataset::builder("empty").build());
        let err = resolver.resolve(&data).await.unwrap_err();
        assert!(matches!(err, DatasetError::MissingSource(name) if name == "empty"));
    }

    #[tokio::test]
    async fn local_dataset_with_path_name_is_rejected() {
        let store = Arc::new(MemoryBlobStore::new());
        let resolver = resolver_with(store.clone());
        let calls = Arc::new(AtomicUsize::new(0));
        let data = Data::from(counting_dataset("team/colors", StorageMode::Local, calls.clone()));

        let err = resolver.resolve(&data).await.unwrap_err();
        assert!(matches!(err, DatasetError::InvalidCacheName(ref name) if name == "team/colors"));
        assert_eq!(calls.load(Ordering::SeqCst), 0);
        assert!(store.is_empty().await);

        // memory datasets never reach the cache, so any name works
        let scratch = Data::from(counting_dataset("team/scratch", StorageMode::Memory, calls.clone()));
        assert_eq!(resolver.resolve(&scratch).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn materialize_is_write_once() {
        let store = Arc::new(MemoryBlobStore::new());
        let resolver = resolver_with(store);
        let calls = Arc::new(AtomicUsize::new(0));
        let ds = counting_dataset("colors", StorageMode::Local, calls.clone());

        assert!(resolver.materialize(&ds, false).await.unwrap());
        assert!(!resolver.materialize(&ds, false).await.unwrap());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert!(resolver.materialize(&ds, true).await.unwrap());
        assert_eq!(calls.load(Ordering::SeqCst), 2);
        assert!(resolver.exists(&ds).await.unwrap());
    }
}

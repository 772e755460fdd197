//! The uniform lifecycle every backend goes through.
//!
//! A [`BackendAdapter`] hides everything backend-specific (connections,
//! index-creation statements, request bodies) behind four operations:
//! `prepare`, `store`, `query` and `teardown`. The runner depends on nothing
//! else.
//!
//! Adapters are created per comparison by an [`AdapterRegistry`], which maps
//! each [`BackendKind`] to a constructor. A kind with no constructor is a
//! configuration defect and aborts the run.

mod hnsw;
mod memory;

pub use hnsw::{HnswConfig, HnswGraph};
pub use memory::{MemoryAdapter, MemoryCatalog, TableInfo};

use async_trait::async_trait;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use crate::config::{BackendConfig, BackendKind};
use crate::error::{HarnessError, HarnessResult};
use crate::types::{Corpus, Vector, VectorId};

/// Lifecycle contract for one backend/index configuration.
///
/// An adapter owns its connection or session exclusively. It is prepared
/// once, loaded once, queried sequentially, and torn down on every exit
/// path, including after a failed `prepare`.
#[async_trait]
pub trait BackendAdapter: Send + Sync {
    /// (Re)create the underlying index or table for `dimension`-sized vectors.
    ///
    /// With `erase` set, any pre-existing resource with the same name is
    /// destroyed first.
    ///
    /// # Errors
    ///
    /// `DimensionExceeded` if `dimension > config.max_dimension`; `Setup`
    /// for any provisioning failure.
    async fn prepare(
        &mut self,
        config: &BackendConfig,
        dimension: usize,
        erase: bool,
    ) -> HarnessResult<()>;

    /// Insert every corpus vector under its id.
    ///
    /// Returns wall-clock time from the first insert to confirmed
    /// durability (commit, flush, or the last in-memory write).
    ///
    /// # Errors
    ///
    /// `Store` if any insert fails.
    async fn store(&mut self, corpus: &Corpus) -> HarnessResult<Duration>;

    /// Up to `k` candidate ids for `vector`. May be approximate.
    ///
    /// `timeout` is the caller's bound; adapters forward it to their client
    /// where one exists. The runner enforces it regardless.
    ///
    /// # Errors
    ///
    /// `QueryTimeout` or `Query`.
    async fn query(&self, vector: &Vector, k: usize, timeout: Duration)
    -> HarnessResult<Vec<VectorId>>;

    /// Release the adapter's resources. Best effort: the runner logs
    /// failures and carries on.
    async fn teardown(&mut self) -> HarnessResult<()>;
}

/// Fail with `DimensionExceeded` when `dimension` is above the config limit.
pub fn check_dimension(config: &BackendConfig, dimension: usize) -> HarnessResult<()> {
    if config.supports_dimension(dimension) {
        Ok(())
    } else {
        Err(HarnessError::DimensionExceeded {
            backend: config.name.clone(),
            dimension,
            max_dimension: config.max_dimension,
        })
    }
}

/// Builds a fresh adapter for a configuration.
pub type AdapterFactory = Arc<dyn Fn(&BackendConfig) -> Box<dyn BackendAdapter> + Send + Sync>;

/// Maps each backend family to its adapter constructor.
#[derive(Clone, Default)]
pub struct AdapterRegistry {
    factories: HashMap<BackendKind, AdapterFactory>,
}

impl fmt::Debug for AdapterRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut kinds: Vec<_> = self.factories.keys().collect();
        kinds.sort();
        f.debug_struct("AdapterRegistry")
            .field("kinds", &kinds)
            .finish()
    }
}

impl AdapterRegistry {
    /// An empty registry; every kind is unrecognized until registered.
    pub fn new() -> Self {
        Self::default()
    }

    /// A registry serving [`BackendKind::Memory`] from `catalog`.
    pub fn with_memory(catalog: MemoryCatalog) -> Self {
        let mut registry = Self::new();
        registry.register(BackendKind::Memory, move |_config| {
            Box::new(MemoryAdapter::new(catalog.clone()))
        });
        registry
    }

    /// Register (or replace) the constructor for `kind`.
    pub fn register<F>(&mut self, kind: BackendKind, factory: F) -> &mut Self
    where
        F: Fn(&BackendConfig) -> Box<dyn BackendAdapter> + Send + Sync + 'static,
    {
        self.factories.insert(kind, Arc::new(factory));
        self
    }

    /// Whether `kind` has a constructor.
    pub fn supports(&self, kind: BackendKind) -> bool {
        self.factories.contains_key(&kind)
    }

    /// Fail with `UnrecognizedBackend` if `config.kind` has no constructor.
    pub fn check(&self, config: &BackendConfig) -> HarnessResult<()> {
        if self.supports(config.kind) {
            Ok(())
        } else {
            Err(HarnessError::UnrecognizedBackend {
                backend: config.name.clone(),
                kind: config.kind,
            })
        }
    }

    /// Build an adapter for `config`.
    pub fn create(&self, config: &BackendConfig) -> HarnessResult<Box<dyn BackendAdapter>> {
        let factory = self
            .factories
            .get(&config.kind)
            .ok_or_else(|| HarnessError::UnrecognizedBackend {
                backend: config.name.clone(),
                kind: config.kind,
            })?;
        Ok(factory(config))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::IndexMethod;

    fn config(kind: BackendKind, max_dimension: usize) -> BackendConfig {
        BackendConfig::new(
            "c",
            kind,
            max_dimension,
            "t",
            IndexMethod::new("vector", "l2", "flat"),
        )
    }

    #[test]
    fn test_check_dimension() {
        assert!(check_dimension(&config(BackendKind::Memory, 8), 8).is_ok());
        assert!(matches!(
            check_dimension(&config(BackendKind::Memory, 8), 9),
            Err(HarnessError::DimensionExceeded {
                dimension: 9,
                max_dimension: 8,
                ..
            })
        ));
    }

    #[test]
    fn test_registry_unrecognized() {
        let registry = AdapterRegistry::with_memory(MemoryCatalog::new());
        assert!(registry.supports(BackendKind::Memory));
        assert!(!registry.supports(BackendKind::Pgvector));
        assert!(registry.create(&config(BackendKind::Memory, 8)).is_ok());
        assert!(matches!(
            registry.create(&config(BackendKind::OpenSearch, 8)),
            Err(HarnessError::UnrecognizedBackend {
                kind: BackendKind::OpenSearch,
                ..
            })
        ));
    }
}

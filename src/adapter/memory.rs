//! In-process reference backends.
//!
//! A [`MemoryCatalog`] plays the role of an external store: a shared set of
//! named tables that outlive the adapters using them. [`MemoryAdapter`]
//! leases one table at a time, exclusively, and releases the lease when it
//! is torn down or dropped. An adapter prepared with erase also drops its
//! table on teardown; without erase the table stays for the next run.
//!
//! The table's behaviour comes from the comparison's `method`:
//!
//! | field        | accepted                                   |
//! |--------------|--------------------------------------------|
//! | `engine`     | `vector`, `f32` (full) / `halfvec`, `bf16`  |
//! | `space_type` | `l2`, `vector_l2_ops`, `halfvec_l2_ops`    |
//! | `index_kind` | `flat` (exact) / `hnsw` (approximate)      |

use async_trait::async_trait;
use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, PoisonError, RwLock};
use std::time::{Duration, Instant};
use tracing::{debug, trace};

use super::hnsw::{HnswConfig, HnswGraph};
use super::{BackendAdapter, check_dimension};
use crate::config::{BackendConfig, IndexMethod};
use crate::error::{HarnessError, HarnessResult};
use crate::ground_truth::exact_knn;
use crate::types::{Corpus, Vector, VectorId};

const VECTOR_TYPES: [&str; 2] = ["knn_vector", "vector"];
const L2_SPACES: [&str; 3] = ["l2", "vector_l2_ops", "halfvec_l2_ops"];

/// Element precision a table stores.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum StoragePrecision {
    /// 32-bit floats, stored as given
    Full,
    /// Rounded to bfloat16 (8-bit mantissa)
    Half,
}

impl StoragePrecision {
    fn parse(engine: &str) -> Option<Self> {
        match engine {
            "vector" | "f32" => Some(StoragePrecision::Full),
            "halfvec" | "bf16" => Some(StoragePrecision::Half),
            _ => None,
        }
    }

    fn encode(&self, data: &[f32]) -> Vec<f32> {
        match self {
            StoragePrecision::Full => data.to_vec(),
            StoragePrecision::Half => data.iter().map(|&x| round_to_bf16(x)).collect(),
        }
    }
}

/// Round to the nearest bfloat16 value, ties to even.
fn round_to_bf16(x: f32) -> f32 {
    if x.is_nan() {
        return x;
    }
    let bits = x.to_bits();
    let rounding = 0x7FFF + ((bits >> 16) & 1);
    f32::from_bits(bits.wrapping_add(rounding) & 0xFFFF_0000)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum IndexKind {
    Flat,
    Hnsw,
}

/// Shape of a table, fixed at creation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct TableSpec {
    dimension: usize,
    precision: StoragePrecision,
    index: IndexKind,
}

impl TableSpec {
    fn from_config(config: &BackendConfig, dimension: usize) -> HarnessResult<Self> {
        let setup = |reason: String| HarnessError::Setup {
            backend: config.name.clone(),
            reason,
        };
        let IndexMethod {
            engine,
            space_type,
            index_kind,
        } = &config.method;

        if !VECTOR_TYPES.contains(&config.vector_type.as_str()) {
            return Err(setup(format!(
                "unsupported vector type '{}'",
                config.vector_type
            )));
        }
        let precision = StoragePrecision::parse(engine)
            .ok_or_else(|| setup(format!("unsupported engine '{engine}'")))?;
        if !L2_SPACES.contains(&space_type.as_str()) {
            return Err(setup(format!("unsupported space type '{space_type}'")));
        }
        let index = match index_kind.as_str() {
            "flat" => IndexKind::Flat,
            "hnsw" => IndexKind::Hnsw,
            other => return Err(setup(format!("unsupported index kind '{other}'"))),
        };

        Ok(Self {
            dimension,
            precision,
            index,
        })
    }
}

enum TableIndex {
    Flat(HashMap<VectorId, Vector>),
    Hnsw(Box<HnswGraph>),
}

/// A named table of vectors with one index.
struct MemoryTable {
    spec: TableSpec,
    index: RwLock<TableIndex>,
    leased: AtomicBool,
}

impl MemoryTable {
    fn new(spec: TableSpec) -> Self {
        let index = match spec.index {
            IndexKind::Flat => TableIndex::Flat(HashMap::new()),
            IndexKind::Hnsw => TableIndex::Hnsw(Box::new(HnswGraph::new(HnswConfig::default()))),
        };
        Self {
            spec,
            index: RwLock::new(index),
            leased: AtomicBool::new(false),
        }
    }

    fn len(&self) -> usize {
        // A panicked writer leaves whatever rows it had already inserted
        let guard = self.index.read().unwrap_or_else(PoisonError::into_inner);
        match &*guard {
            TableIndex::Flat(rows) => rows.len(),
            TableIndex::Hnsw(graph) => graph.len(),
        }
    }

    /// Upsert every corpus vector.
    fn insert_all(&self, corpus: &Corpus) -> Result<(), String> {
        let mut guard = self
            .index
            .write()
            .map_err(|_| "table lock poisoned".to_string())?;
        for (id, vector) in corpus.iter() {
            if vector.dimensions() != self.spec.dimension {
                return Err(format!(
                    "vector {id} has {} dimensions, table expects {}",
                    vector.dimensions(),
                    self.spec.dimension
                ));
            }
            let data = self.spec.precision.encode(vector.as_slice());
            match &mut *guard {
                TableIndex::Flat(rows) => {
                    rows.insert(id, Vector::new(data));
                }
                TableIndex::Hnsw(graph) => graph.insert(id, &data),
            }
        }
        Ok(())
    }

    fn search(&self, query: &Vector, k: usize) -> Result<Vec<VectorId>, String> {
        if query.dimensions() != self.spec.dimension {
            return Err(format!(
                "query has {} dimensions, table expects {}",
                query.dimensions(),
                self.spec.dimension
            ));
        }
        let query = self.spec.precision.encode(query.as_slice());
        let guard = self
            .index
            .read()
            .map_err(|_| "table lock poisoned".to_string())?;
        Ok(match &*guard {
            TableIndex::Flat(rows) => exact_knn(
                rows.iter().map(|(id, v)| (*id, v.as_slice())),
                &query,
                k,
            ),
            TableIndex::Hnsw(graph) => graph.search(&query, k),
        })
    }
}

/// Summary of a catalog table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TableInfo {
    /// Table name
    pub name: String,
    /// Rows stored
    pub rows: usize,
    /// Vector dimension
    pub dimension: usize,
    /// Whether an adapter currently holds it
    pub leased: bool,
}

/// Shared set of named in-memory tables.
///
/// Cloning is cheap and clones share the same tables.
#[derive(Clone, Default)]
pub struct MemoryCatalog {
    tables: Arc<DashMap<String, Arc<MemoryTable>>>,
}

impl std::fmt::Debug for MemoryCatalog {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MemoryCatalog")
            .field("tables", &self.tables.len())
            .finish()
    }
}

impl MemoryCatalog {
    /// Create an empty catalog.
    pub fn new() -> Self {
        Self::default()
    }

    /// Describe a table, if it exists.
    pub fn table_info(&self, name: &str) -> Option<TableInfo> {
        self.tables.get(name).map(|t| TableInfo {
            name: name.to_string(),
            rows: t.len(),
            dimension: t.spec.dimension,
            leased: t.leased.load(Ordering::Acquire),
        })
    }

    /// Drop `name` unless another adapter holds it.
    fn drop_table(&self, name: &str) -> Result<bool, String> {
        if self
            .tables
            .remove_if(name, |_, t| !t.leased.load(Ordering::Acquire))
            .is_some()
        {
            return Ok(true);
        }
        if self.tables.contains_key(name) {
            return Err(format!("table '{name}' is in use"));
        }
        Ok(false)
    }

    /// Open `name`, creating it with `spec` if absent, and lease it.
    fn open(&self, name: &str, spec: TableSpec) -> Result<TableLease, String> {
        let table = match self.tables.entry(name.to_string()) {
            Entry::Occupied(entry) => {
                let table = Arc::clone(entry.get());
                if table.spec != spec {
                    return Err(format!(
                        "table '{name}' exists with a different layout; erase it first"
                    ));
                }
                table
            }
            Entry::Vacant(entry) => {
                let table = Arc::new(MemoryTable::new(spec));
                entry.insert(Arc::clone(&table));
                table
            }
        };

        table
            .leased
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .map_err(|_| format!("table '{name}' is in use"))?;
        Ok(TableLease { table })
    }
}

/// Exclusive hold on a table; released on drop.
struct TableLease {
    table: Arc<MemoryTable>,
}

impl Drop for TableLease {
    fn drop(&mut self) {
        self.table.leased.store(false, Ordering::Release);
    }
}

/// Adapter for [`BackendKind::Memory`](crate::config::BackendKind::Memory).
pub struct MemoryAdapter {
    catalog: MemoryCatalog,
    backend: String,
    table_name: String,
    erase: bool,
    lease: Option<TableLease>,
}

impl std::fmt::Debug for MemoryAdapter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MemoryAdapter")
            .field("backend", &self.backend)
            .field("table", &self.table_name)
            .field("erase", &self.erase)
            .field("prepared", &self.lease.is_some())
            .finish()
    }
}

impl MemoryAdapter {
    /// Create an adapter over `catalog`.
    pub fn new(catalog: MemoryCatalog) -> Self {
        Self {
            catalog,
            backend: String::new(),
            table_name: String::new(),
            erase: false,
            lease: None,
        }
    }

    fn table(&self) -> Option<Arc<MemoryTable>> {
        self.lease.as_ref().map(|l| Arc::clone(&l.table))
    }
}

#[async_trait]
impl BackendAdapter for MemoryAdapter {
    async fn prepare(
        &mut self,
        config: &BackendConfig,
        dimension: usize,
        erase: bool,
    ) -> HarnessResult<()> {
        check_dimension(config, dimension)?;
        self.backend = config.name.clone();
        self.table_name = config.table_name.clone();
        self.erase = erase;
        // A second prepare replaces the previous lease
        self.lease = None;

        let spec = TableSpec::from_config(config, dimension)?;
        let setup = |reason: String| HarnessError::Setup {
            backend: config.name.clone(),
            reason,
        };

        if erase && self.catalog.drop_table(&config.table_name).map_err(setup)? {
            debug!(backend = %config.name, table = %config.table_name, "Dropped existing table");
        }
        self.lease = Some(self.catalog.open(&config.table_name, spec).map_err(setup)?);
        Ok(())
    }

    async fn store(&mut self, corpus: &Corpus) -> HarnessResult<Duration> {
        let store_err = |reason: String| HarnessError::Store {
            backend: self.backend.clone(),
            reason,
        };
        let table = self
            .table()
            .ok_or_else(|| store_err("adapter is not prepared".into()))?;

        let corpus = corpus.clone();
        let start = Instant::now();
        tokio::task::spawn_blocking(move || table.insert_all(&corpus))
            .await
            .map_err(|e| store_err(format!("insert task failed: {e}")))?
            .map_err(store_err)?;
        Ok(start.elapsed())
    }

    async fn query(
        &self,
        vector: &Vector,
        k: usize,
        _timeout: Duration,
    ) -> HarnessResult<Vec<VectorId>> {
        let query_err = |reason: String| HarnessError::Query {
            backend: self.backend.clone(),
            query_index: 0,
            reason,
        };
        let table = self
            .table()
            .ok_or_else(|| query_err("adapter is not prepared".into()))?;

        let vector = vector.clone();
        let ids = tokio::task::spawn_blocking(move || table.search(&vector, k))
            .await
            .map_err(|e| query_err(format!("search task failed: {e}")))?
            .map_err(query_err)?;
        trace!(backend = %self.backend, hits = ids.len(), "Query answered");
        Ok(ids)
    }

    async fn teardown(&mut self) -> HarnessResult<()> {
        // Never drop a table this adapter did not lease
        let Some(lease) = self.lease.take() else {
            return Ok(());
        };
        drop(lease);

        if self.erase {
            self.catalog
                .drop_table(&self.table_name)
                .map_err(|reason| HarnessError::Setup {
                    backend: self.backend.clone(),
                    reason,
                })?;
            debug!(backend = %self.backend, table = %self.table_name, "Dropped table on teardown");
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::BackendKind;
    use crate::corpus::{generate_corpus, generate_queries};
    use crate::ground_truth::compute_ground_truth;

    fn config(table: &str, engine: &str, index_kind: &str) -> BackendConfig {
        BackendConfig::new(
            format!("memory_{index_kind}"),
            BackendKind::Memory,
            64,
            table,
            IndexMethod::new(engine, "l2", index_kind),
        )
    }

    #[test]
    fn test_bf16_rounding() {
        assert_eq!(round_to_bf16(1.0), 1.0);
        assert_eq!(round_to_bf16(0.0), 0.0);
        let x = 0.123_456_79_f32;
        let r = round_to_bf16(x);
        assert_eq!(r.to_bits() & 0xFFFF, 0);
        assert!((x - r).abs() < 1e-3);
    }

    #[tokio::test]
    async fn test_flat_adapter_matches_ground_truth() {
        let corpus = generate_corpus(200, 8, 1).unwrap();
        let queries = generate_queries(10, 8, 1).unwrap();
        let gt = compute_ground_truth(&corpus, &queries, 5).unwrap();

        let mut adapter = MemoryAdapter::new(MemoryCatalog::new());
        adapter
            .prepare(&config("t", "vector", "flat"), 8, true)
            .await
            .unwrap();
        adapter.store(&corpus).await.unwrap();

        for (i, q) in queries.iter().enumerate() {
            let ids = adapter.query(q, 5, Duration::from_secs(5)).await.unwrap();
            assert_eq!(ids, gt.get(i).unwrap());
        }
        adapter.teardown().await.unwrap();
    }

    #[tokio::test]
    async fn test_dimension_exceeded() {
        let mut adapter = MemoryAdapter::new(MemoryCatalog::new());
        let err = adapter
            .prepare(&config("t", "vector", "flat"), 65, true)
            .await
            .unwrap_err();
        assert!(matches!(err, HarnessError::DimensionExceeded { .. }));
    }

    #[tokio::test]
    async fn test_unsupported_method_is_setup_error() {
        let mut adapter = MemoryAdapter::new(MemoryCatalog::new());
        let err = adapter
            .prepare(&config("t", "vector", "ivfflat"), 8, true)
            .await
            .unwrap_err();
        assert!(matches!(err, HarnessError::Setup { .. }));

        let err = adapter
            .prepare(&config("t", "int8", "flat"), 8, true)
            .await
            .unwrap_err();
        assert!(matches!(err, HarnessError::Setup { .. }));
    }

    #[tokio::test]
    async fn test_lease_is_exclusive_until_teardown() {
        let catalog = MemoryCatalog::new();
        let mut first = MemoryAdapter::new(catalog.clone());
        let mut second = MemoryAdapter::new(catalog.clone());
        let cfg = config("shared", "vector", "flat");

        first.prepare(&cfg, 4, false).await.unwrap();
        assert!(catalog.table_info("shared").unwrap().leased);
        let err = second.prepare(&cfg, 4, true).await.unwrap_err();
        assert!(matches!(err, HarnessError::Setup { .. }));

        first.teardown().await.unwrap();
        assert!(!catalog.table_info("shared").unwrap().leased);
        second.prepare(&cfg, 4, true).await.unwrap();
    }

    #[tokio::test]
    async fn test_lease_released_on_drop() {
        let catalog = MemoryCatalog::new();
        {
            let mut adapter = MemoryAdapter::new(catalog.clone());
            adapter
                .prepare(&config("t", "vector", "flat"), 4, true)
                .await
                .unwrap();
        }
        assert!(!catalog.table_info("t").unwrap().leased);
    }

    #[tokio::test]
    async fn test_erase_teardown_drops_table() {
        let catalog = MemoryCatalog::new();
        let corpus = generate_corpus(20, 4, 9).unwrap();
        let cfg = config("t", "vector", "flat");

        let mut adapter = MemoryAdapter::new(catalog.clone());
        adapter.prepare(&cfg, 4, true).await.unwrap();
        adapter.store(&corpus).await.unwrap();
        assert_eq!(catalog.table_info("t").unwrap().rows, 20);

        adapter.teardown().await.unwrap();
        assert!(catalog.table_info("t").is_none());

        // Second teardown has nothing to release
        adapter.teardown().await.unwrap();
    }

    #[tokio::test]
    async fn test_failed_prepare_leaves_other_table_alone() {
        let catalog = MemoryCatalog::new();
        let cfg = config("t", "vector", "flat");
        let mut holder = MemoryAdapter::new(catalog.clone());
        holder.prepare(&cfg, 4, false).await.unwrap();

        let mut other = MemoryAdapter::new(catalog.clone());
        assert!(other.prepare(&cfg, 4, true).await.is_err());
        other.teardown().await.unwrap();
        assert!(catalog.table_info("t").unwrap().leased);
    }

    #[tokio::test]
    async fn test_erase_vs_reuse() {
        let catalog = MemoryCatalog::new();
        let corpus = generate_corpus(20, 4, 9).unwrap();
        let cfg = config("t", "vector", "flat");

        let mut adapter = MemoryAdapter::new(catalog.clone());

        // Without erase the table outlives the adapter
        adapter.prepare(&cfg, 4, false).await.unwrap();
        adapter.store(&corpus).await.unwrap();
        adapter.teardown().await.unwrap();
        assert_eq!(catalog.table_info("t").unwrap().rows, 20);

        // Reuse keeps rows
        adapter.prepare(&cfg, 4, false).await.unwrap();
        adapter.teardown().await.unwrap();
        assert_eq!(catalog.table_info("t").unwrap().rows, 20);

        // Erase starts empty, then drops on teardown
        adapter.prepare(&cfg, 4, true).await.unwrap();
        assert_eq!(catalog.table_info("t").unwrap().rows, 0);
        adapter.teardown().await.unwrap();
        assert!(catalog.table_info("t").is_none());

        // Reusing with a different layout is refused
        adapter.prepare(&cfg, 4, false).await.unwrap();
        adapter.teardown().await.unwrap();
        let err = adapter.prepare(&cfg, 3, false).await.unwrap_err();
        assert!(matches!(err, HarnessError::Setup { .. }));
    }

    #[test]
    fn test_row_count_survives_poisoned_lock() {
        let spec = TableSpec {
            dimension: 4,
            precision: StoragePrecision::Full,
            index: IndexKind::Flat,
        };
        let table = Arc::new(MemoryTable::new(spec));
        table
            .insert_all(&generate_corpus(7, 4, 3).unwrap())
            .unwrap();

        let writer = Arc::clone(&table);
        let _ = std::thread::spawn(move || {
            let _guard = writer.index.write().unwrap();
            panic!("writer died holding the lock");
        })
        .join();

        assert!(table.index.is_poisoned());
        assert_eq!(table.len(), 7);
    }

    #[tokio::test]
    async fn test_hnsw_half_precision_round_trip() {
        let corpus = generate_corpus(100, 8, 4).unwrap();
        let mut adapter = MemoryAdapter::new(MemoryCatalog::new());
        adapter
            .prepare(&config("h", "halfvec", "hnsw"), 8, true)
            .await
            .unwrap();
        adapter.store(&corpus).await.unwrap();

        let probe = corpus.get(42).unwrap();
        let ids = adapter.query(probe, 1, Duration::from_secs(5)).await.unwrap();
        assert_eq!(ids, vec![42]);
    }

    #[tokio::test]
    async fn test_unprepared_adapter_errors() {
        let mut adapter = MemoryAdapter::new(MemoryCatalog::new());
        let corpus = generate_corpus(2, 2, 0).unwrap();
        assert!(matches!(
            adapter.store(&corpus).await,
            Err(HarnessError::Store { .. })
        ));
        let q = Vector::new(vec![0.0, 0.0]);
        assert!(matches!(
            adapter.query(&q, 1, Duration::from_secs(1)).await,
            Err(HarnessError::Query { .. })
        ));
    }
}

//! Run parameters and backend configurations.
//!
//! A [`BenchmarkConfig`] is static input: the run parameters, a table of
//! named comparisons, and the ordered list of comparison names to execute.
//! It is plain JSON on disk.
//!
//! ```ignore
//! {
//!   "parameters": { "dimension": 2000, "num_vectors": 1000, "k": 10 },
//!   "comparisons": {
//!     "memory_hnsw": {
//!       "kind": "memory",
//!       "max_dimension": 2000,
//!       "table_name": "vectors_hnsw",
//!       "type": "knn_vector",
//!       "method": { "engine": "vector", "space_type": "l2", "name": "hnsw" }
//!     }
//!   },
//!   "comparisons_to_run": ["memory_hnsw"]
//! }
//! ```

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};
use std::fmt;
use std::path::Path;
use std::time::Duration;

use crate::error::{HarnessError, HarnessResult};

/// The closed set of backend families the harness knows about.
///
/// Each family is served by at most one adapter constructor in an
/// [`AdapterRegistry`](crate::adapter::AdapterRegistry).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum BackendKind {
    /// In-process reference backends (flat scan, HNSW graph)
    #[serde(rename = "memory")]
    Memory,
    /// PostgreSQL with the pgvector extension
    #[serde(rename = "pgvector")]
    Pgvector,
    /// OpenSearch k-NN plugin
    #[serde(rename = "opensearch")]
    OpenSearch,
}

impl BackendKind {
    /// Every known family.
    pub const ALL: [BackendKind; 3] = [
        BackendKind::Memory,
        BackendKind::Pgvector,
        BackendKind::OpenSearch,
    ];

    /// Lowercase identifier as used in configuration files.
    pub fn as_str(&self) -> &'static str {
        match self {
            BackendKind::Memory => "memory",
            BackendKind::Pgvector => "pgvector",
            BackendKind::OpenSearch => "opensearch",
        }
    }
}

impl fmt::Display for BackendKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Index method under test.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IndexMethod {
    /// Storage engine or element type (e.g. `vector`, `halfvec`, `faiss`)
    pub engine: String,
    /// Distance space (e.g. `l2`, `vector_l2_ops`)
    pub space_type: String,
    /// Index algorithm (e.g. `hnsw`, `ivfflat`, `flat`)
    #[serde(alias = "name")]
    pub index_kind: String,
}

impl IndexMethod {
    /// Create a method description.
    pub fn new(
        engine: impl Into<String>,
        space_type: impl Into<String>,
        index_kind: impl Into<String>,
    ) -> Self {
        Self {
            engine: engine.into(),
            space_type: space_type.into(),
            index_kind: index_kind.into(),
        }
    }
}

/// One backend/index configuration under test.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BackendConfig {
    /// Unique comparison name. Filled from the table key when omitted.
    #[serde(default)]
    pub name: String,
    /// Backend family; selects the adapter
    pub kind: BackendKind,
    /// Largest vector dimension the backend accepts
    pub max_dimension: usize,
    /// Target table or index identifier
    pub table_name: String,
    /// Backend-specific storage representation
    #[serde(alias = "type")]
    pub vector_type: String,
    /// Index method
    pub method: IndexMethod,
}

impl BackendConfig {
    /// Create a config with the given name and family.
    pub fn new(
        name: impl Into<String>,
        kind: BackendKind,
        max_dimension: usize,
        table_name: impl Into<String>,
        method: IndexMethod,
    ) -> Self {
        Self {
            name: name.into(),
            kind,
            max_dimension,
            table_name: table_name.into(),
            vector_type: "knn_vector".to_string(),
            method,
        }
    }

    /// Set the vector type.
    pub fn vector_type(mut self, vector_type: impl Into<String>) -> Self {
        self.vector_type = vector_type.into();
        self
    }

    /// Whether vectors of `dimension` fit this backend.
    pub fn supports_dimension(&self, dimension: usize) -> bool {
        dimension <= self.max_dimension
    }

    /// Check structural validity.
    pub fn validate(&self) -> HarnessResult<()> {
        if self.name.trim().is_empty() {
            return Err(HarnessError::Config("comparison name is empty".into()));
        }
        if self.max_dimension == 0 {
            return Err(HarnessError::Config(format!(
                "'{}': max_dimension must be > 0",
                self.name
            )));
        }
        if self.table_name.trim().is_empty() {
            return Err(HarnessError::Config(format!(
                "'{}': table_name is empty",
                self.name
            )));
        }
        Ok(())
    }
}

fn default_dimension() -> usize {
    2000
}
fn default_num_vectors() -> usize {
    1000
}
fn default_num_queries() -> usize {
    500
}
fn default_k() -> usize {
    10
}
fn default_true() -> bool {
    true
}
fn default_seed() -> u64 {
    42
}
fn default_query_timeout_secs() -> u64 {
    600
}

/// Parameters shared by every backend in a run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunParameters {
    /// Vector dimension (D)
    #[serde(default = "default_dimension")]
    pub dimension: usize,
    /// Corpus size (N)
    #[serde(default = "default_num_vectors")]
    pub num_vectors: usize,
    /// Number of queries (Q)
    #[serde(default = "default_num_queries")]
    pub num_queries: usize,
    /// Neighbors retrieved and scored per query (K)
    #[serde(default = "default_k")]
    pub k: usize,
    /// Destroy pre-existing backend resources with the same name first
    #[serde(default = "default_true")]
    pub erase_before_run: bool,
    /// Seed for corpus and query generation
    #[serde(default = "default_seed")]
    pub seed: u64,
    /// Per-query time bound in seconds
    #[serde(default = "default_query_timeout_secs")]
    pub query_timeout_secs: u64,
    /// Run independent backends concurrently
    #[serde(default)]
    pub parallel: bool,
}

impl Default for RunParameters {
    fn default() -> Self {
        Self {
            dimension: default_dimension(),
            num_vectors: default_num_vectors(),
            num_queries: default_num_queries(),
            k: default_k(),
            erase_before_run: true,
            seed: default_seed(),
            query_timeout_secs: default_query_timeout_secs(),
            parallel: false,
        }
    }
}

impl RunParameters {
    /// Per-query time bound.
    pub fn query_timeout(&self) -> Duration {
        Duration::from_secs(self.query_timeout_secs)
    }

    /// Reject parameters that cannot produce a meaningful run.
    pub fn validate(&self) -> HarnessResult<()> {
        if self.dimension == 0 {
            return Err(HarnessError::invalid("dimension must be > 0"));
        }
        if self.num_vectors == 0 {
            return Err(HarnessError::invalid("num_vectors must be > 0"));
        }
        if self.num_queries == 0 {
            return Err(HarnessError::invalid("num_queries must be > 0"));
        }
        if self.k == 0 {
            return Err(HarnessError::invalid("k must be > 0"));
        }
        if self.k > self.num_vectors {
            return Err(HarnessError::invalid(format!(
                "k ({}) must not exceed num_vectors ({})",
                self.k, self.num_vectors
            )));
        }
        if self.query_timeout_secs == 0 {
            return Err(HarnessError::invalid("query_timeout_secs must be > 0"));
        }
        Ok(())
    }
}

/// Complete benchmark definition.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BenchmarkConfig {
    /// Shared run parameters
    #[serde(default)]
    pub parameters: RunParameters,
    /// Comparison name -> backend configuration
    pub comparisons: BTreeMap<String, BackendConfig>,
    /// Names to execute, in order
    pub comparisons_to_run: Vec<String>,
}

impl BenchmarkConfig {
    /// Parse a configuration from JSON.
    pub fn from_json_str(json: &str) -> HarnessResult<Self> {
        let mut config: BenchmarkConfig = serde_json::from_str(json)?;
        config.fill_names();
        Ok(config)
    }

    /// Load a configuration file.
    pub fn load(path: impl AsRef<Path>) -> HarnessResult<Self> {
        let raw = std::fs::read_to_string(path)?;
        Self::from_json_str(&raw)
    }

    /// Write the configuration as pretty-printed JSON.
    pub fn save(&self, path: impl AsRef<Path>) -> HarnessResult<()> {
        let json = serde_json::to_string_pretty(self)?;
        std::fs::write(path, json)?;
        Ok(())
    }

    fn fill_names(&mut self) {
        for (key, backend) in self.comparisons.iter_mut() {
            if backend.name.is_empty() {
                backend.name = key.clone();
            }
        }
    }

    /// Validate parameters, every defined comparison, and the run list.
    pub fn validate(&self) -> HarnessResult<()> {
        self.parameters.validate()?;
        for (key, backend) in &self.comparisons {
            if backend.name != *key {
                return Err(HarnessError::Config(format!(
                    "comparison '{key}' declares mismatched name '{}'",
                    backend.name
                )));
            }
            backend.validate()?;
        }
        self.selected().map(|_| ())
    }

    /// The configurations to run, in run-list order.
    ///
    /// # Errors
    ///
    /// `UnknownComparison` for an undefined name, `InvalidParameter` if a
    /// name is listed twice.
    pub fn selected(&self) -> HarnessResult<Vec<BackendConfig>> {
        let mut seen = HashSet::new();
        self.comparisons_to_run
            .iter()
            .map(|name| {
                if !seen.insert(name.as_str()) {
                    return Err(HarnessError::invalid(format!(
                        "comparison '{name}' is listed more than once"
                    )));
                }
                self.comparisons
                    .get(name)
                    .cloned()
                    .ok_or_else(|| HarnessError::UnknownComparison { name: name.clone() })
            })
            .collect()
    }

    /// Restrict the run list to `names` (in the given order).
    pub fn only(mut self, names: Vec<String>) -> Self {
        self.comparisons_to_run = names;
        self
    }
}

impl Default for BenchmarkConfig {
    fn default() -> Self {
        use BackendKind::*;

        let entries = vec![
            BackendConfig::new(
                "memory_flat_vector_l2",
                Memory,
                16_000,
                "vectors_flat",
                IndexMethod::new("vector", "l2", "flat"),
            ),
            BackendConfig::new(
                "memory_hnsw_vector_l2",
                Memory,
                2000,
                "vectors_hnsw",
                IndexMethod::new("vector", "vector_l2_ops", "hnsw"),
            ),
            BackendConfig::new(
                "memory_hnsw_halfvec_l2",
                Memory,
                4000,
                "vectors_hnsw_half",
                IndexMethod::new("halfvec", "halfvec_l2_ops", "hnsw"),
            ),
            BackendConfig::new(
                "memory_hnsw_capped_1024",
                Memory,
                1024,
                "vectors_hnsw_capped",
                IndexMethod::new("vector", "l2", "hnsw"),
            ),
            BackendConfig::new(
                "pgvector_hnsw_vector_l2_ops",
                Pgvector,
                2000,
                "vectors",
                IndexMethod::new("vector", "vector_l2_ops", "hnsw"),
            ),
            BackendConfig::new(
                "pgvector_hnsw_halfvec_l2_ops",
                Pgvector,
                4000,
                "vectors",
                IndexMethod::new("halfvec", "halfvec_l2_ops", "hnsw"),
            ),
            BackendConfig::new(
                "pgvector_ivfflat_vector_l2_ops",
                Pgvector,
                2000,
                "vectors",
                IndexMethod::new("vector", "vector_l2_ops", "ivfflat"),
            ),
            BackendConfig::new(
                "pgvector_ivfflat_halfvec_l2_ops",
                Pgvector,
                4000,
                "vectors",
                IndexMethod::new("halfvec", "halfvec_l2_ops", "ivfflat"),
            ),
            BackendConfig::new(
                "os_lucene",
                OpenSearch,
                10_000,
                "vectors_lucene",
                IndexMethod::new("lucene", "l2", "hnsw"),
            ),
            BackendConfig::new(
                "os_nmslib",
                OpenSearch,
                10_000,
                "vectors_nmslib",
                IndexMethod::new("nmslib", "l2", "hnsw"),
            ),
            BackendConfig::new(
                "os_faiss",
                OpenSearch,
                10_000,
                "vectors_faiss",
                IndexMethod::new("faiss", "l2", "hnsw"),
            ),
        ];

        let comparisons_to_run = entries
            .iter()
            .filter(|c| c.kind == Memory)
            .map(|c| c.name.clone())
            .collect();

        Self {
            parameters: RunParameters::default(),
            comparisons: entries.into_iter().map(|c| (c.name.clone(), c)).collect(),
            comparisons_to_run,
        }
    }
}

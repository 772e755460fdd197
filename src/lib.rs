//! # annbench — an ANN Backend Benchmarking Harness
//!
//! annbench compares approximate nearest-neighbor backends on retrieval
//! quality (precision@K) and performance (store and query latency), through
//! one uniform adapter interface:
//! - **Deterministic workloads** - seeded synthetic corpora and queries
//! - **Exact ground truth** - brute-force k-NN, computed once per run
//! - **Fair scoring** - every backend is measured against the same reference
//! - **Failure isolation** - one broken backend never stops the others
//!
//! ## Quick Start
//!
//! ```ignore
//! use annbench::prelude::*;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = BenchmarkConfig::default();
//!     let registry = AdapterRegistry::with_memory(MemoryCatalog::new());
//!
//!     let leaderboard = BenchmarkRunner::run_config(registry, &config).await?;
//!     println!("{leaderboard}");
//!     Ok(())
//! }
//! ```
//!
//! ## Architecture
//!
//! Data flows leaf-first:
//!
//! 1. **Generator** (`corpus`) - produces the [`Corpus`] and [`QuerySet`]
//! 2. **Ground truth** (`ground_truth`) - exact neighbors, the scoring oracle
//! 3. **Adapters** (`adapter`) - the [`BackendAdapter`] lifecycle each
//!    backend implements, selected by [`BackendKind`] through an
//!    [`AdapterRegistry`]
//! 4. **Runner** (`runner`) - drives prepare → store → query per backend
//! 5. **Scorer** (`scorer`) and **Leaderboard** (`leaderboard`) - precision
//!    accounting and the ranked report
//!
//! Concrete database clients are not part of this crate: they plug in by
//! registering an adapter constructor for their [`BackendKind`].

pub mod adapter;
pub mod config;
pub mod corpus;
mod error;
pub mod ground_truth;
pub mod leaderboard;
pub mod runner;
pub mod scorer;
mod types;

// Public API exports
pub use adapter::{AdapterRegistry, BackendAdapter, MemoryAdapter, MemoryCatalog};
pub use config::{BackendConfig, BackendKind, BenchmarkConfig, IndexMethod, RunParameters};
pub use error::{HarnessError, HarnessResult};
pub use ground_truth::{GroundTruthSet, compute_ground_truth};
pub use leaderboard::{BenchmarkResult, BenchmarkStatus, Leaderboard};
pub use runner::{BenchmarkRunner, RunnerOptions, Workload};
pub use scorer::PrecisionScorer;
pub use types::{Corpus, QuerySet, Vector, VectorId};

/// Prelude module for convenient imports.
///
/// ```ignore
/// use annbench::prelude::*;
/// ```
pub mod prelude {
    pub use crate::adapter::{AdapterRegistry, BackendAdapter, MemoryCatalog, check_dimension};
    pub use crate::config::{
        BackendConfig, BackendKind, BenchmarkConfig, IndexMethod, RunParameters,
    };
    pub use crate::corpus::{generate, generate_corpus, generate_queries};
    pub use crate::error::{HarnessError, HarnessResult};
    pub use crate::ground_truth::{GroundTruthSet, compute_ground_truth};
    pub use crate::leaderboard::{BenchmarkResult, BenchmarkStatus, Leaderboard};
    pub use crate::runner::{BenchmarkRunner, RunnerOptions, Workload};
    pub use crate::scorer::{PrecisionScorer, precision_at_k};
    pub use crate::types::{Corpus, QuerySet, Vector, VectorId};
}

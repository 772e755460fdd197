//! Drives every configured backend through prepare → store → query and
//! collects the results.
//!
//! Each backend's pipeline is isolated: any error it raises is caught here
//! and turned into a `Skipped` or `Failed` entry, and the run moves on.
//! Only configuration-class problems (bad parameters, a backend family with
//! no adapter, duplicate names) are returned as errors, and they are all
//! detected before the first backend is touched.
//!
//! Queries are issued one at a time, in order, each under the configured
//! timeout, so `query_time_seconds` is a clean sum of per-query wall-clock
//! time. With `parallel` set, whole backends run concurrently; the content
//! of the results does not change, only the overall run time. Backends of
//! the same kind that target the same table still run one after another, in
//! configured order, as they would sequentially.

use futures::future::join_all;
use std::collections::{HashMap, HashSet};
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

use crate::adapter::{AdapterRegistry, BackendAdapter};
use crate::config::{BackendConfig, BackendKind, BenchmarkConfig, RunParameters};
use crate::corpus::{generate_corpus, generate_queries};
use crate::error::{HarnessError, HarnessResult};
use crate::ground_truth::{GroundTruthSet, compute_ground_truth};
use crate::leaderboard::{BenchmarkResult, Leaderboard};
use crate::scorer::PrecisionScorer;
use crate::types::{Corpus, QuerySet};

/// How the runner executes backends.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RunnerOptions {
    /// Bound on each individual query
    pub query_timeout: Duration,
    /// Destroy existing backend resources before (re)creating them
    pub erase_before_run: bool,
    /// Run backends concurrently instead of one after another
    pub parallel: bool,
}

impl Default for RunnerOptions {
    fn default() -> Self {
        Self {
            query_timeout: Duration::from_secs(600),
            erase_before_run: true,
            parallel: false,
        }
    }
}

impl RunnerOptions {
    /// Set the per-query timeout.
    pub fn query_timeout(mut self, timeout: Duration) -> Self {
        self.query_timeout = timeout;
        self
    }

    /// Set erase-before-run.
    pub fn erase_before_run(mut self, erase: bool) -> Self {
        self.erase_before_run = erase;
        self
    }

    /// Enable or disable concurrent backends.
    pub fn parallel(mut self, parallel: bool) -> Self {
        self.parallel = parallel;
        self
    }
}

impl From<&RunParameters> for RunnerOptions {
    fn from(params: &RunParameters) -> Self {
        Self {
            query_timeout: params.query_timeout(),
            erase_before_run: params.erase_before_run,
            parallel: params.parallel,
        }
    }
}

/// The read-only inputs of a run: corpus, queries and their ground truth.
#[derive(Debug, Clone)]
pub struct Workload {
    /// Indexed vectors
    pub corpus: Corpus,
    /// Query vectors
    pub queries: QuerySet,
    /// Exact neighbors of every query
    pub ground_truth: GroundTruthSet,
}

impl Workload {
    /// Generate corpus and queries from `params` and compute ground truth once.
    pub fn generate(params: &RunParameters) -> HarnessResult<Self> {
        params.validate()?;
        let corpus = generate_corpus(params.num_vectors, params.dimension, params.seed)?;
        let queries = generate_queries(params.num_queries, params.dimension, params.seed)?;

        let start = Instant::now();
        let ground_truth = compute_ground_truth(&corpus, &queries, params.k)?;
        info!(
            vectors = corpus.len(),
            queries = queries.len(),
            dimension = corpus.dimension(),
            k = params.k,
            elapsed_secs = start.elapsed().as_secs_f64(),
            "Generated workload"
        );

        Ok(Self {
            corpus,
            queries,
            ground_truth,
        })
    }

    /// Vector dimension.
    pub fn dimension(&self) -> usize {
        self.corpus.dimension()
    }

    /// Neighbors per query.
    pub fn k(&self) -> usize {
        self.ground_truth.k()
    }
}

/// Timings and precision of a completed pipeline.
struct Measurement {
    store_time: Duration,
    query_time: Duration,
    precision: f64,
}

/// Positions of `configs` grouped by `(kind, table_name)`, groups in order of
/// first appearance, positions ascending within each group.
fn table_groups(configs: &[BackendConfig]) -> Vec<Vec<usize>> {
    let mut groups: Vec<Vec<usize>> = Vec::new();
    let mut slots: HashMap<(BackendKind, &str), usize> = HashMap::new();
    for (i, config) in configs.iter().enumerate() {
        let slot = *slots
            .entry((config.kind, config.table_name.as_str()))
            .or_insert_with(|| {
                groups.push(Vec::new());
                groups.len() - 1
            });
        groups[slot].push(i);
    }
    groups
}

/// Runs backends and fills a [`Leaderboard`].
#[derive(Debug, Clone)]
pub struct BenchmarkRunner {
    registry: AdapterRegistry,
    options: RunnerOptions,
}

impl BenchmarkRunner {
    /// Create a runner over `registry`.
    pub fn new(registry: AdapterRegistry, options: RunnerOptions) -> Self {
        Self { registry, options }
    }

    /// The runner's options.
    pub fn options(&self) -> &RunnerOptions {
        &self.options
    }

    /// Benchmark `configs`, in order, against one workload.
    ///
    /// # Errors
    ///
    /// Only configuration-class errors: `InvalidParameter` (e.g. `k > N`,
    /// ground truth that does not match the queries, duplicate names),
    /// `Config`, or `UnrecognizedBackend`. Backend failures are recorded in
    /// the leaderboard instead.
    pub async fn run(
        &self,
        configs: &[BackendConfig],
        corpus: &Corpus,
        queries: &QuerySet,
        ground_truth: &GroundTruthSet,
        k: usize,
    ) -> HarnessResult<Leaderboard> {
        self.validate(configs, corpus, queries, ground_truth, k)?;

        let results: Vec<BenchmarkResult> = if self.options.parallel {
            let lanes = join_all(table_groups(configs).into_iter().map(|lane| async move {
                let mut done = Vec::with_capacity(lane.len());
                for i in lane {
                    let result = self
                        .run_backend(&configs[i], corpus, queries, ground_truth, k)
                        .await;
                    done.push((i, result));
                }
                done
            }))
            .await;

            let mut indexed: Vec<(usize, BenchmarkResult)> = lanes.into_iter().flatten().collect();
            indexed.sort_by_key(|(i, _)| *i);
            indexed.into_iter().map(|(_, result)| result).collect()
        } else {
            let mut results = Vec::with_capacity(configs.len());
            for config in configs {
                results.push(
                    self.run_backend(config, corpus, queries, ground_truth, k)
                        .await,
                );
            }
            results
        };

        let mut leaderboard = Leaderboard::new();
        for (config, result) in configs.iter().zip(results) {
            leaderboard.record(config.name.clone(), result)?;
        }
        Ok(leaderboard)
    }

    /// [`run`](Self::run) against a prepared [`Workload`].
    pub async fn run_workload(
        &self,
        configs: &[BackendConfig],
        workload: &Workload,
    ) -> HarnessResult<Leaderboard> {
        self.run(
            configs,
            &workload.corpus,
            &workload.queries,
            &workload.ground_truth,
            workload.k(),
        )
        .await
    }

    /// Validate `config`, generate its workload, and run its selected
    /// comparisons with options taken from its parameters.
    pub async fn run_config(
        registry: AdapterRegistry,
        config: &BenchmarkConfig,
    ) -> HarnessResult<Leaderboard> {
        config.validate()?;
        let configs = config.selected()?;
        for backend in &configs {
            registry.check(backend)?;
        }

        let workload = Workload::generate(&config.parameters)?;
        let runner = BenchmarkRunner::new(registry, RunnerOptions::from(&config.parameters));
        runner.run_workload(&configs, &workload).await
    }

    fn validate(
        &self,
        configs: &[BackendConfig],
        corpus: &Corpus,
        queries: &QuerySet,
        ground_truth: &GroundTruthSet,
        k: usize,
    ) -> HarnessResult<()> {
        if k == 0 || k > corpus.len() {
            return Err(HarnessError::invalid(format!(
                "k ({k}) must be in 1..={}",
                corpus.len()
            )));
        }
        if queries.dimension() != corpus.dimension() {
            return Err(HarnessError::invalid(format!(
                "query dimension {} differs from corpus dimension {}",
                queries.dimension(),
                corpus.dimension()
            )));
        }
        if ground_truth.len() != queries.len() || ground_truth.k() != k {
            return Err(HarnessError::invalid(format!(
                "ground truth covers {} queries at k={}, run has {} queries at k={k}",
                ground_truth.len(),
                ground_truth.k(),
                queries.len()
            )));
        }

        let mut names = HashSet::new();
        for config in configs {
            config.validate()?;
            if !names.insert(config.name.as_str()) {
                return Err(HarnessError::invalid(format!(
                    "comparison '{}' is configured more than once",
                    config.name
                )));
            }
            self.registry.check(config)?;
        }
        Ok(())
    }

    /// One backend's whole pipeline. Never fails: errors become the result.
    async fn run_backend(
        &self,
        config: &BackendConfig,
        corpus: &Corpus,
        queries: &QuerySet,
        ground_truth: &GroundTruthSet,
        k: usize,
    ) -> BenchmarkResult {
        let dimension = corpus.dimension();
        info!(backend = %config.name, kind = %config.kind, "Running benchmark");

        if !config.supports_dimension(dimension) {
            warn!(
                backend = %config.name,
                dimension,
                max_dimension = config.max_dimension,
                "Skipping: vector size is greater than max dimension"
            );
            return BenchmarkResult::skipped(format!(
                "dimension {dimension} exceeds max_dimension {}",
                config.max_dimension
            ));
        }

        let mut adapter = match self.registry.create(config) {
            Ok(adapter) => adapter,
            Err(e) => return BenchmarkResult::failed(e.to_string()),
        };

        let outcome = self
            .drive(adapter.as_mut(), config, corpus, queries, ground_truth, k)
            .await;

        if let Err(e) = adapter.teardown().await {
            warn!(backend = %config.name, error = %e, "Teardown failed");
        }

        match outcome {
            Ok(m) => {
                info!(
                    backend = %config.name,
                    store_time_secs = m.store_time.as_secs_f64(),
                    query_time_secs = m.query_time.as_secs_f64(),
                    precision = m.precision,
                    "Benchmark completed"
                );
                BenchmarkResult::completed(
                    m.store_time.as_secs_f64(),
                    m.query_time.as_secs_f64(),
                    m.precision,
                )
            }
            Err(e @ HarnessError::DimensionExceeded { .. }) => {
                warn!(backend = %config.name, error = %e, "Backend skipped");
                BenchmarkResult::skipped(e.to_string())
            }
            Err(e) => {
                warn!(backend = %config.name, error = %e, "Backend failed");
                BenchmarkResult::failed(e.to_string())
            }
        }
    }

    async fn drive(
        &self,
        adapter: &mut dyn BackendAdapter,
        config: &BackendConfig,
        corpus: &Corpus,
        queries: &QuerySet,
        ground_truth: &GroundTruthSet,
        k: usize,
    ) -> HarnessResult<Measurement> {
        adapter
            .prepare(config, corpus.dimension(), self.options.erase_before_run)
            .await?;

        let store_time = adapter.store(corpus).await?;
        info!(
            backend = %config.name,
            vectors = corpus.len(),
            store_time_secs = store_time.as_secs_f64(),
            "Stored vectors"
        );

        let timeout = self.options.query_timeout;
        let mut scorer = PrecisionScorer::new(k);
        let mut query_time = Duration::ZERO;

        for (i, query) in queries.iter().enumerate() {
            let truth = ground_truth
                .get(i)
                .ok_or_else(|| HarnessError::invalid(format!("no ground truth for query {i}")))?;

            let start = Instant::now();
            let answer = tokio::time::timeout(timeout, adapter.query(query, k, timeout)).await;
            query_time += start.elapsed();

            let ids = match answer {
                Ok(Ok(ids)) => ids,
                Ok(Err(e)) => return Err(e.at_query(i)),
                Err(_) => {
                    return Err(HarnessError::QueryTimeout {
                        backend: config.name.clone(),
                        query_index: i,
                        timeout,
                    });
                }
            };

            let hits = scorer.record(&ids, truth);
            debug!(backend = %config.name, query = i, returned = ids.len(), hits, "Query scored");
        }

        info!(
            backend = %config.name,
            queries = queries.len(),
            query_time_secs = query_time.as_secs_f64(),
            precision = scorer.precision(),
            "Precision@{k}: {:.4}",
            scorer.precision()
        );

        Ok(Measurement {
            store_time,
            query_time,
            precision: scorer.precision(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapter::MemoryCatalog;
    use crate::config::{BackendKind, IndexMethod};

    fn memory(name: &str, max_dimension: usize, index_kind: &str) -> BackendConfig {
        BackendConfig::new(
            name,
            BackendKind::Memory,
            max_dimension,
            format!("table_{name}"),
            IndexMethod::new("vector", "l2", index_kind),
        )
    }

    fn small_workload() -> Workload {
        Workload::generate(&RunParameters {
            dimension: 8,
            num_vectors: 120,
            num_queries: 15,
            k: 5,
            ..RunParameters::default()
        })
        .unwrap()
    }

    fn runner() -> BenchmarkRunner {
        BenchmarkRunner::new(
            AdapterRegistry::with_memory(MemoryCatalog::new()),
            RunnerOptions::default(),
        )
    }

    #[tokio::test]
    async fn test_flat_backend_scores_perfectly() {
        let workload = small_workload();
        let board = runner()
            .run_workload(&[memory("flat", 64, "flat")], &workload)
            .await
            .unwrap();
        let result = board.get("flat").unwrap();
        assert!(result.status.is_completed());
        assert_eq!(result.precision, 1.0);
        assert!(result.query_time_seconds >= 0.0);
    }

    #[tokio::test]
    async fn test_skip_does_not_block_later_backends() {
        let workload = small_workload();
        let configs = [memory("narrow", 4, "flat"), memory("wide", 64, "hnsw")];
        let board = runner().run_workload(&configs, &workload).await.unwrap();

        assert_eq!(board.get("narrow").unwrap().status.label(), "skipped");
        assert!(board.get("wide").unwrap().status.is_completed());
    }

    #[tokio::test]
    async fn test_setup_failure_is_isolated() {
        let workload = small_workload();
        let configs = [memory("bad", 64, "ivfflat"), memory("good", 64, "flat")];
        let board = runner().run_workload(&configs, &workload).await.unwrap();

        assert_eq!(board.get("bad").unwrap().status.label(), "failed");
        assert_eq!(board.get("good").unwrap().precision, 1.0);
    }

    #[tokio::test]
    async fn test_unregistered_kind_is_fatal() {
        let workload = small_workload();
        let mut pg = memory("pg", 64, "hnsw");
        pg.kind = BackendKind::Pgvector;
        let err = runner()
            .run_workload(&[memory("flat", 64, "flat"), pg], &workload)
            .await
            .unwrap_err();
        assert!(matches!(err, HarnessError::UnrecognizedBackend { .. }));
    }

    #[tokio::test]
    async fn test_duplicate_names_rejected() {
        let workload = small_workload();
        let err = runner()
            .run_workload(
                &[memory("a", 64, "flat"), memory("a", 64, "hnsw")],
                &workload,
            )
            .await
            .unwrap_err();
        assert!(matches!(err, HarnessError::InvalidParameter { .. }));
    }

    #[tokio::test]
    async fn test_mismatched_k_rejected() {
        let workload = small_workload();
        let err = runner()
            .run(
                &[memory("a", 64, "flat")],
                &workload.corpus,
                &workload.queries,
                &workload.ground_truth,
                3,
            )
            .await
            .unwrap_err();
        assert!(matches!(err, HarnessError::InvalidParameter { .. }));
    }

    #[tokio::test]
    async fn test_parallel_matches_sequential_precision() {
        let workload = small_workload();
        let configs = [
            memory("flat", 64, "flat"),
            memory("hnsw", 64, "hnsw"),
            memory("narrow", 4, "flat"),
        ];

        let sequential = runner().run_workload(&configs, &workload).await.unwrap();
        let parallel = BenchmarkRunner::new(
            AdapterRegistry::with_memory(MemoryCatalog::new()),
            RunnerOptions::default().parallel(true),
        )
        .run_workload(&configs, &workload)
        .await
        .unwrap();

        for config in &configs {
            let a = sequential.get(&config.name).unwrap();
            let b = parallel.get(&config.name).unwrap();
            assert_eq!(a.precision, b.precision);
            assert_eq!(a.status, b.status);
        }
        let order: Vec<&str> = parallel.iter().map(|(n, _)| n).collect();
        assert_eq!(order, vec!["flat", "hnsw", "narrow"]);
    }

    #[test]
    fn test_table_groups() {
        let at = |name: &str, kind: BackendKind, table: &str| {
            BackendConfig::new(name, kind, 8, table, IndexMethod::new("vector", "l2", "flat"))
        };
        let configs = [
            at("a", BackendKind::Memory, "vectors"),
            at("b", BackendKind::Memory, "other"),
            at("c", BackendKind::Memory, "vectors"),
            at("d", BackendKind::Pgvector, "vectors"),
        ];
        assert_eq!(table_groups(&configs), vec![vec![0, 2], vec![1], vec![3]]);
    }

    #[tokio::test]
    async fn test_parallel_shared_table_matches_sequential() {
        let workload = small_workload();
        let shared = |name: &str, index_kind: &str| {
            BackendConfig::new(
                name,
                BackendKind::Memory,
                64,
                "vectors",
                IndexMethod::new("vector", "l2", index_kind),
            )
        };
        let configs = [
            shared("a", "flat"),
            shared("b", "flat"),
            memory("c", 64, "hnsw"),
            shared("d", "hnsw"),
        ];

        for erase in [true, false] {
            let options = RunnerOptions::default().erase_before_run(erase);
            let sequential = BenchmarkRunner::new(
                AdapterRegistry::with_memory(MemoryCatalog::new()),
                options,
            )
            .run_workload(&configs, &workload)
            .await
            .unwrap();
            let parallel = BenchmarkRunner::new(
                AdapterRegistry::with_memory(MemoryCatalog::new()),
                options.parallel(true),
            )
            .run_workload(&configs, &workload)
            .await
            .unwrap();

            for config in &configs {
                let a = sequential.get(&config.name).unwrap();
                let b = parallel.get(&config.name).unwrap();
                assert_eq!(a.status, b.status, "{} erase={erase}", config.name);
                assert_eq!(a.precision, b.precision);
            }
            assert!(parallel.get("b").unwrap().status.is_completed());
        }
    }

    #[tokio::test]
    async fn test_erase_run_leaves_no_tables() {
        let workload = small_workload();
        let catalog = MemoryCatalog::new();
        BenchmarkRunner::new(
            AdapterRegistry::with_memory(catalog.clone()),
            RunnerOptions::default(),
        )
        .run_workload(&[memory("flat", 64, "flat")], &workload)
        .await
        .unwrap();
        assert!(catalog.table_info("table_flat").is_none());

        BenchmarkRunner::new(
            AdapterRegistry::with_memory(catalog.clone()),
            RunnerOptions::default().erase_before_run(false),
        )
        .run_workload(&[memory("flat", 64, "flat")], &workload)
        .await
        .unwrap();
        assert_eq!(catalog.table_info("table_flat").unwrap().rows, 120);
    }

    #[tokio::test]
    async fn test_run_config_end_to_end() {
        let mut config = BenchmarkConfig::default();
        config.parameters.dimension = 16;
        config.parameters.num_vectors = 100;
        config.parameters.num_queries = 10;
        config.parameters.k = 5;

        let board = BenchmarkRunner::run_config(
            AdapterRegistry::with_memory(MemoryCatalog::new()),
            &config,
        )
        .await
        .unwrap();
        assert_eq!(board.len(), config.comparisons_to_run.len());
        assert_eq!(board.get("memory_flat_vector_l2").unwrap().precision, 1.0);
    }

    #[test]
    fn test_options_from_parameters() {
        let params = RunParameters {
            query_timeout_secs: 3,
            erase_before_run: false,
            parallel: true,
            ..RunParameters::default()
        };
        let options = RunnerOptions::from(&params);
        assert_eq!(options.query_timeout, Duration::from_secs(3));
        assert!(!options.erase_before_run);
        assert!(options.parallel);
    }
}

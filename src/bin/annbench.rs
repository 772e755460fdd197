//! annbench CLI - benchmark ANN backends from the command line
//!
//! Usage:
//!   annbench run [--config FILE] [--only NAME]...   - Run comparisons, print the leaderboard
//!   annbench comparisons [--config FILE]           - List configured comparisons
//!   annbench init-config <FILE>                     - Write the default configuration

use anyhow::{Context, Result};
use annbench::prelude::*;
use clap::{Parser, Subcommand};
use colored::*;
use std::path::{Path, PathBuf};
use tracing_subscriber::EnvFilter;

/// annbench - compare vector-search backends on precision and latency
#[derive(Parser)]
#[command(name = "annbench")]
#[command(version, about, long_about = None)]
struct Cli {
    /// Benchmark configuration file (JSON). Built-in defaults when omitted.
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Log at debug level (overridden by RUST_LOG)
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the configured comparisons and print the leaderboard
    ///
    /// Examples:
    ///   annbench run
    ///   annbench run --dimension 256 --vectors 5000 -k 10
    ///   annbench run --only memory_hnsw_vector_l2 --json report.json
    Run {
        /// Vector dimension
        #[arg(long)]
        dimension: Option<usize>,

        /// Number of corpus vectors
        #[arg(long)]
        vectors: Option<usize>,

        /// Number of queries
        #[arg(long)]
        queries: Option<usize>,

        /// Neighbors per query
        #[arg(short)]
        k: Option<usize>,

        /// Seed for data generation
        #[arg(long)]
        seed: Option<u64>,

        /// Per-query timeout in seconds
        #[arg(long)]
        timeout: Option<u64>,

        /// Run only these comparisons (repeatable, in order)
        #[arg(long)]
        only: Vec<String>,

        /// Run backends concurrently
        #[arg(long)]
        parallel: bool,

        /// Keep existing backend tables instead of recreating them
        #[arg(long)]
        no_erase: bool,

        /// Also write the leaderboard as JSON to this file
        #[arg(long)]
        json: Option<PathBuf>,
    },

    /// List configured comparisons and whether they can run here
    Comparisons,

    /// Write the default configuration to a file
    InitConfig {
        /// Destination path
        path: PathBuf,
    },
}

fn init_tracing(verbose: bool) {
    let default = if verbose { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

fn load_config(path: Option<&Path>) -> Result<BenchmarkConfig> {
    match path {
        Some(path) => BenchmarkConfig::load(path)
            .with_context(|| format!("Failed to load config from {}", path.display())),
        None => Ok(BenchmarkConfig::default()),
    }
}

fn print_leaderboard(leaderboard: &Leaderboard) {
    println!();
    println!("{}", "Leaderboard:".bold());
    for (i, line) in leaderboard.render().lines().enumerate() {
        if i == 0 {
            println!("{}", line.bold());
        } else if line.contains("failed (") {
            println!("{}", line.red());
        } else if line.contains("skipped (") {
            println!("{}", line.yellow());
        } else {
            println!("{line}");
        }
    }
}

#[allow(clippy::too_many_arguments)]
async fn run(
    mut config: BenchmarkConfig,
    dimension: Option<usize>,
    vectors: Option<usize>,
    queries: Option<usize>,
    k: Option<usize>,
    seed: Option<u64>,
    timeout: Option<u64>,
    only: Vec<String>,
    parallel: bool,
    no_erase: bool,
    json: Option<PathBuf>,
) -> Result<()> {
    let params = &mut config.parameters;
    if let Some(d) = dimension {
        params.dimension = d;
    }
    if let Some(n) = vectors {
        params.num_vectors = n;
    }
    if let Some(q) = queries {
        params.num_queries = q;
    }
    if let Some(k) = k {
        params.k = k;
    }
    if let Some(s) = seed {
        params.seed = s;
    }
    if let Some(t) = timeout {
        params.query_timeout_secs = t;
    }
    params.parallel |= parallel;
    if no_erase {
        params.erase_before_run = false;
    }
    if !only.is_empty() {
        config = config.only(only);
    }

    let registry = AdapterRegistry::with_memory(MemoryCatalog::new());
    let leaderboard = BenchmarkRunner::run_config(registry, &config)
        .await
        .context("Benchmark run aborted")?;

    print_leaderboard(&leaderboard);

    if let Some(path) = json {
        let report = leaderboard.to_json()?;
        std::fs::write(&path, report)
            .with_context(|| format!("Failed to write report to {}", path.display()))?;
        println!();
        println!("  Report: {}", path.display().to_string().cyan());
    }
    Ok(())
}

fn list_comparisons(config: &BenchmarkConfig) {
    let registry = AdapterRegistry::with_memory(MemoryCatalog::new());
    let selected: Vec<&String> = config.comparisons_to_run.iter().collect();

    println!("{}", "Comparisons:".bold());
    for (name, backend) in &config.comparisons {
        let marker = if selected.contains(&name) {
            "*".green().bold()
        } else {
            " ".normal()
        };
        let available = if registry.supports(backend.kind) {
            "available".green()
        } else {
            "no adapter".bright_black()
        };
        println!(
            "  {} {:<36} {:<11} max_dim={:<6} {}/{}/{}  {}",
            marker,
            name.cyan(),
            backend.kind.as_str(),
            backend.max_dimension,
            backend.method.engine,
            backend.method.space_type,
            backend.method.index_kind,
            available
        );
    }
    println!();
    println!("  {} = in run list", "*".green().bold());
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    let config = load_config(cli.config.as_deref())?;

    match cli.command {
        Commands::Run {
            dimension,
            vectors,
            queries,
            k,
            seed,
            timeout,
            only,
            parallel,
            no_erase,
            json,
        } => {
            run(
                config, dimension, vectors, queries, k, seed, timeout, only, parallel, no_erase,
                json,
            )
            .await
        }

        Commands::Comparisons => {
            list_comparisons(&config);
            Ok(())
        }

        Commands::InitConfig { path } => {
            config
                .save(&path)
                .with_context(|| format!("Failed to write config to {}", path.display()))?;
            println!("{}", "OK".green().bold());
            println!("  Wrote: {}", path.display().to_string().cyan());
            Ok(())
        }
    }
}

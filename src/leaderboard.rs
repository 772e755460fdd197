//! Per-backend results and their ranked report.
//!
//! Every backend that a run attempts gets exactly one entry, whatever its
//! outcome. Ranking puts `Completed` entries first, ordered by ascending
//! query time; `Skipped` and `Failed` entries follow in the order they were
//! configured. Their timing columns are printed as `-`.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::error::{HarnessError, HarnessResult};

/// Outcome of one backend's run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum BenchmarkStatus {
    /// Stored and queried everything
    Completed,
    /// Not attempted (e.g. dimension above the backend's limit)
    Skipped {
        /// Why it was skipped
        reason: String,
    },
    /// Attempted and failed; timings and precision are not counted
    Failed {
        /// The error that stopped it
        reason: String,
    },
}

impl BenchmarkStatus {
    /// Short label for reports.
    pub fn label(&self) -> &'static str {
        match self {
            BenchmarkStatus::Completed => "completed",
            BenchmarkStatus::Skipped { .. } => "skipped",
            BenchmarkStatus::Failed { .. } => "failed",
        }
    }

    /// Skip or failure reason, if any.
    pub fn reason(&self) -> Option<&str> {
        match self {
            BenchmarkStatus::Completed => None,
            BenchmarkStatus::Skipped { reason } | BenchmarkStatus::Failed { reason } => {
                Some(reason)
            }
        }
    }

    /// Whether the backend ran to completion.
    pub fn is_completed(&self) -> bool {
        matches!(self, BenchmarkStatus::Completed)
    }
}

/// Timing and precision of one backend.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BenchmarkResult {
    /// Wall-clock seconds to store the corpus
    pub store_time_seconds: f64,
    /// Wall-clock seconds summed over all queries
    pub query_time_seconds: f64,
    /// Precision@K in `[0, 1]`
    pub precision: f64,
    /// Outcome
    #[serde(flatten)]
    pub status: BenchmarkStatus,
}

impl BenchmarkResult {
    fn zero(status: BenchmarkStatus) -> Self {
        Self {
            store_time_seconds: 0.0,
            query_time_seconds: 0.0,
            precision: 0.0,
            status,
        }
    }

    /// A finished run. Precision is clamped into `[0, 1]`.
    pub fn completed(store_time_seconds: f64, query_time_seconds: f64, precision: f64) -> Self {
        Self {
            store_time_seconds,
            query_time_seconds,
            precision: precision.clamp(0.0, 1.0),
            status: BenchmarkStatus::Completed,
        }
    }

    /// A backend that was not attempted.
    pub fn skipped(reason: impl Into<String>) -> Self {
        Self::zero(BenchmarkStatus::Skipped {
            reason: reason.into(),
        })
    }

    /// A backend whose pipeline failed.
    pub fn failed(reason: impl Into<String>) -> Self {
        Self::zero(BenchmarkStatus::Failed {
            reason: reason.into(),
        })
    }
}

/// A ranked row.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RankedEntry<'a> {
    /// 1-based position
    pub rank: usize,
    /// Comparison name
    pub name: &'a str,
    /// Its result
    #[serde(flatten)]
    pub result: &'a BenchmarkResult,
}

/// Order results: completed by ascending query time, then the rest.
///
/// The sort is stable, so equal query times and all non-completed entries
/// keep their input order.
pub fn rank<'a>(results: &'a [(String, BenchmarkResult)]) -> Vec<RankedEntry<'a>> {
    let mut ordered: Vec<&(String, BenchmarkResult)> = results.iter().collect();
    ordered.sort_by(|(_, a), (_, b)| {
        match (a.status.is_completed(), b.status.is_completed()) {
            (true, true) => a.query_time_seconds.total_cmp(&b.query_time_seconds),
            (true, false) => std::cmp::Ordering::Less,
            (false, true) => std::cmp::Ordering::Greater,
            (false, false) => std::cmp::Ordering::Equal,
        }
    });
    ordered
        .into_iter()
        .enumerate()
        .map(|(i, (name, result))| RankedEntry {
            rank: i + 1,
            name,
            result,
        })
        .collect()
}

/// Backend name -> result, in the order backends were configured.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Leaderboard {
    entries: Vec<(String, BenchmarkResult)>,
}

#[derive(Serialize)]
struct Report<'a> {
    generated_at: DateTime<Utc>,
    entries: Vec<RankedEntry<'a>>,
}

impl Leaderboard {
    /// Create an empty leaderboard.
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a backend's result. Each name is written once.
    ///
    /// # Errors
    ///
    /// `InvalidParameter` if `name` already has a result.
    pub fn record(&mut self, name: impl Into<String>, result: BenchmarkResult) -> HarnessResult<()> {
        let name = name.into();
        if self.get(&name).is_some() {
            return Err(HarnessError::invalid(format!(
                "result for '{name}' already recorded"
            )));
        }
        self.entries.push((name, result));
        Ok(())
    }

    /// Result for `name`.
    pub fn get(&self, name: &str) -> Option<&BenchmarkResult> {
        self.entries
            .iter()
            .find(|(n, _)| n == name)
            .map(|(_, r)| r)
    }

    /// Number of entries.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether there are no entries.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Entries in recording order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &BenchmarkResult)> {
        self.entries.iter().map(|(n, r)| (n.as_str(), r))
    }

    /// Entries in rank order.
    pub fn ranked(&self) -> Vec<RankedEntry<'_>> {
        rank(&self.entries)
    }

    /// Fixed-column text report.
    pub fn render(&self) -> String {
        let mut out = format!(
            "{:<40} {:<15} {:<15} {:<15} {}\n",
            "Comparison", "Store Time (s)", "Query Time (s)", "Precision", "Status"
        );
        for entry in self.ranked() {
            let r = entry.result;
            let line = match &r.status {
                BenchmarkStatus::Completed => format!(
                    "{:<40} {:<15.2} {:<15.2} {:<15.4} {}",
                    entry.name, r.store_time_seconds, r.query_time_seconds, r.precision, "completed"
                ),
                other => format!(
                    "{:<40} {:<15} {:<15} {:<15} {} ({})",
                    entry.name,
                    "-",
                    "-",
                    "-",
                    other.label(),
                    other.reason().unwrap_or_default()
                ),
            };
            out.push_str(line.trim_end());
            out.push('\n');
        }
        out
    }

    /// Machine-readable report in rank order.
    pub fn to_json(&self) -> HarnessResult<String> {
        let report = Report {
            generated_at: Utc::now(),
            entries: self.ranked(),
        };
        Ok(serde_json::to_string_pretty(&report)?)
    }
}

impl fmt::Display for Leaderboard {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.render())
    }
}

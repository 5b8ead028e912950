// SPDX-License-Identifier: AGPL-3.0-or-later
// SPDX-FileCopyrightText: 2025 Jonathan D.A. Jewell
//! Analysis report - the immutable artifact of one engine run
//!
//! Once assembled the report is read-only: consumers get borrowing
//! accessors, never mutable handles, so a rendered report can be
//! serialized or inspected repeatedly with identical results.

use crate::types::{CacheSource, Issue, RepositoryFacts, RepositoryScore, StorageBreakdown};
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::BTreeMap;
use std::time::Duration;

/// One repository's facts and derived scores
#[derive(Debug, Clone, Serialize)]
pub struct RepositoryReport {
    facts: RepositoryFacts,
    score: RepositoryScore,
    cache_source: CacheSource,
}

impl RepositoryReport {
    /// Assemble one per-repository entry
    #[must_use]
    pub fn new(facts: RepositoryFacts, score: RepositoryScore, cache_source: CacheSource) -> Self {
        Self {
            facts,
            score,
            cache_source,
        }
    }

    /// Observed facts
    #[must_use]
    pub fn facts(&self) -> &RepositoryFacts {
        &self.facts
    }

    /// Derived scores
    #[must_use]
    pub fn score(&self) -> &RepositoryScore {
        &self.score
    }

    /// Whether the facts were collected this run or reused from cache
    #[must_use]
    pub fn cache_source(&self) -> CacheSource {
        self.cache_source
    }
}

/// Aggregates computed over the whole fleet
#[derive(Debug, Clone, Default, Serialize)]
pub struct FleetStats {
    /// Number of repositories analyzed
    pub repositories: usize,
    /// Commits across the fleet
    pub total_commits: u64,
    /// Storage across the fleet, all classes
    pub total_storage_bytes: u64,
    /// Storage across the fleet, broken down by class
    pub storage: StorageBreakdown,
    /// Repositories with activity in the last 90 days
    pub active_last_90_days: usize,
    /// Repositories with a CI configuration
    pub with_ci_config: usize,
    /// Repositories without a responsible owner
    pub without_owner: usize,
    /// Mean health score, 0 for an empty fleet
    pub mean_health: f64,
    /// Mean maintenance score, 0 for an empty fleet
    pub mean_maintenance: f64,
    /// Repository count per primary language
    pub languages: BTreeMap<String, usize>,
}

/// Operational summary of the run that produced a report
#[derive(Debug, Clone, Serialize)]
pub struct RunSummary {
    /// Repositories collected fresh from the origin
    pub collected: usize,
    /// Repositories served from the snapshot cache
    pub reused: usize,
    /// Repositories whose collection failed terminally
    pub failed: usize,
    /// True when cancellation or failures left the run incomplete
    pub partial: bool,
    /// Wall-clock duration of the run
    pub elapsed: Duration,
}

/// The complete, immutable result of one analysis run
#[derive(Debug, Clone, Serialize)]
pub struct AnalysisReport {
    generated_at: DateTime<Utc>,
    repositories: Vec<RepositoryReport>,
    fleet: FleetStats,
    issues: Vec<Issue>,
    summary: RunSummary,
}

impl AnalysisReport {
    /// Assemble a report from per-repository entries and detected issues
    ///
    /// Entries are sorted by identifier and fleet aggregates derived
    /// here, so assembly from the same inputs always yields the same
    /// report regardless of collection completion order.
    #[must_use]
    pub fn assemble(
        mut repositories: Vec<RepositoryReport>,
        issues: Vec<Issue>,
        summary: RunSummary,
        now: DateTime<Utc>,
    ) -> Self {
        repositories.sort_by(|a, b| a.facts.id.cmp(&b.facts.id));
        let fleet = fleet_stats(&repositories, now);
        Self {
            generated_at: now,
            repositories,
            fleet,
            issues,
            summary,
        }
    }

    /// When the report was generated
    #[must_use]
    pub fn generated_at(&self) -> DateTime<Utc> {
        self.generated_at
    }

    /// Per-repository entries, sorted by identifier
    #[must_use]
    pub fn repositories(&self) -> &[RepositoryReport] {
        &self.repositories
    }

    /// Fleet-wide aggregates
    #[must_use]
    pub fn fleet(&self) -> &FleetStats {
        &self.fleet
    }

    /// Ranked issue list, most severe first
    #[must_use]
    pub fn issues(&self) -> &[Issue] {
        &self.issues
    }

    /// Operational run summary
    #[must_use]
    pub fn summary(&self) -> &RunSummary {
        &self.summary
    }

    /// Render the report as pretty JSON
    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string_pretty(self)
    }
}

#[allow(clippy::cast_precision_loss)]
fn fleet_stats(repositories: &[RepositoryReport], now: DateTime<Utc>) -> FleetStats {
    let mut stats = FleetStats {
        repositories: repositories.len(),
        ..FleetStats::default()
    };

    for entry in repositories {
        stats.total_commits += entry.facts.commit_count;
        stats.total_storage_bytes += entry.facts.storage.total();
        stats.storage.repository_bytes += entry.facts.storage.repository_bytes;
        stats.storage.lfs_bytes += entry.facts.storage.lfs_bytes;
        stats.storage.artifacts_bytes += entry.facts.storage.artifacts_bytes;
        stats.storage.packages_bytes += entry.facts.storage.packages_bytes;
        stats.storage.container_registry_bytes +=
            entry.facts.storage.container_registry_bytes;
        if !entry.facts.has_owner {
            stats.without_owner += 1;
        }
        if entry
            .facts
            .days_since_activity(now)
            .is_some_and(|d| d <= 90)
        {
            stats.active_last_90_days += 1;
        }
        if entry.facts.has_ci_config {
            stats.with_ci_config += 1;
        }
        if let Some(language) = &entry.facts.primary_language {
            *stats.languages.entry(language.clone()).or_default() += 1;
        }
        stats.mean_health += entry.score.health;
        stats.mean_maintenance += entry.score.maintenance;
    }

    if !repositories.is_empty() {
        let n = repositories.len() as f64;
        stats.mean_health /= n;
        stats.mean_maintenance /= n;
    }

    stats
}

// SPDX-License-Identifier: AGPL-3.0-or-later
// SPDX-FileCopyrightText: 2025 Jonathan D.A. Jewell
//
//! Repofleet library - fleet-wide repository health metrics
//!
//! This crate provides the core functionality for analyzing a fleet of
//! repositories hosted on a GitLab-style platform: incremental fact
//! collection under concurrency and rate-limit constraints, snapshot
//! caching, pure score derivation, and ranked issue detection.

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

pub mod config;
pub mod engine;
pub mod gitlab;
pub mod issues;
pub mod planner;
pub mod pool;
pub mod provider;
pub mod report;
pub mod scoring;
pub mod snapshot;

/// Core data types for repository facts, cache entries, and issues
pub mod types {
    use chrono::{DateTime, Utc};
    use serde::{Deserialize, Serialize};
    use sha2::{Digest, Sha256};

    // =========================================================================
    // Repository Facts
    // =========================================================================

    /// Storage breakdown for one repository, all byte counts
    #[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
    pub struct StorageBreakdown {
        /// Bytes of git repository data
        pub repository_bytes: u64,
        /// Bytes of LFS objects
        pub lfs_bytes: u64,
        /// Bytes of CI job artifacts
        pub artifacts_bytes: u64,
        /// Bytes of published packages
        pub packages_bytes: u64,
        /// Bytes of container images
        pub container_registry_bytes: u64,
    }

    impl StorageBreakdown {
        /// Total bytes across all storage classes
        #[must_use]
        pub fn total(&self) -> u64 {
            self.repository_bytes
                + self.lfs_bytes
                + self.artifacts_bytes
                + self.packages_bytes
                + self.container_registry_bytes
        }
    }

    /// One pipeline execution outcome
    #[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
    pub struct PipelineRun {
        /// When the pipeline finished
        pub finished_at: DateTime<Utc>,
        /// Whether the pipeline succeeded
        pub success: bool,
        /// Wall-clock duration in seconds
        pub duration_secs: f64,
    }

    /// Observed, unscored attributes of a single repository
    #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
    pub struct RepositoryFacts {
        /// Stable unique identifier (path with namespace, e.g. `group/project`)
        pub id: String,
        /// Display name
        pub name: String,
        /// Total repository size in bytes
        pub size_bytes: u64,
        /// Storage breakdown by class
        #[serde(default)]
        pub storage: StorageBreakdown,
        /// Number of commits on the default branch
        pub commit_count: u64,
        /// Number of distinct contributors
        pub contributor_count: u64,
        /// Dominant language, if any code was detected
        #[serde(default)]
        pub primary_language: Option<String>,
        /// All detected languages, dominant first
        #[serde(default)]
        pub languages: Vec<String>,
        /// When the repository was created
        #[serde(default)]
        pub created_at: Option<DateTime<Utc>>,
        /// Most recent activity of any kind, absent for never-touched repos
        #[serde(default)]
        pub last_activity: Option<DateTime<Utc>>,
        /// Recent pipeline outcomes, newest first
        #[serde(default)]
        pub pipelines: Vec<PipelineRun>,
        /// Whether a CI configuration file is present
        #[serde(default)]
        pub has_ci_config: bool,
        /// Identifiers of repositories referenced as submodules (may dangle)
        #[serde(default)]
        pub submodules: Vec<String>,
        /// Whether the repository has a responsible owner
        #[serde(default)]
        pub has_owner: bool,
    }

    impl RepositoryFacts {
        /// Whole days since the last recorded activity, `None` if unknown
        #[must_use]
        pub fn days_since_activity(&self, now: DateTime<Utc>) -> Option<i64> {
            self.last_activity.map(|t| (now - t).num_days().max(0))
        }

        /// Commits per day since creation, 0 when unknown or brand new
        #[must_use]
        pub fn commit_frequency(&self, now: DateTime<Utc>) -> f64 {
            let Some(created) = self.created_at else {
                return 0.0;
            };
            let days = (now - created).num_days();
            if days <= 0 {
                return 0.0;
            }
            #[allow(clippy::cast_precision_loss)]
            {
                self.commit_count as f64 / days as f64
            }
        }
    }

    // =========================================================================
    // Cache Entries
    // =========================================================================

    /// How a cache entry was obtained in the most recent run
    #[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
    #[serde(rename_all = "lowercase")]
    pub enum CacheSource {
        /// Collected from the origin API during this run
        #[default]
        Fresh,
        /// Carried over unchanged from a previous run
        Reused,
    }

    /// A cached fact bundle with its collection timestamp
    ///
    /// Entries are overwritten whole on re-collection and never partially
    /// updated; a failed re-collection leaves the prior entry untouched.
    #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
    pub struct CacheEntry {
        /// The collected facts
        pub facts: RepositoryFacts,
        /// When the facts were collected from the origin
        pub collected_at: DateTime<Utc>,
        /// Fresh or reused marker for the current run
        #[serde(default)]
        pub source: CacheSource,
    }

    // =========================================================================
    // Scores
    // =========================================================================

    /// Derived, bounded scores for one repository
    ///
    /// All four scores lie in `[0, 100]` and are recomputed every run so
    /// that scoring-rule changes apply retroactively without re-collection.
    #[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
    pub struct RepositoryScore {
        /// Structural complexity (languages, submodules, size)
        pub complexity: f64,
        /// CI and activity health; exactly 0 without pipeline history
        pub health: f64,
        /// Recent-activity heat, decaying with staleness
        pub hotness: f64,
        /// Maintenance quality (ownership, bus factor, dormancy)
        pub maintenance: f64,
        /// Commits per day since creation
        pub commit_frequency: f64,
    }

    // =========================================================================
    // Issues
    // =========================================================================

    /// Severity of a fleet-wide issue
    ///
    /// Declaration order doubles as ranking order: `Critical` sorts first.
    #[derive(
        Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
    )]
    #[serde(rename_all = "lowercase")]
    pub enum Severity {
        /// Requires immediate operator attention
        Critical,
        /// Should be remediated soon
        High,
        /// Worth scheduling
        Medium,
    }

    /// Category of a detected issue
    #[derive(
        Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
    )]
    #[serde(rename_all = "snake_case")]
    pub enum IssueCategory {
        /// Oversized binary content without LFS
        StorageCrisis,
        /// Repositories with no owner or no recent activity
        Orphaned,
        /// Active repositories lacking CI configuration
        CiCoverageGap,
        /// Circular submodule references
        SubmoduleCycle,
    }

    /// An actionable fleet-wide finding
    ///
    /// Issues are derived and transient: fully recomputed on every run
    /// from the merged fact set, never partially updated.
    #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
    pub struct Issue {
        /// Content-hash identifier, stable for identical findings
        pub id: String,
        /// Detection rule that produced this issue
        pub category: IssueCategory,
        /// Ranking severity
        pub severity: Severity,
        /// Affected repository identifiers, sorted
        pub repositories: Vec<String>,
        /// Human-readable description
        pub description: String,
        /// Suggested remediation
        pub remediation: String,
        /// Estimated impact in bytes (reclaimable or wasted storage)
        pub impact_bytes: u64,
    }

    impl Issue {
        /// Generate a deterministic ID from category and affected repos
        #[must_use]
        pub fn generate_id(category: IssueCategory, repositories: &[String]) -> String {
            let mut hasher = Sha256::new();
            hasher.update(format!("{category:?}").as_bytes());
            for repo in repositories {
                hasher.update(repo.as_bytes());
                hasher.update(b"\0");
            }
            let hash = hex::encode(hasher.finalize());
            format!("issue:{}", &hash[..12])
        }
    }
}

/// Prelude for common imports
pub mod prelude {
    pub use crate::types::*;
    pub use anyhow::{Context, Result};
}

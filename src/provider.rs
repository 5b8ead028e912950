// SPDX-License-Identifier: AGPL-3.0-or-later
// SPDX-FileCopyrightText: 2025 Jonathan D.A. Jewell
//! Facts provider abstraction - the boundary to the origin platform

use crate::types::RepositoryFacts;
use chrono::{DateTime, Utc};
use std::future::Future;
use std::time::Duration;
use thiserror::Error;

/// Failure modes of a fact collection attempt
///
/// Rate-limit signals are kept distinct from generic transient failures
/// so the work pool can back off globally instead of merely retrying
/// the individual task.
#[derive(Debug, Error)]
pub enum FetchError {
    /// The origin asked us to slow down
    #[error("rate limited by origin{}", retry_after.map(|d| format!(" (retry after {}s)", d.as_secs())).unwrap_or_default())]
    RateLimited {
        /// Server-provided pause hint, if any
        retry_after: Option<Duration>,
    },

    /// Network or server hiccup worth retrying
    #[error("transient fetch failure: {0}")]
    Transient(String),

    /// The repository is gone or inaccessible; retrying will not help
    #[error("permanent fetch failure: {0}")]
    Permanent(String),
}

impl FetchError {
    /// Whether the work pool should retry this failure
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::RateLimited { .. } | Self::Transient(_))
    }
}

/// Source of per-repository facts
///
/// Implementations must be safely callable concurrently from multiple
/// workers; the engine only ever holds one instance behind an `Arc`.
pub trait FactsProvider: Send + Sync + 'static {
    /// List all repository identifiers visible to the configured credentials
    fn list_repositories(
        &self,
    ) -> impl Future<Output = Result<Vec<String>, FetchError>> + Send;

    /// Fetch the full fact bundle for one repository
    fn fetch(
        &self,
        id: &str,
    ) -> impl Future<Output = Result<RepositoryFacts, FetchError>> + Send;

    /// Cheap metadata pre-check: last known activity timestamp
    ///
    /// Used by the diff planner to decide whether a cached entry is
    /// stale. Returning `Ok(None)` or an error makes the planner fall
    /// back to re-collection.
    fn probe_last_activity(
        &self,
        id: &str,
    ) -> impl Future<Output = Result<Option<DateTime<Utc>>, FetchError>> + Send;
}

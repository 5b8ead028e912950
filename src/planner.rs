// SPDX-License-Identifier: AGPL-3.0-or-later
// SPDX-FileCopyrightText: 2025 Jonathan D.A. Jewell
//! Diff planner - decides per repository whether to re-collect or reuse

use crate::snapshot::Snapshot;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Whether a run may reuse cached entries or must re-collect everything
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RefreshMode {
    /// Reuse cache entries that pass the staleness check
    #[default]
    Incremental,
    /// Re-collect every candidate regardless of cache state
    Full,
}

/// Why a repository was classified as needing collection
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CollectReason {
    /// No cache entry exists for this repository
    CacheMiss,
    /// The operator requested a full refresh
    ForcedRefresh,
    /// Observed activity is newer than the cached collection timestamp
    StaleCache,
    /// The cheap metadata pre-check was unavailable; favor correctness
    ProbeUnavailable,
}

/// Per-repository classification
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlanDecision {
    /// Fetch fresh facts from the origin
    Collect(CollectReason),
    /// Keep the cached entry for this run
    Reuse,
}

/// The full collection plan for one run
#[derive(Debug, Clone, Default)]
pub struct RefreshPlan {
    /// Identifiers that must be collected, with the reason
    pub collect: Vec<(String, CollectReason)>,
    /// Identifiers whose cache entry is reused
    pub reuse: Vec<String>,
}

impl RefreshPlan {
    /// Identifiers needing collection, without reasons
    #[must_use]
    pub fn collect_ids(&self) -> Vec<String> {
        self.collect.iter().map(|(id, _)| id.clone()).collect()
    }
}

/// Classify every candidate as needs-collection or reuse-cache
///
/// Deterministic given identical inputs: the decision depends only on
/// the candidate list, the snapshot, the refresh mode, and the probe
/// results - no hidden global state. Probe results come from the
/// provider's cheap metadata pre-check, materialized into a map before
/// planning so this function stays synchronous and pure. A missing map
/// entry (or a probe that returned no timestamp) defaults the
/// repository to needs-collection.
#[must_use]
pub fn plan_refresh(
    candidates: &[String],
    snapshot: &Snapshot,
    mode: RefreshMode,
    probes: &HashMap<String, Option<DateTime<Utc>>>,
) -> RefreshPlan {
    let mut plan = RefreshPlan::default();

    for id in candidates {
        match decide(id, snapshot, mode, probes) {
            PlanDecision::Collect(reason) => plan.collect.push((id.clone(), reason)),
            PlanDecision::Reuse => plan.reuse.push(id.clone()),
        }
    }

    plan
}

fn decide(
    id: &str,
    snapshot: &Snapshot,
    mode: RefreshMode,
    probes: &HashMap<String, Option<DateTime<Utc>>>,
) -> PlanDecision {
    if mode == RefreshMode::Full {
        return PlanDecision::Collect(CollectReason::ForcedRefresh);
    }

    let Some(entry) = snapshot.get(id) else {
        return PlanDecision::Collect(CollectReason::CacheMiss);
    };

    match probes.get(id) {
        Some(Some(last_activity)) => {
            if *last_activity > entry.collected_at {
                PlanDecision::Collect(CollectReason::StaleCache)
            } else {
                PlanDecision::Reuse
            }
        }
        // Probe missing or inconclusive: favor correctness over speed.
        Some(None) | None => PlanDecision::Collect(CollectReason::ProbeUnavailable),
    }
}

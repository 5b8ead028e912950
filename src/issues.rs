// SPDX-License-Identifier: AGPL-3.0-or-later
// SPDX-FileCopyrightText: 2025 Jonathan D.A. Jewell
//! Issue detector - fleet-wide findings over the merged fact set
//!
//! Each detection rule is independent and produces zero or more issues;
//! the combined list is deduplicated and ranked deterministically, so
//! running the detector twice over an identical fact set yields an
//! identical ordered list regardless of input order.

use crate::types::{Issue, IssueCategory, RepositoryFacts, Severity};
use chrono::{DateTime, Utc};
use petgraph::algo::tarjan_scc;
use petgraph::graph::{DiGraph, NodeIndex};
use std::collections::{BTreeMap, HashMap};

/// Tunable thresholds for the detection rules
#[derive(Debug, Clone, Copy)]
pub struct IssueThresholds {
    /// Non-LFS repository bytes above which storage is a crisis
    pub storage_crisis_bytes: u64,
    /// Days of inactivity after which a repository counts as orphaned
    pub dormant_after_days: i64,
    /// Window of recent activity that makes a missing CI config notable
    pub ci_gap_recent_days: i64,
}

impl Default for IssueThresholds {
    fn default() -> Self {
        Self {
            storage_crisis_bytes: 1024 * 1024 * 1024,
            dormant_after_days: crate::scoring::DORMANT_AFTER_DAYS,
            ci_gap_recent_days: 90,
        }
    }
}

/// Scan the merged fact set and emit a ranked, deduplicated issue list
#[must_use]
pub fn detect_issues<'a>(
    fleet: impl IntoIterator<Item = &'a RepositoryFacts>,
    now: DateTime<Utc>,
    thresholds: &IssueThresholds,
) -> Vec<Issue> {
    // Index by id so detection is independent of input order.
    let by_id: BTreeMap<&str, &RepositoryFacts> =
        fleet.into_iter().map(|f| (f.id.as_str(), f)).collect();

    let mut issues = Vec::new();
    issues.extend(detect_storage_crises(&by_id, thresholds));
    issues.extend(detect_orphaned(&by_id, now, thresholds));
    issues.extend(detect_ci_gaps(&by_id, now, thresholds));
    issues.extend(detect_submodule_cycles(&by_id));

    issues.sort_by(|a, b| {
        a.severity
            .cmp(&b.severity)
            .then(b.impact_bytes.cmp(&a.impact_bytes))
            .then(b.repositories.len().cmp(&a.repositories.len()))
            .then(a.id.cmp(&b.id))
    });
    issues.dedup_by(|a, b| a.id == b.id);
    issues
}

/// Repositories with oversized non-LFS content and no LFS usage at all
fn detect_storage_crises(
    fleet: &BTreeMap<&str, &RepositoryFacts>,
    thresholds: &IssueThresholds,
) -> Vec<Issue> {
    fleet
        .values()
        .filter(|f| {
            f.storage.repository_bytes > thresholds.storage_crisis_bytes
                && f.storage.lfs_bytes == 0
        })
        .map(|f| {
            let repositories = vec![f.id.clone()];
            Issue {
                id: Issue::generate_id(IssueCategory::StorageCrisis, &repositories),
                category: IssueCategory::StorageCrisis,
                severity: Severity::Critical,
                description: format!(
                    "{} holds {:.1} GiB of repository data without Git LFS",
                    f.id,
                    gib(f.storage.repository_bytes)
                ),
                remediation: "Migrate large binary files to Git LFS and rewrite history \
                              to reclaim repository storage"
                    .into(),
                impact_bytes: f.storage.repository_bytes,
                repositories,
            }
        })
        .collect()
}

/// One grouped issue for all ownerless or long-dormant repositories
fn detect_orphaned(
    fleet: &BTreeMap<&str, &RepositoryFacts>,
    now: DateTime<Utc>,
    thresholds: &IssueThresholds,
) -> Vec<Issue> {
    let orphans: Vec<&RepositoryFacts> = fleet
        .values()
        .filter(|f| {
            !f.has_owner
                || f.days_since_activity(now)
                    .map_or(true, |d| d > thresholds.dormant_after_days)
        })
        .copied()
        .collect();

    if orphans.is_empty() {
        return vec![];
    }

    let repositories: Vec<String> = orphans.iter().map(|f| f.id.clone()).collect();
    let wasted: u64 = orphans.iter().map(|f| f.storage.total()).sum();

    vec![Issue {
        id: Issue::generate_id(IssueCategory::Orphaned, &repositories),
        category: IssueCategory::Orphaned,
        severity: Severity::High,
        description: format!(
            "{} repositories have no owner or no activity in over {} days, \
             wasting {:.1} GiB of storage",
            repositories.len(),
            thresholds.dormant_after_days,
            gib(wasted)
        ),
        remediation: "Archive or delete orphaned repositories, or assign an owner \
                      and revive them"
            .into(),
        impact_bytes: wasted,
        repositories,
    }]
}

/// Recently active repositories that never configured CI
fn detect_ci_gaps(
    fleet: &BTreeMap<&str, &RepositoryFacts>,
    now: DateTime<Utc>,
    thresholds: &IssueThresholds,
) -> Vec<Issue> {
    let gaps: Vec<String> = fleet
        .values()
        .filter(|f| {
            !f.has_ci_config
                && f.days_since_activity(now)
                    .is_some_and(|d| d <= thresholds.ci_gap_recent_days)
        })
        .map(|f| f.id.clone())
        .collect();

    if gaps.is_empty() {
        return vec![];
    }

    vec![Issue {
        id: Issue::generate_id(IssueCategory::CiCoverageGap, &gaps),
        category: IssueCategory::CiCoverageGap,
        severity: Severity::Medium,
        description: format!(
            "{} actively developed repositories have no CI configuration",
            gaps.len()
        ),
        remediation: "Add a pipeline configuration so changes are built and tested \
                      automatically"
            .into(),
        impact_bytes: 0,
        repositories: gaps,
    }]
}

/// Cycles in the submodule reference relation
///
/// Dangling references (submodules pointing outside the known fleet)
/// cannot close a cycle within the fact set and are ignored.
fn detect_submodule_cycles(fleet: &BTreeMap<&str, &RepositoryFacts>) -> Vec<Issue> {
    let mut graph: DiGraph<&str, ()> = DiGraph::new();
    let mut indices: HashMap<&str, NodeIndex> = HashMap::new();

    for id in fleet.keys() {
        indices.insert(id, graph.add_node(id));
    }
    for (id, facts) in fleet {
        let from = indices[id];
        for target in &facts.submodules {
            if let Some(&to) = indices.get(target.as_str()) {
                graph.add_edge(from, to, ());
            }
        }
    }

    let mut issues = Vec::new();
    for component in tarjan_scc(&graph) {
        let is_cycle = component.len() > 1
            || (component.len() == 1 && graph.contains_edge(component[0], component[0]));
        if !is_cycle {
            continue;
        }

        let mut members: Vec<String> =
            component.iter().map(|&idx| graph[idx].to_string()).collect();
        members.sort();

        issues.push(Issue {
            id: Issue::generate_id(IssueCategory::SubmoduleCycle, &members),
            category: IssueCategory::SubmoduleCycle,
            severity: Severity::High,
            description: format!("Circular submodule references: {}", members.join(" -> ")),
            remediation: "Break the cycle by extracting the shared dependency into \
                          its own repository"
                .into(),
            impact_bytes: 0,
            repositories: members,
        });
    }
    issues
}

#[allow(clippy::cast_precision_loss)]
fn gib(bytes: u64) -> f64 {
    bytes as f64 / (1024.0 * 1024.0 * 1024.0)
}

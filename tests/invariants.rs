// SPDX-License-Identifier: AGPL-3.0-or-later
// SPDX-FileCopyrightText: 2025 Jonathan D.A. Jewell
//! Invariant tests for the analysis engine
//!
//! These tests verify critical invariants:
//! 1. Incremental equivalence - reusing the cache yields the same facts
//!    as collecting fresh
//! 2. Score boundedness and determinism
//! 3. Issue ranking determinism and order independence
//! 4. Snapshot durability - corruption degrades, never aborts

use chrono::{DateTime, Duration, Utc};
use proptest::prelude::*;
use repofleet::engine::{Engine, EngineConfig};
use repofleet::issues::{detect_issues, IssueThresholds};
use repofleet::planner::{plan_refresh, RefreshMode};
use repofleet::pool::PoolConfig;
use repofleet::provider::{FactsProvider, FetchError};
use repofleet::scoring::{health_score, hotness_score, score_repository};
use repofleet::snapshot::{Snapshot, SnapshotStore};
use repofleet::types::{
    CacheEntry, CacheSource, Issue, IssueCategory, PipelineRun, RepositoryFacts,
    StorageBreakdown,
};
use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::Mutex;
use tempfile::TempDir;
use tokio::sync::watch;

// =============================================================================
// Test Helpers
// =============================================================================

fn make_facts(id: &str) -> RepositoryFacts {
    RepositoryFacts {
        id: id.into(),
        name: id.rsplit('/').next().unwrap_or(id).into(),
        size_bytes: 4 * 1024 * 1024,
        storage: StorageBreakdown {
            repository_bytes: 2 * 1024 * 1024,
            ..Default::default()
        },
        commit_count: 50,
        contributor_count: 3,
        primary_language: Some("Rust".into()),
        languages: vec!["Rust".into(), "Shell".into()],
        created_at: Some(Utc::now() - Duration::days(200)),
        last_activity: Some(Utc::now() - Duration::days(3)),
        pipelines: vec![PipelineRun {
            finished_at: Utc::now() - Duration::days(1),
            success: true,
            duration_secs: 60.0,
        }],
        has_ci_config: true,
        submodules: vec![],
        has_owner: true,
    }
}

fn make_entry(id: &str, collected_at: DateTime<Utc>) -> CacheEntry {
    CacheEntry {
        facts: make_facts(id),
        collected_at,
        source: CacheSource::Fresh,
    }
}

struct StaticProvider {
    repos: Mutex<BTreeMap<String, RepositoryFacts>>,
}

impl StaticProvider {
    fn new(facts: Vec<RepositoryFacts>) -> Self {
        Self {
            repos: Mutex::new(facts.into_iter().map(|f| (f.id.clone(), f)).collect()),
        }
    }
}

impl FactsProvider for StaticProvider {
    async fn list_repositories(&self) -> Result<Vec<String>, FetchError> {
        Ok(self.repos.lock().unwrap().keys().cloned().collect())
    }

    async fn fetch(&self, id: &str) -> Result<RepositoryFacts, FetchError> {
        self.repos
            .lock()
            .unwrap()
            .get(id)
            .cloned()
            .ok_or_else(|| FetchError::Permanent("unknown".into()))
    }

    async fn probe_last_activity(
        &self,
        id: &str,
    ) -> Result<Option<DateTime<Utc>>, FetchError> {
        Ok(self
            .repos
            .lock()
            .unwrap()
            .get(id)
            .and_then(|f| f.last_activity))
    }
}

fn test_engine(dir: &TempDir, facts: Vec<RepositoryFacts>) -> Engine<StaticProvider> {
    Engine::new(
        StaticProvider::new(facts),
        SnapshotStore::new(dir.path().join("snapshot.json")),
        EngineConfig {
            pool: PoolConfig {
                concurrency: 4,
                max_retries: 0,
                base_backoff: std::time::Duration::from_millis(1),
                cancel_grace: std::time::Duration::from_millis(500),
            },
            thresholds: IssueThresholds::default(),
        },
    )
}

fn no_cancel() -> watch::Receiver<bool> {
    let (tx, rx) = watch::channel(false);
    std::mem::forget(tx);
    rx
}

// =============================================================================
// Incremental Equivalence Tests
// =============================================================================

#[tokio::test]
async fn incremental_run_reports_same_facts_as_full_run() {
    let dir = TempDir::new().unwrap();
    let fleet = vec![make_facts("g/a"), make_facts("g/b"), make_facts("g/c")];
    let engine = test_engine(&dir, fleet);

    // Warm the cache, then compare an incremental run against a full one.
    engine
        .run(RefreshMode::Incremental, None, no_cancel(), None)
        .await
        .unwrap();
    let incremental = engine
        .run(RefreshMode::Incremental, None, no_cancel(), None)
        .await
        .unwrap();
    let full = engine
        .run(RefreshMode::Full, None, no_cancel(), None)
        .await
        .unwrap();

    assert_eq!(incremental.summary().collected, 0);
    assert_eq!(full.summary().collected, 3);

    let inc_facts: Vec<&RepositoryFacts> =
        incremental.repositories().iter().map(|r| r.facts()).collect();
    let full_facts: Vec<&RepositoryFacts> =
        full.repositories().iter().map(|r| r.facts()).collect();
    assert_eq!(inc_facts, full_facts);
}

#[test]
fn planner_reuses_only_entries_with_no_newer_activity() {
    let now = Utc::now();
    let mut snapshot = Snapshot::default();
    snapshot.merge([
        ("g/fresh".to_string(), make_entry("g/fresh", now)),
        ("g/stale".to_string(), make_entry("g/stale", now - Duration::days(10))),
    ]);

    let probes = HashMap::from([
        ("g/fresh".to_string(), Some(now - Duration::days(1))),
        ("g/stale".to_string(), Some(now)),
    ]);
    let candidates: Vec<String> =
        vec!["g/fresh".into(), "g/stale".into(), "g/new".into()];

    let plan = plan_refresh(&candidates, &snapshot, RefreshMode::Incremental, &probes);

    assert_eq!(plan.reuse, vec!["g/fresh".to_string()]);
    let collect: HashSet<String> = plan.collect_ids().into_iter().collect();
    assert_eq!(
        collect,
        HashSet::from(["g/stale".to_string(), "g/new".to_string()])
    );
}

// =============================================================================
// Score Determinism and Bounds
// =============================================================================

#[test]
fn scores_are_deterministic_for_identical_input() {
    let now = Utc::now();
    let facts = make_facts("g/app");
    let first = score_repository(&facts, now);
    let second = score_repository(&facts, now);
    assert_eq!(first, second);
}

#[test]
fn health_is_zero_only_without_pipeline_history() {
    let now = Utc::now();
    let mut silent = make_facts("g/silent");
    silent.pipelines.clear();
    assert_eq!(health_score(&silent, now), 0.0);

    let noisy = make_facts("g/noisy");
    assert!(health_score(&noisy, now) > 0.0);
}

#[test]
fn hotness_never_increases_as_activity_ages() {
    let now = Utc::now();
    let mut last = f64::INFINITY;
    for days in 0..400 {
        let mut facts = make_facts("g/app");
        facts.last_activity = Some(now - Duration::days(days));
        let score = hotness_score(&facts, now);
        assert!(score <= last, "hotness rose at {days} days");
        last = score;
    }
}

proptest! {
    #[test]
    fn all_scores_stay_in_bounds(
        size_bytes in 0u64..=u64::MAX,
        commit_count in 0u64..10_000_000,
        contributor_count in 0u64..100_000,
        language_count in 0usize..200,
        submodule_count in 0usize..200,
        pipeline_count in 0usize..500,
        success_ratio in 0.0f64..=1.0,
        days_since in proptest::option::of(0i64..20_000),
        created_days_ago in proptest::option::of(0i64..20_000),
        has_ci in any::<bool>(),
        has_owner in any::<bool>(),
    ) {
        let now = Utc::now();
        let successes = (pipeline_count as f64 * success_ratio) as usize;
        let facts = RepositoryFacts {
            id: "g/prop".into(),
            name: "prop".into(),
            size_bytes,
            storage: StorageBreakdown::default(),
            commit_count,
            contributor_count,
            primary_language: None,
            languages: (0..language_count).map(|i| format!("l{i}")).collect(),
            created_at: created_days_ago.map(|d| now - Duration::days(d)),
            last_activity: days_since.map(|d| now - Duration::days(d)),
            pipelines: (0..pipeline_count)
                .map(|i| PipelineRun {
                    finished_at: now - Duration::days(i as i64),
                    success: i < successes,
                    duration_secs: 30.0,
                })
                .collect(),
            has_ci_config: has_ci,
            submodules: (0..submodule_count).map(|i| format!("g/s{i}")).collect(),
            has_owner,
        };

        let score = score_repository(&facts, now);
        for value in [score.complexity, score.health, score.hotness, score.maintenance] {
            prop_assert!((0.0..=100.0).contains(&value));
            prop_assert!(!value.is_nan());
        }
    }
}

// =============================================================================
// Issue Determinism Tests
// =============================================================================

#[test]
fn issue_ids_are_deterministic_and_unique() {
    let repos_a = vec!["g/a".to_string(), "g/b".to_string()];
    let id1 = Issue::generate_id(IssueCategory::Orphaned, &repos_a);
    let id2 = Issue::generate_id(IssueCategory::Orphaned, &repos_a);
    assert_eq!(id1, id2);
    assert!(id1.starts_with("issue:"));

    let different: HashSet<String> = [
        Issue::generate_id(IssueCategory::Orphaned, &repos_a),
        Issue::generate_id(IssueCategory::CiCoverageGap, &repos_a),
        Issue::generate_id(IssueCategory::Orphaned, &["g/a".to_string()]),
        Issue::generate_id(IssueCategory::SubmoduleCycle, &repos_a),
    ]
    .into_iter()
    .collect();
    assert_eq!(different.len(), 4, "All issue IDs should be unique");
}

#[test]
fn identical_fleets_yield_identical_ranked_issues() {
    let now = Utc::now();
    let thresholds = IssueThresholds::default();

    let mut bloated = make_facts("g/bloated");
    bloated.storage.repository_bytes = 3 * 1024 * 1024 * 1024;
    bloated.storage.lfs_bytes = 0;
    let mut orphan = make_facts("g/orphan");
    orphan.has_owner = false;
    let mut uncovered = make_facts("g/uncovered");
    uncovered.has_ci_config = false;
    let mut cyclic_a = make_facts("g/x");
    cyclic_a.submodules = vec!["g/y".into()];
    let mut cyclic_b = make_facts("g/y");
    cyclic_b.submodules = vec!["g/x".into()];

    let fleet = [&bloated, &orphan, &uncovered, &cyclic_a, &cyclic_b];
    let first = detect_issues(fleet.iter().copied(), now, &thresholds);
    let second = detect_issues(fleet.iter().rev().copied(), now, &thresholds);
    assert_eq!(first, second);

    // Critical issues precede high, which precede medium.
    let severities: Vec<_> = first.iter().map(|i| i.severity).collect();
    let mut ranked = severities.clone();
    ranked.sort();
    assert_eq!(severities, ranked);
}

#[test]
fn cycle_members_are_reported_sorted_regardless_of_discovery_order() {
    let now = Utc::now();
    let mut c = make_facts("g/c");
    c.submodules = vec!["g/a".into()];
    let mut a = make_facts("g/a");
    a.submodules = vec!["g/b".into()];
    let mut b = make_facts("g/b");
    b.submodules = vec!["g/c".into()];

    let issues = detect_issues([&c, &a, &b], now, &IssueThresholds::default());
    let cycle = issues
        .iter()
        .find(|i| i.category == IssueCategory::SubmoduleCycle)
        .expect("cycle should be detected");
    assert_eq!(
        cycle.repositories,
        vec!["g/a".to_string(), "g/b".to_string(), "g/c".to_string()]
    );
}

// =============================================================================
// Snapshot Durability Tests
// =============================================================================

#[test]
fn snapshot_survives_save_load_cycles_unchanged() {
    let dir = TempDir::new().unwrap();
    let store = SnapshotStore::new(dir.path().join("snapshot.json"));

    let mut snapshot = Snapshot::default();
    let now = Utc::now();
    snapshot.merge([
        ("g/a".to_string(), make_entry("g/a", now)),
        ("g/b".to_string(), make_entry("g/b", now - Duration::days(1))),
    ]);
    store.save(&snapshot).unwrap();

    let once = store.load().unwrap();
    store.save(&once).unwrap();
    let twice = store.load().unwrap();

    assert_eq!(once.entries, twice.entries);
    assert_eq!(once.len(), 2);
}

#[tokio::test]
async fn corrupted_snapshot_triggers_full_recollection_not_abort() {
    let dir = TempDir::new().unwrap();
    std::fs::write(dir.path().join("snapshot.json"), "}}}definitely not json").unwrap();

    let engine = test_engine(&dir, vec![make_facts("g/a"), make_facts("g/b")]);
    let report = engine
        .run(RefreshMode::Incremental, None, no_cancel(), None)
        .await
        .unwrap();

    assert_eq!(report.summary().collected, 2);
    assert!(!report.summary().partial);
}

#[tokio::test]
async fn failed_repo_keeps_cached_facts_in_report() {
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::Arc;

    struct FlakyProvider {
        inner: StaticProvider,
        broken: Arc<AtomicBool>,
    }

    impl FactsProvider for FlakyProvider {
        async fn list_repositories(&self) -> Result<Vec<String>, FetchError> {
            self.inner.list_repositories().await
        }

        async fn fetch(&self, id: &str) -> Result<RepositoryFacts, FetchError> {
            if self.broken.load(Ordering::SeqCst) {
                return Err(FetchError::Transient("origin flapping".into()));
            }
            self.inner.fetch(id).await
        }

        async fn probe_last_activity(
            &self,
            _id: &str,
        ) -> Result<Option<DateTime<Utc>>, FetchError> {
            // Always inconclusive, forcing re-collection attempts.
            Ok(None)
        }
    }

    let dir = TempDir::new().unwrap();
    let broken = Arc::new(AtomicBool::new(false));
    let provider = FlakyProvider {
        inner: StaticProvider::new(vec![make_facts("g/a")]),
        broken: Arc::clone(&broken),
    };
    let engine = Engine::new(
        provider,
        SnapshotStore::new(dir.path().join("snapshot.json")),
        EngineConfig {
            pool: PoolConfig {
                concurrency: 2,
                max_retries: 0,
                base_backoff: std::time::Duration::from_millis(1),
                cancel_grace: std::time::Duration::from_millis(500),
            },
            thresholds: IssueThresholds::default(),
        },
    );

    let warm = engine
        .run(RefreshMode::Incremental, None, no_cancel(), None)
        .await
        .unwrap();
    assert_eq!(warm.summary().collected, 1);

    // Break the origin; the prior entry must still be reported.
    broken.store(true, Ordering::SeqCst);
    let report = engine
        .run(RefreshMode::Incremental, None, no_cancel(), None)
        .await
        .unwrap();
    assert_eq!(report.repositories().len(), 1);
    assert_eq!(report.repositories()[0].facts().id, "g/a");
}

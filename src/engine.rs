// SPDX-License-Identifier: AGPL-3.0-or-later
// SPDX-FileCopyrightText: 2025 Jonathan D.A. Jewell
//! Engine - orchestrates one analysis run end to end
//!
//! The engine owns the snapshot for the duration of a run: collection
//! workers only return facts, and a single merge step folds them into
//! the snapshot before anything is scored. Scores and issues are always
//! recomputed from the merged fact set, so rule changes apply to cached
//! repositories without re-collection.

use crate::issues::{detect_issues, IssueThresholds};
use crate::planner::{plan_refresh, RefreshMode};
use crate::pool::{CollectionPool, PoolConfig, ProgressEvent};
use crate::provider::{FactsProvider, FetchError};
use crate::report::{AnalysisReport, RepositoryReport, RunSummary};
use crate::scoring::score_repository;
use crate::snapshot::{Snapshot, SnapshotError, SnapshotStore};
use crate::types::{CacheEntry, CacheSource};
use chrono::Utc;
use std::collections::HashMap;
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::{mpsc, watch, Semaphore};
use tokio::task::JoinSet;
use tracing::{debug, info, warn};

/// Engine tuning
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Work pool settings
    pub pool: PoolConfig,
    /// Detection rule thresholds
    pub thresholds: IssueThresholds,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            pool: PoolConfig::default(),
            thresholds: IssueThresholds::default(),
        }
    }
}

/// Fatal engine failures
///
/// Per-repository collection failures are not fatal; they surface in
/// the run summary instead. Only failures that prevent any meaningful
/// run at all end up here.
#[derive(Debug, Error)]
pub enum EngineError {
    /// The candidate listing itself failed
    #[error("listing repositories failed: {0}")]
    List(#[source] FetchError),

    /// The snapshot could not be persisted
    #[error(transparent)]
    Snapshot(#[from] SnapshotError),
}

/// One analysis engine bound to a provider and a snapshot store
pub struct Engine<P: FactsProvider> {
    provider: Arc<P>,
    store: SnapshotStore,
    config: EngineConfig,
}

impl<P: FactsProvider> Engine<P> {
    /// Create an engine
    pub fn new(provider: P, store: SnapshotStore, config: EngineConfig) -> Self {
        Self {
            provider: Arc::new(provider),
            store,
            config,
        }
    }

    /// Execute one full analysis run
    ///
    /// `scope`, when given, restricts the run to the named repositories
    /// (unknown names are ignored with a warning). Cancellation via
    /// `cancel` stops dispatch of new collection tasks; everything
    /// already collected is merged and persisted, and the returned
    /// report is marked partial.
    pub async fn run(
        &self,
        mode: RefreshMode,
        scope: Option<&[String]>,
        cancel: watch::Receiver<bool>,
        progress: Option<mpsc::UnboundedSender<ProgressEvent>>,
    ) -> Result<AnalysisReport, EngineError> {
        let started = std::time::Instant::now();

        let (mut snapshot, mode) = self.load_snapshot(mode);
        snapshot.mark_all_reused();

        let mut candidates = self
            .provider
            .list_repositories()
            .await
            .map_err(EngineError::List)?;
        if let Some(scope) = scope {
            for wanted in scope {
                if !candidates.contains(wanted) {
                    warn!(repo = %wanted, "requested repository not visible at the origin");
                }
            }
            candidates.retain(|id| scope.contains(id));
        }
        info!(candidates = candidates.len(), ?mode, "starting analysis run");

        let probes = self.probe_cached(&candidates, &snapshot, mode).await;
        let plan = plan_refresh(&candidates, &snapshot, mode, &probes);
        debug!(
            collect = plan.collect.len(),
            reuse = plan.reuse.len(),
            "refresh plan ready"
        );

        let pool = CollectionPool::new(self.config.pool);
        let provider = Arc::clone(&self.provider);
        let run = pool
            .run(
                plan.collect_ids(),
                move |id| {
                    let provider = Arc::clone(&provider);
                    async move { provider.fetch(&id).await }
                },
                cancel,
                progress,
            )
            .await;

        let now = Utc::now();
        let collected = run.successes().len();
        let failed = run.failures().len();
        for (id, error) in run.failures() {
            warn!(repo = %id, %error, "collection failed, keeping prior cache entry");
        }

        // Single-writer merge: the pool returned plain facts, only the
        // engine touches the snapshot.
        snapshot.merge(run.outcomes.iter().filter_map(|outcome| {
            outcome.result.as_ref().ok().map(|facts| {
                (
                    outcome.id.clone(),
                    CacheEntry {
                        facts: facts.clone(),
                        collected_at: now,
                        source: CacheSource::Fresh,
                    },
                )
            })
        }));

        if mode == RefreshMode::Full && !run.cancelled && failed == 0 {
            snapshot.last_full_refresh = Some(now);
        }
        self.store.save(&snapshot)?;

        let report = assemble_report(
            &snapshot,
            &candidates,
            RunSummary {
                collected,
                reused: plan.reuse.len(),
                failed,
                partial: run.cancelled || failed > 0,
                elapsed: started.elapsed(),
            },
            &self.config.thresholds,
        );
        info!(
            repositories = report.repositories().len(),
            issues = report.issues().len(),
            partial = report.summary().partial,
            "analysis run complete"
        );
        Ok(report)
    }

    /// Load the snapshot, degrading to an empty one plus a forced full
    /// refresh when the file is unreadable
    fn load_snapshot(&self, mode: RefreshMode) -> (Snapshot, RefreshMode) {
        match self.store.load() {
            Ok(snapshot) => (snapshot, mode),
            Err(error @ (SnapshotError::Corrupted { .. } | SnapshotError::IncompatibleVersion { .. })) => {
                warn!(%error, "snapshot unusable, falling back to full refresh");
                (Snapshot::default(), RefreshMode::Full)
            }
            Err(error) => {
                warn!(%error, "snapshot unreadable, falling back to full refresh");
                (Snapshot::default(), RefreshMode::Full)
            }
        }
    }

    /// Probe last-activity for candidates that have a cache entry
    ///
    /// Only cached candidates are probed: everything else is collected
    /// regardless, so a probe would be wasted. Probe errors map to
    /// `None`, which the planner treats as needs-collection.
    async fn probe_cached(
        &self,
        candidates: &[String],
        snapshot: &Snapshot,
        mode: RefreshMode,
    ) -> HashMap<String, Option<chrono::DateTime<Utc>>> {
        if mode == RefreshMode::Full {
            return HashMap::new();
        }

        let semaphore = Arc::new(Semaphore::new(self.config.pool.concurrency.max(1)));
        let mut tasks = JoinSet::new();
        for id in candidates {
            if snapshot.get(id).is_none() {
                continue;
            }
            let id = id.clone();
            let provider = Arc::clone(&self.provider);
            let semaphore = Arc::clone(&semaphore);
            tasks.spawn(async move {
                let _permit = semaphore.acquire_owned().await;
                let probed = match provider.probe_last_activity(&id).await {
                    Ok(ts) => ts,
                    Err(error) => {
                        debug!(repo = %id, %error, "probe failed, will re-collect");
                        None
                    }
                };
                (id, probed)
            });
        }

        let mut probes = HashMap::new();
        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok((id, probed)) => {
                    probes.insert(id, probed);
                }
                Err(err) => warn!(error = %err, "probe task panicked"),
            }
        }
        probes
    }
}

/// Score and assemble the final report from the merged snapshot
fn assemble_report(
    snapshot: &Snapshot,
    candidates: &[String],
    summary: RunSummary,
    thresholds: &IssueThresholds,
) -> AnalysisReport {
    let now = Utc::now();

    // Candidates without an entry (failed or cancelled collection, no
    // prior cache) simply do not appear in the report.
    let entries: Vec<&CacheEntry> = candidates
        .iter()
        .filter_map(|id| snapshot.get(id))
        .collect();

    let issues = detect_issues(entries.iter().map(|e| &e.facts), now, thresholds);

    let repositories = entries
        .iter()
        .map(|entry| {
            RepositoryReport::new(
                entry.facts.clone(),
                score_repository(&entry.facts, now),
                entry.source,
            )
        })
        .collect();

    AnalysisReport::assemble(repositories, issues, summary, now)
}

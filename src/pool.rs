// SPDX-License-Identifier: AGPL-3.0-or-later
// SPDX-FileCopyrightText: 2025 Jonathan D.A. Jewell
//! Collection pool - bounded concurrent fact collection with retries
//!
//! Failures are isolated per task: one repository failing all its
//! retries never aborts the run. A rate-limit signal from any worker
//! pauses dispatch for every worker through a shared gate, since the
//! origin throttles the client as a whole, not individual requests.

use crate::provider::FetchError;
use crate::types::RepositoryFacts;
use std::future::Future;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::{mpsc, watch, Semaphore};
use tokio::task::JoinSet;
use tokio::time::Instant;
use tracing::{debug, warn};

/// Pool tuning knobs
#[derive(Debug, Clone, Copy)]
pub struct PoolConfig {
    /// Maximum number of in-flight collection tasks
    pub concurrency: usize,
    /// Retry attempts per task after the first try
    pub max_retries: u32,
    /// Backoff before the first retry; doubles per attempt
    pub base_backoff: Duration,
    /// How long in-flight tasks may keep running after cancellation
    /// before they are aborted
    pub cancel_grace: Duration,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            concurrency: std::thread::available_parallelism().map_or(4, usize::from),
            max_retries: 3,
            base_backoff: Duration::from_millis(500),
            cancel_grace: Duration::from_secs(30),
        }
    }
}

/// Terminal result of one collection task
#[derive(Debug)]
pub struct TaskOutcome {
    /// Repository identifier
    pub id: String,
    /// Collected facts, or the last error after retries were exhausted
    pub result: Result<RepositoryFacts, FetchError>,
    /// Wall-clock time spent on the task, including backoff
    pub duration: Duration,
    /// Number of fetch attempts made
    pub attempts: u32,
}

/// Emitted after each task finishes, for progress reporting
#[derive(Debug, Clone)]
pub struct ProgressEvent {
    /// Repository that just finished
    pub id: String,
    /// Whether the task ended in success
    pub success: bool,
    /// Tasks finished so far, successes and failures combined
    pub done: usize,
    /// Failed tasks so far
    pub failed: usize,
    /// Total tasks submitted to the pool
    pub total: usize,
}

/// Result of a whole pool run
#[derive(Debug)]
pub struct PoolRun {
    /// One outcome per dispatched task, completion order
    pub outcomes: Vec<TaskOutcome>,
    /// True when cancellation stopped dispatch before all tasks ran
    pub cancelled: bool,
}

impl PoolRun {
    /// Successfully collected facts, keyed by repository identifier
    #[must_use]
    pub fn successes(&self) -> Vec<&RepositoryFacts> {
        self.outcomes
            .iter()
            .filter_map(|o| o.result.as_ref().ok())
            .collect()
    }

    /// Identifiers whose collection failed terminally
    #[must_use]
    pub fn failures(&self) -> Vec<(&str, &FetchError)> {
        self.outcomes
            .iter()
            .filter_map(|o| o.result.as_ref().err().map(|e| (o.id.as_str(), e)))
            .collect()
    }
}

/// Shared pause gate armed by rate-limit responses
///
/// Workers consult the gate before every fetch attempt and sleep until
/// the stored deadline passes. Arming with a later deadline extends the
/// pause; an earlier one is ignored.
#[derive(Debug, Clone, Default)]
struct PauseGate {
    until: Arc<Mutex<Option<Instant>>>,
}

impl PauseGate {
    fn arm(&self, pause: Duration) {
        let deadline = Instant::now() + pause;
        let mut until = self.until.lock().unwrap_or_else(std::sync::PoisonError::into_inner);
        if until.map_or(true, |existing| deadline > existing) {
            *until = Some(deadline);
        }
    }

    async fn wait(&self) {
        let deadline = {
            let until = self
                .until
                .lock()
                .unwrap_or_else(std::sync::PoisonError::into_inner);
            *until
        };
        if let Some(deadline) = deadline {
            if deadline > Instant::now() {
                tokio::time::sleep_until(deadline).await;
            }
        }
    }
}

/// Bounded worker pool running one fetch closure per repository
#[derive(Debug, Clone)]
pub struct CollectionPool {
    config: PoolConfig,
}

impl CollectionPool {
    /// Create a pool with the given tuning
    #[must_use]
    pub fn new(config: PoolConfig) -> Self {
        Self { config }
    }

    /// Run one fetch task per identifier and gather every outcome
    ///
    /// Dispatch stops as soon as `cancel` flips to true. Tasks already
    /// in flight get [`PoolConfig::cancel_grace`] to settle and are
    /// aborted afterwards, so the run always returns in bounded time
    /// and the caller can persist the partial result set.
    pub async fn run<F, Fut>(
        &self,
        ids: Vec<String>,
        fetch: F,
        mut cancel: watch::Receiver<bool>,
        progress: Option<mpsc::UnboundedSender<ProgressEvent>>,
    ) -> PoolRun
    where
        F: Fn(String) -> Fut + Clone + Send + Sync + 'static,
        Fut: Future<Output = Result<RepositoryFacts, FetchError>> + Send,
    {
        let total = ids.len();
        let semaphore = Arc::new(Semaphore::new(self.config.concurrency.max(1)));
        let gate = PauseGate::default();
        let mut tasks: JoinSet<TaskOutcome> = JoinSet::new();
        let mut outcomes = Vec::with_capacity(total);
        let mut cancelled = false;
        let mut failed = 0usize;

        let mut pending = ids.into_iter();
        loop {
            if *cancel.borrow() {
                cancelled = true;
                break;
            }

            let Some(id) = pending.next() else { break };

            // Wait for a worker slot, but abandon dispatch on cancel.
            let permit = tokio::select! {
                permit = Arc::clone(&semaphore).acquire_owned() => match permit {
                    Ok(permit) => permit,
                    Err(_) => break,
                },
                _ = cancel.changed() => {
                    cancelled = true;
                    break;
                }
            };

            let fetch = fetch.clone();
            let gate = gate.clone();
            let cancel = cancel.clone();
            let config = self.config;
            tasks.spawn(async move {
                let outcome = run_task(id, fetch, &gate, &cancel, config).await;
                drop(permit);
                outcome
            });

            // Drain finished tasks opportunistically so the outcome
            // buffer and progress stream stay current during dispatch.
            while let Some(joined) = tasks.try_join_next() {
                record(joined, &mut outcomes, &mut failed, total, progress.as_ref());
            }
        }

        if cancelled {
            // Bounded drain: stragglers past the grace period are
            // aborted so a cancelled run can still persist its state.
            let grace = tokio::time::sleep(self.config.cancel_grace);
            tokio::pin!(grace);
            loop {
                tokio::select! {
                    joined = tasks.join_next() => match joined {
                        Some(joined) => {
                            record(joined, &mut outcomes, &mut failed, total, progress.as_ref());
                        }
                        None => break,
                    },
                    () = &mut grace => {
                        warn!(in_flight = tasks.len(), "cancellation grace elapsed, aborting in-flight tasks");
                        tasks.abort_all();
                        while let Some(joined) = tasks.join_next().await {
                            record(joined, &mut outcomes, &mut failed, total, progress.as_ref());
                        }
                        break;
                    }
                }
            }
        } else {
            while let Some(joined) = tasks.join_next().await {
                record(joined, &mut outcomes, &mut failed, total, progress.as_ref());
            }
        }

        PoolRun { outcomes, cancelled }
    }
}

fn record(
    joined: Result<TaskOutcome, tokio::task::JoinError>,
    outcomes: &mut Vec<TaskOutcome>,
    failed: &mut usize,
    total: usize,
    progress: Option<&mpsc::UnboundedSender<ProgressEvent>>,
) {
    match joined {
        Ok(outcome) => {
            let success = outcome.result.is_ok();
            if !success {
                *failed += 1;
            }
            if let Some(tx) = progress {
                let _ = tx.send(ProgressEvent {
                    id: outcome.id.clone(),
                    success,
                    done: outcomes.len() + 1,
                    failed: *failed,
                    total,
                });
            }
            outcomes.push(outcome);
        }
        Err(err) if err.is_cancelled() => {
            debug!("in-flight task aborted after the cancellation grace");
        }
        Err(err) => warn!(error = %err, "collection task panicked"),
    }
}

async fn run_task<F, Fut>(
    id: String,
    fetch: F,
    gate: &PauseGate,
    cancel: &watch::Receiver<bool>,
    config: PoolConfig,
) -> TaskOutcome
where
    F: Fn(String) -> Fut,
    Fut: Future<Output = Result<RepositoryFacts, FetchError>>,
{
    let started = Instant::now();
    let mut attempts = 0u32;

    let result = loop {
        gate.wait().await;
        attempts += 1;

        match fetch(id.clone()).await {
            Ok(facts) => break Ok(facts),
            Err(err) => {
                if let FetchError::RateLimited { retry_after } = &err {
                    let pause = retry_after.unwrap_or(config.base_backoff * 4);
                    debug!(repo = %id, pause_ms = pause.as_millis() as u64, "rate limited, pausing dispatch");
                    gate.arm(pause);
                }

                let exhausted = attempts > config.max_retries;
                if !err.is_retryable() || exhausted || *cancel.borrow() {
                    break Err(err);
                }

                let backoff = config.base_backoff * 2u32.saturating_pow(attempts - 1);
                debug!(repo = %id, attempt = attempts, backoff_ms = backoff.as_millis() as u64, "retrying fetch");
                tokio::time::sleep(backoff).await;
            }
        }
    };

    TaskOutcome {
        id,
        result,
        duration: started.elapsed(),
        attempts,
    }
}

// SPDX-License-Identifier: AGPL-3.0-or-later
// SPDX-FileCopyrightText: 2025 Jonathan D.A. Jewell
//! Score engine - pure, stateless score derivation from repository facts
//!
//! All four scores are independent: no score function reads another's
//! output, and every function takes the clock as an argument so results
//! are reproducible in tests. Weights are fixed and documented per
//! function; identical input always yields identical output.

use crate::types::{RepositoryFacts, RepositoryScore};
use chrono::{DateTime, Utc};

/// Number of most recent pipeline outcomes considered by the health score
pub const HEALTH_RECENT_RUNS: usize = 20;

/// Days of inactivity after which a repository counts as dormant
pub const DORMANT_AFTER_DAYS: i64 = 180;

/// Compute all four scores for one repository
#[must_use]
pub fn score_repository(facts: &RepositoryFacts, now: DateTime<Utc>) -> RepositoryScore {
    RepositoryScore {
        complexity: complexity_score(facts),
        health: health_score(facts, now),
        hotness: hotness_score(facts, now),
        maintenance: maintenance_score(facts, now),
        commit_frequency: facts.commit_frequency(now),
    }
}

/// Structural complexity in [0, 100]
///
/// Monotonically increasing in language diversity, submodule count, and
/// size; saturates instead of growing unbounded. Weights: 8 points per
/// language (cap 35), 6 per submodule reference (cap 25), and
/// `4 * log2(1 + size in MiB)` (cap 40).
#[must_use]
#[allow(clippy::cast_precision_loss)]
pub fn complexity_score(facts: &RepositoryFacts) -> f64 {
    let language_points = (facts.languages.len() as f64 * 8.0).min(35.0);
    let submodule_points = (facts.submodules.len() as f64 * 6.0).min(25.0);

    let size_mib = facts.size_bytes as f64 / (1024.0 * 1024.0);
    let size_points = ((1.0 + size_mib).log2() * 4.0).min(40.0);

    (language_points + submodule_points + size_points).clamp(0.0, 100.0)
}

/// CI and activity health in [0, 100]
///
/// Exactly 0 when no pipeline history exists - never divides by zero.
/// With history: 5 base points, up to 55 for the success ratio over the
/// most recent [`HEALTH_RECENT_RUNS`] outcomes, 20 for a present CI
/// configuration, and up to 20 for activity recency (within 7 days: 20,
/// 30 days: 10, 90 days: 5).
#[must_use]
#[allow(clippy::cast_precision_loss)]
pub fn health_score(facts: &RepositoryFacts, now: DateTime<Utc>) -> f64 {
    if facts.pipelines.is_empty() {
        return 0.0;
    }

    let recent = &facts.pipelines[..facts.pipelines.len().min(HEALTH_RECENT_RUNS)];
    let successes = recent.iter().filter(|p| p.success).count();
    let success_ratio = successes as f64 / recent.len() as f64;

    let mut score = 5.0 + success_ratio * 55.0;
    if facts.has_ci_config {
        score += 20.0;
    }
    score += match facts.days_since_activity(now) {
        Some(d) if d <= 7 => 20.0,
        Some(d) if d <= 30 => 10.0,
        Some(d) if d <= 90 => 5.0,
        _ => 0.0,
    };

    score.clamp(0.0, 100.0)
}

/// Recent-activity heat in [0, 100]
///
/// Strictly non-increasing as time since last activity grows, all else
/// equal: the recency term is `50 * exp(-days / 30)` (0 when the last
/// activity is unknown). Contributors add 3 points each (cap 25) and
/// commit frequency adds `25 * min(1, commits per day)`.
#[must_use]
#[allow(clippy::cast_precision_loss)]
pub fn hotness_score(facts: &RepositoryFacts, now: DateTime<Utc>) -> f64 {
    let recency_points = match facts.days_since_activity(now) {
        Some(days) => 50.0 * (-(days as f64) / 30.0).exp(),
        None => 0.0,
    };
    let contributor_points = (facts.contributor_count as f64 * 3.0).min(25.0);
    let frequency_points = 25.0 * facts.commit_frequency(now).min(1.0);

    (recency_points + contributor_points + frequency_points).clamp(0.0, 100.0)
}

/// Maintenance quality in [0, 100]
///
/// Starts from a base of 50. Penalties: at most one contributor -20,
/// no owner -25, dormant beyond [`DORMANT_AFTER_DAYS`] (or never
/// active) -30. Bonuses: three or more contributors +15, an owner +10,
/// activity within 30 days +10.
#[must_use]
pub fn maintenance_score(facts: &RepositoryFacts, now: DateTime<Utc>) -> f64 {
    let mut score: f64 = 50.0;

    if facts.contributor_count <= 1 {
        score -= 20.0;
    } else if facts.contributor_count >= 3 {
        score += 15.0;
    }

    if facts.has_owner {
        score += 10.0;
    } else {
        score -= 25.0;
    }

    match facts.days_since_activity(now) {
        Some(d) if d <= 30 => score += 10.0,
        Some(d) if d > DORMANT_AFTER_DAYS => score -= 30.0,
        Some(_) => {}
        None => score -= 30.0,
    }

    score.clamp(0.0, 100.0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::PipelineRun;
    use chrono::Duration;

    fn base_facts() -> RepositoryFacts {
        RepositoryFacts {
            id: "group/app".into(),
            name: "app".into(),
            size_bytes: 10 * 1024 * 1024,
            storage: Default::default(),
            commit_count: 100,
            contributor_count: 4,
            primary_language: Some("Rust".into()),
            languages: vec!["Rust".into(), "Shell".into()],
            created_at: Some(Utc::now() - Duration::days(365)),
            last_activity: Some(Utc::now() - Duration::days(2)),
            pipelines: vec![],
            has_ci_config: true,
            submodules: vec![],
            has_owner: true,
        }
    }

    fn pipeline(success: bool, days_ago: i64) -> PipelineRun {
        PipelineRun {
            finished_at: Utc::now() - Duration::days(days_ago),
            success,
            duration_secs: 120.0,
        }
    }

    #[test]
    fn health_is_zero_exactly_when_history_empty() {
        let now = Utc::now();
        let empty = base_facts();
        assert_eq!(health_score(&empty, now), 0.0);

        // Even an all-failure history scores above zero.
        let mut failing = base_facts();
        failing.pipelines = vec![pipeline(false, 1); 5];
        failing.has_ci_config = false;
        failing.last_activity = Some(now - Duration::days(400));
        assert!(health_score(&failing, now) > 0.0);
    }

    #[test]
    fn health_uses_recent_window_only() {
        let now = Utc::now();
        let mut facts = base_facts();
        // 20 recent successes followed by ancient failures.
        facts.pipelines = (0..HEALTH_RECENT_RUNS)
            .map(|i| pipeline(true, i as i64))
            .chain((0..50).map(|i| pipeline(false, 100 + i)))
            .collect();

        let mut all_green = base_facts();
        all_green.pipelines = (0..HEALTH_RECENT_RUNS)
            .map(|i| pipeline(true, i as i64))
            .collect();

        assert_eq!(health_score(&facts, now), health_score(&all_green, now));
    }

    #[test]
    fn hotness_non_increasing_with_staleness() {
        let now = Utc::now();
        let mut previous = f64::INFINITY;
        for days in [0, 1, 7, 30, 90, 365, 3650] {
            let mut facts = base_facts();
            facts.last_activity = Some(now - Duration::days(days));
            let score = hotness_score(&facts, now);
            assert!(
                score <= previous,
                "hotness increased from {previous} to {score} at {days} days"
            );
            previous = score;
        }
    }

    #[test]
    fn hotness_grows_with_contributors() {
        let now = Utc::now();
        let mut few = base_facts();
        few.contributor_count = 1;
        let mut many = base_facts();
        many.contributor_count = 8;
        assert!(hotness_score(&many, now) > hotness_score(&few, now));
    }

    #[test]
    fn complexity_monotonic_in_languages_and_size() {
        let simple = base_facts();
        let mut diverse = base_facts();
        diverse.languages = vec![
            "Rust".into(),
            "Python".into(),
            "Go".into(),
            "Shell".into(),
        ];
        assert!(complexity_score(&diverse) > complexity_score(&simple));

        let mut huge = base_facts();
        huge.size_bytes = 10 * 1024 * 1024 * 1024;
        assert!(complexity_score(&huge) > complexity_score(&simple));
        assert!(complexity_score(&huge) <= 100.0);
    }

    #[test]
    fn orphan_scores_below_threshold() {
        let now = Utc::now();
        let mut orphan = base_facts();
        orphan.contributor_count = 0;
        orphan.commit_count = 0;
        orphan.has_owner = false;
        orphan.last_activity = None;

        assert!(maintenance_score(&orphan, now) < 20.0);
    }

    #[test]
    fn abandoned_repository_maintenance_clamps_to_zero() {
        let now = Utc::now();
        let mut abandoned = base_facts();
        abandoned.contributor_count = 1;
        abandoned.has_owner = false;
        abandoned.last_activity = None;

        // Raw penalties sum below zero; the floor holds.
        assert_eq!(maintenance_score(&abandoned, now), 0.0);
    }

    #[test]
    fn all_scores_bounded() {
        let now = Utc::now();
        let mut extreme = base_facts();
        extreme.size_bytes = u64::MAX;
        extreme.contributor_count = 10_000;
        extreme.commit_count = u64::MAX;
        extreme.languages = (0..100).map(|i| format!("lang{i}")).collect();
        extreme.submodules = (0..100).map(|i| format!("sub{i}")).collect();
        extreme.pipelines = vec![pipeline(true, 0); 100];

        let score = score_repository(&extreme, now);
        for value in [
            score.complexity,
            score.health,
            score.hotness,
            score.maintenance,
        ] {
            assert!((0.0..=100.0).contains(&value), "out of bounds: {value}");
            assert!(!value.is_nan());
        }
    }

    #[test]
    fn scoring_is_deterministic() {
        let now = Utc::now();
        let facts = base_facts();
        assert_eq!(score_repository(&facts, now), score_repository(&facts, now));
    }
}

// SPDX-License-Identifier: AGPL-3.0-or-later
// SPDX-FileCopyrightText: 2025 Jonathan D.A. Jewell
//! Analyze command - run the engine and render the report

use anyhow::{Context, Result};
use owo_colors::OwoColorize;
use repofleet::config::Settings;
use repofleet::engine::Engine;
use repofleet::gitlab::GitLabFacts;
use repofleet::planner::RefreshMode;
use repofleet::report::AnalysisReport;
use repofleet::snapshot::SnapshotStore;
use repofleet::types::Severity;
use std::path::PathBuf;
use tokio::sync::{mpsc, watch};

/// Analyze invocation options
pub struct Options {
    /// Ignore the cache and re-collect everything
    pub full_refresh: bool,
    /// Restrict the run to these repositories; empty means the whole fleet
    pub projects: Vec<String>,
    /// Emit the report as JSON
    pub json: bool,
    /// Suppress progress output
    pub quiet: bool,
    /// Write the report to this file instead of stdout
    pub output: Option<PathBuf>,
}

/// Run one analysis and render the result; returns the process exit code
pub async fn run(settings: &Settings, options: &Options) -> Result<i32> {
    let provider = GitLabFacts::new(&settings.gitlab_config())
        .context("configuring the GitLab client")?;
    let store = SnapshotStore::new(settings.snapshot_path()?);
    let engine = Engine::new(provider, store, settings.engine_config());

    let (cancel_tx, cancel_rx) = watch::channel(false);
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            eprintln!("interrupted, finishing in-flight work...");
            let _ = cancel_tx.send(true);
        }
    });

    let progress = if options.quiet || options.json {
        None
    } else {
        let (tx, rx) = mpsc::unbounded_channel();
        tokio::spawn(print_progress(rx));
        Some(tx)
    };

    let mode = if options.full_refresh {
        RefreshMode::Full
    } else {
        RefreshMode::Incremental
    };
    let scope = if options.projects.is_empty() {
        None
    } else {
        Some(options.projects.as_slice())
    };
    let report = engine.run(mode, scope, cancel_rx, progress).await?;

    let rendered = if options.json {
        report.to_json().context("serializing report")?
    } else {
        render_human(&report)
    };

    match &options.output {
        Some(path) => std::fs::write(path, rendered)
            .with_context(|| format!("writing report to {}", path.display()))?,
        None => println!("{rendered}"),
    }

    if report.summary().partial {
        Ok(crate::partial_exit_code())
    } else {
        Ok(0)
    }
}

async fn print_progress(mut rx: mpsc::UnboundedReceiver<repofleet::pool::ProgressEvent>) {
    let started = std::time::Instant::now();
    while let Some(event) = rx.recv().await {
        let status = if event.success {
            format!("{}", "ok".green())
        } else {
            format!("{}", "failed".red())
        };
        let eta = if event.done > 0 && event.done < event.total {
            let per_task = started.elapsed().as_secs_f64() / event.done as f64;
            format!(", ~{:.0}s left", per_task * (event.total - event.done) as f64)
        } else {
            String::new()
        };
        eprintln!(
            "[{}/{}{eta}] {status:>6}  {}",
            event.done, event.total, event.id
        );
    }
}

fn render_human(report: &AnalysisReport) -> String {
    let fleet = report.fleet();
    let summary = report.summary();
    let mut out = String::new();

    out.push_str(&format!(
        "Fleet: {} repositories, {} commits, {:.1} GiB storage\n",
        fleet.repositories,
        fleet.total_commits,
        fleet.total_storage_bytes as f64 / (1024.0 * 1024.0 * 1024.0),
    ));
    out.push_str(&format!(
        "Active last 90 days: {}   CI configured: {}/{}\n",
        fleet.active_last_90_days, fleet.with_ci_config, fleet.repositories,
    ));
    out.push_str(&format!(
        "Mean health: {:.1}   Mean maintenance: {:.1}\n",
        fleet.mean_health, fleet.mean_maintenance,
    ));

    if report.issues().is_empty() {
        out.push_str(&format!("\n{}\n", "No issues detected".green()));
    } else {
        out.push_str(&format!("\nIssues ({}):\n", report.issues().len()));
        for issue in report.issues() {
            let severity = match issue.severity {
                Severity::Critical => format!("{}", "critical".red().bold()),
                Severity::High => format!("{}", "high".yellow()),
                Severity::Medium => format!("{}", "medium".cyan()),
            };
            out.push_str(&format!("  {severity:>8}  {}\n", issue.description));
            out.push_str(&format!("            {}\n", issue.remediation.dimmed()));
        }
    }

    out.push_str(&format!(
        "\nRun: {} collected, {} reused, {} failed in {:.1}s",
        summary.collected,
        summary.reused,
        summary.failed,
        summary.elapsed.as_secs_f64(),
    ));
    if summary.partial {
        out.push_str(&format!("  {}", "(partial)".yellow()));
    }
    out.push('\n');
    out
}

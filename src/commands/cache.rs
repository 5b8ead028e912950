// SPDX-License-Identifier: AGPL-3.0-or-later
// SPDX-FileCopyrightText: 2025 Jonathan D.A. Jewell
//! Cache command - inspect or clear the snapshot file

use anyhow::{bail, Context, Result};
use owo_colors::OwoColorize;
use repofleet::config::Settings;
use repofleet::snapshot::SnapshotStore;
use repofleet::types::CacheSource;

/// Dispatch a cache action: info, path, or clear
pub fn run(settings: &Settings, action: &str, json: bool) -> Result<()> {
    let store = SnapshotStore::new(settings.snapshot_path()?);

    match action {
        "info" => info(&store, json),
        "path" => {
            println!("{}", store.path().display());
            Ok(())
        }
        "clear" => clear(&store),
        other => bail!("unknown cache action '{other}' (expected info, path, or clear)"),
    }
}

fn info(store: &SnapshotStore, json: bool) -> Result<()> {
    let snapshot = store.load().context("loading snapshot")?;

    if json {
        let fresh = snapshot
            .entries
            .values()
            .filter(|e| e.source == CacheSource::Fresh)
            .count();
        let summary = serde_json::json!({
            "path": store.path(),
            "entries": snapshot.len(),
            "fresh_last_run": fresh,
            "newest_collection": snapshot.newest_collection(),
            "last_full_refresh": snapshot.last_full_refresh,
            "format_version": snapshot.format_version,
        });
        println!("{}", serde_json::to_string_pretty(&summary)?);
        return Ok(());
    }

    println!("Snapshot: {}", store.path().display());
    if snapshot.is_empty() {
        println!("{}", "empty (no runs recorded)".dimmed());
        return Ok(());
    }

    println!("Entries: {}", snapshot.len());
    if let Some(newest) = snapshot.newest_collection() {
        println!("Newest collection: {newest}");
    }
    match snapshot.last_full_refresh {
        Some(ts) => println!("Last full refresh: {ts}"),
        None => println!("Last full refresh: {}", "never".dimmed()),
    }
    Ok(())
}

fn clear(store: &SnapshotStore) -> Result<()> {
    if !store.exists() {
        println!("Nothing to clear: {}", store.path().display());
        return Ok(());
    }
    std::fs::remove_file(store.path())
        .with_context(|| format!("removing {}", store.path().display()))?;
    println!("Removed {}", store.path().display());
    Ok(())
}

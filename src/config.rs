// SPDX-License-Identifier: AGPL-3.0-or-later
// SPDX-FileCopyrightText: 2025 Jonathan D.A. Jewell
//! Settings - defaults, config file, and environment, layered in that order

use crate::engine::EngineConfig;
use crate::gitlab::GitLabConfig;
use crate::issues::IssueThresholds;
use crate::pool::PoolConfig;
use anyhow::{Context, Result};
use directories::ProjectDirs;
use serde::Deserialize;
use std::path::PathBuf;
use std::time::Duration;

/// Resolved application settings
///
/// Layering: built-in defaults, then `config.toml` in the platform
/// config directory, then `REPOFLEET_*` environment variables. Later
/// layers win.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct Settings {
    /// GitLab instance base URL
    pub gitlab_url: String,
    /// Access token; unauthenticated when absent
    pub gitlab_token: Option<String>,
    /// Directory holding the snapshot cache; platform default when absent
    pub data_dir: Option<PathBuf>,
    /// Maximum concurrent collection tasks
    pub concurrency: usize,
    /// Retry attempts per repository after the first try
    pub max_retries: u32,
    /// Per-request timeout in seconds
    pub timeout_secs: u64,
    /// Storage-crisis threshold in GiB of non-LFS repository data
    pub storage_crisis_gib: u64,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            gitlab_url: "https://gitlab.com".into(),
            gitlab_token: None,
            data_dir: None,
            concurrency: 8,
            max_retries: 3,
            timeout_secs: 30,
            storage_crisis_gib: 1,
        }
    }
}

impl Settings {
    /// Load settings from all layers
    pub fn load() -> Result<Self> {
        let mut builder = config::Config::builder();

        if let Some(path) = config_file_path() {
            builder = builder.add_source(config::File::from(path).required(false));
        }
        builder = builder
            .add_source(config::Environment::with_prefix("REPOFLEET").try_parsing(true));

        let overlay: Settings = builder
            .build()
            .context("reading configuration")?
            .try_deserialize::<PartialSettings>()
            .context("parsing configuration")?
            .into();
        Ok(overlay)
    }

    /// Snapshot file location under the resolved data directory
    pub fn snapshot_path(&self) -> Result<PathBuf> {
        Ok(self.resolve_data_dir()?.join("snapshot.json"))
    }

    /// Data directory, explicit or platform default
    pub fn resolve_data_dir(&self) -> Result<PathBuf> {
        if let Some(dir) = &self.data_dir {
            return Ok(dir.clone());
        }
        let dirs = ProjectDirs::from("", "", "repofleet")
            .context("no home directory available to place the data directory")?;
        Ok(dirs.data_dir().to_path_buf())
    }

    /// Provider connection settings
    #[must_use]
    pub fn gitlab_config(&self) -> GitLabConfig {
        GitLabConfig {
            base_url: self.gitlab_url.clone(),
            token: self.gitlab_token.clone(),
            timeout: Duration::from_secs(self.timeout_secs),
        }
    }

    /// Engine tuning derived from these settings
    #[must_use]
    pub fn engine_config(&self) -> EngineConfig {
        EngineConfig {
            pool: PoolConfig {
                concurrency: self.concurrency,
                max_retries: self.max_retries,
                ..PoolConfig::default()
            },
            thresholds: IssueThresholds {
                storage_crisis_bytes: self.storage_crisis_gib * 1024 * 1024 * 1024,
                ..IssueThresholds::default()
            },
        }
    }
}

/// File/env overlay where every field is optional
///
/// Keeps "not set" distinguishable from "set to the default value", so
/// partial config files work as expected.
#[derive(Debug, Default, Deserialize)]
struct PartialSettings {
    gitlab_url: Option<String>,
    gitlab_token: Option<String>,
    data_dir: Option<PathBuf>,
    concurrency: Option<usize>,
    max_retries: Option<u32>,
    timeout_secs: Option<u64>,
    storage_crisis_gib: Option<u64>,
}

impl From<PartialSettings> for Settings {
    fn from(partial: PartialSettings) -> Self {
        let defaults = Settings::default();
        Settings {
            gitlab_url: partial.gitlab_url.unwrap_or(defaults.gitlab_url),
            gitlab_token: partial.gitlab_token.or(defaults.gitlab_token),
            data_dir: partial.data_dir.or(defaults.data_dir),
            concurrency: partial.concurrency.unwrap_or(defaults.concurrency),
            max_retries: partial.max_retries.unwrap_or(defaults.max_retries),
            timeout_secs: partial.timeout_secs.unwrap_or(defaults.timeout_secs),
            storage_crisis_gib: partial
                .storage_crisis_gib
                .unwrap_or(defaults.storage_crisis_gib),
        }
    }
}

fn config_file_path() -> Option<PathBuf> {
    ProjectDirs::from("", "", "repofleet").map(|dirs| dirs.config_dir().join("config.toml"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_sensible() {
        let settings = Settings::default();
        assert_eq!(settings.gitlab_url, "https://gitlab.com");
        assert!(settings.gitlab_token.is_none());
        assert_eq!(settings.concurrency, 8);
    }

    #[test]
    fn partial_overlay_keeps_defaults_for_unset_fields() {
        let partial = PartialSettings {
            concurrency: Some(2),
            gitlab_token: Some("secret".into()),
            ..Default::default()
        };
        let settings: Settings = partial.into();
        assert_eq!(settings.concurrency, 2);
        assert_eq!(settings.gitlab_token.as_deref(), Some("secret"));
        assert_eq!(settings.gitlab_url, "https://gitlab.com");
        assert_eq!(settings.max_retries, 3);
    }

    #[test]
    fn explicit_data_dir_wins_over_platform_default() {
        let settings = Settings {
            data_dir: Some(PathBuf::from("/tmp/fleet-data")),
            ..Default::default()
        };
        assert_eq!(
            settings.snapshot_path().unwrap(),
            PathBuf::from("/tmp/fleet-data/snapshot.json")
        );
    }

    #[test]
    fn storage_crisis_threshold_converts_to_bytes() {
        let settings = Settings {
            storage_crisis_gib: 2,
            ..Default::default()
        };
        assert_eq!(
            settings.engine_config().thresholds.storage_crisis_bytes,
            2 * 1024 * 1024 * 1024
        );
    }
}

// SPDX-License-Identifier: AGPL-3.0-or-later
// SPDX-FileCopyrightText: 2025 Jonathan D.A. Jewell
//! GitLab-backed facts provider
//!
//! Talks to the GitLab REST API (v4). Every fact bundle is assembled
//! from a handful of endpoints per project; the provider itself does no
//! retrying or pacing, that is the work pool's job. It only classifies
//! failures so the pool can decide what to do with them.

use crate::provider::{FactsProvider, FetchError};
use crate::types::{PipelineRun, RepositoryFacts, StorageBreakdown};
use chrono::{DateTime, Utc};
use reqwest::header::{HeaderMap, HeaderValue, RETRY_AFTER};
use reqwest::StatusCode;
use serde::de::DeserializeOwned;
use serde::Deserialize;
use std::collections::BTreeMap;
use std::time::Duration;

/// Number of recent pipelines requested per project
const PIPELINE_PAGE: usize = 20;

/// Page size for paginated listing endpoints
const LIST_PAGE: usize = 100;

/// Connection settings for a GitLab instance
#[derive(Debug, Clone)]
pub struct GitLabConfig {
    /// Instance base URL, e.g. `https://gitlab.example.com`
    pub base_url: String,
    /// Personal or group access token; anonymous when absent
    pub token: Option<String>,
    /// Per-request timeout
    pub timeout: Duration,
}

impl Default for GitLabConfig {
    fn default() -> Self {
        Self {
            base_url: "https://gitlab.com".into(),
            token: None,
            timeout: Duration::from_secs(30),
        }
    }
}

/// Facts provider backed by the GitLab REST API
pub struct GitLabFacts {
    client: reqwest::Client,
    base_url: String,
}

impl GitLabFacts {
    /// Build a provider from connection settings
    pub fn new(config: &GitLabConfig) -> Result<Self, FetchError> {
        let mut headers = HeaderMap::new();
        if let Some(token) = &config.token {
            let value = HeaderValue::from_str(token)
                .map_err(|_| FetchError::Permanent("access token contains invalid characters".into()))?;
            headers.insert("PRIVATE-TOKEN", value);
        }

        let client = reqwest::Client::builder()
            .timeout(config.timeout)
            .default_headers(headers)
            .user_agent(concat!(env!("CARGO_PKG_NAME"), "/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| FetchError::Permanent(format!("building HTTP client: {e}")))?;

        Ok(Self {
            client,
            base_url: config.base_url.trim_end_matches('/').to_string(),
        })
    }

    fn api(&self, path: &str) -> String {
        format!("{}/api/v4/{path}", self.base_url)
    }

    async fn get_json<T: DeserializeOwned>(&self, url: &str) -> Result<T, FetchError> {
        let response = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|e| FetchError::Transient(format!("request to {url}: {e}")))?;

        let status = response.status();
        if !status.is_success() {
            return Err(classify_status(status, response.headers()));
        }

        response
            .json()
            .await
            .map_err(|e| FetchError::Transient(format!("decoding response from {url}: {e}")))
    }

    /// GET that treats 404 as an expected absence
    async fn get_optional(&self, url: &str) -> Result<Option<String>, FetchError> {
        let response = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|e| FetchError::Transient(format!("request to {url}: {e}")))?;

        let status = response.status();
        if status == StatusCode::NOT_FOUND {
            return Ok(None);
        }
        if !status.is_success() {
            return Err(classify_status(status, response.headers()));
        }

        let body = response
            .text()
            .await
            .map_err(|e| FetchError::Transient(format!("reading response from {url}: {e}")))?;
        Ok(Some(body))
    }

    async fn project(&self, id: &str) -> Result<Project, FetchError> {
        let url = self.api(&format!(
            "projects/{}?statistics=true",
            encode_path(id)
        ));
        self.get_json(&url).await
    }

    async fn languages(&self, id: &str) -> Result<Vec<String>, FetchError> {
        let url = self.api(&format!("projects/{}/languages", encode_path(id)));
        let shares: BTreeMap<String, f64> = self.get_json(&url).await?;
        let mut ranked: Vec<(String, f64)> = shares.into_iter().collect();
        ranked.sort_by(|a, b| b.1.total_cmp(&a.1));
        Ok(ranked.into_iter().map(|(lang, _)| lang).collect())
    }

    async fn contributor_count(&self, id: &str) -> Result<u64, FetchError> {
        let mut count = 0u64;
        let mut page = 1u32;
        loop {
            let url = self.api(&format!(
                "projects/{}/repository/contributors?per_page={LIST_PAGE}&page={page}",
                encode_path(id)
            ));
            let batch: Vec<serde_json::Value> = self.get_json(&url).await?;
            count += batch.len() as u64;
            if batch.len() < LIST_PAGE {
                break;
            }
            page += 1;
        }
        Ok(count)
    }

    async fn pipelines(&self, id: &str) -> Result<Vec<PipelineRun>, FetchError> {
        let url = self.api(&format!(
            "projects/{}/pipelines?per_page={PIPELINE_PAGE}&order_by=updated_at&sort=desc",
            encode_path(id)
        ));
        let raw: Vec<Pipeline> = self.get_json(&url).await?;
        Ok(raw.into_iter().filter_map(Pipeline::into_run).collect())
    }

    async fn has_ci_config(&self, id: &str) -> Result<bool, FetchError> {
        let url = self.api(&format!(
            "projects/{}/repository/files/{}/raw",
            encode_path(id),
            encode_path(".gitlab-ci.yml")
        ));
        Ok(self.get_optional(&url).await?.is_some())
    }

    async fn submodules(&self, id: &str) -> Result<Vec<String>, FetchError> {
        let url = self.api(&format!(
            "projects/{}/repository/files/{}/raw",
            encode_path(id),
            encode_path(".gitmodules")
        ));
        match self.get_optional(&url).await? {
            Some(content) => Ok(parse_gitmodules(&content)),
            None => Ok(vec![]),
        }
    }
}

impl FactsProvider for GitLabFacts {
    /// List visible projects via keyset pagination
    ///
    /// Keyset cursors come back in the `Link: <...>; rel="next"` header
    /// and stay stable while projects are created or deleted, unlike
    /// offset pages.
    async fn list_repositories(&self) -> Result<Vec<String>, FetchError> {
        let mut ids = Vec::new();
        let mut url = self.api(&format!(
            "projects?membership=true&archived=false&simple=true&per_page={LIST_PAGE}&pagination=keyset&order_by=id&sort=asc"
        ));
        loop {
            let response = self
                .client
                .get(&url)
                .send()
                .await
                .map_err(|e| FetchError::Transient(format!("request to {url}: {e}")))?;

            let status = response.status();
            if !status.is_success() {
                return Err(classify_status(status, response.headers()));
            }

            let next = next_page_link(response.headers());
            let batch: Vec<ProjectSummary> = response
                .json()
                .await
                .map_err(|e| FetchError::Transient(format!("decoding response from {url}: {e}")))?;
            ids.extend(batch.into_iter().map(|p| p.path_with_namespace));

            match next {
                Some(next) => url = next,
                None => break,
            }
        }
        ids.sort();
        Ok(ids)
    }

    async fn fetch(&self, id: &str) -> Result<RepositoryFacts, FetchError> {
        let project = self.project(id).await?;
        let languages = self.languages(id).await?;
        let contributor_count = self.contributor_count(id).await?;
        let pipelines = self.pipelines(id).await?;
        let has_ci_config = self.has_ci_config(id).await?;
        let submodules = self.submodules(id).await?;

        let statistics = project.statistics.unwrap_or_default();
        Ok(RepositoryFacts {
            id: project.path_with_namespace,
            name: project.name,
            size_bytes: statistics.repository_size + statistics.lfs_objects_size,
            storage: StorageBreakdown {
                repository_bytes: statistics.repository_size,
                lfs_bytes: statistics.lfs_objects_size,
                artifacts_bytes: statistics.job_artifacts_size,
                packages_bytes: statistics.packages_size,
                container_registry_bytes: statistics.container_registry_size,
            },
            commit_count: statistics.commit_count,
            contributor_count,
            primary_language: languages.first().cloned(),
            languages,
            created_at: project.created_at,
            last_activity: project.last_activity_at,
            pipelines,
            has_ci_config,
            submodules,
            has_owner: project.owner.is_some(),
        })
    }

    async fn probe_last_activity(
        &self,
        id: &str,
    ) -> Result<Option<DateTime<Utc>>, FetchError> {
        let url = self.api(&format!("projects/{}", encode_path(id)));
        let summary: ProjectSummary = self.get_json(&url).await?;
        Ok(summary.last_activity_at)
    }
}

/// Map an unsuccessful HTTP status to a fetch error class
fn classify_status(status: StatusCode, headers: &HeaderMap) -> FetchError {
    match status {
        StatusCode::TOO_MANY_REQUESTS => FetchError::RateLimited {
            retry_after: retry_after_hint(headers),
        },
        StatusCode::NOT_FOUND | StatusCode::FORBIDDEN | StatusCode::UNAUTHORIZED => {
            FetchError::Permanent(format!("origin returned {status}"))
        }
        other => FetchError::Transient(format!("origin returned {other}")),
    }
}

/// Extract the `rel="next"` target from a `Link` header, if any
fn next_page_link(headers: &HeaderMap) -> Option<String> {
    let link = headers.get(reqwest::header::LINK)?.to_str().ok()?;
    link.split(',').find_map(|part| {
        let (target, params) = part.split_once(';')?;
        if params.contains("rel=\"next\"") {
            let target = target.trim().trim_start_matches('<').trim_end_matches('>');
            Some(target.to_string())
        } else {
            None
        }
    })
}

fn retry_after_hint(headers: &HeaderMap) -> Option<Duration> {
    headers
        .get(RETRY_AFTER)?
        .to_str()
        .ok()?
        .parse::<u64>()
        .ok()
        .map(Duration::from_secs)
}

/// Percent-encode a project path for use as a URL path segment
fn encode_path(id: &str) -> String {
    id.replace('/', "%2F").replace('.', "%2E")
}

/// Extract referenced project paths from a `.gitmodules` file
///
/// Relative URLs (`../../group/project.git`) and absolute same-host
/// URLs both normalize to `group/project`. Entries that do not look
/// like a project path are kept verbatim; the cycle detector ignores
/// references it cannot resolve within the fleet anyway.
fn parse_gitmodules(content: &str) -> Vec<String> {
    let mut refs = Vec::new();
    for line in content.lines() {
        let line = line.trim();
        let Some(url) = line.strip_prefix("url") else {
            continue;
        };
        let Some(url) = url.trim_start().strip_prefix('=') else {
            continue;
        };
        let normalized = normalize_submodule_url(url.trim());
        if !normalized.is_empty() && !refs.contains(&normalized) {
            refs.push(normalized);
        }
    }
    refs
}

fn normalize_submodule_url(url: &str) -> String {
    let url = url.trim_end_matches(".git");

    // Absolute http(s) or ssh URL: take the path after the host.
    let path = if let Some((_, rest)) = url.split_once("://") {
        rest.split_once('/').map(|(_, p)| p).unwrap_or("")
    } else if let Some((_, rest)) = url.split_once('@') {
        // scp-like syntax: git@host:group/project
        rest.split_once(':').map(|(_, p)| p).unwrap_or("")
    } else {
        // Relative URL: strip leading ./ and ../ segments.
        let mut rest = url;
        loop {
            if let Some(stripped) = rest.strip_prefix("../") {
                rest = stripped;
            } else if let Some(stripped) = rest.strip_prefix("./") {
                rest = stripped;
            } else {
                break;
            }
        }
        rest
    };

    path.trim_matches('/').to_string()
}

#[derive(Debug, Deserialize)]
struct ProjectSummary {
    path_with_namespace: String,
    #[serde(default)]
    last_activity_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Deserialize)]
struct Project {
    name: String,
    path_with_namespace: String,
    #[serde(default)]
    created_at: Option<DateTime<Utc>>,
    #[serde(default)]
    last_activity_at: Option<DateTime<Utc>>,
    #[serde(default)]
    owner: Option<serde_json::Value>,
    #[serde(default)]
    statistics: Option<ProjectStatistics>,
}

#[derive(Debug, Default, Deserialize)]
struct ProjectStatistics {
    #[serde(default)]
    commit_count: u64,
    #[serde(default)]
    repository_size: u64,
    #[serde(default)]
    lfs_objects_size: u64,
    #[serde(default)]
    job_artifacts_size: u64,
    #[serde(default)]
    packages_size: u64,
    #[serde(default)]
    container_registry_size: u64,
}

#[derive(Debug, Deserialize)]
struct Pipeline {
    status: String,
    #[serde(default)]
    created_at: Option<DateTime<Utc>>,
    #[serde(default)]
    updated_at: Option<DateTime<Utc>>,
}

impl Pipeline {
    /// Convert to a pipeline run; skips pipelines still in flight
    fn into_run(self) -> Option<PipelineRun> {
        let finished_at = self.updated_at?;
        let success = match self.status.as_str() {
            "success" => true,
            "failed" | "canceled" => false,
            // running, pending, skipped, manual: not a finished outcome
            _ => return None,
        };
        let duration_secs = self
            .created_at
            .map_or(0.0, |c| (finished_at - c).num_seconds().max(0) as f64);
        Some(PipelineRun {
            finished_at,
            success,
            duration_secs,
        })
    }
}

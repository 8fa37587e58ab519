//! GitHub implementation of the [`PrProvider`] trait over the REST API.
//!
//! Covers exactly the operations the pipeline invokes: create a pull
//! request, list check runs for a commit, merge, and best-effort branch
//! deletion.

use crate::collaborators::PrProvider;
use crate::models::{CheckConclusion, CheckRun, CheckStatus, PrResult, PrState};
use anyhow::{Context, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::warn;

const GITHUB_API_BASE: &str = "https://api.github.com";
const USER_AGENT: &str = "conveyor";

/// Request body for PR creation.
#[derive(Debug, Serialize)]
struct CreatePrRequest<'a> {
    title: &'a str,
    head: &'a str,
    base: &'a str,
    body: &'a str,
}

/// Branch end of a pull request (subset of fields we care about).
#[derive(Debug, Deserialize)]
struct PrBranch {
    #[serde(rename = "ref")]
    name: String,
    #[serde(default)]
    sha: String,
}

/// Response from the PR creation endpoint.
#[derive(Debug, Deserialize)]
struct CreatePrResponse {
    html_url: String,
    number: u64,
    title: String,
    #[serde(default)]
    body: Option<String>,
    head: PrBranch,
    base: PrBranch,
}

/// One check run as GitHub reports it. Status and conclusion arrive as
/// strings and are mapped leniently: unknown values degrade with a warning
/// instead of failing the poll.
#[derive(Debug, Deserialize)]
struct GitHubCheckRun {
    name: String,
    status: String,
    #[serde(default)]
    conclusion: Option<String>,
}

#[derive(Debug, Deserialize)]
struct CheckRunsResponse {
    #[serde(default)]
    check_runs: Vec<GitHubCheckRun>,
}

fn parse_status(value: &str) -> CheckStatus {
    match value {
        "queued" => CheckStatus::Queued,
        "in_progress" => CheckStatus::InProgress,
        "completed" => CheckStatus::Completed,
        other => {
            warn!(target: "conveyor::github", status = other, "unknown check status, treating as queued");
            CheckStatus::Queued
        }
    }
}

fn parse_conclusion(value: &str) -> Option<CheckConclusion> {
    match value {
        "success" => Some(CheckConclusion::Success),
        "failure" => Some(CheckConclusion::Failure),
        "neutral" => Some(CheckConclusion::Neutral),
        "cancelled" => Some(CheckConclusion::Cancelled),
        "skipped" => Some(CheckConclusion::Skipped),
        "timed_out" => Some(CheckConclusion::TimedOut),
        "action_required" => Some(CheckConclusion::ActionRequired),
        other => {
            warn!(target: "conveyor::github", conclusion = other, "unknown check conclusion, treating as neutral");
            Some(CheckConclusion::Neutral)
        }
    }
}

impl GitHubCheckRun {
    fn into_check_run(self) -> CheckRun {
        CheckRun {
            name: self.name,
            status: parse_status(&self.status),
            conclusion: self.conclusion.as_deref().and_then(parse_conclusion),
        }
    }
}

/// PR provider backed by the GitHub REST API.
pub struct GitHubPrProvider {
    client: reqwest::Client,
    token: String,
    /// `owner/repo` slug.
    owner_repo: String,
    base_branch: String,
    api_base: String,
}

impl GitHubPrProvider {
    pub fn new(token: impl Into<String>, owner_repo: impl Into<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            token: token.into(),
            owner_repo: owner_repo.into(),
            base_branch: "main".to_string(),
            api_base: GITHUB_API_BASE.to_string(),
        }
    }

    pub fn with_base_branch(mut self, branch: impl Into<String>) -> Self {
        self.base_branch = branch.into();
        self
    }

    /// Override the API base URL (for self-hosted GitHub or tests).
    pub fn with_api_base(mut self, base: impl Into<String>) -> Self {
        self.api_base = base.into();
        self
    }

    fn request(&self, method: reqwest::Method, path: &str) -> reqwest::RequestBuilder {
        self.client
            .request(method, format!("{}{}", self.api_base, path))
            .header("Authorization", format!("Bearer {}", self.token))
            .header("User-Agent", USER_AGENT)
            .header("Accept", "application/vnd.github+json")
    }
}

#[async_trait]
impl PrProvider for GitHubPrProvider {
    async fn create_pr(&self, branch: &str, title: &str, body: &str) -> Result<PrResult> {
        let request = CreatePrRequest {
            title,
            head: branch,
            base: &self.base_branch,
            body,
        };
        let resp: CreatePrResponse = self
            .request(
                reqwest::Method::POST,
                &format!("/repos/{}/pulls", self.owner_repo),
            )
            .json(&request)
            .send()
            .await
            .context("Failed to send PR creation request to GitHub")?
            .error_for_status()
            .context("GitHub PR creation returned error status")?
            .json()
            .await
            .context("Failed to parse PR creation response from GitHub")?;

        Ok(PrResult {
            url: resp.html_url,
            number: resp.number,
            title: resp.title,
            body: resp.body.unwrap_or_default(),
            base_branch: resp.base.name,
            head_branch: resp.head.name,
            head_sha: resp.head.sha,
            state: PrState::Open,
            auto_merge: false,
        })
    }

    async fn list_checks(&self, commit_sha: &str) -> Result<Vec<CheckRun>> {
        let resp: CheckRunsResponse = self
            .request(
                reqwest::Method::GET,
                &format!("/repos/{}/commits/{}/check-runs", self.owner_repo, commit_sha),
            )
            .send()
            .await
            .context("Failed to send check-runs request to GitHub")?
            .error_for_status()
            .context("GitHub check-runs API returned error status")?
            .json()
            .await
            .context("Failed to parse check-runs response from GitHub")?;

        Ok(resp
            .check_runs
            .into_iter()
            .map(GitHubCheckRun::into_check_run)
            .collect())
    }

    async fn merge(&self, pr_number: u64) -> Result<()> {
        self.request(
            reqwest::Method::PUT,
            &format!("/repos/{}/pulls/{}/merge", self.owner_repo, pr_number),
        )
        .json(&serde_json::json!({}))
        .send()
        .await
        .context("Failed to send merge request to GitHub")?
        .error_for_status()
        .context("GitHub merge returned error status")?;
        Ok(())
    }

    async fn delete_branch(&self, branch: &str) -> Result<()> {
        self.request(
            reqwest::Method::DELETE,
            &format!("/repos/{}/git/refs/heads/{}", self.owner_repo, branch),
        )
        .send()
        .await
        .context("Failed to send branch deletion request to GitHub")?
        .error_for_status()
        .context("GitHub branch deletion returned error status")?;
        Ok(())
    }
}

use anyhow::{anyhow, Context, Result};
use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;
use tracing::{error, info, warn};

const DEFAULT_API_BASE: &str = "https://api.github.com";
const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// Thin client for the GitHub REST API, authenticated with a bearer token
/// supplied at startup.
#[derive(Clone)]
pub struct GitHubClient {
    client: Client,
    api_base: String,
    access_token: String,
}

#[derive(Debug, Deserialize)]
pub struct PullRequestResponse {
    pub number: u64,
    pub head: PullRequestRefResponse,
    pub base: PullRequestRefResponse,
    pub user: UserResponse,
}

#[derive(Debug, Deserialize)]
pub struct PullRequestRefResponse {
    pub sha: String,
    #[serde(rename = "ref")]
    pub ref_name: String,
}

#[derive(Debug, Deserialize)]
pub struct UserResponse {
    pub login: String,
}

#[derive(Debug, Deserialize)]
pub struct IssueComment {
    pub body: String,
    pub user: UserResponse,
}

#[derive(Debug, Deserialize)]
pub struct PullRequestCommit {
    pub sha: String,
    pub commit: CommitDetail,
}

#[derive(Debug, Deserialize)]
pub struct CommitDetail {
    pub message: String,
}

impl PullRequestCommit {
    /// First line of the commit message.
    pub fn subject(&self) -> &str {
        self.commit.message.lines().next().unwrap_or("")
    }
}

/// State of a commit status context.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CommitStatusState {
    Success,
    Failure,
    Pending,
    Error,
}

impl fmt::Display for CommitStatusState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CommitStatusState::Success => write!(f, "success"),
            CommitStatusState::Failure => write!(f, "failure"),
            CommitStatusState::Pending => write!(f, "pending"),
            CommitStatusState::Error => write!(f, "error"),
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct CombinedStatusResponse {
    pub state: String,
    pub statuses: Vec<StatusEntry>,
}

#[derive(Debug, Deserialize)]
pub struct StatusEntry {
    pub context: String,
    pub state: CommitStatusState,
    pub description: Option<String>,
}

/// Outcome of a merge call.
///
/// Rejection (merge conflict, or the head SHA changed since the caller
/// evaluated it) is an expected outcome, not an API error.
#[derive(Debug)]
pub enum MergeAttempt {
    Merged,
    Rejected { reason: String },
}

#[derive(Debug, Serialize)]
struct CreateCommentRequest {
    body: String,
}

#[derive(Debug, Serialize)]
struct CreateStatusRequest<'a> {
    state: CommitStatusState,
    context: &'a str,
    description: &'a str,
}

#[derive(Debug, Serialize)]
struct MergeRequest<'a> {
    sha: &'a str,
}

#[derive(Debug, Deserialize)]
struct MergeErrorResponse {
    message: String,
}

impl GitHubClient {
    pub fn new(access_token: String) -> Result<Self> {
        Self::with_api_base(access_token, DEFAULT_API_BASE.to_string())
    }

    /// Construct a client against a non-default API base (used by tests to
    /// point at a local mock server).
    pub fn with_api_base(access_token: String, api_base: String) -> Result<Self> {
        let client = Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .user_agent("reviewbot")
            .build()
            .context("Failed to build HTTP client")?;

        Ok(GitHubClient {
            client,
            api_base: api_base.trim_end_matches('/').to_string(),
            access_token,
        })
    }

    pub async fn get_pull_request(
        &self,
        repo_owner: &str,
        repo_name: &str,
        pr_number: u64,
    ) -> Result<PullRequestResponse> {
        let url = format!(
            "{}/repos/{}/{}/pulls/{}",
            self.api_base, repo_owner, repo_name, pr_number
        );

        info!(
            "Fetching PR #{} in {}/{}",
            pr_number, repo_owner, repo_name
        );

        let response = self
            .client
            .get(&url)
            .header("Authorization", format!("Bearer {}", self.access_token))
            .header("Accept", "application/vnd.github.v3+json")
            .send()
            .await
            .context("Failed to send pull request request")?;

        if !response.status().is_success() {
            let status = response.status();
            let error_text = response
                .text()
                .await
                .context("Failed to read error response body")?;
            error!(
                "GitHub API error fetching PR: {} - {}",
                status, error_text
            );
            return Err(anyhow!(
                "GitHub API error fetching PR: {} - {}",
                status,
                error_text
            ));
        }

        response
            .json()
            .await
            .context("Failed to parse pull request response")
    }

    pub async fn list_pull_request_commits(
        &self,
        repo_owner: &str,
        repo_name: &str,
        pr_number: u64,
    ) -> Result<Vec<PullRequestCommit>> {
        let url = format!(
            "{}/repos/{}/{}/pulls/{}/commits?per_page=100",
            self.api_base, repo_owner, repo_name, pr_number
        );

        info!(
            "Listing commits of PR #{} in {}/{}",
            pr_number, repo_owner, repo_name
        );

        let response = self
            .client
            .get(&url)
            .header("Authorization", format!("Bearer {}", self.access_token))
            .header("Accept", "application/vnd.github.v3+json")
            .send()
            .await
            .context("Failed to send PR commits request")?;

        if !response.status().is_success() {
            let status = response.status();
            let error_text = response
                .text()
                .await
                .context("Failed to read error response body")?;
            error!(
                "GitHub API error listing PR commits: {} - {}",
                status, error_text
            );
            return Err(anyhow!(
                "GitHub API error listing PR commits: {} - {}",
                status,
                error_text
            ));
        }

        response
            .json()
            .await
            .context("Failed to parse PR commits response")
    }

    pub async fn list_issue_comments(
        &self,
        repo_owner: &str,
        repo_name: &str,
        issue_number: u64,
    ) -> Result<Vec<IssueComment>> {
        let url = format!(
            "{}/repos/{}/{}/issues/{}/comments?per_page=100",
            self.api_base, repo_owner, repo_name, issue_number
        );

        info!(
            "Listing comments on #{} in {}/{}",
            issue_number, repo_owner, repo_name
        );

        let response = self
            .client
            .get(&url)
            .header("Authorization", format!("Bearer {}", self.access_token))
            .header("Accept", "application/vnd.github.v3+json")
            .send()
            .await
            .context("Failed to send issue comments request")?;

        if !response.status().is_success() {
            let status = response.status();
            let error_text = response
                .text()
                .await
                .context("Failed to read error response body")?;
            error!(
                "GitHub API error listing comments: {} - {}",
                status, error_text
            );
            return Err(anyhow!(
                "GitHub API error listing comments: {} - {}",
                status,
                error_text
            ));
        }

        response
            .json()
            .await
            .context("Failed to parse issue comments response")
    }

    pub async fn create_comment(
        &self,
        repo_owner: &str,
        repo_name: &str,
        issue_number: u64,
        body: &str,
    ) -> Result<()> {
        let url = format!(
            "{}/repos/{}/{}/issues/{}/comments",
            self.api_base, repo_owner, repo_name, issue_number
        );

        info!(
            "Posting comment to #{} in {}/{}",
            issue_number, repo_owner, repo_name
        );

        let request_body = CreateCommentRequest {
            body: body.to_string(),
        };

        let response = self
            .client
            .post(&url)
            .header("Authorization", format!("Bearer {}", self.access_token))
            .header("Accept", "application/vnd.github.v3+json")
            .json(&request_body)
            .send()
            .await
            .context("Failed to send comment request")?;

        if !response.status().is_success() {
            let status = response.status();
            let error_text = response
                .text()
                .await
                .context("Failed to read error response body")?;
            error!(
                "GitHub API error posting comment: {} - {}",
                status, error_text
            );
            return Err(anyhow!(
                "GitHub API error posting comment: {} - {}",
                status,
                error_text
            ));
        }

        Ok(())
    }

    /// Upsert a status context on a commit. GitHub keeps the newest status
    /// per context, so posting is effectively idempotent for our purposes.
    pub async fn create_commit_status(
        &self,
        repo_owner: &str,
        repo_name: &str,
        sha: &str,
        state: CommitStatusState,
        context: &str,
        description: &str,
    ) -> Result<()> {
        let url = format!(
            "{}/repos/{}/{}/statuses/{}",
            self.api_base, repo_owner, repo_name, sha
        );

        info!(
            "Setting status {} to {} on {} in {}/{}",
            context,
            state,
            &sha[..7.min(sha.len())],
            repo_owner,
            repo_name
        );

        let request_body = CreateStatusRequest {
            state,
            context,
            description,
        };

        let response = self
            .client
            .post(&url)
            .header("Authorization", format!("Bearer {}", self.access_token))
            .header("Accept", "application/vnd.github.v3+json")
            .json(&request_body)
            .send()
            .await
            .context("Failed to send commit status request")?;

        if !response.status().is_success() {
            let status = response.status();
            let error_text = response
                .text()
                .await
                .context("Failed to read error response body")?;
            error!(
                "GitHub API error setting commit status: {} - {}",
                status, error_text
            );
            return Err(anyhow!(
                "GitHub API error setting commit status: {} - {}",
                status,
                error_text
            ));
        }

        Ok(())
    }

    pub async fn get_combined_status(
        &self,
        repo_owner: &str,
        repo_name: &str,
        sha: &str,
    ) -> Result<CombinedStatusResponse> {
        let url = format!(
            "{}/repos/{}/{}/commits/{}/status",
            self.api_base, repo_owner, repo_name, sha
        );

        info!(
            "Fetching combined status of {} in {}/{}",
            &sha[..7.min(sha.len())],
            repo_owner,
            repo_name
        );

        let response = self
            .client
            .get(&url)
            .header("Authorization", format!("Bearer {}", self.access_token))
            .header("Accept", "application/vnd.github.v3+json")
            .send()
            .await
            .context("Failed to send combined status request")?;

        if !response.status().is_success() {
            let status = response.status();
            let error_text = response
                .text()
                .await
                .context("Failed to read error response body")?;
            error!(
                "GitHub API error fetching combined status: {} - {}",
                status, error_text
            );
            return Err(anyhow!(
                "GitHub API error fetching combined status: {} - {}",
                status,
                error_text
            ));
        }

        response
            .json()
            .await
            .context("Failed to parse combined status response")
    }

    /// Merge the PR, guarded on `head_sha`: GitHub rejects the call if the
    /// head branch no longer points at that SHA, which is exactly the
    /// stale-approval protection the merge flow relies on.
    pub async fn merge_pull_request(
        &self,
        repo_owner: &str,
        repo_name: &str,
        pr_number: u64,
        head_sha: &str,
    ) -> Result<MergeAttempt> {
        let url = format!(
            "{}/repos/{}/{}/pulls/{}/merge",
            self.api_base, repo_owner, repo_name, pr_number
        );

        info!(
            "Merging PR #{} in {}/{} at {}",
            pr_number,
            repo_owner,
            repo_name,
            &head_sha[..7.min(head_sha.len())]
        );

        let request_body = MergeRequest { sha: head_sha };

        let response = self
            .client
            .put(&url)
            .header("Authorization", format!("Bearer {}", self.access_token))
            .header("Accept", "application/vnd.github.v3+json")
            .json(&request_body)
            .send()
            .await
            .context("Failed to send merge request")?;

        let status = response.status();

        // 405: not mergeable (conflict); 409: head SHA mismatch.
        if status == StatusCode::METHOD_NOT_ALLOWED || status == StatusCode::CONFLICT {
            let reason = response
                .json::<MergeErrorResponse>()
                .await
                .map(|e| e.message)
                .unwrap_or_else(|_| format!("merge rejected with HTTP {status}"));
            warn!("Merge of PR #{} rejected: {}", pr_number, reason);
            return Ok(MergeAttempt::Rejected { reason });
        }

        if !status.is_success() {
            let error_text = response
                .text()
                .await
                .context("Failed to read error response body")?;
            error!("GitHub API error merging PR: {} - {}", status, error_text);
            return Err(anyhow!(
                "GitHub API error merging PR: {} - {}",
                status,
                error_text
            ));
        }

        Ok(MergeAttempt::Merged)
    }
}

//! Merge gating and execution.
//!
//! A merge invocation evaluates everything against a single head SHA: the
//! SHA fetched at the start of the invocation is the SHA whose approvals and
//! squash-readiness are checked, and the same SHA guards the merge call
//! itself. Approvals can never silently carry over to a newer, unreviewed
//! head; if the branch moves in between, GitHub rejects the guarded merge
//! and the operator has to re-issue the command.

use anyhow::Result;
use std::fmt;
use tracing::{info, warn};

use crate::command::{classify_comment, Command};
use crate::config::MergePolicy;
use crate::github::{CommitStatusState, GitHubClient, IssueComment, MergeAttempt};
use crate::status;

/// Where a merge invocation ended up.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MergeState {
    /// A gate is unmet; no merge was attempted.
    Blocked(String),
    /// All gates passed; the merge call is about to be issued.
    Ready,
    /// The platform merged the evaluated SHA.
    Merged,
    /// The merge call was rejected (conflict or moved head). Never retried
    /// automatically.
    Failed(String),
}

impl MergeState {
    /// Response message for the webhook delivery.
    pub fn describe(&self) -> String {
        match self {
            MergeState::Blocked(reason) => format!("Not merged: {reason}."),
            MergeState::Ready => "Ready to merge.".to_string(),
            MergeState::Merged => "Merged.".to_string(),
            MergeState::Failed(reason) => format!("Merge failed: {reason}."),
        }
    }
}

impl fmt::Display for MergeState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MergeState::Blocked(reason) => write!(f, "blocked ({reason})"),
            MergeState::Ready => write!(f, "ready"),
            MergeState::Merged => write!(f, "merged"),
            MergeState::Failed(reason) => write!(f, "failed ({reason})"),
        }
    }
}

/// Distinct commenters whose comments carry the approval signal, in order of
/// first approval. The PR author only counts if the policy says so.
pub fn approvers<'a>(
    comments: &'a [IssueComment],
    author: &str,
    policy: &MergePolicy,
) -> Vec<&'a str> {
    let mut logins: Vec<&str> = Vec::new();
    for comment in comments {
        if classify_comment(&comment.body) != Some(Command::Approval) {
            continue;
        }
        let login = comment.user.login.as_str();
        if !policy.count_author_approval && login == author {
            continue;
        }
        if !logins.contains(&login) {
            logins.push(login);
        }
    }
    logins
}

/// Evaluate the merge gates. Returns `Ready` or `Blocked`; the merge attempt
/// itself is the caller's job.
pub fn evaluate_gates(
    approval_count: usize,
    squash_status: Option<CommitStatusState>,
    policy: &MergePolicy,
) -> MergeState {
    if approval_count < policy.required_approvals {
        return MergeState::Blocked(format!(
            "insufficient approvals ({} of {} required)",
            approval_count, policy.required_approvals
        ));
    }

    if policy.require_squash_check {
        match squash_status {
            Some(CommitStatusState::Success) => {}
            Some(CommitStatusState::Failure) => {
                return MergeState::Blocked("unsquashed fixup commits are present".to_string());
            }
            Some(_) => {
                return MergeState::Blocked(
                    "the squash readiness check has not passed yet".to_string(),
                );
            }
            // An unreported gate is indistinguishable from a check that
            // never ran, so it blocks.
            None => {
                return MergeState::Blocked(
                    "the squash readiness check has not run yet".to_string(),
                );
            }
        }
    }

    MergeState::Ready
}

fn peer_description(approver_logins: &[&str], required: usize) -> String {
    if approver_logins.is_empty() {
        format!("No approvals yet ({required} required)")
    } else {
        format!(
            "Approved by {} ({} of {} required)",
            approver_logins.join(", "),
            approver_logins.len(),
            required
        )
    }
}

/// Full merge-command flow.
///
/// `Err` is reserved for failures that prevent the gates from being reported
/// (the merge is aborted in that case: an unreported gate must not be
/// assumed satisfied).
pub async fn handle_merge_command(
    github: &GitHubClient,
    policy: &MergePolicy,
    repo_owner: &str,
    repo_name: &str,
    pr_number: u64,
) -> Result<MergeState> {
    // The head SHA fetched here is the one evaluated, reported on, and
    // merged. It is deliberately never refreshed within this invocation.
    let pr = github
        .get_pull_request(repo_owner, repo_name, pr_number)
        .await?;
    let head_sha = pr.head.sha.clone();

    let comments = github
        .list_issue_comments(repo_owner, repo_name, pr_number)
        .await?;
    let approver_logins = approvers(&comments, &pr.user.login, policy);
    let threshold_met = approver_logins.len() >= policy.required_approvals;

    info!(
        "Merge command for {}/{}#{} at {}: {} approval(s) from [{}]",
        repo_owner,
        repo_name,
        pr_number,
        &head_sha[..7.min(head_sha.len())],
        approver_logins.len(),
        approver_logins.join(", ")
    );

    // Gating status: if this cannot be reported, the merge must not proceed.
    let peer_state = if threshold_met {
        CommitStatusState::Success
    } else {
        CommitStatusState::Failure
    };
    status::report_peer_review(
        github,
        repo_owner,
        repo_name,
        &head_sha,
        peer_state,
        &peer_description(&approver_logins, policy.required_approvals),
    )
    .await?;

    let squash_status = if policy.require_squash_check {
        let combined = github
            .get_combined_status(repo_owner, repo_name, &head_sha)
            .await?;
        combined
            .statuses
            .into_iter()
            .find(|s| s.context == status::SQUASH_CONTEXT)
            .map(|s| s.state)
    } else {
        None
    };

    if let MergeState::Blocked(reason) =
        evaluate_gates(approver_logins.len(), squash_status, policy)
    {
        github
            .create_comment(
                repo_owner,
                repo_name,
                pr_number,
                &format!("Not merging: {reason}."),
            )
            .await?;
        return Ok(MergeState::Blocked(reason));
    }

    match github
        .merge_pull_request(repo_owner, repo_name, pr_number, &head_sha)
        .await?
    {
        MergeAttempt::Merged => {
            info!(
                "Merged {}/{}#{} at {}",
                repo_owner,
                repo_name,
                pr_number,
                &head_sha[..7.min(head_sha.len())]
            );
            Ok(MergeState::Merged)
        }
        MergeAttempt::Rejected { reason } => {
            warn!(
                "Merge of {}/{}#{} rejected: {}",
                repo_owner, repo_name, pr_number, reason
            );
            github
                .create_comment(
                    repo_owner,
                    repo_name,
                    pr_number,
                    &format!(
                        "Merge failed: {reason}. Resolve the problem and comment \"merge\" again."
                    ),
                )
                .await?;
            Ok(MergeState::Failed(reason))
        }
    }
}

/// An approval comment arrived: recompute the approval set and publish the
/// peer-review context on the PR's current head.
pub async fn handle_approval_comment(
    github: &GitHubClient,
    policy: &MergePolicy,
    repo_owner: &str,
    repo_name: &str,
    pr_number: u64,
) -> Result<()> {
    let pr = github
        .get_pull_request(repo_owner, repo_name, pr_number)
        .await?;
    let comments = github
        .list_issue_comments(repo_owner, repo_name, pr_number)
        .await?;

    let approver_logins = approvers(&comments, &pr.user.login, policy);
    let state = if approver_logins.len() >= policy.required_approvals {
        CommitStatusState::Success
    } else {
        CommitStatusState::Failure
    };

    status::report_peer_review(
        github,
        repo_owner,
        repo_name,
        &pr.head.sha,
        state,
        &peer_description(&approver_logins, policy.required_approvals),
    )
    .await
}

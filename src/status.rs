//! Commit-status contexts published on pull request heads.

use anyhow::Result;

use crate::github::{CommitStatusState, GitHubClient};

/// Context reporting whether the branch is free of fixup/squash commits.
pub const SQUASH_CONTEXT: &str = "review/squash";

/// Context reporting whether the peer-review threshold is met.
pub const PEER_REVIEW_CONTEXT: &str = "review/peer";

/// GitHub caps status descriptions at 140 characters.
const MAX_DESCRIPTION_LEN: usize = 140;

pub async fn report_squash_readiness(
    github: &GitHubClient,
    repo_owner: &str,
    repo_name: &str,
    sha: &str,
    state: CommitStatusState,
    description: &str,
) -> Result<()> {
    github
        .create_commit_status(
            repo_owner,
            repo_name,
            sha,
            state,
            SQUASH_CONTEXT,
            &clamp_description(description),
        )
        .await
}

pub async fn report_peer_review(
    github: &GitHubClient,
    repo_owner: &str,
    repo_name: &str,
    sha: &str,
    state: CommitStatusState,
    description: &str,
) -> Result<()> {
    github
        .create_commit_status(
            repo_owner,
            repo_name,
            sha,
            state,
            PEER_REVIEW_CONTEXT,
            &clamp_description(description),
        )
        .await
}

/// Truncate a description to GitHub's limit on a char boundary.
pub fn clamp_description(description: &str) -> String {
    if description.chars().count() <= MAX_DESCRIPTION_LEN {
        return description.to_string();
    }
    let truncated: String = description.chars().take(MAX_DESCRIPTION_LEN - 3).collect();
    format!("{truncated}...")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_short_description_unchanged() {
        assert_eq!(clamp_description("all good"), "all good");
    }

    #[test]
    fn test_long_description_truncated_with_ellipsis() {
        let long = "x".repeat(200);
        let clamped = clamp_description(&long);
        assert_eq!(clamped.chars().count(), 140);
        assert!(clamped.ends_with("..."));
    }

    #[test]
    fn test_truncation_respects_char_boundaries() {
        let long = "\u{00E9}".repeat(200);
        let clamped = clamp_description(&long);
        assert_eq!(clamped.chars().count(), 140);
    }
}

//! Squash-readiness checking.
//!
//! A branch is squash-ready when none of its commits carry an amend-marker
//! subject (`fixup!` or `squash!`). The check is purely observational: it
//! reads the PR's commit list from the API and never touches the workspace,
//! so repeated runs over the same commits always produce the same result.

use anyhow::Result;
use tracing::info;

use crate::github::{CommitStatusState, GitHubClient, PullRequestCommit};
use crate::status;

const FIXUP_PREFIXES: [&str; 2] = ["fixup!", "squash!"];

/// Commits whose subject marks them for a future squash.
pub fn find_fixup_commits(commits: &[PullRequestCommit]) -> Vec<&PullRequestCommit> {
    commits
        .iter()
        .filter(|c| {
            let subject = c.subject();
            FIXUP_PREFIXES.iter().any(|p| subject.starts_with(p))
        })
        .collect()
}

/// Run the fixup check for a PR and publish the squash-readiness context on
/// its head commit. Returns the state that was published.
pub async fn check_pull_request(
    github: &GitHubClient,
    repo_owner: &str,
    repo_name: &str,
    pr_number: u64,
    head_sha: &str,
) -> Result<CommitStatusState> {
    let commits = github
        .list_pull_request_commits(repo_owner, repo_name, pr_number)
        .await?;

    let offending = find_fixup_commits(&commits);

    let (state, description) = if offending.is_empty() {
        (
            CommitStatusState::Success,
            "No fixup or squash commits".to_string(),
        )
    } else {
        let subjects: Vec<String> = offending
            .iter()
            .map(|c| format!("\"{}\"", c.subject()))
            .collect();
        (
            CommitStatusState::Failure,
            format!("Contains {}", subjects.join(", ")),
        )
    };

    info!(
        "Fixup check for {}/{}#{}: {} ({} offending of {} commits)",
        repo_owner,
        repo_name,
        pr_number,
        state,
        offending.len(),
        commits.len()
    );

    status::report_squash_readiness(github, repo_owner, repo_name, head_sha, state, &description)
        .await?;

    Ok(state)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn commit(sha: &str, message: &str) -> PullRequestCommit {
        serde_json::from_value(json!({
            "sha": sha,
            "commit": {"message": message}
        }))
        .unwrap()
    }

    #[test]
    fn test_clean_history_has_no_fixups() {
        let commits = vec![
            commit("a", "Add feature"),
            commit("b", "Fix edge case"),
            commit("c", "Update docs"),
        ];
        assert!(find_fixup_commits(&commits).is_empty());
    }

    #[test]
    fn test_fixup_commit_is_found() {
        let commits = vec![commit("a", "Add feature"), commit("b", "fixup! fix typo")];
        let offending = find_fixup_commits(&commits);
        assert_eq!(offending.len(), 1);
        assert_eq!(offending[0].sha, "b");
    }

    #[test]
    fn test_squash_marker_is_found() {
        let commits = vec![commit("a", "squash! Add feature")];
        assert_eq!(find_fixup_commits(&commits).len(), 1);
    }

    #[test]
    fn test_marker_must_prefix_subject() {
        let commits = vec![commit("a", "Revert \"fixup! fix typo\"")];
        assert!(find_fixup_commits(&commits).is_empty());
    }

    #[test]
    fn test_only_subject_line_is_inspected() {
        let commits = vec![commit("a", "Add feature\n\nfixup! in the body does not count")];
        assert!(find_fixup_commits(&commits).is_empty());
    }

    #[test]
    fn test_check_is_idempotent_on_fixed_input() {
        let commits = vec![commit("a", "fixup! one"), commit("b", "Add feature")];
        let first: Vec<&str> = find_fixup_commits(&commits).iter().map(|c| c.sha.as_str()).collect();
        let second: Vec<&str> = find_fixup_commits(&commits).iter().map(|c| c.sha.as_str()).collect();
        assert_eq!(first, second);
    }

    #[tokio::test]
    async fn test_synchronize_with_fixup_sets_failure_status() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock(
                "GET",
                mockito::Matcher::Regex(
                    r"^/repos/alice/widgets/pulls/7/commits.*$".to_string(),
                ),
            )
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(
                json!([
                    {"sha": "a1", "commit": {"message": "Add feature"}},
                    {"sha": "b2", "commit": {"message": "fixup! fix typo"}}
                ])
                .to_string(),
            )
            .create_async()
            .await;

        let status_mock = server
            .mock("POST", "/repos/alice/widgets/statuses/headsha1")
            .match_body(mockito::Matcher::PartialJson(json!({
                "state": "failure",
                "context": "review/squash"
            })))
            .with_status(201)
            .with_body("{}")
            .create_async()
            .await;

        let client = GitHubClient::with_api_base("token".to_string(), server.url()).unwrap();
        let state = check_pull_request(&client, "alice", "widgets", 7, "headsha1")
            .await
            .unwrap();

        assert_eq!(state, CommitStatusState::Failure);
        status_mock.assert_async().await;
    }

    #[tokio::test]
    async fn test_clean_pr_sets_success_status() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock(
                "GET",
                mockito::Matcher::Regex(
                    r"^/repos/alice/widgets/pulls/7/commits.*$".to_string(),
                ),
            )
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(
                json!([{"sha": "a1", "commit": {"message": "Add feature"}}]).to_string(),
            )
            .create_async()
            .await;

        let status_mock = server
            .mock("POST", "/repos/alice/widgets/statuses/headsha1")
            .match_body(mockito::Matcher::PartialJson(json!({
                "state": "success",
                "context": "review/squash"
            })))
            .with_status(201)
            .with_body("{}")
            .create_async()
            .await;

        let client = GitHubClient::with_api_base("token".to_string(), server.url()).unwrap();
        let state = check_pull_request(&client, "alice", "widgets", 7, "headsha1")
            .await
            .unwrap();

        assert_eq!(state, CommitStatusState::Success);
        status_mock.assert_async().await;
    }
}

//! Squashing a pull request branch into a single commit.
//!
//! The underlying history rewrite is not idempotent, so the operation wraps
//! it in explicit no-op detection: a branch that is already a single commit
//! ahead of its merge base reports success without touching anything. The
//! force-push is leased on the head SHA observed at fetch time, which turns a
//! concurrently-moved remote into a [`WorkspaceError::ConcurrentUpdate`]
//! instead of silently clobbering someone's push.

use anyhow::Result;
use tracing::{info, warn};

use crate::git::{GitRepo, WorkspaceError};
use crate::github::{CommitStatusState, GitHubClient};
use crate::status;
use crate::workspace::Workspaces;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SquashOutcome {
    /// The branch was already a single commit ahead of the merge base.
    AlreadySquashed,
    /// History was rewritten and force-pushed.
    Squashed { new_sha: String },
}

/// Squash everything unique to `head_ref` since it diverged from `base_ref`
/// into one commit, and force-push the result.
///
/// Expects a workspace that was fetched just before the call; the observed
/// `origin/<head>` SHA becomes the force-with-lease expectation.
pub async fn squash_branch(
    git: &GitRepo,
    base_ref: &str,
    head_ref: &str,
) -> Result<SquashOutcome, WorkspaceError> {
    let origin_base = format!("origin/{base_ref}");
    let origin_head = format!("origin/{head_ref}");

    let observed_head = git.rev_parse(&origin_head).await?;
    let merge_base = git.merge_base(&origin_base, &origin_head).await?;
    let count = git.commit_count(&merge_base, &origin_head).await?;

    if count <= 1 {
        info!(
            "Branch {} is {} commit(s) ahead of {}; nothing to squash",
            head_ref, count, base_ref
        );
        return Ok(SquashOutcome::AlreadySquashed);
    }

    let subjects = git.subjects(&merge_base, &origin_head).await?;
    let message = combined_message(&subjects);

    info!(
        "Squashing {} commits on {} (merge base {})",
        count,
        head_ref,
        &merge_base[..7.min(merge_base.len())]
    );

    git.checkout_branch(head_ref, &origin_head).await?;
    git.reset_soft(&merge_base).await?;
    git.commit(&message).await?;
    git.force_push(head_ref, &observed_head).await?;

    let new_sha = git.rev_parse("HEAD").await?;
    Ok(SquashOutcome::Squashed { new_sha })
}

/// Commit message for the squashed commit: the first distinct subject becomes
/// the title, the remaining distinct subjects (oldest first) the body.
fn combined_message(subjects: &[String]) -> String {
    let mut distinct: Vec<&String> = Vec::new();
    for subject in subjects {
        if !distinct.contains(&subject) {
            distinct.push(subject);
        }
    }
    match distinct.split_first() {
        Some((title, rest)) if rest.is_empty() => (*title).clone(),
        Some((title, rest)) => {
            let body: Vec<&str> = rest.iter().map(|s| s.as_str()).collect();
            format!("{}\n\n{}", title, body.join("\n"))
        }
        None => "Squashed commits".to_string(),
    }
}

/// Full squash-command flow: look up the PR, rewrite its branch under the
/// repository lock, and report failures back to the PR.
///
/// Returns the response message for the webhook delivery. `Err` means even
/// the failure could not be reported back to the PR.
pub async fn handle_squash_command(
    github: &GitHubClient,
    workspaces: &Workspaces,
    repo_owner: &str,
    repo_name: &str,
    pr_number: u64,
) -> Result<String> {
    let pr = github
        .get_pull_request(repo_owner, repo_name, pr_number)
        .await?;

    let base_ref = pr.base.ref_name.clone();
    let head_ref = pr.head.ref_name.clone();

    info!(
        "Squash command for {}/{}#{}: {} onto {}",
        repo_owner, repo_name, pr_number, head_ref, base_ref
    );

    let result = workspaces
        .with_repository(repo_owner, repo_name, move |git| async move {
            squash_branch(&git, &base_ref, &head_ref).await
        })
        .await;

    match result {
        Ok(SquashOutcome::AlreadySquashed) => {
            Ok("Branch is already squashed. Nothing to do.".to_string())
        }
        Ok(SquashOutcome::Squashed { new_sha }) => Ok(format!(
            "Squashed into {}.",
            &new_sha[..7.min(new_sha.len())]
        )),
        Err(WorkspaceError::ConcurrentUpdate) => {
            warn!(
                "Concurrent update while squashing {}/{}#{}",
                repo_owner, repo_name, pr_number
            );
            github
                .create_comment(
                    repo_owner,
                    repo_name,
                    pr_number,
                    "The branch was updated while I was squashing it, so I didn't push \
                     anything. Comment \"squash\" again to retry.",
                )
                .await?;
            Ok("Branch moved during squash; asked the operator to re-issue.".to_string())
        }
        Err(e) => {
            warn!(
                "Squash of {}/{}#{} failed: {}",
                repo_owner, repo_name, pr_number, e
            );
            // The head did not move (the rewrite failed), so the PR's head
            // SHA is still the one to report on.
            status::report_squash_readiness(
                github,
                repo_owner,
                repo_name,
                &pr.head.sha,
                CommitStatusState::Error,
                &format!("Squash failed: {e}"),
            )
            .await?;
            Ok("Squash failed; reported on the commit status.".to_string())
        }
    }
}

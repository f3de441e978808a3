pub mod command;
pub mod config;
pub mod fixup;
pub mod git;
pub mod github;
pub mod merge;
pub mod squash;
pub mod status;
pub mod webhook;
pub mod workspace;

use crate::config::MergePolicy;
use crate::github::GitHubClient;
use crate::workspace::Workspaces;

/// Shared state for all request handlers.
///
/// Everything in here is either immutable configuration or internally
/// synchronized (the workspace manager serializes git access per repository).
pub struct AppState {
    pub github_client: GitHubClient,
    pub workspaces: Workspaces,
    pub webhook_secret: String,
    pub merge_policy: MergePolicy,
}

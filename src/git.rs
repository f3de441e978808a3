//! Git subprocess driver for workspace operations.
//!
//! Every command runs under a watchdog timeout so a hung git process fails
//! the operation instead of starving the per-repository lock.

use std::path::{Path, PathBuf};
use std::process::Output;
use std::time::Duration;
use thiserror::Error;
use tokio::process::Command;
use tracing::debug;

/// Errors from workspace git operations.
#[derive(Debug, Error)]
pub enum WorkspaceError {
    /// A git command exited unsuccessfully.
    #[error("git {command} failed: {stderr}")]
    Git { command: String, stderr: String },

    /// A git command exceeded the watchdog timeout.
    #[error("git {command} timed out after {timeout:?}")]
    Timeout { command: String, timeout: Duration },

    /// A force-push was rejected because the remote ref moved underneath us.
    /// Never retried automatically; the operator must re-issue the command.
    #[error("the remote branch was updated concurrently")]
    ConcurrentUpdate,

    /// Filesystem or process-spawn failure.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

/// Run a git command in `dir`, enforcing the watchdog timeout and mapping a
/// non-zero exit into [`WorkspaceError::Git`] with the captured stderr.
pub(crate) async fn run_git_in(
    dir: &Path,
    timeout: Duration,
    args: &[&str],
) -> Result<Output, WorkspaceError> {
    debug!("Running git {} in {}", args.join(" "), dir.display());

    let mut command = Command::new("git");
    // kill_on_drop so the watchdog actually reaps a hung git process instead
    // of leaving it running after the timeout fires.
    command.args(args).current_dir(dir).kill_on_drop(true);

    let output = tokio::time::timeout(timeout, command.output())
        .await
        .map_err(|_| WorkspaceError::Timeout {
            command: args.join(" "),
            timeout,
        })??;

    if !output.status.success() {
        return Err(WorkspaceError::Git {
            command: args.join(" "),
            stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
        });
    }

    Ok(output)
}

/// Handle to a synchronized local clone.
///
/// Obtained only through the workspace manager, which guarantees the holder
/// has exclusive access to the clone for the duration of the operation.
#[derive(Debug, Clone)]
pub struct GitRepo {
    dir: PathBuf,
    timeout: Duration,
}

impl GitRepo {
    pub(crate) fn new(dir: PathBuf, timeout: Duration) -> Self {
        GitRepo { dir, timeout }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    async fn run(&self, args: &[&str]) -> Result<Output, WorkspaceError> {
        run_git_in(&self.dir, self.timeout, args).await
    }

    async fn run_stdout(&self, args: &[&str]) -> Result<String, WorkspaceError> {
        let output = self.run(args).await?;
        Ok(String::from_utf8_lossy(&output.stdout).trim().to_string())
    }

    /// Sync all remote-tracking refs with the remote.
    pub async fn fetch(&self) -> Result<(), WorkspaceError> {
        self.run(&["fetch", "--prune", "origin"]).await?;
        Ok(())
    }

    pub async fn rev_parse(&self, rev: &str) -> Result<String, WorkspaceError> {
        self.run_stdout(&["rev-parse", rev]).await
    }

    pub async fn merge_base(&self, a: &str, b: &str) -> Result<String, WorkspaceError> {
        self.run_stdout(&["merge-base", a, b]).await
    }

    /// Number of commits in `base..head`.
    pub async fn commit_count(&self, base: &str, head: &str) -> Result<u64, WorkspaceError> {
        let range = format!("{base}..{head}");
        let out = self.run_stdout(&["rev-list", "--count", &range]).await?;
        out.parse::<u64>().map_err(|_| WorkspaceError::Git {
            command: format!("rev-list --count {range}"),
            stderr: format!("unexpected output: {out}"),
        })
    }

    /// Subject lines of `base..head`, oldest first.
    pub async fn subjects(&self, base: &str, head: &str) -> Result<Vec<String>, WorkspaceError> {
        let range = format!("{base}..{head}");
        let out = self
            .run_stdout(&["log", "--reverse", "--format=%s", &range])
            .await?;
        Ok(out.lines().map(|l| l.to_string()).collect())
    }

    /// Check out `branch`, creating or resetting it to `start`.
    pub async fn checkout_branch(&self, branch: &str, start: &str) -> Result<(), WorkspaceError> {
        self.run(&["checkout", "--force", "-B", branch, start])
            .await?;
        Ok(())
    }

    pub async fn reset_soft(&self, rev: &str) -> Result<(), WorkspaceError> {
        self.run(&["reset", "--soft", rev]).await?;
        Ok(())
    }

    pub async fn commit(&self, message: &str) -> Result<(), WorkspaceError> {
        // --allow-empty so a branch whose net diff is empty still squashes
        // into a single (empty) commit instead of erroring out.
        self.run(&["commit", "--allow-empty", "-m", message]).await?;
        Ok(())
    }

    /// Force-push the local `branch` to the remote branch of the same name,
    /// but only if the remote ref still points at `expected_old`.
    ///
    /// A rejected lease means someone updated the branch while we were
    /// rewriting it and maps to [`WorkspaceError::ConcurrentUpdate`].
    pub async fn force_push(&self, branch: &str, expected_old: &str) -> Result<(), WorkspaceError> {
        let lease = format!("--force-with-lease=refs/heads/{branch}:{expected_old}");
        let refspec = format!("{branch}:refs/heads/{branch}");
        match self.run(&["push", &lease, "origin", &refspec]).await {
            Ok(_) => Ok(()),
            Err(WorkspaceError::Git { stderr, .. }) if push_was_rejected(&stderr) => {
                Err(WorkspaceError::ConcurrentUpdate)
            }
            Err(e) => Err(e),
        }
    }
}

fn push_was_rejected(stderr: &str) -> bool {
    stderr.contains("stale info")
        || stderr.contains("[rejected]")
        || stderr.contains("[remote rejected]")
}

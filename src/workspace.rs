//! Per-repository workspace management.
//!
//! The local clones are the only shared mutable resource in the service.
//! Every git-mutating operation goes through [`Workspaces::with_repository`],
//! which holds an async mutex for the repository across the whole
//! clone-sync-operate sequence: operations on the same repository queue,
//! operations on different repositories proceed independently.

use std::collections::HashMap;
use std::fmt;
use std::future::Future;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tracing::{info, warn};

use crate::git::{run_git_in, GitRepo, WorkspaceError};

/// Identity of a hosted repository.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct RepoId {
    pub owner: String,
    pub name: String,
}

impl fmt::Display for RepoId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.owner, self.name)
    }
}

/// Owner of all local clones.
pub struct Workspaces {
    root: PathBuf,
    remote_base: String,
    git_timeout: Duration,
    locks: Mutex<HashMap<RepoId, Arc<Mutex<()>>>>,
}

impl Workspaces {
    /// `remote_base` is prefixed to `owner/name.git` to form clone URLs; in
    /// production this is the token-bearing HTTPS base, in tests a local
    /// directory of bare repositories.
    pub fn new(
        root: PathBuf,
        remote_base: String,
        git_timeout: Duration,
    ) -> Result<Self, WorkspaceError> {
        std::fs::create_dir_all(&root)?;
        Ok(Workspaces {
            root,
            remote_base,
            git_timeout,
            locks: Mutex::new(HashMap::new()),
        })
    }

    /// Run `f` with exclusive access to the repository's synchronized clone.
    ///
    /// Acquires the per-repository lock, lazily clones on first use, fetches
    /// the remote's current refs (one bounded retry on failure), then runs
    /// `f`. The lock is released on every exit path.
    pub async fn with_repository<F, Fut, T>(
        &self,
        owner: &str,
        name: &str,
        f: F,
    ) -> Result<T, WorkspaceError>
    where
        F: FnOnce(GitRepo) -> Fut,
        Fut: Future<Output = Result<T, WorkspaceError>>,
    {
        let id = RepoId {
            owner: owner.to_string(),
            name: name.to_string(),
        };

        let lock = {
            let mut locks = self.locks.lock().await;
            locks
                .entry(id.clone())
                .or_insert_with(|| Arc::new(Mutex::new(())))
                .clone()
        };
        let _guard = lock.lock().await;

        let dir = self.root.join(&id.owner).join(&id.name);
        self.ensure_cloned(&id, &dir).await?;

        let repo = GitRepo::new(dir, self.git_timeout);
        self.sync(&id, &repo).await?;

        f(repo).await
    }

    async fn ensure_cloned(&self, id: &RepoId, dir: &Path) -> Result<(), WorkspaceError> {
        if dir.join(".git").exists() {
            return Ok(());
        }

        if let Some(parent) = dir.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let url = format!(
            "{}/{}/{}.git",
            self.remote_base.trim_end_matches('/'),
            id.owner,
            id.name
        );
        info!("Cloning {} into {}", id, dir.display());

        let target = dir.to_string_lossy();
        if let Err(first) = self.clone_into(&url, &target).await {
            warn!("Clone of {} failed, retrying once: {}", id, first);
            // A failed clone can leave a partial directory behind.
            let _ = std::fs::remove_dir_all(dir);
            self.clone_into(&url, &target).await?;
        }

        // The service commits squashed history under its own identity.
        run_git_in(dir, self.git_timeout, &["config", "user.name", "reviewbot"]).await?;
        run_git_in(
            dir,
            self.git_timeout,
            &["config", "user.email", "reviewbot@localhost"],
        )
        .await?;

        Ok(())
    }

    async fn clone_into(&self, url: &str, target: &str) -> Result<(), WorkspaceError> {
        run_git_in(&self.root, self.git_timeout, &["clone", url, target]).await?;
        Ok(())
    }

    async fn sync(&self, id: &RepoId, repo: &GitRepo) -> Result<(), WorkspaceError> {
        if let Err(first) = repo.fetch().await {
            warn!("Fetch for {} failed, retrying once: {}", id, first);
            repo.fetch().await?;
        }
        Ok(())
    }
}

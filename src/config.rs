use anyhow::{Context, Result};
use std::env;
use std::path::PathBuf;
use std::time::Duration;

/// Merge gating policy.
///
/// The approval threshold and self-approval rules are deliberately
/// configuration rather than hard-coded: different teams disagree on them.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MergePolicy {
    /// How many distinct approving commenters a PR needs before merging.
    pub required_approvals: usize,
    /// Whether a "+1" from the PR author counts towards the threshold.
    pub count_author_approval: bool,
    /// Whether the squash-readiness status context must be `success`
    /// before merging.
    pub require_squash_check: bool,
}

impl Default for MergePolicy {
    fn default() -> Self {
        MergePolicy {
            required_approvals: 1,
            count_author_approval: false,
            require_squash_check: true,
        }
    }
}

#[derive(Clone)]
pub struct Config {
    pub access_token: String,
    pub webhook_secret: String,
    pub port: u16,
    /// Root directory for the per-repository local clones. The clones are a
    /// disposable cache; the directory defaults to a temp-dir location.
    pub repos_dir: PathBuf,
    /// Watchdog timeout applied to every git subprocess.
    pub git_timeout: Duration,
    pub merge_policy: MergePolicy,
}

impl Config {
    pub fn from_env() -> Result<Self> {
        let access_token = env::var("GITHUB_ACCESS_TOKEN")
            .context("GITHUB_ACCESS_TOKEN environment variable is required")?;

        let webhook_secret = env::var("GITHUB_WEBHOOK_SECRET")
            .context("GITHUB_WEBHOOK_SECRET environment variable is required")?;

        let port = env::var("PORT")
            .unwrap_or_else(|_| "3000".to_string())
            .parse::<u16>()
            .context("PORT must be a valid number")?;

        let repos_dir = env::var("REPOS_DIR")
            .map(PathBuf::from)
            .unwrap_or_else(|_| env::temp_dir().join("reviewbot-repos"));

        let git_timeout_secs = env::var("GIT_TIMEOUT_SECS")
            .unwrap_or_else(|_| "60".to_string())
            .parse::<u64>()
            .context("GIT_TIMEOUT_SECS must be a valid number")?;

        let required_approvals = env::var("REQUIRED_APPROVALS")
            .unwrap_or_else(|_| "1".to_string())
            .parse::<usize>()
            .context("REQUIRED_APPROVALS must be a valid number")?;

        let count_author_approval = parse_flag(env::var("COUNT_AUTHOR_APPROVAL").ok(), false);
        let require_squash_check = parse_flag(env::var("REQUIRE_SQUASH_CHECK").ok(), true);

        Ok(Config {
            access_token,
            webhook_secret,
            port,
            repos_dir,
            git_timeout: Duration::from_secs(git_timeout_secs),
            merge_policy: MergePolicy {
                required_approvals,
                count_author_approval,
                require_squash_check,
            },
        })
    }

    /// Remote base URL used to build clone/fetch/push URLs for workspaces.
    /// The access token is embedded so git can authenticate over HTTPS.
    pub fn git_remote_base(&self) -> String {
        format!("https://x-access-token:{}@github.com", self.access_token)
    }
}

/// Parse a boolean flag from an optional env value.
///
/// Missing, empty, or unparseable values fall back to the default rather than
/// failing startup: a misspelled flag should not take the service down.
fn parse_flag(value: Option<String>, default: bool) -> bool {
    match value {
        Some(v) => v.trim().parse::<bool>().unwrap_or(default),
        None => default,
    }
}

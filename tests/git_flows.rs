//! End-to-end git flows against real local repositories.
//!
//! Remotes are bare repositories under a temp directory, so the workspace
//! manager's clone/fetch/push paths run against the real git executable
//! without any network access.

use std::path::{Path, PathBuf};
use std::process::Command;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use reviewbot::git::WorkspaceError;
use reviewbot::squash::{squash_branch, SquashOutcome};
use reviewbot::workspace::Workspaces;

const GIT_TIMEOUT: Duration = Duration::from_secs(30);

fn run_git(dir: &Path, args: &[&str]) -> String {
    let output = Command::new("git")
        .args(args)
        .current_dir(dir)
        .output()
        .unwrap();
    assert!(
        output.status.success(),
        "git {:?} failed: {}",
        args,
        String::from_utf8_lossy(&output.stderr)
    );
    String::from_utf8_lossy(&output.stdout).trim().to_string()
}

fn write_and_commit(dir: &Path, file: &str, contents: &str, message: &str) {
    std::fs::write(dir.join(file), contents).unwrap();
    run_git(dir, &["add", "-A"]);
    run_git(dir, &["commit", "-m", message]);
}

/// A bare "remote" plus the seed working repo that feeds it.
struct RemoteFixture {
    _remotes: tempfile::TempDir,
    _seed: tempfile::TempDir,
    remote_base: String,
    seed_dir: PathBuf,
    bare_dir: PathBuf,
}

impl RemoteFixture {
    /// Builds `main` with one commit and `feature` with three commits on top,
    /// then publishes both branches to a bare repo at
    /// `<remotes>/<owner>/<name>.git`.
    fn new(owner: &str, name: &str) -> Self {
        let remotes = tempfile::tempdir().unwrap();
        let seed = tempfile::tempdir().unwrap();
        let seed_dir = seed.path().to_path_buf();

        run_git(&seed_dir, &["init"]);
        run_git(&seed_dir, &["config", "user.name", "seed-user"]);
        run_git(&seed_dir, &["config", "user.email", "seed@example.com"]);
        run_git(&seed_dir, &["checkout", "-b", "main"]);
        write_and_commit(&seed_dir, "README.md", "widgets\n", "Initial commit");

        run_git(&seed_dir, &["checkout", "-b", "feature"]);
        write_and_commit(&seed_dir, "one.txt", "1\n", "Add one");
        write_and_commit(&seed_dir, "two.txt", "2\n", "Add two");
        write_and_commit(&seed_dir, "three.txt", "3\n", "Add three");
        run_git(&seed_dir, &["checkout", "main"]);

        let owner_dir = remotes.path().join(owner);
        std::fs::create_dir_all(&owner_dir).unwrap();
        let bare_dir = owner_dir.join(format!("{name}.git"));
        run_git(
            seed.path(),
            &[
                "clone",
                "--bare",
                seed_dir.to_str().unwrap(),
                bare_dir.to_str().unwrap(),
            ],
        );

        RemoteFixture {
            remote_base: remotes.path().to_string_lossy().to_string(),
            _remotes: remotes,
            _seed: seed,
            seed_dir,
            bare_dir,
        }
    }

    /// Adds a commit to `branch` in the remote (via the seed repo).
    fn push_commit(&self, branch: &str, file: &str, message: &str) {
        run_git(&self.seed_dir, &["checkout", branch]);
        write_and_commit(&self.seed_dir, file, message, message);
        run_git(
            &self.seed_dir,
            &[
                "push",
                self.bare_dir.to_str().unwrap(),
                &format!("{branch}:{branch}"),
            ],
        );
        run_git(&self.seed_dir, &["checkout", "main"]);
    }

    fn remote_rev_parse(&self, rev: &str) -> String {
        run_git(&self.bare_dir, &["rev-parse", rev])
    }

    fn remote_commit_count(&self, base: &str, head: &str) -> u64 {
        run_git(
            &self.bare_dir,
            &["rev-list", "--count", &format!("{base}..{head}")],
        )
        .parse()
        .unwrap()
    }
}

fn workspaces_for(fixture: &RemoteFixture, root: &tempfile::TempDir) -> Workspaces {
    Workspaces::new(
        root.path().to_path_buf(),
        fixture.remote_base.clone(),
        GIT_TIMEOUT,
    )
    .unwrap()
}

#[tokio::test]
async fn squash_reduces_branch_to_single_commit_and_preserves_tree() {
    let fixture = RemoteFixture::new("alice", "widgets");
    let root = tempfile::tempdir().unwrap();
    let workspaces = workspaces_for(&fixture, &root);

    let tree_before = fixture.remote_rev_parse("feature^{tree}");
    assert_eq!(fixture.remote_commit_count("main", "feature"), 3);

    let outcome = workspaces
        .with_repository("alice", "widgets", |git| async move {
            squash_branch(&git, "main", "feature").await
        })
        .await
        .unwrap();

    let new_sha = match outcome {
        SquashOutcome::Squashed { new_sha } => new_sha,
        other => panic!("expected a squash, got {other:?}"),
    };

    assert_eq!(fixture.remote_commit_count("main", "feature"), 1);
    assert_eq!(fixture.remote_rev_parse("feature"), new_sha);
    assert_eq!(fixture.remote_rev_parse("feature^{tree}"), tree_before);

    let message = run_git(&fixture.bare_dir, &["log", "-1", "--format=%B", "feature"]);
    assert!(message.starts_with("Add one"));
    assert!(message.contains("Add two"));
    assert!(message.contains("Add three"));
}

#[tokio::test]
async fn squash_is_idempotent() {
    let fixture = RemoteFixture::new("alice", "widgets");
    let root = tempfile::tempdir().unwrap();
    let workspaces = workspaces_for(&fixture, &root);

    let first = workspaces
        .with_repository("alice", "widgets", |git| async move {
            squash_branch(&git, "main", "feature").await
        })
        .await
        .unwrap();
    let first_sha = match first {
        SquashOutcome::Squashed { new_sha } => new_sha,
        other => panic!("expected a squash, got {other:?}"),
    };

    let second = workspaces
        .with_repository("alice", "widgets", |git| async move {
            squash_branch(&git, "main", "feature").await
        })
        .await
        .unwrap();

    assert_eq!(second, SquashOutcome::AlreadySquashed);
    assert_eq!(fixture.remote_rev_parse("feature"), first_sha);
    assert_eq!(fixture.remote_commit_count("main", "feature"), 1);
}

#[tokio::test]
async fn squash_detects_concurrently_moved_remote() {
    let fixture = RemoteFixture::new("alice", "widgets");
    let root = tempfile::tempdir().unwrap();
    let workspaces = workspaces_for(&fixture, &root);

    let result = workspaces
        .with_repository("alice", "widgets", |git| {
            // The remote moves after the fetch but before the push; the
            // leased force-push must refuse to clobber it.
            fixture.push_commit("feature", "late.txt", "Late arrival");
            async move { squash_branch(&git, "main", "feature").await }
        })
        .await;

    assert!(matches!(result, Err(WorkspaceError::ConcurrentUpdate)));

    // The late commit survived.
    let message = run_git(&fixture.bare_dir, &["log", "-1", "--format=%s", "feature"]);
    assert_eq!(message, "Late arrival");
}

#[tokio::test]
async fn concurrent_operations_on_same_repo_are_serialized() {
    let fixture = RemoteFixture::new("alice", "widgets");
    let root = tempfile::tempdir().unwrap();
    let workspaces = Arc::new(workspaces_for(&fixture, &root));

    let events: Arc<Mutex<Vec<(&'static str, usize)>>> = Arc::new(Mutex::new(Vec::new()));

    let mut handles = Vec::new();
    for i in 0..2 {
        let workspaces = Arc::clone(&workspaces);
        let events = Arc::clone(&events);
        handles.push(tokio::spawn(async move {
            workspaces
                .with_repository("alice", "widgets", |_git| {
                    let events = Arc::clone(&events);
                    async move {
                        events.lock().unwrap().push(("enter", i));
                        tokio::time::sleep(Duration::from_millis(100)).await;
                        events.lock().unwrap().push(("exit", i));
                        Ok(())
                    }
                })
                .await
                .unwrap();
        }));
    }
    for handle in handles {
        handle.await.unwrap();
    }

    let events = events.lock().unwrap();
    assert_eq!(events.len(), 4);
    // Whichever task entered first must exit before the other enters.
    assert_eq!(events[0].0, "enter");
    assert_eq!(events[1], ("exit", events[0].1));
    assert_eq!(events[2].0, "enter");
    assert_eq!(events[3], ("exit", events[2].1));
}

#[tokio::test]
async fn workspace_is_cloned_lazily_and_synced_on_each_use() {
    let fixture = RemoteFixture::new("alice", "widgets");
    let root = tempfile::tempdir().unwrap();
    let workspaces = workspaces_for(&fixture, &root);

    let clone_dir = root.path().join("alice").join("widgets");
    assert!(!clone_dir.exists());

    let sha_before = workspaces
        .with_repository("alice", "widgets", |git| async move {
            git.rev_parse("origin/feature").await
        })
        .await
        .unwrap();
    assert!(clone_dir.join(".git").exists());
    assert_eq!(sha_before, fixture.remote_rev_parse("feature"));

    fixture.push_commit("feature", "four.txt", "Add four");

    let sha_after = workspaces
        .with_repository("alice", "widgets", |git| async move {
            git.rev_parse("origin/feature").await
        })
        .await
        .unwrap();
    assert_eq!(sha_after, fixture.remote_rev_parse("feature"));
    assert_ne!(sha_before, sha_after);
}

//! Shared helpers for integration tests: throwaway git repositories and
//! clients over in-memory stores.

#![allow(dead_code)]

use std::path::Path;
use std::process::Command;
use std::sync::Arc;

use secretsweep::client::Client;
use secretsweep::store::SqliteStore;

/// Base commit epoch; later commits add offsets so dates are strictly ordered.
pub const T: i64 = 1_600_000_000;

pub fn git(dir: &Path, args: &[&str]) -> String {
    let out = Command::new("git")
        .args(args)
        .current_dir(dir)
        .output()
        .unwrap();
    assert!(
        out.status.success(),
        "git {args:?}: {}",
        String::from_utf8_lossy(&out.stderr)
    );
    String::from_utf8_lossy(&out.stdout).trim().to_string()
}

pub fn init_repo(dir: &Path) {
    git(dir, &["init", "-q", "-b", "main"]);
    git(dir, &["config", "user.email", "dev@example.test"]);
    git(dir, &["config", "user.name", "dev"]);
    git(dir, &["config", "commit.gpgsign", "false"]);
}

/// Write `file`, stage everything and commit at `epoch`. Returns the commit id.
pub fn commit_file(dir: &Path, file: &str, content: &str, epoch: i64) -> String {
    let path = dir.join(file);
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent).unwrap();
    }
    std::fs::write(path, content).unwrap();
    git(dir, &["add", "."]);
    commit_staged(dir, file, epoch)
}

pub fn commit_staged(dir: &Path, message: &str, epoch: i64) -> String {
    let date = format!("@{epoch} +0000");
    let out = Command::new("git")
        .args(["commit", "-q", "--no-verify", "-m", message])
        .env("GIT_AUTHOR_DATE", &date)
        .env("GIT_COMMITTER_DATE", &date)
        .current_dir(dir)
        .output()
        .unwrap();
    assert!(out.status.success(), "commit failed: {}", String::from_utf8_lossy(&out.stderr));
    git(dir, &["rev-parse", "HEAD"])
}

pub fn merge(dir: &Path, branch: &str, epoch: i64) -> String {
    let date = format!("@{epoch} +0000");
    let out = Command::new("git")
        .args(["merge", "-q", "--no-ff", "--no-edit", branch])
        .env("GIT_AUTHOR_DATE", &date)
        .env("GIT_COMMITTER_DATE", &date)
        .current_dir(dir)
        .output()
        .unwrap();
    assert!(out.status.success(), "merge failed: {}", String::from_utf8_lossy(&out.stderr));
    git(dir, &["rev-parse", "HEAD"])
}

pub fn memory_client() -> Client {
    Client::new(Arc::new(SqliteStore::in_memory().unwrap()))
}

/// A client with a single `password` rule; returns the rule id too.
pub async fn client_with_password_rule() -> (Client, i64) {
    let client = memory_client();
    let id = client.add_rule("password", "password", None).await.unwrap();
    (client, id)
}

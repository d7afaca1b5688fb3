//! Local directory scans: walk limits, boundaries and rule selection.

mod common;

use std::path::Path;

use secretsweep::client::{ClientError, ScanOptions};
use secretsweep::scanner::ScanError;
use tokio_util::sync::CancellationToken;

use common::client_with_password_rule;

fn write(root: &Path, rel: &str, content: &[u8]) {
    let path = root.join(rel);
    std::fs::create_dir_all(path.parent().unwrap()).unwrap();
    std::fs::write(path, content).unwrap();
}

fn layered_tree() -> tempfile::TempDir {
    let dir = tempfile::tempdir().unwrap();
    write(dir.path(), "settings.py", b"password = 'root'\n");
    write(dir.path(), "app/config.py", b"password = 'one'\n");
    write(dir.path(), "app/nested/deep.py", b"password = 'two'\n");
    write(dir.path(), "vendor/lib.py", b"password = 'vendored'\n");
    dir
}

/// Number of discoveries of a fresh path scan with `options`.
async fn count(root: &Path, options: ScanOptions) -> usize {
    let (client, _) = client_with_password_rule().await;
    client
        .scan_path(root, &options, &CancellationToken::new())
        .await
        .unwrap()
        .len()
}

fn depth(max_depth: i64) -> ScanOptions {
    ScanOptions {
        max_depth,
        ..ScanOptions::default()
    }
}

#[tokio::test]
async fn depth_limits_are_monotonic() {
    let tree = layered_tree();
    let zero = count(tree.path(), depth(0)).await;
    let one = count(tree.path(), depth(1)).await;
    let two = count(tree.path(), depth(2)).await;
    let unlimited = count(tree.path(), depth(-1)).await;

    assert_eq!(zero, 1);
    assert_eq!(one, 3);
    assert_eq!(two, 4);
    assert_eq!(unlimited, 4);
}

#[tokio::test]
async fn ignore_patterns_never_add_discoveries() {
    let tree = layered_tree();
    let all = count(tree.path(), ScanOptions::default()).await;
    let mut options = ScanOptions::default();
    options.ignore = vec!["vendor".to_string()];
    let without_vendor = count(tree.path(), options.clone()).await;
    options.ignore.push("app/nested".to_string());
    let fewer = count(tree.path(), options).await;

    assert_eq!(all, 4);
    assert_eq!(without_vendor, 3);
    assert_eq!(fewer, 2);
}

#[tokio::test]
async fn line_length_boundary() {
    let dir = tempfile::tempdir().unwrap();
    let at_limit = format!("password = '{}'", "a".repeat(500 - 13));
    let over_limit = format!("password = '{}'", "b".repeat(501 - 13));
    assert_eq!(at_limit.len(), 500);
    assert_eq!(over_limit.len(), 501);
    write(dir.path(), "long.txt", format!("{at_limit}\n{over_limit}\n").as_bytes());

    let (client, _) = client_with_password_rule().await;
    let ids = client
        .scan_path(dir.path(), &ScanOptions::default(), &CancellationToken::new())
        .await
        .unwrap();
    assert_eq!(ids.len(), 1);
    let d = client.get_discovery(ids[0]).await.unwrap();
    assert_eq!(d.line_number, 1);
    assert_eq!(d.commit_id, "");
}

#[tokio::test]
async fn binary_files_yield_nothing() {
    let dir = tempfile::tempdir().unwrap();
    write(dir.path(), "blob.bin", b"\xff\xfe password = 'x'\n");
    assert_eq!(count(dir.path(), ScanOptions::default()).await, 0);
}

#[tokio::test]
async fn excluding_every_rule_is_no_rules() {
    let tree = layered_tree();
    let (client, rule) = client_with_password_rule().await;

    let empty_exclude = ScanOptions {
        exclude: Vec::new(),
        ..ScanOptions::default()
    };
    assert_eq!(
        client
            .scan_path(tree.path(), &empty_exclude, &CancellationToken::new())
            .await
            .unwrap()
            .len(),
        4
    );

    let other = tempfile::tempdir().unwrap();
    let all_excluded = ScanOptions {
        exclude: vec![rule],
        ..ScanOptions::default()
    };
    let err = client
        .scan_path(other.path(), &all_excluded, &CancellationToken::new())
        .await
        .unwrap_err();
    assert!(matches!(err, ClientError::Scan(ScanError::NoRules)));
    let key = std::fs::canonicalize(other.path()).unwrap();
    assert!(client.get_repo(&key.to_string_lossy()).await.is_none());
}

#[tokio::test]
async fn missing_path_is_file_not_found() {
    let (client, _) = client_with_password_rule().await;
    let err = client
        .scan_path(Path::new("/no/such/dir"), &ScanOptions::default(), &CancellationToken::new())
        .await
        .unwrap_err();
    assert!(matches!(err, ClientError::Scan(ScanError::FileNotFound(_))));
}

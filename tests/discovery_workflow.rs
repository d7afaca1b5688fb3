//! Discovery triage through the public client API: state transitions,
//! group updates, referential behavior, similarity and rendering.

mod common;

use pretty_assertions::assert_eq;
use secretsweep::client::ScanOptions;
use secretsweep::models::{DiscoveryQuery, DiscoveryState, NewDiscovery};
use secretsweep::output::{DiscoveryReport, JsonRenderer, OutputRenderer};
use tokio_util::sync::CancellationToken;

use common::client_with_password_rule;

const REPO: &str = "https://example.test/acme/service";

fn found(file: &str, line: i64, snippet: &str, rule_id: i64) -> NewDiscovery {
    NewDiscovery {
        file_name: file.to_string(),
        commit_id: "f00d".to_string(),
        line_number: line,
        snippet: snippet.to_string(),
        rule_id,
        state: DiscoveryState::New,
    }
}

#[tokio::test]
async fn invalid_state_leaves_discovery_untouched() {
    let (client, rule) = client_with_password_rule().await;
    assert!(client.add_repo(REPO).await);
    let id = client
        .add_discovery(REPO, &found("a.py", 1, "password = 'x'", rule))
        .await
        .unwrap();

    assert!(client.update_discovery(id, "addressing").await);
    assert!(!client.update_discovery(id, "bogus").await);
    assert!(client.update_discovery(id, "addressing").await);
    assert_eq!(client.get_discovery(id).await.unwrap().state, DiscoveryState::Addressing);
}

#[tokio::test]
async fn group_update_fans_out_to_identical_snippets() {
    let (client, rule) = client_with_password_rule().await;
    client.add_repo(REPO).await;
    let ids = client
        .add_discoveries(
            REPO,
            &[
                found("a.py", 1, "password = 'x'", rule),
                found("a.py", 7, "password = 'x'", rule),
                found("a.py", 9, "password = 'x'", rule),
                found("a.py", 12, "password = 'y'", rule),
            ],
        )
        .await;
    assert_eq!(ids.len(), 4);

    assert!(
        client
            .update_discovery_group(REPO, Some("a.py"), Some("password = 'x'"), "false_positive")
            .await
    );

    for id in &ids[..3] {
        assert_eq!(client.get_discovery(*id).await.unwrap().state, DiscoveryState::FalsePositive);
    }
    assert_eq!(client.get_discovery(ids[3]).await.unwrap().state, DiscoveryState::New);

    let groups = client.get_discovery_group(REPO, Some(DiscoveryState::FalsePositive)).await;
    assert_eq!(groups.len(), 1);
    assert_eq!(groups[0].occurrences, 3);

    let summary = client.get_files_summary(REPO).await;
    assert_eq!(summary.len(), 1);
    assert_eq!(summary[0].false_positive, 3);
    assert_eq!(summary[0].new, 1);
}

#[tokio::test]
async fn deleting_rules_and_repos() {
    let (client, rule) = client_with_password_rule().await;
    client.add_repo(REPO).await;
    let id = client
        .add_discovery(REPO, &found("a.py", 1, "password = 'x'", rule))
        .await
        .unwrap();

    assert!(client.delete_rule(rule).await);
    let orphan = client.get_discovery(id).await.unwrap();
    assert_eq!(orphan.rule_id, None);

    assert!(client.delete_repo(REPO).await);
    assert!(client.get_discovery(id).await.is_none());
    let (total, rows) = client.get_discoveries(REPO, &DiscoveryQuery::default()).await;
    assert_eq!((total, rows.len()), (0, 0));
}

#[tokio::test]
async fn scanned_duplicates_are_propagated_by_similarity() {
    let dir = tempfile::tempdir().unwrap();
    std::fs::write(dir.path().join("a.py"), "db_password = os.environ['DB_PASSWORD']\n").unwrap();
    std::fs::write(dir.path().join("b.py"), "db_password = os.environ['DB_PASSWORD']\n").unwrap();
    std::fs::write(dir.path().join("c.py"), "smtp_password = 'Zq8#k2!vP0'\n").unwrap();

    let (client, _) = client_with_password_rule().await;
    let options = ScanOptions {
        similarity: true,
        ..ScanOptions::default()
    };
    let ids = client
        .scan_path(dir.path(), &options, &CancellationToken::new())
        .await
        .unwrap();
    assert_eq!(ids.len(), 3);
    let repo = client.get_discovery(ids[0]).await.unwrap().repo_url;

    let moved = client
        .update_similar_snippets("db_password = os.environ['DB_PASSWORD']", "not_relevant", &repo, None, 0.96)
        .await
        .unwrap();
    assert_eq!(moved, 2);

    let (_, open) = client
        .get_discoveries(
            &repo,
            &DiscoveryQuery {
                state: Some(DiscoveryState::New),
                ..DiscoveryQuery::default()
            },
        )
        .await;
    assert_eq!(open.len(), 1);
    assert_eq!(open[0].file_name, "c.py");
}

#[tokio::test]
async fn listed_discoveries_render_as_json() {
    let (client, rule) = client_with_password_rule().await;
    client.add_repo(REPO).await;
    client
        .add_discoveries(
            REPO,
            &[found("a.py", 1, "password = 'x'", rule), found("b.py", 2, "password = 'z'", rule)],
        )
        .await;

    let query = DiscoveryQuery {
        search: Some("'z'".to_string()),
        ..DiscoveryQuery::default()
    };
    let (total, discoveries) = client.get_discoveries(REPO, &query).await;
    let report = DiscoveryReport {
        repo_url: REPO.to_string(),
        total,
        discoveries,
        files: client.get_files_summary(REPO).await,
    };
    let parsed: serde_json::Value = serde_json::from_str(&JsonRenderer.render(&report)).unwrap();
    assert_eq!(parsed["total"], 1);
    assert_eq!(parsed["discoveries"][0]["file_name"], "b.py");
    assert_eq!(parsed["files"].as_array().unwrap().len(), 2);
}

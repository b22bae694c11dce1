use chrono::{DateTime, TimeZone, Utc};
use eadsync_core::digest::{DigestEntry, Digester};
use eadsync_core::traits::DigestStore;

use crate::integration::common::setup_test_db;

fn at(y: i32, m: u32, d: u32, h: u32) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(y, m, d, h, 0, 0).unwrap()
}

fn entry(script: &str, timestamp: DateTime<Utc>, message: &str) -> DigestEntry {
    DigestEntry {
        script_name: script.into(),
        timestamp,
        message: message.into(),
    }
}

#[tokio::test]
async fn append_and_list_entries_in_time_order() {
    let (db, _container) = setup_test_db().await;
    let repo = db.digest_repo();

    repo.append(&entry("eadsync export", at(2024, 3, 2, 9), "second"))
        .await
        .unwrap();
    repo.append(&entry("eadsync marc", at(2024, 3, 1, 9), "first"))
        .await
        .unwrap();

    let entries = repo.entries().await.unwrap();
    assert_eq!(entries.len(), 2);
    assert_eq!(entries[0].message, "first");
    assert_eq!(entries[0].timestamp, at(2024, 3, 1, 9));
    assert_eq!(entries[1].script_name, "eadsync export");
}

#[tokio::test]
async fn prune_removes_only_older_entries() {
    let (db, _container) = setup_test_db().await;
    let repo = db.digest_repo();

    for (month, msg) in [(1, "jan"), (2, "feb"), (3, "mar")] {
        repo.append(&entry("eadsync export", at(2024, month, 10, 0), msg))
            .await
            .unwrap();
    }

    let removed = repo.prune_before(at(2024, 2, 1, 0)).await.unwrap();
    assert_eq!(removed, 1);

    let left: Vec<String> = repo
        .entries()
        .await
        .unwrap()
        .into_iter()
        .map(|e| e.message)
        .collect();
    assert_eq!(left, vec!["feb", "mar"]);
}

#[tokio::test]
async fn digester_runs_against_postgres() {
    let (db, _container) = setup_test_db().await;
    let digester = Digester::new(db.digest_repo());
    let now = at(2024, 4, 15, 12);

    digester
        .post_at("eadsync export", "old news", at(2024, 2, 20, 0))
        .await
        .unwrap();
    digester
        .post_at("eadsync export", "2 records exported", at(2024, 4, 15, 8))
        .await
        .unwrap();

    let text = digester.run(now).await.unwrap();
    assert!(text.starts_with("1 removed. 1 recent entries retained.\n"));
    assert!(text.contains("OUTPUT FROM eadsync export"));
    assert!(text.contains("2 records exported"));
    assert!(!text.contains("old news"));
}

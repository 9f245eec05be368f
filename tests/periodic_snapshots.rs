mod common;

use std::path::Path;
use std::time::Duration;

use common::{Behaviour, start};
use goal_browser_agent::dom::InteractiveElements;
use goal_browser_agent::snapshot::{SnapshotSink, spawn_periodic};
use goal_browser_agent::types::Command;

fn snapshot_files(dir: &Path) -> Vec<std::path::PathBuf> {
    match std::fs::read_dir(dir) {
        Ok(entries) => entries.map(|entry| entry.unwrap().path()).collect(),
        Err(_) => Vec::new(),
    }
}

#[tokio::test]
async fn periodic_snapshots_follow_the_session_lifecycle() {
    let dir = tempfile::tempdir().unwrap();
    let snapshots = dir.path().join("snapshots");
    let (session, thread, recorder) = start(Behaviour::default());

    let task = spawn_periodic(
        session.clone(),
        SnapshotSink::new(&snapshots),
        Duration::from_millis(20),
    );

    // not launched yet: ticks are skipped and the browser stays closed
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert!(recorder.calls().is_empty());
    assert!(snapshot_files(&snapshots).is_empty());

    session.submit(Command::GetFullPageHtml).await;
    tokio::time::sleep(Duration::from_millis(100)).await;

    let files = snapshot_files(&snapshots);
    assert!(!files.is_empty());
    for file in &files {
        let name = file.file_name().unwrap().to_string_lossy().to_string();
        assert!(name.starts_with("page_snapshot_") && name.ends_with(".json"), "{name}");
    }
    let body = std::fs::read_to_string(&files[0]).unwrap();
    let elements: InteractiveElements = serde_json::from_str(&body).unwrap();
    assert_eq!(elements.buttons[0].text, "Login");
    assert_eq!(elements.inputs[0].label, "Search the site");

    session.shutdown().await;
    tokio::time::timeout(Duration::from_secs(2), task)
        .await
        .expect("periodic task should stop once the session is stopped")
        .unwrap();

    tokio::task::spawn_blocking(move || thread.join().unwrap())
        .await
        .unwrap();
}

//! `workspace/didChangeWatchedFiles` starts builds for watched, clean files.

use std::sync::Arc;
use std::time::Duration;

use serde_json::json;
use url::Url;

use crate::common::{ScriptedBuilder, TestClient, fast_options, file_uri, toolchain};

async fn files_changed(client: &mut TestClient, uris: &[&Url]) {
    let changes: Vec<_> = uris.iter().map(|uri| json!({ "uri": uri, "type": 2 })).collect();
    client
        .notify("workspace/didChangeWatchedFiles", json!({ "changes": changes }))
        .await;
}

#[tokio::test]
async fn watched_changes_build_unless_filtered_out() {
    let dir = tempfile::tempdir().unwrap();
    let builder = ScriptedBuilder::ok();
    let builds = Arc::clone(&builder.builds);
    let mut client = TestClient::start(toolchain(builder), fast_options());
    client.initialize(Some(dir.path()), json!({})).await;

    // Before any settings arrive nothing is built.
    let lib_b = file_uri(&dir.path().join("lib/b.ex"));
    files_changed(&mut client, &[&lib_b]).await;
    client.drain(Duration::from_millis(50)).await;
    assert!(builds.lock().unwrap().is_empty());

    client.configure(json!({})).await;
    client.drain(Duration::from_millis(200)).await;
    assert_eq!(builds.lock().unwrap().len(), 1, "applying settings builds once");

    let edited = file_uri(&dir.path().join("lib/a.ex"));
    client.open(&edited, "x = 1\n").await;
    client.change(&edited, 2, "x = 2\n").await;
    let readme = file_uri(&dir.path().join("README.md"));
    files_changed(&mut client, &[&edited, &readme]).await;
    client.drain(Duration::from_millis(200)).await;
    assert_eq!(
        builds.lock().unwrap().len(),
        1,
        "dirty open documents and unwatched paths do not build"
    );

    files_changed(&mut client, &[&readme, &lib_b]).await;
    client.drain(Duration::from_millis(200)).await;
    assert_eq!(builds.lock().unwrap().len(), 2);

    client.configure(json!({ "autoBuild": false })).await;
    client.drain(Duration::from_millis(200)).await;
    assert_eq!(builds.lock().unwrap().len(), 3);
    files_changed(&mut client, &[&lib_b]).await;
    client.drain(Duration::from_millis(200)).await;
    assert_eq!(builds.lock().unwrap().len(), 3, "autoBuild off ignores file changes");
}

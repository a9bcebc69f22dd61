//! Parser and build diagnostics as the editor sees them.

use std::time::Duration;

use serde_json::json;

use ember_lsp::{BuildReport, BuildStatus};

use crate::common::{
    ScriptedBuilder, TestClient, build_warning, fast_options, file_uri, sources, toolchain,
};

#[tokio::test]
async fn parse_errors_follow_the_latest_version() {
    let mut client = TestClient::start(toolchain(ScriptedBuilder::ok()), fast_options());
    client.initialize(None, json!({})).await;
    let uri = file_uri(&std::env::temp_dir().join("ember-it").join("a.ex"));

    client.open(&uri, "x = 1\n").await;
    let clean = client.publish_for(&uri, |p| p["version"] == 1).await;
    assert_eq!(clean["params"]["diagnostics"], json!([]));

    client.change(&uri, 2, "1+").await;
    let broken = client.publish_for(&uri, |p| p["version"] == 2).await;
    let items = broken["params"]["diagnostics"].as_array().unwrap();
    assert_eq!(items.len(), 1);
    assert_eq!(items[0]["severity"], 1);
    assert_eq!(items[0]["source"], "ember/parser");
    assert_eq!(items[0]["range"]["start"], json!({ "line": 0, "character": 2 }));
    assert!(
        items[0]["message"]
            .as_str()
            .unwrap()
            .contains("expression is incomplete")
    );

    client.change(&uri, 3, "1 + 1").await;
    let fixed = client.publish_for(&uri, |p| p["version"] == 3).await;
    assert_eq!(fixed["params"]["diagnostics"], json!([]));
}

#[tokio::test]
async fn build_diagnostics_merge_with_parser_diagnostics() {
    let dir = tempfile::tempdir().unwrap();
    std::fs::write(dir.path().join("mix.exs"), "defmodule P.MixProject do\nend\n").unwrap();
    let a = dir.path().join("lib").join("a.ex");
    let b = dir.path().join("lib").join("b.ex");

    let (warn_a, warn_b) = (a.clone(), b.clone());
    let builder = ScriptedBuilder::new(move |_| {
        BuildReport::new(
            BuildStatus::Ok,
            vec![
                build_warning(&warn_a, 1, "variable x is unused"),
                build_warning(&warn_b, 3, "function f/0 is unused"),
            ],
        )
    });
    let mut client = TestClient::start(toolchain(builder), fast_options());
    client.initialize(Some(dir.path()), json!({})).await;

    let uri_a = file_uri(&a);
    let uri_b = file_uri(&b);
    client.open(&uri_a, "x = 1\n").await;
    client.change(&uri_a, 2, "1+").await;
    client.publish_for(&uri_a, |p| p["version"] == 2).await;

    client.configure(json!({})).await;
    let merged = client
        .publish_for(&uri_a, |p| p["diagnostics"].as_array().is_some_and(|d| d.len() == 2))
        .await;
    assert_eq!(merged["params"]["version"], 2);
    let mut seen = sources(&merged["params"]);
    seen.sort();
    assert_eq!(seen, ["ember/build", "ember/parser"]);

    // Closed files carry no version.
    let unopened = client.publish_for(&uri_b, |_| true).await;
    assert!(unopened["params"].get("version").is_none());
    assert_eq!(unopened["params"]["diagnostics"][0]["range"]["start"]["line"], 2);
}

#[tokio::test]
async fn failed_build_without_diagnostics_reports_on_manifest() {
    let dir = tempfile::tempdir().unwrap();
    std::fs::write(dir.path().join("mix.exs"), "").unwrap();
    let builder = ScriptedBuilder::new(|_| BuildReport::new(BuildStatus::Crashed("boom".into()), Vec::new()));
    let mut client = TestClient::start(toolchain(builder), fast_options());
    client.initialize(Some(dir.path()), json!({})).await;
    client.configure(json!({})).await;

    let manifest = file_uri(&dir.path().join("mix.exs"));
    let published = client
        .publish_for(&manifest, |p| !p["diagnostics"].as_array().unwrap().is_empty())
        .await;
    let message = published["params"]["diagnostics"][0]["message"].as_str().unwrap();
    assert!(message.contains("boom"), "{message}");
}

#[tokio::test]
async fn saves_trigger_builds_only_when_auto_build_is_on() {
    let dir = tempfile::tempdir().unwrap();
    let builder = ScriptedBuilder::ok();
    let builds = std::sync::Arc::clone(&builder.builds);
    let mut client = TestClient::start(toolchain(builder), fast_options());
    client.initialize(Some(dir.path()), json!({})).await;
    let uri = file_uri(&dir.path().join("a.ex"));
    client.open(&uri, "x = 1\n").await;

    client.configure(json!({ "autoBuild": false })).await;
    client.drain(Duration::from_millis(200)).await;
    assert_eq!(builds.lock().unwrap().len(), 1, "applying settings builds once");

    client.save(&uri).await;
    client.drain(Duration::from_millis(200)).await;
    assert_eq!(builds.lock().unwrap().len(), 1);

    client.configure(json!({ "autoBuild": true })).await;
    client.save(&uri).await;
    client.drain(Duration::from_millis(300)).await;
    assert!(builds.lock().unwrap().len() >= 2);
}

//! Controlled restarts keep the connection and the handshake.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use serde_json::{Value, json};

use ember_lsp::{BuildReport, BuildStatus};

use crate::common::{ScriptedBuilder, TestClient, build_warning, fast_options, file_uri, toolchain};

#[tokio::test]
async fn locked_setting_change_restarts_and_recovers() {
    let dir = tempfile::tempdir().unwrap();
    let mut client = TestClient::start(toolchain(ScriptedBuilder::ok()), fast_options());
    client.initialize(Some(dir.path()), json!({})).await;
    client.configure(json!({ "buildEnv": "dev" })).await;
    client.configure(json!({ "buildEnv": "test" })).await;

    let shown = client.notification("window/showMessage").await;
    assert_eq!(shown["params"]["type"], 2);
    assert!(shown["params"]["message"].as_str().unwrap().contains("buildEnv"));

    // The restarted session is already initialized: documents work at once.
    let uri = file_uri(&dir.path().join("a.ex"));
    client.open(&uri, "1+").await;
    let published = client.publish_for(&uri, |p| p["version"] == 1).await;
    assert_eq!(published["params"]["diagnostics"].as_array().unwrap().len(), 1);

    client.request(9, "shutdown", Value::Null).await;
    assert!(client.response(9).await["result"].is_null());
    assert_eq!(client.exit().await, 0);
}

#[tokio::test]
async fn restart_command_replays_dynamic_registration() {
    let mut client = TestClient::start(toolchain(ScriptedBuilder::ok()), fast_options());
    let caps = json!({ "workspace": { "didChangeWatchedFiles": { "dynamicRegistration": true } } });
    let reply = client.initialize(None, caps).await;
    let restart = reply["result"]["capabilities"]["executeCommandProvider"]["commands"][0]
        .as_str()
        .unwrap()
        .to_string();
    assert!(restart.starts_with("restart:"));

    let first = client.wait_for(|m| m["method"] == "client/registerCapability").await;
    let id = first["params"]["registrations"][0]["id"].as_str().unwrap().to_string();
    assert!(id.starts_with("workspace/didChangeWatchedFiles-"));

    client
        .request(2, "workspace/executeCommand", json!({ "command": restart }))
        .await;
    assert!(client.response(2).await["result"].is_null());

    let unregister = client
        .wait_for(|m| m["method"] == "client/unregisterCapability")
        .await;
    assert_eq!(unregister["params"]["unregisterations"][0]["id"], id.as_str());
    let again = client.wait_for(|m| m["method"] == "client/registerCapability").await;
    assert_eq!(again["params"]["registrations"][0]["id"], id.as_str());
    assert_ne!(first["id"], again["id"]);

    client.drain(Duration::from_millis(50)).await;
}

#[tokio::test]
async fn pushed_settings_survive_the_restart_they_cause() {
    let dir = tempfile::tempdir().unwrap();
    let envs = Arc::new(Mutex::new(Vec::new()));
    let seen = Arc::clone(&envs);
    let builder = ScriptedBuilder::new(move |req| {
        let env = req.settings.build_env().unwrap_or("none").to_string();
        seen.lock().unwrap().push(env.clone());
        let file = req.project_root.join("lib/a.ex");
        BuildReport::new(BuildStatus::Ok, vec![build_warning(&file, 1, &format!("built for {env}"))])
    });
    let mut client = TestClient::start(toolchain(builder), fast_options());
    // No workspace/configuration support: settings only arrive by push.
    client.initialize(Some(dir.path()), json!({})).await;
    let built = file_uri(&dir.path().join("lib/a.ex"));

    client.configure(json!({ "buildEnv": "dev" })).await;
    client
        .publish_for(&built, |p| p["diagnostics"][0]["message"] == "built for dev")
        .await;

    client.configure(json!({ "buildEnv": "test" })).await;
    client.notification("window/showMessage").await;
    client
        .publish_for(&built, |p| p["diagnostics"][0]["message"] == "built for test")
        .await;

    // Pushing the same value again is not a conflict any more.
    client.configure(json!({ "buildEnv": "test" })).await;
    let later = client.drain(Duration::from_millis(300)).await;
    assert!(
        later.iter().all(|m| m["method"] != "window/showMessage"),
        "restarted again: {later:?}"
    );
    assert_eq!(*envs.lock().unwrap(), ["dev", "test"]);

    client.request(9, "shutdown", Value::Null).await;
    assert!(client.response(9).await["result"].is_null());
    assert_eq!(client.exit().await, 0);
}

//! Initialize / shutdown / exit over the wire.

use serde_json::{Value, json};

use crate::common::{ScriptedBuilder, TestClient, fast_options, toolchain};

#[tokio::test]
async fn clean_shutdown_exits_zero() {
    let mut client = TestClient::start(toolchain(ScriptedBuilder::ok()), fast_options());
    let reply = client.initialize(None, json!({})).await;

    let caps = &reply["result"]["capabilities"];
    assert_eq!(caps["textDocumentSync"]["change"], 1);
    assert_eq!(caps["textDocumentSync"]["openClose"], true);
    assert_eq!(caps["hoverProvider"], true);
    assert_eq!(reply["result"]["serverInfo"]["name"], "ember");
    let commands = caps["executeCommandProvider"]["commands"].as_array().unwrap();
    assert!(commands.iter().any(|c| c.as_str().unwrap().starts_with("restart:")));

    client.request(2, "shutdown", Value::Null).await;
    let reply = client.response(2).await;
    assert!(reply["result"].is_null());
    assert!(reply.get("error").is_none());

    assert_eq!(client.exit().await, 0);
}

#[tokio::test]
async fn exit_without_shutdown_exits_one() {
    let mut client = TestClient::start(toolchain(ScriptedBuilder::ok()), fast_options());
    client.initialize(None, json!({})).await;
    assert_eq!(client.exit().await, 1);
}

#[tokio::test]
async fn request_before_initialize_is_not_initialized() {
    let mut client = TestClient::start(toolchain(ScriptedBuilder::ok()), fast_options());
    client
        .request(5, "textDocument/documentSymbol", json!({ "textDocument": { "uri": "file:///p/a.ex" } }))
        .await;
    let reply = client.response(5).await;
    assert_eq!(reply["error"]["code"], -32002);
}

#[tokio::test]
async fn second_initialize_is_rejected() {
    let mut client = TestClient::start(toolchain(ScriptedBuilder::ok()), fast_options());
    client.initialize(None, json!({})).await;
    client.request(2, "initialize", json!({ "capabilities": {} })).await;
    let reply = client.response(2).await;
    assert_eq!(reply["error"]["code"], -32600);
}

#[tokio::test]
async fn requests_emit_telemetry() {
    let mut client = TestClient::start(toolchain(ScriptedBuilder::ok()), fast_options());
    client.initialize(None, json!({})).await;
    let event = client.notification("telemetry/event").await;
    assert_eq!(event["params"]["name"], "request_completed");
    assert_eq!(event["params"]["method"], "initialize");
    assert!(event["params"]["errorKind"].is_null());
}

#[tokio::test]
async fn configuration_is_pulled_when_supported() {
    let dir = tempfile::tempdir().unwrap();
    let mut client = TestClient::start(toolchain(ScriptedBuilder::ok()), fast_options());
    client
        .initialize(Some(dir.path()), json!({ "workspace": { "configuration": true } }))
        .await;

    let pull = client.wait_for(|m| m["method"] == "workspace/configuration").await;
    assert_eq!(pull["params"]["items"][0]["section"], "ember");
    client.respond(&pull["id"], json!([{ "projectDir": "missing" }])).await;

    let shown = client.notification("window/showMessage").await;
    assert_eq!(shown["params"]["type"], 1);
    assert!(shown["params"]["message"].as_str().unwrap().contains("missing"));
}

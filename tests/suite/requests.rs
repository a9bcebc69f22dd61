//! Delegated requests: providers, cancellation, commands.

use std::sync::Arc;
use std::time::Duration;

use serde_json::json;

use crate::common::{ScriptedBuilder, SlowHover, TestClient, fast_options, file_uri, toolchain};

const MODULE: &str = "defmodule Greeter do\n  def hello(name) do\n    name\n  end\nend\n";

#[tokio::test]
async fn symbols_and_definition_come_from_the_open_document() {
    let mut client = TestClient::start(toolchain(ScriptedBuilder::ok()), fast_options());
    client.initialize(None, json!({})).await;
    let uri = file_uri(&std::env::temp_dir().join("ember-it").join("greeter.ex"));
    client.open(&uri, MODULE).await;

    client
        .request(2, "textDocument/documentSymbol", json!({ "textDocument": { "uri": uri } }))
        .await;
    let symbols = client.response(2).await;
    let names: Vec<&str> = symbols["result"]
        .as_array()
        .unwrap()
        .iter()
        .map(|s| s["name"].as_str().unwrap())
        .collect();
    assert!(names.contains(&"Greeter"), "{names:?}");
    assert!(names.contains(&"hello"), "{names:?}");
}

#[tokio::test]
async fn request_on_unopened_document_is_invalid_params() {
    let mut client = TestClient::start(toolchain(ScriptedBuilder::ok()), fast_options());
    client.initialize(None, json!({})).await;
    client
        .request(
            2,
            "textDocument/hover",
            json!({ "textDocument": { "uri": "file:///nowhere/x.ex" }, "position": { "line": 0, "character": 0 } }),
        )
        .await;
    let reply = client.response(2).await;
    assert_eq!(reply["error"]["code"], -32602);
}

#[tokio::test]
async fn unknown_method_is_method_not_found() {
    let mut client = TestClient::start(toolchain(ScriptedBuilder::ok()), fast_options());
    client.initialize(None, json!({})).await;
    client.request(2, "textDocument/rename", json!({})).await;
    assert_eq!(client.response(2).await["error"]["code"], -32601);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn cancelled_request_gets_exactly_one_cancelled_reply() {
    let mut tools = toolchain(ScriptedBuilder::ok());
    tools.providers = Arc::new(SlowHover {
        delay: Duration::from_millis(300),
    });
    let mut client = TestClient::start(tools, fast_options());
    client.initialize(None, json!({})).await;
    let uri = file_uri(&std::env::temp_dir().join("ember-it").join("greeter.ex"));
    client.open(&uri, MODULE).await;

    client
        .request(
            7,
            "textDocument/hover",
            json!({ "textDocument": { "uri": uri }, "position": { "line": 1, "character": 7 } }),
        )
        .await;
    client.notify("$/cancelRequest", json!({ "id": 7 })).await;

    let reply = client.response(7).await;
    assert_eq!(reply["error"]["code"], -32800);

    let later = client.drain(Duration::from_millis(600)).await;
    assert!(
        !later.iter().any(|m| m["id"] == 7 && m.get("method").is_none()),
        "request 7 answered twice"
    );
    let telemetry = later
        .iter()
        .chain(std::iter::once(&reply))
        .filter(|m| m["method"] == "telemetry/event" && m["params"]["method"] == "textDocument/hover")
        .count();
    assert!(telemetry <= 1);
}

#[tokio::test]
async fn cancelling_an_unknown_request_is_ignored() {
    let mut client = TestClient::start(toolchain(ScriptedBuilder::ok()), fast_options());
    client.initialize(None, json!({})).await;
    client.notify("$/cancelRequest", json!({ "id": 99 })).await;
    client.request(2, "shutdown", serde_json::Value::Null).await;
    assert!(client.response(2).await["result"].is_null());
    assert_eq!(client.exit().await, 0);
}

#[tokio::test]
async fn rebuild_command_starts_a_build() {
    let dir = tempfile::tempdir().unwrap();
    let builder = ScriptedBuilder::ok();
    let builds = Arc::clone(&builder.builds);
    let mut client = TestClient::start(toolchain(builder), fast_options());
    let reply = client.initialize(Some(dir.path()), json!({})).await;
    let rebuild = reply["result"]["capabilities"]["executeCommandProvider"]["commands"]
        .as_array()
        .unwrap()
        .iter()
        .find_map(|c| c.as_str().filter(|c| c.starts_with("rebuild:")))
        .unwrap()
        .to_string();

    client.configure(json!({})).await;
    client.drain(Duration::from_millis(200)).await;
    let before = builds.lock().unwrap().len();

    client
        .request(2, "workspace/executeCommand", json!({ "command": rebuild, "arguments": [] }))
        .await;
    assert!(client.response(2).await["result"].is_null());
    client.drain(Duration::from_millis(200)).await;
    assert_eq!(builds.lock().unwrap().len(), before + 1);

    client
        .request(3, "workspace/executeCommand", json!({ "command": "rebuild:someone-else" }))
        .await;
    assert_eq!(client.response(3).await["error"]["code"], -32602);
}

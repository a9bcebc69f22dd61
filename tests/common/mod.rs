//! Shared test utilities and fixtures
//!
//! Drives `ember_lsp::serve` over in-memory pipes with the real codec and
//! scripted collaborators.

#![allow(dead_code)]

use std::path::Path;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use serde_json::{Value, json};
use tokio::io::{DuplexStream, ReadHalf, WriteHalf};
use tokio::task::JoinHandle;
use url::Url;

use ember_lsp::codec::{FrameReader, FrameWriter};
use ember_lsp::documents::DocumentSnapshot;
use ember_lsp::protocol::{Position, path_to_file_uri};
use ember_lsp::providers::{
    CompletionItem, DocumentSymbol, Hover, Location, ProviderError, Providers, TextEdit,
    TextProviders,
};
use ember_lsp::syntax::DelimiterChecker;
use ember_lsp::{
    AnalysisFut, AnalysisRequest, Analyzer, BuildFut, BuildReport, BuildRequest, BuildStatus,
    Builder, EngineOptions, Toolchain,
};
use ember_types::{Diagnostic, Settings};

const PIPE_CAPACITY: usize = 1 << 20;

const RECV_TIMEOUT: Duration = Duration::from_secs(5);

/// Fast timers so tests do not wait on production defaults.
pub fn fast_options() -> EngineOptions {
    EngineOptions {
        parse_debounce: Duration::from_millis(20),
        configuration_fallback: Duration::from_millis(200),
        ..EngineOptions::default()
    }
}

/// Builder that answers every build with the same scripted report.
pub struct ScriptedBuilder {
    report: Box<dyn Fn(&BuildRequest) -> BuildReport + Send + Sync>,
    pub builds: Arc<Mutex<Vec<u64>>>,
}

impl ScriptedBuilder {
    pub fn new(report: impl Fn(&BuildRequest) -> BuildReport + Send + Sync + 'static) -> Self {
        Self {
            report: Box::new(report),
            builds: Arc::new(Mutex::new(Vec::new())),
        }
    }

    pub fn ok() -> Self {
        Self::new(|_| BuildReport::new(BuildStatus::Ok, Vec::new()))
    }
}

impl Builder for ScriptedBuilder {
    fn build(&self, request: BuildRequest) -> BuildFut {
        self.builds.lock().unwrap().push(request.generation);
        let report = (self.report)(&request);
        Box::pin(async move { report })
    }
}

pub struct NoAnalysis;

impl Analyzer for NoAnalysis {
    fn is_enabled(&self, _settings: &Settings) -> bool {
        false
    }

    fn analyze(&self, _request: AnalysisRequest) -> AnalysisFut {
        Box::pin(async { Ok(Vec::new()) })
    }
}

/// Text providers whose hover blocks its worker thread for `delay`.
pub struct SlowHover {
    pub delay: Duration,
}

impl Providers for SlowHover {
    fn hover(&self, doc: &DocumentSnapshot, position: Position, settings: &Settings) -> Result<Option<Hover>, ProviderError> {
        std::thread::sleep(self.delay);
        TextProviders.hover(doc, position, settings)
    }

    fn completion(
        &self,
        doc: &DocumentSnapshot,
        position: Position,
        settings: &Settings,
    ) -> Result<Vec<CompletionItem>, ProviderError> {
        TextProviders.completion(doc, position, settings)
    }

    fn definition(
        &self,
        doc: &DocumentSnapshot,
        position: Position,
        settings: &Settings,
    ) -> Result<Option<Location>, ProviderError> {
        TextProviders.definition(doc, position, settings)
    }

    fn document_symbols(&self, doc: &DocumentSnapshot, settings: &Settings) -> Result<Vec<DocumentSymbol>, ProviderError> {
        TextProviders.document_symbols(doc, settings)
    }

    fn format(&self, doc: &DocumentSnapshot, settings: &Settings) -> Result<Vec<TextEdit>, ProviderError> {
        TextProviders.format(doc, settings)
    }
}

pub fn toolchain(builder: impl Builder + 'static) -> Toolchain {
    Toolchain {
        syntax: Arc::new(DelimiterChecker),
        builder: Arc::new(builder),
        analyzer: Arc::new(NoAnalysis),
        providers: Arc::new(TextProviders),
    }
}

/// The editor side of one connection.
pub struct TestClient {
    reader: FrameReader<ReadHalf<DuplexStream>>,
    writer: FrameWriter<WriteHalf<DuplexStream>>,
    server: JoinHandle<i32>,
    /// Messages read while looking for something else.
    backlog: Vec<Value>,
}

impl TestClient {
    pub fn start(toolchain: Toolchain, options: EngineOptions) -> Self {
        let (client_io, server_io) = tokio::io::duplex(PIPE_CAPACITY);
        let (server_read, server_write) = tokio::io::split(server_io);
        let server = tokio::spawn(ember_lsp::serve(server_read, server_write, toolchain, options));
        let (client_read, client_write) = tokio::io::split(client_io);
        Self {
            reader: FrameReader::new(client_read),
            writer: FrameWriter::new(client_write),
            server,
            backlog: Vec::new(),
        }
    }

    pub async fn request(&mut self, id: i64, method: &str, params: Value) {
        let frame = json!({ "jsonrpc": "2.0", "id": id, "method": method, "params": params });
        self.writer.write_frame(&frame).await.unwrap();
    }

    pub async fn notify(&mut self, method: &str, params: Value) {
        let frame = json!({ "jsonrpc": "2.0", "method": method, "params": params });
        self.writer.write_frame(&frame).await.unwrap();
    }

    pub async fn respond(&mut self, id: &Value, result: Value) {
        let frame = json!({ "jsonrpc": "2.0", "id": id, "result": result });
        self.writer.write_frame(&frame).await.unwrap();
    }

    async fn read(&mut self) -> Value {
        tokio::time::timeout(RECV_TIMEOUT, self.reader.read_frame())
            .await
            .expect("server went quiet")
            .unwrap()
            .expect("server closed the connection")
    }

    /// First message (backlog included) matching `pred`.
    pub async fn wait_for(&mut self, pred: impl Fn(&Value) -> bool) -> Value {
        if let Some(pos) = self.backlog.iter().position(&pred) {
            return self.backlog.remove(pos);
        }
        loop {
            let message = self.read().await;
            if pred(&message) {
                return message;
            }
            self.backlog.push(message);
        }
    }

    pub async fn response(&mut self, id: i64) -> Value {
        self.wait_for(|m| m["id"] == id && m.get("method").is_none())
            .await
    }

    pub async fn notification(&mut self, method: &str) -> Value {
        self.wait_for(|m| m["method"] == method && m.get("id").is_none())
            .await
    }

    /// Next publish for `uri` whose params satisfy `pred`.
    pub async fn publish_for(&mut self, uri: &Url, pred: impl Fn(&Value) -> bool) -> Value {
        let uri = uri.as_str().to_string();
        self.wait_for(|m| {
            m["method"] == "textDocument/publishDiagnostics"
                && m["params"]["uri"] == uri.as_str()
                && pred(&m["params"])
        })
        .await
    }

    /// Every message that arrives within `window`.
    pub async fn drain(&mut self, window: Duration) -> Vec<Value> {
        let mut seen = std::mem::take(&mut self.backlog);
        while let Ok(Ok(Some(message))) = tokio::time::timeout(window, self.reader.read_frame()).await {
            seen.push(message);
        }
        seen
    }

    pub async fn initialize(&mut self, root: Option<&Path>, capabilities: Value) -> Value {
        let root_uri = root.map(|p| path_to_file_uri(p).unwrap().to_string());
        self.request(1, "initialize", json!({ "processId": null, "rootUri": root_uri, "capabilities": capabilities }))
            .await;
        let reply = self.response(1).await;
        self.notify("initialized", json!({})).await;
        reply
    }

    pub async fn configure(&mut self, settings: Value) {
        self.notify("workspace/didChangeConfiguration", json!({ "settings": { "ember": settings } }))
            .await;
    }

    pub async fn open(&mut self, uri: &Url, text: &str) {
        self.notify(
            "textDocument/didOpen",
            json!({ "textDocument": { "uri": uri, "languageId": "elixir", "version": 1, "text": text } }),
        )
        .await;
    }

    pub async fn change(&mut self, uri: &Url, version: i32, text: &str) {
        self.notify(
            "textDocument/didChange",
            json!({ "textDocument": { "uri": uri, "version": version }, "contentChanges": [{ "text": text }] }),
        )
        .await;
    }

    pub async fn save(&mut self, uri: &Url) {
        self.notify("textDocument/didSave", json!({ "textDocument": { "uri": uri } }))
            .await;
    }

    /// Send `exit` and return the server's exit code.
    pub async fn exit(mut self) -> i32 {
        self.notify("exit", Value::Null).await;
        tokio::time::timeout(RECV_TIMEOUT, self.server)
            .await
            .expect("server did not exit")
            .unwrap()
    }
}

pub fn file_uri(path: &Path) -> Url {
    path_to_file_uri(path).unwrap()
}

pub fn sources(params: &Value) -> Vec<String> {
    params["diagnostics"]
        .as_array()
        .map(|items| {
            items
                .iter()
                .filter_map(|d| d["source"].as_str().map(str::to_string))
                .collect()
        })
        .unwrap_or_default()
}

pub fn build_warning(path: &Path, line: u32, message: &str) -> Diagnostic {
    Diagnostic::new(
        path,
        ember_types::Severity::Warning,
        message,
        ember_types::Span::Line(line),
        ember_types::DiagnosticSource::Build,
    )
}

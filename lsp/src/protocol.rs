//! JSON-RPC message types and the LSP payloads the engine reads and writes.

use std::fmt;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use serde_json::Value;
use url::Url;

use ember_types::{Diagnostic, Span};

#[derive(Debug, thiserror::Error)]
#[error("cannot convert path to file URI: {}", path.display())]
pub struct PathToUriError {
    path: PathBuf,
}

#[derive(Debug, thiserror::Error)]
pub enum ProtocolError {
    #[error("frame is not a JSON-RPC message: {0}")]
    NotJsonRpc(String),
    #[error("invalid request id: {0}")]
    InvalidId(Value),
}

// ============================================================================
// Ids and error codes
// ============================================================================

/// Client-assigned request id. Opaque; unique only among in-flight requests.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(untagged)]
pub enum RequestId {
    Number(i64),
    String(String),
}

impl fmt::Display for RequestId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Number(n) => write!(f, "{n}"),
            Self::String(s) => write!(f, "{s:?}"),
        }
    }
}

impl From<i64> for RequestId {
    fn from(value: i64) -> Self {
        Self::Number(value)
    }
}

/// JSON-RPC and LSP error codes the engine emits.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCode {
    ParseError,
    InvalidRequest,
    MethodNotFound,
    InvalidParams,
    InternalError,
    ServerNotInitialized,
    RequestFailed,
    ContentModified,
    RequestCancelled,
}

impl ErrorCode {
    #[must_use]
    pub fn code(self) -> i64 {
        match self {
            Self::ParseError => -32700,
            Self::InvalidRequest => -32600,
            Self::MethodNotFound => -32601,
            Self::InvalidParams => -32602,
            Self::InternalError => -32603,
            Self::ServerNotInitialized => -32002,
            Self::RequestFailed => -32803,
            Self::ContentModified => -32801,
            Self::RequestCancelled => -32800,
        }
    }

    /// Short label used as the telemetry error kind.
    #[must_use]
    pub fn kind(self) -> &'static str {
        match self {
            Self::ParseError => "parse_error",
            Self::InvalidRequest => "invalid_request",
            Self::MethodNotFound => "method_not_found",
            Self::InvalidParams => "invalid_params",
            Self::InternalError => "server_error",
            Self::ServerNotInitialized => "not_initialized",
            Self::RequestFailed => "request_failed",
            Self::ContentModified => "content_modified",
            Self::RequestCancelled => "cancelled",
        }
    }
}

/// A request-scoped failure that becomes an error response.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{message}")]
pub struct RequestError {
    code: ErrorCode,
    message: String,
}

impl RequestError {
    pub fn new(code: ErrorCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }

    pub fn invalid_params(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::InvalidParams, message)
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::InternalError, message)
    }

    #[must_use]
    pub fn cancelled() -> Self {
        Self::new(ErrorCode::RequestCancelled, "request cancelled")
    }

    #[must_use]
    pub fn not_initialized() -> Self {
        Self::new(ErrorCode::ServerNotInitialized, "server not initialized")
    }

    #[must_use]
    pub fn method_not_found(method: &str) -> Self {
        Self::new(ErrorCode::MethodNotFound, format!("method not found: {method}"))
    }

    #[must_use]
    pub fn code(&self) -> ErrorCode {
        self.code
    }

    #[must_use]
    pub fn message(&self) -> &str {
        &self.message
    }
}

// ============================================================================
// Incoming messages
// ============================================================================

/// A decoded JSON-RPC message from the client.
#[derive(Debug, Clone, PartialEq)]
pub enum Message {
    Request {
        id: RequestId,
        method: String,
        params: Value,
    },
    Notification {
        method: String,
        params: Value,
    },
    /// Answer to a request the server sent to the client.
    Response {
        id: RequestId,
        result: Option<Value>,
        error: Option<ResponseError>,
    },
}

impl Message {
    /// Classify a raw frame. Absent `params` become `Value::Null`.
    pub fn from_value(frame: Value) -> Result<Self, ProtocolError> {
        let Value::Object(mut map) = frame else {
            return Err(ProtocolError::NotJsonRpc("frame is not an object".into()));
        };
        let id = map.remove("id");
        let method = match map.remove("method") {
            Some(Value::String(method)) => Some(method),
            Some(other) => {
                return Err(ProtocolError::NotJsonRpc(format!(
                    "method must be a string, got {other}"
                )));
            }
            None => None,
        };
        let params = map.remove("params").unwrap_or(Value::Null);

        match (id, method) {
            (Some(id), Some(method)) => Ok(Self::Request {
                id: parse_id(id)?,
                method,
                params,
            }),
            (None, Some(method)) => Ok(Self::Notification { method, params }),
            (Some(id), None) if map.contains_key("result") || map.contains_key("error") => {
                let error = match map.remove("error") {
                    Some(Value::Null) | None => None,
                    Some(raw) => Some(
                        serde_json::from_value(raw)
                            .map_err(|e| ProtocolError::NotJsonRpc(e.to_string()))?,
                    ),
                };
                Ok(Self::Response {
                    id: parse_id(id)?,
                    result: map.remove("result"),
                    error,
                })
            }
            _ => Err(ProtocolError::NotJsonRpc(
                "neither request, notification nor response".into(),
            )),
        }
    }
}

fn parse_id(raw: Value) -> Result<RequestId, ProtocolError> {
    serde_json::from_value(raw.clone()).map_err(|_| ProtocolError::InvalidId(raw))
}

// ============================================================================
// Outgoing messages
// ============================================================================

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResponseError {
    pub code: i64,
    pub message: String,
}

impl From<&RequestError> for ResponseError {
    fn from(err: &RequestError) -> Self {
        Self {
            code: err.code().code(),
            message: err.message().to_string(),
        }
    }
}

#[derive(Debug, Serialize)]
pub struct Response {
    pub jsonrpc: &'static str,
    pub id: RequestId,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<ResponseError>,
}

impl Response {
    pub fn new(id: RequestId, result: Result<Value, RequestError>) -> Self {
        match result {
            Ok(value) => Self {
                jsonrpc: "2.0",
                id,
                result: Some(value),
                error: None,
            },
            Err(err) => Self {
                jsonrpc: "2.0",
                id,
                result: None,
                error: Some(ResponseError::from(&err)),
            },
        }
    }
}

/// Server-to-client request (configuration pull, capability registration).
#[derive(Debug, Serialize)]
pub struct Request {
    pub jsonrpc: &'static str,
    pub id: RequestId,
    pub method: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub params: Option<Value>,
}

impl Request {
    pub fn new(id: RequestId, method: &'static str, params: Option<Value>) -> Self {
        Self {
            jsonrpc: "2.0",
            id,
            method,
            params,
        }
    }
}

#[derive(Debug, Serialize)]
pub struct Notification {
    pub jsonrpc: &'static str,
    pub method: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub params: Option<Value>,
}

impl Notification {
    pub fn new(method: &'static str, params: Option<Value>) -> Self {
        Self {
            jsonrpc: "2.0",
            method,
            params,
        }
    }
}

// ============================================================================
// LSP payloads
// ============================================================================

/// Raw client capabilities, queried by JSON pointer.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(transparent)]
pub struct ClientCapabilities(Value);

impl ClientCapabilities {
    fn flag(&self, pointer: &str) -> bool {
        self.0.pointer(pointer).and_then(Value::as_bool).unwrap_or(false)
    }

    #[must_use]
    pub fn supports_configuration_pull(&self) -> bool {
        self.flag("/workspace/configuration")
    }

    #[must_use]
    pub fn supports_dynamic_configuration(&self) -> bool {
        self.flag("/workspace/didChangeConfiguration/dynamicRegistration")
    }

    #[must_use]
    pub fn supports_dynamic_watchers(&self) -> bool {
        self.flag("/workspace/didChangeWatchedFiles/dynamicRegistration")
    }
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InitializeParams {
    #[serde(default)]
    pub process_id: Option<u32>,
    #[serde(default)]
    pub root_uri: Option<Url>,
    #[serde(default)]
    pub root_path: Option<String>,
    #[serde(default)]
    pub capabilities: ClientCapabilities,
    #[serde(default)]
    pub initialization_options: Option<Value>,
}

impl InitializeParams {
    /// Workspace root as a filesystem path (`rootUri` preferred over `rootPath`).
    #[must_use]
    pub fn root(&self) -> Option<PathBuf> {
        self.root_uri
            .as_ref()
            .and_then(|uri| uri.to_file_path().ok())
            .or_else(|| self.root_path.as_ref().map(PathBuf::from))
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TextDocumentItem {
    pub uri: Url,
    #[serde(default)]
    pub language_id: String,
    pub version: i32,
    pub text: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct TextDocumentIdentifier {
    pub uri: Url,
}

#[derive(Debug, Clone, Deserialize)]
pub struct VersionedTextDocumentIdentifier {
    pub uri: Url,
    pub version: i32,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DidOpenParams {
    pub text_document: TextDocumentItem,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ContentChange {
    pub text: String,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DidChangeParams {
    pub text_document: VersionedTextDocumentIdentifier,
    pub content_changes: Vec<ContentChange>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DidSaveParams {
    pub text_document: TextDocumentIdentifier,
    #[serde(default)]
    pub text: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DidCloseParams {
    pub text_document: TextDocumentIdentifier,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CancelParams {
    pub id: RequestId,
}

#[derive(Debug, Clone, Deserialize)]
pub struct DidChangeConfigurationParams {
    #[serde(default)]
    pub settings: Value,
}

#[derive(Debug, Clone, Deserialize)]
pub struct FileEvent {
    pub uri: Url,
    #[serde(rename = "type")]
    pub kind: u8,
}

#[derive(Debug, Clone, Deserialize)]
pub struct DidChangeWatchedFilesParams {
    pub changes: Vec<FileEvent>,
}

/// Zero-based LSP position; `character` counts UTF-16 code units.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Position {
    pub line: u32,
    pub character: u32,
}

impl Position {
    #[must_use]
    pub const fn new(line: u32, character: u32) -> Self {
        Self { line, character }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Range {
    pub start: Position,
    pub end: Position,
}

impl Range {
    #[must_use]
    pub const fn new(start: Position, end: Position) -> Self {
        Self { start, end }
    }
}

impl From<Span> for Range {
    /// Spans are 1-based, LSP ranges 0-based.
    fn from(span: Span) -> Self {
        let zero = |n: u32| n.saturating_sub(1);
        match span {
            Span::File => Self::new(Position::new(0, 0), Position::new(0, 0)),
            Span::Line(line) => Self::new(
                Position::new(zero(line), 0),
                Position::new(zero(line) + 1, 0),
            ),
            Span::Point(point) => Self::new(
                Position::new(zero(point.line), zero(point.column)),
                Position::new(zero(point.line) + 1, 0),
            ),
            Span::Range { start, end } => Self::new(
                Position::new(zero(start.line), zero(start.column)),
                Position::new(zero(end.line), zero(end.column)),
            ),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TextDocumentPositionParams {
    pub text_document: TextDocumentIdentifier,
    pub position: Position,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TextDocumentParams {
    pub text_document: TextDocumentIdentifier,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ExecuteCommandParams {
    pub command: String,
    #[serde(default)]
    pub arguments: Vec<Value>,
}

/// One diagnostic in LSP wire form.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LspDiagnostic {
    pub range: Range,
    pub severity: u8,
    pub source: String,
    pub message: String,
}

impl From<&Diagnostic> for LspDiagnostic {
    fn from(diag: &Diagnostic) -> Self {
        Self {
            range: Range::from(diag.span()),
            severity: diag.severity().to_lsp(),
            source: format!("ember/{}", diag.source().label()),
            message: diag.message().to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PublishDiagnosticsParams {
    pub uri: Url,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub version: Option<i32>,
    pub diagnostics: Vec<LspDiagnostic>,
}

// ============================================================================
// URI helpers
// ============================================================================

pub fn path_to_file_uri(path: &Path) -> Result<Url, PathToUriError> {
    Url::from_file_path(path).map_err(|()| PathToUriError {
        path: path.to_path_buf(),
    })
}

#[must_use]
pub fn file_uri_to_path(uri: &Url) -> Option<PathBuf> {
    if uri.scheme() != "file" {
        return None;
    }
    uri.to_file_path().ok()
}

//! Closed sets of client requests and notifications the session understands.
//!
//! Method names are resolved once, here, into typed variants; the session
//! matches on the variant exhaustively.

use serde::de::DeserializeOwned;
use serde_json::Value;

use crate::protocol::{
    CancelParams, DidChangeConfigurationParams, DidChangeParams, DidChangeWatchedFilesParams,
    DidCloseParams, DidOpenParams, DidSaveParams, ExecuteCommandParams, InitializeParams,
    RequestError, TextDocumentParams, TextDocumentPositionParams,
};

#[derive(Debug)]
pub(crate) enum ClientRequest {
    Initialize(Box<InitializeParams>),
    Shutdown,
    Hover(TextDocumentPositionParams),
    Completion(TextDocumentPositionParams),
    Definition(TextDocumentPositionParams),
    DocumentSymbol(TextDocumentParams),
    Formatting(TextDocumentParams),
    ExecuteCommand(ExecuteCommandParams),
    Unknown(String),
}

impl ClientRequest {
    /// Resolve `method` and decode its params. Malformed params are a
    /// validation error for the request.
    pub fn parse(method: &str, params: Value) -> Result<Self, RequestError> {
        Ok(match method {
            "initialize" => Self::Initialize(Box::new(decode(method, params)?)),
            "shutdown" => Self::Shutdown,
            "textDocument/hover" => Self::Hover(decode(method, params)?),
            "textDocument/completion" => Self::Completion(decode(method, params)?),
            "textDocument/definition" => Self::Definition(decode(method, params)?),
            "textDocument/documentSymbol" => Self::DocumentSymbol(decode(method, params)?),
            "textDocument/formatting" => Self::Formatting(decode(method, params)?),
            "workspace/executeCommand" => Self::ExecuteCommand(decode(method, params)?),
            other => Self::Unknown(other.to_string()),
        })
    }
}

fn decode<T: DeserializeOwned>(method: &str, params: Value) -> Result<T, RequestError> {
    serde_json::from_value(params)
        .map_err(|e| RequestError::invalid_params(format!("invalid params for {method}: {e}")))
}

#[derive(Debug)]
pub(crate) enum ClientNotification {
    Initialized,
    Exit,
    Cancel(CancelParams),
    DidOpen(DidOpenParams),
    DidChange(DidChangeParams),
    DidSave(DidSaveParams),
    DidClose(DidCloseParams),
    DidChangeConfiguration(DidChangeConfigurationParams),
    DidChangeWatchedFiles(DidChangeWatchedFilesParams),
    Unknown(String),
}

impl ClientNotification {
    pub fn parse(method: &str, params: Value) -> Result<Self, serde_json::Error> {
        Ok(match method {
            "initialized" => Self::Initialized,
            "exit" => Self::Exit,
            "$/cancelRequest" => Self::Cancel(serde_json::from_value(params)?),
            "textDocument/didOpen" => Self::DidOpen(serde_json::from_value(params)?),
            "textDocument/didChange" => Self::DidChange(serde_json::from_value(params)?),
            "textDocument/didSave" => Self::DidSave(serde_json::from_value(params)?),
            "textDocument/didClose" => Self::DidClose(serde_json::from_value(params)?),
            "workspace/didChangeConfiguration" => {
                Self::DidChangeConfiguration(serde_json::from_value(params)?)
            }
            "workspace/didChangeWatchedFiles" => {
                Self::DidChangeWatchedFiles(serde_json::from_value(params)?)
            }
            other => Self::Unknown(other.to_string()),
        })
    }
}

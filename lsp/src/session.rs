//! The session actor: sole owner of all server-side state for one client
//! connection.
//!
//! Client messages and internal events (timers, parse results, build and
//! analysis completions, worker completions) are processed strictly one at a
//! time by [`Session::run`]. Nothing else mutates session state; spawned
//! work receives snapshots and reports back through the internal queue.
//!
//! Lifecycle: `Uninitialized -> AwaitingConfiguration <-> Active ->
//! ShuttingDown`, ending in a [`SessionExit`].

use std::collections::HashMap;
use std::panic::AssertUnwindSafe;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use futures_util::FutureExt;
use globset::{Glob, GlobSet, GlobSetBuilder};
use serde::Serialize;
use serde_json::{Value, json};
use tokio::sync::mpsc;
use tokio::time::Instant;
use url::Url;

use ember_types::{Diagnostic, DiagnosticSource, SETTINGS_SECTION, Settings};

use crate::build::{AnalysisFinished, BuildCoordinator, BuildFinished, BuildJob};
use crate::debounce::{ParseDebouncer, ParseDue};
use crate::diagnostics::DiagnosticsAggregator;
use crate::documents::{DocumentSnapshot, DocumentStore};
use crate::ledger::{RequestLedger, SettledRequest, WorkFut, WorkerEvent, panic_payload_to_string};
use crate::protocol::{
    ClientCapabilities, DidChangeWatchedFilesParams, ErrorCode, ExecuteCommandParams,
    InitializeParams, Message, Notification, Request, RequestError, RequestId, Response,
    ResponseError, file_uri_to_path,
};
use crate::providers::Providers;
use crate::router::{ClientNotification, ClientRequest};
use crate::syntax;
use crate::telemetry;
use crate::toolchain::Toolchain;

const EVENT_CHANNEL_CAPACITY: usize = 256;

const PUBLISH_DIAGNOSTICS: &str = "textDocument/publishDiagnostics";
const SHOW_MESSAGE: &str = "window/showMessage";

const MESSAGE_TYPE_ERROR: u8 = 1;
const MESSAGE_TYPE_WARNING: u8 = 2;

/// Engine tuning that does not come from the client.
#[derive(Debug, Clone)]
pub struct EngineOptions {
    /// Quiet period before a changed document is re-parsed.
    pub parse_debounce: Duration,
    /// How long to wait for client configuration before using defaults.
    pub configuration_fallback: Duration,
    /// Settings applied when the client sends none.
    pub default_settings: Settings,
}

impl Default for EngineOptions {
    fn default() -> Self {
        Self {
            parse_debounce: Duration::from_millis(300),
            configuration_fallback: Duration::from_secs(5),
            default_settings: Settings::default(),
        }
    }
}

/// What survives a controlled restart.
#[derive(Debug, Clone)]
pub struct Handshake {
    params: InitializeParams,
    instance_id: String,
    restarts: u32,
    /// Settings the next session starts from. Clients that only push
    /// configuration will not send them again.
    settings: Option<Settings>,
}

#[derive(Debug)]
pub enum SessionExit {
    /// `exit` received, or the client went away.
    Exit { code: i32 },
    /// Start a fresh session from `handshake`.
    Restart { reason: String, handshake: Handshake },
}

/// Internal events, all funnelled through one queue.
#[derive(Debug)]
pub(crate) enum Inbound {
    ConfigurationFallback { attempt: u64 },
    ParseDue(ParseDue),
    ParseFinished {
        uri: Url,
        generation: u64,
        diagnostics: Vec<Diagnostic>,
    },
    Build(BuildFinished),
    Analysis(AnalysisFinished),
    Worker(WorkerEvent),
}

impl From<ParseDue> for Inbound {
    fn from(due: ParseDue) -> Self {
        Self::ParseDue(due)
    }
}

impl From<BuildFinished> for Inbound {
    fn from(finished: BuildFinished) -> Self {
        Self::Build(finished)
    }
}

impl From<AnalysisFinished> for Inbound {
    fn from(finished: AnalysisFinished) -> Self {
        Self::Analysis(finished)
    }
}

impl From<WorkerEvent> for Inbound {
    fn from(event: WorkerEvent) -> Self {
        Self::Worker(event)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    Uninitialized,
    AwaitingConfiguration,
    Active,
    ShuttingDown,
}

/// Requests we sent to the client, awaiting its response.
#[derive(Debug, Clone, Copy)]
enum ServerRequest {
    Configuration,
    Registration,
    Unregistration,
}

/// Outcome of handling one client request synchronously.
enum Dispatch {
    Reply(Result<Value, RequestError>),
    /// Handed to the request ledger; the worker answers later.
    Delegated,
    /// Answer, then restart the session.
    ReplyAndRestart(Result<Value, RequestError>, String),
}

pub(crate) struct Session {
    phase: Phase,
    handshake: Option<Handshake>,
    capabilities: ClientCapabilities,
    root: Option<PathBuf>,
    settings: Option<Arc<Settings>>,
    project_root: Option<PathBuf>,
    watch_globs: GlobSet,
    documents: DocumentStore,
    diagnostics: DiagnosticsAggregator,
    ledger: RequestLedger<Inbound>,
    builds: BuildCoordinator<Inbound>,
    parser: ParseDebouncer<Inbound>,
    shutdown_requested: bool,
    server_requests: HashMap<RequestId, ServerRequest>,
    next_server_request: u64,
    registrations: Vec<Value>,
    fallback_attempt: u64,
    /// Replay the `initialized` step on start (restored sessions).
    resume: bool,
    /// Settings carried over a restart, applied once `initialized` is replayed.
    carried_settings: Option<Settings>,
    toolchain: Toolchain,
    options: Arc<EngineOptions>,
    events_tx: mpsc::Sender<Inbound>,
    events_rx: mpsc::Receiver<Inbound>,
    outbound: mpsc::Sender<Value>,
}

impl Session {
    pub fn new(toolchain: Toolchain, options: Arc<EngineOptions>, outbound: mpsc::Sender<Value>) -> Self {
        let (events_tx, events_rx) = mpsc::channel(EVENT_CHANNEL_CAPACITY);
        Self {
            phase: Phase::Uninitialized,
            handshake: None,
            capabilities: ClientCapabilities::default(),
            root: None,
            settings: None,
            project_root: None,
            watch_globs: compile_globs(options.default_settings.watch_globs()),
            documents: DocumentStore::new(),
            diagnostics: DiagnosticsAggregator::new(),
            ledger: RequestLedger::new(events_tx.clone()),
            builds: BuildCoordinator::new(
                Arc::clone(&toolchain.builder),
                Arc::clone(&toolchain.analyzer),
                events_tx.clone(),
            ),
            parser: ParseDebouncer::new(events_tx.clone()),
            shutdown_requested: false,
            server_requests: HashMap::new(),
            next_server_request: 0,
            registrations: Vec::new(),
            fallback_attempt: 0,
            resume: false,
            carried_settings: None,
            toolchain,
            options,
            events_tx,
            events_rx,
            outbound,
        }
    }

    /// A fresh session that continues an existing client connection: the
    /// initialize handshake is taken as already done and `initialized` is
    /// replayed when the session starts running.
    pub fn restore(
        mut handshake: Handshake,
        toolchain: Toolchain,
        options: Arc<EngineOptions>,
        outbound: mpsc::Sender<Value>,
    ) -> Self {
        let mut session = Self::new(toolchain, options, outbound);
        session.carried_settings = handshake.settings.take();
        session.capabilities = handshake.params.capabilities.clone();
        session.root = handshake.params.root();
        session.handshake = Some(handshake);
        session.phase = Phase::AwaitingConfiguration;
        session.resume = true;
        session
    }

    /// Process messages until `exit`, client disconnect, or a restart.
    pub async fn run(mut self, client: &mut mpsc::Receiver<Message>) -> SessionExit {
        if std::mem::take(&mut self.resume) {
            tracing::info!(instance = %self.instance_id(), "session restored");
            self.on_initialized().await;
            if let Some(settings) = self.carried_settings.take()
                && let Some(exit) = self.apply_settings(settings).await
            {
                return exit;
            }
        }
        loop {
            let exit = tokio::select! {
                biased;
                message = client.recv() => match message {
                    Some(message) => self.handle_client(message).await,
                    None => {
                        tracing::info!("client disconnected without exit");
                        Some(SessionExit::Exit { code: 1 })
                    }
                },
                Some(event) = self.events_rx.recv() => self.handle_event(event).await,
            };
            if let Some(exit) = exit {
                return exit;
            }
        }
    }

    fn instance_id(&self) -> &str {
        self.handshake.as_ref().map_or("", |h| h.instance_id.as_str())
    }

    fn current_settings(&self) -> Arc<Settings> {
        self.settings
            .clone()
            .unwrap_or_else(|| Arc::new(self.options.default_settings.clone()))
    }

    // ------------------------------------------------------------------
    // Outbound
    // ------------------------------------------------------------------

    async fn send<T: Serialize>(&self, message: &T) {
        let value = match serde_json::to_value(message) {
            Ok(value) => value,
            Err(e) => {
                tracing::error!("failed to serialize outgoing message: {e}");
                return;
            }
        };
        if self.outbound.send(value).await.is_err() {
            tracing::debug!("outbound channel closed, dropping message");
        }
    }

    async fn notify(&self, method: &'static str, params: Value) {
        self.send(&Notification::new(method, Some(params))).await;
    }

    async fn show_message(&self, kind: u8, message: String) {
        self.notify(SHOW_MESSAGE, json!({ "type": kind, "message": message }))
            .await;
    }

    async fn reply(&self, id: RequestId, method: &str, elapsed: Duration, result: Result<Value, RequestError>) {
        let error = result.as_ref().err().map(RequestError::code);
        if let Err(e) = &result {
            tracing::debug!(%id, method, code = e.code().code(), "request failed: {e}");
        }
        self.send(&Response::new(id, result)).await;
        self.send(&telemetry::request_completed(method, elapsed, error))
            .await;
    }

    async fn settle(&self, settled: SettledRequest) {
        self.reply(settled.id, &settled.command, settled.elapsed, settled.result)
            .await;
    }

    async fn send_request(&mut self, method: &'static str, params: Value, kind: ServerRequest) {
        self.next_server_request += 1;
        let restarts = self.handshake.as_ref().map_or(0, |h| h.restarts);
        let id = RequestId::String(format!("ember-{restarts}-{}", self.next_server_request));
        self.server_requests.insert(id.clone(), kind);
        self.send(&Request::new(id, method, Some(params))).await;
    }

    async fn republish(&mut self) {
        for params in self.diagnostics.republish(&self.documents) {
            match serde_json::to_value(&params) {
                Ok(params) => self.notify(PUBLISH_DIAGNOSTICS, params).await,
                Err(e) => tracing::error!(uri = %params.uri, "failed to serialize diagnostics: {e}"),
            }
        }
    }

    // ------------------------------------------------------------------
    // Client messages
    // ------------------------------------------------------------------

    async fn handle_client(&mut self, message: Message) -> Option<SessionExit> {
        match message {
            Message::Request { id, method, params } => self.handle_request(id, method, params).await,
            Message::Notification { method, params } => self.handle_notification(method, params).await,
            Message::Response { id, result, error } => self.handle_response(id, result, error).await,
        }
    }

    async fn handle_request(&mut self, id: RequestId, method: String, params: Value) -> Option<SessionExit> {
        let started = Instant::now();
        if self.shutdown_requested {
            tracing::debug!(%id, method, "dropping request after shutdown");
            return None;
        }
        if self.phase == Phase::Uninitialized && method != "initialize" {
            self.reply(id, &method, started.elapsed(), Err(RequestError::not_initialized()))
                .await;
            return None;
        }
        let request = match ClientRequest::parse(&method, params) {
            Ok(request) => request,
            Err(e) => {
                self.reply(id, &method, started.elapsed(), Err(e)).await;
                return None;
            }
        };

        let dispatched = std::panic::catch_unwind(AssertUnwindSafe(|| {
            self.dispatch_request(id.clone(), &method, started, request)
        }));
        let dispatch = dispatched.unwrap_or_else(|payload| {
            let reason = panic_payload_to_string(&payload);
            tracing::error!(%id, method, "request handler panicked: {reason}");
            Dispatch::Reply(Err(RequestError::internal(format!("request handler crashed: {reason}"))))
        });

        match dispatch {
            Dispatch::Delegated => None,
            Dispatch::Reply(result) => {
                self.reply(id, &method, started.elapsed(), result).await;
                None
            }
            Dispatch::ReplyAndRestart(result, reason) => {
                self.reply(id, &method, started.elapsed(), result).await;
                let carried = self.settings.as_deref().cloned();
                Some(self.restart(reason, carried).await)
            }
        }
    }

    fn dispatch_request(&mut self, id: RequestId, method: &str, started: Instant, request: ClientRequest) -> Dispatch {
        match request {
            ClientRequest::Initialize(params) => Dispatch::Reply(self.initialize(*params)),
            ClientRequest::Shutdown => {
                tracing::info!("shutdown requested");
                self.shutdown_requested = true;
                self.phase = Phase::ShuttingDown;
                Dispatch::Reply(Ok(Value::Null))
            }
            ClientRequest::Hover(p) => {
                let position = p.position;
                self.delegate_provider(id, method, started, &p.text_document.uri, move |providers, doc, settings| {
                    to_json(providers.hover(doc, position, settings)?)
                })
            }
            ClientRequest::Completion(p) => {
                let position = p.position;
                self.delegate_provider(id, method, started, &p.text_document.uri, move |providers, doc, settings| {
                    to_json(providers.completion(doc, position, settings)?)
                })
            }
            ClientRequest::Definition(p) => {
                let position = p.position;
                self.delegate_provider(id, method, started, &p.text_document.uri, move |providers, doc, settings| {
                    to_json(providers.definition(doc, position, settings)?)
                })
            }
            ClientRequest::DocumentSymbol(p) => {
                self.delegate_provider(id, method, started, &p.text_document.uri, |providers, doc, settings| {
                    to_json(providers.document_symbols(doc, settings)?)
                })
            }
            ClientRequest::Formatting(p) => {
                self.delegate_provider(id, method, started, &p.text_document.uri, |providers, doc, settings| {
                    to_json(providers.format(doc, settings)?)
                })
            }
            ClientRequest::ExecuteCommand(p) => self.execute_command(p),
            ClientRequest::Unknown(method) => Dispatch::Reply(Err(RequestError::method_not_found(&method))),
        }
    }

    fn delegate_provider<F>(&mut self, id: RequestId, method: &str, started: Instant, uri: &Url, work: F) -> Dispatch
    where
        F: FnOnce(&dyn Providers, &DocumentSnapshot, &Settings) -> Result<Value, RequestError> + Send + 'static,
    {
        let Some(doc) = self.documents.snapshot(uri) else {
            return Dispatch::Reply(Err(RequestError::invalid_params(format!("document is not open: {uri}"))));
        };
        let providers = Arc::clone(&self.toolchain.providers);
        let settings = self.current_settings();
        let fut: WorkFut = Box::pin(async move { work(providers.as_ref(), &doc, &settings) });
        match self.ledger.delegate(id, method, started, fut) {
            Ok(()) => Dispatch::Delegated,
            Err(e) => Dispatch::Reply(Err(RequestError::new(ErrorCode::InvalidRequest, e.to_string()))),
        }
    }

    fn initialize(&mut self, params: InitializeParams) -> Result<Value, RequestError> {
        if self.phase != Phase::Uninitialized {
            return Err(RequestError::new(
                ErrorCode::InvalidRequest,
                "initialize may only be sent once",
            ));
        }
        let instance_id = uuid::Uuid::new_v4().simple().to_string();
        self.capabilities = params.capabilities.clone();
        self.root = params.root();
        tracing::info!(
            instance = %instance_id,
            root = ?self.root,
            client_pid = ?params.process_id,
            "initialize"
        );
        self.handshake = Some(Handshake {
            params,
            instance_id,
            restarts: 0,
            settings: None,
        });
        self.phase = Phase::AwaitingConfiguration;
        Ok(self.server_capabilities())
    }

    fn server_capabilities(&self) -> Value {
        let instance = self.instance_id();
        json!({
            "capabilities": {
                "textDocumentSync": {
                    "openClose": true,
                    "change": 1,
                    "save": { "includeText": true }
                },
                "hoverProvider": true,
                "completionProvider": {},
                "definitionProvider": true,
                "documentSymbolProvider": true,
                "documentFormattingProvider": true,
                "executeCommandProvider": {
                    "commands": [format!("restart:{instance}"), format!("rebuild:{instance}")]
                }
            },
            "serverInfo": {
                "name": "ember",
                "version": env!("CARGO_PKG_VERSION")
            }
        })
    }

    fn execute_command(&mut self, params: ExecuteCommandParams) -> Dispatch {
        let instance = self.instance_id().to_string();
        match params.command.split_once(':') {
            Some(("rebuild", id)) if id == instance => {
                self.trigger_build("command");
                Dispatch::Reply(Ok(Value::Null))
            }
            Some(("restart", id)) if id == instance => {
                Dispatch::ReplyAndRestart(Ok(Value::Null), "restart requested by client".to_string())
            }
            _ => Dispatch::Reply(Err(RequestError::invalid_params(format!(
                "unknown command: {}",
                params.command
            )))),
        }
    }

    async fn handle_notification(&mut self, method: String, params: Value) -> Option<SessionExit> {
        let notification = match ClientNotification::parse(&method, params) {
            Ok(notification) => notification,
            Err(e) => {
                tracing::warn!(method, "ignoring malformed notification: {e}");
                return None;
            }
        };
        let is_exit = matches!(notification, ClientNotification::Exit);
        if self.shutdown_requested && !is_exit {
            tracing::debug!(method, "dropping notification after shutdown");
            return None;
        }
        if self.phase == Phase::Uninitialized && !is_exit {
            tracing::debug!(method, "dropping notification before initialize");
            return None;
        }

        match AssertUnwindSafe(self.dispatch_notification(notification))
            .catch_unwind()
            .await
        {
            Ok(exit) => exit,
            Err(payload) => {
                let reason = panic_payload_to_string(&payload);
                tracing::error!(method, "notification handler panicked: {reason}");
                None
            }
        }
    }

    async fn dispatch_notification(&mut self, notification: ClientNotification) -> Option<SessionExit> {
        match notification {
            ClientNotification::Exit => {
                let code = if self.shutdown_requested { 0 } else { 1 };
                tracing::info!(code, "exit");
                return Some(SessionExit::Exit { code });
            }
            ClientNotification::Initialized => self.on_initialized().await,
            ClientNotification::Cancel(p) => {
                if let Some(settled) = self.ledger.cancel(&p.id) {
                    tracing::debug!(id = %p.id, "request cancelled");
                    self.settle(settled).await;
                } else {
                    tracing::debug!(id = %p.id, "cancel for a request that is not pending");
                }
            }
            ClientNotification::DidOpen(p) => {
                let uri = p.text_document.uri.clone();
                self.documents.open(p.text_document);
                self.parser.schedule(&uri, Duration::ZERO);
            }
            ClientNotification::DidChange(mut p) => {
                let uri = p.text_document.uri;
                let Some(change) = p.content_changes.pop() else {
                    tracing::warn!(%uri, "didChange without content changes");
                    return None;
                };
                match self.documents.change(&uri, p.text_document.version, change.text) {
                    Ok(()) => {
                        self.parser.schedule(&uri, self.options.parse_debounce);
                    }
                    Err(e) => tracing::warn!("ignoring didChange: {e}"),
                }
            }
            ClientNotification::DidSave(p) => {
                let uri = p.text_document.uri;
                let text_included = p.text.is_some();
                match self.documents.save(&uri, p.text) {
                    Ok(()) => {
                        if text_included {
                            self.parser.schedule(&uri, Duration::ZERO);
                        }
                        if self.phase == Phase::Active && self.current_settings().auto_build() {
                            self.trigger_build("save");
                        }
                    }
                    Err(e) => tracing::warn!("ignoring didSave: {e}"),
                }
            }
            ClientNotification::DidClose(p) => {
                let uri = p.text_document.uri;
                match self.documents.close(&uri) {
                    // Parsing a closed document only purges its diagnostics.
                    Ok(_) => {
                        self.parser.schedule(&uri, Duration::ZERO);
                    }
                    Err(e) => tracing::warn!("ignoring didClose: {e}"),
                }
            }
            ClientNotification::DidChangeConfiguration(p) => {
                return self.on_configuration_push(p.settings).await;
            }
            ClientNotification::DidChangeWatchedFiles(p) => self.on_watched_files(&p),
            ClientNotification::Unknown(method) => {
                tracing::trace!(method, "ignoring unhandled notification");
            }
        }
        None
    }

    async fn handle_response(
        &mut self,
        id: RequestId,
        result: Option<Value>,
        error: Option<ResponseError>,
    ) -> Option<SessionExit> {
        let Some(kind) = self.server_requests.remove(&id) else {
            tracing::debug!(%id, "response to unknown server request");
            return None;
        };
        if let Some(error) = error {
            tracing::warn!(%id, ?kind, code = error.code, "client rejected request: {}", error.message);
            return None;
        }
        match kind {
            ServerRequest::Configuration => {
                // One item per requested section.
                let section = match result {
                    Some(Value::Array(mut items)) if !items.is_empty() => items.swap_remove(0),
                    _ => Value::Null,
                };
                self.apply_settings_payload(&section).await
            }
            ServerRequest::Registration | ServerRequest::Unregistration => None,
        }
    }

    // ------------------------------------------------------------------
    // Configuration
    // ------------------------------------------------------------------

    async fn on_initialized(&mut self) {
        if self.capabilities.supports_configuration_pull() {
            self.send_request(
                "workspace/configuration",
                json!({ "items": [{ "section": SETTINGS_SECTION }] }),
                ServerRequest::Configuration,
            )
            .await;
        }
        self.arm_configuration_fallback();
        self.register_capabilities().await;
    }

    fn arm_configuration_fallback(&mut self) {
        self.fallback_attempt += 1;
        let attempt = self.fallback_attempt;
        let delay = self.options.configuration_fallback;
        let events = self.events_tx.clone();
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            let _ = events.send(Inbound::ConfigurationFallback { attempt }).await;
        });
    }

    async fn register_capabilities(&mut self) {
        let instance = self.instance_id().to_string();
        let mut registrations = Vec::new();
        if self.capabilities.supports_dynamic_configuration() {
            registrations.push(json!({
                "id": format!("workspace/didChangeConfiguration-{instance}"),
                "method": "workspace/didChangeConfiguration",
            }));
        }
        if self.capabilities.supports_dynamic_watchers() {
            let watchers: Vec<Value> = self
                .current_settings()
                .watch_globs()
                .iter()
                .map(|glob| json!({ "globPattern": glob }))
                .collect();
            registrations.push(json!({
                "id": format!("workspace/didChangeWatchedFiles-{instance}"),
                "method": "workspace/didChangeWatchedFiles",
                "registerOptions": { "watchers": watchers },
            }));
        }
        if registrations.is_empty() {
            return;
        }
        self.registrations = registrations
            .iter()
            .map(|r| json!({ "id": r["id"], "method": r["method"] }))
            .collect();
        self.send_request(
            "client/registerCapability",
            json!({ "registrations": registrations }),
            ServerRequest::Registration,
        )
        .await;
    }

    async fn on_configuration_push(&mut self, payload: Value) -> Option<SessionExit> {
        let has_section = payload.get(SETTINGS_SECTION).is_some_and(|v| !v.is_null());
        if !has_section && self.capabilities.supports_configuration_pull() {
            // A bare change notification: ask for the current values.
            self.send_request(
                "workspace/configuration",
                json!({ "items": [{ "section": SETTINGS_SECTION }] }),
                ServerRequest::Configuration,
            )
            .await;
            return None;
        }
        self.apply_settings_payload(&payload).await
    }

    async fn apply_settings_payload(&mut self, payload: &Value) -> Option<SessionExit> {
        match Settings::from_payload(payload) {
            Ok(settings) => self.apply_settings(settings).await,
            Err(e) => {
                tracing::warn!("ignoring invalid settings: {e}");
                None
            }
        }
    }

    async fn apply_settings(&mut self, incoming: Settings) -> Option<SessionExit> {
        if let Some(current) = &self.settings {
            if let Some(conflict) = current.conflicts_with(&incoming) {
                return Some(self.restart(conflict.to_string(), Some(incoming)).await);
            }
            if **current == incoming {
                tracing::debug!("settings unchanged");
                return None;
            }
        }
        tracing::info!(?incoming, "settings applied");
        self.watch_globs = compile_globs(incoming.watch_globs());
        let project_dir = incoming.project_dir().map(str::to_string);
        self.settings = Some(Arc::new(incoming));
        if self.phase == Phase::AwaitingConfiguration {
            self.phase = Phase::Active;
        }

        self.project_root = None;
        let Some(root) = &self.root else {
            self.show_message(
                MESSAGE_TYPE_WARNING,
                "ember: no workspace root, builds are disabled".to_string(),
            )
            .await;
            return None;
        };
        let project_root = match &project_dir {
            Some(dir) => root.join(dir),
            None => root.clone(),
        };
        if let Err(e) = std::fs::read_dir(&project_root) {
            tracing::error!(root = %project_root.display(), "project directory unreadable: {e}");
            self.show_message(
                MESSAGE_TYPE_ERROR,
                format!("ember: project directory {} is not readable: {e}", project_root.display()),
            )
            .await;
            return None;
        }
        self.project_root = Some(project_root);
        self.trigger_build("settings");
        None
    }

    async fn restart(&mut self, reason: String, settings: Option<Settings>) -> SessionExit {
        tracing::warn!(%reason, "restarting session");
        self.show_message(MESSAGE_TYPE_WARNING, format!("ember is restarting: {reason}"))
            .await;
        let abandoned = self
            .ledger
            .abandon_all(&RequestError::new(ErrorCode::ContentModified, "server is restarting"));
        for settled in abandoned {
            self.settle(settled).await;
        }
        if !self.registrations.is_empty() {
            let registrations = std::mem::take(&mut self.registrations);
            // The misspelt key is the protocol's own.
            self.send_request(
                "client/unregisterCapability",
                json!({ "unregisterations": registrations }),
                ServerRequest::Unregistration,
            )
            .await;
        }
        match self.handshake.clone() {
            Some(mut handshake) => {
                handshake.restarts += 1;
                handshake.settings = settings;
                SessionExit::Restart { reason, handshake }
            }
            None => {
                tracing::error!("restart requested before initialize");
                SessionExit::Exit { code: 1 }
            }
        }
    }

    // ------------------------------------------------------------------
    // Builds and file watching
    // ------------------------------------------------------------------

    fn trigger_build(&mut self, reason: &str) {
        let (Some(project_root), Some(settings)) = (&self.project_root, &self.settings) else {
            tracing::debug!(reason, "no project configured, build not started");
            return;
        };
        let job = BuildJob {
            project_root: project_root.clone(),
            settings: Arc::clone(settings),
        };
        let trigger = self.builds.trigger(job);
        tracing::debug!(reason, ?trigger, "build triggered");
    }

    fn on_watched_files(&mut self, params: &DidChangeWatchedFilesParams) {
        if self.phase != Phase::Active || !self.current_settings().auto_build() {
            return;
        }
        let relevant = params.changes.iter().any(|change| {
            let Some(path) = file_uri_to_path(&change.uri) else {
                return false;
            };
            self.is_watched(&path) && !self.documents.is_open_and_dirty(&change.uri)
        });
        if relevant {
            self.trigger_build("watched files");
        }
    }

    fn is_watched(&self, path: &Path) -> bool {
        let relative = self
            .project_root
            .as_deref()
            .and_then(|root| path.strip_prefix(root).ok())
            .unwrap_or(path);
        self.watch_globs.is_match(relative)
    }

    // ------------------------------------------------------------------
    // Internal events
    // ------------------------------------------------------------------

    async fn handle_event(&mut self, event: Inbound) -> Option<SessionExit> {
        match event {
            Inbound::ConfigurationFallback { attempt } => {
                if attempt == self.fallback_attempt
                    && self.phase == Phase::AwaitingConfiguration
                    && self.settings.is_none()
                {
                    tracing::info!("no client configuration received, using defaults");
                    let defaults = self.options.default_settings.clone();
                    return self.apply_settings(defaults).await;
                }
            }
            Inbound::ParseDue(due) => self.start_parse(due).await,
            Inbound::ParseFinished {
                uri,
                generation,
                diagnostics,
            } => {
                if !self.parser.is_current(&uri, generation) {
                    tracing::trace!(%uri, generation, "discarding superseded parse");
                    return None;
                }
                self.diagnostics
                    .replace_document(DiagnosticSource::Parser, &uri, diagnostics);
                self.republish().await;
            }
            Inbound::Build(finished) => {
                if let Some(diagnostics) = self.builds.complete(finished) {
                    self.diagnostics
                        .replace_source(DiagnosticSource::Build, diagnostics);
                    self.republish().await;
                }
            }
            Inbound::Analysis(finished) => {
                if let Some(diagnostics) = self.builds.complete_analysis(finished) {
                    self.diagnostics
                        .replace_source(DiagnosticSource::Analysis, diagnostics);
                    self.republish().await;
                }
            }
            Inbound::Worker(event) => {
                if let Some(settled) = self.ledger.complete(event) {
                    self.settle(settled).await;
                }
            }
        }
        None
    }

    async fn start_parse(&mut self, due: ParseDue) {
        if !self.parser.fire(&due) {
            return;
        }
        let Some(doc) = self.documents.snapshot(&due.uri) else {
            // Closed: nothing to parse, clear what the parser reported.
            self.parser.forget(&due.uri);
            self.diagnostics
                .replace_document(DiagnosticSource::Parser, &due.uri, Vec::new());
            self.republish().await;
            return;
        };
        let checker = Arc::clone(&self.toolchain.syntax);
        let path = file_uri_to_path(&doc.uri).unwrap_or_else(|| PathBuf::from(doc.uri.as_str()));
        let events = self.events_tx.clone();
        let generation = due.generation;
        let uri = doc.uri.clone();
        tokio::spawn(async move {
            let check = tokio::task::spawn_blocking(move || {
                syntax::check_isolated(checker.as_ref(), &doc.text, &path)
            });
            let diagnostics = match check.await {
                Ok(diagnostics) => diagnostics,
                Err(e) => {
                    tracing::warn!(%uri, "syntax check did not finish: {e}");
                    return;
                }
            };
            let _ = events
                .send(Inbound::ParseFinished {
                    uri,
                    generation,
                    diagnostics,
                })
                .await;
        });
    }
}

fn to_json<T: Serialize>(value: T) -> Result<Value, RequestError> {
    serde_json::to_value(value).map_err(|e| RequestError::internal(format!("failed to serialize result: {e}")))
}

fn compile_globs(patterns: &[String]) -> GlobSet {
    let mut builder = GlobSetBuilder::new();
    for pattern in patterns {
        match Glob::new(pattern) {
            Ok(glob) => {
                builder.add(glob);
            }
            Err(e) => tracing::warn!(pattern, "ignoring invalid watch glob: {e}"),
        }
    }
    builder.build().unwrap_or_else(|e| {
        tracing::warn!("failed to build watch globs: {e}");
        GlobSet::empty()
    })
}

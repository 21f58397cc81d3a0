//! Scripted in-memory session for unit tests

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use serde_json::{json, Value};
use tokio::sync::broadcast;

use crate::common::{lock, Error, Result};
use crate::dap::EventMessage;

use super::Session;

type Handler = Arc<dyn Fn(&Value) -> std::result::Result<Value, String> + Send + Sync>;
type Delay = Arc<dyn Fn(&Value) -> Duration + Send + Sync>;

/// Session whose responses are scripted per command
///
/// Every request and every execute trigger is appended to one ordered call
/// log. Commands with no handler answer with an empty body.
pub struct StubSession {
    started: AtomicBool,
    handlers: Mutex<HashMap<String, Handler>>,
    delays: Mutex<HashMap<String, Delay>>,
    calls: Mutex<Vec<(String, Value)>>,
    events: broadcast::Sender<EventMessage>,
    dispose_count: AtomicUsize,
}

impl StubSession {
    pub fn new() -> Self {
        Self {
            started: AtomicBool::new(true),
            handlers: Mutex::new(HashMap::new()),
            delays: Mutex::new(HashMap::new()),
            calls: Mutex::new(Vec::new()),
            events: broadcast::channel(64).0,
            dispose_count: AtomicUsize::new(0),
        }
    }

    pub fn not_started(self) -> Self {
        self.started.store(false, Ordering::SeqCst);
        self
    }

    pub fn on(
        self,
        command: &str,
        handler: impl Fn(&Value) -> std::result::Result<Value, String> + Send + Sync + 'static,
    ) -> Self {
        lock(&self.handlers).insert(command.to_string(), Arc::new(handler));
        self
    }

    pub fn respond(self, command: &str, body: Value) -> Self {
        self.on(command, move |_| Ok(body.clone()))
    }

    pub fn fail(self, command: &str, message: &str) -> Self {
        let message = message.to_string();
        self.on(command, move |_| Err(message.clone()))
    }

    pub fn delay(
        self,
        command: &str,
        delay: impl Fn(&Value) -> Duration + Send + Sync + 'static,
    ) -> Self {
        lock(&self.delays).insert(command.to_string(), Arc::new(delay));
        self
    }

    /// A stub answering the refresh requests with `frames` stack frames,
    /// two scopes per frame and one variable per first scope
    pub fn with_stack(self, frames: usize) -> Self {
        let stack: Vec<Value> = (0..frames)
            .map(|i| json!({ "id": i + 1, "name": format!("f{}", i), "line": 10 * (i + 1), "column": 1 }))
            .collect();
        self.respond("stackTrace", json!({ "stackFrames": stack }))
            .on("scopes", |args| {
                let frame = args["frameId"].as_i64().unwrap_or(0);
                Ok(json!({ "scopes": [
                    { "name": "Locals", "variablesReference": frame * 100 },
                    { "name": "Globals", "variablesReference": frame * 100 + 1 }
                ]}))
            })
            .on("variables", |args| {
                let reference = args["variablesReference"].as_i64().unwrap_or(0);
                Ok(json!({ "variables": [
                    { "name": format!("v{}", reference), "value": "1", "variablesReference": 0 }
                ]}))
            })
    }

    pub fn emit(&self, event: &str, body: Value) {
        let _ = self.events.send(EventMessage::new(event, Some(body)));
    }

    pub fn calls(&self) -> Vec<(String, Value)> {
        lock(&self.calls).clone()
    }

    pub fn commands(&self) -> Vec<String> {
        self.calls().into_iter().map(|(command, _)| command).collect()
    }

    pub fn count(&self, command: &str) -> usize {
        self.commands().iter().filter(|c| *c == command).count()
    }

    pub fn dispose_count(&self) -> usize {
        self.dispose_count.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Session for StubSession {
    fn is_started(&self) -> bool {
        self.started.load(Ordering::SeqCst)
    }

    async fn start(&self) -> Result<()> {
        self.started.store(true, Ordering::SeqCst);
        Ok(())
    }

    async fn send_request(&self, command: &str, arguments: Value) -> Result<Value> {
        lock(&self.calls).push((command.to_string(), arguments.clone()));

        let delay = lock(&self.delays).get(command).cloned();
        if let Some(delay) = delay {
            tokio::time::sleep(delay(&arguments)).await;
        }

        let handler = lock(&self.handlers).get(command).cloned();
        match handler {
            Some(handler) => {
                handler(&arguments).map_err(|message| Error::dap_request_failed(command, &message))
            }
            None => Ok(json!({})),
        }
    }

    fn subscribe(&self) -> broadcast::Receiver<EventMessage> {
        self.events.subscribe()
    }

    fn request_execute(&self, code: &str) {
        lock(&self.calls).push(("execute".to_string(), json!({ "code": code })));
    }

    fn dispose(&self) {
        self.dispose_count.fetch_add(1, Ordering::SeqCst);
    }
}

//! DAP client for communicating with debug adapters
//!
//! Requests can be issued concurrently from any task: a background reader
//! routes each response to the request that is waiting on it and fans events
//! out on a broadcast channel.

use std::collections::HashMap;
use std::path::Path;
use std::process::Stdio;
use std::sync::atomic::{AtomicBool, AtomicI64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use serde::de::DeserializeOwned;
use serde_json::Value;
use tokio::io::{AsyncBufRead, AsyncWrite, BufReader, BufWriter};
use tokio::process::{Child, Command};
use tokio::sync::{broadcast, oneshot};
use tokio::task::JoinHandle;

use crate::common::{lock, Error, Result};

use super::codec;
use super::types::*;

/// Number of events buffered per subscriber before it starts lagging
const EVENT_CAPACITY: usize = 256;

type PendingMap = Arc<Mutex<HashMap<i64, oneshot::Sender<ResponseMessage>>>>;
type Writer = Box<dyn AsyncWrite + Send + Unpin>;

/// DAP client for communicating with a debug adapter
pub struct DapClient {
    /// Adapter subprocess, absent when connected over caller-provided streams
    adapter: Mutex<Option<Child>>,
    /// Buffered writer for adapter input
    writer: tokio::sync::Mutex<Writer>,
    /// Sequence number for requests
    seq: AtomicI64,
    /// Requests waiting for responses
    pending: PendingMap,
    /// Set once the reader has stopped
    closed: Arc<AtomicBool>,
    /// Event fan-out
    events: broadcast::Sender<EventMessage>,
    /// Background reader
    reader_task: JoinHandle<()>,
    /// Per-request timeout
    request_timeout: Duration,
}

impl DapClient {
    /// Spawn a new DAP adapter and create a client
    pub async fn spawn(adapter_path: &Path, args: &[String], request_timeout: Duration) -> Result<Self> {
        let mut cmd = Command::new(adapter_path);
        cmd.args(args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::inherit());

        let mut adapter = cmd.spawn().map_err(|e| {
            Error::AdapterStartFailed(format!(
                "Failed to start {}: {}",
                adapter_path.display(),
                e
            ))
        })?;

        let stdin = adapter
            .stdin
            .take()
            .ok_or_else(|| Error::AdapterStartFailed("Failed to get adapter stdin".to_string()))?;
        let stdout = adapter.stdout.take().ok_or_else(|| {
            Error::AdapterStartFailed("Failed to get adapter stdout".to_string())
        })?;

        tracing::info!(
            adapter = %adapter_path.display(),
            pid = adapter.id(),
            "Spawned debug adapter"
        );

        let client = Self::connect(BufReader::new(stdout), stdin, request_timeout);
        *lock(&client.adapter) = Some(adapter);
        Ok(client)
    }

    /// Create a client over an already-open pair of streams
    pub fn connect<R, W>(reader: R, writer: W, request_timeout: Duration) -> Self
    where
        R: AsyncBufRead + Send + Unpin + 'static,
        W: AsyncWrite + Send + Unpin + 'static,
    {
        let pending: PendingMap = Arc::new(Mutex::new(HashMap::new()));
        let closed = Arc::new(AtomicBool::new(false));
        let (events, _) = broadcast::channel(EVENT_CAPACITY);

        let reader_task = tokio::spawn(read_loop(
            reader,
            pending.clone(),
            closed.clone(),
            events.clone(),
        ));

        Self {
            adapter: Mutex::new(None),
            writer: tokio::sync::Mutex::new(Box::new(BufWriter::new(writer))),
            seq: AtomicI64::new(1),
            pending,
            closed,
            events,
            reader_task,
            request_timeout,
        }
    }

    /// Subscribe to adapter events
    pub fn subscribe(&self) -> broadcast::Receiver<EventMessage> {
        self.events.subscribe()
    }

    /// Write a request and return its sequence number
    ///
    /// A `reply` sender is registered under the new sequence number before
    /// the request is written, so a fast response can't slip past it.
    async fn write_request(
        &self,
        command: &str,
        arguments: Option<Value>,
        reply: Option<oneshot::Sender<ResponseMessage>>,
    ) -> Result<i64> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(Error::AdapterCrashed);
        }

        let mut writer = self.writer.lock().await;
        let seq = self.seq.fetch_add(1, Ordering::SeqCst);
        if let Some(reply) = reply {
            lock(&self.pending).insert(seq, reply);
            // The reader may have closed between the check above and now
            if self.closed.load(Ordering::SeqCst) {
                lock(&self.pending).remove(&seq);
                return Err(Error::AdapterCrashed);
            }
        }

        let written = match serde_json::to_string(&RequestMessage::new(seq, command, arguments)) {
            Ok(json) => {
                tracing::debug!("DAP >>> {}", json);
                codec::write_message(&mut *writer, &json).await
            }
            Err(e) => Err(e.into()),
        };
        if let Err(e) = written {
            lock(&self.pending).remove(&seq);
            return Err(e);
        }
        Ok(seq)
    }

    /// Send a request and wait for the response body
    pub async fn request_value(&self, command: &str, arguments: Option<Value>) -> Result<Value> {
        let (tx, rx) = oneshot::channel();
        let seq = self.write_request(command, arguments, Some(tx)).await?;

        let response = match tokio::time::timeout(self.request_timeout, rx).await {
            Ok(Ok(response)) => response,
            Ok(Err(_)) => return Err(Error::AdapterCrashed),
            Err(_) => {
                lock(&self.pending).remove(&seq);
                return Err(Error::RequestTimeout {
                    command: command.to_string(),
                    secs: self.request_timeout.as_secs(),
                });
            }
        };

        if response.success {
            Ok(response.body.unwrap_or(Value::Null))
        } else {
            Err(Error::dap_request_failed(
                command,
                &response.message.unwrap_or_else(|| "Unknown error".to_string()),
            ))
        }
    }

    /// Send a request and deserialize the response body
    pub async fn request<T: DeserializeOwned>(
        &self,
        command: &str,
        arguments: Option<Value>,
    ) -> Result<T> {
        let body = self.request_value(command, arguments).await?;
        serde_json::from_value(body).map_err(|e| {
            Error::DapProtocol(format!("Failed to parse {} response: {}", command, e))
        })
    }

    /// Initialize the debug adapter
    pub async fn initialize(&self, adapter_id: &str) -> Result<Capabilities> {
        let args = InitializeArguments {
            adapter_id: adapter_id.to_string(),
            ..Default::default()
        };
        let body = self
            .request_value("initialize", Some(serde_json::to_value(&args)?))
            .await?;
        // Some adapters answer initialize with no body at all
        if body.is_null() {
            return Ok(Capabilities::default());
        }
        serde_json::from_value(body)
            .map_err(|e| Error::DapProtocol(format!("Failed to parse initialize response: {}", e)))
    }

    /// Attach to the running kernel
    pub async fn attach(&self, args: AttachArguments) -> Result<()> {
        self.request_value("attach", Some(serde_json::to_value(&args)?))
            .await?;
        Ok(())
    }

    /// List threads known to the adapter
    pub async fn threads(&self) -> Result<Vec<Thread>> {
        let response: ThreadsResponseBody = self.request("threads", None).await?;
        Ok(response.threads)
    }

    /// Disconnect from the debug adapter without waiting for the response
    pub async fn disconnect(&self, terminate_debuggee: bool) -> Result<()> {
        let args = DisconnectArguments {
            restart: false,
            terminate_debuggee: Some(terminate_debuggee),
        };
        self.write_request("disconnect", Some(serde_json::to_value(&args)?), None)
            .await?;
        Ok(())
    }

    /// Kill the adapter process, if we own one
    pub fn kill(&self) {
        if let Some(adapter) = lock(&self.adapter).as_mut() {
            let _ = adapter.start_kill();
        }
    }

    /// Check if the adapter is still producing output
    pub fn is_running(&self) -> bool {
        !self.closed.load(Ordering::SeqCst)
    }
}

impl Drop for DapClient {
    fn drop(&mut self) {
        self.reader_task.abort();
        self.kill();
    }
}

/// Read adapter output until the stream ends, dispatching responses and events
async fn read_loop<R: AsyncBufRead + Unpin>(
    mut reader: R,
    pending: PendingMap,
    closed: Arc<AtomicBool>,
    events: broadcast::Sender<EventMessage>,
) {
    loop {
        let json = match codec::read_message(&mut reader).await {
            Ok(json) => json,
            Err(e) => {
                tracing::debug!(error = %e, "DAP reader stopped");
                break;
            }
        };
        tracing::debug!("DAP <<< {}", json);

        let msg: Value = match serde_json::from_str(&json) {
            Ok(msg) => msg,
            Err(e) => {
                tracing::warn!(error = %e, "Discarding malformed DAP message");
                continue;
            }
        };

        match msg.get("type").and_then(Value::as_str) {
            Some("response") => match serde_json::from_value::<ResponseMessage>(msg) {
                Ok(response) => {
                    let waiter = lock(&pending).remove(&response.request_seq);
                    match waiter {
                        Some(tx) => {
                            let _ = tx.send(response);
                        }
                        None => tracing::debug!(
                            request_seq = response.request_seq,
                            command = %response.command,
                            "Response with no waiting request"
                        ),
                    }
                }
                Err(e) => tracing::warn!(error = %e, "Invalid DAP response"),
            },
            Some("event") => match serde_json::from_value::<EventMessage>(msg) {
                // No subscribers is fine
                Ok(event) => {
                    let _ = events.send(event);
                }
                Err(e) => tracing::warn!(error = %e, "Invalid DAP event"),
            },
            other => tracing::warn!("Unknown message type: {:?}", other),
        }
    }

    closed.store(true, Ordering::SeqCst);
    // Dropping the senders fails every outstanding request
    lock(&pending).clear();
}

//! Session backed by a debug adapter process

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;
use tokio::sync::broadcast;

use crate::common::{config::Config, Error, Result};
use crate::dap::{AttachArguments, Capabilities, DapClient, EventMessage, ExecuteArguments};

use super::Session;

/// Grace period between disconnect and killing the adapter
const DISCONNECT_GRACE: Duration = Duration::from_millis(100);

/// Kernel debug session over a spawned adapter
pub struct AdapterSession {
    client: Arc<DapClient>,
    adapter_name: String,
    started: AtomicBool,
    disposed: AtomicBool,
}

impl AdapterSession {
    /// Spawn the named adapter (or the configured default)
    #[tracing::instrument(skip(config))]
    pub async fn spawn(config: &Config, adapter_name: Option<&str>) -> Result<Self> {
        let adapter_name = adapter_name.unwrap_or(&config.defaults.adapter).to_string();
        let adapter_config = config
            .get_adapter(&adapter_name)
            .ok_or_else(|| Error::adapter_not_found(&adapter_name, &["config", "PATH"]))?;

        tracing::info!(
            adapter = %adapter_name,
            adapter_path = %adapter_config.path.display(),
            adapter_args = ?adapter_config.args,
            "Spawning debug adapter"
        );

        let client = DapClient::spawn(
            &adapter_config.path,
            &adapter_config.args,
            config.timeouts.dap_request(),
        )
        .await?;
        Ok(Self::new(client, adapter_name))
    }

    /// Wrap an existing client
    pub fn new(client: DapClient, adapter_name: impl Into<String>) -> Self {
        Self {
            client: Arc::new(client),
            adapter_name: adapter_name.into(),
            started: AtomicBool::new(false),
            disposed: AtomicBool::new(false),
        }
    }

    pub fn adapter_name(&self) -> &str {
        &self.adapter_name
    }

    pub fn client(&self) -> &DapClient {
        &self.client
    }

    /// Handshake returning the adapter's capabilities
    pub async fn start_with_capabilities(&self) -> Result<Capabilities> {
        if self.disposed.load(Ordering::SeqCst) {
            return Err(Error::SessionDisposed);
        }
        let capabilities = self.client.initialize(&self.adapter_name).await?;
        tracing::debug!(?capabilities, "DAP adapter initialized");

        self.client
            .attach(AttachArguments {
                just_my_code: Some(false),
            })
            .await?;
        self.started.store(true, Ordering::SeqCst);
        tracing::info!(adapter = %self.adapter_name, "Debug session started");
        Ok(capabilities)
    }
}

#[async_trait]
impl Session for AdapterSession {
    fn is_started(&self) -> bool {
        self.started.load(Ordering::SeqCst) && !self.disposed.load(Ordering::SeqCst)
    }

    async fn start(&self) -> Result<()> {
        self.start_with_capabilities().await.map(|_| ())
    }

    async fn send_request(&self, command: &str, arguments: Value) -> Result<Value> {
        if self.disposed.load(Ordering::SeqCst) {
            return Err(Error::SessionDisposed);
        }
        self.client.request_value(command, Some(arguments)).await
    }

    fn subscribe(&self) -> broadcast::Receiver<EventMessage> {
        self.client.subscribe()
    }

    fn request_execute(&self, code: &str) {
        let client = self.client.clone();
        let args = ExecuteArguments {
            code: code.to_string(),
        };
        // The response only arrives once the cell finishes, which may be
        // long after the user has stepped through it
        tokio::spawn(async move {
            if let Err(e) = client.request_value("execute", serde_json::to_value(&args).ok()).await {
                match e {
                    Error::RequestTimeout { .. } => {
                        tracing::debug!("Cell still running after request timeout")
                    }
                    e => tracing::warn!(error = %e, "Execute request failed"),
                }
            }
        });
    }

    fn dispose(&self) {
        if self.disposed.swap(true, Ordering::SeqCst) {
            return;
        }
        tracing::info!(adapter = %self.adapter_name, "Disposing debug session");

        let client = self.client.clone();
        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                handle.spawn(async move {
                    let _ = client.disconnect(true).await;
                    tokio::time::sleep(DISCONNECT_GRACE).await;
                    client.kill();
                });
            }
            Err(_) => client.kill(),
        }
    }
}

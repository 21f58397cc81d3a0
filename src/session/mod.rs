//! Debug session handles
//!
//! A session is the debug channel of one kernel: it answers DAP requests,
//! emits DAP events, and can be told to execute code. The debug service only
//! talks to it through the [`Session`] trait.

pub mod adapter;
#[cfg(test)]
pub(crate) mod stub;

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use tokio::sync::broadcast;

use crate::common::{Error, Result};
use crate::dap::EventMessage;

pub use adapter::AdapterSession;

/// Debug channel to a kernel
#[async_trait]
pub trait Session: Send + Sync {
    /// Whether the debug handshake has completed
    fn is_started(&self) -> bool;

    /// Perform the debug handshake
    async fn start(&self) -> Result<()>;

    /// Send a request and return the response body
    async fn send_request(&self, command: &str, arguments: Value) -> Result<Value>;

    /// Listen to every event the session emits from now on
    fn subscribe(&self) -> broadcast::Receiver<EventMessage>;

    /// Ask the kernel to run `code`. Does not wait for execution.
    fn request_execute(&self, code: &str);

    /// Release the session's resources
    fn dispose(&self);
}

/// Send a typed request and decode the typed response body
pub async fn request<A, T>(session: &dyn Session, command: &str, arguments: &A) -> Result<T>
where
    A: Serialize + ?Sized,
    T: DeserializeOwned,
{
    let body = session
        .send_request(command, serde_json::to_value(arguments)?)
        .await?;
    serde_json::from_value(body)
        .map_err(|e| Error::DapProtocol(format!("Failed to parse {} response: {}", command, e)))
}

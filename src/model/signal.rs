//! Change notifications for models and the debug service
//!
//! A thin wrapper over a tokio broadcast channel that can drop every
//! subscriber at once.

use std::sync::Mutex;

use tokio::sync::broadcast;

use crate::common::lock;

/// Per-subscriber buffer before a slow listener starts lagging
const SIGNAL_CAPACITY: usize = 64;

/// A multi-subscriber notification
pub struct Signal<T: Clone> {
    sender: Mutex<Option<broadcast::Sender<T>>>,
}

impl<T: Clone> Default for Signal<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: Clone> Signal<T> {
    pub fn new() -> Self {
        Self {
            sender: Mutex::new(None),
        }
    }

    /// Start listening. Values emitted before this call are not seen.
    pub fn subscribe(&self) -> broadcast::Receiver<T> {
        lock(&self.sender)
            .get_or_insert_with(|| broadcast::channel(SIGNAL_CAPACITY).0)
            .subscribe()
    }

    /// Notify every current subscriber, returning how many were reached
    pub fn emit(&self, value: T) -> usize {
        match lock(&self.sender).as_ref() {
            Some(tx) => tx.send(value).unwrap_or(0),
            None => 0,
        }
    }

    /// Disconnect every subscriber; their receivers report `Closed`
    pub fn clear(&self) {
        lock(&self.sender).take();
    }
}

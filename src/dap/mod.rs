//! Debug Adapter Protocol (DAP) implementation
//!
//! Client side of DAP for talking to a kernel's debug adapter.

pub mod client;
pub mod codec;
pub mod types;

pub use client::DapClient;
pub use types::*;

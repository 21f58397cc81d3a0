//! Cell debugger - a kernel debug session driver
//!
//! This library runs a notebook-style cell under a debug adapter speaking
//! the Debug Adapter Protocol (DAP), tracks stopped threads, and publishes
//! call stacks and variables to UI-facing models.

pub mod cli;
pub mod commands;
pub mod common;
pub mod dap;
pub mod model;
pub mod service;
pub mod session;

// Re-export commonly used types for tests
pub use common::{Error, Result};
pub use model::DebuggerModel;
pub use service::{ControlOutcome, DebugService};
pub use session::{AdapterSession, Session};

//! UI-facing models
//!
//! Passive data holders the debug service reads from and writes to. Each
//! write is visible on its own; several writes made by one refresh are not
//! grouped.

pub mod breakpoints;
pub mod callstack;
pub mod signal;
pub mod variables;

use std::sync::Mutex;

use crate::common::lock;

pub use breakpoints::{Breakpoint, BreakpointsModel};
pub use callstack::CallstackModel;
pub use signal::Signal;
pub use variables::{ScopeSnapshot, VariablesModel};

/// Everything a debugger front end displays for one cell
#[derive(Default)]
pub struct DebuggerModel {
    pub breakpoints: BreakpointsModel,
    pub callstack: CallstackModel,
    pub variables: VariablesModel,
    /// Source text of the cell being debugged
    code: Mutex<String>,
    current_line_changed: Signal<u32>,
    lines_cleared: Signal<()>,
}

impl DebuggerModel {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn code(&self) -> String {
        lock(&self.code).clone()
    }

    pub fn set_code(&self, code: impl Into<String>) {
        *lock(&self.code) = code.into();
    }

    /// Fired with the line the top frame is stopped on
    pub fn current_line_changed(&self) -> &Signal<u32> {
        &self.current_line_changed
    }

    /// Fired when execution resumes and no line should be highlighted
    pub fn lines_cleared(&self) -> &Signal<()> {
        &self.lines_cleared
    }
}

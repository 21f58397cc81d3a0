//! Breakpoints set by the user on the current cell

use std::sync::Mutex;

use serde::{Deserialize, Serialize};

use crate::common::lock;

use super::signal::Signal;

/// A user breakpoint; only the line is tracked
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Breakpoint {
    pub line: u32,
}

/// Ordered list of breakpoints for the cell being debugged
#[derive(Default)]
pub struct BreakpointsModel {
    breakpoints: Mutex<Vec<Breakpoint>>,
    changed: Signal<Vec<Breakpoint>>,
}

impl BreakpointsModel {
    pub fn breakpoints(&self) -> Vec<Breakpoint> {
        lock(&self.breakpoints).clone()
    }

    pub fn set_breakpoints(&self, breakpoints: Vec<Breakpoint>) {
        *lock(&self.breakpoints) = breakpoints.clone();
        self.changed.emit(breakpoints);
    }

    /// Add a breakpoint, keeping the list sorted by line. Returns false if
    /// one already exists on that line.
    pub fn add(&self, line: u32) -> bool {
        let snapshot = {
            let mut breakpoints = lock(&self.breakpoints);
            match breakpoints.binary_search_by_key(&line, |bp| bp.line) {
                Ok(_) => return false,
                Err(pos) => breakpoints.insert(pos, Breakpoint { line }),
            }
            breakpoints.clone()
        };
        self.changed.emit(snapshot);
        true
    }

    /// Remove the breakpoint on a line. Returns false if there was none.
    pub fn remove(&self, line: u32) -> bool {
        let snapshot = {
            let mut breakpoints = lock(&self.breakpoints);
            let before = breakpoints.len();
            breakpoints.retain(|bp| bp.line != line);
            if breakpoints.len() == before {
                return false;
            }
            breakpoints.clone()
        };
        self.changed.emit(snapshot);
        true
    }

    pub fn changed(&self) -> &Signal<Vec<Breakpoint>> {
        &self.changed
    }
}

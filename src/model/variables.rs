//! Scopes and variables of the selected frame

use std::sync::Mutex;

use serde::Serialize;

use crate::common::lock;
use crate::dap::Variable;

use super::signal::Signal;

/// A named group of variables as captured at a stop
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ScopeSnapshot {
    pub name: String,
    pub variables: Vec<Variable>,
}

#[derive(Default)]
pub struct VariablesModel {
    scopes: Mutex<Vec<ScopeSnapshot>>,
    changed: Signal<Vec<ScopeSnapshot>>,
}

impl VariablesModel {
    pub fn scopes(&self) -> Vec<ScopeSnapshot> {
        lock(&self.scopes).clone()
    }

    pub fn set_scopes(&self, scopes: Vec<ScopeSnapshot>) {
        *lock(&self.scopes) = scopes.clone();
        self.changed.emit(scopes);
    }

    pub fn changed(&self) -> &Signal<Vec<ScopeSnapshot>> {
        &self.changed
    }
}

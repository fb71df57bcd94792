//! Diagnostics for structural IR checks.

use crate::op::Loc;

/// A structural problem found in the IR, attached to a source location.
#[derive(Debug, Clone, thiserror::Error)]
#[error("{message}")]
pub struct Diagnostic {
    pub message: String,
    pub loc: Loc,
}

impl Diagnostic {
    pub fn new(message: impl Into<String>, loc: Loc) -> Self {
        Self {
            message: message.into(),
            loc,
        }
    }
}

//! The resolved decision handed back to connection handlers.

use std::sync::Arc;

use crate::needleware::client::{DecisionCode, DecisionCriteria, DecisionStatus};

/// Final admission decision for one connection.
///
/// Only the decision engine creates these; `status` records which outcome
/// produced `code` (a `Timeout` status may still carry `Accepted` when the
/// policy says so).
#[derive(Debug, Clone)]
pub struct DecisionWrapper {
    status: DecisionStatus,
    code: DecisionCode,
    criteria: Arc<DecisionCriteria>,
}

impl DecisionWrapper {
    pub(crate) fn new(status: DecisionStatus, code: DecisionCode, criteria: Arc<DecisionCriteria>) -> Self {
        Self { status, code, criteria }
    }

    pub fn status(&self) -> DecisionStatus {
        self.status
    }

    pub fn code(&self) -> DecisionCode {
        self.code
    }

    pub fn criteria(&self) -> &Arc<DecisionCriteria> {
        &self.criteria
    }

    pub fn conn_accepted(&self) -> bool {
        self.code == DecisionCode::Accepted
    }

    pub fn conn_rejected(&self) -> bool {
        self.code == DecisionCode::Rejected
    }
}

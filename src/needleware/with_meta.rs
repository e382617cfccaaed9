//! Needle decorator that attaches static metadata to every criteria.

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;

use crate::needleware::addr::AddrError;
use crate::needleware::client::DecisionCriteria;
use crate::needleware::decision::DecisionWrapper;
use crate::needleware::needle::{Needle, NeedleError};

/// Wraps another needle; built fresh per lookup, never cached.
#[derive(Debug, Clone)]
pub struct NeedleWithMeta {
    inner: Arc<dyn Needle>,
    metadata: HashMap<String, String>,
}

impl NeedleWithMeta {
    pub fn new(inner: Arc<dyn Needle>, metadata: HashMap<String, String>) -> Self {
        Self { inner, metadata }
    }

    pub fn metadata(&self) -> &HashMap<String, String> {
        &self.metadata
    }
}

#[async_trait]
impl Needle for NeedleWithMeta {
    fn name(&self) -> &str {
        self.inner.name()
    }

    fn new_tcp_criteria(&self, remote: &str, local: &str) -> Result<DecisionCriteria, AddrError> {
        let criteria = self.inner.new_tcp_criteria(remote, local)?;
        Ok(criteria.with_metadata(self.metadata.clone()))
    }

    fn new_udp_criteria(&self, remote: &str, local: &str) -> Result<DecisionCriteria, AddrError> {
        let criteria = self.inner.new_udp_criteria(remote, local)?;
        Ok(criteria.with_metadata(self.metadata.clone()))
    }

    async fn decide(&self, criteria: Arc<DecisionCriteria>) -> Result<DecisionWrapper, NeedleError> {
        self.inner.decide(criteria).await
    }

    fn on_conn_close(&self, decision: &DecisionWrapper) {
        self.inner.on_conn_close(decision)
    }
}

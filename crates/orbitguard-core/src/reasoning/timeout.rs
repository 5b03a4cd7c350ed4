//! Deadline wrapper for slow or remote reasoners.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;

use super::{Reasoner, ReasoningError, ReasoningRequest, ReasoningResponse, ReasoningResult};

/// Runs the inner reasoner under `tokio::time::timeout`.
pub struct TimeoutWrappedExternalReasoner {
    inner: Arc<dyn Reasoner>,
    timeout: Duration,
    name: String,
}

impl TimeoutWrappedExternalReasoner {
    pub fn new(inner: Arc<dyn Reasoner>, timeout: Duration) -> Self {
        let name = format!("timeout({})", inner.name());
        Self {
            inner,
            timeout,
            name,
        }
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }
}

#[async_trait]
impl Reasoner for TimeoutWrappedExternalReasoner {
    fn name(&self) -> &str {
        &self.name
    }

    async fn reason(&self, request: &ReasoningRequest) -> ReasoningResult<ReasoningResponse> {
        match tokio::time::timeout(self.timeout, self.inner.reason(request)).await {
            Ok(result) => result,
            Err(_) => Err(ReasoningError::Timeout {
                timeout_ms: u64::try_from(self.timeout.as_millis()).unwrap_or(u64::MAX),
            }),
        }
    }
}

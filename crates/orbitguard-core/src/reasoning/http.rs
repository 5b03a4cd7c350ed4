//! JSON-over-HTTP reasoner client.

use async_trait::async_trait;

use super::{Reasoner, ReasoningError, ReasoningRequest, ReasoningResponse, ReasoningResult};

/// POSTs the request as JSON and expects a [`ReasoningResponse`] body.
///
/// Carries no deadline of its own; wrap it in
/// [`TimeoutWrappedExternalReasoner`](super::TimeoutWrappedExternalReasoner).
pub struct HttpReasoner {
    endpoint: String,
    client: reqwest::Client,
}

impl HttpReasoner {
    pub fn new(endpoint: &str) -> ReasoningResult<Self> {
        let url = reqwest::Url::parse(endpoint)
            .map_err(|e| ReasoningError::Backend(format!("bad endpoint {endpoint}: {e}")))?;
        let client = reqwest::Client::builder()
            .user_agent(concat!("orbitguard/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| ReasoningError::Backend(e.to_string()))?;
        Ok(Self {
            endpoint: url.to_string(),
            client,
        })
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }
}

#[async_trait]
impl Reasoner for HttpReasoner {
    fn name(&self) -> &str {
        "http"
    }

    async fn reason(&self, request: &ReasoningRequest) -> ReasoningResult<ReasoningResponse> {
        let response = self
            .client
            .post(&self.endpoint)
            .json(request)
            .send()
            .await
            .map_err(|e| ReasoningError::Backend(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            return Err(ReasoningError::Backend(format!(
                "endpoint returned {status}"
            )));
        }

        let body: ReasoningResponse = response
            .json()
            .await
            .map_err(|e| ReasoningError::InvalidResponse(e.to_string()))?;
        body.validate()?;
        Ok(body)
    }
}

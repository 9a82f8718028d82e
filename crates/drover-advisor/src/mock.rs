use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;

use drover_core::advisory::{Advisory, CompletionRequest};
use drover_core::errors::AdvisoryError;

/// Pre-programmed responses for deterministic testing without API calls.
#[derive(Clone, Debug)]
pub enum MockResponse {
    Text(String),
    Error(AdvisoryError),
    /// Wait a duration, then yield the inner response.
    Delay(Duration, Box<MockResponse>),
}

impl MockResponse {
    pub fn text(text: impl Into<String>) -> Self {
        Self::Text(text.into())
    }

    pub fn json(value: serde_json::Value) -> Self {
        Self::Text(value.to_string())
    }

    pub fn rate_limited() -> Self {
        Self::Error(AdvisoryError::RateLimited { retry_after: None })
    }

    pub fn delayed(delay: Duration, inner: MockResponse) -> Self {
        Self::Delay(delay, Box::new(inner))
    }
}

/// Mock backend that returns pre-programmed responses in sequence, then
/// repeats `fallback` (if any) forever.
pub struct MockAdvisory {
    responses: Mutex<VecDeque<MockResponse>>,
    fallback: Option<MockResponse>,
    requests: Mutex<Vec<CompletionRequest>>,
    call_count: AtomicUsize,
}

impl MockAdvisory {
    pub fn new(responses: Vec<MockResponse>) -> Self {
        Self {
            responses: Mutex::new(responses.into()),
            fallback: None,
            requests: Mutex::new(Vec::new()),
            call_count: AtomicUsize::new(0),
        }
    }

    /// Answer every call with the same response.
    pub fn always(response: MockResponse) -> Self {
        Self {
            fallback: Some(response),
            ..Self::new(Vec::new())
        }
    }

    pub fn call_count(&self) -> usize {
        self.call_count.load(Ordering::Relaxed)
    }

    /// Every request received so far.
    pub fn requests(&self) -> Vec<CompletionRequest> {
        self.requests.lock().clone()
    }
}

#[async_trait]
impl Advisory for MockAdvisory {
    fn name(&self) -> &str {
        "mock"
    }

    fn model(&self) -> &str {
        "mock-model"
    }

    async fn complete(&self, request: &CompletionRequest) -> Result<String, AdvisoryError> {
        let idx = self.call_count.fetch_add(1, Ordering::Relaxed);
        self.requests.lock().push(request.clone());

        let next = self.responses.lock().pop_front().or_else(|| self.fallback.clone());
        let Some(mut response) = next else {
            return Err(AdvisoryError::InvalidRequest(format!(
                "MockAdvisory: no response configured for call {idx}"
            )));
        };

        loop {
            match response {
                MockResponse::Text(text) => return Ok(text),
                MockResponse::Error(e) => return Err(e),
                MockResponse::Delay(delay, inner) => {
                    tokio::time::sleep(delay).await;
                    response = *inner;
                }
            }
        }
    }
}

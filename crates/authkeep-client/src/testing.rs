//! Scripted transport for unit tests.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;

use crate::transport::{HttpRequest, HttpResponse, HttpTransport, TransportError};

enum Scripted {
    Response(HttpResponse),
    Timeout,
}

/// Replays queued responses in order and records every request.
pub(crate) struct MockTransport {
    script: Mutex<VecDeque<Scripted>>,
    requests: Mutex<Vec<HttpRequest>>,
    delay: Option<Duration>,
}

impl MockTransport {
    pub(crate) fn new() -> Arc<Self> {
        Arc::new(Self {
            script: Mutex::new(VecDeque::new()),
            requests: Mutex::new(Vec::new()),
            delay: None,
        })
    }

    /// Every exchange takes `delay` before answering.
    pub(crate) fn with_delay(delay: Duration) -> Arc<Self> {
        Arc::new(Self {
            script: Mutex::new(VecDeque::new()),
            requests: Mutex::new(Vec::new()),
            delay: Some(delay),
        })
    }

    pub(crate) fn push(&self, response: HttpResponse) {
        self.script
            .lock()
            .unwrap()
            .push_back(Scripted::Response(response));
    }

    pub(crate) fn push_json(&self, status: u16, body: &str) {
        self.push(HttpResponse::new(status, body));
    }

    pub(crate) fn push_timeout(&self) {
        self.script.lock().unwrap().push_back(Scripted::Timeout);
    }

    pub(crate) fn call_count(&self) -> usize {
        self.requests.lock().unwrap().len()
    }

    pub(crate) fn requests(&self) -> Vec<HttpRequest> {
        self.requests.lock().unwrap().clone()
    }

    pub(crate) fn last_request(&self) -> Option<HttpRequest> {
        self.requests.lock().unwrap().last().cloned()
    }
}

#[async_trait]
impl HttpTransport for MockTransport {
    async fn issue(&self, request: HttpRequest) -> Result<HttpResponse, TransportError> {
        let timeout = request.timeout;
        self.requests.lock().unwrap().push(request);
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        let next = self.script.lock().unwrap().pop_front();
        match next {
            Some(Scripted::Response(response)) => Ok(response),
            Some(Scripted::Timeout) => Err(TransportError::Timeout(timeout)),
            None => Err(TransportError::Connect("no scripted response".into())),
        }
    }
}

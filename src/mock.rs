use std::{
    collections::{HashMap, VecDeque},
    sync::{Arc, Mutex},
    time::{Duration, Instant},
};

use reqwest::Method;
use serde::Serialize;

use super::adapter::{
    BufferedBody, RestBytes, RestError, RestFuture, RestRequest, RestResponse, RestResult,
    RestTransport,
};
use super::client::encode_json;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum MockTransportState {
    Idle,
    Busy,
    Error,
}

#[derive(Clone, Debug, Default)]
pub enum MockBehavior {
    /// Answer from the response queues, or an empty 200 if they are empty.
    #[default]
    Pass,
    /// Answer 200 with the request's own body.
    Echo,
    TransportError {
        reason: String,
    },
}

impl MockBehavior {
    pub fn pass() -> Self {
        Self::Pass
    }

    pub fn echo() -> Self {
        Self::Echo
    }

    pub fn transport_error(reason: impl Into<String>) -> Self {
        Self::TransportError {
            reason: reason.into(),
        }
    }
}

/// Queued behaviors, one per request; `fallback` applies once drained.
#[derive(Clone, Debug, Default)]
pub struct MockBehaviorPlan {
    request: VecDeque<MockBehavior>,
    fallback: MockBehavior,
}

impl MockBehaviorPlan {
    pub fn with_fallback(fallback: MockBehavior) -> Self {
        Self {
            request: VecDeque::new(),
            fallback,
        }
    }

    pub fn push(&mut self, behavior: MockBehavior) -> &mut Self {
        self.request.push_back(behavior);
        self
    }

    pub fn pop(&mut self) -> MockBehavior {
        self.request
            .pop_front()
            .unwrap_or_else(|| self.fallback.clone())
    }

    pub fn len(&self) -> usize {
        self.request.len()
    }

    pub fn is_empty(&self) -> bool {
        self.request.is_empty()
    }
}

#[derive(Clone, Debug)]
pub struct MockResponse {
    pub status: u16,
    pub headers: Vec<(String, RestBytes)>,
    pub body: RestBytes,
    pub close_error: Option<String>,
}

impl MockResponse {
    pub fn new(status: u16, body: impl Into<RestBytes>) -> Self {
        Self {
            status,
            headers: Vec::new(),
            body: body.into(),
            close_error: None,
        }
    }

    pub fn with_header(mut self, key: impl Into<String>, value: impl Into<RestBytes>) -> Self {
        self.headers.push((key.into(), value.into()));
        self
    }

    /// Makes closing this response's body fail with `reason`.
    pub fn with_close_error(mut self, reason: impl Into<String>) -> Self {
        self.close_error = Some(reason.into());
        self
    }

    pub fn text(status: u16, body: impl Into<String>) -> Self {
        Self::new(status, body.into())
    }

    pub fn json<T: Serialize + ?Sized>(status: u16, payload: &T) -> RestResult<Self> {
        let body = encode_json(payload)?;
        Ok(Self::new(status, body).with_header("content-type", "application/json"))
    }

    fn into_rest_response(self, elapsed: Duration) -> RestResponse {
        let mut body = BufferedBody::new(self.body);
        if let Some(reason) = self.close_error {
            body = body.with_close_error(reason);
        }
        RestResponse::new(self.status, self.headers, body, elapsed)
    }
}

#[derive(Clone, Debug)]
pub struct MockRestStateSnapshot {
    pub state: MockTransportState,
    pub request_count: usize,
    pub last_url: Option<String>,
    pub last_status: Option<u16>,
    pub behavior_remaining: usize,
    pub response_queue_len: usize,
    pub route_queue_len: usize,
    pub outbound_count: usize,
    pub last_error: Option<String>,
}

#[derive(Debug)]
struct MockRestAdapterState {
    state: MockTransportState,
    request_count: usize,
    last_url: Option<String>,
    last_status: Option<u16>,
    behavior_plan: MockBehaviorPlan,
    default_response_queue: VecDeque<MockResponse>,
    route_response_queues: HashMap<(Method, String), VecDeque<MockResponse>>,
    outbound_log: Vec<RestRequest>,
    last_error: Option<String>,
}

impl MockRestAdapterState {
    fn snapshot(&self) -> MockRestStateSnapshot {
        MockRestStateSnapshot {
            state: self.state,
            request_count: self.request_count,
            last_url: self.last_url.clone(),
            last_status: self.last_status,
            behavior_remaining: self.behavior_plan.len(),
            response_queue_len: self.default_response_queue.len(),
            route_queue_len: self.route_response_queues.values().map(VecDeque::len).sum(),
            outbound_count: self.outbound_log.len(),
            last_error: self.last_error.clone(),
        }
    }

    fn next_response(&mut self, request: &RestRequest) -> Option<MockResponse> {
        let route_key = (request.method.clone(), request.url.clone());
        if let Some(response) = self
            .route_response_queues
            .get_mut(&route_key)
            .and_then(VecDeque::pop_front)
        {
            return Some(response);
        }
        self.default_response_queue.pop_front()
    }
}

impl Default for MockRestAdapterState {
    fn default() -> Self {
        Self {
            state: MockTransportState::Idle,
            request_count: 0,
            last_url: None,
            last_status: None,
            behavior_plan: MockBehaviorPlan::default(),
            default_response_queue: VecDeque::new(),
            route_response_queues: HashMap::new(),
            outbound_log: Vec::new(),
            last_error: None,
        }
    }
}

/// In-memory transport. Clones share state, so a test can keep one handle to
/// inspect while the client owns another.
#[derive(Clone, Debug)]
pub struct MockRestAdapter {
    state: Arc<Mutex<MockRestAdapterState>>,
}

impl MockRestAdapter {
    pub fn new() -> Self {
        Self {
            state: Arc::new(Mutex::new(MockRestAdapterState::default())),
        }
    }

    pub fn with_behavior_plan(behavior_plan: MockBehaviorPlan) -> Self {
        let state = MockRestAdapterState {
            behavior_plan,
            ..MockRestAdapterState::default()
        };
        Self {
            state: Arc::new(Mutex::new(state)),
        }
    }

    /// Adapter whose every request is answered with its own body.
    pub fn echo() -> Self {
        Self::with_behavior_plan(MockBehaviorPlan::with_fallback(MockBehavior::Echo))
    }

    pub fn snapshot(&self) -> MockRestStateSnapshot {
        self.state
            .lock()
            .expect("mock-restapi mutex poisoned while taking snapshot")
            .snapshot()
    }

    pub fn push_behavior(&self, behavior: MockBehavior) {
        self.state
            .lock()
            .expect("mock-restapi mutex poisoned while pushing behavior")
            .behavior_plan
            .push(behavior);
    }

    pub fn queue_response(&self, response: MockResponse) {
        self.state
            .lock()
            .expect("mock-restapi mutex poisoned while queueing response")
            .default_response_queue
            .push_back(response);
    }

    pub fn queue_response_for(&self, method: Method, url: impl Into<String>, response: MockResponse) {
        let key = (method, url.into());
        self.state
            .lock()
            .expect("mock-restapi mutex poisoned while queueing response by route")
            .route_response_queues
            .entry(key)
            .or_default()
            .push_back(response);
    }

    pub fn queue_get_response(&self, url: impl Into<String>, response: MockResponse) {
        self.queue_response_for(Method::GET, url, response);
    }

    pub fn queue_post_response(&self, url: impl Into<String>, response: MockResponse) {
        self.queue_response_for(Method::POST, url, response);
    }

    pub fn queue_put_response(&self, url: impl Into<String>, response: MockResponse) {
        self.queue_response_for(Method::PUT, url, response);
    }

    pub fn queue_delete_response(&self, url: impl Into<String>, response: MockResponse) {
        self.queue_response_for(Method::DELETE, url, response);
    }

    pub fn outbound_requests(&self) -> Vec<RestRequest> {
        self.state
            .lock()
            .expect("mock-restapi mutex poisoned while reading outbound log")
            .outbound_log
            .clone()
    }

    pub fn last_request(&self) -> Option<RestRequest> {
        self.state
            .lock()
            .expect("mock-restapi mutex poisoned while reading outbound log")
            .outbound_log
            .last()
            .cloned()
    }

    pub fn outbound_count(&self) -> usize {
        self.state
            .lock()
            .expect("mock-restapi mutex poisoned while reading outbound count")
            .outbound_log
            .len()
    }

    pub fn clear_logs(&self) {
        self.state
            .lock()
            .expect("mock-restapi mutex poisoned while clearing logs")
            .outbound_log
            .clear();
    }
}

impl Default for MockRestAdapter {
    fn default() -> Self {
        Self::new()
    }
}

impl RestTransport for MockRestAdapter {
    fn execute(&self, request: RestRequest) -> RestFuture<'static, RestResult<RestResponse>> {
        let adapter = self.clone();
        Box::pin(async move {
            let start = Instant::now();
            let mut state = adapter
                .state
                .lock()
                .expect("mock-restapi mutex poisoned while executing request");

            let behavior = state.behavior_plan.pop();
            state.outbound_log.push(request.clone());
            state.request_count += 1;
            state.last_url = Some(request.url.clone());
            state.state = MockTransportState::Busy;
            state.last_error = None;

            let response = match behavior {
                MockBehavior::TransportError { reason } => {
                    state.state = MockTransportState::Error;
                    state.last_status = None;
                    state.last_error = Some(reason.clone());
                    return Err(RestError::transport(reason));
                }
                MockBehavior::Echo => {
                    let mut echoed = MockResponse::new(200, request.body.clone().unwrap_or_default());
                    if let Some(content_type) = request.header("content-type") {
                        echoed = echoed.with_header("content-type", RestBytes::copy_from_slice(content_type));
                    }
                    echoed
                }
                MockBehavior::Pass => state
                    .next_response(&request)
                    .unwrap_or_else(|| MockResponse::new(200, RestBytes::new())),
            };

            state.last_status = Some(response.status);
            state.state = MockTransportState::Idle;
            Ok(response.into_rest_response(start.elapsed()))
        })
    }
}

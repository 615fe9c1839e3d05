//! Small JSON REST client over reqwest: a base URL, a fixed set of extra
//! headers sent on every request (for APIs that want e.g. `X-Auth-Token`
//! instead of a bearer header), and an in-memory mock transport for
//! deterministic tests.

pub mod adapter;
pub mod client;
pub mod mock;

pub use reqwest::{Method, Url};

pub use adapter::{
    BufferedBody, ReqwestTransport, ResponseBody, RestBytes, RestError, RestErrorKind, RestFuture,
    RestRequest, RestResponse, RestResult, RestTransport, SharedRestTransport,
};
pub use client::{Client, ClientBuilder, Payload, Response, encode_json};
pub use mock::{
    MockBehavior, MockBehaviorPlan, MockResponse, MockRestAdapter, MockRestStateSnapshot,
    MockTransportState,
};

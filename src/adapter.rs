use std::{
    fmt,
    future::Future,
    pin::Pin,
    time::{Duration, Instant},
};

use bytes::Bytes;
use reqwest::header::{HeaderName, HeaderValue};
use reqwest::{Client as ReqwestClient, Method};
use thiserror::Error;

pub type RestBytes = Bytes;
pub type RestFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;
pub type RestResult<T> = Result<T, RestError>;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RestErrorKind {
    /// Base URL or request path could not be turned into a URL.
    Url,
    Serialize,
    /// A configured header name or value is not valid HTTP.
    Header,
    Transport,
    Decode,
    Close,
}

#[derive(Clone, Debug, Error)]
#[error("rest error {kind:?}: {message}")]
pub struct RestError {
    pub kind: RestErrorKind,
    pub message: String,
}

impl RestError {
    pub fn new(kind: RestErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    pub fn url(message: impl Into<String>) -> Self {
        Self::new(RestErrorKind::Url, message)
    }

    pub fn header(message: impl Into<String>) -> Self {
        Self::new(RestErrorKind::Header, message)
    }

    pub fn transport(message: impl Into<String>) -> Self {
        Self::new(RestErrorKind::Transport, message)
    }

    pub fn close(message: impl Into<String>) -> Self {
        Self::new(RestErrorKind::Close, message)
    }

    pub fn serialize(err: sonic_rs::Error) -> Self {
        Self::new(RestErrorKind::Serialize, err.to_string())
    }

    pub fn decode(err: sonic_rs::Error) -> Self {
        Self::new(RestErrorKind::Decode, err.to_string())
    }

    fn from_reqwest(err: reqwest::Error) -> Self {
        Self::transport(err.to_string())
    }

    pub fn kind(&self) -> RestErrorKind {
        self.kind
    }

    pub fn message(&self) -> &str {
        &self.message
    }
}

#[derive(Clone, Debug)]
pub struct RestRequest {
    pub method: Method,
    pub url: String,
    pub headers: Vec<(String, RestBytes)>,
    pub body: Option<RestBytes>,
}

impl RestRequest {
    pub fn new(method: Method, url: impl Into<String>) -> Self {
        Self {
            method,
            url: url.into(),
            headers: Vec::new(),
            body: None,
        }
    }

    pub fn get(url: impl Into<String>) -> Self {
        Self::new(Method::GET, url)
    }

    pub fn post(url: impl Into<String>) -> Self {
        Self::new(Method::POST, url)
    }

    pub fn put(url: impl Into<String>) -> Self {
        Self::new(Method::PUT, url)
    }

    pub fn delete(url: impl Into<String>) -> Self {
        Self::new(Method::DELETE, url)
    }

    pub fn with_header(mut self, key: impl Into<String>, value: impl Into<RestBytes>) -> Self {
        self.headers.push((key.into(), value.into()));
        self
    }

    pub fn with_body(mut self, body: impl Into<RestBytes>) -> Self {
        self.body = Some(body.into());
        self
    }

    /// First value of header `name`, compared case-insensitively.
    pub fn header(&self, name: &str) -> Option<&[u8]> {
        find_header(&self.headers, name)
    }

    pub fn has_header(&self, name: &str) -> bool {
        self.header(name).is_some()
    }
}

pub(crate) fn find_header<'a>(headers: &'a [(String, RestBytes)], name: &str) -> Option<&'a [u8]> {
    headers
        .iter()
        .find(|(key, _)| key.eq_ignore_ascii_case(name))
        .map(|(_, value)| value.as_ref())
}

/// Body stream of a response. It is read once and closed once; closing may
/// fail and that failure is reported separately from the read.
pub trait ResponseBody: Send {
    /// Reads everything left in the stream.
    fn read_all(&mut self) -> RestFuture<'_, RestResult<RestBytes>>;

    /// Releases the stream and the connection behind it.
    fn close(&mut self) -> RestResult<()>;
}

/// In-memory body. An optional close error is returned from `close`.
#[derive(Clone, Debug, Default)]
pub struct BufferedBody {
    body: Option<RestBytes>,
    close_error: Option<String>,
}

impl BufferedBody {
    pub fn new(body: impl Into<RestBytes>) -> Self {
        Self {
            body: Some(body.into()),
            close_error: None,
        }
    }

    pub fn with_close_error(mut self, reason: impl Into<String>) -> Self {
        self.close_error = Some(reason.into());
        self
    }
}

impl ResponseBody for BufferedBody {
    fn read_all(&mut self) -> RestFuture<'_, RestResult<RestBytes>> {
        let body = self.body.take();
        Box::pin(async move { body.ok_or_else(|| RestError::close("response body already consumed")) })
    }

    fn close(&mut self) -> RestResult<()> {
        self.body = None;
        match self.close_error.take() {
            Some(reason) => Err(RestError::close(reason)),
            None => Ok(()),
        }
    }
}

struct ReqwestBody {
    response: Option<reqwest::Response>,
}

impl ResponseBody for ReqwestBody {
    fn read_all(&mut self) -> RestFuture<'_, RestResult<RestBytes>> {
        let response = self.response.take();
        Box::pin(async move {
            match response {
                Some(response) => response.bytes().await.map_err(RestError::from_reqwest),
                None => Err(RestError::close("response body already consumed")),
            }
        })
    }

    fn close(&mut self) -> RestResult<()> {
        // Dropping the response hands the connection back to reqwest's pool.
        self.response = None;
        Ok(())
    }
}

pub struct RestResponse {
    pub status: u16,
    pub headers: Vec<(String, RestBytes)>,
    pub body: Box<dyn ResponseBody>,
    pub elapsed: Duration,
}

impl RestResponse {
    pub fn new(
        status: u16,
        headers: Vec<(String, RestBytes)>,
        body: impl ResponseBody + 'static,
        elapsed: Duration,
    ) -> Self {
        Self {
            status,
            headers,
            body: Box::new(body),
            elapsed,
        }
    }

    pub fn buffered(status: u16, body: impl Into<RestBytes>) -> Self {
        Self::new(status, Vec::new(), BufferedBody::new(body), Duration::ZERO)
    }

    pub fn status(&self) -> u16 {
        self.status
    }

    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }

    pub fn header(&self, name: &str) -> Option<&[u8]> {
        find_header(&self.headers, name)
    }
}

impl fmt::Debug for RestResponse {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RestResponse")
            .field("status", &self.status)
            .field("headers", &self.headers)
            .field("elapsed", &self.elapsed)
            .finish_non_exhaustive()
    }
}

pub trait RestTransport: Send + Sync {
    fn execute(&self, request: RestRequest) -> RestFuture<'static, RestResult<RestResponse>>;
}

pub type SharedRestTransport = dyn RestTransport + Send + Sync;

#[derive(Clone, Debug)]
pub struct ReqwestTransport {
    client: ReqwestClient,
}

impl ReqwestTransport {
    pub fn new() -> Self {
        Self {
            client: ReqwestClient::new(),
        }
    }

    /// Uses a caller-configured reqwest client (timeouts, TLS, pool sizes).
    pub fn with_client(client: ReqwestClient) -> Self {
        Self { client }
    }
}

impl Default for ReqwestTransport {
    fn default() -> Self {
        Self::new()
    }
}

impl RestTransport for ReqwestTransport {
    fn execute(&self, request: RestRequest) -> RestFuture<'static, RestResult<RestResponse>> {
        let client = self.client.clone();
        Box::pin(async move {
            let start = Instant::now();
            let mut req = client.request(request.method.clone(), &request.url);

            for (key, value) in request.headers {
                let name = HeaderName::from_bytes(key.as_bytes())
                    .map_err(|err| RestError::header(format!("{key}: {err}")))?;
                let value = HeaderValue::from_bytes(value.as_ref())
                    .map_err(|err| RestError::header(format!("{key}: {err}")))?;
                req = req.header(name, value);
            }

            if let Some(body) = request.body {
                req = req.body(body);
            }

            let resp = req.send().await.map_err(RestError::from_reqwest)?;

            let status = resp.status().as_u16();
            let headers = resp
                .headers()
                .iter()
                .map(|(name, value)| (name.to_string(), Bytes::copy_from_slice(value.as_ref())))
                .collect();

            Ok(RestResponse::new(
                status,
                headers,
                ReqwestBody {
                    response: Some(resp),
                },
                start.elapsed(),
            ))
        })
    }
}

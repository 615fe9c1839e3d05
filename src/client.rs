//! The [`Client`] verbs and the [`Response`] wrapper they return.
//!
//! Every request path is resolved against the client's base URL, which always
//! ends in `/`. A single leading `/` on a path is dropped first, so `"devices"`
//! and `"/devices"` both land under the base path instead of at the host root.
//! A path that carries its own scheme and host still replaces the base
//! entirely; that is how relative-reference resolution works.

use std::{collections::HashMap, fmt, sync::Arc, time::Duration};

use reqwest::{Method, Url};
use serde::{Serialize, de::DeserializeOwned};
use tracing::debug;

use crate::adapter::{
    ReqwestTransport, RestBytes, RestError, RestRequest, RestResponse, RestResult, RestTransport,
    SharedRestTransport,
};

const CONTENT_TYPE: &str = "content-type";
const JSON_CONTENT_TYPE: &str = "application/json";

/// Serializes `value` to a JSON request body.
pub fn encode_json<T>(value: &T) -> RestResult<RestBytes>
where
    T: Serialize + ?Sized,
{
    sonic_rs::to_vec(value)
        .map(RestBytes::from)
        .map_err(RestError::serialize)
}

/// Body for [`Client::post`] and [`Client::put`].
#[derive(Clone, Debug)]
pub enum Payload<'a, T: ?Sized> {
    /// Already-encoded JSON, sent unchanged.
    Encoded(RestBytes),
    /// A value serialized to JSON before sending.
    Value(&'a T),
}

impl Payload<'static, ()> {
    pub fn encoded(body: impl Into<RestBytes>) -> Self {
        Self::Encoded(body.into())
    }
}

impl<'a, T> Payload<'a, T>
where
    T: Serialize + ?Sized,
{
    pub fn value(value: &'a T) -> Self {
        Self::Value(value)
    }

    pub fn into_bytes(self) -> RestResult<RestBytes> {
        match self {
            Self::Encoded(body) => Ok(body),
            Self::Value(value) => encode_json(value),
        }
    }
}

fn parse_base_url(api_url: &str) -> RestResult<Url> {
    if api_url.is_empty() {
        return Err(RestError::url("base url is empty"));
    }

    let parsed = if api_url.ends_with('/') {
        Url::parse(api_url)
    } else {
        Url::parse(&format!("{api_url}/"))
    };
    let base = parsed.map_err(|err| RestError::url(format!("invalid base url {api_url:?}: {err}")))?;

    if base.cannot_be_a_base() {
        return Err(RestError::url(format!(
            "base url {api_url:?} cannot have paths resolved against it"
        )));
    }
    Ok(base)
}

#[derive(Clone)]
pub struct Client {
    base_url: Url,
    headers: HashMap<String, String>,
    transport: Arc<SharedRestTransport>,
}

impl Client {
    /// Client over a fresh reqwest transport. `extra_headers` is copied and
    /// sent with every request.
    pub fn new<I, K, V>(api_url: &str, extra_headers: I) -> RestResult<Self>
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        Self::builder(api_url).headers(extra_headers).build()
    }

    pub fn with_transport<I, K, V, T>(api_url: &str, extra_headers: I, transport: T) -> RestResult<Self>
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
        T: RestTransport + 'static,
    {
        Self::builder(api_url)
            .headers(extra_headers)
            .transport(transport)
            .build()
    }

    pub fn builder(api_url: impl Into<String>) -> ClientBuilder {
        ClientBuilder::new(api_url)
    }

    pub fn base_url(&self) -> &Url {
        &self.base_url
    }

    pub fn headers(&self) -> &HashMap<String, String> {
        &self.headers
    }

    pub fn headers_mut(&mut self) -> &mut HashMap<String, String> {
        &mut self.headers
    }

    pub fn set_header(&mut self, key: impl Into<String>, value: impl Into<String>) -> Option<String> {
        self.headers.insert(key.into(), value.into())
    }

    pub fn remove_header(&mut self, key: &str) -> Option<String> {
        self.headers.remove(key)
    }

    /// Resolves `path` against the base URL.
    pub fn resolve(&self, path: &str) -> RestResult<Url> {
        let path = path.strip_prefix('/').unwrap_or(path);
        self.base_url
            .join(path)
            .map_err(|err| RestError::url(format!("cannot resolve {path:?} against {}: {err}", self.base_url)))
    }

    /// Sends `method` to `path` with the configured headers and returns the
    /// transport's response as-is.
    pub async fn request(
        &self,
        method: Method,
        path: &str,
        body: Option<RestBytes>,
    ) -> RestResult<RestResponse> {
        let url = self.resolve(path)?;
        let mut request = RestRequest::new(method, url.as_str());

        for (key, value) in &self.headers {
            request = request.with_header(key.as_str(), RestBytes::from(value.clone()));
        }

        if let Some(body) = body {
            if !request.has_header(CONTENT_TYPE) {
                request = request.with_header(CONTENT_TYPE, JSON_CONTENT_TYPE);
            }
            request = request.with_body(body);
        }

        debug!(method = %request.method, url = %request.url, "sending request");
        let response = self
            .transport
            .execute(request)
            .await
            .inspect_err(|err| debug!(error = %err, "request failed"))?;
        debug!(status = response.status, elapsed = ?response.elapsed, "received response");

        Ok(response)
    }

    pub async fn get(&self, path: &str) -> RestResult<Response> {
        self.request(Method::GET, path, None).await.map(Response::from)
    }

    pub async fn delete(&self, path: &str) -> RestResult<Response> {
        self.request(Method::DELETE, path, None).await.map(Response::from)
    }

    pub async fn post<T>(&self, path: &str, data: Payload<'_, T>) -> RestResult<Response>
    where
        T: Serialize + ?Sized,
    {
        self.send_payload(Method::POST, path, data).await
    }

    pub async fn put<T>(&self, path: &str, data: Payload<'_, T>) -> RestResult<Response>
    where
        T: Serialize + ?Sized,
    {
        self.send_payload(Method::PUT, path, data).await
    }

    async fn send_payload<T>(&self, method: Method, path: &str, data: Payload<'_, T>) -> RestResult<Response>
    where
        T: Serialize + ?Sized,
    {
        let body = data.into_bytes()?;
        self.request(method, path, Some(body)).await.map(Response::from)
    }
}

impl fmt::Debug for Client {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        // Header values usually carry credentials.
        let mut header_names: Vec<&str> = self.headers.keys().map(String::as_str).collect();
        header_names.sort_unstable();
        f.debug_struct("Client")
            .field("base_url", &self.base_url.as_str())
            .field("header_names", &header_names)
            .finish_non_exhaustive()
    }
}

pub struct ClientBuilder {
    api_url: String,
    headers: HashMap<String, String>,
    transport: Option<Arc<SharedRestTransport>>,
}

impl ClientBuilder {
    pub fn new(api_url: impl Into<String>) -> Self {
        Self {
            api_url: api_url.into(),
            headers: HashMap::new(),
            transport: None,
        }
    }

    pub fn header(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.insert(key.into(), value.into());
        self
    }

    /// Merges `headers` into the ones already set; later keys win.
    pub fn headers<I, K, V>(mut self, headers: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        self.headers
            .extend(headers.into_iter().map(|(key, value)| (key.into(), value.into())));
        self
    }

    pub fn transport<T>(mut self, transport: T) -> Self
    where
        T: RestTransport + 'static,
    {
        self.transport = Some(Arc::new(transport));
        self
    }

    pub fn build(self) -> RestResult<Client> {
        let base_url = parse_base_url(&self.api_url)?;
        let transport = match self.transport {
            Some(transport) => transport,
            None => Arc::new(ReqwestTransport::new()),
        };

        Ok(Client {
            base_url,
            headers: self.headers,
            transport,
        })
    }
}

/// A transport response plus JSON decoding. Decoding or closing consumes it,
/// so the body is read and released at most once.
#[derive(Debug)]
pub struct Response {
    inner: RestResponse,
}

impl Response {
    pub fn status(&self) -> u16 {
        self.inner.status()
    }

    pub fn is_success(&self) -> bool {
        self.inner.is_success()
    }

    pub fn headers(&self) -> &[(String, RestBytes)] {
        &self.inner.headers
    }

    pub fn header(&self, name: &str) -> Option<&[u8]> {
        self.inner.header(name)
    }

    pub fn elapsed(&self) -> Duration {
        self.inner.elapsed
    }

    pub fn into_inner(self) -> RestResponse {
        self.inner
    }

    /// Releases the body without reading it.
    pub fn close(self) -> RestResult<()> {
        let mut body = self.inner.body;
        body.close()
    }

    /// Parses the body as JSON, then closes it.
    ///
    /// A read or decode failure is returned in preference to a close failure;
    /// the close error is only surfaced when decoding succeeded.
    pub async fn decode<T>(self) -> RestResult<T>
    where
        T: DeserializeOwned,
    {
        let mut body = self.inner.body;
        let decoded = match body.read_all().await {
            Ok(bytes) => sonic_rs::from_slice::<T>(&bytes).map_err(RestError::decode),
            Err(err) => Err(err),
        };
        let closed = body.close();

        match (decoded, closed) {
            (Ok(value), Ok(())) => Ok(value),
            (Ok(_), Err(close_err)) => Err(close_err),
            (Err(err), Ok(())) => Err(err),
            (Err(err), Err(close_err)) => {
                debug!(error = %close_err, "dropping body close error after decode failure");
                Err(err)
            }
        }
    }
}

impl From<RestResponse> for Response {
    fn from(inner: RestResponse) -> Self {
        Self { inner }
    }
}

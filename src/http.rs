//! HTTP transport with timeouts and explicit cookie handling
//!
//! The device keeps its session in a `sid` cookie that the session layer
//! manages itself, so the client never stores cookies and never follows
//! redirects: a 302 is a "session lost" signal, not a navigation.

use crate::error::TransportError;
use async_trait::async_trait;
use encoding_rs::{Encoding, WINDOWS_1252};
use reqwest::header::{HeaderMap, HeaderName, HeaderValue, CONNECTION, CONTENT_TYPE, COOKIE};
use reqwest::redirect::Policy;
use reqwest::Client;
use std::collections::HashMap;
use std::fmt;
use std::time::Duration;

pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(5);

/// Pages without a declared charset are ISO-8859-1 (decoded as its
/// WHATWG superset windows-1252)
const DEFAULT_ENCODING: &Encoding = WINDOWS_1252;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Method {
    Get,
    Post,
}

impl fmt::Display for Method {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Get => f.write_str("GET"),
            Self::Post => f.write_str("POST"),
        }
    }
}

/// A single exchange with the device.
///
/// Field values are sent exactly as given; callers percent-encode them.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Request {
    pub path: String,
    pub method: Method,
    pub fields: Vec<(String, String)>,
    pub headers: Vec<(String, String)>,
    pub cookie: Option<String>,
}

impl Request {
    pub fn get(path: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            method: Method::Get,
            fields: Vec::new(),
            headers: Vec::new(),
            cookie: None,
        }
    }

    pub fn post(path: impl Into<String>) -> Self {
        Self {
            method: Method::Post,
            ..Self::get(path)
        }
    }

    pub fn field(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.fields.push((name.into(), value.into()));
        self
    }

    pub fn fields<K, V>(mut self, fields: impl IntoIterator<Item = (K, V)>) -> Self
    where
        K: Into<String>,
        V: Into<String>,
    {
        self.fields
            .extend(fields.into_iter().map(|(k, v)| (k.into(), v.into())));
        self
    }

    pub fn header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }

    /// Headers the device's own javascript sends on XHR calls
    pub fn ajax(self) -> Self {
        self.header("X-Requested-With", "XMLHttpRequest")
            .header("X-Requested-Handler", "ajax")
    }

    pub fn cookie(mut self, cookie: Option<String>) -> Self {
        self.cookie = cookie;
        self
    }

    /// `k=v&k2=v2`, values untouched
    pub fn encoded_fields(&self) -> String {
        self.fields
            .iter()
            .map(|(k, v)| format!("{k}={v}"))
            .collect::<Vec<_>>()
            .join("&")
    }
}

/// Status, headers and body of one response
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RawResponse {
    pub status: u16,
    /// Lower-cased header name → every value received for it
    pub headers: HashMap<String, Vec<String>>,
    /// Body exactly as received
    pub bytes: Vec<u8>,
    /// Body decoded with the declared charset, ISO-8859-1 when none is given
    pub body: String,
}

impl RawResponse {
    pub fn new(status: u16, body: impl Into<String>) -> Self {
        let body = body.into();
        Self {
            status,
            headers: HashMap::new(),
            bytes: body.as_bytes().to_vec(),
            body,
        }
    }

    /// Decode `bytes` according to the `Content-Type` charset in `headers`
    pub fn from_bytes(status: u16, headers: HashMap<String, Vec<String>>, bytes: Vec<u8>) -> Self {
        let mut resp = Self {
            status,
            headers,
            bytes,
            body: String::new(),
        };
        let encoding = resp
            .charset()
            .and_then(|label| Encoding::for_label(label.as_bytes()))
            .unwrap_or(DEFAULT_ENCODING);
        resp.body = encoding.decode(&resp.bytes).0.into_owned();
        resp
    }

    pub fn with_header(mut self, name: &str, value: impl Into<String>) -> Self {
        self.headers
            .entry(name.to_ascii_lowercase())
            .or_default()
            .push(value.into());
        self
    }

    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .get(&name.to_ascii_lowercase())
            .and_then(|values| values.first())
            .map(String::as_str)
    }

    /// `charset` parameter of the content type, if any
    pub fn charset(&self) -> Option<&str> {
        self.header("content-type")?
            .split(';')
            .skip(1)
            .filter_map(|param| param.split_once('='))
            .find(|(name, _)| name.trim().eq_ignore_ascii_case("charset"))
            .map(|(_, value)| value.trim().trim_matches('"'))
    }

    /// Media type without parameters, e.g. `text/xml`
    pub fn content_type(&self) -> Option<&str> {
        self.header("content-type")
            .map(|ct| ct.split(';').next().unwrap_or(ct).trim())
    }
}

#[async_trait]
pub trait Transport: Send + Sync {
    /// Host the transport talks to, for messages
    fn host(&self) -> &str;

    async fn send(&self, request: &Request) -> Result<RawResponse, TransportError>;
}

/// `reqwest`-backed transport talking plain HTTP to the device
pub struct HttpClient {
    inner: Client,
    host: String,
    base_url: String,
}

impl HttpClient {
    /// `host` is an address like `192.168.1.1` or `192.168.1.1:8080`
    pub fn new(host: &str, timeout: Duration) -> Result<Self, TransportError> {
        Self::with_base_url(host, &format!("http://{host}"), timeout)
    }

    pub fn with_base_url(
        host: &str,
        base_url: &str,
        timeout: Duration,
    ) -> Result<Self, TransportError> {
        let client = Client::builder()
            .timeout(timeout)
            .connect_timeout(timeout)
            .redirect(Policy::none())
            .build()
            .map_err(|e| TransportError::Other(e.to_string()))?;

        Ok(Self {
            inner: client,
            host: host.to_string(),
            base_url: base_url.trim_end_matches('/').to_string(),
        })
    }

    fn headers(request: &Request) -> Result<HeaderMap, TransportError> {
        let mut headers = HeaderMap::new();
        for (name, value) in &request.headers {
            let name = HeaderName::from_bytes(name.as_bytes())
                .map_err(|e| TransportError::Other(format!("bad header name {name}: {e}")))?;
            let value = HeaderValue::from_str(value)
                .map_err(|e| TransportError::Other(format!("bad header value: {e}")))?;
            headers.append(name, value);
        }
        headers.insert(CONNECTION, HeaderValue::from_static("keep-alive"));
        if let Some(cookie) = request.cookie.as_deref().filter(|c| !c.is_empty()) {
            headers.insert(
                COOKIE,
                HeaderValue::from_str(cookie)
                    .map_err(|e| TransportError::Other(format!("bad cookie: {e}")))?,
            );
        }
        Ok(headers)
    }

    fn classify(&self, err: reqwest::Error) -> TransportError {
        if err.is_timeout() {
            TransportError::Timeout {
                host: self.host.clone(),
            }
        } else if err.is_connect() {
            TransportError::Connect {
                host: self.host.clone(),
            }
        } else {
            TransportError::Other(err.to_string())
        }
    }
}

#[async_trait]
impl Transport for HttpClient {
    fn host(&self) -> &str {
        &self.host
    }

    async fn send(&self, request: &Request) -> Result<RawResponse, TransportError> {
        let url = format!("{}{}", self.base_url, request.path);
        let data = request.encoded_fields();
        let headers = Self::headers(request)?;

        let builder = match request.method {
            Method::Get => {
                tracing::debug!(
                    "Sending GET request to \"{}\" with data: {}",
                    url,
                    if data.is_empty() { "(none)" } else { data.as_str() }
                );
                let url = if data.is_empty() {
                    url
                } else {
                    format!("{url}?{data}")
                };
                self.inner.get(url)
            }
            Method::Post => {
                tracing::debug!("Sending POST request to \"{}\" with data: {}", url, data);
                self.inner
                    .post(url)
                    .header(CONTENT_TYPE, "application/x-www-form-urlencoded")
                    .body(data)
            }
        };

        let resp = builder
            .headers(headers)
            .send()
            .await
            .map_err(|e| self.classify(e))?;

        let status = resp.status().as_u16();
        let mut raw_headers: HashMap<String, Vec<String>> = HashMap::new();
        for (name, value) in resp.headers() {
            raw_headers
                .entry(name.as_str().to_ascii_lowercase())
                .or_default()
                .push(String::from_utf8_lossy(value.as_bytes()).trim().to_string());
        }
        let bytes = resp.bytes().await.map_err(|e| self.classify(e))?;

        tracing::debug!("Received HTTP {} ({} bytes)", status, bytes.len());
        Ok(RawResponse::from_bytes(status, raw_headers, bytes.to_vec()))
    }
}

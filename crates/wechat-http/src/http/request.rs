//! HTTP request model
//!
//! [`Request`] is what travels through the middleware stack. It is a plain,
//! cloneable value so the retry middleware can re-send it and the access
//! token middleware can rewrite it before every attempt.

use std::path::{Path, PathBuf};
use std::time::Duration;

use http::{HeaderMap, HeaderName, HeaderValue, Method};
use url::Url;

use crate::error::{Error, Result};

/// Ordered list of query or form pairs.
pub type Pairs = Vec<(String, String)>;

/// Collect any iterator of string-like pairs into [`Pairs`].
pub fn pairs<I, K, V>(items: I) -> Pairs
where
    I: IntoIterator<Item = (K, V)>,
    K: Into<String>,
    V: Into<String>,
{
    items
        .into_iter()
        .map(|(k, v)| (k.into(), v.into()))
        .collect()
}

/// The single body representation of a request.
#[derive(Debug, Clone, Default, PartialEq)]
pub enum RequestBody {
    /// No body.
    #[default]
    Empty,
    /// `application/x-www-form-urlencoded` pairs.
    Form(Pairs),
    /// Sent verbatim; the caller owns the encoding.
    Raw(String),
    /// Serialized as JSON with `content-type: application/json`.
    Json(serde_json::Value),
    /// `multipart/form-data` parts.
    Multipart(Vec<MultipartPart>),
}

impl RequestBody {
    /// Whether there is nothing to send.
    pub fn is_empty(&self) -> bool {
        matches!(self, RequestBody::Empty)
    }
}

/// Where the content of a multipart part comes from.
#[derive(Debug, Clone, PartialEq)]
pub enum PartSource {
    /// Streamed from a file at send time.
    File(PathBuf),
    /// Literal value.
    Inline(String),
}

/// One named part of a multipart body.
#[derive(Debug, Clone, PartialEq)]
pub struct MultipartPart {
    /// Field name, unique within the request
    pub name: String,
    /// Content source
    pub source: PartSource,
}

impl MultipartPart {
    /// A part streaming the contents of `path`.
    pub fn file(name: impl Into<String>, path: impl Into<PathBuf>) -> Self {
        Self {
            name: name.into(),
            source: PartSource::File(path.into()),
        }
    }

    /// A part carrying a literal value.
    pub fn inline(name: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            source: PartSource::Inline(value.into()),
        }
    }
}

/// Collects multipart parts, keeping names unique.
#[derive(Debug, Clone, Default)]
pub struct MultipartBuilder {
    parts: Vec<MultipartPart>,
}

impl MultipartBuilder {
    /// Create an empty builder.
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a file part after checking the file can be opened for reading.
    ///
    /// # Errors
    ///
    /// Returns [`Error::FileOpen`] if the path cannot be opened.
    pub async fn file(mut self, name: impl Into<String>, path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        tokio::fs::File::open(path)
            .await
            .map_err(|source| Error::FileOpen {
                path: path.to_path_buf(),
                source,
            })?;
        self.insert(MultipartPart::file(name, path));
        Ok(self)
    }

    /// Add an inline part.
    pub fn text(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.insert(MultipartPart::inline(name, value));
        self
    }

    fn insert(&mut self, part: MultipartPart) {
        // A later part with the same name replaces the earlier one.
        match self.parts.iter_mut().find(|p| p.name == part.name) {
            Some(existing) => *existing = part,
            None => self.parts.push(part),
        }
    }

    /// Finish and return the parts in insertion order.
    pub fn build(self) -> Vec<MultipartPart> {
        self.parts
    }
}

/// Body accepted by `Client::post`: either form pairs or a raw string.
#[derive(Debug, Clone, PartialEq)]
pub enum PostBody {
    /// Form-encoded key/value pairs.
    Form(Pairs),
    /// Sent verbatim.
    Raw(String),
}

impl PostBody {
    /// Build a form body from any pair iterator.
    pub fn form<I, K, V>(items: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        PostBody::Form(pairs(items))
    }
}

impl From<&str> for PostBody {
    fn from(value: &str) -> Self {
        PostBody::Raw(value.to_string())
    }
}

impl From<String> for PostBody {
    fn from(value: String) -> Self {
        PostBody::Raw(value)
    }
}

impl From<Pairs> for PostBody {
    fn from(value: Pairs) -> Self {
        PostBody::Form(value)
    }
}

impl<K, V, const N: usize> From<[(K, V); N]> for PostBody
where
    K: Into<String>,
    V: Into<String>,
{
    fn from(value: [(K, V); N]) -> Self {
        PostBody::form(value)
    }
}

impl<K, V, S> From<std::collections::HashMap<K, V, S>> for PostBody
where
    K: Into<String>,
    V: Into<String>,
{
    fn from(value: std::collections::HashMap<K, V, S>) -> Self {
        PostBody::form(value)
    }
}

impl<K, V> From<std::collections::BTreeMap<K, V>> for PostBody
where
    K: Into<String>,
    V: Into<String>,
{
    fn from(value: std::collections::BTreeMap<K, V>) -> Self {
        PostBody::form(value)
    }
}

impl From<PostBody> for RequestBody {
    fn from(value: PostBody) -> Self {
        match value {
            PostBody::Form(pairs) => RequestBody::Form(pairs),
            PostBody::Raw(raw) => RequestBody::Raw(raw),
        }
    }
}

/// Per-call options set by the client helpers.
#[derive(Debug, Clone, Default)]
pub struct RequestOptions {
    /// Query pairs appended to the URL
    pub query: Pairs,
    /// Extra headers for this call only
    pub headers: HeaderMap,
    /// Request body
    pub body: RequestBody,
    /// Overrides the transport timeout for this call
    pub timeout: Option<Duration>,
}

impl RequestOptions {
    /// Empty options.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the query pairs.
    pub fn query<I, K, V>(mut self, items: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        self.query = pairs(items);
        self
    }

    /// Set a form body.
    pub fn form<I, K, V>(mut self, items: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        self.body = RequestBody::Form(pairs(items));
        self
    }

    /// Set a raw body.
    pub fn body(mut self, raw: impl Into<String>) -> Self {
        self.body = RequestBody::Raw(raw.into());
        self
    }

    /// Set a JSON body.
    pub fn json(mut self, value: serde_json::Value) -> Self {
        self.body = RequestBody::Json(value);
        self
    }

    /// Set a multipart body.
    pub fn multipart(mut self, parts: Vec<MultipartPart>) -> Self {
        self.body = RequestBody::Multipart(parts);
        self
    }

    /// Set the per-call timeout.
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Add a header.
    ///
    /// # Errors
    /// Returns an error if the header name or value contains invalid characters.
    pub fn header(mut self, key: impl AsRef<str>, value: impl AsRef<str>) -> Result<Self> {
        let (name, value) = parse_header(key.as_ref(), value.as_ref())?;
        self.headers.insert(name, value);
        Ok(self)
    }
}

/// A fully resolved request as seen by middleware and the transport.
#[derive(Debug, Clone, PartialEq)]
pub struct Request {
    method: Method,
    url: Url,
    query: Pairs,
    headers: HeaderMap,
    body: RequestBody,
    timeout: Option<Duration>,
}

impl Request {
    /// Create a request with no query, headers or body.
    pub fn new(method: Method, url: Url) -> Self {
        Self {
            method,
            url,
            query: Vec::new(),
            headers: HeaderMap::new(),
            body: RequestBody::Empty,
            timeout: None,
        }
    }

    /// Create a request from per-call options.
    pub fn from_options(method: Method, url: Url, options: RequestOptions) -> Self {
        Self {
            method,
            url,
            query: options.query,
            headers: options.headers,
            body: options.body,
            timeout: options.timeout,
        }
    }

    /// Append a query pair.
    pub fn with_query(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.query.push((key.into(), value.into()));
        self
    }

    /// Set `key` to `value`, dropping every earlier occurrence of `key`
    /// from both the query pairs and the URL's own query string.
    pub fn replace_query(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        let key = key.into();
        self.query.retain(|(k, _)| *k != key);

        if self.url.query_pairs().any(|(k, _)| k == key.as_str()) {
            let kept: Pairs = self
                .url
                .query_pairs()
                .filter(|(k, _)| k != key.as_str())
                .map(|(k, v)| (k.into_owned(), v.into_owned()))
                .collect();
            self.url.set_query(None);
            if !kept.is_empty() {
                self.url.query_pairs_mut().extend_pairs(kept);
            }
        }

        self.query.push((key, value.into()));
        self
    }

    /// Set or replace a header.
    ///
    /// # Errors
    /// Returns an error if the header name or value contains invalid characters.
    pub fn with_header(mut self, key: impl AsRef<str>, value: impl AsRef<str>) -> Result<Self> {
        let (name, value) = parse_header(key.as_ref(), value.as_ref())?;
        self.headers.insert(name, value);
        Ok(self)
    }

    /// Get the method.
    pub fn method(&self) -> &Method {
        &self.method
    }

    /// Get the URL without the extra query pairs.
    pub fn url(&self) -> &Url {
        &self.url
    }

    /// Get the extra query pairs.
    pub fn query(&self) -> &[(String, String)] {
        &self.query
    }

    /// Get the headers.
    pub fn headers(&self) -> &HeaderMap {
        &self.headers
    }

    /// Get mutable headers.
    pub fn headers_mut(&mut self) -> &mut HeaderMap {
        &mut self.headers
    }

    /// Get the body.
    pub fn body(&self) -> &RequestBody {
        &self.body
    }

    /// Get the per-call timeout, if any.
    pub fn timeout(&self) -> Option<Duration> {
        self.timeout
    }

    /// The URL including the extra query pairs, as it goes on the wire.
    pub fn full_url(&self) -> Url {
        let mut url = self.url.clone();
        if !self.query.is_empty() {
            url.query_pairs_mut()
                .extend_pairs(self.query.iter().map(|(k, v)| (k.as_str(), v.as_str())));
        }
        url
    }
}

pub(crate) fn parse_header(key: &str, value: &str) -> Result<(HeaderName, HeaderValue)> {
    let name = key
        .parse::<HeaderName>()
        .map_err(|e| Error::InvalidHeaderName(format!("'{}': {}", key, e)))?;
    let value = value
        .parse::<HeaderValue>()
        .map_err(|e| Error::InvalidHeaderValue(format!("'{}': {}", value, e)))?;
    Ok((name, value))
}

//! Main client implementation

use std::fmt;
use std::path::Path;
use std::sync::{Arc, PoisonError, RwLock};

use http::{HeaderMap, Method};
use serde::Serialize;
use serde::de::DeserializeOwned;
use tokio::sync::OnceCell;
use tracing::trace;
use url::Url;

use crate::config::ClientConfig;
use crate::credential::{AccessToken, CredentialSlot};
use crate::error::{Error, Result};
use crate::http::middleware::{ACCESS_TOKEN, LOG, RETRY};
use crate::http::request::parse_header;
use crate::http::{
    AccessTokenMiddleware, HttpLogger, LoggingMiddleware, MessageFormatter, Middleware,
    MiddlewareStack, MultipartBuilder, PostBody, ReqwestTransport, Request, RequestOptions,
    Response, RetryMiddleware, TracingLogger, Transport,
};
use crate::normalize::{Normalized, normalize, remove_control_characters};

/// Client for a token-authenticated platform API.
///
/// Every call goes through the same pipeline: the refresh-and-retry
/// middleware, access token injection, logging, then the transport.
/// Cloning is cheap and clones share the credential, the transport and
/// the middleware stack.
///
/// # Example
///
/// ```rust,no_run
/// use std::sync::Arc;
/// use wechat_http::{Client, ClientConfig, StaticAccessToken};
///
/// # async fn example() -> wechat_http::Result<()> {
/// let client = Client::builder()
///     .config(ClientConfig::builder().base_url("https://api.weixin.qq.com").build())
///     .access_token(Arc::new(StaticAccessToken::new("ACCESS_TOKEN")))
///     .build()?;
///
/// let user = client.get("cgi-bin/user/info", [("openid", "o-1")]).await?;
/// println!("{:?}", user.get("nickname"));
/// # Ok(())
/// # }
/// ```
#[derive(Clone)]
pub struct Client {
    inner: Arc<ClientInner>,
}

struct ClientInner {
    config: ClientConfig,
    base_url: Option<Url>,
    default_headers: HeaderMap,
    credential: CredentialSlot,
    /// Created on first use unless supplied to the builder
    transport: OnceCell<Arc<dyn Transport>>,
    http_client: Option<reqwest::Client>,
    middlewares: RwLock<MiddlewareStack>,
}

impl fmt::Debug for Client {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Client")
            .field("config", &self.inner.config)
            .field("has_access_token", &self.inner.credential.get().is_some())
            .field("middlewares", &self.middleware_names())
            .finish()
    }
}

impl Client {
    /// Create a client from a configuration object.
    ///
    /// # Errors
    ///
    /// Returns an error if the base URL or a default header is invalid.
    pub fn new(config: ClientConfig) -> Result<Self> {
        Self::builder().config(config).build()
    }

    /// Create a new client builder for advanced configuration.
    pub fn builder() -> ClientBuilder {
        ClientBuilder::default()
    }

    /// The configuration this client was built with.
    pub fn config(&self) -> &ClientConfig {
        &self.inner.config
    }

    /// Send a GET request with `query` and normalize the response.
    pub async fn get<I, K, V>(&self, url: &str, query: I) -> Result<Normalized>
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        self.request(url, Method::GET, RequestOptions::new().query(query))
            .await
    }

    /// Send a POST request.
    ///
    /// Pair lists and maps are sent form-encoded; strings are sent verbatim.
    pub async fn post(&self, url: &str, data: impl Into<PostBody>) -> Result<Normalized> {
        let body: PostBody = data.into();
        let options = RequestOptions {
            body: body.into(),
            ..RequestOptions::new()
        };
        self.request(url, Method::POST, options).await
    }

    /// Send `data` as a JSON body with `query` appended to the URL.
    pub async fn post_json<T, I, K, V>(&self, url: &str, data: &T, query: I) -> Result<Normalized>
    where
        T: Serialize + ?Sized,
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        let options = RequestOptions::new()
            .query(query)
            .json(serde_json::to_value(data)?);
        self.request(url, Method::POST, options).await
    }

    /// Upload files as a multipart body.
    ///
    /// Each `(name, path)` in `files` becomes a file part and each
    /// `(name, value)` in `form` an inline part.
    ///
    /// # Errors
    ///
    /// Returns [`Error::FileOpen`] before anything is sent if a file cannot
    /// be opened for reading.
    pub async fn upload<F, FK, P, M, MK, MV, Q, QK, QV>(
        &self,
        url: &str,
        files: F,
        form: M,
        query: Q,
    ) -> Result<Normalized>
    where
        F: IntoIterator<Item = (FK, P)>,
        FK: Into<String>,
        P: AsRef<Path>,
        M: IntoIterator<Item = (MK, MV)>,
        MK: Into<String>,
        MV: Into<String>,
        Q: IntoIterator<Item = (QK, QV)>,
        QK: Into<String>,
        QV: Into<String>,
    {
        let mut multipart = MultipartBuilder::new();
        for (name, path) in files {
            multipart = multipart.file(name, path).await?;
        }
        for (name, value) in form {
            multipart = multipart.text(name, value);
        }

        let options = RequestOptions::new()
            .query(query)
            .multipart(multipart.build());
        self.request(url, Method::POST, options).await
    }

    /// Send a request and normalize the response into the configured shape.
    pub async fn request(
        &self,
        url: &str,
        method: Method,
        options: RequestOptions,
    ) -> Result<Normalized> {
        let response = self.request_raw(url, method, options).await?;
        normalize(response, self.inner.config.response_type)
    }

    /// Send a request and deserialize the body into `T`.
    pub async fn request_as<T: DeserializeOwned>(
        &self,
        url: &str,
        method: Method,
        options: RequestOptions,
    ) -> Result<T> {
        let response = self.request_raw(url, method, options).await?;
        let text = remove_control_characters(&response.text()?);
        Ok(serde_json::from_str(&text)?)
    }

    /// Send a request through the pipeline and return the response as received.
    pub async fn request_raw(
        &self,
        url: &str,
        method: Method,
        options: RequestOptions,
    ) -> Result<Response> {
        let mut request = Request::from_options(method, self.resolve_url(url)?, options);
        for (name, value) in &self.inner.default_headers {
            if !request.headers().contains_key(name) {
                request.headers_mut().insert(name.clone(), value.clone());
            }
        }

        let transport = self.http_client().await?;
        let stack = self.middleware_stack();
        trace!(method = %request.method(), url = %request.url(), middlewares = stack.len(), "dispatching request");
        stack.execute(request, transport.as_ref()).await
    }

    /// The current access token, if any.
    pub fn access_token(&self) -> Option<Arc<dyn AccessToken>> {
        self.inner.credential.get()
    }

    /// Replace the access token. Requests already past injection keep the
    /// token they were sent with.
    pub fn set_access_token(&self, token: Arc<dyn AccessToken>) -> &Self {
        self.inner.credential.set(Some(token));
        self
    }

    /// Drop the access token; later requests are sent without one.
    pub fn clear_access_token(&self) -> &Self {
        self.inner.credential.set(None);
        self
    }

    /// The transport, created on first use.
    ///
    /// # Errors
    ///
    /// Returns [`Error::HttpClient`] if the default HTTP client cannot be built.
    pub async fn http_client(&self) -> Result<Arc<dyn Transport>> {
        let inner = &self.inner;
        inner
            .transport
            .get_or_try_init(|| async move {
                let timeout = inner.config.timeout();
                let transport = match &inner.http_client {
                    Some(client) => ReqwestTransport::with_client(client.clone(), timeout),
                    None => ReqwestTransport::new(timeout)?,
                };
                Ok::<_, Error>(Arc::new(transport) as Arc<dyn Transport>)
            })
            .await
            .cloned()
    }

    /// Add a middleware at the inner end of the stack, replacing any entry
    /// with the same name.
    pub fn push_middleware(&self, name: impl Into<String>, middleware: Arc<dyn Middleware>) {
        self.with_stack(|stack| stack.push(name, middleware));
    }

    /// Insert a middleware right outside the entry called `before`.
    pub fn insert_middleware_before(
        &self,
        before: &str,
        name: impl Into<String>,
        middleware: Arc<dyn Middleware>,
    ) {
        self.with_stack(|stack| stack.insert_before(before, name, middleware));
    }

    /// Replace the middleware called `name`. Returns `false` if there is none.
    pub fn replace_middleware(&self, name: &str, middleware: Arc<dyn Middleware>) -> bool {
        self.with_stack(|stack| stack.replace(name, middleware))
    }

    /// Remove the middleware called `name`.
    pub fn remove_middleware(&self, name: &str) -> Option<Arc<dyn Middleware>> {
        self.with_stack(|stack| stack.remove(name))
    }

    /// Registered middleware names, outermost first.
    pub fn middleware_names(&self) -> Vec<String> {
        self.inner
            .middlewares
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .names()
            .into_iter()
            .map(String::from)
            .collect()
    }

    fn with_stack<R>(&self, f: impl FnOnce(&mut MiddlewareStack) -> R) -> R {
        let mut stack = self
            .inner
            .middlewares
            .write()
            .unwrap_or_else(PoisonError::into_inner);
        f(&mut stack)
    }

    /// Snapshot of the stack; changes apply to requests started afterwards.
    fn middleware_stack(&self) -> MiddlewareStack {
        self.inner
            .middlewares
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    fn resolve_url(&self, url: &str) -> Result<Url> {
        match Url::parse(url) {
            Ok(url) => Ok(url),
            Err(url::ParseError::RelativeUrlWithoutBase) => match &self.inner.base_url {
                Some(base) => base
                    .join(url.trim_start_matches('/'))
                    .map_err(|e| Error::InvalidUrl(format!("'{}': {}", url, e))),
                None => Err(Error::InvalidUrl(format!(
                    "'{}' is relative and no base URL is configured",
                    url
                ))),
            },
            Err(e) => Err(Error::InvalidUrl(format!("'{}': {}", url, e))),
        }
    }
}

/// Builder for [`Client`].
#[derive(Debug, Default)]
pub struct ClientBuilder {
    config: ClientConfig,
    access_token: Option<Arc<dyn AccessToken>>,
    transport: Option<Arc<dyn Transport>>,
    http_client: Option<reqwest::Client>,
    logger: Option<Arc<dyn HttpLogger>>,
}

impl ClientBuilder {
    /// Use this configuration.
    pub fn config(mut self, config: ClientConfig) -> Self {
        self.config = config;
        self
    }

    /// Set the initial access token.
    pub fn access_token(mut self, token: Arc<dyn AccessToken>) -> Self {
        self.access_token = Some(token);
        self
    }

    /// Use a custom transport instead of the reqwest one.
    pub fn transport(mut self, transport: Arc<dyn Transport>) -> Self {
        self.transport = Some(transport);
        self
    }

    /// Reuse an existing reqwest client for the default transport.
    pub fn http_client(mut self, client: reqwest::Client) -> Self {
        self.http_client = Some(client);
        self
    }

    /// Send request logs to `logger` instead of `tracing`.
    pub fn logger(mut self, logger: Arc<dyn HttpLogger>) -> Self {
        self.logger = Some(logger);
        self
    }

    /// Build the client.
    ///
    /// # Errors
    ///
    /// Returns an error if the base URL is not an absolute http(s) URL or a
    /// default header is invalid.
    pub fn build(self) -> Result<Client> {
        let base_url = self
            .config
            .http
            .base_url
            .as_deref()
            .map(parse_base_url)
            .transpose()?;

        let mut default_headers = HeaderMap::new();
        for (key, value) in &self.config.default_headers {
            let (name, value) = parse_header(key, value)?;
            default_headers.insert(name, value);
        }

        let credential = CredentialSlot::new();
        credential.set(self.access_token);

        let logger = self.logger.unwrap_or_else(|| Arc::new(TracingLogger));
        let mut middlewares = MiddlewareStack::new();
        middlewares.push(
            RETRY,
            Arc::new(RetryMiddleware::new(
                self.config.retry_policy(),
                credential.clone(),
            )),
        );
        middlewares.push(
            ACCESS_TOKEN,
            Arc::new(AccessTokenMiddleware::new(credential.clone())),
        );
        middlewares.push(
            LOG,
            Arc::new(LoggingMiddleware::new(
                logger,
                MessageFormatter::new(self.config.http.log_template.clone()),
            )),
        );

        Ok(Client {
            inner: Arc::new(ClientInner {
                config: self.config,
                base_url,
                default_headers,
                credential,
                transport: OnceCell::new_with(self.transport),
                http_client: self.http_client,
                middlewares: RwLock::new(middlewares),
            }),
        })
    }
}

fn parse_base_url(raw: &str) -> Result<Url> {
    let mut url = Url::parse(raw).map_err(|e| Error::InvalidUrl(format!("'{}': {}", raw, e)))?;
    if !matches!(url.scheme(), "http" | "https") {
        return Err(Error::InvalidUrl(format!(
            "'{}': base URL must use http or https",
            raw
        )));
    }
    // Without a trailing slash `join` would drop the last path segment.
    if !url.path().ends_with('/') {
        let path = format!("{}/", url.path());
        url.set_path(&path);
    }
    Ok(url)
}

//! Configuration for the client

use std::collections::BTreeMap;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::http::logging::DEBUG_TEMPLATE;
use crate::http::retry::{DEFAULT_RETRIES, DEFAULT_RETRY_DELAY_MS};
use crate::http::RetryPolicy;
use crate::normalize::ResponseType;

/// Default transport timeout in seconds.
pub const DEFAULT_TIMEOUT_SECS: u64 = 30;

/// Configuration for the client.
///
/// Deserializes from any serde format; missing keys take their defaults.
///
/// ```
/// use wechat_http::{ClientConfig, ResponseType};
///
/// let config: ClientConfig = serde_json::from_str(
///     r#"{"response_type": "collection", "http": {"retries": 2, "retry_delay": -200}}"#,
/// ).unwrap();
/// assert_eq!(config.response_type, ResponseType::Collection);
/// assert_eq!(config.retry_policy().delay_for(1).as_millis(), 200);
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClientConfig {
    /// Shape returned by `Client::request`
    pub response_type: ResponseType,

    /// Transport and pipeline settings
    pub http: HttpConfig,

    /// Headers attached to every request
    pub default_headers: BTreeMap<String, String>,
}

/// HTTP settings nested under `http`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct HttpConfig {
    /// Maximum number of refresh-and-retry cycles per call
    pub retries: u32,

    /// Delay unit in milliseconds; the sign is ignored
    pub retry_delay: i64,

    /// Logging template
    pub log_template: String,

    /// Transport timeout in seconds
    pub timeout: u64,

    /// Base URL that relative request URLs are resolved against
    pub base_url: Option<String>,
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            retries: DEFAULT_RETRIES,
            retry_delay: DEFAULT_RETRY_DELAY_MS,
            log_template: DEBUG_TEMPLATE.to_string(),
            timeout: DEFAULT_TIMEOUT_SECS,
            base_url: None,
        }
    }
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            response_type: ResponseType::default(),
            http: HttpConfig::default(),
            default_headers: BTreeMap::new(),
        }
    }
}

impl ClientConfig {
    /// Start a builder.
    pub fn builder() -> ClientConfigBuilder {
        ClientConfigBuilder::new()
    }

    /// Load configuration from environment variables (and a `.env` file
    /// when present).
    ///
    /// This will look for:
    /// - `WECHAT_HTTP_RESPONSE_TYPE`: raw, array, collection, object or string
    /// - `WECHAT_HTTP_RETRIES`: maximum retries
    /// - `WECHAT_HTTP_RETRY_DELAY`: delay unit in milliseconds
    /// - `WECHAT_HTTP_LOG_TEMPLATE`: logging template
    /// - `WECHAT_HTTP_TIMEOUT`: timeout in seconds
    /// - `WECHAT_HTTP_BASE_URL`: base URL
    ///
    /// # Errors
    ///
    /// Returns [`crate::Error::Config`] if a variable is set to an
    /// unparseable value.
    #[cfg(feature = "env")]
    pub fn from_env() -> crate::Result<Self> {
        use std::env;

        dotenvy::dotenv().ok();

        let mut config = Self::default();

        if let Ok(response_type) = env::var("WECHAT_HTTP_RESPONSE_TYPE") {
            config.response_type = response_type.parse()?;
        }
        if let Ok(retries) = env::var("WECHAT_HTTP_RETRIES") {
            config.http.retries = parse_env("WECHAT_HTTP_RETRIES", &retries)?;
        }
        if let Ok(delay) = env::var("WECHAT_HTTP_RETRY_DELAY") {
            config.http.retry_delay = parse_env("WECHAT_HTTP_RETRY_DELAY", &delay)?;
        }
        if let Ok(template) = env::var("WECHAT_HTTP_LOG_TEMPLATE") {
            config.http.log_template = template;
        }
        if let Ok(timeout) = env::var("WECHAT_HTTP_TIMEOUT") {
            config.http.timeout = parse_env("WECHAT_HTTP_TIMEOUT", &timeout)?;
        }
        if let Ok(base_url) = env::var("WECHAT_HTTP_BASE_URL") {
            config.http.base_url = Some(base_url);
        }

        Ok(config)
    }

    /// Merge this configuration with another, with the other taking
    /// precedence wherever it differs from the defaults.
    pub fn merge(mut self, other: ClientConfig) -> Self {
        let defaults = HttpConfig::default();

        if other.response_type != ResponseType::default() {
            self.response_type = other.response_type;
        }
        if other.http.retries != defaults.retries {
            self.http.retries = other.http.retries;
        }
        if other.http.retry_delay != defaults.retry_delay {
            self.http.retry_delay = other.http.retry_delay;
        }
        if other.http.log_template != defaults.log_template {
            self.http.log_template = other.http.log_template;
        }
        if other.http.timeout != defaults.timeout {
            self.http.timeout = other.http.timeout;
        }
        if other.http.base_url.is_some() {
            self.http.base_url = other.http.base_url;
        }
        self.default_headers.extend(other.default_headers);

        self
    }

    /// Retry policy described by `http.retries` and `http.retry_delay`.
    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy::new(self.http.retries, self.http.retry_delay)
    }

    /// Transport timeout.
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.http.timeout)
    }
}

#[cfg(feature = "env")]
fn parse_env<T: std::str::FromStr>(name: &str, value: &str) -> crate::Result<T>
where
    T::Err: std::fmt::Display,
{
    value
        .trim()
        .parse()
        .map_err(|e| crate::Error::Config(format!("{}='{}': {}", name, value, e)))
}

/// Builder for creating ClientConfig with a fluent API.
#[derive(Debug, Default)]
pub struct ClientConfigBuilder {
    config: ClientConfig,
}

impl ClientConfigBuilder {
    /// Create a new builder.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the response type.
    pub fn response_type(mut self, response_type: ResponseType) -> Self {
        self.config.response_type = response_type;
        self
    }

    /// Set the maximum number of retries.
    pub fn retries(mut self, retries: u32) -> Self {
        self.config.http.retries = retries;
        self
    }

    /// Set the retry delay unit in milliseconds.
    pub fn retry_delay(mut self, millis: i64) -> Self {
        self.config.http.retry_delay = millis;
        self
    }

    /// Set the logging template.
    pub fn log_template(mut self, template: impl Into<String>) -> Self {
        self.config.http.log_template = template.into();
        self
    }

    /// Set the timeout, rounded down to whole seconds.
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.config.http.timeout = timeout.as_secs();
        self
    }

    /// Set the base URL.
    pub fn base_url(mut self, base_url: impl Into<String>) -> Self {
        self.config.http.base_url = Some(base_url.into());
        self
    }

    /// Add a default header.
    ///
    /// # Errors
    ///
    /// Returns an error if the header name or value is invalid according to HTTP specifications.
    pub fn default_header(
        mut self,
        key: impl Into<String>,
        value: impl Into<String>,
    ) -> crate::Result<Self> {
        let key = key.into();
        let value = value.into();
        crate::http::request::parse_header(&key, &value)?;
        self.config.default_headers.insert(key, value);
        Ok(self)
    }

    /// Build the configuration.
    pub fn build(self) -> ClientConfig {
        self.config
    }
}

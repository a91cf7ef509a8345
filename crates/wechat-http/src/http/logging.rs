//! Request/response logging middleware
//!
//! Every exchange is rendered through a [`MessageFormatter`] template and
//! handed to an injected [`HttpLogger`]. The default logger forwards to
//! `tracing`; the application decides where that ends up.
//!
//! Supported placeholders:
//!
//! | placeholder | value |
//! |---|---|
//! | `{request}` / `{response}` | full HTTP message |
//! | `{method}` `{uri}` `{url}` `{target}` `{host}` `{version}` | request line parts |
//! | `{code}` `{phrase}` | response status |
//! | `{req_headers}` `{res_headers}` | start line plus headers |
//! | `{req_body}` `{res_body}` | bodies |
//! | `{req_header_<name>}` `{res_header_<name>}` | a single header |
//! | `{error}` | transport or pipeline error |
//! | `{ts}` `{date_iso_8601}` `{date_common_log}` | current time |
//!
//! Unknown placeholders render as an empty string.

use std::fmt;
use std::sync::{Arc, LazyLock};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use http::HeaderMap;
use regex::{Captures, Regex};
use tracing::{debug, warn};

use super::middleware::{Middleware, Next};
use super::request::{PartSource, RequestBody};
use super::{Request, Response};
use crate::error::{Error, Result};

/// Verbose template showing both full messages and any error.
pub const DEBUG_TEMPLATE: &str = ">>>>>>>>\n{request}\n<<<<<<<<\n{response}\n--------\n{error}";

/// One-line template.
pub const SHORT_TEMPLATE: &str = "[{ts}] \"{method} {target} HTTP/{version}\" {code}";

/// Apache common log format.
pub const CLF_TEMPLATE: &str = "{host} {req_header_User-Agent} - [{date_common_log}] \"{method} {target} HTTP/{version}\" {code} {res_header_Content-Length}";

static PLACEHOLDER: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\{\s*([A-Za-z0-9_.\-]+)\s*\}").expect("placeholder pattern is valid")
});

/// Renders one request/response exchange through a template.
#[derive(Debug, Clone)]
pub struct MessageFormatter {
    template: String,
}

impl Default for MessageFormatter {
    fn default() -> Self {
        Self::new(DEBUG_TEMPLATE)
    }
}

impl MessageFormatter {
    /// Create a formatter for `template`.
    pub fn new(template: impl Into<String>) -> Self {
        Self {
            template: template.into(),
        }
    }

    /// The template in use.
    pub fn template(&self) -> &str {
        &self.template
    }

    /// Render the template.
    pub fn format(
        &self,
        request: &Request,
        response: Option<&Response>,
        error: Option<&Error>,
    ) -> String {
        PLACEHOLDER
            .replace_all(&self.template, |caps: &Captures<'_>| {
                render(&caps[1], request, response, error)
            })
            .into_owned()
    }
}

fn render(
    placeholder: &str,
    request: &Request,
    response: Option<&Response>,
    error: Option<&Error>,
) -> String {
    let now = chrono::Local::now();
    match placeholder {
        "request" => request_message(request),
        "response" => response.map(response_message).unwrap_or_default(),
        "req_headers" => format!(
            "{}\r\n{}",
            request_line(request),
            header_lines(&request_headers(request))
        ),
        "res_headers" => response
            .map(|r| format!("{}\r\n{}", status_line(r), header_lines(r.headers())))
            .unwrap_or_else(|| "NULL".to_string()),
        "req_body" => request_body(request.body()),
        "res_body" => response.map(Response::text_lossy).unwrap_or_else(|| "NULL".to_string()),
        "method" => request.method().to_string(),
        "uri" | "url" => request.full_url().to_string(),
        "target" => target(request),
        "host" | "hostname" => request.url().host_str().unwrap_or_default().to_string(),
        "version" | "req_version" | "res_version" => "1.1".to_string(),
        "code" => response
            .map(|r| r.status().as_u16().to_string())
            .unwrap_or_else(|| "NULL".to_string()),
        "phrase" => response
            .and_then(|r| r.status().canonical_reason())
            .unwrap_or_default()
            .to_string(),
        "error" => error.map(|e| e.to_string()).unwrap_or_else(|| "NULL".to_string()),
        "ts" | "date_iso_8601" => now.to_rfc3339(),
        "date_common_log" => now.format("%d/%b/%Y:%H:%M:%S %z").to_string(),
        other => {
            if let Some(name) = other.strip_prefix("req_header_") {
                header_value(&request_headers(request), name)
            } else if let Some(name) = other.strip_prefix("res_header_") {
                response
                    .map(|r| header_value(r.headers(), name))
                    .unwrap_or_default()
            } else {
                String::new()
            }
        }
    }
}

fn target(request: &Request) -> String {
    let url = request.full_url();
    match url.query() {
        Some(query) => format!("{}?{}", url.path(), query),
        None => url.path().to_string(),
    }
}

fn request_line(request: &Request) -> String {
    format!("{} {} HTTP/1.1", request.method(), target(request))
}

fn status_line(response: &Response) -> String {
    format!(
        "HTTP/1.1 {} {}",
        response.status().as_u16(),
        response.status().canonical_reason().unwrap_or_default()
    )
}

/// Request headers plus `Host`, which the transport adds on the wire.
fn request_headers(request: &Request) -> HeaderMap {
    let mut headers = request.headers().clone();
    if !headers.contains_key(http::header::HOST)
        && let Some(host) = request.url().host_str()
        && let Ok(value) = host.parse()
    {
        headers.insert(http::header::HOST, value);
    }
    headers
}

fn header_lines(headers: &HeaderMap) -> String {
    headers
        .iter()
        .map(|(name, value)| {
            format!(
                "{}: {}\r\n",
                name,
                String::from_utf8_lossy(value.as_bytes())
            )
        })
        .collect()
}

fn header_value(headers: &HeaderMap, name: &str) -> String {
    headers
        .get_all(name.to_ascii_lowercase().as_str())
        .iter()
        .map(|v| String::from_utf8_lossy(v.as_bytes()).into_owned())
        .collect::<Vec<_>>()
        .join(", ")
}

fn request_body(body: &RequestBody) -> String {
    match body {
        RequestBody::Empty => String::new(),
        RequestBody::Form(pairs) => url::form_urlencoded::Serializer::new(String::new())
            .extend_pairs(pairs.iter())
            .finish(),
        RequestBody::Raw(raw) => raw.clone(),
        RequestBody::Json(value) => value.to_string(),
        RequestBody::Multipart(parts) => parts
            .iter()
            .map(|part| match &part.source {
                PartSource::File(path) => format!("{}=@{}", part.name, path.display()),
                PartSource::Inline(value) => format!("{}={}", part.name, value),
            })
            .collect::<Vec<_>>()
            .join("; "),
    }
}

fn request_message(request: &Request) -> String {
    format!(
        "{}\r\n{}\r\n{}",
        request_line(request),
        header_lines(&request_headers(request)),
        request_body(request.body())
    )
}

fn response_message(response: &Response) -> String {
    format!(
        "{}\r\n{}\r\n{}",
        status_line(response),
        header_lines(response.headers()),
        response.text_lossy()
    )
}

/// One formatted log line plus the structured facts behind it.
#[derive(Debug, Clone)]
pub struct LogRecord {
    /// Rendered template
    pub message: String,
    /// Request method
    pub method: String,
    /// Request URL including query
    pub url: String,
    /// Response status, if a response arrived
    pub status: Option<u16>,
    /// Whether the exchange failed (no response or 4xx/5xx)
    pub failed: bool,
    /// Time spent in the inner chain
    pub elapsed: Duration,
}

/// Sink for formatted request logs.
pub trait HttpLogger: Send + Sync + fmt::Debug {
    /// Record one exchange.
    fn log(&self, record: &LogRecord);
}

/// Logger forwarding to `tracing`: debug for successes, warn for failures.
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingLogger;

impl HttpLogger for TracingLogger {
    fn log(&self, record: &LogRecord) {
        if record.failed {
            warn!(
                method = %record.method,
                url = %record.url,
                status = record.status,
                elapsed_ms = record.elapsed.as_millis() as u64,
                "{}",
                record.message
            );
        } else {
            debug!(
                method = %record.method,
                url = %record.url,
                status = record.status,
                elapsed_ms = record.elapsed.as_millis() as u64,
                "{}",
                record.message
            );
        }
    }
}

/// Middleware that logs every request it forwards and its outcome.
#[derive(Debug, Clone)]
pub struct LoggingMiddleware {
    logger: Arc<dyn HttpLogger>,
    formatter: MessageFormatter,
}

impl LoggingMiddleware {
    /// Create the middleware with an injected logger and formatter.
    pub fn new(logger: Arc<dyn HttpLogger>, formatter: MessageFormatter) -> Self {
        Self { logger, formatter }
    }

    /// Log through `tracing` with the verbose template.
    pub fn tracing() -> Self {
        Self::new(Arc::new(TracingLogger), MessageFormatter::default())
    }
}

#[async_trait]
impl Middleware for LoggingMiddleware {
    async fn handle(&self, request: Request, next: Next<'_>) -> Result<Response> {
        let start = Instant::now();
        let outcome = next.run(request.clone()).await;

        let (response, error) = match &outcome {
            Ok(response) => (Some(response), None),
            Err(error) => (None, Some(error)),
        };

        self.logger.log(&LogRecord {
            message: self.formatter.format(&request, response, error),
            method: request.method().to_string(),
            url: request.full_url().to_string(),
            status: response.map(|r| r.status().as_u16()),
            failed: response.is_none_or(Response::is_error),
            elapsed: start.elapsed(),
        });

        outcome
    }
}

//! HTTP layer: request model, transport and the middleware pipeline.

pub mod auth;
pub mod logging;
pub mod middleware;
pub mod request;
pub mod response;
pub mod retry;
pub mod transport;

pub use auth::AccessTokenMiddleware;
pub use logging::{HttpLogger, LogRecord, LoggingMiddleware, MessageFormatter, TracingLogger};
pub use middleware::{Middleware, MiddlewareStack, Next};
pub use request::{
    MultipartBuilder, MultipartPart, Pairs, PartSource, PostBody, Request, RequestBody,
    RequestOptions, pairs,
};
pub use response::Response;
pub use retry::{RetryMiddleware, RetryPolicy, RetryState};
pub use transport::{ReqwestTransport, Transport};

// Re-export common HTTP types
pub use http::{HeaderMap, HeaderName, HeaderValue, Method, StatusCode};

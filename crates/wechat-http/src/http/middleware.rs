//! HTTP middleware for request/response processing
//!
//! Middleware wrap the transport in onion order: the first entry of a
//! [`MiddlewareStack`] is outermost and sees the request first and the
//! response last. Each middleware receives a [`Next`] handle and decides
//! whether, and how many times, to call the rest of the chain.

use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;

use super::{Request, Response, Transport};
use crate::error::Result;

/// Name of the refresh-and-retry middleware.
pub const RETRY: &str = "retry";
/// Name of the access token injection middleware.
pub const ACCESS_TOKEN: &str = "access_token";
/// Name of the request/response logging middleware.
pub const LOG: &str = "log";

/// Trait for HTTP middleware.
#[async_trait]
pub trait Middleware: Send + Sync {
    /// Handle a request, usually by forwarding it to `next`.
    async fn handle(&self, request: Request, next: Next<'_>) -> Result<Response>;
}

/// The remainder of the chain after the current middleware.
///
/// `Next` is `Copy`, so a middleware can call [`Next::run`] more than once.
#[derive(Clone, Copy)]
pub struct Next<'a> {
    middlewares: &'a [(String, Arc<dyn Middleware>)],
    transport: &'a dyn Transport,
}

impl<'a> Next<'a> {
    pub(crate) fn new(
        middlewares: &'a [(String, Arc<dyn Middleware>)],
        transport: &'a dyn Transport,
    ) -> Self {
        Self {
            middlewares,
            transport,
        }
    }

    /// Run the rest of the chain, ending in the transport.
    pub async fn run(self, request: Request) -> Result<Response> {
        match self.middlewares.split_first() {
            Some(((_, current), rest)) => {
                current
                    .handle(request, Next::new(rest, self.transport))
                    .await
            }
            None => self.transport.send(request).await,
        }
    }
}

/// Ordered, named list of middleware.
#[derive(Clone, Default)]
pub struct MiddlewareStack {
    middlewares: Vec<(String, Arc<dyn Middleware>)>,
}

impl fmt::Debug for MiddlewareStack {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_list().entries(self.names()).finish()
    }
}

impl MiddlewareStack {
    /// Create a new middleware stack.
    pub fn new() -> Self {
        Self {
            middlewares: Vec::new(),
        }
    }

    /// Add a middleware to the inner end of the stack.
    ///
    /// An existing entry with the same name is removed first.
    pub fn push(&mut self, name: impl Into<String>, middleware: Arc<dyn Middleware>) {
        let name = name.into();
        self.remove(&name);
        self.middlewares.push((name, middleware));
    }

    /// Insert a middleware right outside the entry called `before`, or at
    /// the inner end when there is no such entry.
    pub fn insert_before(
        &mut self,
        before: &str,
        name: impl Into<String>,
        middleware: Arc<dyn Middleware>,
    ) {
        let name = name.into();
        self.remove(&name);
        match self.position(before) {
            Some(index) => self.middlewares.insert(index, (name, middleware)),
            None => self.middlewares.push((name, middleware)),
        }
    }

    /// Replace the middleware called `name` in place. Returns `false` if it
    /// was not registered.
    pub fn replace(&mut self, name: &str, middleware: Arc<dyn Middleware>) -> bool {
        match self.position(name) {
            Some(index) => {
                self.middlewares[index].1 = middleware;
                true
            }
            None => false,
        }
    }

    /// Remove the middleware called `name`.
    pub fn remove(&mut self, name: &str) -> Option<Arc<dyn Middleware>> {
        self.position(name)
            .map(|index| self.middlewares.remove(index).1)
    }

    /// Registered names, outermost first.
    pub fn names(&self) -> Vec<&str> {
        self.middlewares.iter().map(|(n, _)| n.as_str()).collect()
    }

    /// Number of registered middleware.
    pub fn len(&self) -> usize {
        self.middlewares.len()
    }

    /// Whether the stack is empty.
    pub fn is_empty(&self) -> bool {
        self.middlewares.is_empty()
    }

    fn position(&self, name: &str) -> Option<usize> {
        self.middlewares.iter().position(|(n, _)| n == name)
    }

    /// Send `request` through every middleware and then `transport`.
    pub async fn execute(&self, request: Request, transport: &dyn Transport) -> Result<Response> {
        Next::new(&self.middlewares, transport).run(request).await
    }
}

//! Access token injection middleware

use async_trait::async_trait;

use super::middleware::{Middleware, Next};
use super::{Request, Response};
use crate::credential::CredentialSlot;
use crate::error::Result;

/// Applies the held credential to every request passing through.
///
/// With an empty slot the request is forwarded untouched.
#[derive(Debug, Clone)]
pub struct AccessTokenMiddleware {
    credential: CredentialSlot,
}

impl AccessTokenMiddleware {
    /// Create the middleware over a shared credential slot.
    pub fn new(credential: CredentialSlot) -> Self {
        Self { credential }
    }
}

#[async_trait]
impl Middleware for AccessTokenMiddleware {
    async fn handle(&self, request: Request, next: Next<'_>) -> Result<Response> {
        let request = match self.credential.get() {
            Some(token) => token.apply_to_request(request).await?,
            None => request,
        };
        next.run(request).await
    }
}

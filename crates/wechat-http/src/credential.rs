//! Access token capability
//!
//! Storage and fetching of tokens live outside this crate. The client only
//! needs three things from a credential: the current token, a rule for
//! attaching it to a request, and a way to force a refresh.

use std::fmt;
use std::sync::{Arc, PoisonError, RwLock};

use async_trait::async_trait;
use secrecy::{ExposeSecret, SecretString};

use crate::error::Result;
use crate::http::Request;

/// Query parameter used by the default application rule.
pub const ACCESS_TOKEN_QUERY_KEY: &str = "access_token";

/// A shared, refreshable access token.
///
/// Implementations must tolerate concurrent `refresh` calls from requests
/// running in parallel; replacing the token twice is harmless.
///
/// Implementations built on `anyhow` can return their errors with `?`; they
/// arrive as [`Error::Other`](crate::Error::Other).
#[async_trait]
pub trait AccessToken: Send + Sync + fmt::Debug {
    /// Return the current token, fetching one if none is cached.
    async fn token(&self) -> Result<String>;

    /// Attach the token to an outgoing request.
    ///
    /// The default rule sets the `access_token` query parameter. The held
    /// token wins: any `access_token` the caller put in the URL or query is
    /// dropped.
    async fn apply_to_request(&self, request: Request) -> Result<Request> {
        let token = self.token().await?;
        Ok(request.replace_query(ACCESS_TOKEN_QUERY_KEY, token))
    }

    /// Discard the current token and obtain a new one.
    async fn refresh(&self) -> Result<()>;
}

/// A fixed token managed elsewhere. `refresh` is a no-op.
pub struct StaticAccessToken {
    token: SecretString,
}

impl StaticAccessToken {
    /// Wrap a token string.
    pub fn new(token: impl Into<String>) -> Self {
        Self {
            token: SecretString::new(token.into().into_boxed_str()),
        }
    }
}

impl fmt::Debug for StaticAccessToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StaticAccessToken")
            .field("token", &"[REDACTED]")
            .finish()
    }
}

#[async_trait]
impl AccessToken for StaticAccessToken {
    async fn token(&self) -> Result<String> {
        Ok(self.token.expose_secret().to_string())
    }

    async fn refresh(&self) -> Result<()> {
        tracing::debug!("static access token cannot be refreshed, keeping current value");
        Ok(())
    }
}

/// Slot holding the credential shared by a client and its middleware.
///
/// Replacing the credential only affects requests that have not yet passed
/// the access token middleware.
#[derive(Debug, Clone, Default)]
pub struct CredentialSlot {
    inner: Arc<RwLock<Option<Arc<dyn AccessToken>>>>,
}

impl CredentialSlot {
    /// An empty slot.
    pub fn new() -> Self {
        Self::default()
    }

    /// A slot holding `token`.
    pub fn with_token(token: Arc<dyn AccessToken>) -> Self {
        let slot = Self::new();
        slot.set(Some(token));
        slot
    }

    /// Current credential, if any.
    pub fn get(&self) -> Option<Arc<dyn AccessToken>> {
        self.inner
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Replace (or clear) the credential.
    pub fn set(&self, token: Option<Arc<dyn AccessToken>>) {
        *self.inner.write().unwrap_or_else(PoisonError::into_inner) = token;
    }
}

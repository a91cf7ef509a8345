//! # wechat-http
//!
//! HTTP client core for platform APIs that authenticate with an
//! `access_token` query parameter and report failures as `errcode` in the
//! JSON body:
//! - Access token injection through a pluggable credential
//! - Transparent refresh-and-retry on expired or invalid tokens
//! - Template-based request/response logging via `tracing`
//! - Response normalization (map, collection, JSON value, text or raw)
//! - Named, replaceable middleware
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use wechat_http::{Client, ClientConfig, StaticAccessToken};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let client = Client::builder()
//!         .config(ClientConfig::builder().base_url("https://api.weixin.qq.com").build())
//!         .access_token(Arc::new(StaticAccessToken::new("ACCESS_TOKEN")))
//!         .build()?;
//!
//!     let result = client
//!         .post_json("cgi-bin/message/custom/send", &serde_json::json!({
//!             "touser": "OPENID",
//!             "msgtype": "text",
//!             "text": { "content": "Hello" }
//!         }), wechat_http::http::Pairs::new())
//!         .await?;
//!
//!     println!("{:?}", result.get("errmsg"));
//!     Ok(())
//! }
//! ```

#![warn(missing_docs)]
#![deny(unsafe_code)]
#![cfg_attr(docsrs, feature(doc_cfg))]

// Re-export commonly used types
pub use client::{Client, ClientBuilder};
pub use config::{ClientConfig, ClientConfigBuilder, HttpConfig};
pub use credential::{AccessToken, CredentialSlot, StaticAccessToken};
pub use error::{Error, Result};
pub use crate::http::{Middleware, Next, PostBody, Request, RequestOptions, Response};
pub use normalize::{Collection, Normalized, ResponseType};

// Module declarations
pub mod client;
pub mod config;
pub mod credential;
pub mod error;
pub mod http;
pub mod normalize;

// Re-export key dependencies for convenience
pub use async_trait::async_trait;
pub use serde_json::Value as JsonValue;

/// Prelude module for convenient imports.
///
/// ```rust
/// use wechat_http::prelude::*;
/// ```
pub mod prelude {
    pub use crate::{
        AccessToken, Client, ClientConfig, Error, Middleware, Next, Normalized, PostBody,
        RequestOptions, Response, ResponseType, Result, StaticAccessToken,
    };
    pub use crate::http::Method;
}

/// SDK version, sent in the default `User-Agent`.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Install a `tracing` subscriber filtered by `RUST_LOG` (default `info`).
///
/// Applications with their own subscriber should not call this.
#[cfg(feature = "trace")]
#[cfg_attr(docsrs, doc(cfg(feature = "trace")))]
pub fn init_tracing() {
    use tracing_subscriber::EnvFilter;

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let _ = tracing_subscriber::fmt().with_env_filter(filter).try_init();
}

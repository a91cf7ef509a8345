//! Transport abstraction
//!
//! The innermost handler of the middleware stack. [`ReqwestTransport`] is the
//! default; tests and embedders can plug in anything implementing
//! [`Transport`].

use std::fmt;
use std::time::Duration;

use async_trait::async_trait;

use super::request::{MultipartPart, PartSource, Request, RequestBody};
use super::Response;
use crate::error::{Error, Result};

/// Sends a fully built request and returns the response.
#[async_trait]
pub trait Transport: Send + Sync + fmt::Debug {
    /// Send the request over the wire.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Transport`] or [`Error::Timeout`] when no response was
    /// received, and [`Error::FileOpen`] when a multipart file disappeared
    /// between the upload call and the send.
    async fn send(&self, request: Request) -> Result<Response>;
}

/// Transport backed by a shared `reqwest::Client`.
#[derive(Debug, Clone)]
pub struct ReqwestTransport {
    client: reqwest::Client,
    timeout: Duration,
}

impl ReqwestTransport {
    /// Build a transport with its own connection pool.
    ///
    /// # Errors
    ///
    /// Returns an error if the underlying HTTP client cannot be created.
    pub fn new(timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .user_agent(format!("wechat-http-rust/{}", crate::VERSION))
            .build()
            .map_err(|e| Error::HttpClient(e.to_string()))?;

        Ok(Self { client, timeout })
    }

    /// Wrap an existing `reqwest::Client`.
    pub fn with_client(client: reqwest::Client, timeout: Duration) -> Self {
        Self { client, timeout }
    }

    /// Returns a reference to the underlying reqwest Client.
    pub fn inner(&self) -> &reqwest::Client {
        &self.client
    }

    async fn build_form(parts: &[MultipartPart]) -> Result<reqwest::multipart::Form> {
        let mut form = reqwest::multipart::Form::new();
        for part in parts {
            form = match &part.source {
                PartSource::File(path) => {
                    form.file(part.name.clone(), path)
                        .await
                        .map_err(|source| Error::FileOpen {
                            path: path.clone(),
                            source,
                        })?
                }
                PartSource::Inline(value) => form.text(part.name.clone(), value.clone()),
            };
        }
        Ok(form)
    }
}

#[async_trait]
impl Transport for ReqwestTransport {
    async fn send(&self, request: Request) -> Result<Response> {
        let timeout = request.timeout().unwrap_or(self.timeout);

        let mut req = self
            .client
            .request(request.method().clone(), request.url().as_str())
            .timeout(timeout);

        if !request.query().is_empty() {
            req = req.query(request.query());
        }

        for (key, value) in request.headers() {
            req = req.header(key, value);
        }

        req = match request.body() {
            RequestBody::Empty => req,
            RequestBody::Form(pairs) => req.form(pairs),
            RequestBody::Raw(raw) => req.body(raw.clone()),
            RequestBody::Json(value) => req.json(value),
            RequestBody::Multipart(parts) => req.multipart(Self::build_form(parts).await?),
        };

        let resp = req
            .send()
            .await
            .map_err(|e| Error::from_reqwest(e, timeout))?;

        let status = resp.status();
        let headers = resp.headers().clone();
        let body = resp
            .bytes()
            .await
            .map_err(|e| Error::from_reqwest(e, timeout))?;

        Ok(Response::new(status, headers, body))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::http::RequestOptions;
    use http::Method;
    use wiremock::matchers::{body_string, header, method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn transport() -> ReqwestTransport {
        ReqwestTransport::new(Duration::from_secs(5)).unwrap()
    }

    #[tokio::test]
    async fn test_send_get_with_query() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/cgi-bin/user/info"))
            .and(query_param("openid", "o-1"))
            .respond_with(ResponseTemplate::new(200).set_body_string(r#"{"nickname":"n"}"#))
            .expect(1)
            .mount(&server)
            .await;

        let url = format!("{}/cgi-bin/user/info", server.uri()).parse().unwrap();
        let request = Request::new(Method::GET, url).with_query("openid", "o-1");
        let response = transport().send(request).await.unwrap();

        assert!(response.is_success());
        assert_eq!(response.text().unwrap(), r#"{"nickname":"n"}"#);
    }

    #[tokio::test]
    async fn test_send_form_body() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(header("content-type", "application/x-www-form-urlencoded"))
            .and(body_string("a=1&b=x+y"))
            .respond_with(ResponseTemplate::new(200))
            .expect(1)
            .mount(&server)
            .await;

        let options = RequestOptions::new().form([("a", "1"), ("b", "x y")]);
        let request = Request::from_options(Method::POST, server.uri().parse().unwrap(), options);
        transport().send(request).await.unwrap();
    }

    #[tokio::test]
    async fn test_connection_refused_is_transport_error() {
        // Bind then drop a listener so the port is very likely closed.
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let url = format!("http://{}/", addr).parse().unwrap();
        let error = transport()
            .send(Request::new(Method::GET, url))
            .await
            .unwrap_err();

        assert!(error.is_transport(), "unexpected error: {:?}", error);
    }

    #[tokio::test]
    async fn test_missing_multipart_file_is_file_open_error() {
        let parts = vec![MultipartPart::file("media", "/no/such/file.bin")];
        let request = Request::from_options(
            Method::POST,
            "http://127.0.0.1:9/".parse().unwrap(),
            RequestOptions::new().multipart(parts),
        );

        let error = transport().send(request).await.unwrap_err();
        assert!(matches!(error, Error::FileOpen { .. }));
    }
}

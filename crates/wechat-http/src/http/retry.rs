//! Refresh-and-retry policy
//!
//! The platform reports an invalid or expired access token inside a normal
//! JSON body (`{"errcode": 42001, ...}`), usually with HTTP 200. This module
//! recognises those responses, refreshes the token and sends the request
//! again through the inner middleware so the new token gets injected.

use std::time::Duration;

use async_trait::async_trait;
use tracing::{debug, warn};

use super::middleware::{Middleware, Next};
use super::{Request, Response};
use crate::credential::CredentialSlot;
use crate::error::{Error, Result};
use crate::normalize::remove_control_characters;

/// `errcode` for an invalid access token.
pub const INVALID_CREDENTIAL: i64 = 40001;

/// `errcode` for an expired access token.
pub const EXPIRED_CREDENTIAL: i64 = 42001;

/// Codes that trigger a token refresh followed by a retry.
pub const REFRESH_ERROR_CODES: [i64; 2] = [INVALID_CREDENTIAL, EXPIRED_CREDENTIAL];

/// Default maximum number of retries.
pub const DEFAULT_RETRIES: u32 = 1;

/// Default delay unit in milliseconds.
pub const DEFAULT_RETRY_DELAY_MS: i64 = 500;

/// Where an attempt left the retry loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryState {
    /// Attempt `n` (0-based) is in flight or about to be retried.
    Attempting(u32),
    /// The response carries no error code.
    Succeeded,
    /// The retry budget is spent; the last response is returned as-is.
    Exhausted,
    /// The outcome is not recoverable by refreshing the token.
    FailedNoRetry,
}

impl RetryState {
    /// Whether the loop stops in this state.
    pub fn is_terminal(&self) -> bool {
        !matches!(self, RetryState::Attempting(_))
    }
}

/// Retry limits and linear backoff.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    max_retries: u32,
    delay_unit: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::new(DEFAULT_RETRIES, DEFAULT_RETRY_DELAY_MS)
    }
}

impl RetryPolicy {
    /// Create a policy. A negative delay is used by its absolute value.
    pub fn new(max_retries: u32, delay_ms: i64) -> Self {
        Self {
            max_retries,
            delay_unit: Duration::from_millis(delay_ms.unsigned_abs()),
        }
    }

    /// Maximum number of retries after the first attempt.
    pub fn max_retries(&self) -> u32 {
        self.max_retries
    }

    /// Delay unit of the linear backoff.
    pub fn delay_unit(&self) -> Duration {
        self.delay_unit
    }

    /// Delay before retry number `retry` (1-based): `retry * unit`.
    pub fn delay_for(&self, retry: u32) -> Duration {
        self.delay_unit.saturating_mul(retry)
    }

    /// Decide what to do after attempt `attempt` (0-based) produced `outcome`.
    ///
    /// Returns `Attempting(attempt + 1)` when the token should be refreshed
    /// and the request sent again.
    pub fn evaluate(&self, attempt: u32, outcome: &Result<Response>) -> RetryState {
        if attempt >= self.max_retries {
            return RetryState::Exhausted;
        }

        let response = match outcome {
            Ok(response) => response,
            Err(_) => return RetryState::FailedNoRetry,
        };

        match error_code(response) {
            Some(code) if is_refresh_code(code) => {
                RetryState::Attempting(attempt + 1)
            }
            Some(0) | None if response.is_success() => RetryState::Succeeded,
            _ => RetryState::FailedNoRetry,
        }
    }
}

/// Whether `code` asks for a token refresh. The sign is ignored.
pub fn is_refresh_code(code: i64) -> bool {
    REFRESH_ERROR_CODES
        .iter()
        .any(|known| known.unsigned_abs() == code.unsigned_abs())
}

/// Extract `errcode` from a JSON object body.
///
/// Returns `None` when the body is empty, is not a JSON object, or has no
/// integer-like `errcode` field.
pub fn error_code(response: &Response) -> Option<i64> {
    if response.body().is_empty() {
        return None;
    }

    let text = remove_control_characters(&response.text_lossy());
    let value: serde_json::Value = serde_json::from_str(&text).ok()?;
    match value.as_object()?.get("errcode")? {
        serde_json::Value::Number(n) => n.as_i64(),
        serde_json::Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

/// Refreshes the access token and retries on expired-token responses.
#[derive(Debug, Clone)]
pub struct RetryMiddleware {
    policy: RetryPolicy,
    credential: CredentialSlot,
}

impl RetryMiddleware {
    /// Create the middleware over a shared credential slot.
    pub fn new(policy: RetryPolicy, credential: CredentialSlot) -> Self {
        Self { policy, credential }
    }

    /// The policy in use.
    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }
}

#[async_trait]
impl Middleware for RetryMiddleware {
    async fn handle(&self, request: Request, next: Next<'_>) -> Result<Response> {
        let mut attempt = 0;

        loop {
            let outcome = next.run(request.clone()).await;

            let retry = match self.policy.evaluate(attempt, &outcome) {
                RetryState::Attempting(retry) => retry,
                state => {
                    if state == RetryState::Exhausted {
                        debug!(
                            attempts = attempt + 1,
                            url = %request.url(),
                            "retry budget exhausted, returning last response"
                        );
                    }
                    return outcome;
                }
            };

            let Some(token) = self.credential.get() else {
                debug!(url = %request.url(), "token error but no access token held, not retrying");
                return outcome;
            };

            if let Err(e) = token.refresh().await {
                warn!(error = %e, url = %request.url(), "access token refresh failed");
                return Err(Error::credential_refresh(e));
            }
            debug!(retry, url = %request.url(), "Retrying with refreshed access token.");

            let delay = self.policy.delay_for(retry);
            if !delay.is_zero() {
                tokio::time::sleep(delay).await;
            }
            attempt = retry;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::credential::AccessToken;
    use crate::http::{AccessTokenMiddleware, MiddlewareStack, Transport};
    use http::{HeaderMap, Method, StatusCode};
    use proptest::prelude::*;
    use rstest::rstest;
    use std::collections::VecDeque;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::{Arc, Mutex};

    fn json_response(status: u16, body: &str) -> Response {
        Response::new(
            StatusCode::from_u16(status).unwrap(),
            HeaderMap::new(),
            body.to_string(),
        )
    }

    /// Replies with scripted outcomes, then repeats the last one.
    #[derive(Debug)]
    struct Scripted {
        replies: Mutex<VecDeque<Result<Response>>>,
        last: Response,
        seen: Mutex<Vec<Request>>,
    }

    impl Scripted {
        fn new(replies: Vec<Result<Response>>, last: Response) -> Self {
            Self {
                replies: Mutex::new(replies.into()),
                last,
                seen: Mutex::new(Vec::new()),
            }
        }

        fn calls(&self) -> usize {
            self.seen.lock().unwrap().len()
        }
    }

    #[async_trait]
    impl Transport for Scripted {
        async fn send(&self, request: Request) -> Result<Response> {
            self.seen.lock().unwrap().push(request);
            match self.replies.lock().unwrap().pop_front() {
                Some(reply) => reply,
                None => Ok(self.last.clone()),
            }
        }
    }

    /// Token that changes value on every refresh.
    #[derive(Debug, Default)]
    struct CountingToken {
        refreshes: AtomicU32,
        fail_refresh: bool,
    }

    #[async_trait]
    impl AccessToken for CountingToken {
        async fn token(&self) -> Result<String> {
            Ok(format!("token-{}", self.refreshes.load(Ordering::SeqCst)))
        }

        async fn refresh(&self) -> Result<()> {
            if self.fail_refresh {
                return Err(Error::AccessToken("invalid appsecret".to_string()));
            }
            self.refreshes.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    fn pipeline(policy: RetryPolicy, slot: CredentialSlot) -> MiddlewareStack {
        let mut stack = MiddlewareStack::new();
        stack.push(
            crate::http::middleware::RETRY,
            Arc::new(RetryMiddleware::new(policy, slot.clone())),
        );
        stack.push(
            crate::http::middleware::ACCESS_TOKEN,
            Arc::new(AccessTokenMiddleware::new(slot)),
        );
        stack
    }

    fn request() -> Request {
        Request::new(Method::GET, "https://api.example.com/cgi-bin/menu/get".parse().unwrap())
    }

    const EXPIRED: &str = r#"{"errcode":42001,"errmsg":"access_token expired"}"#;
    const OK: &str = r#"{"errcode":0,"errmsg":"ok"}"#;

    #[test]
    fn test_negative_delay_is_normalized() {
        let policy = RetryPolicy::new(3, -500);
        assert_eq!(policy.delay_unit(), Duration::from_millis(500));
    }

    #[test]
    fn test_linear_backoff() {
        let policy = RetryPolicy::new(3, 500);
        assert_eq!(policy.delay_for(1), Duration::from_millis(500));
        assert_eq!(policy.delay_for(2), Duration::from_millis(1000));
        assert_eq!(policy.delay_for(3), Duration::from_millis(1500));
    }

    #[test]
    fn test_default_policy() {
        let policy = RetryPolicy::default();
        assert_eq!(policy.max_retries(), 1);
        assert_eq!(policy.delay_unit(), Duration::from_millis(500));
    }

    #[rstest]
    #[case(r#"{"errcode":40001,"errmsg":"invalid credential"}"#, 200, RetryState::Attempting(1))]
    #[case(r#"{"errcode":42001}"#, 200, RetryState::Attempting(1))]
    #[case(r#"{"errcode":-42001}"#, 200, RetryState::Attempting(1))]
    #[case(r#"{"errcode":"40001"}"#, 200, RetryState::Attempting(1))]
    #[case(r#"{"errcode":40013,"errmsg":"invalid appid"}"#, 200, RetryState::FailedNoRetry)]
    #[case(r#"{"errcode":0,"errmsg":"ok"}"#, 200, RetryState::Succeeded)]
    #[case(r#"{"menu":{}}"#, 200, RetryState::Succeeded)]
    #[case(r#"{"menu":{}}"#, 502, RetryState::FailedNoRetry)]
    #[case(r#"[40001]"#, 200, RetryState::Succeeded)]
    #[case("<xml>not json</xml>", 200, RetryState::Succeeded)]
    #[case("", 500, RetryState::FailedNoRetry)]
    #[case(r#"{"errcode":-9223372036854775808}"#, 200, RetryState::FailedNoRetry)]
    #[case(r#"{"errcode":"-9223372036854775808"}"#, 200, RetryState::FailedNoRetry)]
    fn test_evaluate_first_attempt(
        #[case] body: &str,
        #[case] status: u16,
        #[case] expected: RetryState,
    ) {
        let policy = RetryPolicy::default();
        assert_eq!(policy.evaluate(0, &Ok(json_response(status, body))), expected);
    }

    #[test]
    fn test_evaluate_exhausted_and_transport_error() {
        let policy = RetryPolicy::new(1, 500);
        assert_eq!(
            policy.evaluate(1, &Ok(json_response(200, EXPIRED))),
            RetryState::Exhausted
        );
        assert_eq!(
            policy.evaluate(0, &Err(Error::Transport("reset".to_string()))),
            RetryState::FailedNoRetry
        );
        assert!(RetryState::Exhausted.is_terminal());
        assert!(!RetryState::Attempting(1).is_terminal());
    }

    #[rstest]
    #[case(40001, true)]
    #[case(-42001, true)]
    #[case(45009, false)]
    #[case(i64::MIN, false)]
    #[case(i64::MAX, false)]
    fn test_is_refresh_code(#[case] code: i64, #[case] expected: bool) {
        assert_eq!(is_refresh_code(code), expected);
    }

    #[test]
    fn test_error_code_ignores_control_characters() {
        let response = json_response(200, "{\"errcode\":\u{1}42001}");
        assert_eq!(error_code(&response), Some(42001));
    }

    #[tokio::test(start_paused = true)]
    async fn test_refreshes_once_then_retries_with_new_token() {
        let transport = Scripted::new(vec![Ok(json_response(200, EXPIRED))], json_response(200, OK));
        let token = Arc::new(CountingToken::default());
        let slot = CredentialSlot::with_token(token.clone());

        let response = pipeline(RetryPolicy::new(1, 500), slot)
            .execute(request(), &transport)
            .await
            .unwrap();

        assert_eq!(response.text().unwrap(), OK);
        assert_eq!(token.refreshes.load(Ordering::SeqCst), 1);

        let seen = transport.seen.lock().unwrap();
        assert_eq!(seen.len(), 2);
        assert_eq!(seen[0].query()[0].1, "token-0");
        assert_eq!(seen[1].query()[0].1, "token-1");
    }

    #[tokio::test(start_paused = true)]
    async fn test_stops_at_max_retries_and_returns_last_response() {
        let transport = Scripted::new(vec![], json_response(200, EXPIRED));
        let token = Arc::new(CountingToken::default());
        let slot = CredentialSlot::with_token(token.clone());

        let response = pipeline(RetryPolicy::new(3, 500), slot)
            .execute(request(), &transport)
            .await
            .unwrap();

        assert_eq!(response.text().unwrap(), EXPIRED);
        assert_eq!(transport.calls(), 4);
        assert_eq!(token.refreshes.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_backoff_waits_n_times_unit() {
        let transport = Scripted::new(vec![], json_response(200, EXPIRED));
        let slot = CredentialSlot::with_token(Arc::new(CountingToken::default()));

        let start = tokio::time::Instant::now();
        pipeline(RetryPolicy::new(2, -500), slot)
            .execute(request(), &transport)
            .await
            .unwrap();
        let elapsed = start.elapsed();

        // 500ms before the first retry, 1000ms before the second.
        assert!(elapsed >= Duration::from_millis(1500), "elapsed {:?}", elapsed);
        assert!(elapsed < Duration::from_millis(1600), "elapsed {:?}", elapsed);
    }

    #[tokio::test]
    async fn test_transport_error_is_not_retried() {
        let transport = Scripted::new(
            vec![Err(Error::Transport("connection reset".to_string()))],
            json_response(200, OK),
        );
        let token = Arc::new(CountingToken::default());
        let slot = CredentialSlot::with_token(token.clone());

        let error = pipeline(RetryPolicy::new(3, 0), slot)
            .execute(request(), &transport)
            .await
            .unwrap_err();

        assert!(error.is_transport());
        assert_eq!(transport.calls(), 1);
        assert_eq!(token.refreshes.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_refresh_failure_is_fatal() {
        let transport = Scripted::new(vec![], json_response(200, EXPIRED));
        let token = Arc::new(CountingToken {
            fail_refresh: true,
            ..Default::default()
        });
        let slot = CredentialSlot::with_token(token);

        let error = pipeline(RetryPolicy::new(3, 0), slot)
            .execute(request(), &transport)
            .await
            .unwrap_err();

        assert!(matches!(error, Error::CredentialRefresh(_)));
        assert_eq!(transport.calls(), 1);
    }

    #[tokio::test]
    async fn test_no_credential_returns_response_without_retry() {
        let transport = Scripted::new(vec![], json_response(200, EXPIRED));

        let response = pipeline(RetryPolicy::new(3, 0), CredentialSlot::new())
            .execute(request(), &transport)
            .await
            .unwrap();

        assert_eq!(response.text().unwrap(), EXPIRED);
        assert_eq!(transport.calls(), 1);
    }

    #[tokio::test]
    async fn test_zero_retries_never_refreshes() {
        let transport = Scripted::new(vec![], json_response(200, EXPIRED));
        let token = Arc::new(CountingToken::default());
        let slot = CredentialSlot::with_token(token.clone());

        pipeline(RetryPolicy::new(0, 500), slot)
            .execute(request(), &transport)
            .await
            .unwrap();

        assert_eq!(transport.calls(), 1);
        assert_eq!(token.refreshes.load(Ordering::SeqCst), 0);
    }

    proptest! {
        /// Backoff is linear in the retry number and ignores the unit's sign.
        #[test]
        fn prop_delay_is_linear(unit in -10_000i64..10_000, retry in 0u32..50) {
            let policy = RetryPolicy::new(5, unit);
            let expected = Duration::from_millis(unit.unsigned_abs() * u64::from(retry));
            prop_assert_eq!(policy.delay_for(retry), expected);
        }
    }
}

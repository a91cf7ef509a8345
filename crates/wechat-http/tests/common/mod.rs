//! Common test utilities and helpers

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use wechat_http::http::{HttpLogger, LogRecord};
use wechat_http::{AccessToken, Client, ClientConfig, Result};

/// Token whose value changes on every refresh: `token-0`, `token-1`, ...
#[allow(dead_code)]
#[derive(Debug, Default)]
pub struct RotatingToken {
    generation: AtomicU32,
    refreshes: AtomicU32,
    fail_refresh: bool,
}

#[allow(dead_code)]
impl RotatingToken {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn failing() -> Arc<Self> {
        Arc::new(Self {
            fail_refresh: true,
            ..Self::default()
        })
    }

    pub fn refreshes(&self) -> u32 {
        self.refreshes.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl AccessToken for RotatingToken {
    async fn token(&self) -> Result<String> {
        Ok(format!("token-{}", self.generation.load(Ordering::SeqCst)))
    }

    async fn refresh(&self) -> Result<()> {
        self.refreshes.fetch_add(1, Ordering::SeqCst);
        if self.fail_refresh {
            return Err(anyhow::anyhow!("appsecret rejected").into());
        }
        self.generation.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

/// Logger keeping every record in memory.
#[allow(dead_code)]
#[derive(Debug, Default)]
pub struct MemoryLogger {
    pub records: Mutex<Vec<LogRecord>>,
}

impl HttpLogger for MemoryLogger {
    fn log(&self, record: &LogRecord) {
        self.records.lock().unwrap().push(record.clone());
    }
}

/// Client pointed at a mock server with a fast retry delay.
#[allow(dead_code)]
pub fn client(base_url: &str, config: ClientConfig) -> Client {
    let mut config = config;
    config.http.base_url = Some(base_url.to_string());
    Client::new(config).expect("Failed to build client")
}

/// Default configuration with a short retry delay.
#[allow(dead_code)]
pub fn fast_config() -> ClientConfig {
    ClientConfig::builder().retry_delay(10).build()
}

/// Route `tracing` output through the test harness; `RUST_LOG` selects levels.
#[allow(dead_code)]
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

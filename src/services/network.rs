use std::time::Duration;

use async_trait::async_trait;
use tokio::net::TcpStream;
use url::Url;

use crate::error::{AppError, Result};

/// Answers "is the network available?" for scheduling constraints.
#[async_trait]
pub trait NetworkProbe: Send + Sync {
    async fn is_online(&self) -> bool;
}

/// Considers the network available when a TCP connection to the source host
/// can be opened.
#[derive(Debug, Clone)]
pub struct TcpProbe {
    host: String,
    port: u16,
    timeout: Duration,
}

impl TcpProbe {
    pub fn for_url(url: &str, timeout: Duration) -> Result<Self> {
        let parsed = Url::parse(url).map_err(|e| AppError::Config(format!("invalid url {url}: {e}")))?;
        let host = parsed
            .host_str()
            .ok_or_else(|| AppError::Config(format!("url has no host: {url}")))?
            .to_string();
        let port = parsed
            .port_or_known_default()
            .ok_or_else(|| AppError::Config(format!("url has no port: {url}")))?;

        Ok(Self { host, port, timeout })
    }
}

#[async_trait]
impl NetworkProbe for TcpProbe {
    async fn is_online(&self) -> bool {
        let connect = TcpStream::connect((self.host.as_str(), self.port));
        match tokio::time::timeout(self.timeout, connect).await {
            Ok(Ok(_)) => true,
            Ok(Err(e)) => {
                tracing::debug!(host = %self.host, "network probe failed: {}", e);
                false
            }
            Err(_) => {
                tracing::debug!(host = %self.host, "network probe timed out");
                false
            }
        }
    }
}

/// Probe that never blocks a run.
#[derive(Debug, Default, Clone, Copy)]
pub struct AlwaysOnline;

#[async_trait]
impl NetworkProbe for AlwaysOnline {
    async fn is_online(&self) -> bool {
        true
    }
}

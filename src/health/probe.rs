//! Health probe transports.
//!
//! # Design Decisions
//! - Probes are a small capability trait; the checker does not know the transport
//! - Transport is picked once by `build_probe` from configuration
//! - The checker enforces the timeout; probes just report ok or an error

use std::sync::Arc;
use async_trait::async_trait;
use tokio::net::TcpStream;
use url::Url;

use crate::config::ProbeKind;
use crate::error::{UpstreamError, UpstreamResult};

/// Something that can tell whether an endpoint is up.
#[async_trait]
pub trait HealthProbe: Send + Sync {
    /// Ok when the endpoint answered with an "ok" signal.
    async fn probe(&self, target: &Url) -> Result<(), String>;
}

/// HTTP GET probe; any 2xx status is healthy.
#[derive(Debug, Clone)]
pub struct HttpProbe {
    client: reqwest::Client,
}

impl HttpProbe {
    pub fn new() -> UpstreamResult<Self> {
        let client = reqwest::Client::builder()
            .user_agent("upstream-client-health-check")
            .pool_max_idle_per_host(0)
            .no_proxy()
            .build()
            .map_err(|e| UpstreamError::Config(format!("health probe client: {}", e)))?;
        Ok(Self { client })
    }
}

#[async_trait]
impl HealthProbe for HttpProbe {
    async fn probe(&self, target: &Url) -> Result<(), String> {
        let response = self
            .client
            .get(target.clone())
            .send()
            .await
            .map_err(|e| format!("connection error: {}", e))?;

        let status = response.status();
        if status.is_success() {
            Ok(())
        } else {
            Err(format!("non-success status {}", status))
        }
    }
}

/// TCP connect probe against the target's host and port.
#[derive(Debug, Clone, Default)]
pub struct TcpProbe;

#[async_trait]
impl HealthProbe for TcpProbe {
    async fn probe(&self, target: &Url) -> Result<(), String> {
        let host = target
            .host_str()
            .ok_or_else(|| format!("no host in {}", target))?;
        let port = target
            .port_or_known_default()
            .ok_or_else(|| format!("no port in {}", target))?;

        TcpStream::connect((host, port))
            .await
            .map(|_| ())
            .map_err(|e| format!("connect failed: {}", e))
    }
}

/// Pick the probe transport for a configuration.
pub fn build_probe(kind: ProbeKind) -> UpstreamResult<Arc<dyn HealthProbe>> {
    Ok(match kind {
        ProbeKind::Http => Arc::new(HttpProbe::new()?),
        ProbeKind::Tcp => Arc::new(TcpProbe),
    })
}

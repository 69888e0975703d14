//! HTTP operation for `ProxyCore`.
//!
//! Maps transport results onto the error taxonomy: connection failures,
//! timeouts and 5xx are transient; 4xx are permanent.

use std::time::Duration;
use reqwest::StatusCode;

use crate::error::{UpstreamError, UpstreamResult};
use crate::load_balancer::ServiceInstance;

/// Response from an upstream instance.
#[derive(Debug, Clone)]
pub struct HttpReply {
    pub instance: String,
    pub status: u16,
    pub body: String,
}

/// Thin reqwest wrapper issuing requests against a selected instance.
#[derive(Debug, Clone)]
pub struct HttpCaller {
    client: reqwest::Client,
}

impl HttpCaller {
    pub fn new(timeout: Duration) -> UpstreamResult<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .pool_max_idle_per_host(0)
            .no_proxy()
            .build()
            .map_err(|e| UpstreamError::Config(format!("http client: {}", e)))?;
        Ok(Self { client })
    }

    /// GET `path` relative to the instance's base URL.
    pub async fn get(&self, instance: &ServiceInstance, path: &str) -> UpstreamResult<HttpReply> {
        let url = instance
            .base_url()
            .join(path)
            .map_err(|e| UpstreamError::permanent(format!("invalid path {}: {}", path, e)))?;

        let response = self.client.get(url).send().await.map_err(classify_transport)?;
        let status = response.status();
        classify_status(status)?;

        let body = response.text().await.map_err(UpstreamError::transient)?;
        Ok(HttpReply {
            instance: instance.id().to_string(),
            status: status.as_u16(),
            body,
        })
    }
}

fn classify_transport(err: reqwest::Error) -> UpstreamError {
    if err.is_builder() {
        UpstreamError::permanent(err)
    } else {
        UpstreamError::transient(err)
    }
}

/// 5xx → transient, 4xx → permanent, anything else passes.
pub fn classify_status(status: StatusCode) -> UpstreamResult<()> {
    if status.is_server_error() {
        Err(UpstreamError::transient(format!("upstream returned {}", status)))
    } else if status.is_client_error() {
        Err(UpstreamError::permanent(format!("upstream returned {}", status)))
    } else {
        Ok(())
    }
}

//! HTTP implementation of `ServiceCaller` built on `reqwest`.
//!
//! Requests are sent as `POST http://host:port/<endpoint>` with the request
//! payload as a JSON body. Probes are `GET http://host:port/<health_path>`.
//! Any non-2xx status is reported as a failed call.

use async_trait::async_trait;
use reqwest::Client as HttpClient;
use std::collections::HashMap;
use std::time::Duration;
use tracing::debug;

use super::caller::{CallError, ServiceCaller};
use crate::core::error::{OrchestratorError, OrchestratorResult};
use crate::core::types::{ServiceInstance, ServiceRequest, ServiceResponse};

const DEFAULT_HEALTH_PATH: &str = "health";

/// `ServiceCaller` that talks HTTP/JSON to instances
#[derive(Debug, Clone)]
pub struct HttpServiceCaller {
    client: HttpClient,
    health_path: String,
}

impl HttpServiceCaller {
    /// Create a caller with a pooled HTTP client
    pub fn new() -> OrchestratorResult<Self> {
        let client = HttpClient::builder()
            .pool_idle_timeout(Duration::from_secs(90))
            .build()
            .map_err(|e| OrchestratorError::internal(format!("Failed to create HTTP client: {}", e)))?;

        Ok(Self {
            client,
            health_path: DEFAULT_HEALTH_PATH.to_string(),
        })
    }

    /// Override the probe path (default `health`)
    pub fn with_health_path(mut self, path: impl Into<String>) -> Self {
        self.health_path = path.into().trim_start_matches('/').to_string();
        self
    }

    fn url(instance: &ServiceInstance, path: &str) -> String {
        format!("http://{}/{}", instance.address(), path.trim_start_matches('/'))
    }
}

fn map_error(err: reqwest::Error) -> CallError {
    if err.is_timeout() {
        CallError::Timeout
    } else {
        CallError::failed(format!("HTTP request failed: {}", err))
    }
}

#[async_trait]
impl ServiceCaller for HttpServiceCaller {
    async fn call(
        &self,
        instance: &ServiceInstance,
        request: &ServiceRequest,
        timeout: Duration,
    ) -> Result<ServiceResponse, CallError> {
        let url = Self::url(instance, &request.endpoint);
        debug!(instance_id = %instance.id, url = %url, "Forwarding request");

        let mut builder = self.client.post(&url).timeout(timeout).json(&request.payload);
        for (name, value) in &request.headers {
            builder = builder.header(name.as_str(), value.as_str());
        }

        let response = builder.send().await.map_err(map_error)?;
        let status = response.status();
        let headers: HashMap<String, String> = response
            .headers()
            .iter()
            .filter_map(|(name, value)| value.to_str().ok().map(|v| (name.to_string(), v.to_string())))
            .collect();

        if !status.is_success() {
            return Err(CallError::failed(format!("Unexpected status code: {}", status.as_u16())));
        }

        let body = response.bytes().await.map_err(map_error)?;
        let payload = if body.is_empty() {
            serde_json::Value::Null
        } else {
            serde_json::from_slice(&body)
                .map_err(|e| CallError::failed(format!("Invalid JSON response: {}", e)))?
        };

        Ok(ServiceResponse {
            status: status.as_u16(),
            headers,
            payload,
        })
    }

    async fn probe(&self, instance: &ServiceInstance, timeout: Duration) -> Result<(), CallError> {
        let response = self
            .client
            .get(Self::url(instance, &self.health_path))
            .timeout(timeout)
            .send()
            .await
            .map_err(map_error)?;

        if response.status().is_success() {
            Ok(())
        } else {
            Err(CallError::failed(format!(
                "Unexpected status code: {}",
                response.status().as_u16()
            )))
        }
    }
}

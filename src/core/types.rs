//! # Core Data Types
//!
//! Shared data structures for services, instances, and the request/response
//! payloads that flow through the gateway router.
//!
//! `ServiceInstance` values handed out by the registry are always copies. A
//! component holding one can read it freely; mutation only happens through
//! registry operations.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;

/// Lifecycle of a registered service
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ServiceLifecycle {
    /// Service accepts traffic
    Active,
    /// Service has been deregistered
    Retired,
}

impl fmt::Display for ServiceLifecycle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ServiceLifecycle::Active => write!(f, "active"),
            ServiceLifecycle::Retired => write!(f, "retired"),
        }
    }
}

/// A named logical capability backed by one or more instances
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Service {
    /// Unique service name
    pub name: String,

    /// Advertised logical endpoints, in registration order
    pub endpoints: Vec<String>,

    /// Service version string
    pub version: String,

    /// Active or retired
    pub status: ServiceLifecycle,
}

/// Health status of a service instance
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HealthStatus {
    /// Instance is healthy and ready to receive traffic
    Healthy,
    /// Instance is unhealthy and should not receive traffic
    Unhealthy,
}

impl fmt::Display for HealthStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            HealthStatus::Healthy => write!(f, "healthy"),
            HealthStatus::Unhealthy => write!(f, "unhealthy"),
        }
    }
}

fn default_weight() -> i32 {
    1
}

/// Description of an instance to create
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InstanceSpec {
    /// Unique instance identifier within the service
    pub id: String,

    /// Host name or IP address
    pub host: String,

    /// Port number
    pub port: u16,

    /// Weight for weighted balancing
    #[serde(default = "default_weight")]
    pub weight: i32,
}

impl InstanceSpec {
    /// Create a spec with weight 1
    pub fn new(id: impl Into<String>, host: impl Into<String>, port: u16) -> Self {
        Self {
            id: id.into(),
            host: host.into(),
            port,
            weight: 1,
        }
    }

    /// Builder-style weight override
    pub fn with_weight(mut self, weight: i32) -> Self {
        self.weight = weight;
        self
    }
}

/// One concrete, independently reachable backend of a service
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServiceInstance {
    /// Unique instance identifier
    pub id: String,

    /// Owning service name
    pub service_name: String,

    /// Host name or IP address
    pub host: String,

    /// Port number
    pub port: u16,

    /// Instance weight for load balancing
    pub weight: i32,

    /// Current health status
    pub health: HealthStatus,

    /// Time of the last completed health probe
    pub last_health_check: Option<DateTime<Utc>>,

    /// Total requests routed to this instance
    pub request_count: u64,

    /// Total failed requests routed to this instance
    pub error_count: u64,

    /// `request_count` at the start of the current scaling window
    #[serde(skip)]
    pub(crate) window_start_requests: u64,
}

impl ServiceInstance {
    /// Create a new healthy instance from a spec
    pub fn from_spec(service_name: impl Into<String>, spec: InstanceSpec) -> Self {
        Self {
            id: spec.id,
            service_name: service_name.into(),
            host: spec.host,
            port: spec.port,
            weight: spec.weight,
            health: HealthStatus::Healthy,
            last_health_check: None,
            request_count: 0,
            error_count: 0,
            window_start_requests: 0,
        }
    }

    /// Check if instance is healthy
    pub fn is_healthy(&self) -> bool {
        matches!(self.health, HealthStatus::Healthy)
    }

    /// `host:port` address of the instance
    pub fn address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    /// Weight used for selection; non-positive weights count as 1
    pub fn effective_weight(&self) -> u64 {
        if self.weight <= 0 {
            1
        } else {
            self.weight as u64
        }
    }

    /// Requests received since the current scaling window started
    pub fn window_requests(&self) -> u64 {
        self.request_count.saturating_sub(self.window_start_requests)
    }
}

/// Request routed through the gateway
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ServiceRequest {
    /// Logical endpoint of the service being invoked
    pub endpoint: String,

    /// Request headers
    #[serde(default)]
    pub headers: HashMap<String, String>,

    /// Request body
    #[serde(default)]
    pub payload: serde_json::Value,
}

impl ServiceRequest {
    /// Create a request for an endpoint with an empty body
    pub fn new(endpoint: impl Into<String>) -> Self {
        Self {
            endpoint: endpoint.into(),
            headers: HashMap::new(),
            payload: serde_json::Value::Null,
        }
    }

    /// Builder-style payload
    pub fn with_payload(mut self, payload: serde_json::Value) -> Self {
        self.payload = payload;
        self
    }

    /// Builder-style header
    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.insert(name.into(), value.into());
        self
    }
}

/// Response returned by a backend instance
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ServiceResponse {
    /// Status code reported by the backend
    pub status: u16,

    /// Response headers
    #[serde(default)]
    pub headers: HashMap<String, String>,

    /// Response body
    #[serde(default)]
    pub payload: serde_json::Value,
}

impl ServiceResponse {
    /// 200 response with a body
    pub fn ok(payload: serde_json::Value) -> Self {
        Self {
            status: 200,
            headers: HashMap::new(),
            payload,
        }
    }
}

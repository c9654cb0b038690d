//! # Configuration Module
//!
//! Static startup configuration for the orchestration core.
//!
//! ## Key Features
//! - YAML/JSON configuration parsing with serde
//! - Human-readable durations (`30s`, `1m 30s`) via `humantime-serde`
//! - Environment variable overrides for timeouts and intervals
//! - Validation that reports every problem at once
//!
//! Per-service behaviour lives in [`ServicePolicy`]. A service definition without
//! its own policy inherits `defaults`.

use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fmt;
use std::net::SocketAddr;
use std::path::Path;
use std::time::Duration;

use crate::core::error::{OrchestratorError, OrchestratorResult};
use crate::core::types::InstanceSpec;
use crate::observability::config::LogConfig;

/// Load balancing strategy for a service
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LoadBalancingStrategy {
    RoundRobin,
    LeastConnections,
    Weighted,
}

impl fmt::Display for LoadBalancingStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LoadBalancingStrategy::RoundRobin => write!(f, "round_robin"),
            LoadBalancingStrategy::LeastConnections => write!(f, "least_connections"),
            LoadBalancingStrategy::Weighted => write!(f, "weighted"),
        }
    }
}

/// Per-service routing, resilience and scaling policy
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServicePolicy {
    /// Instance selection strategy
    pub strategy: LoadBalancingStrategy,

    /// Consecutive failures that open the circuit
    pub circuit_threshold: u32,

    /// How long the circuit stays open before a half-open trial
    #[serde(with = "humantime_serde")]
    pub open_timeout: Duration,

    /// Minimum time between health probes of this service
    #[serde(with = "humantime_serde")]
    pub health_check_interval: Duration,

    /// Average requests per healthy instance per scaling window above which
    /// an instance is added
    pub scale_up_threshold: f64,

    /// Average requests per healthy instance per scaling window below which
    /// an instance is removed
    pub scale_down_threshold: f64,

    /// Lower bound on instance count for the auto-scaler
    pub min_instances: usize,

    /// Upper bound on instance count for the auto-scaler
    pub max_instances: usize,
}

impl Default for ServicePolicy {
    fn default() -> Self {
        Self {
            strategy: LoadBalancingStrategy::RoundRobin,
            circuit_threshold: 5,
            open_timeout: Duration::from_secs(60),
            health_check_interval: Duration::from_secs(30),
            scale_up_threshold: 100.0,
            scale_down_threshold: 10.0,
            min_instances: 1,
            max_instances: 10,
        }
    }
}

impl ServicePolicy {
    /// Collect validation problems for this policy
    fn collect_errors(&self, owner: &str, errors: &mut Vec<String>) {
        if self.circuit_threshold == 0 {
            errors.push(format!("{}: circuit_threshold must be greater than 0", owner));
        }
        if self.open_timeout.is_zero() {
            errors.push(format!("{}: open_timeout must be greater than 0", owner));
        }
        if self.health_check_interval.is_zero() {
            errors.push(format!("{}: health_check_interval must be greater than 0", owner));
        }
        if self.min_instances == 0 {
            errors.push(format!("{}: min_instances must be at least 1", owner));
        }
        if self.min_instances > self.max_instances {
            errors.push(format!(
                "{}: min_instances ({}) exceeds max_instances ({})",
                owner, self.min_instances, self.max_instances
            ));
        }
        if self.scale_down_threshold < 0.0 {
            errors.push(format!("{}: scale_down_threshold cannot be negative", owner));
        }
        if self.scale_down_threshold >= self.scale_up_threshold {
            errors.push(format!(
                "{}: scale_down_threshold ({}) must be below scale_up_threshold ({})",
                owner, self.scale_down_threshold, self.scale_up_threshold
            ));
        }
    }

    /// Validate a single policy
    pub fn validate(&self) -> OrchestratorResult<()> {
        let mut errors = Vec::new();
        self.collect_errors("policy", &mut errors);
        if errors.is_empty() {
            Ok(())
        } else {
            Err(OrchestratorError::config(errors.join("; ")))
        }
    }
}

fn default_version() -> String {
    "1.0.0".to_string()
}

/// A service to register at startup
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServiceDefinition {
    /// Service name
    pub name: String,

    /// Advertised logical endpoints
    #[serde(default)]
    pub endpoints: Vec<String>,

    /// Service version
    #[serde(default = "default_version")]
    pub version: String,

    /// Initial instances
    pub instances: Vec<InstanceSpec>,

    /// Policy override; `defaults` applies when absent
    #[serde(default)]
    pub policy: Option<ServicePolicy>,
}

impl ServiceDefinition {
    /// Create a definition with no endpoints and the default version
    pub fn new(name: impl Into<String>, instances: Vec<InstanceSpec>) -> Self {
        Self {
            name: name.into(),
            endpoints: Vec::new(),
            version: default_version(),
            instances,
            policy: None,
        }
    }

    /// Builder-style endpoints
    pub fn with_endpoints<I, S>(mut self, endpoints: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.endpoints = endpoints.into_iter().map(Into::into).collect();
        self
    }

    /// Builder-style policy override
    pub fn with_policy(mut self, policy: ServicePolicy) -> Self {
        self.policy = Some(policy);
        self
    }
}

fn default_call_timeout() -> Duration {
    Duration::from_secs(10)
}

fn default_probe_timeout() -> Duration {
    Duration::from_secs(5)
}

fn default_health_check_interval() -> Duration {
    Duration::from_secs(30)
}

fn default_scaling_interval() -> Duration {
    Duration::from_secs(60)
}

fn default_event_buffer_size() -> usize {
    1000
}

/// Main orchestrator configuration structure
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrchestratorConfig {
    /// Logging settings
    #[serde(default)]
    pub logging: LogConfig,

    /// Bound on each routed upstream call
    #[serde(default = "default_call_timeout", with = "humantime_serde")]
    pub call_timeout: Duration,

    /// Bound on each health probe
    #[serde(default = "default_probe_timeout", with = "humantime_serde")]
    pub probe_timeout: Duration,

    /// Tick interval of the health monitor
    #[serde(default = "default_health_check_interval", with = "humantime_serde")]
    pub health_check_interval: Duration,

    /// Tick interval of the auto-scaler
    #[serde(default = "default_scaling_interval", with = "humantime_serde")]
    pub scaling_interval: Duration,

    /// Capacity of the event channel and of the recent-events buffer
    #[serde(default = "default_event_buffer_size")]
    pub event_buffer_size: usize,

    /// Prometheus exporter listen address (exporter disabled when absent)
    #[serde(default)]
    pub metrics_listen_address: Option<SocketAddr>,

    /// Policy inherited by services without their own
    #[serde(default)]
    pub defaults: ServicePolicy,

    /// Services registered at startup
    #[serde(default)]
    pub services: Vec<ServiceDefinition>,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            logging: LogConfig::default(),
            call_timeout: default_call_timeout(),
            probe_timeout: default_probe_timeout(),
            health_check_interval: default_health_check_interval(),
            scaling_interval: default_scaling_interval(),
            event_buffer_size: default_event_buffer_size(),
            metrics_listen_address: None,
            defaults: ServicePolicy::default(),
            services: Vec::new(),
        }
    }
}

impl OrchestratorConfig {
    /// Load configuration from a YAML file
    pub async fn load_from_file<P: AsRef<Path>>(path: P) -> OrchestratorResult<Self> {
        let content = tokio::fs::read_to_string(path).await?;

        let mut config: OrchestratorConfig = serde_yaml::from_str(&content)?;

        config.apply_env_overrides()?;
        config.validate()?;
        Ok(config)
    }

    /// Load configuration from JSON
    pub async fn load_from_json<P: AsRef<Path>>(path: P) -> OrchestratorResult<Self> {
        let content = tokio::fs::read_to_string(path).await?;

        let mut config: OrchestratorConfig = serde_json::from_str(&content)?;

        config.apply_env_overrides()?;
        config.validate()?;
        Ok(config)
    }

    /// Apply environment variable overrides to configuration
    ///
    /// Environment variables follow the pattern `ORCHESTRATOR_<FIELD>`, for example
    /// `ORCHESTRATOR_CALL_TIMEOUT=2s`.
    pub fn apply_env_overrides(&mut self) -> OrchestratorResult<()> {
        self.apply_overrides_from(|key| std::env::var(key).ok())
    }

    /// Apply overrides from an arbitrary key lookup
    pub fn apply_overrides_from<F>(&mut self, lookup: F) -> OrchestratorResult<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        let duration = |key: &str| -> OrchestratorResult<Option<Duration>> {
            match lookup(key) {
                Some(value) => humantime::parse_duration(&value)
                    .map(Some)
                    .map_err(|e| OrchestratorError::config(format!("Invalid {}: {}", key, e))),
                None => Ok(None),
            }
        };

        if let Some(value) = duration("ORCHESTRATOR_CALL_TIMEOUT")? {
            self.call_timeout = value;
        }
        if let Some(value) = duration("ORCHESTRATOR_PROBE_TIMEOUT")? {
            self.probe_timeout = value;
        }
        if let Some(value) = duration("ORCHESTRATOR_HEALTH_CHECK_INTERVAL")? {
            self.health_check_interval = value;
        }
        if let Some(value) = duration("ORCHESTRATOR_SCALING_INTERVAL")? {
            self.scaling_interval = value;
        }
        if let Some(level) = lookup("ORCHESTRATOR_LOG_LEVEL") {
            self.logging.level = level;
        }
        if let Some(addr) = lookup("ORCHESTRATOR_METRICS_ADDRESS") {
            let parsed = addr.parse().map_err(|e| {
                OrchestratorError::config(format!("Invalid ORCHESTRATOR_METRICS_ADDRESS: {}", e))
            })?;
            self.metrics_listen_address = Some(parsed);
        }

        Ok(())
    }

    /// Policy for a service definition
    pub fn policy_for(&self, definition: &ServiceDefinition) -> ServicePolicy {
        definition
            .policy
            .clone()
            .unwrap_or_else(|| self.defaults.clone())
    }

    /// Validate the configuration, reporting every problem found
    pub fn validate(&self) -> OrchestratorResult<()> {
        let mut errors = Vec::new();

        if self.call_timeout.is_zero() {
            errors.push("call_timeout must be greater than 0".to_string());
        }
        if self.probe_timeout.is_zero() {
            errors.push("probe_timeout must be greater than 0".to_string());
        }
        if self.health_check_interval.is_zero() {
            errors.push("health_check_interval must be greater than 0".to_string());
        }
        if self.scaling_interval.is_zero() {
            errors.push("scaling_interval must be greater than 0".to_string());
        }
        if self.event_buffer_size == 0 {
            errors.push("event_buffer_size must be greater than 0".to_string());
        }

        self.defaults.collect_errors("defaults", &mut errors);

        let mut seen = HashSet::new();
        for service in &self.services {
            if service.name.is_empty() {
                errors.push("Service with empty name".to_string());
                continue;
            }
            if !seen.insert(service.name.as_str()) {
                errors.push(format!("Duplicate service name: {}", service.name));
            }
            if service.instances.is_empty() {
                errors.push(format!("Service '{}' has no instances", service.name));
            }

            let mut instance_ids = HashSet::new();
            for instance in &service.instances {
                if !instance_ids.insert(instance.id.as_str()) {
                    errors.push(format!(
                        "Service '{}' has duplicate instance id '{}'",
                        service.name, instance.id
                    ));
                }
            }

            if let Some(policy) = &service.policy {
                policy.collect_errors(&format!("service '{}'", service.name), &mut errors);
            }
            let policy = self.policy_for(service);
            if service.instances.len() < policy.min_instances {
                errors.push(format!(
                    "Service '{}' has {} instances, fewer than min_instances ({})",
                    service.name,
                    service.instances.len(),
                    policy.min_instances
                ));
            }
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(OrchestratorError::config(format!(
                "Configuration validation failed: {}",
                errors.join("; ")
            )))
        }
    }
}

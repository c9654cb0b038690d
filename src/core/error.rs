//! # Error Handling Module
//!
//! This module defines every failure the orchestration core can report, using the
//! `thiserror` crate. Nothing in the core panics across its public boundary: each
//! failure mode is an explicit `Err` value that the caller can match on.
//!
//! ## Error Families
//!
//! - **Registry management** (`DuplicateService`, `ServiceNotFound`, `LastInstance`,
//!   `DuplicateInstance`, `InstanceNotFound`) are returned synchronously to the administrative caller.
//! - **Routing** (`CircuitOpen`, `NoHealthyInstance`, `CallTimeout`, `CallFailed`) are
//!   returned to the caller of `route` and are recorded in metrics as errors.
//!   None of them are retried inside the core.
//! - **Ambient** (`Configuration`, `Io`, `Yaml`, `Json`, `Internal`) cover config
//!   loading and startup.
//!
//! ## Rust Concepts Used
//!
//! - Enum variants with named fields instead of an exception hierarchy
//! - `#[error("...")]` derives `Display` for each variant
//! - `From` implementations let `?` convert foreign errors automatically

use thiserror::Error;

/// Result type used throughout the orchestration core
pub type OrchestratorResult<T> = Result<T, OrchestratorError>;

/// Every error the orchestration core can return
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum OrchestratorError {
    /// The service is unknown or has been retired
    #[error("Service not found: {service}")]
    ServiceNotFound { service: String },

    /// A service with this name is already active
    #[error("Service already registered: {service}")]
    DuplicateService { service: String },

    /// Removing the instance would leave the service with no instances
    #[error("Cannot remove last instance {instance_id} of service {service}")]
    LastInstance { service: String, instance_id: String },

    /// An instance with this id already belongs to the service
    #[error("Instance {instance_id} already exists in service {service}")]
    DuplicateInstance { service: String, instance_id: String },

    /// The instance id is not known for this service
    #[error("Instance {instance_id} not found in service {service}")]
    InstanceNotFound { service: String, instance_id: String },

    /// No instance of the service is currently marked healthy
    #[error("No healthy instance available for service: {service}")]
    NoHealthyInstance { service: String },

    /// The circuit breaker refused the request
    #[error("Circuit breaker open for service: {service}")]
    CircuitOpen { service: String },

    /// The upstream call exceeded its time budget
    #[error("Call to {service}/{instance_id} timed out after {timeout_ms}ms")]
    CallTimeout {
        service: String,
        instance_id: String,
        timeout_ms: u64,
    },

    /// The upstream call completed with an error
    #[error("Call to {service}/{instance_id} failed: {reason}")]
    CallFailed {
        service: String,
        instance_id: String,
        reason: String,
    },

    /// Configuration-related errors (invalid values, unreadable files, etc.)
    #[error("Configuration error: {message}")]
    Configuration { message: String },

    /// I/O errors
    #[error("I/O error: {message}")]
    Io { message: String },

    /// YAML parsing errors for configuration files
    #[error("YAML error: {message}")]
    Yaml { message: String },

    /// JSON serialization/deserialization errors
    #[error("JSON error: {message}")]
    Json { message: String },

    /// Internal errors for unexpected failures
    #[error("Internal error: {message}")]
    Internal { message: String },
}

impl OrchestratorError {
    /// Create a configuration error with a custom message
    pub fn config<S: Into<String>>(message: S) -> Self {
        Self::Configuration {
            message: message.into(),
        }
    }

    /// Create an internal error with a custom message
    pub fn internal<S: Into<String>>(message: S) -> Self {
        Self::Internal {
            message: message.into(),
        }
    }

    /// Create a service-not-found error
    pub fn not_found<S: Into<String>>(service: S) -> Self {
        Self::ServiceNotFound {
            service: service.into(),
        }
    }

    /// Create a circuit-open error
    pub fn circuit_open<S: Into<String>>(service: S) -> Self {
        Self::CircuitOpen {
            service: service.into(),
        }
    }

    /// Create a no-healthy-instance error
    pub fn no_healthy_instance<S: Into<String>>(service: S) -> Self {
        Self::NoHealthyInstance {
            service: service.into(),
        }
    }

    /// Create an instance-not-found error
    pub fn instance_not_found<S: Into<String>, I: Into<String>>(service: S, instance_id: I) -> Self {
        Self::InstanceNotFound {
            service: service.into(),
            instance_id: instance_id.into(),
        }
    }

    /// Whether this error is produced by the routing path
    pub fn is_routing_error(&self) -> bool {
        matches!(
            self,
            Self::CircuitOpen { .. }
                | Self::NoHealthyInstance { .. }
                | Self::CallTimeout { .. }
                | Self::CallFailed { .. }
        )
    }

    /// Whether an admitted request that ended with this error counts as a
    /// failure for the service's circuit breaker
    pub fn counts_against_circuit(&self) -> bool {
        matches!(
            self,
            Self::NoHealthyInstance { .. } | Self::CallTimeout { .. } | Self::CallFailed { .. }
        )
    }

    /// Stable string name of the error type for logs and API responses
    pub fn error_type(&self) -> &'static str {
        match self {
            Self::ServiceNotFound { .. } => "service_not_found",
            Self::DuplicateService { .. } => "duplicate_service",
            Self::LastInstance { .. } => "last_instance",
            Self::DuplicateInstance { .. } => "duplicate_instance",
            Self::InstanceNotFound { .. } => "instance_not_found",
            Self::NoHealthyInstance { .. } => "no_healthy_instance",
            Self::CircuitOpen { .. } => "circuit_open",
            Self::CallTimeout { .. } => "call_timeout",
            Self::CallFailed { .. } => "call_failed",
            Self::Configuration { .. } => "configuration_error",
            Self::Io { .. } => "io_error",
            Self::Yaml { .. } => "yaml_error",
            Self::Json { .. } => "json_error",
            Self::Internal { .. } => "internal_error",
        }
    }
}

/// Implement conversion from std::io::Error
impl From<std::io::Error> for OrchestratorError {
    fn from(err: std::io::Error) -> Self {
        Self::Io {
            message: err.to_string(),
        }
    }
}

/// Implement conversion from serde_yaml::Error
impl From<serde_yaml::Error> for OrchestratorError {
    fn from(err: serde_yaml::Error) -> Self {
        Self::Yaml {
            message: err.to_string(),
        }
    }
}

/// Implement conversion from serde_json::Error
impl From<serde_json::Error> for OrchestratorError {
    fn from(err: serde_json::Error) -> Self {
        Self::Json {
            message: err.to_string(),
        }
    }
}

/// Convenience macro for creating configuration errors
///
/// Usage: `config_error!("min_instances {} exceeds max_instances {}", min, max)`
#[macro_export]
macro_rules! config_error {
    ($($arg:tt)*) => {
        $crate::core::error::OrchestratorError::config(format!($($arg)*))
    };
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_routing_error_classification() {
        assert!(OrchestratorError::circuit_open("pricing").is_routing_error());
        assert!(OrchestratorError::no_healthy_instance("pricing").is_routing_error());
        assert!(!OrchestratorError::not_found("pricing").is_routing_error());
        assert!(!OrchestratorError::DuplicateService {
            service: "pricing".to_string()
        }
        .is_routing_error());
    }

    #[test]
    fn test_circuit_accounting() {
        assert!(OrchestratorError::CallTimeout {
            service: "pricing".to_string(),
            instance_id: "p-1".to_string(),
            timeout_ms: 500,
        }
        .counts_against_circuit());
        assert!(!OrchestratorError::circuit_open("pricing").counts_against_circuit());
        assert!(!OrchestratorError::not_found("pricing").counts_against_circuit());
    }

    #[test]
    fn test_error_display_and_type() {
        let err = OrchestratorError::LastInstance {
            service: "pricing".to_string(),
            instance_id: "p-1".to_string(),
        };
        assert_eq!(err.to_string(), "Cannot remove last instance p-1 of service pricing");
        assert_eq!(err.error_type(), "last_instance");
        assert_eq!(config_error!("bad {}", 1).error_type(), "configuration_error");
    }

    #[test]
    fn test_from_serde_errors() {
        let yaml_err = serde_yaml::from_str::<u32>("not: [a number").unwrap_err();
        assert!(matches!(OrchestratorError::from(yaml_err), OrchestratorError::Yaml { .. }));

        let json_err = serde_json::from_str::<u32>("{").unwrap_err();
        assert!(matches!(OrchestratorError::from(json_err), OrchestratorError::Json { .. }));
    }
}

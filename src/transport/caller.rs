//! # Service Caller
//!
//! The orchestration core never opens network connections itself. Every call to
//! a backend instance, and every health probe, goes through a `ServiceCaller`
//! supplied by the embedding application.
//!
//! The router and the health monitor wrap each invocation in their own
//! `tokio::time::timeout`, so an implementation that ignores the `timeout`
//! argument is still bounded. The argument is passed so that implementations
//! can also bound the underlying I/O and clean up after themselves.

use async_trait::async_trait;
use std::time::Duration;
use thiserror::Error;

use crate::core::types::{ServiceInstance, ServiceRequest, ServiceResponse};

/// Failure reported by a `ServiceCaller`
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum CallError {
    /// The call did not complete in time
    #[error("call timed out")]
    Timeout,

    /// The call completed with an error
    #[error("{0}")]
    Failed(String),
}

impl CallError {
    pub fn failed<S: Into<String>>(reason: S) -> Self {
        Self::Failed(reason.into())
    }
}

/// Capability that performs real calls to service instances
#[async_trait]
pub trait ServiceCaller: Send + Sync {
    /// Forward a request to one instance
    async fn call(
        &self,
        instance: &ServiceInstance,
        request: &ServiceRequest,
        timeout: Duration,
    ) -> Result<ServiceResponse, CallError>;

    /// Lightweight liveness check of one instance
    async fn probe(&self, instance: &ServiceInstance, timeout: Duration) -> Result<(), CallError>;
}

//! # Service Orchestrator Library
//!
//! The orchestration core of a front-door router: it distributes traffic across a
//! dynamic set of named service instances, isolates failing services with
//! per-service circuit breakers, probes instance health in the background and
//! scales instance counts to match observed load.
//!
//! ## Module Map
//!
//! - `core`: error taxonomy, configuration, data types, clock, circuit breaker
//! - `discovery`: the service registry, the single source of truth
//! - `load_balancing`: per-service instance selection strategies
//! - `observability`: logging, metrics, the event stream and the health monitor
//! - `scaling`: the auto-scaler and instance provisioning
//! - `transport`: the `ServiceCaller` capability and an HTTP implementation
//! - `gateway`: the router and the `Orchestrator` facade
//!
//! ## Concurrency Model
//!
//! Routing, health probing and scaling all share the registry. Every
//! read-then-write sequence on a service runs under that service's lock, and
//! upstream calls happen outside of any lock. Background loops each own a
//! timer and stop together through a cancellation token.
//!
//! ## Usage Example
//!
//! ```rust,no_run
//! use service_orchestrator::{Orchestrator, OrchestratorConfig, ServiceRequest};
//! use service_orchestrator::transport::HttpServiceCaller;
//! use std::sync::Arc;
//!
//! # async fn run() -> service_orchestrator::OrchestratorResult<()> {
//! let config = OrchestratorConfig::load_from_file("config/orchestrator.yaml").await?;
//! let orchestrator = Orchestrator::new(config, Arc::new(HttpServiceCaller::new()?))?;
//! orchestrator.start()?;
//!
//! let response = orchestrator.route("pricing", &ServiceRequest::new("quote")).await?;
//! # Ok(())
//! # }
//! ```

/// Core functionality including error types, configuration, and basic data structures
pub mod core;

/// Service registry
pub mod discovery;

/// Gateway router and orchestrator facade
pub mod gateway;

/// Load balancing strategies for distributing requests across instances
pub mod load_balancing;

/// Logging, metrics, orchestration events and health monitoring
pub mod observability;

/// Auto-scaling of instance counts
pub mod scaling;

/// Calls to service instances
pub mod transport;

/// Main error type used throughout the orchestrator
pub use core::error::{OrchestratorError, OrchestratorResult};

/// Main configuration structure
pub use core::config::{LoadBalancingStrategy, OrchestratorConfig, ServiceDefinition, ServicePolicy};

/// Shared data types
pub use core::types::{InstanceSpec, Service, ServiceInstance, ServiceRequest, ServiceResponse};

/// Primary entry points
pub use gateway::{Orchestrator, ServiceStatus, ServiceSummary};
pub use transport::{CallError, ServiceCaller};

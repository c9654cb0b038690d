//! # Orchestrator
//!
//! The facade that wires every component together and owns the background
//! tasks. Embedding applications build one `Orchestrator`, register services
//! (or list them in the configuration), call `start`, and route requests.
//!
//! ```text
//! route() ──▶ GatewayRouter ──▶ CircuitBreaker ──▶ LoadBalancer ──▶ ServiceCaller
//!                   │                                   ▲
//!                   ▼                                   │ snapshot
//!              ServiceRegistry ◀── HealthMonitor, AutoScaler
//! ```
//!
//! ## Rust Concepts Used
//!
//! - Builder pattern for optional collaborators (clock, provisioner)
//! - `CancellationToken` to stop background tasks together
//! - `Arc` everywhere a component is shared between tasks

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::task::JoinHandle;
use tokio_stream::Stream;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use super::router::{breaker_config, GatewayRouter};
use crate::core::circuit_breaker::{CircuitBreakerRegistry, CircuitBreakerSnapshot, CircuitState};
use crate::core::clock::{system_clock, SharedClock};
use crate::core::config::{OrchestratorConfig, ServiceDefinition, ServicePolicy};
use crate::core::error::{OrchestratorError, OrchestratorResult};
use crate::core::types::{
    InstanceSpec, Service, ServiceInstance, ServiceLifecycle, ServiceRequest, ServiceResponse,
};
use crate::discovery::ServiceRegistry;
use crate::load_balancing::LoadBalancer;
use crate::observability::events::{EventBus, EventReceiver, OrchestrationEvent};
use crate::observability::health::HealthMonitor;
use crate::observability::metrics::{MetricsCollector, MetricsSnapshot};
use crate::scaling::{AutoScaler, InstanceProvisioner, SyntheticProvisioner};
use crate::transport::ServiceCaller;

/// Detailed status of one service
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServiceStatus {
    pub service: Service,
    pub policy: ServicePolicy,
    pub instances: Vec<ServiceInstance>,
    pub healthy_instances: usize,
    pub circuit: CircuitBreakerSnapshot,
    pub metrics: MetricsSnapshot,
}

/// One line of the service listing
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServiceSummary {
    pub name: String,
    pub version: String,
    pub status: ServiceLifecycle,
    pub endpoints: usize,
    pub instances: usize,
    pub healthy_instances: usize,
    pub circuit_state: CircuitState,
}

/// Builder for `Orchestrator`
pub struct OrchestratorBuilder {
    config: OrchestratorConfig,
    caller: Arc<dyn ServiceCaller>,
    clock: SharedClock,
    provisioner: Arc<dyn InstanceProvisioner>,
}

impl OrchestratorBuilder {
    /// Clock used by the circuit breakers and the health monitor
    pub fn clock(mut self, clock: SharedClock) -> Self {
        self.clock = clock;
        self
    }

    /// Source of instances for scale-up
    pub fn provisioner(mut self, provisioner: Arc<dyn InstanceProvisioner>) -> Self {
        self.provisioner = provisioner;
        self
    }

    /// Validate the configuration, wire the components and register the
    /// configured services
    pub fn build(self) -> OrchestratorResult<Orchestrator> {
        self.config.validate()?;
        let config = self.config;

        let events = Arc::new(EventBus::new(config.event_buffer_size));
        let registry = Arc::new(ServiceRegistry::new(events.clone()));
        let balancer = Arc::new(LoadBalancer::new());
        let breakers = Arc::new(CircuitBreakerRegistry::new(self.clock.clone(), Some(events.clone())));
        let metrics = Arc::new(MetricsCollector::new());

        let router = GatewayRouter::new(
            registry.clone(),
            balancer.clone(),
            breakers.clone(),
            metrics.clone(),
            self.caller.clone(),
            config.call_timeout,
        );
        let health_monitor = Arc::new(HealthMonitor::new(
            registry.clone(),
            self.caller,
            events.clone(),
            metrics.clone(),
            self.clock,
            config.health_check_interval,
            config.probe_timeout,
        ));
        let autoscaler = Arc::new(AutoScaler::new(
            registry.clone(),
            self.provisioner,
            events.clone(),
            config.scaling_interval,
        ));

        let orchestrator = Orchestrator {
            config,
            events,
            registry,
            balancer,
            breakers,
            metrics,
            router,
            health_monitor,
            autoscaler,
            shutdown: CancellationToken::new(),
            tasks: Mutex::new(Vec::new()),
        };

        for definition in orchestrator.config.services.clone() {
            orchestrator.register_service(definition)?;
        }

        Ok(orchestrator)
    }
}

/// Service orchestration core
pub struct Orchestrator {
    config: OrchestratorConfig,
    events: Arc<EventBus>,
    registry: Arc<ServiceRegistry>,
    balancer: Arc<LoadBalancer>,
    breakers: Arc<CircuitBreakerRegistry>,
    metrics: Arc<MetricsCollector>,
    router: GatewayRouter,
    health_monitor: Arc<HealthMonitor>,
    autoscaler: Arc<AutoScaler>,
    shutdown: CancellationToken,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl std::fmt::Debug for Orchestrator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Orchestrator")
            .field("services", &self.registry.service_names())
            .field("running", &self.is_running())
            .finish()
    }
}

impl Orchestrator {
    /// Start building an orchestrator around a `ServiceCaller`
    pub fn builder(config: OrchestratorConfig, caller: Arc<dyn ServiceCaller>) -> OrchestratorBuilder {
        OrchestratorBuilder {
            config,
            caller,
            clock: system_clock(),
            provisioner: Arc::new(SyntheticProvisioner),
        }
    }

    /// Orchestrator with the system clock and synthetic provisioning
    pub fn new(config: OrchestratorConfig, caller: Arc<dyn ServiceCaller>) -> OrchestratorResult<Self> {
        Self::builder(config, caller).build()
    }

    /// Register a service; it inherits the default policy unless it has its own
    pub fn register_service(&self, definition: ServiceDefinition) -> OrchestratorResult<Service> {
        let policy = self.config.policy_for(&definition);
        policy.validate()?;
        if definition.instances.len() < policy.min_instances {
            return Err(crate::config_error!(
                "Service '{}' has {} instances, fewer than min_instances {}",
                definition.name,
                definition.instances.len(),
                policy.min_instances
            ));
        }

        let name = definition.name.clone();
        let service = self.registry.register(definition, policy)?;

        // A re-registered name starts with fresh routing state
        self.breakers.remove(&name);
        self.balancer.remove_service(&name);
        Ok(service)
    }

    /// Retire a service; idempotent
    ///
    /// Calls already in flight complete normally; later calls get
    /// `ServiceNotFound`.
    pub fn deregister_service(&self, name: &str) -> bool {
        let retired = self.registry.deregister_service(name);
        if retired {
            self.breakers.remove(name);
            self.balancer.remove_service(name);
        }
        retired
    }

    /// Add an instance to a service
    pub fn add_instance(&self, service: &str, spec: InstanceSpec) -> OrchestratorResult<ServiceInstance> {
        self.registry.add_instance(service, spec)
    }

    /// Remove an instance; the last instance of a service cannot be removed
    pub fn remove_instance(&self, service: &str, instance_id: &str) -> OrchestratorResult<ServiceInstance> {
        self.registry.remove_instance(service, instance_id)
    }

    /// Route one request
    pub async fn route(&self, service: &str, request: &ServiceRequest) -> OrchestratorResult<ServiceResponse> {
        self.router.route(service, request).await
    }

    fn circuit_snapshot(&self, name: &str, policy: &ServicePolicy) -> CircuitBreakerSnapshot {
        match self.breakers.get(name) {
            Some(breaker) => breaker.snapshot(),
            None => CircuitBreakerSnapshot {
                service: name.to_string(),
                state: CircuitState::Closed,
                failure_count: 0,
                failure_threshold: breaker_config(policy).failure_threshold,
                times_opened: 0,
                rejected_requests: 0,
            },
        }
    }

    /// Detailed status of a service, active or retired
    pub fn get_service_status(&self, name: &str) -> OrchestratorResult<ServiceStatus> {
        let record = self.registry.describe(name)?;
        let healthy_instances = record.instances.iter().filter(|i| i.is_healthy()).count();
        Ok(ServiceStatus {
            circuit: self.circuit_snapshot(name, &record.policy),
            metrics: self.metrics.snapshot(name),
            healthy_instances,
            service: record.service,
            policy: record.policy,
            instances: record.instances,
        })
    }

    /// Summary of every known service, sorted by name
    pub fn list_services(&self) -> Vec<ServiceSummary> {
        self.registry
            .service_names()
            .into_iter()
            .filter_map(|name| self.registry.describe(&name).ok())
            .map(|record| ServiceSummary {
                circuit_state: self.circuit_snapshot(&record.service.name, &record.policy).state,
                name: record.service.name,
                version: record.service.version,
                status: record.service.status,
                endpoints: record.service.endpoints.len(),
                instances: record.instances.len(),
                healthy_instances: record.instances.iter().filter(|i| i.is_healthy()).count(),
            })
            .collect()
    }

    /// Request metrics of a known service
    pub fn get_metrics(&self, name: &str) -> OrchestratorResult<MetricsSnapshot> {
        self.registry.describe(name)?;
        Ok(self.metrics.snapshot(name))
    }

    /// Request metrics of every service that has seen traffic
    pub fn all_metrics(&self) -> Vec<MetricsSnapshot> {
        self.metrics.all_snapshots()
    }

    /// Up to `limit` most recent events, oldest first
    pub fn recent_events(&self, limit: usize) -> Vec<OrchestrationEvent> {
        self.events.recent_events(limit)
    }

    /// Subscribe to future events
    pub fn subscribe(&self) -> EventReceiver {
        self.events.subscribe()
    }

    /// Future events as a stream
    pub fn event_stream(&self) -> impl Stream<Item = OrchestrationEvent> {
        self.events.stream()
    }

    /// Registry shared by all components
    pub fn registry(&self) -> &Arc<ServiceRegistry> {
        &self.registry
    }

    /// Health monitor, for driving probe rounds by hand
    pub fn health_monitor(&self) -> &Arc<HealthMonitor> {
        &self.health_monitor
    }

    /// Auto-scaler, for driving evaluations by hand
    pub fn autoscaler(&self) -> &Arc<AutoScaler> {
        &self.autoscaler
    }

    /// Active configuration
    pub fn config(&self) -> &OrchestratorConfig {
        &self.config
    }

    /// Whether background tasks are running
    pub fn is_running(&self) -> bool {
        !self.tasks.lock().is_empty()
    }

    /// Spawn the health monitor and auto-scaler; calling twice is a no-op
    ///
    /// Must be called from within a Tokio runtime. After `shutdown` the
    /// orchestrator cannot be restarted.
    pub fn start(&self) -> OrchestratorResult<()> {
        if self.shutdown.is_cancelled() {
            return Err(OrchestratorError::internal("orchestrator has been shut down"));
        }
        let mut tasks = self.tasks.lock();
        if !tasks.is_empty() {
            return Ok(());
        }

        tasks.push(Arc::clone(&self.health_monitor).spawn(self.shutdown.child_token()));
        tasks.push(Arc::clone(&self.autoscaler).spawn(self.shutdown.child_token()));
        info!(
            services = self.registry.active_service_names().len(),
            health_check_interval = ?self.config.health_check_interval,
            scaling_interval = ?self.config.scaling_interval,
            "Orchestrator started"
        );
        Ok(())
    }

    /// Stop background tasks and wait for them to finish
    pub async fn shutdown(&self) {
        self.shutdown.cancel();
        let tasks: Vec<JoinHandle<()>> = std::mem::take(&mut *self.tasks.lock());
        for task in tasks {
            if let Err(err) = task.await {
                warn!(error = %err, "Background task ended abnormally");
            }
        }
        info!("Orchestrator stopped");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::CallError;
    use async_trait::async_trait;
    use std::time::Duration;

    struct Echo;

    #[async_trait]
    impl ServiceCaller for Echo {
        async fn call(
            &self,
            instance: &ServiceInstance,
            _request: &ServiceRequest,
            _timeout: Duration,
        ) -> Result<ServiceResponse, CallError> {
            Ok(ServiceResponse::ok(serde_json::json!(instance.id)))
        }

        async fn probe(&self, _instance: &ServiceInstance, _timeout: Duration) -> Result<(), CallError> {
            Ok(())
        }
    }

    fn config() -> OrchestratorConfig {
        OrchestratorConfig {
            services: vec![ServiceDefinition::new(
                "catalog",
                vec![InstanceSpec::new("c-1", "10.0.0.1", 80)],
            )],
            ..OrchestratorConfig::default()
        }
    }

    #[tokio::test]
    async fn test_configured_services_are_registered() {
        let orchestrator = Orchestrator::new(config(), Arc::new(Echo)).unwrap();
        let services = orchestrator.list_services();
        assert_eq!(services.len(), 1);
        assert_eq!(services[0].name, "catalog");
        assert_eq!(services[0].circuit_state, CircuitState::Closed);

        let response = orchestrator.route("catalog", &ServiceRequest::new("list")).await.unwrap();
        assert_eq!(response.payload, serde_json::json!("c-1"));
        assert_eq!(orchestrator.get_metrics("catalog").unwrap().success_count, 1);
        assert!(orchestrator.get_metrics("unknown").is_err());
    }

    #[tokio::test]
    async fn test_registration_respects_min_instances() {
        let orchestrator = Orchestrator::new(OrchestratorConfig::default(), Arc::new(Echo)).unwrap();
        let policy = ServicePolicy {
            min_instances: 2,
            ..ServicePolicy::default()
        };
        let definition =
            ServiceDefinition::new("search", vec![InstanceSpec::new("s-1", "h", 1)]).with_policy(policy);
        assert!(matches!(
            orchestrator.register_service(definition),
            Err(OrchestratorError::Configuration { .. })
        ));
    }

    #[tokio::test]
    async fn test_status_of_retired_service() {
        let orchestrator = Orchestrator::new(config(), Arc::new(Echo)).unwrap();
        assert!(orchestrator.deregister_service("catalog"));
        assert!(!orchestrator.deregister_service("catalog"));

        let status = orchestrator.get_service_status("catalog").unwrap();
        assert_eq!(status.service.status, ServiceLifecycle::Retired);
        assert!(status.instances.is_empty());
        assert_eq!(status.circuit.state, CircuitState::Closed);
    }

    #[tokio::test]
    async fn test_start_and_shutdown() {
        let orchestrator = Orchestrator::new(config(), Arc::new(Echo)).unwrap();
        orchestrator.start().unwrap();
        orchestrator.start().unwrap();
        assert!(orchestrator.is_running());

        tokio::time::timeout(Duration::from_secs(5), orchestrator.shutdown())
            .await
            .expect("shutdown hung");
        assert!(!orchestrator.is_running());
        assert!(orchestrator.start().is_err());
    }

    #[test]
    fn test_invalid_config_is_rejected() {
        let mut config = config();
        config.defaults.min_instances = 5;
        config.defaults.max_instances = 2;
        assert!(Orchestrator::new(config, Arc::new(Echo)).is_err());
    }
}

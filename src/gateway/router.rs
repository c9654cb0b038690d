//! # Gateway Router
//!
//! The routing entry point. For every request:
//!
//! 1. look the service up (`ServiceNotFound` when absent or retired)
//! 2. ask the service's circuit breaker for a permit (`CircuitOpen` when refused;
//!    nothing else happens and only the error counter moves)
//! 3. ask the load balancer for an instance from a snapshot of healthy instances
//! 4. invoke the `ServiceCaller` under `call_timeout`, outside every lock
//! 5. update the instance counters, the metrics and the circuit breaker
//!
//! Every failure is returned as an `OrchestratorError`; nothing is retried here.
//!
//! ## Rust Concepts Used
//!
//! - `tokio::time::timeout` as the single cancellation point of a call
//! - RAII permits: a `CircuitPermit` dropped by a cancelled future still
//!   reports a failure to its breaker

use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::time::timeout;
use tracing::{debug, warn};

use crate::core::circuit_breaker::{CircuitBreakerConfig, CircuitBreakerRegistry};
use crate::core::config::ServicePolicy;
use crate::core::error::{OrchestratorError, OrchestratorResult};
use crate::core::types::{ServiceInstance, ServiceRequest, ServiceResponse};
use crate::discovery::ServiceRegistry;
use crate::load_balancing::LoadBalancer;
use crate::observability::metrics::MetricsCollector;
use crate::transport::{CallError, ServiceCaller};

/// Breaker settings derived from a service policy
pub fn breaker_config(policy: &ServicePolicy) -> CircuitBreakerConfig {
    CircuitBreakerConfig {
        failure_threshold: policy.circuit_threshold,
        open_timeout: policy.open_timeout,
    }
}

/// Routes requests to service instances
pub struct GatewayRouter {
    registry: Arc<ServiceRegistry>,
    balancer: Arc<LoadBalancer>,
    breakers: Arc<CircuitBreakerRegistry>,
    metrics: Arc<MetricsCollector>,
    caller: Arc<dyn ServiceCaller>,
    call_timeout: Duration,
}

impl std::fmt::Debug for GatewayRouter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GatewayRouter")
            .field("call_timeout", &self.call_timeout)
            .finish()
    }
}

impl GatewayRouter {
    pub fn new(
        registry: Arc<ServiceRegistry>,
        balancer: Arc<LoadBalancer>,
        breakers: Arc<CircuitBreakerRegistry>,
        metrics: Arc<MetricsCollector>,
        caller: Arc<dyn ServiceCaller>,
        call_timeout: Duration,
    ) -> Self {
        Self {
            registry,
            balancer,
            breakers,
            metrics,
            caller,
            call_timeout,
        }
    }

    /// Route one request to an instance of `service`
    pub async fn route(&self, service: &str, request: &ServiceRequest) -> OrchestratorResult<ServiceResponse> {
        let (_, policy) = self.registry.lookup(service)?;
        let breaker = self.breakers.get_or_create(service, breaker_config(&policy));

        let permit = match breaker.try_acquire() {
            Ok(permit) => permit,
            Err(err) => {
                debug!(service = %service, "Request rejected by open circuit");
                self.metrics.record_rejected(service);
                return Err(err);
            }
        };

        let instance = match self
            .registry
            .list_healthy_instances(service)
            .and_then(|healthy| self.balancer.select_instance(service, policy.strategy, &healthy))
        {
            Ok(instance) => instance,
            Err(err) => {
                if err.counts_against_circuit() {
                    permit.record_failure();
                    self.metrics.record_error(service, err.error_type(), None);
                    warn!(service = %service, error = %err, "No instance available");
                } else {
                    permit.release();
                }
                self.metrics.record_circuit_state(service, breaker.state().kind());
                return Err(err);
            }
        };

        let started = Instant::now();
        let result = self.call(service, &instance, request).await;
        let latency = started.elapsed();

        // The instance may have been removed while the call was in flight
        if let Err(err) = self
            .registry
            .increment_instance_counters(service, &instance.id, result.is_ok())
        {
            debug!(service = %service, instance_id = %instance.id, error = %err, "Counters not updated");
        }

        match &result {
            Ok(_) => {
                permit.record_success();
                self.metrics.record_success(service, latency);
                debug!(
                    service = %service,
                    instance_id = %instance.id,
                    latency_ms = latency.as_millis() as u64,
                    "Request completed"
                );
            }
            Err(err) => {
                permit.record_failure();
                self.metrics.record_error(service, err.error_type(), Some(latency));
                warn!(
                    service = %service,
                    instance_id = %instance.id,
                    error = %err,
                    latency_ms = latency.as_millis() as u64,
                    "Request failed"
                );
            }
        }
        self.metrics.record_circuit_state(service, breaker.state().kind());

        result
    }

    async fn call(
        &self,
        service: &str,
        instance: &ServiceInstance,
        request: &ServiceRequest,
    ) -> OrchestratorResult<ServiceResponse> {
        let timed_out = || OrchestratorError::CallTimeout {
            service: service.to_string(),
            instance_id: instance.id.clone(),
            timeout_ms: self.call_timeout.as_millis() as u64,
        };

        match timeout(self.call_timeout, self.caller.call(instance, request, self.call_timeout)).await {
            Ok(Ok(response)) => Ok(response),
            Ok(Err(CallError::Timeout)) | Err(_) => Err(timed_out()),
            Ok(Err(CallError::Failed(reason))) => Err(OrchestratorError::CallFailed {
                service: service.to_string(),
                instance_id: instance.id.clone(),
                reason,
            }),
        }
    }
}

//! # Load Balancer Module
//!
//! Per-service load balancer state. Each service gets its own strategy
//! instance (and therefore its own round-robin cursor), created lazily the
//! first time the service is routed to and dropped when the service is
//! deregistered.
//!
//! ## Rust Concepts Explained
//!
//! - `DashMap` holds the per-service state without a global lock
//! - `Arc<dyn BalancingStrategy>` lets a selection run after the map guard is released
//! - Selection returns an owned `ServiceInstance` copied from the snapshot
//!
//! ## Usage Example
//!
//! ```rust,no_run
//! # use service_orchestrator::load_balancing::LoadBalancer;
//! # use service_orchestrator::core::config::LoadBalancingStrategy;
//! # fn demo(balancer: &LoadBalancer, snapshot: Vec<service_orchestrator::core::types::ServiceInstance>) {
//! let selected = balancer.select_instance("pricing", LoadBalancingStrategy::RoundRobin, &snapshot);
//! # }
//! ```

use dashmap::DashMap;
use metrics::counter;
use serde::Serialize;
use std::sync::Arc;
use tracing::debug;

use super::strategies::{strategy_for, BalancingStrategy};
use crate::core::config::LoadBalancingStrategy;
use crate::core::error::{OrchestratorError, OrchestratorResult};
use crate::core::types::ServiceInstance;

/// Per-service balancing state
struct BalancerState {
    kind: LoadBalancingStrategy,
    strategy: Arc<dyn BalancingStrategy>,
}

/// Load balancer statistics for monitoring
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LoadBalancerStats {
    pub service: String,
    pub algorithm: String,
    pub total_selections: u64,
}

/// Load balancer holding one strategy per service
#[derive(Default)]
pub struct LoadBalancer {
    services: DashMap<String, BalancerState>,
}

impl std::fmt::Debug for LoadBalancer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LoadBalancer")
            .field("services", &self.services.len())
            .finish()
    }
}

impl LoadBalancer {
    pub fn new() -> Self {
        Self::default()
    }

    fn strategy(&self, service: &str, kind: LoadBalancingStrategy) -> Arc<dyn BalancingStrategy> {
        if let Some(state) = self.services.get(service) {
            if state.kind == kind {
                return Arc::clone(&state.strategy);
            }
        }

        let mut state = self
            .services
            .entry(service.to_string())
            .or_insert_with(|| BalancerState {
                kind,
                strategy: Arc::from(strategy_for(kind)),
            });
        if state.kind != kind {
            *state = BalancerState {
                kind,
                strategy: Arc::from(strategy_for(kind)),
            };
        }
        Arc::clone(&state.strategy)
    }

    /// Pick one instance from a snapshot of healthy instances
    pub fn select_instance(
        &self,
        service: &str,
        kind: LoadBalancingStrategy,
        healthy: &[ServiceInstance],
    ) -> OrchestratorResult<ServiceInstance> {
        let strategy = self.strategy(service, kind);

        let Some(selected) = strategy.select(healthy) else {
            counter!("orchestrator_lb_failed_selections_total", "service" => service.to_string()).increment(1);
            return Err(OrchestratorError::no_healthy_instance(service));
        };

        counter!(
            "orchestrator_lb_selections_total",
            "service" => service.to_string(),
            "algorithm" => strategy.algorithm_name()
        )
        .increment(1);
        debug!(
            service = %service,
            instance_id = %selected.id,
            instance_address = %selected.address(),
            algorithm = strategy.algorithm_name(),
            "Selected instance"
        );
        Ok(selected.clone())
    }

    /// Drop the state of a service
    pub fn remove_service(&self, service: &str) -> bool {
        self.services.remove(service).is_some()
    }

    /// Statistics for one service, if it has been routed to
    pub fn stats(&self, service: &str) -> Option<LoadBalancerStats> {
        self.services.get(service).map(|state| LoadBalancerStats {
            service: service.to_string(),
            algorithm: state.strategy.algorithm_name().to_string(),
            total_selections: state.strategy.selections(),
        })
    }
}

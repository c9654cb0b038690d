//! # Health Monitor
//!
//! Background loop that probes every instance of every active service and
//! records the result in the registry.
//!
//! ## Key Features
//! - One timer task, ticking at the global `health_check_interval`
//! - Per-service intervals: a service is probed only when its own interval has
//!   elapsed since its previous probe round
//! - All probes of a tick run concurrently, each bounded by `probe_timeout`
//! - No retries inside a tick; a failed probe marks the instance unhealthy until
//!   the next successful one
//! - Health changes and probe failures are published as orchestration events
//!
//! Probing and routing only meet in the registry. The monitor never holds a
//! registry lock while a probe is in flight.
//!
//! ## Rust Concepts Used
//! - `Arc<T>` for shared ownership across async tasks
//! - `futures::future::join_all` to drive many probes at once
//! - `tokio::select!` with a `CancellationToken` for clean shutdown

use dashmap::DashMap;
use futures::future::join_all;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::task::JoinHandle;
use tokio::time::{interval, timeout, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::core::clock::SharedClock;
use crate::core::types::ServiceInstance;
use crate::discovery::ServiceRegistry;
use crate::observability::events::{EventBus, EventType, OrchestrationEvent};
use crate::observability::metrics::MetricsCollector;
use crate::transport::{CallError, ServiceCaller};

/// Summary of one monitor tick
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct HealthTickReport {
    /// Services whose interval had elapsed
    pub services_probed: usize,
    /// Probes that succeeded
    pub healthy: usize,
    /// Probes that failed or timed out
    pub failed: usize,
    /// Instances whose health status changed
    pub changed: usize,
}

/// Periodic prober of service instances
pub struct HealthMonitor {
    registry: Arc<ServiceRegistry>,
    caller: Arc<dyn ServiceCaller>,
    events: Arc<EventBus>,
    metrics: Arc<MetricsCollector>,
    clock: SharedClock,
    tick_interval: Duration,
    probe_timeout: Duration,
    last_probed: DashMap<String, Instant>,
}

impl std::fmt::Debug for HealthMonitor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HealthMonitor")
            .field("tick_interval", &self.tick_interval)
            .field("probe_timeout", &self.probe_timeout)
            .finish()
    }
}

impl HealthMonitor {
    /// Create a monitor
    pub fn new(
        registry: Arc<ServiceRegistry>,
        caller: Arc<dyn ServiceCaller>,
        events: Arc<EventBus>,
        metrics: Arc<MetricsCollector>,
        clock: SharedClock,
        tick_interval: Duration,
        probe_timeout: Duration,
    ) -> Self {
        Self {
            registry,
            caller,
            events,
            metrics,
            clock,
            tick_interval,
            probe_timeout,
            last_probed: DashMap::new(),
        }
    }

    fn is_due(&self, service: &str, interval: Duration, now: Instant) -> bool {
        match self.last_probed.get(service) {
            Some(last) => now.saturating_duration_since(*last) >= interval,
            None => true,
        }
    }

    async fn probe(&self, instance: ServiceInstance) -> (ServiceInstance, Result<(), CallError>) {
        let result = match timeout(self.probe_timeout, self.caller.probe(&instance, self.probe_timeout)).await {
            Ok(result) => result,
            Err(_) => Err(CallError::Timeout),
        };
        (instance, result)
    }

    /// Run one probe round over every due service
    pub async fn run_once(&self) -> HealthTickReport {
        let now = self.clock.now();
        let mut report = HealthTickReport::default();
        let mut targets = Vec::new();

        for name in self.registry.active_service_names() {
            let Ok((_, policy)) = self.registry.lookup(&name) else {
                continue;
            };
            if !self.is_due(&name, policy.health_check_interval, now) {
                continue;
            }
            let Ok(instances) = self.registry.list_instances(&name) else {
                continue;
            };
            self.last_probed.insert(name, now);
            report.services_probed += 1;
            targets.extend(instances);
        }

        // Forget services that have been retired
        self.last_probed
            .retain(|name, _| self.registry.lookup(name).is_ok());

        let results = join_all(targets.into_iter().map(|instance| self.probe(instance))).await;

        for (instance, result) in results {
            let healthy = result.is_ok();
            if let Err(err) = &result {
                report.failed += 1;
                debug!(
                    service = %instance.service_name,
                    instance_id = %instance.id,
                    error = %err,
                    "Health probe failed"
                );
                self.events.publish(OrchestrationEvent::instance(
                    instance.service_name.clone(),
                    instance.id.clone(),
                    EventType::ProbeFailed,
                    err.to_string(),
                ));
            } else {
                report.healthy += 1;
            }

            // The instance may have been scaled away while the probe was in flight
            match self
                .registry
                .set_instance_health(&instance.service_name, &instance.id, healthy)
            {
                Ok(Some(_)) => report.changed += 1,
                Ok(None) => {}
                Err(err) => debug!(
                    service = %instance.service_name,
                    instance_id = %instance.id,
                    error = %err,
                    "Discarding probe result"
                ),
            }
        }

        for name in self.registry.active_service_names() {
            if let Ok(instances) = self.registry.list_instances(&name) {
                let healthy = instances.iter().filter(|i| i.is_healthy()).count();
                self.metrics.record_instance_counts(&name, instances.len(), healthy);
            }
        }

        report
    }

    /// Spawn the monitor loop; it stops when `token` is cancelled
    pub fn spawn(self: Arc<Self>, token: CancellationToken) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut ticker = interval(self.tick_interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            info!(interval = ?self.tick_interval, "Health monitor started");

            loop {
                tokio::select! {
                    _ = token.cancelled() => break,
                    _ = ticker.tick() => {
                        let report = self.run_once().await;
                        debug!(
                            services = report.services_probed,
                            healthy = report.healthy,
                            failed = report.failed,
                            changed = report.changed,
                            "Health tick completed"
                        );
                    }
                }
            }

            info!("Health monitor stopped");
        })
    }
}

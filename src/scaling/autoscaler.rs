//! # Auto-Scaler
//!
//! Background loop that compares each service's recent load with its policy
//! thresholds and adds or removes one instance at a time.
//!
//! ## Load Measurement
//!
//! Load is the number of requests that healthy instances received since the
//! previous evaluation, divided by the number of healthy instances. The
//! registry closes the window and opens the next one as part of the same
//! locked step that applies the decision, so cumulative counters never drive
//! scaling.
//!
//! ## Policy
//!
//! - `avg_load > scale_up_threshold` and `instances < max_instances`: add one
//!   instance from the `InstanceProvisioner`
//! - `avg_load < scale_down_threshold` and `instances > min_instances`: remove
//!   the instance with the lowest request count (ties by id)
//! - otherwise, or when no instance is healthy: do nothing
//!
//! At most one action per service per tick. A failed evaluation is published
//! as a `ScaleFailed` event and never stops the loop.

use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use super::provisioner::InstanceProvisioner;
use crate::core::config::ServicePolicy;
use crate::core::error::{OrchestratorError, OrchestratorResult};
use crate::discovery::{LoadWindow, ScaleAction, ScaleOutcome, ServiceRegistry};
use crate::observability::events::{EventBus, EventType, OrchestrationEvent};

/// Decision made for one service in one tick
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ScalingDecision {
    /// No action needed
    None,
    /// Add one instance
    ScaleUp,
    /// Remove one instance
    ScaleDown,
}

/// Pure scaling policy over one load window
pub fn evaluate(policy: &ServicePolicy, window: &LoadWindow) -> ScalingDecision {
    let Some(average) = window.average_load() else {
        return ScalingDecision::None;
    };

    if average > policy.scale_up_threshold && window.total_instances < policy.max_instances {
        ScalingDecision::ScaleUp
    } else if average < policy.scale_down_threshold && window.total_instances > policy.min_instances {
        ScalingDecision::ScaleDown
    } else {
        ScalingDecision::None
    }
}

/// Summary of one auto-scaler tick
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScalingTickReport {
    pub services_evaluated: usize,
    pub scaled_up: usize,
    pub scaled_down: usize,
    pub failed: usize,
}

/// Periodic scaler of service instance counts
pub struct AutoScaler {
    registry: Arc<ServiceRegistry>,
    provisioner: Arc<dyn InstanceProvisioner>,
    events: Arc<EventBus>,
    tick_interval: Duration,
}

impl std::fmt::Debug for AutoScaler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AutoScaler")
            .field("tick_interval", &self.tick_interval)
            .finish()
    }
}

impl AutoScaler {
    pub fn new(
        registry: Arc<ServiceRegistry>,
        provisioner: Arc<dyn InstanceProvisioner>,
        events: Arc<EventBus>,
        tick_interval: Duration,
    ) -> Self {
        Self {
            registry,
            provisioner,
            events,
            tick_interval,
        }
    }

    /// Evaluate one service and apply at most one scaling action
    pub fn evaluate_service(&self, service: &str) -> OrchestratorResult<ScaleOutcome> {
        let (_, policy) = self.registry.lookup(service)?;

        let outcome = self.registry.rescale(service, |window, instances| {
            Ok(match evaluate(&policy, window) {
                ScalingDecision::None => ScaleAction::Hold,
                ScalingDecision::ScaleUp => ScaleAction::Add(self.provisioner.provision(service, instances)?),
                ScalingDecision::ScaleDown => ScaleAction::RemoveLeastLoaded,
            })
        })?;

        match &outcome {
            ScaleOutcome::Held { window } => {
                debug!(service = %service, load = ?window.average_load(), "No scaling needed");
            }
            ScaleOutcome::Added { window, instance } => {
                self.events.publish(OrchestrationEvent::instance(
                    service,
                    instance.id.clone(),
                    EventType::ScaledUp,
                    format!(
                        "added {} at {}: average load {:.2} above {}, now {} instances",
                        instance.id,
                        instance.address(),
                        window.average_load().unwrap_or_default(),
                        policy.scale_up_threshold,
                        window.total_instances + 1
                    ),
                ));
            }
            ScaleOutcome::Removed { window, instance } => {
                self.events.publish(OrchestrationEvent::instance(
                    service,
                    instance.id.clone(),
                    EventType::ScaledDown,
                    format!(
                        "removed {}: average load {:.2} below {}, now {} instances",
                        instance.id,
                        window.average_load().unwrap_or_default(),
                        policy.scale_down_threshold,
                        window.total_instances.saturating_sub(1)
                    ),
                ));
            }
        }

        Ok(outcome)
    }

    /// Evaluate every active service once
    pub fn run_once(&self) -> ScalingTickReport {
        let mut report = ScalingTickReport::default();

        for service in self.registry.active_service_names() {
            report.services_evaluated += 1;
            match self.evaluate_service(&service) {
                Ok(ScaleOutcome::Held { .. }) => {}
                Ok(ScaleOutcome::Added { .. }) => report.scaled_up += 1,
                Ok(ScaleOutcome::Removed { .. }) => report.scaled_down += 1,
                Err(OrchestratorError::ServiceNotFound { .. }) => {
                    // Deregistered since the name list was taken
                    report.services_evaluated -= 1;
                }
                Err(err) => {
                    report.failed += 1;
                    self.events.publish(OrchestrationEvent::service(
                        service.clone(),
                        EventType::ScaleFailed,
                        err.to_string(),
                    ));
                }
            }
        }

        report
    }

    /// Spawn the scaling loop; it stops when `token` is cancelled
    ///
    /// The first evaluation happens one full interval after start so the
    /// first window covers a complete interval.
    pub fn spawn(self: Arc<Self>, token: CancellationToken) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut ticker = interval_at(Instant::now() + self.tick_interval, self.tick_interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            info!(interval = ?self.tick_interval, "Auto-scaler started");

            loop {
                tokio::select! {
                    _ = token.cancelled() => break,
                    _ = ticker.tick() => {
                        let report = self.run_once();
                        debug!(
                            services = report.services_evaluated,
                            scaled_up = report.scaled_up,
                            scaled_down = report.scaled_down,
                            failed = report.failed,
                            "Scaling tick completed"
                        );
                    }
                }
            }

            info!("Auto-scaler stopped");
        })
    }
}

//! # Service Registry
//!
//! The registry is the single source of truth for services and their instances.
//! The load balancer, health monitor, auto-scaler and gateway router all go
//! through it, and every mutation is atomic from the caller's point of view.
//!
//! ## Concurrency Model
//!
//! - `DashMap` maps a service name to its record; the map lock is held only long
//!   enough to clone the record's `Arc`.
//! - Each record sits behind its own `parking_lot::RwLock`. Read-then-write
//!   sequences (instance add/remove, scaling decisions, counter updates) take the
//!   write lock once and finish before releasing it.
//! - Readers receive copies. `list_healthy_instances` returns an owned `Vec`, so
//!   balancing decisions never observe a half-applied health update.
//! - Registration is the only operation that holds a map entry while locking a
//!   record; nothing locks a record and then touches the map.
//!
//! ## Rust Concepts Used
//!
//! - `Arc<RwLock<T>>` for shared ownership with interior mutability
//! - The `entry` API for check-then-insert without a race
//! - Closures (`FnOnce`) to run caller logic inside the critical section

use chrono::Utc;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::sync::Arc;
use tracing::{debug, info};

use crate::core::config::{ServiceDefinition, ServicePolicy};
use crate::core::error::{OrchestratorError, OrchestratorResult};
use crate::core::types::{HealthStatus, InstanceSpec, Service, ServiceInstance, ServiceLifecycle};
use crate::observability::events::{EventBus, EventType, OrchestrationEvent};

/// Everything the registry knows about one service
#[derive(Debug, Clone)]
pub struct ServiceRecord {
    pub service: Service,
    pub policy: ServicePolicy,
    pub instances: Vec<ServiceInstance>,
}

impl ServiceRecord {
    fn is_active(&self) -> bool {
        self.service.status == ServiceLifecycle::Active
    }

    fn instance_mut(&mut self, instance_id: &str) -> OrchestratorResult<&mut ServiceInstance> {
        let service = self.service.name.clone();
        self.instances
            .iter_mut()
            .find(|instance| instance.id == instance_id)
            .ok_or_else(|| OrchestratorError::instance_not_found(service, instance_id))
    }
}

/// Load observed over one scaling window
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LoadWindow {
    /// Requests received by healthy instances during the window
    pub healthy_requests: u64,
    /// Number of healthy instances
    pub healthy_instances: usize,
    /// Number of instances regardless of health
    pub total_instances: usize,
}

impl LoadWindow {
    /// Average requests per healthy instance; `None` without healthy instances
    pub fn average_load(&self) -> Option<f64> {
        if self.healthy_instances == 0 {
            None
        } else {
            Some(self.healthy_requests as f64 / self.healthy_instances as f64)
        }
    }
}

/// Change requested by a scaling decision
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ScaleAction {
    /// Leave the service as it is
    Hold,
    /// Add an instance built from this spec
    Add(InstanceSpec),
    /// Remove the instance with the lowest request count (ties by id)
    RemoveLeastLoaded,
}

/// Result of a scaling evaluation
#[derive(Debug, Clone, PartialEq)]
pub enum ScaleOutcome {
    Held { window: LoadWindow },
    Added { window: LoadWindow, instance: ServiceInstance },
    Removed { window: LoadWindow, instance: ServiceInstance },
}

/// Registry statistics
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RegistryStats {
    pub active_services: usize,
    pub retired_services: usize,
    pub total_instances: usize,
    pub healthy_instances: usize,
}

/// In-memory registry of services and instances
#[derive(Debug)]
pub struct ServiceRegistry {
    services: DashMap<String, Arc<RwLock<ServiceRecord>>>,
    events: Arc<EventBus>,
}

impl ServiceRegistry {
    /// Create an empty registry publishing to `events`
    pub fn new(events: Arc<EventBus>) -> Self {
        Self {
            services: DashMap::new(),
            events,
        }
    }

    fn record(&self, name: &str) -> OrchestratorResult<Arc<RwLock<ServiceRecord>>> {
        self.services
            .get(name)
            .map(|entry| Arc::clone(entry.value()))
            .ok_or_else(|| OrchestratorError::not_found(name))
    }

    fn active_record(&self, name: &str) -> OrchestratorResult<Arc<RwLock<ServiceRecord>>> {
        let record = self.record(name)?;
        if record.read().is_active() {
            Ok(record)
        } else {
            Err(OrchestratorError::not_found(name))
        }
    }

    /// Register a service with the default policy
    pub fn register_service(
        &self,
        name: &str,
        endpoints: Vec<String>,
        instances: Vec<InstanceSpec>,
    ) -> OrchestratorResult<Service> {
        let definition = ServiceDefinition::new(name, instances).with_endpoints(endpoints);
        self.register(definition, ServicePolicy::default())
    }

    /// Register a service and its initial instances
    ///
    /// Fails with `DuplicateService` while a service of the same name is active.
    /// A retired name can be registered again and starts from a clean record.
    pub fn register(&self, definition: ServiceDefinition, policy: ServicePolicy) -> OrchestratorResult<Service> {
        if definition.instances.is_empty() {
            return Err(OrchestratorError::config(format!(
                "Service '{}' must have at least one instance",
                definition.name
            )));
        }
        let mut seen = HashSet::new();
        for spec in &definition.instances {
            if !seen.insert(spec.id.as_str()) {
                return Err(OrchestratorError::DuplicateInstance {
                    service: definition.name.clone(),
                    instance_id: spec.id.clone(),
                });
            }
        }

        let service = Service {
            name: definition.name.clone(),
            endpoints: definition.endpoints,
            version: definition.version,
            status: ServiceLifecycle::Active,
        };
        let instances: Vec<ServiceInstance> = definition
            .instances
            .into_iter()
            .map(|spec| ServiceInstance::from_spec(&service.name, spec))
            .collect();
        let instance_count = instances.len();
        let record = Arc::new(RwLock::new(ServiceRecord {
            service: service.clone(),
            policy,
            instances,
        }));

        match self.services.entry(service.name.clone()) {
            Entry::Occupied(mut existing) => {
                if existing.get().read().is_active() {
                    return Err(OrchestratorError::DuplicateService {
                        service: service.name.clone(),
                    });
                }
                existing.insert(record);
            }
            Entry::Vacant(vacant) => {
                vacant.insert(record);
            }
        }

        info!(service = %service.name, instances = instance_count, "Registered service");
        self.events.publish(OrchestrationEvent::service(
            service.name.clone(),
            EventType::ServiceRegistered,
            format!("version {} with {} instances", service.version, instance_count),
        ));
        Ok(service)
    }

    /// Retire a service and drop its instances
    ///
    /// Idempotent: returns `false` when the service was unknown or already retired.
    pub fn deregister_service(&self, name: &str) -> bool {
        let Ok(record) = self.record(name) else {
            return false;
        };

        let removed = {
            let mut record = record.write();
            if !record.is_active() {
                return false;
            }
            record.service.status = ServiceLifecycle::Retired;
            std::mem::take(&mut record.instances).len()
        };

        info!(service = %name, removed_instances = removed, "Deregistered service");
        self.events.publish(OrchestrationEvent::service(
            name,
            EventType::ServiceDeregistered,
            format!("{} instances removed", removed),
        ));
        true
    }

    /// Add an instance to an active service
    pub fn add_instance(&self, name: &str, spec: InstanceSpec) -> OrchestratorResult<ServiceInstance> {
        let record = self.active_record(name)?;
        let mut record = record.write();
        Self::insert_instance(&mut record, spec)
    }

    fn insert_instance(record: &mut ServiceRecord, spec: InstanceSpec) -> OrchestratorResult<ServiceInstance> {
        if !record.is_active() {
            return Err(OrchestratorError::not_found(record.service.name.clone()));
        }
        if record.instances.iter().any(|instance| instance.id == spec.id) {
            return Err(OrchestratorError::DuplicateInstance {
                service: record.service.name.clone(),
                instance_id: spec.id,
            });
        }
        let instance = ServiceInstance::from_spec(&record.service.name, spec);
        record.instances.push(instance.clone());
        debug!(service = %record.service.name, instance_id = %instance.id, "Added instance");
        Ok(instance)
    }

    /// Remove an instance from an active service
    ///
    /// Fails with `LastInstance`, leaving the registry unchanged, when the
    /// instance is the only one left.
    pub fn remove_instance(&self, name: &str, instance_id: &str) -> OrchestratorResult<ServiceInstance> {
        let record = self.active_record(name)?;
        let mut record = record.write();
        Self::take_instance(&mut record, instance_id)
    }

    fn take_instance(record: &mut ServiceRecord, instance_id: &str) -> OrchestratorResult<ServiceInstance> {
        let position = record
            .instances
            .iter()
            .position(|instance| instance.id == instance_id)
            .ok_or_else(|| OrchestratorError::instance_not_found(record.service.name.clone(), instance_id))?;
        if record.instances.len() == 1 {
            return Err(OrchestratorError::LastInstance {
                service: record.service.name.clone(),
                instance_id: instance_id.to_string(),
            });
        }
        let instance = record.instances.remove(position);
        debug!(service = %record.service.name, instance_id = %instance_id, "Removed instance");
        Ok(instance)
    }

    /// Copy of the instances currently marked healthy, in registration order
    pub fn list_healthy_instances(&self, name: &str) -> OrchestratorResult<Vec<ServiceInstance>> {
        let record = self.active_record(name)?;
        let record = record.read();
        Ok(record
            .instances
            .iter()
            .filter(|instance| instance.is_healthy())
            .cloned()
            .collect())
    }

    /// Copy of every instance of an active service
    pub fn list_instances(&self, name: &str) -> OrchestratorResult<Vec<ServiceInstance>> {
        let record = self.active_record(name)?;
        let instances = record.read().instances.clone();
        Ok(instances)
    }

    /// Record a health probe result
    ///
    /// Returns the previous status when it changed. Status changes are published
    /// as `InstanceHealthChanged` events.
    pub fn set_instance_health(
        &self,
        name: &str,
        instance_id: &str,
        healthy: bool,
    ) -> OrchestratorResult<Option<HealthStatus>> {
        let new_status = if healthy {
            HealthStatus::Healthy
        } else {
            HealthStatus::Unhealthy
        };

        let record = self.active_record(name)?;
        let old_status = {
            let mut record = record.write();
            let instance = record.instance_mut(instance_id)?;
            let old_status = instance.health;
            instance.health = new_status;
            instance.last_health_check = Some(Utc::now());
            old_status
        };

        if old_status == new_status {
            return Ok(None);
        }

        self.events.publish(OrchestrationEvent::instance(
            name,
            instance_id,
            EventType::InstanceHealthChanged,
            format!("{} -> {}", old_status, new_status),
        ));
        Ok(Some(old_status))
    }

    /// Count a completed call against an instance
    pub fn increment_instance_counters(&self, name: &str, instance_id: &str, success: bool) -> OrchestratorResult<()> {
        let record = self.record(name)?;
        let mut record = record.write();
        let instance = record.instance_mut(instance_id)?;
        instance.request_count += 1;
        if !success {
            instance.error_count += 1;
        }
        Ok(())
    }

    /// Service and policy of an active service
    pub fn lookup(&self, name: &str) -> OrchestratorResult<(Service, ServicePolicy)> {
        let record = self.active_record(name)?;
        let record = record.read();
        Ok((record.service.clone(), record.policy.clone()))
    }

    /// Full copy of a service record, active or retired
    pub fn describe(&self, name: &str) -> OrchestratorResult<ServiceRecord> {
        let record = self.record(name)?;
        let copy = record.read().clone();
        Ok(copy)
    }

    /// Names of every known service, sorted
    pub fn service_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.services.iter().map(|entry| entry.key().clone()).collect();
        names.sort();
        names
    }

    /// Names of active services, sorted
    pub fn active_service_names(&self) -> Vec<String> {
        let records: Vec<(String, Arc<RwLock<ServiceRecord>>)> = self
            .services
            .iter()
            .map(|entry| (entry.key().clone(), Arc::clone(entry.value())))
            .collect();
        let mut names: Vec<String> = records
            .into_iter()
            .filter(|(_, record)| record.read().is_active())
            .map(|(name, _)| name)
            .collect();
        names.sort();
        names
    }

    /// Close the current scaling window of a service and apply a decision
    ///
    /// The window covers requests received by healthy instances since the
    /// previous successful call. Measuring, applying the decision and resetting
    /// the window happen under one write lock, so no other mutation can
    /// interleave. When the decision or its application fails the record is
    /// left untouched, window included.
    pub fn rescale<F>(&self, name: &str, decide: F) -> OrchestratorResult<ScaleOutcome>
    where
        F: FnOnce(&LoadWindow, &[ServiceInstance]) -> OrchestratorResult<ScaleAction>,
    {
        let record = self.active_record(name)?;
        let mut record = record.write();

        let window = LoadWindow {
            healthy_requests: record
                .instances
                .iter()
                .filter(|instance| instance.is_healthy())
                .map(ServiceInstance::window_requests)
                .sum(),
            healthy_instances: record.instances.iter().filter(|i| i.is_healthy()).count(),
            total_instances: record.instances.len(),
        };

        let outcome = match decide(&window, &record.instances)? {
            ScaleAction::Hold => ScaleOutcome::Held { window },
            ScaleAction::Add(spec) => {
                let instance = Self::insert_instance(&mut record, spec)?;
                ScaleOutcome::Added { window, instance }
            }
            ScaleAction::RemoveLeastLoaded => {
                let victim = record
                    .instances
                    .iter()
                    .min_by(|a, b| a.request_count.cmp(&b.request_count).then_with(|| a.id.cmp(&b.id)))
                    .map(|instance| instance.id.clone())
                    .ok_or_else(|| OrchestratorError::internal("service record has no instances"))?;
                let instance = Self::take_instance(&mut record, &victim)?;
                ScaleOutcome::Removed { window, instance }
            }
        };

        for instance in record.instances.iter_mut() {
            instance.window_start_requests = instance.request_count;
        }
        Ok(outcome)
    }

    /// Registry statistics
    pub fn stats(&self) -> RegistryStats {
        let records: Vec<Arc<RwLock<ServiceRecord>>> =
            self.services.iter().map(|entry| Arc::clone(entry.value())).collect();

        records.iter().fold(RegistryStats::default(), |mut stats, record| {
            let record = record.read();
            if record.is_active() {
                stats.active_services += 1;
            } else {
                stats.retired_services += 1;
            }
            stats.total_instances += record.instances.len();
            stats.healthy_instances += record.instances.iter().filter(|i| i.is_healthy()).count();
            stats
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn registry() -> ServiceRegistry {
        ServiceRegistry::new(Arc::new(EventBus::new(64)))
    }

    fn specs(n: usize) -> Vec<InstanceSpec> {
        (1..=n)
            .map(|i| InstanceSpec::new(format!("i-{}", i), "127.0.0.1", 8000 + i as u16))
            .collect()
    }

    #[test]
    fn test_register_and_lookup() {
        let registry = registry();
        let service = registry
            .register_service("pricing", vec!["quote".to_string()], specs(2))
            .unwrap();
        assert_eq!(service.status, ServiceLifecycle::Active);

        let (service, policy) = registry.lookup("pricing").unwrap();
        assert_eq!(service.endpoints, vec!["quote"]);
        assert_eq!(policy, ServicePolicy::default());
        assert_eq!(registry.list_healthy_instances("pricing").unwrap().len(), 2);
    }

    #[test]
    fn test_duplicate_registration_rejected() {
        let registry = registry();
        registry.register_service("pricing", vec![], specs(1)).unwrap();
        let err = registry.register_service("pricing", vec![], specs(1)).unwrap_err();
        assert!(matches!(err, OrchestratorError::DuplicateService { .. }));
    }

    #[test]
    fn test_registration_requires_instances_with_unique_ids() {
        let registry = registry();
        assert!(matches!(
            registry.register_service("empty", vec![], vec![]),
            Err(OrchestratorError::Configuration { .. })
        ));

        let twins = vec![InstanceSpec::new("a", "h", 1), InstanceSpec::new("a", "h", 2)];
        assert!(matches!(
            registry.register_service("twins", vec![], twins),
            Err(OrchestratorError::DuplicateInstance { .. })
        ));
    }

    #[test]
    fn test_deregister_is_idempotent_and_allows_reregistration() {
        let registry = registry();
        registry.register_service("pricing", vec![], specs(2)).unwrap();

        assert!(registry.deregister_service("pricing"));
        assert!(!registry.deregister_service("pricing"));
        assert!(!registry.deregister_service("unknown"));

        assert!(matches!(
            registry.list_healthy_instances("pricing"),
            Err(OrchestratorError::ServiceNotFound { .. })
        ));
        let retired = registry.describe("pricing").unwrap();
        assert_eq!(retired.service.status, ServiceLifecycle::Retired);
        assert!(retired.instances.is_empty());

        registry.register_service("pricing", vec![], specs(1)).unwrap();
        assert_eq!(registry.list_instances("pricing").unwrap().len(), 1);
    }

    #[test]
    fn test_remove_last_instance_leaves_registry_unchanged() {
        let registry = registry();
        registry.register_service("solo", vec![], specs(1)).unwrap();
        let before = registry.describe("solo").unwrap().instances;

        let err = registry.remove_instance("solo", "i-1").unwrap_err();
        assert!(matches!(err, OrchestratorError::LastInstance { .. }));
        assert_eq!(registry.describe("solo").unwrap().instances, before);
    }

    #[test]
    fn test_add_and_remove_instance() {
        let registry = registry();
        registry.register_service("svc", vec![], specs(1)).unwrap();

        registry.add_instance("svc", InstanceSpec::new("i-9", "10.0.0.9", 9000)).unwrap();
        assert!(matches!(
            registry.add_instance("svc", InstanceSpec::new("i-9", "10.0.0.9", 9000)),
            Err(OrchestratorError::DuplicateInstance { .. })
        ));

        let removed = registry.remove_instance("svc", "i-1").unwrap();
        assert_eq!(removed.id, "i-1");
        assert!(matches!(
            registry.remove_instance("svc", "i-1"),
            Err(OrchestratorError::InstanceNotFound { .. })
        ));
    }

    #[test]
    fn test_snapshot_is_a_copy() {
        let registry = registry();
        registry.register_service("svc", vec![], specs(2)).unwrap();
        let snapshot = registry.list_healthy_instances("svc").unwrap();

        registry.set_instance_health("svc", "i-1", false).unwrap();
        assert!(snapshot[0].is_healthy());
        assert_eq!(registry.list_healthy_instances("svc").unwrap().len(), 1);
    }

    #[test]
    fn test_health_change_publishes_event_once() {
        let events = Arc::new(EventBus::new(64));
        let registry = ServiceRegistry::new(events.clone());
        registry.register_service("svc", vec![], specs(1)).unwrap();

        assert_eq!(
            registry.set_instance_health("svc", "i-1", false).unwrap(),
            Some(HealthStatus::Healthy)
        );
        assert_eq!(registry.set_instance_health("svc", "i-1", false).unwrap(), None);

        let changes: Vec<_> = events
            .recent_events(10)
            .into_iter()
            .filter(|e| e.event_type == EventType::InstanceHealthChanged)
            .collect();
        assert_eq!(changes.len(), 1);
        assert_eq!(changes[0].details, "healthy -> unhealthy");
        assert!(registry.describe("svc").unwrap().instances[0].last_health_check.is_some());
    }

    #[test]
    fn test_counters() {
        let registry = registry();
        registry.register_service("svc", vec![], specs(1)).unwrap();
        registry.increment_instance_counters("svc", "i-1", true).unwrap();
        registry.increment_instance_counters("svc", "i-1", false).unwrap();

        let instance = &registry.describe("svc").unwrap().instances[0];
        assert_eq!(instance.request_count, 2);
        assert_eq!(instance.error_count, 1);
    }

    #[test]
    fn test_rescale_uses_windowed_load() {
        let registry = registry();
        registry.register_service("svc", vec![], specs(2)).unwrap();
        for _ in 0..6 {
            registry.increment_instance_counters("svc", "i-1", true).unwrap();
        }
        for _ in 0..2 {
            registry.increment_instance_counters("svc", "i-2", true).unwrap();
        }

        let outcome = registry.rescale("svc", |_, _| Ok(ScaleAction::Hold)).unwrap();
        let ScaleOutcome::Held { window } = outcome else {
            panic!("expected hold");
        };
        assert_eq!(window.healthy_requests, 8);
        assert_eq!(window.average_load(), Some(4.0));

        // The window was reset by the previous evaluation
        let outcome = registry.rescale("svc", |_, _| Ok(ScaleAction::Hold)).unwrap();
        let ScaleOutcome::Held { window } = outcome else {
            panic!("expected hold");
        };
        assert_eq!(window.healthy_requests, 0);
    }

    #[test]
    fn test_failed_rescale_keeps_window_open() {
        let registry = registry();
        registry.register_service("svc", vec![], specs(1)).unwrap();
        for _ in 0..5 {
            registry.increment_instance_counters("svc", "i-1", true).unwrap();
        }

        let err = registry
            .rescale("svc", |_, _| Err(OrchestratorError::internal("no capacity")))
            .unwrap_err();
        assert_eq!(err, OrchestratorError::internal("no capacity"));

        let outcome = registry.rescale("svc", |_, _| Ok(ScaleAction::Hold)).unwrap();
        let ScaleOutcome::Held { window } = outcome else {
            panic!("expected hold");
        };
        assert_eq!(window.healthy_requests, 5);
    }

    #[test]
    fn test_rescale_removes_least_loaded_with_id_tiebreak() {
        let registry = registry();
        registry.register_service("svc", vec![], specs(3)).unwrap();
        registry.increment_instance_counters("svc", "i-1", true).unwrap();

        let outcome = registry.rescale("svc", |_, _| Ok(ScaleAction::RemoveLeastLoaded)).unwrap();
        let ScaleOutcome::Removed { instance, .. } = outcome else {
            panic!("expected removal");
        };
        assert_eq!(instance.id, "i-2");
    }

    #[test]
    fn test_stats() {
        let registry = registry();
        registry.register_service("a", vec![], specs(2)).unwrap();
        registry.register_service("b", vec![], specs(1)).unwrap();
        registry.set_instance_health("a", "i-2", false).unwrap();
        registry.deregister_service("b");

        let stats = registry.stats();
        assert_eq!(stats.active_services, 1);
        assert_eq!(stats.retired_services, 1);
        assert_eq!(stats.total_instances, 2);
        assert_eq!(stats.healthy_instances, 1);
        assert_eq!(registry.active_service_names(), vec!["a"]);
        assert_eq!(registry.service_names(), vec!["a", "b"]);
    }
}

//! # Lifecycle Integration Tests
//!
//! Registration and deregistration semantics, loading the shipped
//! configuration file, and the background task lifecycle.

mod common;

use common::{instances, orchestrator, route_n, SpyCaller};
use service_orchestrator::core::types::{HealthStatus, ServiceLifecycle};
use service_orchestrator::observability::EventType;
use service_orchestrator::{
    InstanceSpec, LoadBalancingStrategy, Orchestrator, OrchestratorConfig, OrchestratorError, ServiceDefinition,
    ServicePolicy, ServiceRequest,
};
use std::sync::Arc;
use std::time::Duration;

fn single_service(name: &str, count: usize) -> OrchestratorConfig {
    OrchestratorConfig {
        services: vec![ServiceDefinition::new(name, instances(name, count))],
        ..OrchestratorConfig::default()
    }
}

#[tokio::test]
async fn test_deregister_mid_flight() {
    let spy = SpyCaller::new();
    let (orchestrator, _) = orchestrator(single_service("pricing", 2), spy.clone());
    let orchestrator = Arc::new(orchestrator);

    spy.hold_calls();
    let in_flight = {
        let orchestrator = Arc::clone(&orchestrator);
        tokio::spawn(async move { orchestrator.route("pricing", &ServiceRequest::new("quote")).await })
    };
    spy.wait_for_call().await;

    assert!(orchestrator.deregister_service("pricing"));
    let err = orchestrator
        .route("pricing", &ServiceRequest::new("quote"))
        .await
        .unwrap_err();
    assert_eq!(err, OrchestratorError::not_found("pricing"));

    spy.release(1);
    let response = in_flight.await.unwrap().unwrap();
    assert_eq!(response.payload["instance"], "pricing-1");
    assert_eq!(spy.calls(), 1);

    let status = orchestrator.get_service_status("pricing").unwrap();
    assert_eq!(status.service.status, ServiceLifecycle::Retired);
}

#[tokio::test]
async fn test_deregister_is_idempotent_and_name_can_be_reused() {
    let spy = SpyCaller::new();
    let (orchestrator, _) = orchestrator(single_service("pricing", 2), spy.clone());

    assert!(orchestrator.deregister_service("pricing"));
    assert!(!orchestrator.deregister_service("pricing"));
    assert!(!orchestrator.deregister_service("never-registered"));

    let err = orchestrator.add_instance("pricing", InstanceSpec::new("pricing-9", "127.0.0.1", 8009));
    assert_eq!(err.unwrap_err(), OrchestratorError::not_found("pricing"));

    let policy = ServicePolicy {
        strategy: LoadBalancingStrategy::LeastConnections,
        ..ServicePolicy::default()
    };
    orchestrator
        .register_service(ServiceDefinition::new("pricing", instances("pricing", 1)).with_policy(policy))
        .unwrap();
    route_n(&orchestrator, "pricing", 2).await;

    let status = orchestrator.get_service_status("pricing").unwrap();
    assert_eq!(status.service.status, ServiceLifecycle::Active);
    assert_eq!(status.policy.strategy, LoadBalancingStrategy::LeastConnections);
    assert_eq!(status.instances.len(), 1);

    let kinds: Vec<EventType> = orchestrator.recent_events(20).iter().map(|e| e.event_type).collect();
    assert_eq!(kinds.iter().filter(|k| **k == EventType::ServiceRegistered).count(), 2);
    assert_eq!(kinds.iter().filter(|k| **k == EventType::ServiceDeregistered).count(), 1);
}

#[tokio::test]
async fn test_duplicate_registration_is_rejected() {
    let spy = SpyCaller::new();
    let (orchestrator, _) = orchestrator(single_service("pricing", 2), spy);

    let err = orchestrator
        .register_service(ServiceDefinition::new("pricing", instances("pricing", 3)))
        .unwrap_err();
    assert!(matches!(err, OrchestratorError::DuplicateService { .. }));
    assert_eq!(orchestrator.get_service_status("pricing").unwrap().instances.len(), 2);

    let err = orchestrator
        .register_service(ServiceDefinition::new("empty", Vec::new()))
        .unwrap_err();
    assert!(matches!(err, OrchestratorError::Configuration { .. }));
}

#[tokio::test]
async fn test_removing_last_instance_leaves_registry_unchanged() {
    let spy = SpyCaller::new();
    let (orchestrator, _) = orchestrator(single_service("pricing", 2), spy);

    orchestrator.remove_instance("pricing", "pricing-2").unwrap();
    let err = orchestrator.remove_instance("pricing", "pricing-1").unwrap_err();
    assert!(matches!(err, OrchestratorError::LastInstance { .. }));

    let err = orchestrator.remove_instance("pricing", "pricing-7").unwrap_err();
    assert!(matches!(err, OrchestratorError::InstanceNotFound { .. }));

    let err = orchestrator
        .add_instance("pricing", InstanceSpec::new("pricing-1", "127.0.0.1", 8001))
        .unwrap_err();
    assert!(matches!(err, OrchestratorError::DuplicateInstance { .. }));

    let status = orchestrator.get_service_status("pricing").unwrap();
    let ids: Vec<&str> = status.instances.iter().map(|i| i.id.as_str()).collect();
    assert_eq!(ids, vec!["pricing-1"]);
    orchestrator.route("pricing", &ServiceRequest::new("quote")).await.unwrap();
}

#[tokio::test]
async fn test_shipped_configuration_loads() {
    let path = concat!(env!("CARGO_MANIFEST_DIR"), "/config/orchestrator.yaml");
    let config = OrchestratorConfig::load_from_file(path).await.unwrap();

    assert_eq!(config.call_timeout, Duration::from_secs(5));
    assert_eq!(config.services.len(), 2);

    let spy = SpyCaller::new();
    let orchestrator = Orchestrator::new(config, spy).unwrap();
    let services = orchestrator.list_services();
    let names: Vec<&str> = services.iter().map(|s| s.name.as_str()).collect();
    assert_eq!(names, vec!["inventory", "pricing"]);

    let pricing = orchestrator.get_service_status("pricing").unwrap();
    assert_eq!(pricing.service.version, "2.3.0");
    assert_eq!(pricing.policy.circuit_threshold, 3);
    assert_eq!(pricing.policy.health_check_interval, Duration::from_secs(30));

    let inventory = orchestrator.get_service_status("inventory").unwrap();
    assert_eq!(inventory.policy.strategy, LoadBalancingStrategy::Weighted);
    assert_eq!(inventory.policy.min_instances, 2);
    let weights: Vec<i32> = inventory.instances.iter().map(|i| i.weight).collect();
    assert_eq!(weights, vec![1, 2, 3]);
}

#[tokio::test]
async fn test_background_health_checks_mark_failing_instances() {
    let spy = SpyCaller::new();
    spy.fail_probe("search-2");

    let policy = ServicePolicy {
        health_check_interval: Duration::from_millis(10),
        ..ServicePolicy::default()
    };
    let config = OrchestratorConfig {
        health_check_interval: Duration::from_millis(20),
        probe_timeout: Duration::from_secs(1),
        services: vec![ServiceDefinition::new("search", instances("search", 2)).with_policy(policy)],
        ..OrchestratorConfig::default()
    };
    let orchestrator = Orchestrator::new(config, spy.clone()).unwrap();

    orchestrator.start().unwrap();
    orchestrator.start().unwrap();
    assert!(orchestrator.is_running());

    let mut marked = false;
    for _ in 0..100 {
        let status = orchestrator.get_service_status("search").unwrap();
        if status.instances[1].health == HealthStatus::Unhealthy {
            marked = true;
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    assert!(marked, "failing probe never marked the instance unhealthy");

    orchestrator.shutdown().await;
    assert!(!orchestrator.is_running());
    assert!(orchestrator.start().is_err());

    let status = orchestrator.get_service_status("search").unwrap();
    assert_eq!(status.instances[0].health, HealthStatus::Healthy);
    assert!(spy.probes() >= 2);

    // Routing skips the unhealthy instance
    route_n(&orchestrator, "search", 4).await;
    assert_eq!(spy.calls_to("search-2"), 0);
}

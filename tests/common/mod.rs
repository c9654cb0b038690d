//! Shared helpers for the integration tests.

#![allow(dead_code)]

use async_trait::async_trait;
use parking_lot::Mutex;
use service_orchestrator::core::clock::ManualClock;
use service_orchestrator::{
    CallError, InstanceSpec, Orchestrator, OrchestratorConfig, ServiceCaller, ServiceInstance, ServiceRequest,
    ServiceResponse,
};
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Notify, Semaphore};

/// Scripted `ServiceCaller` that counts every call it receives
pub struct SpyCaller {
    calls: AtomicUsize,
    probes: AtomicUsize,
    calls_by_instance: Mutex<HashMap<String, usize>>,
    fail_all: AtomicBool,
    failing: Mutex<HashSet<String>>,
    probe_failing: Mutex<HashSet<String>>,
    delay: Mutex<Duration>,
    held: AtomicBool,
    gate: Semaphore,
    entered: Notify,
}

impl SpyCaller {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            calls: AtomicUsize::new(0),
            probes: AtomicUsize::new(0),
            calls_by_instance: Mutex::new(HashMap::new()),
            fail_all: AtomicBool::new(false),
            failing: Mutex::new(HashSet::new()),
            probe_failing: Mutex::new(HashSet::new()),
            delay: Mutex::new(Duration::ZERO),
            held: AtomicBool::new(false),
            gate: Semaphore::new(0),
            entered: Notify::new(),
        })
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn probes(&self) -> usize {
        self.probes.load(Ordering::SeqCst)
    }

    pub fn calls_to(&self, instance_id: &str) -> usize {
        self.calls_by_instance.lock().get(instance_id).copied().unwrap_or(0)
    }

    /// Make every call fail (or succeed again)
    pub fn fail_all(&self, fail: bool) {
        self.fail_all.store(fail, Ordering::SeqCst);
    }

    /// Make calls to one instance fail
    pub fn fail_instance(&self, instance_id: &str) {
        self.failing.lock().insert(instance_id.to_string());
    }

    /// Make probes of one instance fail
    pub fn fail_probe(&self, instance_id: &str) {
        self.probe_failing.lock().insert(instance_id.to_string());
    }

    pub fn heal_probes(&self) {
        self.probe_failing.lock().clear();
    }

    /// Delay every call by `delay`
    pub fn set_delay(&self, delay: Duration) {
        *self.delay.lock() = delay;
    }

    /// Park calls until `release` is called
    pub fn hold_calls(&self) {
        self.held.store(true, Ordering::SeqCst);
    }

    /// Let `n` parked calls continue
    pub fn release(&self, n: usize) {
        self.gate.add_permits(n);
    }

    /// Wait until a call has reached the caller
    pub async fn wait_for_call(&self) {
        self.entered.notified().await;
    }
}

#[async_trait]
impl ServiceCaller for SpyCaller {
    async fn call(
        &self,
        instance: &ServiceInstance,
        request: &ServiceRequest,
        _timeout: Duration,
    ) -> Result<ServiceResponse, CallError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        *self.calls_by_instance.lock().entry(instance.id.clone()).or_default() += 1;
        self.entered.notify_one();

        if self.held.load(Ordering::SeqCst) {
            if let Ok(permit) = self.gate.acquire().await {
                permit.forget();
            }
        }

        let delay = *self.delay.lock();
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }

        if self.fail_all.load(Ordering::SeqCst) || self.failing.lock().contains(&instance.id) {
            return Err(CallError::failed(format!("{} unavailable", instance.id)));
        }

        Ok(ServiceResponse::ok(serde_json::json!({
            "instance": instance.id,
            "endpoint": request.endpoint,
        })))
    }

    async fn probe(&self, instance: &ServiceInstance, _timeout: Duration) -> Result<(), CallError> {
        self.probes.fetch_add(1, Ordering::SeqCst);
        if self.probe_failing.lock().contains(&instance.id) {
            Err(CallError::failed("probe refused"))
        } else {
            Ok(())
        }
    }
}

/// `count` instances named `<prefix>-1..=count` on consecutive ports
pub fn instances(prefix: &str, count: usize) -> Vec<InstanceSpec> {
    (1..=count)
        .map(|i| InstanceSpec::new(format!("{}-{}", prefix, i), "127.0.0.1", 8000 + i as u16))
        .collect()
}

/// Orchestrator driven by a manual clock
pub fn orchestrator(config: OrchestratorConfig, caller: Arc<SpyCaller>) -> (Orchestrator, Arc<ManualClock>) {
    let clock = Arc::new(ManualClock::new());
    let orchestrator = Orchestrator::builder(config, caller)
        .clock(clock.clone())
        .build()
        .expect("valid test configuration");
    (orchestrator, clock)
}

/// Route `n` requests and return the id of the instance that served each one
pub async fn route_n(orchestrator: &Orchestrator, service: &str, n: usize) -> Vec<String> {
    let request = ServiceRequest::new("ping");
    let mut served = Vec::with_capacity(n);
    for _ in 0..n {
        let response = orchestrator.route(service, &request).await.expect("route succeeds");
        served.push(response.payload["instance"].as_str().unwrap_or_default().to_string());
    }
    served
}

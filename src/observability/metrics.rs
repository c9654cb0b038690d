//! # Metrics Collection
//!
//! Per-service request counters for the gateway router.
//!
//! Counters are kept in process (a `DashMap` of atomics) so administrative
//! queries can read them directly, and every update is mirrored into the
//! `metrics` facade so a Prometheus exporter installed by the binary sees the
//! same numbers. Counters only ever increase; retention and export belong to
//! whoever scrapes them.
//!
//! ## Usage Example
//! ```rust
//! use service_orchestrator::observability::metrics::MetricsCollector;
//! use std::time::Duration;
//!
//! let collector = MetricsCollector::new();
//! collector.record_success("pricing", Duration::from_millis(12));
//! assert_eq!(collector.snapshot("pricing").success_count, 1);
//! ```

use dashmap::DashMap;
use metrics::{counter, gauge, histogram};
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use crate::core::circuit_breaker::CircuitState;

/// Live counters for one service
#[derive(Debug, Default)]
pub struct ServiceMetrics {
    request_count: AtomicU64,
    success_count: AtomicU64,
    error_count: AtomicU64,
    rejected_count: AtomicU64,
    total_latency_micros: AtomicU64,
    latency_samples: AtomicU64,
}

impl ServiceMetrics {
    fn observe_latency(&self, latency: Duration) {
        self.total_latency_micros
            .fetch_add(latency.as_micros() as u64, Ordering::Relaxed);
        self.latency_samples.fetch_add(1, Ordering::Relaxed);
    }

    fn snapshot(&self, service: &str) -> MetricsSnapshot {
        let request_count = self.request_count.load(Ordering::Relaxed);
        let success_count = self.success_count.load(Ordering::Relaxed);
        let error_count = self.error_count.load(Ordering::Relaxed);
        let rejected_count = self.rejected_count.load(Ordering::Relaxed);
        let total_latency_micros = self.total_latency_micros.load(Ordering::Relaxed);
        let latency_samples = self.latency_samples.load(Ordering::Relaxed);

        MetricsSnapshot {
            service: service.to_string(),
            request_count,
            success_count,
            error_count,
            rejected_count,
            total_latency_ms: total_latency_micros as f64 / 1000.0,
            average_latency_ms: if latency_samples == 0 {
                0.0
            } else {
                total_latency_micros as f64 / 1000.0 / latency_samples as f64
            },
            error_rate: if request_count + rejected_count == 0 {
                0.0
            } else {
                error_count as f64 / (request_count + rejected_count) as f64
            },
        }
    }
}

/// Immutable snapshot of a service's metrics
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetricsSnapshot {
    pub service: String,
    /// Requests admitted by the circuit breaker
    pub request_count: u64,
    pub success_count: u64,
    pub error_count: u64,
    /// Requests refused by the circuit breaker (in `error_count`, not in `request_count`)
    pub rejected_count: u64,
    pub total_latency_ms: f64,
    /// Mean latency over requests that reached an instance
    pub average_latency_ms: f64,
    /// Errors over admitted plus refused requests
    pub error_rate: f64,
}

/// Collector of per-service request metrics
#[derive(Debug, Default)]
pub struct MetricsCollector {
    services: DashMap<String, Arc<ServiceMetrics>>,
}

impl MetricsCollector {
    /// Create an empty collector
    pub fn new() -> Self {
        Self::default()
    }

    fn entry(&self, service: &str) -> Arc<ServiceMetrics> {
        if let Some(existing) = self.services.get(service) {
            return Arc::clone(existing.value());
        }
        Arc::clone(
            self.services
                .entry(service.to_string())
                .or_default()
                .value(),
        )
    }

    /// Record a request that reached an instance and succeeded
    pub fn record_success(&self, service: &str, latency: Duration) {
        let metrics = self.entry(service);
        metrics.request_count.fetch_add(1, Ordering::Relaxed);
        metrics.success_count.fetch_add(1, Ordering::Relaxed);
        metrics.observe_latency(latency);

        counter!("orchestrator_requests_total", "service" => service.to_string(), "outcome" => "success")
            .increment(1);
        histogram!("orchestrator_request_duration_seconds", "service" => service.to_string())
            .record(latency.as_secs_f64());
    }

    /// Record a request that reached the routing path and failed
    ///
    /// `latency` is `None` when no instance was called.
    pub fn record_error(&self, service: &str, error_type: &'static str, latency: Option<Duration>) {
        let metrics = self.entry(service);
        metrics.request_count.fetch_add(1, Ordering::Relaxed);
        metrics.error_count.fetch_add(1, Ordering::Relaxed);
        if let Some(latency) = latency {
            metrics.observe_latency(latency);
            histogram!("orchestrator_request_duration_seconds", "service" => service.to_string())
                .record(latency.as_secs_f64());
        }

        counter!("orchestrator_requests_total", "service" => service.to_string(), "outcome" => "error")
            .increment(1);
        counter!("orchestrator_request_errors_total", "service" => service.to_string(), "error" => error_type)
            .increment(1);
    }

    /// Record a request refused by the circuit breaker
    ///
    /// A refusal is an error but never an admitted request.
    pub fn record_rejected(&self, service: &str) {
        let metrics = self.entry(service);
        metrics.error_count.fetch_add(1, Ordering::Relaxed);
        metrics.rejected_count.fetch_add(1, Ordering::Relaxed);

        counter!("orchestrator_request_errors_total", "service" => service.to_string(), "error" => "circuit_open")
            .increment(1);
    }

    /// Publish the circuit state as a gauge (0 closed, 1 half-open, 2 open)
    pub fn record_circuit_state(&self, service: &str, state: CircuitState) {
        let value = match state {
            CircuitState::Closed => 0.0,
            CircuitState::HalfOpen => 1.0,
            CircuitState::Open => 2.0,
        };
        gauge!("orchestrator_circuit_state", "service" => service.to_string()).set(value);
    }

    /// Publish instance counts as gauges
    pub fn record_instance_counts(&self, service: &str, total: usize, healthy: usize) {
        gauge!("orchestrator_instances", "service" => service.to_string()).set(total as f64);
        gauge!("orchestrator_healthy_instances", "service" => service.to_string()).set(healthy as f64);
    }

    /// Snapshot for one service; all zeros if nothing was recorded
    pub fn snapshot(&self, service: &str) -> MetricsSnapshot {
        match self.services.get(service) {
            Some(metrics) => metrics.snapshot(service),
            None => ServiceMetrics::default().snapshot(service),
        }
    }

    /// Snapshots for every service seen so far
    pub fn all_snapshots(&self) -> Vec<MetricsSnapshot> {
        let mut snapshots: Vec<MetricsSnapshot> = self
            .services
            .iter()
            .map(|entry| entry.value().snapshot(entry.key()))
            .collect();
        snapshots.sort_by(|a, b| a.service.cmp(&b.service));
        snapshots
    }
}

//! # Balancing Strategies
//!
//! Each strategy picks one instance out of a snapshot of healthy instances.
//! Strategies never see the registry itself: the caller takes a copy with
//! `ServiceRegistry::list_healthy_instances` and passes the slice in, so a
//! selection can never land on an instance that is being removed concurrently.
//!
//! ## Algorithms
//!
//! 1. **Round Robin**: a monotonically increasing cursor taken modulo the
//!    current snapshot length. Instance churn needs no renormalization.
//! 2. **Least Connections**: the instance with the smallest cumulative
//!    `request_count`; ties go to the lowest instance id.
//! 3. **Weighted**: a uniform draw in `[0, total_weight)` walked across the
//!    instances. Non-positive weights count as 1.
//!
//! ## Rust Concepts Used
//!
//! - Trait objects (`Box<dyn BalancingStrategy>`) to pick the algorithm at runtime
//! - `AtomicUsize` so round-robin selection needs no lock
//! - Lifetimes on `select` tie the returned reference to the input slice

use parking_lot::Mutex;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};

use crate::core::config::LoadBalancingStrategy;
use crate::core::types::ServiceInstance;

/// Selection algorithm over a snapshot of healthy instances
pub trait BalancingStrategy: Send + Sync {
    /// Select an instance, or `None` when the snapshot is empty
    fn select<'a>(&self, instances: &'a [ServiceInstance]) -> Option<&'a ServiceInstance>;

    /// Algorithm name for metrics and logging
    fn algorithm_name(&self) -> &'static str;

    /// Number of successful selections so far
    fn selections(&self) -> u64;
}

/// Build the strategy configured for a service
pub fn strategy_for(kind: LoadBalancingStrategy) -> Box<dyn BalancingStrategy> {
    match kind {
        LoadBalancingStrategy::RoundRobin => Box::new(RoundRobin::new()),
        LoadBalancingStrategy::LeastConnections => Box::new(LeastConnections::new()),
        LoadBalancingStrategy::Weighted => Box::new(Weighted::new()),
    }
}

/// Round-robin over the current snapshot
#[derive(Debug, Default)]
pub struct RoundRobin {
    cursor: AtomicUsize,
    selections: AtomicU64,
}

impl RoundRobin {
    pub fn new() -> Self {
        Self::default()
    }
}

impl BalancingStrategy for RoundRobin {
    fn select<'a>(&self, instances: &'a [ServiceInstance]) -> Option<&'a ServiceInstance> {
        if instances.is_empty() {
            return None;
        }

        // fetch_add wraps on overflow, so the cursor never panics
        let index = self.cursor.fetch_add(1, Ordering::Relaxed) % instances.len();
        self.selections.fetch_add(1, Ordering::Relaxed);
        instances.get(index)
    }

    fn algorithm_name(&self) -> &'static str {
        "round_robin"
    }

    fn selections(&self) -> u64 {
        self.selections.load(Ordering::Relaxed)
    }
}

/// Fewest cumulative requests wins
#[derive(Debug, Default)]
pub struct LeastConnections {
    selections: AtomicU64,
}

impl LeastConnections {
    pub fn new() -> Self {
        Self::default()
    }
}

impl BalancingStrategy for LeastConnections {
    fn select<'a>(&self, instances: &'a [ServiceInstance]) -> Option<&'a ServiceInstance> {
        let selected = instances
            .iter()
            .min_by(|a, b| a.request_count.cmp(&b.request_count).then_with(|| a.id.cmp(&b.id)))?;
        self.selections.fetch_add(1, Ordering::Relaxed);
        Some(selected)
    }

    fn algorithm_name(&self) -> &'static str {
        "least_connections"
    }

    fn selections(&self) -> u64 {
        self.selections.load(Ordering::Relaxed)
    }
}

/// Weighted random selection
#[derive(Debug)]
pub struct Weighted {
    rng: Mutex<StdRng>,
    selections: AtomicU64,
}

impl Weighted {
    pub fn new() -> Self {
        Self {
            rng: Mutex::new(StdRng::from_entropy()),
            selections: AtomicU64::new(0),
        }
    }

    /// Deterministic draws for reproducible tests
    pub fn with_seed(seed: u64) -> Self {
        Self {
            rng: Mutex::new(StdRng::seed_from_u64(seed)),
            selections: AtomicU64::new(0),
        }
    }
}

impl Default for Weighted {
    fn default() -> Self {
        Self::new()
    }
}

impl BalancingStrategy for Weighted {
    fn select<'a>(&self, instances: &'a [ServiceInstance]) -> Option<&'a ServiceInstance> {
        if instances.is_empty() {
            return None;
        }

        let total_weight: u64 = instances.iter().map(ServiceInstance::effective_weight).sum();
        let mut remaining = self.rng.lock().gen_range(0..total_weight);

        // Integer draw: the instance whose weight band contains the draw wins
        for instance in instances {
            let weight = instance.effective_weight();
            if remaining < weight {
                self.selections.fetch_add(1, Ordering::Relaxed);
                return Some(instance);
            }
            remaining -= weight;
        }

        self.selections.fetch_add(1, Ordering::Relaxed);
        instances.last()
    }

    fn algorithm_name(&self) -> &'static str {
        "weighted"
    }

    fn selections(&self) -> u64 {
        self.selections.load(Ordering::Relaxed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::types::InstanceSpec;
    use std::collections::HashMap;

    fn instances(weights: &[i32]) -> Vec<ServiceInstance> {
        weights
            .iter()
            .enumerate()
            .map(|(i, weight)| {
                ServiceInstance::from_spec(
                    "svc",
                    InstanceSpec::new(format!("i-{}", i + 1), "127.0.0.1", 9000 + i as u16).with_weight(*weight),
                )
            })
            .collect()
    }

    #[test]
    fn test_round_robin_cycles_in_order() {
        let rr = RoundRobin::new();
        let pool = instances(&[1, 1, 1]);
        let picked: Vec<&str> = (0..6).map(|_| rr.select(&pool).unwrap().id.as_str()).collect();
        assert_eq!(picked, vec!["i-1", "i-2", "i-3", "i-1", "i-2", "i-3"]);
        assert_eq!(rr.selections(), 6);
    }

    #[test]
    fn test_round_robin_survives_shrinking_pool() {
        let rr = RoundRobin::new();
        let mut pool = instances(&[1, 1, 1]);
        for _ in 0..5 {
            rr.select(&pool);
        }
        pool.truncate(1);
        assert_eq!(rr.select(&pool).unwrap().id, "i-1");
    }

    #[test]
    fn test_empty_pool_selects_nothing() {
        for kind in [
            LoadBalancingStrategy::RoundRobin,
            LoadBalancingStrategy::LeastConnections,
            LoadBalancingStrategy::Weighted,
        ] {
            assert!(strategy_for(kind).select(&[]).is_none());
        }
    }

    #[test]
    fn test_least_connections_breaks_ties_by_id() {
        let lc = LeastConnections::new();
        let mut pool = instances(&[1, 1, 1]);
        pool[0].request_count = 4;
        pool[1].request_count = 2;
        pool[2].request_count = 2;
        pool.reverse();
        assert_eq!(lc.select(&pool).unwrap().id, "i-2");
    }

    #[test]
    fn test_weighted_treats_non_positive_weight_as_one() {
        let weighted = Weighted::with_seed(7);
        let pool = instances(&[0, -3]);
        let mut counts: HashMap<String, u32> = HashMap::new();
        for _ in 0..2000 {
            *counts.entry(weighted.select(&pool).unwrap().id.clone()).or_default() += 1;
        }
        assert!(counts["i-1"] > 800);
        assert!(counts["i-2"] > 800);
    }

    #[test]
    fn test_weighted_is_proportional() {
        let weighted = Weighted::with_seed(42);
        let pool = instances(&[1, 2, 3]);
        let mut counts: HashMap<String, u32> = HashMap::new();
        for _ in 0..6000 {
            *counts.entry(weighted.select(&pool).unwrap().id.clone()).or_default() += 1;
        }
        for (id, weight) in [("i-1", 1.0), ("i-2", 2.0), ("i-3", 3.0)] {
            let share = counts[id] as f64 / 6000.0;
            let expected = weight / 6.0;
            assert!(
                (share - expected).abs() < 0.05,
                "{} got share {:.3}, expected about {:.3}",
                id,
                share,
                expected
            );
        }
    }
}

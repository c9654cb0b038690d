pub mod balancer;
pub mod strategies;

pub use balancer::{LoadBalancer, LoadBalancerStats};
pub use strategies::{strategy_for, BalancingStrategy, LeastConnections, RoundRobin, Weighted};

pub mod autoscaler;
pub mod provisioner;

pub use autoscaler::{evaluate, AutoScaler, ScalingDecision, ScalingTickReport};
pub use provisioner::{InstanceProvisioner, SyntheticProvisioner};

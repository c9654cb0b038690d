//! Instance provisioning for scale-up.
//!
//! The auto-scaler decides *when* to add an instance; an `InstanceProvisioner`
//! decides *what* the new instance is. The default provisioner synthesizes one
//! next to the existing instances, which is what a single-host deployment needs.
//! Deployments backed by a scheduler plug in their own implementation.

use uuid::Uuid;

use crate::core::error::{OrchestratorError, OrchestratorResult};
use crate::core::types::{InstanceSpec, ServiceInstance};

/// Source of new instances for a service
pub trait InstanceProvisioner: Send + Sync {
    /// Produce the spec of one new instance
    ///
    /// Called while the service is locked for scaling, so it must not block.
    fn provision(&self, service: &str, existing: &[ServiceInstance]) -> OrchestratorResult<InstanceSpec>;
}

/// Provisioner that derives new instances from existing ones
///
/// The new instance reuses the host of the first existing instance, takes the
/// port after the highest one in use and gets a random id suffix.
#[derive(Debug, Clone, Default)]
pub struct SyntheticProvisioner;

impl InstanceProvisioner for SyntheticProvisioner {
    fn provision(&self, service: &str, existing: &[ServiceInstance]) -> OrchestratorResult<InstanceSpec> {
        let template = existing
            .first()
            .ok_or_else(|| OrchestratorError::internal(format!("Service '{}' has no instance to copy", service)))?;

        let highest_port = existing.iter().map(|instance| instance.port).max().unwrap_or(template.port);
        let port = highest_port
            .checked_add(1)
            .ok_or_else(|| OrchestratorError::internal(format!("No free port left for service '{}'", service)))?;

        let suffix = Uuid::new_v4().simple().to_string();
        let id = format!("{}-{}", service, &suffix[..8]);

        Ok(InstanceSpec::new(id, template.host.clone(), port).with_weight(template.weight))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_synthesizes_next_port_on_same_host() {
        let existing = vec![
            ServiceInstance::from_spec("search", InstanceSpec::new("s-1", "10.0.0.5", 7000)),
            ServiceInstance::from_spec("search", InstanceSpec::new("s-2", "10.0.0.6", 7003)),
        ];
        let spec = SyntheticProvisioner.provision("search", &existing).unwrap();
        assert_eq!(spec.host, "10.0.0.5");
        assert_eq!(spec.port, 7004);
        assert!(spec.id.starts_with("search-"));
        assert_eq!(spec.id.len(), "search-".len() + 8);
    }

    #[test]
    fn test_exhausted_ports_and_empty_service_fail() {
        let full = vec![ServiceInstance::from_spec("s", InstanceSpec::new("a", "h", u16::MAX))];
        assert!(SyntheticProvisioner.provision("s", &full).is_err());
        assert!(SyntheticProvisioner.provision("s", &[]).is_err());
    }
}

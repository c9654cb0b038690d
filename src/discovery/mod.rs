pub mod registry;

pub use registry::{
    LoadWindow, RegistryStats, ScaleAction, ScaleOutcome, ServiceRecord, ServiceRegistry,
};

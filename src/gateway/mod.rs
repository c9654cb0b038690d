pub mod orchestrator;
pub mod router;

pub use orchestrator::{Orchestrator, OrchestratorBuilder, ServiceStatus, ServiceSummary};
pub use router::GatewayRouter;

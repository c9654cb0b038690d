// Logging configuration
pub mod config;

// Orchestration event stream
pub mod events;

// Background health probing
pub mod health;

// Structured logging
pub mod logging;

// Metrics collection
pub mod metrics;

// Re-export commonly used types for convenience
pub use config::{LogConfig, LogFormat};
pub use events::{EventBus, EventReceiver, EventType, OrchestrationEvent};
pub use health::{HealthMonitor, HealthTickReport};
pub use logging::init_logging;
pub use metrics::{MetricsCollector, MetricsSnapshot};

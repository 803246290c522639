mod orchestrator;
mod registry;
mod runtime;
mod shutdown;
mod startup;
mod state;
mod types;


pub use orchestrator::{CamwallOrchestrator, ShutdownTrigger};
pub use registry::WorkerRegistry;
pub use state::SystemStatus;
pub use types::{ComponentState, ShutdownReason, WorkerKind, WorkerStatus};

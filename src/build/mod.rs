//! Build task planning and execution.

mod context;
mod orchestrator;
mod plan;
mod registry;

pub use context::{
    ActionGate, BuildHandle, NoProgress, ProgressSink, SharedBuildState, TaskContext,
};
pub use orchestrator::BuildOrchestrator;
pub use plan::{install_sequence, plan_tasks};
pub use registry::{BackendFactory, BuildRegistry};

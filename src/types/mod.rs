mod build;
mod decision;
mod identifiers;
mod module;
mod signals;
mod target;

pub use build::{
    BuildOutputs, BuildState, BuildStatus, BuildStatusView, BuildTask, TaskKind, TaskStatus,
    TaskView, LOG_TAIL_LINES,
};
pub use decision::{AgentResult, RejectedModule, RejectionReason, SwarmDecision};
pub use identifiers::{BuildId, ModuleKey, TaskId};
pub use module::{ModuleCandidate, ModuleDefinition, Priority, Tier};
pub use signals::SignalMap;
pub use target::{CompanyProfile, DeployTarget, ModuleRequest, TargetSpec, UserRole};

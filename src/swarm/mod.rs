//! Module-selection decision engine.

mod agents;
mod install_order;
mod moderator;
mod pipeline;
mod plan;
mod validator;

pub use agents::{
    default_agents, priority_for_signal, scaled_confidence, CandidateAgent, RiskSignalAgent,
    SignalAgent, MAX_CONFIDENCE,
};
pub use install_order::{order_by_dependencies, topological_order};
pub use moderator::{Moderator, MAX_EVIDENCE};
pub use pipeline::{DecisionEngine, DecisionOutcome};
pub use plan::{config_tasks, render_summary, ConfigTask};
pub use validator::{DependencyValidator, AUTO_ADDED_CONFIDENCE};

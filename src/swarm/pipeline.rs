use super::agents::{default_agents, CandidateAgent};
use super::install_order::topological_order;
use super::moderator::Moderator;
use super::validator::DependencyValidator;
use crate::error::{Result, SwarmError};
use crate::registry::ModuleRegistry;
use crate::types::{ModuleKey, SignalMap, SwarmDecision, Tier};
use futures_util::future::join_all;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::info;

/// Decision plus the order its modules must be installed in.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DecisionOutcome {
    pub target_version: String,
    pub tier: Tier,
    pub registry_source: String,
    pub decision: SwarmDecision,
    pub install_order: Vec<ModuleKey>,
}

/// Agents → moderator → dependency closure → install order.
pub struct DecisionEngine {
    registry: Arc<ModuleRegistry>,
    tier: Tier,
    target_version: String,
    agents: Vec<Box<dyn CandidateAgent>>,
}

impl DecisionEngine {
    /// Engine with the default agent roster.
    ///
    /// # Errors
    /// Returns `RegistryError` when the registry has unresolved references.
    pub fn new(
        registry: Arc<ModuleRegistry>,
        tier: Tier,
        target_version: impl Into<String>,
    ) -> Result<Self> {
        registry.ensure_valid()?;
        let target_version = target_version.into();
        let agents = default_agents(&registry, &target_version);
        Ok(Self {
            registry,
            tier,
            target_version,
            agents,
        })
    }

    #[must_use]
    pub fn with_agents(mut self, agents: Vec<Box<dyn CandidateAgent>>) -> Self {
        self.agents = agents;
        self
    }

    #[must_use]
    pub const fn registry(&self) -> &Arc<ModuleRegistry> {
        &self.registry
    }

    /// Either a full decision is returned or none is.
    ///
    /// # Errors
    /// Returns `DecisionError` when nothing could be selected and
    /// `DependencyCycle` when the closure cannot be ordered.
    pub async fn decide(&self, signals: &SignalMap) -> Result<DecisionOutcome> {
        let results = join_all(
            self.agents
                .iter()
                .map(|agent| async move { agent.run(signals) }),
        )
        .await;
        info!(
            agents = results.len(),
            candidates = results.iter().map(|r| r.candidates.len()).sum::<usize>(),
            "Candidate agents finished"
        );

        let moderator = Moderator::new(Arc::clone(&self.registry), self.tier, &self.target_version);
        let decision = moderator.consolidate(&results);
        let decision = DependencyValidator::new(Arc::clone(&self.registry)).ensure_dependencies(decision);
        if decision.selected.is_empty() {
            return Err(SwarmError::DecisionError(
                "No modules could be selected from the registry".to_string(),
            ));
        }

        let install_order = topological_order(&decision.selected)?;
        info!(
            selected = decision.selected.len(),
            rejected = decision.rejected.len(),
            auto_added = decision.auto_added.len(),
            open_questions = decision.open_questions.len(),
            "Decision complete"
        );

        Ok(DecisionOutcome {
            target_version: self.target_version.clone(),
            tier: self.tier,
            registry_source: self.registry.source().to_string(),
            decision,
            install_order,
        })
    }
}

impl DecisionOutcome {
    /// Recomputes install order from the selected set.
    ///
    /// # Errors
    /// Returns `DependencyCycle` on cyclic dependencies.
    pub fn reorder(&mut self) -> Result<()> {
        self.install_order = topological_order(&self.decision.selected)?;
        Ok(())
    }
}

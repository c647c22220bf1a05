use crate::registry::ModuleRegistry;
use crate::types::{ModuleCandidate, ModuleKey, Priority, SwarmDecision};
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::debug;

/// Confidence given to modules pulled in only as dependencies.
pub const AUTO_ADDED_CONFIDENCE: f64 = 0.4;

/// Completes a decision with the transitive dependency closure of its
/// selected modules, always including the base module.
pub struct DependencyValidator {
    registry: Arc<ModuleRegistry>,
}

impl DependencyValidator {
    #[must_use]
    pub const fn new(registry: Arc<ModuleRegistry>) -> Self {
        Self { registry }
    }

    #[must_use]
    pub fn ensure_dependencies(&self, mut decision: SwarmDecision) -> SwarmDecision {
        let mut selected: BTreeMap<ModuleKey, ModuleCandidate> = decision
            .selected
            .drain(..)
            .map(|candidate| (candidate.key.clone(), candidate))
            .collect();
        let mut auto_added = Vec::new();

        if !selected.contains_key(&ModuleKey::base()) {
            if let Some(candidate) =
                self.auto_candidate(ModuleKey::BASE, "Core dependency for every instance.")
            {
                selected.insert(ModuleKey::base(), candidate);
                auto_added.push(ModuleKey::base());
            } else {
                decision
                    .notes
                    .push(format!("Dependency '{}' not found in registry.", ModuleKey::BASE));
            }
        }

        let mut pending: Vec<ModuleKey> = selected.keys().cloned().collect();
        while let Some(key) = pending.pop() {
            let dependencies = selected
                .get(&key)
                .map(|candidate| candidate.dependencies.clone())
                .unwrap_or_default();
            for dependency in dependencies {
                if selected.contains_key(&dependency) {
                    continue;
                }
                let reason = format!("Dependency required by {key}.");
                match self.auto_candidate(dependency.value(), reason) {
                    Some(candidate) => {
                        debug!(module = %dependency, required_by = %key, "Auto-added dependency");
                        selected.insert(dependency.clone(), candidate);
                        auto_added.push(dependency.clone());
                        pending.push(dependency);
                    }
                    None => decision
                        .notes
                        .push(format!("Dependency '{dependency}' not found in registry.")),
                }
            }
        }

        auto_added.sort();
        auto_added.dedup();
        decision.notes.sort();
        decision.notes.dedup();
        decision.selected = selected.into_values().collect();
        decision.auto_added = auto_added;
        decision
    }

    fn auto_candidate(&self, key: &str, reason: impl Into<String>) -> Option<ModuleCandidate> {
        self.registry.get(key).map(|definition| {
            ModuleCandidate::from_definition(definition, reason, AUTO_ADDED_CONFIDENCE)
                .with_priority(Priority::Low)
        })
    }
}

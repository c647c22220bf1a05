//! Plan artifacts derived from a decision: configuration tasks, a Markdown
//! implementation summary and the build target specification.

use super::pipeline::DecisionOutcome;
use crate::registry::ModuleRegistry;
use crate::types::{CompanyProfile, ModuleKey, ModuleRequest, TargetSpec};
use serde::{Deserialize, Serialize};
use std::fmt::Write as _;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConfigTask {
    pub task_id: String,
    pub module: ModuleKey,
    pub module_name: String,
    pub description: String,
    pub steps: Vec<String>,
    pub dependencies: Vec<ModuleKey>,
    pub owner_role: String,
}

/// One task per selected module, numbered in install order.
#[must_use]
pub fn config_tasks(outcome: &DecisionOutcome, registry: &ModuleRegistry) -> Vec<ConfigTask> {
    outcome
        .install_order
        .iter()
        .filter_map(|key| outcome.decision.selected_candidate(key.value()))
        .enumerate()
        .map(|(index, module)| ConfigTask {
            task_id: format!("CFG-{:03}", index + 1),
            module: module.key.clone(),
            module_name: module.name.clone(),
            description: format!("Configure {} ({}).", module.name, module.key),
            steps: registry
                .get(module.key.value())
                .map(|definition| definition.configuration_steps.clone())
                .unwrap_or_default(),
            dependencies: module.dependencies.clone(),
            owner_role: "functional_consultant".to_string(),
        })
        .collect()
}

#[must_use]
pub fn render_summary(title: &str, outcome: &DecisionOutcome, tasks: &[ConfigTask]) -> String {
    let decision = &outcome.decision;
    let mut out = String::new();
    let _ = writeln!(out, "# Implementation Summary - {title}\n");
    let _ = writeln!(out, "## Target");
    let _ = writeln!(out, "- Version: {}", outcome.target_version);
    let _ = writeln!(out, "- Tier: {}", outcome.tier);
    let _ = writeln!(out, "- Module registry: {}\n", outcome.registry_source);

    let _ = writeln!(out, "## Module Plan");
    for key in &outcome.install_order {
        if let Some(module) = decision.selected_candidate(key.value()) {
            let auto = if decision.auto_added.contains(&module.key) {
                " (auto-added)"
            } else {
                ""
            };
            let _ = writeln!(
                out,
                "- {} ({}) [{}]{auto} - {}",
                module.name, module.key, module.domain, module.justification
            );
        }
    }
    out.push('\n');

    if !decision.rejected.is_empty() {
        let _ = writeln!(out, "## Excluded Modules");
        for rejected in &decision.rejected {
            let _ = write!(
                out,
                "- {} ({}): {}",
                rejected.candidate.name,
                rejected.candidate.key,
                rejected.reason.as_str()
            );
            if !rejected.suggested_fallbacks.is_empty() {
                let alternatives: Vec<&str> = rejected
                    .suggested_fallbacks
                    .iter()
                    .map(ModuleKey::value)
                    .collect();
                let _ = write!(out, "; consider {}", alternatives.join(", "));
            }
            out.push('\n');
        }
        out.push('\n');
    }

    for (heading, items) in [
        ("Open Questions", &decision.open_questions),
        ("Risks / Flags", &decision.risks),
    ] {
        if items.is_empty() {
            continue;
        }
        let _ = writeln!(out, "## {heading}");
        for item in items {
            let _ = writeln!(out, "- {item}");
        }
        out.push('\n');
    }

    let _ = writeln!(out, "## Configuration Tasks");
    for task in tasks {
        let _ = writeln!(out, "- {}: {}", task.task_id, task.description);
    }
    out
}

impl TargetSpec {
    /// Target with the decided modules in install order and their registry
    /// dependencies.
    #[must_use]
    pub fn from_decision(
        spec_id: impl Into<String>,
        company: CompanyProfile,
        outcome: &DecisionOutcome,
    ) -> Self {
        let modules = outcome
            .install_order
            .iter()
            .filter_map(|key| outcome.decision.selected_candidate(key.value()))
            .map(|module| ModuleRequest {
                key: module.key.clone(),
                display_name: module.name.clone(),
                settings: serde_json::Map::new(),
                dependencies: module.dependencies.clone(),
            })
            .collect();
        Self {
            modules,
            version: outcome.target_version.clone(),
            ..Self::new(spec_id, company)
        }
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::expect_used, clippy::unwrap_used, clippy::panic)]

    use super::{config_tasks, render_summary};
    use crate::registry::ModuleRegistry;
    use crate::swarm::DecisionEngine;
    use crate::types::{CompanyProfile, SignalMap, TargetSpec, Tier};
    use std::sync::Arc;

    #[tokio::test]
    async fn artifacts_follow_install_order() {
        let registry = Arc::new(ModuleRegistry::builtin().unwrap());
        let engine = DecisionEngine::new(Arc::clone(&registry), Tier::Unrestricted, "17.0").unwrap();
        let outcome = engine
            .decide(&SignalMap::new().with_signal("inventory", 2).with_signal("accounting", 1))
            .await
            .unwrap();

        let tasks = config_tasks(&outcome, &registry);
        assert_eq!(tasks.len(), outcome.install_order.len());
        assert_eq!(tasks[0].task_id, "CFG-001");
        assert_eq!(tasks[0].module.value(), "base");
        let stock = tasks.iter().find(|task| task.module.value() == "stock").unwrap();
        assert!(!stock.steps.is_empty());

        let summary = render_summary("Acme", &outcome, &tasks);
        assert!(summary.starts_with("# Implementation Summary - Acme"));
        assert!(summary.contains("## Module Plan"));
        assert!(summary.contains("(auto-added)"));

        let target = TargetSpec::from_decision("spec-1", CompanyProfile::new("Acme"), &outcome);
        assert_eq!(target.modules.len(), outcome.install_order.len());
        assert_eq!(target.modules[0].key.value(), "base");
        assert_eq!(target.version, "17.0");
    }
}

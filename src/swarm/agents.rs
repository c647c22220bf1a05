//! Candidate agents. Each agent maps signal domains to registry modules and
//! proposes candidates; agents never reject.

use crate::registry::ModuleRegistry;
use crate::types::{AgentResult, ModuleCandidate, Priority, SignalMap};
use std::sync::Arc;

pub const MAX_CONFIDENCE: f64 = 0.95;
const CONFIDENCE_STEP: f64 = 0.05;
const HIGH_PRIORITY_SIGNALS: &[&str] = &["ecommerce", "accounting", "inventory"];

pub trait CandidateAgent: Send + Sync {
    fn name(&self) -> &str;

    /// Pure function of the signal map.
    fn run(&self, signals: &SignalMap) -> AgentResult;
}

/// `min(0.95, base + 0.05 * strength)`
#[must_use]
pub fn scaled_confidence(base: f64, strength: u32) -> f64 {
    CONFIDENCE_STEP
        .mul_add(f64::from(strength), base)
        .min(MAX_CONFIDENCE)
}

#[must_use]
pub fn priority_for_signal(signal: &str) -> Priority {
    if HIGH_PRIORITY_SIGNALS.contains(&signal) {
        Priority::High
    } else {
        Priority::Medium
    }
}

pub struct SignalAgent {
    name: String,
    registry: Arc<ModuleRegistry>,
    mappings: Vec<(String, Vec<String>)>,
    base_confidence: f64,
}

impl SignalAgent {
    #[must_use]
    pub fn new(name: impl Into<String>, registry: Arc<ModuleRegistry>, base_confidence: f64) -> Self {
        Self {
            name: name.into(),
            registry,
            mappings: Vec::new(),
            base_confidence,
        }
    }

    #[must_use]
    pub fn map(mut self, signal: &str, modules: &[&str]) -> Self {
        self.mappings.push((
            signal.to_string(),
            modules.iter().map(ToString::to_string).collect(),
        ));
        self
    }

    #[must_use]
    pub const fn base_confidence(&self) -> f64 {
        self.base_confidence
    }
}

impl CandidateAgent for SignalAgent {
    fn name(&self) -> &str {
        &self.name
    }

    fn run(&self, signals: &SignalMap) -> AgentResult {
        let mut result = AgentResult::new(&self.name, self.base_confidence);

        for (signal, modules) in &self.mappings {
            let strength = signals.strength(signal);
            if strength == 0 {
                continue;
            }
            let evidence = signals.evidence_for(signal).to_vec();
            let confidence = scaled_confidence(self.base_confidence, strength);

            for module in modules {
                let Some(definition) = self.registry.get(module) else {
                    result
                        .notes
                        .push(format!("Missing registry entry for module '{module}'"));
                    continue;
                };
                let justification = format!("Detected {} needs.", signal.replace('_', " "));
                result.candidates.push(
                    ModuleCandidate::from_definition(definition, justification, confidence)
                        .with_evidence(evidence.clone())
                        .with_priority(priority_for_signal(signal)),
                );
            }
        }

        result
    }
}

/// Raises risk flags for signals that need attention but map to no module.
pub struct RiskSignalAgent {
    name: String,
    signals: Vec<String>,
}

impl RiskSignalAgent {
    #[must_use]
    pub fn new(name: impl Into<String>, signals: &[&str]) -> Self {
        Self {
            name: name.into(),
            signals: signals.iter().map(ToString::to_string).collect(),
        }
    }
}

impl CandidateAgent for RiskSignalAgent {
    fn name(&self) -> &str {
        &self.name
    }

    fn run(&self, signals: &SignalMap) -> AgentResult {
        let mut result = AgentResult::new(&self.name, 0.5);
        result.risks = self
            .signals
            .iter()
            .filter(|signal| signals.is_active(signal))
            .map(|signal| format!("Detected {} considerations.", signal.replace('_', " ")))
            .collect();
        result
    }
}

/// Standard roster. Versions below 6 swap the e-commerce mapping for the
/// legacy shop connector modules.
#[must_use]
pub fn default_agents(
    registry: &Arc<ModuleRegistry>,
    target_version: &str,
) -> Vec<Box<dyn CandidateAgent>> {
    let legacy = crate::registry::major_version(target_version).is_some_and(|major| major < 6);
    let ecommerce: &[&str] = if legacy {
        &["sale_management", "delivery", "webshop_connector"]
    } else {
        &["website", "website_sale", "payment"]
    };
    let agent = |name: &str, base: f64| SignalAgent::new(name, Arc::clone(registry), base);

    vec![
        Box::new(
            agent("sales_agent", 0.65)
                .map("crm", &["crm"])
                .map("sales", &["sale_management", "crm"])
                .map("ecommerce", &["sale_management"]),
        ),
        Box::new(
            agent("website_agent", 0.7)
                .map("ecommerce", ecommerce)
                .map("shipping", &["delivery"]),
        ),
        Box::new(
            agent("inventory_agent", 0.7)
                .map("inventory", &["stock"])
                .map("shipping", &["delivery"]),
        ),
        Box::new(agent("purchase_agent", 0.6).map("purchase", &["purchase"])),
        Box::new(agent("accounting_agent", 0.75).map("accounting", &["account"])),
        Box::new(
            agent("manufacturing_agent", 0.6)
                .map("manufacturing", &["mrp"])
                .map("quality", &["quality"])
                .map("maintenance", &["maintenance"]),
        ),
        Box::new(agent("hr_agent", 0.55).map("hr", &["hr"])),
        Box::new(agent("project_agent", 0.55).map("project", &["project", "hr_timesheet"])),
        Box::new(agent("marketing_agent", 0.5).map("marketing", &["marketing_automation"])),
        Box::new(agent("subscription_agent", 0.6).map("subscriptions", &["sale_subscription"])),
        Box::new(agent("support_agent", 0.55).map("support", &["helpdesk"])),
        Box::new(agent("pos_agent", 0.6).map("pos", &["point_of_sale"])),
        Box::new(RiskSignalAgent::new("integration_agent", &["integration"])),
        Box::new(RiskSignalAgent::new("migration_agent", &["data_migration"])),
        Box::new(RiskSignalAgent::new(
            "outsourced_manufacturing_agent",
            &["outsourced_manufacturing"],
        )),
    ]
}

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Capability signals produced by the interview layer: domain → strength,
/// plus supporting evidence snippets per domain.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SignalMap {
    #[serde(default)]
    pub signals: BTreeMap<String, u32>,
    #[serde(default)]
    pub evidence: BTreeMap<String, Vec<String>>,
}

impl SignalMap {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn with_signal(mut self, domain: impl Into<String>, strength: u32) -> Self {
        self.signals.insert(domain.into(), strength);
        self
    }

    #[must_use]
    pub fn with_evidence(mut self, domain: impl Into<String>, snippet: impl Into<String>) -> Self {
        self.evidence
            .entry(domain.into())
            .or_default()
            .push(snippet.into());
        self
    }

    #[must_use]
    pub fn strength(&self, domain: &str) -> u32 {
        self.signals.get(domain).copied().unwrap_or(0)
    }

    #[must_use]
    pub fn is_active(&self, domain: &str) -> bool {
        self.strength(domain) > 0
    }

    #[must_use]
    pub fn evidence_for(&self, domain: &str) -> &[String] {
        self.evidence.get(domain).map_or(&[], Vec::as_slice)
    }

    #[must_use]
    pub fn active_domains(&self) -> Vec<&str> {
        self.signals
            .iter()
            .filter(|(_, strength)| **strength > 0)
            .map(|(domain, _)| domain.as_str())
            .collect()
    }
}

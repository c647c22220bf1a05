use super::{ModuleCandidate, ModuleKey};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Output of one candidate agent.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AgentResult {
    pub agent_name: String,
    pub candidates: Vec<ModuleCandidate>,
    #[serde(default)]
    pub notes: Vec<String>,
    /// Risk flags raised without proposing modules.
    #[serde(default)]
    pub risks: Vec<String>,
    pub confidence: f64,
}

impl AgentResult {
    #[must_use]
    pub fn new(agent_name: impl Into<String>, confidence: f64) -> Self {
        Self {
            agent_name: agent_name.into(),
            candidates: Vec::new(),
            notes: Vec::new(),
            risks: Vec::new(),
            confidence,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RejectionReason {
    RestrictedTier,
    IncompatibleVersion,
    MutualExclusion,
}

impl RejectionReason {
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::RestrictedTier => "restricted_tier",
            Self::IncompatibleVersion => "incompatible_version",
            Self::MutualExclusion => "mutual_exclusion",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RejectedModule {
    pub candidate: ModuleCandidate,
    pub reason: RejectionReason,
    #[serde(default)]
    pub suggested_fallbacks: Vec<ModuleKey>,
}

/// Consolidated module selection. Immutable once the dependency closure pass
/// has run; it is the only input to install ordering.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SwarmDecision {
    pub selected: Vec<ModuleCandidate>,
    pub rejected: Vec<RejectedModule>,
    pub open_questions: Vec<String>,
    pub risks: Vec<String>,
    pub notes: Vec<String>,
    pub coverage: BTreeMap<String, Vec<ModuleKey>>,
    pub auto_added: Vec<ModuleKey>,
    #[serde(default)]
    pub agent_results: Vec<AgentResult>,
}

impl SwarmDecision {
    #[must_use]
    pub fn selected_keys(&self) -> Vec<&ModuleKey> {
        self.selected.iter().map(|candidate| &candidate.key).collect()
    }

    #[must_use]
    pub fn is_selected(&self, key: &str) -> bool {
        self.selected.iter().any(|candidate| candidate.key.value() == key)
    }

    #[must_use]
    pub fn is_rejected(&self, key: &str) -> bool {
        self.rejected
            .iter()
            .any(|rejected| rejected.candidate.key.value() == key)
    }

    #[must_use]
    pub fn selected_candidate(&self, key: &str) -> Option<&ModuleCandidate> {
        self.selected
            .iter()
            .find(|candidate| candidate.key.value() == key)
    }
}

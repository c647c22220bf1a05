use super::ModuleKey;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Registry entry. Immutable once the registry is loaded.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModuleDefinition {
    #[serde(alias = "technical_name")]
    pub key: ModuleKey,
    pub name: String,
    pub domain: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub dependencies: Vec<ModuleKey>,
    #[serde(default, alias = "conflicts_with")]
    pub exclusive_with: Vec<ModuleKey>,
    #[serde(default, alias = "requires_enterprise")]
    pub restricted: bool,
    #[serde(default)]
    pub supported_versions: Vec<String>,
    #[serde(default, alias = "community_alternatives")]
    pub fallbacks: Vec<ModuleKey>,
    #[serde(default)]
    pub configuration_steps: Vec<String>,
    #[serde(default)]
    pub tags: Vec<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum Priority {
    High,
    #[default]
    Medium,
    Low,
}

impl Priority {
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::High => "high",
            Self::Medium => "medium",
            Self::Low => "low",
        }
    }
}

/// Licensing tier the target instance runs under.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum Tier {
    #[default]
    Unrestricted,
    Restricted,
    Unknown,
}

impl Tier {
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Unrestricted => "unrestricted",
            Self::Restricted => "restricted",
            Self::Unknown => "unknown",
        }
    }
}

impl TryFrom<&str> for Tier {
    type Error = String;

    fn try_from(value: &str) -> Result<Self, String> {
        match value.trim().to_ascii_lowercase().as_str() {
            "unrestricted" | "community" => Ok(Self::Unrestricted),
            "restricted" | "enterprise" => Ok(Self::Restricted),
            "unknown" | "" => Ok(Self::Unknown),
            other => Err(format!("Unknown tier: {other}")),
        }
    }
}

impl fmt::Display for Tier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A module proposed by a candidate agent, possibly merged by the moderator.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModuleCandidate {
    pub key: ModuleKey,
    pub name: String,
    pub domain: String,
    pub justification: String,
    pub confidence: f64,
    #[serde(default)]
    pub evidence: Vec<String>,
    #[serde(default)]
    pub dependencies: Vec<ModuleKey>,
    #[serde(default)]
    pub priority: Priority,
    #[serde(default)]
    pub restricted: bool,
    #[serde(default)]
    pub exclusive_with: Vec<ModuleKey>,
}

impl ModuleCandidate {
    #[must_use]
    pub fn from_definition(
        definition: &ModuleDefinition,
        justification: impl Into<String>,
        confidence: f64,
    ) -> Self {
        Self {
            key: definition.key.clone(),
            name: definition.name.clone(),
            domain: definition.domain.clone(),
            justification: justification.into(),
            confidence,
            evidence: Vec::new(),
            dependencies: definition.dependencies.clone(),
            priority: Priority::Medium,
            restricted: definition.restricted,
            exclusive_with: definition.exclusive_with.clone(),
        }
    }

    #[must_use]
    pub fn with_evidence(mut self, evidence: Vec<String>) -> Self {
        self.evidence = evidence;
        self
    }

    #[must_use]
    pub const fn with_priority(mut self, priority: Priority) -> Self {
        self.priority = priority;
        self
    }
}

#![deny(clippy::unwrap_used)]
#![deny(clippy::expect_used)]
#![deny(clippy::panic)]
#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]
#![forbid(unsafe_code)]

//! Module registry: the catalog of installable modules and their
//! dependency, exclusion, tier and version metadata.

use crate::error::{Result, SwarmError};
use crate::types::{ModuleDefinition, ModuleKey};
use serde::Serialize;
use std::collections::BTreeMap;
use std::path::Path;
use tracing::debug;

const BUILTIN_CATALOG: &str = include_str!("../data/modules.json");

/// Read-only after load; safe to share across threads without locking.
#[derive(Debug, Clone, Default)]
pub struct ModuleRegistry {
    modules: BTreeMap<ModuleKey, ModuleDefinition>,
    source: String,
}

/// A registry reference that does not resolve to an entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RegistryIssue {
    pub module: ModuleKey,
    pub field: &'static str,
    pub missing: ModuleKey,
    pub suggestion: Option<ModuleKey>,
}

impl RegistryIssue {
    #[must_use]
    pub fn message(&self) -> String {
        let base = format!(
            "{} references unknown module '{}' in {}",
            self.module, self.missing, self.field
        );
        match &self.suggestion {
            Some(suggestion) => format!("{base} (did you mean '{suggestion}'?)"),
            None => base,
        }
    }
}

/// Fallback modules usable in place of a restricted-tier module.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct FallbackSuggestion {
    /// True when the registry maps explicit fallbacks for the module.
    pub mapped: bool,
    pub modules: Vec<ModuleKey>,
}

impl ModuleRegistry {
    /// # Errors
    /// Returns `RegistryError` when two entries share a key.
    pub fn from_definitions(
        definitions: impl IntoIterator<Item = ModuleDefinition>,
        source: impl Into<String>,
    ) -> Result<Self> {
        let mut modules = BTreeMap::new();
        for definition in definitions {
            let key = definition.key.clone();
            if modules.insert(key.clone(), definition).is_some() {
                return Err(SwarmError::RegistryError(format!(
                    "Duplicate module key '{key}'"
                )));
            }
        }
        Ok(Self {
            modules,
            source: source.into(),
        })
    }

    /// # Errors
    /// Returns `SerializationError` for malformed JSON and `RegistryError`
    /// for duplicate keys.
    pub fn from_json_str(json: &str, source: impl Into<String>) -> Result<Self> {
        let definitions: Vec<ModuleDefinition> = serde_json::from_str(json)?;
        Self::from_definitions(definitions, source)
    }

    /// # Errors
    /// Returns an error if the file cannot be read or parsed.
    pub fn from_json_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|err| {
            SwarmError::RegistryError(format!(
                "Failed to read registry {}: {err}",
                path.display()
            ))
        })?;
        let registry = Self::from_json_str(&content, path.display().to_string())?;
        debug!(
            path = %path.display(),
            modules = registry.len(),
            "Loaded module registry"
        );
        Ok(registry)
    }

    /// Catalog shipped with the crate.
    ///
    /// # Errors
    /// Fails only if the embedded catalog is malformed.
    pub fn builtin() -> Result<Self> {
        Self::from_json_str(BUILTIN_CATALOG, "builtin")
    }

    #[must_use]
    pub fn source(&self) -> &str {
        &self.source
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.modules.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.modules.is_empty()
    }

    #[must_use]
    pub fn get(&self, key: &str) -> Option<&ModuleDefinition> {
        self.modules.get(&ModuleKey::new(key))
    }

    #[must_use]
    pub fn contains(&self, key: &str) -> bool {
        self.get(key).is_some()
    }

    /// All entries in key order.
    #[must_use]
    pub fn list_all(&self) -> Vec<&ModuleDefinition> {
        self.modules.values().collect()
    }

    #[must_use]
    pub fn find_by_tag(&self, tag: &str) -> Vec<&ModuleDefinition> {
        self.modules
            .values()
            .filter(|module| module.tags.iter().any(|t| t == tag))
            .collect()
    }

    #[must_use]
    pub fn by_domain(&self, domain: &str) -> Vec<&ModuleDefinition> {
        self.modules
            .values()
            .filter(|module| module.domain == domain)
            .collect()
    }

    /// Unknown modules are never compatible; an empty pattern list accepts
    /// every version.
    #[must_use]
    pub fn is_compatible(&self, key: &str, target_version: &str) -> bool {
        self.get(key).is_some_and(|module| {
            module.supported_versions.is_empty()
                || module
                    .supported_versions
                    .iter()
                    .any(|pattern| matches_version_pattern(pattern, target_version))
        })
    }

    /// Explicit unrestricted fallbacks first; otherwise unrestricted modules
    /// of the same domain, flagged as unmapped.
    #[must_use]
    pub fn fallbacks_for(&self, key: &str) -> FallbackSuggestion {
        let Some(module) = self.get(key) else {
            return FallbackSuggestion::default();
        };

        let explicit: Vec<ModuleKey> = module
            .fallbacks
            .iter()
            .filter(|fallback| {
                self.get(fallback.value())
                    .is_some_and(|definition| !definition.restricted)
            })
            .cloned()
            .collect();
        if !explicit.is_empty() {
            return FallbackSuggestion {
                mapped: true,
                modules: explicit,
            };
        }

        let same_domain = self
            .by_domain(&module.domain)
            .into_iter()
            .filter(|candidate| candidate.key != module.key && !candidate.restricted)
            .map(|candidate| candidate.key.clone())
            .collect();
        FallbackSuggestion {
            mapped: false,
            modules: same_domain,
        }
    }

    /// Every dependency or exclusion reference that does not resolve.
    #[must_use]
    pub fn validate(&self) -> Vec<RegistryIssue> {
        self.modules
            .values()
            .flat_map(|module| {
                let dependencies = module
                    .dependencies
                    .iter()
                    .map(move |dep| (module, "dependencies", dep));
                let exclusions = module
                    .exclusive_with
                    .iter()
                    .map(move |other| (module, "exclusive_with", other));
                let fallbacks = module
                    .fallbacks
                    .iter()
                    .map(move |fallback| (module, "fallbacks", fallback));
                dependencies.chain(exclusions).chain(fallbacks)
            })
            .filter(|(_, _, reference)| !self.modules.contains_key(*reference))
            .map(|(module, field, missing)| RegistryIssue {
                module: module.key.clone(),
                field,
                missing: missing.clone(),
                suggestion: self.suggest(missing.value()),
            })
            .collect()
    }

    /// # Errors
    /// Returns `RegistryError` listing every unresolved reference.
    pub fn ensure_valid(&self) -> Result<()> {
        let issues = self.validate();
        if issues.is_empty() {
            return Ok(());
        }
        let details = issues
            .iter()
            .map(RegistryIssue::message)
            .collect::<Vec<_>>()
            .join("; ");
        Err(SwarmError::RegistryError(details))
    }

    /// Closest known key by edit distance, if reasonably close.
    #[must_use]
    pub fn suggest(&self, key: &str) -> Option<ModuleKey> {
        self.modules
            .keys()
            .map(|candidate| (strsim::levenshtein(key, candidate.value()), candidate))
            .filter(|(distance, _)| *distance <= 3)
            .min_by_key(|(distance, _)| *distance)
            .map(|(_, candidate)| candidate.clone())
    }
}

/// Supports exact match, trailing wildcard (`17.x`, `17*`) and major-only
/// (`5` matches `5.3`) patterns. Comparison is trimmed and case-insensitive.
#[must_use]
pub fn matches_version_pattern(pattern: &str, target_version: &str) -> bool {
    let pattern = pattern.trim().to_lowercase();
    let target = target_version.trim().to_lowercase();
    if pattern.is_empty() || target.is_empty() {
        return false;
    }
    if pattern == target {
        return true;
    }
    if let Some(prefix) = pattern.strip_suffix('x').filter(|p| p.ends_with('.')) {
        return target.starts_with(prefix);
    }
    if let Some(prefix) = pattern.strip_suffix('*') {
        return target.starts_with(prefix);
    }
    if pattern.chars().all(|c| c.is_ascii_digit()) {
        return target.starts_with(&format!("{pattern}."));
    }
    false
}

/// Major component of a version string (`"17.0"` → 17).
#[must_use]
pub fn major_version(version: &str) -> Option<u32> {
    version.trim().split('.').next()?.parse().ok()
}

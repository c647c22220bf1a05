use crate::registry::ModuleRegistry;
use crate::types::{
    AgentResult, ModuleCandidate, ModuleKey, RejectedModule, RejectionReason, SwarmDecision, Tier,
};
use itertools::Itertools;
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;
use tracing::debug;

pub const MAX_EVIDENCE: usize = 5;

/// Consolidates agent output into a single decision for one tier and
/// target version.
pub struct Moderator {
    registry: Arc<ModuleRegistry>,
    tier: Tier,
    target_version: String,
}

impl Moderator {
    #[must_use]
    pub fn new(registry: Arc<ModuleRegistry>, tier: Tier, target_version: impl Into<String>) -> Self {
        Self {
            registry,
            tier,
            target_version: target_version.into(),
        }
    }

    #[must_use]
    pub fn consolidate(&self, results: &[AgentResult]) -> SwarmDecision {
        let mut buckets: BTreeMap<ModuleKey, Vec<&ModuleCandidate>> = BTreeMap::new();
        let mut notes = Vec::new();
        let mut risks = Vec::new();

        for result in results {
            notes.extend(result.notes.iter().cloned());
            risks.extend(result.risks.iter().cloned());
            for candidate in &result.candidates {
                buckets.entry(candidate.key.clone()).or_default().push(candidate);
            }
        }

        let mut accepted = Vec::new();
        let mut rejected = Vec::new();
        let mut open_questions = Vec::new();

        for candidates in buckets.values() {
            let Some(merged) = merge_candidates(candidates) else {
                continue;
            };

            if merged.restricted && self.tier == Tier::Unknown {
                open_questions.push(format!(
                    "Confirm edition for restricted-tier module '{}' ({}).",
                    merged.name, merged.key
                ));
            }

            if merged.restricted && self.tier == Tier::Unrestricted {
                let fallbacks = self.registry.fallbacks_for(merged.key.value());
                if fallbacks.mapped {
                    notes.push(format!(
                        "Excluded restricted-tier module '{}'. Consider: {}.",
                        merged.key,
                        fallbacks.modules.iter().join(", ")
                    ));
                } else {
                    notes.push(format!(
                        "Excluded restricted-tier module '{}'.",
                        merged.key
                    ));
                    open_questions.push(format!(
                        "No fallback mapped for '{}'. Confirm custom implementation scope.",
                        merged.key
                    ));
                }
                debug!(module = %merged.key, "Rejected restricted-tier module");
                rejected.push(RejectedModule {
                    candidate: merged,
                    reason: RejectionReason::RestrictedTier,
                    suggested_fallbacks: fallbacks.modules,
                });
                continue;
            }

            if !self
                .registry
                .is_compatible(merged.key.value(), &self.target_version)
            {
                open_questions.push(format!(
                    "Module '{}' is not mapped for version {}. Confirm alternate module or custom implementation.",
                    merged.key, self.target_version
                ));
                notes.push(format!(
                    "Excluded incompatible module '{}' for version {}.",
                    merged.key, self.target_version
                ));
                debug!(module = %merged.key, version = %self.target_version, "Rejected incompatible module");
                rejected.push(RejectedModule {
                    candidate: merged,
                    reason: RejectionReason::IncompatibleVersion,
                    suggested_fallbacks: Vec::new(),
                });
                continue;
            }

            accepted.push(merged);
        }

        let (selected, excluded, conflict_questions) = resolve_exclusions(accepted);
        rejected.extend(excluded);
        open_questions.extend(conflict_questions);

        let mut coverage: BTreeMap<String, Vec<ModuleKey>> = BTreeMap::new();
        for module in &selected {
            coverage
                .entry(module.domain.clone())
                .or_default()
                .push(module.key.clone());
        }
        for keys in coverage.values_mut() {
            keys.sort();
            keys.dedup();
        }

        SwarmDecision {
            selected,
            rejected,
            open_questions: sorted_unique(open_questions),
            risks: sorted_unique(risks),
            notes: sorted_unique(notes),
            coverage,
            auto_added: Vec::new(),
            agent_results: results.to_vec(),
        }
    }
}

/// Highest-confidence candidate represents the module; evidence,
/// justifications, exclusions and the restricted flag are unioned.
fn merge_candidates(candidates: &[&ModuleCandidate]) -> Option<ModuleCandidate> {
    let best = candidates
        .iter()
        .copied()
        .max_by(|a, b| a.confidence.total_cmp(&b.confidence))?;

    let evidence = candidates
        .iter()
        .flat_map(|candidate| candidate.evidence.iter().cloned())
        .unique()
        .take(MAX_EVIDENCE)
        .collect();
    let justification = candidates
        .iter()
        .map(|candidate| candidate.justification.as_str())
        .collect::<BTreeSet<_>>()
        .into_iter()
        .join(" / ");
    let exclusive_with = candidates
        .iter()
        .flat_map(|candidate| candidate.exclusive_with.iter().cloned())
        .collect::<BTreeSet<_>>()
        .into_iter()
        .collect();

    Some(ModuleCandidate {
        justification,
        evidence,
        exclusive_with,
        restricted: candidates.iter().any(|candidate| candidate.restricted),
        ..best.clone()
    })
}

/// Drops the lower-confidence module of every exclusive pair. Ties go to the
/// lexically smaller key.
fn resolve_exclusions(
    accepted: Vec<ModuleCandidate>,
) -> (Vec<ModuleCandidate>, Vec<RejectedModule>, Vec<String>) {
    let by_key: BTreeMap<ModuleKey, ModuleCandidate> = accepted
        .into_iter()
        .map(|candidate| (candidate.key.clone(), candidate))
        .collect();

    let present = &by_key;
    let pairs: BTreeSet<(ModuleKey, ModuleKey)> = by_key
        .values()
        .flat_map(|module| {
            module
                .exclusive_with
                .iter()
                .filter(move |other| present.contains_key(*other) && **other != module.key)
                .map(move |other| {
                    if module.key < *other {
                        (module.key.clone(), other.clone())
                    } else {
                        (other.clone(), module.key.clone())
                    }
                })
        })
        .collect();

    let mut removed: BTreeSet<ModuleKey> = BTreeSet::new();
    let mut questions = Vec::new();
    for (first, second) in pairs {
        if removed.contains(&first) || removed.contains(&second) {
            continue;
        }
        let (Some(a), Some(b)) = (by_key.get(&first), by_key.get(&second)) else {
            continue;
        };
        let (winner, loser) = if b.confidence > a.confidence {
            (b, a)
        } else {
            (a, b)
        };
        questions.push(format!(
            "Conflict between '{}' and '{}'. Confirm preferred approach.",
            winner.key, loser.key
        ));
        debug!(kept = %winner.key, dropped = %loser.key, "Resolved module exclusion");
        removed.insert(loser.key.clone());
    }

    let (dropped, selected): (Vec<_>, Vec<_>) = by_key
        .into_values()
        .partition(|candidate| removed.contains(&candidate.key));
    let rejected = dropped
        .into_iter()
        .map(|candidate| RejectedModule {
            candidate,
            reason: RejectionReason::MutualExclusion,
            suggested_fallbacks: Vec::new(),
        })
        .collect();
    (selected, rejected, questions)
}

fn sorted_unique(items: Vec<String>) -> Vec<String> {
    items
        .into_iter()
        .collect::<BTreeSet<_>>()
        .into_iter()
        .collect()
}

use crate::error::{Result, SwarmError};
use crate::types::{ModuleCandidate, ModuleKey};
use std::cmp::Ordering;
use std::collections::{BTreeMap, BTreeSet};

#[derive(Clone, Copy, PartialEq, Eq)]
enum Mark {
    InProgress,
    Done,
}

/// Base first, then lexical.
fn install_cmp(a: &ModuleKey, b: &ModuleKey) -> Ordering {
    b.is_base().cmp(&a.is_base()).then_with(|| a.cmp(b))
}

/// Dependency-first order over the edges inside `selected`. Dependencies
/// outside the set are ignored.
///
/// # Errors
/// Returns `DependencyCycle` naming the module at which a cycle closes.
pub fn topological_order(selected: &[ModuleCandidate]) -> Result<Vec<ModuleKey>> {
    order_by_dependencies(
        selected
            .iter()
            .map(|candidate| (&candidate.key, candidate.dependencies.as_slice())),
    )
}

/// Same ordering over plain `(key, dependencies)` pairs.
///
/// # Errors
/// Returns `DependencyCycle` naming the module at which a cycle closes.
pub fn order_by_dependencies<'a, I>(modules: I) -> Result<Vec<ModuleKey>>
where
    I: IntoIterator<Item = (&'a ModuleKey, &'a [ModuleKey])>,
{
    let mut edges: BTreeMap<&ModuleKey, Vec<&ModuleKey>> = BTreeMap::new();
    for (key, dependencies) in modules {
        edges.entry(key).or_default().extend(dependencies.iter());
    }
    let nodes: BTreeSet<&ModuleKey> = edges.keys().copied().collect();

    let mut roots: Vec<&ModuleKey> = nodes.iter().copied().collect();
    roots.sort_by(|a, b| install_cmp(a, b));

    let mut marks: BTreeMap<&ModuleKey, Mark> = BTreeMap::new();
    let mut order = Vec::with_capacity(roots.len());
    for root in roots {
        visit(root, &edges, &nodes, &mut marks, &mut order)?;
    }
    Ok(order)
}

fn visit<'a>(
    key: &'a ModuleKey,
    edges: &BTreeMap<&'a ModuleKey, Vec<&'a ModuleKey>>,
    nodes: &BTreeSet<&'a ModuleKey>,
    marks: &mut BTreeMap<&'a ModuleKey, Mark>,
    order: &mut Vec<ModuleKey>,
) -> Result<()> {
    match marks.get(key) {
        Some(Mark::Done) => return Ok(()),
        Some(Mark::InProgress) => return Err(SwarmError::DependencyCycle(key.to_string())),
        None => {}
    }
    marks.insert(key, Mark::InProgress);

    let mut dependencies: Vec<&ModuleKey> = edges
        .get(key)
        .map(|deps| deps.iter().copied().filter(|dep| nodes.contains(dep)).collect())
        .unwrap_or_default();
    dependencies.sort_by(|a, b| install_cmp(a, b));
    dependencies.dedup();
    for dependency in dependencies {
        visit(dependency, edges, nodes, marks, order)?;
    }

    marks.insert(key, Mark::Done);
    order.push(key.clone());
    Ok(())
}

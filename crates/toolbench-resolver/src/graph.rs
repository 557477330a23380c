use std::collections::{BTreeMap, BTreeSet};

use anyhow::Result;
use toolbench_core::{Dependencies, DependencyKinds, Package};
use tracing::debug;

use crate::order::topological_sort;

/// Anything with a name and typed dependency sets: worktree projects and
/// toolchain packages.
pub trait DependencyNode {
    fn name(&self) -> &str;
    fn dependencies(&self) -> &Dependencies;
}

impl DependencyNode for Package {
    fn name(&self) -> &str {
        &self.name
    }

    fn dependencies(&self) -> &Dependencies {
        Package::dependencies(self)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Direction {
    #[default]
    Forward,
    Reverse,
}

pub fn edge_map<'a, N>(
    nodes: impl IntoIterator<Item = &'a N>,
    kinds: &DependencyKinds,
) -> BTreeMap<String, BTreeSet<String>>
where
    N: DependencyNode + 'a,
{
    nodes
        .into_iter()
        .map(|node| {
            (
                node.name().to_string(),
                node.dependencies().selected(kinds),
            )
        })
        .collect()
}

/// Forward: `requested` and everything they depend on, dependencies first.
/// Reverse: the nodes directly depending on one of `requested`, sorted.
pub fn dependency_names<'a, N, S>(
    nodes: impl IntoIterator<Item = &'a N>,
    requested: &[S],
    kinds: &DependencyKinds,
    direction: Direction,
) -> Result<Vec<String>>
where
    N: DependencyNode + 'a,
    S: AsRef<str>,
{
    match direction {
        Direction::Forward => topological_sort(&edge_map(nodes, kinds), requested),
        Direction::Reverse => Ok(reverse_dependency_names(nodes, requested, kinds)),
    }
}

/// Direct reverse lookup only; not transitive.
pub fn reverse_dependency_names<'a, N, S>(
    nodes: impl IntoIterator<Item = &'a N>,
    requested: &[S],
    kinds: &DependencyKinds,
) -> Vec<String>
where
    N: DependencyNode + 'a,
    S: AsRef<str>,
{
    let dependents: BTreeSet<String> = nodes
        .into_iter()
        .filter(|node| {
            requested
                .iter()
                .any(|name| node.dependencies().depends_on(name.as_ref(), kinds))
        })
        .map(|node| node.name().to_string())
        .collect();
    dependents.into_iter().collect()
}

/// Keeps the order of `names`; names with no live object are dropped.
pub fn resolve_to_objects<'a, T, S, F>(names: &[S], lookup: F) -> Vec<&'a T>
where
    S: AsRef<str>,
    F: Fn(&str) -> Option<&'a T>,
{
    names
        .iter()
        .filter_map(|name| {
            let found = lookup(name.as_ref());
            if found.is_none() {
                debug!(name = name.as_ref(), "skipping unresolved dependency");
            }
            found
        })
        .collect()
}

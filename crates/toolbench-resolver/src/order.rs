use std::collections::{BTreeMap, BTreeSet, HashSet};

use anyhow::Result;
use toolbench_core::ToolbenchError;

/// Orders `roots` and everything they reach so that dependencies come before
/// their dependents.
///
/// Traversal is depth-first from each root in the given order; the
/// dependencies of a node are visited in lexicographic order. A name without
/// an entry in `edges` is a leaf and is still part of the output.
pub fn topological_sort<S: AsRef<str>>(
    edges: &BTreeMap<String, BTreeSet<String>>,
    roots: &[S],
) -> Result<Vec<String>> {
    let mut walk = Walk {
        edges,
        done: HashSet::new(),
        path: Vec::new(),
        ordered: Vec::new(),
    };
    for root in roots {
        walk.visit(root.as_ref())?;
    }
    Ok(walk.ordered)
}

struct Walk<'a> {
    edges: &'a BTreeMap<String, BTreeSet<String>>,
    done: HashSet<String>,
    path: Vec<String>,
    ordered: Vec<String>,
}

impl Walk<'_> {
    fn visit(&mut self, name: &str) -> Result<()> {
        if self.done.contains(name) {
            return Ok(());
        }
        if let Some(start) = self.path.iter().position(|entry| entry == name) {
            let mut cycle = self.path[start..].to_vec();
            cycle.push(name.to_string());
            return Err(ToolbenchError::DependencyCycle { cycle }.into());
        }

        let edges = self.edges;
        self.path.push(name.to_string());
        if let Some(dependencies) = edges.get(name) {
            for dependency in dependencies {
                self.visit(dependency)?;
            }
        }
        self.path.pop();

        self.done.insert(name.to_string());
        self.ordered.push(name.to_string());
        Ok(())
    }
}

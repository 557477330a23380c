use std::collections::BTreeSet;
use std::path::PathBuf;

use anyhow::Result;
use toolbench_core::{DependencyKinds, Package};
use toolbench_resolver::{dependency_names, resolve_to_objects, Direction};

use crate::project::BuildProject;
use crate::worktree::BuildWorktree;

/// Dependency queries across the projects of a worktree and the packages of
/// its toolchain.
#[derive(Debug, Clone, Copy)]
pub struct DepsSolver<'w> {
    worktree: &'w BuildWorktree,
}

impl<'w> DepsSolver<'w> {
    pub fn new(worktree: &'w BuildWorktree) -> Self {
        Self { worktree }
    }

    /// Projects of the worktree needed by `projects`, dependencies first.
    /// With `Direction::Reverse`, the projects directly depending on them.
    pub fn get_dep_projects(
        &self,
        projects: &[&BuildProject],
        kinds: &DependencyKinds,
        direction: Direction,
    ) -> Result<Vec<&'w BuildProject>> {
        let names = self.sorted_names(projects, kinds, direction)?;
        let worktree = self.worktree;
        Ok(resolve_to_objects(&names, |name| {
            worktree.find_build_project(name)
        }))
    }

    /// Toolchain packages needed by `projects`, dependencies first. A package
    /// named like a worktree project is left out: the project is built
    /// instead.
    pub fn get_dep_packages(
        &self,
        projects: &[&BuildProject],
        kinds: &DependencyKinds,
    ) -> Result<Vec<&'w Package>> {
        let worktree = self.worktree;
        let Some(toolchain) = worktree.toolchain() else {
            return Ok(Vec::new());
        };
        let names = self.sorted_names(projects, kinds, Direction::Forward)?;
        let package_names: Vec<&str> = names
            .iter()
            .map(String::as_str)
            .filter(|name| toolchain.find_package(name).is_some())
            .collect();

        let project_names: BTreeSet<&str> = worktree
            .projects()
            .iter()
            .map(|project| project.name.as_str())
            .collect();
        Ok(toolchain
            .solve_deps(&package_names, kinds)?
            .into_iter()
            .filter(|package| !project_names.contains(package.name.as_str()))
            .collect())
    }

    /// Sdk directories of the projects `project` depends on, itself
    /// excluded.
    pub fn get_sdk_dirs(
        &self,
        project: &BuildProject,
        kinds: &DependencyKinds,
    ) -> Result<Vec<PathBuf>> {
        Ok(self
            .get_dep_projects(&[project], kinds, Direction::Forward)?
            .into_iter()
            .filter(|dep| dep.name != project.name)
            .map(BuildProject::sdk_directory)
            .collect())
    }

    fn sorted_names(
        &self,
        projects: &[&BuildProject],
        kinds: &DependencyKinds,
        direction: Direction,
    ) -> Result<Vec<String>> {
        let requested: Vec<&str> = projects.iter().map(|project| project.name.as_str()).collect();
        dependency_names(self.worktree.projects(), &requested, kinds, direction)
    }
}

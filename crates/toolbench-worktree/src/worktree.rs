use std::path::{Path, PathBuf};

use anyhow::{anyhow, Context, Result};
use toolbench_core::xml::{read_xml_file, required_attr, write_xml_file, XmlElement};
use toolbench_core::ToolbenchError;
use toolbench_installer::Database;
use tracing::debug;

use crate::project::BuildProject;

pub const WORKTREE_DIR_NAME: &str = ".toolbench";
pub const WORKTREE_FILE_NAME: &str = "worktree.xml";

const WORKTREE_TAG: &str = "worktree";
const PROJECT_TAG: &str = "project";

/// Projects listed in `<root>/.toolbench/worktree.xml`, plus the toolchain
/// their builds use.
#[derive(Debug)]
pub struct BuildWorktree {
    root: PathBuf,
    projects: Vec<BuildProject>,
    toolchain: Option<Database>,
}

impl BuildWorktree {
    /// Creates an empty worktree file unless one exists, then opens it.
    pub fn init(root: &Path) -> Result<Self> {
        let file = worktree_file(root);
        if !file.exists() {
            write_xml_file(&file, &XmlElement::new(WORKTREE_TAG))?;
        }
        Self::open(root)
    }

    pub fn open(root: &Path) -> Result<Self> {
        let file = worktree_file(root);
        if !file.is_file() {
            return Err(anyhow!(
                "{} is not a toolbench worktree (missing {})",
                root.display(),
                file.display()
            ));
        }
        let document = read_xml_file(&file)?;
        if document.tag != WORKTREE_TAG {
            return Err(anyhow!(
                "{} must have a <{WORKTREE_TAG}> root, got <{}>",
                file.display(),
                document.tag
            ));
        }

        let mut worktree = Self {
            root: root.to_path_buf(),
            projects: Vec::new(),
            toolchain: None,
        };
        for element in &document.children {
            if element.tag != PROJECT_TAG {
                debug!(tag = %element.tag, "ignoring unknown worktree element");
                continue;
            }
            let src = required_attr(element, "src")
                .with_context(|| format!("invalid worktree file: {}", file.display()))?;
            let project = BuildProject::load(&root.join(src))?;
            worktree.insert_project(project)?;
        }
        Ok(worktree)
    }

    /// Walks up from `start` to the first directory holding a worktree file.
    pub fn discover(start: &Path) -> Result<Self> {
        let mut current = Some(start);
        while let Some(dir) = current {
            if worktree_file(dir).is_file() {
                return Self::open(dir);
            }
            current = dir.parent();
        }
        Err(anyhow!(
            "no toolbench worktree found in {} or its parents",
            start.display()
        ))
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn projects(&self) -> &[BuildProject] {
        &self.projects
    }

    pub fn get_build_project(&self, name: &str) -> Result<&BuildProject> {
        self.find_build_project(name)
            .ok_or_else(|| ToolbenchError::project_not_found(name).into())
    }

    pub fn find_build_project(&self, name: &str) -> Option<&BuildProject> {
        self.projects.iter().find(|project| project.name == name)
    }

    /// Registers the project at `src`, relative to the worktree root, and
    /// saves the worktree file.
    pub fn add_project(&mut self, src: &Path) -> Result<&BuildProject> {
        let project = BuildProject::load(&self.root.join(src))?;
        let name = project.name.clone();
        self.insert_project(project)?;
        self.save()?;
        self.get_build_project(&name)
    }

    pub fn remove_project(&mut self, name: &str) -> Result<BuildProject> {
        let index = self
            .projects
            .iter()
            .position(|project| project.name == name)
            .ok_or_else(|| ToolbenchError::project_not_found(name))?;
        let project = self.projects.remove(index);
        self.save()?;
        Ok(project)
    }

    pub fn save(&self) -> Result<()> {
        let mut document = XmlElement::new(WORKTREE_TAG);
        for project in &self.projects {
            let src = project
                .src_dir()
                .strip_prefix(&self.root)
                .unwrap_or(project.src_dir());
            document.push(XmlElement::new(PROJECT_TAG).with_attr("src", path_attr(src)));
        }
        write_xml_file(&worktree_file(&self.root), &document)
    }

    pub fn set_build_config(&mut self, config: Option<&str>) {
        for project in &mut self.projects {
            project.set_build_config(config.map(str::to_string));
        }
    }

    pub fn set_toolchain(&mut self, toolchain: Database) {
        self.toolchain = Some(toolchain);
    }

    pub fn toolchain(&self) -> Option<&Database> {
        self.toolchain.as_ref()
    }

    fn insert_project(&mut self, project: BuildProject) -> Result<()> {
        if let Some(existing) = self.find_build_project(&project.name) {
            return Err(anyhow!(
                "project '{}' is declared twice: {} and {}",
                project.name,
                existing.src_dir().display(),
                project.src_dir().display()
            ));
        }
        self.projects.push(project);
        Ok(())
    }
}

fn worktree_file(root: &Path) -> PathBuf {
    root.join(WORKTREE_DIR_NAME).join(WORKTREE_FILE_NAME)
}

/// Relative paths use `/` separators on every platform.
fn path_attr(path: &Path) -> String {
    if path.is_absolute() {
        return path.display().to_string();
    }
    path.components()
        .map(|component| component.as_os_str().to_string_lossy().into_owned())
        .collect::<Vec<_>>()
        .join("/")
}

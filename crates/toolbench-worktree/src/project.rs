use std::path::{Path, PathBuf};

use anyhow::{anyhow, Context, Result};
use toolbench_core::xml::{read_xml_file, required_attr, write_xml_file, XmlElement};
use toolbench_core::{read_depends, write_depends, Dependencies};
use toolbench_resolver::DependencyNode;

pub const PROJECT_FILE_NAME: &str = "project.xml";

const PROJECT_TAG: &str = "project";

/// A buildable source project, described by `<src>/project.xml`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BuildProject {
    pub name: String,
    src_dir: PathBuf,
    pub dependencies: Dependencies,
    build_config: Option<String>,
}

impl BuildProject {
    pub fn new(name: impl Into<String>, src_dir: impl Into<PathBuf>) -> Self {
        Self {
            name: name.into(),
            src_dir: src_dir.into(),
            dependencies: Dependencies::default(),
            build_config: None,
        }
    }

    pub fn load(src_dir: &Path) -> Result<Self> {
        let manifest_path = src_dir.join(PROJECT_FILE_NAME);
        let root = read_xml_file(&manifest_path)?;
        if root.tag != PROJECT_TAG {
            return Err(anyhow!(
                "{} must have a <{PROJECT_TAG}> root, got <{}>",
                manifest_path.display(),
                root.tag
            ));
        }
        let name = required_attr(&root, "name")
            .with_context(|| format!("invalid project manifest: {}", manifest_path.display()))?;
        let dependencies = read_depends(&root)
            .with_context(|| format!("invalid project manifest: {}", manifest_path.display()))?;
        Ok(Self {
            name: name.to_string(),
            src_dir: src_dir.to_path_buf(),
            dependencies,
            build_config: None,
        })
    }

    pub fn save(&self) -> Result<()> {
        let mut root = XmlElement::new(PROJECT_TAG).with_attr("name", self.name.as_str());
        write_depends(&self.dependencies, &mut root);
        write_xml_file(&self.manifest_path(), &root)
    }

    pub fn src_dir(&self) -> &Path {
        &self.src_dir
    }

    pub fn manifest_path(&self) -> PathBuf {
        self.src_dir.join(PROJECT_FILE_NAME)
    }

    pub fn build_config(&self) -> Option<&str> {
        self.build_config.as_deref()
    }

    pub fn set_build_config(&mut self, config: Option<String>) {
        self.build_config = config;
    }

    /// `build`, or `build-<config>` when a build config is selected.
    pub fn build_directory(&self) -> PathBuf {
        match &self.build_config {
            Some(config) => self.src_dir.join(format!("build-{config}")),
            None => self.src_dir.join("build"),
        }
    }

    pub fn sdk_directory(&self) -> PathBuf {
        self.build_directory().join("sdk")
    }
}

impl DependencyNode for BuildProject {
    fn name(&self) -> &str {
        &self.name
    }

    fn dependencies(&self) -> &Dependencies {
        &self.dependencies
    }
}

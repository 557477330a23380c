use std::fs;
use std::path::PathBuf;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use toolbench_core::ToolbenchError;

/// Where a toolchain gets its packages from.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ToolchainRecord {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub feed: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub branch: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub feed_name: Option<String>,
}

impl ToolchainRecord {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            feed: None,
            branch: None,
            feed_name: None,
        }
    }
}

/// `toolchains.toml` under the toolbench prefix.
#[derive(Debug, Clone)]
pub struct ToolchainStore {
    state_root: PathBuf,
}

impl ToolchainStore {
    pub fn new(state_root: impl Into<PathBuf>) -> Self {
        Self {
            state_root: state_root.into(),
        }
    }

    pub fn add_toolchain(&self, record: ToolchainRecord) -> Result<()> {
        validate_toolchain_name(&record.name)?;

        let mut state = self.load_state()?;
        if state
            .toolchains
            .iter()
            .any(|existing| existing.name == record.name)
        {
            anyhow::bail!("toolchain '{}' already exists", record.name);
        }

        state.toolchains.push(record);
        self.save_state(state)
    }

    /// Inserts `record` or replaces the record of the same name.
    pub fn upsert_toolchain(&self, record: ToolchainRecord) -> Result<()> {
        validate_toolchain_name(&record.name)?;

        let mut state = self.load_state()?;
        state.toolchains.retain(|existing| existing.name != record.name);
        state.toolchains.push(record);
        self.save_state(state)
    }

    pub fn list_toolchains(&self) -> Result<Vec<ToolchainRecord>> {
        Ok(self.load_state()?.toolchains)
    }

    pub fn find_toolchain(&self, name: &str) -> Result<Option<ToolchainRecord>> {
        Ok(self
            .load_state()?
            .toolchains
            .into_iter()
            .find(|record| record.name == name))
    }

    pub fn get_toolchain(&self, name: &str) -> Result<ToolchainRecord> {
        self.find_toolchain(name)?.ok_or_else(|| {
            ToolbenchError::NotFound {
                kind: "toolchain",
                name: name.to_string(),
            }
            .into()
        })
    }

    pub fn remove_toolchain(&self, name: &str) -> Result<()> {
        let mut state = self.load_state()?;
        let before = state.toolchains.len();
        state.toolchains.retain(|record| record.name != name);
        if state.toolchains.len() == before {
            return Err(ToolbenchError::NotFound {
                kind: "toolchain",
                name: name.to_string(),
            }
            .into());
        }
        self.save_state(state)
    }

    fn toolchains_file_path(&self) -> PathBuf {
        self.state_root.join("toolchains.toml")
    }

    fn load_state(&self) -> Result<ToolchainStateFile> {
        let path = self.toolchains_file_path();
        if !path.exists() {
            return Ok(ToolchainStateFile::default());
        }

        let content = fs::read_to_string(&path)
            .with_context(|| format!("failed reading toolchain config: {}", path.display()))?;
        let mut state = toml::from_str::<ToolchainStateFile>(&content)
            .with_context(|| format!("failed parsing toolchain config: {}", path.display()))?;
        state.version = state_file_version();
        sort_toolchains(&mut state.toolchains);
        Ok(state)
    }

    fn save_state(&self, mut state: ToolchainStateFile) -> Result<()> {
        fs::create_dir_all(&self.state_root).with_context(|| {
            format!(
                "failed creating toolbench prefix: {}",
                self.state_root.display()
            )
        })?;

        let path = self.toolchains_file_path();
        sort_toolchains(&mut state.toolchains);
        let content = toml::to_string(&state)
            .with_context(|| format!("failed serializing toolchain config: {}", path.display()))?;
        fs::write(&path, content)
            .with_context(|| format!("failed writing toolchain config: {}", path.display()))
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct ToolchainStateFile {
    #[serde(default = "state_file_version")]
    version: u32,
    #[serde(default)]
    toolchains: Vec<ToolchainRecord>,
}

impl Default for ToolchainStateFile {
    fn default() -> Self {
        Self {
            version: state_file_version(),
            toolchains: Vec::new(),
        }
    }
}

fn state_file_version() -> u32 {
    1
}

fn sort_toolchains(toolchains: &mut [ToolchainRecord]) {
    toolchains.sort_by(|left, right| left.name.cmp(&right.name));
}

/// Names become file and directory names under the prefix.
pub fn validate_toolchain_name(name: &str) -> Result<()> {
    if name.is_empty() || name.len() > 64 {
        anyhow::bail!("invalid toolchain name: '{name}' must be 1 to 64 characters");
    }

    let mut chars = name.chars();
    let Some(first) = chars.next() else {
        anyhow::bail!("invalid toolchain name: '{name}'");
    };

    let first_is_valid = first.is_ascii_lowercase() || first.is_ascii_digit();
    let rest_is_valid = chars.all(|ch| {
        ch.is_ascii_lowercase() || ch.is_ascii_digit() || ch == '-' || ch == '_' || ch == '.'
    });
    if !first_is_valid || !rest_is_valid {
        anyhow::bail!("invalid toolchain name: '{name}'");
    }

    Ok(())
}

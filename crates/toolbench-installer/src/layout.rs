use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};

pub const PREFIX_ENV_VAR: &str = "TOOLBENCH_PREFIX";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ToolbenchLayout {
    prefix: PathBuf,
}

impl ToolbenchLayout {
    pub fn new(prefix: impl Into<PathBuf>) -> Self {
        Self {
            prefix: prefix.into(),
        }
    }

    pub fn prefix(&self) -> &Path {
        &self.prefix
    }

    pub fn toolchains_dir(&self) -> PathBuf {
        self.prefix.join("toolchains")
    }

    pub fn database_path(&self, toolchain: &str) -> PathBuf {
        self.toolchains_dir().join(format!("{toolchain}.xml"))
    }

    pub fn packages_dir(&self, toolchain: &str) -> PathBuf {
        self.toolchains_dir().join(toolchain)
    }

    pub fn cache_dir(&self) -> PathBuf {
        self.prefix.join("cache")
    }

    pub fn feeds_cache_dir(&self) -> PathBuf {
        self.cache_dir().join("feeds")
    }

    pub fn feed_cache_path(&self, toolchain: &str) -> PathBuf {
        self.feeds_cache_dir().join(toolchain)
    }

    pub fn state_dir(&self) -> PathBuf {
        self.prefix.join("state")
    }

    pub fn tmp_state_dir(&self) -> PathBuf {
        self.state_dir().join("tmp")
    }

    pub fn ensure_base_dirs(&self) -> Result<()> {
        for dir in [
            self.toolchains_dir(),
            self.cache_dir(),
            self.feeds_cache_dir(),
            self.state_dir(),
            self.tmp_state_dir(),
        ] {
            fs::create_dir_all(&dir)
                .with_context(|| format!("failed to create {}", dir.display()))?;
        }
        Ok(())
    }
}

pub fn default_user_prefix() -> Result<PathBuf> {
    if cfg!(windows) {
        let app_data = std::env::var("LOCALAPPDATA")
            .context("LOCALAPPDATA is not set; cannot resolve Windows user prefix")?;
        return Ok(PathBuf::from(app_data).join("Toolbench"));
    }

    let home = std::env::var("HOME").context("HOME is not set; cannot resolve user prefix")?;
    Ok(PathBuf::from(home).join(".toolbench"))
}

/// `--prefix`, then `TOOLBENCH_PREFIX`, then the per-user default.
pub fn resolve_prefix(explicit: Option<&Path>) -> Result<PathBuf> {
    if let Some(prefix) = explicit {
        return Ok(prefix.to_path_buf());
    }
    match std::env::var_os(PREFIX_ENV_VAR) {
        Some(value) if !value.is_empty() => Ok(PathBuf::from(value)),
        _ => default_user_prefix(),
    }
}

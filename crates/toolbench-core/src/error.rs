use thiserror::Error;

/// Failures callers are expected to match on. They travel inside
/// `anyhow::Error`; use `downcast_ref::<ToolbenchError>()` to inspect them.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ToolbenchError {
    #[error("no such {kind}: {name}")]
    NotFound { kind: &'static str, name: String },

    #[error("circular dependency detected: {}", .cycle.join(" -> "))]
    DependencyCycle { cycle: Vec<String> },

    #[error("bad checksum for package {package}\nexpected: {expected}\nactual:   {actual}")]
    ChecksumMismatch {
        package: String,
        expected: String,
        actual: String,
    },

    #[error("package {package} has no url nor directory")]
    MissingSource { package: String },

    #[error(
        "package {package}: {field} is '{feed}' in the feed but '{manifest}' in {}",
        crate::MANIFEST_FILE_NAME
    )]
    ManifestConflict {
        package: String,
        field: &'static str,
        feed: String,
        manifest: String,
    },
}

impl ToolbenchError {
    pub fn package_not_found(name: impl Into<String>) -> Self {
        Self::NotFound {
            kind: "package",
            name: name.into(),
        }
    }

    pub fn project_not_found(name: impl Into<String>) -> Self {
        Self::NotFound {
            kind: "project",
            name: name.into(),
        }
    }
}

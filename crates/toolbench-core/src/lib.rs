mod archive;
mod deps;
mod error;
mod package;
mod version;
pub mod xml;

pub use archive::ArchiveType;
pub use deps::{read_depends, write_depends, Dependencies, DependencyKind, DependencyKinds};
pub use error::ToolbenchError;
pub use package::{Package, PackageField, PackageManifest, PackageSource, MANIFEST_FILE_NAME};
pub use version::compare_versions;

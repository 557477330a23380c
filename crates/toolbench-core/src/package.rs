use std::cell::OnceCell;
use std::fmt;
use std::path::{Path, PathBuf};

use anyhow::{anyhow, Context, Result};
use tracing::{debug, warn};

use crate::deps::{read_depends, Dependencies};
use crate::error::ToolbenchError;
use crate::xml::{read_xml_file, XmlElement};

/// Manifest shipped at the root of every installed package.
pub const MANIFEST_FILE_NAME: &str = "package.xml";

const PACKAGE_TAG: &str = "package";
const SVN_PACKAGE_TAG: &str = "svn_package";

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum PackageSource {
    #[default]
    Archive,
    Svn,
}

impl PackageSource {
    pub fn tag(self) -> &'static str {
        match self {
            Self::Archive => PACKAGE_TAG,
            Self::Svn => SVN_PACKAGE_TAG,
        }
    }

    pub fn from_tag(tag: &str) -> Option<Self> {
        match tag {
            PACKAGE_TAG => Some(Self::Archive),
            SVN_PACKAGE_TAG => Some(Self::Svn),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Package {
    pub name: String,
    pub version: Option<String>,
    pub checksum: Option<String>,
    pub url: Option<String>,
    pub directory: Option<String>,
    pub revision: Option<String>,
    pub path: Option<PathBuf>,
    pub toolchain_file: Option<String>,
    pub sysroot: Option<String>,
    pub cross_gdb: Option<String>,
    pub target: Option<String>,
    pub host: Option<String>,
    pub license: Option<String>,
    pub source: PackageSource,
    dependencies: OnceCell<Dependencies>,
}

/// Every attribute a package record can carry. The same table drives
/// database records, feed entries and manifest loading.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PackageField {
    Name,
    Version,
    Checksum,
    Url,
    Directory,
    Revision,
    Path,
    ToolchainFile,
    Sysroot,
    CrossGdb,
    Target,
    Host,
    License,
}

impl PackageField {
    /// Serialization order.
    pub const ALL: [PackageField; 13] = [
        Self::Name,
        Self::Version,
        Self::Checksum,
        Self::Url,
        Self::Directory,
        Self::Revision,
        Self::Path,
        Self::ToolchainFile,
        Self::Sysroot,
        Self::CrossGdb,
        Self::Target,
        Self::Host,
        Self::License,
    ];

    /// Fields a manifest may not contradict in a strict feed.
    pub const IDENTITY: [PackageField; 4] = [Self::Name, Self::Version, Self::Target, Self::Host];

    /// Manifest paths relative to the package root.
    pub const ROOTED_PATHS: [PackageField; 3] = [Self::ToolchainFile, Self::Sysroot, Self::CrossGdb];

    pub fn attribute(self) -> &'static str {
        match self {
            Self::Name => "name",
            Self::Version => "version",
            Self::Checksum => "checksum",
            Self::Url => "url",
            Self::Directory => "directory",
            Self::Revision => "revision",
            Self::Path => "path",
            Self::ToolchainFile => "toolchain_file",
            Self::Sysroot => "sysroot",
            Self::CrossGdb => "cross_gdb",
            Self::Target => "target",
            Self::Host => "host",
            Self::License => "license",
        }
    }

    pub fn from_attribute(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|field| field.attribute() == name)
    }

    pub fn get(self, package: &Package) -> Option<String> {
        match self {
            Self::Name => Some(package.name.clone()).filter(|name| !name.is_empty()),
            Self::Version => package.version.clone(),
            Self::Checksum => package.checksum.clone(),
            Self::Url => package.url.clone(),
            Self::Directory => package.directory.clone(),
            Self::Revision => package.revision.clone(),
            Self::Path => package.path.as_ref().map(|path| path.display().to_string()),
            Self::ToolchainFile => package.toolchain_file.clone(),
            Self::Sysroot => package.sysroot.clone(),
            Self::CrossGdb => package.cross_gdb.clone(),
            Self::Target => package.target.clone(),
            Self::Host => package.host.clone(),
            Self::License => package.license.clone(),
        }
    }

    pub fn set(self, package: &mut Package, value: String) {
        match self {
            Self::Name => package.name = value,
            Self::Version => package.version = Some(value),
            Self::Checksum => package.checksum = Some(value),
            Self::Url => package.url = Some(value),
            Self::Directory => package.directory = Some(value),
            Self::Revision => package.revision = Some(value),
            Self::Path => package.path = Some(PathBuf::from(value)),
            Self::ToolchainFile => package.toolchain_file = Some(value),
            Self::Sysroot => package.sysroot = Some(value),
            Self::CrossGdb => package.cross_gdb = Some(value),
            Self::Target => package.target = Some(value),
            Self::Host => package.host = Some(value),
            Self::License => package.license = Some(value),
        }
    }
}

impl Package {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Self::default()
        }
    }

    pub fn with_version(mut self, version: impl Into<String>) -> Self {
        self.version = Some(version.into());
        self
    }

    pub fn is_svn(&self) -> bool {
        self.source == PackageSource::Svn
    }

    /// Reads a `<package>` or `<svn_package>` record. Unknown attributes are
    /// skipped.
    pub fn from_xml(element: &XmlElement) -> Result<Self> {
        let source = PackageSource::from_tag(&element.tag)
            .ok_or_else(|| anyhow!("unexpected <{}> where a package was expected", element.tag))?;
        let mut package = Package {
            source,
            ..Package::default()
        };
        for (key, value) in &element.attributes {
            match PackageField::from_attribute(key) {
                Some(field) => field.set(&mut package, value.clone()),
                None => debug!(attribute = %key, tag = %element.tag, "ignoring unknown attribute"),
            }
        }
        if package.name.is_empty() {
            return Err(anyhow!("node <{}> must have a 'name' attribute", element.tag));
        }
        Ok(package)
    }

    pub fn to_xml(&self) -> XmlElement {
        let mut element = XmlElement::new(self.source.tag());
        for field in PackageField::ALL {
            if let Some(value) = field.get(self) {
                element.set_attr(field.attribute(), value);
            }
        }
        element
    }

    /// Same name, version and checksum: nothing to reinstall.
    pub fn same_release(&self, other: &Package) -> bool {
        self.name == other.name && self.version == other.version && self.checksum == other.checksum
    }

    /// Dependency sets from the package manifest, read on first access.
    pub fn dependencies(&self) -> &Dependencies {
        self.dependencies.get_or_init(|| {
            let Some(path) = &self.path else {
                return Dependencies::default();
            };
            match PackageManifest::load(path) {
                Ok(Some(manifest)) => manifest.dependencies,
                Ok(None) => Dependencies::default(),
                Err(err) => {
                    warn!(package = %self.name, "could not read dependencies: {err:#}");
                    Dependencies::default()
                }
            }
        })
    }

    pub fn set_dependencies(&mut self, dependencies: Dependencies) {
        self.dependencies = OnceCell::from(dependencies);
    }

    /// Reads `<path>/package.xml`, when present, and merges it into the
    /// package. A package without a manifest simply has no dependencies.
    pub fn load_manifest(&mut self, strict: bool) -> Result<()> {
        let Some(path) = self.path.clone() else {
            return Ok(());
        };
        match PackageManifest::load(&path)? {
            Some(manifest) => self.apply_manifest(&manifest, strict),
            None => {
                self.set_dependencies(Dependencies::default());
                Ok(())
            }
        }
    }

    /// Conflicts on identity fields abort in strict mode; otherwise the value
    /// already on the package (the feed's) wins. Nothing is modified when an
    /// error is returned.
    pub fn apply_manifest(&mut self, manifest: &PackageManifest, strict: bool) -> Result<()> {
        for (field, manifest_value) in &manifest.fields {
            if !PackageField::IDENTITY.contains(field) {
                continue;
            }
            let Some(feed_value) = field.get(self) else {
                continue;
            };
            if &feed_value == manifest_value {
                continue;
            }
            if strict {
                return Err(ToolbenchError::ManifestConflict {
                    package: self.name.clone(),
                    field: field.attribute(),
                    feed: feed_value,
                    manifest: manifest_value.clone(),
                }
                .into());
            }
            debug!(
                package = %self.name,
                field = field.attribute(),
                "feed metadata overrides package manifest"
            );
        }

        for (field, value) in &manifest.fields {
            if field.get(self).is_none() {
                field.set(self, value.clone());
            }
        }
        self.set_dependencies(manifest.dependencies.clone());
        Ok(())
    }

    /// Makes manifest-relative paths absolute under the install path.
    pub fn reroot_paths(&mut self) {
        let Some(root) = self.path.clone() else {
            return;
        };
        for field in PackageField::ROOTED_PATHS {
            let Some(value) = field.get(self) else {
                continue;
            };
            if Path::new(&value).is_absolute() {
                continue;
            }
            field.set(self, root.join(&value).display().to_string());
        }
    }
}

impl fmt::Display for Package {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.version {
            Some(version) => write!(f, "{} {}", self.name, version),
            None => f.write_str(&self.name),
        }
    }
}

/// Parsed `package.xml`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PackageManifest {
    pub fields: Vec<(PackageField, String)>,
    pub dependencies: Dependencies,
}

impl PackageManifest {
    pub fn from_xml(element: &XmlElement) -> Result<Self> {
        if element.tag != PACKAGE_TAG {
            return Err(anyhow!(
                "package manifest root must be <{PACKAGE_TAG}>, got <{}>",
                element.tag
            ));
        }
        let mut fields = Vec::new();
        for (key, value) in &element.attributes {
            match PackageField::from_attribute(key) {
                // where the package lives and how it is fetched is the feed's business
                Some(PackageField::Path)
                | Some(PackageField::Url)
                | Some(PackageField::Directory)
                | Some(PackageField::Checksum)
                | Some(PackageField::Revision) => {}
                Some(field) => fields.push((field, value.clone())),
                None => debug!(attribute = %key, "ignoring unknown manifest attribute"),
            }
        }
        let dependencies = read_depends(element)?;
        Ok(Self {
            fields,
            dependencies,
        })
    }

    /// `Ok(None)` when the package ships no manifest.
    pub fn load(package_root: &Path) -> Result<Option<Self>> {
        let manifest_path = package_root.join(MANIFEST_FILE_NAME);
        if !manifest_path.is_file() {
            return Ok(None);
        }
        let root = read_xml_file(&manifest_path)?;
        let manifest = Self::from_xml(&root)
            .with_context(|| format!("invalid package manifest: {}", manifest_path.display()))?;
        Ok(Some(manifest))
    }
}

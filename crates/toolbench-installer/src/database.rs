use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{anyhow, Context, Result};
use toolbench_core::xml::{read_xml_file, write_xml_file, XmlElement};
use toolbench_core::{ArchiveType, DependencyKinds, Package, PackageSource, ToolbenchError};
use toolbench_registry::{FeedParser, Fetcher};
use toolbench_resolver::{dependency_names, resolve_to_objects, Direction};
use toolbench_security::{checksums_match, sha512_file};
use tracing::{debug, info, warn};

use crate::artifact::extract_archive;
use crate::layout::ToolbenchLayout;
use crate::reconcile::{plan_update, PackageChange, UpdateOptions, UpdateReport};
use crate::svn::SvnClient;

const DATABASE_ROOT_TAG: &str = "toolchain";

/// Transports used while handling feed packages.
#[derive(Clone, Copy)]
pub struct UpdateTransport<'a> {
    pub fetcher: &'a dyn Fetcher,
    pub svn: &'a dyn SvnClient,
}

/// Installed packages of one toolchain, backed by `toolchains/<name>.xml`.
///
/// One writer at a time: nothing locks the backing file.
#[derive(Debug, Clone)]
pub struct Database {
    name: String,
    db_path: PathBuf,
    packages_path: PathBuf,
    scratch_root: PathBuf,
    packages: BTreeMap<String, Package>,
    strict_feed: bool,
}

impl Database {
    pub fn open(layout: &ToolbenchLayout, name: &str) -> Result<Self> {
        Self::open_at(
            name,
            layout.database_path(name),
            layout.packages_dir(name),
            layout.tmp_state_dir(),
        )
    }

    /// A missing backing file is an empty database.
    pub fn open_at(
        name: impl Into<String>,
        db_path: impl Into<PathBuf>,
        packages_path: impl Into<PathBuf>,
        scratch_root: impl Into<PathBuf>,
    ) -> Result<Self> {
        let mut database = Self {
            name: name.into(),
            db_path: db_path.into(),
            packages_path: packages_path.into(),
            scratch_root: scratch_root.into(),
            packages: BTreeMap::new(),
            strict_feed: true,
        };
        database.load()?;
        Ok(database)
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn db_path(&self) -> &Path {
        &self.db_path
    }

    pub fn packages_path(&self) -> &Path {
        &self.packages_path
    }

    pub fn strict_feed(&self) -> bool {
        self.strict_feed
    }

    pub fn packages(&self) -> impl Iterator<Item = &Package> {
        self.packages.values()
    }

    pub fn load(&mut self) -> Result<()> {
        self.packages.clear();
        if !self.db_path.exists() {
            return Ok(());
        }

        let root = read_xml_file(&self.db_path)?;
        if root.tag != DATABASE_ROOT_TAG {
            return Err(anyhow!(
                "{} must have a <{DATABASE_ROOT_TAG}> root, got <{}>",
                self.db_path.display(),
                root.tag
            ));
        }
        for element in &root.children {
            if PackageSource::from_tag(&element.tag).is_none() {
                debug!(tag = %element.tag, "ignoring unknown database element");
                continue;
            }
            let package = Package::from_xml(element)
                .with_context(|| format!("invalid record in {}", self.db_path.display()))?;
            self.packages.insert(package.name.clone(), package);
        }
        Ok(())
    }

    /// Records are written sorted by name.
    pub fn save(&self) -> Result<()> {
        let mut root = XmlElement::new(DATABASE_ROOT_TAG);
        for package in self.packages.values() {
            root.push(package.to_xml());
        }
        write_xml_file(&self.db_path, &root)
    }

    /// Deletes the package storage and the backing file.
    pub fn remove(self) -> Result<()> {
        if self.packages_path.exists() {
            fs::remove_dir_all(&self.packages_path).with_context(|| {
                format!("failed to remove {}", self.packages_path.display())
            })?;
        }
        if self.db_path.exists() {
            fs::remove_file(&self.db_path)
                .with_context(|| format!("failed to remove {}", self.db_path.display()))?;
        }
        info!(toolchain = %self.name, "toolchain removed");
        Ok(())
    }

    /// Merges the package manifest and registers the package. Manifest
    /// conflicts are fatal only for strict feeds.
    pub fn add_package(&mut self, mut package: Package) -> Result<()> {
        package.load_manifest(self.strict_feed)?;
        package.reroot_paths();
        self.packages.insert(package.name.clone(), package);
        Ok(())
    }

    /// Drops the record and deletes its directory when it lives in this
    /// toolchain's package storage.
    pub fn remove_package(&mut self, name: &str) -> Result<Package> {
        let package = self
            .packages
            .remove(name)
            .ok_or_else(|| ToolbenchError::package_not_found(name))?;
        if let Some(path) = package.path.as_deref() {
            if path.starts_with(&self.packages_path) && path.exists() {
                fs::remove_dir_all(path)
                    .with_context(|| format!("failed to remove {}", path.display()))?;
            } else {
                debug!(package = name, path = %path.display(), "keeping package directory");
            }
        }
        Ok(package)
    }

    pub fn get_package(&self, name: &str) -> Result<&Package> {
        self.find_package(name)
            .ok_or_else(|| ToolbenchError::package_not_found(name).into())
    }

    pub fn find_package(&self, name: &str) -> Option<&Package> {
        self.packages.get(name)
    }

    pub fn package_path(&self, name: &str) -> Option<&Path> {
        self.find_package(name)
            .and_then(|package| package.path.as_deref())
    }

    /// `names` and their package dependencies, dependencies first. Names
    /// without an installed package are skipped.
    pub fn solve_deps<S: AsRef<str>>(
        &self,
        names: &[S],
        kinds: &DependencyKinds,
    ) -> Result<Vec<&Package>> {
        let sorted = dependency_names(self.packages.values(), names, kinds, Direction::Forward)?;
        Ok(resolve_to_objects(&sorted, |name| self.find_package(name)))
    }

    /// Registers a local archive or directory as package `name`.
    pub fn install_local_package(&mut self, name: &str, source: &Path) -> Result<&Package> {
        if !source.exists() {
            return Err(anyhow!("no such file or directory: {}", source.display()));
        }
        if self.packages.contains_key(name) {
            self.remove_package(name)?;
        }

        let mut package = Package::new(name);
        if source.is_dir() {
            let path = fs::canonicalize(source)
                .with_context(|| format!("failed to resolve {}", source.display()))?;
            package.directory = Some(path.display().to_string());
            package.path = Some(path);
        } else {
            let archive_type = archive_type_of(&source.display().to_string(), source)?;
            package.checksum = Some(sha512_file(source)?);
            let dest = self.packages_path.join(name);
            extract_archive(source, archive_type, &dest, &self.scratch_root)?;
            package.path = Some(dest);
        }

        self.add_package(package)?;
        self.get_package(name)
    }

    /// Reconciles the database with `feed` and saves it once at the end.
    ///
    /// There is no rollback: a failure leaves earlier steps applied on disk
    /// and in memory while the backing file keeps its previous content.
    /// Running the update again converges.
    pub fn update(
        &mut self,
        parser: &mut dyn FeedParser,
        feed: &str,
        options: &UpdateOptions,
        transport: UpdateTransport<'_>,
    ) -> Result<UpdateReport> {
        info!(toolchain = %self.name, feed, "updating from feed");
        parser.parse(feed, options.branch.as_deref(), options.feed_name.as_deref())?;
        if options.update_checksums {
            let read_only = parser.read_only_packages();
            if !read_only.is_empty() {
                return Err(anyhow!(
                    "cannot update checksums: {} declared by remote feeds",
                    read_only.join(", ")
                ));
            }
        }
        self.strict_feed = parser.strict_feed();
        let feed_root = parser.feed_root();
        let remote = parser.packages();
        let plan = plan_update(&self.packages, &remote, options.update_checksums);
        let mut report = UpdateReport::default();

        if !plan.to_remove.is_empty() {
            info!("removing packages");
        }
        for (index, name) in plan.to_remove.iter().enumerate() {
            info!("* ({}/{}) {}", index + 1, plan.to_remove.len(), name);
            self.remove_package(name)?;
            report.removed.push(name.clone());
        }

        if !plan.to_update.is_empty() {
            info!("updating packages");
        }
        let total = plan.to_update.len();
        for (index, mut package) in plan.to_update.into_iter().enumerate() {
            let previous = self.remove_package(&package.name)?;
            let change = PackageChange::replacing(&previous, &package);
            info!("* ({}/{}) {}", index + 1, total, change);
            if change.is_downgrade() {
                warn!(package = %change.name, "feed declares an older version");
            }
            if let Some(checksum) = self.handle_package(
                &mut package,
                feed_root.as_deref(),
                options.update_checksums,
                transport.fetcher,
            )? {
                parser.record_checksum(&package.name, &checksum);
                report.checksums_updated.insert(package.name.clone());
            }
            self.add_package(package)?;
            report.updated.push(change);
        }

        if !plan.to_add.is_empty() {
            info!("adding packages");
        }
        let total = plan.to_add.len();
        for (index, mut package) in plan.to_add.into_iter().enumerate() {
            info!("* ({}/{}) {}", index + 1, total, package);
            if let Some(checksum) = self.handle_package(
                &mut package,
                feed_root.as_deref(),
                options.update_checksums,
                transport.fetcher,
            )? {
                parser.record_checksum(&package.name, &checksum);
                report.checksums_updated.insert(package.name.clone());
            }
            report.added.push(PackageChange::added(&package));
            self.add_package(package)?;
        }

        if !plan.svn.is_empty() {
            info!("updating svn packages");
        }
        let total = plan.svn.len();
        for (index, mut package) in plan.svn.into_iter().enumerate() {
            info!("* ({}/{}) {}", index + 1, total, package.name);
            if self
                .find_package(&package.name)
                .is_some_and(|installed| !installed.is_svn())
            {
                self.remove_package(&package.name)?;
            }
            self.handle_svn_package(&mut package, transport.svn)?;
            report.svn.push(package.name.clone());
            self.add_package(package)?;
        }

        if options.update_checksums {
            parser.write_checksums(feed)?;
        }
        self.save()?;
        info!(toolchain = %self.name, "done");
        Ok(report)
    }

    /// Gives `package` an install path. Returns the new checksum when
    /// `update_checksums` replaced the declared one.
    pub fn handle_package(
        &self,
        package: &mut Package,
        feed_root: Option<&Path>,
        update_checksums: bool,
        fetcher: &dyn Fetcher,
    ) -> Result<Option<String>> {
        if package.url.is_some() {
            return self.download_package(package, update_checksums, fetcher);
        }
        if package.directory.is_some() {
            self.handle_local_package(package, feed_root)?;
            return Ok(None);
        }
        Err(ToolbenchError::MissingSource {
            package: package.name.clone(),
        }
        .into())
    }

    pub fn download_package(
        &self,
        package: &mut Package,
        update_checksums: bool,
        fetcher: &dyn Fetcher,
    ) -> Result<Option<String>> {
        let url = package
            .url
            .clone()
            .ok_or_else(|| ToolbenchError::MissingSource {
                package: package.name.clone(),
            })?;
        fs::create_dir_all(&self.scratch_root)
            .with_context(|| format!("failed to create {}", self.scratch_root.display()))?;
        let tmp = tempfile::Builder::new()
            .prefix("download-")
            .tempdir_in(&self.scratch_root)
            .with_context(|| {
                format!("failed creating tmp dir in {}", self.scratch_root.display())
            })?;

        debug!(package = %package.name, url = %url, "downloading");
        let archive = fetcher.download(&url, tmp.path())?;
        let actual = sha512_file(&archive)?;

        let mut replaced = None;
        match package.checksum.clone() {
            Some(expected) if checksums_match(&actual, &expected) => {}
            expected if update_checksums => {
                warn!(
                    package = %package,
                    old = expected.as_deref().unwrap_or("none"),
                    new = %actual,
                    "will update checksum"
                );
                package.checksum = Some(actual.clone());
                replaced = Some(actual);
            }
            None => {
                warn!(
                    package = %package,
                    checksum = %actual,
                    "the feed does not specify a checksum for this package"
                );
            }
            Some(expected) => {
                return Err(ToolbenchError::ChecksumMismatch {
                    package: package.to_string(),
                    expected,
                    actual,
                }
                .into());
            }
        }

        let archive_type = archive_type_of(&url, &archive)?;
        let dest = self.packages_path.join(&package.name);
        info!(package = %package, "extracting");
        extract_archive(&archive, archive_type, &dest, tmp.path())?;
        package.path = Some(dest);
        Ok(replaced)
    }

    /// Directories are taken as they are, relative to the feed.
    pub fn handle_local_package(&self, package: &mut Package, feed_root: Option<&Path>) -> Result<()> {
        let directory = package
            .directory
            .clone()
            .ok_or_else(|| ToolbenchError::MissingSource {
                package: package.name.clone(),
            })?;
        let directory = PathBuf::from(directory);
        let path = if directory.is_absolute() {
            directory
        } else {
            let root = feed_root.ok_or_else(|| {
                anyhow!(
                    "package {}: directory '{}' cannot be resolved against a remote feed",
                    package.name,
                    directory.display()
                )
            })?;
            root.join(directory)
        };
        package.path = Some(path);
        Ok(())
    }

    /// Checks out into the package storage, or updates an existing checkout.
    pub fn handle_svn_package(&self, package: &mut Package, svn: &dyn SvnClient) -> Result<()> {
        let url = package
            .url
            .clone()
            .ok_or_else(|| ToolbenchError::MissingSource {
                package: package.name.clone(),
            })?;
        let dest = self.packages_path.join(&package.name);
        if dest.exists() {
            svn.update(&dest, package.revision.as_deref())?;
        } else {
            fs::create_dir_all(&self.packages_path).with_context(|| {
                format!("failed to create {}", self.packages_path.display())
            })?;
            svn.checkout(&url, package.revision.as_deref(), &dest)?;
        }
        package.path = Some(dest);
        Ok(())
    }
}

fn archive_type_of(url: &str, downloaded: &Path) -> Result<ArchiveType> {
    ArchiveType::infer_from_name(url)
        .or_else(|| {
            downloaded
                .file_name()
                .and_then(|name| name.to_str())
                .and_then(ArchiveType::infer_from_name)
        })
        .ok_or_else(|| anyhow!("cannot tell the archive type of {url}"))
}

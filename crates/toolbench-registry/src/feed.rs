use std::collections::{BTreeMap, BTreeSet, HashSet};
use std::path::{Path, PathBuf};

use anyhow::{anyhow, Context, Result};
use toolbench_core::xml::{parse_bool_attr, read_xml_file, required_attr, write_xml_file, XmlElement};
use toolbench_core::{Package, PackageSource};
use tracing::{debug, info, warn};

use crate::fetch::{is_remote, local_path, Fetcher};
use crate::sync_git_feed;

const FEED_ROOT_TAG: &str = "toolchain";

/// Turns a feed into the packages a toolchain should contain.
pub trait FeedParser {
    /// `branch` and `name` are only used for git feeds, where the feed is
    /// `feeds/<name>.xml` on `branch` of the repository at `feed`.
    fn parse(&mut self, feed: &str, branch: Option<&str>, name: Option<&str>) -> Result<()>;

    fn packages(&self) -> Vec<Package>;

    /// Whether manifest conflicts are errors. Defaults to true.
    fn strict_feed(&self) -> bool;

    /// Directory of the top-level feed when it is local.
    fn feed_root(&self) -> Option<PathBuf>;

    fn record_checksum(&mut self, name: &str, checksum: &str);

    /// Packages declared by remote feeds, whose checksums cannot be written
    /// back.
    fn read_only_packages(&self) -> Vec<String>;

    /// Persists checksums passed to `record_checksum` into the feed files
    /// that declared those packages.
    fn write_checksums(&mut self, feed: &str) -> Result<()>;
}

#[derive(Debug, Clone)]
struct FeedEntry {
    package: Package,
    /// Local feed file declaring the package; `None` for remote feeds.
    declared_in: Option<PathBuf>,
    declared_at: String,
}

pub struct ToolchainFeedParser<'f> {
    toolchain: String,
    fetcher: &'f dyn Fetcher,
    git_cache_root: Option<PathBuf>,
    entries: Vec<FeedEntry>,
    strict_feed: bool,
    feed_root: Option<PathBuf>,
    visited: HashSet<String>,
    checksums: BTreeMap<String, String>,
}

impl<'f> ToolchainFeedParser<'f> {
    pub fn new(toolchain: impl Into<String>, fetcher: &'f dyn Fetcher) -> Self {
        Self {
            toolchain: toolchain.into(),
            fetcher,
            git_cache_root: None,
            entries: Vec::new(),
            strict_feed: true,
            feed_root: None,
            visited: HashSet::new(),
            checksums: BTreeMap::new(),
        }
    }

    /// Git feeds are cloned into `<root>/<toolchain>`.
    pub fn with_git_cache(mut self, root: impl Into<PathBuf>) -> Self {
        self.git_cache_root = Some(root.into());
        self
    }

    fn reset(&mut self) {
        self.entries.clear();
        self.strict_feed = true;
        self.feed_root = None;
        self.visited.clear();
        self.checksums.clear();
    }

    fn parse_location(&mut self, location: &str, top_level: bool) -> Result<()> {
        if !self.visited.insert(location.to_string()) {
            warn!(feed = location, "feed included more than once, skipping");
            return Ok(());
        }
        debug!(feed = location, "parsing feed");

        let text = self.fetcher.fetch_text(location)?;
        let root = XmlElement::parse_str(&text)
            .with_context(|| format!("error when parsing feed '{location}'"))?;
        if root.tag != FEED_ROOT_TAG {
            return Err(anyhow!(
                "feed '{location}' must have a <{FEED_ROOT_TAG}> root, got <{}>",
                root.tag
            ));
        }

        let declared_in = local_path(location);
        if top_level {
            self.strict_feed = parse_bool_attr(&root, "strict_feed", true)?;
            self.feed_root = declared_in
                .as_deref()
                .and_then(Path::parent)
                .map(Path::to_path_buf);
        }

        for child in &root.children {
            match child.tag.as_str() {
                "feed" => {
                    let url = required_attr(child, "url")?;
                    let nested = resolve_location(location, url);
                    self.parse_location(&nested, false)
                        .with_context(|| format!("included from feed '{location}'"))?;
                }
                tag if PackageSource::from_tag(tag).is_some() => {
                    let package = self.read_package(child, location)?;
                    self.declare(FeedEntry {
                        package,
                        declared_in: declared_in.clone(),
                        declared_at: location.to_string(),
                    });
                }
                other => debug!(feed = location, tag = other, "ignoring unknown feed element"),
            }
        }
        Ok(())
    }

    fn read_package(&self, element: &XmlElement, location: &str) -> Result<Package> {
        let mut package = Package::from_xml(element)
            .with_context(|| format!("invalid package in feed '{location}'"))?;
        if package.source == PackageSource::Archive {
            if let Some(url) = package.url.take() {
                package.url = Some(resolve_location(location, &url));
            }
        }
        if let Some(directory) = package.directory.take() {
            let resolved = match local_path(location) {
                Some(feed_path) if Path::new(&directory).is_relative() => feed_path
                    .parent()
                    .map(|parent| parent.join(&directory).display().to_string())
                    .unwrap_or(directory),
                _ => directory,
            };
            package.directory = Some(resolved);
        }
        Ok(package)
    }

    /// A later declaration of a name replaces the earlier one.
    fn declare(&mut self, entry: FeedEntry) {
        if let Some(previous) = self
            .entries
            .iter()
            .position(|existing| existing.package.name == entry.package.name)
        {
            debug!(
                package = %entry.package.name,
                previous = %self.entries[previous].declared_at,
                feed = %entry.declared_at,
                "package redeclared"
            );
            self.entries.remove(previous);
        }
        self.entries.push(entry);
    }
}

impl FeedParser for ToolchainFeedParser<'_> {
    fn parse(&mut self, feed: &str, branch: Option<&str>, name: Option<&str>) -> Result<()> {
        self.reset();
        let location = match (branch, name) {
            (Some(branch), Some(name)) => {
                let cache_root = self
                    .git_cache_root
                    .as_ref()
                    .ok_or_else(|| anyhow!("git feeds need a cache directory"))?;
                let cache_dir = cache_root.join(&self.toolchain);
                sync_git_feed(feed, branch, name, &cache_dir)?
                    .display()
                    .to_string()
            }
            (None, None) => feed.to_string(),
            _ => return Err(anyhow!("git feed {feed} needs both a branch and a feed name")),
        };
        self.parse_location(&location, true)?;
        info!(
            toolchain = %self.toolchain,
            packages = self.entries.len(),
            strict = self.strict_feed,
            "feed parsed"
        );
        Ok(())
    }

    fn packages(&self) -> Vec<Package> {
        self.entries.iter().map(|entry| entry.package.clone()).collect()
    }

    fn strict_feed(&self) -> bool {
        self.strict_feed
    }

    fn feed_root(&self) -> Option<PathBuf> {
        self.feed_root.clone()
    }

    fn record_checksum(&mut self, name: &str, checksum: &str) {
        if let Some(entry) = self
            .entries
            .iter_mut()
            .find(|entry| entry.package.name == name)
        {
            entry.package.checksum = Some(checksum.to_string());
        }
        self.checksums.insert(name.to_string(), checksum.to_string());
    }

    fn read_only_packages(&self) -> Vec<String> {
        self.entries
            .iter()
            .filter(|entry| entry.declared_in.is_none())
            .map(|entry| entry.package.name.clone())
            .collect()
    }

    fn write_checksums(&mut self, feed: &str) -> Result<()> {
        let mut per_file: BTreeMap<PathBuf, BTreeSet<String>> = BTreeMap::new();
        for name in self.checksums.keys() {
            let entry = self
                .entries
                .iter()
                .find(|entry| &entry.package.name == name)
                .ok_or_else(|| anyhow!("package {name} is not declared by feed {feed}"))?;
            let Some(file) = &entry.declared_in else {
                return Err(anyhow!(
                    "cannot write checksum of {name} back to remote feed {}",
                    entry.declared_at
                ));
            };
            per_file.entry(file.clone()).or_default().insert(name.clone());
        }

        for (file, names) in per_file {
            let mut root = read_xml_file(&file)?;
            for child in &mut root.children {
                if PackageSource::from_tag(&child.tag).is_none() {
                    continue;
                }
                let Some(name) = child.attr("name").map(str::to_string) else {
                    continue;
                };
                if !names.contains(&name) {
                    continue;
                }
                if let Some(checksum) = self.checksums.get(&name) {
                    child.set_attr("checksum", checksum.clone());
                }
            }
            write_xml_file(&file, &root)?;
            info!(feed = %file.display(), count = names.len(), "checksums written back");
        }
        Ok(())
    }
}

/// Resolves `reference` against the feed at `base`: remote urls against
/// their parent url, local paths against their parent directory.
pub fn resolve_location(base: &str, reference: &str) -> String {
    if reference.contains("://") || Path::new(reference).is_absolute() {
        return reference.to_string();
    }
    if is_remote(base) {
        let parent = base.rsplit_once('/').map(|(parent, _)| parent).unwrap_or(base);
        return format!("{parent}/{reference}");
    }
    match local_path(base).as_deref().and_then(Path::parent) {
        Some(parent) => parent.join(reference).display().to_string(),
        None => reference.to_string(),
    }
}

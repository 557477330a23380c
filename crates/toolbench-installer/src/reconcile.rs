use std::cmp::Ordering;
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

use toolbench_core::{compare_versions, Package};

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct UpdateOptions {
    pub branch: Option<String>,
    pub feed_name: Option<String>,
    pub update_checksums: bool,
}

/// What an update will do to the database, each list sorted by name.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct UpdatePlan {
    pub to_remove: Vec<String>,
    /// Feed versions of installed packages that need reinstalling.
    pub to_update: Vec<Package>,
    pub to_add: Vec<Package>,
    pub svn: Vec<Package>,
}

impl UpdatePlan {
    pub fn is_empty(&self) -> bool {
        self.to_remove.is_empty()
            && self.to_update.is_empty()
            && self.to_add.is_empty()
            && self.svn.is_empty()
    }
}

/// Diffs the installed packages against the feed.
///
/// Feed svn packages are never diffed and all land in `svn`. An installed
/// svn checkout that the feed now declares as an archive is reinstalled.
pub fn plan_update(
    local: &BTreeMap<String, Package>,
    remote: &[Package],
    update_checksums: bool,
) -> UpdatePlan {
    let mut feed: BTreeMap<&str, &Package> = BTreeMap::new();
    for package in remote {
        feed.insert(package.name.as_str(), package);
    }

    let mut plan = UpdatePlan::default();
    for package in feed.values() {
        if package.is_svn() {
            plan.svn.push((*package).clone());
        } else if !local.contains_key(&package.name) {
            plan.to_add.push((*package).clone());
        }
    }

    for (name, installed) in local {
        let Some(declared) = feed.get(name.as_str()) else {
            plan.to_remove.push(name.clone());
            continue;
        };
        if declared.is_svn() {
            continue;
        }
        if update_checksums || installed.is_svn() || !installed.same_release(declared) {
            plan.to_update.push((*declared).clone());
        }
    }
    plan
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PackageChange {
    pub name: String,
    pub from_version: Option<String>,
    pub to_version: Option<String>,
    /// The replaced package was an svn checkout.
    pub from_svn: bool,
}

impl PackageChange {
    pub fn added(package: &Package) -> Self {
        Self {
            name: package.name.clone(),
            from_version: None,
            to_version: package.version.clone(),
            from_svn: false,
        }
    }

    pub fn replacing(previous: &Package, package: &Package) -> Self {
        Self {
            name: package.name.clone(),
            from_version: previous.version.clone(),
            to_version: package.version.clone(),
            from_svn: previous.is_svn(),
        }
    }

    /// True when both versions are known and the new one sorts lower.
    pub fn is_downgrade(&self) -> bool {
        match (&self.from_version, &self.to_version) {
            (Some(from), Some(to)) if !self.from_svn => {
                compare_versions(to, from) == Ordering::Less
            }
            _ => false,
        }
    }
}

impl fmt::Display for PackageChange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let version = |value: &Option<String>| value.clone().unwrap_or_else(|| "?".to_string());
        if self.from_svn {
            return write!(f, "{} from subversion to {}", self.name, version(&self.to_version));
        }
        match (&self.from_version, &self.to_version) {
            (None, None) => f.write_str(&self.name),
            (None, Some(to)) => write!(f, "{} {}", self.name, to),
            (from, to) => write!(f, "{} from {} to {}", self.name, version(from), version(to)),
        }
    }
}

/// Outcome of one `Database::update`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct UpdateReport {
    pub removed: Vec<String>,
    pub updated: Vec<PackageChange>,
    pub added: Vec<PackageChange>,
    pub svn: Vec<String>,
    pub checksums_updated: BTreeSet<String>,
}

impl UpdateReport {
    pub fn is_noop(&self) -> bool {
        self.removed.is_empty()
            && self.updated.is_empty()
            && self.added.is_empty()
            && self.svn.is_empty()
    }
}

use std::collections::BTreeSet;
use std::fmt;

use anyhow::{anyhow, Result};

use crate::xml::{parse_bool_attr, parse_list_attr, XmlElement};

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum DependencyKind {
    Build,
    Runtime,
    Test,
}

impl DependencyKind {
    pub const ALL: [DependencyKind; 3] = [Self::Build, Self::Runtime, Self::Test];

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Build => "build",
            Self::Runtime => "runtime",
            Self::Test => "test",
        }
    }

    pub fn parse(input: &str) -> Option<Self> {
        match input.trim().to_ascii_lowercase().as_str() {
            "build" | "buildtime" => Some(Self::Build),
            "runtime" | "run" => Some(Self::Runtime),
            "test" | "testtime" => Some(Self::Test),
            _ => None,
        }
    }

    /// Attribute carrying this kind on a `<depends>` declaration.
    pub fn declaration_flag(self) -> &'static str {
        match self {
            Self::Build => "buildtime",
            Self::Runtime => "runtime",
            Self::Test => "testtime",
        }
    }
}

impl fmt::Display for DependencyKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Non-empty selection of dependency kinds.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DependencyKinds(BTreeSet<DependencyKind>);

impl DependencyKinds {
    pub fn new(kinds: impl IntoIterator<Item = DependencyKind>) -> Result<Self> {
        let kinds: BTreeSet<DependencyKind> = kinds.into_iter().collect();
        if kinds.is_empty() {
            return Err(anyhow!("at least one dependency kind must be selected"));
        }
        Ok(Self(kinds))
    }

    pub fn all() -> Self {
        Self(DependencyKind::ALL.into_iter().collect())
    }

    pub fn build() -> Self {
        Self(BTreeSet::from([DependencyKind::Build]))
    }

    pub fn parse_list<S: AsRef<str>>(values: &[S]) -> Result<Self> {
        let mut kinds = BTreeSet::new();
        for value in values {
            let value = value.as_ref();
            let kind = DependencyKind::parse(value).ok_or_else(|| {
                anyhow!("unknown dependency kind '{value}'; expected build, runtime or test")
            })?;
            kinds.insert(kind);
        }
        Self::new(kinds)
    }

    pub fn contains(&self, kind: DependencyKind) -> bool {
        self.0.contains(&kind)
    }

    pub fn iter(&self) -> impl Iterator<Item = DependencyKind> + '_ {
        self.0.iter().copied()
    }
}

/// The three typed dependency name sets of a project or package.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Dependencies {
    pub build: BTreeSet<String>,
    pub run: BTreeSet<String>,
    pub test: BTreeSet<String>,
}

impl Dependencies {
    pub fn of_kind(&self, kind: DependencyKind) -> &BTreeSet<String> {
        match kind {
            DependencyKind::Build => &self.build,
            DependencyKind::Runtime => &self.run,
            DependencyKind::Test => &self.test,
        }
    }

    pub fn of_kind_mut(&mut self, kind: DependencyKind) -> &mut BTreeSet<String> {
        match kind {
            DependencyKind::Build => &mut self.build,
            DependencyKind::Runtime => &mut self.run,
            DependencyKind::Test => &mut self.test,
        }
    }

    /// Union of the edge sets picked by `kinds`.
    pub fn selected(&self, kinds: &DependencyKinds) -> BTreeSet<String> {
        kinds
            .iter()
            .flat_map(|kind| self.of_kind(kind).iter().cloned())
            .collect()
    }

    pub fn depends_on(&self, name: &str, kinds: &DependencyKinds) -> bool {
        kinds.iter().any(|kind| self.of_kind(kind).contains(name))
    }

    pub fn is_empty(&self) -> bool {
        self.build.is_empty() && self.run.is_empty() && self.test.is_empty()
    }
}

/// Reads every `<depends>` child of `element`. A name listed by several
/// declarations lands in the union of their flagged kinds.
pub fn read_depends(element: &XmlElement) -> Result<Dependencies> {
    let mut dependencies = Dependencies::default();
    for declaration in element.children_named("depends") {
        let names = parse_list_attr(declaration, "names");
        for kind in DependencyKind::ALL {
            if parse_bool_attr(declaration, kind.declaration_flag(), false)? {
                dependencies
                    .of_kind_mut(kind)
                    .extend(names.iter().cloned());
            }
        }
    }
    Ok(dependencies)
}

/// One `<depends>` per non-empty kind, carrying only that kind's flag.
pub fn write_depends(dependencies: &Dependencies, element: &mut XmlElement) {
    for kind in DependencyKind::ALL {
        let names = dependencies.of_kind(kind);
        if names.is_empty() {
            continue;
        }
        let joined = names.iter().map(String::as_str).collect::<Vec<_>>().join(" ");
        element.push(
            XmlElement::new("depends")
                .with_attr(kind.declaration_flag(), "true")
                .with_attr("names", joined),
        );
    }
}

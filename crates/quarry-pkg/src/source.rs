//! Where each dependency in the build plan comes from.
//!
//! Every name in the plan resolves to a [`PackageSource`]: either a project
//! package built locally, or an upstream package that is taken from the
//! shared snapshot or rebuilt locally depending on its [`InstallLocation`].
//! The [`SourceMap`] holds the whole plan's resolution and is read-only once
//! built.

use crate::local::LocalPackage;
use semver::Version;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Where a dependency's build products come from.
///
/// Forms a two-point lattice under [`InstallLocation::merge`]: `Snapshot` is
/// the identity, `Local` absorbs. Folding every consumer's requirement
/// through `merge` promotes a dependency to a local rebuild as soon as any
/// consumer needs one.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum InstallLocation {
    /// Taken from the shared, read-only snapshot.
    #[default]
    Snapshot,
    /// Rebuilt inside the current project.
    Local,
}

impl InstallLocation {
    /// Combine two requirements. Total, commutative, associative, and
    /// idempotent; `Local` wins whenever it appears.
    #[must_use]
    pub fn merge(self, other: Self) -> Self {
        match (self, other) {
            (Self::Snapshot, Self::Snapshot) => Self::Snapshot,
            _ => Self::Local,
        }
    }

    /// Fold a sequence of requirements, starting from the `Snapshot`
    /// identity. Order-independent, so partial folds may be combined.
    #[must_use]
    pub fn merge_all(locations: impl IntoIterator<Item = Self>) -> Self {
        locations
            .into_iter()
            .fold(Self::Snapshot, InstallLocation::merge)
    }
}

impl std::fmt::Display for InstallLocation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Snapshot => write!(f, "snapshot"),
            Self::Local => write!(f, "local"),
        }
    }
}

/// An upstream (non-project) package chosen by the solver.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UpstreamPackage {
    /// Concrete version the solver chose.
    pub version: Version,

    /// Where its build products come from, after merging every consumer's
    /// requirement.
    pub location: InstallLocation,

    /// Flag assignment it is built with.
    pub flags: BTreeMap<String, bool>,
}

/// The resolved source for one package name in the build plan.
#[derive(Debug, Clone)]
pub enum PackageSource {
    /// A project package, always built locally.
    Local(Box<LocalPackage>),

    /// An upstream package.
    Upstream(UpstreamPackage),
}

impl PackageSource {
    /// The concrete version, uniform across variants.
    #[must_use]
    pub fn version(&self) -> &Version {
        match self {
            Self::Local(local) => &local.package.version,
            Self::Upstream(upstream) => &upstream.version,
        }
    }

    /// The install location, uniform across variants. Project packages are
    /// always local.
    #[must_use]
    pub fn location(&self) -> InstallLocation {
        match self {
            Self::Local(_) => InstallLocation::Local,
            Self::Upstream(upstream) => upstream.location,
        }
    }

    /// Returns true for project packages.
    #[must_use]
    pub fn is_local(&self) -> bool {
        matches!(self, Self::Local(_))
    }
}

/// Solver output for one upstream dependency, before its consumers'
/// install-location requirements have been folded.
#[derive(Debug, Clone)]
pub struct UpstreamCandidate {
    /// Concrete version the solver chose.
    pub version: Version,

    /// Flag assignment it is built with.
    pub flags: BTreeMap<String, bool>,

    /// Each consumer's install-location requirement.
    pub consumer_locations: Vec<InstallLocation>,
}

/// Build-plan-wide resolution: one [`PackageSource`] per package name.
///
/// Built once from the solver's output and the project's local packages;
/// read-only thereafter.
#[derive(Debug, Clone, Default)]
pub struct SourceMap {
    sources: BTreeMap<String, PackageSource>,
}

impl SourceMap {
    /// Assemble the map from local packages and the solver's upstream
    /// choices. Each upstream candidate's consumer requirements are folded
    /// with [`InstallLocation::merge_all`]; a local package always maps to
    /// [`PackageSource::Local`], shadowing any upstream entry of the same
    /// name.
    #[must_use]
    pub fn build(
        locals: impl IntoIterator<Item = LocalPackage>,
        upstream: impl IntoIterator<Item = (String, UpstreamCandidate)>,
    ) -> Self {
        let mut sources = BTreeMap::new();

        for (name, candidate) in upstream {
            let location = InstallLocation::merge_all(candidate.consumer_locations);
            sources.insert(
                name,
                PackageSource::Upstream(UpstreamPackage {
                    version: candidate.version,
                    location,
                    flags: candidate.flags,
                }),
            );
        }

        for local in locals {
            sources.insert(
                local.package.name.clone(),
                PackageSource::Local(Box::new(local)),
            );
        }

        Self { sources }
    }

    /// Look up the source for a name.
    #[must_use]
    pub fn get(&self, name: &str) -> Option<&PackageSource> {
        self.sources.get(name)
    }

    /// The concrete version for a name, if it is in the plan.
    #[must_use]
    pub fn version_of(&self, name: &str) -> Option<&Version> {
        self.sources.get(name).map(PackageSource::version)
    }

    /// The install location for a name, if it is in the plan.
    #[must_use]
    pub fn location_of(&self, name: &str) -> Option<InstallLocation> {
        self.sources.get(name).map(PackageSource::location)
    }

    /// Returns true if the plan is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.sources.is_empty()
    }

    /// Number of packages in the plan.
    #[must_use]
    pub fn len(&self) -> usize {
        self.sources.len()
    }

    /// Iterate over the whole plan.
    pub fn iter(&self) -> impl Iterator<Item = (&String, &PackageSource)> {
        self.sources.iter()
    }

    /// Iterate over the project's local packages.
    pub fn local_packages(&self) -> impl Iterator<Item = &LocalPackage> {
        self.sources.values().filter_map(|source| match source {
            PackageSource::Local(local) => Some(local.as_ref()),
            PackageSource::Upstream(_) => None,
        })
    }

    /// Iterate over upstream packages that stay in the shared snapshot.
    pub fn snapshot_packages(&self) -> impl Iterator<Item = (&String, &UpstreamPackage)> {
        self.sources.iter().filter_map(|(name, source)| match source {
            PackageSource::Upstream(upstream)
                if upstream.location == InstallLocation::Snapshot =>
            {
                Some((name, upstream))
            }
            _ => None,
        })
    }
}

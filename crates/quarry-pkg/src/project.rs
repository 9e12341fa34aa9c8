//! Project files and member discovery.
//!
//! A project groups the local packages built together in one plan:
//!
//! ```toml
//! # quarry-project.toml at the project root
//! [project]
//! compiler-version = "9.4.0"
//!
//! members = ["packages/*", "tools/cli"]
//! exclude = ["packages/attic"]
//!
//! [flags.web-server]
//! tls = false
//! ```

use crate::config::{PackageConfig, Platform};
use crate::fingerprint::CacheStore;
use crate::local::{LocalPackage, ResolveError};
use crate::manifest::MANIFEST_EXT;
use semver::Version;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use thiserror::Error;

/// The project filename.
pub const PROJECT_FILE: &str = "quarry-project.toml";

/// Errors that can occur when working with projects.
#[derive(Error, Debug)]
pub enum ProjectError {
    #[error("failed to read project file: {0}")]
    Io(#[from] std::io::Error),

    #[error("failed to parse project file: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("glob pattern error: {0}")]
    Glob(#[from] glob::PatternError),

    #[error("not a project: no {PROJECT_FILE} at {0}")]
    NotAProject(PathBuf),
}

/// The parsed project file.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProjectManifest {
    /// Plan-wide settings.
    pub project: ProjectSection,

    /// Member package directories, as glob patterns relative to the root.
    #[serde(default)]
    pub members: Vec<String>,

    /// Directories to exclude from member discovery.
    #[serde(default)]
    pub exclude: Vec<String>,

    /// Per-package flag overrides, keyed by package name.
    #[serde(default)]
    pub flags: BTreeMap<String, BTreeMap<String, bool>>,
}

/// The `[project]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ProjectSection {
    /// Compiler version the plan targets.
    #[serde(rename = "compiler-version")]
    pub compiler_version: Version,
}

impl ProjectManifest {
    /// Parse a project file from a TOML string.
    ///
    /// # Errors
    ///
    /// Returns an error if the TOML is invalid.
    pub fn parse(content: &str) -> Result<Self, ProjectError> {
        Ok(toml::from_str(content)?)
    }
}

/// A loaded project: configuration plus discovered member directories.
#[derive(Debug)]
pub struct Project {
    /// Project root directory.
    pub root: PathBuf,

    /// Path to the project file.
    pub manifest_path: PathBuf,

    /// Parsed project file.
    pub config: ProjectManifest,

    /// Discovered member package directories.
    pub member_dirs: Vec<PathBuf>,
}

impl Project {
    /// Load a project from its root directory.
    ///
    /// # Errors
    ///
    /// Returns an error if the project file is missing or invalid, or a
    /// member glob pattern is malformed.
    pub fn load(root: impl AsRef<Path>) -> Result<Self, ProjectError> {
        let root = root.as_ref().to_path_buf();
        let manifest_path = root.join(PROJECT_FILE);

        if !manifest_path.exists() {
            return Err(ProjectError::NotAProject(root));
        }

        let content = std::fs::read_to_string(&manifest_path)?;
        let config = ProjectManifest::parse(&content)?;
        let member_dirs = discover_members(&root, &config)?;

        Ok(Self {
            root,
            manifest_path,
            config,
            member_dirs,
        })
    }

    /// The baseline configuration every member resolves under, before
    /// per-package flags are applied.
    #[must_use]
    pub fn base_config(&self, platform: Platform) -> PackageConfig {
        PackageConfig::new(self.config.project.compiler_version.clone(), platform)
    }

    /// The configuration a named member resolves under: the baseline plus
    /// that package's flag overrides.
    #[must_use]
    pub fn member_config(&self, base: &PackageConfig, package: &str) -> PackageConfig {
        let mut config = base.clone();
        if let Some(overrides) = self.config.flags.get(package) {
            config.flags.extend(overrides.clone());
        }
        config
    }

    /// Resolve every member into a [`LocalPackage`], all wanted.
    ///
    /// One member's failure does not abort the rest: failures are collected
    /// and returned alongside the successes, and the caller decides whether
    /// any of them is fatal to the build.
    #[must_use]
    pub fn resolve_members(
        &self,
        base: &PackageConfig,
        store: &CacheStore,
    ) -> (Vec<LocalPackage>, Vec<(PathBuf, ResolveError)>) {
        let mut resolved = Vec::new();
        let mut failures = Vec::new();

        for dir in &self.member_dirs {
            // Member flags are keyed by package name, which matches the
            // manifest filename checked during resolution.
            let name = manifest_stem(dir).unwrap_or_default();
            let config = self.member_config(base, &name);

            match LocalPackage::resolve(dir, &config, true, store) {
                Ok(local) => resolved.push(local),
                Err(e) => failures.push((dir.clone(), e)),
            }
        }

        (resolved, failures)
    }
}

/// The manifest filename stem in a member directory, if there is exactly
/// one candidate.
fn manifest_stem(dir: &Path) -> Option<String> {
    crate::local::find_manifest(dir)
        .ok()
        .and_then(|p| p.file_stem().map(|s| s.to_string_lossy().into_owned()))
}

fn discover_members(root: &Path, config: &ProjectManifest) -> Result<Vec<PathBuf>, ProjectError> {
    let mut members = Vec::new();
    let mut seen = std::collections::HashSet::new();

    for pattern in &config.members {
        let full_pattern = root.join(pattern);
        let pattern_str = full_pattern.to_string_lossy();

        for entry in glob::glob(&pattern_str)? {
            let path = entry.map_err(|e| ProjectError::Io(e.into_error()))?;

            if !path.is_dir() || !seen.insert(path.clone()) {
                continue;
            }

            if is_excluded(&path, root, &config.exclude) {
                continue;
            }

            // Only directories that actually hold a manifest are members.
            let has_manifest = std::fs::read_dir(&path)?.any(|entry| {
                entry.is_ok_and(|e| {
                    e.path().extension().is_some_and(|ext| ext == MANIFEST_EXT)
                })
            });
            if has_manifest {
                members.push(path);
            }
        }
    }

    members.sort();
    Ok(members)
}

fn is_excluded(path: &Path, root: &Path, excludes: &[String]) -> bool {
    let relative = path.strip_prefix(root).unwrap_or(path);
    let relative_str = relative.to_string_lossy();

    excludes.iter().any(|exclude| {
        glob::Pattern::new(exclude)
            .map(|p| p.matches(&relative_str))
            .unwrap_or(false)
    })
}

//! Project-rooted packages and their two-phase resolution.
//!
//! A [`LocalPackage`] lives inside the project and is resolved twice from
//! the same manifest: once under the project's baseline configuration
//! (tests and benchmarks off) for the default build graph, and once with
//! both forced on to discover the full dependency and module closure. The
//! two snapshots must agree on identity.
//!
//! Resolution also diffs the package's live file set against its persisted
//! [`BuildCache`] to derive the dirty verdict.

use crate::config::PackageConfig;
use crate::fingerprint::{BuildCache, CacheError, CacheStore};
use crate::manifest::{Manifest, ManifestError, MANIFEST_EXT};
use crate::package::{resolved_files, Package, PackageIdentifier};
use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Errors that can occur while resolving a local package.
///
/// All of these are local to one package: the caller decides whether a
/// failing package aborts the build or is reported and skipped.
#[derive(Error, Debug)]
pub enum ResolveError {
    /// The directory holds no `*.quarry` manifest.
    #[error("no manifest found in {0}")]
    NoManifest(PathBuf),

    /// The directory holds more than one candidate manifest.
    #[error("ambiguous manifest in {dir}: found {}", format_candidates(.candidates))]
    AmbiguousManifest {
        dir: PathBuf,
        candidates: Vec<PathBuf>,
    },

    /// The declared package name does not match the manifest filename.
    #[error("manifest {path} declares name '{declared}', expected '{expected}'")]
    NameMismatch {
        path: PathBuf,
        declared: String,
        expected: String,
    },

    /// The manifest could not be read or parsed.
    #[error("invalid manifest at {path}: {source}")]
    InvalidManifest {
        path: PathBuf,
        #[source]
        source: ManifestError,
    },

    /// The default and all-components resolutions disagree on identity.
    #[error("resolutions of {dir} disagree: {baseline} vs {full}")]
    PhaseMismatch {
        dir: PathBuf,
        baseline: PackageIdentifier,
        full: PackageIdentifier,
    },

    /// The dirtiness computation failed.
    #[error(transparent)]
    Cache(#[from] CacheError),

    #[error("failed to read {0}: {1}")]
    Io(PathBuf, #[source] std::io::Error),
}

fn format_candidates(candidates: &[PathBuf]) -> String {
    candidates
        .iter()
        .map(|p| p.display().to_string())
        .collect::<Vec<_>>()
        .join(", ")
}

/// A package rooted inside the project.
#[derive(Debug, Clone)]
pub struct LocalPackage {
    /// Resolution under the baseline configuration (tests/benchmarks off).
    pub package: Package,

    /// Resolution with test and benchmark components forced on. Same name
    /// and version as `package`; its dependency and module sets are what
    /// planning sees.
    pub full_package: Package,

    /// Whether the user asked for this package to be built.
    pub wanted: bool,

    /// Package root directory.
    pub root: PathBuf,

    /// Path to the manifest file.
    pub manifest_path: PathBuf,

    /// Components requested for the current build.
    pub components: BTreeSet<String>,

    /// Live file set the dirty verdict was computed from.
    pub files: BTreeSet<PathBuf>,

    /// Refreshed build cache, one fingerprint per live file.
    pub build_cache: BuildCache,

    /// Whether anything changed since the recorded cache.
    pub dirty: bool,
}

impl LocalPackage {
    /// Resolve the package in `root` under `config`.
    ///
    /// Discovers the manifest, resolves it twice (baseline and
    /// all-components), verifies the two phases agree, then diffs the live
    /// file set against the persisted cache for the dirty verdict.
    ///
    /// The refreshed cache is *not* persisted here; the caller saves it
    /// through the [`CacheStore`] after a successful build.
    ///
    /// # Errors
    ///
    /// Returns an error if the manifest is missing, ambiguous, invalid, or
    /// misnamed; if the two resolution phases disagree; or if the dirtiness
    /// computation fails.
    pub fn resolve(
        root: impl AsRef<Path>,
        config: &PackageConfig,
        wanted: bool,
        store: &CacheStore,
    ) -> Result<Self, ResolveError> {
        let root = root.as_ref().to_path_buf();
        let manifest_path = find_manifest(&root)?;

        let manifest =
            Manifest::from_path(&manifest_path).map_err(|source| ResolveError::InvalidManifest {
                path: manifest_path.clone(),
                source,
            })?;

        let expected = manifest_path
            .file_stem()
            .and_then(|s| s.to_str())
            .unwrap_or_default()
            .to_string();
        if manifest.package.name != expected {
            return Err(ResolveError::NameMismatch {
                path: manifest_path,
                declared: manifest.package.name,
                expected,
            });
        }

        let resolve_phase = |config: &PackageConfig| {
            Package::resolve(&manifest, &manifest_path, config).map_err(|source| {
                ResolveError::InvalidManifest {
                    path: manifest_path.clone(),
                    source,
                }
            })
        };

        let package = resolve_phase(config)?;
        let full_package = resolve_phase(&config.with_all_components())?;

        if package.name != full_package.name || package.version != full_package.version {
            return Err(ResolveError::PhaseMismatch {
                dir: root,
                baseline: package.identifier(),
                full: full_package.identifier(),
            });
        }

        let files: BTreeSet<PathBuf> =
            resolved_files(&manifest, &root, &manifest_path, config)
                .into_iter()
                .collect();

        let prior = store.load(&root)?;
        let refresh = prior.refresh(&files)?;

        let mut components: BTreeSet<String> = package.executables.clone();
        if config.enable_tests {
            components.extend(package.test_suites.iter().cloned());
        }
        if config.enable_benchmarks {
            components.extend(package.benchmarks.iter().cloned());
        }

        Ok(Self {
            package,
            full_package,
            wanted,
            root,
            manifest_path,
            components,
            files,
            build_cache: refresh.cache,
            dirty: refresh.dirty,
        })
    }

    /// This package's identity.
    #[must_use]
    pub fn identifier(&self) -> PackageIdentifier {
        self.package.identifier()
    }

    /// Recompute the dirty verdict against the currently persisted cache,
    /// for example after files changed mid-session.
    ///
    /// # Errors
    ///
    /// Returns an error if the cache cannot be loaded or a file cannot be
    /// fingerprinted.
    pub fn refresh_dirty(&mut self, store: &CacheStore) -> Result<bool, ResolveError> {
        let prior = store.load(&self.root)?;
        let refresh = prior.refresh(&self.files)?;
        self.build_cache = refresh.cache;
        self.dirty = refresh.dirty;
        Ok(self.dirty)
    }
}

/// Find the single `*.quarry` manifest in a directory.
///
/// # Errors
///
/// Returns [`ResolveError::NoManifest`] if none is found and
/// [`ResolveError::AmbiguousManifest`] if more than one candidate exists.
pub fn find_manifest(dir: &Path) -> Result<PathBuf, ResolveError> {
    let entries = std::fs::read_dir(dir)
        .map_err(|e| ResolveError::Io(dir.to_path_buf(), e))?;

    let mut candidates = Vec::new();
    for entry in entries {
        let entry = entry.map_err(|e| ResolveError::Io(dir.to_path_buf(), e))?;
        let path = entry.path();
        if path.is_file() && path.extension().is_some_and(|ext| ext == MANIFEST_EXT) {
            candidates.push(path);
        }
    }
    candidates.sort();

    match candidates.len() {
        0 => Err(ResolveError::NoManifest(dir.to_path_buf())),
        1 => Ok(candidates.remove(0)),
        _ => Err(ResolveError::AmbiguousManifest {
            dir: dir.to_path_buf(),
            candidates,
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Platform;
    use semver::Version;
    use std::fs;
    use tempfile::TempDir;

    fn config() -> PackageConfig {
        PackageConfig::new(Version::new(9, 4, 0), Platform::host())
    }

    fn write_package(dir: &Path, name: &str, manifest: &str) {
        fs::create_dir_all(dir.join("src")).unwrap();
        fs::write(dir.join(format!("{name}.quarry")), manifest).unwrap();
    }

    const FOO: &str = r#"
[package]
name = "foo"
version = "1.0.0"

[lib]
modules = ["Foo", "Foo.Internal"]
exposed-modules = ["Foo"]
"#;

    fn write_foo_sources(dir: &Path) {
        fs::create_dir_all(dir.join("src/Foo")).unwrap();
        fs::write(dir.join("src/Foo.qy"), "module Foo").unwrap();
        fs::write(dir.join("src/Foo/Internal.qy"), "module Foo.Internal").unwrap();
    }

    #[test]
    fn first_build_end_to_end() {
        let tmp = TempDir::new().unwrap();
        write_package(tmp.path(), "foo", FOO);
        write_foo_sources(tmp.path());

        let store = CacheStore::new();
        let local = LocalPackage::resolve(tmp.path(), &config(), true, &store).unwrap();

        // Empty prior cache: everything is new.
        assert!(local.dirty);
        assert_eq!(local.package.name, "foo");
        assert_eq!(local.package.version, Version::new(1, 0, 0));
        // Manifest plus two module files, each freshly fingerprinted.
        assert_eq!(local.build_cache.len(), 3);
        assert!(local.wanted);
    }

    #[test]
    fn clean_after_cache_is_persisted() {
        let tmp = TempDir::new().unwrap();
        write_package(tmp.path(), "foo", FOO);
        write_foo_sources(tmp.path());

        let store = CacheStore::new();
        let first = LocalPackage::resolve(tmp.path(), &config(), true, &store).unwrap();
        store.save(tmp.path(), &first.build_cache).unwrap();

        let second = LocalPackage::resolve(tmp.path(), &config(), true, &store).unwrap();
        assert!(!second.dirty);
    }

    #[test]
    fn edit_after_persist_is_dirty() {
        let tmp = TempDir::new().unwrap();
        write_package(tmp.path(), "foo", FOO);
        write_foo_sources(tmp.path());

        let store = CacheStore::new();
        let first = LocalPackage::resolve(tmp.path(), &config(), true, &store).unwrap();
        store.save(tmp.path(), &first.build_cache).unwrap();

        fs::write(tmp.path().join("src/Foo.qy"), "module Foo where").unwrap();

        let mut second = LocalPackage::resolve(tmp.path(), &config(), true, &store).unwrap();
        assert!(second.dirty);
        assert!(second.refresh_dirty(&store).unwrap());
    }

    #[test]
    fn missing_manifest() {
        let tmp = TempDir::new().unwrap();
        let err =
            LocalPackage::resolve(tmp.path(), &config(), true, &CacheStore::new()).unwrap_err();
        assert!(matches!(err, ResolveError::NoManifest(_)));
    }

    #[test]
    fn ambiguous_manifest() {
        let tmp = TempDir::new().unwrap();
        write_package(tmp.path(), "foo", FOO);
        fs::write(tmp.path().join("bar.quarry"), FOO).unwrap();

        let err =
            LocalPackage::resolve(tmp.path(), &config(), true, &CacheStore::new()).unwrap_err();
        assert!(matches!(err, ResolveError::AmbiguousManifest { .. }));
    }

    #[test]
    fn name_mismatch() {
        let tmp = TempDir::new().unwrap();
        write_package(tmp.path(), "not-foo", FOO);

        let err =
            LocalPackage::resolve(tmp.path(), &config(), true, &CacheStore::new()).unwrap_err();
        assert!(matches!(err, ResolveError::NameMismatch { .. }));
    }

    #[test]
    fn invalid_manifest_carries_the_diagnostic() {
        let tmp = TempDir::new().unwrap();
        fs::write(tmp.path().join("foo.quarry"), "[package\nname=").unwrap();

        let err =
            LocalPackage::resolve(tmp.path(), &config(), true, &CacheStore::new()).unwrap_err();
        match err {
            ResolveError::InvalidManifest { source, .. } => {
                assert!(matches!(source, ManifestError::Parse(_)));
            }
            other => panic!("expected InvalidManifest, got {other:?}"),
        }
    }

    #[test]
    fn phases_agree_on_identity() {
        let tmp = TempDir::new().unwrap();
        write_package(
            tmp.path(),
            "foo",
            r#"
[package]
name = "foo"
version = "1.0.0"

[lib]
modules = ["Foo"]

[[test]]
name = "spec"
path = "tests/spec.qy"

[test.dependencies]
checkwright = "^2"
"#,
        );
        fs::write(tmp.path().join("src/Foo.qy"), "module Foo").unwrap();
        fs::create_dir_all(tmp.path().join("tests")).unwrap();
        fs::write(tmp.path().join("tests/spec.qy"), "module Spec").unwrap();

        let local =
            LocalPackage::resolve(tmp.path(), &config(), true, &CacheStore::new()).unwrap();

        assert_eq!(local.package.identifier(), local.full_package.identifier());
        // The full resolution sees the test dependency; the baseline does not.
        assert!(local.full_package.deps.contains_key("checkwright"));
        assert!(!local.package.deps.contains_key("checkwright"));
        // The baseline live file set excludes the disabled test component.
        assert!(!local.files.iter().any(|p| p.ends_with("tests/spec.qy")));
    }
}

//! Resolved package metadata.
//!
//! A [`Package`] is one manifest resolved under one [`PackageConfig`]:
//! flags assigned, dependencies sieved down to the enabled components, and
//! the three introspection capabilities (files, modules, build options)
//! constructed. Resolving the same manifest under another config yields an
//! independent snapshot.

use crate::config::{BuildEnv, PackageConfig};
use crate::manifest::{
    BuildType, ComponentDecl, Manifest, ManifestError, APP_DIR, BENCHES_DIR, SOURCE_DIR,
    SOURCE_EXT, TESTS_DIR,
};
use crate::source::SourceMap;
use semver::{Version, VersionReq};
use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use thiserror::Error;

/// A concrete package identity: name plus version.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct PackageIdentifier {
    /// Package name.
    pub name: String,

    /// Concrete version.
    pub version: Version,
}

impl std::fmt::Display for PackageIdentifier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}-{}", self.name, self.version)
    }
}

/// Errors surfaced when an introspection capability is invoked.
#[derive(Error, Debug)]
pub enum CapabilityError {
    /// The manifest the capability was built from changed or disappeared.
    #[error("manifest at {0} changed or disappeared")]
    ManifestGone(PathBuf),

    /// A linked package is missing from the source map.
    #[error("package '{0}' is not in the source map")]
    UnknownPackage(String),

    /// Required environment data was not available.
    #[error("missing environment data: {0}")]
    MissingEnv(&'static str),
}

/// Deferred file listing: the package's source files under the current
/// environment.
pub type FilesCapability =
    Arc<dyn Fn(&dyn BuildEnv) -> Result<Vec<PathBuf>, CapabilityError> + Send + Sync>;

/// Deferred module listing.
pub type ModulesCapability =
    Arc<dyn Fn(&dyn BuildEnv) -> Result<Vec<String>, CapabilityError> + Send + Sync>;

/// Deferred compiler-option assembly. Additionally takes the build plan's
/// source map and the set of package names being linked.
pub type OptionsCapability = Arc<
    dyn Fn(&dyn BuildEnv, &SourceMap, &BTreeSet<String>) -> Result<Vec<String>, CapabilityError>
        + Send
        + Sync,
>;

/// Resolved metadata for one manifest under one configuration.
#[derive(Clone)]
pub struct Package {
    /// Package name.
    pub name: String,

    /// Package version.
    pub version: Version,

    /// Dependency ranges after sieving: entries gated on a disabled flag or
    /// belonging to a disabled component are absent.
    pub deps: BTreeMap<String, VersionReq>,

    /// Build-tool dependency ranges.
    pub tool_deps: BTreeMap<String, VersionReq>,

    /// Every declared dependency name, before sieving.
    pub unsieved_deps: BTreeSet<String>,

    /// Resolved flag assignment: manifest defaults overridden by the
    /// configuration.
    pub flags: BTreeMap<String, bool>,

    /// Names of flags the manifest defines.
    pub defined_flags: BTreeSet<String>,

    /// Executable component names.
    pub executables: BTreeSet<String>,

    /// Test-suite component names.
    pub test_suites: BTreeSet<String>,

    /// Benchmark component names.
    pub benchmarks: BTreeSet<String>,

    /// Whether the package has a library component.
    pub has_library: bool,

    /// Whether the library exposes modules to downstream packages.
    pub has_exposed_modules: bool,

    /// Whether the package uses the conventional build with no build script.
    pub simple_build_type: bool,

    /// Deferred listing of the package's source files.
    pub files: FilesCapability,

    /// Deferred listing of the package's modules.
    pub modules: ModulesCapability,

    /// Deferred assembly of compiler options.
    pub build_options: OptionsCapability,
}

impl std::fmt::Debug for Package {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Package")
            .field("name", &self.name)
            .field("version", &self.version)
            .field("deps", &self.deps)
            .field("tool_deps", &self.tool_deps)
            .field("unsieved_deps", &self.unsieved_deps)
            .field("flags", &self.flags)
            .field("executables", &self.executables)
            .field("test_suites", &self.test_suites)
            .field("benchmarks", &self.benchmarks)
            .field("has_library", &self.has_library)
            .field("has_exposed_modules", &self.has_exposed_modules)
            .field("simple_build_type", &self.simple_build_type)
            .finish_non_exhaustive()
    }
}

/// Equality, ordering, and hashing are by **name only**.
///
/// This is safe only under the invariant that one build plan never holds two
/// same-named packages with different versions. Reusing `Package` in a
/// context where that does not hold silently merges distinct versions in
/// set and map semantics.
impl PartialEq for Package {
    fn eq(&self, other: &Self) -> bool {
        self.name == other.name
    }
}

impl Eq for Package {}

impl PartialOrd for Package {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Package {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        self.name.cmp(&other.name)
    }
}

impl std::hash::Hash for Package {
    fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
        self.name.hash(state);
    }
}

impl Package {
    /// Resolve a manifest under a configuration.
    ///
    /// `manifest_path` locates the manifest on disk; the capabilities built
    /// here close over it so a later invocation can detect that the manifest
    /// disappeared.
    ///
    /// # Errors
    ///
    /// Returns an error if a dependency range fails to parse.
    pub fn resolve(
        manifest: &Manifest,
        manifest_path: &Path,
        config: &PackageConfig,
    ) -> Result<Self, ManifestError> {
        let root = manifest_root(manifest_path);

        // Flag assignment: defaults, then configuration overrides. Unknown
        // names in the configuration may target other packages and are
        // ignored here.
        let mut flags = BTreeMap::new();
        for (name, decl) in &manifest.flags {
            let value = config.flags.get(name).copied().unwrap_or(decl.default);
            flags.insert(name.clone(), value);
        }

        let mut deps: BTreeMap<String, VersionReq> = BTreeMap::new();
        let mut sieve = |specs: &BTreeMap<String, crate::manifest::DependencySpec>|
         -> Result<(), ManifestError> {
            for (name, spec) in specs {
                if let Some(flag) = spec.gate() {
                    if !flags.get(flag).copied().unwrap_or(false) {
                        continue;
                    }
                }
                let req = spec.version_req(name)?;
                deps.entry(name.clone()).or_insert(req);
            }
            Ok(())
        };

        sieve(&manifest.dependencies)?;
        if let Some(lib) = &manifest.lib {
            sieve(&lib.dependencies)?;
        }
        for bin in &manifest.binaries {
            sieve(&bin.dependencies)?;
        }
        if config.enable_tests {
            for test in &manifest.tests {
                sieve(&test.dependencies)?;
            }
        }
        if config.enable_benchmarks {
            for bench in &manifest.benches {
                sieve(&bench.dependencies)?;
            }
        }

        let mut tool_deps = BTreeMap::new();
        for (name, spec) in &manifest.tool_dependencies {
            if let Some(flag) = spec.gate() {
                if !flags.get(flag).copied().unwrap_or(false) {
                    continue;
                }
            }
            tool_deps.insert(name.clone(), spec.version_req(name)?);
        }

        let unsieved_deps = manifest.all_dependencies().map(|(n, _)| n.clone()).collect();

        let module_names = resolved_modules(manifest, config);
        let file_list = resolved_files(manifest, &root, manifest_path, config);

        let files = files_capability(manifest_path.to_path_buf(), file_list);
        let modules = modules_capability(manifest_path.to_path_buf(), module_names);
        let build_options = options_capability(
            manifest.package.name.clone(),
            manifest.package.version.clone(),
            flags.clone(),
        );

        Ok(Self {
            name: manifest.package.name.clone(),
            version: manifest.package.version.clone(),
            deps,
            tool_deps,
            unsieved_deps,
            flags,
            defined_flags: manifest.flags.keys().cloned().collect(),
            executables: manifest.binaries.iter().map(|c| c.name.clone()).collect(),
            test_suites: manifest.tests.iter().map(|c| c.name.clone()).collect(),
            benchmarks: manifest.benches.iter().map(|c| c.name.clone()).collect(),
            has_library: manifest.lib.is_some(),
            has_exposed_modules: manifest
                .lib
                .as_ref()
                .is_some_and(|l| !l.exposed_modules.is_empty()),
            simple_build_type: manifest.package.build_type == BuildType::Simple,
            files,
            modules,
            build_options,
        })
    }

    /// This package's identity.
    #[must_use]
    pub fn identifier(&self) -> PackageIdentifier {
        PackageIdentifier {
            name: self.name.clone(),
            version: self.version.clone(),
        }
    }
}

fn manifest_root(manifest_path: &Path) -> PathBuf {
    manifest_path
        .parent()
        .map_or_else(|| PathBuf::from("."), Path::to_path_buf)
}

/// Map a dotted module name to its source file: `Foo.Bar` becomes
/// `src/Foo/Bar.qy`.
fn module_file(root: &Path, module: &str) -> PathBuf {
    let mut path = root.join(SOURCE_DIR);
    for segment in module.split('.') {
        path.push(segment);
    }
    path.set_extension(SOURCE_EXT);
    path
}

fn component_entry(root: &Path, component: &ComponentDecl, default_dir: &str) -> PathBuf {
    component.path.as_ref().map_or_else(
        || {
            root.join(default_dir)
                .join(&component.name)
                .with_extension(SOURCE_EXT)
        },
        |p| root.join(p),
    )
}

/// Module names visible under a configuration.
fn resolved_modules(manifest: &Manifest, config: &PackageConfig) -> Vec<String> {
    let mut modules = Vec::new();
    if let Some(lib) = &manifest.lib {
        modules.extend(lib.modules.iter().cloned());
    }
    for bin in &manifest.binaries {
        modules.extend(bin.modules.iter().cloned());
    }
    if config.enable_tests {
        for test in &manifest.tests {
            modules.extend(test.modules.iter().cloned());
        }
    }
    if config.enable_benchmarks {
        for bench in &manifest.benches {
            modules.extend(bench.modules.iter().cloned());
        }
    }
    modules.sort();
    modules.dedup();
    modules
}

/// Source files a configuration's components are built from, including the
/// manifest itself.
pub(crate) fn resolved_files(
    manifest: &Manifest,
    root: &Path,
    manifest_path: &Path,
    config: &PackageConfig,
) -> Vec<PathBuf> {
    let mut files = vec![manifest_path.to_path_buf()];

    if let Some(lib) = &manifest.lib {
        for module in &lib.modules {
            files.push(module_file(root, module));
        }
    }
    for bin in &manifest.binaries {
        files.push(component_entry(root, bin, APP_DIR));
        for module in &bin.modules {
            files.push(module_file(root, module));
        }
    }
    if config.enable_tests {
        for test in &manifest.tests {
            files.push(component_entry(root, test, TESTS_DIR));
            for module in &test.modules {
                files.push(module_file(root, module));
            }
        }
    }
    if config.enable_benchmarks {
        for bench in &manifest.benches {
            files.push(component_entry(root, bench, BENCHES_DIR));
            for module in &bench.modules {
                files.push(module_file(root, module));
            }
        }
    }

    files.sort();
    files.dedup();
    files
}

fn files_capability(manifest_path: PathBuf, files: Vec<PathBuf>) -> FilesCapability {
    Arc::new(move |_env| {
        if !manifest_path.exists() {
            return Err(CapabilityError::ManifestGone(manifest_path.clone()));
        }
        Ok(files.clone())
    })
}

fn modules_capability(manifest_path: PathBuf, modules: Vec<String>) -> ModulesCapability {
    Arc::new(move |_env| {
        if !manifest_path.exists() {
            return Err(CapabilityError::ManifestGone(manifest_path.clone()));
        }
        Ok(modules.clone())
    })
}

fn options_capability(
    name: String,
    version: Version,
    flags: BTreeMap<String, bool>,
) -> OptionsCapability {
    Arc::new(move |env, sources, linked| {
        let mut options = vec![format!("--this-unit-id={name}-{version}")];

        if !linked.is_empty() && env.package_databases().is_empty() {
            return Err(CapabilityError::MissingEnv("package databases"));
        }

        for db in env.package_databases() {
            options.push(format!("--package-db={}", db.display()));
        }

        for dep in linked {
            let dep_version = sources
                .version_of(dep)
                .ok_or_else(|| CapabilityError::UnknownPackage(dep.clone()))?;
            options.push(format!("--package={dep}-{dep_version}"));
        }

        for (flag, value) in &flags {
            options.push(format!(
                "--flag={flag}:{}",
                if *value { "on" } else { "off" }
            ));
        }

        options.push(format!("--target={}", env.platform()));
        Ok(options)
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{HostEnv, Platform};

    fn config() -> PackageConfig {
        PackageConfig::new(Version::new(9, 4, 0), Platform::host())
    }

    fn manifest() -> Manifest {
        Manifest::parse(
            r#"
[package]
name = "web-server"
version = "2.1.0"

[flags]
tls = { default = true }
tracing = { default = false }

[dependencies]
http = "^1.0"
crypto = { version = "^3", flag = "tls" }
probes = { version = "^0.2", flag = "tracing" }

[tool-dependencies]
codegen = "^0.4"

[lib]
modules = ["Server", "Server.Routes"]
exposed-modules = ["Server"]

[[bin]]
name = "serve"

[[test]]
name = "spec"
modules = ["Server.Spec"]

[test.dependencies]
checkwright = "^2"
"#,
        )
        .unwrap()
    }

    fn resolve(config: &PackageConfig) -> Package {
        Package::resolve(&manifest(), Path::new("/proj/web-server/web-server.quarry"), config)
            .unwrap()
    }

    #[test]
    fn sieving_respects_flags() {
        let package = resolve(&config());

        // tls defaults on, tracing defaults off.
        assert!(package.deps.contains_key("crypto"));
        assert!(!package.deps.contains_key("probes"));
        assert!(package.unsieved_deps.contains("probes"));
    }

    #[test]
    fn config_overrides_flag_defaults() {
        let mut config = config();
        config.flags.insert("tracing".to_string(), true);
        config.flags.insert("tls".to_string(), false);

        let package = resolve(&config);
        assert!(package.deps.contains_key("probes"));
        assert!(!package.deps.contains_key("crypto"));
        assert!(package.flags["tracing"]);
        assert!(!package.flags["tls"]);
    }

    #[test]
    fn unknown_config_flags_are_ignored() {
        let mut config = config();
        config.flags.insert("other-package-flag".to_string(), true);

        let package = resolve(&config);
        assert!(!package.flags.contains_key("other-package-flag"));
    }

    #[test]
    fn test_dependencies_sieved_unless_enabled() {
        let base = resolve(&config());
        assert!(!base.deps.contains_key("checkwright"));

        let full = resolve(&config().with_all_components());
        assert!(full.deps.contains_key("checkwright"));

        // Both phases see the same unsieved set.
        assert_eq!(base.unsieved_deps, full.unsieved_deps);
    }

    #[test]
    fn capability_flags_from_manifest() {
        let package = resolve(&config());
        assert!(package.has_library);
        assert!(package.has_exposed_modules);
        assert!(package.simple_build_type);
        assert!(package.tool_deps.contains_key("codegen"));
    }

    #[test]
    fn name_only_equality_is_the_documented_sharp_edge() {
        let mut config_b = config();
        config_b.flags.insert("tls".to_string(), false);

        let a = resolve(&config());
        let mut b = resolve(&config_b);
        b.version = Version::new(9, 9, 9);

        // Same name, different version: still equal under this ordering.
        assert_eq!(a, b);
        assert_eq!(a.cmp(&b), std::cmp::Ordering::Equal);
    }

    #[test]
    fn modules_capability_reflects_config() {
        let env = HostEnv::from_config(&config());
        let tmp = tempfile::TempDir::new().unwrap();
        let manifest_path = tmp.path().join("web-server.quarry");
        std::fs::write(&manifest_path, "").unwrap();

        let base = Package::resolve(&manifest(), &manifest_path, &config()).unwrap();
        let full =
            Package::resolve(&manifest(), &manifest_path, &config().with_all_components())
                .unwrap();

        let base_modules = (base.modules)(&env).unwrap();
        let full_modules = (full.modules)(&env).unwrap();

        assert!(!base_modules.contains(&"Server.Spec".to_string()));
        assert!(full_modules.contains(&"Server.Spec".to_string()));
    }

    #[test]
    fn capabilities_fail_when_manifest_disappears() {
        let env = HostEnv::from_config(&config());
        let tmp = tempfile::TempDir::new().unwrap();
        let manifest_path = tmp.path().join("web-server.quarry");
        std::fs::write(&manifest_path, "").unwrap();

        let package = Package::resolve(&manifest(), &manifest_path, &config()).unwrap();
        std::fs::remove_file(&manifest_path).unwrap();

        let err = (package.files)(&env).unwrap_err();
        assert!(matches!(err, CapabilityError::ManifestGone(_)));
    }

    #[test]
    fn options_capability_uses_source_map_versions() {
        use crate::source::{InstallLocation, SourceMap, UpstreamCandidate};

        let mut env = HostEnv::from_config(&config());
        env.package_databases.push(PathBuf::from("/snap/pkgdb"));

        let sources = SourceMap::build(
            [],
            [(
                "http".to_string(),
                UpstreamCandidate {
                    version: Version::new(1, 2, 0),
                    flags: BTreeMap::new(),
                    consumer_locations: vec![InstallLocation::Snapshot],
                },
            )],
        );

        let package = resolve(&config());
        let linked: BTreeSet<String> = ["http".to_string()].into();
        let options = (package.build_options)(&env, &sources, &linked).unwrap();

        assert!(options.contains(&"--package-db=/snap/pkgdb".to_string()));
        assert!(options.contains(&"--package=http-1.2.0".to_string()));
        assert!(options.iter().any(|o| o.starts_with("--flag=tls:")));
    }

    #[test]
    fn options_capability_rejects_unknown_linked_package() {
        use crate::source::SourceMap;

        let mut env = HostEnv::from_config(&config());
        env.package_databases.push(PathBuf::from("/snap/pkgdb"));

        let package = resolve(&config());
        let linked: BTreeSet<String> = ["absent".to_string()].into();
        let err = (package.build_options)(&env, &SourceMap::default(), &linked).unwrap_err();
        assert!(matches!(err, CapabilityError::UnknownPackage(_)));
    }
}

//! Quarry package manifest (`<name>.quarry`) parsing and validation.
//!
//! A manifest is a TOML document holding the package's raw declarations:
//! identity, flags, dependency ranges, and components. Nothing here is
//! resolved against a configuration; that happens in [`crate::Package::resolve`].

use crate::source::InstallLocation;
use semver::{Version, VersionReq};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;
use thiserror::Error;

/// Manifest file extension. A package directory holds exactly one
/// `<name>.quarry` file.
pub const MANIFEST_EXT: &str = "quarry";

/// Source file extension.
pub const SOURCE_EXT: &str = "qy";

/// The source directory for library and test modules.
pub const SOURCE_DIR: &str = "src";

/// Default directory for executable entry points.
pub const APP_DIR: &str = "app";

/// Default directory for test-suite entry points.
pub const TESTS_DIR: &str = "tests";

/// Default directory for benchmark entry points.
pub const BENCHES_DIR: &str = "benches";

/// Errors that can occur when working with manifests.
#[derive(Error, Debug)]
pub enum ManifestError {
    #[error("failed to read manifest file: {0}")]
    Io(#[from] std::io::Error),

    #[error("failed to parse manifest: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("invalid package name '{0}': {1}")]
    InvalidName(String, &'static str),

    #[error("invalid version requirement '{requirement}' for dependency '{dependency}': {reason}")]
    InvalidVersionReq {
        dependency: String,
        requirement: String,
        reason: String,
    },

    #[error("dependency '{dependency}' is gated on undefined flag '{flag}'")]
    UnknownFlag { dependency: String, flag: String },

    #[error("duplicate component name '{0}'")]
    DuplicateComponent(String),
}

/// The complete manifest for one package.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Manifest {
    /// Package identity and build type (required).
    pub package: PackageDecl,

    /// Flags the package defines, with their defaults.
    #[serde(default)]
    pub flags: BTreeMap<String, FlagDecl>,

    /// Library dependencies.
    #[serde(default)]
    pub dependencies: BTreeMap<String, DependencySpec>,

    /// Build-tool dependencies (preprocessors, code generators).
    #[serde(default, rename = "tool-dependencies")]
    pub tool_dependencies: BTreeMap<String, DependencySpec>,

    /// Library component.
    #[serde(default)]
    pub lib: Option<LibraryDecl>,

    /// Executable components.
    #[serde(default, rename = "bin")]
    pub binaries: Vec<ComponentDecl>,

    /// Test-suite components.
    #[serde(default, rename = "test")]
    pub tests: Vec<ComponentDecl>,

    /// Benchmark components.
    #[serde(default, rename = "bench")]
    pub benches: Vec<ComponentDecl>,
}

/// Package identity section.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct PackageDecl {
    /// Package name (required).
    pub name: String,

    /// Package version (required, semver).
    pub version: Version,

    /// How the package is built.
    #[serde(default, rename = "build-type")]
    pub build_type: BuildType,

    /// Short description.
    #[serde(default)]
    pub description: Option<String>,
}

/// How a package is built.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "kebab-case")]
pub enum BuildType {
    /// Conventional layout, no build script.
    #[default]
    Simple,
    /// The package ships its own build script.
    Custom,
}

/// A flag declaration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct FlagDecl {
    /// Value used when the configuration does not assign the flag.
    #[serde(default)]
    pub default: bool,

    /// What the flag controls.
    #[serde(default)]
    pub description: Option<String>,
}

/// Dependency specification.
///
/// Either a plain version requirement string or a detailed table.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum DependencySpec {
    /// Simple requirement string: `"1.0"` or `"^2.1.0"`.
    Simple(String),

    /// Detailed specification.
    Detailed(Dependency),
}

impl DependencySpec {
    /// The raw requirement string, if one was given.
    #[must_use]
    pub fn requirement(&self) -> Option<&str> {
        match self {
            Self::Simple(v) => Some(v),
            Self::Detailed(d) => d.version.as_deref(),
        }
    }

    /// The flag this dependency is gated on, if any.
    #[must_use]
    pub fn gate(&self) -> Option<&str> {
        match self {
            Self::Simple(_) => None,
            Self::Detailed(d) => d.flag.as_deref(),
        }
    }

    /// The install location this consumer requires for the dependency.
    #[must_use]
    pub fn required_location(&self) -> InstallLocation {
        match self {
            Self::Simple(_) => InstallLocation::Snapshot,
            Self::Detailed(d) => d.location.unwrap_or(InstallLocation::Snapshot),
        }
    }

    /// Parse the requirement into a [`VersionReq`].
    ///
    /// A missing requirement means "any version". Bare versions like
    /// `"1.2.0"` are treated as caret requirements.
    ///
    /// # Errors
    ///
    /// Returns an error if the requirement string is not valid.
    pub fn version_req(&self, dependency: &str) -> Result<VersionReq, ManifestError> {
        match self.requirement() {
            None => Ok(VersionReq::STAR),
            Some(raw) => parse_version_req(dependency, raw),
        }
    }
}

/// Detailed dependency specification.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Dependency {
    /// Version requirement.
    #[serde(default)]
    pub version: Option<String>,

    /// Flag gating this dependency. When the flag resolves to false the
    /// dependency is sieved out of the resolved set.
    #[serde(default)]
    pub flag: Option<String>,

    /// Install location this consumer requires. `local` forces the
    /// dependency to be rebuilt in the project even when a shared snapshot
    /// copy exists.
    #[serde(default)]
    pub location: Option<InstallLocation>,
}

/// Library component declaration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct LibraryDecl {
    /// All modules the library is built from.
    #[serde(default)]
    pub modules: Vec<String>,

    /// Modules visible to downstream packages.
    #[serde(default, rename = "exposed-modules")]
    pub exposed_modules: Vec<String>,

    /// Dependencies private to the library component.
    #[serde(default)]
    pub dependencies: BTreeMap<String, DependencySpec>,
}

/// A non-library component (executable, test suite, benchmark).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ComponentDecl {
    /// Component name.
    pub name: String,

    /// Entry-point file, relative to the package root. Defaults to
    /// `app/<name>.qy` for binaries and `src/<name>.qy` otherwise.
    #[serde(default)]
    pub path: Option<String>,

    /// Additional modules compiled into the component.
    #[serde(default)]
    pub modules: Vec<String>,

    /// Dependencies private to the component.
    #[serde(default)]
    pub dependencies: BTreeMap<String, DependencySpec>,
}

impl Manifest {
    /// Load a manifest from a file path.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or parsed.
    pub fn from_path(path: impl AsRef<Path>) -> Result<Self, ManifestError> {
        let content = std::fs::read_to_string(path)?;
        Self::parse(&content)
    }

    /// Parse a manifest from a TOML string.
    ///
    /// # Errors
    ///
    /// Returns an error if the TOML is invalid or a declaration fails
    /// validation.
    pub fn parse(content: &str) -> Result<Self, ManifestError> {
        let manifest: Self = toml::from_str(content)?;
        manifest.validate()?;
        Ok(manifest)
    }

    fn validate(&self) -> Result<(), ManifestError> {
        self.validate_name()?;
        self.validate_dependencies()?;
        self.validate_components()?;
        Ok(())
    }

    fn validate_name(&self) -> Result<(), ManifestError> {
        let name = &self.package.name;

        if name.is_empty() {
            return Err(ManifestError::InvalidName(
                name.clone(),
                "name cannot be empty",
            ));
        }

        if name.len() > 64 {
            return Err(ManifestError::InvalidName(
                name.clone(),
                "name cannot exceed 64 characters",
            ));
        }

        if !name.chars().next().is_some_and(|c| c.is_ascii_alphabetic()) {
            return Err(ManifestError::InvalidName(
                name.clone(),
                "name must start with a letter",
            ));
        }

        for c in name.chars() {
            if !c.is_ascii_alphanumeric() && c != '-' && c != '_' {
                return Err(ManifestError::InvalidName(
                    name.clone(),
                    "name can only contain letters, numbers, hyphens, and underscores",
                ));
            }
        }

        Ok(())
    }

    fn validate_dependencies(&self) -> Result<(), ManifestError> {
        for (name, spec) in self.all_dependencies() {
            spec.version_req(name)?;

            if let Some(flag) = spec.gate() {
                if !self.flags.contains_key(flag) {
                    return Err(ManifestError::UnknownFlag {
                        dependency: name.clone(),
                        flag: flag.to_string(),
                    });
                }
            }
        }
        Ok(())
    }

    fn validate_components(&self) -> Result<(), ManifestError> {
        let mut seen = std::collections::BTreeSet::new();
        for component in self
            .binaries
            .iter()
            .chain(&self.tests)
            .chain(&self.benches)
        {
            if !seen.insert(component.name.as_str()) {
                return Err(ManifestError::DuplicateComponent(component.name.clone()));
            }
        }
        Ok(())
    }

    /// Iterate over every declared dependency, regardless of component or
    /// flag gating. This is the unsieved set.
    pub fn all_dependencies(&self) -> impl Iterator<Item = (&String, &DependencySpec)> {
        let lib_deps = self.lib.iter().flat_map(|l| l.dependencies.iter());
        let component_deps = self
            .binaries
            .iter()
            .chain(&self.tests)
            .chain(&self.benches)
            .flat_map(|c| c.dependencies.iter());

        self.dependencies
            .iter()
            .chain(self.tool_dependencies.iter())
            .chain(lib_deps)
            .chain(component_deps)
    }

    /// Serialize the manifest to a TOML string.
    ///
    /// # Errors
    ///
    /// Returns an error if serialization fails.
    pub fn to_toml_string(&self) -> Result<String, toml::ser::Error> {
        toml::to_string_pretty(self)
    }
}

/// Parse a version requirement string, treating bare versions as caret
/// requirements.
pub(crate) fn parse_version_req(
    dependency: &str,
    raw: &str,
) -> Result<VersionReq, ManifestError> {
    let normalized = if raw.chars().next().is_some_and(|c| c.is_ascii_digit()) {
        format!("^{raw}")
    } else {
        raw.to_string()
    };

    VersionReq::parse(&normalized).map_err(|e| ManifestError::InvalidVersionReq {
        dependency: dependency.to_string(),
        requirement: raw.to_string(),
        reason: e.to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_minimal_manifest() {
        let toml = r#"
[package]
name = "foo"
version = "1.0.0"
"#;
        let manifest = Manifest::parse(toml).unwrap();
        assert_eq!(manifest.package.name, "foo");
        assert_eq!(manifest.package.version, Version::new(1, 0, 0));
        assert_eq!(manifest.package.build_type, BuildType::Simple);
    }

    #[test]
    fn parse_full_manifest() {
        let toml = r#"
[package]
name = "web-server"
version = "2.1.0"
build-type = "simple"
description = "An example server"

[flags]
tls = { default = true, description = "Enable TLS support" }

[dependencies]
http = "^1.0"
crypto = { version = "^3", flag = "tls" }

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
"#;
        let manifest = Manifest::parse(toml).unwrap();
        assert_eq!(manifest.dependencies.len(), 2);
        assert_eq!(manifest.tool_dependencies.len(), 1);
        assert_eq!(manifest.binaries.len(), 1);
        assert_eq!(manifest.tests.len(), 1);
        assert_eq!(manifest.tests[0].dependencies.len(), 1);
        assert!(manifest.lib.is_some());
    }

    #[test]
    fn dependency_gate_and_location() {
        let toml = r#"
[package]
name = "foo"
version = "0.1.0"

[flags]
fancy = { default = false }

[dependencies]
plain = "^1"
gated = { version = "^2", flag = "fancy" }
pinned = { version = "^3", location = "local" }
"#;
        let manifest = Manifest::parse(toml).unwrap();
        assert_eq!(manifest.dependencies["plain"].gate(), None);
        assert_eq!(manifest.dependencies["gated"].gate(), Some("fancy"));
        assert_eq!(
            manifest.dependencies["pinned"].required_location(),
            InstallLocation::Local
        );
        assert_eq!(
            manifest.dependencies["plain"].required_location(),
            InstallLocation::Snapshot
        );
    }

    #[test]
    fn bare_versions_are_caret() {
        let req = parse_version_req("dep", "1.2.0").unwrap();
        assert!(req.matches(&Version::new(1, 5, 0)));
        assert!(!req.matches(&Version::new(2, 0, 0)));
    }

    #[test]
    fn invalid_name_rejected() {
        let toml = r#"
[package]
name = "9lives"
version = "0.1.0"
"#;
        let err = Manifest::parse(toml).unwrap_err();
        assert!(matches!(err, ManifestError::InvalidName(..)));
    }

    #[test]
    fn undefined_flag_gate_rejected() {
        let toml = r#"
[package]
name = "foo"
version = "0.1.0"

[dependencies]
bar = { version = "^1", flag = "nope" }
"#;
        let err = Manifest::parse(toml).unwrap_err();
        assert!(matches!(err, ManifestError::UnknownFlag { .. }));
    }

    #[test]
    fn invalid_version_requirement_rejected() {
        let toml = r#"
[package]
name = "foo"
version = "0.1.0"

[dependencies]
bar = "not-a-req"
"#;
        let err = Manifest::parse(toml).unwrap_err();
        assert!(matches!(err, ManifestError::InvalidVersionReq { .. }));
    }

    #[test]
    fn duplicate_component_rejected() {
        let toml = r#"
[package]
name = "foo"
version = "0.1.0"

[[bin]]
name = "tool"

[[test]]
name = "tool"
"#;
        let err = Manifest::parse(toml).unwrap_err();
        assert!(matches!(err, ManifestError::DuplicateComponent(..)));
    }

    #[test]
    fn all_dependencies_spans_components() {
        let toml = r#"
[package]
name = "foo"
version = "0.1.0"

[dependencies]
base = "^1"

[lib]
modules = ["Foo"]

[lib.dependencies]
inner = "^2"

[[test]]
name = "spec"

[test.dependencies]
checkwright = "^2"
"#;
        let manifest = Manifest::parse(toml).unwrap();
        let names: Vec<&str> = manifest
            .all_dependencies()
            .map(|(n, _)| n.as_str())
            .collect();
        assert!(names.contains(&"base"));
        assert!(names.contains(&"inner"));
        assert!(names.contains(&"checkwright"));
    }
}

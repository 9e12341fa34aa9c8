//! Resolution inputs: package configuration and the build environment.
//!
//! A [`PackageConfig`] is the immutable set of inputs one package resolution
//! runs under. Resolving the same manifest under two different configs (for
//! example with test suites off and on) yields two independent [`crate::Package`]
//! snapshots; nothing here is toggled in place.

use semver::Version;
use std::collections::BTreeMap;
use std::path::PathBuf;

/// The platform a build is configured for.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct Platform {
    /// Operating system name (e.g. `linux`, `darwin`).
    pub os: String,

    /// Processor architecture (e.g. `x86_64`, `aarch64`).
    pub arch: String,
}

impl Platform {
    /// The platform the current binary was compiled for.
    #[must_use]
    pub fn host() -> Self {
        Self {
            os: std::env::consts::OS.to_string(),
            arch: std::env::consts::ARCH.to_string(),
        }
    }
}

impl std::fmt::Display for Platform {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}-{}", self.arch, self.os)
    }
}

/// Inputs to one package resolution.
///
/// Immutable per resolution: to resolve under different settings, build a
/// second config (see [`PackageConfig::with_all_components`]).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PackageConfig {
    /// Whether test-suite components participate in the dependency set.
    pub enable_tests: bool,

    /// Whether benchmark components participate in the dependency set.
    pub enable_benchmarks: bool,

    /// Flag assignment for the whole build plan.
    ///
    /// Entries that name flags a package does not define are ignored by that
    /// package; one table serves every package in the plan.
    pub flags: BTreeMap<String, bool>,

    /// Version of the compiler the plan targets.
    pub compiler_version: Version,

    /// Platform the plan targets.
    pub platform: Platform,
}

impl PackageConfig {
    /// A baseline config: tests and benchmarks off, no flag overrides.
    #[must_use]
    pub fn new(compiler_version: Version, platform: Platform) -> Self {
        Self {
            enable_tests: false,
            enable_benchmarks: false,
            flags: BTreeMap::new(),
            compiler_version,
            platform,
        }
    }

    /// The same config with test and benchmark components forced on.
    ///
    /// Used for the second resolution phase, which discovers the full
    /// dependency and module closure so that test-only dependencies can be
    /// placed even when they are not part of the default build.
    #[must_use]
    pub fn with_all_components(&self) -> Self {
        Self {
            enable_tests: true,
            enable_benchmarks: true,
            ..self.clone()
        }
    }
}

/// The environment an introspection capability runs against.
///
/// Implementations provide whatever the driver knows at point of use; the
/// capabilities stored on a [`crate::Package`] take this rather than concrete
/// values so that the answer reflects the environment current when asked,
/// not when the package was resolved.
pub trait BuildEnv {
    /// Platform being built for.
    fn platform(&self) -> &Platform;

    /// Compiler version in use.
    fn compiler_version(&self) -> &Version;

    /// Package database paths, innermost last.
    fn package_databases(&self) -> &[PathBuf];
}

/// A plain in-memory [`BuildEnv`].
#[derive(Debug, Clone)]
pub struct HostEnv {
    /// Platform being built for.
    pub platform: Platform,

    /// Compiler version in use.
    pub compiler_version: Version,

    /// Package database paths.
    pub package_databases: Vec<PathBuf>,
}

impl HostEnv {
    /// Build an environment from the inputs a config already carries.
    #[must_use]
    pub fn from_config(config: &PackageConfig) -> Self {
        Self {
            platform: config.platform.clone(),
            compiler_version: config.compiler_version.clone(),
            package_databases: Vec::new(),
        }
    }
}

impl BuildEnv for HostEnv {
    fn platform(&self) -> &Platform {
        &self.platform
    }

    fn compiler_version(&self) -> &Version {
        &self.compiler_version
    }

    fn package_databases(&self) -> &[PathBuf] {
        &self.package_databases
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config() -> PackageConfig {
        PackageConfig::new(Version::new(9, 4, 0), Platform::host())
    }

    #[test]
    fn baseline_disables_optional_components() {
        let config = config();
        assert!(!config.enable_tests);
        assert!(!config.enable_benchmarks);
    }

    #[test]
    fn with_all_components_only_touches_toggles() {
        let base = config();
        let full = base.with_all_components();

        assert!(full.enable_tests);
        assert!(full.enable_benchmarks);
        assert_eq!(full.compiler_version, base.compiler_version);
        assert_eq!(full.platform, base.platform);
        assert_eq!(full.flags, base.flags);
    }

    #[test]
    fn platform_display() {
        let platform = Platform {
            os: "linux".to_string(),
            arch: "x86_64".to_string(),
        };
        assert_eq!(platform.to_string(), "x86_64-linux");
    }
}

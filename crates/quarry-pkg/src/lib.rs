//! Build-plan bookkeeping for the Quarry build tool.
//!
//! This crate is the state model every later build phase runs on. It
//! provides:
//! - Parsing and validation of `*.quarry` package manifests
//! - Two-phase resolution of project packages (baseline, and with test and
//!   benchmark components forced on)
//! - The per-package build cache and file-level dirtiness detection
//! - The snapshot-vs-local install-location model and the build-plan-wide
//!   source map
//! - Project files (`quarry-project.toml`) and member discovery
//!
//! Choosing concrete dependency versions, building compiler command lines,
//! and fetching archives are all external to this crate: the solver's output
//! is consumed through [`SourceMap::build`], and compiler invocation
//! consumes the dirty verdicts and capabilities exposed here.

mod config;
mod fingerprint;
mod local;
mod manifest;
mod package;
mod project;
mod source;

pub use config::{BuildEnv, HostEnv, PackageConfig, Platform};
pub use fingerprint::{
    BuildCache, CacheError, CacheRefresh, CacheStore, Fingerprint, CACHE_DIR, CACHE_FILE,
};
pub use local::{find_manifest, LocalPackage, ResolveError};
pub use manifest::{
    BuildType, ComponentDecl, Dependency, DependencySpec, FlagDecl, LibraryDecl, Manifest,
    ManifestError, PackageDecl, APP_DIR, BENCHES_DIR, MANIFEST_EXT, SOURCE_DIR, SOURCE_EXT,
    TESTS_DIR,
};
pub use package::{
    CapabilityError, FilesCapability, ModulesCapability, OptionsCapability, Package,
    PackageIdentifier,
};
pub use project::{Project, ProjectError, ProjectManifest, ProjectSection, PROJECT_FILE};
pub use source::{
    InstallLocation, PackageSource, SourceMap, UpstreamCandidate, UpstreamPackage,
};

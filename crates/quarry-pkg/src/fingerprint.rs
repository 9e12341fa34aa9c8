//! File fingerprints and the per-package build cache.
//!
//! A [`Fingerprint`] records one file's state (mtime, size, content hash) as
//! of the last successful build; a [`BuildCache`] is the map of fingerprints
//! for a package's whole file set. Diffing the cache against the live file
//! set yields the package's dirty verdict.
//!
//! The check is tiered: mtime and size are compared first, and the content
//! hash is only recomputed when they disagree. A file that was touched but
//! not edited therefore stays clean, and its cache entry is rewritten with
//! the new metadata so later runs skip the rehash.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::io;
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Directory under a package root holding build-tool state.
pub const CACHE_DIR: &str = ".quarry";

/// Build cache filename within [`CACHE_DIR`].
pub const CACHE_FILE: &str = "build-cache.json";

/// Errors that can occur while fingerprinting or persisting the cache.
///
/// None of these may be treated as "clean": a missed rebuild is worse than a
/// spurious one.
#[derive(Error, Debug)]
pub enum CacheError {
    /// The live file set was empty. A package with nothing to fingerprint is
    /// a configuration anomaly, not a clean package.
    #[error("package has no files to fingerprint")]
    NoFiles,

    #[error("failed to fingerprint {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("failed to persist build cache at {path}: {source}")]
    Store {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("corrupt build cache at {path}: {source}")]
    Corrupt {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
}

/// Recorded state of one file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Fingerprint {
    /// Modification time, sub-second precision.
    pub mtime: DateTime<Utc>,

    /// File size in bytes.
    pub size: u64,

    /// SHA-256 of the file contents, hex encoded.
    pub hash: String,
}

impl Fingerprint {
    /// Fingerprint a file, reading its contents to hash them.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be statted or read.
    pub fn of_file(path: &Path) -> Result<Self, CacheError> {
        let (mtime, size) = stat(path)?;
        let hash = hash_file(path)?;
        Ok(Self { mtime, size, hash })
    }
}

fn stat(path: &Path) -> Result<(DateTime<Utc>, u64), CacheError> {
    let metadata = std::fs::metadata(path).map_err(|source| CacheError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    let modified = metadata.modified().map_err(|source| CacheError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    Ok((DateTime::<Utc>::from(modified), metadata.len()))
}

fn hash_file(path: &Path) -> Result<String, CacheError> {
    use sha2::{Digest, Sha256};
    let contents = std::fs::read(path).map_err(|source| CacheError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    let mut hasher = Sha256::new();
    hasher.update(&contents);
    Ok(hex::encode(hasher.finalize()))
}

/// A package's recorded fingerprints from the last successful build.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct BuildCache {
    files: BTreeMap<PathBuf, Fingerprint>,
}

/// Result of diffing a [`BuildCache`] against the live file set.
#[derive(Debug, Clone)]
pub struct CacheRefresh {
    /// The updated cache, one entry per live file.
    pub cache: BuildCache,

    /// Whether anything changed: an added, edited, or removed file.
    pub dirty: bool,
}

impl BuildCache {
    /// An empty cache, as before the first build.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns true if no fingerprints are recorded.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.files.is_empty()
    }

    /// Number of recorded fingerprints.
    #[must_use]
    pub fn len(&self) -> usize {
        self.files.len()
    }

    /// Look up the recorded fingerprint for a path.
    #[must_use]
    pub fn get(&self, path: &Path) -> Option<&Fingerprint> {
        self.files.get(path)
    }

    /// Iterate over recorded entries.
    pub fn iter(&self) -> impl Iterator<Item = (&PathBuf, &Fingerprint)> {
        self.files.iter()
    }

    /// Diff this cache against the current file set.
    ///
    /// Per file: no prior entry means the file is new (dirty). With a prior
    /// entry, matching mtime and size means clean with the entry kept
    /// verbatim; otherwise the content is rehashed, and a matching hash
    /// means clean with the entry rewritten to the new metadata, while a
    /// differing hash means dirty. Prior entries whose file is gone force
    /// dirty and are dropped.
    ///
    /// # Errors
    ///
    /// Returns [`CacheError::NoFiles`] for an empty file set, or an I/O
    /// error if any file cannot be statted or read. An unreadable file is
    /// never reported clean.
    pub fn refresh(&self, files: &BTreeSet<PathBuf>) -> Result<CacheRefresh, CacheError> {
        if files.is_empty() {
            return Err(CacheError::NoFiles);
        }

        let mut updated = BTreeMap::new();
        let mut dirty = false;

        for path in files {
            match self.files.get(path) {
                None => {
                    dirty = true;
                    updated.insert(path.clone(), Fingerprint::of_file(path)?);
                }
                Some(prior) => {
                    let (mtime, size) = stat(path)?;
                    if mtime == prior.mtime && size == prior.size {
                        updated.insert(path.clone(), prior.clone());
                    } else {
                        let hash = hash_file(path)?;
                        if hash != prior.hash {
                            dirty = true;
                        }
                        // Record the new metadata either way so a touched
                        // file is not rehashed on the next run.
                        updated.insert(path.clone(), Fingerprint { mtime, size, hash });
                    }
                }
            }
        }

        // Removals: anything recorded that is no longer in the file set.
        if self.files.keys().any(|path| !files.contains(path)) {
            dirty = true;
        }

        Ok(CacheRefresh {
            cache: Self { files: updated },
            dirty,
        })
    }
}

impl FromIterator<(PathBuf, Fingerprint)> for BuildCache {
    fn from_iter<T: IntoIterator<Item = (PathBuf, Fingerprint)>>(iter: T) -> Self {
        Self {
            files: iter.into_iter().collect(),
        }
    }
}

/// Persisted build-cache store, keyed by package directory.
///
/// Caches live at `<package dir>/.quarry/build-cache.json`. Saving is an
/// atomic hand-off: the new cache is written to a temporary file and then
/// renamed over the old one.
#[derive(Debug, Clone, Copy, Default)]
pub struct CacheStore;

impl CacheStore {
    /// Create a store.
    #[must_use]
    pub fn new() -> Self {
        Self
    }

    /// Path of the cache file for a package directory.
    #[must_use]
    pub fn cache_path(package_dir: &Path) -> PathBuf {
        package_dir.join(CACHE_DIR).join(CACHE_FILE)
    }

    /// Load the recorded cache for a package directory.
    ///
    /// A missing cache file is the first build: an empty cache.
    ///
    /// # Errors
    ///
    /// Returns an error if the file exists but cannot be read or decoded.
    pub fn load(&self, package_dir: &Path) -> Result<BuildCache, CacheError> {
        let path = Self::cache_path(package_dir);
        let content = match std::fs::read_to_string(&path) {
            Ok(content) => content,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(BuildCache::new()),
            Err(source) => return Err(CacheError::Store { path, source }),
        };

        serde_json::from_str(&content).map_err(|source| CacheError::Corrupt { path, source })
    }

    /// Persist a cache for a package directory.
    ///
    /// # Errors
    ///
    /// Returns an error if the cache cannot be encoded or written.
    pub fn save(&self, package_dir: &Path, cache: &BuildCache) -> Result<(), CacheError> {
        let path = Self::cache_path(package_dir);
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|source| CacheError::Store {
                path: path.clone(),
                source,
            })?;
        }

        let content = serde_json::to_string_pretty(cache).map_err(|source| CacheError::Corrupt {
            path: path.clone(),
            source,
        })?;

        let tmp = path.with_extension("json.tmp");
        std::fs::write(&tmp, content).map_err(|source| CacheError::Store {
            path: tmp.clone(),
            source,
        })?;
        std::fs::rename(&tmp, &path).map_err(|source| CacheError::Store { path, source })
    }
}

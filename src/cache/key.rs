//! Build input hashing for content-addressed cache keys
//!
//! A cache key is the SHA256 digest of every named build input. Inputs are
//! kept sorted by name so the same inputs always hash the same, regardless
//! of the order they were added in.

use crate::error::{RollgateError, RollgateResult};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::debug;

/// Supported package ecosystems
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Ecosystem {
    /// npm (package-lock.json, npm-shrinkwrap.json)
    Npm,
    /// Yarn (yarn.lock)
    Yarn,
    /// pnpm (pnpm-lock.yaml)
    Pnpm,
    /// Cargo/Rust (Cargo.lock)
    Cargo,
    /// pip/Python (requirements.txt, Pipfile.lock)
    Pip,
    /// Poetry/Python (poetry.lock)
    Poetry,
    /// Go modules (go.sum)
    Go,
}

impl Ecosystem {
    /// Get the lockfile patterns for this ecosystem
    fn lockfile_patterns(&self) -> &'static [&'static str] {
        match self {
            Self::Npm => &["package-lock.json", "npm-shrinkwrap.json"],
            Self::Yarn => &["yarn.lock"],
            Self::Pnpm => &["pnpm-lock.yaml"],
            Self::Cargo => &["Cargo.lock"],
            Self::Pip => &["requirements.txt", "Pipfile.lock"],
            Self::Poetry => &["poetry.lock"],
            Self::Go => &["go.sum"],
        }
    }

    /// All ecosystems in detection priority order
    fn all() -> &'static [Self] {
        &[
            Self::Npm,
            Self::Yarn,
            Self::Pnpm,
            Self::Cargo,
            Self::Pip,
            Self::Poetry,
            Self::Go,
        ]
    }
}

impl fmt::Display for Ecosystem {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Npm => "npm",
            Self::Yarn => "yarn",
            Self::Pnpm => "pnpm",
            Self::Cargo => "cargo",
            Self::Pip => "pip",
            Self::Poetry => "poetry",
            Self::Go => "go",
        };
        write!(f, "{}", name)
    }
}

/// Information about a detected lockfile
#[derive(Debug, Clone)]
pub struct LockfileInfo {
    /// The ecosystem this lockfile belongs to
    pub ecosystem: Ecosystem,
    /// Path to the lockfile
    pub path: PathBuf,
    /// SHA256 hex digest of the lockfile contents
    pub digest: String,
}

/// Content-addressed cache key
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CacheKey(String);

impl CacheKey {
    /// Use an existing string as a key verbatim
    pub fn new(key: impl Into<String>) -> Self {
        Self(key.into())
    }

    /// The key as a string
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Shortened form for display
    pub fn short(&self) -> &str {
        self.0
            .char_indices()
            .nth(12)
            .map_or(&self.0[..], |(i, _)| &self.0[..i])
    }
}

impl fmt::Display for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Named inputs that determine a build's output
#[derive(Debug, Clone, Default)]
pub struct BuildInputs {
    digests: BTreeMap<String, String>,
}

impl BuildInputs {
    /// Create an empty input set
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a literal value (build command, toolchain version, ...)
    pub fn value(mut self, name: impl Into<String>, value: impl AsRef<[u8]>) -> Self {
        self.digests
            .insert(format!("value:{}", name.into()), sha256_hex(value.as_ref()));
        self
    }

    /// Add a file's contents
    pub fn file(mut self, path: &Path) -> RollgateResult<Self> {
        let digest = hash_file_contents(path)?;
        self.digests
            .insert(format!("file:{}", path.display()), digest);
        Ok(self)
    }

    /// Add every lockfile detected in a project directory
    pub fn lockfiles(mut self, project_dir: &Path) -> RollgateResult<Self> {
        for info in detect_lockfiles(project_dir)? {
            self.digests
                .insert(format!("lockfile:{}", info.ecosystem), info.digest);
        }
        Ok(self)
    }

    /// Number of inputs recorded
    pub fn len(&self) -> usize {
        self.digests.len()
    }

    /// Whether no inputs were recorded
    pub fn is_empty(&self) -> bool {
        self.digests.is_empty()
    }

    /// Derive the cache key
    pub fn key(&self) -> CacheKey {
        let mut hasher = Sha256::new();
        for (name, digest) in &self.digests {
            hasher.update(name.as_bytes());
            hasher.update([0u8]);
            hasher.update(digest.as_bytes());
            hasher.update([b'\n']);
        }
        CacheKey(hex::encode(hasher.finalize()))
    }
}

/// SHA256 hex digest of a byte slice
pub fn sha256_hex(bytes: &[u8]) -> String {
    hex::encode(Sha256::digest(bytes))
}

/// Hash a file's contents using SHA256
fn hash_file_contents(path: &Path) -> RollgateResult<String> {
    let contents = fs::read(path).map_err(|e| RollgateError::CacheInputRead {
        path: path.display().to_string(),
        reason: e.to_string(),
    })?;

    Ok(sha256_hex(&contents))
}

/// Detect all lockfiles in a project directory
///
/// Scans the project root for known lockfile patterns and returns
/// information about each detected lockfile, including a content digest.
pub fn detect_lockfiles(project_dir: &Path) -> RollgateResult<Vec<LockfileInfo>> {
    let mut lockfiles = Vec::new();

    for ecosystem in Ecosystem::all() {
        for pattern in ecosystem.lockfile_patterns() {
            let lockfile_path = project_dir.join(pattern);
            if lockfile_path.is_file() {
                debug!("Found {} lockfile: {}", ecosystem, lockfile_path.display());

                let digest = hash_file_contents(&lockfile_path)?;
                lockfiles.push(LockfileInfo {
                    ecosystem: *ecosystem,
                    path: lockfile_path,
                    digest,
                });

                // Only use first matching lockfile per ecosystem
                break;
            }
        }
    }

    debug!("Detected {} lockfiles", lockfiles.len());
    Ok(lockfiles)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn key_is_order_independent() {
        let a = BuildInputs::new()
            .value("command", "make dist")
            .value("toolchain", "1.82");
        let b = BuildInputs::new()
            .value("toolchain", "1.82")
            .value("command", "make dist");

        assert_eq!(a.key(), b.key());
        assert_eq!(a.key().as_str().len(), 64);
    }

    #[test]
    fn key_changes_with_content() {
        let a = BuildInputs::new().value("command", "make dist");
        let b = BuildInputs::new().value("command", "make release");
        assert_ne!(a.key(), b.key());
    }

    #[test]
    fn file_input_tracks_contents() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("input.txt");

        fs::write(&path, b"content 1").unwrap();
        let first = BuildInputs::new().file(&path).unwrap().key();

        fs::write(&path, b"content 2").unwrap();
        let second = BuildInputs::new().file(&path).unwrap().key();

        assert_ne!(first, second);
    }

    #[test]
    fn missing_file_input_errors() {
        let dir = TempDir::new().unwrap();
        let err = BuildInputs::new()
            .file(&dir.path().join("absent"))
            .unwrap_err();
        assert!(matches!(err, RollgateError::CacheInputRead { .. }));
    }

    #[test]
    fn detect_multiple_ecosystems() {
        let dir = TempDir::new().unwrap();
        fs::write(dir.path().join("package-lock.json"), "{}").unwrap();
        fs::write(dir.path().join("Cargo.lock"), "").unwrap();

        let lockfiles = detect_lockfiles(dir.path()).unwrap();

        assert_eq!(lockfiles.len(), 2);
        let ecosystems: Vec<_> = lockfiles.iter().map(|l| l.ecosystem).collect();
        assert!(ecosystems.contains(&Ecosystem::Npm));
        assert!(ecosystems.contains(&Ecosystem::Cargo));

        let inputs = BuildInputs::new().lockfiles(dir.path()).unwrap();
        assert_eq!(inputs.len(), 2);
    }

    #[test]
    fn detect_empty_dir() {
        let dir = TempDir::new().unwrap();
        assert!(detect_lockfiles(dir.path()).unwrap().is_empty());
        assert!(BuildInputs::new().lockfiles(dir.path()).unwrap().is_empty());
    }

    #[test]
    fn short_key_display() {
        let key = CacheKey::new("abc");
        assert_eq!(key.short(), "abc");
        let long = CacheKey::new("0123456789abcdef");
        assert_eq!(long.short(), "0123456789ab");
    }

    #[test]
    fn short_key_respects_char_boundaries() {
        let key = CacheKey::new("abcdefghijkü-build");
        assert_eq!(key.short(), "abcdefghijkü");
        assert_eq!(CacheKey::new("ü").short(), "ü");
    }
}

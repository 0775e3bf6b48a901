//! Builder configuration.
//!
//! Everything has a default, so a missing `streskit.toml` is fine. A file
//! that exists must parse cleanly; unknown keys are rejected.

use anyhow::{Context, Result};
use serde::Deserialize;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Config file looked up in the invocation directory.
pub const DEFAULT_CONFIG_FILE: &str = "streskit.toml";

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct BuildConfig {
    /// Asset manifest (name → URL).
    pub manifest: PathBuf,
    /// Directory merged on top of the extracted base image.
    pub overlay_dir: PathBuf,
    /// Persistent download cache.
    pub cache_dir: PathBuf,
    /// Scratch tree, recreated every build.
    pub work_dir: PathBuf,
    /// Where the ISO and checksum file land.
    pub output_dir: PathBuf,
    pub checksum_file: String,
    pub product: String,
    pub arch: String,
    pub connect_timeout_secs: u64,
    pub request_timeout_secs: u64,
    /// Whether plan patches are applied. See `PatchPolicy`.
    pub apply_patches: bool,
}

impl Default for BuildConfig {
    fn default() -> Self {
        Self {
            manifest: PathBuf::from("urls.json"),
            overlay_dir: PathBuf::from("porteus"),
            cache_dir: default_cache_dir(),
            work_dir: std::env::temp_dir().join("building"),
            output_dir: PathBuf::from("."),
            checksum_file: "sha256.txt".to_string(),
            product: "StresKit".to_string(),
            arch: "x86_64".to_string(),
            connect_timeout_secs: 5,
            request_timeout_secs: 600,
            apply_patches: true,
        }
    }
}

impl BuildConfig {
    /// Load from an explicit path. The file must exist.
    pub fn load(path: &Path) -> Result<Self> {
        let text = fs::read_to_string(path)
            .with_context(|| format!("reading build config '{}'", path.display()))?;
        Self::from_toml(&text)
            .with_context(|| format!("parsing build config '{}'", path.display()))
    }

    /// Load `streskit.toml` from `dir` when present, defaults otherwise.
    pub fn load_or_default(dir: &Path) -> Result<Self> {
        let path = dir.join(DEFAULT_CONFIG_FILE);
        if path.is_file() {
            Self::load(&path)
        } else {
            Ok(Self::default())
        }
    }

    pub fn from_toml(text: &str) -> Result<Self> {
        let config: Self = toml::from_str(text)?;
        Ok(config)
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_secs)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }
}

fn default_cache_dir() -> PathBuf {
    match dirs::cache_dir() {
        Some(dir) => dir.join("streskit").join("binaries"),
        None => std::env::temp_dir().join("binary_cache"),
    }
}

//! Asset manifest (`urls.json`).
//!
//! ```json
//! {
//!   "porteus": { "url": "https://.../Porteus-OPENBOX-v5.01-x86_64.iso" },
//!   "linpack": { "url": "https://.../l_onemklbench_p_2024.0.0_49515.tgz" }
//! }
//! ```
//!
//! Entries keep file order so a rewrite by the URL refresher produces a
//! minimal diff.

pub mod updater;

use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;

/// Where an asset is downloaded from.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AssetSource {
    pub url: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AssetManifest {
    entries: Vec<(String, AssetSource)>,
}

impl AssetManifest {
    pub fn load(path: &Path) -> Result<Self> {
        let text = fs::read_to_string(path)
            .with_context(|| format!("reading asset manifest '{}'", path.display()))?;
        Self::from_json(&text)
            .with_context(|| format!("parsing asset manifest '{}'", path.display()))
    }

    pub fn from_json(text: &str) -> Result<Self> {
        let raw: serde_json::Map<String, serde_json::Value> = serde_json::from_str(text)?;
        let mut entries = Vec::with_capacity(raw.len());
        for (name, value) in raw {
            let source: AssetSource = serde_json::from_value(value)
                .with_context(|| format!("invalid entry for asset '{name}'"))?;
            entries.push((name, source));
        }
        Ok(Self { entries })
    }

    /// Two-space indented JSON with a trailing newline.
    pub fn to_json_pretty(&self) -> Result<String> {
        let mut raw = serde_json::Map::with_capacity(self.entries.len());
        for (name, source) in &self.entries {
            raw.insert(name.clone(), serde_json::to_value(source)?);
        }
        let mut text = serde_json::to_string_pretty(&raw)?;
        text.push('\n');
        Ok(text)
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        let text = self.to_json_pretty()?;
        fs::write(path, text)
            .with_context(|| format!("writing asset manifest '{}'", path.display()))
    }

    pub fn get(&self, name: &str) -> Option<&AssetSource> {
        self.entries
            .iter()
            .find(|(key, _)| key == name)
            .map(|(_, source)| source)
    }

    /// URL for an asset the build cannot do without.
    pub fn url(&self, name: &str) -> Result<&str> {
        match self.get(name) {
            Some(source) => Ok(&source.url),
            None => bail!("asset '{}' is not listed in the manifest", name),
        }
    }

    /// Fail unless every name in `names` has an entry.
    pub fn require<'a>(&self, names: impl IntoIterator<Item = &'a str>) -> Result<()> {
        let missing: Vec<&str> = names
            .into_iter()
            .filter(|name| self.get(name).is_none())
            .collect();
        if !missing.is_empty() {
            bail!(
                "asset manifest is missing required entries: {}",
                missing.join(", ")
            );
        }
        Ok(())
    }

    /// Replace (or append) the URL for `name`. Returns true when it changed.
    pub fn set_url(&mut self, name: &str, url: &str) -> bool {
        match self.entries.iter_mut().find(|(key, _)| key == name) {
            Some((_, source)) if source.url == url => false,
            Some((_, source)) => {
                source.url = url.to_string();
                true
            }
            None => {
                self.entries.push((
                    name.to_string(),
                    AssetSource {
                        url: url.to_string(),
                    },
                ));
                true
            }
        }
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &AssetSource)> {
        self.entries.iter().map(|(name, source)| (name.as_str(), source))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

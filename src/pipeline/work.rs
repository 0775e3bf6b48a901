use anyhow::{bail, Context, Result};
use std::fs;
use std::path::{Path, PathBuf};

/// Marks a directory as a working tree so a later run may clear it.
const MARKER: &str = ".streskit-work";

/// Scratch directory owned by one build.
///
/// Created fresh at the start of a run. Removed only by [`WorkTree::remove`]
/// after a successful build, so a failed run leaves its tree behind for
/// inspection. The next run clears it, but only if it carries the marker
/// file written by [`WorkTree::create`]; any other non-empty directory at
/// that path is left alone and the build fails.
#[derive(Debug)]
pub struct WorkTree {
    root: PathBuf,
}

impl WorkTree {
    pub fn create(root: &Path) -> Result<Self> {
        if root.exists() {
            if !is_removable(root)? {
                bail!(
                    "refusing to remove '{}': not a streskit working directory",
                    root.display()
                );
            }
            fs::remove_dir_all(root).with_context(|| {
                format!(
                    "removing working directory left by a previous run '{}'",
                    root.display()
                )
            })?;
        }
        fs::create_dir_all(root)
            .with_context(|| format!("creating working directory '{}'", root.display()))?;
        fs::write(root.join(MARKER), "")
            .with_context(|| format!("marking working directory '{}'", root.display()))?;
        Ok(Self {
            root: root.to_path_buf(),
        })
    }

    pub fn path(&self) -> &Path {
        &self.root
    }

    pub fn join(&self, name: &str) -> PathBuf {
        self.root.join(name)
    }

    pub fn remove(self) -> Result<()> {
        fs::remove_dir_all(&self.root)
            .with_context(|| format!("removing working directory '{}'", self.root.display()))
    }
}

/// An empty directory or one this module created.
fn is_removable(root: &Path) -> Result<bool> {
    if !root.is_dir() {
        return Ok(false);
    }
    if root.join(MARKER).is_file() {
        return Ok(true);
    }
    let mut entries =
        fs::read_dir(root).with_context(|| format!("reading directory '{}'", root.display()))?;
    Ok(entries.next().is_none())
}

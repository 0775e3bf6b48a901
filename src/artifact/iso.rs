//! ISO output naming and assembly.
//!
//! The image itself is produced by the packer script shipped inside the base
//! tree (`porteus/make_iso.sh`). This module only decides where the ISO goes
//! and checks that the packer actually left it there.

use anyhow::{bail, Context, Result};
use std::fmt;
use std::path::{Path, PathBuf};

use crate::process::{run_checked, CommandRunner, Invocation};

/// Version used when the caller does not supply one.
pub const UNKNOWN_VERSION: &str = "UNKNOWN";

/// `<product>-v<version>-<arch>.iso`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IsoName {
    pub product: String,
    pub version: String,
    pub arch: String,
}

impl IsoName {
    pub fn new(
        product: impl Into<String>,
        version: impl Into<String>,
        arch: impl Into<String>,
    ) -> Self {
        Self {
            product: product.into(),
            version: version.into(),
            arch: arch.into(),
        }
    }

    pub fn file_name(&self) -> String {
        format!("{}-v{}-{}.iso", self.product, self.version, self.arch)
    }

    /// Absolute output path inside `output_dir`.
    pub fn output_path(&self, output_dir: &Path) -> Result<PathBuf> {
        let dir = if output_dir.is_absolute() {
            output_dir.to_path_buf()
        } else {
            std::env::current_dir()
                .context("Failed to resolve the current directory")?
                .join(output_dir)
        };
        Ok(dir.join(self.file_name()))
    }
}

impl fmt::Display for IsoName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.file_name())
    }
}

/// Run `bash <tree_root>/<packer_script> <output>`.
///
/// Both a non-zero exit and a zero exit that left no file at `output` fail
/// the build.
pub fn assemble(
    runner: &dyn CommandRunner,
    tree_root: &Path,
    packer_script: &str,
    output: &Path,
) -> Result<()> {
    let script = tree_root.join(packer_script);
    if !script.is_file() {
        bail!(
            "packer script not found: {}\n\
             The base image tree does not look like a Porteus ISO.",
            script.display()
        );
    }

    if let Some(parent) = output.parent() {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("Failed to create directory: {}", parent.display()))?;
    }

    let invocation = Invocation::new("bash").arg_path(&script).arg_path(output);
    run_checked(runner, &invocation).context("ISO packer failed")?;

    if !output.exists() {
        bail!(
            "packer exited successfully but no ISO was written to {}",
            output.display()
        );
    }
    Ok(())
}

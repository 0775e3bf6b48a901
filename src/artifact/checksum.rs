//! SHA-256 checksum records for finished artifacts.

use anyhow::{Context, Result};
use sha2::{Digest, Sha256};
use std::fs::{self, File};
use std::io::Read;
use std::path::Path;

const BLOCK_SIZE: usize = 4096;

/// Hex-encoded SHA-256 of a file, read in 4 KiB blocks.
pub fn sha256_file(path: &Path) -> Result<String> {
    let mut file =
        File::open(path).with_context(|| format!("Failed to open {}", path.display()))?;
    let mut hasher = Sha256::new();
    let mut buf = [0u8; BLOCK_SIZE];
    loop {
        let n = file
            .read(&mut buf)
            .with_context(|| format!("Failed to read {}", path.display()))?;
        if n == 0 {
            break;
        }
        hasher.update(&buf[..n]);
    }
    Ok(format!("{:x}", hasher.finalize()))
}

/// `<file name> <hex digest>` for one artifact.
pub fn checksum_record(path: &Path) -> Result<String> {
    let name = path
        .file_name()
        .with_context(|| format!("artifact path has no file name: {}", path.display()))?
        .to_string_lossy();
    Ok(format!("{} {}", name, sha256_file(path)?))
}

/// Overwrite `manifest_path` with one record per artifact.
///
/// Records are separated by `\n` with no trailing newline.
pub fn write_checksum_manifest(artifacts: &[&Path], manifest_path: &Path) -> Result<()> {
    let records = artifacts
        .iter()
        .map(|path| checksum_record(path))
        .collect::<Result<Vec<_>>>()?;
    fs::write(manifest_path, records.join("\n"))
        .with_context(|| format!("Failed to write {}", manifest_path.display()))
}

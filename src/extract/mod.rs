//! Archive extraction.
//!
//! The archive kind always comes from the build plan; nothing here sniffs
//! magic bytes. Tarballs are unpacked in-process. Disk images and zip files
//! go through the external `7z` unarchiver.

use anyhow::{Context, Result};
use flate2::read::GzDecoder;
use std::fs::{self, File};
use std::io::{BufReader, Read};
use std::path::{Path, PathBuf};
use xz2::read::XzDecoder;

use crate::error::ProvisionError;
use crate::process::{run_checked, CommandRunner, Invocation};

/// How an archive is unpacked.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ArchiveKind {
    /// Anything `7z x` understands (ISO images, zip). `excludes` are archive
    /// paths passed as `-x!<path>`.
    SevenZip { excludes: Vec<String> },
    /// gzip-compressed tar.
    TarGz,
    /// xz-compressed tar.
    TarXz,
}

impl ArchiveKind {
    pub fn seven_zip() -> Self {
        ArchiveKind::SevenZip {
            excludes: Vec::new(),
        }
    }
}

/// Unpack `archive` into `dest`, creating `dest` if needed.
pub fn extract(
    runner: &dyn CommandRunner,
    archive: &Path,
    kind: &ArchiveKind,
    dest: &Path,
) -> Result<()> {
    fs::create_dir_all(dest)
        .with_context(|| format!("creating extraction directory '{}'", dest.display()))?;

    match kind {
        ArchiveKind::SevenZip { excludes } => {
            let invocation = Invocation::new("7z")
                .arg("x")
                .arg_path(archive)
                .args(excludes.iter().map(|path| format!("-x!{path}")))
                .arg(format!("-o{}", dest.display()));
            run_checked(runner, &invocation)
                .with_context(|| format!("failed to extract {}", archive.display()))?;
        }
        ArchiveKind::TarGz => {
            let file = open(archive)?;
            unpack_tar(GzDecoder::new(BufReader::new(file)), archive, dest)?;
        }
        ArchiveKind::TarXz => {
            let file = open(archive)?;
            unpack_tar(XzDecoder::new(BufReader::new(file)), archive, dest)?;
        }
    }

    Ok(())
}

fn open(archive: &Path) -> Result<File> {
    File::open(archive).with_context(|| format!("opening archive '{}'", archive.display()))
}

fn unpack_tar<R: Read>(reader: R, archive: &Path, dest: &Path) -> Result<()> {
    let mut tar = tar::Archive::new(reader);
    tar.set_preserve_permissions(true);
    tar.unpack(dest).with_context(|| {
        format!(
            "Failed to unpack {} into {}",
            archive.display(),
            dest.display()
        )
    })
}

/// Resolve the single directory directly under `root` whose name matches
/// `pattern` (shell glob syntax).
///
/// Upstream archives embed their version in the top-level directory name
/// (`benchmarks_2024.0`, `y-cruncher v0.8.3.9533-static`), so the plan only
/// knows a pattern. Zero or several candidates is an error: there is no safe
/// way to pick one.
pub fn resolve_single_dir(root: &Path, pattern: &str) -> Result<PathBuf> {
    let matcher = glob::Pattern::new(pattern)
        .with_context(|| format!("invalid directory pattern '{pattern}'"))?;

    let mut matches = Vec::new();
    for entry in
        fs::read_dir(root).with_context(|| format!("reading directory '{}'", root.display()))?
    {
        let entry = entry?;
        if !entry.file_type()?.is_dir() {
            continue;
        }
        if matcher.matches(&entry.file_name().to_string_lossy()) {
            matches.push(entry.path());
        }
    }
    matches.sort();

    if matches.len() != 1 {
        return Err(ProvisionError::AmbiguousMatch {
            pattern: pattern.to_string(),
            root: root.to_path_buf(),
            matches,
        }
        .into());
    }
    Ok(matches.remove(0))
}

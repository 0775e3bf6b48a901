//! Image tree composition.
//!
//! Two operations build the tree handed to the ISO packer:
//! - [`merge_overlay`] lays the repository's overlay directory over the
//!   extracted base image. The overlay always wins.
//! - [`place`] puts one provisioned tool at its fixed path in the tools
//!   directory.

use anyhow::{bail, Context, Result};
use std::fs;
use std::path::{Path, PathBuf};
use walkdir::WalkDir;

/// How a provisioned item reaches its destination.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Placement {
    /// Copy a single file.
    Copy,
    /// Copy a directory recursively.
    CopyTree,
    /// Move a file or directory (rename, or copy then delete across
    /// filesystems). The source is gone afterwards.
    Move,
}

/// Recursively copy `overlay` on top of `base`.
///
/// Files present in both trees take the overlay's content, directories are
/// unioned, and a type conflict (file vs directory) resolves to whatever the
/// overlay has. Symlinks are copied as links.
pub fn merge_overlay(overlay: &Path, base: &Path) -> Result<()> {
    if !overlay.is_dir() {
        bail!("overlay directory not found: {}", overlay.display());
    }
    fs::create_dir_all(base)
        .with_context(|| format!("Failed to create directory: {}", base.display()))?;

    for entry in WalkDir::new(overlay)
        .min_depth(1)
        .follow_links(false)
        .sort_by_file_name()
    {
        let entry = entry.with_context(|| format!("walking overlay {}", overlay.display()))?;
        let rel = entry
            .path()
            .strip_prefix(overlay)
            .context("overlay entry outside overlay root")?;
        let dst = base.join(rel);
        let file_type = entry.file_type();

        if file_type.is_dir() {
            if dst.is_symlink() || (dst.exists() && !dst.is_dir()) {
                remove_any(&dst)?;
            }
            fs::create_dir_all(&dst)
                .with_context(|| format!("Failed to create directory: {}", dst.display()))?;
        } else if file_type.is_symlink() {
            let target = fs::read_link(entry.path())?;
            remove_any(&dst)?;
            std::os::unix::fs::symlink(&target, &dst)
                .with_context(|| format!("Failed to create symlink: {}", dst.display()))?;
        } else {
            // fs::copy writes through an existing symlink, so clear it first.
            if dst.is_symlink() || dst.is_dir() {
                remove_any(&dst)?;
            }
            fs::copy(entry.path(), &dst)
                .with_context(|| format!("Failed to copy file: {}", entry.path().display()))?;
        }
    }

    Ok(())
}

/// Put `item` at `dest_root/relative` using `placement`.
///
/// `relative` is the full destination path of the item, not a directory to
/// drop it into. Missing parents are created. Returns the final path.
pub fn place(item: &Path, relative: &str, dest_root: &Path, placement: Placement) -> Result<PathBuf> {
    let dst = dest_root.join(relative);
    if let Some(parent) = dst.parent() {
        fs::create_dir_all(parent)
            .with_context(|| format!("Failed to create directory: {}", parent.display()))?;
    }

    match placement {
        Placement::Copy => {
            if !item.is_file() {
                bail!("file not found: {}", item.display());
            }
            fs::copy(item, &dst).with_context(|| {
                format!("Failed to copy {} to {}", item.display(), dst.display())
            })?;
        }
        Placement::CopyTree => {
            if !item.is_dir() {
                bail!("directory not found: {}", item.display());
            }
            copy_dir_recursive(item, &dst)?;
        }
        Placement::Move => {
            if !item.exists() {
                bail!("path not found: {}", item.display());
            }
            move_path(item, &dst)?;
        }
    }

    Ok(dst)
}

/// Recursively copy a directory, preserving symlinks.
pub fn copy_dir_recursive(src: &Path, dst: &Path) -> Result<()> {
    if !dst.exists() {
        fs::create_dir_all(dst)
            .with_context(|| format!("Failed to create directory: {}", dst.display()))?;
    }

    for entry in
        fs::read_dir(src).with_context(|| format!("Failed to read directory: {}", src.display()))?
    {
        let entry = entry?;
        let src_path = entry.path();
        let dst_path = dst.join(entry.file_name());

        let file_type = entry.file_type()?;

        if file_type.is_symlink() {
            let target = fs::read_link(&src_path)?;
            if dst_path.exists() || dst_path.is_symlink() {
                fs::remove_file(&dst_path)?;
            }
            std::os::unix::fs::symlink(&target, &dst_path)
                .with_context(|| format!("Failed to create symlink: {}", dst_path.display()))?;
        } else if file_type.is_dir() {
            copy_dir_recursive(&src_path, &dst_path)?;
        } else {
            fs::copy(&src_path, &dst_path)
                .with_context(|| format!("Failed to copy file: {}", src_path.display()))?;
        }
    }

    Ok(())
}

/// Rename, falling back to copy+delete when `src` and `dst` are on
/// different filesystems.
/// `EXDEV` on Linux: rename across filesystems.
const EXDEV: i32 = 18;

/// Rename, falling back to copy and remove only when `src` and `dst` are on
/// different filesystems.
fn move_path(src: &Path, dst: &Path) -> Result<()> {
    match fs::rename(src, dst) {
        Ok(()) => return Ok(()),
        Err(err) if err.raw_os_error() == Some(EXDEV) => {}
        Err(err) => {
            return Err(err).with_context(|| {
                format!("Failed to move {} to {}", src.display(), dst.display())
            })
        }
    }

    let meta = fs::symlink_metadata(src)?;
    if meta.is_dir() {
        copy_dir_recursive(src, dst)?;
        fs::remove_dir_all(src)
            .with_context(|| format!("Failed to remove {}", src.display()))?;
    } else {
        fs::copy(src, dst)
            .with_context(|| format!("Failed to copy {} to {}", src.display(), dst.display()))?;
        fs::remove_file(src).with_context(|| format!("Failed to remove {}", src.display()))?;
    }
    Ok(())
}

fn remove_any(path: &Path) -> Result<()> {
    let Ok(meta) = fs::symlink_metadata(path) else {
        return Ok(());
    };
    if meta.is_dir() {
        fs::remove_dir_all(path)
    } else {
        fs::remove_file(path)
    }
    .with_context(|| format!("Failed to remove {}", path.display()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;
    use tempfile::TempDir;

    /// Relative path → content for every regular file under `root`.
    fn snapshot(root: &Path) -> BTreeMap<String, String> {
        WalkDir::new(root)
            .into_iter()
            .filter_map(Result::ok)
            .filter(|e| e.file_type().is_file())
            .map(|e| {
                let rel = e.path().strip_prefix(root).unwrap().display().to_string();
                (rel, fs::read_to_string(e.path()).unwrap())
            })
            .collect()
    }

    #[test]
    fn test_overlay_wins_on_conflict() {
        let temp = TempDir::new().unwrap();
        let base = temp.path().join("base");
        let overlay = temp.path().join("overlay");
        fs::create_dir_all(&base).unwrap();
        fs::create_dir_all(&overlay).unwrap();
        fs::write(base.join("a"), "1").unwrap();
        fs::write(overlay.join("a"), "2").unwrap();
        fs::write(overlay.join("b"), "3").unwrap();

        merge_overlay(&overlay, &base).unwrap();

        let expected = BTreeMap::from([
            ("a".to_string(), "2".to_string()),
            ("b".to_string(), "3".to_string()),
        ]);
        assert_eq!(snapshot(&base), expected);
    }

    #[test]
    fn test_directories_are_unioned() {
        let temp = TempDir::new().unwrap();
        let base = temp.path().join("base");
        let overlay = temp.path().join("overlay");
        fs::create_dir_all(base.join("porteus/rootcopy/etc")).unwrap();
        fs::create_dir_all(overlay.join("porteus/rootcopy/etc")).unwrap();
        fs::write(base.join("porteus/rootcopy/etc/hostname"), "porteus").unwrap();
        fs::write(overlay.join("porteus/rootcopy/etc/motd"), "StresKit").unwrap();

        merge_overlay(&overlay, &base).unwrap();

        let files = snapshot(&base);
        assert_eq!(files["porteus/rootcopy/etc/hostname"], "porteus");
        assert_eq!(files["porteus/rootcopy/etc/motd"], "StresKit");
    }

    #[test]
    fn test_overlay_file_replaces_base_directory() {
        let temp = TempDir::new().unwrap();
        let base = temp.path().join("base");
        let overlay = temp.path().join("overlay");
        fs::create_dir_all(base.join("boot/extra")).unwrap();
        fs::write(base.join("boot/extra/old"), "x").unwrap();
        fs::create_dir_all(overlay.join("boot")).unwrap();
        fs::write(overlay.join("boot/extra"), "now a file").unwrap();

        merge_overlay(&overlay, &base).unwrap();

        assert!(base.join("boot/extra").is_file());
        assert_eq!(fs::read_to_string(base.join("boot/extra")).unwrap(), "now a file");
    }

    #[test]
    fn test_overlay_symlinks_are_preserved() {
        let temp = TempDir::new().unwrap();
        let base = temp.path().join("base");
        let overlay = temp.path().join("overlay");
        fs::create_dir_all(&overlay).unwrap();
        fs::write(overlay.join("make_iso.sh"), "#!/bin/sh\n").unwrap();
        std::os::unix::fs::symlink("make_iso.sh", overlay.join("build")).unwrap();

        merge_overlay(&overlay, &base).unwrap();

        assert!(base.join("build").is_symlink());
        assert_eq!(
            fs::read_link(base.join("build")).unwrap(),
            PathBuf::from("make_iso.sh")
        );
    }

    #[test]
    fn test_missing_overlay_is_an_error() {
        let temp = TempDir::new().unwrap();
        let result = merge_overlay(&temp.path().join("nope"), temp.path());
        assert!(result.is_err());
    }

    #[test]
    fn test_place_copy_keeps_source() {
        let temp = TempDir::new().unwrap();
        let src = temp.path().join("xlinpack_xeon64");
        fs::write(&src, "bin").unwrap();
        let tools = temp.path().join("tools");

        let dst = place(&src, "linpack/xlinpack_xeon64", &tools, Placement::Copy).unwrap();

        assert_eq!(dst, tools.join("linpack/xlinpack_xeon64"));
        assert!(src.exists());
        assert_eq!(fs::read_to_string(dst).unwrap(), "bin");
    }

    #[test]
    fn test_place_copy_tree() {
        let temp = TempDir::new().unwrap();
        let src = temp.path().join("y-cruncher v0.8.3-static");
        fs::create_dir_all(src.join("Binaries")).unwrap();
        fs::write(src.join("y-cruncher"), "launcher").unwrap();
        fs::write(src.join("Binaries/18-CNL"), "kernel").unwrap();
        let tools = temp.path().join("tools");

        place(&src, "ycruncher", &tools, Placement::CopyTree).unwrap();

        let files = snapshot(&tools.join("ycruncher"));
        assert_eq!(files.len(), 2);
        assert_eq!(files["Binaries/18-CNL"], "kernel");
    }

    #[test]
    fn test_place_move_removes_source() {
        let temp = TempDir::new().unwrap();
        let src = temp.path().join("FIRESTARTER");
        fs::create_dir_all(&src).unwrap();
        fs::write(src.join("FIRESTARTER"), "bin").unwrap();
        let tools = temp.path().join("tools");

        place(&src, "FIRESTARTER", &tools, Placement::Move).unwrap();

        assert!(!src.exists());
        assert!(tools.join("FIRESTARTER/FIRESTARTER").is_file());
    }

    #[test]
    fn test_place_move_into_non_empty_destination_fails() {
        let temp = TempDir::new().unwrap();
        let src = temp.path().join("FIRESTARTER");
        fs::create_dir_all(&src).unwrap();
        fs::write(src.join("FIRESTARTER"), "bin").unwrap();
        let tools = temp.path().join("tools");
        fs::create_dir_all(tools.join("FIRESTARTER")).unwrap();
        fs::write(tools.join("FIRESTARTER/other"), "keep").unwrap();

        let err = place(&src, "FIRESTARTER", &tools, Placement::Move).unwrap_err();

        assert!(format!("{err:#}").contains("Failed to move"));
        assert!(src.join("FIRESTARTER").is_file());
        assert!(!tools.join("FIRESTARTER/FIRESTARTER").exists());
    }

    #[test]
    fn test_place_rejects_wrong_shape() {
        let temp = TempDir::new().unwrap();
        let dir = temp.path().join("dir");
        fs::create_dir_all(&dir).unwrap();
        let tools = temp.path().join("tools");

        assert!(place(&dir, "x", &tools, Placement::Copy).is_err());
        assert!(place(&dir.join("missing"), "y", &tools, Placement::Move).is_err());
    }
}

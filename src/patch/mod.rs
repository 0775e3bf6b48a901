//! In-place binary patching with an exact-match safety gate.
//!
//! A patch is a byte sequence to find and an equally long sequence to write
//! over it. The search must find the pattern exactly `required_matches`
//! times (one, for every patch the plan ships) or nothing is written. This
//! keeps an upstream layout change from turning into a silently corrupted
//! binary.

use anyhow::{bail, Context, Result};
use std::fs;
use std::path::Path;

use crate::error::ProvisionError;

/// Linpack calls a CPU vendor check that refuses to run the optimized code
/// path on non-Intel parts. `call <rel32>` (`e8 f2 30 ..`) becomes
/// `mov eax, 1` (`b8 01 00 ..`) so the check always passes.
pub const LINPACK_SEARCH_HEX: &str = "e8f230";
pub const LINPACK_REPLACEMENT_HEX: &str = "b80100";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PatchSpec {
    search: Vec<u8>,
    replacement: Vec<u8>,
    required_matches: usize,
}

impl PatchSpec {
    pub fn new(search: Vec<u8>, replacement: Vec<u8>) -> Result<Self> {
        if search.is_empty() {
            bail!("patch search pattern must not be empty");
        }
        if search.len() != replacement.len() {
            bail!(
                "patch replacement is {} byte(s) but search pattern is {} byte(s)",
                replacement.len(),
                search.len()
            );
        }
        Ok(Self {
            search,
            replacement,
            required_matches: 1,
        })
    }

    pub fn from_hex(search: &str, replacement: &str) -> Result<Self> {
        let search =
            hex::decode(search).with_context(|| format!("invalid search pattern '{search}'"))?;
        let replacement = hex::decode(replacement)
            .with_context(|| format!("invalid replacement pattern '{replacement}'"))?;
        Self::new(search, replacement)
    }

    pub fn linpack() -> Self {
        Self {
            search: vec![0xe8, 0xf2, 0x30],
            replacement: vec![0xb8, 0x01, 0x00],
            required_matches: 1,
        }
    }

    pub fn search(&self) -> &[u8] {
        &self.search
    }

    pub fn replacement(&self) -> &[u8] {
        &self.replacement
    }

    pub fn required_matches(&self) -> usize {
        self.required_matches
    }
}

/// Byte offsets of every non-overlapping occurrence of `needle`, scanning
/// left to right.
///
/// Offsets are whole-byte positions. A pattern that only shows up when the
/// buffer is read as hex text starting mid-byte (`0e 8f 23 0..` contains the
/// text `e8f230`) is not an occurrence.
pub fn find_matches(haystack: &[u8], needle: &[u8]) -> Vec<usize> {
    let mut offsets = Vec::new();
    if needle.is_empty() || needle.len() > haystack.len() {
        return offsets;
    }
    let mut pos = 0;
    while pos + needle.len() <= haystack.len() {
        if &haystack[pos..pos + needle.len()] == needle {
            offsets.push(pos);
            pos += needle.len();
        } else {
            pos += 1;
        }
    }
    offsets
}

/// Patch a buffer in place. Returns the offset that was rewritten.
///
/// On a match-count mismatch the buffer is untouched and the error carries
/// the observed count.
pub fn patch_bytes(bytes: &mut [u8], spec: &PatchSpec, path: &Path) -> Result<usize> {
    let matches = find_matches(bytes, &spec.search);
    if matches.len() != spec.required_matches {
        return Err(ProvisionError::PatchMatchCount {
            path: path.to_path_buf(),
            pattern: hex::encode(&spec.search),
            found: matches.len(),
            expected: spec.required_matches,
        }
        .into());
    }

    for &offset in &matches {
        bytes[offset..offset + spec.replacement.len()].copy_from_slice(&spec.replacement);
    }
    Ok(matches[0])
}

/// Read `path`, patch it, and write it back. The file is only rewritten
/// when the safety gate passes.
pub fn apply(path: &Path, spec: &PatchSpec) -> Result<usize> {
    let mut bytes =
        fs::read(path).with_context(|| format!("reading patch target '{}'", path.display()))?;
    let offset = patch_bytes(&mut bytes, spec, path)?;
    fs::write(path, &bytes)
        .with_context(|| format!("writing patched binary '{}'", path.display()))?;
    Ok(offset)
}

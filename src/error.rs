//! Fatal error classes raised by the provisioning pipeline.
//!
//! Everything else (I/O, parse errors) travels as plain `anyhow` context.
//! These variants are the failures an operator has to act on, and they are
//! kept typed so callers can `downcast_ref` them out of an `anyhow::Error`.

use std::path::PathBuf;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ProvisionError {
    /// The transport could not complete the request (DNS, TLS, timeout...).
    #[error("download of {url} failed: {message}")]
    Transport { url: String, message: String },

    /// The server answered, but not with a 2xx status.
    #[error("download of {url} failed with HTTP {status}: {body}")]
    HttpStatus {
        url: String,
        status: u16,
        body: String,
    },

    /// A glob that must pick a single extracted directory did not.
    #[error(
        "expected exactly one directory matching '{pattern}' under {}, found {}{}",
        root.display(),
        matches.len(),
        format_matches(matches)
    )]
    AmbiguousMatch {
        pattern: String,
        root: PathBuf,
        matches: Vec<PathBuf>,
    },

    /// The binary patch pattern did not occur exactly as often as required.
    #[error(
        "refusing to patch {}: pattern {pattern} occurs {found} time(s), expected {expected}",
        path.display()
    )]
    PatchMatchCount {
        path: PathBuf,
        pattern: String,
        found: usize,
        expected: usize,
    },

    /// An external command exited unsuccessfully. `output` is its stderr,
    /// or its stdout when stderr was empty.
    #[error("command `{command}` failed with {status}{}", format_output(output))]
    CommandFailed {
        command: String,
        status: String,
        output: String,
    },
}

fn format_matches(matches: &[PathBuf]) -> String {
    if matches.is_empty() {
        return String::new();
    }
    let listed = matches
        .iter()
        .map(|p| p.display().to_string())
        .collect::<Vec<_>>()
        .join(", ");
    format!(" ({listed})")
}

fn format_output(output: &str) -> String {
    let trimmed = output.trim();
    if trimmed.is_empty() {
        String::new()
    } else {
        format!("\n{trimmed}")
    }
}

//! Preflight checks for build validation.
//!
//! Validates that the host has the external tools the build shells out to
//! before anything is downloaded. A missing `7z` is much cheaper to report
//! up front than after a 300 MB Porteus download.
//!
//! # Example
//!
//! ```rust
//! use streskit::preflight::{command_exists, check_required_tools};
//!
//! if !command_exists("7z") {
//!     println!("p7zip not installed");
//! }
//!
//! let tools = &[("bash", "bash"), ("make", "make")];
//! if let Err(e) = check_required_tools(tools) {
//!     eprintln!("{}", e);
//! }
//! ```

use anyhow::{bail, Result};

/// Check if a command exists in `PATH`.
pub fn command_exists(cmd: &str) -> bool {
    which::which(cmd).is_ok()
}

/// Host tools needed by every build. Each tuple is (command_name, package_name).
pub const REQUIRED_TOOLS: &[(&str, &str)] = &[("bash", "bash"), ("make", "make")];

/// Needed when the plan contains disk images or zip archives.
pub const UNARCHIVER: (&str, &str) = ("7z", "p7zip-full");

/// Check that specific tools are available.
///
/// # Returns
///
/// * `Ok(())` if all tools are found
/// * `Err` with list of missing tools and their packages
pub fn check_required_tools(tools: &[(&str, &str)]) -> Result<()> {
    let missing: Vec<_> = tools
        .iter()
        .filter(|(tool, _)| !command_exists(tool))
        .collect();

    if !missing.is_empty() {
        let msg = missing
            .iter()
            .map(|(t, p)| format!("  {} (install: {})", t, p))
            .collect::<Vec<_>>()
            .join("\n");
        bail!("Missing required host tools:\n{}", msg);
    }

    Ok(())
}

/// Tools needed for a build, given whether it uses the unarchiver.
pub fn build_tools(needs_unarchiver: bool) -> Vec<(&'static str, &'static str)> {
    let mut tools = REQUIRED_TOOLS.to_vec();
    if needs_unarchiver {
        tools.push(UNARCHIVER);
    }
    tools
}

//! Upstream URL refresher.
//!
//! Looks up the newest published archive for the tools whose download
//! location changes with every release and rewrites the manifest entry when
//! it moved. Each lookup is independent: one failing upstream only costs
//! that tool its update.

use anyhow::{anyhow, bail, Context, Result};
use regex::Regex;
use reqwest::Url;
use serde::Deserialize;
use std::fs::OpenOptions;
use std::io::Write;
use std::path::Path;
use std::time::Duration;

use super::AssetManifest;
use crate::error::ProvisionError;
use crate::fetch::Transport;
use crate::logging::BuildLog;

pub const PORTEUS_LISTING: &str = "https://ftp.nluug.nl/os/Linux/distr/porteus/x86_64/current/";
pub const PRIME95_ROOT: &str = "https://www.mersenne.org/download/software/";
pub const YCRUNCHER_RELEASES: &str = "https://api.github.com/repos/Mysticial/y-cruncher/releases";
pub const FIRESTARTER_RELEASES: &str =
    "https://api.github.com/repos/tud-zih-energy/FIRESTARTER/releases";

/// Delay between consecutive requests to mersenne.org.
const PRIME95_PAUSE: Duration = Duration::from_millis(100);

#[derive(Debug, Deserialize)]
struct Release {
    assets: Vec<ReleaseAsset>,
}

#[derive(Debug, Deserialize)]
struct ReleaseAsset {
    browser_download_url: String,
}

pub struct UrlUpdater<'a> {
    transport: &'a dyn Transport,
    pause: Duration,
    log: BuildLog,
}

impl<'a> UrlUpdater<'a> {
    pub fn new(transport: &'a dyn Transport, log: BuildLog) -> Self {
        Self {
            transport,
            pause: PRIME95_PAUSE,
            log,
        }
    }

    pub fn with_pause(mut self, pause: Duration) -> Self {
        self.pause = pause;
        self
    }

    /// Run every check against `manifest`. Returns the programs whose URL
    /// changed, in check order.
    pub fn refresh(&self, manifest: &mut AssetManifest) -> Vec<String> {
        // (program name for messages, manifest key, lookup)
        let checks: [(&str, &str, fn(&Self) -> Result<String>); 4] = [
            ("Porteus", "porteus", Self::latest_porteus),
            ("Prime95", "prime95", Self::latest_prime95),
            ("Y-Cruncher", "y-cruncher", Self::latest_ycruncher),
            ("Firestarter", "firestarter", Self::latest_firestarter),
        ];

        let mut updated = Vec::new();
        for (program, asset, lookup) in checks {
            match lookup(self) {
                Ok(url) => {
                    if manifest.set_url(asset, &url) {
                        self.log.info(format!("New {program} version found: {url}"));
                        updated.push(program.to_string());
                    } else {
                        self.log.info(format!("{program} is up-to-date."));
                    }
                }
                Err(err) => self.log.warn(format!("{program} check has failed: {err:#}")),
            }
        }
        updated
    }

    /// First `OPENBOX` image in the Porteus mirror listing.
    pub fn latest_porteus(&self) -> Result<String> {
        let html = self.get_text(PORTEUS_LISTING)?;
        let base = parse_url(PORTEUS_LISTING)?;
        let href = hrefs(&html)?
            .into_iter()
            .find(|href| href.contains("OPENBOX"))
            .context("no OPENBOX image in the Porteus listing")?;
        Ok(base.join(&href)?.to_string())
    }

    /// Walks `v<major>/` → `<MM>.<minor>/` → `p95v<MM><mm>b<patch>` and
    /// takes the highest number at each level.
    pub fn latest_prime95(&self) -> Result<String> {
        let root = parse_url(PRIME95_ROOT)?;
        let html = self.get_text(root.as_str())?;
        let major = highest_link(&root, &html, r"^v(\d+)/$")?;
        let major_dir = root.join(&format!("v{major}/"))?;

        std::thread::sleep(self.pause);
        let html = self.get_text(major_dir.as_str())?;
        let major = format!("{major:02}");
        let minor = highest_link(&major_dir, &html, &format!(r"^{major}\.(\d+)/$"))?;
        let minor_dir = major_dir.join(&format!("{major}.{minor}/"))?;

        std::thread::sleep(self.pause);
        let html = self.get_text(minor_dir.as_str())?;
        let minor = format!("{minor:02}");
        let patch = highest_link(
            &minor_dir,
            &html,
            &format!(r"^p95v{major}{minor}b(\d+)\.linux64\.tar\.gz$"),
        )?;

        Ok(minor_dir
            .join(&format!("p95v{major}{minor}b{patch:02}.linux64.tar.gz"))?
            .to_string())
    }

    pub fn latest_ycruncher(&self) -> Result<String> {
        self.first_release_asset(YCRUNCHER_RELEASES, |url| url.contains("static"))
    }

    pub fn latest_firestarter(&self) -> Result<String> {
        self.first_release_asset(FIRESTARTER_RELEASES, |url| url.ends_with(".tar.gz"))
    }

    /// First download URL, newest release first, that satisfies `pick`.
    fn first_release_asset(&self, api_url: &str, pick: impl Fn(&str) -> bool) -> Result<String> {
        let body = self.get_text(api_url)?;
        let releases: Vec<Release> = serde_json::from_str(&body)
            .with_context(|| format!("parsing release list from {api_url}"))?;
        releases
            .into_iter()
            .flat_map(|release| release.assets)
            .map(|asset| asset.browser_download_url)
            .find(|url| pick(url))
            .ok_or_else(|| anyhow!("no matching release asset at {api_url}"))
    }

    fn get_text(&self, url: &str) -> Result<String> {
        self.log.debug(format!("GET {url}"));
        let response = self.transport.get(url).map_err(|err| ProvisionError::Transport {
            url: url.to_string(),
            message: format!("{err:#}"),
        })?;
        if !response.is_success() {
            return Err(ProvisionError::HttpStatus {
                url: url.to_string(),
                status: response.status,
                body: response.text(),
            }
            .into());
        }
        Ok(response.text())
    }
}

fn parse_url(url: &str) -> Result<Url> {
    Url::parse(url).with_context(|| format!("invalid URL '{url}'"))
}

/// Raw `href` attribute values in document order.
fn hrefs(html: &str) -> Result<Vec<String>> {
    let re = Regex::new(r#"(?i)<a\s[^>]*?href\s*=\s*["']([^"']*)["']"#)
        .context("invalid href pattern")?;
    Ok(re
        .captures_iter(html)
        .map(|caps| caps[1].to_string())
        .collect())
}

/// Highest number captured by `pattern` over the links of a listing page.
///
/// Links are resolved against `page` first and matched on the remainder
/// after the page URL, so relative (`v30/`) and absolute
/// (`/download/software/v30/`) forms behave the same.
fn highest_link(page: &Url, html: &str, pattern: &str) -> Result<u32> {
    let re = Regex::new(pattern).with_context(|| format!("invalid link pattern '{pattern}'"))?;
    let mut best = None;
    for href in hrefs(html)? {
        let Ok(resolved) = page.join(&href) else {
            continue;
        };
        let Some(rest) = resolved.as_str().strip_prefix(page.as_str()) else {
            continue;
        };
        if let Some(caps) = re.captures(rest) {
            if let Ok(n) = caps[1].parse::<u32>() {
                best = best.max(Some(n));
            }
        }
    }
    match best {
        Some(n) => Ok(n),
        None => bail!("no link matching '{pattern}' on {page}"),
    }
}

/// Commit message summarizing a refresh.
pub fn commit_message(updated: &[String]) -> String {
    if updated.is_empty() {
        return "Update URLs".to_string();
    }
    let mut message = String::from("Updated program(s):\n");
    for program in updated {
        message.push_str(&format!("- {program}\n"));
    }
    message
}

/// Append `message` to a GitHub Actions output file as the multi-line
/// output `COMMIT_MESSAGE`.
pub fn write_github_output(path: &Path, message: &str) -> Result<()> {
    let mut file = OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .with_context(|| format!("opening GitHub output file '{}'", path.display()))?;
    writeln!(file, "COMMIT_MESSAGE<<EOF\n{}\nEOF", message.trim_end())
        .with_context(|| format!("writing GitHub output file '{}'", path.display()))
}

/// Load the manifest at `path`, refresh it, and write it back.
/// Returns the commit message.
pub fn update_manifest_file(updater: &UrlUpdater<'_>, path: &Path) -> Result<String> {
    let mut manifest = AssetManifest::load(path)?;
    let updated = updater.refresh(&mut manifest);
    manifest.save(path)?;
    Ok(commit_message(&updated))
}

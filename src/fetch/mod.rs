//! Cache-aware asset downloads.
//!
//! Downloads land in a flat cache directory, one file per asset, named by
//! the build plan (`Porteus.iso`, `linpack.tgz`, ...). A file that exists is
//! trusted as-is: there is no checksum or freshness check. The only way to
//! force a re-download is [`AssetCache::clear`].

use anyhow::{bail, Context, Result};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::error::ProvisionError;
use crate::logging::BuildLog;

const USER_AGENT: &str = concat!("streskit/", env!("CARGO_PKG_VERSION"));

/// Raw response from a [`Transport`].
#[derive(Debug, Clone)]
pub struct Response {
    pub status: u16,
    pub body: Vec<u8>,
}

impl Response {
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }

    pub fn text(&self) -> String {
        String::from_utf8_lossy(&self.body).into_owned()
    }
}

/// Capability for retrieving a URL.
///
/// `Err` means the request never produced a response (DNS, TLS, timeout).
/// A response with a failure status is still `Ok`.
pub trait Transport {
    fn get(&self, url: &str) -> Result<Response>;
}

/// HTTP(S) via a blocking `reqwest` client; `file://` from local disk.
pub struct NetTransport {
    client: reqwest::blocking::Client,
}

impl NetTransport {
    pub fn new(connect_timeout: Duration, request_timeout: Duration) -> Result<Self> {
        let client = reqwest::blocking::Client::builder()
            .user_agent(USER_AGENT)
            .connect_timeout(connect_timeout)
            .timeout(request_timeout)
            .build()
            .context("Failed to create HTTP client")?;
        Ok(Self { client })
    }
}

impl Transport for NetTransport {
    fn get(&self, url: &str) -> Result<Response> {
        if let Some(path) = url.strip_prefix("file://") {
            return read_local(Path::new(path));
        }

        let response = self
            .client
            .get(url)
            .send()
            .with_context(|| format!("HTTP request failed: {url}"))?;
        let status = response.status().as_u16();
        let body = response
            .bytes()
            .with_context(|| format!("reading response body from {url}"))?;
        Ok(Response {
            status,
            body: body.to_vec(),
        })
    }
}

fn read_local(path: &Path) -> Result<Response> {
    if !path.is_file() {
        return Ok(Response {
            status: 404,
            body: format!("{} not found", path.display()).into_bytes(),
        });
    }
    let body = fs::read(path).with_context(|| format!("reading {}", path.display()))?;
    Ok(Response { status: 200, body })
}

/// Persistent download cache rooted at one directory.
#[derive(Debug, Clone)]
pub struct AssetCache {
    root: PathBuf,
}

impl AssetCache {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Deterministic location for a cache entry.
    pub fn entry_path(&self, name: &str) -> Result<PathBuf> {
        validate_name(name)?;
        Ok(self.root.join(name))
    }

    /// Path of a cached entry, if present.
    pub fn lookup(&self, name: &str) -> Result<Option<PathBuf>> {
        let path = self.entry_path(name)?;
        Ok(path.is_file().then_some(path))
    }

    /// Return the local path for `name`, downloading `url` on a miss.
    pub fn fetch(
        &self,
        transport: &dyn Transport,
        name: &str,
        url: &str,
        log: &BuildLog,
    ) -> Result<PathBuf> {
        if let Some(path) = self.lookup(name)? {
            log.info(format!(
                "cached binary {} found... skipping download",
                path.display()
            ));
            return Ok(path);
        }

        let path = self.entry_path(name)?;
        fs::create_dir_all(&self.root)
            .with_context(|| format!("creating cache directory '{}'", self.root.display()))?;

        log.info(format!("downloading {} to {}", url, path.display()));
        let response = transport
            .get(url)
            .map_err(|err| ProvisionError::Transport {
                url: url.to_string(),
                message: format!("{err:#}"),
            })?;

        if !response.is_success() {
            let body = response.text();
            log.error(format!(
                "response failed with status code {} - {}",
                response.status,
                body.trim()
            ));
            return Err(ProvisionError::HttpStatus {
                url: url.to_string(),
                status: response.status,
                body,
            }
            .into());
        }

        fs::write(&path, &response.body)
            .with_context(|| format!("writing cache entry '{}'", path.display()))?;
        log.debug(format!("cached {} bytes", response.body.len()));

        Ok(path)
    }

    /// Delete the whole cache. Returns false when there was nothing to delete.
    pub fn clear(&self, log: &BuildLog) -> Result<bool> {
        if !self.root.exists() {
            log.info("binary cache folder not found... continuing");
            return Ok(false);
        }
        log.info(format!("clearing binary cache {}", self.root.display()));
        fs::remove_dir_all(&self.root)
            .with_context(|| format!("removing cache directory '{}'", self.root.display()))?;
        Ok(true)
    }
}

fn validate_name(name: &str) -> Result<()> {
    if name.is_empty() {
        bail!("cache entry name must not be empty");
    }
    if name.contains('/') || name.contains('\\') || name == "." || name == ".." {
        bail!("cache entry name must be a single path segment: {name}");
    }
    Ok(())
}

//! Builds the StresKit ISO: a Porteus live image carrying a fixed set of
//! CPU and memory stress-testing tools.
//!
//! - **Manifest** - asset name → download URL (`urls.json`), plus the
//!   upstream URL refresher
//! - **Fetch** - download cache keyed by asset, one file per asset
//! - **Extract** - tar.gz / tar.xz in-process, disk images and zips via `7z`
//! - **Patch** - exact-match binary patching
//! - **Compose** - overlay merge and tool placement
//! - **Artifact** - ISO assembly and SHA-256 records
//! - **Pipeline** - runs a [`plan::BuildPlan`] end to end
//!
//! # Architecture
//!
//! ```text
//! urls.json ──► fetch ──► extract ──► patch ──► compose ──► artifact
//!                 │           │                    │            │
//!             Transport   CommandRunner        overlay dir   make_iso.sh
//! ```
//!
//! Network access and external processes sit behind the [`fetch::Transport`]
//! and [`process::CommandRunner`] traits so every stage can be driven by
//! fakes in tests.
//!
//! # Example
//!
//! ```rust,ignore
//! use streskit::{BuildConfig, BuildOptions, BuildPlan, Pipeline};
//! use streskit::fetch::NetTransport;
//! use streskit::manifest::AssetManifest;
//! use streskit::process::SystemRunner;
//!
//! let config = BuildConfig::default();
//! let manifest = AssetManifest::load(&config.manifest)?;
//! let plan = BuildPlan::stresskit();
//! let transport = NetTransport::new(config.connect_timeout(), config.request_timeout())?;
//!
//! let outcome = Pipeline::new(&config, &manifest, &plan, &transport, &SystemRunner)
//!     .run(&BuildOptions::default())?;
//! println!("{}", outcome.iso.display());
//! ```

pub mod artifact;
pub mod compose;
pub mod config;
pub mod error;
pub mod extract;
pub mod fetch;
pub mod logging;
pub mod manifest;
pub mod patch;
pub mod pipeline;
pub mod plan;
pub mod preflight;
pub mod process;

pub use config::BuildConfig;
pub use error::ProvisionError;
pub use pipeline::{BuildOptions, BuildOutcome, PatchPolicy, Pipeline};
pub use plan::BuildPlan;

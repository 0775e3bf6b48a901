//! Image build pipeline.
//!
//! Interprets a [`BuildPlan`] against an asset manifest:
//!
//! 1. clear the download cache (on request)
//! 2. check the manifest covers the plan
//! 3. create the working tree
//! 4. fetch and extract the base image
//! 5. merge the overlay directory into it
//! 6. provision each tool (fetch, extract, locate, build, place, patch)
//! 7. run the packer
//! 8. remove the working tree
//! 9. write the checksum file
//!
//! Any failure returns immediately. Later stages do not run and the working
//! tree stays on disk.

mod work;

pub use work::WorkTree;

use anyhow::{Context, Result};
use std::fs;
use std::path::{Path, PathBuf};

use crate::artifact::{self, IsoName};
use crate::compose;
use crate::config::BuildConfig;
use crate::extract::{self, ArchiveKind};
use crate::fetch::{AssetCache, Transport};
use crate::logging::BuildLog;
use crate::manifest::AssetManifest;
use crate::patch;
use crate::plan::{BuildPlan, ExtractTarget, ToolSpec};
use crate::process::{run_checked, CommandRunner, Invocation};

/// Whether plan patches are written to disk.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PatchPolicy {
    Apply,
    Skip,
}

impl PatchPolicy {
    pub fn from_flag(apply: bool) -> Self {
        if apply {
            PatchPolicy::Apply
        } else {
            PatchPolicy::Skip
        }
    }
}

/// Per-run choices.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BuildOptions {
    pub version: String,
    pub clear_cache: bool,
    pub patches: PatchPolicy,
}

impl Default for BuildOptions {
    fn default() -> Self {
        Self {
            version: artifact::iso::UNKNOWN_VERSION.to_string(),
            clear_cache: false,
            patches: PatchPolicy::Apply,
        }
    }
}

/// What a successful build leaves in the output directory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BuildOutcome {
    pub iso: PathBuf,
    pub checksum_manifest: PathBuf,
}

pub struct Pipeline<'a> {
    config: &'a BuildConfig,
    manifest: &'a AssetManifest,
    plan: &'a BuildPlan,
    transport: &'a dyn Transport,
    runner: &'a dyn CommandRunner,
}

impl<'a> Pipeline<'a> {
    pub fn new(
        config: &'a BuildConfig,
        manifest: &'a AssetManifest,
        plan: &'a BuildPlan,
        transport: &'a dyn Transport,
        runner: &'a dyn CommandRunner,
    ) -> Self {
        Self {
            config,
            manifest,
            plan,
            transport,
            runner,
        }
    }

    pub fn run(&self, options: &BuildOptions) -> Result<BuildOutcome> {
        let log = BuildLog::for_build(&options.version);
        let cache = AssetCache::new(&self.config.cache_dir);

        if options.clear_cache {
            cache.clear(&log)?;
        }

        self.manifest
            .require(self.plan.required_assets())
            .context("asset manifest does not cover the build plan")?;

        let work = WorkTree::create(&self.config.work_dir)?;
        log.debug(format!("working directory {}", work.path().display()));

        let base = &self.plan.base;
        let image_root = work.join(&base.extract_dir);
        {
            let log = log.stage(&base.asset);
            let url = self.manifest.url(&base.asset)?;
            let archive = cache.fetch(self.transport, &base.cache_name, url, &log)?;
            log.info(format!("extracting {}", archive.display()));
            extract::extract(self.runner, &archive, &base.kind, &image_root)?;
        }

        log.info(format!(
            "merging overlay {} into base image",
            self.config.overlay_dir.display()
        ));
        compose::merge_overlay(&self.config.overlay_dir, &image_root)?;

        let tools_dir = image_root.join(&base.tools_dir);
        fs::create_dir_all(&tools_dir)
            .with_context(|| format!("creating tools directory '{}'", tools_dir.display()))?;

        for tool in &self.plan.tools {
            self.provision(tool, &cache, &work, &tools_dir, options, &log.stage(&tool.name))
                .with_context(|| format!("provisioning {}", tool.name))?;
        }

        let name = IsoName::new(&self.config.product, &options.version, &self.config.arch);
        let iso = name.output_path(&self.config.output_dir)?;
        log.info(format!("building {}", iso.display()));
        artifact::assemble(self.runner, &image_root, &base.packer_script, &iso)?;

        log.debug("removing working directory");
        work.remove()?;

        let checksum_manifest = iso
            .parent()
            .context("ISO output path has no parent directory")?
            .join(&self.config.checksum_file);
        artifact::write_checksum_manifest(&[iso.as_path()], &checksum_manifest)?;
        log.info(format!("wrote {}", checksum_manifest.display()));

        Ok(BuildOutcome {
            iso,
            checksum_manifest,
        })
    }

    fn provision(
        &self,
        tool: &ToolSpec,
        cache: &AssetCache,
        work: &WorkTree,
        tools_dir: &Path,
        options: &BuildOptions,
        log: &BuildLog,
    ) -> Result<()> {
        let url = self.manifest.url(&tool.asset)?;
        let archive = cache.fetch(self.transport, &tool.cache_name, url, log)?;

        let extract_root = match &tool.extract_to {
            ExtractTarget::Work(dir) => work.join(dir),
            ExtractTarget::Tools(dir) => tools_dir.join(dir),
        };
        log.info(format!("extracting {}", archive.display()));
        extract::extract(self.runner, &archive, &tool.kind, &extract_root)?;

        let source = match &tool.locate {
            Some(pattern) => extract::resolve_single_dir(&extract_root, pattern)?,
            None => extract_root,
        };

        for step in &tool.build {
            let invocation = Invocation::new(&step.program)
                .args(&step.args)
                .dir(&source);
            log.info(format!("running {invocation}"));
            if step.allow_failure {
                let output = self.runner.run(&invocation)?;
                if !output.success() {
                    log.warn(format!(
                        "{invocation} failed with {}... continuing",
                        output.status_text()
                    ));
                }
            } else {
                run_checked(self.runner, &invocation)?;
            }
        }

        if let Some(step) = &tool.place {
            let placed =
                compose::place(&source.join(&step.from), &step.to, tools_dir, step.mode)?;
            log.debug(format!("placed {}", placed.display()));
        }

        if let Some(step) = &tool.patch {
            let target = tools_dir.join(&step.target);
            match options.patches {
                PatchPolicy::Apply => {
                    let offset = patch::apply(&target, &step.spec)?;
                    log.info(format!(
                        "patched {} at offset {:#x}",
                        target.display(),
                        offset
                    ));
                }
                PatchPolicy::Skip => {
                    log.info(format!("patching disabled... leaving {} as-is", target.display()));
                }
            }
        }

        Ok(())
    }
}

/// Whether any archive in the plan goes through the external `7z`.
pub fn needs_unarchiver(plan: &BuildPlan) -> bool {
    std::iter::once(&plan.base.kind)
        .chain(plan.tools.iter().map(|t| &t.kind))
        .any(|kind| matches!(kind, ArchiveKind::SevenZip { .. }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::compose::Placement;
    use crate::error::ProvisionError;
    use crate::fetch::fake::CannedTransport;
    use crate::patch::PatchSpec;
    use crate::plan::{tool, BaseImage, PACKER_SCRIPT, TOOLS_DIR};
    use crate::process::fake::RecordingRunner;
    use crate::process::CommandOutput;
    use flate2::write::GzEncoder;
    use flate2::Compression;
    use tempfile::TempDir;

    const BASE_URL: &str = "https://fixtures.invalid/base.tgz";
    const MLC_URL: &str = "https://fixtures.invalid/mlc.tgz";
    const LINPACK_URL: &str = "https://fixtures.invalid/linpack.tgz";

    fn tar_gz(files: &[(&str, &[u8])]) -> Vec<u8> {
        let encoder = GzEncoder::new(Vec::new(), Compression::default());
        let mut builder = tar::Builder::new(encoder);
        for (name, data) in files {
            let mut header = tar::Header::new_gnu();
            header.set_size(data.len() as u64);
            header.set_mode(0o755);
            header.set_cksum();
            builder.append_data(&mut header, name, *data).unwrap();
        }
        builder.into_inner().unwrap().finish().unwrap()
    }

    fn base_archive() -> Vec<u8> {
        tar_gz(&[
            ("porteus/make_iso.sh", &b"#!/bin/bash\n"[..]),
            ("porteus/porteus.cfg", &b"base\n"[..]),
        ])
    }

    fn test_config(temp: &TempDir) -> BuildConfig {
        let config = BuildConfig {
            overlay_dir: temp.path().join("overlay"),
            cache_dir: temp.path().join("cache"),
            work_dir: temp.path().join("building"),
            output_dir: temp.path().join("out"),
            ..BuildConfig::default()
        };
        fs::create_dir_all(&config.overlay_dir).unwrap();
        config
    }

    fn test_plan(tools: Vec<ToolSpec>) -> BuildPlan {
        BuildPlan {
            base: BaseImage {
                asset: "porteus".into(),
                cache_name: "Porteus.tgz".into(),
                kind: ArchiveKind::TarGz,
                extract_dir: "iso_contents".into(),
                tools_dir: TOOLS_DIR.into(),
                packer_script: PACKER_SCRIPT.into(),
            },
            tools,
        }
    }

    fn manifest(entries: &[(&str, &str)]) -> AssetManifest {
        let mut manifest = AssetManifest::default();
        for (name, url) in entries {
            manifest.set_url(name, url);
        }
        manifest
    }

    /// Fake runner: the packer copies the composed image root into
    /// `snapshot` and writes a dummy ISO. Build steps answer with `build_code`.
    fn packer_runner(snapshot: PathBuf, build_code: i32) -> RecordingRunner {
        RecordingRunner::with_hook(move |inv| {
            let code = if inv.program == "bash" && inv.args[0].ends_with(PACKER_SCRIPT) {
                let script = Path::new(&inv.args[0]);
                let root = script.parent().unwrap().parent().unwrap();
                compose::copy_dir_recursive(root, &snapshot).unwrap();
                fs::write(&inv.args[1], b"fake iso").unwrap();
                0
            } else {
                build_code
            };
            Ok(CommandOutput {
                code: Some(code),
                stdout: String::new(),
                stderr: if code == 0 { String::new() } else { "build broke".into() },
            })
        })
    }

    #[test]
    fn test_base_only_build() {
        let temp = TempDir::new().unwrap();
        let config = test_config(&temp);
        fs::create_dir_all(config.overlay_dir.join("porteus")).unwrap();
        fs::write(config.overlay_dir.join("porteus/porteus.cfg"), "overlay\n").unwrap();
        let plan = test_plan(Vec::new());
        let manifest = manifest(&[("porteus", BASE_URL)]);
        let transport = CannedTransport::new().respond(BASE_URL, 200, &base_archive());
        let snapshot = temp.path().join("snapshot");
        let runner = packer_runner(snapshot.clone(), 0);

        let options = BuildOptions {
            version: "1.2.3".into(),
            ..BuildOptions::default()
        };
        let outcome = Pipeline::new(&config, &manifest, &plan, &transport, &runner)
            .run(&options)
            .unwrap();

        assert_eq!(outcome.iso, config.output_dir.join("StresKit-v1.2.3-x86_64.iso"));
        assert_eq!(outcome.checksum_manifest, config.output_dir.join("sha256.txt"));
        let record = fs::read_to_string(&outcome.checksum_manifest).unwrap();
        assert!(record.starts_with("StresKit-v1.2.3-x86_64.iso "));
        assert_eq!(
            fs::read_to_string(snapshot.join("porteus/porteus.cfg")).unwrap(),
            "overlay\n"
        );
        assert!(snapshot.join(TOOLS_DIR).is_dir());
        assert!(!config.work_dir.exists());
    }

    #[test]
    fn test_missing_overlay_fails_before_packing() {
        let temp = TempDir::new().unwrap();
        let config = BuildConfig {
            overlay_dir: temp.path().join("no-such-overlay"),
            ..test_config(&temp)
        };
        let plan = test_plan(Vec::new());
        let manifest = manifest(&[("porteus", BASE_URL)]);
        let transport = CannedTransport::new().respond(BASE_URL, 200, &base_archive());
        let runner = packer_runner(temp.path().join("snapshot"), 0);

        let err = Pipeline::new(&config, &manifest, &plan, &transport, &runner)
            .run(&BuildOptions::default())
            .unwrap_err();

        assert!(format!("{err:#}").contains("overlay directory not found"));
        assert!(!runner.calls.borrow().iter().any(|c| c.program == "bash"));
        assert!(!config.output_dir.join("StresKit-vUNKNOWN-x86_64.iso").exists());
        assert!(!config.output_dir.join("sha256.txt").exists());
    }

    #[test]
    fn test_tool_is_placed_and_patched() {
        let temp = TempDir::new().unwrap();
        let config = test_config(&temp);
        let binary: &[u8] = &[0x55, 0xe8, 0xf2, 0x30, 0x00, 0xc3];
        let plan = test_plan(vec![tool("linpack")
            .cache_name("linpack.tgz")
            .locate("benchmarks*")
            .place("linpack/xlinpack_xeon64", "linpack/xlinpack_xeon64", Placement::Copy)
            .patch("linpack/xlinpack_xeon64", PatchSpec::linpack())]);
        let manifest = manifest(&[("porteus", BASE_URL), ("linpack", LINPACK_URL)]);
        let transport = CannedTransport::new()
            .respond(BASE_URL, 200, &base_archive())
            .respond(
                LINPACK_URL,
                200,
                &tar_gz(&[("benchmarks_2024.0/linpack/xlinpack_xeon64", binary)]),
            );
        let snapshot = temp.path().join("snapshot");
        let runner = packer_runner(snapshot.clone(), 0);

        Pipeline::new(&config, &manifest, &plan, &transport, &runner)
            .run(&BuildOptions::default())
            .unwrap();

        let placed = fs::read(snapshot.join(TOOLS_DIR).join("linpack/xlinpack_xeon64")).unwrap();
        assert_eq!(placed, [0x55, 0xb8, 0x01, 0x00, 0x00, 0xc3]);
    }

    #[test]
    fn test_skip_patches_leaves_binary_untouched() {
        let temp = TempDir::new().unwrap();
        let config = test_config(&temp);
        let binary: &[u8] = &[0x55, 0xe8, 0xf2, 0x30, 0x00, 0xc3];
        let plan = test_plan(vec![tool("linpack")
            .cache_name("linpack.tgz")
            .place("xlinpack_xeon64", "linpack/xlinpack_xeon64", Placement::Copy)
            .patch("linpack/xlinpack_xeon64", PatchSpec::linpack())]);
        let manifest = manifest(&[("porteus", BASE_URL), ("linpack", LINPACK_URL)]);
        let transport = CannedTransport::new()
            .respond(BASE_URL, 200, &base_archive())
            .respond(LINPACK_URL, 200, &tar_gz(&[("xlinpack_xeon64", binary)]));
        let snapshot = temp.path().join("snapshot");
        let runner = packer_runner(snapshot.clone(), 0);

        let options = BuildOptions {
            patches: PatchPolicy::Skip,
            ..BuildOptions::default()
        };
        Pipeline::new(&config, &manifest, &plan, &transport, &runner)
            .run(&options)
            .unwrap();

        let placed = fs::read(snapshot.join(TOOLS_DIR).join("linpack/xlinpack_xeon64")).unwrap();
        assert_eq!(placed, binary);
    }

    #[test]
    fn test_build_steps_run_in_source_dir() {
        let temp = TempDir::new().unwrap();
        let config = test_config(&temp);
        let plan = test_plan(vec![tool("imlc")
            .cache_name("mlc.tgz")
            .run("make", &["-j1"])
            .place("Linux/mlc", "mlc", Placement::Move)]);
        let manifest = manifest(&[("porteus", BASE_URL), ("imlc", MLC_URL)]);
        let transport = CannedTransport::new()
            .respond(BASE_URL, 200, &base_archive())
            .respond(MLC_URL, 200, &tar_gz(&[("Linux/mlc", &b"mlc"[..])]));
        let runner = packer_runner(temp.path().join("snapshot"), 0);

        Pipeline::new(&config, &manifest, &plan, &transport, &runner)
            .run(&BuildOptions::default())
            .unwrap();

        let calls = runner.calls.borrow();
        let make = calls.iter().find(|c| c.program == "make").unwrap();
        assert_eq!(make.args, ["-j1"]);
        assert_eq!(make.cwd.as_deref(), Some(config.work_dir.join("imlc").as_path()));
        assert!(temp.path().join("snapshot").join(TOOLS_DIR).join("mlc").is_file());
    }

    #[test]
    fn test_tolerated_build_failure_continues() {
        let temp = TempDir::new().unwrap();
        let config = test_config(&temp);
        let plan = test_plan(vec![tool("s-tui")
            .cache_name("s-tui.tgz")
            .locate("s-tui-master")
            .run_allow_failure("make", &[])
            .place("s-tui", "s-tui", Placement::Move)]);
        let manifest = manifest(&[("porteus", BASE_URL), ("s-tui", MLC_URL)]);
        let transport = CannedTransport::new()
            .respond(BASE_URL, 200, &base_archive())
            .respond(MLC_URL, 200, &tar_gz(&[("s-tui-master/s-tui/s-tui", &b"py"[..])]));
        let runner = packer_runner(temp.path().join("snapshot"), 2);

        let outcome = Pipeline::new(&config, &manifest, &plan, &transport, &runner)
            .run(&BuildOptions::default());
        assert!(outcome.is_ok(), "{outcome:?}");
    }

    #[test]
    fn test_build_failure_aborts_and_keeps_work_tree() {
        let temp = TempDir::new().unwrap();
        let config = test_config(&temp);
        let plan = test_plan(vec![tool("imlc")
            .cache_name("mlc.tgz")
            .run("make", &[])
            .place("Linux/mlc", "mlc", Placement::Move)]);
        let manifest = manifest(&[("porteus", BASE_URL), ("imlc", MLC_URL)]);
        let transport = CannedTransport::new()
            .respond(BASE_URL, 200, &base_archive())
            .respond(MLC_URL, 200, &tar_gz(&[("Linux/mlc", &b"mlc"[..])]));
        let runner = packer_runner(temp.path().join("snapshot"), 2);

        let err = Pipeline::new(&config, &manifest, &plan, &transport, &runner)
            .run(&BuildOptions::default())
            .unwrap_err();

        assert!(matches!(
            err.downcast_ref::<ProvisionError>(),
            Some(ProvisionError::CommandFailed { .. })
        ));
        assert!(config.work_dir.join("imlc/Linux/mlc").is_file());
        assert!(!runner.calls.borrow().iter().any(|c| c.program == "bash"));
        assert!(!config.output_dir.join("sha256.txt").exists());
    }

    #[test]
    fn test_missing_manifest_entry_fails_before_download() {
        let temp = TempDir::new().unwrap();
        let config = test_config(&temp);
        let plan = test_plan(vec![tool("imlc").cache_name("mlc.tgz")]);
        let manifest = manifest(&[("porteus", BASE_URL)]);
        let transport = CannedTransport::new().respond(BASE_URL, 200, &base_archive());
        let runner = RecordingRunner::new();

        let err = Pipeline::new(&config, &manifest, &plan, &transport, &runner)
            .run(&BuildOptions::default())
            .unwrap_err();

        assert!(format!("{err:#}").contains("imlc"));
        assert!(transport.requests.borrow().is_empty());
        assert!(!config.work_dir.exists());
    }

    #[test]
    fn test_clear_cache_refetches() {
        let temp = TempDir::new().unwrap();
        let config = test_config(&temp);
        let plan = test_plan(Vec::new());
        let manifest = manifest(&[("porteus", BASE_URL)]);
        let transport = CannedTransport::new().respond(BASE_URL, 200, &base_archive());
        let runner = packer_runner(temp.path().join("snapshot"), 0);
        let pipeline = Pipeline::new(&config, &manifest, &plan, &transport, &runner);

        pipeline.run(&BuildOptions::default()).unwrap();
        pipeline.run(&BuildOptions::default()).unwrap();
        assert_eq!(transport.request_count(BASE_URL), 1);

        let options = BuildOptions {
            clear_cache: true,
            ..BuildOptions::default()
        };
        pipeline.run(&options).unwrap();
        assert_eq!(transport.request_count(BASE_URL), 2);
    }

    #[test]
    fn test_needs_unarchiver() {
        assert!(needs_unarchiver(&BuildPlan::stresskit()));
        assert!(!needs_unarchiver(&test_plan(vec![tool("imlc")])));
    }
}

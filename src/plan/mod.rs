//! Declarative build plan.
//!
//! A plan describes WHAT goes into the image: the base image and an ordered
//! list of tools, each as data (which asset, how to unpack it, what to build,
//! where to put the result). [`crate::pipeline`] interprets it.
//!
//! # Example
//!
//! ```rust
//! use streskit::extract::ArchiveKind;
//! use streskit::plan::{tool, ExtractTarget};
//! use streskit::compose::Placement;
//!
//! let mlc = tool("imlc")
//!     .cache_name("mlc.tgz")
//!     .kind(ArchiveKind::TarGz)
//!     .extract_to(ExtractTarget::Work("imlc".into()))
//!     .place("Linux/mlc", "mlc", Placement::Move);
//! assert_eq!(mlc.asset, "imlc");
//! ```

use std::fmt;

use crate::compose::Placement;
use crate::extract::ArchiveKind;
use crate::patch::PatchSpec;

/// Where the tools directory lives inside the base image tree.
pub const TOOLS_DIR: &str = "porteus/rootcopy/usr/local/tools";

/// Packer script inside the base image tree.
pub const PACKER_SCRIPT: &str = "porteus/make_iso.sh";

/// Porteus modules dropped from the base image. StresKit boots to a console,
/// so the X server and desktop modules are dead weight.
pub const PORTEUS_EXCLUDES: [&str; 3] = [
    "porteus/base/002-xorg.xzm",
    "porteus/base/002-xtra.xzm",
    "porteus/base/003-openbox.xzm",
];

/// The base filesystem image every tool is added to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BaseImage {
    /// Key in the asset manifest.
    pub asset: String,
    /// File name in the download cache.
    pub cache_name: String,
    pub kind: ArchiveKind,
    /// Directory under the working tree that becomes the image root.
    pub extract_dir: String,
    /// Tools directory, relative to the image root.
    pub tools_dir: String,
    /// Packer script, relative to the image root.
    pub packer_script: String,
}

/// Where an archive is unpacked.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExtractTarget {
    /// Scratch directory under the working tree; the tool is placed later.
    Work(String),
    /// Directly into the image's tools directory. Nothing left to place.
    Tools(String),
}

impl fmt::Display for ExtractTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ExtractTarget::Work(dir) => write!(f, "work/{dir}"),
            ExtractTarget::Tools(dir) => write!(f, "tools/{dir}"),
        }
    }
}

/// One command run inside the tool's source directory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BuildStep {
    pub program: String,
    pub args: Vec<String>,
    /// A failing exit is logged as a warning instead of aborting the build.
    pub allow_failure: bool,
}

/// Move or copy the build result into the tools directory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlaceStep {
    /// Path relative to the tool's source directory.
    pub from: String,
    /// Destination relative to the tools directory.
    pub to: String,
    pub mode: Placement,
}

/// Binary patch applied to a placed file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PatchStep {
    /// Path relative to the tools directory.
    pub target: String,
    pub spec: PatchSpec,
}

/// A single tool provisioned into the image.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ToolSpec {
    /// Name for logging.
    pub name: String,
    /// Key in the asset manifest.
    pub asset: String,
    /// File name in the download cache.
    pub cache_name: String,
    pub kind: ArchiveKind,
    pub extract_to: ExtractTarget,
    /// Glob for the single top-level directory holding the tool. When unset
    /// the extraction directory itself is the source directory.
    pub locate: Option<String>,
    pub build: Vec<BuildStep>,
    pub place: Option<PlaceStep>,
    pub patch: Option<PatchStep>,
}

/// Start a tool definition. The name doubles as the manifest key until
/// [`ToolSpec::asset`] says otherwise.
pub fn tool(name: &str) -> ToolSpec {
    ToolSpec {
        name: name.to_string(),
        asset: name.to_string(),
        cache_name: name.to_string(),
        kind: ArchiveKind::TarGz,
        extract_to: ExtractTarget::Work(name.to_string()),
        locate: None,
        build: Vec::new(),
        place: None,
        patch: None,
    }
}

impl ToolSpec {
    pub fn asset(mut self, asset: &str) -> Self {
        self.asset = asset.to_string();
        self
    }

    pub fn cache_name(mut self, cache_name: &str) -> Self {
        self.cache_name = cache_name.to_string();
        self
    }

    pub fn kind(mut self, kind: ArchiveKind) -> Self {
        self.kind = kind;
        self
    }

    pub fn extract_to(mut self, target: ExtractTarget) -> Self {
        self.extract_to = target;
        self
    }

    pub fn locate(mut self, pattern: &str) -> Self {
        self.locate = Some(pattern.to_string());
        self
    }

    pub fn run(mut self, program: &str, args: &[&str]) -> Self {
        self.build.push(BuildStep {
            program: program.to_string(),
            args: args.iter().map(|a| a.to_string()).collect(),
            allow_failure: false,
        });
        self
    }

    pub fn run_allow_failure(mut self, program: &str, args: &[&str]) -> Self {
        self.build.push(BuildStep {
            program: program.to_string(),
            args: args.iter().map(|a| a.to_string()).collect(),
            allow_failure: true,
        });
        self
    }

    pub fn place(mut self, from: &str, to: &str, mode: Placement) -> Self {
        self.place = Some(PlaceStep {
            from: from.to_string(),
            to: to.to_string(),
            mode,
        });
        self
    }

    pub fn patch(mut self, target: &str, spec: PatchSpec) -> Self {
        self.patch = Some(PatchStep {
            target: target.to_string(),
            spec,
        });
        self
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BuildPlan {
    pub base: BaseImage,
    pub tools: Vec<ToolSpec>,
}

impl BuildPlan {
    /// The production StresKit image.
    pub fn stresskit() -> Self {
        let base = BaseImage {
            asset: "porteus".into(),
            cache_name: "Porteus.iso".into(),
            kind: ArchiveKind::SevenZip {
                excludes: PORTEUS_EXCLUDES.iter().map(|s| s.to_string()).collect(),
            },
            extract_dir: "iso_contents".into(),
            tools_dir: TOOLS_DIR.into(),
            packer_script: PACKER_SCRIPT.into(),
        };

        let tools = vec![
            tool("linpack")
                .cache_name("linpack.tgz")
                .locate("benchmarks*")
                .place(
                    "linux/share/mkl/benchmarks/linpack/xlinpack_xeon64",
                    "linpack/xlinpack_xeon64",
                    Placement::Copy,
                )
                .patch("linpack/xlinpack_xeon64", PatchSpec::linpack()),
            tool("prime95")
                .cache_name("prime95.tgz")
                .extract_to(ExtractTarget::Tools("prime95".into())),
            tool("y-cruncher")
                .cache_name("ycruncher.tar.xz")
                .kind(ArchiveKind::TarXz)
                .extract_to(ExtractTarget::Work("ycruncher".into()))
                .locate("y-cruncher*-static")
                .place(".", "ycruncher", Placement::CopyTree),
            tool("imlc")
                .cache_name("mlc.tgz")
                .place("Linux/mlc", "mlc", Placement::Move),
            tool("stressapptest")
                .cache_name("stressapptest.zip")
                .kind(ArchiveKind::seven_zip())
                .locate("stressapptest-master")
                .run("bash", &["configure"])
                .run("make", &[])
                .place("src/stressapptest", "stressapptest", Placement::Move),
            // The upstream Makefile ends on a rule that does not exist, but
            // the s-tui entry point is already built by then.
            tool("s-tui")
                .cache_name("s-tui.zip")
                .kind(ArchiveKind::seven_zip())
                .locate("s-tui-master")
                .run_allow_failure("make", &[])
                .place("s-tui", "s-tui", Placement::Move),
            tool("firestarter")
                .cache_name("firestarter.tgz")
                .place("FIRESTARTER", "FIRESTARTER", Placement::Move),
        ];

        Self { base, tools }
    }

    /// Every manifest key the plan reads, base image first.
    pub fn required_assets(&self) -> Vec<&str> {
        std::iter::once(self.base.asset.as_str())
            .chain(self.tools.iter().map(|t| t.asset.as_str()))
            .collect()
    }
}

//! StresKit - stress-testing ISO builder.
//!
//! `streskit` builds the image; `streskit update-urls` refreshes `urls.json`.

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;
use std::process::ExitCode;

use streskit::fetch::NetTransport;
use streskit::logging::{init_subscriber, BuildLog};
use streskit::manifest::updater::{update_manifest_file, write_github_output, UrlUpdater};
use streskit::manifest::AssetManifest;
use streskit::pipeline::needs_unarchiver;
use streskit::preflight;
use streskit::process::SystemRunner;
use streskit::{BuildConfig, BuildOptions, BuildPlan, PatchPolicy, Pipeline};

#[derive(Parser)]
#[command(name = "streskit")]
#[command(about = "Build the StresKit stress-testing ISO")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,

    #[command(flatten)]
    build: BuildArgs,

    /// Config file (default: ./streskit.toml when present)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// More output (-v debug, -vv trace)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,
}

#[derive(Args)]
struct BuildArgs {
    /// Version string embedded in the ISO file name
    #[arg(long, default_value = "UNKNOWN")]
    image_version: String,

    /// Delete the download cache before building
    #[arg(long)]
    clear_binary_cache: bool,

    /// Leave third-party binaries unpatched
    #[arg(long)]
    skip_patches: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Look up newer upstream releases and rewrite the asset manifest
    UpdateUrls,
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    init_subscriber(cli.verbose);

    match run(cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("Error: {e:#}");
            ExitCode::FAILURE
        }
    }
}

fn run(cli: Cli) -> Result<()> {
    let config = match cli.config {
        Some(ref path) => BuildConfig::load(path)?,
        None => {
            let cwd = std::env::current_dir().context("Failed to resolve the current directory")?;
            BuildConfig::load_or_default(&cwd)?
        }
    };
    let transport = NetTransport::new(config.connect_timeout(), config.request_timeout())?;

    match cli.command {
        Some(Commands::UpdateUrls) => update_urls(&config, &transport),
        None => build(&config, &transport, cli.build),
    }
}

fn build(config: &BuildConfig, transport: &NetTransport, args: BuildArgs) -> Result<()> {
    let plan = BuildPlan::stresskit();
    preflight::check_required_tools(&preflight::build_tools(needs_unarchiver(&plan)))?;

    let manifest = AssetManifest::load(&config.manifest)?;
    let options = BuildOptions {
        version: args.image_version,
        clear_cache: args.clear_binary_cache,
        patches: PatchPolicy::from_flag(config.apply_patches && !args.skip_patches),
    };

    let outcome = Pipeline::new(config, &manifest, &plan, transport, &SystemRunner).run(&options)?;

    println!("ISO: {}", outcome.iso.display());
    println!("Checksums: {}", outcome.checksum_manifest.display());
    Ok(())
}

fn update_urls(config: &BuildConfig, transport: &NetTransport) -> Result<()> {
    let updater = UrlUpdater::new(transport, BuildLog::detached());
    let message = update_manifest_file(&updater, &config.manifest)?;
    println!("{message}");

    if let Some(path) = std::env::var_os("GITHUB_OUTPUT") {
        write_github_output(PathBuf::from(path).as_path(), &message)?;
    }
    Ok(())
}

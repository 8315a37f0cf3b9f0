//! Command-line driver for the patch update workflow.

mod context;
mod error;
mod logging;
mod settings;
mod state;

use std::path::PathBuf;
use std::process::ExitCode;

use clap::{Parser, Subcommand};
use log::{debug, error, info, warn};

use hotpatch_core::{DownloadHandler, UpgradeOutcome};
use hotpatch_platform::AppPaths;

use crate::context::PatchContext;
use crate::error::AppError;
use crate::settings::AppSettings;

/// Keeps the application's hot patch up to date.
#[derive(Parser)]
#[command(name = "hotpatch", version, about)]
struct Cli {
    /// Host application version. A change discards the downloaded patch.
    #[arg(long, global = true)]
    app_version: Option<String>,

    /// Enable debug logging.
    #[arg(long, global = true)]
    debug: bool,

    /// Keep settings, state and patches under this directory instead of the
    /// platform defaults.
    #[arg(long, global = true)]
    root: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Download the advertised patch and hand it to the patch engine if it
    /// differs from the current one.
    Check {
        /// Version token of the advertised patch.
        #[arg(long)]
        latest: String,

        /// Download URL of the advertised patch.
        #[arg(long)]
        url: String,

        /// Version token of the applied patch. Defaults to the version the
        /// patch engine reports.
        #[arg(long)]
        current: Option<String>,
    },

    /// Hand the already downloaded patch to the patch engine.
    Apply,

    /// Remove the downloaded patch.
    Clean,

    /// Show the current patch version and the downloaded patch.
    Status,
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    match run(cli).await {
        Ok(code) => code,
        Err(err) => {
            error!("{err}");
            eprintln!("hotpatch: {err}");
            ExitCode::FAILURE
        }
    }
}

async fn run(cli: Cli) -> Result<ExitCode, AppError> {
    let paths = match cli.root {
        Some(root) => AppPaths::under(root),
        None => AppPaths::new()?,
    };
    let loaded = AppSettings::load(&paths);
    let settings = loaded.as_ref().cloned().unwrap_or_default();
    logging::init_logging(
        &paths,
        cli.debug || settings.debug_logging,
        settings.max_log_size_bytes,
    );
    if let Err(err) = &loaded {
        warn!("Using default settings: {err}");
    } else if !paths.settings_file().exists()
        && let Err(err) = settings.save(&paths)
    {
        warn!("Failed to write default settings: {err}");
    }

    let mut context = PatchContext::with_command_loader(paths, settings)?;
    context.install(cli.app_version.as_deref())?;

    match cli.command {
        Command::Check {
            latest,
            url,
            current,
        } => {
            let handler = DownloadHandler::new()
                .on_started(|url| info!("Downloading patch from {url}"))
                .on_progress(|_, progress| match progress.total {
                    Some(total) => debug!("Downloaded {}/{total} bytes", progress.downloaded),
                    None => debug!("Downloaded {} bytes", progress.downloaded),
                });

            match context
                .check_upgrade(current.as_deref(), &latest, &url, handler)
                .await?
            {
                UpgradeOutcome::NoUpgradeNeeded => println!("Patch is up to date"),
                UpgradeOutcome::ApplyRequested(artifact) => println!(
                    "Patch {latest} downloaded to {} and handed to the patch engine",
                    artifact.display()
                ),
                UpgradeOutcome::DownloadFailed(err) => {
                    eprintln!("Patch download failed: {err}");
                    return Ok(ExitCode::FAILURE);
                }
            }
        }
        Command::Apply => {
            let artifact = context.apply_existing()?;
            println!("Handed {} to the patch engine", artifact.display());
        }
        Command::Clean => {
            if context.clean_patch()? {
                println!("Removed downloaded patch");
            } else {
                println!("No downloaded patch to remove");
            }
        }
        Command::Status => {
            let status = context.status();
            println!(
                "Current patch:    {}",
                status.current_version.as_deref().unwrap_or("none")
            );
            match status.artifact {
                Some((path, size)) => println!(
                    "Downloaded patch: {} ({size} bytes, version {})",
                    path.display(),
                    status.state.artifact_version.as_deref().unwrap_or("unknown")
                ),
                None => println!("Downloaded patch: none"),
            }
            if let Some(downloaded_at) = status.state.downloaded_at {
                println!("Downloaded at:    {}", downloaded_at.to_rfc3339());
            }
            if let Some(app_version) = status.state.app_version {
                println!("Host version:     {app_version}");
            }
        }
    }

    Ok(ExitCode::SUCCESS)
}

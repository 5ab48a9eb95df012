//! supply-scan: scan supply labels and verify them against a product catalog.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use clap::{CommandFactory, Parser, Subcommand};
use clap_complete::Shell;

use supply_scan::{
    AcquisitionController, Artifact, CameraDevice, Catalog, Decoder, ImageSequenceCamera,
    NoCamera, QrDecoder, ScanConfig,
};
use supply_scan_cli::config::resolve_catalog_path;
use supply_scan_cli::repl;
use supply_scan_cli::runner::{self, build_verifier, render_snapshot, RunOutcome};

#[derive(Parser)]
#[command(
    name = "supply-scan",
    about = "Scan agricultural supply labels and verify them against a product catalog",
    version
)]
struct Cli {
    /// Path to the product catalog (JSON).
    #[arg(short, long, global = true)]
    catalog: Option<String>,

    /// Log level (trace, debug, info, warn, error).
    #[arg(long, default_value = "info", global = true)]
    log_level: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Scan a replayed camera feed until a code is found and verified.
    Scan {
        /// Directory of frames, played in name order.
        #[arg(long)]
        frames: PathBuf,

        /// Frame rate for decode attempts.
        #[arg(long)]
        fps: Option<u32>,

        /// Print the outcome as JSON.
        #[arg(long)]
        json: bool,
    },

    /// Verify an uploaded label image.
    Verify {
        /// Image file to verify.
        #[arg(required_unless_present = "base64")]
        file: Option<PathBuf>,

        /// Base64-encoded image data instead of a file.
        #[arg(long, conflicts_with = "file", requires = "name")]
        base64: Option<String>,

        /// Display name for base64 uploads.
        #[arg(long)]
        name: Option<String>,

        /// Print the outcome as JSON.
        #[arg(long)]
        json: bool,
    },

    /// Validate and summarise the product catalog.
    Catalog,

    /// Generate shell completion scripts.
    ///
    /// Examples:
    ///   supply-scan completions bash > ~/.local/share/bash-completion/completions/supply-scan
    ///   supply-scan completions zsh > ~/.zfunc/_supply-scan
    Completions {
        /// Shell type (bash, zsh, fish, powershell, elvish).
        shell: Shell,
    },

    /// Launch an interactive scan session.
    Repl {
        /// Directory of frames to use as the camera.
        #[arg(long)]
        frames: Option<PathBuf>,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(&cli.log_level));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    let mut config = ScanConfig::from_env();
    let catalog_path = resolve_catalog_path(cli.catalog.as_deref());
    let decoder: Arc<dyn Decoder> = Arc::new(QrDecoder::new());

    match cli.command {
        Commands::Scan { frames, fps, json } => {
            if let Some(fps) = fps {
                config.fps = fps.max(1);
            }
            let verifier = build_verifier(catalog_path.as_deref(), decoder.clone(), &config)?;
            let outcome = runner::scan_feed(&frames, decoder, verifier, &config).await?;
            finish(&outcome, json)?;
        }

        Commands::Verify {
            file,
            base64,
            name,
            json,
        } => {
            let artifact = match (file, base64) {
                (Some(path), _) => Artifact::from_file(&path)
                    .with_context(|| format!("failed to read {}", path.display()))?,
                (None, Some(data)) => {
                    Artifact::from_base64(name.unwrap_or_else(|| "upload".to_string()), &data)?
                }
                (None, None) => anyhow::bail!("either FILE or --base64 is required"),
            };
            let verifier = build_verifier(catalog_path.as_deref(), decoder.clone(), &config)?;
            let outcome = runner::verify_artifact(artifact, decoder, verifier, &config).await?;
            finish(&outcome, json)?;
        }

        Commands::Catalog => {
            let Some(path) = catalog_path else {
                eprintln!("No catalog found. Pass --catalog or set SUPPLY_SCAN_CATALOG.");
                std::process::exit(runner::EXIT_INCOMPLETE);
            };
            match Catalog::load(&path) {
                Ok(catalog) => {
                    println!("Valid catalog: {}", path.display());
                    println!("  Products:      {}", catalog.len());
                    println!("  Manufacturers: {}", catalog.manufacturers().len());
                    for name in catalog.manufacturers() {
                        println!("    {name}");
                    }
                }
                Err(e) => {
                    eprintln!("Invalid catalog {}: {e}", path.display());
                    std::process::exit(runner::EXIT_INCOMPLETE);
                }
            }
        }

        Commands::Completions { shell } => {
            let mut cmd = Cli::command();
            clap_complete::generate(shell, &mut cmd, "supply-scan", &mut std::io::stdout());
        }

        Commands::Repl { frames } => {
            let camera: Arc<dyn CameraDevice> = match frames {
                Some(dir) => Arc::new(ImageSequenceCamera::new(dir)),
                None => Arc::new(NoCamera),
            };
            let camera_name = camera.name().to_string();
            let verifier = build_verifier(catalog_path.as_deref(), decoder.clone(), &config)?;
            let (handle, task) =
                AcquisitionController::from_config(camera, decoder, verifier, &config).spawn();

            let watcher = tokio::spawn(repl::watch_transitions(handle.subscribe()));
            tokio::task::spawn_blocking(move || repl::run(handle, &camera_name))
                .await
                .context("REPL thread panicked")??;

            let summary = task.await.context("controller task failed")?;
            watcher.abort();
            tracing::debug!(
                "Devices acquired {} released {}",
                summary.devices_acquired,
                summary.devices_released
            );
        }
    }

    Ok(())
}

fn finish(outcome: &RunOutcome, json: bool) -> anyhow::Result<()> {
    if json {
        println!("{}", serde_json::to_string_pretty(outcome)?);
    } else {
        print!("{}", render_snapshot(&outcome.snapshot));
    }

    let code = outcome.exit_code();
    if code != runner::EXIT_SUCCESS {
        std::process::exit(code);
    }
    Ok(())
}

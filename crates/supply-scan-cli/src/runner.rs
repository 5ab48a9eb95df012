//! One-shot sessions driven from the command line.

use std::path::Path;
use std::sync::Arc;

use anyhow::Context;
use serde::Serialize;

use supply_scan::{
    AcquisitionController, Artifact, CameraDevice, Catalog, CatalogVerifier, Command, Decoder,
    FixedDelayVerifier, ImageSequenceCamera, NoCamera, ScanConfig, SessionSnapshot,
    VerificationState, Verifier,
};

/// Process exit codes.
pub const EXIT_SUCCESS: i32 = 0;
pub const EXIT_INCOMPLETE: i32 = 1;
pub const EXIT_FAILED: i32 = 2;
pub const EXIT_CAMERA: i32 = 3;
pub const EXIT_INTERRUPTED: i32 = 130;

/// Pick the verifier for a resolved catalog path.
pub fn build_verifier(
    catalog: Option<&Path>,
    decoder: Arc<dyn Decoder>,
    config: &ScanConfig,
) -> anyhow::Result<Arc<dyn Verifier>> {
    match catalog {
        Some(path) => {
            let catalog = Catalog::load(path)
                .with_context(|| format!("failed to load catalog {}", path.display()))?;
            tracing::info!("Catalog: {} ({} products)", path.display(), catalog.len());
            Ok(Arc::new(
                CatalogVerifier::new(catalog, decoder).with_latency(config.verify_latency),
            ))
        }
        None => {
            tracing::warn!("No catalog found, every check passes after a fixed delay");
            Ok(Arc::new(FixedDelayVerifier::default()))
        }
    }
}

/// How a one-shot session ended.
#[derive(Debug, Clone, Serialize)]
pub struct RunOutcome {
    pub snapshot: SessionSnapshot,
    pub interrupted: bool,
}

impl RunOutcome {
    pub fn exit_code(&self) -> i32 {
        if self.interrupted {
            return EXIT_INTERRUPTED;
        }
        exit_code(&self.snapshot)
    }
}

/// Map a settled snapshot to the process exit code.
pub fn exit_code(snapshot: &SessionSnapshot) -> i32 {
    match snapshot.verification {
        VerificationState::Success => EXIT_SUCCESS,
        VerificationState::Failed => EXIT_FAILED,
        _ if snapshot.camera.is_failure() => EXIT_CAMERA,
        _ => EXIT_INCOMPLETE,
    }
}

/// Scan a replayed feed until a code is verified or the camera fails.
pub async fn scan_feed(
    frames: &Path,
    decoder: Arc<dyn Decoder>,
    verifier: Arc<dyn Verifier>,
    config: &ScanConfig,
) -> anyhow::Result<RunOutcome> {
    let camera = Arc::new(ImageSequenceCamera::new(frames));
    run_until_settled(camera, decoder, verifier, config, vec![Command::Activate]).await
}

/// Verify an uploaded artifact without touching a camera.
pub async fn verify_artifact(
    artifact: Artifact,
    decoder: Arc<dyn Decoder>,
    verifier: Arc<dyn Verifier>,
    config: &ScanConfig,
) -> anyhow::Result<RunOutcome> {
    let commands = vec![Command::SupplyArtifact(artifact), Command::Verify];
    run_until_settled(Arc::new(NoCamera), decoder, verifier, config, commands).await
}

async fn run_until_settled(
    camera: Arc<dyn CameraDevice>,
    decoder: Arc<dyn Decoder>,
    verifier: Arc<dyn Verifier>,
    config: &ScanConfig,
    commands: Vec<Command>,
) -> anyhow::Result<RunOutcome> {
    let (handle, task) =
        AcquisitionController::from_config(camera, decoder, verifier, config).spawn();

    for cmd in commands {
        handle.send(cmd).await?;
    }

    let interrupted = tokio::select! {
        settled = handle.wait_for(|s| s.is_settled()) => {
            settled?;
            false
        }
        _ = tokio::signal::ctrl_c() => {
            tracing::info!("Interrupted, unmounting");
            true
        }
    };

    // The unmounted session resets the camera, so keep the settled view.
    let snapshot = handle.snapshot();
    handle.unmount().await?;
    let summary = task.await.context("controller task failed")?;
    tracing::debug!(
        "Devices acquired {} released {}",
        summary.devices_acquired,
        summary.devices_released
    );

    Ok(RunOutcome {
        snapshot,
        interrupted,
    })
}

/// Human-readable rendering of a snapshot.
pub fn render_snapshot(snapshot: &SessionSnapshot) -> String {
    let mut out = String::new();
    out.push_str(&format!("Camera:       {}\n", snapshot.camera));
    out.push_str(&format!("Verification: {}\n", snapshot.verification));
    if let Some(payload) = &snapshot.decoded_payload {
        out.push_str(&format!("Scanned code: {payload}\n"));
    }
    if let Some(name) = &snapshot.artifact_name {
        out.push_str(&format!("Artifact:     {name}\n"));
    }
    if snapshot.frames_scanned > 0 {
        out.push_str(&format!("Frames:       {}\n", snapshot.frames_scanned));
    }
    if let Some(report) = &snapshot.report {
        if let Some(product) = &report.product {
            out.push_str(&format!("Product:      {product}\n"));
        }
        if let Some(manufacturer) = &report.manufacturer {
            out.push_str(&format!("Manufacturer: {manufacturer}\n"));
        }
        out.push_str(&format!(
            "Checked at:   {}\n",
            report.checked_at.format("%Y-%m-%d %H:%M:%S UTC")
        ));
    }
    if let Some(err) = &snapshot.last_error {
        out.push_str(&format!("Error:        {err}\n"));
    }
    out
}

//! The acquisition controller: the effect layer around `Session`.
//!
//! The controller owns the collaborators and performs the effects returned
//! by `Session::apply`. It runs as a single task whose loop selects over
//! user commands, the pending device request, the pending verification and
//! the frame clock. Every handler runs to completion before the next poll,
//! so session state is only ever touched from one place.

use std::sync::Arc;

use futures::future::{BoxFuture, FutureExt};
use serde::Serialize;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use uuid::Uuid;

use crate::config::ScanConfig;
use crate::decode::Decoder;
use crate::device::{CameraDevice, DeviceHandle, FrameSource};
use crate::scheduler::{DisplayClock, FrameClock, ScanLoop, StopReason};
use crate::session::{Effect, Event, Session};
use crate::types::{
    Artifact, CameraState, CaptureConstraints, ScanError, ScanResult, VerificationReport,
    VerificationState,
};
use crate::verify::Verifier;

const COMMAND_BUFFER: usize = 32;

/// User actions accepted by the controller.
#[derive(Debug, Clone, PartialEq)]
pub enum Command {
    Activate,
    Pause,
    Resume,
    Retry,
    ToggleCamera,
    SupplyArtifact(Artifact),
    ClearArtifact,
    Verify,
    Reset,
    Unmount,
}

impl From<Command> for Event {
    fn from(cmd: Command) -> Self {
        match cmd {
            Command::Activate => Event::Activate,
            Command::Pause => Event::Pause,
            Command::Resume => Event::Resume,
            Command::Retry => Event::Retry,
            Command::ToggleCamera => Event::Toggle,
            Command::SupplyArtifact(a) => Event::ArtifactSupplied(a),
            Command::ClearArtifact => Event::ArtifactCleared,
            Command::Verify => Event::VerifyRequested,
            Command::Reset => Event::Reset,
            Command::Unmount => Event::Unmount,
        }
    }
}

/// What the UI renders.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SessionSnapshot {
    pub session_id: Uuid,
    pub camera: CameraState,
    pub verification: VerificationState,
    pub decoded_payload: Option<String>,
    pub artifact_name: Option<String>,
    pub can_verify: bool,
    pub last_error: Option<String>,
    pub report: Option<VerificationReport>,
    pub frames_scanned: u64,
}

impl SessionSnapshot {
    /// The camera needs user attention or the verification has an outcome.
    pub fn is_settled(&self) -> bool {
        self.verification.is_terminal() || self.camera.is_failure()
    }
}

/// Returned when the controller is unmounted.
#[derive(Debug, Clone, Serialize)]
pub struct SessionSummary {
    pub last: SessionSnapshot,
    pub camera_history: Vec<CameraState>,
    pub devices_acquired: u64,
    pub devices_released: u64,
}

/// Drives one scan session.
pub struct AcquisitionController {
    session: Session,
    camera: Arc<dyn CameraDevice>,
    decoder: Arc<dyn Decoder>,
    verifier: Arc<dyn Verifier>,
    clock: Box<dyn FrameClock>,
    constraints: CaptureConstraints,
    device: Option<DeviceHandle>,
    scan: Option<ScanLoop>,
    pending_acquire: Option<BoxFuture<'static, ScanResult<Box<dyn FrameSource>>>>,
    pending_verify: Option<BoxFuture<'static, ScanResult<VerificationReport>>>,
    verify_subject: Option<String>,
    /// Decode attempts of finished loops in the current session.
    frames_scanned: u64,
    camera_history: Vec<CameraState>,
    devices_acquired: u64,
    devices_released: u64,
    state_tx: watch::Sender<SessionSnapshot>,
}

impl AcquisitionController {
    pub fn new(
        camera: Arc<dyn CameraDevice>,
        decoder: Arc<dyn Decoder>,
        verifier: Arc<dyn Verifier>,
    ) -> Self {
        let session = Session::new();
        let (state_tx, _) = watch::channel(snapshot_of(&session, 0));
        Self {
            camera_history: vec![session.camera],
            session,
            camera,
            decoder,
            verifier,
            clock: Box::new(DisplayClock::default()),
            constraints: CaptureConstraints::default(),
            device: None,
            scan: None,
            pending_acquire: None,
            pending_verify: None,
            verify_subject: None,
            frames_scanned: 0,
            devices_acquired: 0,
            devices_released: 0,
            state_tx,
        }
    }

    /// Build a controller with the clock rate and constraints of `config`.
    pub fn from_config(
        camera: Arc<dyn CameraDevice>,
        decoder: Arc<dyn Decoder>,
        verifier: Arc<dyn Verifier>,
        config: &ScanConfig,
    ) -> Self {
        Self::new(camera, decoder, verifier)
            .with_clock(Box::new(DisplayClock::new(config.frame_interval())))
            .with_constraints(config.constraints)
    }

    pub fn with_clock(mut self, clock: Box<dyn FrameClock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn with_constraints(mut self, constraints: CaptureConstraints) -> Self {
        self.constraints = constraints;
        self
    }

    pub fn subscribe(&self) -> watch::Receiver<SessionSnapshot> {
        self.state_tx.subscribe()
    }

    /// Move the controller into its own task.
    pub fn spawn(self) -> (ControllerHandle, JoinHandle<SessionSummary>) {
        let (commands, rx) = mpsc::channel(COMMAND_BUFFER);
        let handle = ControllerHandle {
            commands,
            state: self.subscribe(),
        };
        let task = tokio::spawn(self.run(rx));
        (handle, task)
    }

    /// Run until `Unmount` arrives or every command sender is dropped.
    pub async fn run(mut self, mut commands: mpsc::Receiver<Command>) -> SessionSummary {
        tracing::info!(
            "Session {} mounted on {}",
            self.session.id,
            self.camera.name()
        );
        self.publish();

        loop {
            tokio::select! {
                cmd = commands.recv() => match cmd {
                    Some(Command::Unmount) | None => break,
                    Some(cmd) => self.dispatch(cmd.into()),
                },
                result = poll_slot(&mut self.pending_acquire) => {
                    self.pending_acquire = None;
                    self.on_acquired(result);
                }
                result = poll_slot(&mut self.pending_verify) => {
                    self.pending_verify = None;
                    self.on_verified(result);
                }
                _ = self.clock.tick(), if self.scan.is_some() => {
                    self.scan_frame();
                }
            }
        }

        self.dispatch(Event::Unmount);
        self.shutdown();
        tracing::info!(
            "Session {} unmounted: {} device(s) acquired, {} released",
            self.session.id,
            self.devices_acquired,
            self.devices_released
        );
        SessionSummary {
            last: self.snapshot(),
            camera_history: self.camera_history.clone(),
            devices_acquired: self.devices_acquired,
            devices_released: self.devices_released,
        }
    }

    fn dispatch(&mut self, event: Event) {
        let reason = stop_reason(&event);
        let session_before = self.session.id;
        let camera_before = self.session.camera;
        let verification_before = self.session.verification;

        for effect in self.session.apply(event) {
            self.perform(effect, reason);
        }
        if self.session.id != session_before {
            self.frames_scanned = 0;
        }

        if self.session.camera != camera_before {
            tracing::info!(
                "Session {}: camera {camera_before} -> {}",
                self.session.id,
                self.session.camera
            );
            self.camera_history.push(self.session.camera);
        }
        if self.session.verification != verification_before {
            tracing::info!(
                "Session {}: verification {verification_before} -> {}",
                self.session.id,
                self.session.verification
            );
        }
        self.publish();
    }

    fn perform(&mut self, effect: Effect, reason: StopReason) {
        match effect {
            Effect::AcquireDevice => {
                let camera = self.camera.clone();
                let constraints = self.constraints;
                tracing::debug!("Requesting {} ({constraints:?})", camera.name());
                self.pending_acquire =
                    Some(async move { camera.acquire(&constraints).await }.boxed());
            }
            Effect::ReleaseDevice => {
                if self.pending_acquire.take().is_some() {
                    tracing::debug!("Abandoned pending camera request");
                }
                self.release_device();
            }
            Effect::StartScanLoop => {
                self.stop_scan(StopReason::Superseded);
                self.clock.restart();
                self.scan = Some(ScanLoop::start());
            }
            Effect::CancelScanLoop => self.stop_scan(reason),
            Effect::BeginVerification(subject) => {
                let verifier = self.verifier.clone();
                tracing::info!("Verifying {}", subject.label());
                self.verify_subject = Some(subject.label().to_string());
                self.pending_verify = Some(async move { verifier.verify(&subject).await }.boxed());
            }
            Effect::AbandonVerification => {
                if self.pending_verify.take().is_some() {
                    tracing::info!("Abandoned in-flight verification");
                }
                self.verify_subject = None;
            }
        }
    }

    fn on_acquired(&mut self, result: ScanResult<Box<dyn FrameSource>>) {
        match result {
            Ok(source) => {
                self.release_device();
                self.device = Some(DeviceHandle::new(source));
                self.devices_acquired += 1;
                self.dispatch(Event::PermissionGranted);
            }
            Err(e) if e.is_permission() => {
                tracing::warn!("Camera permission denied: {e}");
                self.dispatch(Event::PermissionDenied(e.to_string()));
            }
            Err(e) => {
                tracing::warn!("Camera unavailable: {e}");
                self.dispatch(Event::DeviceFailed(e.to_string()));
            }
        }
    }

    fn on_verified(&mut self, result: ScanResult<VerificationReport>) {
        let subject = self.verify_subject.take().unwrap_or_default();
        let report = match result {
            Ok(report) => report,
            Err(e) => {
                tracing::warn!("Verification of {subject} errored: {e}");
                VerificationReport::failed(subject, e.to_string())
            }
        };
        self.dispatch(Event::VerificationFinished(report));
    }

    /// One iteration of the decode loop.
    fn scan_frame(&mut self) {
        let Some(scan) = self.scan.as_mut() else {
            return;
        };
        let Some(device) = self.device.as_mut() else {
            self.dispatch(Event::DeviceFailed("camera stream ended".to_string()));
            return;
        };

        let frame = device.next_frame();
        scan.record(frame.is_some());
        let Some(frame) = frame else {
            return;
        };

        if let Some(payload) = self.decoder.decode(&frame) {
            tracing::info!("Code found in frame {}: {payload}", frame.sequence);
            self.dispatch(Event::Decoded(payload));
        }
    }

    fn release_device(&mut self) {
        if let Some(handle) = self.device.take() {
            drop(handle);
            self.devices_released += 1;
        }
    }

    /// Cancel the running loop and fold its attempts into the session count.
    fn stop_scan(&mut self, reason: StopReason) {
        if let Some(scan) = self.scan.take() {
            let stats = scan.cancel(reason);
            self.frames_scanned += stats.decode_attempts;
        }
    }

    fn shutdown(&mut self) {
        self.stop_scan(StopReason::Unmounted);
        self.pending_acquire = None;
        self.pending_verify = None;
        self.release_device();
    }

    fn snapshot(&self) -> SessionSnapshot {
        let running = self.scan.as_ref().map_or(0, ScanLoop::decode_attempts);
        snapshot_of(&self.session, self.frames_scanned + running)
    }

    fn publish(&self) {
        self.state_tx.send_replace(self.snapshot());
    }
}

impl Drop for AcquisitionController {
    fn drop(&mut self) {
        self.shutdown();
    }
}

/// Cloneable front for a spawned controller.
#[derive(Clone)]
pub struct ControllerHandle {
    commands: mpsc::Sender<Command>,
    state: watch::Receiver<SessionSnapshot>,
}

impl ControllerHandle {
    pub async fn send(&self, cmd: Command) -> ScanResult<()> {
        self.commands
            .send(cmd)
            .await
            .map_err(|_| ScanError::ControllerClosed)
    }

    /// For callers outside the runtime, such as the REPL thread.
    pub fn send_blocking(&self, cmd: Command) -> ScanResult<()> {
        self.commands
            .blocking_send(cmd)
            .map_err(|_| ScanError::ControllerClosed)
    }

    pub async fn activate(&self) -> ScanResult<()> {
        self.send(Command::Activate).await
    }

    pub async fn pause(&self) -> ScanResult<()> {
        self.send(Command::Pause).await
    }

    pub async fn resume(&self) -> ScanResult<()> {
        self.send(Command::Resume).await
    }

    pub async fn retry(&self) -> ScanResult<()> {
        self.send(Command::Retry).await
    }

    pub async fn verify(&self) -> ScanResult<()> {
        self.send(Command::Verify).await
    }

    pub async fn reset(&self) -> ScanResult<()> {
        self.send(Command::Reset).await
    }

    pub async fn unmount(&self) -> ScanResult<()> {
        self.send(Command::Unmount).await
    }

    /// The latest published snapshot.
    pub fn snapshot(&self) -> SessionSnapshot {
        self.state.borrow().clone()
    }

    /// Wait until a snapshot satisfies `predicate`.
    pub async fn wait_for(
        &self,
        predicate: impl FnMut(&SessionSnapshot) -> bool,
    ) -> ScanResult<SessionSnapshot> {
        let mut rx = self.state.clone();
        let snapshot = rx
            .wait_for(predicate)
            .await
            .map_err(|_| ScanError::ControllerClosed)?
            .clone();
        Ok(snapshot)
    }

    pub fn subscribe(&self) -> watch::Receiver<SessionSnapshot> {
        self.state.clone()
    }
}

fn snapshot_of(session: &Session, frames_scanned: u64) -> SessionSnapshot {
    SessionSnapshot {
        session_id: session.id,
        camera: session.camera,
        verification: session.verification,
        decoded_payload: session.decoded_payload.clone(),
        artifact_name: session.artifact.as_ref().map(|a| a.name.clone()),
        can_verify: session.can_verify(),
        last_error: session.last_error.clone(),
        report: session.report.clone(),
        frames_scanned,
    }
}

fn stop_reason(event: &Event) -> StopReason {
    match event {
        Event::Decoded(_) => StopReason::Decoded,
        Event::Pause | Event::Toggle => StopReason::Paused,
        Event::DeviceFailed(_) => StopReason::DeviceLost,
        Event::Reset | Event::Retry => StopReason::Reset,
        Event::Unmount => StopReason::Unmounted,
        _ => StopReason::Superseded,
    }
}

/// Await the future in `slot`, or never resolve when it is empty.
async fn poll_slot<T>(slot: &mut Option<BoxFuture<'static, T>>) -> T {
    match slot.as_mut() {
        Some(fut) => fut.await,
        None => std::future::pending().await,
    }
}

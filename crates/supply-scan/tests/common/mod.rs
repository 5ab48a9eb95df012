//! Scripted collaborators shared by the integration tests.

#![allow(dead_code)]

use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::Notify;

use supply_scan::{
    AcquisitionController, CameraDevice, CaptureConstraints, ControllerHandle, Decoder, Frame,
    FrameSource, ImmediateClock, Outcome, ScanError, ScanResult, SessionSnapshot, Subject,
    VerificationReport, Verifier,
};

/// Shared call counters.
#[derive(Default)]
pub struct Counters {
    acquired: AtomicUsize,
    released: AtomicUsize,
    decode_attempts: AtomicUsize,
    verify_calls: AtomicUsize,
}

impl Counters {
    pub fn acquired(&self) -> usize {
        self.acquired.load(Ordering::SeqCst)
    }
    pub fn released(&self) -> usize {
        self.released.load(Ordering::SeqCst)
    }
    pub fn decode_attempts(&self) -> usize {
        self.decode_attempts.load(Ordering::SeqCst)
    }
    pub fn verify_calls(&self) -> usize {
        self.verify_calls.load(Ordering::SeqCst)
    }
}

/// How the next device request resolves.
#[derive(Debug, Clone, Copy)]
pub enum Grant {
    Allow,
    Deny,
    Unavailable,
}

pub struct ScriptedCamera {
    script: Mutex<VecDeque<Grant>>,
    counters: Arc<Counters>,
    gate: Option<Arc<Notify>>,
}

impl ScriptedCamera {
    pub fn new(counters: Arc<Counters>, script: &[Grant]) -> Self {
        Self {
            script: Mutex::new(script.iter().copied().collect()),
            counters,
            gate: None,
        }
    }

    /// Requests stay pending until the gate is notified.
    pub fn gated(mut self, gate: Arc<Notify>) -> Self {
        self.gate = Some(gate);
        self
    }
}

#[async_trait]
impl CameraDevice for ScriptedCamera {
    async fn acquire(&self, _constraints: &CaptureConstraints) -> ScanResult<Box<dyn FrameSource>> {
        if let Some(gate) = &self.gate {
            gate.notified().await;
        }
        let next = self
            .script
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or(Grant::Allow);
        match next {
            Grant::Allow => {
                self.counters.acquired.fetch_add(1, Ordering::SeqCst);
                Ok(Box::new(FakeSource {
                    sequence: 0,
                    counters: self.counters.clone(),
                }))
            }
            Grant::Deny => Err(ScanError::PermissionDenied(
                "user dismissed the prompt".to_string(),
            )),
            Grant::Unavailable => Err(ScanError::DeviceUnavailable(
                "no camera attached".to_string(),
            )),
        }
    }

    fn name(&self) -> &str {
        "scripted"
    }
}

struct FakeSource {
    sequence: u64,
    counters: Arc<Counters>,
}

impl FrameSource for FakeSource {
    fn next_frame(&mut self) -> Option<Frame> {
        self.sequence += 1;
        Some(Frame::blank(self.sequence, 4, 4))
    }

    fn stop(&mut self) {
        self.counters.released.fetch_add(1, Ordering::SeqCst);
    }
}

/// Finds `payload` from frame `from_frame` onwards.
pub fn decoder_after(counters: Arc<Counters>, from_frame: u64, payload: &str) -> Arc<dyn Decoder> {
    let payload = payload.to_string();
    Arc::new(move |frame: &Frame| -> Option<String> {
        counters.decode_attempts.fetch_add(1, Ordering::SeqCst);
        (frame.sequence >= from_frame).then(|| payload.clone())
    })
}

/// Never finds anything.
pub fn blind_decoder(counters: Arc<Counters>) -> Arc<dyn Decoder> {
    Arc::new(move |_: &Frame| -> Option<String> {
        counters.decode_attempts.fetch_add(1, Ordering::SeqCst);
        None
    })
}

pub struct ScriptedVerifier {
    outcome: Outcome,
    counters: Arc<Counters>,
    gate: Option<Arc<Notify>>,
}

impl ScriptedVerifier {
    pub fn new(counters: Arc<Counters>, outcome: Outcome) -> Self {
        Self {
            outcome,
            counters,
            gate: None,
        }
    }

    pub fn gated(mut self, gate: Arc<Notify>) -> Self {
        self.gate = Some(gate);
        self
    }
}

#[async_trait]
impl Verifier for ScriptedVerifier {
    async fn verify(&self, subject: &Subject) -> ScanResult<VerificationReport> {
        self.counters.verify_calls.fetch_add(1, Ordering::SeqCst);
        if let Some(gate) = &self.gate {
            gate.notified().await;
        }
        Ok(match self.outcome {
            Outcome::Success => VerificationReport::success(subject.label()),
            Outcome::Failed => VerificationReport::failed(subject.label(), "not in registry"),
        })
    }
}

pub fn controller(
    camera: ScriptedCamera,
    decoder: Arc<dyn Decoder>,
    verifier: ScriptedVerifier,
) -> AcquisitionController {
    AcquisitionController::new(Arc::new(camera), decoder, Arc::new(verifier))
        .with_clock(Box::new(ImmediateClock))
}

/// Wait for a snapshot, failing the test instead of hanging.
pub async fn settle(
    handle: &ControllerHandle,
    predicate: impl FnMut(&SessionSnapshot) -> bool,
) -> SessionSnapshot {
    tokio::time::timeout(Duration::from_secs(5), handle.wait_for(predicate))
        .await
        .expect("timed out waiting for state")
        .expect("controller stopped")
}

/// Let the controller task run for a while.
pub async fn spin(rounds: usize) {
    for _ in 0..rounds {
        tokio::task::yield_now().await;
    }
}

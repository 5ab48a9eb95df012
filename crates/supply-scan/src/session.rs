//! The scan session state machine.
//!
//! `Session::apply` is a pure transition function: it updates the session
//! fields and returns the side effects the controller must perform. It never
//! touches a device, a clock or a verifier itself.

use serde::Serialize;
use uuid::Uuid;

use crate::types::{
    Artifact, CameraState, Outcome, Subject, VerificationReport, VerificationState,
};

/// Inputs to the state machine: user actions and collaborator completions.
#[derive(Debug, Clone, PartialEq)]
pub enum Event {
    Activate,
    Pause,
    Resume,
    Retry,
    /// The single camera button: pause, resume, activate or retry.
    Toggle,
    PermissionGranted,
    PermissionDenied(String),
    DeviceFailed(String),
    Decoded(String),
    ArtifactSupplied(Artifact),
    ArtifactCleared,
    VerifyRequested,
    VerificationFinished(VerificationReport),
    Reset,
    Unmount,
}

/// Side effects requested by a transition, performed in order.
#[derive(Debug, Clone, PartialEq)]
pub enum Effect {
    AcquireDevice,
    ReleaseDevice,
    StartScanLoop,
    CancelScanLoop,
    BeginVerification(Subject),
    AbandonVerification,
}

/// One verification attempt.
#[derive(Debug, Clone, Serialize)]
pub struct Session {
    pub id: Uuid,
    pub camera: CameraState,
    pub decoded_payload: Option<String>,
    pub artifact: Option<Artifact>,
    pub verification: VerificationState,
    pub last_error: Option<String>,
    pub report: Option<VerificationReport>,
    pub closed: bool,
}

impl Default for Session {
    fn default() -> Self {
        Self::new()
    }
}

impl Session {
    pub fn new() -> Self {
        Self {
            id: Uuid::new_v4(),
            camera: CameraState::Idle,
            decoded_payload: None,
            artifact: None,
            verification: VerificationState::NotStarted,
            last_error: None,
            report: None,
            closed: false,
        }
    }

    /// Apply an event and return the effects to perform.
    pub fn apply(&mut self, event: Event) -> Vec<Effect> {
        if self.closed {
            return Vec::new();
        }

        match event {
            Event::Activate => self.activate(),
            Event::Pause => self.pause(),
            Event::Resume => self.resume(),
            Event::Retry => self.retry(),
            Event::Toggle => match self.camera {
                CameraState::Streaming | CameraState::Requesting => self.pause(),
                CameraState::Paused => self.resume(),
                CameraState::Idle => self.activate(),
                CameraState::PermissionDenied | CameraState::Error => self.retry(),
            },
            Event::PermissionGranted => {
                if self.camera == CameraState::Requesting {
                    self.camera = CameraState::Streaming;
                    vec![Effect::StartScanLoop]
                } else {
                    // Nobody is waiting for this stream anymore.
                    vec![Effect::ReleaseDevice]
                }
            }
            Event::PermissionDenied(reason) => {
                if self.camera != CameraState::Requesting {
                    return Vec::new();
                }
                self.camera = CameraState::PermissionDenied;
                self.last_error = Some(reason);
                Vec::new()
            }
            Event::DeviceFailed(reason) => match self.camera {
                CameraState::Requesting => {
                    self.camera = CameraState::Error;
                    self.last_error = Some(reason);
                    Vec::new()
                }
                CameraState::Streaming => {
                    self.camera = CameraState::Error;
                    self.last_error = Some(reason);
                    vec![Effect::CancelScanLoop, Effect::ReleaseDevice]
                }
                _ => Vec::new(),
            },
            Event::Decoded(payload) => {
                if self.camera != CameraState::Streaming || self.decoded_payload.is_some() {
                    return Vec::new();
                }
                self.camera = CameraState::Idle;
                self.decoded_payload = Some(payload.clone());
                let mut effects = vec![Effect::CancelScanLoop, Effect::ReleaseDevice];
                if self.verification == VerificationState::NotStarted {
                    self.verification = VerificationState::InProgress;
                    effects.push(Effect::BeginVerification(Subject::Payload(payload)));
                }
                effects
            }
            Event::ArtifactSupplied(artifact) => {
                if self.verification != VerificationState::InProgress {
                    self.artifact = Some(artifact);
                }
                Vec::new()
            }
            Event::ArtifactCleared => {
                if self.verification != VerificationState::InProgress {
                    self.artifact = None;
                }
                Vec::new()
            }
            Event::VerifyRequested => self.begin_verification(),
            Event::VerificationFinished(report) => {
                if self.verification != VerificationState::InProgress {
                    return Vec::new();
                }
                self.verification = match report.outcome {
                    Outcome::Success => VerificationState::Success,
                    Outcome::Failed => VerificationState::Failed,
                };
                if report.outcome == Outcome::Failed {
                    self.last_error = report.detail.clone();
                }
                self.report = Some(report);
                // A finished session takes no further codes.
                self.stop_camera()
            }
            Event::Reset => {
                let effects = self.stop_everything();
                self.clear();
                effects
            }
            Event::Unmount => {
                let effects = self.stop_everything();
                self.camera = CameraState::Idle;
                self.closed = true;
                effects
            }
        }
    }

    /// Whether a verification can be started right now.
    pub fn can_verify(&self) -> bool {
        !self.closed
            && self.verification == VerificationState::NotStarted
            && (self.decoded_payload.is_some() || self.artifact.is_some())
    }

    /// The camera may only run while the session can still take a code.
    fn accepts_codes(&self) -> bool {
        self.decoded_payload.is_none() && !self.verification.is_terminal()
    }

    fn activate(&mut self) -> Vec<Effect> {
        match self.camera {
            CameraState::Idle | CameraState::Paused if self.accepts_codes() => self.request(),
            _ => Vec::new(),
        }
    }

    fn pause(&mut self) -> Vec<Effect> {
        match self.camera {
            CameraState::Streaming => {
                self.camera = CameraState::Paused;
                vec![Effect::CancelScanLoop, Effect::ReleaseDevice]
            }
            CameraState::Requesting => {
                self.camera = CameraState::Paused;
                vec![Effect::ReleaseDevice]
            }
            _ => Vec::new(),
        }
    }

    fn resume(&mut self) -> Vec<Effect> {
        if self.camera == CameraState::Paused && self.accepts_codes() {
            self.request()
        } else {
            Vec::new()
        }
    }

    fn retry(&mut self) -> Vec<Effect> {
        if !self.camera.is_failure() {
            return Vec::new();
        }
        let mut effects = self.stop_everything();
        self.clear();
        effects.extend(self.request());
        effects
    }

    fn request(&mut self) -> Vec<Effect> {
        self.camera = CameraState::Requesting;
        self.last_error = None;
        vec![Effect::AcquireDevice]
    }

    fn begin_verification(&mut self) -> Vec<Effect> {
        if !self.can_verify() {
            return Vec::new();
        }
        let subject = match (&self.decoded_payload, &self.artifact) {
            (Some(payload), _) => Subject::Payload(payload.clone()),
            (None, Some(artifact)) => Subject::Artifact(artifact.clone()),
            (None, None) => return Vec::new(),
        };

        let mut effects = self.stop_camera();
        self.verification = VerificationState::InProgress;
        effects.push(Effect::BeginVerification(subject));
        effects
    }

    /// Move a live or paused camera to `Idle`.
    fn stop_camera(&mut self) -> Vec<Effect> {
        let effects = match self.camera {
            CameraState::Streaming => vec![Effect::CancelScanLoop, Effect::ReleaseDevice],
            CameraState::Requesting => vec![Effect::ReleaseDevice],
            _ => Vec::new(),
        };
        if matches!(
            self.camera,
            CameraState::Streaming | CameraState::Requesting | CameraState::Paused
        ) {
            self.camera = CameraState::Idle;
        }
        effects
    }

    /// Effects that tear down whatever is currently running.
    fn stop_everything(&self) -> Vec<Effect> {
        let mut effects = Vec::new();
        match self.camera {
            CameraState::Streaming => {
                effects.push(Effect::CancelScanLoop);
                effects.push(Effect::ReleaseDevice);
            }
            CameraState::Requesting => effects.push(Effect::ReleaseDevice),
            _ => {}
        }
        if self.verification == VerificationState::InProgress {
            effects.push(Effect::AbandonVerification);
        }
        effects
    }

    fn clear(&mut self) {
        *self = Session::new();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn streaming() -> Session {
        let mut s = Session::new();
        assert_eq!(s.apply(Event::Activate), vec![Effect::AcquireDevice]);
        assert_eq!(s.apply(Event::PermissionGranted), vec![Effect::StartScanLoop]);
        assert_eq!(s.camera, CameraState::Streaming);
        s
    }

    #[test]
    fn test_permission_denied_then_retry() {
        let mut s = Session::new();
        s.apply(Event::Activate);
        assert_eq!(s.camera, CameraState::Requesting);

        s.apply(Event::PermissionDenied("blocked".into()));
        assert_eq!(s.camera, CameraState::PermissionDenied);
        assert_eq!(s.last_error.as_deref(), Some("blocked"));

        assert_eq!(s.apply(Event::Retry), vec![Effect::AcquireDevice]);
        assert_eq!(s.camera, CameraState::Requesting);
        assert!(s.last_error.is_none());

        s.apply(Event::PermissionGranted);
        assert_eq!(s.camera, CameraState::Streaming);
    }

    #[test]
    fn test_device_failure_while_requesting() {
        let mut s = Session::new();
        s.apply(Event::Activate);
        assert!(s.apply(Event::DeviceFailed("no camera".into())).is_empty());
        assert_eq!(s.camera, CameraState::Error);
        assert_eq!(s.apply(Event::Toggle), vec![Effect::AcquireDevice]);
    }

    #[test]
    fn test_device_failure_while_streaming_releases() {
        let mut s = streaming();
        let effects = s.apply(Event::DeviceFailed("unplugged".into()));
        assert_eq!(effects, vec![Effect::CancelScanLoop, Effect::ReleaseDevice]);
        assert_eq!(s.camera, CameraState::Error);
    }

    #[test]
    fn test_decode_captures_payload_and_starts_verification() {
        let mut s = streaming();
        let effects = s.apply(Event::Decoded("ABC123".into()));
        assert_eq!(
            effects,
            vec![
                Effect::CancelScanLoop,
                Effect::ReleaseDevice,
                Effect::BeginVerification(Subject::Payload("ABC123".into())),
            ]
        );
        assert_eq!(s.decoded_payload.as_deref(), Some("ABC123"));
        assert_eq!(s.camera, CameraState::Idle);
        assert_eq!(s.verification, VerificationState::InProgress);
    }

    #[test]
    fn test_payload_set_at_most_once() {
        let mut s = streaming();
        s.apply(Event::Decoded("first".into()));
        assert!(s.apply(Event::Decoded("second".into())).is_empty());
        assert_eq!(s.decoded_payload.as_deref(), Some("first"));

        // The camera cannot be restarted for a second decode before a reset.
        assert!(s.apply(Event::Activate).is_empty());
        assert_eq!(s.camera, CameraState::Idle);
    }

    #[test]
    fn test_decode_ignored_outside_streaming() {
        let mut s = Session::new();
        assert!(s.apply(Event::Decoded("x".into())).is_empty());
        assert!(s.decoded_payload.is_none());
    }

    #[test]
    fn test_verify_requires_subject() {
        let mut s = Session::new();
        assert!(s.apply(Event::VerifyRequested).is_empty());
        assert_eq!(s.verification, VerificationState::NotStarted);
    }

    #[test]
    fn test_verify_while_in_progress_is_noop() {
        let mut s = Session::new();
        s.apply(Event::ArtifactSupplied(Artifact::new("label.png", vec![1, 2, 3])));
        let effects = s.apply(Event::VerifyRequested);
        assert!(matches!(
            effects.as_slice(),
            [Effect::BeginVerification(Subject::Artifact(_))]
        ));
        assert_eq!(s.verification, VerificationState::InProgress);
        assert!(s.apply(Event::VerifyRequested).is_empty());
    }

    #[test]
    fn test_manual_verify_stops_camera() {
        let mut s = streaming();
        s.apply(Event::ArtifactSupplied(Artifact::new("label.png", vec![])));
        let effects = s.apply(Event::VerifyRequested);
        assert_eq!(effects[0], Effect::CancelScanLoop);
        assert_eq!(effects[1], Effect::ReleaseDevice);
        assert_eq!(s.camera, CameraState::Idle);
    }

    #[test]
    fn test_verification_failure_is_distinct() {
        let mut s = streaming();
        s.apply(Event::Decoded("FAKE".into()));
        s.apply(Event::VerificationFinished(VerificationReport::failed(
            "FAKE",
            "unknown product code",
        )));
        assert_eq!(s.verification, VerificationState::Failed);
        assert_eq!(s.last_error.as_deref(), Some("unknown product code"));
        // No second verification within the same session.
        assert!(s.apply(Event::VerifyRequested).is_empty());
    }

    #[test]
    fn test_stale_verification_result_ignored() {
        let mut s = Session::new();
        s.apply(Event::VerificationFinished(VerificationReport::success("x")));
        assert_eq!(s.verification, VerificationState::NotStarted);
        assert!(s.report.is_none());
    }

    #[test]
    fn test_pause_and_resume() {
        let mut s = streaming();
        assert_eq!(
            s.apply(Event::Pause),
            vec![Effect::CancelScanLoop, Effect::ReleaseDevice]
        );
        assert_eq!(s.camera, CameraState::Paused);
        assert_eq!(s.apply(Event::Resume), vec![Effect::AcquireDevice]);
        assert_eq!(s.camera, CameraState::Requesting);
    }

    #[test]
    fn test_paused_camera_stays_off_after_outcome() {
        let mut s = Session::new();
        s.apply(Event::ArtifactSupplied(Artifact::new("a.png", vec![1])));
        s.apply(Event::VerifyRequested);
        assert_eq!(s.verification, VerificationState::InProgress);

        // The camera may run while the upload is being checked.
        s.apply(Event::Activate);
        s.apply(Event::PermissionGranted);
        s.apply(Event::Pause);
        assert_eq!(s.camera, CameraState::Paused);

        let effects = s.apply(Event::VerificationFinished(VerificationReport::success("a.png")));
        assert!(effects.is_empty());
        assert_eq!(s.camera, CameraState::Idle);

        assert!(s.apply(Event::Resume).is_empty());
        assert!(s.apply(Event::Toggle).is_empty());
        assert!(s.apply(Event::Activate).is_empty());
        assert!(s.apply(Event::Decoded("LATE".into())).is_empty());
        assert!(s.decoded_payload.is_none());
        assert_eq!(s.report.as_ref().unwrap().subject_id, "a.png");
    }

    #[test]
    fn test_outcome_stops_a_live_camera() {
        let mut s = Session::new();
        s.apply(Event::ArtifactSupplied(Artifact::new("a.png", vec![1])));
        s.apply(Event::VerifyRequested);
        s.apply(Event::Activate);
        s.apply(Event::PermissionGranted);
        assert_eq!(s.camera, CameraState::Streaming);

        let effects = s.apply(Event::VerificationFinished(VerificationReport::failed(
            "a.png",
            "no code found in artifact",
        )));
        assert_eq!(effects, vec![Effect::CancelScanLoop, Effect::ReleaseDevice]);
        assert_eq!(s.camera, CameraState::Idle);
        assert!(s.apply(Event::Decoded("LATE".into())).is_empty());
    }

    #[test]
    fn test_stale_grant_is_released() {
        let mut s = Session::new();
        s.apply(Event::Activate);
        s.apply(Event::Pause);
        assert_eq!(s.apply(Event::PermissionGranted), vec![Effect::ReleaseDevice]);
        assert_eq!(s.camera, CameraState::Paused);
    }

    #[test]
    fn test_reset_clears_session() {
        let mut s = streaming();
        s.apply(Event::Decoded("ABC123".into()));
        let old_id = s.id;
        let effects = s.apply(Event::Reset);
        assert_eq!(effects, vec![Effect::AbandonVerification]);
        assert_eq!(s.camera, CameraState::Idle);
        assert_eq!(s.verification, VerificationState::NotStarted);
        assert!(s.decoded_payload.is_none());
        assert_ne!(s.id, old_id);
    }

    #[test]
    fn test_unmount_closes_session() {
        let mut s = streaming();
        let effects = s.apply(Event::Unmount);
        assert_eq!(effects, vec![Effect::CancelScanLoop, Effect::ReleaseDevice]);
        assert!(s.closed);
        assert!(s.apply(Event::Activate).is_empty());
    }
}

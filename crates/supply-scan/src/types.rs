//! Core data types for scan sessions and verification.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Lifecycle of the camera device within a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CameraState {
    Idle,
    Requesting,
    Streaming,
    PermissionDenied,
    Error,
    Paused,
}

impl CameraState {
    /// Whether the user can recover from this state with a retry.
    pub fn is_failure(self) -> bool {
        matches!(self, CameraState::PermissionDenied | CameraState::Error)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            CameraState::Idle => "idle",
            CameraState::Requesting => "requesting",
            CameraState::Streaming => "streaming",
            CameraState::PermissionDenied => "permission_denied",
            CameraState::Error => "error",
            CameraState::Paused => "paused",
        }
    }
}

impl std::fmt::Display for CameraState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Progress of the verification step.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VerificationState {
    NotStarted,
    InProgress,
    Success,
    Failed,
}

impl VerificationState {
    /// Success or Failed.
    pub fn is_terminal(self) -> bool {
        matches!(self, VerificationState::Success | VerificationState::Failed)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            VerificationState::NotStarted => "not_started",
            VerificationState::InProgress => "in_progress",
            VerificationState::Success => "success",
            VerificationState::Failed => "failed",
        }
    }
}

impl std::fmt::Display for VerificationState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Which way the camera should face.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Facing {
    Environment,
    User,
}

/// Capability constraints handed to the camera device.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CaptureConstraints {
    pub facing: Facing,
    pub ideal_width: u32,
    pub ideal_height: u32,
}

impl Default for CaptureConstraints {
    fn default() -> Self {
        Self {
            facing: Facing::Environment,
            ideal_width: 1280,
            ideal_height: 720,
        }
    }
}

/// A manually supplied artifact, typically an uploaded label image.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Artifact {
    pub name: String,
    pub mime: Option<String>,
    #[serde(skip)]
    pub bytes: Vec<u8>,
}

impl Artifact {
    pub fn new(name: impl Into<String>, bytes: Vec<u8>) -> Self {
        Self {
            name: name.into(),
            mime: None,
            bytes,
        }
    }

    pub fn with_mime(mut self, mime: impl Into<String>) -> Self {
        self.mime = Some(mime.into());
        self
    }

    /// Read an artifact from disk, named after the file.
    pub fn from_file(path: &std::path::Path) -> ScanResult<Self> {
        let bytes = std::fs::read(path)?;
        let name = path
            .file_name()
            .and_then(|n| n.to_str())
            .unwrap_or("artifact")
            .to_string();
        Ok(Self::new(name, bytes))
    }

    /// Decode a base64 upload.
    pub fn from_base64(name: impl Into<String>, data: &str) -> ScanResult<Self> {
        use base64::Engine;
        let bytes = base64::engine::general_purpose::STANDARD
            .decode(data.trim())
            .map_err(|e| ScanError::InvalidInput(format!("Invalid base64: {e}")))?;
        Ok(Self::new(name, bytes))
    }
}

impl std::fmt::Debug for Artifact {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Artifact")
            .field("name", &self.name)
            .field("mime", &self.mime)
            .field("len", &self.bytes.len())
            .finish()
    }
}

/// What gets handed to the verifier.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Subject {
    Payload(String),
    Artifact(Artifact),
}

impl Subject {
    /// Identifier shown next to the outcome.
    pub fn label(&self) -> &str {
        match self {
            Subject::Payload(p) => p,
            Subject::Artifact(a) => &a.name,
        }
    }
}

/// The two outcomes of a verification.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Outcome {
    Success,
    Failed,
}

/// Result of one verification.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VerificationReport {
    pub subject_id: String,
    pub outcome: Outcome,
    pub product: Option<String>,
    pub manufacturer: Option<String>,
    pub detail: Option<String>,
    pub checked_at: DateTime<Utc>,
}

impl VerificationReport {
    pub fn success(subject_id: impl Into<String>) -> Self {
        Self {
            subject_id: subject_id.into(),
            outcome: Outcome::Success,
            product: None,
            manufacturer: None,
            detail: None,
            checked_at: Utc::now(),
        }
    }

    pub fn failed(subject_id: impl Into<String>, detail: impl Into<String>) -> Self {
        Self {
            subject_id: subject_id.into(),
            outcome: Outcome::Failed,
            product: None,
            manufacturer: None,
            detail: Some(detail.into()),
            checked_at: Utc::now(),
        }
    }
}

/// Errors that can occur while scanning or verifying.
#[derive(thiserror::Error, Debug)]
pub enum ScanError {
    #[error("Image error: {0}")]
    Image(#[from] image::ImageError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Camera permission denied: {0}")]
    PermissionDenied(String),

    #[error("Camera unavailable: {0}")]
    DeviceUnavailable(String),

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Catalog error: {0}")]
    Catalog(String),

    #[error("Controller is no longer running")]
    ControllerClosed,
}

impl ScanError {
    /// Device failures the user fixes in their permission settings.
    pub fn is_permission(&self) -> bool {
        match self {
            ScanError::PermissionDenied(_) => true,
            ScanError::Io(e) => e.kind() == std::io::ErrorKind::PermissionDenied,
            _ => false,
        }
    }
}

/// Convenience result type.
pub type ScanResult<T> = Result<T, ScanError>;

//! Camera device abstraction and the scoped device handle.
//!
//! A `CameraDevice` hands out a `FrameSource` once permission is granted.
//! The source is wrapped in a `DeviceHandle`, which stops it exactly once
//! when dropped.

use std::path::{Path, PathBuf};
use std::time::Instant;

use async_trait::async_trait;
use image::DynamicImage;

use crate::frame::{fit_to_constraints, is_supported_format, Frame};
use crate::types::{CaptureConstraints, ScanError, ScanResult};

/// A device that can produce a stream of frames.
#[async_trait]
pub trait CameraDevice: Send + Sync {
    /// Request access to the device.
    ///
    /// Fails with `ScanError::PermissionDenied` when access is refused; any
    /// other error is treated as the device being unavailable. The returned
    /// future must be safe to drop before it resolves.
    async fn acquire(&self, constraints: &CaptureConstraints) -> ScanResult<Box<dyn FrameSource>>;

    /// Human-readable device name for logs.
    fn name(&self) -> &str;
}

/// An open stream of frames.
pub trait FrameSource: Send {
    /// The current frame, or `None` when no frame is ready yet.
    fn next_frame(&mut self) -> Option<Frame>;

    /// Stop the stream and give the device back.
    fn stop(&mut self);
}

/// Exclusive, scoped ownership of an open frame source.
pub struct DeviceHandle {
    source: Box<dyn FrameSource>,
    opened_at: Instant,
}

impl DeviceHandle {
    pub fn new(source: Box<dyn FrameSource>) -> Self {
        Self {
            source,
            opened_at: Instant::now(),
        }
    }

    pub fn next_frame(&mut self) -> Option<Frame> {
        self.source.next_frame()
    }
}

impl Drop for DeviceHandle {
    fn drop(&mut self) {
        self.source.stop();
        tracing::debug!(
            "Camera released after {:.1}s",
            self.opened_at.elapsed().as_secs_f32()
        );
    }
}

/// A camera that is never available.
///
/// Used for sessions that only verify uploaded artifacts; activating the
/// camera lands in the `Error` state.
pub struct NoCamera;

#[async_trait]
impl CameraDevice for NoCamera {
    async fn acquire(&self, _constraints: &CaptureConstraints) -> ScanResult<Box<dyn FrameSource>> {
        Err(ScanError::DeviceUnavailable(
            "no camera configured".to_string(),
        ))
    }

    fn name(&self) -> &str {
        "none"
    }
}

/// A replayed camera feed backed by a directory of images.
///
/// Files are played in name order and the feed loops.
#[derive(Debug, Clone)]
pub struct ImageSequenceCamera {
    dir: PathBuf,
    name: String,
}

impl ImageSequenceCamera {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        let dir = dir.into();
        let name = format!("image-sequence:{}", dir.display());
        Self { dir, name }
    }

    fn load_frames(dir: &Path, constraints: &CaptureConstraints) -> ScanResult<Vec<DynamicImage>> {
        let entries = std::fs::read_dir(dir).map_err(|e| {
            if e.kind() == std::io::ErrorKind::PermissionDenied {
                ScanError::PermissionDenied(format!("{}: {e}", dir.display()))
            } else {
                ScanError::DeviceUnavailable(format!("{}: {e}", dir.display()))
            }
        })?;

        let mut paths: Vec<PathBuf> = entries
            .flatten()
            .map(|e| e.path())
            .filter(|p| p.is_file() && is_supported_format(p))
            .collect();
        paths.sort();

        let mut frames = Vec::with_capacity(paths.len());
        for path in paths {
            match image::open(&path) {
                Ok(img) => frames.push(fit_to_constraints(img, constraints)),
                Err(e) => tracing::warn!("Skipping unreadable frame {}: {e}", path.display()),
            }
        }

        if frames.is_empty() {
            return Err(ScanError::DeviceUnavailable(format!(
                "no frames in {}",
                dir.display()
            )));
        }
        Ok(frames)
    }
}

#[async_trait]
impl CameraDevice for ImageSequenceCamera {
    async fn acquire(&self, constraints: &CaptureConstraints) -> ScanResult<Box<dyn FrameSource>> {
        let dir = self.dir.clone();
        let constraints = *constraints;
        let frames = tokio::task::spawn_blocking(move || Self::load_frames(&dir, &constraints))
            .await
            .map_err(|e| ScanError::DeviceUnavailable(format!("frame loader failed: {e}")))??;

        tracing::info!("{} opened with {} frame(s)", self.name, frames.len());
        Ok(Box::new(ImageSequenceSource {
            frames: frames.into_iter().map(|f| f.to_rgba8()).collect(),
            cursor: 0,
            sequence: 0,
            stopped: false,
        }))
    }

    fn name(&self) -> &str {
        &self.name
    }
}

struct ImageSequenceSource {
    frames: Vec<image::RgbaImage>,
    cursor: usize,
    sequence: u64,
    stopped: bool,
}

impl FrameSource for ImageSequenceSource {
    fn next_frame(&mut self) -> Option<Frame> {
        if self.stopped || self.frames.is_empty() {
            return None;
        }
        let image = self.frames[self.cursor].clone();
        self.cursor = (self.cursor + 1) % self.frames.len();
        self.sequence += 1;
        Some(Frame::new(self.sequence, image))
    }

    fn stop(&mut self) {
        self.stopped = true;
        self.frames.clear();
    }
}

//! supply-scan: camera-based code acquisition and supply verification.

pub mod config;
pub mod controller;
pub mod decode;
pub mod device;
pub mod frame;
pub mod scheduler;
pub mod session;
pub mod types;
pub mod verify;

pub use config::ScanConfig;
pub use controller::{
    AcquisitionController, Command, ControllerHandle, SessionSnapshot, SessionSummary,
};
pub use decode::{Decoder, QrDecoder};
pub use device::{CameraDevice, DeviceHandle, FrameSource, ImageSequenceCamera, NoCamera};
pub use frame::{frame_from_bytes, Frame};
pub use scheduler::{DisplayClock, FrameClock, ImmediateClock, ScanLoop, StopReason};
pub use session::{Effect, Event, Session};
pub use types::*;
pub use verify::{Catalog, CatalogEntry, CatalogVerifier, FixedDelayVerifier, Verifier};

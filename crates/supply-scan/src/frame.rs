//! Raster frames: loading, downscaling and luma conversion.

use std::path::Path;

use image::{DynamicImage, GenericImageView, GrayImage, ImageFormat, RgbaImage};

use crate::types::{CaptureConstraints, ScanResult};

/// One captured video frame.
#[derive(Debug, Clone)]
pub struct Frame {
    pub sequence: u64,
    pub image: RgbaImage,
}

impl Frame {
    pub fn new(sequence: u64, image: RgbaImage) -> Self {
        Self { sequence, image }
    }

    /// A black frame, mostly useful for fakes.
    pub fn blank(sequence: u64, width: u32, height: u32) -> Self {
        Self::new(sequence, RgbaImage::new(width, height))
    }

    pub fn width(&self) -> u32 {
        self.image.width()
    }

    pub fn height(&self) -> u32 {
        self.image.height()
    }

    /// Greyscale plane used by the decoders.
    pub fn to_luma(&self) -> GrayImage {
        DynamicImage::ImageRgba8(self.image.clone()).to_luma8()
    }
}

/// Decode an in-memory image, using the MIME type as a format hint.
pub fn frame_from_bytes(bytes: &[u8], mime: Option<&str>) -> ScanResult<Frame> {
    let format = match mime {
        Some("image/png") => Some(ImageFormat::Png),
        Some("image/jpeg") | Some("image/jpg") => Some(ImageFormat::Jpeg),
        Some("image/webp") => Some(ImageFormat::WebP),
        Some("image/gif") => Some(ImageFormat::Gif),
        _ => None,
    };

    let img = if let Some(fmt) = format {
        image::load_from_memory_with_format(bytes, fmt)?
    } else {
        image::load_from_memory(bytes)?
    };
    Ok(Frame::new(0, img.to_rgba8()))
}

/// Downscale an image so it fits the ideal capture size, preserving aspect ratio.
pub fn fit_to_constraints(img: DynamicImage, constraints: &CaptureConstraints) -> DynamicImage {
    let (w, h) = img.dimensions();
    if w > constraints.ideal_width || h > constraints.ideal_height {
        img.resize(
            constraints.ideal_width,
            constraints.ideal_height,
            image::imageops::FilterType::Triangle,
        )
    } else {
        img
    }
}

/// Check if a file path points to a supported image format.
pub fn is_supported_format(path: &Path) -> bool {
    let ext = path
        .extension()
        .and_then(|e| e.to_str())
        .unwrap_or("")
        .to_lowercase();

    matches!(
        ext.as_str(),
        "png" | "jpg" | "jpeg" | "webp" | "gif" | "bmp" | "tiff" | "tif" | "ico"
    )
}

//! Stateless code decoding over raster frames.

use image::GrayImage;

use crate::frame::Frame;

/// Pure decode function: a frame either yields a payload or nothing.
pub trait Decoder: Send + Sync {
    fn decode(&self, frame: &Frame) -> Option<String>;
}

impl<F> Decoder for F
where
    F: Fn(&Frame) -> Option<String> + Send + Sync,
{
    fn decode(&self, frame: &Frame) -> Option<String> {
        self(frame)
    }
}

/// QR code decoder.
#[derive(Debug, Clone, Default)]
pub struct QrDecoder {
    /// Also try the inverted image (light modules on dark background).
    pub invert: bool,
}

impl QrDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_inversion(mut self, invert: bool) -> Self {
        self.invert = invert;
        self
    }
}

impl Decoder for QrDecoder {
    fn decode(&self, frame: &Frame) -> Option<String> {
        if frame.width() == 0 || frame.height() == 0 {
            return None;
        }

        let luma = frame.to_luma();
        if let Some(payload) = decode_luma(&luma, false) {
            return Some(payload);
        }
        if self.invert {
            return decode_luma(&luma, true);
        }
        None
    }
}

fn decode_luma(luma: &GrayImage, inverted: bool) -> Option<String> {
    let (w, h) = luma.dimensions();
    let mut prepared = rqrr::PreparedImage::prepare_from_greyscale(w as usize, h as usize, |x, y| {
        let v = luma.get_pixel(x as u32, y as u32).0[0];
        if inverted {
            255 - v
        } else {
            v
        }
    });

    for grid in prepared.detect_grids() {
        match grid.decode() {
            Ok((_meta, content)) if !content.is_empty() => return Some(content),
            Ok(_) => {}
            Err(e) => tracing::trace!("QR grid found but not decodable: {e:?}"),
        }
    }
    None
}

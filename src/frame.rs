//! Frame container and channel-order normalization.
//!
//! Acquisition backends and the display/encode layer disagree on channel
//! order: the peer capture device delivers blue-first (BGR) pixel data,
//! while JPEG decode and the JPEG encoder work red-first (RGB). `Frame`
//! holds RGB only; conversion happens explicitly at the wire boundary in
//! both directions (`from_wire` on read, `to_wire` on write), so a frame
//! can never reach disk or the display with its red/blue channels swapped.

use anyhow::{anyhow, Context, Result};
use image::codecs::jpeg::JpegEncoder;
use std::fs::File;
use std::io::BufWriter;
use std::path::Path;
use std::sync::{Arc, Mutex};

const JPEG_QUALITY: u8 = 90;

/// Channel order of pixel data at an acquisition or encode boundary.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ChannelOrder {
    Rgb,
    Bgr,
}

/// A single video frame, 8-bit RGB, tightly packed.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Frame {
    pixels: Vec<u8>,
    width: u32,
    height: u32,
}

impl Frame {
    /// Build a frame from wire pixel data, normalizing to RGB.
    pub fn from_wire(
        mut pixels: Vec<u8>,
        width: u32,
        height: u32,
        order: ChannelOrder,
    ) -> Result<Self> {
        let expected = width
            .checked_mul(height)
            .and_then(|v| v.checked_mul(3))
            .ok_or_else(|| anyhow!("frame dimensions overflow"))? as usize;
        if pixels.len() != expected {
            return Err(anyhow!(
                "frame length mismatch: expected {}, got {}",
                expected,
                pixels.len()
            ));
        }
        if order == ChannelOrder::Bgr {
            swap_red_blue(&mut pixels);
        }
        Ok(Self {
            pixels,
            width,
            height,
        })
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    /// RGB pixel data.
    pub fn pixels(&self) -> &[u8] {
        &self.pixels
    }

    /// Pixel data converted back to the requested wire order. The inverse
    /// of the normalization done by `from_wire`.
    pub fn to_wire(&self, order: ChannelOrder) -> Vec<u8> {
        let mut pixels = self.pixels.clone();
        if order == ChannelOrder::Bgr {
            swap_red_blue(&mut pixels);
        }
        pixels
    }

    /// Encode the frame as a JPEG file at `path`.
    pub fn encode_jpeg(&self, path: &Path) -> Result<()> {
        let file = File::create(path)
            .with_context(|| format!("create capture file {}", path.display()))?;
        let mut writer = BufWriter::new(file);
        let mut encoder = JpegEncoder::new_with_quality(&mut writer, JPEG_QUALITY);
        encoder
            .encode(
                &self.pixels,
                self.width,
                self.height,
                image::ExtendedColorType::Rgb8,
            )
            .with_context(|| format!("encode jpeg to {}", path.display()))?;
        Ok(())
    }
}

fn swap_red_blue(pixels: &mut [u8]) {
    for px in pixels.chunks_exact_mut(3) {
        px.swap(0, 2);
    }
}

// ----------------------------------------------------------------------------
// LatestFrame: shared most-recent-frame slot
// ----------------------------------------------------------------------------

/// Shared slot holding the most recently delivered frame.
///
/// The push acquisition thread publishes into it; the session snapshots it
/// at capture time. Cloneable handle, one slot.
#[derive(Clone, Default)]
pub struct LatestFrame {
    slot: Arc<Mutex<Option<Frame>>>,
}

impl LatestFrame {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn publish(&self, frame: Frame) {
        *self.lock() = Some(frame);
    }

    pub fn snapshot(&self) -> Option<Frame> {
        self.lock().clone()
    }

    pub fn clear(&self) {
        *self.lock() = None;
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Option<Frame>> {
        match self.slot.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }
}

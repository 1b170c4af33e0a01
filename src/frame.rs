//! Captured frames and their raw driver-side representation

use std::time::Instant;

/// Pixel layout of a raw frame as delivered by the driver
///
/// Anything more exotic (packed Bayer patterns and friends) is converted by
/// the driver collaborator before it reaches the pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PixelFormat {
    /// Interleaved blue/green/red, 8 bits per channel
    Bgr8,
    /// Single 8-bit channel
    Mono8,
}

impl PixelFormat {
    /// Bytes per pixel
    pub fn depth(&self) -> usize {
        match self {
            PixelFormat::Bgr8 => 3,
            PixelFormat::Mono8 => 1,
        }
    }
}

/// A frame as handed over by the driver callback, before canonicalization
#[derive(Debug, Clone)]
pub struct RawFrame {
    pub width: u32,
    pub height: u32,
    pub format: PixelFormat,
    pub data: Vec<u8>,
}

impl RawFrame {
    pub fn new(width: u32, height: u32, format: PixelFormat, data: Vec<u8>) -> Self {
        Self {
            width,
            height,
            format,
            data,
        }
    }
}

/// Canonical BGR8 image buffer used throughout the pipeline
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FrameImage {
    pub width: u32,
    pub height: u32,
    /// Interleaved BGR8 pixel data, row major
    pub data: Vec<u8>,
}

impl FrameImage {
    pub fn new(width: u32, height: u32, data: Vec<u8>) -> Self {
        Self {
            width,
            height,
            data,
        }
    }

    /// Canonicalize a raw frame into the pipeline's BGR8 layout
    ///
    /// Returns `None` when the buffer does not match the declared geometry.
    pub fn from_raw(raw: &RawFrame) -> Option<Self> {
        let pixels = raw.width as usize * raw.height as usize;
        if raw.data.len() != pixels * raw.format.depth() {
            return None;
        }
        let data = match raw.format {
            PixelFormat::Bgr8 => raw.data.clone(),
            PixelFormat::Mono8 => {
                let mut bgr = Vec::with_capacity(pixels * 3);
                for &v in &raw.data {
                    bgr.extend_from_slice(&[v, v, v]);
                }
                bgr
            }
        };
        Some(Self::new(raw.width, raw.height, data))
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty() || self.width == 0 || self.height == 0
    }

    /// Get a BGR pixel at (x, y)
    pub fn pixel(&self, x: u32, y: u32) -> Option<[u8; 3]> {
        if x >= self.width || y >= self.height {
            return None;
        }
        let idx = ((y * self.width + x) * 3) as usize;
        Some([self.data[idx], self.data[idx + 1], self.data[idx + 2]])
    }
}

/// One captured image plus its arrival timestamp
///
/// Immutable once constructed; ownership moves from the producer callback to
/// whichever consumer pops it off the frame channel.
#[derive(Debug, Clone)]
pub struct Frame {
    image: FrameImage,
    timestamp: Instant,
    used: bool,
}

impl Frame {
    pub fn new(image: FrameImage, timestamp: Instant) -> Self {
        Self {
            image,
            timestamp,
            used: false,
        }
    }

    pub fn empty(&self) -> bool {
        self.image.is_empty()
    }

    pub fn image(&self) -> &FrameImage {
        &self.image
    }

    /// Monotonic arrival time stamped inside the frame callback
    pub fn timestamp(&self) -> Instant {
        self.timestamp
    }

    pub fn set_used(&mut self) {
        self.used = true;
    }

    pub fn is_used(&self) -> bool {
        self.used
    }
}

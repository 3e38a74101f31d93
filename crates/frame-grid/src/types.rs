use serde::{Deserialize, Serialize};
use std::fmt;
use time::OffsetDateTime;

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum PixelFormat {
    Bgr8,
    Rgb8,
    Bgra8,
    Gray8,
}

impl PixelFormat {
    pub fn channels(self) -> usize {
        match self {
            PixelFormat::Bgr8 | PixelFormat::Rgb8 => 3,
            PixelFormat::Bgra8 => 4,
            PixelFormat::Gray8 => 1,
        }
    }
}

/// Width and height in pixels.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash, Serialize, Deserialize)]
pub struct Resolution {
    pub width: u32,
    pub height: u32,
}

impl Resolution {
    pub const fn new(width: u32, height: u32) -> Self {
        Self { width, height }
    }

    pub fn pixels(self) -> usize {
        self.width as usize * self.height as usize
    }

    /// Parse `WIDTHxHEIGHT`, e.g. `640x360`.
    pub fn parse(s: &str) -> Option<Self> {
        let (w, h) = s.trim().split_once(['x', 'X'])?;
        let width = w.trim().parse().ok()?;
        let height = h.trim().parse().ok()?;
        Some(Self { width, height })
    }
}

impl fmt::Display for Resolution {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}x{}", self.width, self.height)
    }
}

/// A decoded raster image, packed rows without padding.
#[derive(Clone, Debug)]
pub struct Frame {
    pub width: u32,
    pub height: u32,
    pub pixel_format: PixelFormat,
    pub data: Vec<u8>,
    pub ts: Option<OffsetDateTime>,
}

impl Frame {
    /// Solid-color BGR frame, used for placeholders.
    pub fn solid(resolution: Resolution, bgr: [u8; 3]) -> Self {
        let mut data = Vec::with_capacity(resolution.pixels() * 3);
        for _ in 0..resolution.pixels() {
            data.extend_from_slice(&bgr);
        }
        Self {
            width: resolution.width,
            height: resolution.height,
            pixel_format: PixelFormat::Bgr8,
            data,
            ts: None,
        }
    }

    pub fn resolution(&self) -> Resolution {
        Resolution::new(self.width, self.height)
    }

    pub fn channels(&self) -> usize {
        self.pixel_format.channels()
    }

    pub fn expected_len(&self) -> usize {
        self.resolution().pixels() * self.channels()
    }

    /// Bytes of one packed row.
    pub fn row_bytes(&self) -> usize {
        self.width as usize * self.channels()
    }
}

/// One configured camera feed.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct Source {
    pub id: String,
    pub resolution: Resolution,
    pub index: usize,
}

impl Source {
    pub fn new(id: impl Into<String>, resolution: Resolution, index: usize) -> Self {
        Self {
            id: id.into(),
            resolution,
            index,
        }
    }
}

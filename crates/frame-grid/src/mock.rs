use crate::{BackendHandle, Error, Frame, PixelFormat, Result, SourceBackend};
use std::thread;
use std::time::Duration;
use time::OffsetDateTime;

const SCHEME: &str = "pattern://";

/// Synthetic source for `pattern://<name>[?w=..&h=..&fps=..&gray]` ids.
///
/// Any other identifier fails to open, so real stream URLs show the
/// placeholder when no decoding library is compiled in.
#[derive(Debug, Default)]
pub struct PatternBackend;

impl PatternBackend {
    pub fn new() -> Self {
        Self
    }
}

#[derive(Clone, Debug, PartialEq)]
struct PatternParams {
    seed: u8,
    width: u32,
    height: u32,
    fps: u32,
    gray: bool,
}

fn parse_params(source_id: &str) -> Option<PatternParams> {
    let rest = source_id.strip_prefix(SCHEME)?;
    let (name, query) = rest.split_once('?').unwrap_or((rest, ""));
    let seed = name.bytes().fold(0u8, |acc, b| acc.wrapping_mul(31).wrapping_add(b));
    let mut params = PatternParams {
        seed,
        width: 320,
        height: 240,
        fps: 30,
        gray: false,
    };
    for pair in query.split('&').filter(|p| !p.is_empty()) {
        let (key, value) = pair.split_once('=').unwrap_or((pair, ""));
        match key {
            "w" => params.width = value.parse().ok()?,
            "h" => params.height = value.parse().ok()?,
            "fps" => params.fps = value.parse().ok()?,
            "gray" => params.gray = true,
            _ => return None,
        }
    }
    if params.width == 0 || params.height == 0 {
        return None;
    }
    Some(params)
}

impl SourceBackend for PatternBackend {
    fn name(&self) -> &'static str {
        "pattern"
    }

    fn open(&mut self, source_id: &str) -> Result<Box<dyn BackendHandle>> {
        let params = parse_params(source_id)
            .ok_or_else(|| Error::open(source_id, "not a pattern:// source"))?;
        Ok(Box::new(PatternHandle { params, counter: 0 }))
    }
}

struct PatternHandle {
    params: PatternParams,
    counter: u64,
}

impl BackendHandle for PatternHandle {
    fn read(&mut self) -> Result<Frame> {
        if self.params.fps > 0 {
            thread::sleep(Duration::from_secs(1) / self.params.fps);
        }
        self.counter += 1;
        let PatternParams {
            seed,
            width,
            height,
            gray,
            ..
        } = self.params;
        let shift = (self.counter % 256) as u32;

        // Diagonal ramp scrolling one step per frame
        let (pixel_format, channels) = if gray {
            (PixelFormat::Gray8, 1)
        } else {
            (PixelFormat::Bgr8, 3)
        };
        let mut data = Vec::with_capacity(width as usize * height as usize * channels);
        for y in 0..height {
            for x in 0..width {
                let v = ((x + y + shift) % 256) as u8;
                if gray {
                    data.push(v);
                } else {
                    data.extend_from_slice(&[v, seed, v.wrapping_add(seed)]);
                }
            }
        }
        Ok(Frame {
            width,
            height,
            pixel_format,
            data,
            ts: Some(OffsetDateTime::now_utc()),
        })
    }

    fn release(self: Box<Self>) {}
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_params() {
        let s = parse_params("pattern://lobby?w=16&h=8&fps=0&gray").unwrap();
        assert_eq!((s.width, s.height, s.fps, s.gray), (16, 8, 0, true));
        assert!(parse_params("rtsp://cam/stream").is_none());
        assert!(parse_params("pattern://x?w=0").is_none());
        assert!(parse_params("pattern://x?bogus=1").is_none());
    }

    #[test]
    fn test_non_pattern_fails_to_open() {
        let mut b = PatternBackend::new();
        let err = b.open("rtsp://10.0.0.1/stream").err().unwrap();
        assert!(matches!(err, Error::OpenFailure { .. }));
    }

    #[test]
    fn test_frames_advance() {
        let mut b = PatternBackend::new();
        let mut h = b.open("pattern://a?w=4&h=2&fps=0").unwrap();
        let f1 = h.read().unwrap();
        let f2 = h.read().unwrap();
        assert_eq!(f1.data.len(), 4 * 2 * 3);
        assert_ne!(f1.data, f2.data);
        h.release();
    }
}

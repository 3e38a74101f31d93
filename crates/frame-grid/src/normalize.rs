//! Conversion of decoded frames to packed 3-channel BGR at the cell resolution.

use crate::{Error, Frame, PixelFormat, Resolution, Result};
use image::imageops::{self, FilterType};
use image::{ImageBuffer, Rgb};

/// Convert to BGR8 and resize to `target` when the geometry differs.
///
/// Frames with a buffer that does not match their declared geometry are
/// rejected, as are frames that still do not have three channels after
/// conversion.
pub fn normalize(frame: Frame, target: Resolution) -> Result<Frame> {
    if frame.width == 0 || frame.height == 0 {
        return Err(Error::NormalizationFailure(format!(
            "empty geometry {}",
            frame.resolution()
        )));
    }
    if frame.data.len() < frame.expected_len() {
        return Err(Error::NormalizationFailure(format!(
            "buffer holds {} bytes, {} {:?} needs {}",
            frame.data.len(),
            frame.resolution(),
            frame.pixel_format,
            frame.expected_len()
        )));
    }

    let bgr = to_bgr8(frame);
    if bgr.pixel_format.channels() != 3 || bgr.data.len() != bgr.expected_len() {
        return Err(Error::NormalizationFailure(
            "unexpected channel layout after conversion".into(),
        ));
    }

    if bgr.resolution() == target {
        return Ok(bgr);
    }
    resize_bgr8(bgr, target)
}

fn to_bgr8(frame: Frame) -> Frame {
    let Frame {
        width,
        height,
        pixel_format,
        mut data,
        ts,
    } = frame;
    let pixels = width as usize * height as usize;
    data.truncate(pixels * pixel_format.channels());

    let data = match pixel_format {
        PixelFormat::Bgr8 => data,
        PixelFormat::Rgb8 => {
            for px in data.chunks_exact_mut(3) {
                px.swap(0, 2);
            }
            data
        }
        PixelFormat::Bgra8 => data
            .chunks_exact(4)
            .flat_map(|px| [px[0], px[1], px[2]])
            .collect(),
        PixelFormat::Gray8 => data.iter().flat_map(|&v| [v, v, v]).collect(),
    };

    Frame {
        width,
        height,
        pixel_format: PixelFormat::Bgr8,
        data,
        ts,
    }
}

// Channel order does not matter to the resampler, so BGR rides in an Rgb buffer.
fn resize_bgr8(frame: Frame, target: Resolution) -> Result<Frame> {
    if target.width == 0 || target.height == 0 {
        return Err(Error::NormalizationFailure(format!(
            "invalid target resolution {target}"
        )));
    }
    let ts = frame.ts;
    let src: ImageBuffer<Rgb<u8>, Vec<u8>> =
        ImageBuffer::from_raw(frame.width, frame.height, frame.data).ok_or_else(|| {
            Error::NormalizationFailure("buffer does not fit frame geometry".into())
        })?;
    let resized = imageops::resize(&src, target.width, target.height, FilterType::Triangle);
    Ok(Frame {
        width: target.width,
        height: target.height,
        pixel_format: PixelFormat::Bgr8,
        data: resized.into_raw(),
        ts,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn frame(w: u32, h: u32, fmt: PixelFormat, data: Vec<u8>) -> Frame {
        Frame {
            width: w,
            height: h,
            pixel_format: fmt,
            data,
            ts: None,
        }
    }

    #[test]
    fn test_gray_expands_to_bgr() {
        let f = frame(2, 1, PixelFormat::Gray8, vec![10, 200]);
        let out = normalize(f, Resolution::new(2, 1)).unwrap();
        assert_eq!(out.pixel_format, PixelFormat::Bgr8);
        assert_eq!(out.data, vec![10, 10, 10, 200, 200, 200]);
    }

    #[test]
    fn test_alpha_is_dropped() {
        let f = frame(1, 1, PixelFormat::Bgra8, vec![1, 2, 3, 255]);
        let out = normalize(f, Resolution::new(1, 1)).unwrap();
        assert_eq!(out.data, vec![1, 2, 3]);
    }

    #[test]
    fn test_rgb_is_swapped() {
        let f = frame(1, 1, PixelFormat::Rgb8, vec![9, 8, 7]);
        let out = normalize(f, Resolution::new(1, 1)).unwrap();
        assert_eq!(out.data, vec![7, 8, 9]);
    }

    #[test]
    fn test_resize_to_target() {
        let f = frame(8, 4, PixelFormat::Bgr8, vec![50; 8 * 4 * 3]);
        let out = normalize(f, Resolution::new(4, 2)).unwrap();
        assert_eq!(out.resolution(), Resolution::new(4, 2));
        assert_eq!(out.data.len(), 4 * 2 * 3);
        assert!(out.data.iter().all(|b| *b == 50));
    }

    #[test]
    fn test_short_buffer_rejected() {
        let f = frame(4, 4, PixelFormat::Bgr8, vec![0; 10]);
        let err = normalize(f, Resolution::new(4, 4)).unwrap_err();
        assert!(matches!(err, Error::NormalizationFailure(_)));
        assert!(err.is_frame_level());
    }

    #[test]
    fn test_zero_geometry_rejected() {
        let f = frame(0, 4, PixelFormat::Bgr8, vec![]);
        assert!(normalize(f, Resolution::new(4, 4)).is_err());
    }

    #[test]
    fn test_trailing_padding_trimmed() {
        let mut data = vec![1u8; 2 * 2 * 3];
        data.extend_from_slice(&[0, 0, 0, 0]);
        let f = frame(2, 2, PixelFormat::Bgr8, data);
        let out = normalize(f, Resolution::new(2, 2)).unwrap();
        assert_eq!(out.data.len(), 12);
    }
}

use crate::{BackendHandle, BackendTimeouts, Error, Frame, PixelFormat, Result, SourceBackend};
use opencv::prelude::*;
use opencv::{core, videoio};
use std::time::Duration;
use time::OffsetDateTime;

/// Generic decode path through `cv::VideoCapture`.
pub struct OpenCvBackend {
    timeouts: BackendTimeouts,
}

impl OpenCvBackend {
    pub fn new(timeouts: BackendTimeouts) -> Self {
        Self { timeouts }
    }
}

fn millis(d: Duration) -> i32 {
    d.as_millis().min(i32::MAX as u128) as i32
}

fn cv(e: opencv::Error) -> Error {
    Error::ReadFailure(e.to_string())
}

impl SourceBackend for OpenCvBackend {
    fn name(&self) -> &'static str {
        "opencv"
    }

    fn open(&mut self, source_id: &str) -> Result<Box<dyn BackendHandle>> {
        // Numeric ids are device indices, anything else a path or URL
        let cap = if let Ok(idx) = source_id.parse::<i32>() {
            videoio::VideoCapture::new(idx, videoio::CAP_ANY)
        } else {
            let params = core::Vector::<i32>::from_slice(&[
                videoio::CAP_PROP_OPEN_TIMEOUT_MSEC,
                millis(self.timeouts.open),
                videoio::CAP_PROP_READ_TIMEOUT_MSEC,
                millis(self.timeouts.read),
            ]);
            videoio::VideoCapture::from_file_with_params(source_id, videoio::CAP_ANY, &params)
        }
        .map_err(|e| Error::open(source_id, e.to_string()))?;

        let opened = cap
            .is_opened()
            .map_err(|e| Error::open(source_id, e.to_string()))?;
        if !opened {
            return Err(Error::open(source_id, "capture did not open"));
        }
        Ok(Box::new(OpenCvHandle { cap }))
    }
}

struct OpenCvHandle {
    cap: videoio::VideoCapture,
}

impl BackendHandle for OpenCvHandle {
    fn read(&mut self) -> Result<Frame> {
        let mut mat = core::Mat::default();
        let grabbed = self.cap.read(&mut mat).map_err(cv)?;
        if !grabbed || mat.empty() {
            return Err(Error::ReadFailure("empty frame".into()));
        }

        if mat.depth() != core::CV_8U {
            let mut converted = core::Mat::default();
            mat.convert_to(&mut converted, core::CV_8U, 1.0, 0.0)
                .map_err(cv)?;
            mat = converted;
        }
        if !mat.is_continuous() {
            mat = mat.try_clone().map_err(cv)?;
        }

        let pixel_format = match mat.channels() {
            1 => PixelFormat::Gray8,
            3 => PixelFormat::Bgr8,
            4 => PixelFormat::Bgra8,
            n => {
                return Err(Error::NormalizationFailure(format!(
                    "unsupported channel count {n}"
                )))
            }
        };
        let data = mat.data_bytes().map_err(cv)?.to_vec();
        Ok(Frame {
            width: mat.cols() as u32,
            height: mat.rows() as u32,
            pixel_format,
            data,
            ts: Some(OffsetDateTime::now_utc()),
        })
    }

    fn release(mut self: Box<Self>) {
        let _ = self.cap.release();
    }
}

//! GStreamer decode path. `uridecodebin` picks the highest-ranked decoder,
//! which is the hardware one when the platform plugins are installed.

use crate::{BackendHandle, BackendTimeouts, Error, Frame, PixelFormat, Result, SourceBackend};
use gstreamer as gst;
use gstreamer::prelude::*;
use gstreamer_app::AppSink;
use gstreamer_video::VideoInfo;
use std::time::Duration;
use time::OffsetDateTime;
use tracing::debug;

const REQUIRED_ELEMENTS: [&str; 3] = ["uridecodebin", "videoconvert", "appsink"];

pub struct GstBackend {
    timeouts: BackendTimeouts,
}

impl GstBackend {
    /// Fails with `BackendUnavailable` when GStreamer or a required element is missing.
    pub fn new(timeouts: BackendTimeouts) -> Result<Self> {
        gst::init().map_err(|e| Error::BackendUnavailable(format!("gstreamer init: {e}")))?;
        for name in REQUIRED_ELEMENTS {
            if gst::ElementFactory::find(name).is_none() {
                return Err(Error::BackendUnavailable(format!(
                    "gstreamer element '{name}' not installed"
                )));
            }
        }
        Ok(Self { timeouts })
    }
}

fn clock(d: Duration) -> gst::ClockTime {
    gst::ClockTime::from_mseconds(d.as_millis() as u64)
}

impl SourceBackend for GstBackend {
    fn name(&self) -> &'static str {
        "gstreamer"
    }

    fn open(&mut self, source_id: &str) -> Result<Box<dyn BackendHandle>> {
        let uri = source_id.replace('"', "%22");
        let description = format!(
            "uridecodebin uri=\"{uri}\" ! videoconvert ! video/x-raw,format=BGR ! \
             appsink name=sink max-buffers=1 drop=true sync=false"
        );
        let pipeline = gst::parse::launch(&description)
            .map_err(|e| Error::open(source_id, e.to_string()))?
            .downcast::<gst::Pipeline>()
            .map_err(|_| Error::open(source_id, "not a pipeline"))?;
        let appsink = pipeline
            .by_name("sink")
            .ok_or_else(|| Error::open(source_id, "appsink missing"))?
            .downcast::<AppSink>()
            .map_err(|_| Error::open(source_id, "sink is not an appsink"))?;

        let mut handle = GstHandle {
            pipeline,
            appsink,
            read_timeout: self.timeouts.read,
            pending: None,
        };
        if let Err(e) = handle.pipeline.set_state(gst::State::Playing) {
            return Err(Error::open(source_id, format!("cannot start: {e}")));
        }

        // The stream counts as open once the first frame decodes.
        match handle.pull_within(self.timeouts.open) {
            Ok(frame) => {
                debug!(uri = source_id, width = frame.width, height = frame.height, "first frame");
                handle.pending = Some(frame);
                Ok(Box::new(handle))
            }
            Err(e) => Err(Error::open(source_id, e.to_string())),
        }
    }
}

struct GstHandle {
    pipeline: gst::Pipeline,
    appsink: AppSink,
    read_timeout: Duration,
    pending: Option<Frame>,
}

impl GstHandle {
    fn pull(&mut self) -> Result<Frame> {
        self.pull_within(self.read_timeout)
    }

    fn pull_within(&mut self, timeout: Duration) -> Result<Frame> {
        if let Some(message) = self.pipeline.bus().and_then(|bus| {
            bus.pop_filtered(&[gst::MessageType::Error, gst::MessageType::Eos])
        }) {
            return Err(match message.view() {
                gst::MessageView::Error(err) => Error::ReadFailure(err.error().to_string()),
                _ => Error::ReadFailure("end of stream".into()),
            });
        }
        let sample = match self.appsink.try_pull_sample(clock(timeout)) {
            Some(sample) => sample,
            None if self.appsink.is_eos() => {
                return Err(Error::ReadFailure("end of stream".into()))
            }
            None => return Err(Error::Timeout),
        };
        sample_to_frame(&sample)
    }

    fn shutdown(&self) {
        let _ = self.pipeline.set_state(gst::State::Null);
    }
}

impl BackendHandle for GstHandle {
    fn read(&mut self) -> Result<Frame> {
        match self.pending.take() {
            Some(frame) => Ok(frame),
            None => self.pull(),
        }
    }

    fn release(self: Box<Self>) {
        drop(self);
    }
}

impl Drop for GstHandle {
    fn drop(&mut self) {
        self.shutdown();
    }
}

// Copies row by row because GStreamer pads BGR rows to 4-byte strides.
fn sample_to_frame(sample: &gst::Sample) -> Result<Frame> {
    let caps = sample
        .caps()
        .ok_or_else(|| Error::ReadFailure("sample without caps".into()))?;
    let info = VideoInfo::from_caps(caps)
        .map_err(|_| Error::ReadFailure("caps are not raw video".into()))?;
    let buffer = sample
        .buffer()
        .ok_or_else(|| Error::ReadFailure("sample without buffer".into()))?;
    let map = buffer
        .map_readable()
        .map_err(|_| Error::ReadFailure("buffer not readable".into()))?;

    let width = info.width();
    let height = info.height();
    if width == 0 || height == 0 {
        return Err(Error::ReadFailure("empty video frame".into()));
    }
    let stride = info.stride()[0] as usize;
    let row = width as usize * 3;
    let src = map.as_slice();
    if stride < row || src.len() < stride * (height as usize - 1) + row {
        return Err(Error::NormalizationFailure(format!(
            "buffer of {} bytes too small for {width}x{height} stride {stride}",
            src.len()
        )));
    }

    let mut data = Vec::with_capacity(row * height as usize);
    for y in 0..height as usize {
        data.extend_from_slice(&src[y * stride..y * stride + row]);
    }
    Ok(Frame {
        width,
        height,
        pixel_format: PixelFormat::Bgr8,
        data,
        ts: Some(OffsetDateTime::now_utc()),
    })
}

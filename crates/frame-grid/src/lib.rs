//! frame-grid: concurrent multi-camera acquisition composed into one grid view

mod types;
pub use types::{Frame, PixelFormat, Resolution, Source};

mod error;
pub use error::{Error, Result};

mod traits;
pub use traits::{BackendHandle, DisplaySink, SnapshotWriter, SourceBackend};

mod slot;
pub use slot::FrameSlot;

/// Geometry and pixel-format conversion to the cell resolution
pub mod normalize;

mod worker;
pub use worker::{
    BackendTier, CameraWorker, StopSignal, WorkerConfig, WorkerState, WorkerStats, WorkerStatus,
};

mod pool;
pub use pool::{ShutdownReport, WorkerPool};

mod compositor;
pub use compositor::{CellContent, CompositeGrid, Compositor, GridLayout};

mod display;
pub use display::{Command, DisplayConfig, DisplayLoop, ExitReason, LoopOutcome};

mod snapshot;
pub use snapshot::{ImageSnapshotWriter, SnapshotFormat};

mod config;
pub use config::{GridConfig, DEFAULT_SOURCES};

mod backend;
pub use backend::{
    build_workers, fallback_backend, primary_backend, BackendPolicy, BackendSet, BackendTimeouts,
};

#[cfg(feature = "mock")]
mod mock;
#[cfg(feature = "mock")]
pub use mock::PatternBackend;

#[cfg(feature = "gstreamer")]
mod gst_backend;
#[cfg(feature = "gstreamer")]
pub use gst_backend::GstBackend;

#[cfg(feature = "opencv")]
mod opencv_backend;
#[cfg(feature = "opencv")]
pub use opencv_backend::OpenCvBackend;

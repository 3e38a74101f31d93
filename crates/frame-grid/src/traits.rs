use crate::{Command, CompositeGrid, Frame, Result};
use std::path::PathBuf;

/// A decode strategy that can open a source by identifier.
///
/// Implementations are owned by a single worker and never shared.
pub trait SourceBackend: Send {
    /// Short name used in logs, e.g. "gstreamer".
    fn name(&self) -> &'static str;

    /// Open a source (URI, device path or pattern id).
    fn open(&mut self, source_id: &str) -> Result<Box<dyn BackendHandle>>;
}

/// An opened source. Dropping without `release` is allowed but workers always release.
pub trait BackendHandle: Send {
    /// Read the next frame, blocking for at most the backend's read timeout.
    fn read(&mut self) -> Result<Frame>;

    /// Release the underlying stream. Consumes the handle so it runs once.
    fn release(self: Box<Self>);
}

/// Presentation surface for the composed grid plus a source of operator commands.
pub trait DisplaySink {
    fn present(&mut self, grid: &CompositeGrid) -> Result<()>;

    /// Non-blocking; returns at most one pending command.
    fn poll_command(&mut self) -> Option<Command>;

    /// One-line operator feedback, e.g. where a snapshot was saved.
    fn notify(&mut self, _message: &str) {}

    fn teardown(&mut self) {}
}

/// Encodes a composed grid to storage on demand.
pub trait SnapshotWriter {
    fn write(&self, grid: &CompositeGrid) -> Result<PathBuf>;
}

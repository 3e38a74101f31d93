use thiserror::Error;

pub type Result<T, E = Error> = core::result::Result<T, E>;

#[derive(Debug, Error)]
pub enum Error {
    #[error("backend unavailable: {0}")]
    BackendUnavailable(String),
    #[error("failed to open {source_id}: {reason}")]
    OpenFailure { source_id: String, reason: String },
    #[error("read failure: {0}")]
    ReadFailure(String),
    #[error("read timed out")]
    Timeout,
    #[error("normalization failure: {0}")]
    NormalizationFailure(String),
    #[error("sink failure: {0}")]
    SinkFailure(String),
    #[error("snapshot error: {0}")]
    Snapshot(String),
    #[error("invalid configuration: {0}")]
    Config(String),
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl Error {
    pub fn open(source_id: &str, reason: impl Into<String>) -> Self {
        Self::OpenFailure {
            source_id: source_id.to_string(),
            reason: reason.into(),
        }
    }

    /// True for errors that only cost a single frame and are retried by the worker.
    pub fn is_frame_level(&self) -> bool {
        matches!(
            self,
            Self::ReadFailure(_) | Self::Timeout | Self::NormalizationFailure(_)
        )
    }
}

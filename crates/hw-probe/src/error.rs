use std::time::Duration;
use thiserror::Error;

pub type Result<T, E = ProbeError> = core::result::Result<T, E>;

#[derive(Debug, Error)]
pub enum ProbeError {
    #[error("cannot run {program}: {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },
    #[error("{program} did not finish within {timeout:?}")]
    Timeout { program: String, timeout: Duration },
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

//! Backend selection: which decode paths each worker gets.

use crate::{CameraWorker, FrameSlot, GridConfig, Result, SourceBackend};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

#[derive(Clone, Copy, Debug, Default, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BackendPolicy {
    /// Primary first when the capability probe reports it usable.
    #[default]
    Auto,
    /// Always attempt the primary first.
    Primary,
    /// Start every worker on the fallback.
    Fallback,
}

/// How long a backend may wait on a source.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct BackendTimeouts {
    /// Connecting plus the first decoded frame.
    pub open: Duration,
    /// Each read after the stream is open.
    pub read: Duration,
}

impl Default for BackendTimeouts {
    fn default() -> Self {
        Self {
            open: Duration::from_secs(10),
            read: Duration::from_secs(2),
        }
    }
}

/// The two decode tiers handed to one worker.
pub struct BackendSet {
    pub primary: Option<Box<dyn SourceBackend>>,
    pub fallback: Box<dyn SourceBackend>,
}

impl BackendSet {
    pub fn for_policy(
        policy: BackendPolicy,
        primary_available: bool,
        timeouts: BackendTimeouts,
    ) -> Self {
        let want_primary = match policy {
            BackendPolicy::Auto => primary_available,
            BackendPolicy::Primary => true,
            BackendPolicy::Fallback => false,
        };
        let primary = if want_primary {
            match primary_backend(timeouts) {
                Ok(b) => Some(b),
                Err(e) => {
                    debug!(error = %e, "primary backend unavailable");
                    None
                }
            }
        } else {
            None
        };
        Self {
            primary,
            fallback: fallback_backend(timeouts),
        }
    }
}

/// Construct the higher-capability backend, if compiled in and usable here.
#[cfg(feature = "gstreamer")]
pub fn primary_backend(timeouts: BackendTimeouts) -> Result<Box<dyn SourceBackend>> {
    Ok(Box::new(crate::GstBackend::new(timeouts)?))
}

#[cfg(not(feature = "gstreamer"))]
pub fn primary_backend(_timeouts: BackendTimeouts) -> Result<Box<dyn SourceBackend>> {
    Err(crate::Error::BackendUnavailable(
        "built without the gstreamer feature".into(),
    ))
}

/// Construct the generic backend that every worker can fall back to.
#[cfg(feature = "opencv")]
pub fn fallback_backend(timeouts: BackendTimeouts) -> Box<dyn SourceBackend> {
    Box::new(crate::OpenCvBackend::new(timeouts))
}

#[cfg(all(not(feature = "opencv"), feature = "mock"))]
pub fn fallback_backend(_timeouts: BackendTimeouts) -> Box<dyn SourceBackend> {
    Box::new(crate::PatternBackend::new())
}

#[cfg(all(not(feature = "opencv"), not(feature = "mock")))]
pub fn fallback_backend(_timeouts: BackendTimeouts) -> Box<dyn SourceBackend> {
    Box::new(NoDecoder)
}

#[cfg(all(not(feature = "opencv"), not(feature = "mock")))]
struct NoDecoder;

#[cfg(all(not(feature = "opencv"), not(feature = "mock")))]
impl SourceBackend for NoDecoder {
    fn name(&self) -> &'static str {
        "none"
    }

    fn open(&mut self, source_id: &str) -> Result<Box<dyn crate::BackendHandle>> {
        Err(crate::Error::open(source_id, "no decoder compiled in"))
    }
}

/// Slots and workers for every configured source, in grid order.
pub fn build_workers(config: &GridConfig, primary_available: bool) -> Vec<CameraWorker> {
    let timeouts = config.timeouts();
    let worker_config = config.worker_config();
    let mut unavailable_logged = false;
    config
        .sources()
        .into_iter()
        .map(|source| {
            let set = BackendSet::for_policy(config.backend, primary_available, timeouts);
            let requested = config.backend == BackendPolicy::Primary;
            if requested && set.primary.is_none() && !unavailable_logged {
                warn!("primary backend requested but unavailable, using fallback");
                unavailable_logged = true;
            }
            CameraWorker::new(
                source,
                set.primary,
                set.fallback,
                Arc::new(FrameSlot::new()),
                worker_config,
            )
        })
        .collect()
}

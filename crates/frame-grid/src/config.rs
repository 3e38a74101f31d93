use crate::{
    BackendPolicy, BackendTimeouts, DisplayConfig, Error, GridLayout, Resolution, Result, SnapshotFormat, Source,
    WorkerConfig,
};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Used when no sources are configured at all.
pub const DEFAULT_SOURCES: [&str; 4] = [
    "rtsp://your-camera-ip:554/stream1",
    "rtsp://your-camera-ip:554/stream2",
    "rtsp://your-camera-ip:554/stream3",
    "rtsp://your-camera-ip:554/stream4",
];

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GridConfig {
    pub sources: Vec<String>,
    pub cell_width: u32,
    pub cell_height: u32,
    pub columns: Option<usize>,
    /// BGR fill for cells without a frame.
    pub placeholder: [u8; 3],
    pub backoff_ms: u64,
    /// Bound on connecting plus the first decoded frame.
    pub open_timeout_ms: u64,
    /// Bound on each later read.
    pub read_timeout_ms: u64,
    pub poll_interval_ms: u64,
    pub shutdown_grace_ms: u64,
    pub backend: BackendPolicy,
    pub snapshot_dir: PathBuf,
    pub snapshot_format: SnapshotFormat,
}

impl Default for GridConfig {
    fn default() -> Self {
        Self {
            sources: DEFAULT_SOURCES.iter().map(|s| s.to_string()).collect(),
            cell_width: 640,
            cell_height: 360,
            columns: None,
            placeholder: [0, 0, 0],
            backoff_ms: 100,
            open_timeout_ms: 10_000,
            read_timeout_ms: 2000,
            poll_interval_ms: 10,
            shutdown_grace_ms: 200,
            backend: BackendPolicy::Auto,
            snapshot_dir: PathBuf::from("."),
            snapshot_format: SnapshotFormat::Jpeg,
        }
    }
}

impl GridConfig {
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let raw = fs::read_to_string(path)?;
        let cfg: Self = serde_yaml::from_str(&raw)
            .map_err(|e| Error::Config(format!("{}: {e}", path.display())))?;
        cfg.validate()?;
        Ok(cfg)
    }

    pub fn validate(&self) -> Result<()> {
        if self.sources.is_empty() {
            return Err(Error::Config("at least one source is required".into()));
        }
        if self.sources.iter().any(|s| s.trim().is_empty()) {
            return Err(Error::Config("source identifiers must not be empty".into()));
        }
        if self.cell_width == 0 || self.cell_height == 0 {
            return Err(Error::Config(format!(
                "cell resolution {}x{} is empty",
                self.cell_width, self.cell_height
            )));
        }
        if self.columns == Some(0) {
            return Err(Error::Config("columns must be at least 1".into()));
        }
        if self.open_timeout_ms == 0 || self.read_timeout_ms == 0 {
            return Err(Error::Config("timeouts must be at least 1 ms".into()));
        }
        // Also bounds the composite frame size.
        self.layout().map(|_| ())
    }

    pub fn cell(&self) -> Resolution {
        Resolution::new(self.cell_width, self.cell_height)
    }

    /// Sources in grid order; index 0 is the top-left cell.
    pub fn sources(&self) -> Vec<Source> {
        self.sources
            .iter()
            .enumerate()
            .map(|(index, id)| Source::new(id.trim(), self.cell(), index))
            .collect()
    }

    pub fn layout(&self) -> Result<GridLayout> {
        match self.columns {
            Some(columns) => GridLayout::with_columns(self.sources.len(), columns, self.cell()),
            None => {
                let layout = GridLayout::auto(self.sources.len(), self.cell());
                GridLayout::with_columns(layout.cells, layout.columns, layout.cell)
            }
        }
    }

    pub fn worker_config(&self) -> WorkerConfig {
        WorkerConfig {
            backoff: Duration::from_millis(self.backoff_ms),
        }
    }

    pub fn display_config(&self) -> DisplayConfig {
        DisplayConfig {
            poll_interval: Duration::from_millis(self.poll_interval_ms),
            shutdown_grace: Duration::from_millis(self.shutdown_grace_ms),
        }
    }

    pub fn timeouts(&self) -> BackendTimeouts {
        BackendTimeouts {
            open: Duration::from_millis(self.open_timeout_ms),
            read: Duration::from_millis(self.read_timeout_ms),
        }
    }
}

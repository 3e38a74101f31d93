//! Control-thread loop: compose, present, poll one command, dispatch.

use crate::pool::{ShutdownReport, WorkerPool};
use crate::{
    BackendTier, CellContent, CompositeGrid, Compositor, DisplaySink, FrameSlot, SnapshotWriter,
    WorkerStats,
};
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Operator commands understood by the display loop.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum Command {
    Quit,
    Snapshot,
    Info,
    Unrecognized(String),
}

impl Command {
    pub fn from_key(key: char) -> Self {
        match key.to_ascii_lowercase() {
            'q' => Command::Quit,
            's' => Command::Snapshot,
            'i' => Command::Info,
            other => Command::Unrecognized(other.to_string()),
        }
    }

    /// Parse a line of text input; single keys and full words are accepted.
    pub fn parse(input: &str) -> Self {
        let word = input.trim().to_ascii_lowercase();
        match word.as_str() {
            "quit" | "exit" => Command::Quit,
            "snapshot" => Command::Snapshot,
            "info" => Command::Info,
            _ => {
                let mut chars = word.chars();
                match (chars.next(), chars.next()) {
                    (Some(c), None) => Command::from_key(c),
                    _ => Command::Unrecognized(word),
                }
            }
        }
    }
}

#[derive(Clone, Copy, Debug)]
pub struct DisplayConfig {
    /// Sleep between ticks when no command is pending.
    pub poll_interval: Duration,
    /// How long shutdown waits for workers to reach STOPPED.
    pub shutdown_grace: Duration,
}

impl Default for DisplayConfig {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_millis(10),
            shutdown_grace: Duration::from_millis(200),
        }
    }
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum ExitReason {
    Quit,
    Interrupted,
}

#[derive(Debug)]
pub struct LoopOutcome {
    pub reason: ExitReason,
    pub ticks: u64,
    pub snapshots: Vec<PathBuf>,
    pub shutdown: ShutdownReport,
}

pub struct DisplayLoop<S, W> {
    compositor: Compositor,
    sink: S,
    writer: W,
    config: DisplayConfig,
    interrupt: Arc<AtomicBool>,
}

impl<S: DisplaySink, W: SnapshotWriter> DisplayLoop<S, W> {
    pub fn new(compositor: Compositor, sink: S, writer: W, config: DisplayConfig) -> Self {
        Self {
            compositor,
            sink,
            writer,
            config,
            interrupt: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Flag that, once set (e.g. from a Ctrl-C handler), ends the loop like `quit`.
    pub fn interrupt_flag(&self) -> Arc<AtomicBool> {
        self.interrupt.clone()
    }

    /// Drive the pool until quit or interrupt, then shut it down and tear down the sink.
    pub fn run(mut self, mut pool: WorkerPool) -> (LoopOutcome, S) {
        let slots = pool.slots();
        let mut ticks = 0u64;
        let mut snapshots = Vec::new();

        let reason = loop {
            if self.interrupt.load(Ordering::SeqCst) {
                info!("interrupted, shutting down");
                break ExitReason::Interrupted;
            }
            ticks += 1;

            let grid = self.compositor.compose(&slots);
            if let Err(e) = self.sink.present(&grid) {
                warn!(error = %e, "display sink rejected frame");
            }

            match self.sink.poll_command() {
                Some(Command::Quit) => {
                    info!("quit requested");
                    break ExitReason::Quit;
                }
                Some(Command::Snapshot) => match self.writer.write(&grid) {
                    Ok(path) => {
                        info!(path = %path.display(), "saved snapshot");
                        self.sink.notify(&format!("saved {}", path.display()));
                        snapshots.push(path);
                    }
                    Err(e) => {
                        warn!(error = %e, "snapshot failed");
                        self.sink.notify(&format!("snapshot failed: {e}"));
                    }
                },
                Some(Command::Info) => {
                    let stats = pool.stats();
                    log_info(&grid, &slots, &stats);
                    self.sink.notify(&info_summary(&grid, &stats));
                }
                Some(Command::Unrecognized(input)) => debug!(%input, "ignoring input"),
                None => thread::sleep(self.config.poll_interval),
            }
        };

        let shutdown = pool.shutdown(self.config.shutdown_grace);
        self.sink.teardown();
        let outcome = LoopOutcome {
            reason,
            ticks,
            snapshots,
            shutdown,
        };
        (outcome, self.sink)
    }
}

fn log_info(grid: &CompositeGrid, slots: &[Arc<FrameSlot>], stats: &[WorkerStats]) {
    for (index, content) in grid.cells.iter().enumerate() {
        let state = stats.get(index).map(|s| s.state);
        let tier = stats.get(index).map(|s| s.tier);
        match (content, slots.get(index).and_then(|s| s.snapshot())) {
            (CellContent::Live, Some(frame)) => info!(
                cell = index,
                width = frame.width,
                height = frame.height,
                channels = frame.channels(),
                state = ?state,
                tier = ?tier,
                "live"
            ),
            _ => info!(cell = index, state = ?state, tier = ?tier, "placeholder"),
        }
    }
}

/// `live/cells live` followed by each cell's worker state, e.g.
/// `1/2 live | 0 streaming | 1 opening (fallback)`.
fn info_summary(grid: &CompositeGrid, stats: &[WorkerStats]) -> String {
    let mut line = format!("{}/{} live", grid.live_count(), grid.layout.cells);
    for index in 0..grid.layout.cells {
        match stats.get(index) {
            Some(s) => {
                let state = format!("{:?}", s.state).to_lowercase();
                line.push_str(&format!(" | {index} {state}"));
                if s.tier == BackendTier::Fallback {
                    line.push_str(" (fallback)");
                }
            }
            None => line.push_str(&format!(" | {index} unused")),
        }
    }
    line
}

use crate::worker::{CameraWorker, StopSignal, WorkerStats, WorkerStatus};
use crate::{FrameSlot, Result};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};
use tracing::{info, warn};

const JOIN_POLL: Duration = Duration::from_millis(5);

struct WorkerEntry {
    index: usize,
    stop: Arc<StopSignal>,
    status: Arc<WorkerStatus>,
    slot: Arc<FrameSlot>,
    thread: Option<JoinHandle<()>>,
}

impl WorkerEntry {
    fn stop(&self) {
        self.stop.stop();
    }
}

/// Outcome of a bounded shutdown.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct ShutdownReport {
    pub stopped: Vec<usize>,
    /// Workers still running when the grace period ran out. Their threads are detached.
    pub lingering: Vec<usize>,
}

/// One thread per source, created at startup and torn down at shutdown.
pub struct WorkerPool {
    workers: Vec<WorkerEntry>,
}

impl WorkerPool {
    pub fn spawn(workers: Vec<CameraWorker>) -> Result<Self> {
        let mut entries: Vec<WorkerEntry> = Vec::with_capacity(workers.len());
        for worker in workers {
            let index = worker.source().index;
            let stop = worker.stop_signal();
            let status = worker.status();
            let slot = worker.slot();
            let spawned = thread::Builder::new()
                .name(format!("camera-{index}"))
                .spawn(move || worker.run());
            let thread = match spawned {
                Ok(t) => t,
                Err(e) => {
                    // Do not leave already-started workers running.
                    for entry in &entries {
                        entry.stop();
                    }
                    return Err(e.into());
                }
            };
            entries.push(WorkerEntry {
                index,
                stop,
                status,
                slot,
                thread: Some(thread),
            });
        }
        info!(workers = entries.len(), "camera workers started");
        Ok(Self { workers: entries })
    }

    /// Slots in source order, for the compositor.
    pub fn slots(&self) -> Vec<Arc<FrameSlot>> {
        self.workers.iter().map(|w| w.slot.clone()).collect()
    }

    pub fn stats(&self) -> Vec<WorkerStats> {
        self.workers.iter().map(|w| w.status.stats()).collect()
    }

    pub fn stop_all(&self) {
        for w in &self.workers {
            w.stop();
        }
    }

    /// Signal every worker and wait up to `grace` for their threads to exit.
    pub fn shutdown(&mut self, grace: Duration) -> ShutdownReport {
        self.stop_all();
        let deadline = Instant::now() + grace;
        let mut report = ShutdownReport::default();

        loop {
            for w in &mut self.workers {
                let finished = w.thread.as_ref().is_some_and(|t| t.is_finished());
                if finished {
                    if let Some(t) = w.thread.take() {
                        if t.join().is_err() {
                            warn!(source = w.index, "worker thread panicked");
                        }
                        report.stopped.push(w.index);
                    }
                }
            }
            let pending = self.workers.iter().any(|w| w.thread.is_some());
            if !pending || Instant::now() >= deadline {
                break;
            }
            thread::sleep(JOIN_POLL);
        }

        for w in &mut self.workers {
            if w.thread.take().is_some() {
                warn!(
                    source = w.index,
                    state = ?w.status.state(),
                    "worker did not stop within grace period"
                );
                report.lingering.push(w.index);
            }
        }
        report.stopped.sort_unstable();
        info!(
            stopped = report.stopped.len(),
            lingering = report.lingering.len(),
            "camera workers shut down"
        );
        report
    }
}

impl Drop for WorkerPool {
    fn drop(&mut self) {
        self.stop_all();
    }
}

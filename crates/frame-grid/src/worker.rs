//! Per-source acquisition worker and its reconnect state machine.
//!
//! ```text
//! OPENING -> STREAMING -> FAILED(backoff) -> OPENING ...
//!    any state --stop--> STOPPED
//! ```

use crate::normalize::normalize;
use crate::{BackendHandle, FrameSlot, Source, SourceBackend};
use std::sync::atomic::{AtomicU64, AtomicU8, Ordering};
use std::sync::{Arc, Condvar, Mutex};
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

/// Frames between throughput reports.
const FPS_REPORT_EVERY: u64 = 30;

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum WorkerState {
    Opening,
    Streaming,
    Failed,
    Stopped,
}

impl WorkerState {
    fn as_u8(self) -> u8 {
        match self {
            WorkerState::Opening => 0,
            WorkerState::Streaming => 1,
            WorkerState::Failed => 2,
            WorkerState::Stopped => 3,
        }
    }

    fn from_u8(v: u8) -> Self {
        match v {
            0 => WorkerState::Opening,
            1 => WorkerState::Streaming,
            2 => WorkerState::Failed,
            _ => WorkerState::Stopped,
        }
    }
}

/// Which decode path a worker is on. Only ever moves from primary to fallback.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum BackendTier {
    Primary,
    Fallback,
}

#[derive(Clone, Copy, Debug)]
pub struct WorkerConfig {
    /// Wait between a failure and the next open attempt.
    pub backoff: Duration,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            backoff: Duration::from_millis(100),
        }
    }
}

/// Cooperative stop flag whose waiters can be woken early.
#[derive(Debug, Default)]
pub struct StopSignal {
    stopped: Mutex<bool>,
    cvar: Condvar,
}

impl StopSignal {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn stop(&self) {
        let mut stopped = self
            .stopped
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        *stopped = true;
        self.cvar.notify_all();
    }

    pub fn is_stopped(&self) -> bool {
        *self
            .stopped
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Sleep for `timeout` unless stopped first. Returns true when stopped.
    pub fn wait_timeout(&self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        let mut stopped = self
            .stopped
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        while !*stopped {
            let now = Instant::now();
            if now >= deadline {
                break;
            }
            stopped = match self.cvar.wait_timeout(stopped, deadline - now) {
                Ok((guard, _)) => guard,
                Err(poisoned) => poisoned.into_inner().0,
            };
        }
        *stopped
    }
}

/// Counters and current state, readable from any thread.
#[derive(Debug)]
pub struct WorkerStatus {
    state: AtomicU8,
    tier: AtomicU8,
    frames_published: AtomicU64,
    read_failures: AtomicU64,
    open_failures: AtomicU64,
}

impl WorkerStatus {
    fn new(tier: BackendTier) -> Self {
        Self {
            state: AtomicU8::new(WorkerState::Opening.as_u8()),
            tier: AtomicU8::new(tier_u8(tier)),
            frames_published: AtomicU64::new(0),
            read_failures: AtomicU64::new(0),
            open_failures: AtomicU64::new(0),
        }
    }

    pub fn state(&self) -> WorkerState {
        WorkerState::from_u8(self.state.load(Ordering::Acquire))
    }

    pub fn tier(&self) -> BackendTier {
        if self.tier.load(Ordering::Acquire) == 0 {
            BackendTier::Primary
        } else {
            BackendTier::Fallback
        }
    }

    pub fn stats(&self) -> WorkerStats {
        WorkerStats {
            state: self.state(),
            tier: self.tier(),
            frames_published: self.frames_published.load(Ordering::Relaxed),
            read_failures: self.read_failures.load(Ordering::Relaxed),
            open_failures: self.open_failures.load(Ordering::Relaxed),
        }
    }
}

fn tier_u8(tier: BackendTier) -> u8 {
    match tier {
        BackendTier::Primary => 0,
        BackendTier::Fallback => 1,
    }
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct WorkerStats {
    pub state: WorkerState,
    pub tier: BackendTier,
    pub frames_published: u64,
    pub read_failures: u64,
    pub open_failures: u64,
}

/// Owns one source's backends and handle, and publishes into its slot.
pub struct CameraWorker {
    source: Source,
    primary: Option<Box<dyn SourceBackend>>,
    fallback: Box<dyn SourceBackend>,
    tier: BackendTier,
    handle: Option<Box<dyn BackendHandle>>,
    state: WorkerState,
    slot: Arc<FrameSlot>,
    stop: Arc<StopSignal>,
    status: Arc<WorkerStatus>,
    config: WorkerConfig,
    consecutive_open_failures: u32,
    fps_window: (Instant, u64),
}

impl CameraWorker {
    /// `primary` is `None` when the primary backend could not be constructed;
    /// the worker then starts on the fallback tier.
    pub fn new(
        source: Source,
        primary: Option<Box<dyn SourceBackend>>,
        fallback: Box<dyn SourceBackend>,
        slot: Arc<FrameSlot>,
        config: WorkerConfig,
    ) -> Self {
        let tier = if primary.is_some() {
            BackendTier::Primary
        } else {
            BackendTier::Fallback
        };
        Self {
            source,
            primary,
            fallback,
            tier,
            handle: None,
            state: WorkerState::Opening,
            slot,
            stop: Arc::new(StopSignal::new()),
            status: Arc::new(WorkerStatus::new(tier)),
            config,
            consecutive_open_failures: 0,
            fps_window: (Instant::now(), 0),
        }
    }

    pub fn source(&self) -> &Source {
        &self.source
    }

    pub fn tier(&self) -> BackendTier {
        self.tier
    }

    pub fn slot(&self) -> Arc<FrameSlot> {
        self.slot.clone()
    }

    pub fn stop_signal(&self) -> Arc<StopSignal> {
        self.stop.clone()
    }

    pub fn status(&self) -> Arc<WorkerStatus> {
        self.status.clone()
    }

    /// Run until stopped. Intended to be the body of the worker's thread.
    pub fn run(mut self) {
        debug!(source = self.source.index, id = %self.source.id, "worker started");
        while self.step() != WorkerState::Stopped {}
        debug!(source = self.source.index, "worker exited");
    }

    /// Perform one transition of the state machine and return the new state.
    pub fn step(&mut self) -> WorkerState {
        if self.state != WorkerState::Stopped && self.stop.is_stopped() {
            self.shutdown();
            return self.state;
        }

        let next = match self.state {
            WorkerState::Opening => self.open_current(),
            WorkerState::Streaming => self.read_once(),
            WorkerState::Failed => {
                if self.stop.wait_timeout(self.config.backoff) {
                    self.shutdown();
                    return self.state;
                }
                WorkerState::Opening
            }
            WorkerState::Stopped => WorkerState::Stopped,
        };
        self.set_state(next);
        self.state
    }

    fn open_current(&mut self) -> WorkerState {
        let id = self.source.id.clone();

        if self.tier == BackendTier::Primary {
            if let Some(primary) = self.primary.as_mut() {
                match primary.open(&id) {
                    Ok(handle) => {
                        debug!(source = self.source.index, backend = primary.name(), "opened");
                        self.handle = Some(handle);
                        self.consecutive_open_failures = 0;
                        return WorkerState::Streaming;
                    }
                    Err(e) => {
                        warn!(
                            source = self.source.index,
                            backend = primary.name(),
                            error = %e,
                            "primary backend failed to open, falling back"
                        );
                    }
                }
            }
            self.downgrade();
        }

        match self.fallback.open(&id) {
            Ok(handle) => {
                debug!(source = self.source.index, backend = self.fallback.name(), "opened");
                self.handle = Some(handle);
                self.consecutive_open_failures = 0;
                WorkerState::Streaming
            }
            Err(e) => {
                self.status.open_failures.fetch_add(1, Ordering::Relaxed);
                self.consecutive_open_failures += 1;
                if self.consecutive_open_failures == 1 {
                    warn!(source = self.source.index, error = %e, "source unavailable, retrying");
                } else {
                    debug!(
                        source = self.source.index,
                        attempts = self.consecutive_open_failures,
                        error = %e,
                        "open retry failed"
                    );
                }
                WorkerState::Failed
            }
        }
    }

    fn read_once(&mut self) -> WorkerState {
        let Some(handle) = self.handle.as_mut() else {
            return WorkerState::Failed;
        };

        let frame = handle
            .read()
            .and_then(|frame| normalize(frame, self.source.resolution));
        match frame {
            Ok(frame) => {
                self.slot.publish(frame);
                self.status.frames_published.fetch_add(1, Ordering::Relaxed);
                self.report_throughput();
                WorkerState::Streaming
            }
            Err(e) => {
                self.status.read_failures.fetch_add(1, Ordering::Relaxed);
                debug!(source = self.source.index, error = %e, "dropped frame");
                if !e.is_frame_level() {
                    warn!(source = self.source.index, error = %e, "unexpected read error");
                }
                self.release_handle();
                WorkerState::Failed
            }
        }
    }

    // Dropping the primary makes a later re-attempt impossible.
    fn downgrade(&mut self) {
        if self.tier == BackendTier::Fallback {
            return;
        }
        self.tier = BackendTier::Fallback;
        self.primary = None;
        self.status
            .tier
            .store(tier_u8(BackendTier::Fallback), Ordering::Release);
        info!(
            source = self.source.index,
            backend = self.fallback.name(),
            "using fallback backend for the rest of this session"
        );
    }

    fn release_handle(&mut self) {
        if let Some(handle) = self.handle.take() {
            handle.release();
        }
    }

    fn shutdown(&mut self) {
        self.release_handle();
        self.set_state(WorkerState::Stopped);
    }

    fn set_state(&mut self, next: WorkerState) {
        if next != self.state {
            debug!(source = self.source.index, from = ?self.state, to = ?next, "state change");
            self.state = next;
            self.status.state.store(next.as_u8(), Ordering::Release);
        }
    }

    fn report_throughput(&mut self) {
        self.fps_window.1 += 1;
        if self.fps_window.1 < FPS_REPORT_EVERY {
            return;
        }
        let elapsed = self.fps_window.0.elapsed().as_secs_f64();
        if elapsed > 0.0 {
            debug!(
                source = self.source.index,
                fps = format!("{:.2}", self.fps_window.1 as f64 / elapsed),
                "throughput"
            );
        }
        self.fps_window = (Instant::now(), 0);
    }
}

impl Drop for CameraWorker {
    fn drop(&mut self) {
        self.release_handle();
    }
}

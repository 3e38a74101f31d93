use frame_grid::{
    BackendHandle, BackendTier, CameraWorker, CellContent, Command, Compositor, CompositeGrid,
    DisplayConfig, DisplayLoop, DisplaySink, Error, ExitReason, Frame, FrameSlot, GridLayout,
    ImageSnapshotWriter, Resolution, Result, SnapshotFormat, SnapshotWriter, Source,
    SourceBackend, WorkerConfig, WorkerPool, WorkerState,
};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::{Duration, Instant};

const CELL: Resolution = Resolution::new(4, 2);

/// `Some(v)` yields a solid frame of value `v`, `None` a read failure.
type ReadScript = Arc<Mutex<VecDeque<Option<u8>>>>;

struct TestBackend {
    fail_open: bool,
    value: u8,
    reads: ReadScript,
    read_delay: Duration,
    opens: Arc<AtomicUsize>,
}

impl TestBackend {
    fn live(value: u8) -> Self {
        Self {
            fail_open: false,
            value,
            reads: Arc::default(),
            read_delay: Duration::from_millis(1),
            opens: Arc::default(),
        }
    }

    fn dead() -> Self {
        Self {
            fail_open: true,
            ..Self::live(0)
        }
    }

    fn with_reads(mut self, reads: &[Option<u8>]) -> Self {
        self.reads = Arc::new(Mutex::new(reads.iter().copied().collect()));
        self
    }

    fn boxed(self) -> (Box<dyn SourceBackend>, Arc<AtomicUsize>) {
        let opens = self.opens.clone();
        (Box::new(self), opens)
    }
}

impl SourceBackend for TestBackend {
    fn name(&self) -> &'static str {
        "test"
    }

    fn open(&mut self, source_id: &str) -> Result<Box<dyn BackendHandle>> {
        self.opens.fetch_add(1, Ordering::SeqCst);
        if self.fail_open {
            return Err(Error::open(source_id, "unreachable"));
        }
        Ok(Box::new(TestHandle {
            value: self.value,
            reads: self.reads.clone(),
            read_delay: self.read_delay,
        }))
    }
}

struct TestHandle {
    value: u8,
    reads: ReadScript,
    read_delay: Duration,
}

impl BackendHandle for TestHandle {
    fn read(&mut self) -> Result<Frame> {
        thread::sleep(self.read_delay);
        let next = self.reads.lock().unwrap().pop_front();
        match next {
            Some(None) => Err(Error::ReadFailure("scripted".into())),
            Some(Some(v)) => Ok(Frame::solid(CELL, [v; 3])),
            None => Ok(Frame::solid(CELL, [self.value; 3])),
        }
    }

    fn release(self: Box<Self>) {}
}

fn worker(index: usize, backend: Box<dyn SourceBackend>, backoff: Duration) -> CameraWorker {
    CameraWorker::new(
        Source::new(format!("test://{index}"), CELL, index),
        None,
        backend,
        Arc::new(FrameSlot::new()),
        WorkerConfig { backoff },
    )
}

fn wait_until(timeout: Duration, mut cond: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + timeout;
    while Instant::now() < deadline {
        if cond() {
            return true;
        }
        thread::sleep(Duration::from_millis(2));
    }
    cond()
}

#[test]
fn test_unreachable_source_shows_placeholder_and_snapshot_matches() {
    let backoff = Duration::from_millis(5);
    let workers = vec![
        worker(0, TestBackend::live(10).boxed().0, backoff),
        worker(1, TestBackend::live(20).boxed().0, backoff),
        worker(2, TestBackend::dead().boxed().0, backoff),
        worker(3, TestBackend::live(40).boxed().0, backoff),
    ];
    let mut pool = WorkerPool::spawn(workers).unwrap();
    let slots = pool.slots();
    assert!(wait_until(Duration::from_secs(5), || {
        [0, 1, 3].iter().all(|&i| !slots[i].is_empty())
    }));

    let compositor = Compositor::new(GridLayout::auto(4, CELL), [7, 7, 7]);
    let grid = compositor.compose(&slots);
    assert_eq!(
        grid.cells,
        vec![
            CellContent::Live,
            CellContent::Live,
            CellContent::Placeholder,
            CellContent::Live
        ]
    );
    assert_eq!(grid.frame.resolution(), Resolution::new(8, 4));
    assert_eq!(grid.cell_frame(0).unwrap().data, vec![10; 24]);
    assert_eq!(grid.cell_frame(2).unwrap().data, vec![7; 24]);
    assert_eq!(grid.cell_frame(3).unwrap().data, vec![40; 24]);

    let dir = tempfile::tempdir().unwrap();
    let path = ImageSnapshotWriter::new(dir.path(), SnapshotFormat::Png)
        .write(&grid)
        .unwrap();
    let img = image::open(&path).unwrap().to_rgb8();
    assert_eq!(img.dimensions(), (8, 4));
    let mut expected = grid.frame.data.clone();
    for px in expected.chunks_exact_mut(3) {
        px.swap(0, 2);
    }
    assert_eq!(img.into_raw(), expected);

    let report = pool.shutdown(Duration::from_secs(2));
    assert_eq!(report.stopped, vec![0, 1, 2, 3]);
    assert!(report.lingering.is_empty());
}

#[test]
fn test_read_failures_keep_last_good_frame() {
    let mut reads = vec![Some(50)];
    reads.extend([None; 5]);
    reads.push(Some(60));
    let (backend, opens) = TestBackend::live(60).with_reads(&reads).boxed();
    let mut w = worker(0, backend, Duration::from_millis(1));
    let slot = w.slot();

    assert_eq!(w.step(), WorkerState::Streaming);
    assert_eq!(w.step(), WorkerState::Streaming);
    assert_eq!(slot.snapshot().unwrap().data, vec![50; 24]);

    for _ in 0..5 {
        assert_eq!(w.step(), WorkerState::Failed);
        assert_eq!(slot.snapshot().unwrap().data, vec![50; 24]);
        assert_eq!(w.step(), WorkerState::Opening);
        assert_eq!(w.step(), WorkerState::Streaming);
        assert_eq!(slot.snapshot().unwrap().data, vec![50; 24]);
    }

    assert_eq!(w.step(), WorkerState::Streaming);
    assert_eq!(slot.snapshot().unwrap().data, vec![60; 24]);
    assert_eq!(opens.load(Ordering::SeqCst), 6);
    let stats = w.status().stats();
    assert_eq!(stats.read_failures, 5);
    assert_eq!(stats.frames_published, 2);
}

#[test]
fn test_primary_is_never_retried_after_downgrade() {
    let (primary, primary_opens) = TestBackend::dead().boxed();
    // Every other read fails, so the worker keeps reopening.
    let reads: Vec<Option<u8>> = (0..200)
        .map(|i| if i % 2 == 0 { Some(1) } else { None })
        .collect();
    let (fallback, fallback_opens) = TestBackend::live(1).with_reads(&reads).boxed();
    let w = CameraWorker::new(
        Source::new("test://0", CELL, 0),
        Some(primary),
        fallback,
        Arc::new(FrameSlot::new()),
        WorkerConfig {
            backoff: Duration::from_millis(1),
        },
    );
    assert_eq!(w.tier(), BackendTier::Primary);

    let mut pool = WorkerPool::spawn(vec![w]).unwrap();
    assert!(wait_until(Duration::from_secs(5), || {
        fallback_opens.load(Ordering::SeqCst) >= 5
    }));
    assert_eq!(primary_opens.load(Ordering::SeqCst), 1);
    assert_eq!(pool.stats()[0].tier, BackendTier::Fallback);
    assert!(pool.shutdown(Duration::from_secs(2)).lingering.is_empty());
}

#[test]
fn test_stop_interrupts_long_backoff() {
    let backoff = Duration::from_secs(60);
    let workers = (0..3)
        .map(|i| worker(i, TestBackend::dead().boxed().0, backoff))
        .collect();
    let mut pool = WorkerPool::spawn(workers).unwrap();
    assert!(wait_until(Duration::from_secs(5), || {
        pool.stats().iter().all(|s| s.state == WorkerState::Failed)
    }));

    let started = Instant::now();
    let report = pool.shutdown(Duration::from_secs(5));
    assert!(started.elapsed() < Duration::from_secs(2));
    assert_eq!(report.stopped, vec![0, 1, 2]);
    assert!(report.lingering.is_empty());
}

#[test]
fn test_blocked_read_is_reported_as_lingering() {
    let mut slow = TestBackend::live(3);
    slow.read_delay = Duration::from_millis(500);
    let workers = vec![
        worker(0, TestBackend::live(1).boxed().0, Duration::from_millis(1)),
        worker(1, slow.boxed().0, Duration::from_millis(1)),
    ];
    let mut pool = WorkerPool::spawn(workers).unwrap();
    let slots = pool.slots();
    assert!(wait_until(Duration::from_secs(5), || !slots[0].is_empty()));

    let report = pool.shutdown(Duration::from_millis(50));
    assert_eq!(report.stopped, vec![0]);
    assert_eq!(report.lingering, vec![1]);
}

struct ScriptedSink {
    commands: crossbeam_channel::Receiver<Command>,
    presented: usize,
    last_live: usize,
    notices: Vec<String>,
    torn_down: bool,
}

impl DisplaySink for ScriptedSink {
    fn present(&mut self, grid: &CompositeGrid) -> Result<()> {
        self.presented += 1;
        self.last_live = grid.live_count();
        Ok(())
    }

    fn poll_command(&mut self) -> Option<Command> {
        self.commands.try_recv().ok()
    }

    fn notify(&mut self, message: &str) {
        self.notices.push(message.to_string());
    }

    fn teardown(&mut self) {
        self.torn_down = true;
    }
}

fn display_fixture(
    dir: &std::path::Path,
) -> (
    DisplayLoop<ScriptedSink, ImageSnapshotWriter>,
    crossbeam_channel::Sender<Command>,
    WorkerPool,
) {
    let backoff = Duration::from_millis(5);
    let workers = vec![
        worker(0, TestBackend::live(10).boxed().0, backoff),
        worker(1, TestBackend::dead().boxed().0, backoff),
    ];
    let pool = WorkerPool::spawn(workers).unwrap();
    let (tx, rx) = crossbeam_channel::unbounded();
    let sink = ScriptedSink {
        commands: rx,
        presented: 0,
        last_live: 0,
        notices: Vec::new(),
        torn_down: false,
    };
    let display = DisplayLoop::new(
        Compositor::new(GridLayout::auto(2, CELL), [0, 0, 0]),
        sink,
        ImageSnapshotWriter::new(dir, SnapshotFormat::Png),
        DisplayConfig {
            poll_interval: Duration::from_millis(1),
            shutdown_grace: Duration::from_secs(2),
        },
    );
    (display, tx, pool)
}

#[test]
fn test_display_loop_snapshot_then_quit() {
    let dir = tempfile::tempdir().unwrap();
    let (display, tx, pool) = display_fixture(dir.path());
    let slots = pool.slots();
    let runner = thread::spawn(move || display.run(pool));

    assert!(wait_until(Duration::from_secs(5), || !slots[0].is_empty()));
    tx.send(Command::Unrecognized("x".into())).unwrap();
    tx.send(Command::Info).unwrap();
    tx.send(Command::Snapshot).unwrap();
    tx.send(Command::Quit).unwrap();

    let (outcome, sink) = runner.join().unwrap();
    assert_eq!(outcome.reason, ExitReason::Quit);
    assert_eq!(outcome.snapshots.len(), 1);
    assert!(outcome.snapshots[0].exists());
    let name = outcome.snapshots[0].file_name().unwrap().to_string_lossy().into_owned();
    assert!(name.starts_with("2view_snapshot_"));
    assert!(outcome.ticks >= 4);
    assert_eq!(outcome.shutdown.stopped, vec![0, 1]);
    assert!(sink.presented >= 4);
    assert_eq!(sink.last_live, 1);
    assert!(sink.torn_down);

    // Feedback reaches the sink rather than only the log.
    assert_eq!(sink.notices.len(), 2);
    assert!(sink.notices[0].starts_with("1/2 live | 0 "), "{}", sink.notices[0]);
    assert!(sink.notices[0].contains(" | 1 "));
    assert_eq!(
        sink.notices[1],
        format!("saved {}", outcome.snapshots[0].display())
    );
}

#[test]
fn test_failed_snapshot_is_reported_to_sink() {
    let dir = tempfile::tempdir().unwrap();
    let blocker = dir.path().join("not-a-dir");
    std::fs::write(&blocker, b"x").unwrap();
    let (display, tx, pool) = display_fixture(&blocker.join("snaps"));
    let runner = thread::spawn(move || display.run(pool));

    tx.send(Command::Snapshot).unwrap();
    tx.send(Command::Quit).unwrap();

    let (outcome, sink) = runner.join().unwrap();
    assert!(outcome.snapshots.is_empty());
    assert_eq!(sink.notices.len(), 1);
    assert!(sink.notices[0].starts_with("snapshot failed: "), "{}", sink.notices[0]);
}

#[test]
fn test_interrupt_flag_ends_loop() {
    let dir = tempfile::tempdir().unwrap();
    let (display, _tx, pool) = display_fixture(dir.path());
    let interrupt = display.interrupt_flag();
    let runner = thread::spawn(move || display.run(pool));

    thread::sleep(Duration::from_millis(30));
    interrupt.store(true, Ordering::SeqCst);

    let (outcome, sink) = runner.join().unwrap();
    assert_eq!(outcome.reason, ExitReason::Interrupted);
    assert!(outcome.snapshots.is_empty());
    assert!(outcome.shutdown.lingering.is_empty());
    assert!(sink.torn_down);
}

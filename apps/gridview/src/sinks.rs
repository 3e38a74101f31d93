use anyhow::{Context, Result};
use crossbeam_channel::{Receiver, TryRecvError};
use crossterm::cursor::{Hide, MoveTo, Show};
use crossterm::event::{self, Event, KeyCode, KeyEventKind, KeyModifiers};
use crossterm::style::{Color, Print, ResetColor, SetBackgroundColor, SetForegroundColor};
use crossterm::terminal::{
    self, disable_raw_mode, enable_raw_mode, Clear, ClearType, EnterAlternateScreen,
    LeaveAlternateScreen,
};
use crossterm::{execute, queue};
use frame_grid::{Command, CompositeGrid, DisplaySink, Error, Frame};
use std::io::{self, BufRead, BufWriter, Stdout, Write};
use std::thread;
use std::time::{Duration, Instant};
use tracing::{debug, info};

const REDRAW_INTERVAL: Duration = Duration::from_millis(66);

fn sink_err(e: io::Error) -> Error {
    Error::SinkFailure(e.to_string())
}

/// Draws the grid with half-block characters in the alternate screen and
/// reads single-key commands from the raw-mode terminal.
pub struct TerminalSink {
    out: BufWriter<Stdout>,
    active: bool,
    last_draw: Option<Instant>,
    notice: Option<String>,
}

impl TerminalSink {
    pub fn new() -> Result<Self> {
        enable_raw_mode().context("failed to enable raw mode")?;
        let mut out = BufWriter::new(io::stdout());
        execute!(out, EnterAlternateScreen, Hide, Clear(ClearType::All))
            .context("failed entering alternate screen")?;
        Ok(Self {
            out,
            active: true,
            last_draw: None,
            notice: None,
        })
    }

    fn draw(&mut self, grid: &CompositeGrid) -> io::Result<()> {
        let (cols, rows) = terminal::size()?;
        let image_rows = rows.saturating_sub(1);
        let frame = &grid.frame;
        if cols > 0 && image_rows > 0 && frame.width > 0 && frame.height > 0 {
            // Each text row shows two pixel rows
            let scale = f64::min(
                cols as f64 / frame.width as f64,
                (image_rows as f64 * 2.0) / frame.height as f64,
            );
            let width = ((frame.width as f64 * scale) as u16).clamp(1, cols);
            let height = ((frame.height as f64 * scale / 2.0) as u16).clamp(1, image_rows);
            let x_step = frame.width as f64 / width as f64;
            let y_step = frame.height as f64 / (height as f64 * 2.0);

            for ty in 0..height {
                queue!(self.out, MoveTo(0, ty))?;
                for tx in 0..width {
                    let x = (tx as f64 * x_step) as u32;
                    let top = sample(frame, x, (ty as f64 * 2.0 * y_step) as u32);
                    let bottom = sample(frame, x, ((ty as f64 * 2.0 + 1.0) * y_step) as u32);
                    queue!(
                        self.out,
                        SetForegroundColor(top),
                        SetBackgroundColor(bottom),
                        Print('▀')
                    )?;
                }
                queue!(self.out, ResetColor)?;
            }
        }

        let status = status_line(grid, self.notice.as_deref(), cols as usize);
        queue!(
            self.out,
            MoveTo(0, rows.saturating_sub(1)),
            Clear(ClearType::CurrentLine),
            Print(status)
        )?;
        self.out.flush()
    }
}

/// Bottom row: live count and keys, then the latest notice, cut to `width` characters.
fn status_line(grid: &CompositeGrid, notice: Option<&str>, width: usize) -> String {
    let mut line = format!(
        "{}/{} live  [s] snapshot  [i] info  [q] quit",
        grid.live_count(),
        grid.layout.cells
    );
    if let Some(notice) = notice {
        line.push_str("  | ");
        line.push_str(notice);
    }
    line.chars().take(width).collect()
}

fn sample(frame: &Frame, x: u32, y: u32) -> Color {
    let x = x.min(frame.width - 1) as usize;
    let y = y.min(frame.height - 1) as usize;
    let i = (y * frame.width as usize + x) * 3;
    match frame.data.get(i..i + 3) {
        Some(&[b, g, r]) => Color::Rgb { r, g, b },
        _ => Color::Black,
    }
}

impl DisplaySink for TerminalSink {
    fn present(&mut self, grid: &CompositeGrid) -> frame_grid::Result<()> {
        if self.last_draw.is_some_and(|t| t.elapsed() < REDRAW_INTERVAL) {
            return Ok(());
        }
        self.last_draw = Some(Instant::now());
        self.draw(grid).map_err(sink_err)
    }

    fn poll_command(&mut self) -> Option<Command> {
        match event::poll(Duration::ZERO) {
            Ok(true) => {}
            Ok(false) => return None,
            Err(e) => {
                debug!(error = %e, "input poll failed");
                return None;
            }
        }
        let Ok(Event::Key(key)) = event::read() else {
            return None;
        };
        if key.kind != KeyEventKind::Press {
            return None;
        }
        // Raw mode swallows SIGINT, so Ctrl-C arrives as a key.
        match key.code {
            KeyCode::Char('c') if key.modifiers.contains(KeyModifiers::CONTROL) => {
                Some(Command::Quit)
            }
            KeyCode::Esc => Some(Command::Quit),
            KeyCode::Char(c) => Some(Command::from_key(c)),
            _ => None,
        }
    }

    fn notify(&mut self, message: &str) {
        self.notice = Some(message.to_string());
        // Redraw on the next present so the notice shows at once.
        self.last_draw = None;
    }

    fn teardown(&mut self) {
        if !self.active {
            return;
        }
        self.active = false;
        let _ = execute!(self.out, ResetColor, Show, LeaveAlternateScreen);
        let _ = disable_raw_mode();
    }
}

impl Drop for TerminalSink {
    fn drop(&mut self) {
        self.teardown();
    }
}

/// No rendering; commands are read line by line from stdin.
pub struct HeadlessSink {
    commands: Receiver<Command>,
    presented: u64,
    last_live: Option<usize>,
}

impl HeadlessSink {
    pub fn new() -> Result<Self> {
        let (tx, rx) = crossbeam_channel::unbounded();
        // Blocking stdin reads cannot be interrupted, so this thread is never joined.
        thread::Builder::new()
            .name("stdin-commands".into())
            .spawn(move || {
                for line in io::stdin().lock().lines() {
                    let Ok(line) = line else { break };
                    if line.trim().is_empty() {
                        continue;
                    }
                    if tx.send(Command::parse(&line)).is_err() {
                        break;
                    }
                }
            })
            .context("failed to spawn stdin reader")?;
        Ok(Self::from_receiver(rx))
    }

    pub fn from_receiver(commands: Receiver<Command>) -> Self {
        Self {
            commands,
            presented: 0,
            last_live: None,
        }
    }
}

impl DisplaySink for HeadlessSink {
    fn present(&mut self, grid: &CompositeGrid) -> frame_grid::Result<()> {
        self.presented += 1;
        let live = grid.live_count();
        if self.last_live != Some(live) {
            info!(live, cells = grid.layout.cells, "grid updated");
            self.last_live = Some(live);
        }
        Ok(())
    }

    fn poll_command(&mut self) -> Option<Command> {
        match self.commands.try_recv() {
            Ok(cmd) => Some(cmd),
            Err(TryRecvError::Empty | TryRecvError::Disconnected) => None,
        }
    }

    fn teardown(&mut self) {
        debug!(presented = self.presented, "headless sink closed");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use frame_grid::{Compositor, FrameSlot, GridLayout, Resolution};
    use std::sync::Arc;

    #[test]
    fn test_headless_forwards_commands_in_order() {
        let (tx, rx) = crossbeam_channel::unbounded();
        let mut sink = HeadlessSink::from_receiver(rx);
        assert_eq!(sink.poll_command(), None);
        tx.send(Command::parse("s")).unwrap();
        tx.send(Command::parse("quit")).unwrap();
        assert_eq!(sink.poll_command(), Some(Command::Snapshot));
        assert_eq!(sink.poll_command(), Some(Command::Quit));
        drop(tx);
        assert_eq!(sink.poll_command(), None);
    }

    #[test]
    fn test_headless_present_tracks_live_cells() {
        let cell = Resolution::new(2, 2);
        let slot = Arc::new(FrameSlot::new());
        slot.publish(Frame::solid(cell, [1, 2, 3]));
        let grid = Compositor::new(GridLayout::auto(2, cell), [0, 0, 0]).compose(&[slot]);
        let (_tx, rx) = crossbeam_channel::unbounded();
        let mut sink = HeadlessSink::from_receiver(rx);
        sink.present(&grid).unwrap();
        assert_eq!(sink.last_live, Some(1));
        assert_eq!(sink.presented, 1);
    }

    #[test]
    fn test_status_line_carries_notice() {
        let cell = Resolution::new(2, 2);
        let slot = Arc::new(FrameSlot::new());
        slot.publish(Frame::solid(cell, [1, 2, 3]));
        let grid = Compositor::new(GridLayout::auto(4, cell), [0, 0, 0]).compose(&[slot]);

        let plain = status_line(&grid, None, 200);
        assert_eq!(plain, "1/4 live  [s] snapshot  [i] info  [q] quit");

        let saved = status_line(&grid, Some("saved ./4view_snapshot_1.jpg"), 200);
        assert!(saved.starts_with(&plain));
        assert!(saved.ends_with("| saved ./4view_snapshot_1.jpg"));

        assert_eq!(status_line(&grid, Some("saved x"), 8), "1/4 live");
    }

    #[test]
    fn test_sample_reads_bgr() {
        let f = Frame::solid(Resolution::new(2, 1), [10, 20, 30]);
        assert_eq!(sample(&f, 5, 5), Color::Rgb { r: 30, g: 20, b: 10 });
    }
}

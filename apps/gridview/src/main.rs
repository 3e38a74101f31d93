use anyhow::{anyhow, Context, Result};
use clap::{ArgAction, Args, Parser, Subcommand, ValueEnum};
use frame_grid::{
    build_workers, BackendPolicy, Compositor, DisplayLoop, DisplaySink, ExitReason, GridConfig,
    ImageSnapshotWriter, Resolution, SnapshotFormat, WorkerPool,
};
use hw_probe::{ProbeOptions, ProbeReport};
use std::fs::OpenOptions;
use std::io::IsTerminal;
use std::path::{Path, PathBuf};
use std::sync::atomic::Ordering;
use std::sync::Mutex;
use tracing::{info, warn};

mod sinks;
use sinks::{HeadlessSink, TerminalSink};

const DEFAULT_LOG_FILE: &str = "gridview.log";

#[derive(Parser, Debug)]
#[command(
    name = "gridview",
    version,
    about = "Multi-camera grid viewer",
    disable_help_subcommand = true
)]
struct Cli {
    /// Debug logging (RUST_LOG takes precedence)
    #[arg(short, long, action = ArgAction::Count, global = true)]
    verbose: u8,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Show all sources in one grid
    View(ViewArgs),
    /// Check hardware decode support; exits 0 (ready), 1 (failed) or 2 (untested)
    Probe(ProbeArgs),
}

#[derive(Copy, Clone, Debug, Eq, PartialEq, ValueEnum)]
enum Backend {
    Auto,
    Primary,
    Fallback,
}

impl From<Backend> for BackendPolicy {
    fn from(b: Backend) -> Self {
        match b {
            Backend::Auto => BackendPolicy::Auto,
            Backend::Primary => BackendPolicy::Primary,
            Backend::Fallback => BackendPolicy::Fallback,
        }
    }
}

#[derive(Copy, Clone, Debug, Eq, PartialEq, ValueEnum)]
enum Format {
    Jpeg,
    Png,
}

impl From<Format> for SnapshotFormat {
    fn from(f: Format) -> Self {
        match f {
            Format::Jpeg => SnapshotFormat::Jpeg,
            Format::Png => SnapshotFormat::Png,
        }
    }
}

#[derive(Args, Debug)]
struct ViewArgs {
    /// YAML configuration file
    #[arg(long)]
    config: Option<PathBuf>,
    /// Source id (URL, device index or pattern://name); repeat for each cell
    #[arg(long = "source")]
    sources: Vec<String>,
    /// Cell size as WIDTHxHEIGHT (e.g. 640x360)
    #[arg(long)]
    cell: Option<String>,
    /// Grid columns; defaults to ceil(sqrt(sources))
    #[arg(long)]
    columns: Option<usize>,
    /// Delay before reopening a failed source
    #[arg(long)]
    backoff_ms: Option<u64>,
    /// How long a source may take to connect and decode its first frame
    #[arg(long)]
    open_timeout_ms: Option<u64>,
    /// How long each later read may block
    #[arg(long)]
    read_timeout_ms: Option<u64>,
    #[arg(long, value_enum)]
    backend: Option<Backend>,
    /// Read commands from stdin instead of drawing in the terminal
    #[arg(long, action = ArgAction::SetTrue)]
    headless: bool,
    /// Log destination while the grid is drawn in the terminal
    #[arg(long)]
    log_file: Option<PathBuf>,
    #[arg(long)]
    snapshot_dir: Option<PathBuf>,
    #[arg(long, value_enum)]
    snapshot_format: Option<Format>,
}

#[derive(Args, Debug)]
struct ProbeArgs {
    /// Stream used for the live decode tests
    url: Option<String>,
    /// Print the report as JSON
    #[arg(long, action = ArgAction::SetTrue)]
    json: bool,
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    let log_file = match &cli.command {
        Commands::View(args) => terminal_log_file(args, std::io::stdout().is_terminal()),
        Commands::Probe(_) => None,
    };
    setup_tracing(cli.verbose, log_file.as_deref());

    match cli.command {
        Commands::View(args) => view(args),
        Commands::Probe(args) => {
            let code = probe(args)?;
            std::process::exit(code);
        }
    }
}

fn uses_terminal(args: &ViewArgs, stdout_is_tty: bool) -> bool {
    !args.headless && stdout_is_tty
}

/// Where logs go while the terminal grid owns the screen; None means stderr.
fn terminal_log_file(args: &ViewArgs, stdout_is_tty: bool) -> Option<PathBuf> {
    uses_terminal(args, stdout_is_tty).then(|| {
        args.log_file
            .clone()
            .unwrap_or_else(|| PathBuf::from(DEFAULT_LOG_FILE))
    })
}

fn setup_tracing(verbose: u8, log_file: Option<&Path>) {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        tracing_subscriber::EnvFilter::new(if verbose > 0 { "debug" } else { "info" })
    });
    let builder = tracing_subscriber::fmt().with_env_filter(filter);
    // Best-effort; avoid panics if already set
    let _ = match log_file {
        None => builder.with_writer(std::io::stderr).try_init(),
        Some(path) => match OpenOptions::new().create(true).append(true).open(path) {
            Ok(file) => builder
                .with_ansi(false)
                .with_writer(Mutex::new(file))
                .try_init(),
            // Never write over the grid.
            Err(_) => builder.with_writer(std::io::sink).try_init(),
        },
    };
}

fn load_config(args: &ViewArgs) -> Result<GridConfig> {
    let mut cfg = match &args.config {
        Some(path) => GridConfig::load(path)
            .with_context(|| format!("loading config {}", path.display()))?,
        None => GridConfig::default(),
    };
    if !args.sources.is_empty() {
        cfg.sources = args.sources.clone();
    }
    if let Some(cell) = &args.cell {
        let res = Resolution::parse(cell)
            .ok_or_else(|| anyhow!("invalid --cell '{cell}', expected WIDTHxHEIGHT"))?;
        cfg.cell_width = res.width;
        cfg.cell_height = res.height;
    }
    if args.columns.is_some() {
        cfg.columns = args.columns;
    }
    if let Some(ms) = args.backoff_ms {
        cfg.backoff_ms = ms;
    }
    if let Some(ms) = args.open_timeout_ms {
        cfg.open_timeout_ms = ms;
    }
    if let Some(ms) = args.read_timeout_ms {
        cfg.read_timeout_ms = ms;
    }
    if let Some(b) = args.backend {
        cfg.backend = b.into();
    }
    if let Some(dir) = &args.snapshot_dir {
        cfg.snapshot_dir = dir.clone();
    }
    if let Some(f) = args.snapshot_format {
        cfg.snapshot_format = f.into();
    }
    cfg.validate().context("invalid configuration")?;
    Ok(cfg)
}

fn view(args: ViewArgs) -> Result<()> {
    let cfg = load_config(&args)?;
    let layout = cfg.layout()?;

    let primary_available = cfg.backend != BackendPolicy::Auto
        || hw_probe::primary_available(&ProbeOptions {
            timeouts: cfg.timeouts(),
            ..ProbeOptions::default()
        });
    info!(
        sources = cfg.sources.len(),
        columns = layout.columns,
        cell = %cfg.cell(),
        backend = ?cfg.backend,
        primary_available,
        "starting grid"
    );

    let pool = WorkerPool::spawn(build_workers(&cfg, primary_available))
        .context("failed to start camera workers")?;
    let compositor = Compositor::new(layout, cfg.placeholder);
    let writer = ImageSnapshotWriter::new(cfg.snapshot_dir.clone(), cfg.snapshot_format);

    if uses_terminal(&args, std::io::stdout().is_terminal()) {
        run_display(TerminalSink::new()?, compositor, writer, &cfg, pool)
    } else {
        run_display(HeadlessSink::new()?, compositor, writer, &cfg, pool)
    }
}

fn run_display<S: DisplaySink>(
    sink: S,
    compositor: Compositor,
    writer: ImageSnapshotWriter,
    cfg: &GridConfig,
    pool: WorkerPool,
) -> Result<()> {
    let display = DisplayLoop::new(compositor, sink, writer, cfg.display_config());
    let interrupt = display.interrupt_flag();
    ctrlc::set_handler(move || interrupt.store(true, Ordering::SeqCst))
        .context("failed to install Ctrl-C handler")?;

    let (outcome, _sink) = display.run(pool);
    let reason = match outcome.reason {
        ExitReason::Quit => "quit",
        ExitReason::Interrupted => "interrupted",
    };
    info!(
        reason,
        ticks = outcome.ticks,
        snapshots = outcome.snapshots.len(),
        "viewer closed"
    );
    if !outcome.shutdown.lingering.is_empty() {
        warn!(lingering = ?outcome.shutdown.lingering, "some workers were still running at exit");
    }
    Ok(())
}

fn probe(args: ProbeArgs) -> Result<i32> {
    let opts = ProbeOptions {
        url: args.url,
        ..ProbeOptions::default()
    };
    let report = ProbeReport::new(hw_probe::run_all(&opts));
    if args.json {
        println!(
            "{}",
            serde_json::to_string_pretty(&report).context("serializing report")?
        );
    } else {
        println!("{report}");
    }
    Ok(report.exit_code)
}

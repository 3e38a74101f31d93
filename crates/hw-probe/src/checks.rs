//! Individual capability checks. Each returns a [`CheckResult`]; none of them panic
//! or abort the probe when a tool is missing.

use crate::{run_command, COMMAND_TIMEOUT};
use frame_grid::BackendTimeouts;
use serde::Serialize;
use std::fs::{self, File};
use std::path::Path;
use std::time::{Duration, Instant};
use tracing::{debug, info};

pub const KERNEL_MODULES: [&str; 5] = ["mpp_service", "rkvdec", "rkvenc", "rga3_core", "rockchipdrm"];

pub const DEVICE_NODES: [&str; 4] = [
    "/dev/mpp_service",
    "/dev/rga",
    "/dev/dri/card0",
    "/dev/dri/renderD128",
];

pub const REQUIRED_GROUPS: [&str; 2] = ["video", "render"];

/// Below this the decode test still passes but flags the rate.
pub const FPS_TARGET: f64 = 25.0;

#[derive(Clone, Copy, Debug, Eq, PartialEq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum CheckOutcome {
    Pass,
    Fail,
    Skip,
}

#[derive(Clone, Debug, Serialize)]
pub struct CheckResult {
    pub name: &'static str,
    pub outcome: CheckOutcome,
    pub detail: String,
    /// Whether this check decodes a real stream.
    pub live: bool,
}

impl CheckResult {
    fn new(name: &'static str, outcome: CheckOutcome, detail: impl Into<String>) -> Self {
        Self {
            name,
            outcome,
            detail: detail.into(),
            live: false,
        }
    }

    fn pass(name: &'static str, detail: impl Into<String>) -> Self {
        Self::new(name, CheckOutcome::Pass, detail)
    }

    fn fail(name: &'static str, detail: impl Into<String>) -> Self {
        Self::new(name, CheckOutcome::Fail, detail)
    }

    fn skip(name: &'static str, detail: impl Into<String>) -> Self {
        Self::new(name, CheckOutcome::Skip, detail)
    }

    fn live(mut self) -> Self {
        self.live = true;
        self
    }

    pub fn passed(&self) -> bool {
        self.outcome == CheckOutcome::Pass
    }
}

#[derive(Clone, Debug)]
pub struct ProbeOptions {
    /// Stream used by the live decode tests; they are skipped without one.
    pub url: Option<String>,
    pub command_timeout: Duration,
    pub decode_frames: u32,
    pub stream_frames: u32,
    pub timeouts: BackendTimeouts,
}

impl Default for ProbeOptions {
    fn default() -> Self {
        Self {
            url: None,
            command_timeout: COMMAND_TIMEOUT,
            decode_frames: 100,
            stream_frames: 30,
            timeouts: BackendTimeouts::default(),
        }
    }
}

/// Module names from `/proc/modules` content.
pub fn loaded_modules(proc_modules: &str) -> Vec<&str> {
    proc_modules
        .lines()
        .filter_map(|line| line.split_whitespace().next())
        .collect()
}

pub fn check_kernel_modules() -> CheckResult {
    const NAME: &str = "kernel modules";
    match fs::read_to_string("/proc/modules") {
        Ok(content) => modules_result(NAME, &loaded_modules(&content)),
        Err(e) => CheckResult::fail(NAME, format!("cannot read /proc/modules: {e}")),
    }
}

fn modules_result(name: &'static str, loaded: &[&str]) -> CheckResult {
    let missing: Vec<&str> = KERNEL_MODULES
        .iter()
        .copied()
        .filter(|m| !loaded.iter().any(|l| l.eq_ignore_ascii_case(m)))
        .collect();
    if missing.is_empty() {
        CheckResult::pass(name, KERNEL_MODULES.join(", "))
    } else {
        CheckResult::fail(name, format!("not loaded: {}", missing.join(", ")))
    }
}

pub fn check_device_nodes() -> CheckResult {
    const NAME: &str = "device nodes";
    let mut problems = Vec::new();
    for node in DEVICE_NODES {
        let path = Path::new(node);
        if !path.exists() {
            problems.push(format!("{node} missing"));
        } else if let Err(e) = File::open(path) {
            problems.push(format!("{node} not readable ({e})"));
        }
    }
    if problems.is_empty() {
        CheckResult::pass(NAME, DEVICE_NODES.join(", "))
    } else {
        CheckResult::fail(NAME, problems.join("; "))
    }
}

pub fn missing_groups<'a>(id_output: &str, required: &[&'a str]) -> Vec<&'a str> {
    let groups: Vec<&str> = id_output.split_whitespace().collect();
    required
        .iter()
        .copied()
        .filter(|g| !groups.contains(g))
        .collect()
}

pub fn check_user_groups(opts: &ProbeOptions) -> CheckResult {
    const NAME: &str = "user groups";
    match run_command("id", &["-nG"], opts.command_timeout) {
        Ok(out) if out.success => {
            let missing = missing_groups(&out.stdout, &REQUIRED_GROUPS);
            if missing.is_empty() {
                CheckResult::pass(NAME, REQUIRED_GROUPS.join(", "))
            } else {
                CheckResult::fail(
                    NAME,
                    format!(
                        "not a member of {}; add with `usermod -aG <group> $USER`",
                        missing.join(", ")
                    ),
                )
            }
        }
        Ok(out) => CheckResult::fail(NAME, out.stderr.trim().to_string()),
        Err(e) => CheckResult::fail(NAME, e.to_string()),
    }
}

/// Decoder names containing `rkmpp` from `ffmpeg -decoders` output.
pub fn rkmpp_decoders(decoders_output: &str) -> Vec<String> {
    decoders_output
        .lines()
        .filter(|line| line.to_ascii_lowercase().contains("rkmpp"))
        .filter_map(|line| line.split_whitespace().nth(1))
        .map(str::to_string)
        .collect()
}

pub fn check_ffmpeg(opts: &ProbeOptions) -> CheckResult {
    const NAME: &str = "ffmpeg rkmpp";
    match run_command("ffmpeg", &["-hide_banner", "-decoders"], opts.command_timeout) {
        Ok(out) => {
            let decoders = rkmpp_decoders(&out.stdout);
            if decoders.is_empty() {
                CheckResult::fail(NAME, "ffmpeg has no rkmpp decoders")
            } else {
                CheckResult::pass(NAME, decoders.join(", "))
            }
        }
        Err(e) => CheckResult::fail(NAME, format!("ffmpeg not usable: {e}")),
    }
}

pub fn check_rga_library(opts: &ProbeOptions) -> CheckResult {
    const NAME: &str = "librga";
    match run_command("ldconfig", &["-p"], opts.command_timeout) {
        Ok(out) => {
            let libs: Vec<&str> = out
                .stdout
                .lines()
                .map(str::trim)
                .filter(|l| l.contains("librga"))
                .filter_map(|l| l.split_whitespace().next())
                .collect();
            if libs.is_empty() {
                CheckResult::fail(NAME, "librga not in the linker cache")
            } else {
                CheckResult::pass(NAME, libs.join(", "))
            }
        }
        Err(e) => CheckResult::fail(NAME, e.to_string()),
    }
}

/// Last `<n> fps` figure in ffmpeg progress output.
pub fn parse_fps(output: &str) -> Option<f64> {
    let mut found = None;
    for line in output.split(['\n', '\r']) {
        let tokens: Vec<&str> = line.split_whitespace().collect();
        for (i, token) in tokens.iter().enumerate() {
            // Both "fps=29.9" and "29.97 fps" appear in ffmpeg output.
            if let Some(v) = token.strip_prefix("fps=") {
                let v = if v.is_empty() {
                    tokens.get(i + 1).copied().unwrap_or_default()
                } else {
                    v
                };
                if let Ok(fps) = v.parse() {
                    found = Some(fps);
                }
            } else if *token == "fps" || token.starts_with("fps,") {
                if let Some(Ok(fps)) = i.checked_sub(1).map(|p| tokens[p].parse()) {
                    found = Some(fps);
                }
            }
        }
    }
    found
}

/// Lines of decoder output that report errors.
pub fn error_lines(output: &str) -> Vec<&str> {
    output
        .lines()
        .map(str::trim)
        .filter(|l| {
            let l = l.to_ascii_lowercase();
            l.contains("error") || l.contains("failed")
        })
        .collect()
}

pub fn check_hw_decode(opts: &ProbeOptions) -> CheckResult {
    const NAME: &str = "hardware decode";
    let Some(url) = opts.url.as_deref() else {
        return CheckResult::skip(NAME, "no test URL given").live();
    };
    let frames = opts.decode_frames.to_string();
    let mut args = vec!["-hide_banner"];
    if url.starts_with("rtsp://") {
        args.extend(["-rtsp_transport", "tcp"]);
    }
    args.extend([
        "-hwaccel",
        "drm",
        "-hwaccel_device",
        "/dev/dri/renderD128",
        "-c:v",
        "h264_rkmpp",
        "-i",
        url,
        "-vframes",
        frames.as_str(),
        "-f",
        "null",
        "-",
    ]);

    let started = Instant::now();
    let out = match run_command("ffmpeg", &args, opts.command_timeout) {
        Ok(out) => out,
        Err(e) => return CheckResult::fail(NAME, e.to_string()).live(),
    };
    let elapsed = started.elapsed();
    let combined = out.combined();
    let errors = error_lines(&combined);
    if !errors.is_empty() {
        return CheckResult::fail(NAME, errors.join(" | ")).live();
    }
    if !out.success {
        return CheckResult::fail(NAME, "ffmpeg exited with an error").live();
    }
    let detail = match parse_fps(&combined) {
        Some(fps) if fps >= FPS_TARGET => {
            format!("{frames} frames in {:.2}s, {fps:.2} fps", elapsed.as_secs_f64())
        }
        Some(fps) => format!(
            "{frames} frames in {:.2}s, {fps:.2} fps (below {FPS_TARGET} fps target)",
            elapsed.as_secs_f64()
        ),
        None => format!("{frames} frames in {:.2}s", elapsed.as_secs_f64()),
    };
    CheckResult::pass(NAME, detail).live()
}

pub fn check_primary_backend(opts: &ProbeOptions) -> CheckResult {
    const NAME: &str = "primary backend";
    match frame_grid::primary_backend(opts.timeouts) {
        Ok(backend) => CheckResult::pass(NAME, backend.name()),
        Err(e) => CheckResult::fail(NAME, e.to_string()),
    }
}

pub fn check_primary_stream(opts: &ProbeOptions) -> CheckResult {
    const NAME: &str = "primary stream";
    let Some(url) = opts.url.as_deref() else {
        return CheckResult::skip(NAME, "no test URL given").live();
    };
    let mut backend = match frame_grid::primary_backend(opts.timeouts) {
        Ok(b) => b,
        Err(e) => return CheckResult::skip(NAME, e.to_string()).live(),
    };
    let mut handle = match backend.open(url) {
        Ok(h) => h,
        Err(e) => return CheckResult::fail(NAME, e.to_string()).live(),
    };

    let started = Instant::now();
    let mut read = 0u32;
    let mut geometry = None;
    let mut last_error = None;
    for _ in 0..opts.stream_frames {
        match handle.read() {
            Ok(frame) => {
                read += 1;
                geometry.get_or_insert((frame.resolution(), frame.channels()));
            }
            Err(e) => {
                debug!(error = %e, "probe read failed");
                last_error = Some(e.to_string());
            }
        }
    }
    handle.release();

    let elapsed = started.elapsed().as_secs_f64();
    let fps = if elapsed > 0.0 { read as f64 / elapsed } else { 0.0 };
    let result = match geometry {
        Some((res, channels)) if read == opts.stream_frames => CheckResult::pass(
            NAME,
            format!("{read} frames, {fps:.2} fps, {res} x{channels}"),
        ),
        Some((res, channels)) => CheckResult::fail(
            NAME,
            format!(
                "{read}/{} frames ({res} x{channels}), last error: {}",
                opts.stream_frames,
                last_error.unwrap_or_default()
            ),
        ),
        None => CheckResult::fail(
            NAME,
            last_error.unwrap_or_else(|| "no frames read".to_string()),
        ),
    };
    result.live()
}

/// Run every check in order.
pub fn run_all(opts: &ProbeOptions) -> Vec<CheckResult> {
    let checks: Vec<CheckResult> = vec![
        check_kernel_modules(),
        check_device_nodes(),
        check_user_groups(opts),
        check_ffmpeg(opts),
        check_rga_library(opts),
        check_hw_decode(opts),
        check_primary_backend(opts),
        check_primary_stream(opts),
    ];
    for c in &checks {
        info!(check = c.name, outcome = ?c.outcome, detail = %c.detail, "probe");
    }
    checks
}

/// Whether workers should start on the primary tier.
pub fn primary_available(opts: &ProbeOptions) -> bool {
    check_primary_backend(opts).passed()
}

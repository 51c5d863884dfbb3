//! FFmpeg command builder and runner.
//!
//! Every invocation ends in a typed [`ToolOutput`] (program, exit code,
//! stderr excerpt) instead of ad hoc string matching on error text.

use std::collections::VecDeque;
use std::path::{Path, PathBuf};
use std::process::{ExitStatus, Stdio};
use std::time::Duration;

use tokio::io::{AsyncBufReadExt, AsyncReadExt, AsyncWriteExt, BufReader};
use tokio::process::{Child, ChildStderr, ChildStdin, ChildStdout, Command};
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::error::{MediaError, MediaResult};
use crate::progress::FfmpegProgress;

/// Lines of stderr kept for diagnostics.
const STDERR_TAIL_LINES: usize = 40;
/// Upper bound on the stderr excerpt size.
const STDERR_TAIL_BYTES: usize = 4096;

/// Result of a finished external tool invocation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ToolOutput {
    /// Program name (e.g. "ffmpeg")
    pub program: String,
    /// Exit code; `None` when killed by a signal
    pub exit_code: Option<i32>,
    /// Last lines of stderr, progress lines removed
    pub stderr_tail: String,
}

impl ToolOutput {
    fn from_status(program: &str, status: ExitStatus, stderr_tail: String) -> Self {
        Self {
            program: program.to_string(),
            exit_code: status.code(),
            stderr_tail,
        }
    }

    pub fn success(&self) -> bool {
        self.exit_code == Some(0)
    }

    /// Turn a non-zero exit into an error.
    pub fn check(self, what: &str) -> MediaResult<Self> {
        if self.success() {
            Ok(self)
        } else {
            Err(MediaError::from_tool_output(
                self,
                format!("{what} exited with non-zero status"),
            ))
        }
    }
}

/// One `-i` input with the arguments that precede it.
#[derive(Debug, Clone)]
struct InputSpec {
    args: Vec<String>,
    source: String,
}

/// Builder for FFmpeg commands.
#[derive(Debug, Clone)]
pub struct FfmpegCommand {
    /// Inputs in order (`-i` each)
    inputs: Vec<InputSpec>,
    /// Output file path
    output: PathBuf,
    /// Output arguments (after the last -i)
    output_args: Vec<String>,
    /// Whether to overwrite output
    overwrite: bool,
    /// Log level
    log_level: String,
}

impl FfmpegCommand {
    /// Create a new FFmpeg command.
    pub fn new(input: impl AsRef<Path>, output: impl AsRef<Path>) -> Self {
        Self {
            inputs: vec![InputSpec {
                args: Vec::new(),
                source: input.as_ref().to_string_lossy().to_string(),
            }],
            output: output.as_ref().to_path_buf(),
            output_args: Vec::new(),
            overwrite: true,
            log_level: "error".to_string(),
        }
    }

    /// Create a command writing its output to stdout.
    pub fn to_stdout(input: impl AsRef<Path>) -> Self {
        Self::new(input, "pipe:1")
    }

    /// Create a command reading packed RGB24 frames from stdin.
    pub fn raw_rgb_input(width: u32, height: u32, fps: f64, output: impl AsRef<Path>) -> Self {
        Self {
            inputs: vec![InputSpec {
                args: vec![
                    "-f".to_string(),
                    "rawvideo".to_string(),
                    "-pix_fmt".to_string(),
                    "rgb24".to_string(),
                    "-s".to_string(),
                    format!("{width}x{height}"),
                    "-r".to_string(),
                    format_fps(fps),
                ],
                source: "-".to_string(),
            }],
            output: output.as_ref().to_path_buf(),
            output_args: Vec::new(),
            overwrite: true,
            log_level: "error".to_string(),
        }
    }

    /// Add input arguments for the most recent input (before its -i).
    pub fn input_arg(mut self, arg: impl Into<String>) -> Self {
        if let Some(last) = self.inputs.last_mut() {
            last.args.push(arg.into());
        }
        self
    }

    /// Add another input file.
    pub fn add_input(mut self, input: impl AsRef<Path>) -> Self {
        self.inputs.push(InputSpec {
            args: Vec::new(),
            source: input.as_ref().to_string_lossy().to_string(),
        });
        self
    }

    /// Add output arguments (after -i).
    pub fn output_arg(mut self, arg: impl Into<String>) -> Self {
        self.output_args.push(arg.into());
        self
    }

    /// Add multiple output arguments.
    pub fn output_args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.output_args.extend(args.into_iter().map(Into::into));
        self
    }

    /// Set video filter.
    pub fn video_filter(self, filter: impl Into<String>) -> Self {
        self.output_arg("-vf").output_arg(filter)
    }

    /// Set video codec.
    pub fn video_codec(self, codec: impl Into<String>) -> Self {
        self.output_arg("-c:v").output_arg(codec)
    }

    /// Set audio codec.
    pub fn audio_codec(self, codec: impl Into<String>) -> Self {
        self.output_arg("-c:a").output_arg(codec)
    }

    /// Set CRF (quality).
    pub fn crf(self, crf: u8) -> Self {
        self.output_arg("-crf").output_arg(crf.to_string())
    }

    /// Set preset.
    pub fn preset(self, preset: impl Into<String>) -> Self {
        self.output_arg("-preset").output_arg(preset)
    }

    /// Drop the video stream.
    pub fn no_video(self) -> Self {
        self.output_arg("-vn")
    }

    /// Resample audio to `rate` Hz mono.
    pub fn audio_mono(self, rate: u32) -> Self {
        self.output_arg("-ar")
            .output_arg(rate.to_string())
            .output_arg("-ac")
            .output_arg("1")
    }

    /// Map the given stream specifier.
    pub fn map(self, spec: impl Into<String>) -> Self {
        self.output_arg("-map").output_arg(spec)
    }

    /// Set log level.
    pub fn log_level(mut self, level: impl Into<String>) -> Self {
        self.log_level = level.into();
        self
    }

    /// Output file path.
    pub fn output(&self) -> &Path {
        &self.output
    }

    /// Build the command arguments.
    pub fn build_args(&self) -> Vec<String> {
        let mut args = Vec::new();

        // Overwrite flag
        if self.overwrite {
            args.push("-y".to_string());
        }

        // Log level
        args.push("-v".to_string());
        args.push(self.log_level.clone());

        // Progress output to stderr
        args.push("-progress".to_string());
        args.push("pipe:2".to_string());

        for input in &self.inputs {
            args.extend(input.args.iter().cloned());
            args.push("-i".to_string());
            args.push(input.source.clone());
        }

        // Output args
        args.extend(self.output_args.iter().cloned());

        // Output file
        args.push(self.output.to_string_lossy().to_string());

        args
    }

    fn reads_stdin(&self) -> bool {
        self.inputs.iter().any(|i| i.source == "-")
    }

    fn writes_stdout(&self) -> bool {
        self.output.as_os_str() == "pipe:1"
    }
}

/// Runner for FFmpeg commands with progress tracking and a time limit.
#[derive(Debug, Clone, Default)]
pub struct FfmpegRunner {
    /// Time limit for a single invocation
    timeout: Option<Duration>,
}

impl FfmpegRunner {
    /// Create a new runner.
    pub fn new() -> Self {
        Self { timeout: None }
    }

    /// Set timeout.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Run an FFmpeg command to completion; non-zero exit is an error.
    pub async fn run(&self, cmd: &FfmpegCommand) -> MediaResult<ToolOutput> {
        self.run_with_progress(cmd, |_| {}).await
    }

    /// Run an FFmpeg command with progress callback.
    pub async fn run_with_progress<F>(
        &self,
        cmd: &FfmpegCommand,
        progress_callback: F,
    ) -> MediaResult<ToolOutput>
    where
        F: Fn(FfmpegProgress) + Send + 'static,
    {
        check_ffmpeg()?;

        let args = cmd.build_args();
        debug!("Running FFmpeg: ffmpeg {}", args.join(" "));

        let mut child = spawn_ffmpeg(&args, false, false)?;
        let stderr = child
            .stderr
            .take()
            .ok_or_else(|| MediaError::internal("FFmpeg stderr not captured"))?;
        let stderr_task = tokio::spawn(collect_stderr(stderr, progress_callback));

        let status = self.wait_for_completion(&mut child).await;
        let stderr_tail = stderr_task.await.unwrap_or_default();
        let output = ToolOutput::from_status("ffmpeg", status?, stderr_tail);

        output.check("FFmpeg")
    }

    /// Start an FFmpeg process with piped stdin and/or stdout.
    ///
    /// Stdin is piped when the command reads `-`; stdout when it writes
    /// `pipe:1`.
    pub fn spawn(&self, cmd: &FfmpegCommand) -> MediaResult<FfmpegProcess> {
        check_ffmpeg()?;
        let (with_stdin, with_stdout) = (cmd.reads_stdin(), cmd.writes_stdout());
        if !with_stdin && !with_stdout {
            return Err(MediaError::internal("command has neither piped input nor output"));
        }

        let args = cmd.build_args();
        debug!("Starting FFmpeg: ffmpeg {}", args.join(" "));

        let mut child = spawn_ffmpeg(&args, with_stdin, with_stdout)?;
        let stderr = child
            .stderr
            .take()
            .ok_or_else(|| MediaError::internal("FFmpeg stderr not captured"))?;
        let stderr_task = tokio::spawn(collect_stderr(stderr, |_| {}));

        Ok(FfmpegProcess {
            stdin: child.stdin.take(),
            stdout: child.stdout.take(),
            child,
            stderr_task: Some(stderr_task),
            timeout: self.timeout,
        })
    }

    /// Wait for child process with timeout.
    async fn wait_for_completion(&self, child: &mut Child) -> MediaResult<ExitStatus> {
        wait_with_timeout(child, self.timeout).await
    }
}

/// A running FFmpeg process fed through stdin or read through stdout.
pub struct FfmpegProcess {
    child: Child,
    stdin: Option<ChildStdin>,
    stdout: Option<ChildStdout>,
    stderr_task: Option<JoinHandle<String>>,
    timeout: Option<Duration>,
}

impl FfmpegProcess {
    /// Write raw bytes to the process stdin.
    pub async fn write(&mut self, bytes: &[u8]) -> MediaResult<()> {
        let stdin = self
            .stdin
            .as_mut()
            .ok_or_else(|| MediaError::internal("FFmpeg stdin not available"))?;
        match stdin.write_all(bytes).await {
            Ok(()) => Ok(()),
            // The process died; its exit status and stderr explain why.
            Err(e) if e.kind() == std::io::ErrorKind::BrokenPipe => {
                let output = self.finish_inner().await?;
                Err(MediaError::from_tool_output(
                    output,
                    "FFmpeg closed its input early",
                ))
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Fill `buf` from stdout. Returns `false` on a clean end of stream.
    ///
    /// A stream ending in the middle of `buf` is an error.
    pub async fn read_exact_or_eof(&mut self, buf: &mut [u8]) -> MediaResult<bool> {
        let stdout = self
            .stdout
            .as_mut()
            .ok_or_else(|| MediaError::internal("FFmpeg stdout not available"))?;

        let mut filled = 0;
        while filled < buf.len() {
            let n = stdout.read(&mut buf[filled..]).await?;
            if n == 0 {
                break;
            }
            filled += n;
        }

        match filled {
            0 => Ok(false),
            n if n == buf.len() => Ok(true),
            n => Err(MediaError::internal(format!(
                "FFmpeg output ended mid-frame ({n} of {} bytes)",
                buf.len()
            ))),
        }
    }

    /// Close pipes and wait for the process; non-zero exit is an error.
    pub async fn finish(mut self) -> MediaResult<ToolOutput> {
        self.finish_inner().await?.check("FFmpeg")
    }

    async fn finish_inner(&mut self) -> MediaResult<ToolOutput> {
        if let Some(mut stdin) = self.stdin.take() {
            // Flush errors surface through the exit status below.
            let _ = stdin.shutdown().await;
        }
        self.stdout.take();
        let status = wait_with_timeout(&mut self.child, self.timeout).await?;
        let stderr_tail = match self.stderr_task.take() {
            Some(task) => task.await.unwrap_or_default(),
            None => String::new(),
        };
        Ok(ToolOutput::from_status("ffmpeg", status, stderr_tail))
    }
}

fn spawn_ffmpeg(args: &[String], with_stdin: bool, with_stdout: bool) -> MediaResult<Child> {
    let pipe_or_null = |piped: bool| if piped { Stdio::piped() } else { Stdio::null() };
    Command::new("ffmpeg")
        .args(args)
        .stdin(pipe_or_null(with_stdin))
        .stdout(pipe_or_null(with_stdout))
        .stderr(Stdio::piped())
        .kill_on_drop(true)
        .spawn()
        .map_err(|e| MediaError::ffmpeg_failed(format!("Failed to spawn FFmpeg: {e}"), None, None))
}

async fn wait_with_timeout(child: &mut Child, timeout: Option<Duration>) -> MediaResult<ExitStatus> {
    let Some(timeout) = timeout else {
        return Ok(child.wait().await?);
    };

    match tokio::time::timeout(timeout, child.wait()).await {
        Ok(result) => Ok(result?),
        Err(_) => {
            warn!(
                "FFmpeg timed out after {} seconds, killing process",
                timeout.as_secs()
            );
            let _ = child.kill().await;
            Err(MediaError::Timeout(timeout.as_secs()))
        }
    }
}

/// Drain stderr, feeding progress lines to the callback and keeping the rest.
async fn collect_stderr<F>(stderr: ChildStderr, progress_callback: F) -> String
where
    F: Fn(FfmpegProgress) + Send + 'static,
{
    let mut reader = BufReader::new(stderr).lines();
    let mut current = FfmpegProgress::default();
    let mut tail: VecDeque<String> = VecDeque::with_capacity(STDERR_TAIL_LINES);

    while let Ok(Some(line)) = reader.next_line().await {
        if is_progress_line(&line) {
            if let Some(progress) = parse_progress_line(&line, &mut current) {
                progress_callback(progress);
            }
            continue;
        }
        if tail.len() == STDERR_TAIL_LINES {
            tail.pop_front();
        }
        tail.push_back(line);
    }

    let joined = Vec::from(tail).join("\n");
    truncate_front(joined, STDERR_TAIL_BYTES)
}

/// Keep the last `max` bytes, cut on a char boundary.
fn truncate_front(s: String, max: usize) -> String {
    if s.len() <= max {
        return s;
    }
    let mut start = s.len() - max;
    while !s.is_char_boundary(start) {
        start += 1;
    }
    s[start..].to_string()
}

const PROGRESS_KEYS: &[&str] = &[
    "frame",
    "fps",
    "stream_0_0_q",
    "bitrate",
    "total_size",
    "out_time_us",
    "out_time_ms",
    "out_time",
    "dup_frames",
    "drop_frames",
    "speed",
    "progress",
];

fn is_progress_line(line: &str) -> bool {
    line.trim()
        .split_once('=')
        .map(|(key, _)| PROGRESS_KEYS.contains(&key) || key.starts_with("stream_"))
        .unwrap_or(false)
}

/// Parse a progress line from FFmpeg's -progress output.
fn parse_progress_line(line: &str, current: &mut FfmpegProgress) -> Option<FfmpegProgress> {
    let line = line.trim();

    if let Some((key, value)) = line.split_once('=') {
        match key {
            "out_time_ms" | "out_time_us" => {
                // Both keys actually carry microseconds
                if let Ok(us) = value.parse::<i64>() {
                    current.out_time_ms = us / 1000;
                }
            }
            "out_time" => {
                // Format: HH:MM:SS.microseconds
                current.out_time = value.to_string();
            }
            "frame" => {
                if let Ok(frame) = value.parse() {
                    current.frame = frame;
                }
            }
            "fps" => {
                if let Ok(fps) = value.parse() {
                    current.fps = fps;
                }
            }
            "speed" => {
                // Format: "1.5x" or "N/A"
                if let Some(speed) = value
                    .strip_suffix('x')
                    .and_then(|s| s.trim().parse().ok())
                {
                    current.speed = speed;
                }
            }
            "progress" => {
                // "continue" or "end"
                if value == "end" {
                    current.is_complete = true;
                }
                return Some(current.clone());
            }
            _ => {}
        }
    }

    None
}

/// Frame rate as FFmpeg expects it on the command line.
///
/// Whole rates stay integers, NTSC rates become `N/1001`, anything else is
/// the exact millisecond rational. The encoder then runs at the same rate
/// the mel chunks were aligned to.
pub fn format_fps(fps: f64) -> String {
    if (fps - fps.round()).abs() < 1e-9 {
        return format!("{}", fps.round() as i64);
    }

    let ntsc = (fps * 1.001).round();
    if (ntsc * 1000.0 / 1001.0 - fps).abs() < 1e-9 {
        return format!("{}/1001", ntsc as i64 * 1000);
    }

    let num = (fps * 1000.0).round() as u64;
    let div = gcd(num, 1000);
    format!("{}/{}", num / div, 1000 / div)
}

fn gcd(mut a: u64, mut b: u64) -> u64 {
    while b != 0 {
        (a, b) = (b, a % b);
    }
    a.max(1)
}

/// Check if FFmpeg is available.
pub fn check_ffmpeg() -> MediaResult<PathBuf> {
    which::which("ffmpeg").map_err(|_| MediaError::FfmpegNotFound)
}

/// Check if FFprobe is available.
pub fn check_ffprobe() -> MediaResult<PathBuf> {
    which::which("ffprobe").map_err(|_| MediaError::FfprobeNotFound)
}

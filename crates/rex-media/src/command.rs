//! FFmpeg command builder and runner.

use std::path::{Path, PathBuf};
use std::process::{ExitStatus, Stdio};
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncReadExt, BufReader};
use tokio::process::{Child, Command};
use tokio::task::JoinHandle;
use tracing::{debug, trace, warn};

use rex_models::encoding::MIN_ENCODE_TIMEOUT_MS;

use crate::error::{MediaError, MediaResult};
use crate::log_tail::LogTail;
use crate::progress::{parse_progress_line, FfmpegProgress};

/// How long to wait for output readers once the process has exited.
const READER_DRAIN_GRACE: Duration = Duration::from_secs(2);

/// Locations of the external media tools.
#[derive(Debug, Clone)]
pub struct ToolPaths {
    pub ffmpeg: PathBuf,
    pub ffprobe: PathBuf,
}

impl Default for ToolPaths {
    fn default() -> Self {
        Self {
            ffmpeg: PathBuf::from("ffmpeg"),
            ffprobe: PathBuf::from("ffprobe"),
        }
    }
}

impl ToolPaths {
    /// Read `FFMPEG_PATH` / `FFPROBE_PATH`, falling back to `$PATH` lookup.
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            ffmpeg: std::env::var("FFMPEG_PATH")
                .map(PathBuf::from)
                .unwrap_or(defaults.ffmpeg),
            ffprobe: std::env::var("FFPROBE_PATH")
                .map(PathBuf::from)
                .unwrap_or(defaults.ffprobe),
        }
    }
}

#[derive(Debug, Clone)]
enum Input {
    File(PathBuf),
    Lavfi(String),
}

#[derive(Debug, Clone)]
enum Output {
    File(PathBuf),
    Stdout,
}

/// Builder for FFmpeg commands.
#[derive(Debug, Clone)]
pub struct FfmpegCommand {
    /// Arguments placed before everything else (e.g. `-hwaccel cuda`)
    pre_args: Vec<String>,
    /// Input arguments (before -i)
    input_args: Vec<String>,
    input: Input,
    /// Output arguments (after -i)
    output_args: Vec<String>,
    output: Output,
    /// Emit `-progress pipe:1`
    progress_to_stdout: bool,
}

impl FfmpegCommand {
    fn with_input(input: Input) -> Self {
        Self {
            pre_args: Vec::new(),
            input_args: Vec::new(),
            input,
            output_args: Vec::new(),
            output: Output::Stdout,
            progress_to_stdout: false,
        }
    }

    /// Read from a file.
    pub fn file(input: impl AsRef<Path>) -> Self {
        Self::with_input(Input::File(input.as_ref().to_path_buf()))
    }

    /// Read from a lavfi source graph (e.g. `color=c=black:s=640x360:d=5`).
    pub fn lavfi(source: impl Into<String>) -> Self {
        Self::with_input(Input::Lavfi(source.into()))
    }

    /// Add arguments ahead of every other argument.
    pub fn pre_args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.pre_args.extend(args.into_iter().map(Into::into));
        self
    }

    /// Add input arguments (before -i).
    pub fn input_arg(mut self, arg: impl Into<String>) -> Self {
        self.input_args.push(arg.into());
        self
    }

    /// Add output arguments (after -i).
    pub fn output_arg(mut self, arg: impl Into<String>) -> Self {
        self.output_args.push(arg.into());
        self
    }

    /// Set seek position (before input).
    pub fn seek(self, seconds: f64) -> Self {
        self.input_arg("-ss").input_arg(format!("{:.3}", seconds))
    }

    /// Set video filter.
    pub fn video_filter(self, filter: impl Into<String>) -> Self {
        self.output_arg("-vf").output_arg(filter)
    }

    /// Set output pixel format.
    pub fn pixel_format(self, pix_fmt: impl Into<String>) -> Self {
        self.output_arg("-pix_fmt").output_arg(pix_fmt)
    }

    /// Set video codec.
    pub fn video_codec(self, codec: impl Into<String>) -> Self {
        self.output_arg("-c:v").output_arg(codec)
    }

    /// Extract single frame.
    pub fn single_frame(self) -> Self {
        self.output_arg("-frames:v").output_arg("1")
    }

    /// Emit unframed pixels in `pix_fmt`.
    pub fn raw_video(self, pix_fmt: impl Into<String>) -> Self {
        self.output_arg("-f").output_arg("rawvideo").pixel_format(pix_fmt)
    }

    /// Report machine readable progress on stdout.
    pub fn progress_to_stdout(mut self) -> Self {
        self.progress_to_stdout = true;
        self
    }

    /// Write to a file.
    pub fn output(mut self, path: impl AsRef<Path>) -> Self {
        self.output = Output::File(path.as_ref().to_path_buf());
        self
    }

    /// Write to stdout.
    pub fn output_to_stdout(mut self) -> Self {
        self.output = Output::Stdout;
        self
    }

    /// Build the command arguments.
    pub fn build_args(&self) -> Vec<String> {
        let mut args = self.pre_args.clone();

        args.push("-hide_banner".to_string());
        args.push("-nostdin".to_string());
        if matches!(self.output, Output::File(_)) {
            args.push("-y".to_string());
        }

        args.extend(self.input_args.iter().cloned());

        match &self.input {
            Input::File(path) => {
                args.push("-i".to_string());
                args.push(path.to_string_lossy().to_string());
            }
            Input::Lavfi(source) => {
                args.push("-f".to_string());
                args.push("lavfi".to_string());
                args.push("-i".to_string());
                args.push(source.clone());
            }
        }

        args.extend(self.output_args.iter().cloned());

        if self.progress_to_stdout {
            args.push("-progress".to_string());
            args.push("pipe:1".to_string());
            args.push("-nostats".to_string());
        }

        match &self.output {
            Output::File(path) => args.push(path.to_string_lossy().to_string()),
            Output::Stdout => args.push("pipe:1".to_string()),
        }

        args
    }
}

/// Runner for FFmpeg commands with progress tracking and a kill deadline.
#[derive(Debug, Clone)]
pub struct FfmpegRunner {
    program: PathBuf,
    timeout_ms: u64,
    log_tail: LogTail,
    operation: &'static str,
}

impl FfmpegRunner {
    /// Create a runner for the given ffmpeg binary.
    pub fn new(program: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
            timeout_ms: MIN_ENCODE_TIMEOUT_MS,
            log_tail: LogTail::default(),
            operation: "ffmpeg",
        }
    }

    /// Kill the process if it has not exited after `timeout_ms`.
    pub fn with_timeout_ms(mut self, timeout_ms: u64) -> Self {
        self.timeout_ms = timeout_ms;
        self
    }

    /// Collect stderr into a tail shared with the caller.
    pub fn with_log_tail(mut self, log_tail: LogTail) -> Self {
        self.log_tail = log_tail;
        self
    }

    /// Name used in timeout errors and logs.
    pub fn with_operation(mut self, operation: &'static str) -> Self {
        self.operation = operation;
        self
    }

    pub fn log_tail(&self) -> &LogTail {
        &self.log_tail
    }

    /// Run an FFmpeg command, discarding stdout.
    pub async fn run(&self, cmd: &FfmpegCommand) -> MediaResult<()> {
        self.run_with_progress(cmd, 0, |_| {}).await
    }

    /// Run an FFmpeg command, reporting encode percentage for every
    /// `out_time_ms` line on stdout.
    ///
    /// The callback runs on the stdout reader task and must not block.
    pub async fn run_with_progress<F>(
        &self,
        cmd: &FfmpegCommand,
        duration_ms: u64,
        on_progress: F,
    ) -> MediaResult<()>
    where
        F: Fn(u8) + Send + 'static,
    {
        let mut child = self.spawn(&cmd.build_args())?;
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| MediaError::internal("stdout not captured"))?;

        let stdout_task = tokio::spawn(async move {
            let mut reader = BufReader::new(stdout).lines();
            let mut current = FfmpegProgress::default();

            while let Ok(Some(line)) = reader.next_line().await {
                if parse_progress_line(&line, &mut current) {
                    on_progress(current.percentage(duration_ms));
                }
            }
        });

        self.supervise(child, stdout_task).await.map(|_| ())
    }

    /// Run an FFmpeg command and return everything it wrote to stdout.
    pub async fn run_capture(&self, cmd: &FfmpegCommand) -> MediaResult<Vec<u8>> {
        let mut child = self.spawn(&cmd.build_args())?;
        let mut stdout = child
            .stdout
            .take()
            .ok_or_else(|| MediaError::internal("stdout not captured"))?;

        let stdout_task = tokio::spawn(async move {
            let mut buf = Vec::new();
            stdout.read_to_end(&mut buf).await.map(|_| buf)
        });

        self.supervise(child, stdout_task)
            .await?
            .ok_or_else(|| {
                MediaError::internal(format!("{} stdout reader did not finish", self.operation))
            })?
            .map_err(MediaError::from)
    }

    fn spawn(&self, args: &[String]) -> MediaResult<Child> {
        debug!("Running {}: {} {}", self.operation, self.program.display(), args.join(" "));

        Command::new(&self.program)
            .args(args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|source| MediaError::SpawnFailed {
                program: self.program.display().to_string(),
                source,
            })
    }

    /// Wait for exit under the deadline while the readers drain the pipes.
    ///
    /// Returns `None` when the process exited cleanly but the stdout reader
    /// did not finish.
    async fn supervise<T: Send + 'static>(
        &self,
        mut child: Child,
        mut stdout_task: JoinHandle<T>,
    ) -> MediaResult<Option<T>> {
        let mut stderr_task = match child.stderr.take() {
            Some(stderr) => tokio::spawn(drain_into_tail(stderr, self.log_tail.clone())),
            None => tokio::spawn(async {}),
        };

        let deadline = Duration::from_millis(self.timeout_ms);
        let status: ExitStatus = match tokio::time::timeout(deadline, child.wait()).await {
            Ok(status) => status?,
            Err(_) => {
                warn!(
                    "{} timed out after {} ms, killing process",
                    self.operation, self.timeout_ms
                );
                let _ = child.kill().await;
                stdout_task.abort();
                stderr_task.abort();
                self.log_tail.push(format!(
                    "{} killed after {} ms without exiting",
                    self.operation, self.timeout_ms
                ));
                return Err(MediaError::Timeout {
                    operation: self.operation,
                    timeout_ms: self.timeout_ms,
                    log_tail: self.log_tail.snapshot(),
                });
            }
        };

        // A grandchild can keep a pipe open after exit; readers get a grace
        // period and are then cancelled so nothing they own outlives the run.
        if tokio::time::timeout(READER_DRAIN_GRACE, &mut stderr_task)
            .await
            .is_err()
        {
            stderr_task.abort();
        }
        let output = match tokio::time::timeout(READER_DRAIN_GRACE, &mut stdout_task).await {
            Ok(Ok(output)) => Some(output),
            Ok(Err(_)) => None,
            Err(_) => {
                warn!(
                    "{} stdout still open {:?} after exit, abandoning reader",
                    self.operation, READER_DRAIN_GRACE
                );
                stdout_task.abort();
                None
            }
        };

        if !status.success() {
            return Err(MediaError::EncodeFailed {
                exit_code: status.code(),
                log_tail: self.log_tail.snapshot(),
            });
        }

        Ok(output)
    }
}

/// Copy every stderr line into the tail.
async fn drain_into_tail<R>(stream: R, tail: LogTail)
where
    R: AsyncRead + Unpin,
{
    let mut lines = BufReader::new(stream).lines();
    while let Ok(Some(line)) = lines.next_line().await {
        trace!(target: "ffmpeg_stderr", "{}", line);
        tail.push(line);
    }
}

/// Resolve a tool to an executable path.
pub fn check_program(program: &Path) -> MediaResult<PathBuf> {
    which::which(program).map_err(|e| {
        MediaError::SpawnFailed {
            program: program.display().to_string(),
            source: std::io::Error::new(std::io::ErrorKind::NotFound, e.to_string()),
        }
    })
}


#[cfg(all(test, unix))]
mod process_tests {
    use super::*;
    use std::os::unix::fs::PermissionsExt;
    use std::sync::{Arc, Mutex};
    use tempfile::TempDir;

    fn script(dir: &TempDir, name: &str, body: &str) -> PathBuf {
        let path = dir.path().join(name);
        std::fs::write(&path, format!("#!/bin/sh\n{}\n", body)).unwrap();
        std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)).unwrap();
        path
    }

    #[tokio::test]
    async fn test_progress_lines_are_reported_in_order() {
        let dir = TempDir::new().unwrap();
        let fake = script(
            &dir,
            "ffmpeg",
            "echo out_time_ms=1000000\necho frame=30\necho out_time_ms=2500000\necho out_time_ms=9000000\necho progress=end",
        );

        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        FfmpegRunner::new(fake)
            .run_with_progress(&FfmpegCommand::lavfi("color"), 5000, move |pct| {
                sink.lock().unwrap().push(pct)
            })
            .await
            .unwrap();

        assert_eq!(*seen.lock().unwrap(), vec![20, 50, 90]);
    }

    #[tokio::test]
    async fn test_progress_block_notifies_once() {
        let dir = TempDir::new().unwrap();
        let fake = script(
            &dir,
            "ffmpeg",
            "echo frame=30\necho out_time_us=1000000\necho out_time_ms=1000000\necho out_time=00:00:01.000000\necho speed=1.0x\necho progress=continue",
        );

        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        FfmpegRunner::new(fake)
            .run_with_progress(&FfmpegCommand::lavfi("color"), 5000, move |pct| {
                sink.lock().unwrap().push(pct)
            })
            .await
            .unwrap();

        assert_eq!(*seen.lock().unwrap(), vec![20]);
    }

    #[tokio::test]
    async fn test_held_stdout_does_not_outlive_run() {
        let dir = TempDir::new().unwrap();
        // The background sleep inherits stdout and keeps it open after exit.
        let fake = script(
            &dir,
            "ffmpeg",
            "sleep 10 2>/dev/null &\necho out_time_ms=1000000\nexit 0",
        );

        let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel();
        let started = std::time::Instant::now();
        FfmpegRunner::new(fake)
            .run_with_progress(&FfmpegCommand::lavfi("color"), 5000, move |pct| {
                let _ = tx.send(pct);
            })
            .await
            .unwrap();
        assert!(started.elapsed() < Duration::from_secs(8));

        let mut seen = Vec::new();
        while let Some(pct) = tokio::time::timeout(Duration::from_secs(5), rx.recv())
            .await
            .expect("progress callback was not dropped")
        {
            seen.push(pct);
        }
        assert_eq!(seen, vec![20]);
    }

    #[tokio::test]
    async fn test_non_zero_exit_carries_stderr_tail() {
        let dir = TempDir::new().unwrap();
        let fake = script(
            &dir,
            "ffmpeg",
            "i=0\nwhile [ $i -lt 25 ]; do echo \"stderr line $i\" >&2; i=$((i+1)); done\nexit 3",
        );

        let err = FfmpegRunner::new(fake)
            .run(&FfmpegCommand::lavfi("color"))
            .await
            .unwrap_err();

        match err {
            MediaError::EncodeFailed { exit_code, log_tail } => {
                assert_eq!(exit_code, Some(3));
                assert_eq!(log_tail.len(), 20);
                assert_eq!(log_tail.last().unwrap(), "stderr line 24");
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_wedged_process_is_killed() {
        let dir = TempDir::new().unwrap();
        let fake = script(&dir, "ffmpeg", "echo starting >&2\nexec sleep 30");

        let started = std::time::Instant::now();
        let err = FfmpegRunner::new(fake)
            .with_timeout_ms(300)
            .with_operation("ffmpeg encode")
            .run(&FfmpegCommand::lavfi("color"))
            .await
            .unwrap_err();

        assert!(started.elapsed() < Duration::from_secs(10));
        assert_eq!(err.code(), rex_models::ErrorCode::FfmpegTimeout);
        assert!(!err.log_tail().is_empty());
    }

    #[tokio::test]
    async fn test_capture_returns_stdout_bytes() {
        let dir = TempDir::new().unwrap();
        let fake = script(&dir, "ffmpeg", "printf 'abcdef'");

        let bytes = FfmpegRunner::new(fake)
            .run_capture(&FfmpegCommand::file("/dev/null").output_to_stdout())
            .await
            .unwrap();
        assert_eq!(bytes, b"abcdef");
    }
}

//! Native helper bridge.
//!
//! The helper scores how different two frames are. It is invoked either with
//! two file paths or with `--stdin <w> <h> <c>` and both raw buffers written
//! back-to-back on stdin, and answers with one JSON line
//! `{"status":"success","diff_score":<f64>}`.

use serde::Deserialize;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::process::{Output, Stdio};
use std::time::Duration;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;
use tracing::{debug, info, warn};

use crate::error::{MediaError, MediaResult};
use crate::helper::{default_helper_path, plan_helper_command, HelperLimits, WrapperTools};
use crate::log_tail::LogTail;

/// Default deadline for one helper invocation.
pub const DEFAULT_HELPER_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Debug, Deserialize)]
struct HelperResponse {
    status: Option<String>,
    diff_score: Option<serde_json::Value>,
}

#[derive(Clone, Copy)]
enum Payload<'a> {
    None,
    Frames(&'a [u8], &'a [u8]),
}

/// Runs the similarity helper.
#[derive(Debug, Clone)]
pub struct NativeBridge {
    helper: PathBuf,
    limits: HelperLimits,
    tools: WrapperTools,
    timeout: Duration,
}

impl NativeBridge {
    pub fn new(helper: impl Into<PathBuf>) -> Self {
        Self {
            helper: helper.into(),
            limits: HelperLimits::default(),
            tools: WrapperTools::default(),
            timeout: DEFAULT_HELPER_TIMEOUT,
        }
    }

    /// Helper path, limits and deadline from the environment.
    pub fn from_env() -> Self {
        let timeout = std::env::var("NATIVE_HELPER_TIMEOUT_SECS")
            .ok()
            .and_then(|s| s.trim().parse::<u64>().ok())
            .filter(|secs| *secs > 0)
            .map(Duration::from_secs)
            .unwrap_or(DEFAULT_HELPER_TIMEOUT);

        Self::new(default_helper_path())
            .with_limits(HelperLimits::from_env())
            .with_timeout(timeout)
    }

    pub fn with_limits(mut self, limits: HelperLimits) -> Self {
        self.limits = limits;
        self
    }

    pub fn with_wrappers(mut self, tools: WrapperTools) -> Self {
        self.tools = tools;
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn helper_path(&self) -> &Path {
        &self.helper
    }

    /// Score two frames stored on disk.
    pub async fn analyze_frames(&self, first: &Path, second: &Path) -> MediaResult<f64> {
        let args = vec![
            first.to_string_lossy().to_string(),
            second.to_string_lossy().to_string(),
        ];
        self.analyze(&args, Payload::None).await
    }

    /// Score two raw frames piped over stdin.
    pub async fn analyze_frames_from_buffers(
        &self,
        first: &[u8],
        second: &[u8],
        width: u32,
        height: u32,
        channels: u32,
    ) -> MediaResult<f64> {
        let args = vec![
            "--stdin".to_string(),
            width.to_string(),
            height.to_string(),
            channels.to_string(),
        ];
        self.analyze(&args, Payload::Frames(first, second)).await
    }

    async fn analyze(&self, base_args: &[String], payload: Payload<'_>) -> MediaResult<f64> {
        let plan = plan_helper_command(&self.helper, base_args, &self.limits, &self.tools);

        let output = match self.invoke(&plan.command, &plan.args, payload).await {
            Err(err) if is_not_found(&err) => match plan.fallback.as_deref() {
                Some(fallback) => {
                    warn!(
                        "{} not available ({}), running helper without resource limits",
                        plan.command.display(),
                        err
                    );
                    self.invoke(fallback, base_args, payload).await?
                }
                None => return Err(err),
            },
            other => other?,
        };

        let score = parse_helper_output(&output)?;
        info!("Native helper diff score: {}", score);
        Ok(score)
    }

    async fn invoke(
        &self,
        command: &Path,
        args: &[String],
        payload: Payload<'_>,
    ) -> MediaResult<Output> {
        debug!("Running helper: {} {}", command.display(), args.join(" "));

        let stdin = match payload {
            Payload::None => Stdio::null(),
            Payload::Frames(..) => Stdio::piped(),
        };

        let mut child = Command::new(command)
            .args(args)
            .stdin(stdin)
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| MediaError::NativeValidation {
                message: format!("native helper could not be started: {}", e),
                log_tail: Vec::new(),
                source: Some(e),
            })?;

        let writer = child.stdin.take();
        let feed = async move {
            if let (Some(mut stdin), Payload::Frames(first, second)) = (writer, payload) {
                let written = async {
                    stdin.write_all(first).await?;
                    stdin.write_all(second).await?;
                    stdin.shutdown().await?;
                    Ok::<_, std::io::Error>(())
                }
                .await;
                if let Err(e) = written {
                    // Exit status decides the outcome.
                    debug!("Helper stdin closed early: {}", e);
                }
            }
        };

        let run = async {
            let ((), output) = tokio::join!(feed, child.wait_with_output());
            output
        };

        match tokio::time::timeout(self.timeout, run).await {
            Ok(Ok(output)) => Ok(output),
            Ok(Err(e)) => Err(MediaError::NativeValidation {
                message: format!("native helper failed: {}", e),
                log_tail: Vec::new(),
                source: Some(e),
            }),
            Err(_) => {
                let timeout_ms = self.timeout.as_millis();
                warn!("Native helper timed out after {} ms, killing process", timeout_ms);
                Err(MediaError::native_validation(
                    format!("native helper timed out after {} ms", timeout_ms),
                    vec![format!("native helper killed after {} ms without exiting", timeout_ms)],
                ))
            }
        }
    }
}

/// Interpret a finished helper process.
pub fn parse_helper_output(output: &Output) -> MediaResult<f64> {
    let stdout = String::from_utf8_lossy(&output.stdout);
    let stderr = String::from_utf8_lossy(&output.stderr);

    if !output.status.success() {
        return Err(MediaError::native_validation(
            format!("native helper exited with {}", output.status),
            collect_tail(&[&*stderr]),
        ));
    }

    let diagnostics = || collect_tail(&[&*stderr, &*stdout]);

    let response: HelperResponse = serde_json::from_str(stdout.trim()).map_err(|e| {
        MediaError::native_validation(format!("unparsable helper output: {}", e), diagnostics())
    })?;

    if response.status.as_deref() != Some("success") {
        return Err(MediaError::native_validation(
            format!(
                "native helper reported status {}",
                response.status.as_deref().unwrap_or("<missing>")
            ),
            diagnostics(),
        ));
    }

    response
        .diff_score
        .as_ref()
        .and_then(serde_json::Value::as_f64)
        .ok_or_else(|| {
            MediaError::native_validation("native helper returned no numeric diff_score", diagnostics())
        })
}

fn is_not_found(err: &MediaError) -> bool {
    matches!(
        err,
        MediaError::NativeValidation { source: Some(e), .. } if e.kind() == ErrorKind::NotFound
    )
}

fn collect_tail(streams: &[&str]) -> Vec<String> {
    let tail = LogTail::default();
    for stream in streams {
        for line in stream.lines() {
            tail.push(line);
        }
    }
    tail.snapshot()
}

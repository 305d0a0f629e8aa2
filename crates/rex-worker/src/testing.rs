//! Test doubles: a recording event sink and fake media binaries.

use std::os::unix::fs::PermissionsExt;
use std::collections::VecDeque;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use tempfile::TempDir;

use rex_media::{EncoderCache, NativeBridge, ToolPaths};
use rex_models::{ExportResult, JobId, ProgressEvent};
use rex_queue::{EventSink, QueueError, QueueResult, RequestSource, StreamMessage};

#[derive(Debug, Clone, PartialEq)]
pub enum Recorded {
    Progress(ProgressEvent),
    Result(JobId, ExportResult),
    Ack(String),
}

/// In-memory broker: records published events and serves queued requests.
#[derive(Debug, Default)]
pub struct RecordingSink {
    events: Mutex<Vec<Recorded>>,
    requests: Mutex<VecDeque<StreamMessage>>,
    fail_progress: bool,
    fail_init: bool,
}

impl RecordingSink {
    pub fn failing_progress() -> Self {
        Self {
            fail_progress: true,
            ..Default::default()
        }
    }

    pub fn failing_init() -> Self {
        Self {
            fail_init: true,
            ..Default::default()
        }
    }

    pub fn with_requests(requests: Vec<StreamMessage>) -> Self {
        Self {
            requests: Mutex::new(requests.into()),
            ..Default::default()
        }
    }

    pub fn acks(&self) -> Vec<String> {
        self.events()
            .into_iter()
            .filter_map(|e| match e {
                Recorded::Ack(id) => Some(id),
                _ => None,
            })
            .collect()
    }

    pub fn events(&self) -> Vec<Recorded> {
        self.events.lock().unwrap().clone()
    }

    pub fn progress_values(&self) -> Vec<u8> {
        self.events()
            .into_iter()
            .filter_map(|e| match e {
                Recorded::Progress(p) => Some(p.progress),
                _ => None,
            })
            .collect()
    }

    pub fn progress_messages(&self) -> Vec<String> {
        self.events()
            .into_iter()
            .filter_map(|e| match e {
                Recorded::Progress(p) => Some(p.message),
                _ => None,
            })
            .collect()
    }

    pub fn results(&self) -> Vec<(JobId, ExportResult)> {
        self.events()
            .into_iter()
            .filter_map(|e| match e {
                Recorded::Result(id, r) => Some((id, r)),
                _ => None,
            })
            .collect()
    }
}

#[async_trait]
impl EventSink for RecordingSink {
    async fn publish_progress(&self, event: &ProgressEvent) -> QueueResult<()> {
        if self.fail_progress {
            return Err(QueueError::connection_failed("progress stream unavailable"));
        }
        self.events
            .lock()
            .unwrap()
            .push(Recorded::Progress(event.clone()));
        Ok(())
    }

    async fn publish_result(&self, job_id: &JobId, result: &ExportResult) -> QueueResult<()> {
        self.events
            .lock()
            .unwrap()
            .push(Recorded::Result(job_id.clone(), result.clone()));
        Ok(())
    }
}

#[async_trait]
impl RequestSource for RecordingSink {
    async fn init(&self) -> QueueResult<()> {
        if self.fail_init {
            return Err(QueueError::connection_failed("broker unreachable"));
        }
        Ok(())
    }

    async fn read_one(&self) -> QueueResult<Option<StreamMessage>> {
        let next = self.requests.lock().unwrap().pop_front();
        if next.is_none() {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        Ok(next)
    }

    async fn ack(&self, message_id: &str) -> QueueResult<()> {
        self.events
            .lock()
            .unwrap()
            .push(Recorded::Ack(message_id.to_string()));
        Ok(())
    }
}

/// Behaviour of the fake `ffmpeg`.
#[derive(Debug, Clone)]
pub struct FakeMedia {
    /// Encodes using any of these codecs exit 1
    pub failing_codecs: Vec<&'static str>,
    /// Encodes never exit
    pub hang: bool,
    /// Bytes written per frame extraction
    pub frame_bytes: usize,
    /// Score printed by the fake helper
    pub diff_score: f64,
}

/// Frame size reported by the fake `ffprobe`.
pub const FAKE_WIDTH: u32 = 4;
pub const FAKE_HEIGHT: u32 = 2;

impl Default for FakeMedia {
    fn default() -> Self {
        Self {
            failing_codecs: Vec::new(),
            hang: false,
            frame_bytes: (FAKE_WIDTH * FAKE_HEIGHT * 3) as usize,
            diff_score: 0.25,
        }
    }
}

/// Fake binaries installed in a temp dir.
pub struct FakeTools {
    pub dir: TempDir,
    pub tools: ToolPaths,
    pub helper: PathBuf,
}

impl FakeTools {
    pub fn install(media: FakeMedia) -> Self {
        let dir = TempDir::new().unwrap();
        let calls = dir.path().join("ffmpeg.calls");

        let failing: String = media
            .failing_codecs
            .iter()
            .map(|codec| {
                format!(
                    "case \" $* \" in *\" {codec} \"*) echo \"{codec}: no capable device\" >&2; exit 1;; esac\n"
                )
            })
            .collect();
        let encode = if media.hang {
            "echo \"encoder wedged\" >&2\nexec sleep 30\n".to_string()
        } else {
            "echo out_time_ms=1000000\necho out_time_ms=2500000\necho progress=end\nprintf 'fake-video' > \"$last\"\n"
                .to_string()
        };
        let ffmpeg = write_script(
            dir.path(),
            "ffmpeg",
            &format!(
                "echo \"$*\" >> \"{calls}\"\nfor last; do :; done\n{failing}if [ \"$last\" = \"pipe:1\" ]; then\n  head -c {bytes} /dev/zero\n  exit 0\nfi\n{encode}",
                calls = calls.display(),
                bytes = media.frame_bytes,
            ),
        );

        let ffprobe = write_script(
            dir.path(),
            "ffprobe",
            &format!(
                "echo '{{\"streams\":[{{\"codec_type\":\"video\",\"width\":{FAKE_WIDTH},\"height\":{FAKE_HEIGHT}}}],\"format\":{{\"duration\":\"5.000000\"}}}}'"
            ),
        );

        let helper = write_script(
            dir.path(),
            "native_helper",
            &format!(
                "cat > /dev/null\necho '{{\"status\":\"success\",\"diff_score\":{}}}'",
                media.diff_score
            ),
        );

        Self {
            tools: ToolPaths { ffmpeg, ffprobe },
            helper,
            dir,
        }
    }

    pub fn bridge(&self) -> NativeBridge {
        NativeBridge::new(&self.helper)
    }

    pub fn encoder_cache(&self, detected: &[&str]) -> EncoderCache {
        EncoderCache::with_encoders(
            &self.tools.ffmpeg,
            detected.iter().map(|s| s.to_string()).collect(),
        )
    }

    /// Every ffmpeg invocation, one argument string per line.
    pub fn ffmpeg_calls(&self) -> Vec<String> {
        std::fs::read_to_string(self.dir.path().join("ffmpeg.calls"))
            .map(|s| s.lines().map(str::to_string).collect())
            .unwrap_or_default()
    }

    /// ffmpeg invocations that encoded (as opposed to sampling frames).
    pub fn encode_calls(&self) -> Vec<String> {
        self.ffmpeg_calls()
            .into_iter()
            .filter(|c| !c.ends_with("pipe:1"))
            .collect()
    }

    pub fn output_dir(&self) -> PathBuf {
        self.dir.path().join("exports/owner-1/replay-42")
    }
}

fn write_script(dir: &Path, name: &str, body: &str) -> PathBuf {
    let path = dir.join(name);
    std::fs::write(&path, format!("#!/bin/sh\n{}\n", body)).unwrap();
    std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)).unwrap();
    path
}

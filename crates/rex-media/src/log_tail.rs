//! Bounded diagnostic log shared between a job and its subprocesses.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex, MutexGuard};

use rex_models::encoding::LOG_TAIL_LINES;

/// Ring of the most recent diagnostic lines.
///
/// Clones share the same buffer, so a job can hand one to every subprocess
/// it runs and read the combined tail on failure.
#[derive(Debug, Clone)]
pub struct LogTail {
    lines: Arc<Mutex<VecDeque<String>>>,
    capacity: usize,
}

impl Default for LogTail {
    fn default() -> Self {
        Self::new(LOG_TAIL_LINES)
    }
}

impl LogTail {
    pub fn new(capacity: usize) -> Self {
        Self {
            lines: Arc::new(Mutex::new(VecDeque::with_capacity(capacity))),
            capacity: capacity.max(1),
        }
    }

    /// Append a line, dropping the oldest once full. Blank lines are ignored.
    pub fn push(&self, line: impl AsRef<str>) {
        let line = line.as_ref().trim();
        if line.is_empty() {
            return;
        }
        let mut lines = self.lock();
        lines.push_back(line.to_string());
        while lines.len() > self.capacity {
            lines.pop_front();
        }
    }

    /// Copy of the current contents, oldest first.
    pub fn snapshot(&self) -> Vec<String> {
        self.lock().iter().cloned().collect()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    fn lock(&self) -> MutexGuard<'_, VecDeque<String>> {
        // A panic while holding the lock cannot leave the deque inconsistent.
        self.lines.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_keeps_last_lines() {
        let tail = LogTail::new(3);
        for i in 0..5 {
            tail.push(format!("line {}", i));
        }
        assert_eq!(tail.snapshot(), vec!["line 2", "line 3", "line 4"]);
    }

    #[test]
    fn test_clones_share_buffer() {
        let tail = LogTail::default();
        let writer = tail.clone();
        writer.push("HWACCEL_UNAVAILABLE");
        writer.push("   ");
        assert_eq!(tail.snapshot(), vec!["HWACCEL_UNAVAILABLE"]);
    }
}

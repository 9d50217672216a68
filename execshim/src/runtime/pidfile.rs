//! Pid file reading.
//!
//! The runtime writes the launched process's pid as a decimal string,
//! optionally followed by a newline. A detached exec returns before the file
//! is guaranteed to exist, so callers poll with a bounded backoff.

use execshim_shared::constants::timeouts;
use execshim_shared::errors::{ShimError, ShimResult};
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::time::Instant;

/// How long and how often to poll for a pid file.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct PidFilePolicy {
    pub timeout: Duration,
    pub poll_interval: Duration,
    pub max_poll_interval: Duration,
}

impl Default for PidFilePolicy {
    fn default() -> Self {
        Self {
            timeout: Duration::from_millis(timeouts::PID_FILE_TIMEOUT_MS),
            poll_interval: Duration::from_millis(timeouts::PID_FILE_POLL_MS),
            max_poll_interval: Duration::from_millis(timeouts::PID_FILE_POLL_MAX_MS),
        }
    }
}

/// Scratch pid file owned by one exec attempt.
///
/// Any stale file at the path is removed on creation, so a retry of the same
/// id can never resolve a pid left over from an earlier attempt. The file is
/// removed again on drop unless [`PidFileGuard::keep`] was called.
#[derive(Debug)]
pub struct PidFileGuard {
    path: PathBuf,
    keep: bool,
}

impl PidFileGuard {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        remove_pid_file(&path);
        Self { path, keep: false }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Leave the file in place once the guard drops.
    pub fn keep(mut self) {
        self.keep = true;
    }
}

impl Drop for PidFileGuard {
    fn drop(&mut self) {
        if !self.keep {
            remove_pid_file(&self.path);
        }
    }
}

fn remove_pid_file(path: &Path) {
    match std::fs::remove_file(path) {
        Ok(()) => {}
        Err(e) if e.kind() == ErrorKind::NotFound => {}
        Err(e) => tracing::warn!(path = %path.display(), error = %e, "Failed to remove PID file"),
    }
}

/// Wait until the runtime has written the pid file.
///
/// A missing or empty file is retried until `policy.timeout` elapses; a file
/// with malformed content fails immediately.
pub async fn wait_for_pid_file(path: &Path, policy: PidFilePolicy) -> ShimResult<u32> {
    let deadline = Instant::now() + policy.timeout;
    let mut interval = policy.poll_interval;

    loop {
        if let Some(pid) = try_read_pid_file(path)? {
            return Ok(pid);
        }

        let now = Instant::now();
        if now >= deadline {
            return Err(ShimError::PidFile(format!(
                "PID file {} not written within {:?}",
                path.display(),
                policy.timeout
            )));
        }

        tracing::trace!(path = %path.display(), ?interval, "PID file not ready");
        tokio::time::sleep(interval.min(deadline - now)).await;
        interval = (interval * 2).min(policy.max_poll_interval);
    }
}

/// `Ok(None)` while the file is absent or still empty.
fn try_read_pid_file(path: &Path) -> ShimResult<Option<u32>> {
    let content = match std::fs::read_to_string(path) {
        Ok(content) => content,
        Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
        Err(e) => {
            return Err(ShimError::PidFile(format!(
                "Failed to read PID file {}: {}",
                path.display(),
                e
            )))
        }
    };

    let trimmed = content.trim();
    if trimmed.is_empty() {
        return Ok(None);
    }

    match trimmed.parse::<u32>() {
        Ok(pid) if pid > 0 => Ok(Some(pid)),
        Ok(_) => Err(ShimError::PidFile(format!(
            "Invalid PID in file {}: '0'",
            path.display()
        ))),
        Err(e) => Err(ShimError::PidFile(format!(
            "Invalid PID in file {}: '{}' - {}",
            path.display(),
            trimmed,
            e
        ))),
    }
}

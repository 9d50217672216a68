//! Configuration for the shim.

use crate::runtime::PidFilePolicy;
use execshim_shared::constants::{runtime as const_runtime, timeouts};
use execshim_shared::errors::{ShimError, ShimResult};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Options shared by every process the shim creates.
///
/// Durations are written as milliseconds in configuration files.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ShimOptions {
    /// Scratch directory for pid files, console sockets and process specs.
    ///
    /// Default: current directory
    #[serde(default = "default_work_dir")]
    pub work_dir: PathBuf,

    /// OCI runtime binary.
    ///
    /// Default: runc
    #[serde(default = "default_runtime_binary")]
    pub runtime_binary: PathBuf,

    /// Runtime state root (`--root`), runtime default when unset.
    #[serde(default)]
    pub runtime_root: Option<PathBuf>,

    /// How long to wait for the runtime to write a pid file.
    #[serde(default = "default_pid_file_timeout", with = "duration_ms")]
    pub pid_file_timeout: Duration,

    /// First poll interval while waiting for a pid file (doubles per attempt).
    #[serde(default = "default_pid_file_poll_interval", with = "duration_ms")]
    pub pid_file_poll_interval: Duration,

    /// How long to wait for the runtime to deliver a PTY master.
    #[serde(default = "default_console_timeout", with = "duration_ms")]
    pub console_timeout: Duration,

    /// Delete pid files once the pid has been read.
    ///
    /// Default: true
    #[serde(default = "default_remove_pid_files")]
    pub remove_pid_files: bool,
}

fn default_work_dir() -> PathBuf {
    std::env::current_dir().unwrap_or_else(|_| PathBuf::from("."))
}

fn default_runtime_binary() -> PathBuf {
    PathBuf::from(const_runtime::DEFAULT_BINARY)
}

fn default_pid_file_timeout() -> Duration {
    Duration::from_millis(timeouts::PID_FILE_TIMEOUT_MS)
}

fn default_pid_file_poll_interval() -> Duration {
    Duration::from_millis(timeouts::PID_FILE_POLL_MS)
}

fn default_console_timeout() -> Duration {
    Duration::from_millis(timeouts::CONSOLE_TIMEOUT_MS)
}

fn default_remove_pid_files() -> bool {
    true
}

impl Default for ShimOptions {
    fn default() -> Self {
        Self {
            work_dir: default_work_dir(),
            runtime_binary: default_runtime_binary(),
            runtime_root: None,
            pid_file_timeout: default_pid_file_timeout(),
            pid_file_poll_interval: default_pid_file_poll_interval(),
            console_timeout: default_console_timeout(),
            remove_pid_files: default_remove_pid_files(),
        }
    }
}

impl ShimOptions {
    /// Load options from a JSON file. Missing fields take their defaults.
    pub fn from_file(path: &Path) -> ShimResult<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            ShimError::Config(format!("Failed to read config {}: {}", path.display(), e))
        })?;
        let options: Self = serde_json::from_str(&content).map_err(|e| {
            ShimError::Config(format!("Invalid config {}: {}", path.display(), e))
        })?;
        options.validate()?;
        Ok(options)
    }

    pub fn validate(&self) -> ShimResult<()> {
        if self.runtime_binary.as_os_str().is_empty() {
            return Err(ShimError::Config("runtime_binary must not be empty".into()));
        }
        if self.pid_file_poll_interval.is_zero() {
            return Err(ShimError::Config("pid_file_poll_interval must be positive".into()));
        }
        if self.console_timeout.is_zero() {
            return Err(ShimError::Config("console_timeout must be positive".into()));
        }
        Ok(())
    }

    /// Pid file polling derived from these options.
    pub fn pid_file_policy(&self) -> PidFilePolicy {
        PidFilePolicy {
            timeout: self.pid_file_timeout,
            poll_interval: self.pid_file_poll_interval,
            max_poll_interval: Duration::from_millis(timeouts::PID_FILE_POLL_MAX_MS)
                .max(self.pid_file_poll_interval),
        }
    }
}

mod duration_ms {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u64(value.as_millis() as u64)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        u64::deserialize(deserializer).map(Duration::from_millis)
    }
}

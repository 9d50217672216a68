//! Error types shared by every shim component.
//!
//! Variants follow the phase in which a failure happened so callers can tell
//! a process that never started apart from one that started but cannot be
//! tracked.

use thiserror::Error;

/// Result alias used throughout the shim.
pub type ShimResult<T> = Result<T, ShimError>;

#[derive(Debug, Error)]
pub enum ShimError {
    /// Local preparation failed before the runtime was invoked.
    #[error("setup failed: {0}")]
    Setup(String),

    /// The container runtime rejected or failed a request.
    #[error("runtime error: {0}")]
    Runtime(String),

    /// The terminal master was never delivered over the console socket.
    #[error("console error: {0}")]
    Console(String),

    /// The runtime reported success but the pid file was unusable.
    #[error("pid file error: {0}")]
    PidFile(String),

    /// The process was launched but its I/O could not be wired up.
    #[error("relay error: {0}")]
    Relay(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("already exists: {0}")]
    AlreadyExists(String),

    #[error("invalid state: {0}")]
    InvalidState(String),

    /// Releasing a resource after exit failed.
    #[error("io error: {0}")]
    Io(String),

    #[error("storage error: {0}")]
    Storage(String),

    #[error("config error: {0}")]
    Config(String),

    #[error("internal error: {0}")]
    Internal(String),
}

/// Phase of process creation an error belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    /// Nothing was started.
    Setup,
    /// The runtime was asked to launch and failed.
    Launch,
    /// The runtime launched something the shim cannot track.
    Resolution,
    /// Not a creation error.
    Other,
}

impl ShimError {
    /// Classify this error by creation phase.
    pub fn phase(&self) -> Phase {
        match self {
            ShimError::Setup(_) => Phase::Setup,
            ShimError::Runtime(_) => Phase::Launch,
            ShimError::Console(_) | ShimError::Relay(_) | ShimError::PidFile(_) => {
                Phase::Resolution
            }
            _ => Phase::Other,
        }
    }

    /// True when the runtime was invoked but the process never launched.
    pub fn is_launch_failure(&self) -> bool {
        self.phase() == Phase::Launch
    }
}

impl From<serde_json::Error> for ShimError {
    fn from(e: serde_json::Error) -> Self {
        ShimError::Internal(format!("JSON error: {}", e))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_phase_classification() {
        assert_eq!(ShimError::Setup("cwd".into()).phase(), Phase::Setup);
        assert_eq!(ShimError::Runtime("exit 1".into()).phase(), Phase::Launch);
        assert_eq!(ShimError::PidFile("missing".into()).phase(), Phase::Resolution);
        assert_eq!(ShimError::Console("timeout".into()).phase(), Phase::Resolution);
        assert_eq!(ShimError::Relay("dup".into()).phase(), Phase::Resolution);
        assert_eq!(ShimError::NotFound("7".into()).phase(), Phase::Other);
    }

    #[test]
    fn test_display_includes_context() {
        let err = ShimError::PidFile("/run/1.pid: empty".into());
        assert_eq!(err.to_string(), "pid file error: /run/1.pid: empty");
        assert!(ShimError::Runtime("x".into()).is_launch_failure());
    }
}

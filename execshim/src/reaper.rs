//! Child reaping.
//!
//! The shim registers as child subreaper so processes the runtime detaches
//! are re-parented to it. Every SIGCHLD drains all exited children and
//! hands their statuses to the [`Supervisor`].

use crate::service::Supervisor;
use execshim_shared::constants::process::SIGNAL_EXIT_BASE;
use execshim_shared::errors::{ShimError, ShimResult};
use nix::errno::Errno;
use nix::sys::wait::{waitpid, WaitPidFlag, WaitStatus};
use nix::unistd::Pid;
use std::future::Future;
use std::sync::Arc;
use tokio::signal::unix::{signal, SignalKind};

/// A reaped child.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExitEvent {
    pub pid: u32,
    pub status: i32,
}

/// Become subreaper for the detached processes the runtime leaves behind.
pub fn set_subreaper() -> ShimResult<()> {
    nix::sys::prctl::set_child_subreaper(true)
        .map_err(|e| ShimError::Setup(format!("Failed to become child subreaper: {}", e)))
}

/// Convert a wait status to an exit event.
///
/// Signal deaths map to `128 + signo`, the shell convention. Stops and
/// continues are not exits.
pub fn exit_event(status: WaitStatus) -> Option<ExitEvent> {
    match status {
        WaitStatus::Exited(pid, code) => Some(ExitEvent {
            pid: pid.as_raw() as u32,
            status: code,
        }),
        WaitStatus::Signaled(pid, signal, _) => Some(ExitEvent {
            pid: pid.as_raw() as u32,
            status: SIGNAL_EXIT_BASE + signal as i32,
        }),
        _ => None,
    }
}

/// Reap every child that has exited, without blocking.
pub fn reap_exited() -> Vec<ExitEvent> {
    let mut events = Vec::new();
    loop {
        match waitpid(Pid::from_raw(-1), Some(WaitPidFlag::WNOHANG)) {
            Ok(WaitStatus::StillAlive) => break,
            Ok(status) => {
                if let Some(event) = exit_event(status) {
                    events.push(event);
                }
            }
            Err(Errno::ECHILD) => break,
            Err(Errno::EINTR) => continue,
            Err(e) => {
                tracing::warn!(error = %e, "waitpid failed");
                break;
            }
        }
    }
    events
}

/// Reap children until `shutdown` resolves.
///
/// Reaping waits for in-flight runtime calls, so the runtime CLI's own
/// children are left to their waiters. Each exit is dispatched on its own
/// task: a process draining its output must not hold up the exits behind it.
pub async fn run<F>(supervisor: Arc<Supervisor>, shutdown: F) -> ShimResult<()>
where
    F: Future<Output = ()>,
{
    let mut sigchld = signal(SignalKind::child())
        .map_err(|e| ShimError::Setup(format!("Failed to watch SIGCHLD: {}", e)))?;
    tokio::pin!(shutdown);

    loop {
        let events = {
            let _paused = supervisor.pause_runtime_calls().await;
            reap_exited()
        };
        for event in events {
            tracing::debug!(pid = event.pid, status = event.status, "Reaped child");
            let supervisor = supervisor.clone();
            tokio::spawn(async move {
                supervisor.process_exited(event.pid, event.status).await;
            });
        }

        tokio::select! {
            _ = sigchld.recv() => {}
            _ = &mut shutdown => break,
        }
    }

    tracing::debug!("Reaper stopped");
    Ok(())
}

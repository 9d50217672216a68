//! Process supervisor.
//!
//! Owns every process of one container: the init under id
//! [`INIT_PROCESS_ID`] plus exec processes under caller-chosen ids. Exit
//! notifications from the reaper are dispatched here by OS pid.
//!
//! Runtime calls (exec creation, init delete) and reaping exclude each
//! other through [`Supervisor::pause_runtime_calls`]: the reaper never
//! collects a runtime CLI child, and an exit that happens while its process
//! is still being created is reaped only once the process is registered.

mod registry;

use crate::process::{ExecProcess, InitProcess, Process};
use execshim_shared::constants::process::INIT_PROCESS_ID;
use execshim_shared::errors::{ShimError, ShimResult};
use execshim_shared::{ExecRequest, WinSize};
use nix::sys::signal::{self, Signal};
use nix::unistd::Pid;
use registry::ProcessRegistry;
use std::sync::Arc;
use tokio::sync::{broadcast, RwLock, RwLockWriteGuard};

const EXIT_CHANNEL_CAPACITY: usize = 64;

/// Snapshot of one supervised process.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProcessInfo {
    pub id: u32,
    pub pid: u32,
    pub status: Option<i32>,
}

/// Published once a process's exit has been fully processed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProcessExit {
    pub id: u32,
    pub pid: u32,
    pub status: i32,
}

/// Supervises the processes of one container.
pub struct Supervisor {
    init: Arc<InitProcess>,
    registry: ProcessRegistry,
    exits: broadcast::Sender<ProcessExit>,
    runtime_calls: RwLock<()>,
}

impl Supervisor {
    pub fn new(init: Arc<InitProcess>) -> Self {
        let registry = ProcessRegistry::new();
        let (exits, _) = broadcast::channel(EXIT_CHANNEL_CAPACITY);
        let supervisor = Self {
            init: init.clone(),
            registry,
            exits,
            runtime_calls: RwLock::new(()),
        };
        // Fresh registry: the init id cannot be taken yet.
        let _ = supervisor.registry.insert(INIT_PROCESS_ID, init);
        supervisor
    }

    pub fn init(&self) -> &Arc<InitProcess> {
        &self.init
    }

    /// Receive a [`ProcessExit`] for every exit processed from now on.
    pub fn subscribe_exits(&self) -> broadcast::Receiver<ProcessExit> {
        self.exits.subscribe()
    }

    /// Wait for in-flight runtime calls to finish and hold off new ones
    /// until the guard is dropped.
    ///
    /// Taken by the reaper around `waitpid(-1)`.
    pub async fn pause_runtime_calls(&self) -> RwLockWriteGuard<'_, ()> {
        self.runtime_calls.write().await
    }

    /// Exec a new process into the container under `id`.
    ///
    /// Returns the OS pid. The id stays reserved while the process is
    /// being created and is released again if creation fails.
    pub async fn exec(&self, id: u32, req: ExecRequest) -> ShimResult<u32> {
        if id == INIT_PROCESS_ID {
            return Err(ShimError::InvalidState(format!(
                "process id {} is reserved for init",
                INIT_PROCESS_ID
            )));
        }
        if self.init.status().is_some() {
            return Err(ShimError::InvalidState(format!(
                "container {} init has exited",
                self.init.container_id()
            )));
        }

        let reservation = self.registry.reserve(id)?;
        // Held until the process is findable by pid.
        let _runtime_call = self.runtime_calls.read().await;

        let process = match ExecProcess::create(id, &req, &self.init).await {
            Ok(process) => process,
            Err(e) => {
                tracing::error!(
                    exec_id = id,
                    phase = ?e.phase(),
                    error = %e,
                    "Failed to create exec process"
                );
                return Err(e);
            }
        };

        let pid = process.pid();
        reservation.commit(Arc::new(process));
        Ok(pid)
    }

    pub fn pid(&self, id: u32) -> ShimResult<u32> {
        Ok(self.registry.get(id)?.pid())
    }

    pub fn status(&self, id: u32) -> ShimResult<Option<i32>> {
        Ok(self.registry.get(id)?.status())
    }

    pub fn resize(&self, id: u32, size: WinSize) -> ShimResult<()> {
        self.registry.get(id)?.resize(size)
    }

    /// Send `signal` to a process that has not exited yet.
    pub fn kill(&self, id: u32, signal: Signal) -> ShimResult<()> {
        let process = self.registry.get(id)?;
        if process.status().is_some() {
            return Err(ShimError::InvalidState(format!("process {} has exited", id)));
        }

        let pid = process.pid();
        tracing::debug!(id, pid, ?signal, "Signalling process");
        signal::kill(Pid::from_raw(pid as i32), signal)
            .map_err(|e| ShimError::Io(format!("Failed to send {:?} to pid {}: {}", signal, pid, e)))
    }

    /// Record the exit of process `id`. Returns once its output is drained.
    pub async fn exited(&self, id: u32, status: i32) -> ShimResult<()> {
        let process = self.registry.get(id)?;
        self.finish(id, process, status).await;
        Ok(())
    }

    /// Dispatch a reaped `pid` to the process that owns it.
    ///
    /// Returns `false` when no running process has that pid, which is the
    /// normal case for orphans the shim inherited as subreaper.
    pub async fn process_exited(&self, pid: u32, status: i32) -> bool {
        match self.registry.find_running(pid) {
            Some((id, process)) => {
                self.finish(id, process, status).await;
                true
            }
            None => {
                tracing::debug!(pid, status, "Reaped process is not supervised");
                false
            }
        }
    }

    async fn finish(&self, id: u32, process: Arc<dyn Process>, status: i32) {
        if !process.exited(status).await {
            return;
        }
        let _ = self.exits.send(ProcessExit {
            id,
            pid: process.pid(),
            status: process.status().unwrap_or(status),
        });
    }

    /// Delete process `id` and forget it. Returns its exit status.
    ///
    /// Init can only be deleted once every exec process is gone.
    pub async fn delete(&self, id: u32) -> ShimResult<Option<i32>> {
        let process = self.registry.get(id)?;

        if id == INIT_PROCESS_ID {
            let remaining: Vec<u32> = self
                .registry
                .snapshot()
                .into_iter()
                .map(|(id, _)| id)
                .filter(|id| *id != INIT_PROCESS_ID)
                .collect();
            if !remaining.is_empty() {
                return Err(ShimError::InvalidState(format!(
                    "exec processes {:?} still exist",
                    remaining
                )));
            }
        }

        {
            let _runtime_call = self.runtime_calls.read().await;
            process.delete().await?;
        }
        let status = process.status();
        self.registry.remove(id);
        tracing::debug!(id, ?status, "Process removed");
        Ok(status)
    }

    pub fn list(&self) -> Vec<ProcessInfo> {
        self.registry
            .snapshot()
            .into_iter()
            .map(|(id, process)| ProcessInfo {
                id,
                pid: process.pid(),
                status: process.status(),
            })
            .collect()
    }
}

//! Exec'd process lifecycle.
//!
//! ```text
//! create() ──► running ──exited()──► exiting ──drain+release──► exited ──delete()──► deleted
//! ```
//!
//! `create` only returns once the pid is known, so a caller can never hold
//! a half-built process. `status` stays `None` during the exiting phase: a
//! caller that treats a status as "output is complete" must not see one
//! while the relay is still writing.

use super::{InitProcess, Process};
use crate::io::{
    Console, ConsoleSocket, IoKind, PipeSet, ProcessIo, Relay, RelayStreams, StreamPaths,
};
use crate::runtime::{process_from_request, ExecOpts, PidFileGuard, ProcessSpec};
use async_trait::async_trait;
use execshim_shared::errors::{ShimError, ShimResult};
use execshim_shared::{ExecRequest, WinSize};
use parking_lot::Mutex;
use std::path::Path;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Lifecycle {
    Running,
    /// Status received, relay still draining.
    Exiting(i32),
    Exited(i32),
    Deleted(i32),
}

/// An additional process running inside the container.
pub struct ExecProcess {
    id: u32,
    container_id: String,
    pid: u32,
    terminal: bool,
    relay: Relay,
    io: Mutex<Option<ProcessIo>>,
    lifecycle: Mutex<Lifecycle>,
}

impl ExecProcess {
    /// Launch `req` inside `parent`'s container.
    ///
    /// Uniqueness of `id` among the parent's exec processes is the caller's
    /// responsibility.
    ///
    /// # Errors
    ///
    /// - `Setup`: work directory, output streams, console socket or pipes;
    ///   nothing was launched
    /// - `Runtime`: the runtime exec call failed
    /// - `Console`: the terminal master never arrived
    /// - `Relay`: the process was launched but its I/O could not be wired
    /// - `PidFile`: the pid could not be resolved
    pub async fn create(id: u32, req: &ExecRequest, parent: &InitProcess) -> ShimResult<Self> {
        req.validate()?;

        let work_dir = parent.layout().root();
        std::fs::create_dir_all(work_dir).map_err(|e| {
            ShimError::Setup(format!(
                "Failed to prepare work directory {}: {}",
                work_dir.display(),
                e
            ))
        })?;

        let spec = process_from_request(req)?;
        let streams = StreamPaths::from_request(req).open(req.terminal)?;
        let relay = Relay::new();
        // Removes any stale file now and ours on every path out.
        let pid_file = PidFileGuard::new(parent.layout().pid_file(id));

        tracing::info!(
            exec_id = id,
            container_id = %parent.container_id(),
            terminal = req.terminal,
            program = %req.args[0],
            "Creating exec process"
        );

        let io = if req.terminal {
            spawn_with_console(id, &spec, parent, &relay, streams, pid_file.path()).await?
        } else {
            spawn_with_pipes(&spec, parent, &relay, streams, pid_file.path()).await?
        };

        let pid = parent.runtime().read_pid(pid_file.path()).await?;
        if !parent.remove_pid_files() {
            pid_file.keep();
        }

        tracing::info!(exec_id = id, pid, "Exec process running");

        Ok(Self {
            id,
            container_id: parent.container_id().to_string(),
            pid,
            terminal: req.terminal,
            relay,
            io: Mutex::new(Some(io)),
            lifecycle: Mutex::new(Lifecycle::Running),
        })
    }

    pub fn id(&self) -> u32 {
        self.id
    }

    pub fn container_id(&self) -> &str {
        &self.container_id
    }

    pub fn is_terminal(&self) -> bool {
        self.terminal
    }

    /// Which I/O handle the process holds, `None` once released.
    pub fn io_kind(&self) -> Option<IoKind> {
        self.io.lock().as_ref().map(ProcessIo::kind)
    }

    /// Output directions still being relayed.
    pub fn pending_io(&self) -> usize {
        self.relay.pending()
    }
}

/// Terminal mode: the runtime hands the PTY master over a console socket.
async fn spawn_with_console(
    id: u32,
    spec: &ProcessSpec,
    parent: &InitProcess,
    relay: &Relay,
    streams: RelayStreams,
    pid_file: &Path,
) -> ShimResult<ProcessIo> {
    // Removed on drop, on every path out of this function.
    let socket = ConsoleSocket::bind(parent.layout().console_socket(id))?;

    let opts = ExecOpts {
        pid_file: pid_file.to_path_buf(),
        console_socket: Some(socket.path().to_path_buf()),
        io: None,
        detach: true,
    };
    parent
        .runtime()
        .exec(parent.container_id(), spec, opts)
        .await?;

    let master = socket.receive_master(parent.console_timeout()).await?;
    drop(socket);

    let mut io = ProcessIo::Console(Console::new(master));
    relay.start(&mut io, streams)?;
    Ok(io)
}

/// Pipe mode: the runtime passes our pipes through as the process's stdio.
async fn spawn_with_pipes(
    spec: &ProcessSpec,
    parent: &InitProcess,
    relay: &Relay,
    streams: RelayStreams,
    pid_file: &Path,
) -> ShimResult<ProcessIo> {
    let (pipes, child) = PipeSet::new()?;

    let opts = ExecOpts {
        pid_file: pid_file.to_path_buf(),
        console_socket: None,
        io: Some(child),
        detach: true,
    };
    parent
        .runtime()
        .exec(parent.container_id(), spec, opts)
        .await?;

    let mut io = ProcessIo::Pipes(pipes);
    relay.start(&mut io, streams)?;
    Ok(io)
}

#[async_trait]
impl Process for ExecProcess {
    fn pid(&self) -> u32 {
        self.pid
    }

    fn status(&self) -> Option<i32> {
        match *self.lifecycle.lock() {
            Lifecycle::Exited(status) | Lifecycle::Deleted(status) => Some(status),
            Lifecycle::Running | Lifecycle::Exiting(_) => None,
        }
    }

    async fn exited(&self, status: i32) -> bool {
        {
            let mut lifecycle = self.lifecycle.lock();
            if *lifecycle != Lifecycle::Running {
                tracing::warn!(
                    exec_id = self.id,
                    status,
                    state = ?*lifecycle,
                    "Exec process already exited, ignoring"
                );
                return false;
            }
            *lifecycle = Lifecycle::Exiting(status);
        }

        // Drain before release: no byte may still be in flight once the
        // status becomes visible.
        self.relay.wait().await;

        let io = self.io.lock().take();
        if let Some(io) = io {
            if let Err(e) = io.close() {
                tracing::warn!(exec_id = self.id, error = %e, "Failed to release exec I/O");
            }
        }

        *self.lifecycle.lock() = Lifecycle::Exited(status);
        tracing::info!(exec_id = self.id, pid = self.pid, status, "Exec process exited");
        true
    }

    async fn delete(&self) -> ShimResult<()> {
        let mut lifecycle = self.lifecycle.lock();
        match *lifecycle {
            Lifecycle::Exited(status) => {
                *lifecycle = Lifecycle::Deleted(status);
                tracing::debug!(exec_id = self.id, "Exec process deleted");
                Ok(())
            }
            Lifecycle::Deleted(_) => Ok(()),
            Lifecycle::Running | Lifecycle::Exiting(_) => Err(ShimError::InvalidState(format!(
                "exec process {} has not exited",
                self.id
            ))),
        }
    }

    fn resize(&self, size: WinSize) -> ShimResult<()> {
        let io = self.io.lock();
        match io.as_ref().and_then(ProcessIo::console) {
            Some(console) => console.resize(size),
            None => Ok(()),
        }
    }
}

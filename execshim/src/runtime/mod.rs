//! Runtime control client.
//!
//! The shim never creates namespaced processes itself. It asks an external
//! OCI runtime to `exec` a [`ProcessSpec`] inside a container, then trusts
//! only two things: whether that call succeeded, and what the runtime wrote
//! into the pid file.
//!
//! - [`Runtime`]: the narrow contract consumed by process creation
//! - [`RuncCli`]: drives a runc-compatible binary
//! - [`process_from_request`]: request to spec translation

mod pidfile;
mod runc;
mod spec;

pub use pidfile::{wait_for_pid_file, PidFileGuard, PidFilePolicy};
pub use runc::RuncCli;
pub use spec::{process_from_request, ProcessSpec};

use async_trait::async_trait;
use execshim_shared::errors::ShimResult;
use std::os::unix::io::OwnedFd;
use std::path::{Path, PathBuf};

/// Child-side pipe ends handed to the runtime in pipe mode.
///
/// The runtime passes these through as the exec'd process's stdio and must
/// drop them once the process is launched, so that the shim's ends see EOF
/// when the process exits.
#[derive(Debug)]
pub struct ChildStdio {
    pub stdin: OwnedFd,
    pub stdout: OwnedFd,
    pub stderr: OwnedFd,
}

/// Options for a single runtime exec call.
#[derive(Debug)]
pub struct ExecOpts {
    /// Where the runtime writes the launched process's pid.
    pub pid_file: PathBuf,

    /// Console rendezvous socket (terminal mode).
    pub console_socket: Option<PathBuf>,

    /// Stdio pipe ends (pipe mode).
    pub io: Option<ChildStdio>,

    /// Return once the process is launched rather than when it exits.
    pub detach: bool,
}

/// Container runtime control plane.
#[async_trait]
pub trait Runtime: Send + Sync {
    /// Launch `process` inside the container.
    async fn exec(
        &self,
        container_id: &str,
        process: &ProcessSpec,
        opts: ExecOpts,
    ) -> ShimResult<()>;

    /// Resolve the pid the runtime wrote to `path`.
    async fn read_pid(&self, path: &Path) -> ShimResult<u32>;

    /// Remove the container and everything left running in it.
    async fn delete(&self, container_id: &str) -> ShimResult<()>;
}

//! Process contract shared by every process the shim supervises.
//!
//! - [`InitProcess`]: the container's init, owner of the runtime handle
//! - [`ExecProcess`]: an additional process exec'd into the container
//!
//! The supervisor holds both behind `Arc<dyn Process>` and never needs to
//! know which one it is talking to.

mod exec;
mod init;

pub use exec::ExecProcess;
pub use init::InitProcess;

use async_trait::async_trait;
use execshim_shared::errors::ShimResult;
use execshim_shared::WinSize;

/// Operations the supervisor dispatches without knowing the variant.
#[async_trait]
pub trait Process: Send + Sync {
    /// OS process id. Always resolved: processes are only handed out once
    /// their pid is known.
    fn pid(&self) -> u32;

    /// Exit status, `None` until [`Process::exited`] has completed.
    fn status(&self) -> Option<i32>;

    /// Record termination and release I/O.
    ///
    /// Returns once all output has been relayed, with `true` for the call
    /// that recorded the exit. Calls after the first are ignored and return
    /// `false`.
    async fn exited(&self, status: i32) -> bool;

    /// Release remaining resources. Idempotent.
    async fn delete(&self) -> ShimResult<()>;

    /// Forward a window size change. No-op without a terminal.
    fn resize(&self, size: WinSize) -> ShimResult<()>;
}

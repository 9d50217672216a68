//! Console socket for PTY handling.
//!
//! Implements the OCI console socket mechanism: the runtime connects to a
//! Unix socket we listen on and sends the PTY master file descriptor as an
//! SCM_RIGHTS ancillary message.

use execshim_shared::errors::{ShimError, ShimResult};
use nix::sys::socket::{recvmsg, ControlMessageOwned, MsgFlags, UnixAddr};
use std::io::IoSliceMut;
use std::os::unix::io::{AsRawFd, FromRawFd, OwnedFd, RawFd};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::io::Interest;
use tokio::net::UnixListener;

/// Rendezvous endpoint for receiving a PTY master from the runtime.
///
/// The socket file exists exactly as long as this value does: it is removed
/// on drop, whichever way the exec attempt ends.
pub struct ConsoleSocket {
    listener: UnixListener,
    socket_path: PathBuf,
}

impl ConsoleSocket {
    /// Bind a console socket at `path`.
    ///
    /// Must be called from within a Tokio runtime.
    pub fn bind(path: impl Into<PathBuf>) -> ShimResult<Self> {
        let socket_path = path.into();

        // Remove stale socket if exists
        let _ = std::fs::remove_file(&socket_path);

        let listener = UnixListener::bind(&socket_path).map_err(|e| {
            ShimError::Setup(format!(
                "Failed to create console socket {}: {}",
                socket_path.display(),
                e
            ))
        })?;

        tracing::debug!(socket_path = %socket_path.display(), "Created console socket");

        Ok(Self {
            listener,
            socket_path,
        })
    }

    /// Get socket path for the runtime.
    pub fn path(&self) -> &Path {
        &self.socket_path
    }

    /// Receive PTY master FD from the runtime.
    ///
    /// Waits up to `timeout` for the runtime to connect and send the master.
    pub async fn receive_master(&self, timeout: Duration) -> ShimResult<OwnedFd> {
        tokio::time::timeout(timeout, self.accept_master())
            .await
            .map_err(|_| {
                ShimError::Console(format!(
                    "Timed out after {:?} waiting for PTY master on {}",
                    timeout,
                    self.socket_path.display()
                ))
            })?
    }

    async fn accept_master(&self) -> ShimResult<OwnedFd> {
        tracing::debug!("Waiting for console socket connection");

        let (stream, _) = self
            .listener
            .accept()
            .await
            .map_err(|e| ShimError::Console(format!("Console socket accept failed: {}", e)))?;

        tracing::debug!("Connection accepted, receiving PTY master FD");

        let fd = stream
            .async_io(Interest::READABLE, || recv_master_fd(stream.as_raw_fd()))
            .await
            .map_err(|e| ShimError::Console(format!("Failed to receive PTY master FD: {}", e)))?;

        tracing::debug!(fd = fd.as_raw_fd(), "Received PTY master FD");
        Ok(fd)
    }
}

/// Read one message and pull the first SCM_RIGHTS descriptor out of it.
fn recv_master_fd(socket: RawFd) -> std::io::Result<OwnedFd> {
    let mut buf = [0u8; 1024];
    let mut iov = [IoSliceMut::new(&mut buf)];
    let mut cmsg_space = nix::cmsg_space!([RawFd; 1]);

    let msg = recvmsg::<UnixAddr>(
        socket,
        &mut iov,
        Some(&mut cmsg_space),
        MsgFlags::MSG_CMSG_CLOEXEC,
    )
    .map_err(std::io::Error::from)?;

    for cmsg in msg.cmsgs().into_iter().flatten() {
        if let ControlMessageOwned::ScmRights(fds) = cmsg {
            if let Some(&fd) = fds.first() {
                return Ok(unsafe { OwnedFd::from_raw_fd(fd) });
            }
        }
    }

    Err(std::io::Error::other("No PTY master FD received"))
}

impl Drop for ConsoleSocket {
    fn drop(&mut self) {
        if let Err(e) = std::fs::remove_file(&self.socket_path) {
            tracing::warn!(
                socket_path = %self.socket_path.display(),
                error = %e,
                "Failed to cleanup console socket"
            );
        } else {
            tracing::debug!(socket_path = %self.socket_path.display(), "Cleaned up console socket");
        }
    }
}

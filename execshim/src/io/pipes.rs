//! Stdio pipes for non-terminal exec.

use crate::runtime::ChildStdio;
use execshim_shared::errors::{ShimError, ShimResult};
use nix::fcntl::OFlag;
use nix::unistd::pipe2;
use std::os::unix::io::{IntoRawFd, OwnedFd};

/// Shim-side ends of the three stdio pipes.
///
/// The relay takes the ends it copies; whatever is left is released by
/// [`PipeSet::close`].
#[derive(Debug)]
pub struct PipeSet {
    /// Write end of the process's stdin
    stdin: Option<OwnedFd>,
    /// Read end of the process's stdout
    stdout: Option<OwnedFd>,
    /// Read end of the process's stderr
    stderr: Option<OwnedFd>,
}

impl PipeSet {
    /// Create pipes for I/O.
    ///
    /// All ends are close-on-exec; the runtime's copies are dup'ed onto its
    /// stdio, which clears the flag.
    ///
    /// Returns the shim's ends plus the child's ends, which go to the runtime.
    pub fn new() -> ShimResult<(Self, ChildStdio)> {
        let (stdin_read, stdin_write) = pipe2(OFlag::O_CLOEXEC)
            .map_err(|e| ShimError::Setup(format!("Failed to create stdin pipe: {}", e)))?;
        let (stdout_read, stdout_write) = pipe2(OFlag::O_CLOEXEC)
            .map_err(|e| ShimError::Setup(format!("Failed to create stdout pipe: {}", e)))?;
        let (stderr_read, stderr_write) = pipe2(OFlag::O_CLOEXEC)
            .map_err(|e| ShimError::Setup(format!("Failed to create stderr pipe: {}", e)))?;

        let pipes = Self {
            stdin: Some(stdin_write),
            stdout: Some(stdout_read),
            stderr: Some(stderr_read),
        };
        let child = ChildStdio {
            stdin: stdin_read,
            stdout: stdout_write,
            stderr: stderr_write,
        };

        Ok((pipes, child))
    }

    pub fn take_stdin(&mut self) -> Option<OwnedFd> {
        self.stdin.take()
    }

    pub fn take_stdout(&mut self) -> Option<OwnedFd> {
        self.stdout.take()
    }

    pub fn take_stderr(&mut self) -> Option<OwnedFd> {
        self.stderr.take()
    }

    /// Close every end still held.
    ///
    /// All ends are closed even if one fails; the first failure is returned.
    pub fn close(&mut self) -> ShimResult<()> {
        let mut first_error = None;
        for (name, fd) in [
            ("stdin", self.stdin.take()),
            ("stdout", self.stdout.take()),
            ("stderr", self.stderr.take()),
        ] {
            let Some(fd) = fd else { continue };
            if let Err(e) = nix::unistd::close(fd.into_raw_fd()) {
                first_error.get_or_insert_with(|| {
                    ShimError::Io(format!("Failed to close {} pipe: {}", name, e))
                });
            }
        }

        match first_error {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }
}

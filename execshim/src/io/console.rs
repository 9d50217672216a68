//! PTY master handle.

use execshim_shared::errors::{ShimError, ShimResult};
use execshim_shared::WinSize;
use nix::pty::Winsize;
use std::fs::File;
use std::os::unix::io::{AsRawFd, IntoRawFd, OwnedFd};

/// Terminal master received from the runtime.
///
/// Kept for window size changes; the relay works on duplicated descriptors
/// obtained through [`Console::duplicate`].
#[derive(Debug)]
pub struct Console {
    master: File,
}

impl Console {
    pub fn new(master: OwnedFd) -> Self {
        Self {
            master: File::from(master),
        }
    }

    /// Set PTY terminal window size via ioctl.
    pub fn resize(&self, size: WinSize) -> ShimResult<()> {
        let winsize = Winsize {
            ws_row: size.rows,
            ws_col: size.cols,
            ws_xpixel: size.x_pixels,
            ws_ypixel: size.y_pixels,
        };

        unsafe {
            if nix::libc::ioctl(
                self.master.as_raw_fd(),
                nix::libc::TIOCSWINSZ,
                &winsize as *const _,
            ) == -1
            {
                let errno = std::io::Error::last_os_error();
                return Err(ShimError::Io(format!(
                    "Failed to set PTY window size ({}x{}): {}",
                    size.rows, size.cols, errno
                )));
            }
        }

        Ok(())
    }

    /// Duplicate the master so reads and writes can proceed independently.
    pub fn duplicate(&self) -> ShimResult<File> {
        self.master
            .try_clone()
            .map_err(|e| ShimError::Relay(format!("Failed to dup PTY master: {}", e)))
    }

    /// Close the master, reporting the close error if any.
    pub fn close(self) -> ShimResult<()> {
        nix::unistd::close(self.master.into_raw_fd())
            .map_err(|e| ShimError::Io(format!("Failed to close PTY master: {}", e)))
    }
}

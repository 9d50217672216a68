//! Scratch file layout within the shim's work directory.
//!
//! ```text
//! {work_dir}/
//! ├── {id}.pid               # Pid file written by the runtime
//! └── {id}-pty.sock          # Console rendezvous socket (terminal mode)
//! ```
//!
//! Every name embeds the exec id so scratch files are never shared between
//! two processes.

use crate::constants::files;
use std::path::{Path, PathBuf};

#[derive(Clone, Debug)]
pub struct WorkLayout {
    root: PathBuf,
}

impl WorkLayout {
    /// Create a layout rooted at the given work directory.
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Work directory root.
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Pid file for an exec id: {root}/{id}.pid
    pub fn pid_file(&self, id: u32) -> PathBuf {
        self.root.join(format!("{}.{}", id, files::PID_FILE_EXT))
    }

    /// Console socket for an exec id: {root}/{id}-pty.sock
    pub fn console_socket(&self, id: u32) -> PathBuf {
        self.root.join(format!("{}{}", id, files::CONSOLE_SOCKET_SUFFIX))
    }
}

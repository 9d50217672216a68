//! The container's init process.
//!
//! Its creation belongs to the container lifecycle and happens elsewhere;
//! the shim only needs its pid and the runtime handle its exec children use.

use super::Process;
use crate::config::ShimOptions;
use crate::runtime::Runtime;
use async_trait::async_trait;
use execshim_shared::errors::ShimResult;
use execshim_shared::{WinSize, WorkLayout};
use parking_lot::Mutex;
use std::sync::Arc;
use std::time::Duration;

#[derive(Debug, Default)]
struct InitState {
    status: Option<i32>,
    deleted: bool,
}

/// Init process of a running container.
pub struct InitProcess {
    container_id: String,
    pid: u32,
    runtime: Arc<dyn Runtime>,
    layout: WorkLayout,
    console_timeout: Duration,
    remove_pid_files: bool,
    state: Mutex<InitState>,
}

impl InitProcess {
    /// Wrap an already running container init.
    pub fn new(
        container_id: impl Into<String>,
        pid: u32,
        runtime: Arc<dyn Runtime>,
        options: &ShimOptions,
    ) -> Self {
        Self {
            container_id: container_id.into(),
            pid,
            runtime,
            layout: WorkLayout::new(&options.work_dir),
            console_timeout: options.console_timeout,
            remove_pid_files: options.remove_pid_files,
            state: Mutex::new(InitState::default()),
        }
    }

    pub fn container_id(&self) -> &str {
        &self.container_id
    }

    /// Runtime handle shared by exec children.
    pub fn runtime(&self) -> &dyn Runtime {
        self.runtime.as_ref()
    }

    /// Scratch file layout.
    pub fn layout(&self) -> &WorkLayout {
        &self.layout
    }

    pub fn console_timeout(&self) -> Duration {
        self.console_timeout
    }

    pub fn remove_pid_files(&self) -> bool {
        self.remove_pid_files
    }
}

#[async_trait]
impl Process for InitProcess {
    fn pid(&self) -> u32 {
        self.pid
    }

    fn status(&self) -> Option<i32> {
        self.state.lock().status
    }

    async fn exited(&self, status: i32) -> bool {
        let mut state = self.state.lock();
        if let Some(previous) = state.status {
            tracing::warn!(
                container_id = %self.container_id,
                previous,
                status,
                "Init process already exited, ignoring"
            );
            return false;
        }
        state.status = Some(status);
        tracing::info!(container_id = %self.container_id, pid = self.pid, status, "Init process exited");
        true
    }

    async fn delete(&self) -> ShimResult<()> {
        {
            let mut state = self.state.lock();
            if state.deleted {
                return Ok(());
            }
            state.deleted = true;
        }

        if let Err(e) = self.runtime.delete(&self.container_id).await {
            self.state.lock().deleted = false;
            return Err(e);
        }
        Ok(())
    }

    fn resize(&self, _size: WinSize) -> ShimResult<()> {
        Ok(())
    }
}

//! runc-compatible CLI client.
//!
//! Works with any runtime binary exposing runc's `exec` and `delete`
//! subcommands (runc, crun, youki).

use super::pidfile::{wait_for_pid_file, PidFilePolicy};
use super::{ExecOpts, ProcessSpec, Runtime};
use crate::config::ShimOptions;
use async_trait::async_trait;
use execshim_shared::errors::{ShimError, ShimResult};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use tempfile::NamedTempFile;
use tokio::process::Command;

/// Runtime client invoking an OCI runtime binary.
#[derive(Clone, Debug)]
pub struct RuncCli {
    binary: PathBuf,
    root: Option<PathBuf>,
    work_dir: PathBuf,
    pid_file: PidFilePolicy,
}

impl RuncCli {
    /// Create a client for `binary`, writing scratch files to `work_dir`.
    pub fn new(binary: impl Into<PathBuf>, work_dir: impl Into<PathBuf>) -> Self {
        Self {
            binary: binary.into(),
            root: None,
            work_dir: work_dir.into(),
            pid_file: PidFilePolicy::default(),
        }
    }

    /// Build a client from shim options.
    pub fn from_options(options: &ShimOptions) -> Self {
        Self::new(&options.runtime_binary, &options.work_dir)
            .with_root(options.runtime_root.clone())
            .with_pid_file_policy(options.pid_file_policy())
    }

    /// Set the runtime's state root (`--root`).
    pub fn with_root(mut self, root: Option<PathBuf>) -> Self {
        self.root = root;
        self
    }

    /// Set how long to wait for pid files.
    pub fn with_pid_file_policy(mut self, policy: PidFilePolicy) -> Self {
        self.pid_file = policy;
        self
    }

    fn command(&self) -> Command {
        let mut cmd = Command::new(&self.binary);
        if let Some(root) = &self.root {
            cmd.arg("--root").arg(root);
        }
        cmd
    }

    /// Write the process spec where the runtime can read it.
    ///
    /// The file is removed when the returned handle drops.
    fn write_process_spec(&self, process: &ProcessSpec) -> ShimResult<NamedTempFile> {
        let mut file = NamedTempFile::new_in(&self.work_dir).map_err(|e| {
            ShimError::Setup(format!(
                "Failed to create process spec file in {}: {}",
                self.work_dir.display(),
                e
            ))
        })?;

        serde_json::to_writer(&mut file, process)
            .map_err(|e| ShimError::Setup(format!("Failed to serialize process spec: {}", e)))?;
        file.flush()
            .map_err(|e| ShimError::Setup(format!("Failed to write process spec: {}", e)))?;

        Ok(file)
    }
}

#[async_trait]
impl Runtime for RuncCli {
    async fn exec(
        &self,
        container_id: &str,
        process: &ProcessSpec,
        opts: ExecOpts,
    ) -> ShimResult<()> {
        let spec_file = self.write_process_spec(process)?;

        let mut cmd = self.command();
        cmd.arg("exec");
        if opts.detach {
            cmd.arg("--detach");
        }
        cmd.arg("--pid-file").arg(&opts.pid_file);
        if let Some(socket) = &opts.console_socket {
            cmd.arg("--console-socket").arg(socket);
        }
        cmd.arg("--process").arg(spec_file.path()).arg(container_id);

        // In pipe mode the runtime's stdio becomes the process's stdio, so
        // there is nothing to capture.
        let capture = match opts.io {
            Some(io) => {
                cmd.stdin(Stdio::from(io.stdin))
                    .stdout(Stdio::from(io.stdout))
                    .stderr(Stdio::from(io.stderr));
                false
            }
            None => {
                cmd.stdin(Stdio::null())
                    .stdout(Stdio::null())
                    .stderr(Stdio::piped());
                true
            }
        };

        tracing::debug!(
            runtime = %self.binary.display(),
            container_id = %container_id,
            pid_file = %opts.pid_file.display(),
            "Invoking runtime exec"
        );

        let child = cmd.spawn().map_err(|e| {
            ShimError::Runtime(format!(
                "Failed to start runtime {}: {}",
                self.binary.display(),
                e
            ))
        })?;
        // Close our copies of the child's pipe ends now that it holds them.
        drop(cmd);

        let output = child.wait_with_output().await.map_err(|e| {
            ShimError::Runtime(format!(
                "Failed to wait for runtime {}: {}",
                self.binary.display(),
                e
            ))
        })?;

        if !output.status.success() {
            let stderr = if capture {
                String::from_utf8_lossy(&output.stderr).trim().to_string()
            } else {
                String::new()
            };
            return Err(ShimError::Runtime(format!(
                "{} exec in container {} failed ({}): {}",
                self.binary.display(),
                container_id,
                output.status,
                stderr
            )));
        }

        Ok(())
    }

    async fn read_pid(&self, path: &Path) -> ShimResult<u32> {
        wait_for_pid_file(path, self.pid_file).await
    }

    async fn delete(&self, container_id: &str) -> ShimResult<()> {
        let output = self
            .command()
            .args(["delete", "--force", container_id])
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .output()
            .await
            .map_err(|e| {
                ShimError::Runtime(format!(
                    "Failed to start runtime {}: {}",
                    self.binary.display(),
                    e
                ))
            })?;

        if !output.status.success() {
            return Err(ShimError::Runtime(format!(
                "{} delete {} failed ({}): {}",
                self.binary.display(),
                container_id,
                output.status,
                String::from_utf8_lossy(&output.stderr).trim()
            )));
        }

        tracing::debug!(container_id = %container_id, "Deleted container");
        Ok(())
    }
}

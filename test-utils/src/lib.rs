//! Shared test fixtures for execshim.
//!
//! - [`FakeRuntime`]: in-process runtime that launches plain host processes
//! - [`write_fake_runc`]: shell stand-in for a runc binary
//! - [`assert_trees_equal`]: full tree comparison for copy tests

use std::collections::{BTreeMap, HashMap};
use std::io::IoSlice;
use std::os::fd::{AsRawFd, OwnedFd};
use std::os::unix::fs::{MetadataExt, PermissionsExt};
use std::os::unix::net::UnixStream;
use std::os::unix::process::ExitStatusExt;
use std::path::{Path, PathBuf};
use std::process::{Child, Command, Stdio};
use std::time::Duration;

use async_trait::async_trait;
use execshim::runtime::{wait_for_pid_file, ExecOpts, PidFilePolicy, ProcessSpec, Runtime};
use execshim::ShimOptions;
use execshim_shared::errors::{ShimError, ShimResult};
use nix::fcntl::{fcntl, FcntlArg, FdFlag};
use nix::sys::socket::{sendmsg, ControlMessage, MsgFlags};
use parking_lot::Mutex;

/// Options tuned for tests: short timeouts, scratch files under `work_dir`.
pub fn test_options(work_dir: &Path) -> ShimOptions {
    ShimOptions {
        work_dir: work_dir.to_path_buf(),
        pid_file_timeout: Duration::from_millis(500),
        pid_file_poll_interval: Duration::from_millis(5),
        console_timeout: Duration::from_secs(5),
        ..Default::default()
    }
}

/// One recorded `exec` call.
#[derive(Debug, Clone)]
pub struct ExecCall {
    pub container_id: String,
    pub spec: ProcessSpec,
    pub pid_file: PathBuf,
    pub console_socket: Option<PathBuf>,
    pub had_pipes: bool,
}

/// Runtime that runs `spec.args` as an ordinary host process.
///
/// Terminal requests get a fresh pty whose master is sent over the console
/// socket like runc does; pipe requests get the shim's pipes as stdio.
pub struct FakeRuntime {
    console_delay: Option<Duration>,
    failure: Option<String>,
    write_pid_file: bool,
    pid_file: PidFilePolicy,
    calls: Mutex<Vec<ExecCall>>,
    deleted: Mutex<Vec<String>>,
    children: Mutex<HashMap<u32, Child>>,
}

impl Default for FakeRuntime {
    fn default() -> Self {
        Self::new()
    }
}

impl FakeRuntime {
    pub fn new() -> Self {
        Self {
            console_delay: None,
            failure: None,
            write_pid_file: true,
            pid_file: PidFilePolicy {
                timeout: Duration::from_millis(500),
                poll_interval: Duration::from_millis(5),
                max_poll_interval: Duration::from_millis(50),
            },
            calls: Mutex::new(Vec::new()),
            deleted: Mutex::new(Vec::new()),
            children: Mutex::new(HashMap::new()),
        }
    }

    /// Connect to the console socket only after `delay`, once exec returned.
    pub fn with_console_delay(mut self, delay: Duration) -> Self {
        self.console_delay = Some(delay);
        self
    }

    /// Fail every exec with `message`.
    pub fn failing(mut self, message: impl Into<String>) -> Self {
        self.failure = Some(message.into());
        self
    }

    /// Launch successfully but never write the pid file.
    pub fn without_pid_file(mut self) -> Self {
        self.write_pid_file = false;
        self
    }

    pub fn calls(&self) -> Vec<ExecCall> {
        self.calls.lock().clone()
    }

    pub fn deleted(&self) -> Vec<String> {
        self.deleted.lock().clone()
    }

    /// Wait for a launched process, returning its exit status.
    ///
    /// Signal deaths map to `128 + signo`.
    pub async fn wait(&self, pid: u32) -> i32 {
        let mut child = self
            .children
            .lock()
            .remove(&pid)
            .unwrap_or_else(|| panic!("no child with pid {}", pid));
        let status = tokio::task::spawn_blocking(move || child.wait())
            .await
            .unwrap()
            .unwrap();
        status
            .code()
            .unwrap_or_else(|| 128 + status.signal().unwrap_or(0))
    }

    /// Stop tracking `pid` without killing it, for children a reaper
    /// collects instead of [`FakeRuntime::wait`].
    pub fn forget(&self, pid: u32) {
        self.children.lock().remove(&pid);
    }

    fn command(spec: &ProcessSpec) -> Command {
        let mut cmd = Command::new(&spec.args[0]);
        cmd.args(&spec.args[1..]).current_dir(&spec.cwd);
        for var in &spec.env {
            if let Some((key, value)) = var.split_once('=') {
                cmd.env(key, value);
            }
        }
        cmd
    }

    fn launch(&self, spec: &ProcessSpec, opts: ExecOpts) -> std::io::Result<u32> {
        let child = match (&opts.console_socket, opts.io) {
            (Some(socket), _) => {
                let pty = nix::pty::openpty(None, None)?;
                set_cloexec(&pty.master)?;
                set_cloexec(&pty.slave)?;

                let child = {
                    let mut cmd = Self::command(spec);
                    cmd.stdin(Stdio::from(pty.slave.try_clone()?))
                        .stdout(Stdio::from(pty.slave.try_clone()?))
                        .stderr(Stdio::from(pty.slave));
                    cmd.spawn()?
                };

                let socket = socket.clone();
                let master = pty.master;
                match self.console_delay {
                    Some(delay) => {
                        tokio::spawn(async move {
                            tokio::time::sleep(delay).await;
                            if let Err(e) = send_master(&socket, master) {
                                eprintln!("fake runtime: failed to send master: {}", e);
                            }
                        });
                    }
                    None => send_master(&socket, master)?,
                }
                child
            }
            (None, Some(stdio)) => {
                let mut cmd = Self::command(spec);
                cmd.stdin(Stdio::from(stdio.stdin))
                    .stdout(Stdio::from(stdio.stdout))
                    .stderr(Stdio::from(stdio.stderr));
                cmd.spawn()?
            }
            (None, None) => {
                let mut cmd = Self::command(spec);
                cmd.stdin(Stdio::null())
                    .stdout(Stdio::null())
                    .stderr(Stdio::null());
                cmd.spawn()?
            }
        };

        let pid = child.id();
        self.children.lock().insert(pid, child);
        if self.write_pid_file {
            std::fs::write(&opts.pid_file, pid.to_string())?;
        }
        Ok(pid)
    }
}

impl Drop for FakeRuntime {
    fn drop(&mut self) {
        for (_, mut child) in self.children.lock().drain() {
            let _ = child.kill();
            let _ = child.wait();
        }
    }
}

#[async_trait]
impl Runtime for FakeRuntime {
    async fn exec(
        &self,
        container_id: &str,
        process: &ProcessSpec,
        opts: ExecOpts,
    ) -> ShimResult<()> {
        self.calls.lock().push(ExecCall {
            container_id: container_id.to_string(),
            spec: process.clone(),
            pid_file: opts.pid_file.clone(),
            console_socket: opts.console_socket.clone(),
            had_pipes: opts.io.is_some(),
        });

        if let Some(message) = &self.failure {
            return Err(ShimError::Runtime(message.clone()));
        }

        self.launch(process, opts)
            .map(|_| ())
            .map_err(|e| ShimError::Runtime(format!("fake exec failed: {}", e)))
    }

    async fn read_pid(&self, path: &Path) -> ShimResult<u32> {
        wait_for_pid_file(path, self.pid_file).await
    }

    async fn delete(&self, container_id: &str) -> ShimResult<()> {
        self.deleted.lock().push(container_id.to_string());
        Ok(())
    }
}

fn set_cloexec(fd: &OwnedFd) -> std::io::Result<()> {
    fcntl(fd.as_raw_fd(), FcntlArg::F_SETFD(FdFlag::FD_CLOEXEC))?;
    Ok(())
}

/// Hand a pty master to a console socket the way runc does.
pub fn send_master(socket: &Path, master: OwnedFd) -> std::io::Result<()> {
    let stream = UnixStream::connect(socket)?;
    let fds = [master.as_raw_fd()];
    let iov = [IoSlice::new(b"/dev/ptmx")];
    sendmsg::<()>(
        stream.as_raw_fd(),
        &iov,
        &[ControlMessage::ScmRights(&fds)],
        MsgFlags::empty(),
        None,
    )?;
    Ok(())
}

/// Behaviour of the script written by [`write_fake_runc`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FakeRunc {
    /// Launch `echo hello; echo oops >&2` in the background and write its pid.
    Launch,
    /// Report success without writing a pid file.
    NoPidFile,
    /// Print an error to stderr and exit 1.
    Fail,
}

/// Write an executable runc stand-in into `dir`.
///
/// Every invocation appends its arguments to `dir/calls.log`; exec copies
/// the `--process` file to `dir/process.json`.
pub fn write_fake_runc(dir: &Path, behavior: FakeRunc) -> PathBuf {
    let log = dir.join("calls.log");
    let process_copy = dir.join("process.json");
    let exec_body = match behavior {
        FakeRunc::Launch => {
            "sh -c 'echo hello; echo oops >&2' &\n    echo $! > \"$pid_file\""
        }
        FakeRunc::NoPidFile => ":",
        FakeRunc::Fail => "echo 'container not running' >&2\n    exit 1",
    };
    let script = format!(
        r#"#!/bin/sh
echo "$@" >> '{log}'
pid_file=""
process=""
cmd=""
while [ $# -gt 0 ]; do
  case "$1" in
    --pid-file) pid_file="$2"; shift 2 ;;
    --process) process="$2"; shift 2 ;;
    --console-socket|--root) shift 2 ;;
    exec|delete) cmd="$1"; shift ;;
    *) shift ;;
  esac
done
if [ "$cmd" = "exec" ]; then
    cp "$process" '{process_copy}'
    {exec_body}
fi
exit 0
"#,
        log = log.display(),
        process_copy = process_copy.display(),
        exec_body = exec_body,
    );

    let path = dir.join("fake-runc");
    std::fs::write(&path, script).unwrap();
    std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)).unwrap();
    path
}

#[derive(Debug, PartialEq, Eq)]
enum Node {
    Dir { mode: u32 },
    File { mode: u32, content: Vec<u8> },
    Symlink { target: PathBuf },
}

struct Tree {
    nodes: BTreeMap<PathBuf, Node>,
    /// Relative path to the first path sharing its inode.
    link_groups: BTreeMap<PathBuf, PathBuf>,
}

fn scan(root: &Path) -> Tree {
    let mut nodes = BTreeMap::new();
    let mut link_groups = BTreeMap::new();
    let mut inodes: HashMap<(u64, u64), PathBuf> = HashMap::new();

    for entry in walkdir::WalkDir::new(root).sort_by_file_name() {
        let entry = entry.unwrap();
        let rel = entry.path().strip_prefix(root).unwrap().to_path_buf();
        let meta = entry.metadata().unwrap();
        let mode = meta.mode() & 0o7777;
        let node = if entry.file_type().is_dir() {
            Node::Dir { mode }
        } else if entry.file_type().is_symlink() {
            Node::Symlink {
                target: std::fs::read_link(entry.path()).unwrap(),
            }
        } else if entry.file_type().is_file() {
            let first = inodes
                .entry((meta.dev(), meta.ino()))
                .or_insert_with(|| rel.clone());
            link_groups.insert(rel.clone(), first.clone());
            Node::File {
                mode,
                content: std::fs::read(entry.path()).unwrap(),
            }
        } else {
            continue;
        };
        nodes.insert(rel, node);
    }

    Tree { nodes, link_groups }
}

/// Assert two trees match in structure, content, permission bits and
/// hard-link grouping.
pub fn assert_trees_equal(expected: &Path, actual: &Path) {
    let expected = scan(expected);
    let actual = scan(actual);

    let expected_paths: Vec<_> = expected.nodes.keys().collect();
    let actual_paths: Vec<_> = actual.nodes.keys().collect();
    assert_eq!(expected_paths, actual_paths, "tree paths differ");

    for (path, node) in &expected.nodes {
        assert_eq!(Some(node), actual.nodes.get(path), "{} differs", path.display());
    }
    assert_eq!(expected.link_groups, actual.link_groups, "hard links differ");
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_trees_equal_detects_mode() {
        let tmp = tempfile::tempdir().unwrap();
        let a = tmp.path().join("a");
        let b = tmp.path().join("b");
        for dir in [&a, &b] {
            std::fs::create_dir(dir).unwrap();
            std::fs::write(dir.join("f"), b"x").unwrap();
        }
        assert_trees_equal(&a, &b);

        std::fs::set_permissions(b.join("f"), std::fs::Permissions::from_mode(0o600)).unwrap();
        std::fs::set_permissions(a.join("f"), std::fs::Permissions::from_mode(0o644)).unwrap();
        let result = std::panic::catch_unwind(|| assert_trees_equal(&a, &b));
        assert!(result.is_err());
    }

    #[test]
    fn test_trees_equal_detects_broken_link() {
        let tmp = tempfile::tempdir().unwrap();
        let a = tmp.path().join("a");
        let b = tmp.path().join("b");
        for dir in [&a, &b] {
            std::fs::create_dir(dir).unwrap();
            std::fs::write(dir.join("f"), b"x").unwrap();
        }
        std::fs::hard_link(a.join("f"), a.join("g")).unwrap();
        std::fs::write(b.join("g"), b"x").unwrap();

        let result = std::panic::catch_unwind(|| assert_trees_equal(&a, &b));
        assert!(result.is_err());
    }
}

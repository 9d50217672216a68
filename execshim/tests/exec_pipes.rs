//! Non-terminal exec: pipes, relay draining and lifecycle.

use std::path::Path;
use std::sync::Arc;

use execshim::io::IoKind;
use execshim::{ExecProcess, InitProcess, Process};
use execshim_shared::errors::{Phase, ShimError};
use execshim_shared::{ExecRequest, WinSize};
use execshim_test_utils::{test_options, FakeRuntime};
use tempfile::TempDir;

const CONTAINER: &str = "ctr";

fn init_with(dir: &Path, runtime: Arc<FakeRuntime>) -> InitProcess {
    InitProcess::new(CONTAINER, 1, runtime, &test_options(dir))
}

fn sh(script: &str) -> ExecRequest {
    ExecRequest::new(["/bin/sh", "-c", script])
}

fn path_str(path: &Path) -> String {
    path.to_string_lossy().into_owned()
}

#[tokio::test]
async fn test_true_exits_zero() {
    let tmp = TempDir::new().unwrap();
    let runtime = Arc::new(FakeRuntime::new());
    let init = init_with(tmp.path(), runtime.clone());

    let process = ExecProcess::create(1, &ExecRequest::new(["/bin/true"]), &init)
        .await
        .unwrap();

    assert!(process.pid() > 0);
    assert_eq!(process.io_kind(), Some(IoKind::Pipes));
    assert!(!process.is_terminal());
    assert_eq!(process.status(), None);

    let status = runtime.wait(process.pid()).await;
    process.exited(status).await;

    assert_eq!(process.status(), Some(0));
    assert_eq!(process.io_kind(), None);
    assert_eq!(process.pending_io(), 0);
}

#[tokio::test]
async fn test_output_drained_before_status() {
    let tmp = TempDir::new().unwrap();
    let runtime = Arc::new(FakeRuntime::new());
    let init = init_with(tmp.path(), runtime.clone());

    let stdout = tmp.path().join("stdout");
    let stderr = tmp.path().join("stderr");
    let mut req = sh("i=0; while [ $i -lt 5000 ]; do echo line$i; i=$((i+1)); done; echo oops >&2");
    req.stdout = path_str(&stdout);
    req.stderr = path_str(&stderr);

    let process = ExecProcess::create(1, &req, &init).await.unwrap();
    let status = runtime.wait(process.pid()).await;
    process.exited(status).await;

    assert_eq!(process.status(), Some(0));
    let out = std::fs::read_to_string(&stdout).unwrap();
    assert_eq!(out.lines().count(), 5000);
    assert_eq!(out.lines().last(), Some("line4999"));
    assert_eq!(std::fs::read_to_string(&stderr).unwrap(), "oops\n");
}

#[tokio::test]
async fn test_stdin_forwarded() {
    let tmp = TempDir::new().unwrap();
    let runtime = Arc::new(FakeRuntime::new());
    let init = init_with(tmp.path(), runtime.clone());

    let stdin = tmp.path().join("stdin");
    let stdout = tmp.path().join("stdout");
    std::fs::write(&stdin, "ping\n").unwrap();

    let mut req = ExecRequest::new(["/bin/cat"]);
    req.stdin = path_str(&stdin);
    req.stdout = path_str(&stdout);

    let process = ExecProcess::create(1, &req, &init).await.unwrap();
    let status = runtime.wait(process.pid()).await;
    process.exited(status).await;

    assert_eq!(status, 0);
    assert_eq!(std::fs::read_to_string(&stdout).unwrap(), "ping\n");
}

#[tokio::test]
async fn test_nonzero_status() {
    let tmp = TempDir::new().unwrap();
    let runtime = Arc::new(FakeRuntime::new());
    let init = init_with(tmp.path(), runtime.clone());

    let process = ExecProcess::create(1, &sh("exit 3"), &init).await.unwrap();
    let status = runtime.wait(process.pid()).await;
    process.exited(status).await;

    assert_eq!(process.status(), Some(3));
}

#[tokio::test]
async fn test_second_exited_is_ignored() {
    let tmp = TempDir::new().unwrap();
    let runtime = Arc::new(FakeRuntime::new());
    let init = init_with(tmp.path(), runtime.clone());

    let process = ExecProcess::create(1, &ExecRequest::new(["/bin/true"]), &init)
        .await
        .unwrap();
    let status = runtime.wait(process.pid()).await;
    assert!(process.exited(status).await);
    assert!(!process.exited(5).await);

    assert_eq!(process.status(), Some(0));
}

#[tokio::test]
async fn test_delete_is_idempotent() {
    let tmp = TempDir::new().unwrap();
    let runtime = Arc::new(FakeRuntime::new());
    let init = init_with(tmp.path(), runtime.clone());

    let process = ExecProcess::create(1, &ExecRequest::new(["/bin/true"]), &init)
        .await
        .unwrap();

    let err = process.delete().await.unwrap_err();
    assert!(matches!(err, ShimError::InvalidState(_)));

    let status = runtime.wait(process.pid()).await;
    process.exited(status).await;

    process.delete().await.unwrap();
    process.delete().await.unwrap();
    assert_eq!(process.status(), Some(0));
}

#[tokio::test]
async fn test_resize_without_terminal_is_noop() {
    let tmp = TempDir::new().unwrap();
    let runtime = Arc::new(FakeRuntime::new());
    let init = init_with(tmp.path(), runtime.clone());

    let process = ExecProcess::create(1, &ExecRequest::new(["/bin/true"]), &init)
        .await
        .unwrap();
    process.resize(WinSize::new(50, 200)).unwrap();

    let status = runtime.wait(process.pid()).await;
    process.exited(status).await;
    process.resize(WinSize::new(10, 10)).unwrap();
}

#[tokio::test]
async fn test_request_reaches_runtime() {
    let tmp = TempDir::new().unwrap();
    let runtime = Arc::new(FakeRuntime::new());
    let init = init_with(tmp.path(), runtime.clone());

    let mut req = ExecRequest::new(["/bin/true"]);
    req.env.insert("FOO".to_string(), "bar".to_string());
    req.cwd = "/tmp".to_string();

    let process = ExecProcess::create(4, &req, &init).await.unwrap();

    let calls = runtime.calls();
    assert_eq!(calls.len(), 1);
    let call = &calls[0];
    assert_eq!(call.container_id, CONTAINER);
    assert!(call.had_pipes);
    assert_eq!(call.console_socket, None);
    assert_eq!(call.spec.args, vec!["/bin/true"]);
    assert_eq!(call.spec.env, vec!["FOO=bar"]);
    assert_eq!(call.spec.cwd, "/tmp");
    assert!(call.spec.user.is_none());
    assert!(call.spec.rlimits.is_none());
    assert_eq!(call.pid_file, tmp.path().join("4.pid"));

    // Pid files are scratch: gone once the pid is known.
    assert!(!call.pid_file.exists());

    let status = runtime.wait(process.pid()).await;
    process.exited(status).await;
}

#[tokio::test]
async fn test_empty_args_rejected_before_launch() {
    let tmp = TempDir::new().unwrap();
    let runtime = Arc::new(FakeRuntime::new());
    let init = init_with(tmp.path(), runtime.clone());

    let err = ExecProcess::create(1, &ExecRequest::default(), &init)
        .await
        .err()
        .unwrap();

    assert_eq!(err.phase(), Phase::Setup);
    assert!(runtime.calls().is_empty());
}

#[tokio::test]
async fn test_launch_failure() {
    let tmp = TempDir::new().unwrap();
    let runtime = Arc::new(FakeRuntime::new().failing("container not running"));
    let init = init_with(tmp.path(), runtime.clone());

    let err = ExecProcess::create(1, &ExecRequest::new(["/bin/true"]), &init)
        .await
        .err()
        .unwrap();

    assert!(err.is_launch_failure());
    assert!(err.to_string().contains("container not running"));
}

#[tokio::test]
async fn test_pid_file_never_appears() {
    let tmp = TempDir::new().unwrap();
    let runtime = Arc::new(FakeRuntime::new().without_pid_file());
    let init = init_with(tmp.path(), runtime.clone());

    let err = ExecProcess::create(1, &sh("sleep 5"), &init)
        .await
        .err()
        .unwrap();

    assert!(matches!(err, ShimError::PidFile(_)));
    assert_eq!(err.phase(), Phase::Resolution);
    assert!(!err.is_launch_failure());
}

#[tokio::test]
async fn test_unwritable_stdout_fails_before_launch() {
    let tmp = TempDir::new().unwrap();
    let runtime = Arc::new(FakeRuntime::new());
    let init = init_with(tmp.path(), runtime.clone());

    let mut req = ExecRequest::new(["/bin/true"]);
    req.stdout = path_str(&tmp.path().join("missing").join("stdout"));

    let err = ExecProcess::create(1, &req, &init).await.err().unwrap();

    assert_eq!(err.phase(), Phase::Setup);
    assert!(runtime.calls().is_empty());
    assert!(!init.layout().pid_file(1).exists());
}

#[tokio::test]
async fn test_stale_pid_file_not_trusted() {
    let tmp = TempDir::new().unwrap();
    let runtime = Arc::new(FakeRuntime::new().without_pid_file());
    let init = init_with(tmp.path(), runtime.clone());

    let pid_file = init.layout().pid_file(1);
    std::fs::write(&pid_file, "999999").unwrap();

    let err = ExecProcess::create(1, &sh("sleep 5"), &init)
        .await
        .err()
        .unwrap();

    assert!(matches!(err, ShimError::PidFile(_)));
    assert!(!pid_file.exists());
}

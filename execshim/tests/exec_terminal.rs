//! Terminal exec: console socket rendezvous and PTY relay.

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use execshim::io::IoKind;
use execshim::{ExecProcess, InitProcess, Process, ShimOptions};
use execshim_shared::errors::{Phase, ShimError};
use execshim_shared::{ExecRequest, WinSize};
use execshim_test_utils::{test_options, FakeRuntime};
use tempfile::TempDir;

fn init_with(options: &ShimOptions, runtime: Arc<FakeRuntime>) -> InitProcess {
    InitProcess::new("ctr", 1, runtime, options)
}

fn terminal(script: &str, stdout: &Path) -> ExecRequest {
    let mut req = ExecRequest::new(["/bin/sh", "-c", script]);
    req.terminal = true;
    req.stdout = stdout.to_string_lossy().into_owned();
    req
}

#[tokio::test]
async fn test_terminal_output_relayed() {
    let tmp = TempDir::new().unwrap();
    let runtime = Arc::new(FakeRuntime::new());
    let init = init_with(&test_options(tmp.path()), runtime.clone());
    let stdout = tmp.path().join("stdout");

    let req = terminal("sleep 0.2; echo hello; sleep 0.2", &stdout);
    let process = ExecProcess::create(1, &req, &init).await.unwrap();

    assert!(process.is_terminal());
    assert_eq!(process.io_kind(), Some(IoKind::Console));
    assert!(!init.layout().console_socket(1).exists());

    let status = runtime.wait(process.pid()).await;
    process.exited(status).await;

    assert_eq!(process.status(), Some(0));
    assert_eq!(process.io_kind(), None);
    assert!(std::fs::read_to_string(&stdout).unwrap().contains("hello"));
}

#[tokio::test]
async fn test_slow_master_delivery() {
    let tmp = TempDir::new().unwrap();
    let runtime = Arc::new(FakeRuntime::new().with_console_delay(Duration::from_millis(300)));
    let init = init_with(&test_options(tmp.path()), runtime.clone());
    let stdout = tmp.path().join("stdout");

    let req = terminal("sleep 0.5; echo late", &stdout);
    let process = ExecProcess::create(1, &req, &init).await.unwrap();

    assert_eq!(process.io_kind(), Some(IoKind::Console));
    let socket = runtime.calls()[0].console_socket.clone().unwrap();
    assert_eq!(socket, init.layout().console_socket(1));
    assert!(!socket.exists());

    let status = runtime.wait(process.pid()).await;
    process.exited(status).await;
    assert!(std::fs::read_to_string(&stdout).unwrap().contains("late"));
}

#[tokio::test]
async fn test_resize_terminal() {
    let tmp = TempDir::new().unwrap();
    let runtime = Arc::new(FakeRuntime::new());
    let init = init_with(&test_options(tmp.path()), runtime.clone());
    let stdout = tmp.path().join("stdout");

    let req = terminal("sleep 0.3", &stdout);
    let process = ExecProcess::create(1, &req, &init).await.unwrap();
    process.resize(WinSize::new(40, 120)).unwrap();

    let status = runtime.wait(process.pid()).await;
    process.exited(status).await;

    // Console released: resize has nothing to act on.
    process.resize(WinSize::new(24, 80)).unwrap();
}

#[tokio::test]
async fn test_master_never_delivered() {
    let tmp = TempDir::new().unwrap();
    let options = ShimOptions {
        console_timeout: Duration::from_millis(100),
        ..test_options(tmp.path())
    };
    let runtime = Arc::new(FakeRuntime::new().with_console_delay(Duration::from_secs(2)));
    let init = init_with(&options, runtime.clone());

    let req = terminal("sleep 3", &tmp.path().join("out"));
    let err = ExecProcess::create(1, &req, &init).await.err().unwrap();

    assert!(matches!(err, ShimError::Console(_)));
    assert_eq!(err.phase(), Phase::Resolution);
    assert!(!init.layout().console_socket(1).exists());
}

#[tokio::test]
async fn test_socket_removed_on_launch_failure() {
    let tmp = TempDir::new().unwrap();
    let runtime = Arc::new(FakeRuntime::new().failing("exec failed"));
    let init = init_with(&test_options(tmp.path()), runtime.clone());

    let req = terminal("true", &tmp.path().join("out"));
    let err = ExecProcess::create(7, &req, &init).await.err().unwrap();

    assert!(err.is_launch_failure());
    let socket = runtime.calls()[0].console_socket.clone().unwrap();
    assert!(!socket.exists());
}

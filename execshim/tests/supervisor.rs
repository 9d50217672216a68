//! Supervisor dispatch over real (fake-runtime) exec processes.

use std::sync::Arc;
use std::time::Duration;

use execshim::{InitProcess, ProcessExit, Supervisor};
use execshim_shared::constants::process::INIT_PROCESS_ID;
use execshim_shared::errors::ShimError;
use execshim_shared::{ExecRequest, WinSize};
use execshim_test_utils::{test_options, FakeRuntime};
use nix::sys::signal::Signal;
use tempfile::TempDir;

fn supervisor(tmp: &TempDir, runtime: Arc<FakeRuntime>) -> Arc<Supervisor> {
    let init = InitProcess::new("ctr", 1, runtime, &test_options(tmp.path()));
    Arc::new(Supervisor::new(Arc::new(init)))
}

fn terminal(script: &str) -> ExecRequest {
    let mut req = ExecRequest::new(["/bin/sh", "-c", script]);
    req.terminal = true;
    req
}

#[tokio::test]
async fn test_exec_exit_delete() {
    let tmp = TempDir::new().unwrap();
    let runtime = Arc::new(FakeRuntime::new());
    let sup = supervisor(&tmp, runtime.clone());
    let mut exits = sup.subscribe_exits();

    let pid = sup
        .exec(1, ExecRequest::new(["/bin/sh", "-c", "exit 4"]))
        .await
        .unwrap();
    assert_eq!(sup.pid(1).unwrap(), pid);
    assert_eq!(sup.status(1).unwrap(), None);

    let status = runtime.wait(pid).await;
    assert!(sup.process_exited(pid, status).await);

    assert_eq!(sup.status(1).unwrap(), Some(4));
    assert_eq!(
        exits.recv().await.unwrap(),
        ProcessExit {
            id: 1,
            pid,
            status: 4
        }
    );

    assert_eq!(sup.delete(1).await.unwrap(), Some(4));
    let ids: Vec<u32> = sup.list().iter().map(|info| info.id).collect();
    assert_eq!(ids, vec![INIT_PROCESS_ID]);
}

#[tokio::test]
async fn test_resize_while_creating() {
    let tmp = TempDir::new().unwrap();
    let runtime = Arc::new(FakeRuntime::new().with_console_delay(Duration::from_millis(300)));
    let sup = supervisor(&tmp, runtime.clone());

    let creating = {
        let sup = sup.clone();
        tokio::spawn(async move { sup.exec(2, terminal("sleep 0.5")).await })
    };
    tokio::time::sleep(Duration::from_millis(50)).await;

    assert!(matches!(
        sup.resize(2, WinSize::new(30, 100)),
        Err(ShimError::NotFound(_))
    ));
    assert!(matches!(sup.pid(2), Err(ShimError::NotFound(_))));
    assert!(matches!(
        sup.exec(2, terminal("true")).await,
        Err(ShimError::AlreadyExists(_))
    ));

    let pid = creating.await.unwrap().unwrap();
    sup.resize(2, WinSize::new(30, 100)).unwrap();

    let status = runtime.wait(pid).await;
    sup.exited(2, status).await.unwrap();
    assert_eq!(sup.status(2).unwrap(), Some(0));
}

#[tokio::test]
async fn test_kill() {
    let tmp = TempDir::new().unwrap();
    let runtime = Arc::new(FakeRuntime::new());
    let sup = supervisor(&tmp, runtime.clone());

    let pid = sup
        .exec(3, ExecRequest::new(["/bin/sleep", "30"]))
        .await
        .unwrap();
    sup.kill(3, Signal::SIGKILL).unwrap();

    let status = runtime.wait(pid).await;
    assert_eq!(status, 137);
    assert!(sup.process_exited(pid, status).await);
    assert_eq!(sup.status(3).unwrap(), Some(137));

    assert!(matches!(
        sup.kill(3, Signal::SIGKILL),
        Err(ShimError::InvalidState(_))
    ));
}

#[tokio::test]
async fn test_failed_create_is_not_visible() {
    let tmp = TempDir::new().unwrap();
    let runtime = Arc::new(FakeRuntime::new().without_pid_file());
    let sup = supervisor(&tmp, runtime.clone());

    let err = sup
        .exec(1, ExecRequest::new(["/bin/sleep", "5"]))
        .await
        .unwrap_err();

    assert!(matches!(err, ShimError::PidFile(_)));
    assert!(matches!(sup.pid(1), Err(ShimError::NotFound(_))));
    assert_eq!(sup.list().len(), 1);
}

#[tokio::test]
async fn test_init_deleted_last() {
    let tmp = TempDir::new().unwrap();
    let runtime = Arc::new(FakeRuntime::new());
    let sup = supervisor(&tmp, runtime.clone());

    let pid = sup.exec(1, ExecRequest::new(["/bin/true"])).await.unwrap();

    assert!(matches!(
        sup.delete(INIT_PROCESS_ID).await,
        Err(ShimError::InvalidState(_))
    ));

    let status = runtime.wait(pid).await;
    sup.exited(1, status).await.unwrap();
    sup.delete(1).await.unwrap();

    assert!(sup.process_exited(1, 0).await);
    assert_eq!(sup.delete(INIT_PROCESS_ID).await.unwrap(), Some(0));
    assert_eq!(runtime.deleted(), vec!["ctr".to_string()]);
    assert!(sup.list().is_empty());
}

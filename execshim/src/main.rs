//! Entry point for the execshim binary.

use std::path::PathBuf;
use std::sync::Arc;

use clap::{Parser, Subcommand};
use execshim::reaper;
use execshim::{InitProcess, RuncCli, ShimOptions, Supervisor};
use execshim_shared::errors::{ShimError, ShimResult};
use execshim_shared::ExecRequest;
use nix::sys::signal::Signal;
use tokio::sync::broadcast::error::RecvError;
use tokio::sync::oneshot;
use tracing::info;

/// Id the one-shot `run` command execs under.
const RUN_EXEC_ID: u32 = 1;

/// Exec processes into running containers
#[derive(Parser, Debug)]
#[command(author, version, about = "execshim - per-container process shim")]
struct ShimArgs {
    /// JSON options file; flags below override it
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Scratch directory for pid files and console sockets
    #[arg(long, global = true)]
    work_dir: Option<PathBuf>,

    /// OCI runtime binary
    #[arg(long, global = true)]
    runtime: Option<PathBuf>,

    /// Runtime state root
    #[arg(long, global = true)]
    runtime_root: Option<PathBuf>,

    /// Log filter used when RUST_LOG is not set
    #[arg(long, global = true, default_value = "error")]
    log_level: String,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Exec one process into a container and wait for it
    ///
    /// Exits with the process's exit status.
    Run {
        /// Container to exec into
        #[arg(long)]
        container_id: String,

        /// Pid of the container's init process
        #[arg(long)]
        init_pid: u32,

        /// JSON exec request
        #[arg(long)]
        request: PathBuf,
    },

    /// Copy a directory tree, preserving links and permissions
    CopyDir {
        /// Source directory
        src: PathBuf,

        /// Destination directory
        dst: PathBuf,
    },
}

impl ShimArgs {
    fn options(&self) -> ShimResult<ShimOptions> {
        let mut options = match &self.config {
            Some(path) => ShimOptions::from_file(path)?,
            None => ShimOptions::default(),
        };
        if let Some(work_dir) = &self.work_dir {
            options.work_dir = work_dir.clone();
        }
        if let Some(runtime) = &self.runtime {
            options.runtime_binary = runtime.clone();
        }
        if let Some(root) = &self.runtime_root {
            options.runtime_root = Some(root.clone());
        }
        options.validate()?;
        Ok(options)
    }
}

#[tokio::main]
async fn main() -> ShimResult<()> {
    std::panic::set_hook(Box::new(|panic_info| {
        eprintln!("[PANIC] execshim panicked: {}", panic_info);
        std::process::exit(1);
    }));

    let args = ShimArgs::parse();

    if let Err(e) = tracing_subscriber::fmt()
        .with_target(true)
        .with_writer(std::io::stderr)
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(&args.log_level)),
        )
        .try_init()
    {
        eprintln!("[ERROR] Failed to initialize tracing: {}", e);
    }

    let options = args.options()?;

    match args.command {
        Command::Run {
            container_id,
            init_pid,
            request,
        } => {
            let status = run(container_id, init_pid, &request, options).await?;
            std::process::exit(status);
        }
        Command::CopyDir { src, dst } => {
            let stats = execshim::fs::copy_dir(&dst, &src)?;
            info!(?stats, "Copy complete");
            Ok(())
        }
    }
}

async fn run(
    container_id: String,
    init_pid: u32,
    request: &std::path::Path,
    options: ShimOptions,
) -> ShimResult<i32> {
    let req: ExecRequest = serde_json::from_slice(&std::fs::read(request).map_err(|e| {
        ShimError::Config(format!(
            "Failed to read request {}: {}",
            request.display(),
            e
        ))
    })?)?;

    reaper::set_subreaper()?;

    let runtime = Arc::new(RuncCli::from_options(&options));
    let init = InitProcess::new(container_id, init_pid, runtime, &options);
    let supervisor = Arc::new(Supervisor::new(Arc::new(init)));

    let mut exits = supervisor.subscribe_exits();
    let (stop_reaper, stopped) = oneshot::channel::<()>();
    let reaper = tokio::spawn(reaper::run(supervisor.clone(), async move {
        let _ = stopped.await;
    }));

    let pid = supervisor.exec(RUN_EXEC_ID, req).await?;
    info!(pid, "Process started");

    let status = loop {
        tokio::select! {
            exit = exits.recv() => match exit {
                Ok(exit) if exit.id == RUN_EXEC_ID => break exit.status,
                Ok(_) | Err(RecvError::Lagged(_)) => continue,
                Err(e) => {
                    return Err(ShimError::Internal(format!("Exit channel closed: {}", e)));
                }
            },
            _ = tokio::signal::ctrl_c() => {
                info!("Interrupted, forwarding SIGTERM");
                if let Err(e) = supervisor.kill(RUN_EXEC_ID, Signal::SIGTERM) {
                    tracing::warn!(error = %e, "Failed to forward SIGTERM");
                }
            }
        }
    };

    supervisor.delete(RUN_EXEC_ID).await?;
    let _ = stop_reaper.send(());
    match reaper.await {
        Ok(result) => result?,
        Err(e) => tracing::warn!(error = %e, "Reaper task failed"),
    }

    info!(status, "Process exited");
    Ok(status)
}

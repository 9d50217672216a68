//! Per-container process shim.
//!
//! Execs additional processes into a running container through an OCI
//! runtime, relays their terminal or pipe I/O, tracks their pids and
//! reports their exits.

#[cfg(not(target_os = "linux"))]
compile_error!("execshim is Linux-only; build with a Linux target");

pub mod config;
pub mod fs;
pub mod io;
pub mod process;
pub mod reaper;
pub mod runtime;
pub mod service;

pub use config::ShimOptions;
pub use process::{ExecProcess, InitProcess, Process};
pub use runtime::{RuncCli, Runtime};
pub use service::{ProcessExit, ProcessInfo, Supervisor};

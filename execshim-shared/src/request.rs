//! Inbound exec request and terminal geometry.
//!
//! `ExecRequest` is what a transport hands the shim for every additional
//! process. Optional sections (`user`, `rlimits`, `capabilities`) stay absent
//! when the caller did not send them; they are never filled with zero values.

use crate::errors::{ShimError, ShimResult};
use oci_spec::runtime::{Capability, PosixRlimitType};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Request to start an additional process inside a running container.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct ExecRequest {
    /// Allocate a pseudo-terminal instead of pipes.
    #[serde(default)]
    pub terminal: bool,

    /// Path the shim reads stdin bytes from (empty = no stdin).
    #[serde(default)]
    pub stdin: String,

    /// Path the shim writes stdout bytes to (empty = discarded).
    #[serde(default)]
    pub stdout: String,

    /// Path the shim writes stderr bytes to (empty = discarded).
    ///
    /// Ignored in terminal mode, where output is combined on stdout.
    #[serde(default)]
    pub stderr: String,

    /// Program and arguments.
    pub args: Vec<String>,

    /// Environment variables.
    #[serde(default)]
    pub env: BTreeMap<String, String>,

    /// Working directory inside the container.
    #[serde(default)]
    pub cwd: String,

    #[serde(default)]
    pub user: Option<User>,

    #[serde(default)]
    pub rlimits: Vec<Rlimit>,

    #[serde(default)]
    pub capabilities: Option<Vec<Capability>>,

    #[serde(default)]
    pub no_new_privileges: bool,

    #[serde(default)]
    pub apparmor_profile: String,

    #[serde(default)]
    pub selinux_label: String,
}

impl ExecRequest {
    /// Create a request running `args` with every optional section absent.
    pub fn new<I, S>(args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            args: args.into_iter().map(Into::into).collect(),
            ..Default::default()
        }
    }

    /// Reject requests the runtime could never launch.
    pub fn validate(&self) -> ShimResult<()> {
        match self.args.first() {
            None => Err(ShimError::Setup("exec request has no args".to_string())),
            Some(program) if program.is_empty() => {
                Err(ShimError::Setup("exec request has an empty program".to_string()))
            }
            Some(_) => Ok(()),
        }
    }
}

/// Identity the process runs as.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct User {
    pub uid: u32,
    pub gid: u32,
    #[serde(default)]
    pub additional_gids: Vec<u32>,
}

/// A single resource limit.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Rlimit {
    #[serde(rename = "type")]
    pub typ: PosixRlimitType,
    pub soft: u64,
    pub hard: u64,
}

/// Terminal window size
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct WinSize {
    pub rows: u16,
    pub cols: u16,
    #[serde(default)]
    pub x_pixels: u16,
    #[serde(default)]
    pub y_pixels: u16,
}

impl WinSize {
    pub fn new(rows: u16, cols: u16) -> Self {
        Self {
            rows,
            cols,
            ..Default::default()
        }
    }
}

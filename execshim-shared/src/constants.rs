//! Shared constants
//!
//! These constants must be identical for the shim and the components that
//! feed it requests.

/// Process table constants
pub mod process {
    /// Id under which the init process is registered.
    pub const INIT_PROCESS_ID: u32 = 0;

    /// Exit status recorded for a process killed by signal `n` is `128 + n`.
    pub const SIGNAL_EXIT_BASE: i32 = 128;
}

/// Scratch file naming within the work directory
pub mod files {
    /// Pid file suffix: `{id}.pid`
    pub const PID_FILE_EXT: &str = "pid";

    /// Console socket suffix: `{id}-pty.sock`
    pub const CONSOLE_SOCKET_SUFFIX: &str = "-pty.sock";
}

/// Default timings
pub mod timeouts {
    /// How long to wait for the runtime to write the pid file.
    pub const PID_FILE_TIMEOUT_MS: u64 = 5_000;

    /// First poll interval while waiting for the pid file.
    pub const PID_FILE_POLL_MS: u64 = 20;

    /// Upper bound for the pid file poll interval.
    pub const PID_FILE_POLL_MAX_MS: u64 = 250;

    /// How long to wait for the runtime to deliver the terminal master.
    pub const CONSOLE_TIMEOUT_MS: u64 = 10_000;
}

/// Runtime CLI defaults
pub mod runtime {
    /// Runtime binary used when none is configured.
    pub const DEFAULT_BINARY: &str = "runc";
}

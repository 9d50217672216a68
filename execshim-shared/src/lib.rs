//! ExecShim Shared - types common to the shim and its callers
//!
//! This crate contains the error taxonomy, the inbound exec request,
//! the scratch-file layout and constants used on both sides of the
//! request boundary.

pub mod constants;
pub mod errors;
pub mod layout;
pub mod request;

pub use errors::{ShimError, ShimResult};
pub use layout::WorkLayout;
pub use request::{ExecRequest, Rlimit, User, WinSize};

//! Filesystem helpers.

mod copy;

pub use copy::{copy_dir, CopyStats};

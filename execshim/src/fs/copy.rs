//! Directory tree copy.
//!
//! The source tree is walked once to build a plan, then regular file
//! contents are copied in parallel. Hard links, symlinks and directory
//! modes are applied afterwards, so a read-only directory never blocks the
//! creation of its own children.

use std::collections::HashMap;
use std::os::unix::fs::{symlink, MetadataExt, PermissionsExt};
use std::path::{Path, PathBuf};

use execshim_shared::errors::{ShimError, ShimResult};
use filetime::FileTime;
use rayon::prelude::*;
use walkdir::WalkDir;

/// Mode used for directories while they are being populated.
const STAGING_DIR_MODE: u32 = 0o700;

/// What a copy did.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct CopyStats {
    pub dirs: usize,
    pub files: usize,
    pub hardlinks: usize,
    pub symlinks: usize,
    pub skipped: usize,
    pub bytes: u64,
}

struct DirEntryPlan {
    dst: PathBuf,
    mode: u32,
    atime: FileTime,
    mtime: FileTime,
}

struct FilePlan {
    src: PathBuf,
    dst: PathBuf,
    atime: FileTime,
    mtime: FileTime,
}

struct LinkPlan {
    original: PathBuf,
    dst: PathBuf,
}

struct SymlinkPlan {
    target: PathBuf,
    dst: PathBuf,
    atime: FileTime,
    mtime: FileTime,
}

#[derive(Default)]
struct Plan {
    dirs: Vec<DirEntryPlan>,
    files: Vec<FilePlan>,
    links: Vec<LinkPlan>,
    symlinks: Vec<SymlinkPlan>,
    skipped: usize,
}

/// Copy the tree rooted at `src` into `dst`.
///
/// Reproduces directories, regular files, hard links (files sharing an
/// inode in `src` share one in `dst`) and symlinks (target copied
/// verbatim), with permission bits and modification times. Sockets, FIFOs
/// and device nodes are skipped.
pub fn copy_dir(dst: &Path, src: &Path) -> ShimResult<CopyStats> {
    let meta = std::fs::metadata(src).map_err(|e| storage_err("stat", src, e))?;
    if !meta.is_dir() {
        return Err(ShimError::Storage(format!(
            "Source is not a directory: {}",
            src.display()
        )));
    }

    tracing::info!(src = %src.display(), dst = %dst.display(), "Copying directory tree");
    let start = std::time::Instant::now();

    std::fs::create_dir_all(dst).map_err(|e| storage_err("create directory", dst, e))?;
    let plan = build_plan(dst, src)?;

    let bytes = plan
        .files
        .par_iter()
        .map(copy_file)
        .collect::<ShimResult<Vec<u64>>>()?
        .into_iter()
        .sum();

    for link in &plan.links {
        std::fs::hard_link(&link.original, &link.dst)
            .map_err(|e| storage_err("hard link", &link.dst, e))?;
    }

    for link in &plan.symlinks {
        symlink(&link.target, &link.dst).map_err(|e| storage_err("symlink", &link.dst, e))?;
        filetime::set_symlink_file_times(&link.dst, link.atime, link.mtime)
            .map_err(|e| storage_err("set times on", &link.dst, e))?;
    }

    // Deepest first: setting a child's times must not disturb its parent.
    for dir in plan.dirs.iter().rev() {
        std::fs::set_permissions(&dir.dst, std::fs::Permissions::from_mode(dir.mode))
            .map_err(|e| storage_err("chmod", &dir.dst, e))?;
        filetime::set_file_times(&dir.dst, dir.atime, dir.mtime)
            .map_err(|e| storage_err("set times on", &dir.dst, e))?;
    }

    let stats = CopyStats {
        dirs: plan.dirs.len(),
        files: plan.files.len(),
        hardlinks: plan.links.len(),
        symlinks: plan.symlinks.len(),
        skipped: plan.skipped,
        bytes,
    };

    tracing::info!(
        files = stats.files,
        dirs = stats.dirs,
        hardlinks = stats.hardlinks,
        symlinks = stats.symlinks,
        bytes = stats.bytes,
        "Copied directory tree in {:.2}s",
        start.elapsed().as_secs_f64()
    );
    Ok(stats)
}

/// Walk `src`, creating the destination directories on the way.
fn build_plan(dst: &Path, src: &Path) -> ShimResult<Plan> {
    let mut plan = Plan::default();
    // (dev, ino) of multiply-linked files to their first destination path.
    let mut inodes: HashMap<(u64, u64), PathBuf> = HashMap::new();

    for entry in WalkDir::new(src).follow_links(false).sort_by_file_name() {
        let entry = entry
            .map_err(|e| ShimError::Storage(format!("Failed to walk {}: {}", src.display(), e)))?;
        let rel = entry.path().strip_prefix(src).map_err(|e| {
            ShimError::Internal(format!("Walked outside {}: {}", src.display(), e))
        })?;
        let target = dst.join(rel);
        let meta = entry.metadata().map_err(|e| {
            ShimError::Storage(format!(
                "Failed to stat {}: {}",
                entry.path().display(),
                e
            ))
        })?;
        let atime = FileTime::from_last_access_time(&meta);
        let mtime = FileTime::from_last_modification_time(&meta);
        let file_type = entry.file_type();

        if file_type.is_dir() {
            if entry.depth() > 0 {
                std::fs::create_dir(&target)
                    .map_err(|e| storage_err("create directory", &target, e))?;
            }
            std::fs::set_permissions(&target, std::fs::Permissions::from_mode(STAGING_DIR_MODE))
                .map_err(|e| storage_err("chmod", &target, e))?;
            plan.dirs.push(DirEntryPlan {
                dst: target,
                mode: meta.mode() & 0o7777,
                atime,
                mtime,
            });
        } else if file_type.is_symlink() {
            let link_target = std::fs::read_link(entry.path())
                .map_err(|e| storage_err("read symlink", entry.path(), e))?;
            plan.symlinks.push(SymlinkPlan {
                target: link_target,
                dst: target,
                atime,
                mtime,
            });
        } else if file_type.is_file() {
            if meta.nlink() > 1 {
                if let Some(original) = inodes.get(&(meta.dev(), meta.ino())) {
                    plan.links.push(LinkPlan {
                        original: original.clone(),
                        dst: target,
                    });
                    continue;
                }
                inodes.insert((meta.dev(), meta.ino()), target.clone());
            }
            plan.files.push(FilePlan {
                src: entry.path().to_path_buf(),
                dst: target,
                atime,
                mtime,
            });
        } else {
            tracing::debug!(path = %entry.path().display(), "Skipping special file");
            plan.skipped += 1;
        }
    }

    Ok(plan)
}

fn copy_file(file: &FilePlan) -> ShimResult<u64> {
    let bytes = std::fs::copy(&file.src, &file.dst).map_err(|e| {
        ShimError::Storage(format!(
            "Failed to copy file {} -> {}: {}",
            file.src.display(),
            file.dst.display(),
            e
        ))
    })?;
    filetime::set_file_times(&file.dst, file.atime, file.mtime)
        .map_err(|e| storage_err("set times on", &file.dst, e))?;
    Ok(bytes)
}

fn storage_err(action: &str, path: &Path, e: std::io::Error) -> ShimError {
    ShimError::Storage(format!("Failed to {} {}: {}", action, path.display(), e))
}

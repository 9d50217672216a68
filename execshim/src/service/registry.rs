//! Process registry.
//!
//! Maps ids to processes. An id is reserved while its process is being
//! created, so a second request for the same id is rejected and lookups
//! answer `NotFound` until creation has finished.

use crate::process::Process;
use execshim_shared::errors::{ShimError, ShimResult};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;

#[derive(Clone)]
enum Entry {
    Creating,
    Ready(Arc<dyn Process>),
}

/// Registry of supervised processes.
#[derive(Clone, Default)]
pub(crate) struct ProcessRegistry {
    entries: Arc<Mutex<HashMap<u32, Entry>>>,
}

impl ProcessRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Reserve `id` for a process about to be created.
    ///
    /// The reservation is dropped again unless committed.
    pub fn reserve(&self, id: u32) -> ShimResult<Reservation<'_>> {
        let mut entries = self.entries.lock();
        if entries.contains_key(&id) {
            return Err(ShimError::AlreadyExists(format!("process {}", id)));
        }
        entries.insert(id, Entry::Creating);
        Ok(Reservation {
            registry: self,
            id,
            committed: false,
        })
    }

    /// Register a process that needs no creation step.
    pub fn insert(&self, id: u32, process: Arc<dyn Process>) -> ShimResult<()> {
        let mut entries = self.entries.lock();
        if entries.contains_key(&id) {
            return Err(ShimError::AlreadyExists(format!("process {}", id)));
        }
        entries.insert(id, Entry::Ready(process));
        Ok(())
    }

    /// Get a fully created process.
    pub fn get(&self, id: u32) -> ShimResult<Arc<dyn Process>> {
        match self.entries.lock().get(&id) {
            Some(Entry::Ready(process)) => Ok(process.clone()),
            Some(Entry::Creating) => {
                Err(ShimError::NotFound(format!("process {} is still being created", id)))
            }
            None => Err(ShimError::NotFound(format!("process {}", id))),
        }
    }

    pub fn remove(&self, id: u32) -> Option<Arc<dyn Process>> {
        match self.entries.lock().remove(&id) {
            Some(Entry::Ready(process)) => Some(process),
            _ => None,
        }
    }

    /// All created processes, sorted by id.
    pub fn snapshot(&self) -> Vec<(u32, Arc<dyn Process>)> {
        let mut processes: Vec<_> = self
            .entries
            .lock()
            .iter()
            .filter_map(|(id, entry)| match entry {
                Entry::Ready(process) => Some((*id, process.clone())),
                Entry::Creating => None,
            })
            .collect();
        processes.sort_by_key(|(id, _)| *id);
        processes
    }

    /// Find the process with OS pid `pid` that has not exited yet.
    pub fn find_running(&self, pid: u32) -> Option<(u32, Arc<dyn Process>)> {
        self.snapshot()
            .into_iter()
            .find(|(_, process)| process.pid() == pid && process.status().is_none())
    }
}

/// Pending id reservation; released on drop unless committed.
pub(crate) struct Reservation<'a> {
    registry: &'a ProcessRegistry,
    id: u32,
    committed: bool,
}

impl Reservation<'_> {
    pub fn commit(mut self, process: Arc<dyn Process>) {
        self.registry
            .entries
            .lock()
            .insert(self.id, Entry::Ready(process));
        self.committed = true;
    }
}

impl Drop for Reservation<'_> {
    fn drop(&mut self) {
        if self.committed {
            return;
        }
        let mut entries = self.registry.entries.lock();
        if matches!(entries.get(&self.id), Some(Entry::Creating)) {
            entries.remove(&self.id);
        }
    }
}

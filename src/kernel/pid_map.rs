//! Handle map
//!
//! Pairs handles issued by the outside world with simulated process ids.
//! Entries are appended when a process is registered and never removed, so
//! a retired handle still resolves to its old pid.

use crate::sys::Pid;
use crate::{KernelError, KernelResult};

/// Handle issued by the caller for a unit of external work
pub type ExternalHandle = u32;

/// Append-only handle to pid map
#[derive(Debug, Clone)]
pub struct PidMap {
    entries: Vec<(ExternalHandle, Pid)>,
    capacity: usize,
}

impl PidMap {
    /// Create empty map holding at most `capacity` entries
    pub fn new(capacity: usize) -> Self {
        Self { entries: Vec::new(), capacity }
    }

    /// Append a pairing
    pub fn insert(&mut self, handle: ExternalHandle, pid: Pid) -> KernelResult<()> {
        self.ensure_room()?;
        self.entries.push((handle, pid));
        Ok(())
    }

    /// Fail if another entry would not fit
    pub fn ensure_room(&self) -> KernelResult<()> {
        if self.entries.len() >= self.capacity {
            return Err(KernelError::CapacityExceeded { resource: "PID map", capacity: self.capacity });
        }
        Ok(())
    }

    /// Pid registered for `handle`
    ///
    /// Scans newest first so a reused handle resolves to its latest process.
    pub fn lookup(&self, handle: ExternalHandle) -> Option<Pid> {
        self.entries
            .iter()
            .rev()
            .find(|(h, _)| *h == handle)
            .map(|&(_, pid)| pid)
    }

    /// Handle registered for `pid`
    pub fn handle_of(&self, pid: Pid) -> Option<ExternalHandle> {
        self.entries
            .iter()
            .rev()
            .find(|(_, p)| *p == pid)
            .map(|&(handle, _)| handle)
    }

    /// All entries in insertion order
    pub fn entries(&self) -> &[(ExternalHandle, Pid)] {
        &self.entries
    }

    /// Number of entries
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Check if empty
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

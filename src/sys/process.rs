//! Process Management
//!
//! A simulated process is a record in the process arena, addressed by a
//! monotonically increasing [`Pid`]. Queues hold pids, never records, so a
//! record can be torn down while its id is still referenced elsewhere.

use crate::{KernelError, KernelResult};
use parking_lot::Mutex;
use std::collections::BTreeMap;
use tokio::time::Instant;

/// Process ID type
pub type Pid = u32;

/// Process lifecycle state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ProcessState {
    /// Being created
    New,
    /// Queued for dispatch
    Ready,
    /// Owns the virtual core
    Running,
    /// Blocked on I/O
    Waiting,
    /// Consumed its time limit
    Terminated,
}

impl std::fmt::Display for ProcessState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            ProcessState::New => "NEW",
            ProcessState::Ready => "READY",
            ProcessState::Running => "RUNNING",
            ProcessState::Waiting => "WAITING",
            ProcessState::Terminated => "TERMINATED",
        };
        f.pad(s)
    }
}

/// Process control block
#[derive(Debug, Clone)]
pub struct Pcb {
    /// Process ID
    pub pid: Pid,
    /// Lifecycle state
    pub state: ProcessState,
    /// Static priority (lower runs first)
    pub priority: u32,
    /// Total ticks of work
    pub time_limit: u32,
    /// Ticks consumed so far
    pub ticks_used: u32,
    /// When the outstanding I/O request was issued
    pub io_since: Option<Instant>,
    /// Parent process (not used by scheduling)
    pub parent: Option<Pid>,
    /// Child processes (not used by scheduling)
    pub children: Vec<Pid>,
}

impl Pcb {
    /// Create new process record in the NEW state
    pub fn new(pid: Pid, priority: u32, time_limit: u32) -> Self {
        Self {
            pid,
            state: ProcessState::New,
            priority,
            time_limit,
            ticks_used: 0,
            io_since: None,
            parent: None,
            children: Vec::new(),
        }
    }

    /// Check for an outstanding I/O request
    pub fn io_requested(&self) -> bool {
        self.io_since.is_some()
    }

    /// Ticks left before the time limit
    pub fn remaining(&self) -> u32 {
        self.time_limit.saturating_sub(self.ticks_used)
    }

    /// Check if the time limit has been reached
    pub fn is_exhausted(&self) -> bool {
        self.ticks_used >= self.time_limit
    }

    /// Dispatch order key: priority, then time limit
    pub fn dispatch_key(&self) -> (u32, u32) {
        (self.priority, self.time_limit)
    }

    /// Add child process
    pub fn add_child(&mut self, pid: Pid) {
        if !self.children.contains(&pid) {
            self.children.push(pid);
        }
    }

    /// Snapshot of the record for display
    pub fn view(&self) -> PcbView {
        PcbView {
            pid: self.pid,
            state: self.state,
            priority: self.priority,
            ticks_used: self.ticks_used,
            time_limit: self.time_limit,
            io_requested: self.io_requested(),
            children: self.children.len(),
        }
    }
}

/// Read-only copy of a process record
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PcbView {
    pub pid: Pid,
    pub state: ProcessState,
    pub priority: u32,
    pub ticks_used: u32,
    pub time_limit: u32,
    pub io_requested: bool,
    pub children: usize,
}

/// Process arena
///
/// Owns every live process record. Terminated records are removed.
pub struct ProcessTable {
    inner: Mutex<TableInner>,
    capacity: usize,
}

struct TableInner {
    records: BTreeMap<Pid, Pcb>,
    next_pid: Pid,
}

impl ProcessTable {
    /// Create empty table
    pub fn new(capacity: usize) -> Self {
        Self {
            inner: Mutex::new(TableInner { records: BTreeMap::new(), next_pid: 1 }),
            capacity,
        }
    }

    /// Allocate a pid and insert a NEW record
    pub fn create(&self, priority: u32, time_limit: u32) -> KernelResult<Pid> {
        let mut inner = self.inner.lock();

        if inner.records.len() >= self.capacity {
            return Err(KernelError::CapacityExceeded {
                resource: "process table",
                capacity: self.capacity,
            });
        }

        let pid = inner.next_pid;
        inner.next_pid += 1;
        inner.records.insert(pid, Pcb::new(pid, priority, time_limit));

        Ok(pid)
    }

    /// Run `f` against a record
    pub fn with<R>(&self, pid: Pid, f: impl FnOnce(&mut Pcb) -> R) -> Option<R> {
        self.inner.lock().records.get_mut(&pid).map(f)
    }

    /// Copy of a record
    pub fn get(&self, pid: Pid) -> Option<PcbView> {
        self.inner.lock().records.get(&pid).map(Pcb::view)
    }

    /// Remove a record
    pub fn remove(&self, pid: Pid) -> Option<Pcb> {
        self.inner.lock().records.remove(&pid)
    }

    /// Copies of the given records, in order
    pub fn views(&self, pids: &[Pid]) -> Vec<PcbView> {
        let inner = self.inner.lock();
        pids.iter()
            .filter_map(|pid| inner.records.get(pid).map(Pcb::view))
            .collect()
    }

    /// Record currently marked running
    pub fn running(&self) -> Option<PcbView> {
        self.inner.lock()
            .records
            .values()
            .find(|p| p.state == ProcessState::Running)
            .map(Pcb::view)
    }

    /// Number of live records
    pub fn len(&self) -> usize {
        self.inner.lock().records.len()
    }

    /// Check if empty
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub(crate) fn lock_records(&self) -> parking_lot::MappedMutexGuard<'_, BTreeMap<Pid, Pcb>> {
        parking_lot::MutexGuard::map(self.inner.lock(), |inner| &mut inner.records)
    }
}

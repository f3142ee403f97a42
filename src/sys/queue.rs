//! Synchronized process queue
//!
//! Ordered pids behind one lock. The same type backs the ready and the
//! waiting queue. Lock order is queue before process table, never the
//! reverse.

use super::process::{Pcb, Pid, ProcessTable};
use parking_lot::Mutex;
use std::collections::VecDeque;
use tracing::trace;

/// Mutex-protected FIFO of pids with policy-based removal
pub struct ProcessQueue {
    /// Queue name for logs
    name: &'static str,
    /// Pids in insertion order
    pids: Mutex<VecDeque<Pid>>,
}

impl ProcessQueue {
    /// Create empty queue
    pub fn new(name: &'static str) -> Self {
        Self { name, pids: Mutex::new(VecDeque::new()) }
    }

    /// Append at the tail
    pub fn enqueue(&self, pid: Pid) {
        let mut pids = self.pids.lock();
        pids.push_back(pid);
        trace!(queue = self.name, pid, depth = pids.len(), "Enqueued");
    }

    /// Remove the record with the lowest (priority, time limit)
    ///
    /// Earlier entries win ties. Pids with no record in `table` are dropped
    /// from the queue as they are found.
    pub fn dequeue_by_policy(&self, table: &ProcessTable) -> Option<Pid> {
        let mut pids = self.pids.lock();
        let records = table.lock_records();

        pids.retain(|pid| records.contains_key(pid));

        let best = pids
            .iter()
            .enumerate()
            .filter_map(|(idx, pid)| records.get(pid).map(|p| (idx, Pcb::dispatch_key(p))))
            .min_by_key(|&(idx, key)| (key, idx))
            .map(|(idx, _)| idx)?;

        pids.remove(best)
    }

    /// Unlink every pid matching `pred`, preserving the order of the rest
    ///
    /// `pred` runs with both the queue and the table locked; `then` runs for
    /// each removed pid while the queue lock is still held.
    pub fn drain_where(
        &self,
        table: &ProcessTable,
        mut pred: impl FnMut(&mut Pcb) -> bool,
        mut then: impl FnMut(Pid),
    ) -> usize {
        let mut pids = self.pids.lock();
        let mut removed = Vec::new();

        {
            let mut records = table.lock_records();
            pids.retain(|pid| match records.get_mut(pid) {
                Some(pcb) => {
                    if pred(pcb) {
                        removed.push(*pid);
                        false
                    } else {
                        true
                    }
                }
                None => false,
            });
        }

        for pid in &removed {
            trace!(queue = self.name, pid = *pid, "Drained");
            then(*pid);
        }
        removed.len()
    }

    /// Remove a specific pid
    pub fn remove(&self, pid: Pid) -> bool {
        let mut pids = self.pids.lock();
        match pids.iter().position(|&p| p == pid) {
            Some(idx) => {
                pids.remove(idx);
                true
            }
            None => false,
        }
    }

    /// Pids in queue order
    pub fn pids(&self) -> Vec<Pid> {
        self.pids.lock().iter().copied().collect()
    }

    /// Current depth
    pub fn len(&self) -> usize {
        self.pids.lock().len()
    }

    /// Check if empty
    pub fn is_empty(&self) -> bool {
        self.pids.lock().is_empty()
    }
}

impl std::fmt::Debug for ProcessQueue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProcessQueue")
            .field("name", &self.name)
            .field("pids", &self.pids())
            .finish()
    }
}

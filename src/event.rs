//! Kernel events
//!
//! Structured notifications broadcast to subscribers. Logs carry the same
//! information as text; events exist so callers can observe kinds and order.

use crate::kernel::ExternalHandle;
use crate::mm::{AccessMode, FaultKind};
use crate::sys::Pid;

/// Events broadcast by the kernel and its actors
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum KernelEvent {
    /// Simulated process created and queued as ready
    Created {
        pid: Pid,
        handle: Option<ExternalHandle>,
        priority: u32,
        time_limit: u32,
    },
    /// Process selected and marked running
    Dispatched { pid: Pid },
    /// Quantum expired, process re-queued
    Preempted { pid: Pid, ticks_used: u32 },
    /// Running process blocked on I/O
    IoRequested { pid: Pid },
    /// I/O finished, process back in the ready queue
    IoCompleted { pid: Pid },
    /// Process consumed its time limit
    Terminated { pid: Pid },
    /// Ready queue empty, scheduler idling
    Idle,
    /// Translation served from the TLB
    TlbHit { pid: Pid, page: usize, frame: usize },
    /// Translation missed the TLB
    TlbMiss { pid: Pid, page: usize },
    /// Translation required a page-table fill
    PageFault { pid: Pid, page: usize, kind: FaultKind },
    /// Frame taken from its previous owner
    FrameEvicted { frame: usize, pid: Pid, page: usize },
    /// Access mode not permitted for the page
    AccessViolation { pid: Pid, page: usize, mode: AccessMode },
    /// Process frames returned to the pool
    Released { pid: Pid, frames: usize },
    /// Queue depths changed since the last sample
    QueueDepth { ready: usize, waiting: usize },
}

/// Fieldless discriminant of [`KernelEvent`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventKind {
    Created,
    Dispatched,
    Preempted,
    IoRequested,
    IoCompleted,
    Terminated,
    Idle,
    TlbHit,
    TlbMiss,
    PageFault,
    FrameEvicted,
    AccessViolation,
    Released,
    QueueDepth,
}

impl KernelEvent {
    /// Event kind
    pub fn kind(&self) -> EventKind {
        match self {
            KernelEvent::Created { .. } => EventKind::Created,
            KernelEvent::Dispatched { .. } => EventKind::Dispatched,
            KernelEvent::Preempted { .. } => EventKind::Preempted,
            KernelEvent::IoRequested { .. } => EventKind::IoRequested,
            KernelEvent::IoCompleted { .. } => EventKind::IoCompleted,
            KernelEvent::Terminated { .. } => EventKind::Terminated,
            KernelEvent::Idle => EventKind::Idle,
            KernelEvent::TlbHit { .. } => EventKind::TlbHit,
            KernelEvent::TlbMiss { .. } => EventKind::TlbMiss,
            KernelEvent::PageFault { .. } => EventKind::PageFault,
            KernelEvent::FrameEvicted { .. } => EventKind::FrameEvicted,
            KernelEvent::AccessViolation { .. } => EventKind::AccessViolation,
            KernelEvent::Released { .. } => EventKind::Released,
            KernelEvent::QueueDepth { .. } => EventKind::QueueDepth,
        }
    }

    /// Process the event is about, if any
    pub fn pid(&self) -> Option<Pid> {
        match *self {
            KernelEvent::Created { pid, .. }
            | KernelEvent::Dispatched { pid }
            | KernelEvent::Preempted { pid, .. }
            | KernelEvent::IoRequested { pid }
            | KernelEvent::IoCompleted { pid }
            | KernelEvent::Terminated { pid }
            | KernelEvent::TlbHit { pid, .. }
            | KernelEvent::TlbMiss { pid, .. }
            | KernelEvent::PageFault { pid, .. }
            | KernelEvent::FrameEvicted { pid, .. }
            | KernelEvent::AccessViolation { pid, .. }
            | KernelEvent::Released { pid, .. } => Some(pid),
            KernelEvent::Idle | KernelEvent::QueueDepth { .. } => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_event_kind() {
        assert_eq!(KernelEvent::Idle.kind(), EventKind::Idle);
        assert_eq!(KernelEvent::Dispatched { pid: 1 }.kind(), EventKind::Dispatched);
        let fault = KernelEvent::PageFault { pid: 1, page: 2, kind: FaultKind::Hard };
        assert_eq!(fault.kind(), EventKind::PageFault);
    }

    #[test]
    fn test_event_pid() {
        assert_eq!(KernelEvent::Terminated { pid: 7 }.pid(), Some(7));
        assert_eq!(KernelEvent::QueueDepth { ready: 1, waiting: 0 }.pid(), None);
    }
}

//! Memory Management Subsystem
//!
//! Paged virtual memory for simulated processes:
//! - Fixed frame pool with global FIFO eviction
//! - One flat page table per process, associated by pid
//! - Translation cache in front of the page tables
//!
//! # Translation
//!
//! ```text
//! address ──► (page, offset) ──► TLB ──hit──────────────────────► frame
//!                                 │
//!                                miss
//!                                 ▼
//!                          page table entry
//!                          valid ─► soft fault: re-cache ─────────► frame
//!                          invalid ─► hard fault: disk read,
//!                                     allocate (maybe evict),
//!                                     map + cache ────────────────► frame
//! ```
//!
//! Permissions are checked before any fault handling, so a refused access
//! never allocates a frame or touches the TLB contents.

pub mod frame;
pub mod page;
pub mod tlb;

use crate::event::KernelEvent;
use crate::sys::Pid;
use crate::{KernelConfig, KernelError, KernelResult};
use std::collections::BTreeMap;
use tokio::sync::broadcast;
use tracing::{debug, info, warn};

pub use frame::{Frame, FrameOwner, FramePool};
pub use page::{PageFlags, PageTable, PageTableEntry};
pub use tlb::{Tlb, TlbEntry, TlbStats};

/// Requested access
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AccessMode {
    Read,
    Write,
}

impl std::fmt::Display for AccessMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            AccessMode::Read => write!(f, "r"),
            AccessMode::Write => write!(f, "w"),
        }
    }
}

impl std::str::FromStr for AccessMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "r" | "read" => Ok(AccessMode::Read),
            "w" | "write" => Ok(AccessMode::Write),
            _ => Err(format!("Unknown access mode: {}", s)),
        }
    }
}

/// Page fault classification
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FaultKind {
    /// Page was not mapped; needs a disk read and a frame
    Hard,
    /// Page was mapped but not cached
    Soft,
}

impl std::fmt::Display for FaultKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            FaultKind::Hard => write!(f, "Hard"),
            FaultKind::Soft => write!(f, "Soft"),
        }
    }
}

/// Result of the TLB stage
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Lookup {
    /// Cached translation
    Hit(usize),
    /// Not cached; page table decides the fault kind
    Miss(FaultKind),
}

/// First half of a translation, taken under the VM lock
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Inspection {
    /// TLB outcome
    pub lookup: Lookup,
    /// Page permissions allow the access
    pub permitted: bool,
}

impl Inspection {
    /// Check if completing this inspection requires the simulated disk read
    pub fn needs_disk(&self) -> bool {
        self.permitted && self.lookup == Lookup::Miss(FaultKind::Hard)
    }
}

/// Outcome of the permission check
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AccessOutcome {
    /// Access allowed
    Granted,
    /// Mode not permitted for the page
    Violation,
}

/// Address translation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Translation {
    /// Process
    pub pid: Pid,
    /// Virtual page
    pub page: usize,
    /// Backing frame (absent when a violation stopped an unmapped access)
    pub frame: Option<usize>,
    /// Served from the TLB
    pub tlb_hit: bool,
    /// Fault taken on the way
    pub fault: Option<FaultKind>,
}

/// Result of a memory access request
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MemoryAccess {
    /// Translation details
    pub translation: Translation,
    /// Requested mode
    pub mode: AccessMode,
    /// Offset within the page
    pub offset: u64,
    /// Permission outcome
    pub outcome: AccessOutcome,
}

impl MemoryAccess {
    /// Check if the access was allowed
    pub fn is_granted(&self) -> bool {
        self.outcome == AccessOutcome::Granted
    }
}

/// Memory state for display
#[derive(Debug, Clone)]
pub struct MemorySnapshot {
    /// Every frame
    pub frames: Vec<Frame>,
    /// Eviction ring, oldest first
    pub ring: Vec<usize>,
    /// Valid TLB entries with their slots
    pub tlb: Vec<(usize, TlbEntry)>,
    /// TLB statistics
    pub tlb_stats: TlbStats,
}

impl MemorySnapshot {
    /// Number of occupied frames
    pub fn occupied(&self) -> usize {
        self.frames.iter().filter(|f| f.occupied).count()
    }
}

/// Virtual memory manager
pub struct VirtualMemory {
    /// Frame pool and eviction ring
    frames: FramePool,
    /// Page tables by pid
    spaces: BTreeMap<Pid, PageTable>,
    /// Translation cache
    tlb: Tlb,
    /// Pages per address space
    pages_per_process: usize,
    /// Bytes per page
    page_size: u64,
    /// Maximum live address spaces
    max_spaces: usize,
    /// Event sink
    events: Option<broadcast::Sender<KernelEvent>>,
}

impl VirtualMemory {
    /// Create manager sized from configuration
    pub fn new(config: &KernelConfig) -> Self {
        Self {
            frames: FramePool::new(config.frame_count),
            spaces: BTreeMap::new(),
            tlb: Tlb::new(config.tlb_capacity),
            pages_per_process: config.pages_per_process,
            page_size: config.page_size,
            max_spaces: config.max_processes,
            events: None,
        }
    }

    /// Broadcast VM events on `events`
    pub fn with_events(mut self, events: broadcast::Sender<KernelEvent>) -> Self {
        self.events = Some(events);
        self
    }

    fn emit(&self, event: KernelEvent) {
        if let Some(tx) = &self.events {
            let _ = tx.send(event);
        }
    }

    // ========================================================================
    // Address spaces
    // ========================================================================

    /// Allocate a fresh page table for `pid`
    pub fn create_address_space(&mut self, pid: Pid) -> KernelResult<()> {
        if self.spaces.contains_key(&pid) {
            return Ok(());
        }
        if self.spaces.len() >= self.max_spaces {
            return Err(KernelError::CapacityExceeded {
                resource: "address space table",
                capacity: self.max_spaces,
            });
        }

        self.spaces.insert(pid, PageTable::new(self.pages_per_process));
        debug!(pid, pages = self.pages_per_process, "Created address space");
        Ok(())
    }

    /// Release frames and drop the page table of `pid`
    pub fn destroy_address_space(&mut self, pid: Pid) -> KernelResult<usize> {
        let freed = self.release(pid)?;
        self.spaces.remove(&pid);
        Ok(freed)
    }

    /// Check if `pid` has a page table
    pub fn has_address_space(&self, pid: Pid) -> bool {
        self.spaces.contains_key(&pid)
    }

    /// Page table of `pid`
    pub fn page_table(&self, pid: Pid) -> Option<&PageTable> {
        self.spaces.get(&pid)
    }

    /// Number of live address spaces
    pub fn address_spaces(&self) -> usize {
        self.spaces.len()
    }

    /// Set read/write permission of one page
    pub fn set_permissions(&mut self, pid: Pid, page: usize, read: bool, write: bool) -> KernelResult<()> {
        let pages = self.pages_per_process;
        let page_size = self.page_size;
        let entry = self.spaces
            .get_mut(&pid)
            .ok_or(KernelError::UnknownProcess(pid))?
            .entry_mut(page)
            .ok_or(KernelError::InvalidAddress { address: page as u64 * page_size, page, pages })?;

        entry.set_permission(PageFlags::READ, read);
        entry.set_permission(PageFlags::WRITE, write);
        Ok(())
    }

    // ========================================================================
    // Frames
    // ========================================================================

    /// Get a frame, evicting the oldest allocation when the pool is full
    ///
    /// Eviction invalidates the victim's mapping in every page table and
    /// drops every TLB entry pointing at it before the frame is reused.
    pub fn allocate_frame(&mut self) -> KernelResult<usize> {
        if let Some(frame) = self.frames.take_free() {
            return Ok(frame);
        }

        let victim = self.frames.next_victim()?;
        let previous = self.frames.owner(victim);

        for (&pid, table) in self.spaces.iter_mut() {
            for page in table.unmap_frame(victim) {
                info!(frame = victim, pid, page, "Evicting frame");
                if let Some(tx) = &self.events {
                    let _ = tx.send(KernelEvent::FrameEvicted { frame: victim, pid, page });
                }
            }
        }
        self.tlb.invalidate_frame(victim);
        self.frames.disown(victim);

        if previous.is_none() {
            warn!(frame = victim, "Evicted frame had no recorded owner");
        }
        Ok(victim)
    }

    /// Frame pool
    pub fn frames(&self) -> &FramePool {
        &self.frames
    }

    /// Translation cache
    pub fn tlb(&self) -> &Tlb {
        &self.tlb
    }

    // ========================================================================
    // Translation
    // ========================================================================

    /// Split a virtual address into (page, offset)
    pub fn split(&self, address: u64) -> KernelResult<(usize, u64)> {
        let page = (address / self.page_size) as usize;
        if page >= self.pages_per_process {
            return Err(KernelError::InvalidAddress { address, page, pages: self.pages_per_process });
        }
        Ok((page, address % self.page_size))
    }

    /// Permission check, then TLB lookup
    ///
    /// A refused access only peeks at the TLB.
    pub fn inspect(&mut self, pid: Pid, page: usize, mode: AccessMode) -> KernelResult<Inspection> {
        let entry = *self.entry(pid, page)?;
        let miss = if entry.is_valid() { FaultKind::Soft } else { FaultKind::Hard };

        let permitted = match mode {
            AccessMode::Read => entry.can_read(),
            AccessMode::Write => entry.can_write(),
        };
        if !permitted {
            let lookup = self.tlb.peek(pid, page).map_or(Lookup::Miss(miss), Lookup::Hit);
            return Ok(Inspection { lookup, permitted });
        }

        let lookup = match self.tlb.lookup(pid, page) {
            Some(frame) => {
                debug!(pid, page, frame, "TLB hit");
                self.emit(KernelEvent::TlbHit { pid, page, frame });
                Lookup::Hit(frame)
            }
            None => {
                debug!(pid, page, "TLB miss");
                self.emit(KernelEvent::TlbMiss { pid, page });
                Lookup::Miss(miss)
            }
        };

        Ok(Inspection { lookup, permitted })
    }

    /// Finish a translation started by [`inspect`](Self::inspect)
    pub fn complete(&mut self, pid: Pid, page: usize, mode: AccessMode, inspection: Inspection) -> KernelResult<Translation> {
        let entry = *self.entry(pid, page)?;

        if !inspection.permitted {
            warn!(pid, page, %mode, "Access violation");
            self.emit(KernelEvent::AccessViolation { pid, page, mode });
            let frame = match inspection.lookup {
                Lookup::Hit(frame) => Some(frame),
                Lookup::Miss(_) => entry.frame(),
            };
            let tlb_hit = matches!(inspection.lookup, Lookup::Hit(_));
            return Ok(Translation { pid, page, frame, tlb_hit, fault: None });
        }

        if let Lookup::Hit(frame) = inspection.lookup {
            return Ok(Translation { pid, page, frame: Some(frame), tlb_hit: true, fault: None });
        }

        // The mapping may have appeared while the disk read was pending
        let (frame, kind) = match entry.frame() {
            Some(frame) => (frame, FaultKind::Soft),
            None => (self.fault_in(pid, page)?, FaultKind::Hard),
        };
        self.tlb.insert(pid, page, frame);

        info!(pid, page, frame, kind = %kind, "Page fault");
        self.emit(KernelEvent::PageFault { pid, page, kind });

        Ok(Translation { pid, page, frame: Some(frame), tlb_hit: false, fault: Some(kind) })
    }

    /// Translate without the simulated disk delay
    pub fn resolve(&mut self, pid: Pid, page: usize, mode: AccessMode) -> KernelResult<MemoryAccess> {
        let inspection = self.inspect(pid, page, mode)?;
        let translation = self.complete(pid, page, mode, inspection)?;
        Ok(MemoryAccess {
            translation,
            mode,
            offset: 0,
            outcome: if inspection.permitted { AccessOutcome::Granted } else { AccessOutcome::Violation },
        })
    }

    /// Map `page` of `pid` to a newly allocated frame
    fn fault_in(&mut self, pid: Pid, page: usize) -> KernelResult<usize> {
        let frame = self.allocate_frame()?;

        let pages = self.pages_per_process;
        let page_size = self.page_size;
        let entry = self.spaces
            .get_mut(&pid)
            .ok_or(KernelError::UnknownProcess(pid))?
            .entry_mut(page)
            .ok_or(KernelError::InvalidAddress { address: page as u64 * page_size, page, pages })?;
        entry.map(frame);
        self.frames.assign(frame, pid, page);

        Ok(frame)
    }

    fn entry(&self, pid: Pid, page: usize) -> KernelResult<&PageTableEntry> {
        self.spaces
            .get(&pid)
            .ok_or(KernelError::UnknownProcess(pid))?
            .entry(page)
            .ok_or(KernelError::InvalidAddress {
                address: page as u64 * self.page_size,
                page,
                pages: self.pages_per_process,
            })
    }

    // ========================================================================
    // Teardown
    // ========================================================================

    /// Free every frame mapped by `pid`; the page table itself survives
    pub fn release(&mut self, pid: Pid) -> KernelResult<usize> {
        let table = self.spaces.get_mut(&pid).ok_or(KernelError::UnknownProcess(pid))?;

        let mapped = table.unmap_all();
        for &(_, frame) in &mapped {
            self.frames.free(frame);
        }
        self.tlb.invalidate_pid(pid);

        info!(pid, frames = mapped.len(), "Released frames");
        self.emit(KernelEvent::Released { pid, frames: mapped.len() });
        Ok(mapped.len())
    }

    /// Copy of frame, ring and TLB state
    pub fn snapshot(&self) -> MemorySnapshot {
        MemorySnapshot {
            frames: self.frames.frames().to_vec(),
            ring: self.frames.ring(),
            tlb: self.tlb.entries(),
            tlb_stats: self.tlb.stats(),
        }
    }
}

impl std::fmt::Debug for VirtualMemory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("VirtualMemory")
            .field("address_spaces", &self.spaces.len())
            .field("occupied", &self.frames.occupied())
            .field("capacity", &self.frames.capacity())
            .field("tlb", &self.tlb.stats())
            .finish()
    }
}

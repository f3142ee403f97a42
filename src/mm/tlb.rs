//! Translation Cache
//!
//! Fixed-size cache of (process, page) -> frame translations in front of
//! the page tables.
//!
//! Replacement takes the first empty slot, otherwise the entry with the
//! lowest use-counter (earliest slot on ties). Counters only grow while an
//! entry lives, so this behaves like least-frequently-used rather than
//! least-recently-used: an entry that was hot long ago keeps its slot.

use crate::sys::Pid;

/// TLB entry
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TlbEntry {
    /// Process the translation belongs to
    pub pid: Pid,
    /// Virtual page number
    pub page: usize,
    /// Physical frame number
    pub frame: usize,
    /// Slot holds a translation
    pub valid: bool,
    /// Hits since insertion, starting at 1
    pub use_counter: u64,
}

impl TlbEntry {
    const EMPTY: Self = Self { pid: 0, page: 0, frame: 0, valid: false, use_counter: 0 };

    fn matches(&self, pid: Pid, page: usize) -> bool {
        self.valid && self.pid == pid && self.page == page
    }
}

/// TLB statistics
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TlbStats {
    /// Lookups served from the cache
    pub hits: u64,
    /// Lookups that fell through to the page table
    pub misses: u64,
    /// Valid entries overwritten by an insertion
    pub replacements: u64,
    /// Entries dropped because their frame or process went away
    pub invalidations: u64,
}

impl TlbStats {
    /// Calculate hit ratio
    pub fn hit_ratio(&self) -> f64 {
        let total = self.hits + self.misses;
        if total == 0 {
            0.0
        } else {
            self.hits as f64 / total as f64
        }
    }
}

/// Translation lookaside buffer
#[derive(Debug)]
pub struct Tlb {
    /// Slots
    entries: Vec<TlbEntry>,
    /// Statistics
    stats: TlbStats,
}

impl Tlb {
    /// Create empty TLB with `capacity` slots
    pub fn new(capacity: usize) -> Self {
        Self {
            entries: vec![TlbEntry::EMPTY; capacity],
            stats: TlbStats::default(),
        }
    }

    /// Look up a translation, bumping its use-counter on a hit
    pub fn lookup(&mut self, pid: Pid, page: usize) -> Option<usize> {
        match self.entries.iter_mut().find(|e| e.matches(pid, page)) {
            Some(entry) => {
                entry.use_counter += 1;
                self.stats.hits += 1;
                Some(entry.frame)
            }
            None => {
                self.stats.misses += 1;
                None
            }
        }
    }

    /// Frame cached for (pid, page), leaving counters and statistics alone
    pub fn peek(&self, pid: Pid, page: usize) -> Option<usize> {
        self.entries.iter().find(|e| e.matches(pid, page)).map(|e| e.frame)
    }

    /// Cache a translation; returns the slot used
    ///
    /// An existing entry for (pid, page) is refreshed in place.
    pub fn insert(&mut self, pid: Pid, page: usize, frame: usize) -> Option<usize> {
        if let Some(slot) = self.entries.iter().position(|e| e.matches(pid, page)) {
            self.entries[slot].frame = frame;
            return Some(slot);
        }

        let slot = self.entries.iter().position(|e| !e.valid).or_else(|| {
            self.entries
                .iter()
                .enumerate()
                .min_by_key(|&(idx, e)| (e.use_counter, idx))
                .map(|(idx, _)| idx)
        })?;

        if self.entries[slot].valid {
            self.stats.replacements += 1;
        }
        self.entries[slot] = TlbEntry { pid, page, frame, valid: true, use_counter: 1 };
        Some(slot)
    }

    /// Drop every translation to `frame`
    pub fn invalidate_frame(&mut self, frame: usize) -> usize {
        self.invalidate_where(|e| e.frame == frame)
    }

    /// Drop every translation of `pid`
    pub fn invalidate_pid(&mut self, pid: Pid) -> usize {
        self.invalidate_where(|e| e.pid == pid)
    }

    fn invalidate_where(&mut self, pred: impl Fn(&TlbEntry) -> bool) -> usize {
        let mut count = 0;
        for entry in self.entries.iter_mut().filter(|e| e.valid && pred(&**e)) {
            *entry = TlbEntry::EMPTY;
            count += 1;
        }
        self.stats.invalidations += count as u64;
        count
    }

    /// Valid entries with their slot numbers
    pub fn entries(&self) -> Vec<(usize, TlbEntry)> {
        self.entries
            .iter()
            .enumerate()
            .filter(|(_, e)| e.valid)
            .map(|(idx, e)| (idx, *e))
            .collect()
    }

    /// Number of slots
    pub fn capacity(&self) -> usize {
        self.entries.len()
    }

    /// Get statistics
    pub fn stats(&self) -> TlbStats {
        self.stats
    }
}

//! Page Table Management
//!
//! One flat page table per simulated process. Entries start unmapped with
//! read and write permitted.

use bitflags::bitflags;

bitflags! {
    /// Page table entry flags
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct PageFlags: u8 {
        /// Mapping is present
        const VALID = 1 << 0;
        /// Page has been written to
        const MODIFIED = 1 << 1;
        /// Reads permitted
        const READ = 1 << 2;
        /// Writes permitted
        const WRITE = 1 << 3;
    }
}

impl PageFlags {
    /// Flags of a fresh entry
    pub const DEFAULT: Self = Self::READ.union(Self::WRITE);
}

/// Page table entry
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PageTableEntry {
    /// Assigned frame, if any
    frame: Option<usize>,
    /// Entry flags
    flags: PageFlags,
}

impl Default for PageTableEntry {
    fn default() -> Self {
        Self { frame: None, flags: PageFlags::DEFAULT }
    }
}

impl PageTableEntry {
    /// Check if entry maps a frame
    pub fn is_valid(&self) -> bool {
        self.flags.contains(PageFlags::VALID)
    }

    /// Mapped frame (only while valid)
    pub fn frame(&self) -> Option<usize> {
        if self.is_valid() { self.frame } else { None }
    }

    /// Get flags
    pub fn flags(&self) -> PageFlags {
        self.flags
    }

    /// Check if reads are permitted
    pub fn can_read(&self) -> bool {
        self.flags.contains(PageFlags::READ)
    }

    /// Check if writes are permitted
    pub fn can_write(&self) -> bool {
        self.flags.contains(PageFlags::WRITE)
    }

    /// Install a mapping
    pub fn map(&mut self, frame: usize) {
        self.frame = Some(frame);
        self.flags.insert(PageFlags::VALID);
    }

    /// Drop the mapping, keeping permissions
    pub fn invalidate(&mut self) {
        self.frame = None;
        self.flags.remove(PageFlags::VALID);
    }

    /// Set or clear a permission bit
    pub fn set_permission(&mut self, flag: PageFlags, allowed: bool) {
        self.flags.set(flag & (PageFlags::READ | PageFlags::WRITE), allowed);
    }
}

/// Per-process page table
#[derive(Debug, Clone)]
pub struct PageTable {
    entries: Vec<PageTableEntry>,
}

impl PageTable {
    /// Create table with `pages` unmapped entries
    pub fn new(pages: usize) -> Self {
        Self { entries: vec![PageTableEntry::default(); pages] }
    }

    /// Number of pages
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Check if table has no pages
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Get entry
    pub fn entry(&self, page: usize) -> Option<&PageTableEntry> {
        self.entries.get(page)
    }

    /// Get mutable entry
    pub fn entry_mut(&mut self, page: usize) -> Option<&mut PageTableEntry> {
        self.entries.get_mut(page)
    }

    /// Invalidate every entry mapped to `frame`; returns the affected pages
    pub fn unmap_frame(&mut self, frame: usize) -> Vec<usize> {
        let mut pages = Vec::new();
        for (page, entry) in self.entries.iter_mut().enumerate() {
            if entry.frame() == Some(frame) {
                entry.invalidate();
                pages.push(page);
            }
        }
        pages
    }

    /// Invalidate every valid entry; returns (page, frame) pairs
    pub fn unmap_all(&mut self) -> Vec<(usize, usize)> {
        let mut mapped = Vec::new();
        for (page, entry) in self.entries.iter_mut().enumerate() {
            if let Some(frame) = entry.frame() {
                entry.invalidate();
                mapped.push((page, frame));
            }
        }
        mapped
    }

    /// Number of valid entries
    pub fn mapped_count(&self) -> usize {
        self.entries.iter().filter(|e| e.is_valid()).count()
    }
}

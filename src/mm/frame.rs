//! Physical Frame Pool
//!
//! Fixed pool of frames plus a global FIFO ring of allocation order used to
//! pick eviction victims across all processes.

use crate::sys::Pid;
use crate::{KernelError, KernelResult};
use std::collections::VecDeque;

/// Process page currently held by a frame
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameOwner {
    /// Owning process
    pub pid: Pid,
    /// Page of that process
    pub page: usize,
}

/// Frame descriptor
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Frame {
    /// Frame number
    pub index: usize,
    /// Frame is in use
    pub occupied: bool,
    /// Owner once a mapping is installed
    pub owner: Option<FrameOwner>,
}

/// Frame pool with FIFO victim selection
#[derive(Debug)]
pub struct FramePool {
    /// All frames, indexed by frame number
    frames: Vec<Frame>,
    /// Frame numbers in allocation order, oldest first
    ring: VecDeque<usize>,
}

impl FramePool {
    /// Create pool of `count` free frames
    pub fn new(count: usize) -> Self {
        Self {
            frames: (0..count)
                .map(|index| Frame { index, occupied: false, owner: None })
                .collect(),
            ring: VecDeque::with_capacity(count),
        }
    }

    /// Claim the lowest-numbered free frame
    ///
    /// The frame moves to the tail of the ring, so a frame that was freed
    /// and is handed out again counts as newly allocated.
    pub fn take_free(&mut self) -> Option<usize> {
        let index = self.frames.iter().position(|f| !f.occupied)?;
        self.frames[index].occupied = true;
        self.frames[index].owner = None;

        self.ring.retain(|&f| f != index);
        self.ring.push_back(index);
        Some(index)
    }

    /// Rotate the oldest allocation to the tail and return it
    pub fn next_victim(&mut self) -> KernelResult<usize> {
        let victim = self.ring.pop_front().ok_or(KernelError::FramePoolCorrupted)?;
        self.ring.push_back(victim);
        Ok(victim)
    }

    /// Record the owner of an occupied frame
    pub fn assign(&mut self, index: usize, pid: Pid, page: usize) {
        if let Some(frame) = self.frames.get_mut(index) {
            frame.occupied = true;
            frame.owner = Some(FrameOwner { pid, page });
        }
    }

    /// Forget the owner of an evicted frame; it stays occupied
    pub fn disown(&mut self, index: usize) {
        if let Some(frame) = self.frames.get_mut(index) {
            frame.owner = None;
        }
    }

    /// Return a frame to the pool
    ///
    /// The ring is left alone; the frame is picked up by the free-frame
    /// path before any eviction happens.
    pub fn free(&mut self, index: usize) {
        if let Some(frame) = self.frames.get_mut(index) {
            frame.occupied = false;
            frame.owner = None;
        }
    }

    /// Get frame descriptor
    pub fn frame(&self, index: usize) -> Option<&Frame> {
        self.frames.get(index)
    }

    /// Owner of a frame
    pub fn owner(&self, index: usize) -> Option<FrameOwner> {
        self.frames.get(index).and_then(|f| f.owner)
    }

    /// All frame descriptors
    pub fn frames(&self) -> &[Frame] {
        &self.frames
    }

    /// Frame numbers in ring order, oldest first
    pub fn ring(&self) -> Vec<usize> {
        self.ring.iter().copied().collect()
    }

    /// Number of occupied frames
    pub fn occupied(&self) -> usize {
        self.frames.iter().filter(|f| f.occupied).count()
    }

    /// Number of free frames
    pub fn free_count(&self) -> usize {
        self.frames.len() - self.occupied()
    }

    /// Total frames
    pub fn capacity(&self) -> usize {
        self.frames.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_take_free_in_order() {
        let mut pool = FramePool::new(3);
        assert_eq!(pool.take_free(), Some(0));
        assert_eq!(pool.take_free(), Some(1));
        assert_eq!(pool.take_free(), Some(2));
        assert_eq!(pool.take_free(), None);
        assert_eq!(pool.occupied(), 3);
        assert_eq!(pool.ring(), vec![0, 1, 2]);
    }

    #[test]
    fn test_victims_rotate_fifo() {
        let mut pool = FramePool::new(3);
        for _ in 0..3 {
            pool.take_free();
        }

        assert_eq!(pool.next_victim().unwrap(), 0);
        assert_eq!(pool.next_victim().unwrap(), 1);
        assert_eq!(pool.ring(), vec![2, 0, 1]);
    }

    #[test]
    fn test_empty_ring_is_corruption() {
        let mut pool = FramePool::new(2);
        assert_eq!(pool.next_victim(), Err(KernelError::FramePoolCorrupted));
    }

    #[test]
    fn test_freed_frame_reused_and_moved_to_tail() {
        let mut pool = FramePool::new(3);
        for _ in 0..3 {
            pool.take_free();
        }
        pool.free(0);
        assert_eq!(pool.free_count(), 1);
        assert_eq!(pool.ring(), vec![0, 1, 2]);

        assert_eq!(pool.take_free(), Some(0));
        assert_eq!(pool.ring(), vec![1, 2, 0]);
    }

    #[test]
    fn test_assign_and_free() {
        let mut pool = FramePool::new(2);
        let f = pool.take_free().unwrap();
        pool.assign(f, 7, 12);
        assert_eq!(pool.owner(f), Some(FrameOwner { pid: 7, page: 12 }));

        pool.free(f);
        assert_eq!(pool.owner(f), None);
        assert!(!pool.frame(f).unwrap().occupied);
    }
}

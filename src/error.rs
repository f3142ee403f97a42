//! Error types for SimKernel
//!
//! Every kernel-core error is local to the request that produced it. None of
//! them stop the background actors.

use crate::kernel::ExternalHandle;
use crate::sys::Pid;
use thiserror::Error;

/// Result type for kernel operations
pub type KernelResult<T> = Result<T, KernelError>;

/// Kernel error types
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum KernelError {
    // ========== Lookup Errors ==========

    /// External handle was never registered
    #[error("Unknown handle: {0}")]
    UnknownHandle(ExternalHandle),

    /// Simulated process has no record or address space
    #[error("Unknown process: {0}")]
    UnknownProcess(Pid),

    // ========== Capacity Errors ==========

    /// A bounded table is full
    #[error("{resource} full (capacity {capacity})")]
    CapacityExceeded {
        /// Name of the exhausted table
        resource: &'static str,
        /// Configured capacity
        capacity: usize,
    },

    // ========== Memory Errors ==========

    /// Virtual address lies outside the process address space
    #[error("Invalid address {address:#x}: page {page} outside {pages} pages")]
    InvalidAddress {
        /// Requested virtual address
        address: u64,
        /// Page the address falls in
        page: usize,
        /// Pages per address space
        pages: usize,
    },

    /// No free frame and nothing to evict
    #[error("Frame pool corrupted: no free frame and empty victim ring")]
    FramePoolCorrupted,

    // ========== Configuration Errors ==========

    /// Invalid configuration
    #[error("Invalid configuration: {0}")]
    InvalidConfiguration(String),

    // ========== Batch Errors ==========

    /// Malformed batch directive
    #[error("Batch line {line}: {reason}")]
    Batch {
        /// 1-based line number
        line: usize,
        /// What was wrong with it
        reason: String,
    },

    // ========== I/O Errors ==========

    /// Host I/O failure (config or batch file)
    #[error("IO error: {0}")]
    Io(String),
}

impl KernelError {
    /// Check if this error is recoverable
    ///
    /// A corrupted frame pool means the eviction ring lost track of a frame;
    /// everything else leaves kernel state untouched.
    pub fn is_recoverable(&self) -> bool {
        !matches!(self, KernelError::FramePoolCorrupted)
    }

    /// Check if this error is a lookup failure
    pub fn is_not_found(&self) -> bool {
        matches!(self, KernelError::UnknownHandle(_) | KernelError::UnknownProcess(_))
    }
}

impl From<std::io::Error> for KernelError {
    fn from(err: std::io::Error) -> Self {
        KernelError::Io(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = KernelError::UnknownHandle(42);
        assert_eq!(err.to_string(), "Unknown handle: 42");

        let err = KernelError::CapacityExceeded { resource: "PID map", capacity: 64 };
        assert_eq!(err.to_string(), "PID map full (capacity 64)");
    }

    #[test]
    fn test_is_recoverable() {
        assert!(KernelError::UnknownProcess(3).is_recoverable());
        assert!(KernelError::InvalidConfiguration("x".into()).is_recoverable());
        assert!(!KernelError::FramePoolCorrupted.is_recoverable());
    }

    #[test]
    fn test_is_not_found() {
        assert!(KernelError::UnknownHandle(1).is_not_found());
        assert!(KernelError::UnknownProcess(1).is_not_found());
        assert!(!KernelError::FramePoolCorrupted.is_not_found());
    }
}

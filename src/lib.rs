//! SimKernel: a simulated single-core kernel
//!
//! A preemptive priority scheduler with blocking I/O, coupled to a paged
//! virtual-memory manager with a translation cache. Externally spawned work
//! is mapped onto simulated processes through an append-only PID map.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────┐
//! │                     Command loop / shell                     │
//! │      register      retire      memory_access     snapshot    │
//! ├──────────────────────────────────────────────────────────────┤
//! │                 Kernel context (integration)                 │
//! │   ┌──────────────┐   ┌──────────────┐   ┌────────────────┐   │
//! │   │   PID map    │   │ Process arena│   │ Virtual memory │   │
//! │   └──────────────┘   └──────┬───────┘   │ frames + TLB   │   │
//! │                             │           └────────────────┘   │
//! │   ┌──────────┐  ┌───────────┴──┐  ┌──────────┐  ┌─────────┐  │
//! │   │ Scheduler│  │ Ready / Wait │  │ I/O      │  │ Monitor │  │
//! │   │   loop   │  │    queues    │  │ actor    │  │ actor   │  │
//! │   └────┬─────┘  └──────────────┘  └──────────┘  └─────────┘  │
//! │        │        ┌──────────────┐                             │
//! │        └────────│ Quantum timer│◄── timer actor              │
//! │                 └──────────────┘                             │
//! └──────────────────────────────────────────────────────────────┘
//! ```
//!
//! The four actors run as independent tokio tasks. They share state only
//! through the per-resource locks (ready queue, waiting queue, process
//! arena, quantum timer, VM) and are stopped through a watch channel that
//! each one checks when it wakes.
//!
//! # Example
//!
//! ```ignore
//! use simkernel::{Kernel, KernelConfig, AccessMode};
//!
//! let mut kernel = Kernel::new(KernelConfig::default())?;
//! kernel.start();
//!
//! let pid = kernel.register(4242)?;
//! let access = kernel.memory_access(4242, AccessMode::Write, 8192).await?;
//!
//! kernel.retire(4242)?;
//! kernel.stop().await;
//! ```

pub mod batch;
pub mod config;
pub mod error;
pub mod event;
pub mod kernel;
pub mod mm;
pub mod sys;

pub use config::KernelConfig;
pub use error::{KernelError, KernelResult};
pub use event::{EventKind, KernelEvent};
pub use kernel::{ExternalHandle, Kernel, KernelSnapshot, KernelStatus, PidMap};
pub use mm::{
    AccessMode, AccessOutcome, FaultKind, MemoryAccess, MemorySnapshot, Translation,
    VirtualMemory,
};
pub use sys::{Pcb, PcbView, Pid, ProcessQueue, ProcessState, ProcessTable, QuantumTimer};

/// Crate version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Crate name
pub const NAME: &str = "SimKernel";

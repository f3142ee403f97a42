//! Process scheduling subsystem
//!
//! - `process` - process records and the process arena
//! - `queue` - synchronized ready/waiting queues
//! - `timer` - shared quantum timer and the timer actor
//! - `scheduler` - dispatch loop
//! - `io` - I/O completion actor
//! - `monitor` - queue-depth monitor actor

pub mod io;
pub mod monitor;
pub mod process;
pub mod queue;
pub mod scheduler;
pub mod timer;

pub use monitor::DepthMonitor;
pub use process::{Pcb, PcbView, Pid, ProcessState, ProcessTable};
pub use queue::ProcessQueue;
pub use timer::QuantumTimer;

//! Kernel context
//!
//! One explicitly constructed context owns the queues, the process arena,
//! the quantum timer, the virtual memory manager and the handle map. The
//! background actors get a shared reference; callers use [`Kernel`].
//!
//! Lock order, where more than one is held: handle map, queue, process
//! arena, VM.

pub mod pid_map;

use crate::batch::{parse_batch, BatchCommand};
use crate::event::KernelEvent;
use crate::mm::{AccessMode, AccessOutcome, MemoryAccess, MemorySnapshot, VirtualMemory};
use crate::sys::{io, monitor, scheduler, timer};
use crate::sys::{PcbView, Pid, ProcessQueue, ProcessState, ProcessTable, QuantumTimer};
use crate::{KernelConfig, KernelError, KernelResult};
use parking_lot::Mutex;
use std::path::Path;
use std::sync::Arc;
use tokio::sync::{broadcast, watch};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

pub use pid_map::{ExternalHandle, PidMap};

/// Event channel depth
const EVENT_CAPACITY: usize = 1024;

/// Kernel status
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KernelStatus {
    /// Actors not running
    Stopped,
    /// Actors running
    Running,
}

/// Queue contents for display
#[derive(Debug, Clone, Default)]
pub struct KernelSnapshot {
    /// Ready records in queue order
    pub ready: Vec<PcbView>,
    /// Waiting records in queue order
    pub waiting: Vec<PcbView>,
    /// Record holding the core
    pub running: Option<PcbView>,
}

/// State shared with the actors
pub(crate) struct Shared {
    pub(crate) config: KernelConfig,
    pub(crate) processes: ProcessTable,
    pub(crate) ready: ProcessQueue,
    pub(crate) waiting: ProcessQueue,
    pub(crate) timer: Arc<QuantumTimer>,
    pub(crate) vm: Mutex<VirtualMemory>,
    pub(crate) pid_map: Mutex<PidMap>,
    pub(crate) events: broadcast::Sender<KernelEvent>,
}

impl Shared {
    pub(crate) fn emit(&self, event: KernelEvent) {
        let _ = self.events.send(event);
    }

    /// Free the frames of a process whose time limit ran out
    ///
    /// A tracked process keeps its page table until the caller retires the
    /// handle. An untracked one has nobody to retire it, so the page table
    /// goes as well.
    pub(crate) fn release_frames(&self, pid: Pid) {
        let tracked = self.pid_map.lock().handle_of(pid).is_some();

        let mut vm = self.vm.lock();
        let result = if tracked { vm.release(pid) } else { vm.destroy_address_space(pid) };
        if let Err(e) = result {
            debug!(pid, error = %e, "Nothing to release");
        }
    }
}

/// Simulated kernel
pub struct Kernel {
    shared: Arc<Shared>,
    shutdown: watch::Sender<bool>,
    tasks: Vec<JoinHandle<()>>,
}

impl Kernel {
    /// Create a kernel with validated configuration; actors are not started
    pub fn new(config: KernelConfig) -> KernelResult<Self> {
        config.validate()?;

        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        let (shutdown, _) = watch::channel(false);

        let shared = Shared {
            processes: ProcessTable::new(config.max_processes),
            ready: ProcessQueue::new("ready"),
            waiting: ProcessQueue::new("waiting"),
            timer: Arc::new(QuantumTimer::new(config.quantum_ticks)),
            vm: Mutex::new(VirtualMemory::new(&config).with_events(events.clone())),
            pid_map: Mutex::new(PidMap::new(config.pid_map_capacity)),
            events,
            config,
        };

        Ok(Self { shared: Arc::new(shared), shutdown, tasks: Vec::new() })
    }

    /// Start the scheduler, timer, I/O and monitor actors
    pub fn start(&mut self) {
        if !self.tasks.is_empty() {
            return;
        }
        // No receivers exist between runs
        self.shutdown.send_replace(false);

        info!(
            frames = self.shared.config.frame_count,
            quantum = self.shared.config.quantum_ticks,
            "Starting kernel"
        );

        let shared = &self.shared;
        self.tasks.push(tokio::spawn(scheduler::run_scheduler(shared.clone(), self.shutdown.subscribe())));
        self.tasks.push(tokio::spawn(timer::run_timer(
            shared.timer.clone(),
            shared.config.tick,
            self.shutdown.subscribe(),
        )));
        self.tasks.push(tokio::spawn(io::run_io(shared.clone(), self.shutdown.subscribe())));
        self.tasks.push(tokio::spawn(monitor::run_monitor(shared.clone(), self.shutdown.subscribe())));
    }

    /// Signal every actor and wait for them to finish
    pub async fn stop(&mut self) {
        if self.tasks.is_empty() {
            return;
        }
        info!("Stopping kernel");
        self.shutdown.send_replace(true);

        for task in self.tasks.drain(..) {
            if let Err(e) = task.await {
                warn!(error = %e, "Actor task failed");
            }
        }
    }

    /// Get kernel status
    pub fn status(&self) -> KernelStatus {
        if self.tasks.is_empty() {
            KernelStatus::Stopped
        } else {
            KernelStatus::Running
        }
    }

    /// Subscribe to kernel events
    pub fn subscribe(&self) -> broadcast::Receiver<KernelEvent> {
        self.shared.events.subscribe()
    }

    /// Get configuration
    pub fn config(&self) -> &KernelConfig {
        &self.shared.config
    }

    /// Process arena
    pub fn processes(&self) -> &ProcessTable {
        &self.shared.processes
    }

    // ========================================================================
    // Process creation
    // ========================================================================

    /// Create an untracked simulated process
    pub fn spawn(&self, priority: u32, time_limit: u32) -> KernelResult<Pid> {
        self.admit(None, priority, time_limit)
    }

    /// Create a process for `handle` with the default priority and time limit
    pub fn register(&self, handle: ExternalHandle) -> KernelResult<Pid> {
        let config = &self.shared.config;
        self.register_with(handle, config.default_priority, config.default_time_limit)
    }

    /// Create a process for `handle`
    ///
    /// On error no pid was assigned and nothing was recorded.
    pub fn register_with(&self, handle: ExternalHandle, priority: u32, time_limit: u32) -> KernelResult<Pid> {
        let mut map = self.shared.pid_map.lock();
        map.ensure_room()?;

        let pid = self.admit(Some(handle), priority, time_limit)?;
        map.insert(handle, pid)?;
        Ok(pid)
    }

    fn admit(&self, handle: Option<ExternalHandle>, priority: u32, time_limit: u32) -> KernelResult<Pid> {
        let shared = &self.shared;
        if time_limit == 0 {
            return Err(KernelError::InvalidConfiguration("time limit must be non-zero".into()));
        }

        let pid = shared.processes.create(priority, time_limit)?;
        if let Err(e) = shared.vm.lock().create_address_space(pid) {
            shared.processes.remove(pid);
            return Err(e);
        }

        shared.processes.with(pid, |p| p.state = ProcessState::Ready);
        shared.ready.enqueue(pid);

        info!(pid, ?handle, priority, time_limit, "Created process");
        shared.emit(KernelEvent::Created { pid, handle, priority, time_limit });
        Ok(pid)
    }

    // ========================================================================
    // Handle operations
    // ========================================================================

    /// Pid registered for `handle`
    pub fn lookup(&self, handle: ExternalHandle) -> KernelResult<Pid> {
        self.shared.pid_map.lock().lookup(handle).ok_or(KernelError::UnknownHandle(handle))
    }

    /// External work for `handle` finished: free its frames and page table
    ///
    /// The handle map entry stays. Returns the number of frames freed.
    pub fn retire(&self, handle: ExternalHandle) -> KernelResult<usize> {
        let pid = self.lookup(handle)?;
        let freed = self.shared.vm.lock().destroy_address_space(pid)?;
        info!(handle, pid, freed, "Retired process");
        Ok(freed)
    }

    /// All handle map entries
    pub fn handles(&self) -> Vec<(ExternalHandle, Pid)> {
        self.shared.pid_map.lock().entries().to_vec()
    }

    /// Translate `address` for `handle` and check `mode` against the page
    ///
    /// A hard fault sleeps for the disk latency without holding the VM lock.
    pub async fn memory_access(
        &self,
        handle: ExternalHandle,
        mode: AccessMode,
        address: u64,
    ) -> KernelResult<MemoryAccess> {
        let pid = self.lookup(handle)?;

        let (page, offset, inspection) = {
            let mut vm = self.shared.vm.lock();
            let (page, offset) = vm.split(address)?;
            (page, offset, vm.inspect(pid, page, mode)?)
        };

        if inspection.needs_disk() {
            debug!(pid, page, "Reading page from disk");
            tokio::time::sleep(self.shared.config.ticks(self.shared.config.disk_latency_ticks)).await;
        }

        let translation = self.shared.vm.lock().complete(pid, page, mode, inspection)?;
        let outcome = if inspection.permitted { AccessOutcome::Granted } else { AccessOutcome::Violation };

        Ok(MemoryAccess { translation, mode, offset, outcome })
    }

    /// Set read/write permission on one page of `handle`
    pub fn protect(&self, handle: ExternalHandle, page: usize, read: bool, write: bool) -> KernelResult<()> {
        let pid = self.lookup(handle)?;
        self.shared.vm.lock().set_permissions(pid, page, read, write)?;
        info!(handle, pid, page, read, write, "Page permissions changed");
        Ok(())
    }

    // ========================================================================
    // Display
    // ========================================================================

    /// Ready, waiting and running records
    pub fn snapshot(&self) -> KernelSnapshot {
        let shared = &self.shared;
        KernelSnapshot {
            ready: shared.processes.views(&shared.ready.pids()),
            waiting: shared.processes.views(&shared.waiting.pids()),
            running: shared.processes.running(),
        }
    }

    /// Frames, TLB entries and TLB statistics
    pub fn memory_snapshot(&self) -> MemorySnapshot {
        self.shared.vm.lock().snapshot()
    }

    // ========================================================================
    // Batch workloads
    // ========================================================================

    /// Apply a batch workload; returns the created pids
    pub async fn run_batch(&self, source: &str) -> KernelResult<Vec<Pid>> {
        let commands = parse_batch(source)?;
        let mut pids = Vec::new();

        for command in commands {
            match command {
                BatchCommand::Spawn { priority, time_limit } => {
                    pids.push(self.spawn(priority, time_limit)?);
                }
                BatchCommand::Sleep(ticks) => {
                    debug!(ticks, "Batch sleeping");
                    tokio::time::sleep(self.shared.config.ticks(ticks)).await;
                }
            }
        }

        info!(created = pids.len(), "Batch complete");
        Ok(pids)
    }

    /// Read and apply a batch file
    pub async fn run_batch_file(&self, path: &Path) -> KernelResult<Vec<Pid>> {
        let source = tokio::fs::read_to_string(path).await?;
        self.run_batch(&source).await
    }
}

impl Drop for Kernel {
    fn drop(&mut self) {
        self.shutdown.send_replace(true);
    }
}

impl std::fmt::Debug for Kernel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Kernel")
            .field("status", &self.status())
            .field("processes", &self.shared.processes.len())
            .field("ready", &self.shared.ready.len())
            .field("waiting", &self.shared.waiting.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::EventKind;
    use crate::mm::FaultKind;
    use std::time::Duration;

    fn kernel() -> Kernel {
        Kernel::new(KernelConfig::fast()).unwrap()
    }

    #[test]
    fn test_rejects_invalid_config() {
        let config = KernelConfig { frame_count: 0, ..KernelConfig::fast() };
        assert!(matches!(Kernel::new(config), Err(KernelError::InvalidConfiguration(_))));
    }

    #[test]
    fn test_register_and_lookup() {
        let kernel = kernel();
        let pid = kernel.register(4242).unwrap();

        assert_eq!(kernel.lookup(4242).unwrap(), pid);
        assert_eq!(kernel.lookup(1), Err(KernelError::UnknownHandle(1)));

        let view = kernel.processes().get(pid).unwrap();
        assert_eq!(view.state, ProcessState::Ready);
        assert_eq!(view.priority, 2);
        assert_eq!(view.time_limit, 1);
        assert_eq!(kernel.snapshot().ready[0].pid, pid);
    }

    #[test]
    fn test_register_emits_created() {
        let kernel = kernel();
        let mut events = kernel.subscribe();
        let pid = kernel.register_with(7, 1, 4).unwrap();

        assert_eq!(
            events.try_recv().unwrap(),
            KernelEvent::Created { pid, handle: Some(7), priority: 1, time_limit: 4 }
        );
    }

    #[test]
    fn test_pid_map_full_assigns_nothing() {
        let kernel = Kernel::new(KernelConfig { pid_map_capacity: 1, ..KernelConfig::fast() }).unwrap();
        kernel.register(1).unwrap();

        let err = kernel.register(2).unwrap_err();
        assert!(matches!(err, KernelError::CapacityExceeded { resource: "PID map", .. }));
        assert_eq!(kernel.processes().len(), 1);
        assert_eq!(kernel.snapshot().ready.len(), 1);
    }

    #[test]
    fn test_process_table_full_rolls_back() {
        let kernel = Kernel::new(KernelConfig { max_processes: 2, ..KernelConfig::fast() }).unwrap();
        kernel.register(1).unwrap();
        kernel.register(2).unwrap();

        assert!(matches!(
            kernel.register(3),
            Err(KernelError::CapacityExceeded { resource: "process table", .. })
        ));
        assert_eq!(kernel.handles().len(), 2);
    }

    #[test]
    fn test_zero_time_limit_rejected() {
        let kernel = kernel();

        assert!(matches!(kernel.spawn(1, 0), Err(KernelError::InvalidConfiguration(_))));
        assert!(matches!(kernel.register_with(5, 1, 0), Err(KernelError::InvalidConfiguration(_))));
        assert!(kernel.processes().is_empty());
        assert!(kernel.handles().is_empty());
        assert_eq!(kernel.lookup(5), Err(KernelError::UnknownHandle(5)));
    }

    #[tokio::test(start_paused = true)]
    async fn test_concurrent_faults_share_tlb_entry() {
        let kernel = kernel();
        kernel.register(10).unwrap();

        let (first, second) = tokio::join!(
            kernel.memory_access(10, AccessMode::Read, 0),
            kernel.memory_access(10, AccessMode::Read, 0),
        );
        assert_eq!(first.unwrap().translation.frame, second.unwrap().translation.frame);

        let snapshot = kernel.memory_snapshot();
        assert_eq!(snapshot.occupied(), 1);
        assert_eq!(snapshot.tlb.len(), 1);
        assert_eq!(snapshot.tlb_stats.replacements, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_memory_access_fault_then_hit() {
        let kernel = kernel();
        kernel.register(10).unwrap();

        let first = kernel.memory_access(10, AccessMode::Read, 4096 * 3 + 12).await.unwrap();
        assert_eq!(first.translation.page, 3);
        assert_eq!(first.offset, 12);
        assert_eq!(first.translation.fault, Some(FaultKind::Hard));

        let second = kernel.memory_access(10, AccessMode::Write, 4096 * 3).await.unwrap();
        assert!(second.translation.tlb_hit);
        assert!(second.is_granted());
    }

    #[tokio::test(start_paused = true)]
    async fn test_hard_fault_waits_for_disk() {
        let config = KernelConfig { tick: Duration::from_secs(1), disk_latency_ticks: 2, ..KernelConfig::fast() };
        let kernel = Kernel::new(config).unwrap();
        kernel.register(10).unwrap();

        let start = tokio::time::Instant::now();
        kernel.memory_access(10, AccessMode::Read, 0).await.unwrap();
        assert!(start.elapsed() >= Duration::from_secs(2));

        let start = tokio::time::Instant::now();
        kernel.memory_access(10, AccessMode::Read, 0).await.unwrap();
        assert!(start.elapsed() < Duration::from_secs(1));
    }

    #[tokio::test(start_paused = true)]
    async fn test_memory_access_errors() {
        let kernel = kernel();
        kernel.register(10).unwrap();

        assert_eq!(
            kernel.memory_access(11, AccessMode::Read, 0).await,
            Err(KernelError::UnknownHandle(11))
        );
        assert!(matches!(
            kernel.memory_access(10, AccessMode::Read, 50 * 4096).await,
            Err(KernelError::InvalidAddress { page: 50, .. })
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn test_retire_frees_frames() {
        let kernel = kernel();
        kernel.register(10).unwrap();
        kernel.memory_access(10, AccessMode::Read, 0).await.unwrap();
        kernel.memory_access(10, AccessMode::Read, 4096).await.unwrap();
        assert_eq!(kernel.memory_snapshot().occupied(), 2);

        assert_eq!(kernel.retire(10).unwrap(), 2);
        assert_eq!(kernel.memory_snapshot().occupied(), 0);
        assert!(kernel.memory_snapshot().tlb.is_empty());

        // Handle still maps, but the address space is gone
        assert!(kernel.lookup(10).is_ok());
        assert!(matches!(
            kernel.memory_access(10, AccessMode::Read, 0).await,
            Err(KernelError::UnknownProcess(_))
        ));
        assert_eq!(kernel.retire(99), Err(KernelError::UnknownHandle(99)));
    }

    #[tokio::test(start_paused = true)]
    async fn test_protect_write() {
        let kernel = kernel();
        let mut events = kernel.subscribe();
        let pid = kernel.register(10).unwrap();
        kernel.protect(10, 1, true, false).unwrap();

        let access = kernel.memory_access(10, AccessMode::Write, 4096).await.unwrap();
        assert_eq!(access.outcome, AccessOutcome::Violation);
        assert_eq!(kernel.memory_snapshot().occupied(), 0);

        let kinds: Vec<_> = std::iter::from_fn(|| events.try_recv().ok())
            .filter(|e| e.pid() == Some(pid))
            .map(|e| e.kind())
            .collect();
        assert_eq!(kinds, vec![EventKind::Created, EventKind::AccessViolation]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_start_stop() {
        let mut kernel = kernel();
        assert_eq!(kernel.status(), KernelStatus::Stopped);

        kernel.start();
        assert_eq!(kernel.status(), KernelStatus::Running);
        tokio::time::sleep(Duration::from_millis(50)).await;

        kernel.stop().await;
        assert_eq!(kernel.status(), KernelStatus::Stopped);
    }

    #[tokio::test(start_paused = true)]
    async fn test_restart_dispatches_again() {
        let mut kernel = Kernel::new(KernelConfig { tick: Duration::from_secs(1), ..KernelConfig::fast() }).unwrap();
        kernel.start();
        tokio::time::sleep(Duration::from_secs(2)).await;
        kernel.stop().await;

        let mut events = kernel.subscribe();
        let pid = kernel.spawn(1, 2).unwrap();
        kernel.start();
        tokio::time::sleep(Duration::from_secs(10)).await;
        kernel.stop().await;

        let kinds: Vec<_> = std::iter::from_fn(|| events.try_recv().ok())
            .filter(|e| e.pid() == Some(pid))
            .map(|e| e.kind())
            .collect();
        assert_eq!(
            kinds,
            vec![EventKind::Created, EventKind::Dispatched, EventKind::Terminated, EventKind::Released]
        );
        assert!(kernel.processes().get(pid).is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_terminated_tracked_process_keeps_address_space() {
        let mut kernel = kernel();
        let pid = kernel.register_with(10, 1, 1).unwrap();
        kernel.memory_access(10, AccessMode::Read, 0).await.unwrap();
        kernel.start();

        tokio::time::sleep(Duration::from_millis(100)).await;
        kernel.stop().await;

        assert!(kernel.processes().get(pid).is_none());
        assert_eq!(kernel.memory_snapshot().occupied(), 0);
        let again = kernel.memory_access(10, AccessMode::Read, 0).await.unwrap();
        assert_eq!(again.translation.fault, Some(FaultKind::Hard));
    }

    #[tokio::test(start_paused = true)]
    async fn test_run_batch() {
        let kernel = Kernel::new(KernelConfig { tick: Duration::from_secs(1), ..KernelConfig::fast() }).unwrap();
        let start = tokio::time::Instant::now();

        let pids = kernel.run_batch("# workload\n1 3\nSLEEP 2\n2 5\n").await.unwrap();
        assert_eq!(pids.len(), 2);
        assert!(start.elapsed() >= Duration::from_secs(2));
        assert_eq!(kernel.processes().get(pids[1]).unwrap().priority, 2);
    }

    #[tokio::test]
    async fn test_run_batch_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("work.txt");
        std::fs::write(&path, "3 1\n3 1\n").unwrap();

        let kernel = kernel();
        assert_eq!(kernel.run_batch_file(&path).await.unwrap().len(), 2);
        assert!(matches!(
            kernel.run_batch_file(&dir.path().join("missing")).await,
            Err(KernelError::Io(_))
        ));
    }
}

//! Scheduler
//!
//! Preemptive priority scheduler for a single virtual core.
//!
//! # Scheduling Algorithm
//!
//! 1. Pick the ready record with the lowest priority value, ties broken by
//!    the smaller time limit, then by queue order
//! 2. Arm the shared quantum timer and mark the record running
//! 3. Every tick: charge one tick, then in order
//!    - maybe issue I/O (record moves to the waiting queue)
//!    - preempt if the quantum expired (record goes to the ready tail)
//!    - terminate if the time limit is reached (frames released)
//! 4. With nothing ready, sleep one tick and retry; idling is reported once
//!    per idle period

use super::process::{Pid, ProcessState};
use crate::event::KernelEvent;
use crate::kernel::Shared;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::sync::Arc;
use tokio::sync::watch;
use tokio::time::Instant;
use tracing::{debug, info};

/// Result of one running tick
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Step {
    /// Keep running
    Continue,
    /// Blocked on I/O
    Blocked,
    /// Quantum expired
    Preempted(u32),
    /// Time limit reached
    Finished,
}

/// Scheduler loop: runs until the shutdown flag is observed
pub(crate) async fn run_scheduler(shared: Arc<Shared>, shutdown: watch::Receiver<bool>) {
    let mut rng = match shared.config.seed {
        Some(seed) => StdRng::seed_from_u64(seed),
        None => StdRng::from_entropy(),
    };
    let mut idling = false;

    loop {
        if *shutdown.borrow() {
            break;
        }

        let Some(pid) = shared.ready.dequeue_by_policy(&shared.processes) else {
            if !idling {
                info!("No ready processes, idling");
                shared.emit(KernelEvent::Idle);
                idling = true;
            }
            tokio::time::sleep(shared.config.tick).await;
            continue;
        };

        idling = false;
        dispatch(&shared, pid, &mut rng, &shutdown).await;
    }

    debug!("Scheduler stopped");
}

/// Run one dispatch of `pid` until it blocks, is preempted or finishes
async fn dispatch(shared: &Shared, pid: Pid, rng: &mut StdRng, shutdown: &watch::Receiver<bool>) {
    let config = &shared.config;

    shared.timer.reset(config.quantum_ticks);
    let dispatched = shared.processes.with(pid, |p| p.state = ProcessState::Running);
    if dispatched.is_none() {
        return;
    }

    info!(pid, "Scheduling process");
    shared.emit(KernelEvent::Dispatched { pid });

    loop {
        tokio::time::sleep(config.tick).await;

        if *shutdown.borrow() {
            shared.processes.with(pid, |p| p.state = ProcessState::Ready);
            shared.ready.enqueue(pid);
            return;
        }

        let wants_io = rng.gen_bool(config.io_request_probability);
        let expired = shared.timer.expired();

        let step = shared.processes.with(pid, |p| {
            p.ticks_used += 1;
            debug!(pid, used = p.ticks_used, remaining = p.remaining(), "process running");

            if wants_io && !p.io_requested() {
                p.state = ProcessState::Waiting;
                p.io_since = Some(Instant::now());
                Step::Blocked
            } else if expired {
                p.state = ProcessState::Ready;
                Step::Preempted(p.ticks_used)
            } else if p.is_exhausted() {
                p.state = ProcessState::Terminated;
                Step::Finished
            } else {
                Step::Continue
            }
        });

        match step {
            Some(Step::Continue) => continue,
            Some(Step::Blocked) => {
                shared.waiting.enqueue(pid);
                info!(pid, "Process requesting I/O");
                shared.emit(KernelEvent::IoRequested { pid });
            }
            Some(Step::Preempted(ticks_used)) => {
                shared.ready.enqueue(pid);
                info!(pid, ticks_used, "Quantum expired, moving back to ready queue");
                shared.emit(KernelEvent::Preempted { pid, ticks_used });
            }
            Some(Step::Finished) => {
                shared.processes.remove(pid);
                info!(pid, "Process completed execution");
                shared.emit(KernelEvent::Terminated { pid });
                shared.release_frames(pid);
            }
            // Record vanished while running
            None => {}
        }
        return;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::EventKind;
    use crate::{Kernel, KernelConfig};
    use std::time::Duration;

    fn config() -> KernelConfig {
        KernelConfig { tick: Duration::from_secs(1), ..KernelConfig::fast() }
    }

    #[tokio::test(start_paused = true)]
    async fn test_idle_reported_once() {
        let mut kernel = Kernel::new(config()).unwrap();
        let mut events = kernel.subscribe();
        kernel.start();

        tokio::time::sleep(Duration::from_secs(10)).await;
        kernel.stop().await;

        let mut idles = 0;
        while let Ok(event) = events.try_recv() {
            if event.kind() == EventKind::Idle {
                idles += 1;
            }
        }
        assert_eq!(idles, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_runs_to_termination() {
        let mut kernel = Kernel::new(config()).unwrap();
        let mut events = kernel.subscribe();
        let pid = kernel.spawn(1, 3).unwrap();
        kernel.start();

        tokio::time::sleep(Duration::from_millis(4500)).await;
        kernel.stop().await;

        let mut kinds = Vec::new();
        while let Ok(event) = events.try_recv() {
            if event.pid() == Some(pid) {
                kinds.push(event.kind());
            }
        }
        assert_eq!(
            kinds,
            vec![EventKind::Created, EventKind::Dispatched, EventKind::Terminated, EventKind::Released]
        );
        assert!(kernel.processes().get(pid).is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_quantum_preemption() {
        let mut kernel = Kernel::new(KernelConfig { quantum_ticks: 2, ..config() }).unwrap();
        let mut events = kernel.subscribe();
        let pid = kernel.spawn(1, 5).unwrap();
        kernel.start();

        tokio::time::sleep(Duration::from_secs(12)).await;
        kernel.stop().await;

        let mut preempted = 0;
        let mut terminated = false;
        while let Ok(event) = events.try_recv() {
            match event {
                KernelEvent::Preempted { pid: p, .. } if p == pid => preempted += 1,
                KernelEvent::Terminated { pid: p } if p == pid => terminated = true,
                _ => {}
            }
        }
        assert!(preempted >= 1);
        assert!(terminated);
    }

    #[tokio::test(start_paused = true)]
    async fn test_io_request_blocks_process() {
        let cfg = KernelConfig { io_request_probability: 1.0, ..config() };
        let mut kernel = Kernel::new(cfg).unwrap();
        let mut events = kernel.subscribe();
        let pid = kernel.spawn(1, 10).unwrap();
        kernel.start();

        tokio::time::sleep(Duration::from_millis(1500)).await;
        let snapshot = kernel.snapshot();
        kernel.stop().await;

        assert_eq!(snapshot.waiting.len(), 1);
        assert_eq!(snapshot.waiting[0].pid, pid);
        assert_eq!(snapshot.waiting[0].state, ProcessState::Waiting);
        assert!(snapshot.waiting[0].io_requested);

        let kinds: Vec<_> = std::iter::from_fn(|| events.try_recv().ok())
            .filter(|e| e.pid() == Some(pid))
            .map(|e| e.kind())
            .collect();
        assert_eq!(kinds, vec![EventKind::Created, EventKind::Dispatched, EventKind::IoRequested]);
    }
}

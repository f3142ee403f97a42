//! I/O completion actor
//!
//! Every I/O request completes after the same fixed latency. The actor wakes
//! once per tick, scans the waiting queue and moves every request that has
//! aged past the latency back to the ready queue.

use super::process::{Pcb, ProcessState};
use crate::event::KernelEvent;
use crate::kernel::Shared;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::time::Instant;
use tracing::{debug, info};

/// Complete the request of `pcb` if it is at least `latency` old
///
/// Returns true when the record was promoted to READY.
pub fn complete_if_due(pcb: &mut Pcb, now: Instant, latency: Duration) -> bool {
    match pcb.io_since {
        Some(since) if now.saturating_duration_since(since) >= latency => {
            pcb.io_since = None;
            pcb.state = ProcessState::Ready;
            true
        }
        _ => false,
    }
}

/// I/O actor: runs until the shutdown flag is observed
pub(crate) async fn run_io(shared: Arc<Shared>, shutdown: watch::Receiver<bool>) {
    let latency = shared.config.ticks(shared.config.io_latency_ticks);

    loop {
        tokio::time::sleep(shared.config.tick).await;
        if *shutdown.borrow() {
            break;
        }

        let now = Instant::now();
        shared.waiting.drain_where(
            &shared.processes,
            |pcb| complete_if_due(pcb, now, latency),
            |pid| {
                shared.ready.enqueue(pid);
                info!(pid, "Completing I/O");
                shared.emit(KernelEvent::IoCompleted { pid });
            },
        );
    }

    debug!("I/O actor stopped");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{Kernel, KernelConfig};

    #[test]
    fn test_complete_if_due() {
        let start = Instant::now();
        let mut pcb = Pcb::new(1, 0, 5);
        pcb.state = ProcessState::Waiting;
        pcb.io_since = Some(start);

        let latency = Duration::from_secs(3);
        assert!(!complete_if_due(&mut pcb, start + Duration::from_secs(2), latency));
        assert_eq!(pcb.state, ProcessState::Waiting);

        assert!(complete_if_due(&mut pcb, start + latency, latency));
        assert_eq!(pcb.state, ProcessState::Ready);
        assert!(!pcb.io_requested());
    }

    #[test]
    fn test_no_request_is_not_completed() {
        let mut pcb = Pcb::new(1, 0, 5);
        assert!(!complete_if_due(&mut pcb, Instant::now(), Duration::ZERO));
    }

    #[tokio::test(start_paused = true)]
    async fn test_io_completes_after_latency() {
        let config = KernelConfig {
            tick: Duration::from_secs(1),
            io_request_probability: 1.0,
            ..KernelConfig::fast()
        };
        let mut kernel = Kernel::new(config).unwrap();
        let mut events = kernel.subscribe();
        let pid = kernel.spawn(1, 10).unwrap();
        let origin = Instant::now();
        kernel.start();

        let mut requested_at = None;
        let mut completed_at = None;
        while completed_at.is_none() {
            let event = events.recv().await.unwrap();
            match event {
                KernelEvent::IoRequested { pid: p } if p == pid => requested_at = Some(Instant::now()),
                KernelEvent::IoCompleted { pid: p } if p == pid => completed_at = Some(Instant::now()),
                _ => {}
            }
        }
        kernel.stop().await;

        let requested = requested_at.unwrap();
        let completed = completed_at.unwrap();
        assert!(requested >= origin);
        assert!(completed.duration_since(requested) >= Duration::from_secs(3));
        assert!(completed.duration_since(requested) < Duration::from_secs(5));
    }
}

//! Monitor actor
//!
//! Samples ready and waiting queue depths and reports only changes, so an
//! idle kernel stays quiet.

use crate::event::KernelEvent;
use crate::kernel::Shared;
use std::sync::Arc;
use tokio::sync::watch;
use tracing::{debug, info};

/// Debounced queue-depth sampler
#[derive(Debug, Default)]
pub struct DepthMonitor {
    last: Option<(usize, usize)>,
}

impl DepthMonitor {
    /// Create monitor with no previous sample
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a sample; returns it if it differs from the previous one
    pub fn observe(&mut self, ready: usize, waiting: usize) -> Option<(usize, usize)> {
        let sample = (ready, waiting);
        if self.last == Some(sample) {
            return None;
        }
        self.last = Some(sample);
        Some(sample)
    }
}

/// Monitor actor: runs until the shutdown flag is observed
pub(crate) async fn run_monitor(shared: Arc<Shared>, shutdown: watch::Receiver<bool>) {
    let interval = shared.config.ticks(shared.config.monitor_interval_ticks);
    let mut monitor = DepthMonitor::new();

    loop {
        tokio::time::sleep(interval).await;
        if *shutdown.borrow() {
            break;
        }

        if let Some((ready, waiting)) = monitor.observe(shared.ready.len(), shared.waiting.len()) {
            info!(ready, waiting, "Queue depth");
            shared.emit(KernelEvent::QueueDepth { ready, waiting });
        }
    }

    debug!("Monitor stopped");
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_reports_first_sample() {
        let mut monitor = DepthMonitor::new();
        assert_eq!(monitor.observe(0, 0), Some((0, 0)));
    }

    #[test]
    fn test_debounces_repeats() {
        let mut monitor = DepthMonitor::new();
        monitor.observe(2, 1);
        assert_eq!(monitor.observe(2, 1), None);
        assert_eq!(monitor.observe(2, 1), None);
        assert_eq!(monitor.observe(1, 1), Some((1, 1)));
        assert_eq!(monitor.observe(1, 2), Some((1, 2)));
    }
}

//! Quantum timer
//!
//! One shared tick counter for the single virtual core. The scheduler arms
//! it at every dispatch; the timer actor advances it once per tick.

use parking_lot::Mutex;
use std::sync::Arc;
use tokio::sync::watch;
use tracing::trace;

/// Timer state
#[derive(Debug, Clone, Copy)]
struct QuantumState {
    /// Quantum length in ticks
    quantum: u32,
    /// Ticks since the last reset
    elapsed: u32,
}

/// Shared quantum counter
#[derive(Debug)]
pub struct QuantumTimer {
    state: Mutex<QuantumState>,
}

impl QuantumTimer {
    /// Create timer with an initial quantum
    pub fn new(quantum: u32) -> Self {
        Self { state: Mutex::new(QuantumState { quantum, elapsed: 0 }) }
    }

    /// Set the quantum length and zero the counter
    pub fn reset(&self, quantum: u32) {
        let mut state = self.state.lock();
        state.quantum = quantum;
        state.elapsed = 0;
    }

    /// Count one tick
    pub fn advance(&self) {
        let mut state = self.state.lock();
        state.elapsed = state.elapsed.saturating_add(1);
    }

    /// Check if the quantum has run out
    pub fn expired(&self) -> bool {
        let state = self.state.lock();
        state.elapsed >= state.quantum
    }

    /// Ticks since the last reset
    pub fn elapsed(&self) -> u32 {
        self.state.lock().elapsed
    }

    /// Current quantum length
    pub fn quantum(&self) -> u32 {
        self.state.lock().quantum
    }
}

/// Timer actor: advance the quantum counter once per tick until shutdown
pub async fn run_timer(
    timer: Arc<QuantumTimer>,
    tick: std::time::Duration,
    shutdown: watch::Receiver<bool>,
) {
    loop {
        tokio::time::sleep(tick).await;
        if *shutdown.borrow() {
            break;
        }
        timer.advance();
        trace!(elapsed = timer.elapsed(), "timer tick");
    }
}

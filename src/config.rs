//! SimKernel Configuration
//!
//! Timing, scheduling and memory geometry for a kernel instance. All
//! latencies are expressed in ticks; `tick` maps one tick to wall-clock time.

use std::path::{Path, PathBuf};
use std::time::Duration;
use serde::{Serialize, Deserialize};

use crate::{KernelError, KernelResult};

/// Kernel configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct KernelConfig {
    /// Wall-clock length of one tick
    #[serde(with = "humantime_serde")]
    pub tick: Duration,

    /// Quantum length armed at every dispatch
    pub quantum_ticks: u32,

    /// Ticks an I/O request takes to complete
    pub io_latency_ticks: u32,

    /// Chance per running tick that the process issues I/O
    pub io_request_probability: f64,

    /// Simulated disk read on a hard fault
    pub disk_latency_ticks: u32,

    /// Monitor sampling period
    pub monitor_interval_ticks: u32,

    /// Physical frames in the pool
    pub frame_count: usize,

    /// Page-table length of every address space
    pub pages_per_process: usize,

    /// Bytes per page
    pub page_size: u64,

    /// Translation cache slots
    pub tlb_capacity: usize,

    /// Maximum live address spaces
    pub max_processes: usize,

    /// Maximum PID map entries (never reclaimed)
    pub pid_map_capacity: usize,

    /// Priority given to registered work
    pub default_priority: u32,

    /// Time limit given to registered work
    pub default_time_limit: u32,

    /// RNG seed for reproducible I/O requests
    pub seed: Option<u64>,

    /// Logging level
    pub log_level: String,
}

impl Default for KernelConfig {
    fn default() -> Self {
        Self {
            tick: Duration::from_secs(1),
            quantum_ticks: 5,
            io_latency_ticks: 3,
            io_request_probability: 0.2,
            disk_latency_ticks: 1,
            monitor_interval_ticks: 1,
            frame_count: 25,
            pages_per_process: 50,
            page_size: 4096,
            tlb_capacity: 8,
            max_processes: 20,
            pid_map_capacity: 64,
            default_priority: 2,
            default_time_limit: 1,
            seed: None,
            log_level: "info".into(),
        }
    }
}

impl KernelConfig {
    /// Deterministic configuration with a short tick and no random I/O
    pub fn fast() -> Self {
        Self {
            tick: Duration::from_millis(10),
            io_request_probability: 0.0,
            seed: Some(0),
            ..Self::default()
        }
    }

    /// Wall-clock duration of `ticks` ticks
    pub fn ticks(&self, ticks: u32) -> Duration {
        self.tick * ticks
    }

    /// Default configuration file location
    pub fn default_path() -> PathBuf {
        dirs::config_dir()
            .map(|d| d.join("simkernel").join("config.json"))
            .unwrap_or_else(|| PathBuf::from("simkernel.json"))
    }

    /// Load configuration from file
    pub fn load(path: &Path) -> KernelResult<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| KernelError::InvalidConfiguration(format!("{}: {}", path.display(), e)))?;

        serde_json::from_str(&content)
            .map_err(|e| KernelError::InvalidConfiguration(e.to_string()))
    }

    /// Save configuration to file
    pub fn save(&self, path: &Path) -> KernelResult<()> {
        let content = serde_json::to_string_pretty(self)
            .map_err(|e| KernelError::InvalidConfiguration(e.to_string()))?;

        std::fs::write(path, content)?;
        Ok(())
    }

    /// Validate configuration
    pub fn validate(&self) -> KernelResult<()> {
        if self.tick.is_zero() {
            return Err(invalid("tick must be non-zero"));
        }

        let counts = [
            ("quantum_ticks", self.quantum_ticks as usize),
            ("io_latency_ticks", self.io_latency_ticks as usize),
            ("monitor_interval_ticks", self.monitor_interval_ticks as usize),
            ("frame_count", self.frame_count),
            ("pages_per_process", self.pages_per_process),
            ("page_size", self.page_size as usize),
            ("tlb_capacity", self.tlb_capacity),
            ("max_processes", self.max_processes),
            ("pid_map_capacity", self.pid_map_capacity),
            ("default_time_limit", self.default_time_limit as usize),
        ];
        if let Some((name, _)) = counts.iter().find(|(_, v)| *v == 0) {
            return Err(invalid(&format!("{} must be non-zero", name)));
        }

        if !(0.0..=1.0).contains(&self.io_request_probability) {
            return Err(invalid("io_request_probability must be within [0, 1]"));
        }

        if self.tlb_capacity > self.frame_count {
            return Err(invalid("tlb_capacity cannot exceed frame_count"));
        }

        Ok(())
    }
}

fn invalid(msg: &str) -> KernelError {
    KernelError::InvalidConfiguration(msg.into())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_default_config() {
        let config = KernelConfig::default();
        assert_eq!(config.quantum_ticks, 5);
        assert_eq!(config.io_latency_ticks, 3);
        assert_eq!(config.frame_count, 25);
        assert_eq!(config.tlb_capacity, 8);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_fast_config() {
        let config = KernelConfig::fast();
        assert_eq!(config.io_request_probability, 0.0);
        assert_eq!(config.ticks(3), Duration::from_millis(30));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_config_save_load() {
        let tmp = tempdir().unwrap();
        let path = tmp.path().join("config.json");

        let config = KernelConfig { frame_count: 7, tlb_capacity: 4, ..KernelConfig::default() };
        config.save(&path).unwrap();

        let loaded = KernelConfig::load(&path).unwrap();
        assert_eq!(loaded, config);
    }

    #[test]
    fn test_partial_config_uses_defaults() {
        let tmp = tempdir().unwrap();
        let path = tmp.path().join("partial.json");
        std::fs::write(&path, r#"{ "tick": "250ms", "frame_count": 10 }"#).unwrap();

        let loaded = KernelConfig::load(&path).unwrap();
        assert_eq!(loaded.tick, Duration::from_millis(250));
        assert_eq!(loaded.frame_count, 10);
        assert_eq!(loaded.quantum_ticks, 5);
    }

    #[test]
    fn test_validate_rejects_bad_values() {
        let config = KernelConfig { frame_count: 0, ..KernelConfig::default() };
        assert!(config.validate().is_err());

        let config = KernelConfig { io_request_probability: 1.5, ..KernelConfig::default() };
        assert!(config.validate().is_err());

        let config = KernelConfig { tlb_capacity: 30, ..KernelConfig::default() };
        assert!(config.validate().is_err());
    }
}

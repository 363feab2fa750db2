//! Memory Measurement
//!
//! Reads the resident memory of the current process so each step can be
//! measured against a baseline taken just before it runs.

use sysinfo::{get_current_pid, Pid, ProcessRefreshKind, System};

const BYTES_PER_MB: f64 = 1024.0 * 1024.0;

/// Reads the resident memory of the current process.
///
/// # Example
///
/// ```rust
/// use steprunner::monitoring::MemoryProbe;
///
/// let mut probe = MemoryProbe::new();
/// let before = probe.resident_bytes();
/// let buffer = vec![0u8; 4 * 1024 * 1024];
/// let delta = probe.resident_bytes() as i64 - before as i64;
/// # drop(buffer);
/// println!("delta: {} bytes", delta);
/// ```
pub struct MemoryProbe {
    system: System,
    process_id: Option<Pid>,
}

impl MemoryProbe {
    /// Creates a probe for the current process.
    pub fn new() -> Self {
        Self {
            system: System::new(),
            process_id: get_current_pid().ok(),
        }
    }

    /// Returns the resident set size in bytes, or 0 when the process
    /// cannot be inspected.
    pub fn resident_bytes(&mut self) -> u64 {
        let Some(pid) = self.process_id else {
            return 0;
        };

        if !self
            .system
            .refresh_process_specifics(pid, ProcessRefreshKind::new().with_memory())
        {
            return 0;
        }

        self.system.process(pid).map(|p| p.memory()).unwrap_or(0)
    }
}

impl Default for MemoryProbe {
    fn default() -> Self {
        Self::new()
    }
}

/// Converts a byte delta to megabytes.
pub fn bytes_to_mb(bytes: i64) -> f64 {
    bytes as f64 / BYTES_PER_MB
}

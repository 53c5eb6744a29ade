// src/memory.rs

use sysinfo::{Pid, ProcessRefreshKind, ProcessesToUpdate, System};

/// Samples this process's resident-set size.
pub struct MemoryProbe {
    system: System,
    pid: Option<Pid>,
}

impl MemoryProbe {
    pub fn new() -> Self {
        Self {
            system: System::new(),
            pid: sysinfo::get_current_pid().ok(),
        }
    }

    /// Current RSS in bytes, if the platform reports it.
    pub fn rss_bytes(&mut self) -> Option<u64> {
        let pid = self.pid?;
        self.system.refresh_processes_specifics(
            ProcessesToUpdate::Some(&[pid]),
            true,
            ProcessRefreshKind::nothing().with_memory(),
        );
        self.system.process(pid).map(|p| p.memory())
    }

    pub fn rss_gb(&mut self) -> Option<f64> {
        self.rss_bytes().map(|b| b as f64 / 1e9)
    }
}

impl Default for MemoryProbe {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reports_nonzero_rss_where_supported() {
        let mut probe = MemoryProbe::new();
        if let Some(bytes) = probe.rss_bytes() {
            assert!(bytes > 0);
        }
    }
}

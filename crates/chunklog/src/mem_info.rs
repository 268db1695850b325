//! `MemoryInfo`: the collaborator contract spec.md §6 names for
//! memory-mirror admission — `total_physical_mb()` / `used_percent()`.

use sysinfo::System;

pub trait MemoryInfo: Send + Sync {
    fn total_physical_mb(&self) -> u64;
    fn used_percent(&self) -> u8;
}

/// Queries the real host via `sysinfo`.
#[derive(Debug, Default)]
pub struct SystemMemoryInfo;

impl SystemMemoryInfo {
    #[must_use]
    pub fn new() -> Self {
        Self
    }

    fn refreshed() -> System {
        let mut system = System::new();
        system.refresh_memory();
        system
    }
}

impl MemoryInfo for SystemMemoryInfo {
    fn total_physical_mb(&self) -> u64 {
        Self::refreshed().total_memory() / (1024 * 1024)
    }

    fn used_percent(&self) -> u8 {
        let system = Self::refreshed();
        let total = system.total_memory();
        if total == 0 {
            return 0;
        }
        let used = system.used_memory();
        ((used as f64 / total as f64) * 100.0).round().min(100.0) as u8
    }
}

/// A deterministic test double for `try_cache_in_memory` admission
/// tests.
#[derive(Debug, Clone, Copy)]
pub struct FixedMemoryInfo {
    pub total_mb: u64,
    pub used_percent: u8,
}

impl MemoryInfo for FixedMemoryInfo {
    fn total_physical_mb(&self) -> u64 {
        self.total_mb
    }

    fn used_percent(&self) -> u8 {
        self.used_percent
    }
}

#[cfg(test)]
mod tests {
    use super::{FixedMemoryInfo, MemoryInfo};

    #[test]
    fn fixed_memory_info_reports_configured_values() {
        let info = FixedMemoryInfo {
            total_mb: 8192,
            used_percent: 40,
        };
        assert_eq!(info.total_physical_mb(), 8192);
        assert_eq!(info.used_percent(), 40);
    }
}

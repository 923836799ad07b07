//! `heap` profile: memory counters from /proc/self/status

use anyhow::{Context, Result};
use log::info;
use std::fs;
use std::io::Write;
use std::path::PathBuf;
use std::sync::Arc;

use super::NamedProfile;

pub const NAME: &str = "heap";

/// Returns freed heap memory to the operating system
pub trait MemoryReclaimer: Send + Sync {
    /// Run one pass; true if memory was released
    fn reclaim(&self) -> bool;
}

/// glibc `malloc_trim(0)`; a no-op elsewhere
#[derive(Debug, Default, Clone, Copy)]
pub struct MallocTrim;

impl MemoryReclaimer for MallocTrim {
    #[cfg(all(target_os = "linux", target_env = "gnu"))]
    fn reclaim(&self) -> bool {
        #[allow(unsafe_code)] // malloc_trim has no preconditions
        let released = unsafe { libc::malloc_trim(0) };
        released != 0
    }

    #[cfg(not(all(target_os = "linux", target_env = "gnu")))]
    fn reclaim(&self) -> bool {
        false
    }
}

/// Resident and virtual memory of the process
pub struct HeapProfile {
    status_path: PathBuf,
    reclaimer: Arc<dyn MemoryReclaimer>,
}

impl Default for HeapProfile {
    fn default() -> Self {
        Self::new(PathBuf::from("/proc/self/status"), Arc::new(MallocTrim))
    }
}

impl HeapProfile {
    #[must_use]
    pub fn new(status_path: PathBuf, reclaimer: Arc<dyn MemoryReclaimer>) -> Self {
        Self { status_path, reclaimer }
    }

    fn memory_lines(&self) -> Result<Vec<String>> {
        let status = fs::read_to_string(&self.status_path)
            .with_context(|| format!("Failed to read {}", self.status_path.display()))?;
        Ok(status
            .lines()
            .filter(|line| line.starts_with("Vm") || line.starts_with("Rss"))
            .map(str::to_string)
            .collect())
    }
}

/// Value in KiB of a `Name:   1234 kB` status line
fn kib(line: &str) -> Option<usize> {
    line.split_whitespace().nth(1)?.parse().ok()
}

impl NamedProfile for HeapProfile {
    fn name(&self) -> &str {
        NAME
    }

    fn count(&self) -> usize {
        self.memory_lines()
            .ok()
            .and_then(|lines| lines.iter().find(|l| l.starts_with("VmRSS:")).and_then(|l| kib(l)))
            .unwrap_or(0)
    }

    fn write_to(&self, out: &mut dyn Write, debug: i32) -> Result<()> {
        let lines = self.memory_lines()?;
        if debug > 0 {
            writeln!(out, "# {}", self.status_path.display())?;
        }
        for line in lines {
            if debug > 0 {
                writeln!(out, "{line}")?;
            } else {
                // "VmRSS:	  1234 kB" → "VmRSS: 1234 kB"
                let mut parts = line.split_whitespace();
                let key = parts.next().unwrap_or_default();
                writeln!(out, "{key} {}", parts.collect::<Vec<_>>().join(" "))?;
            }
        }
        Ok(())
    }

    fn collect(&self) {
        let released = self.reclaimer.reclaim();
        info!("Heap reclamation pass finished (memory released: {released})");
    }
}

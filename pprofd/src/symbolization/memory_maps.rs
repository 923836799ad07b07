//! Memory mapping utilities for process address space analysis
//!
//! Parses /proc/<pid>/maps to find where the main executable is loaded. The
//! load address relocates ELF symbol addresses for position-independent
//! executables, and it becomes the executable mapping of raw CPU captures.

use anyhow::{Context, Result};
use log::debug;
use std::fs;
use std::path::{Path, PathBuf};

use crate::domain::Pid;

/// Memory range of a loaded binary in a process's address space
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MemoryRange {
    pub start: u64,
    pub end: u64,
}

impl MemoryRange {
    /// Check if an address falls within this memory range
    #[must_use]
    pub fn contains(&self, addr: u64) -> bool {
        addr >= self.start && addr < self.end
    }
}

/// Where the main executable of the current process is mapped
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExecutableMapping {
    pub path: PathBuf,
    pub range: MemoryRange,
}

impl ExecutableMapping {
    /// Locate the current executable in /proc/self/maps
    ///
    /// # Errors
    /// Returns an error if the executable path or the maps file cannot be read
    pub fn current() -> Result<Self> {
        let path = std::env::current_exe().context("Failed to resolve current executable")?;
        let range = parse_memory_maps(Pid::current(), &path)?;
        Ok(Self { path, range })
    }
}

/// Read the raw /proc/<pid>/maps text
///
/// # Errors
/// Returns an error if the maps file cannot be read
pub fn read_memory_maps(pid: Pid) -> Result<String> {
    let maps_path = format!("/proc/{}/maps", pid.0);
    fs::read_to_string(&maps_path).with_context(|| format!("Failed to read {maps_path}"))
}

/// Parse /proc/pid/maps to find the memory range of a specific binary
///
/// Finds all mappings that match the given binary path and returns the range
/// from the minimum start address to the maximum end address.
///
/// # Errors
/// Returns an error if /proc/pid/maps cannot be read or if the binary is not found
pub fn parse_memory_maps(pid: Pid, binary_path: &Path) -> Result<MemoryRange> {
    let maps = read_memory_maps(pid)?;
    let binary_path = binary_path.to_string_lossy();
    find_binary_range(&maps, &binary_path)
        .with_context(|| format!("Could not find memory range for {binary_path}"))
}

fn find_binary_range(maps: &str, binary_path: &str) -> Option<MemoryRange> {
    let mut start_addr = None;
    let mut end_addr = None;

    for line in maps.lines().filter(|line| line.contains(binary_path)) {
        // "start-end perms offset dev inode pathname"
        let Some((start, end)) = line.split_whitespace().next().and_then(|r| r.split_once('-'))
        else {
            continue;
        };
        let (Ok(start), Ok(end)) = (u64::from_str_radix(start, 16), u64::from_str_radix(end, 16))
        else {
            continue;
        };

        start_addr = Some(start_addr.map_or(start, |s: u64| s.min(start)));
        end_addr = Some(end_addr.map_or(end, |e: u64| e.max(end)));
    }

    let range = MemoryRange { start: start_addr?, end: end_addr? };
    debug!(
        "Executable memory range: 0x{:x} - 0x{:x} (size: {} KB)",
        range.start,
        range.end,
        (range.end - range.start) / 1024
    );
    Some(range)
}

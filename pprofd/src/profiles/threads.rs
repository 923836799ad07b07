//! `threads` profile: the process's threads, read from /proc

use anyhow::{Context, Result};
use std::fs;
use std::io::Write;

use super::NamedProfile;
use crate::domain::{Pid, Tid};

/// One thread of the process
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ThreadInfo {
    pub tid: Tid,
    pub comm: String,
    /// Scheduler state letter (R, S, D...), when known
    pub state: Option<char>,
    /// User + system CPU time in clock ticks, when known
    pub cpu_ticks: Option<u64>,
}

/// List threads by reading /proc/pid/task/*
///
/// # Errors
/// Returns an error if the task directory cannot be read
pub fn list_threads(pid: Pid) -> Result<Vec<ThreadInfo>> {
    let task_dir = format!("/proc/{}/task", pid.0);

    let entries = fs::read_dir(&task_dir).context(format!("Failed to read {task_dir}"))?;

    let mut threads: Vec<ThreadInfo> = entries
        .filter_map(|entry| {
            let entry = entry.ok()?;
            let tid = entry.file_name().to_string_lossy().parse::<u32>().ok()?;

            let comm = fs::read_to_string(format!("{task_dir}/{tid}/comm")).ok()?;
            let stat = fs::read_to_string(format!("{task_dir}/{tid}/stat")).ok();
            let (state, cpu_ticks) = stat.as_deref().map_or((None, None), parse_stat);

            Some(ThreadInfo { tid: Tid(tid), comm: comm.trim().to_string(), state, cpu_ticks })
        })
        .collect();

    threads.sort_by_key(|t| t.tid);
    Ok(threads)
}

/// State and utime + stime from a /proc/.../stat line
fn parse_stat(stat: &str) -> (Option<char>, Option<u64>) {
    // comm may contain spaces and parentheses; fields resume after the last ')'
    let Some((_, rest)) = stat.rsplit_once(')') else {
        return (None, None);
    };
    let fields: Vec<&str> = rest.split_whitespace().collect();

    let state = fields.first().and_then(|s| s.chars().next());
    let ticks = |i: usize| fields.get(i).and_then(|v| v.parse::<u64>().ok());
    let cpu = ticks(11).zip(ticks(12)).map(|(utime, stime)| utime + stime);
    (state, cpu)
}

/// Threads of the current process
#[derive(Debug, Clone, Copy)]
pub struct ThreadsProfile {
    pid: Pid,
}

impl Default for ThreadsProfile {
    fn default() -> Self {
        Self { pid: Pid::current() }
    }
}

impl NamedProfile for ThreadsProfile {
    fn name(&self) -> &str {
        "threads"
    }

    fn count(&self) -> usize {
        list_threads(self.pid).map_or(0, |threads| threads.len())
    }

    fn write_to(&self, out: &mut dyn Write, debug: i32) -> Result<()> {
        let threads = list_threads(self.pid)?;
        writeln!(out, "threads: {}", threads.len())?;

        for thread in threads {
            if debug > 0 {
                writeln!(
                    out,
                    "{} {} state={} cpu_ticks={}",
                    thread.tid.0,
                    thread.comm,
                    thread.state.unwrap_or('?'),
                    thread.cpu_ticks.unwrap_or(0)
                )?;
            } else {
                writeln!(out, "{} {}", thread.tid.0, thread.comm)?;
            }
        }
        Ok(())
    }
}

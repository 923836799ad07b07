//! Synthetic workload so captures of the `pprofd` binary have something to show

use anyhow::{Context, Result};
use log::{debug, trace};
use std::hint::black_box;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

/// Busy slice per round; the rest of the round is spent sleeping
const BUSY: Duration = Duration::from_millis(5);
const IDLE: Duration = Duration::from_millis(5);

pub struct Workload {
    stop: Arc<AtomicBool>,
    handles: Vec<JoinHandle<()>>,
}

impl Workload {
    /// Start `workers` named threads
    pub fn spawn(workers: usize) -> Result<Self> {
        let stop = Arc::new(AtomicBool::new(false));
        let handles = (0..workers)
            .map(|id| {
                let stop = Arc::clone(&stop);
                thread::Builder::new()
                    .name(format!("workload-{id}"))
                    .spawn(move || run_worker(id, &stop))
                    .context("Failed to spawn workload thread")
            })
            .collect::<Result<Vec<_>>>()?;

        Ok(Self { stop, handles })
    }

    pub fn stop(self) {
        self.stop.store(true, Ordering::Relaxed);
        for handle in self.handles {
            let _ = handle.join();
        }
    }
}

fn run_worker(id: usize, stop: &AtomicBool) {
    debug!("Workload thread {id} started");
    let mut round = 0u64;

    while !stop.load(Ordering::Relaxed) {
        let started = Instant::now();
        let mut checksum = 0u64;
        while started.elapsed() < BUSY {
            checksum ^= hash_block(black_box(round));
            checksum = checksum.wrapping_add(sum_primes(black_box(2_000)));
        }

        if round % 100 == 0 {
            trace!("worker {id} round {round} checksum {checksum:#x}");
        }
        round += 1;
        thread::sleep(IDLE);
    }

    debug!("Workload thread {id} stopped after {round} rounds");
}

#[inline(never)]
fn hash_block(seed: u64) -> u64 {
    (0..1_024u64).fold(seed ^ 0xcbf2_9ce4_8422_2325, |h, i| {
        (h ^ i).wrapping_mul(0x0100_0000_01b3)
    })
}

#[inline(never)]
fn sum_primes(limit: u64) -> u64 {
    (2..limit).filter(|n| (2..*n).take_while(|d| d * d <= *n).all(|d| n % d != 0)).sum()
}

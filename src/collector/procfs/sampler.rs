//! Observation source that reads CPU accounting straight from `/proc`.
//!
//! Once per interval it diffs the aggregate `cpu` line of `/proc/stat` and the
//! `utime + stime` of every watched process against the previous refresh.
//! Percentages use the same scale as `top`: a process is measured against a
//! single CPU, the machine total is summed over all threads.

use std::collections::HashMap;
use std::time::{Duration, Instant};

use tracing::{debug, warn};

use crate::collector::procfs::parser::CpuTimes;
use crate::collector::procfs::process::{CollectError, ProcfsProbe};
use crate::collector::source::{Observation, Poll, SampleSource, SourceError};
use crate::collector::traits::FileSystem;
use crate::util::round_tenths;

/// Periodically refreshed CPU observations from `/proc`.
pub struct ProcfsSource<F: FileSystem> {
    probe: ProcfsProbe<F>,
    pids: Vec<u32>,
    interval: Duration,
    cpu_threads: usize,
    prev_cpu: CpuTimes,
    prev_ticks: HashMap<u32, u64>,
    next_refresh: Instant,
}

impl<F: FileSystem> ProcfsSource<F> {
    /// Creates the source and takes the baseline reading.
    ///
    /// Fails only if `/proc/stat` cannot be read at all; watched processes
    /// that do not exist yet are simply absent from the baseline.
    pub fn new(probe: ProcfsProbe<F>, pids: &[u32], interval: Duration) -> Result<Self, SourceError> {
        let prev_cpu = probe.cpu_times()?;
        let cpu_threads = probe.cpu_threads();
        let prev_ticks: HashMap<u32, u64> = pids
            .iter()
            .filter_map(|&pid| {
                probe
                    .process_stat(pid)
                    .ok()
                    .map(|stat| (pid, stat.total_ticks()))
            })
            .collect();

        debug!(
            "procfs source: {} threads, {} of {} processes present at start",
            cpu_threads,
            prev_ticks.len(),
            pids.len()
        );

        Ok(Self {
            probe,
            pids: pids.to_vec(),
            interval,
            cpu_threads,
            prev_cpu,
            prev_ticks,
            next_refresh: Instant::now() + interval,
        })
    }

    /// Number of logical CPUs used for scaling.
    pub fn cpu_threads(&self) -> usize {
        self.cpu_threads
    }

    /// Reads `/proc` once and returns the usage since the previous refresh.
    pub fn refresh(&mut self) -> Vec<Observation> {
        let cpu = match self.probe.cpu_times() {
            Ok(cpu) => cpu,
            Err(e) => {
                warn!("Failed to read CPU times: {}", e);
                return Vec::new();
            }
        };

        let delta_total = cpu.total().saturating_sub(self.prev_cpu.total());
        let delta_idle = cpu.idle_total().saturating_sub(self.prev_cpu.idle_total());
        self.prev_cpu = cpu;

        let mut observations = Vec::with_capacity(self.pids.len() + 1);
        if delta_total == 0 {
            debug!("No CPU ticks elapsed since the last refresh");
            return observations;
        }

        let busy = delta_total.saturating_sub(delta_idle) as f64;
        let threads = self.cpu_threads as f64;
        observations.push(Observation::GlobalCpu(round_tenths(
            busy / delta_total as f64 * 100.0 * threads,
        )));

        // Ticks of one CPU during this refresh.
        let per_cpu = delta_total as f64 / threads;
        for &pid in &self.pids {
            match self.probe.process_stat(pid) {
                Ok(stat) => {
                    let ticks = stat.total_ticks();
                    // A new process has no baseline; report it next time.
                    if let Some(prev) = self.prev_ticks.insert(pid, ticks) {
                        let delta = ticks.saturating_sub(prev) as f64;
                        observations.push(Observation::ProcessCpu {
                            pid,
                            percent: round_tenths(delta / per_cpu * 100.0),
                        });
                    }
                }
                Err(CollectError::ProcessGone(_)) => {
                    self.prev_ticks.remove(&pid);
                }
                Err(e) => {
                    warn!("Failed to read process {}: {}", pid, e);
                }
            }
        }

        observations
    }
}

impl<F: FileSystem> SampleSource for ProcfsSource<F> {
    fn poll(&mut self, timeout: Duration) -> Poll {
        let now = Instant::now();
        if now < self.next_refresh {
            let wait = self.next_refresh - now;
            if wait > timeout {
                std::thread::sleep(timeout);
                return Poll::Pending;
            }
            std::thread::sleep(wait);
        }

        self.next_refresh += self.interval;
        let now = Instant::now();
        if self.next_refresh <= now {
            // We were not polled for a whole interval; do not burst.
            self.next_refresh = now + self.interval;
        }
        Poll::Ready(self.refresh())
    }
}

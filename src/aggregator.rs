//! Epoch aggregation: folds a stream of observations into records on a
//! fixed time grid.
//!
//! The first tick only anchors the grid (warm-up). Each later tick that finds
//! the current epoch's window elapsed advances to the next epoch and writes a
//! record for it. Whole intervals that passed without a tick are filled with
//! copies of the preceding record flagged as lag-compensated, so the store has
//! no gaps.

use std::collections::HashMap;

use tracing::{debug, error, trace, warn};

use crate::collector::procfs::ProcessProbe;
use crate::collector::source::Observation;
use crate::storage::model::{EpochRecord, ProcessSample, SampleStore};

/// Position on the sampling grid.
#[derive(Debug, Clone, Copy, PartialEq)]
struct Epoch {
    index: u64,
    /// Grid steps since the origin. Equals `index` unless catch-up was capped.
    step: u64,
}

/// What a single [`EpochAggregator::tick`] produced.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TickReport {
    /// Indices of lag-compensated records written, in order.
    pub compensated: Vec<u64>,
    /// Index of the regular record written, if an epoch boundary was crossed.
    pub current: Option<u64>,
    /// Intervals skipped without a record because the catch-up cap was hit.
    pub dropped: u64,
}

impl TickReport {
    /// `true` if nothing was written.
    pub fn is_empty(&self) -> bool {
        self.current.is_none() && self.compensated.is_empty()
    }
}

/// Turns observations into per-epoch records.
pub struct EpochAggregator {
    pids: Vec<u32>,
    interval: f64,
    max_catchup: usize,
    origin: f64,
    current: Option<Epoch>,
    cpu_cache: HashMap<u32, f64>,
    global_cpu: Option<f64>,
    store: SampleStore,
}

impl EpochAggregator {
    /// Creates an aggregator for the watched `pids`.
    ///
    /// Every watched PID starts with a cached CPU usage of 0.0. A
    /// `max_catchup` of 0 means lag is always fully compensated.
    pub fn new(pids: &[u32], interval: f64, max_catchup: usize) -> Self {
        Self {
            pids: pids.to_vec(),
            interval,
            max_catchup,
            origin: 0.0,
            current: None,
            cpu_cache: pids.iter().map(|&pid| (pid, 0.0)).collect(),
            global_cpu: None,
            store: SampleStore::new(),
        }
    }

    pub fn on_global_cpu(&mut self, percent: f64) {
        self.global_cpu = Some(percent);
    }

    /// Caches the latest CPU usage of a watched process.
    pub fn on_process_cpu(&mut self, pid: u32, percent: f64) {
        match self.cpu_cache.get_mut(&pid) {
            Some(cached) => *cached = percent,
            None => trace!("Ignoring CPU sample of unwatched process {}", pid),
        }
    }

    pub fn apply(&mut self, observation: Observation) {
        match observation {
            Observation::GlobalCpu(percent) => self.on_global_cpu(percent),
            Observation::ProcessCpu { pid, percent } => self.on_process_cpu(pid, percent),
        }
    }

    /// Start time of the epoch currently being collected.
    pub fn current_start(&self) -> Option<f64> {
        self.current.map(|epoch| self.start_of(epoch))
    }

    pub fn store(&self) -> &SampleStore {
        &self.store
    }

    pub fn into_store(self) -> SampleStore {
        self.store
    }

    fn start_of(&self, epoch: Epoch) -> f64 {
        self.origin + epoch.step as f64 * self.interval
    }

    /// Advances the grid to `now` and writes the records that became due.
    ///
    /// `probe` answers liveness and memory for the record of the new epoch.
    pub fn tick<P: ProcessProbe + ?Sized>(&mut self, now: f64, probe: &P) -> TickReport {
        let mut report = TickReport::default();

        let Some(mut epoch) = self.current else {
            self.origin = now;
            self.current = Some(Epoch { index: 0, step: 0 });
            debug!("Sampling grid anchored at {}", now);
            return report;
        };

        if self.start_of(epoch) + self.interval >= now {
            return report;
        }

        epoch.index += 1;
        epoch.step += 1;

        while self.start_of(epoch) + self.interval < now {
            if self.max_catchup != 0 && report.compensated.len() >= self.max_catchup {
                // Land on the last grid point whose window still contains `now`.
                let behind = ((now - self.start_of(epoch)) / self.interval).ceil() as u64 - 1;
                epoch.step += behind;
                report.dropped += behind;
                while self.start_of(epoch) + self.interval < now {
                    epoch.step += 1;
                    report.dropped += 1;
                }
                break;
            }

            let record = match epoch.index.checked_sub(1).and_then(|prev| self.store.get(prev)) {
                Some(previous) => previous.compensate(self.start_of(epoch)),
                None => EpochRecord::new(self.start_of(epoch)).compensate(self.start_of(epoch)),
            };
            self.store.insert(epoch.index, record);
            report.compensated.push(epoch.index);
            epoch.index += 1;
            epoch.step += 1;
        }

        if !report.compensated.is_empty() {
            warn!(
                "Sampling fell behind by {} epochs, filled in with the previous values. Use a longer interval if this problem persists",
                report.compensated.len()
            );
        }
        if report.dropped > 0 {
            error!(
                "Sampling fell behind by more than {} epochs, {} intervals were not recorded",
                self.max_catchup, report.dropped
            );
        }

        let record = self.close_record(self.start_of(epoch), probe);
        self.store.insert(epoch.index, record);
        report.current = Some(epoch.index);
        self.current = Some(epoch);

        report
    }

    /// Builds the regular record for an epoch starting at `timestamp`.
    fn close_record<P: ProcessProbe + ?Sized>(&self, timestamp: f64, probe: &P) -> EpochRecord {
        let mut record = EpochRecord::new(timestamp);
        record.total_cpu = self.global_cpu;

        for &pid in &self.pids {
            if !probe.is_running(pid) {
                continue;
            }
            let mem = probe.memory_mib(pid).unwrap_or_else(|e| {
                debug!("Memory of process {} unavailable: {}", pid, e);
                0.0
            });
            let cpu = self.cpu_cache.get(&pid).copied().unwrap_or(0.0);
            record.processes.insert(pid, ProcessSample { cpu, mem });
        }

        record
    }
}

//! The sampling loop.
//!
//! Waits on a [`SampleSource`] with a short timeout, feeds whatever arrives
//! into the [`EpochAggregator`] and advances the epoch grid after every wait.
//! The shutdown flag is checked between waits, so an interrupt is observed
//! within one poll timeout.

use std::io::{self, Write};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

use tracing::{debug, error, info, warn};

use crate::aggregator::{EpochAggregator, TickReport};
use crate::collector::procfs::ProcessProbe;
use crate::collector::source::{Poll, SampleSource};
use crate::config::SamplerConfig;
use crate::storage::model::{EpochRecord, SampleStore};
use crate::util::{format_float, unix_now};

/// How long a single wait on the source may block.
pub const POLL_TIMEOUT: Duration = Duration::from_millis(100);

/// How long to wait for an interrupt after the source closed. A terminal
/// Ctrl-C can reach the source before our own handler has run.
pub const CLOSE_GRACE: Duration = Duration::from_millis(500);

/// Installs the Ctrl-C handler and returns the flag it sets.
///
/// Fails if a handler is already installed in this process.
pub fn install_shutdown_flag() -> Result<Arc<AtomicBool>, ctrlc::Error> {
    let shutdown = Arc::new(AtomicBool::new(false));
    let flag = shutdown.clone();
    ctrlc::set_handler(move || {
        flag.store(true, Ordering::SeqCst);
    })?;
    Ok(shutdown)
}

/// Why the loop stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopReason {
    /// The shutdown flag was set.
    Interrupted,
    /// The source ended on its own.
    SourceClosed,
}

/// Result of a finished run.
#[derive(Debug)]
pub struct RunOutcome {
    pub store: SampleStore,
    pub reason: StopReason,
    /// Number of ticks that had to fill in lagged epochs.
    pub lagged_ticks: u64,
}

/// Drives a source into an aggregator until told to stop.
pub struct Sampler {
    pids: Vec<u32>,
    interval: f64,
    max_catchup: usize,
    poll_timeout: Duration,
    close_grace: Duration,
    clock: Box<dyn FnMut() -> f64>,
}

impl Sampler {
    pub fn new(config: &SamplerConfig) -> Self {
        Self {
            pids: config.pids.clone(),
            interval: config.interval,
            max_catchup: config.max_catchup,
            poll_timeout: POLL_TIMEOUT,
            close_grace: CLOSE_GRACE,
            clock: Box::new(unix_now),
        }
    }

    /// Replaces the wall clock (seconds since the UNIX epoch).
    pub fn with_clock(mut self, clock: impl FnMut() -> f64 + 'static) -> Self {
        self.clock = Box::new(clock);
        self
    }

    pub fn with_poll_timeout(mut self, timeout: Duration) -> Self {
        self.poll_timeout = timeout;
        self
    }

    pub fn with_close_grace(mut self, grace: Duration) -> Self {
        self.close_grace = grace;
        self
    }

    /// Runs until `shutdown` is set or the source closes, printing a progress
    /// block to stdout for every regular epoch.
    pub fn run<S, P>(&mut self, source: &mut S, probe: &P, shutdown: &AtomicBool) -> RunOutcome
    where
        S: SampleSource + ?Sized,
        P: ProcessProbe + ?Sized,
    {
        let stdout = io::stdout();
        let mut out = stdout.lock();
        self.run_with_output(source, probe, shutdown, &mut out)
    }

    /// Same as [`Sampler::run`] with progress written to `out`.
    pub fn run_with_output<S, P, W>(
        &mut self,
        source: &mut S,
        probe: &P,
        shutdown: &AtomicBool,
        out: &mut W,
    ) -> RunOutcome
    where
        S: SampleSource + ?Sized,
        P: ProcessProbe + ?Sized,
        W: Write,
    {
        let mut aggregator = EpochAggregator::new(&self.pids, self.interval, self.max_catchup);
        let mut lagged_ticks = 0u64;

        info!(
            "Sampling {} process(es) every {}s",
            self.pids.len(),
            self.interval
        );

        let reason = loop {
            if shutdown.load(Ordering::SeqCst) {
                break StopReason::Interrupted;
            }

            match source.poll(self.poll_timeout) {
                Poll::Ready(observations) => {
                    for observation in observations {
                        aggregator.apply(observation);
                    }
                }
                Poll::Pending => {}
                Poll::Closed => {
                    if self.wait_for_shutdown(shutdown) {
                        break StopReason::Interrupted;
                    }
                    error!("Sample source closed unexpectedly");
                    break StopReason::SourceClosed;
                }
            }

            let report = aggregator.tick((self.clock)(), probe);
            if !report.compensated.is_empty() {
                lagged_ticks += 1;
            }
            if let Err(e) = print_report(out, aggregator.store(), &self.pids, &report) {
                debug!("Failed to print progress: {}", e);
            }
        };

        source.shutdown();

        let store = aggregator.into_store();
        debug!(
            "Sampling stopped ({:?}) after {} epochs, {} lagged ticks",
            reason,
            store.len(),
            lagged_ticks
        );
        if lagged_ticks > 0 {
            warn!(
                "{} tick(s) had to compensate for lag during this run",
                lagged_ticks
            );
        }

        RunOutcome {
            store,
            reason,
            lagged_ticks,
        }
    }

    /// Returns `true` if `shutdown` gets set within the close grace period.
    fn wait_for_shutdown(&self, shutdown: &AtomicBool) -> bool {
        let deadline = Instant::now() + self.close_grace;
        loop {
            if shutdown.load(Ordering::SeqCst) {
                return true;
            }
            let now = Instant::now();
            if now >= deadline {
                return false;
            }
            std::thread::sleep((deadline - now).min(Duration::from_millis(50)));
        }
    }
}

/// Prints the progress block of the regular record written by a tick.
fn print_report<W: Write>(
    out: &mut W,
    store: &SampleStore,
    pids: &[u32],
    report: &TickReport,
) -> io::Result<()> {
    if let Some(record) = report.current.and_then(|index| store.get(index)) {
        write_progress(out, record, pids)?;
    }
    Ok(())
}

/// ```text
/// TIME: 1700000000.5
/// TOTAL CPU: 166.0%
/// 1234: CPU: 12.5% MEM: 42.0 MiB
///
/// ```
pub fn write_progress<W: Write>(out: &mut W, record: &EpochRecord, pids: &[u32]) -> io::Result<()> {
    writeln!(out, "TIME: {}", format_float(record.timestamp))?;
    match record.total_cpu {
        Some(total) => writeln!(out, "TOTAL CPU: {}%", format_float(total))?,
        None => writeln!(out, "TOTAL CPU: -%")?,
    }
    for pid in pids {
        if let Some(sample) = record.processes.get(pid) {
            writeln!(
                out,
                "{}: CPU: {}% MEM: {} MiB",
                pid,
                format_float(sample.cpu),
                format_float(sample.mem)
            )?;
        }
    }
    writeln!(out)?;
    out.flush()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::collector::procfs::CollectError;
    use crate::collector::source::Observation;
    use std::cell::Cell;
    use std::collections::VecDeque;
    use std::rc::Rc;

    /// Replays polls in order, then reports `Closed` (or keeps pending).
    struct ScriptedSource {
        script: VecDeque<Poll>,
        close_at_end: bool,
        shutdown_calls: usize,
    }

    impl ScriptedSource {
        fn new(script: Vec<Poll>, close_at_end: bool) -> Self {
            Self {
                script: script.into(),
                close_at_end,
                shutdown_calls: 0,
            }
        }
    }

    impl SampleSource for ScriptedSource {
        fn poll(&mut self, _timeout: Duration) -> Poll {
            match self.script.pop_front() {
                Some(poll) => poll,
                None if self.close_at_end => Poll::Closed,
                None => Poll::Pending,
            }
        }

        fn shutdown(&mut self) {
            self.shutdown_calls += 1;
        }
    }

    struct AllRunning;

    impl ProcessProbe for AllRunning {
        fn is_running(&self, _pid: u32) -> bool {
            true
        }

        fn memory_mib(&self, pid: u32) -> Result<f64, CollectError> {
            Ok(pid as f64 / 10.0)
        }
    }

    /// Clock advancing by `step` seconds per reading, starting at `start`.
    fn stepping_clock(start: f64, step: f64) -> impl FnMut() -> f64 {
        let mut readings = 0u32;
        move || {
            readings += 1;
            start + f64::from(readings - 1) * step
        }
    }

    fn sampler(pids: Vec<u32>, interval: f64) -> Sampler {
        let config = SamplerConfig::new(interval, "csv", "unused.csv", pids);
        Sampler::new(&config)
            .with_poll_timeout(Duration::from_millis(1))
            .with_close_grace(Duration::from_millis(10))
    }

    #[test]
    fn test_run_until_source_closes() {
        let mut source = ScriptedSource::new(
            vec![
                Poll::Ready(vec![Observation::GlobalCpu(10.0)]),
                Poll::Ready(vec![Observation::ProcessCpu {
                    pid: 5,
                    percent: 2.5,
                }]),
                Poll::Pending,
                Poll::Ready(vec![]),
            ],
            true,
        );
        let shutdown = AtomicBool::new(false);
        let mut out = Vec::new();

        // Clock readings: 100.0, 100.6, 101.2, 101.8.
        let outcome = sampler(vec![5], 0.5)
            .with_clock(stepping_clock(100.0, 0.6))
            .run_with_output(&mut source, &AllRunning, &shutdown, &mut out);

        assert_eq!(outcome.reason, StopReason::SourceClosed);
        assert_eq!(source.shutdown_calls, 1);

        let indices: Vec<u64> = outcome.store.iter().map(|(k, _)| k).collect();
        assert_eq!(indices, vec![1, 2, 3]);
        let first = outcome.store.get(1).unwrap();
        assert_eq!(first.timestamp, 100.5);
        assert_eq!(first.total_cpu, Some(10.0));
        assert_eq!(first.processes[&5].cpu, 2.5);
        assert_eq!(first.processes[&5].mem, 0.5);

        let text = String::from_utf8(out).unwrap();
        assert!(text.starts_with("TIME: 100.5\nTOTAL CPU: 10.0%\n5: CPU: 2.5% MEM: 0.5 MiB\n\n"));
        assert_eq!(text.matches("TIME: ").count(), 3);
    }

    #[test]
    fn test_interrupt_stops_loop() {
        let mut source = ScriptedSource::new(Vec::new(), false);
        let shutdown = Arc::new(AtomicBool::new(false));

        let polls = Rc::new(Cell::new(0u32));
        let counter = polls.clone();
        let flag = shutdown.clone();
        // Each clock reading follows one poll; stop after the third.
        let clock = move || {
            counter.set(counter.get() + 1);
            if counter.get() == 3 {
                flag.store(true, Ordering::SeqCst);
            }
            counter.get() as f64
        };

        let outcome = sampler(vec![1], 10.0)
            .with_clock(clock)
            .run_with_output(&mut source, &AllRunning, &shutdown, &mut Vec::new());

        assert_eq!(outcome.reason, StopReason::Interrupted);
        assert_eq!(polls.get(), 3);
        assert!(outcome.store.is_empty());
        assert_eq!(source.shutdown_calls, 1);
    }

    #[test]
    fn test_close_during_interrupt_counts_as_interrupt() {
        let mut source = ScriptedSource::new(Vec::new(), true);
        let shutdown = Arc::new(AtomicBool::new(false));
        let flag = shutdown.clone();
        let handler = std::thread::spawn(move || {
            std::thread::sleep(Duration::from_millis(20));
            flag.store(true, Ordering::SeqCst);
        });

        let outcome = sampler(vec![1], 1.0)
            .with_close_grace(Duration::from_secs(5))
            .with_clock(stepping_clock(0.0, 1.0))
            .run_with_output(&mut source, &AllRunning, &shutdown, &mut Vec::new());
        handler.join().unwrap();

        assert_eq!(outcome.reason, StopReason::Interrupted);
    }

    #[test]
    fn test_preset_shutdown_stops_before_polling() {
        let mut source = ScriptedSource::new(vec![Poll::Ready(vec![Observation::GlobalCpu(1.0)])], true);
        let shutdown = AtomicBool::new(true);
        let outcome = sampler(vec![1], 1.0)
            .with_clock(stepping_clock(0.0, 1.0))
            .run_with_output(&mut source, &AllRunning, &shutdown, &mut Vec::new());
        assert_eq!(outcome.reason, StopReason::Interrupted);
        assert_eq!(source.script.len(), 1);
    }

    #[test]
    fn test_wait_for_shutdown_times_out() {
        let sampler = sampler(vec![1], 1.0);
        let shutdown = AtomicBool::new(false);
        assert!(!sampler.wait_for_shutdown(&shutdown));
        shutdown.store(true, Ordering::SeqCst);
        assert!(sampler.wait_for_shutdown(&shutdown));
    }

    #[test]
    fn test_lagged_ticks_counted() {
        let mut source = ScriptedSource::new(vec![Poll::Pending, Poll::Pending, Poll::Pending], true);
        let shutdown = AtomicBool::new(false);
        let readings = Rc::new(Cell::new(0usize));
        let r = readings.clone();
        let times = [0.0, 1.5, 5.5];
        let clock = move || {
            let i = r.get().min(times.len() - 1);
            r.set(r.get() + 1);
            times[i]
        };

        let outcome = sampler(vec![1], 1.0)
            .with_clock(clock)
            .run_with_output(&mut source, &AllRunning, &shutdown, &mut Vec::new());

        assert_eq!(outcome.lagged_ticks, 1);
        let flags: Vec<bool> = outcome.store.iter().map(|(_, r)| r.lag_compensated).collect();
        assert_eq!(flags, vec![false, true, true, true, false]);
    }

    #[test]
    fn test_second_shutdown_handler_is_rejected() {
        let shutdown = install_shutdown_flag().unwrap();
        assert!(!shutdown.load(Ordering::SeqCst));
        assert!(install_shutdown_flag().is_err());
    }

    #[test]
    fn test_progress_skips_missing_processes() {
        let mut record = EpochRecord::new(3.0);
        record.processes.insert(
            2,
            crate::storage::model::ProcessSample {
                cpu: 1.0,
                mem: 0.25,
            },
        );
        let mut out = Vec::new();
        write_progress(&mut out, &record, &[1, 2]).unwrap();
        assert_eq!(
            String::from_utf8(out).unwrap(),
            "TIME: 3.0\nTOTAL CPU: -%\n2: CPU: 1.0% MEM: 0.25 MiB\n\n"
        );
    }
}

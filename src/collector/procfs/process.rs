//! Per-process queries against `/proc/[pid]/`: liveness, PSS memory and CPU ticks.

use crate::collector::procfs::parser::{
    CpuTimes, ParseError, ProcStat, parse_cpu_times, parse_cpuinfo_threads, parse_proc_stat,
    parse_pss_kb,
};
use crate::collector::traits::FileSystem;
use std::path::{Path, PathBuf};
use tracing::debug;

/// Error type for collection failures.
#[derive(Debug)]
pub enum CollectError {
    /// Process disappeared during collection.
    ProcessGone(u32),
    /// I/O error reading process files.
    Io(std::io::Error),
    /// Parse error in process files.
    Parse(String),
}

impl std::fmt::Display for CollectError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CollectError::ProcessGone(pid) => write!(f, "process {} disappeared", pid),
            CollectError::Io(e) => write!(f, "I/O error: {}", e),
            CollectError::Parse(msg) => write!(f, "parse error: {}", msg),
        }
    }
}

impl std::error::Error for CollectError {}

impl From<std::io::Error> for CollectError {
    fn from(e: std::io::Error) -> Self {
        CollectError::Io(e)
    }
}

impl From<ParseError> for CollectError {
    fn from(e: ParseError) -> Self {
        CollectError::Parse(e.message)
    }
}

/// Liveness and memory queries for watched processes.
///
/// The aggregator only needs these two questions answered at epoch close,
/// so tests can substitute a scripted implementation.
pub trait ProcessProbe {
    /// Returns `true` if the process exists and is not a zombie.
    fn is_running(&self, pid: u32) -> bool;

    /// Proportional resident memory (PSS) of the process in MiB.
    fn memory_mib(&self, pid: u32) -> Result<f64, CollectError>;
}

/// Reads process and CPU accounting from a proc filesystem.
pub struct ProcfsProbe<F: FileSystem> {
    fs: F,
    proc_path: String,
}

impl<F: FileSystem> ProcfsProbe<F> {
    /// Creates a new probe.
    ///
    /// # Arguments
    /// * `fs` - Filesystem implementation (real or mock)
    /// * `proc_path` - Base path to proc filesystem (usually "/proc")
    pub fn new(fs: F, proc_path: impl Into<String>) -> Self {
        Self {
            fs,
            proc_path: proc_path.into(),
        }
    }

    /// Mutable access to the underlying filesystem, for fixtures that change
    /// between refreshes.
    pub fn fs_mut(&mut self) -> &mut F {
        &mut self.fs
    }

    fn path(&self, relative: &str) -> PathBuf {
        Path::new(&self.proc_path).join(relative)
    }

    fn read(&self, relative: &str) -> std::io::Result<String> {
        self.fs.read_to_string(&self.path(relative))
    }

    /// Reads and parses `/proc/[pid]/stat`.
    pub fn process_stat(&self, pid: u32) -> Result<ProcStat, CollectError> {
        let content = self
            .read(&format!("{}/stat", pid))
            .map_err(|_| CollectError::ProcessGone(pid))?;
        Ok(parse_proc_stat(&content)?)
    }

    /// Reads the aggregate CPU counters from `/proc/stat`.
    pub fn cpu_times(&self) -> Result<CpuTimes, CollectError> {
        let content = self.read("stat")?;
        Ok(parse_cpu_times(&content)?)
    }

    /// Number of logical CPUs listed in `/proc/cpuinfo`, or the host's
    /// available parallelism if that cannot be read. Never less than 1.
    pub fn cpu_threads(&self) -> usize {
        let from_cpuinfo = self
            .read("cpuinfo")
            .map(|content| parse_cpuinfo_threads(&content))
            .unwrap_or(0);
        if from_cpuinfo > 0 {
            return from_cpuinfo;
        }
        let fallback = std::thread::available_parallelism()
            .map(|n| n.get())
            .unwrap_or(1);
        debug!(
            "cpuinfo unavailable under {}, using available parallelism ({})",
            self.proc_path, fallback
        );
        fallback
    }
}

impl<F: FileSystem> ProcessProbe for ProcfsProbe<F> {
    fn is_running(&self, pid: u32) -> bool {
        match self.process_stat(pid) {
            Ok(stat) => !stat.is_zombie(),
            Err(_) => false,
        }
    }

    fn memory_mib(&self, pid: u32) -> Result<f64, CollectError> {
        // smaps_rollup is cheap (4.14+); older kernels only have the full smaps.
        let rollup = format!("{}/smaps_rollup", pid);
        let relative = if self.fs.exists(&self.path(&rollup)) {
            rollup
        } else {
            format!("{}/smaps", pid)
        };
        let content = self.read(&relative).map_err(|e| match e.kind() {
            std::io::ErrorKind::NotFound => CollectError::ProcessGone(pid),
            _ => CollectError::Io(e),
        })?;
        let kb = parse_pss_kb(&content)?;
        Ok(kb as f64 / 1024.0)
    }
}

//! Sample sources: anything that yields CPU observations over time.

use std::time::Duration;

use crate::collector::procfs::CollectError;

/// A single fact reported by a source.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Observation {
    /// Machine-wide CPU usage, summed over all threads (0..=100 × threads).
    GlobalCpu(f64),
    /// CPU usage of one process relative to a single CPU.
    ProcessCpu { pid: u32, percent: f64 },
}

/// Outcome of waiting on a source.
#[derive(Debug, Clone, PartialEq)]
pub enum Poll {
    /// A line or refresh arrived. May carry no observations (noise lines).
    Ready(Vec<Observation>),
    /// Nothing arrived within the timeout.
    Pending,
    /// The source ended and will not produce anything else.
    Closed,
}

/// A stream of observations the sampling loop waits on.
pub trait SampleSource {
    /// Waits at most `timeout` for the next line or refresh.
    fn poll(&mut self, timeout: Duration) -> Poll;

    /// Stops the source and releases whatever it holds.
    fn shutdown(&mut self) {}
}

/// Error type for source start-up failures.
#[derive(Debug)]
pub enum SourceError {
    /// The external reporting tool could not be started.
    Spawn(std::io::Error),
    /// The child process did not expose a stdout pipe.
    NoStdout,
    /// Initial reading of `/proc` failed.
    Collect(CollectError),
}

impl std::fmt::Display for SourceError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SourceError::Spawn(e) => write!(f, "failed to start top: {}", e),
            SourceError::NoStdout => write!(f, "top stdout is not captured"),
            SourceError::Collect(e) => write!(f, "failed to read proc: {}", e),
        }
    }
}

impl std::error::Error for SourceError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            SourceError::Spawn(e) => Some(e),
            SourceError::NoStdout => None,
            SourceError::Collect(e) => Some(e),
        }
    }
}

impl From<CollectError> for SourceError {
    fn from(e: CollectError) -> Self {
        SourceError::Collect(e)
    }
}

//! Validated run configuration.
//!
//! The binary builds a [`SamplerConfig`] from its command line; library code
//! never looks at arguments or the environment itself.

use std::collections::HashSet;
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;

use tracing::warn;

use crate::storage::OutputFormat;

/// Default upper bound on lag-compensated records per tick.
pub const DEFAULT_MAX_CATCHUP: usize = 600;

/// Where CPU observations come from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SourceKind {
    /// Tick deltas read directly from `/proc`.
    #[default]
    Procfs,
    /// Screen output of the `top` tool.
    Top,
}

impl FromStr for SourceKind {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "procfs" | "proc" => Ok(SourceKind::Procfs),
            "top" => Ok(SourceKind::Top),
            _ => Err(ConfigError::UnknownSource(s.to_string())),
        }
    }
}

impl fmt::Display for SourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SourceKind::Procfs => write!(f, "procfs"),
            SourceKind::Top => write!(f, "top"),
        }
    }
}

/// Error type for invalid configuration.
#[derive(Debug, Clone, PartialEq)]
pub enum ConfigError {
    /// Interval is not a positive, finite number of seconds.
    InvalidInterval(f64),
    /// No process to watch.
    NoPids,
    /// PID 0 is not a process.
    InvalidPid(u32),
    UnknownSource(String),
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConfigError::InvalidInterval(i) => {
                write!(f, "interval must be a positive number of seconds, got {}", i)
            }
            ConfigError::NoPids => write!(f, "at least one PID is required"),
            ConfigError::InvalidPid(pid) => write!(f, "invalid PID {}", pid),
            ConfigError::UnknownSource(s) => {
                write!(f, "unknown source '{}', expected 'procfs' or 'top'", s)
            }
        }
    }
}

impl std::error::Error for ConfigError {}

/// Everything a sampling run needs to know.
#[derive(Debug, Clone, PartialEq)]
pub struct SamplerConfig {
    /// Epoch length in seconds.
    pub interval: f64,
    pub format: OutputFormat,
    pub output: PathBuf,
    /// Watched PIDs in argument order, without duplicates.
    pub pids: Vec<u32>,
    pub source: SourceKind,
    pub proc_path: String,
    /// 0 means unbounded.
    pub max_catchup: usize,
}

impl SamplerConfig {
    /// Creates a configuration with default source settings.
    ///
    /// `format` is the user-facing name: `json` selects JSON, anything else CSV.
    pub fn new(interval: f64, format: &str, output: impl Into<PathBuf>, pids: Vec<u32>) -> Self {
        Self {
            interval,
            format: OutputFormat::from_name(format),
            output: output.into(),
            pids,
            source: SourceKind::default(),
            proc_path: "/proc".to_string(),
            max_catchup: DEFAULT_MAX_CATCHUP,
        }
    }

    pub fn with_source(mut self, source: SourceKind) -> Self {
        self.source = source;
        self
    }

    pub fn with_proc_path(mut self, proc_path: impl Into<String>) -> Self {
        self.proc_path = proc_path.into();
        self
    }

    pub fn with_max_catchup(mut self, max_catchup: usize) -> Self {
        self.max_catchup = max_catchup;
        self
    }

    /// Checks the configuration and drops repeated PIDs, keeping the first
    /// occurrence of each.
    pub fn validate(mut self) -> Result<Self, ConfigError> {
        if !self.interval.is_finite() || self.interval <= 0.0 {
            return Err(ConfigError::InvalidInterval(self.interval));
        }
        if self.pids.is_empty() {
            return Err(ConfigError::NoPids);
        }
        if let Some(&pid) = self.pids.iter().find(|&&pid| pid == 0) {
            return Err(ConfigError::InvalidPid(pid));
        }

        let mut seen = HashSet::with_capacity(self.pids.len());
        let before = self.pids.len();
        self.pids.retain(|pid| seen.insert(*pid));
        if self.pids.len() != before {
            warn!(
                "Ignoring {} repeated PID(s), watching {:?}",
                before - self.pids.len(),
                self.pids
            );
        }

        Ok(self)
    }

    /// `true` if the PIDs are in ascending order, i.e. CSV data columns line
    /// up with the (sorted) header.
    pub fn pids_sorted(&self) -> bool {
        self.pids.windows(2).all(|w| w[0] < w[1])
    }
}

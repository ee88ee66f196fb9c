//! Per-epoch measurement records.

use std::collections::BTreeMap;

use serde::ser::{Serialize, SerializeMap, Serializer};

/// CPU and memory of one watched process at epoch close.
#[derive(Debug, Clone, Copy, PartialEq, serde::Serialize)]
pub struct ProcessSample {
    /// Last known CPU percentage, relative to one CPU.
    #[serde(rename = "CPU")]
    pub cpu: f64,
    /// Proportional resident memory in MiB; 0.0 if unreadable.
    #[serde(rename = "MEM")]
    pub mem: f64,
}

/// Measurements for one epoch.
///
/// Processes that were not running when the epoch closed have no entry.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct EpochRecord {
    /// Epoch start on the sampling grid, seconds since the UNIX epoch.
    pub timestamp: f64,
    /// `true` when the record was copied from its predecessor to fill a gap.
    pub lag_compensated: bool,
    /// Machine-wide CPU usage summed over threads; absent if never observed.
    pub total_cpu: Option<f64>,
    pub processes: BTreeMap<u32, ProcessSample>,
}

impl EpochRecord {
    /// Creates an empty, non-compensated record at `timestamp`.
    pub fn new(timestamp: f64) -> Self {
        Self {
            timestamp,
            ..Self::default()
        }
    }

    /// Copies `self` into a gap-filling record at `timestamp`.
    pub fn compensate(&self, timestamp: f64) -> Self {
        Self {
            timestamp,
            lag_compensated: true,
            ..self.clone()
        }
    }
}

#[derive(serde::Serialize)]
struct Total {
    #[serde(rename = "CPU")]
    cpu: f64,
}

/// `{"TIME": t, "LAG-COMPENSATION": b, "TOTAL": {"CPU": x}, "<pid>": {...}}`
impl Serialize for EpochRecord {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let len = 2 + usize::from(self.total_cpu.is_some()) + self.processes.len();
        let mut map = serializer.serialize_map(Some(len))?;
        map.serialize_entry("TIME", &self.timestamp)?;
        map.serialize_entry("LAG-COMPENSATION", &self.lag_compensated)?;
        if let Some(cpu) = self.total_cpu {
            map.serialize_entry("TOTAL", &Total { cpu })?;
        }
        for (pid, sample) in &self.processes {
            map.serialize_entry(&pid.to_string(), sample)?;
        }
        map.end()
    }
}

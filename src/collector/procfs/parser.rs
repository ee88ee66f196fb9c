//! Parsers for `/proc` filesystem files.
//!
//! These are pure functions that parse the content of various `/proc` files
//! into structured data. They are designed to be easily testable with string inputs.

/// Error type for parsing failures.
#[derive(Debug, Clone, PartialEq)]
pub struct ParseError {
    pub message: String,
}

impl ParseError {
    pub fn new(msg: impl Into<String>) -> Self {
        Self {
            message: msg.into(),
        }
    }
}

impl std::fmt::Display for ParseError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Parse error: {}", self.message)
    }
}

impl std::error::Error for ParseError {}

/// The parts of `/proc/[pid]/stat` the probe needs.
#[derive(Debug, Clone, Default)]
pub struct ProcStat {
    pub pid: u32,
    pub comm: String,
    pub state: char,
    /// User mode time in clock ticks.
    pub utime: u64,
    /// Kernel mode time in clock ticks.
    pub stime: u64,
}

impl ProcStat {
    /// Total CPU time consumed by the process, in clock ticks.
    pub fn total_ticks(&self) -> u64 {
        self.utime + self.stime
    }

    /// Zombies still have a `/proc` entry but no longer run or own memory.
    pub fn is_zombie(&self) -> bool {
        self.state == 'Z'
    }
}

/// Parses `/proc/[pid]/stat` content.
///
/// The comm field can contain spaces and parentheses, so fields are counted
/// from the last `)`.
/// Format: pid (comm) state ppid pgrp session tty_nr ...
pub fn parse_proc_stat(content: &str) -> Result<ProcStat, ParseError> {
    let content = content.trim();

    let open_paren = content
        .find('(')
        .ok_or_else(|| ParseError::new("missing '(' in stat"))?;
    let close_paren = content
        .rfind(')')
        .ok_or_else(|| ParseError::new("missing ')' in stat"))?;

    if close_paren <= open_paren {
        return Err(ParseError::new("invalid parentheses in stat"));
    }

    let pid: u32 = content[..open_paren]
        .trim()
        .parse()
        .map_err(|_| ParseError::new("invalid pid"))?;

    let comm = content[open_paren + 1..close_paren].to_string();

    let fields: Vec<&str> = content[close_paren + 1..].split_whitespace().collect();
    if fields.len() < 13 {
        return Err(ParseError::new(format!(
            "not enough fields in stat: expected 13+, got {}",
            fields.len()
        )));
    }

    let parse_field_u64 = |idx: usize, name: &str| -> Result<u64, ParseError> {
        fields
            .get(idx)
            .ok_or_else(|| ParseError::new(format!("missing field {}", name)))?
            .parse()
            .map_err(|_| ParseError::new(format!("invalid {}", name)))
    };

    Ok(ProcStat {
        pid,
        comm,
        state: fields[0].chars().next().unwrap_or('?'),
        utime: parse_field_u64(11, "utime")?,
        stime: parse_field_u64(12, "stime")?,
    })
}

/// Aggregate CPU counters from the `cpu` line of `/proc/stat`, in clock ticks.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct CpuTimes {
    pub user: u64,
    pub nice: u64,
    pub system: u64,
    pub idle: u64,
    pub iowait: u64,
    pub irq: u64,
    pub softirq: u64,
    pub steal: u64,
}

impl CpuTimes {
    /// All ticks, busy and idle. Guest time is already part of user/nice.
    pub fn total(&self) -> u64 {
        self.user
            + self.nice
            + self.system
            + self.idle
            + self.iowait
            + self.irq
            + self.softirq
            + self.steal
    }

    /// Ticks spent idle, including waiting on I/O.
    pub fn idle_total(&self) -> u64 {
        self.idle + self.iowait
    }
}

/// Parses the aggregate `cpu` line of `/proc/stat`.
pub fn parse_cpu_times(content: &str) -> Result<CpuTimes, ParseError> {
    let line = content
        .lines()
        .find(|line| line.split_whitespace().next() == Some("cpu"))
        .ok_or_else(|| ParseError::new("missing aggregate cpu line in stat"))?;

    let parts: Vec<&str> = line.split_whitespace().collect();
    if parts.len() < 5 {
        return Err(ParseError::new(format!(
            "not enough cpu fields: expected 4+, got {}",
            parts.len() - 1
        )));
    }

    let get_val = |idx: usize| -> Result<u64, ParseError> {
        match parts.get(idx) {
            Some(s) => s
                .parse()
                .map_err(|_| ParseError::new(format!("invalid cpu field {}", idx))),
            // Older kernels report fewer columns.
            None => Ok(0),
        }
    };

    Ok(CpuTimes {
        user: get_val(1)?,
        nice: get_val(2)?,
        system: get_val(3)?,
        idle: get_val(4)?,
        iowait: get_val(5)?,
        irq: get_val(6)?,
        softirq: get_val(7)?,
        steal: get_val(8)?,
    })
}

/// Counts the logical CPUs (hardware threads) listed in `/proc/cpuinfo`.
pub fn parse_cpuinfo_threads(content: &str) -> usize {
    content
        .lines()
        .filter(|line| {
            line.split_once(':')
                .is_some_and(|(key, _)| key.trim() == "processor")
        })
        .count()
}

/// Sums the `Pss:` lines of `/proc/[pid]/smaps_rollup` or `/proc/[pid]/smaps`.
///
/// Only the plain `Pss` key is counted; `Pss_Anon`, `Pss_File`, `SwapPss`
/// and friends are breakdowns or swap and would double count.
/// Returns kilobytes.
pub fn parse_pss_kb(content: &str) -> Result<u64, ParseError> {
    let mut total = 0u64;
    let mut found = false;

    for line in content.lines() {
        let Some((key, value)) = line.split_once(':') else {
            continue;
        };
        if key.trim() != "Pss" {
            continue;
        }
        let kb: u64 = value
            .split_whitespace()
            .next()
            .ok_or_else(|| ParseError::new("empty Pss value"))?
            .parse()
            .map_err(|_| ParseError::new(format!("invalid Pss value: {}", value.trim())))?;
        total += kb;
        found = true;
    }

    if found {
        Ok(total)
    } else {
        Err(ParseError::new("no Pss entries"))
    }
}

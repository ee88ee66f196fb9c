//! Parser for the screen output of `top` in non-batch mode.
//!
//! `top` paints its screen with terminal escape sequences. Two of them are
//! used as line markers: the summary row starts with the bold `%Cpu(s):`
//! prefix and every task row starts with an attribute reset. Everything else
//! (headers, memory rows, cursor moves) is noise.

use crate::collector::procfs::ParseError;
use crate::util::round_tenths;

/// Prefix of the aggregate CPU summary row.
const GLOBAL_CPU_PREFIX: &str = "%Cpu(s):\x1b(B\x1b[m\x1b[39;49m\x1b[1m";

/// Prefix of a task row.
const PROCESS_PREFIX: &str = "\x1b(B\x1b[m";

/// Escape sequences removed before tokenizing, in removal order.
const ESCAPES: &[&str] = &[
    "\x1b(B",
    "\x1b[m",
    "\x1b[39;49m",
    "\x1b[1m",
    "\x1b[K",
    "\x1b[J",
    "\x1b[H",
    "\x1b[7m",
];

/// Lines shorter than this carry nothing useful.
const MIN_LINE_LEN: usize = 6;

/// Token index of the idle percentage in the summary row.
const IDLE_TOKEN: usize = 7;
/// Token index of the PID in a task row.
const PID_TOKEN: usize = 0;
/// Token index of `%CPU` in a task row.
const CPU_TOKEN: usize = 8;

/// Classification of a single line of `top` output.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum TopLine {
    /// Aggregate CPU summary with the idle percentage.
    GlobalCpu { idle: f64 },
    /// One task row.
    ProcessCpu { pid: u32, percent: f64 },
    /// Anything else.
    Ignore,
}

/// Removes the fixed set of escape sequences `top` emits.
pub fn strip_escapes(line: &str) -> String {
    ESCAPES
        .iter()
        .fold(line.to_string(), |acc, seq| acc.replace(seq, ""))
}

/// Classifies one raw line.
///
/// Returns an error when a line carries a known prefix but its columns do not
/// parse, which happens when `top` is interrupted mid-repaint.
pub fn parse_line(raw: &str) -> Result<TopLine, ParseError> {
    let line = raw.trim_end();
    if line.len() < MIN_LINE_LEN {
        return Ok(TopLine::Ignore);
    }

    if line.starts_with(GLOBAL_CPU_PREFIX) {
        let stripped = strip_escapes(line);
        let tokens: Vec<&str> = stripped.split_whitespace().collect();
        let idle = parse_percent(&tokens, IDLE_TOKEN, "idle")?;
        Ok(TopLine::GlobalCpu { idle })
    } else if line.starts_with(PROCESS_PREFIX) {
        let stripped = strip_escapes(line);
        let tokens: Vec<&str> = stripped.split_whitespace().collect();
        let pid = tokens
            .get(PID_TOKEN)
            .ok_or_else(|| ParseError::new("missing pid column"))?
            .parse()
            .map_err(|_| ParseError::new(format!("invalid pid: {}", tokens[PID_TOKEN])))?;
        let percent = parse_percent(&tokens, CPU_TOKEN, "%CPU")?;
        Ok(TopLine::ProcessCpu { pid, percent })
    } else {
        Ok(TopLine::Ignore)
    }
}

/// Machine-wide CPU usage from the idle share, summed over all threads and
/// rounded to one decimal.
pub fn global_cpu_usage(idle: f64, cpu_threads: usize) -> f64 {
    round_tenths((100.0 - idle) * cpu_threads as f64)
}

/// Parses a percentage column; some locales print `,` as decimal separator.
fn parse_percent(tokens: &[&str], idx: usize, name: &str) -> Result<f64, ParseError> {
    let token = tokens
        .get(idx)
        .ok_or_else(|| ParseError::new(format!("missing {} column", name)))?;
    token
        .replace(',', ".")
        .parse()
        .map_err(|_| ParseError::new(format!("invalid {}: {}", name, token)))
}

#[cfg(test)]
mod tests {
    use super::*;

    const SUMMARY: &str = "%Cpu(s):\x1b(B\x1b[m\x1b[39;49m\x1b[1m  1.5 \x1b(B\x1b[m\x1b[39;49mus,\x1b(B\x1b[m\x1b[39;49m\x1b[1m  0.5 \x1b(B\x1b[m\x1b[39;49msy,\x1b(B\x1b[m\x1b[39;49m\x1b[1m  0.0 \x1b(B\x1b[m\x1b[39;49mni,\x1b(B\x1b[m\x1b[39;49m\x1b[1m 97.5 \x1b(B\x1b[m\x1b[39;49mid,\x1b(B\x1b[m\x1b[39;49m\x1b[1m  0.5 \x1b(B\x1b[m\x1b[39;49mwa\x1b[K";

    const TASK: &str = "\x1b(B\x1b[m   1234 postgres  20   0  215432  27540  24120 S  12,5   0.3   0:01.23 postgres\x1b(B\x1b[m\x1b[39;49m\x1b[K";

    #[test]
    fn test_summary_line() {
        assert_eq!(parse_line(SUMMARY).unwrap(), TopLine::GlobalCpu { idle: 97.5 });
    }

    #[test]
    fn test_summary_with_idle_as_eighth_token() {
        let line = format!("{} 10.0 20.0 5.0 2.0 3.0 1.0 58.5 0.5 x", GLOBAL_CPU_PREFIX);
        let TopLine::GlobalCpu { idle } = parse_line(&line).unwrap() else {
            panic!("expected summary line");
        };
        assert_eq!(idle, 58.5);
        assert_eq!(global_cpu_usage(idle, 4), 166.0);
    }

    #[test]
    fn test_task_line_with_comma_decimal() {
        assert_eq!(
            parse_line(TASK).unwrap(),
            TopLine::ProcessCpu {
                pid: 1234,
                percent: 12.5
            }
        );
    }

    #[test]
    fn test_noise_lines() {
        assert_eq!(parse_line("").unwrap(), TopLine::Ignore);
        assert_eq!(parse_line("\x1b[K   ").unwrap(), TopLine::Ignore);
        assert_eq!(
            parse_line("MiB Mem :  15928.2 total,   1024.0 free").unwrap(),
            TopLine::Ignore
        );
        assert_eq!(
            parse_line("top - 10:00:00 up 1 day,  1 user,  load average: 0.10").unwrap(),
            TopLine::Ignore
        );
    }

    #[test]
    fn test_malformed_lines_are_errors() {
        let truncated = format!("{} 10.0 us,", GLOBAL_CPU_PREFIX);
        assert!(parse_line(&truncated).is_err());

        let header = "\x1b(B\x1b[m    PID USER      PR  NI    VIRT    RES    SHR S  %CPU";
        assert!(parse_line(header).is_err());
    }

    #[test]
    fn test_strip_escapes() {
        assert_eq!(
            strip_escapes("\x1b[H\x1b(B\x1b[m\x1b[7m  PID\x1b[K\x1b[J"),
            "  PID"
        );
    }

    #[test]
    fn test_global_cpu_usage_rounding() {
        assert_eq!(global_cpu_usage(100.0, 8), 0.0);
        assert_eq!(global_cpu_usage(97.5, 1), 2.5);
        assert_eq!(global_cpu_usage(66.67, 3), 100.0);
        assert_eq!(global_cpu_usage(87.66, 2), 24.7);
    }
}

//! Small numeric and time helpers shared by the sampler and the exporters.

use chrono::Utc;

/// Current wall-clock time as fractional seconds since the UNIX epoch.
pub fn unix_now() -> f64 {
    let now = Utc::now();
    now.timestamp() as f64 + f64::from(now.timestamp_subsec_micros()) / 1_000_000.0
}

/// Rounds to one decimal place, the precision `top` reports.
pub fn round_tenths(value: f64) -> f64 {
    (value * 10.0).round() / 10.0
}

/// Formats a float the way the log files have always shown numbers:
/// shortest round-trip digits, with integral values keeping a `.0`.
pub fn format_float(value: f64) -> String {
    if value.is_finite() && value.fract() == 0.0 && value.abs() < 1e16 {
        format!("{:.1}", value)
    } else {
        format!("{}", value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_format_float() {
        assert_eq!(format_float(166.0), "166.0");
        assert_eq!(format_float(0.0), "0.0");
        assert_eq!(format_float(12.5), "12.5");
        assert_eq!(format_float(1700000000.25), "1700000000.25");
        assert_eq!(format_float(0.1 + 0.2), "0.30000000000000004");
    }

    #[test]
    fn test_round_tenths() {
        assert_eq!(round_tenths(24.68), 24.7);
        assert_eq!(round_tenths(166.04), 166.0);
        assert_eq!(round_tenths(0.04), 0.0);
    }

    #[test]
    fn test_unix_now_is_recent() {
        // 2020-01-01T00:00:00Z
        assert!(unix_now() > 1_577_836_800.0);
    }
}

//! CSV and JSON renderers for a finished sampling run.
//!
//! Files are written to a temporary sibling and renamed into place, so a
//! failed save never leaves a truncated log behind.

use std::fmt;
use std::io::{self, BufWriter, Write};
use std::path::Path;

use serde::ser::{Serialize, SerializeMap, Serializer};
use tracing::debug;

use super::model::SampleStore;
use crate::util::format_float;

/// On-disk format of the log.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputFormat {
    Csv,
    Json,
}

impl OutputFormat {
    /// `json` (any case) selects JSON; everything else falls back to CSV.
    pub fn from_name(name: &str) -> Self {
        if name.eq_ignore_ascii_case("json") {
            OutputFormat::Json
        } else {
            OutputFormat::Csv
        }
    }
}

impl fmt::Display for OutputFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OutputFormat::Csv => write!(f, "csv"),
            OutputFormat::Json => write!(f, "json"),
        }
    }
}

/// Error type for export failures.
#[derive(Debug)]
pub enum ExportError {
    Io(io::Error),
    Json(serde_json::Error),
}

impl fmt::Display for ExportError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ExportError::Io(e) => write!(f, "I/O error: {}", e),
            ExportError::Json(e) => write!(f, "JSON error: {}", e),
        }
    }
}

impl std::error::Error for ExportError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            ExportError::Io(e) => Some(e),
            ExportError::Json(e) => Some(e),
        }
    }
}

impl From<io::Error> for ExportError {
    fn from(e: io::Error) -> Self {
        ExportError::Io(e)
    }
}

impl From<serde_json::Error> for ExportError {
    fn from(e: serde_json::Error) -> Self {
        ExportError::Json(e)
    }
}

/// Writes the CSV log.
///
/// The header lists PIDs in ascending order; data columns follow `pids` as
/// given. A PID without a sample in an epoch leaves two empty fields.
pub fn write_csv<W: Write>(out: &mut W, store: SampleStore, pids: &[u32]) -> io::Result<()> {
    let mut sorted = pids.to_vec();
    sorted.sort_unstable();

    let mut header = String::from("epoch_time, total_cpu, ");
    for pid in &sorted {
        header.push_str(&format!("{pid}_cpu, {pid}_mem, "));
    }
    header.truncate(header.len() - 2);
    header.push('\n');
    out.write_all(header.as_bytes())?;

    for (_, mut record) in store {
        let mut line = format!("{}, ", format_float(record.timestamp));
        if let Some(total) = record.total_cpu.take() {
            line.push_str(&format_float(total));
        }
        line.push_str(", ");

        for pid in pids {
            match record.processes.remove(pid) {
                Some(sample) => {
                    line.push_str(&format_float(sample.cpu));
                    line.push_str(", ");
                    line.push_str(&format_float(sample.mem));
                    line.push_str(", ");
                }
                None => line.push_str(", , "),
            }
        }
        line.truncate(line.len() - 2);
        line.push('\n');
        out.write_all(line.as_bytes())?;
    }

    Ok(())
}

/// The JSON document: every epoch keyed by its index, then `INTERVAL`.
struct JsonDocument<'a> {
    store: &'a SampleStore,
    interval: f64,
}

impl Serialize for JsonDocument<'_> {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.store.len() + 1))?;
        for (index, record) in self.store.iter() {
            map.serialize_entry(&index.to_string(), record)?;
        }
        map.serialize_entry("INTERVAL", &self.interval)?;
        map.end()
    }
}

/// Writes the JSON log.
pub fn write_json<W: Write>(out: &mut W, store: &SampleStore, interval: f64) -> Result<(), ExportError> {
    serde_json::to_writer(&mut *out, &JsonDocument { store, interval })?;
    Ok(())
}

/// Renders `store` in `format` and atomically replaces the file at `path`.
pub fn save(
    path: &Path,
    format: OutputFormat,
    store: SampleStore,
    pids: &[u32],
    interval: f64,
) -> Result<(), ExportError> {
    let dir = match path.parent() {
        Some(dir) if !dir.as_os_str().is_empty() => dir,
        _ => Path::new("."),
    };
    let tmp = tempfile::NamedTempFile::new_in(dir)?;
    let epochs = store.len();

    {
        let mut out = BufWriter::new(tmp.as_file());
        match format {
            OutputFormat::Csv => write_csv(&mut out, store, pids)?,
            OutputFormat::Json => write_json(&mut out, &store, interval)?,
        }
        out.flush()?;
    }
    tmp.as_file().sync_all()?;
    tmp.persist(path).map_err(|e| ExportError::Io(e.error))?;

    debug!("Wrote {} epochs to {} as {}", epochs, path.display(), format);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::model::{EpochRecord, ProcessSample};
    use tempfile::tempdir;

    fn sample(cpu: f64, mem: f64) -> ProcessSample {
        ProcessSample { cpu, mem }
    }

    /// Epochs {0, 1}, PIDs {100, 200}; PID 200 is gone in epoch 1.
    fn two_epochs() -> SampleStore {
        let mut store = SampleStore::new();

        let mut first = EpochRecord::new(1000.0);
        first.total_cpu = Some(50.5);
        first.processes.insert(100, sample(1.5, 10.0));
        first.processes.insert(200, sample(2.0, 20.25));
        store.insert(0, first);

        let mut second = EpochRecord::new(1001.0);
        second.total_cpu = Some(60.0);
        second.processes.insert(100, sample(3.0, 11.0));
        store.insert(1, second);

        store
    }

    fn csv(store: SampleStore, pids: &[u32]) -> String {
        let mut out = Vec::new();
        write_csv(&mut out, store, pids).unwrap();
        String::from_utf8(out).unwrap()
    }

    #[test]
    fn test_format_names() {
        assert_eq!(OutputFormat::from_name("json"), OutputFormat::Json);
        assert_eq!(OutputFormat::from_name("JSON"), OutputFormat::Json);
        assert_eq!(OutputFormat::from_name("csv"), OutputFormat::Csv);
        assert_eq!(OutputFormat::from_name("xml"), OutputFormat::Csv);
        assert_eq!(OutputFormat::Json.to_string(), "json");
    }

    #[test]
    fn test_csv_missing_process() {
        let text = csv(two_epochs(), &[100, 200]);
        let lines: Vec<&str> = text.lines().collect();

        assert_eq!(lines.len(), 3);
        assert_eq!(lines[0], "epoch_time, total_cpu, 100_cpu, 100_mem, 200_cpu, 200_mem");
        assert_eq!(lines[1], "1000.0, 50.5, 1.5, 10.0, 2.0, 20.25");
        assert_eq!(lines[2], "1001.0, 60.0, 3.0, 11.0, , ");

        let fields: Vec<&str> = lines[2].split(',').map(str::trim).collect();
        assert_eq!(fields.len(), 6);
        assert_eq!(&fields[4..], &["", ""]);
        assert!(text.ends_with('\n'));
    }

    #[test]
    fn test_csv_header_sorted_rows_in_argument_order() {
        let text = csv(two_epochs(), &[200, 100]);
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(lines[0], "epoch_time, total_cpu, 100_cpu, 100_mem, 200_cpu, 200_mem");
        assert_eq!(lines[1], "1000.0, 50.5, 2.0, 20.25, 1.5, 10.0");
    }

    #[test]
    fn test_csv_empty_store_is_header_only() {
        let text = csv(SampleStore::new(), &[7]);
        assert_eq!(text, "epoch_time, total_cpu, 7_cpu, 7_mem\n");
    }

    #[test]
    fn test_csv_numeric_epoch_order_and_missing_total() {
        let mut store = SampleStore::new();
        store.insert(10, EpochRecord::new(10.0));
        store.insert(2, EpochRecord::new(2.0));
        let text = csv(store, &[1]);
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(lines[1], "2.0, , , ");
        assert_eq!(lines[2], "10.0, , , ");
    }

    #[test]
    fn test_json_document() {
        let mut out = Vec::new();
        write_json(&mut out, &two_epochs(), 0.5).unwrap();
        let value: serde_json::Value = serde_json::from_slice(&out).unwrap();

        assert_eq!(value["INTERVAL"], 0.5);
        assert_eq!(value["0"]["LAG-COMPENSATION"], false);
        assert_eq!(value["0"]["TOTAL"]["CPU"], 50.5);
        assert_eq!(value["0"]["200"]["MEM"], 20.25);
        assert!(value["1"].get("200").is_none());

        for key in value.as_object().unwrap().keys() {
            assert!(key == "INTERVAL" || key.parse::<u64>().is_ok(), "bad key {key}");
        }
    }

    #[test]
    fn test_json_empty_store() {
        let mut out = Vec::new();
        write_json(&mut out, &SampleStore::new(), 2.0).unwrap();
        assert_eq!(String::from_utf8(out).unwrap(), r#"{"INTERVAL":2.0}"#);
    }

    #[test]
    fn test_save_replaces_file() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("log.csv");
        std::fs::write(&path, "old contents").unwrap();

        save(&path, OutputFormat::Csv, two_epochs(), &[100, 200], 1.0).unwrap();
        let text = std::fs::read_to_string(&path).unwrap();
        assert!(text.starts_with("epoch_time, total_cpu, 100_cpu"));
        assert_eq!(text.lines().count(), 3);

        // Only the log itself is left in the directory.
        assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 1);
    }

    #[test]
    fn test_save_json() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("log.json");
        save(&path, OutputFormat::Json, two_epochs(), &[100, 200], 1.0).unwrap();
        let value: serde_json::Value =
            serde_json::from_str(&std::fs::read_to_string(&path).unwrap()).unwrap();
        assert_eq!(value["INTERVAL"], 1.0);
        assert_eq!(value.as_object().unwrap().len(), 3);
    }

    #[test]
    fn test_save_into_missing_directory_fails() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("missing").join("log.csv");
        let result = save(&path, OutputFormat::Csv, SampleStore::new(), &[1], 1.0);
        assert!(matches!(result, Err(ExportError::Io(_))));
    }
}

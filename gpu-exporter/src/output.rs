//! Snapshot output for stdout mode.

use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

use sysinfo::System;

use crate::error::OutputError;
use crate::metrics::TelemetrySnapshot;

pub fn print_snapshot(snapshot: &TelemetrySnapshot) -> Result<(), OutputError> {
    let json_data = serde_json::to_string_pretty(snapshot)?;
    let mut stdout = std::io::stdout().lock();
    writeln!(stdout, "{}", json_data)?;
    Ok(())
}

/// Writes `snapshot_<hostname>_<timestamp>.json` into `output_folder`.
pub fn save_snapshot(snapshot: &TelemetrySnapshot, output_folder: &Path) -> Result<PathBuf, OutputError> {
    fs::create_dir_all(output_folder)?;

    let hostname = System::host_name().unwrap_or_else(|| "unknown".to_string());
    let filepath = output_folder.join(snapshot_file_name(&hostname, snapshot.captured_at_unix_seconds));

    let json_data = serde_json::to_string_pretty(snapshot)?;
    let mut file = fs::File::create(&filepath)?;
    file.write_all(json_data.as_bytes())?;

    Ok(filepath)
}

fn snapshot_file_name(hostname: &str, timestamp: i64) -> String {
    format!("snapshot_{}_{}.json", hostname, timestamp)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_snapshot_file_name() {
        assert_eq!(snapshot_file_name("node-1", 1700000000), "snapshot_node-1_1700000000.json");
    }

    #[test]
    fn test_save_snapshot() {
        let dir = std::env::temp_dir().join(format!("gpu-exporter-test-{}", std::process::id()));
        let snapshot = TelemetrySnapshot {
            captured_at_unix_seconds: 1234,
            readings: Vec::new(),
        };

        let path = save_snapshot(&snapshot, &dir).unwrap();
        let written: serde_json::Value = serde_json::from_str(&fs::read_to_string(&path).unwrap()).unwrap();
        assert_eq!(written["captured_at_unix_seconds"], 1234);
        assert!(path.file_name().unwrap().to_str().unwrap().ends_with("_1234.json"));

        fs::remove_dir_all(&dir).unwrap();
    }
}

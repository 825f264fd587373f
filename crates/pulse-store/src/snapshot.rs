// Copyright 2025-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Snapshot file format: one self-describing metric record per line, the
//! same JSON shape as the wire payload. Saves go through a temporary file
//! and an atomic rename so a kill mid-save never leaves a half-written
//! snapshot behind.

use pulse_core::{Metric, RelayError};
use std::collections::HashMap;
use std::fs;
use std::io::Write;
use std::path::Path;
use tempfile::NamedTempFile;

/// Serializes both mappings and atomically replaces the file at `path`.
pub fn save(
    path: &Path,
    counters: &HashMap<String, i64>,
    gauges: &HashMap<String, f64>,
) -> Result<(), RelayError> {
    let dir = match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent,
        _ => Path::new("."),
    };

    let mut file = NamedTempFile::new_in(dir)
        .map_err(|e| RelayError::Payload(format!("snapshot temp file: {e}")))?;

    for (name, value) in gauges {
        let line = serde_json::to_string(&Metric::gauge(name.clone(), *value))
            .map_err(RelayError::payload)?;
        writeln!(file, "{line}").map_err(|e| RelayError::Payload(format!("snapshot write: {e}")))?;
    }
    for (name, delta) in counters {
        let line = serde_json::to_string(&Metric::counter(name.clone(), *delta))
            .map_err(RelayError::payload)?;
        writeln!(file, "{line}").map_err(|e| RelayError::Payload(format!("snapshot write: {e}")))?;
    }

    file.persist(path)
        .map_err(|e| RelayError::Payload(format!("snapshot rename: {e}")))?;
    Ok(())
}

/// Reads the snapshot fully. A missing file is created empty rather than
/// treated as an error, matching restore-at-boot semantics.
pub fn load(path: &Path) -> Result<Vec<Metric>, RelayError> {
    if !path.exists() {
        fs::File::create(path)
            .map_err(|e| RelayError::Payload(format!("snapshot create: {e}")))?;
        return Ok(Vec::new());
    }

    let contents =
        fs::read_to_string(path).map_err(|e| RelayError::Payload(format!("snapshot read: {e}")))?;

    let mut metrics = Vec::new();
    for line in contents.lines() {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        let metric: Metric = serde_json::from_str(line)
            .map_err(|e| RelayError::Payload(format!("snapshot record: {e}")))?;
        metric.validate()?;
        metrics.push(metric);
    }
    Ok(metrics)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn save_then_load_round_trips() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("metrics.snapshot");

        let counters = HashMap::from([("PollCount".to_string(), 42i64)]);
        let gauges = HashMap::from([
            ("Alloc".to_string(), 1024.0),
            ("BuckHashSys".to_string(), 0.2),
        ]);

        save(&path, &counters, &gauges).unwrap();
        let metrics = load(&path).unwrap();

        assert_eq!(metrics.len(), 3);
        let poll = metrics.iter().find(|m| m.id == "PollCount").unwrap();
        assert_eq!(poll.delta, Some(42));
        let buck = metrics.iter().find(|m| m.id == "BuckHashSys").unwrap();
        assert_eq!(buck.value, Some(0.2));
    }

    #[test]
    fn missing_file_is_created_empty() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("absent.snapshot");

        let metrics = load(&path).unwrap();
        assert!(metrics.is_empty());
        assert!(path.exists());
    }

    #[test]
    fn save_replaces_previous_contents_wholesale() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("metrics.snapshot");

        let mut counters = HashMap::from([("PollCount".to_string(), 1i64)]);
        save(&path, &counters, &HashMap::new()).unwrap();

        counters.insert("PollCount".to_string(), 7);
        save(&path, &counters, &HashMap::new()).unwrap();

        let metrics = load(&path).unwrap();
        assert_eq!(metrics.len(), 1);
        assert_eq!(metrics[0].delta, Some(7));
    }

    #[test]
    fn corrupt_record_is_a_payload_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("metrics.snapshot");
        fs::write(&path, "{\"id\":\"x\",\"type\":\"counter\",\"delta\":1}\nnot json\n").unwrap();

        assert!(matches!(load(&path), Err(RelayError::Payload(_))));
    }
}

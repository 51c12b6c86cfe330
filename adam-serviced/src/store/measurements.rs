//! Shared measurement store.
//!
//! Every submission is a read-modify-write of one JSON file per target
//! directory. The first submission fixes the store's frequency axis; later
//! channel data is stored as levels only and indexes against that axis.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use serde::Serialize;
use thiserror::Error;
use shared::types::{iso_now, MeasurementRecord, MeasurementStore};
use crate::config::BaseDirMode;
use super::paths::resolve_json_directory;

#[derive(Debug, Error)]
pub enum AggregationError {
    #[error("No frequency vector found in first measurement")]
    NoFrequencyVector,

    #[error("{path}: {source}")]
    Storage {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("{path}: invalid measurement store: {source}")]
    Corrupt {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
}

/// Result of one accepted submission
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SubmissionSummary {
    pub measurement_id: String,
    pub measurement_count: usize,
    pub frequency_points: usize,
    pub json_file: PathBuf,
}

#[derive(Debug, Clone)]
pub struct MeasurementAggregator {
    base_dir: PathBuf,
    base_dir_mode: BaseDirMode,
    file_name: String,
}

impl MeasurementAggregator {
    pub fn new(base_dir: PathBuf, base_dir_mode: BaseDirMode, file_name: impl Into<String>) -> Self {
        Self {
            base_dir,
            base_dir_mode,
            file_name: file_name.into(),
        }
    }

    pub fn base_dir(&self) -> &Path {
        &self.base_dir
    }

    pub fn base_dir_mode(&self) -> BaseDirMode {
        self.base_dir_mode
    }

    /// Store file for a workstation-supplied directory name
    pub fn store_path(&self, requested_dir: &str) -> PathBuf {
        resolve_json_directory(requested_dir, &self.base_dir).join(&self.file_name)
    }

    /// Add one measurement, keyed by serial number and the current Unix second
    pub fn add_measurement(
        &self,
        requested_dir: &str,
        record: MeasurementRecord,
    ) -> Result<SubmissionSummary, AggregationError> {
        self.add_measurement_at(requested_dir, record, chrono::Utc::now().timestamp())
    }

    pub fn add_measurement_at(
        &self,
        requested_dir: &str,
        mut record: MeasurementRecord,
        unix_time: i64,
    ) -> Result<SubmissionSummary, AggregationError> {
        let json_file = self.store_path(requested_dir);
        if let Some(dir) = json_file.parent() {
            fs::create_dir_all(dir).map_err(|source| AggregationError::Storage {
                path: dir.to_path_buf(),
                source,
            })?;
        }

        let mut store = load_store(&json_file)?;
        apply_frequency_axis(&mut store, &mut record)?;

        let device_serial = record.device_serial.as_deref().unwrap_or("UNKNOWN");
        let measurement_id = format!("{}_{}", device_serial, unix_time);

        if store.measurements.contains_key(&measurement_id) {
            tracing::warn!("Measurement {} already exists and is overwritten", measurement_id);
        }
        store.measurements.insert(measurement_id.clone(), record);
        store.metadata.last_updated = iso_now();
        store.metadata.total_measurements = store.measurements.len();

        save_store(&json_file, &store)?;

        let summary = SubmissionSummary {
            measurement_id,
            measurement_count: store.measurements.len(),
            frequency_points: store.frequency_vector.as_ref().map_or(0, Vec::len),
            json_file,
        };
        tracing::info!(
            "Stored measurement {} ({} total) in {}",
            summary.measurement_id,
            summary.measurement_count,
            summary.json_file.display()
        );
        Ok(summary)
    }
}

/// Load a store, or start an empty one if the file does not exist yet
pub fn load_store(path: &Path) -> Result<MeasurementStore, AggregationError> {
    match fs::read_to_string(path) {
        Ok(contents) => serde_json::from_str(&contents).map_err(|source| AggregationError::Corrupt {
            path: path.to_path_buf(),
            source,
        }),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(MeasurementStore::default()),
        Err(source) => Err(AggregationError::Storage {
            path: path.to_path_buf(),
            source,
        }),
    }
}

/// Whole-file overwrite, two-space indented
pub fn save_store(path: &Path, store: &MeasurementStore) -> Result<(), AggregationError> {
    let json = serde_json::to_string_pretty(store).map_err(|source| AggregationError::Corrupt {
        path: path.to_path_buf(),
        source,
    })?;
    fs::write(path, json).map_err(|source| AggregationError::Storage {
        path: path.to_path_buf(),
        source,
    })
}

/// Adopt the store's axis from `record` if it has none, otherwise check the
/// record's axes against it. Either way every channel leaves with its
/// frequencies stripped and `data_points` recounted from its levels.
pub fn apply_frequency_axis(
    store: &mut MeasurementStore,
    record: &mut MeasurementRecord,
) -> Result<(), AggregationError> {
    if let Some(axis) = &store.frequency_vector {
        for (name, ch) in &record.channels {
            let Some(incoming) = ch.frequencies.as_ref().filter(|f| !f.is_empty()) else {
                continue;
            };
            if incoming.len() != axis.len() {
                tracing::warn!(
                    "Incoming frequency length mismatch (ch={} expected={} got={}), ignoring incoming frequencies",
                    name,
                    axis.len(),
                    incoming.len()
                );
            } else if !spot_check(axis, incoming) {
                tracing::warn!(
                    "Incoming frequency values differ (ch={}), ignoring incoming frequencies",
                    name
                );
            }
        }
    } else {
        let (channel, axis) = record
            .channels
            .iter()
            .find_map(|(name, ch)| {
                ch.frequencies
                    .as_ref()
                    .filter(|f| !f.is_empty())
                    .map(|f| (name.clone(), f.clone()))
            })
            .ok_or(AggregationError::NoFrequencyVector)?;

        tracing::info!(
            "Global frequency vector adopted from channel {} ({} points)",
            channel,
            axis.len()
        );
        store.metadata.frequency_points = Some(axis.len());
        store.frequency_vector = Some(axis);
    }

    for ch in record.channels.values_mut() {
        ch.frequencies = None;
        if let Some(levels) = &ch.levels {
            ch.data_points = Some(levels.len());
        }
    }

    Ok(())
}

/// Exact comparison at first, middle and last position; lengths must already match
fn spot_check(axis: &[f64], incoming: &[f64]) -> bool {
    let mid = axis.len() / 2;
    let last = axis.len() - 1;
    axis[0] == incoming[0] && axis[mid] == incoming[mid] && axis[last] == incoming[last]
}

#[cfg(test)]
mod tests {
    use super::*;
    use shared::types::ChannelData;

    fn channel(frequencies: Option<Vec<f64>>, levels: Vec<f64>) -> ChannelData {
        ChannelData {
            frequencies,
            levels: Some(levels),
            unit: Some("dBSPL".to_string()),
            data_points: None,
            ..Default::default()
        }
    }

    fn record(serial: &str, channels: Vec<(&str, ChannelData)>) -> MeasurementRecord {
        MeasurementRecord {
            device_serial: Some(serial.to_string()),
            timestamp: Some("2025-10-20T10:00:00".to_string()),
            workstation_id: Some("WS-01".to_string()),
            measurement_file: Some("sweep.csv".to_string()),
            channels: channels
                .into_iter()
                .map(|(name, ch)| (name.to_string(), ch))
                .collect(),
            ..Default::default()
        }
    }

    fn aggregator(dir: &Path) -> MeasurementAggregator {
        MeasurementAggregator::new(dir.to_path_buf(), BaseDirMode::Config, "all_measurements.json")
    }

    #[test]
    fn test_first_submission_fixes_axis() {
        let dir = tempfile::tempdir().unwrap();
        let agg = aggregator(dir.path());

        let r1 = record(
            "SN1",
            vec![
                ("Ch1", channel(None, vec![80.0, 81.0, 82.0])),
                ("Ch2", channel(Some(vec![100.0, 200.0, 300.0]), vec![70.0, 71.0, 72.0])),
            ],
        );
        let summary = agg.add_measurement_at("measurements", r1, 1_700_000_000).unwrap();

        assert_eq!(summary.measurement_id, "SN1_1700000000");
        assert_eq!(summary.measurement_count, 1);
        assert_eq!(summary.frequency_points, 3);
        assert_eq!(summary.json_file, dir.path().join("measurements/all_measurements.json"));

        let store = load_store(&summary.json_file).unwrap();
        assert_eq!(store.frequency_vector, Some(vec![100.0, 200.0, 300.0]));
        assert_eq!(store.metadata.frequency_points, Some(3));
        assert_eq!(store.metadata.total_measurements, 1);
        let stored = &store.measurements["SN1_1700000000"].channels["Ch2"];
        assert!(stored.frequencies.is_none());
        assert_eq!(stored.data_points, Some(3));
    }

    #[test]
    fn test_mismatching_axis_is_discarded_not_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let agg = aggregator(dir.path());

        let r1 = record("SN1", vec![("Ch1", channel(Some(vec![100.0, 200.0, 300.0]), vec![1.0, 2.0, 3.0]))]);
        agg.add_measurement_at("line", r1, 10).unwrap();

        let r2 = record(
            "SN2",
            vec![("Ch1", channel(Some(vec![100.0, 200.0, 300.0, 400.0]), vec![4.0, 5.0, 6.0, 7.0]))],
        );
        let summary = agg.add_measurement_at("line", r2, 11).unwrap();
        assert_eq!(summary.measurement_count, 2);
        assert_eq!(summary.frequency_points, 3);

        let store = load_store(&summary.json_file).unwrap();
        assert_eq!(store.frequency_vector, Some(vec![100.0, 200.0, 300.0]));
        let stored = &store.measurements["SN2_11"].channels["Ch1"];
        assert!(stored.frequencies.is_none());
        assert_eq!(stored.levels, Some(vec![4.0, 5.0, 6.0, 7.0]));
        assert_eq!(stored.data_points, Some(4));
    }

    #[test]
    fn test_spot_check_only_looks_at_three_points() {
        let axis = [100.0, 150.0, 200.0, 250.0, 300.0];
        assert!(spot_check(&axis, &[100.0, 999.0, 200.0, 999.0, 300.0]));
        assert!(!spot_check(&axis, &[100.0, 150.0, 201.0, 250.0, 300.0]));
        assert!(!spot_check(&axis, &[100.0, 150.0, 200.0, 250.0, 300.5]));
    }

    #[test]
    fn test_first_submission_without_axis_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let agg = aggregator(dir.path());

        let r1 = record(
            "SN1",
            vec![("Ch1", channel(Some(vec![]), vec![1.0])), ("Ch2", channel(None, vec![2.0]))],
        );
        let err = agg.add_measurement_at("measurements", r1, 1).unwrap_err();
        assert!(matches!(err, AggregationError::NoFrequencyVector));
        assert_eq!(err.to_string(), "No frequency vector found in first measurement");
        assert!(!agg.store_path("measurements").exists());
    }

    #[test]
    fn test_same_second_resubmission_overwrites() {
        let dir = tempfile::tempdir().unwrap();
        let agg = aggregator(dir.path());

        let first = record("SN1", vec![("Ch1", channel(Some(vec![1.0, 2.0]), vec![10.0, 11.0]))]);
        let second = record("SN1", vec![("Ch1", channel(None, vec![20.0, 21.0]))]);
        agg.add_measurement_at("m", first, 5).unwrap();
        let summary = agg.add_measurement_at("m", second, 5).unwrap();

        assert_eq!(summary.measurement_count, 1);
        let store = load_store(&summary.json_file).unwrap();
        assert_eq!(store.measurements["SN1_5"].channels["Ch1"].levels, Some(vec![20.0, 21.0]));
    }

    #[test]
    fn test_escaping_directory_stays_under_base() {
        let dir = tempfile::tempdir().unwrap();
        let agg = aggregator(dir.path());

        let r1 = record("SN1", vec![("Ch1", channel(Some(vec![1.0]), vec![1.0]))]);
        let summary = agg.add_measurement_at("../../outside", r1, 1).unwrap();
        assert_eq!(summary.json_file, dir.path().join("outside/all_measurements.json"));
    }

    #[test]
    fn test_corrupt_store_is_reported() {
        let dir = tempfile::tempdir().unwrap();
        let agg = aggregator(dir.path());
        let path = agg.store_path("m");
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(&path, "{ not json").unwrap();

        let r1 = record("SN1", vec![("Ch1", channel(Some(vec![1.0]), vec![1.0]))]);
        let err = agg.add_measurement_at("m", r1, 1).unwrap_err();
        assert!(matches!(err, AggregationError::Corrupt { .. }));
    }
}

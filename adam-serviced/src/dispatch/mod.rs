//! Maps decoded requests onto handlers. Every failure is turned into a
//! reply here; nothing a handler does can reach the connection loop.

pub mod command;

use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use serde_json::{json, Value};
use thiserror::Error;
use shared::codec::Reply;
use crate::biquad;
use crate::config::BaseDirMode;
use crate::helpers;
use crate::instrument::{InstrumentError, InstrumentSupervisor};
use crate::store_manager::StoreHandle;
use command::{action_name, wants_response, Command, ReplyStyle, Request, TaskLog};

#[derive(Debug, Error)]
pub enum DispatchError {
    #[error("Invalid command format.")]
    InvalidFormat,

    #[error("Unknown action.")]
    UnknownAction(String),

    #[error("{reason}")]
    InvalidArgument { field: &'static str, reason: String },

    #[error("{0}")]
    HandlerFailed(String),
}

impl DispatchError {
    /// Shape the error the way clients of `style` expect it
    pub fn into_reply(self, style: ReplyStyle) -> Reply {
        match style {
            ReplyStyle::Text => Reply::Text(format!("Error: {}", self)),
            ReplyStyle::Json => Reply::Json(json!({ "error": self.to_string() })),
        }
    }
}

impl From<InstrumentError> for DispatchError {
    fn from(e: InstrumentError) -> Self {
        DispatchError::HandlerFailed(e.to_string())
    }
}

/// What to do with one request once it has been handled
#[derive(Debug, Clone, PartialEq)]
pub struct Outcome {
    pub action: Option<String>,
    pub reply: Reply,
    pub wait_for_response: bool,
}

/// Where measurement stores live, echoed back in submission summaries
#[derive(Debug, Clone)]
pub struct StorageInfo {
    pub base_dir: PathBuf,
    pub mode: BaseDirMode,
}

#[derive(Clone)]
pub struct Dispatcher {
    store: StoreHandle,
    instrument: Arc<Mutex<InstrumentSupervisor>>,
    storage: Arc<StorageInfo>,
}

impl Dispatcher {
    pub fn new(store: StoreHandle, instrument: InstrumentSupervisor, storage: StorageInfo) -> Self {
        Self {
            store,
            instrument: Arc::new(Mutex::new(instrument)),
            storage: Arc::new(storage),
        }
    }

    /// Decode, run and shape the reply for one request document
    pub async fn handle(&self, document: &Value) -> Outcome {
        let action = action_name(document).map(str::to_string);
        let style = action.as_deref().map_or(ReplyStyle::Text, ReplyStyle::for_action);
        let wait_for_response = wants_response(document);

        let result = match Request::parse(document) {
            Ok(request) => self.dispatch(request.command).await,
            Err(e) => Err(e),
        };

        let reply = result.unwrap_or_else(|e| {
            match &e {
                DispatchError::UnknownAction(name) => tracing::error!("Unknown action: {}", name),
                other => tracing::error!(
                    "Error processing action '{}': {}",
                    action.as_deref().unwrap_or("unknown"),
                    other
                ),
            }
            e.into_reply(style)
        });

        Outcome {
            action,
            reply,
            wait_for_response,
        }
    }

    pub async fn dispatch(&self, command: Command) -> Result<Reply, DispatchError> {
        match command {
            Command::GenerateTimestampExtension => {
                Ok(Reply::Text(helpers::timestamp_extension(chrono::Local::now())))
            }
            Command::GetTimestampSubpath => {
                Ok(Reply::Text(helpers::timestamp_subpath(chrono::Local::now())))
            }
            Command::ConstructPath { paths } => {
                tracing::info!("Constructing path from: {:?}", paths);
                Ok(Reply::Text(helpers::construct_path(&paths)))
            }
            Command::GenerateFilePrefix { strings } => {
                tracing::info!("Generating file prefix from: {:?}", strings);
                Ok(Reply::Text(helpers::file_prefix(&strings)))
            }
            Command::GetBiquadCoefficients(params) => {
                let coefficients = biquad::compute(&params).map_err(|e| {
                    DispatchError::HandlerFailed(format!(
                        "Failed to generate biquad coefficients ({})",
                        e
                    ))
                })?;
                let wire = coefficients.to_wire();
                tracing::info!("Biquad coefficients generated: {:?}", wire);
                Ok(Reply::Json(json!(wire)))
            }
            Command::CheckMeasurementTrials { serial_number, ledger_path, max_trials } => {
                tracing::info!(
                    "Checking measurement trials for serial: {}, file: {}, max: {}",
                    serial_number,
                    ledger_path.display(),
                    max_trials
                );
                let check = self
                    .store
                    .check_trials(serial_number.clone(), ledger_path, max_trials)
                    .await
                    .map_err(handler_failed)?;
                let message = check.message(&serial_number);
                tracing::info!(
                    "{} (serial={}, failed_count={}, max={})",
                    message,
                    serial_number,
                    check.failed_count,
                    max_trials
                );
                Ok(Reply::Text(message))
            }
            Command::RecordTrialResult { ledger_path, entry } => {
                let reply = json!({
                    "status": "recorded",
                    "serial_number": entry.serial_number,
                    "result": entry.status,
                    "csv_path": ledger_path.to_string_lossy(),
                });
                self.store
                    .record_trial(ledger_path, entry)
                    .await
                    .map_err(handler_failed)?;
                Ok(Reply::Json(reply))
            }
            Command::LogWorkstationTask(log) => Ok(Reply::Json(log_task(log))),
            Command::AddMeasurement { json_directory, record } => {
                let summary = self
                    .store
                    .add_measurement(json_directory, record)
                    .await
                    .map_err(handler_failed)?
                    .map_err(|e| {
                        tracing::error!("Error adding measurement: {}", e);
                        DispatchError::HandlerFailed(e.to_string())
                    })?;
                Ok(Reply::Json(json!({
                    "status": "success",
                    "measurement_id": summary.measurement_id,
                    "measurement_count": summary.measurement_count,
                    "frequency_points": summary.frequency_points,
                    "json_file": summary.json_file.to_string_lossy(),
                    "base_dir_mode": self.storage.mode.as_str(),
                    "base_dir": self.storage.base_dir.to_string_lossy(),
                })))
            }
            Command::WakeUp => self.with_instrument(|i| i.wake_up()).await,
            Command::SetAverage { averages } => {
                tracing::info!("Setting averages to: {}", averages);
                self.with_instrument(move |i| i.set_average(averages)).await
            }
            Command::ActivateMeasurement { measurement_name } => {
                self.with_instrument(move |i| i.activate_measurement(&measurement_name))
                    .await
            }
        }
    }

    /// Analyzer calls block; run them off the runtime, one at a time
    async fn with_instrument<F>(&self, f: F) -> Result<Reply, DispatchError>
    where
        F: FnOnce(&mut InstrumentSupervisor) -> Result<String, InstrumentError> + Send + 'static,
    {
        let instrument = self.instrument.clone();
        let text = tokio::task::spawn_blocking(move || {
            let mut supervisor = instrument
                .lock()
                .map_err(|_| DispatchError::HandlerFailed("analyzer lock poisoned".to_string()))?;
            f(&mut *supervisor).map_err(DispatchError::from)
        })
        .await
        .map_err(|e| DispatchError::HandlerFailed(format!("analyzer task failed: {}", e)))??;
        Ok(Reply::Text(text))
    }
}

fn handler_failed(e: anyhow::Error) -> DispatchError {
    DispatchError::HandlerFailed(format!("{:#}", e))
}

fn log_task(log: TaskLog) -> Value {
    tracing::info!(
        "WORKSTATION[{}] {}.{} result={} at {} - Data: {}",
        log.workstation_id,
        log.task_type.to_uppercase(),
        log.operation,
        log.result,
        log.timestamp,
        log.task_data
    );
    json!({
        "status": "logged",
        "task_type": log.task_type,
        "operation": log.operation,
        "result": log.result,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::instrument::DetachedInstrument;
    use crate::store::measurements::MeasurementAggregator;
    use tempfile::TempDir;

    fn dispatcher() -> (Dispatcher, TempDir) {
        let dir = tempfile::tempdir().unwrap();
        let aggregator = MeasurementAggregator::new(
            dir.path().to_path_buf(),
            BaseDirMode::Config,
            "all_measurements.json",
        );
        let dispatcher = Dispatcher::new(
            StoreHandle::spawn(aggregator),
            InstrumentSupervisor::new(DetachedInstrument),
            StorageInfo {
                base_dir: dir.path().to_path_buf(),
                mode: BaseDirMode::Config,
            },
        );
        (dispatcher, dir)
    }

    #[tokio::test]
    async fn test_format_errors_are_text() {
        let (d, _dir) = dispatcher();

        let outcome = d.handle(&json!("just a string")).await;
        assert_eq!(outcome.reply, Reply::text("Error: Invalid command format."));
        assert!(outcome.wait_for_response);

        let outcome = d.handle(&json!({"action": "reboot"})).await;
        assert_eq!(outcome.reply, Reply::text("Error: Unknown action."));

        let outcome = d.handle(&json!({"action": "construct_path", "paths": "a/b"})).await;
        assert_eq!(
            outcome.reply,
            Reply::text("Error: 'paths' must be a non-empty list of strings.")
        );
    }

    #[tokio::test]
    async fn test_helpers_reply_with_text() {
        let (d, _dir) = dispatcher();

        let outcome = d
            .handle(&json!({"action": "generate_file_prefix", "strings": ["SN1", "A7V"]}))
            .await;
        assert_eq!(outcome.reply, Reply::text("SN1_A7V"));
        assert_eq!(outcome.action.as_deref(), Some("generate_file_prefix"));

        let outcome = d.handle(&json!({"action": "generate_timestamp_extension"})).await;
        let Reply::Text(ext) = outcome.reply else { panic!("expected text") };
        assert_eq!(ext.len(), "2025_01_01_00_00_00".len());
    }

    #[tokio::test]
    async fn test_biquad_reply_is_json_array() {
        let (d, _dir) = dispatcher();
        let outcome = d
            .handle(&json!({
                "action": "get_biquad_coefficients",
                "filter_type": "bell",
                "gain": 3.0,
                "peak_freq": 1000,
                "Q": 1.4,
                "sample_rate": 48000
            }))
            .await;
        let coefficients = outcome.reply.as_json().and_then(Value::as_array).unwrap();
        assert_eq!(coefficients.len(), 5);

        let outcome = d
            .handle(&json!({"action": "get_biquad_coefficients", "filter_type": "comb"}))
            .await;
        assert_eq!(
            outcome.reply,
            Reply::text("Error: Failed to generate biquad coefficients (unknown filter type 'comb')")
        );
    }

    #[tokio::test]
    async fn test_add_measurement_replies_json() {
        let (d, dir) = dispatcher();

        let outcome = d
            .handle(&json!({
                "action": "add_measurement",
                "json_directory": "line1",
                "measurement_data": {
                    "device_serial": "SN42",
                    "channels": {"Ch1": {"frequencies": [20.0, 40.0], "levels": [1.0, 2.0], "unit": "dB"}}
                }
            }))
            .await;
        let reply = outcome.reply.as_json().unwrap();
        assert_eq!(reply["status"], "success");
        assert_eq!(reply["measurement_count"], 1);
        assert_eq!(reply["frequency_points"], 2);
        assert_eq!(reply["base_dir_mode"], "config");
        assert!(reply["measurement_id"].as_str().unwrap().starts_with("SN42_"));
        assert!(dir.path().join("line1/all_measurements.json").exists());

        let outcome = d
            .handle(&json!({
                "action": "add_measurement",
                "json_directory": "line2",
                "measurement_data": {"device_serial": "SN43", "channels": {"Ch1": {"levels": [1.0]}}}
            }))
            .await;
        assert_eq!(
            outcome.reply,
            Reply::Json(json!({"error": "No frequency vector found in first measurement"}))
        );

        let outcome = d.handle(&json!({"action": "add_measurement"})).await;
        assert_eq!(outcome.reply, Reply::Json(json!({"error": "No measurement_data provided"})));
    }

    #[tokio::test]
    async fn test_trial_check_and_record() {
        let (d, dir) = dispatcher();
        let csv_path = dir.path().join("ledger").join("trials.csv");
        let check = json!({
            "action": "check_measurement_trials",
            "serial_number": "SN5",
            "csv_path": csv_path,
            "max_trials": 1
        });

        assert_eq!(d.handle(&check).await.reply, Reply::text("Measurement permitted."));

        let outcome = d
            .handle(&json!({
                "action": "record_trial_result",
                "serial_number": "SN5",
                "csv_path": csv_path,
                "status": "Failed"
            }))
            .await;
        assert_eq!(outcome.reply.as_json().unwrap()["status"], "recorded");

        assert_eq!(
            d.handle(&check).await.reply,
            Reply::text("Maximum number of permitted failed measurements reached for serial number SN5.")
        );
    }

    #[tokio::test]
    async fn test_log_task_and_silent_requests() {
        let (d, _dir) = dispatcher();
        let outcome = d
            .handle(&json!({
                "action": "log_workstation_task",
                "workstation_id": "WS-3",
                "task_type": "scanner",
                "operation": "scan_serial",
                "result": "SN77",
                "wait_for_response": false
            }))
            .await;
        assert!(!outcome.wait_for_response);
        assert_eq!(
            outcome.reply,
            Reply::Json(json!({
                "status": "logged",
                "task_type": "scanner",
                "operation": "scan_serial",
                "result": "SN77"
            }))
        );
    }

    #[tokio::test]
    async fn test_instrument_failure_is_text_error() {
        let (d, _dir) = dispatcher();
        let outcome = d.handle(&json!({"action": "set_average", "averages": 4})).await;
        assert_eq!(
            outcome.reply,
            Reply::text("Error: analyzer unavailable: no measurement application on this host")
        );

        let outcome = d.handle(&json!({"action": "set_average", "averages": -1})).await;
        assert_eq!(outcome.reply, Reply::text("Error: 'averages' must be a positive integer."));
    }
}

use std::path::PathBuf;
use serde_json::{Map, Value};
use shared::protocol::{actions, DEFAULT_MEASUREMENT_DIR, FIELD_ACTION, FIELD_WAIT_FOR_RESPONSE};
use shared::types::MeasurementRecord;
use crate::biquad::{BiquadParams, FilterType};
use crate::store::ledger::TrialEntry;
use super::DispatchError;

const UNKNOWN: &str = "UNKNOWN";

/// One decoded request. Every action the service knows has a variant;
/// field validation happens while decoding.
#[derive(Debug, Clone, PartialEq)]
pub enum Command {
    GenerateTimestampExtension,
    GetTimestampSubpath,
    ConstructPath { paths: Vec<String> },
    GenerateFilePrefix { strings: Vec<String> },
    GetBiquadCoefficients(BiquadParams),
    CheckMeasurementTrials {
        serial_number: String,
        ledger_path: PathBuf,
        max_trials: u64,
    },
    RecordTrialResult {
        ledger_path: PathBuf,
        entry: TrialEntry,
    },
    LogWorkstationTask(TaskLog),
    AddMeasurement {
        json_directory: String,
        record: MeasurementRecord,
    },
    WakeUp,
    SetAverage { averages: u32 },
    ActivateMeasurement { measurement_name: String },
}

/// A workstation hardware event, logged and acknowledged
#[derive(Debug, Clone, PartialEq)]
pub struct TaskLog {
    pub workstation_id: String,
    pub task_type: String,
    pub operation: String,
    pub result: Value,
    pub timestamp: String,
    pub task_data: Value,
}

/// How a command's reply and errors are shaped on the wire
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReplyStyle {
    /// Bare text, errors as `Error: <message>`
    Text,
    /// JSON object, errors as `{"error": <message>}`
    Json,
}

impl ReplyStyle {
    pub fn for_action(action: &str) -> Self {
        match action {
            actions::ADD_MEASUREMENT | actions::LOG_WORKSTATION_TASK => ReplyStyle::Json,
            _ => ReplyStyle::Text,
        }
    }
}

/// A command plus its delivery options
#[derive(Debug, Clone, PartialEq)]
pub struct Request {
    pub action: String,
    pub command: Command,
    pub wait_for_response: bool,
}

/// Name of the requested action, if the document has one
pub fn action_name(document: &Value) -> Option<&str> {
    document.get(FIELD_ACTION).and_then(Value::as_str)
}

/// Reply wanted unless the client sent a falsy `wait_for_response`
pub fn wants_response(document: &Value) -> bool {
    match document.get(FIELD_WAIT_FOR_RESPONSE) {
        None => true,
        Some(value) => truthy(value),
    }
}

fn truthy(value: &Value) -> bool {
    match value {
        Value::Null => false,
        Value::Bool(b) => *b,
        Value::Number(n) => n.as_f64().is_some_and(|f| f != 0.0),
        Value::String(s) => !s.is_empty(),
        Value::Array(a) => !a.is_empty(),
        Value::Object(o) => !o.is_empty(),
    }
}

impl Request {
    pub fn parse(document: &Value) -> Result<Self, DispatchError> {
        let fields = document.as_object().ok_or(DispatchError::InvalidFormat)?;
        let action = action_name(document).ok_or(DispatchError::InvalidFormat)?;

        let command = match action {
            actions::GENERATE_TIMESTAMP_EXTENSION => Command::GenerateTimestampExtension,
            actions::GET_TIMESTAMP_SUBPATH => Command::GetTimestampSubpath,
            actions::CONSTRUCT_PATH => Command::ConstructPath {
                paths: string_list(fields, "paths")?,
            },
            actions::GENERATE_FILE_PREFIX => Command::GenerateFilePrefix {
                strings: string_list(fields, "strings")?,
            },
            actions::GET_BIQUAD_COEFFICIENTS => Command::GetBiquadCoefficients(biquad_params(fields)?),
            actions::CHECK_MEASUREMENT_TRIALS => Command::CheckMeasurementTrials {
                serial_number: required_string(fields, "serial_number")?,
                ledger_path: PathBuf::from(required_string(fields, "csv_path")?),
                max_trials: non_negative_integer(fields, "max_trials")?,
            },
            actions::RECORD_TRIAL_RESULT => Command::RecordTrialResult {
                ledger_path: PathBuf::from(required_string(fields, "csv_path")?),
                entry: TrialEntry {
                    serial_number: required_string(fields, "serial_number")?,
                    status: required_string(fields, "status")?,
                    results_path: optional_string(fields, "results_path")?.unwrap_or_default(),
                    file_prefix: optional_string(fields, "file_prefix")?.unwrap_or_default(),
                },
            },
            actions::LOG_WORKSTATION_TASK => Command::LogWorkstationTask(task_log(fields)),
            actions::ADD_MEASUREMENT => add_measurement(fields)?,
            actions::WAKE_UP => Command::WakeUp,
            actions::SET_AVERAGE => {
                let averages = fields
                    .get("averages")
                    .and_then(Value::as_u64)
                    .filter(|n| *n > 0)
                    .and_then(|n| u32::try_from(n).ok())
                    .ok_or_else(|| invalid("averages", "'averages' must be a positive integer."))?;
                Command::SetAverage { averages }
            }
            actions::ACTIVATE_MEASUREMENT => {
                let measurement_name = fields
                    .get("measurement_name")
                    .and_then(Value::as_str)
                    .filter(|s| !s.is_empty())
                    .ok_or_else(|| {
                        invalid("measurement_name", "'measurement_name' must be a non-empty string.")
                    })?;
                Command::ActivateMeasurement {
                    measurement_name: measurement_name.to_string(),
                }
            }
            other => return Err(DispatchError::UnknownAction(other.to_string())),
        };

        Ok(Request {
            action: action.to_string(),
            command,
            wait_for_response: wants_response(document),
        })
    }
}

fn invalid(field: &'static str, reason: impl Into<String>) -> DispatchError {
    DispatchError::InvalidArgument {
        field,
        reason: reason.into(),
    }
}

fn string_list(fields: &Map<String, Value>, field: &'static str) -> Result<Vec<String>, DispatchError> {
    let items = fields
        .get(field)
        .and_then(Value::as_array)
        .filter(|items| !items.is_empty())
        .ok_or_else(|| invalid(field, format!("'{}' must be a non-empty list of strings.", field)))?;

    items
        .iter()
        .map(|item| item.as_str().map(str::to_string))
        .collect::<Option<Vec<_>>>()
        .ok_or_else(|| invalid(field, format!("All elements in '{}' must be strings.", field)))
}

fn required_string(fields: &Map<String, Value>, field: &'static str) -> Result<String, DispatchError> {
    optional_string(fields, field)?
        .ok_or_else(|| invalid(field, format!("'{}' is required.", field)))
}

fn optional_string(
    fields: &Map<String, Value>,
    field: &'static str,
) -> Result<Option<String>, DispatchError> {
    match fields.get(field) {
        None | Some(Value::Null) => Ok(None),
        Some(Value::String(s)) => Ok(Some(s.clone())),
        Some(_) => Err(invalid(field, format!("'{}' must be a string.", field))),
    }
}

/// Integers may arrive as JSON numbers or as decimal strings
fn non_negative_integer(fields: &Map<String, Value>, field: &'static str) -> Result<u64, DispatchError> {
    let value = fields.get(field);
    value
        .and_then(Value::as_u64)
        .or_else(|| value.and_then(Value::as_str).and_then(|s| s.trim().parse().ok()))
        .ok_or_else(|| invalid(field, format!("'{}' must be a non-negative integer.", field)))
}

/// Numbers may arrive as JSON numbers or as decimal strings; absent means `default`
fn number_or(fields: &Map<String, Value>, field: &'static str, default: f64) -> Result<f64, DispatchError> {
    match fields.get(field) {
        None | Some(Value::Null) => Ok(default),
        Some(value) => value
            .as_f64()
            .or_else(|| value.as_str().and_then(|s| s.trim().parse().ok()))
            .ok_or_else(|| invalid(field, format!("'{}' must be a number.", field))),
    }
}

fn biquad_params(fields: &Map<String, Value>) -> Result<BiquadParams, DispatchError> {
    let filter_type: FilterType = required_string(fields, "filter_type")?
        .parse()
        .map_err(|e| {
            DispatchError::HandlerFailed(format!("Failed to generate biquad coefficients ({})", e))
        })?;

    let sample_rate = number_or(fields, "sample_rate", 48000.0)?;
    if !(sample_rate >= 1.0 && sample_rate <= f64::from(u32::MAX)) {
        return Err(invalid("sample_rate", "'sample_rate' must be a positive integer."));
    }

    Ok(BiquadParams {
        filter_type,
        gain_db: number_or(fields, "gain", 0.0)?,
        freq: number_or(fields, "peak_freq", 1000.0)?,
        q: number_or(fields, "Q", 1.0)?,
        sample_rate: sample_rate as u32,
    })
}

fn task_log(fields: &Map<String, Value>) -> TaskLog {
    let text = |field: &str| match fields.get(field) {
        None | Some(Value::Null) => UNKNOWN.to_string(),
        Some(Value::String(s)) => s.clone(),
        Some(other) => other.to_string(),
    };

    TaskLog {
        workstation_id: text("workstation_id"),
        task_type: text("task_type"),
        operation: text("operation"),
        result: fields
            .get("result")
            .cloned()
            .unwrap_or_else(|| Value::String(UNKNOWN.to_string())),
        timestamp: match fields.get("timestamp") {
            Some(Value::String(s)) => s.clone(),
            _ => shared::types::iso_now(),
        },
        task_data: fields
            .get("task_data")
            .cloned()
            .unwrap_or_else(|| Value::Object(Map::new())),
    }
}

fn add_measurement(fields: &Map<String, Value>) -> Result<Command, DispatchError> {
    let json_directory = optional_string(fields, "json_directory")?
        .filter(|dir| !dir.is_empty())
        .unwrap_or_else(|| DEFAULT_MEASUREMENT_DIR.to_string());

    let data = fields
        .get("measurement_data")
        .filter(|data| truthy(data))
        .ok_or_else(|| invalid("measurement_data", "No measurement_data provided"))?;

    let record: MeasurementRecord = serde_json::from_value(data.clone())
        .map_err(|e| invalid("measurement_data", format!("Invalid measurement_data: {}", e)))?;

    Ok(Command::AddMeasurement { json_directory, record })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn reason(result: Result<Request, DispatchError>) -> String {
        result.unwrap_err().to_string()
    }

    #[test]
    fn test_document_must_be_object_with_action() {
        assert!(matches!(Request::parse(&json!([1, 2])), Err(DispatchError::InvalidFormat)));
        assert!(matches!(Request::parse(&json!({"paths": []})), Err(DispatchError::InvalidFormat)));
        assert!(matches!(Request::parse(&json!({"action": 7})), Err(DispatchError::InvalidFormat)));
        assert!(matches!(
            Request::parse(&json!({"action": "format_disk"})),
            Err(DispatchError::UnknownAction(a)) if a == "format_disk"
        ));
    }

    #[test]
    fn test_list_validation_texts() {
        assert_eq!(
            reason(Request::parse(&json!({"action": "construct_path", "paths": []}))),
            "'paths' must be a non-empty list of strings."
        );
        assert_eq!(
            reason(Request::parse(&json!({"action": "construct_path", "paths": ["a", 1]}))),
            "All elements in 'paths' must be strings."
        );
        assert_eq!(
            reason(Request::parse(&json!({"action": "generate_file_prefix"}))),
            "'strings' must be a non-empty list of strings."
        );
    }

    #[test]
    fn test_wait_for_response_defaults_to_true() {
        let req = Request::parse(&json!({"action": "wake_up"})).unwrap();
        assert!(req.wait_for_response);
        let req = Request::parse(&json!({"action": "wake_up", "wait_for_response": false})).unwrap();
        assert!(!req.wait_for_response);
        let req = Request::parse(&json!({"action": "wake_up", "wait_for_response": 0})).unwrap();
        assert!(!req.wait_for_response);
    }

    #[test]
    fn test_trial_check_accepts_string_limit() {
        let req = Request::parse(&json!({
            "action": "check_measurement_trials",
            "serial_number": "SN1",
            "csv_path": "/tmp/trials.csv",
            "max_trials": "3"
        }))
        .unwrap();
        assert_eq!(
            req.command,
            Command::CheckMeasurementTrials {
                serial_number: "SN1".into(),
                ledger_path: PathBuf::from("/tmp/trials.csv"),
                max_trials: 3,
            }
        );

        let missing = Request::parse(&json!({
            "action": "check_measurement_trials",
            "serial_number": "SN1",
            "csv_path": "/tmp/trials.csv"
        }));
        assert!(matches!(missing, Err(DispatchError::InvalidArgument { field: "max_trials", .. })));
    }

    #[test]
    fn test_biquad_defaults() {
        let req = Request::parse(&json!({"action": "get_biquad_coefficients", "filter_type": "bell"})).unwrap();
        assert_eq!(
            req.command,
            Command::GetBiquadCoefficients(BiquadParams {
                filter_type: FilterType::Bell,
                gain_db: 0.0,
                freq: 1000.0,
                q: 1.0,
                sample_rate: 48000,
            })
        );
    }

    #[test]
    fn test_add_measurement_needs_data() {
        assert_eq!(
            reason(Request::parse(&json!({"action": "add_measurement"}))),
            "No measurement_data provided"
        );
        assert_eq!(
            reason(Request::parse(&json!({"action": "add_measurement", "measurement_data": {}}))),
            "No measurement_data provided"
        );

        let req = Request::parse(&json!({
            "action": "add_measurement",
            "measurement_data": {"device_serial": "SN1", "channels": {}}
        }))
        .unwrap();
        assert!(matches!(
            req.command,
            Command::AddMeasurement { ref json_directory, .. } if json_directory == "measurements"
        ));
    }

    #[test]
    fn test_task_log_fills_unknowns() {
        let req = Request::parse(&json!({
            "action": "log_workstation_task",
            "task_type": "switchbox",
            "result": 3
        }))
        .unwrap();
        let Command::LogWorkstationTask(log) = req.command else {
            panic!("wrong command");
        };
        assert_eq!(log.workstation_id, "UNKNOWN");
        assert_eq!(log.task_type, "switchbox");
        assert_eq!(log.result, json!(3));
        assert_eq!(log.task_data, json!({}));
    }
}

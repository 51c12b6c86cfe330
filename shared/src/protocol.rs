/// Default TCP port the command service listens on
pub const DEFAULT_SERVICE_PORT: u16 = 65432;

/// Default UDP port for discovery broadcasts
pub const DEFAULT_DISCOVERY_PORT: u16 = 65433;

/// Service name advertised by default
pub const DEFAULT_SERVICE_NAME: &str = "ADAMService";

/// Company tag carried by every announcement; matches any service from us
pub const COMPANY: &str = "ADAM Audio";

/// Announcement format version
pub const ANNOUNCEMENT_VERSION: &str = "1.0";

/// Announcements never exceed one datagram of this size
pub const MAX_ANNOUNCEMENT_SIZE: usize = 1024;

/// Read size used by both ends of a command exchange
pub const READ_CHUNK_SIZE: usize = 8192;

/// Capabilities advertised in every announcement
pub const CAPABILITIES: &[&str] = &[
    "BiquadFilters",
    "MeasurementTrials",
    "ProductionLogging",
    "HelperFunctions",
    "WorkstationSupport",
];

/// Command field names
pub const FIELD_ACTION: &str = "action";
pub const FIELD_WAIT_FOR_RESPONSE: &str = "wait_for_response";

/// Action names understood by the service
pub mod actions {
    pub const GENERATE_TIMESTAMP_EXTENSION: &str = "generate_timestamp_extension";
    pub const GET_TIMESTAMP_SUBPATH: &str = "get_timestamp_subpath";
    pub const CONSTRUCT_PATH: &str = "construct_path";
    pub const GENERATE_FILE_PREFIX: &str = "generate_file_prefix";
    pub const GET_BIQUAD_COEFFICIENTS: &str = "get_biquad_coefficients";
    pub const CHECK_MEASUREMENT_TRIALS: &str = "check_measurement_trials";
    pub const RECORD_TRIAL_RESULT: &str = "record_trial_result";
    pub const LOG_WORKSTATION_TASK: &str = "log_workstation_task";
    pub const ADD_MEASUREMENT: &str = "add_measurement";
    pub const WAKE_UP: &str = "wake_up";
    pub const SET_AVERAGE: &str = "set_average";
    pub const ACTIVATE_MEASUREMENT: &str = "activate_measurement";
}

/// Trial ledger columns, in file order
pub const LEDGER_HEADER: [&str; 6] = [
    "Date",
    "Time",
    "Status",
    "ResultsPath",
    "SerialNumber",
    "FilePrefix",
];

/// Ledger status value counted against the trial limit
pub const STATUS_FAILED: &str = "Failed";

/// Reply texts of the trial check
pub const MSG_MEASUREMENT_PERMITTED: &str = "Measurement permitted.";

/// Default measurement store subdirectory and file name
pub const DEFAULT_MEASUREMENT_DIR: &str = "measurements";
pub const MEASUREMENT_FILE_NAME: &str = "all_measurements.json";

/// Environment variable that overrides the measurement base directory
pub const ENV_SERVICE_HOME: &str = "ADAM_SERVICE_HOME";

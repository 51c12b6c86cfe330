use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::time::Duration;
use anyhow::{anyhow, bail, Result};
use clap::{Parser, Subcommand, ValueEnum};
use serde_json::{json, Value};
use adam_client::connection::ServiceClient;
use adam_client::discovery::Connector;
use adam_client::hardware::{self, DetachedHardware, Operation};
use adam_client::measurement_csv;
use shared::codec::Reply;
use shared::protocol::{actions, DEFAULT_MEASUREMENT_DIR, DEFAULT_SERVICE_NAME, DEFAULT_SERVICE_PORT};
use shared::types::{iso_now, MeasurementRecord};

const HOST_DISCOVERY_TIMEOUT: Duration = Duration::from_secs(3);
const NO_HOST: &str = "No ADAM service available. Use --host to specify manually.";

#[derive(Parser, Debug)]
#[command(name = "adam-workstation", about = "ADAM Audio production workstation")]
struct Args {
    /// Service host; discovered on the local network when absent
    #[arg(long = "host", visible_alias = "service-host", global = true)]
    host: Option<String>,

    #[arg(long = "port", visible_alias = "service-port", default_value_t = DEFAULT_SERVICE_PORT, global = true)]
    port: u16,

    #[arg(long, default_value = DEFAULT_SERVICE_NAME, global = true)]
    service_name: String,

    #[arg(long, global = true)]
    debug: bool,

    #[command(subcommand)]
    command: WorkstationCommand,
}

#[derive(Subcommand, Debug)]
enum WorkstationCommand {
    /// Timestamp suffix for file names
    #[command(alias = "generate_timestamp_extension")]
    GenerateTimestampExtension,

    /// Join path components on the service host
    #[command(alias = "construct_path")]
    ConstructPath {
        #[arg(required = true)]
        paths: Vec<String>,
    },

    /// Year and month-day subdirectory for today
    #[command(alias = "get_timestamp_subpath")]
    GetTimestampSubpath,

    /// Join strings with underscores
    #[command(alias = "generate_file_prefix")]
    GenerateFilePrefix {
        #[arg(required = true)]
        strings: Vec<String>,
    },

    /// Biquad coefficients as [a1, a2, b0, b1, b2]
    #[command(alias = "get_biquad_coefficients")]
    GetBiquadCoefficients {
        filter_type: FilterKind,
        /// Gain in dB
        #[arg(allow_negative_numbers = true)]
        gain: f64,
        /// Peak frequency in Hz
        peak_freq: f64,
        #[arg(value_name = "Q")]
        q: f64,
        /// Sample rate in Hz
        sample_rate: u32,
    },

    /// Check whether another measurement is permitted for a serial number
    #[command(alias = "check_measurement_trials")]
    CheckMeasurementTrials {
        serial_number: String,
        csv_path: String,
        max_trials: u64,
    },

    /// Append a trial result to the ledger
    #[command(alias = "record_trial_result")]
    RecordTrialResult {
        serial_number: String,
        csv_path: String,
        status: String,
        #[arg(long)]
        results_path: Option<String>,
        #[arg(long)]
        file_prefix: Option<String>,
    },

    /// Parse a measurement export and send it to the service
    #[command(alias = "process_measurement")]
    ProcessMeasurement {
        measurement_path: PathBuf,
        #[arg(short = 's', long, required = true)]
        serial_number: String,
        /// Store directory on the service
        #[arg(long, default_value = DEFAULT_MEASUREMENT_DIR)]
        json_directory: String,
    },

    /// Read a serial number with the barcode scanner
    #[command(alias = "scan_serial")]
    ScanSerial,

    /// Route the switch box to a channel
    #[command(alias = "set_channel")]
    SetChannel {
        #[arg(value_parser = clap::value_parser!(u8).range(1..=2))]
        channel: u8,
    },

    /// Open the test box
    #[command(alias = "open_box")]
    OpenBox,
}

#[derive(Clone, Copy, Debug, ValueEnum)]
#[value(rename_all = "snake_case")]
enum FilterKind {
    Bell,
    HighShelf,
    LowShelf,
}

impl FilterKind {
    fn as_str(self) -> &'static str {
        match self {
            FilterKind::Bell => "bell",
            FilterKind::HighShelf => "high_shelf",
            FilterKind::LowShelf => "low_shelf",
        }
    }
}

impl WorkstationCommand {
    /// The request for commands whose reply is printed as is
    fn request(&self) -> Option<Value> {
        let request = match self {
            Self::GenerateTimestampExtension => json!({"action": actions::GENERATE_TIMESTAMP_EXTENSION}),
            Self::ConstructPath { paths } => json!({"action": actions::CONSTRUCT_PATH, "paths": paths}),
            Self::GetTimestampSubpath => json!({"action": actions::GET_TIMESTAMP_SUBPATH}),
            Self::GenerateFilePrefix { strings } => {
                json!({"action": actions::GENERATE_FILE_PREFIX, "strings": strings})
            }
            Self::GetBiquadCoefficients { filter_type, gain, peak_freq, q, sample_rate } => json!({
                "action": actions::GET_BIQUAD_COEFFICIENTS,
                "filter_type": filter_type.as_str(),
                "gain": gain,
                "peak_freq": peak_freq,
                "Q": q,
                "sample_rate": sample_rate,
            }),
            Self::CheckMeasurementTrials { serial_number, csv_path, max_trials } => json!({
                "action": actions::CHECK_MEASUREMENT_TRIALS,
                "serial_number": serial_number,
                "csv_path": csv_path,
                "max_trials": max_trials,
            }),
            Self::RecordTrialResult { serial_number, csv_path, status, results_path, file_prefix } => json!({
                "action": actions::RECORD_TRIAL_RESULT,
                "serial_number": serial_number,
                "csv_path": csv_path,
                "status": status,
                "results_path": results_path,
                "file_prefix": file_prefix,
            }),
            Self::ProcessMeasurement { .. } | Self::ScanSerial | Self::SetChannel { .. } | Self::OpenBox => {
                return None
            }
        };
        Some(request)
    }

    /// The bench hardware operation, for commands that drive one
    fn operation(&self) -> Option<Operation> {
        match self {
            Self::ScanSerial => Some(Operation::ScanSerial),
            Self::SetChannel { channel } => Some(Operation::SetChannel(*channel)),
            Self::OpenBox => Some(Operation::OpenBox),
            _ => None,
        }
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    let args = Args::parse();

    let default_filter = if args.debug { "adam_client=debug" } else { "adam_client=warn" };
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(default_filter)),
        )
        .init();

    tracing::info!("Executing command: {:?}", args.command);

    match &args.command {
        WorkstationCommand::ProcessMeasurement { measurement_path, serial_number, json_directory } => {
            match process_measurement(&args, measurement_path, serial_number, json_directory).await {
                Ok(()) => {
                    println!("Data successfully transferred.");
                    ExitCode::SUCCESS
                }
                Err(e) => {
                    tracing::error!("{}", e);
                    println!("ERROR {e}");
                    ExitCode::FAILURE
                }
            }
        }
        command => {
            if let Some(operation) = command.operation() {
                return run_hardware(&args, operation).await;
            }
            let Some(request) = command.request() else {
                return ExitCode::FAILURE;
            };
            let Some(client) = connect(&args).await else {
                println!("Error: {NO_HOST}");
                return ExitCode::FAILURE;
            };
            match client.send_command(&request, true).await {
                Ok(reply) => {
                    let reply = reply.unwrap_or_else(|| Reply::text(""));
                    tracing::info!("ADAM service response: {}", reply);
                    println!("{reply}");
                    ExitCode::SUCCESS
                }
                Err(e) => {
                    tracing::error!("Socket error: {}", e);
                    println!("Error: {e}");
                    ExitCode::FAILURE
                }
            }
        }
    }
}

/// `--host` if given, otherwise the first live service discovered
async fn connect(args: &Args) -> Option<ServiceClient> {
    let host = match &args.host {
        Some(host) => {
            tracing::info!("Using specified ADAM service host: {}", host);
            host.clone()
        }
        None => {
            tracing::info!("No host specified, discovering ADAM service...");
            Connector::new(args.service_name.clone(), args.port)
                .find_service_ip(None, Some(args.port), HOST_DISCOVERY_TIMEOUT)
                .await?
        }
    };
    Some(ServiceClient::new(host, args.port))
}

async fn run_hardware(args: &Args, operation: Operation) -> ExitCode {
    let completed = match operation.run(&mut DetachedHardware) {
        Ok(completed) => completed,
        Err(e) => {
            tracing::error!("{:?} failed: {}", operation, e);
            println!("Error: {e}");
            return ExitCode::FAILURE;
        }
    };
    println!("{}", completed.output);

    // The operation already happened; a missing service only loses the log entry
    match connect(args).await {
        Some(client) => {
            if let Err(e) = completed.report(&client, &hardware::workstation_id()).await {
                tracing::warn!("Failed to log {} to service: {}", completed.operation, e);
            }
        }
        None => tracing::warn!("No ADAM service to log {} to", completed.operation),
    }
    ExitCode::SUCCESS
}

async fn process_measurement(
    args: &Args,
    path: &Path,
    serial_number: &str,
    json_directory: &str,
) -> Result<()> {
    tracing::info!("Processing measurement file: {}", path.display());
    if !path.exists() {
        bail!("Measurement file not found: {}", path.display());
    }

    let parsed = measurement_csv::parse_file(path)?;
    let file_name = path
        .file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_default();
    tracing::info!(
        "Parsed measurement: serial={} file={} channels={} points={}",
        serial_number,
        file_name,
        parsed.channels.len(),
        parsed.data_points
    );

    let record = MeasurementRecord {
        device_serial: Some(serial_number.to_string()),
        timestamp: Some(iso_now()),
        workstation_id: Some(hardware::workstation_id()),
        measurement_file: Some(file_name),
        channels: parsed.channels,
        ..Default::default()
    };
    let measurement_data = serde_json::to_value(&record)?;
    let request = json!({
        "action": actions::ADD_MEASUREMENT,
        "json_directory": json_directory,
        "measurement_data": measurement_data,
    });

    let client = connect(args).await.ok_or_else(|| anyhow::Error::msg(NO_HOST))?;
    tracing::info!("Sending measurement to service {}", client.addr());
    let reply = client.send_command(&request, true).await?;

    match reply {
        None => bail!("empty response from service"),
        Some(Reply::Text(text)) if text.is_empty() => bail!("empty response from service"),
        Some(Reply::Text(text)) => {
            tracing::error!("Invalid JSON response: {}", text.chars().take(200).collect::<String>());
            Err(anyhow!("invalid service response"))
        }
        Some(Reply::Json(result)) => match result.get("error") {
            Some(Value::String(error)) => Err(anyhow!("{}", error)),
            Some(error) => Err(anyhow!("{}", error)),
            None => {
                tracing::info!(
                    "Measurement stored: id={} total={}",
                    result["measurement_id"],
                    result["measurement_count"]
                );
                Ok(())
            }
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_subcommands_accept_both_spellings() {
        for name in ["construct-path", "construct_path"] {
            let args = Args::parse_from(["adam-workstation", name, "a", "b"]);
            assert_eq!(
                args.command.request(),
                Some(json!({"action": "construct_path", "paths": ["a", "b"]}))
            );
        }
    }

    #[test]
    fn test_biquad_request() {
        let args = Args::parse_from([
            "adam-workstation",
            "--host",
            "10.0.0.5",
            "get-biquad-coefficients",
            "high_shelf",
            "-3.5",
            "2000",
            "0.7",
            "48000",
        ]);
        assert_eq!(args.host.as_deref(), Some("10.0.0.5"));
        assert_eq!(
            args.command.request(),
            Some(json!({
                "action": "get_biquad_coefficients",
                "filter_type": "high_shelf",
                "gain": -3.5,
                "peak_freq": 2000.0,
                "Q": 0.7,
                "sample_rate": 48000,
            }))
        );
    }

    #[test]
    fn test_process_measurement_needs_serial() {
        assert!(Args::try_parse_from(["adam-workstation", "process-measurement", "m.csv"]).is_err());

        let args = Args::parse_from(["adam-workstation", "process-measurement", "m.csv", "-s", "SN1"]);
        match args.command {
            WorkstationCommand::ProcessMeasurement { json_directory, serial_number, .. } => {
                assert_eq!(json_directory, "measurements");
                assert_eq!(serial_number, "SN1");
            }
            other => panic!("unexpected command {:?}", other),
        }
    }

    #[test]
    fn test_hardware_subcommands() {
        for (argv, expected) in [
            (vec!["adam-workstation", "scan_serial"], Operation::ScanSerial),
            (vec!["adam-workstation", "set-channel", "2"], Operation::SetChannel(2)),
            (vec!["adam-workstation", "open_box"], Operation::OpenBox),
        ] {
            let args = Args::parse_from(argv);
            assert_eq!(args.command.operation(), Some(expected));
            assert_eq!(args.command.request(), None);
        }

        assert!(Args::try_parse_from(["adam-workstation", "set-channel", "3"]).is_err());
        assert!(Args::try_parse_from(["adam-workstation", "set-channel", "0"]).is_err());
    }
}

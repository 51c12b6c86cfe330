use std::path::PathBuf;
use std::process::ExitCode;
use std::time::Duration;
use clap::{ArgGroup, Parser};
use adam_client::discovery::{probe, Connector, PROBE_TIMEOUT};
use adam_client::launcher::DEFAULT_STARTUP_TIMEOUT;
use shared::protocol::{DEFAULT_SERVICE_NAME, DEFAULT_SERVICE_PORT};

const CHECK_TIMEOUT_SECS: u64 = 2;
const FIND_TIMEOUT_SECS: u64 = 5;

const AVAILABLE: &str = "ADAM Service available";
const UNAVAILABLE: &str = "No ADAM Service available";
const NOT_FOUND: &str = "Warning: No ADAM service found";

#[derive(Parser, Debug)]
#[command(
    name = "adam-connector",
    about = "ADAM Audio service discovery and connection tool",
    group(ArgGroup::new("mode").required(true).args(["check", "find"]))
)]
struct Args {
    /// Report whether any service is available
    #[arg(long)]
    check: bool,

    /// Print the IP of a live service
    #[arg(long)]
    find: bool,

    /// Specific service IP address
    #[arg(long = "ip", visible_alias = "host")]
    target_ip: Option<String>,

    #[arg(long, default_value_t = DEFAULT_SERVICE_PORT)]
    port: u16,

    /// Name of the service to discover
    #[arg(long, default_value = DEFAULT_SERVICE_NAME)]
    service_name: String,

    /// Only probe --ip, never listen for announcements
    #[arg(long)]
    no_discovery: bool,

    /// Seconds to wait (default: 2 for --check, 5 for --find)
    #[arg(long)]
    timeout: Option<u64>,

    /// Start the service if it is not running
    #[arg(long)]
    start_service: bool,

    /// Service program to start
    #[arg(long, default_value = "adam-serviced")]
    service_script: PathBuf,

    /// Log progress to stderr
    #[arg(short, long)]
    verbose: bool,

    #[arg(long)]
    debug: bool,
}

impl Args {
    fn timeout(&self) -> Duration {
        let default = if self.find { FIND_TIMEOUT_SECS } else { CHECK_TIMEOUT_SECS };
        Duration::from_secs(self.timeout.unwrap_or(default))
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    let args = Args::parse();

    let default_filter = if args.debug {
        "adam_client=debug"
    } else if args.verbose {
        "adam_client=info"
    } else {
        "adam_client=error"
    };
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(default_filter)),
        )
        .init();

    let connector = Connector::new(args.service_name.clone(), args.port);
    tracing::info!(
        "ADAM Audio Connector started - mode: {}, target IP: {}, service: {}",
        if args.check { "check" } else { "find" },
        args.target_ip.as_deref().unwrap_or("None"),
        args.service_name
    );

    if args.start_service {
        if let Err(e) = connector
            .start_service(&args.service_script, DEFAULT_STARTUP_TIMEOUT, args.target_ip.as_deref())
            .await
        {
            tracing::error!("Failed to start ADAM service: {}", e);
            if args.check {
                println!("{UNAVAILABLE}");
            } else {
                eprintln!("{NOT_FOUND}");
            }
            return ExitCode::FAILURE;
        }
    }

    if args.check {
        check(&args, &connector).await
    } else {
        find(&args, &connector).await
    }
}

async fn check(args: &Args, connector: &Connector) -> ExitCode {
    let available = match &args.target_ip {
        Some(ip) => {
            probe(ip, args.port, PROBE_TIMEOUT).await
                || (!args.no_discovery && connector.any_service_exists(args.timeout()).await)
        }
        None => connector.any_service_exists(args.timeout()).await,
    };

    tracing::info!("Check result: available={}", available);
    if available {
        println!("{AVAILABLE}");
        ExitCode::SUCCESS
    } else {
        println!("{UNAVAILABLE}");
        ExitCode::FAILURE
    }
}

async fn find(args: &Args, connector: &Connector) -> ExitCode {
    let found = if args.no_discovery {
        let Some(ip) = &args.target_ip else {
            tracing::error!("--no-discovery requires --ip parameter");
            eprintln!("Error: --no-discovery requires --ip parameter");
            return ExitCode::FAILURE;
        };
        probe(ip, args.port, PROBE_TIMEOUT).await.then(|| ip.clone())
    } else {
        connector
            .find_service_ip(args.target_ip.as_deref(), Some(args.port), args.timeout())
            .await
    };

    match found {
        Some(ip) => {
            tracing::info!("Find result: ADAM service found at {}", ip);
            println!("{ip}");
            ExitCode::SUCCESS
        }
        None => {
            tracing::warn!("Find result: No ADAM service found");
            eprintln!("{NOT_FOUND}");
            ExitCode::FAILURE
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mode_is_required_and_exclusive() {
        assert!(Args::try_parse_from(["adam-connector"]).is_err());
        assert!(Args::try_parse_from(["adam-connector", "--check", "--find"]).is_err());
        assert!(Args::try_parse_from(["adam-connector", "--find"]).is_ok());
    }

    #[test]
    fn test_timeout_defaults_per_mode() {
        let check = Args::parse_from(["adam-connector", "--check"]);
        assert_eq!(check.timeout(), Duration::from_secs(2));

        let find = Args::parse_from(["adam-connector", "--find", "--host", "10.0.0.5"]);
        assert_eq!(find.timeout(), Duration::from_secs(5));
        assert_eq!(find.target_ip.as_deref(), Some("10.0.0.5"));

        let explicit = Args::parse_from(["adam-connector", "--find", "--timeout", "2"]);
        assert_eq!(explicit.timeout(), Duration::from_secs(2));
    }
}

//! Starting a local service process when none is reachable.

use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::{Duration, Instant};
use thiserror::Error;
use crate::discovery::{probe, Connector};

pub const DEFAULT_STARTUP_TIMEOUT: Duration = Duration::from_secs(10);

const POLL_INTERVAL: Duration = Duration::from_millis(500);
const RUNNING_PROBE_TIMEOUT: Duration = Duration::from_secs(2);
const STARTUP_PROBE_TIMEOUT: Duration = Duration::from_secs(1);
const DISCOVERY_CHECK: Duration = Duration::from_secs(1);

#[derive(Debug, Error)]
pub enum LaunchError {
    #[error("service program not found: {}", .0.display())]
    ProgramNotFound(PathBuf),

    #[error("failed to spawn {}: {source}", .program.display())]
    Spawn {
        program: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("service did not start within {0:?}")]
    StartupTimeout(Duration),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Launch {
    AlreadyRunning,
    Started(Duration),
}

impl Connector {
    /// Make sure a service is reachable, spawning `program` if none answers.
    ///
    /// The child runs in its own process group with its output discarded and
    /// outlives us. It is killed only if it never becomes reachable.
    pub async fn start_service(
        &self,
        program: &Path,
        startup_timeout: Duration,
        target_ip: Option<&str>,
    ) -> Result<Launch, LaunchError> {
        tracing::info!(
            "Attempting to start ADAM service - program: {}, timeout: {:?}, target_ip: {}",
            program.display(),
            startup_timeout,
            target_ip.unwrap_or("None")
        );

        if let Some(ip) = target_ip {
            if probe(ip, self.default_port, RUNNING_PROBE_TIMEOUT).await {
                tracing::info!("ADAM service already running at specified IP: {}", ip);
                return Ok(Launch::AlreadyRunning);
            }
        }
        if self.any_service_exists(DISCOVERY_CHECK).await {
            tracing::info!("ADAM service already running (found via discovery)");
            return Ok(Launch::AlreadyRunning);
        }

        // Bare names are left to PATH lookup
        if program.components().count() > 1 && !program.is_file() {
            tracing::error!("ADAM service program not found: {}", program.display());
            return Err(LaunchError::ProgramNotFound(program.to_path_buf()));
        }

        tracing::info!("Starting ADAM service process: {}", program.display());
        let mut child = self
            .command(program)
            .spawn()
            .map_err(|source| LaunchError::Spawn {
                program: program.to_path_buf(),
                source,
            })?;

        let started = Instant::now();
        while started.elapsed() < startup_timeout {
            let mut running = false;
            if let Some(ip) = target_ip {
                running = probe(ip, self.default_port, STARTUP_PROBE_TIMEOUT).await;
            }
            if !running {
                running = self.any_service_exists(DISCOVERY_CHECK).await;
            }

            if running {
                tracing::info!("ADAM service started successfully in {:.1?}", started.elapsed());
                return Ok(Launch::Started(started.elapsed()));
            }
            tokio::time::sleep(POLL_INTERVAL).await;
        }

        tracing::warn!("ADAM service did not start within {:?} timeout", startup_timeout);
        if let Err(e) = child.kill().await {
            tracing::error!("Failed to terminate ADAM service process: {}", e);
        }
        Err(LaunchError::StartupTimeout(startup_timeout))
    }

    fn command(&self, program: &Path) -> tokio::process::Command {
        let mut cmd = std::process::Command::new(program);
        cmd.arg("--service-name")
            .arg(&self.service_name)
            .arg("--service-port")
            .arg(self.default_port.to_string())
            .arg("--discovery-port")
            .arg(self.discovery_port.to_string())
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null());

        #[cfg(unix)]
        {
            use std::os::unix::process::CommandExt;
            cmd.process_group(0);
        }

        let mut cmd = tokio::process::Command::from(cmd);
        cmd.kill_on_drop(false);
        cmd
    }
}

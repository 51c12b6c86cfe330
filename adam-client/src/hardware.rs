//! Bench hardware driven from the workstation: the barcode scanner and the
//! channel switch box.
//!
//! Drivers sit behind [`Hardware`]; a host without any uses [`DetachedHardware`].
//! Every completed operation is reported to the service as a
//! `log_workstation_task` entry, sent without waiting for a reply.

use std::time::Instant;
use serde_json::{json, Value};
use thiserror::Error;
use shared::protocol::actions;
use shared::types::iso_now;
use crate::connection::{ClientError, ServiceClient};

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum HardwareError {
    #[error("hardware unavailable: {0}")]
    Unavailable(String),

    #[error("hardware call failed: {0}")]
    CallFailed(String),
}

pub trait Hardware: Send {
    /// Trigger the scanner and return the serial number it read
    fn scan_serial(&mut self) -> Result<String, HardwareError>;

    /// Route the switch box to `channel`; returns the channel it reports
    fn set_channel(&mut self, channel: u8) -> Result<u8, HardwareError>;

    /// Open the test box; returns the box status it reports
    fn open_box(&mut self) -> Result<String, HardwareError>;
}

/// For workstations without a scanner or switch box; every call fails
#[derive(Debug, Default, Clone, Copy)]
pub struct DetachedHardware;

impl DetachedHardware {
    fn unavailable<T>() -> Result<T, HardwareError> {
        Err(HardwareError::Unavailable(
            "no workstation hardware attached".to_string(),
        ))
    }
}

impl Hardware for DetachedHardware {
    fn scan_serial(&mut self) -> Result<String, HardwareError> {
        Self::unavailable()
    }

    fn set_channel(&mut self, _channel: u8) -> Result<u8, HardwareError> {
        Self::unavailable()
    }

    fn open_box(&mut self) -> Result<String, HardwareError> {
        Self::unavailable()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operation {
    ScanSerial,
    SetChannel(u8),
    OpenBox,
}

/// A finished operation: what to print and what to log
#[derive(Debug, Clone, PartialEq)]
pub struct Completed {
    pub output: String,
    pub task_type: &'static str,
    pub operation: &'static str,
    pub task_data: Value,
    /// ISO-8601 local time the operation started
    pub started: String,
}

impl Operation {
    pub fn run(self, hardware: &mut dyn Hardware) -> Result<Completed, HardwareError> {
        let started = iso_now();
        let clock = Instant::now();

        let (output, task_type, operation, mut task_data) = match self {
            Self::ScanSerial => {
                let serial = hardware.scan_serial()?;
                if serial.trim().is_empty() {
                    return Err(HardwareError::CallFailed("scanner returned no serial number".to_string()));
                }
                (serial.clone(), "scanner", "scan_serial", json!({"serial_number": serial}))
            }
            Self::SetChannel(channel) => {
                let channel = hardware.set_channel(channel)?;
                (format!("Channel set to {channel}"), "switchbox", "set_channel", json!({"channel": channel}))
            }
            Self::OpenBox => {
                let status = hardware.open_box()?;
                (format!("Box status: {status}"), "switchbox", "open_box", json!({"box_status": status}))
            }
        };
        task_data["duration"] = json!(clock.elapsed().as_secs_f64());
        task_data["local_execution"] = json!(true);

        tracing::info!("{} {} completed: {}", task_type, operation, output);
        Ok(Completed {
            output,
            task_type,
            operation,
            task_data,
            started,
        })
    }
}

impl Completed {
    pub fn log_request(&self, workstation_id: &str) -> Value {
        json!({
            "action": actions::LOG_WORKSTATION_TASK,
            "workstation_id": workstation_id,
            "task_type": self.task_type,
            "operation": self.operation,
            "result": "success",
            "timestamp": self.started,
            "task_data": self.task_data,
        })
    }

    /// Fire-and-forget log entry on the service
    pub async fn report(&self, client: &ServiceClient, workstation_id: &str) -> Result<(), ClientError> {
        client.send_command(&self.log_request(workstation_id), false).await?;
        tracing::debug!("Logged {} {} to {}", self.task_type, self.operation, client.addr());
        Ok(())
    }
}

/// This host's name, or "unknown"
pub fn workstation_id() -> String {
    hostname::get()
        .map(|h| h.to_string_lossy().into_owned())
        .unwrap_or_else(|_| "unknown".to_string())
}

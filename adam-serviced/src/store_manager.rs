use std::path::PathBuf;
use std::thread;
use tokio::sync::{mpsc, oneshot};
use anyhow::{Context, Result};
use shared::types::MeasurementRecord;
use crate::store::ledger::{self, TrialCheck, TrialEntry};
use crate::store::measurements::{AggregationError, MeasurementAggregator, SubmissionSummary};

/// Commands sent to the store thread
pub enum StoreCommand {
    AddMeasurement {
        json_directory: String,
        record: MeasurementRecord,
        reply: oneshot::Sender<std::result::Result<SubmissionSummary, AggregationError>>,
    },
    CheckTrials {
        serial_number: String,
        ledger_path: PathBuf,
        max_trials: u64,
        reply: oneshot::Sender<Result<TrialCheck>>,
    },
    RecordTrial {
        ledger_path: PathBuf,
        entry: TrialEntry,
        reply: oneshot::Sender<Result<()>>,
    },
    Shutdown,
}

/// Handle to the single thread that owns every store and ledger file.
/// Submissions from concurrent connections are applied one at a time.
#[derive(Clone)]
pub struct StoreHandle {
    tx: mpsc::Sender<StoreCommand>,
}

impl StoreHandle {
    /// Spawn the store thread around an aggregator
    pub fn spawn(aggregator: MeasurementAggregator) -> Self {
        let (tx, mut rx) = mpsc::channel::<StoreCommand>(256);

        thread::spawn(move || {
            while let Some(cmd) = rx.blocking_recv() {
                match cmd {
                    StoreCommand::AddMeasurement { json_directory, record, reply } => {
                        let result = aggregator.add_measurement(&json_directory, record);
                        let _ = reply.send(result);
                    }
                    StoreCommand::CheckTrials { serial_number, ledger_path, max_trials, reply } => {
                        let result = ledger::check_trials(&serial_number, &ledger_path, max_trials);
                        let _ = reply.send(result);
                    }
                    StoreCommand::RecordTrial { ledger_path, entry, reply } => {
                        let result = ledger::record_trial_result(&ledger_path, &entry);
                        let _ = reply.send(result);
                    }
                    StoreCommand::Shutdown => {
                        tracing::info!("Store thread shutting down");
                        break;
                    }
                }
            }
        });

        Self { tx }
    }

    /// Add a measurement to the store under `json_directory`
    pub async fn add_measurement(
        &self,
        json_directory: String,
        record: MeasurementRecord,
    ) -> Result<std::result::Result<SubmissionSummary, AggregationError>> {
        let (reply, rx) = oneshot::channel();
        self.tx
            .send(StoreCommand::AddMeasurement { json_directory, record, reply })
            .await
            .context("Store thread is gone")?;
        rx.await.context("Store thread dropped the reply")
    }

    /// Count failures for a serial number against a limit
    pub async fn check_trials(
        &self,
        serial_number: String,
        ledger_path: PathBuf,
        max_trials: u64,
    ) -> Result<TrialCheck> {
        let (reply, rx) = oneshot::channel();
        self.tx
            .send(StoreCommand::CheckTrials { serial_number, ledger_path, max_trials, reply })
            .await
            .context("Store thread is gone")?;
        rx.await.context("Store thread dropped the reply")?
    }

    /// Append one attempt to a ledger
    pub async fn record_trial(&self, ledger_path: PathBuf, entry: TrialEntry) -> Result<()> {
        let (reply, rx) = oneshot::channel();
        self.tx
            .send(StoreCommand::RecordTrial { ledger_path, entry, reply })
            .await
            .context("Store thread is gone")?;
        rx.await.context("Store thread dropped the reply")?
    }

    /// Shutdown the store thread
    pub async fn shutdown(&self) -> Result<()> {
        self.tx.send(StoreCommand::Shutdown).await?;
        Ok(())
    }
}

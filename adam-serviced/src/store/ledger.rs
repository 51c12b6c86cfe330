use std::fs::{self, File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::Path;
use anyhow::{Context, Result};
use chrono::Local;
use shared::protocol::{LEDGER_HEADER, MSG_MEASUREMENT_PERMITTED, STATUS_FAILED};

/// Outcome of a trial check
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verdict {
    Permitted,
    MaxReached,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TrialCheck {
    pub verdict: Verdict,
    pub failed_count: u64,
    /// The ledger did not exist and was created by this check
    pub created: bool,
}

impl TrialCheck {
    /// Reply text understood by existing station scripts
    pub fn message(&self, serial_number: &str) -> String {
        match self.verdict {
            Verdict::Permitted => MSG_MEASUREMENT_PERMITTED.to_string(),
            Verdict::MaxReached => format!(
                "Maximum number of permitted failed measurements reached for serial number {}.",
                serial_number
            ),
        }
    }
}

/// One attempt to append to the ledger
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TrialEntry {
    pub serial_number: String,
    pub status: String,
    pub results_path: String,
    pub file_prefix: String,
}

/// Count failed attempts for `serial_number` and decide whether another is allowed.
///
/// The limit is reached once the failure count is at least `max_trials`. A serial
/// with no failures on record is always permitted, so `max_trials = 0` blocks only
/// serials that have already failed. A missing ledger is created with its header
/// row and always permits.
pub fn check_trials(serial_number: &str, ledger_path: &Path, max_trials: u64) -> Result<TrialCheck> {
    if !ledger_path.exists() {
        create_ledger(ledger_path)?;
        tracing::info!("Created trial ledger {}", ledger_path.display());
        return Ok(TrialCheck {
            verdict: Verdict::Permitted,
            failed_count: 0,
            created: true,
        });
    }

    let failed_count = count_failed(serial_number, ledger_path)?;
    let verdict = if failed_count > 0 && failed_count >= max_trials {
        Verdict::MaxReached
    } else {
        Verdict::Permitted
    };

    Ok(TrialCheck {
        verdict,
        failed_count,
        created: false,
    })
}

/// Append one attempt, creating the ledger first if needed
pub fn record_trial_result(ledger_path: &Path, entry: &TrialEntry) -> Result<()> {
    if !ledger_path.exists() {
        create_ledger(ledger_path)?;
    }

    let mut file = OpenOptions::new()
        .read(true)
        .append(true)
        .open(ledger_path)
        .with_context(|| format!("Failed to open ledger: {}", ledger_path.display()))?;
    if !ends_with_newline(&mut file)? {
        file.write_all(b"\n").context("Failed to terminate last ledger row")?;
    }

    let now = Local::now();
    let date = now.format("%Y-%m-%d").to_string();
    let time = now.format("%H:%M:%S").to_string();

    let mut writer = csv::WriterBuilder::new()
        .has_headers(false)
        .from_writer(file);
    writer
        .write_record([
            date.as_str(),
            time.as_str(),
            entry.status.as_str(),
            entry.results_path.as_str(),
            entry.serial_number.as_str(),
            entry.file_prefix.as_str(),
        ])
        .context("Failed to append ledger row")?;
    writer.flush().context("Failed to flush ledger")?;

    Ok(())
}

/// True for an empty file or one whose last byte is a line feed
fn ends_with_newline(file: &mut File) -> Result<bool> {
    if file.metadata().context("Failed to stat ledger")?.len() == 0 {
        return Ok(true);
    }
    let mut last = [0u8; 1];
    file.seek(SeekFrom::End(-1)).context("Failed to seek ledger")?;
    file.read_exact(&mut last).context("Failed to read ledger")?;
    Ok(last[0] == b'\n')
}

fn create_ledger(ledger_path: &Path) -> Result<()> {
    if let Some(parent) = ledger_path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent)
            .with_context(|| format!("Failed to create directory: {}", parent.display()))?;
    }

    let mut writer = csv::Writer::from_path(ledger_path)
        .with_context(|| format!("Failed to create ledger: {}", ledger_path.display()))?;
    writer
        .write_record(LEDGER_HEADER)
        .context("Failed to write ledger header")?;
    writer.flush().context("Failed to flush ledger")?;
    Ok(())
}

/// Columns are located by header name; a ledger missing either column counts nothing
fn count_failed(serial_number: &str, ledger_path: &Path) -> Result<u64> {
    let mut reader = csv::ReaderBuilder::new()
        .flexible(true)
        .from_path(ledger_path)
        .with_context(|| format!("Failed to open ledger: {}", ledger_path.display()))?;

    let headers = reader
        .headers()
        .with_context(|| format!("Failed to read ledger header: {}", ledger_path.display()))?
        .clone();
    let column = |name: &str| headers.iter().position(|h| h.trim_start() == name);

    let (Some(serial_col), Some(status_col)) = (column("SerialNumber"), column("Status")) else {
        tracing::warn!("Ledger {} lacks SerialNumber/Status columns", ledger_path.display());
        return Ok(0);
    };

    let mut count = 0;
    for (line, record) in reader.records().enumerate() {
        let record = record
            .with_context(|| format!("Ledger read error on row {}", line + 1))?;
        let field = |i: usize| record.get(i).map(str::trim_start);
        if field(serial_col) == Some(serial_number) && field(status_col) == Some(STATUS_FAILED) {
            count += 1;
        }
    }

    Ok(count)
}

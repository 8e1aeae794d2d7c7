use std::fs::{self, OpenOptions};
use std::io::{BufRead, BufReader, Write};
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use time::format_description::well_known::Rfc3339;
use time::OffsetDateTime;

use crate::swap::OrderRequest;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TxState {
    Submitted,
    Confirmed,
    Failed,
    Unconfirmed,
}

impl TxState {
    /// Confirmed and failed are final; anything else may still land.
    pub fn is_final(&self) -> bool {
        matches!(self, TxState::Confirmed | TxState::Failed)
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct TxRecord {
    pub at: String,
    pub state: TxState,
    pub signature: String,
    pub input_mint: String,
    pub output_mint: String,
    pub amount_native: u64,
}

impl TxRecord {
    pub fn new(state: TxState, signature: &str, order: &OrderRequest) -> Self {
        let at = OffsetDateTime::now_utc()
            .format(&Rfc3339)
            .unwrap_or_else(|_| "unknown".to_string());
        Self {
            at,
            state,
            signature: signature.to_string(),
            input_mint: order.input_mint.clone(),
            output_mint: order.output_mint.clone(),
            amount_native: order.amount_native,
        }
    }
}

pub trait TxJournal: Send + Sync {
    fn record(&self, record: &TxRecord) -> Result<()>;
}

/// Append-only JSON lines, one per state change.
pub struct FileTxJournal {
    path: PathBuf,
    lock: Mutex<()>,
}

impl FileTxJournal {
    pub fn new(path: PathBuf) -> Self {
        Self {
            path,
            lock: Mutex::new(()),
        }
    }
}

impl TxJournal for FileTxJournal {
    fn record(&self, record: &TxRecord) -> Result<()> {
        let _guard = self.lock.lock();
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent)
                .with_context(|| format!("create dir {}", parent.display()))?;
        }
        let mut line = serde_json::to_string(record).context("encode journal record")?;
        line.push('\n');
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .with_context(|| format!("open journal {}", self.path.display()))?;
        file.write_all(line.as_bytes())
            .with_context(|| format!("append journal {}", self.path.display()))?;
        Ok(())
    }
}

/// Latest record per signature whose state is not final, oldest first.
pub fn unresolved_entries(path: &Path) -> Result<Vec<TxRecord>> {
    if !path.exists() {
        return Ok(Vec::new());
    }
    let file =
        fs::File::open(path).with_context(|| format!("open journal {}", path.display()))?;
    let mut latest: Vec<TxRecord> = Vec::new();
    for (index, line) in BufReader::new(file).lines().enumerate() {
        let line = line.with_context(|| format!("read journal {}", path.display()))?;
        if line.trim().is_empty() {
            continue;
        }
        let record: TxRecord = match serde_json::from_str(&line) {
            Ok(record) => record,
            Err(err) => {
                tracing::warn!(event = "journal_line_skipped", line = index + 1, error = %err);
                continue;
            }
        };
        latest.retain(|existing| existing.signature != record.signature);
        latest.push(record);
    }
    latest.retain(|record| !record.state.is_final());
    Ok(latest)
}

#[cfg(test)]
#[derive(Default)]
pub struct MemoryJournal {
    records: Mutex<Vec<TxRecord>>,
}

#[cfg(test)]
impl MemoryJournal {
    pub fn states(&self, signature: &str) -> Vec<TxState> {
        self.records
            .lock()
            .iter()
            .filter(|record| record.signature == signature)
            .map(|record| record.state)
            .collect()
    }
}

#[cfg(test)]
impl TxJournal for MemoryJournal {
    fn record(&self, record: &TxRecord) -> Result<()> {
        self.records.lock().push(record.clone());
        Ok(())
    }
}

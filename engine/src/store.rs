use std::fs;
use std::path::PathBuf;

use multisend_core::error::EngineError;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RowStatus {
    Success,
    Failed,
    Skipped,
}

impl RowStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            RowStatus::Success => "success",
            RowStatus::Failed => "failed",
            RowStatus::Skipped => "skipped",
        }
    }
}

/// One row's final fate, appended to the persisted report.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResultRecord {
    /// Offset into the ordered recipient list.
    pub index: usize,
    pub address: String,
    pub amount: String,
    pub status: RowStatus,
    pub tx_hash: Option<String>,
    pub detail: Option<String>,
}

/// The persistence collaborator: a resume offset plus an append-only
/// result report. The offset must be monotonically increasing and
/// idempotent to re-read after a crash.
pub trait StateStore: Send + Sync + 'static {
    fn read_checkpoint(&self) -> Result<usize, EngineError>;
    fn write_checkpoint(&self, offset: usize) -> Result<(), EngineError>;
    fn append_result(&self, record: &ResultRecord) -> Result<(), EngineError>;
}

/// File-backed store: a single-integer checkpoint file and a CSV report.
pub struct FsStateStore {
    checkpoint_path: PathBuf,
    report_path: PathBuf,
}

impl FsStateStore {
    pub fn new(checkpoint_path: impl Into<PathBuf>, report_path: impl Into<PathBuf>) -> Self {
        Self {
            checkpoint_path: checkpoint_path.into(),
            report_path: report_path.into(),
        }
    }

    pub fn reset_checkpoint(&self) -> Result<(), EngineError> {
        if self.checkpoint_path.exists() {
            fs::remove_file(&self.checkpoint_path).map_err(|e| EngineError::StoreError {
                message: format!("Failed to reset checkpoint: {e}"),
            })?;
        }
        Ok(())
    }
}

impl StateStore for FsStateStore {
    fn read_checkpoint(&self) -> Result<usize, EngineError> {
        if !self.checkpoint_path.exists() {
            return Ok(0);
        }

        let raw = fs::read_to_string(&self.checkpoint_path).map_err(|e| {
            EngineError::StoreError {
                message: format!("Failed to read checkpoint: {e}"),
            }
        })?;

        raw.trim()
            .parse::<usize>()
            .map_err(|e| EngineError::StoreError {
                message: format!("Corrupt checkpoint {raw:?}: {e}"),
            })
    }

    fn write_checkpoint(&self, offset: usize) -> Result<(), EngineError> {
        // The offset only ever moves forward; a stale writer must not be
        // able to rewind a more advanced run.
        let current = self.read_checkpoint().unwrap_or(0);
        if offset < current {
            tracing::warn!(offset, current, "refusing to rewind checkpoint");
            return Ok(());
        }

        fs::write(&self.checkpoint_path, offset.to_string()).map_err(|e| {
            EngineError::StoreError {
                message: format!("Failed to write checkpoint: {e}"),
            }
        })
    }

    fn append_result(&self, record: &ResultRecord) -> Result<(), EngineError> {
        let is_new = !self.report_path.exists();
        let file = fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.report_path)
            .map_err(|e| EngineError::StoreError {
                message: format!("Failed to open report: {e}"),
            })?;

        let mut writer = csv::WriterBuilder::new()
            .has_headers(false)
            .from_writer(file);

        if is_new {
            writer
                .write_record(["index", "address", "amount", "status", "tx_hash", "detail"])
                .map_err(|e| EngineError::StoreError {
                    message: format!("Failed to write report header: {e}"),
                })?;
        }

        writer
            .write_record([
                record.index.to_string().as_str(),
                record.address.as_str(),
                record.amount.as_str(),
                record.status.as_str(),
                record.tx_hash.as_deref().unwrap_or_default(),
                record.detail.as_deref().unwrap_or_default(),
            ])
            .map_err(|e| EngineError::StoreError {
                message: format!("Failed to append report row: {e}"),
            })?;

        writer.flush().map_err(|e| EngineError::StoreError {
            message: format!("Failed to flush report: {e}"),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn store() -> (tempfile::TempDir, FsStateStore) {
        let dir = tempfile::tempdir().unwrap();
        let store = FsStateStore::new(
            dir.path().join("checkpoint.txt"),
            dir.path().join("report.csv"),
        );
        (dir, store)
    }

    #[test]
    fn missing_checkpoint_reads_as_zero() {
        let (_dir, store) = store();
        assert_eq!(store.read_checkpoint().unwrap(), 0);
    }

    #[test]
    fn checkpoint_roundtrip_is_idempotent() {
        let (_dir, store) = store();
        store.write_checkpoint(7).unwrap();
        assert_eq!(store.read_checkpoint().unwrap(), 7);
        assert_eq!(store.read_checkpoint().unwrap(), 7);
    }

    #[test]
    fn checkpoint_never_rewinds() {
        let (_dir, store) = store();
        store.write_checkpoint(10).unwrap();
        store.write_checkpoint(3).unwrap();
        assert_eq!(store.read_checkpoint().unwrap(), 10);
    }

    #[test]
    fn report_appends_with_header_once() {
        let (dir, store) = store();
        for index in 0..2 {
            store
                .append_result(&ResultRecord {
                    index,
                    address: "0xabc".to_string(),
                    amount: "1".to_string(),
                    status: RowStatus::Success,
                    tx_hash: Some("0xdead".to_string()),
                    detail: None,
                })
                .unwrap();
        }

        let contents = fs::read_to_string(dir.path().join("report.csv")).unwrap();
        let lines: Vec<&str> = contents.lines().collect();
        assert_eq!(lines.len(), 3);
        assert!(lines[0].starts_with("index,address"));
        assert!(lines[1].contains("success"));
    }
}

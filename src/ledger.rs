use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fs::{self, File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};

use crate::error::LedgerError;

/// One confirmed message-to-note conversion.
///
/// Records are append-only: once written they are never mutated or removed
/// except by an explicit user-triggered [`Ledger::reset`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProcessedRecord {
    pub message_id: String,
    pub processed_at: DateTime<Utc>,
}

/// Durable set of processed message ids.
///
/// Backed by a JSON-lines file, one record per line, appended and fsynced
/// before `mark_processed` reports success. The full set is held in memory
/// for O(1) lookups; the file is only read at startup.
///
/// A malformed line followed by more data means the file was damaged by
/// something other than a torn final append, and the ledger refuses to load:
/// running with an unknown dedup state risks duplicate notes or silently
/// dropped messages.
#[derive(Debug)]
pub struct Ledger {
    path: PathBuf,
    file: File,
    index: HashSet<String>,
}

impl Ledger {
    pub fn open(path: &Path) -> Result<Self, LedgerError> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }

        let mut index = HashSet::new();
        if path.exists() {
            let contents = fs::read_to_string(path)?;
            let ends_with_newline = contents.ends_with('\n');
            let lines: Vec<&str> = contents.lines().collect();

            for (i, line) in lines.iter().enumerate() {
                if line.trim().is_empty() {
                    continue;
                }
                match serde_json::from_str::<ProcessedRecord>(line) {
                    Ok(record) => {
                        index.insert(record.message_id);
                    }
                    Err(e) => {
                        let is_torn_tail = i == lines.len() - 1 && !ends_with_newline;
                        if is_torn_tail {
                            // The append that produced this line never returned
                            // success, so dropping it cannot lose a confirmed record.
                            tracing::warn!(
                                path = %path.display(),
                                "dropping torn final ledger line"
                            );
                        } else {
                            return Err(LedgerError::Corrupt {
                                line: i + 1,
                                message: e.to_string(),
                            });
                        }
                    }
                }
            }
        }

        let file = OpenOptions::new().create(true).append(true).open(path)?;

        tracing::debug!(
            path = %path.display(),
            records = index.len(),
            "ledger loaded"
        );

        Ok(Self {
            path: path.to_path_buf(),
            file,
            index,
        })
    }

    pub fn is_processed(&self, message_id: &str) -> bool {
        self.index.contains(message_id)
    }

    /// Record a message id as processed. Idempotent: marking an id that is
    /// already present succeeds without touching the file.
    pub fn mark_processed(&mut self, message_id: &str) -> Result<(), LedgerError> {
        if self.index.contains(message_id) {
            return Ok(());
        }

        let record = ProcessedRecord {
            message_id: message_id.to_string(),
            processed_at: Utc::now(),
        };
        let mut line = serde_json::to_string(&record)
            .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e))?;
        line.push('\n');

        self.file.write_all(line.as_bytes())?;
        self.file.sync_data()?;

        self.index.insert(record.message_id);
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.index.len()
    }

    pub fn is_empty(&self) -> bool {
        self.index.is_empty()
    }

    /// Explicit user-triggered state reset. Truncates the file and clears the
    /// in-memory index; the next cycle treats every message as new.
    pub fn reset(&mut self) -> Result<(), LedgerError> {
        self.file = OpenOptions::new()
            .create(true)
            .write(true)
            .truncate(true)
            .open(&self.path)?;
        self.file.sync_data()?;
        self.index.clear();
        tracing::info!(path = %self.path.display(), "ledger reset");
        Ok(())
    }
}

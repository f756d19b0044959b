//! Newline-delimited JSON snapshot of the aggregate state.
//!
//! Each line is one metric record in wire form. Counters are written as
//! their running totals and replayed as deltas on restore, so a restore
//! must be applied to an empty store exactly once.

use crate::error::{Result, StorageError};
use crate::AggregateState;
use statmon_common::types::Metric;
use std::fs::File;
use std::io::{BufRead, BufReader, BufWriter, ErrorKind, Write};
use std::path::{Path, PathBuf};

#[derive(Debug, Clone)]
pub struct SnapshotStore {
    path: PathBuf,
}

impl SnapshotStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn temp_path(&self) -> PathBuf {
        let mut name = self
            .path
            .file_name()
            .map(|n| n.to_os_string())
            .unwrap_or_default();
        name.push(".tmp");
        self.path.with_file_name(name)
    }

    /// Writes `state` to the snapshot file, replacing the previous one.
    ///
    /// The records go to a sibling temp file which is then renamed into
    /// place, so an interrupted save leaves the old snapshot intact.
    /// Returns the number of records written.
    pub fn save(&self, state: &AggregateState) -> Result<usize> {
        let io_err = |source| StorageError::Snapshot {
            path: self.path.clone(),
            source,
        };
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent).map_err(io_err)?;
            }
        }

        let tmp = self.temp_path();
        let file = File::create(&tmp).map_err(io_err)?;
        let mut out = BufWriter::new(file);
        let records = state.to_metrics();
        for record in &records {
            serde_json::to_writer(&mut out, record)?;
            out.write_all(b"\n").map_err(io_err)?;
        }
        let file = out.into_inner().map_err(|e| io_err(e.into_error()))?;
        file.sync_all().map_err(io_err)?;
        drop(file);
        std::fs::rename(&tmp, &self.path).map_err(io_err)?;

        tracing::debug!(path = %self.path.display(), records = records.len(), "Snapshot saved");
        Ok(records.len())
    }

    /// Reads the snapshot back in file order.
    ///
    /// A missing or unreadable file yields no records. Reading stops at the
    /// first line that does not decode, keeping what came before it.
    pub fn restore(&self) -> Vec<Metric> {
        let file = match File::open(&self.path) {
            Ok(f) => f,
            Err(e) if e.kind() == ErrorKind::NotFound => {
                tracing::info!(path = %self.path.display(), "No snapshot found, starting empty");
                return Vec::new();
            }
            Err(e) => {
                tracing::warn!(path = %self.path.display(), error = %e, "Snapshot unreadable, starting empty");
                return Vec::new();
            }
        };

        let mut records = Vec::new();
        for (lineno, line) in BufReader::new(file).lines().enumerate() {
            let line = match line {
                Ok(l) => l,
                Err(e) => {
                    tracing::warn!(line = lineno + 1, error = %e, "Snapshot read aborted");
                    break;
                }
            };
            if line.trim().is_empty() {
                continue;
            }
            match serde_json::from_str::<Metric>(&line) {
                Ok(m) => records.push(m),
                Err(e) => {
                    tracing::warn!(line = lineno + 1, error = %e, "Snapshot decode stopped at bad record");
                    break;
                }
            }
        }
        records
    }
}

//! Results storage and retrieval
//!
//! Persists the previous run as JSON so a host can show it again or feed the
//! failed hashes back into the runner as filters ("rerun failed").

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fs::{self, File};
use std::io::{BufReader, BufWriter};
use std::path::{Path, PathBuf};
use tracing::debug;

use crate::model::TestRecord;
use crate::report::RunSummary;

/// A persisted run.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct StoredRun {
    /// Timestamp when the run started
    pub started_at: DateTime<Utc>,

    /// Timestamp when the run completed
    pub completed_at: DateTime<Utc>,

    /// Aggregate counts
    pub total: usize,
    pub passed: usize,
    pub failed: usize,
    pub skipped: usize,

    /// Total duration in milliseconds
    pub duration_ms: u64,

    /// Stable selectors of the failing tests
    pub failed_hashes: Vec<String>,

    /// Individual test records
    pub records: Vec<TestRecord>,
}

impl StoredRun {
    pub fn from_summary(
        summary: &RunSummary,
        started_at: DateTime<Utc>,
        completed_at: DateTime<Utc>,
    ) -> Self {
        Self {
            started_at,
            completed_at,
            total: summary.total,
            passed: summary.passed,
            failed: summary.failed,
            skipped: summary.skipped,
            duration_ms: summary.total_duration_ms,
            failed_hashes: summary.failed_hashes(),
            records: summary.records.clone(),
        }
    }
}

/// JSON-backed store for the previous run.
pub struct ResultStore {
    path: PathBuf,
}

impl ResultStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Store under the platform data directory.
    pub fn default_location() -> Result<Self> {
        let dir = dirs::data_dir().context("No data directory available")?;
        Ok(Self::new(dir.join("testrig").join("last-run.json")))
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Save a run, replacing the previous one.
    pub fn save(&self, run: &StoredRun) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent).context("Failed to create results directory")?;
        }
        let file = File::create(&self.path).context("Failed to create results file")?;
        serde_json::to_writer_pretty(BufWriter::new(file), run)
            .context("Failed to serialize run")?;
        debug!("Saved run results to {}", self.path.display());
        Ok(())
    }

    /// Load the previous run.
    pub fn load(&self) -> Result<StoredRun> {
        let file = File::open(&self.path).context("Failed to open results file")?;
        let run = serde_json::from_reader(BufReader::new(file))
            .context("Failed to parse results file")?;
        Ok(run)
    }

    /// Failed-test selectors of the previous run, ready to feed back as
    /// hash filters. An absent store yields an empty list.
    pub fn failed_hashes(&self) -> Vec<String> {
        match self.load() {
            Ok(run) => run.failed_hashes,
            Err(_) => Vec::new(),
        }
    }

    /// Drop the stored run, if any.
    pub fn clear(&self) -> Result<()> {
        if self.path.exists() {
            fs::remove_file(&self.path).context("Failed to remove results file")?;
        }
        Ok(())
    }
}

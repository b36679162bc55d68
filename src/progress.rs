use crate::catalog::Product;
use std::collections::HashSet;
use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::PathBuf;
use thiserror::Error;
use tracing::{info, warn};

#[derive(Debug, Error)]
pub enum ProgressError {
    #[error("progress file io error: {0}")]
    Io(#[from] std::io::Error),
}

/// Durable record of which product names have completed enrichment, plus the
/// name list of the most recent batch.
///
/// The processed file is append-only across runs; the batch file is
/// overwritten each run and feeds the image stages.
#[derive(Debug, Clone)]
pub struct ProgressTracker {
    processed_path: PathBuf,
    batch_path: PathBuf,
}

impl ProgressTracker {
    pub fn new(processed_path: PathBuf, batch_path: PathBuf) -> Self {
        Self {
            processed_path,
            batch_path,
        }
    }

    /// Names already enriched, read as a set. A missing file is an empty set.
    pub fn processed_names(&self) -> Result<HashSet<String>, ProgressError> {
        if !self.processed_path.exists() {
            return Ok(HashSet::new());
        }
        let raw = fs::read_to_string(&self.processed_path)?;
        Ok(raw
            .lines()
            .map(str::trim)
            .filter(|l| !l.is_empty())
            .map(str::to_string)
            .collect())
    }

    /// Count of durable processed lines, for progress reporting. Duplicate
    /// lines (re-recorded names) count once.
    pub fn processed_count(&self) -> usize {
        self.processed_names().map(|s| s.len()).unwrap_or(0)
    }

    /// Select, in catalog order, up to `batch_size` products whose current
    /// name is non-empty and not yet processed.
    ///
    /// An unreadable processed file is reported and yields an empty batch:
    /// re-enriching already-processed items would clobber their names, so we
    /// make no progress rather than wrong progress.
    pub fn next_batch(&self, products: &[Product], batch_size: usize) -> Vec<Product> {
        let processed = match self.processed_names() {
            Ok(set) => set,
            Err(err) => {
                warn!(
                    target = "bodega.progress",
                    error = %err,
                    "cannot read processed set; selecting nothing this cycle"
                );
                return Vec::new();
            }
        };
        let mut batch = Vec::new();
        for product in products {
            let name = product.name.trim();
            if name.is_empty() || processed.contains(name) {
                continue;
            }
            batch.push(product.clone());
            if batch.len() >= batch_size {
                break;
            }
        }
        batch
    }

    /// Append every name to the durable set and overwrite the Current Batch
    /// file with exactly these names, in order.
    pub fn record_batch(&self, names: &[String]) -> Result<(), ProgressError> {
        let mut processed = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.processed_path)?;
        for name in names {
            writeln!(processed, "{name}")?;
        }

        let mut rendered = names.join("\n");
        if !rendered.is_empty() {
            rendered.push('\n');
        }
        fs::write(&self.batch_path, rendered)?;
        info!(
            target = "bodega.progress",
            count = names.len(),
            "batch recorded"
        );
        Ok(())
    }

    /// Names from the most recent enrichment run, or empty when no batch has
    /// been recorded yet.
    pub fn current_batch(&self) -> Vec<String> {
        if !self.batch_path.exists() {
            return Vec::new();
        }
        match fs::read_to_string(&self.batch_path) {
            Ok(raw) => raw
                .lines()
                .map(str::trim)
                .filter(|l| !l.is_empty())
                .map(str::to_string)
                .collect(),
            Err(err) => {
                warn!(
                    target = "bodega.progress",
                    error = %err,
                    "cannot read current batch file"
                );
                Vec::new()
            }
        }
    }
}

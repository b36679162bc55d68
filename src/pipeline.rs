use crate::catalog::{Catalog, ImageState};
use crate::compress::{UPLOAD_PROFILE, compress_to_budget};
use crate::config::{BATCH_SIZE, DUMMY_IMAGE_URL, MAX_UPLOAD_KB, Workspace};
use crate::enrich;
use crate::fetch::ImageFetcher;
use crate::ledger::LinkLedger;
use crate::llm::{GeminiClient, GeminiConfig};
use crate::matcher::{ReplacementStats, replace_images_for_names};
use crate::progress::ProgressTracker;
use crate::search::{ImageSearchClient, SearchConfig};
use crate::storage::StorageClient;
use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::{Value, json};
use std::collections::HashSet;
use std::fs;
use std::future::Future;
use std::path::Path;
use std::sync::Arc;
use std::time::Instant;
use thiserror::Error;
use tracing::{info, warn};

#[derive(Debug, Error)]
#[error("stage `{stage}` failed: {message}")]
pub struct PipelineError {
    stage: &'static str,
    message: String,
    kind: PipelineErrorKind,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PipelineErrorKind {
    InvalidInput,
    Internal,
}

impl PipelineError {
    pub fn invalid_input(stage: &'static str, message: impl Into<String>) -> Self {
        Self {
            stage,
            message: message.into(),
            kind: PipelineErrorKind::InvalidInput,
        }
    }

    pub fn internal(stage: &'static str, message: impl Into<String>) -> Self {
        Self {
            stage,
            message: message.into(),
            kind: PipelineErrorKind::Internal,
        }
    }

    pub fn stage(&self) -> &'static str {
        self.stage
    }

    pub fn kind(&self) -> PipelineErrorKind {
        self.kind
    }

    pub fn detail(&self) -> &str {
        &self.message
    }
}

#[derive(Debug)]
pub struct StageOutcome<T> {
    pub value: T,
    pub output: Value,
}

impl<T> StageOutcome<T> {
    fn new(value: T, output: Value) -> Self {
        Self { value, output }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct StageReport {
    pub name: String,
    pub elapsed_ms: u128,
    pub timestamp: DateTime<Utc>,
    pub output: Value,
}

impl StageReport {
    pub fn new(name: impl Into<String>, elapsed_ms: u128, output: Value) -> Self {
        Self {
            name: name.into(),
            elapsed_ms,
            timestamp: Utc::now(),
            output,
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct RunOptions {
    pub input: Option<String>,
    pub tidy_before: bool,
    pub tidy_after: bool,
    pub clear_links: bool,
    pub batch_size: Option<usize>,
}

#[derive(Debug, Serialize)]
pub struct RunReport {
    pub stages: Vec<StageReport>,
    pub processed: usize,
    pub total: usize,
}

/// Orchestrates one refresh cycle over the catalog: pick an unprocessed
/// batch, rewrite names and descriptions, acquire images, upload them, and
/// link the uploaded URLs back into the catalog.
pub struct Pipeline {
    workspace: Workspace,
    llm: Arc<GeminiClient>,
    fetcher: ImageFetcher,
    storage: Option<StorageClient>,
    tracker: ProgressTracker,
    batch_size: usize,
}

impl Pipeline {
    pub fn from_env(workspace: Workspace) -> Self {
        let llm = Arc::new(GeminiClient::new(GeminiConfig::from_env()));
        let search = ImageSearchClient::new(SearchConfig::from_env());
        let fetcher = ImageFetcher::new(search, workspace.image_dir());
        let storage = StorageClient::from_env();
        if storage.is_none() {
            warn!(
                target = "bodega.pipeline",
                "object storage not configured, uploads will be skipped"
            );
        }
        let tracker =
            ProgressTracker::new(workspace.processed_path(), workspace.batch_names_path());
        Self {
            workspace,
            llm,
            fetcher,
            storage,
            tracker,
            batch_size: *BATCH_SIZE,
        }
    }

    pub async fn run(&self, options: RunOptions) -> Result<RunReport, PipelineError> {
        let batch_size = options.batch_size.unwrap_or(self.batch_size);
        let catalog_path = self.workspace.catalog_path(options.input.as_deref());
        let mut stages = Vec::new();

        let mut catalog = self
            .capture_stage("load_catalog", &mut stages, async {
                let catalog = Catalog::load(&catalog_path)
                    .map_err(|err| PipelineError::invalid_input("load_catalog", err.to_string()))?;
                let output = json!({
                    "path": catalog_path.display().to_string(),
                    "products": catalog.len(),
                    "wrapper_key": catalog.wrapper_key(),
                });
                Ok(StageOutcome::new(catalog, output))
            })
            .await?;

        if options.tidy_before {
            self.capture_stage("tidy", &mut stages, async {
                let removed = self.tidy(options.clear_links)?;
                Ok(StageOutcome::new((), json!({ "removed_files": removed })))
            })
            .await?;
        }

        fs::create_dir_all(self.workspace.image_dir())
            .map_err(|err| PipelineError::internal("prepare_workspace", err.to_string()))?;

        let batch = self
            .capture_stage("select_batch", &mut stages, async {
                let batch = self.tracker.next_batch(&catalog.products, batch_size);
                let output = json!({
                    "batch_size": batch_size,
                    "selected": batch.len(),
                    "already_processed": self.tracker.processed_count(),
                    "names": batch.iter().map(|p| p.name.as_str()).collect::<Vec<_>>(),
                });
                Ok(StageOutcome::new(batch, output))
            })
            .await?;

        let batch_names = if batch.is_empty() {
            // Everything is enriched already. Fall through to the upload and
            // relink passes so images fetched by an interrupted run still
            // make it into the catalog.
            let leftover = self.tracker.current_batch();
            info!(
                target = "bodega.pipeline",
                leftover = leftover.len(),
                "no unprocessed products, running replacement-only pass"
            );
            leftover
        } else {
            let started = Instant::now();
            match enrich::enrich_batch(&self.llm, &batch).await {
                Err(err) => {
                    // The batch stays unrecorded and is retried next run.
                    // The run itself continues: images left over from an
                    // interrupted run still get uploaded and linked below.
                    warn!(target = "bodega.pipeline", error = %err, "enrichment failed, batch left unprocessed");
                    stages.push(StageReport::new(
                        "enrich",
                        started.elapsed().as_millis(),
                        json!({ "error": err.to_string(), "batch": batch.len() }),
                    ));
                    self.tracker.current_batch()
                }
                Ok(results) => {
                    let omitted = enrich::omitted_names(&batch, &results);
                    if !omitted.is_empty() {
                        warn!(
                            target = "bodega.pipeline",
                            omitted = ?omitted,
                            "model response omitted items, they stay unprocessed"
                        );
                    }
                    let (updated, canonical) =
                        enrich::apply_enhancements(&mut catalog.products, &results);
                    stages.push(StageReport::new(
                        "enrich",
                        started.elapsed().as_millis(),
                        json!({
                            "batch": batch.len(),
                            "returned": results.len(),
                            "updated": updated,
                            "omitted": omitted,
                        }),
                    ));

                    if let Err(err) = self.tracker.record_batch(&canonical) {
                        warn!(target = "bodega.pipeline", error = %err, "could not record processed names");
                    }
                    catalog
                        .save(&catalog_path)
                        .map_err(|err| PipelineError::internal("enrich", err.to_string()))?;

                    self.capture_stage("fetch_images", &mut stages, async {
                        let mut fetched = Vec::new();
                        let mut failed = Vec::new();
                        for name in &canonical {
                            match self.fetcher.acquire_best_image(name).await {
                                Ok(path) => fetched.push(path.display().to_string()),
                                Err(err) => {
                                    warn!(target = "bodega.pipeline", product = %name, error = %err, "image acquisition failed");
                                    failed.push(name.clone());
                                }
                            }
                        }
                        Ok(StageOutcome::new(
                            (),
                            json!({ "fetched": fetched, "failed": failed }),
                        ))
                    })
                    .await?;

                    canonical
                }
            }
        };

        let ledger = self
            .capture_stage("upload", &mut stages, async {
                let (ledger, uploaded, skipped) = self.upload_scratch_images().await;
                // An empty sweep must leave links from earlier runs on disk.
                if !ledger.is_empty() {
                    ledger
                        .write(&self.workspace.links_path(), self.batch_size)
                        .map_err(|err| PipelineError::internal("upload", err.to_string()))?;
                }
                Ok(StageOutcome::new(
                    ledger,
                    json!({ "uploaded": uploaded, "skipped": skipped }),
                ))
            })
            .await?;

        // Uploads from earlier runs may still be linkable when this run
        // uploaded nothing.
        let ledger = if ledger.is_empty() {
            LinkLedger::load(&self.workspace.links_path())
                .map_err(|err| PipelineError::internal("relink", err.to_string()))?
        } else {
            ledger
        };

        self.capture_stage("relink", &mut stages, async {
            let base_map = ledger.base_map();
            let name_set: HashSet<String> = batch_names.iter().cloned().collect();
            let batch_stats =
                replace_images_for_names(&mut catalog, Some(&name_set), &base_map, &DUMMY_IMAGE_URL);
            // Safety net for entries missed by earlier runs.
            let global_stats =
                replace_images_for_names(&mut catalog, None, &base_map, &DUMMY_IMAGE_URL);
            catalog
                .save(&catalog_path)
                .map_err(|err| PipelineError::internal("relink", err.to_string()))?;
            Ok(StageOutcome::new(
                (),
                json!({
                    "links": base_map.len(),
                    "batch_updated": batch_stats.updated,
                    "global_updated": global_stats.updated,
                    "still_missing": count_needing(&catalog),
                }),
            ))
        })
        .await?;

        if options.tidy_after {
            self.capture_stage("tidy", &mut stages, async {
                let removed = self.tidy(options.clear_links)?;
                Ok(StageOutcome::new((), json!({ "removed_files": removed })))
            })
            .await?;
        }

        let processed = self.tracker.processed_count();
        let total = catalog.len();
        info!(
            target = "bodega.pipeline",
            processed, total, "run complete"
        );
        Ok(RunReport {
            stages,
            processed,
            total,
        })
    }

    /// Enrich one batch of names and descriptions without touching images.
    pub async fn enhance_only(
        &self,
        input: Option<&str>,
        batch_size: Option<usize>,
    ) -> Result<usize, PipelineError> {
        let batch_size = batch_size.unwrap_or(self.batch_size);
        let catalog_path = self.workspace.catalog_path(input);
        let mut catalog = Catalog::load(&catalog_path)
            .map_err(|err| PipelineError::invalid_input("enrich", err.to_string()))?;
        let batch = self.tracker.next_batch(&catalog.products, batch_size);
        if batch.is_empty() {
            info!(target = "bodega.pipeline", "no unprocessed products");
            return Ok(0);
        }
        let results = enrich::enrich_batch(&self.llm, &batch)
            .await
            .map_err(|err| PipelineError::internal("enrich", err.to_string()))?;
        let omitted = enrich::omitted_names(&batch, &results);
        if !omitted.is_empty() {
            warn!(
                target = "bodega.pipeline",
                omitted = ?omitted,
                "model response omitted items, they stay unprocessed"
            );
        }
        let (updated, canonical) = enrich::apply_enhancements(&mut catalog.products, &results);
        self.tracker
            .record_batch(&canonical)
            .map_err(|err| PipelineError::internal("enrich", err.to_string()))?;
        catalog
            .save(&catalog_path)
            .map_err(|err| PipelineError::internal("enrich", err.to_string()))?;
        Ok(updated)
    }

    /// Acquire images for the names in the last recorded batch.
    pub async fn fetch_images_only(&self) -> Result<usize, PipelineError> {
        fs::create_dir_all(self.workspace.image_dir())
            .map_err(|err| PipelineError::internal("fetch_images", err.to_string()))?;
        let names = self.tracker.current_batch();
        if names.is_empty() {
            info!(target = "bodega.pipeline", "no recorded batch to fetch for");
            return Ok(0);
        }
        let mut fetched = 0;
        for name in &names {
            match self.fetcher.acquire_best_image(name).await {
                Ok(path) => {
                    info!(target = "bodega.pipeline", product = %name, path = %path.display(), "image saved");
                    fetched += 1;
                }
                Err(err) => {
                    warn!(target = "bodega.pipeline", product = %name, error = %err, "image acquisition failed");
                }
            }
        }
        Ok(fetched)
    }

    /// Upload everything in the scratch directory and rewrite the ledger.
    /// Uploading nothing leaves the existing ledger file alone.
    pub async fn upload_only(&self) -> Result<usize, PipelineError> {
        let (ledger, uploaded, skipped) = self.upload_scratch_images().await;
        if !ledger.is_empty() {
            ledger
                .write(&self.workspace.links_path(), self.batch_size)
                .map_err(|err| PipelineError::internal("upload", err.to_string()))?;
        }
        if !skipped.is_empty() {
            warn!(target = "bodega.pipeline", skipped = ?skipped, "some uploads failed");
        }
        Ok(uploaded.len())
    }

    /// Relink catalog entries against the on-disk link ledger without
    /// enriching or uploading anything. `all` ignores the last batch scope.
    pub async fn relink_only(
        &self,
        input: Option<&str>,
        all: bool,
    ) -> Result<ReplacementStats, PipelineError> {
        let catalog_path = self.workspace.catalog_path(input);
        let mut catalog = Catalog::load(&catalog_path)
            .map_err(|err| PipelineError::invalid_input("relink", err.to_string()))?;
        let ledger = LinkLedger::load(&self.workspace.links_path())
            .map_err(|err| PipelineError::internal("relink", err.to_string()))?;
        let base_map = ledger.base_map();

        let stats = if all {
            replace_images_for_names(&mut catalog, None, &base_map, &DUMMY_IMAGE_URL)
        } else {
            let names: HashSet<String> = self.tracker.current_batch().into_iter().collect();
            replace_images_for_names(&mut catalog, Some(&names), &base_map, &DUMMY_IMAGE_URL)
        };
        catalog
            .save(&catalog_path)
            .map_err(|err| PipelineError::internal("relink", err.to_string()))?;
        info!(
            target = "bodega.pipeline",
            updated = stats.updated,
            no_link = stats.no_link,
            "relink complete"
        );
        Ok(stats)
    }

    /// Processed versus total counts for the catalog at `input`.
    pub fn progress(&self, input: Option<&str>) -> Result<(usize, usize), PipelineError> {
        let catalog_path = self.workspace.catalog_path(input);
        let catalog = Catalog::load(&catalog_path)
            .map_err(|err| PipelineError::invalid_input("progress", err.to_string()))?;
        Ok((self.tracker.processed_count(), catalog.len()))
    }

    /// Remove scratch images, and the link ledger only when asked. The
    /// processed-names and batch files are cross-run state and always
    /// survive.
    pub fn tidy(&self, clear_links: bool) -> Result<usize, PipelineError> {
        let mut removed = 0;
        let image_dir = self.workspace.image_dir();
        if image_dir.is_dir() {
            let entries = fs::read_dir(&image_dir)
                .map_err(|err| PipelineError::internal("tidy", err.to_string()))?;
            for entry in entries.flatten() {
                let path = entry.path();
                if path.is_file() {
                    if let Err(err) = fs::remove_file(&path) {
                        warn!(target = "bodega.pipeline", path = %path.display(), error = %err, "could not remove scratch file");
                    } else {
                        removed += 1;
                    }
                }
            }
        }
        if clear_links {
            let path = self.workspace.links_path();
            if path.is_file() {
                if let Err(err) = fs::remove_file(&path) {
                    warn!(target = "bodega.pipeline", path = %path.display(), error = %err, "could not remove file");
                } else {
                    removed += 1;
                }
            }
        }
        Ok(removed)
    }

    /// Compress every image in the scratch directory to the upload budget
    /// and push it to object storage. Infallible per file; failures are
    /// logged and skipped.
    async fn upload_scratch_images(&self) -> (LinkLedger, Vec<String>, Vec<String>) {
        let mut ledger = LinkLedger::new();
        let mut uploaded = Vec::new();
        let mut skipped = Vec::new();

        let Some(storage) = &self.storage else {
            warn!(
                target = "bodega.pipeline",
                "skipping upload, object storage not configured"
            );
            return (ledger, uploaded, skipped);
        };

        let image_dir = self.workspace.image_dir();
        let mut paths: Vec<_> = match fs::read_dir(&image_dir) {
            Ok(entries) => entries
                .flatten()
                .map(|entry| entry.path())
                .filter(|path| is_image_file(path))
                .collect(),
            Err(err) => {
                warn!(target = "bodega.pipeline", dir = %image_dir.display(), error = %err, "could not list scratch directory");
                return (ledger, uploaded, skipped);
            }
        };
        paths.sort();

        let budget = (*MAX_UPLOAD_KB * 1024) as usize;
        for path in paths {
            let Some(stem) = path.file_stem().and_then(|s| s.to_str()) else {
                continue;
            };
            let key = format!("{stem}.jpeg");
            let result = async {
                let raw = fs::read(&path)?;
                let image = image::load_from_memory(&raw)
                    .map_err(|err| std::io::Error::other(err.to_string()))?;
                let compressed = compress_to_budget(&image, budget, &UPLOAD_PROFILE)
                    .map_err(|err| std::io::Error::other(err.to_string()))?;
                if !compressed.within_budget {
                    warn!(
                        target = "bodega.pipeline",
                        key,
                        size = compressed.bytes.len(),
                        "uploading over budget, minimum dimensions reached"
                    );
                }
                storage
                    .upload_jpeg(&key, compressed.bytes)
                    .await
                    .map_err(|err| std::io::Error::other(err.to_string()))
            }
            .await;

            match result {
                Ok(url) => {
                    ledger.insert(key.clone(), url);
                    uploaded.push(key);
                }
                Err(err) => {
                    warn!(target = "bodega.pipeline", path = %path.display(), error = %err, "upload failed");
                    skipped.push(key);
                }
            }
        }
        (ledger, uploaded, skipped)
    }

    async fn capture_stage<T, Fut>(
        &self,
        name: &'static str,
        stages: &mut Vec<StageReport>,
        fut: Fut,
    ) -> Result<T, PipelineError>
    where
        Fut: Future<Output = Result<StageOutcome<T>, PipelineError>>,
    {
        let started = Instant::now();
        let outcome = fut.await?;
        let elapsed_ms = started.elapsed().as_millis();
        stages.push(StageReport::new(name, elapsed_ms, outcome.output));
        Ok(outcome.value)
    }
}

fn count_needing(catalog: &Catalog) -> usize {
    catalog
        .products
        .iter()
        .filter(|p| p.image_state(&DUMMY_IMAGE_URL) == ImageState::NeedsImage)
        .count()
}

fn is_image_file(path: &Path) -> bool {
    let Some(ext) = path.extension().and_then(|e| e.to_str()) else {
        return false;
    };
    matches!(
        ext.to_ascii_lowercase().as_str(),
        "jpg" | "jpeg" | "png" | "webp"
    )
}

use crate::compress::{self, ACQUISITION_PROFILE, CompressError};
use crate::config::MAX_IMAGE_KB;
use crate::http::build_download_client;
use crate::matcher::sanitize_name;
use crate::search::ImageSearchClient;
use image::{DynamicImage, GenericImageView};
use reqwest::Client;
use std::fs;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tokio::time::{Duration, sleep};
use tracing::{info, warn};

const SEARCH_ATTEMPTS: u32 = 3;
const DOWNLOAD_PAUSE_MS: u64 = 500;

#[derive(Debug, Error)]
pub enum FetchError {
    #[error("no image urls found after retries")]
    NoUrls,
    #[error("no images downloaded after retries")]
    NoDownloads,
    #[error("compression failed: {0}")]
    Compress(#[from] CompressError),
    #[error("cannot save image: {0}")]
    Io(#[from] std::io::Error),
}

/// Per-name acquisition: search, download candidates, score, compress the
/// winner, and save it under a collision-free sanitized filename.
pub struct ImageFetcher {
    search: ImageSearchClient,
    http: Client,
    image_dir: PathBuf,
    candidates: usize,
}

impl ImageFetcher {
    pub fn new(search: ImageSearchClient, image_dir: PathBuf) -> Self {
        Self {
            search,
            http: build_download_client(),
            image_dir,
            candidates: 5,
        }
    }

    /// A failure here is scoped to one product name; the caller moves on to
    /// the next.
    pub async fn acquire_best_image(&self, product_name: &str) -> Result<PathBuf, FetchError> {
        let mut downloaded: Vec<DynamicImage> = Vec::new();
        let mut saw_urls = false;

        for attempt in 1..=SEARCH_ATTEMPTS {
            let urls = self
                .search
                .search_image_urls(product_name, self.candidates)
                .await;
            if urls.is_empty() {
                if attempt == SEARCH_ATTEMPTS {
                    break;
                }
                sleep(Duration::from_secs(1u64 << attempt)).await;
                continue;
            }
            saw_urls = true;
            for url in &urls {
                sleep(Duration::from_millis(DOWNLOAD_PAUSE_MS)).await;
                if let Some(img) = self.download_image(url).await {
                    downloaded.push(img);
                }
            }
            if !downloaded.is_empty() {
                break;
            }
            if attempt < SEARCH_ATTEMPTS {
                // backoff 2, 4, 8 before the next whole-search retry
                sleep(Duration::from_secs(1u64 << attempt)).await;
            }
        }

        if downloaded.is_empty() {
            return Err(if saw_urls {
                FetchError::NoDownloads
            } else {
                FetchError::NoUrls
            });
        }

        let Some(best) = downloaded.into_iter().max_by(|a, b| {
            score_image(a)
                .partial_cmp(&score_image(b))
                .unwrap_or(std::cmp::Ordering::Equal)
        }) else {
            return Err(FetchError::NoDownloads);
        };

        let budget = (*MAX_IMAGE_KB as usize) * 1024;
        let compressed = compress::compress_to_budget(&best, budget, &ACQUISITION_PROFILE)?;
        if !compressed.within_budget {
            warn!(
                target = "bodega.fetch",
                name = product_name,
                size = compressed.bytes.len(),
                "image could not be shrunk to budget; saving oversized"
            );
        }

        let path = unique_path(&self.image_dir, &sanitize_name(product_name));
        fs::write(&path, &compressed.bytes)?;
        info!(
            target = "bodega.fetch",
            name = product_name,
            path = %path.display(),
            size = compressed.bytes.len(),
            quality = compressed.quality,
            "image saved"
        );
        Ok(path)
    }

    async fn download_image(&self, url: &str) -> Option<DynamicImage> {
        let response = match self.http.get(url).send().await {
            Ok(response) => response,
            Err(err) => {
                warn!(target = "bodega.fetch", url, error = %err, "download failed");
                return None;
            }
        };
        if !response.status().is_success() {
            warn!(target = "bodega.fetch", url, status = %response.status(), "download rejected");
            return None;
        }
        let content_type = response
            .headers()
            .get(reqwest::header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .unwrap_or_default()
            .to_lowercase();
        if !content_type.starts_with("image/") {
            warn!(target = "bodega.fetch", url, content_type, "non-image response");
            return None;
        }
        let bytes = match response.bytes().await {
            Ok(bytes) => bytes,
            Err(err) => {
                warn!(target = "bodega.fetch", url, error = %err, "body read failed");
                return None;
            }
        };
        match image::load_from_memory(&bytes) {
            Ok(img) => Some(img),
            Err(err) => {
                warn!(target = "bodega.fetch", url, error = %err, "undecodable image data");
                None
            }
        }
    }
}

/// Prefer larger minimum dimension and aspect ratios near square or 4:3.
pub fn score_image(image: &DynamicImage) -> f32 {
    let (width, height) = image.dimensions();
    score_dimensions(width, height)
}

fn score_dimensions(width: u32, height: u32) -> f32 {
    if height == 0 {
        return 0.0;
    }
    let min_side = width.min(height) as f32;
    let aspect = width as f32 / height as f32;
    let aspect_penalty = (aspect - 1.0)
        .abs()
        .min((aspect - 4.0 / 3.0).abs())
        .min((aspect - 3.0 / 4.0).abs());
    min_side - aspect_penalty * 50.0
}

/// First free path for the sanitized base name; existing files get a numeric
/// suffix rather than being overwritten.
fn unique_path(dir: &Path, base: &str) -> PathBuf {
    let mut path = dir.join(format!("{base}.jpg"));
    let mut counter = 1;
    while path.exists() {
        path = dir.join(format!("{base}_{counter}.jpg"));
        counter += 1;
    }
    path
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn score_prefers_larger_minimum_dimension() {
        assert!(score_dimensions(800, 800) > score_dimensions(400, 400));
    }

    #[test]
    fn score_penalizes_extreme_aspect_ratios() {
        // same minimum side, banner shape loses to square
        assert!(score_dimensions(500, 500) > score_dimensions(5000, 500));
    }

    #[test]
    fn score_accepts_four_by_three_both_ways() {
        let landscape = score_dimensions(800, 600);
        let portrait = score_dimensions(600, 800);
        let square = score_dimensions(600, 600);
        assert_eq!(landscape, square);
        assert_eq!(portrait, square);
    }

    #[test]
    fn score_zero_height_is_zero() {
        assert_eq!(score_dimensions(100, 0), 0.0);
    }

    #[test]
    fn unique_path_appends_numeric_suffix_on_collision() {
        let dir = tempfile::tempdir().unwrap();
        assert_eq!(
            unique_path(dir.path(), "masala_chai"),
            dir.path().join("masala_chai.jpg")
        );
        fs::write(dir.path().join("masala_chai.jpg"), b"x").unwrap();
        assert_eq!(
            unique_path(dir.path(), "masala_chai"),
            dir.path().join("masala_chai_1.jpg")
        );
        fs::write(dir.path().join("masala_chai_1.jpg"), b"x").unwrap();
        assert_eq!(
            unique_path(dir.path(), "masala_chai"),
            dir.path().join("masala_chai_2.jpg")
        );
    }
}

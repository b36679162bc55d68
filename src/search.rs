use crate::http::build_client;
use crate::keys::KeyPool;
use reqwest::{Client, StatusCode};
use serde::Deserialize;
use tokio::time::{Duration, sleep};
use tracing::{info, warn};

const SEARCH_URL: &str = "https://www.googleapis.com/customsearch/v1";

#[derive(Debug, Clone)]
pub struct SearchConfig {
    pub keys: Vec<String>,
    pub engine_id: String,
}

impl SearchConfig {
    pub fn from_env() -> Self {
        let keys = std::env::var("SEARCH_API_KEYS")
            .unwrap_or_default()
            .split(',')
            .map(|k| k.trim().to_string())
            .filter(|k| !k.is_empty())
            .collect();
        Self {
            keys,
            engine_id: std::env::var("SEARCH_ENGINE_ID").unwrap_or_default(),
        }
    }
}

/// Image-search collaborator. Rotates credentials on rate-limit or
/// invalid-key responses; with nothing configured it degrades to placeholder
/// URLs so the pipeline stays runnable end to end.
pub struct ImageSearchClient {
    http: Client,
    engine_id: String,
    pool: KeyPool,
}

impl ImageSearchClient {
    pub fn new(config: SearchConfig) -> Self {
        Self {
            http: build_client(),
            engine_id: config.engine_id,
            pool: KeyPool::new(config.keys),
        }
    }

    pub fn is_configured(&self) -> bool {
        !self.pool.is_empty() && !self.engine_id.is_empty()
    }

    /// Up to `num_images` candidate URLs for a free-text product name.
    /// Exhausting every credential ends the search for this name only; the
    /// caller sees an empty list, not an error.
    pub async fn search_image_urls(&self, product_name: &str, num_images: usize) -> Vec<String> {
        if !self.is_configured() {
            warn!(
                target = "bodega.search",
                "no search credentials configured; returning placeholder urls"
            );
            return placeholder_urls(product_name, num_images);
        }

        let mut attempt = 0u32;
        while let Some(key) = self.pool.current() {
            let request = self
                .http
                .get(SEARCH_URL)
                .query(&[
                    ("key", key),
                    ("cx", self.engine_id.as_str()),
                    ("q", product_name),
                    ("searchType", "image"),
                    ("num", &num_images.to_string()),
                    ("fileType", "jpg|jpeg|png"),
                    ("safe", "active"),
                ])
                .send()
                .await;

            match request {
                Ok(response) if response.status().is_success() => {
                    let payload: SearchResponse = match response.json().await {
                        Ok(payload) => payload,
                        Err(err) => {
                            warn!(target = "bodega.search", error = %err, "bad search payload");
                            return Vec::new();
                        }
                    };
                    let urls: Vec<String> = payload
                        .items
                        .into_iter()
                        .filter_map(|item| item.link)
                        .take(num_images)
                        .collect();
                    info!(
                        target = "bodega.search",
                        query = product_name,
                        found = urls.len(),
                        key = self.pool.position(),
                        "image search complete"
                    );
                    return urls;
                }
                Ok(response)
                    if matches!(
                        response.status(),
                        StatusCode::TOO_MANY_REQUESTS | StatusCode::FORBIDDEN
                    ) =>
                {
                    warn!(
                        target = "bodega.search",
                        key = self.pool.position(),
                        status = %response.status(),
                        "rate limit on current key"
                    );
                    if !self.pool.rotate() {
                        break;
                    }
                    sleep(Duration::from_secs((1u64 << attempt.min(4)) + 1)).await;
                }
                Ok(response)
                    if matches!(
                        response.status(),
                        StatusCode::BAD_REQUEST | StatusCode::UNAUTHORIZED
                    ) =>
                {
                    warn!(
                        target = "bodega.search",
                        key = self.pool.position(),
                        status = %response.status(),
                        "credential rejected"
                    );
                    if !self.pool.rotate() {
                        break;
                    }
                }
                Ok(response) => {
                    warn!(
                        target = "bodega.search",
                        status = %response.status(),
                        "unexpected search response"
                    );
                    if !self.pool.rotate() {
                        break;
                    }
                    sleep(Duration::from_secs(1)).await;
                }
                Err(err) => {
                    warn!(target = "bodega.search", error = %err, "search request error");
                    if !self.pool.rotate() {
                        break;
                    }
                    sleep(Duration::from_secs(1)).await;
                }
            }
            attempt += 1;
        }

        warn!(
            target = "bodega.search",
            query = product_name,
            "all search credentials exhausted; no results"
        );
        Vec::new()
    }
}

fn placeholder_urls(product_name: &str, num_images: usize) -> Vec<String> {
    let encoded = urlencoding::encode(product_name.trim()).replace("%20", "+");
    (1..=num_images)
        .map(|i| format!("https://placehold.co/600x400/3498db/ffffff?text={encoded}+{i}"))
        .collect()
}

#[derive(Debug, Deserialize)]
struct SearchResponse {
    #[serde(default)]
    items: Vec<SearchItem>,
}

#[derive(Debug, Deserialize)]
struct SearchItem {
    link: Option<String>,
}

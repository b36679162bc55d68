use crate::http::build_client;
use crate::keys::KeyPool;
use rand::Rng;
use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;
use tokio::time::{Duration, sleep};
use tracing::warn;

const GENERATE_URL_BASE: &str = "https://generativelanguage.googleapis.com/v1beta/models";

#[derive(Debug, Clone)]
pub struct GeminiConfig {
    pub model: String,
    pub keys: Vec<String>,
    pub max_retries: u32,
}

impl GeminiConfig {
    pub fn from_env() -> Self {
        let keys = std::env::var("GEMINI_API_KEYS")
            .unwrap_or_default()
            .split(',')
            .map(|k| k.trim().to_string())
            .filter(|k| !k.is_empty())
            .collect();
        Self {
            model: std::env::var("GEMINI_MODEL")
                .unwrap_or_else(|_| "gemini-2.5-flash-preview-05-20".into()),
            keys,
            max_retries: std::env::var("GEMINI_MAX_RETRIES")
                .ok()
                .and_then(|v| v.parse::<u32>().ok())
                .filter(|v| *v > 0)
                .unwrap_or(5),
        }
    }
}

#[derive(Debug, Error)]
pub enum GeminiError {
    #[error("no api keys configured")]
    NoCredentials,
    #[error("all api keys exhausted due to rate limits")]
    KeysExhausted,
    #[error("http error: {0}")]
    Http(String),
    #[error("invalid response: {0}")]
    InvalidResponse(String),
    #[error("api call failed after {0} attempts")]
    RetriesExhausted(u32),
}

pub struct GeminiClient {
    http: Client,
    model: String,
    pool: KeyPool,
    max_retries: u32,
}

impl GeminiClient {
    pub fn new(config: GeminiConfig) -> Self {
        Self {
            http: build_client(),
            model: config.model,
            pool: KeyPool::new(config.keys),
            max_retries: config.max_retries,
        }
    }

    pub fn has_credentials(&self) -> bool {
        !self.pool.is_empty()
    }

    /// Single structured-output call: fixed system instruction, free-text
    /// user query, and a declared JSON response schema. Returns the raw JSON
    /// text of the first candidate.
    ///
    /// Transient failures back off exponentially with jitter; HTTP 429
    /// rotates to the next key before the attempt is retried. An exhausted
    /// pool or retry budget is terminal for the whole call.
    pub async fn generate_json(
        &self,
        system_instruction: &str,
        user_query: &str,
        response_schema: Value,
    ) -> Result<String, GeminiError> {
        if self.pool.is_empty() {
            return Err(GeminiError::NoCredentials);
        }

        let body = GenerateRequest::structured(system_instruction, user_query, response_schema);

        let mut attempt = 0;
        while attempt < self.max_retries {
            let Some(key) = self.pool.current() else {
                return Err(GeminiError::KeysExhausted);
            };
            let url = format!(
                "{GENERATE_URL_BASE}/{model}:generateContent?key={key}",
                model = self.model
            );

            match self.http.post(&url).json(&body).send().await {
                Ok(response) if response.status() == StatusCode::TOO_MANY_REQUESTS => {
                    warn!(
                        target = "bodega.llm",
                        key = self.pool.position(),
                        "rate limit reached for current key"
                    );
                    if !self.pool.rotate() {
                        return Err(GeminiError::KeysExhausted);
                    }
                    // rotation replaces the backoff; the attempt still counts
                    attempt += 1;
                }
                Ok(response) if !response.status().is_success() => {
                    let status = response.status();
                    warn!(
                        target = "bodega.llm",
                        attempt = attempt + 1,
                        max = self.max_retries,
                        %status,
                        "generate call failed"
                    );
                    attempt += 1;
                    backoff(attempt).await;
                }
                Ok(response) => {
                    let payload: GenerateResponse = response
                        .json()
                        .await
                        .map_err(|err| GeminiError::InvalidResponse(err.to_string()))?;
                    return payload
                        .candidates
                        .into_iter()
                        .next()
                        .and_then(|c| c.content.parts.into_iter().next())
                        .map(|part| part.text)
                        .ok_or_else(|| GeminiError::InvalidResponse("empty candidates".into()));
                }
                Err(err) => {
                    warn!(
                        target = "bodega.llm",
                        attempt = attempt + 1,
                        max = self.max_retries,
                        error = %err,
                        "generate request error"
                    );
                    attempt += 1;
                    backoff(attempt).await;
                }
            }
        }
        Err(GeminiError::RetriesExhausted(self.max_retries))
    }
}

async fn backoff(attempt: u32) {
    let jitter: f64 = rand::rng().random_range(0.0..1.0);
    let secs = (1u64 << attempt.min(6)) as f64 + jitter;
    sleep(Duration::from_secs_f64(secs)).await;
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct GenerateRequest {
    contents: Vec<Content>,
    system_instruction: Content,
    generation_config: GenerationConfig,
}

impl GenerateRequest {
    fn structured(system: &str, user: &str, schema: Value) -> Self {
        Self {
            contents: vec![Content::text(user)],
            system_instruction: Content::text(system),
            generation_config: GenerationConfig {
                response_mime_type: "application/json".into(),
                response_schema: schema,
            },
        }
    }
}

#[derive(Debug, Serialize, Deserialize)]
struct Content {
    parts: Vec<Part>,
}

impl Content {
    fn text(value: &str) -> Self {
        Self {
            parts: vec![Part {
                text: value.to_string(),
            }],
        }
    }
}

#[derive(Debug, Serialize, Deserialize)]
struct Part {
    text: String,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GenerationConfig {
    response_mime_type: String,
    response_schema: Value,
}

#[derive(Debug, Deserialize)]
struct GenerateResponse {
    #[serde(default)]
    candidates: Vec<Candidate>,
}

#[derive(Debug, Deserialize)]
struct Candidate {
    content: Content,
}

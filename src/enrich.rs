use crate::catalog::Product;
use crate::llm::{GeminiClient, GeminiError};
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use std::collections::HashMap;
use thiserror::Error;
use tracing::{debug, warn};

const SYSTEM_PROMPT: &str = "You are an expert e-commerce catalog manager optimizing for substring-based search. \
For each product, do TWO tasks:\n\
1) Enhance the product name by expanding short forms to clear, generic, search-friendly names \
(e.g., 'Panteen SS' -> 'Pantene Smooth & Shine Shampoo'); keep food items native to their local \
names rather than translating them.\n\
2) Write an ultra-concise description (<= 30 words) that is search-optimized and includes: \
brand name (if obvious), 2-3 plausible key ingredients (only if relevant), the local/common \
product type, and a short trailing search tag list in parentheses with synonyms a user might type.\n\
Keep tone simple. Avoid fluff. No line breaks. Return strict JSON only.";

#[derive(Debug, Error)]
pub enum EnrichError {
    #[error("enrichment call failed: {0}")]
    Llm(#[from] GeminiError),
    #[error("unable to parse enrichment response: {0}")]
    Parse(String),
}

/// One rewrite from the language model, keyed by `originalName` — the batch
/// is re-joined to the catalog by name, never by position.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct EnrichedItem {
    #[serde(default)]
    pub id: i64,
    #[serde(default)]
    pub original_name: String,
    #[serde(default)]
    pub enhanced_name: String,
    #[serde(default)]
    pub enhanced_description: String,
}

fn response_schema() -> Value {
    json!({
        "type": "ARRAY",
        "items": {
            "type": "OBJECT",
            "properties": {
                "id": {"type": "INTEGER"},
                "originalName": {"type": "STRING"},
                "enhancedName": {"type": "STRING"},
                "enhancedDescription": {"type": "STRING"}
            },
            "required": ["id", "originalName", "enhancedName", "enhancedDescription"]
        }
    })
}

fn batch_query(batch: &[Product]) -> String {
    let mut lines = String::from(
        "Process the following list of products. Output a JSON array with the same number of entries as the input.\n\n",
    );
    for (index, product) in batch.iter().enumerate() {
        let id = product
            .extra
            .get("id")
            .and_then(Value::as_i64)
            .unwrap_or(index as i64);
        lines.push_str(&format!(
            "| ID: {id} | Original Name: '{}' | Original Description: '{}' |\n",
            product.name, product.description
        ));
    }
    lines
}

/// Send one batch for rewriting. A terminal service failure fails the whole
/// batch; no partial result is returned. With no credentials configured the
/// engine degrades to passthrough items so the pipeline stays runnable.
pub async fn enrich_batch(
    llm: &GeminiClient,
    batch: &[Product],
) -> Result<Vec<EnrichedItem>, EnrichError> {
    if batch.is_empty() {
        return Ok(Vec::new());
    }

    if !llm.has_credentials() {
        warn!(
            target = "bodega.enrich",
            "no llm credentials configured; using passthrough placeholder enhancements"
        );
        return Ok(batch
            .iter()
            .enumerate()
            .map(|(index, product)| EnrichedItem {
                id: index as i64,
                original_name: product.name.clone(),
                enhanced_name: product.name.clone(),
                enhanced_description: format!(
                    "{} (auto-generated placeholder description)",
                    product.name.trim()
                ),
            })
            .collect());
    }

    let text = llm
        .generate_json(SYSTEM_PROMPT, &batch_query(batch), response_schema())
        .await?;
    parse_items(&text)
}

pub fn parse_items(text: &str) -> Result<Vec<EnrichedItem>, EnrichError> {
    let cleaned = strip_markdown_fence(text);
    serde_json::from_str(&cleaned).map_err(|err| EnrichError::Parse(err.to_string()))
}

fn strip_markdown_fence(input: &str) -> String {
    let trimmed = input.trim();
    if !trimmed.starts_with("```") {
        return trimmed.to_string();
    }
    let mut body = Vec::new();
    for line in trimmed.lines().skip(1) {
        if line.trim_start().starts_with("```") {
            break;
        }
        body.push(line);
    }
    body.join("\n")
}

/// Fold results back into the catalog, matching on `originalName`.
///
/// Unknown originals are dropped without error. Enhanced fields overwrite
/// only when non-empty. Returns the update count and the canonical name per
/// applied item (enhanced if present, else original) — those names feed the
/// image stages and the Processed Set.
pub fn apply_enhancements(
    products: &mut [Product],
    results: &[EnrichedItem],
) -> (usize, Vec<String>) {
    let mut name_to_index: HashMap<&str, usize> = HashMap::new();
    for (index, product) in products.iter().enumerate() {
        if !product.name.is_empty() {
            name_to_index.entry(product.name.as_str()).or_insert(index);
        }
    }

    let mut indices = Vec::new();
    for item in results {
        if item.original_name.is_empty() {
            continue;
        }
        match name_to_index.get(item.original_name.as_str()) {
            Some(index) => indices.push((*index, item)),
            None => {
                debug!(
                    target = "bodega.enrich",
                    original = %item.original_name,
                    "dropping result for unknown product"
                );
            }
        }
    }

    let mut updated = 0;
    let mut canonical_names = Vec::new();
    for (index, item) in indices {
        let product = &mut products[index];
        if !item.enhanced_name.is_empty() {
            product.name = item.enhanced_name.clone();
        }
        if !item.enhanced_description.is_empty() {
            product.description = item.enhanced_description.clone();
        }
        updated += 1;
        canonical_names.push(if item.enhanced_name.is_empty() {
            item.original_name.clone()
        } else {
            item.enhanced_name.clone()
        });
    }
    (updated, canonical_names)
}

/// Names that were sent to the service but came back without a result. They
/// are never recorded as processed and will be re-selected next run.
pub fn omitted_names(batch: &[Product], results: &[EnrichedItem]) -> Vec<String> {
    batch
        .iter()
        .filter(|product| {
            !results
                .iter()
                .any(|item| item.original_name == product.name)
        })
        .map(|product| product.name.clone())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::{GeminiClient, GeminiConfig};
    use serde_json::Map;

    fn product(name: &str, description: &str) -> Product {
        Product {
            name: name.into(),
            description: description.into(),
            image: String::new(),
            extra: Map::new(),
        }
    }

    fn item(original: &str, name: &str, description: &str) -> EnrichedItem {
        EnrichedItem {
            id: 0,
            original_name: original.into(),
            enhanced_name: name.into(),
            enhanced_description: description.into(),
        }
    }

    #[test]
    fn parse_items_handles_fenced_json() {
        let text = "```json\n[{\"id\":1,\"originalName\":\"Chai\",\"enhancedName\":\"Masala Chai\",\"enhancedDescription\":\"Spiced tea\"}]\n```";
        let items = parse_items(text).unwrap();
        assert_eq!(items.len(), 1);
        assert_eq!(items[0].original_name, "Chai");
        assert_eq!(items[0].enhanced_name, "Masala Chai");
    }

    #[test]
    fn parse_items_rejects_non_array() {
        assert!(matches!(
            parse_items("{\"oops\": true}"),
            Err(EnrichError::Parse(_))
        ));
    }

    #[test]
    fn apply_matches_by_original_name_not_position() {
        let mut products = vec![product("Chai", "old"), product("Dal", "old")];
        // results arrive reordered
        let results = vec![
            item("Dal", "Toor Dal", "Split pigeon peas"),
            item("Chai", "Masala Chai", "Spiced tea"),
        ];
        let (updated, names) = apply_enhancements(&mut products, &results);
        assert_eq!(updated, 2);
        assert_eq!(products[0].name, "Masala Chai");
        assert_eq!(products[1].name, "Toor Dal");
        assert_eq!(names, vec!["Toor Dal".to_string(), "Masala Chai".to_string()]);
    }

    #[test]
    fn apply_drops_unknown_originals_silently() {
        let mut products = vec![product("Chai", "old")];
        let results = vec![
            item("Nonexistent", "X", "Y"),
            item("Chai", "Masala Chai", "Spiced tea"),
        ];
        let (updated, names) = apply_enhancements(&mut products, &results);
        assert_eq!(updated, 1);
        assert_eq!(names, vec!["Masala Chai".to_string()]);
    }

    #[test]
    fn apply_preserves_fields_when_enhancement_is_empty() {
        let mut products = vec![product("Chai", "original description")];
        let results = vec![item("Chai", "", "")];
        let (updated, names) = apply_enhancements(&mut products, &results);
        assert_eq!(updated, 1);
        assert_eq!(products[0].name, "Chai");
        assert_eq!(products[0].description, "original description");
        // canonical name falls back to the original
        assert_eq!(names, vec!["Chai".to_string()]);
    }

    #[test]
    fn omitted_names_reports_requested_but_not_returned() {
        let batch = vec![product("Chai", ""), product("Dal", "")];
        let results = vec![item("Chai", "Masala Chai", "x")];
        assert_eq!(omitted_names(&batch, &results), vec!["Dal".to_string()]);
    }

    #[test]
    fn batch_query_uses_id_field_or_index() {
        let mut with_id = product("Chai", "tea");
        with_id.extra.insert("id".into(), json!(42));
        let query = batch_query(&[with_id, product("Dal", "")]);
        assert!(query.contains("| ID: 42 | Original Name: 'Chai'"));
        assert!(query.contains("| ID: 1 | Original Name: 'Dal'"));
    }

    #[tokio::test]
    async fn degraded_mode_returns_passthrough_items() {
        let llm = GeminiClient::new(GeminiConfig {
            model: "test".into(),
            keys: vec![],
            max_retries: 1,
        });
        let batch = vec![product("Chai", "")];
        let items = enrich_batch(&llm, &batch).await.unwrap();
        assert_eq!(items.len(), 1);
        assert_eq!(items[0].enhanced_name, "Chai");
        assert!(items[0].enhanced_description.contains("placeholder"));
    }
}

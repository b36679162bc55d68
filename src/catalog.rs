use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fs;
use std::path::Path;
use thiserror::Error;
use tracing::info;

/// Wrapper keys recognized when the catalog JSON is an object instead of a
/// bare array.
const WRAPPER_KEYS: &[&str] = &["menu", "items", "products"];

#[derive(Debug, Error)]
pub enum CatalogError {
    #[error("catalog io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("catalog parse error: {0}")]
    Parse(#[from] serde_json::Error),
    #[error("catalog must be an array of products or an object with a `menu`/`items`/`products` array")]
    UnrecognizedShape,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Product {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub image: String,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// Classification of a product's `image` field against the configured
/// placeholder sentinel.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ImageState {
    /// Equals the sentinel: eligible for replacement.
    NeedsImage,
    /// Empty while the sentinel is non-empty; nobody has touched it.
    Unset,
    /// Holds some other URL, possibly hand-curated. Never overwritten.
    Set,
}

impl Product {
    pub fn image_state(&self, sentinel: &str) -> ImageState {
        let current = self.image.trim();
        if current == sentinel.trim() {
            ImageState::NeedsImage
        } else if current.is_empty() {
            ImageState::Unset
        } else {
            ImageState::Set
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
enum CatalogShape {
    BareList,
    Wrapped {
        key: String,
        siblings: Map<String, Value>,
    },
}

/// The product collection plus whatever structure surrounded it on disk.
/// Saving reproduces the original shape: a bare array stays a bare array, a
/// wrapped object keeps its sibling keys verbatim.
#[derive(Debug, Clone)]
pub struct Catalog {
    pub products: Vec<Product>,
    shape: CatalogShape,
}

impl Catalog {
    pub fn load(path: &Path) -> Result<Self, CatalogError> {
        let raw = fs::read_to_string(path)?;
        let data: Value = serde_json::from_str(&raw)?;
        let catalog = Self::from_value(data)?;
        info!(
            target = "bodega.catalog",
            count = catalog.products.len(),
            path = %path.display(),
            "catalog loaded"
        );
        Ok(catalog)
    }

    fn from_value(data: Value) -> Result<Self, CatalogError> {
        match data {
            Value::Array(entries) => {
                let products = parse_products(entries)?;
                Ok(Self {
                    products,
                    shape: CatalogShape::BareList,
                })
            }
            Value::Object(mut map) => {
                let key = WRAPPER_KEYS
                    .iter()
                    .find(|k| matches!(map.get(**k), Some(Value::Array(_))))
                    .ok_or(CatalogError::UnrecognizedShape)?;
                let Some(Value::Array(entries)) = map.remove(*key) else {
                    return Err(CatalogError::UnrecognizedShape);
                };
                let products = parse_products(entries)?;
                Ok(Self {
                    products,
                    shape: CatalogShape::Wrapped {
                        key: key.to_string(),
                        siblings: map,
                    },
                })
            }
            _ => Err(CatalogError::UnrecognizedShape),
        }
    }

    pub fn save(&self, path: &Path) -> Result<(), CatalogError> {
        let entries = self
            .products
            .iter()
            .map(|p| serde_json::to_value(p).map_err(CatalogError::from))
            .collect::<Result<Vec<_>, _>>()?;
        let data = match &self.shape {
            CatalogShape::BareList => Value::Array(entries),
            CatalogShape::Wrapped { key, siblings } => {
                let mut map = siblings.clone();
                map.insert(key.clone(), Value::Array(entries));
                Value::Object(map)
            }
        };
        let mut rendered = serde_json::to_string_pretty(&data)?;
        rendered.push('\n');
        fs::write(path, rendered)?;
        info!(
            target = "bodega.catalog",
            count = self.products.len(),
            path = %path.display(),
            "catalog saved"
        );
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.products.len()
    }

    pub fn is_empty(&self) -> bool {
        self.products.is_empty()
    }

    /// Wrapper key, if the source file wrapped the product list.
    pub fn wrapper_key(&self) -> Option<&str> {
        match &self.shape {
            CatalogShape::BareList => None,
            CatalogShape::Wrapped { key, .. } => Some(key),
        }
    }
}

fn parse_products(entries: Vec<Value>) -> Result<Vec<Product>, CatalogError> {
    entries
        .into_iter()
        .map(|entry| serde_json::from_value(entry).map_err(CatalogError::from))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn write_temp(contents: &str) -> (tempfile::TempDir, std::path::PathBuf) {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("catalog.json");
        fs::write(&path, contents).unwrap();
        (dir, path)
    }

    #[test]
    fn loads_bare_list() {
        let (_dir, path) = write_temp(r#"[{"name":"Chai","description":"","image":""}]"#);
        let catalog = Catalog::load(&path).unwrap();
        assert_eq!(catalog.len(), 1);
        assert_eq!(catalog.products[0].name, "Chai");
        assert_eq!(catalog.wrapper_key(), None);
    }

    #[test]
    fn loads_wrapped_list_under_any_recognized_key() {
        for key in ["menu", "items", "products"] {
            let raw = format!(r#"{{"{key}":[{{"name":"Atta"}}],"version":3}}"#);
            let (_dir, path) = write_temp(&raw);
            let catalog = Catalog::load(&path).unwrap();
            assert_eq!(catalog.wrapper_key(), Some(key));
            assert_eq!(catalog.products[0].name, "Atta");
        }
    }

    #[test]
    fn rejects_unrecognized_shape() {
        let (_dir, path) = write_temp(r#"{"stuff": 42}"#);
        assert!(matches!(
            Catalog::load(&path),
            Err(CatalogError::UnrecognizedShape)
        ));
    }

    #[test]
    fn save_round_trips_wrapper_siblings() {
        let (_dir, path) = write_temp(
            r#"{"restaurant":{"id":7,"city":"Pune"},"menu":[{"name":"Chai","description":"","image":"","price":10}],"currency":"INR"}"#,
        );
        let mut catalog = Catalog::load(&path).unwrap();
        catalog.products[0].description = "Masala chai".to_string();
        catalog.save(&path).unwrap();

        let reloaded: Value = serde_json::from_str(&fs::read_to_string(&path).unwrap()).unwrap();
        assert_eq!(reloaded["currency"], json!("INR"));
        assert_eq!(reloaded["restaurant"], json!({"id":7,"city":"Pune"}));
        assert_eq!(reloaded["menu"][0]["description"], json!("Masala chai"));
        // unknown per-product fields survive too
        assert_eq!(reloaded["menu"][0]["price"], json!(10));
    }

    #[test]
    fn save_round_trips_bare_list() {
        let (_dir, path) = write_temp(r#"[{"name":"Chai","id":1}]"#);
        let catalog = Catalog::load(&path).unwrap();
        catalog.save(&path).unwrap();
        let reloaded: Value = serde_json::from_str(&fs::read_to_string(&path).unwrap()).unwrap();
        assert!(reloaded.is_array());
        assert_eq!(reloaded[0]["id"], json!(1));
    }

    #[test]
    fn image_state_classification() {
        let mut product = Product {
            name: "Chai".into(),
            description: String::new(),
            image: "https://dummy.example/placeholder.png".into(),
            extra: Map::new(),
        };
        let sentinel = "https://dummy.example/placeholder.png";
        assert_eq!(product.image_state(sentinel), ImageState::NeedsImage);

        product.image = String::new();
        assert_eq!(product.image_state(sentinel), ImageState::Unset);

        product.image = "https://cdn.example/real.jpg".into();
        assert_eq!(product.image_state(sentinel), ImageState::Set);

        // empty sentinel makes the empty string the placeholder
        assert_eq!(
            Product {
                image: String::new(),
                ..product.clone()
            }
            .image_state(""),
            ImageState::NeedsImage
        );
    }
}

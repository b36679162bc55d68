use once_cell::sync::Lazy;
use std::env;
use std::path::{Path, PathBuf};

/// Placeholder URL that marks a product as "needs a real image". Empty by
/// default, matching catalogs that use an empty string for missing art.
pub static DUMMY_IMAGE_URL: Lazy<String> =
    Lazy::new(|| env::var("DUMMY_IMAGE_URL").unwrap_or_default());

pub static BATCH_SIZE: Lazy<usize> = Lazy::new(|| {
    env::var("BATCH_SIZE")
        .ok()
        .and_then(|v| v.parse::<usize>().ok())
        .filter(|v| *v > 0)
        .unwrap_or(50)
});

/// Byte budget for locally saved images.
pub static MAX_IMAGE_KB: Lazy<u64> = Lazy::new(|| {
    env::var("MAX_IMAGE_KB")
        .ok()
        .and_then(|v| v.parse::<u64>().ok())
        .filter(|v| *v > 0)
        .unwrap_or(30)
});

/// Byte budget for uploaded images.
pub static MAX_UPLOAD_KB: Lazy<u64> = Lazy::new(|| {
    env::var("MAX_UPLOAD_KB")
        .ok()
        .and_then(|v| v.parse::<u64>().ok())
        .filter(|v| *v > 0)
        .unwrap_or(30)
});

const PROCESSED_FILE: &str = "processed_items.txt";
const BATCH_NAMES_FILE: &str = "image_batch_names.txt";
const LINKS_FILE: &str = "upload_links.txt";
const IMAGE_DIR: &str = "product_images";

const DEFAULT_CATALOG_CANDIDATES: &[&str] = &["catalog.json", "input_products.json"];

/// All coordination files live in one directory so repeated runs of any
/// subcommand see the same state.
#[derive(Debug, Clone)]
pub struct Workspace {
    root: PathBuf,
}

impl Workspace {
    pub fn from_env() -> Self {
        let root = env::var("WORKSPACE_DIR")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("."));
        Self { root }
    }

    pub fn at(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn processed_path(&self) -> PathBuf {
        self.root.join(PROCESSED_FILE)
    }

    pub fn batch_names_path(&self) -> PathBuf {
        self.root.join(BATCH_NAMES_FILE)
    }

    pub fn links_path(&self) -> PathBuf {
        self.root.join(LINKS_FILE)
    }

    pub fn image_dir(&self) -> PathBuf {
        self.root.join(IMAGE_DIR)
    }

    /// Resolve the catalog file: an explicit `--input` wins, otherwise the
    /// first default candidate that exists, otherwise the last candidate
    /// (so the caller gets a sensible "not found" error).
    pub fn catalog_path(&self, input: Option<&str>) -> PathBuf {
        if let Some(name) = input {
            return self.root.join(name);
        }
        for candidate in DEFAULT_CATALOG_CANDIDATES {
            let path = self.root.join(candidate);
            if path.exists() {
                return path;
            }
        }
        self.root.join(DEFAULT_CATALOG_CANDIDATES[1])
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn catalog_path_prefers_explicit_input() {
        let ws = Workspace::at("/tmp/ws");
        assert_eq!(
            ws.catalog_path(Some("menu.json")),
            PathBuf::from("/tmp/ws/menu.json")
        );
    }

    #[test]
    fn catalog_path_falls_back_to_default_candidate() {
        let dir = tempfile::tempdir().unwrap();
        let ws = Workspace::at(dir.path());
        assert_eq!(
            ws.catalog_path(None),
            dir.path().join("input_products.json")
        );
        std::fs::write(dir.path().join("catalog.json"), "[]").unwrap();
        assert_eq!(ws.catalog_path(None), dir.path().join("catalog.json"));
    }
}

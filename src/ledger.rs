use std::collections::BTreeMap;
use std::fs;
use std::path::Path;
use thiserror::Error;
use tracing::info;

#[derive(Debug, Error)]
pub enum LedgerError {
    #[error("ledger io error: {0}")]
    Io(#[from] std::io::Error),
}

/// Mapping from uploaded filename (as stored remotely) to its public URL.
///
/// Persisted as `filename,url` data lines grouped under decorative batch
/// headers. Headers and separator lines are ignored on parse. Keys are
/// filenames, not product names; bridging the two is the matcher's job.
#[derive(Debug, Clone, Default)]
pub struct LinkLedger {
    links: BTreeMap<String, String>,
}

impl LinkLedger {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, filename: impl Into<String>, url: impl Into<String>) {
        self.links.insert(filename.into(), url.into());
    }

    pub fn len(&self) -> usize {
        self.links.len()
    }

    pub fn is_empty(&self) -> bool {
        self.links.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &String)> {
        self.links.iter()
    }

    /// A missing file is an empty ledger, not an error.
    pub fn load(path: &Path) -> Result<Self, LedgerError> {
        let mut ledger = Self::new();
        if !path.exists() {
            return Ok(ledger);
        }
        let raw = fs::read_to_string(path)?;
        for line in raw.lines() {
            let line = line.trim();
            if line.is_empty() || line.starts_with('-') || line.starts_with('=') {
                continue;
            }
            let Some((filename, url)) = line.split_once(',') else {
                continue;
            };
            let filename = filename.trim();
            let url = url.trim();
            if !filename.is_empty() && !url.is_empty() {
                ledger.insert(filename, url);
            }
        }
        Ok(ledger)
    }

    /// Rebuild the ledger file, grouping data lines under numbered batch
    /// headers of `batch_size` entries each. The headers are decorative.
    pub fn write(&self, path: &Path, batch_size: usize) -> Result<(), LedgerError> {
        let batch_size = batch_size.max(1);
        let entries: Vec<(&String, &String)> = self.links.iter().collect();
        let mut out = String::from("--- Upload Links Batch Output ---\n\n");
        for (batch_index, chunk) in entries.chunks(batch_size).enumerate() {
            let start = batch_index * batch_size + 1;
            let end = start + chunk.len() - 1;
            out.push_str(&format!(
                "===== BATCH {} (Images {start} to {end}) =====\n",
                batch_index + 1
            ));
            for (filename, url) in chunk {
                out.push_str(&format!("{filename},{url}\n"));
            }
            out.push('\n');
        }
        fs::write(path, out)?;
        info!(
            target = "bodega.ledger",
            count = self.links.len(),
            path = %path.display(),
            "ledger written"
        );
        Ok(())
    }

    /// Lookup table keyed by lowercased filename stem (extension stripped),
    /// which is what the matcher works against.
    pub fn base_map(&self) -> BTreeMap<String, String> {
        self.links
            .iter()
            .map(|(filename, url)| {
                let stem = match filename.rsplit_once('.') {
                    Some((stem, _ext)) => stem,
                    None => filename.as_str(),
                };
                (stem.to_lowercase(), url.clone())
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_ignores_headers_and_blank_lines() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("upload_links.txt");
        fs::write(
            &path,
            "--- Upload Links Batch Output ---\n\n\
             ===== BATCH 1 (Images 1 to 2) =====\n\
             masala_chai.jpeg,https://cdn.example/masala_chai.jpeg\n\
             toor_dal_1.jpeg,https://cdn.example/toor_dal_1.jpeg\n\n\
             not a data line\n",
        )
        .unwrap();
        let ledger = LinkLedger::load(&path).unwrap();
        assert_eq!(ledger.len(), 2);
        let base = ledger.base_map();
        assert_eq!(
            base.get("masala_chai").map(String::as_str),
            Some("https://cdn.example/masala_chai.jpeg")
        );
        assert_eq!(
            base.get("toor_dal_1").map(String::as_str),
            Some("https://cdn.example/toor_dal_1.jpeg")
        );
    }

    #[test]
    fn missing_file_is_empty_ledger() {
        let dir = tempfile::tempdir().unwrap();
        let ledger = LinkLedger::load(&dir.path().join("absent.txt")).unwrap();
        assert!(ledger.is_empty());
    }

    #[test]
    fn write_then_load_round_trips_entries() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("upload_links.txt");
        let mut ledger = LinkLedger::new();
        for i in 0..5 {
            ledger.insert(format!("item_{i}.jpeg"), format!("https://cdn.example/{i}"));
        }
        ledger.write(&path, 2).unwrap();

        let reloaded = LinkLedger::load(&path).unwrap();
        assert_eq!(reloaded.len(), 5);
        assert_eq!(
            reloaded.base_map().get("item_3").map(String::as_str),
            Some("https://cdn.example/3")
        );
        // three batch headers for five entries of size two
        let raw = fs::read_to_string(&path).unwrap();
        assert_eq!(raw.matches("===== BATCH").count(), 3);
    }

    #[test]
    fn base_map_strips_extension_and_lowercases() {
        let mut ledger = LinkLedger::new();
        ledger.insert("Pantene_SS.JPEG", "https://cdn.example/p");
        assert!(ledger.base_map().contains_key("pantene_ss"));
    }
}

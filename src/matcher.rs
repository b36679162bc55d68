use crate::catalog::{Catalog, ImageState};
use std::collections::{BTreeMap, HashSet};
use tracing::debug;

/// Normalize a product name into a filename/lookup key: keep alphanumeric
/// plus space, hyphen, underscore; trim trailing whitespace; spaces become
/// underscores; lowercase.
pub fn sanitize_name(name: &str) -> String {
    let kept: String = name
        .chars()
        .filter(|c| c.is_alphanumeric() || matches!(c, ' ' | '-' | '_'))
        .collect();
    kept.trim_end().replace(' ', "_").to_lowercase()
}

/// Find the uploaded-asset URL for a product name.
///
/// Lookup order, first hit wins: exact sanitized base, then the `_1`..`_3`
/// collision suffixes the acquisition stage may have appended, then any
/// ledger key the base is a prefix of, then any ledger key that is a prefix
/// of the base. The prefix fallbacks recover drift between enrichment renames
/// and filenames acquired under an older name, at the cost of occasional
/// false positives on shared prefixes.
pub fn match_url<'a>(base_to_url: &'a BTreeMap<String, String>, product_name: &str) -> Option<&'a str> {
    let base = sanitize_name(product_name);
    if base.is_empty() {
        return None;
    }
    if let Some(url) = base_to_url.get(&base) {
        return Some(url);
    }
    for suffix in 1..=3 {
        if let Some(url) = base_to_url.get(&format!("{base}_{suffix}")) {
            return Some(url);
        }
    }
    if let Some((_, url)) = base_to_url.iter().find(|(key, _)| key.starts_with(&base)) {
        return Some(url);
    }
    if let Some((_, url)) = base_to_url.iter().find(|(key, _)| base.starts_with(key.as_str())) {
        return Some(url);
    }
    None
}

/// Tally of one replacement pass, mirrored into the debug log.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ReplacementStats {
    pub updated: usize,
    pub not_in_batch: usize,
    pub not_needing: usize,
    pub no_link: usize,
}

/// Patch `image` fields from the ledger.
///
/// A product is updated only when its current image state is `NeedsImage`
/// and its name is in `names` (case-insensitive), or `names` is `None` for a
/// global pass. Products already holding a real image are left alone, which
/// makes repeated passes idempotent.
pub fn replace_images_for_names(
    catalog: &mut Catalog,
    names: Option<&HashSet<String>>,
    base_to_url: &BTreeMap<String, String>,
    sentinel: &str,
) -> ReplacementStats {
    let names_lower: Option<HashSet<String>> =
        names.map(|set| set.iter().map(|n| n.trim().to_lowercase()).collect());

    let mut stats = ReplacementStats::default();
    for product in &mut catalog.products {
        let name = product.name.trim();
        if name.is_empty() {
            continue;
        }
        if let Some(allowed) = &names_lower
            && !allowed.contains(&name.to_lowercase())
        {
            stats.not_in_batch += 1;
            continue;
        }
        if product.image_state(sentinel) != ImageState::NeedsImage {
            stats.not_needing += 1;
            continue;
        }
        match match_url(base_to_url, name) {
            Some(url) => {
                product.image = url.to_string();
                stats.updated += 1;
            }
            None => {
                debug!(target = "bodega.matcher", name, "no link match");
                stats.no_link += 1;
            }
        }
    }
    stats
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::Catalog;
    use std::fs;

    fn ledger(entries: &[(&str, &str)]) -> BTreeMap<String, String> {
        entries
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn sanitize_strips_punctuation_and_lowercases() {
        assert_eq!(sanitize_name("Pantene SS"), "pantene_ss");
        assert_eq!(sanitize_name("Maggi 2-Min Noodles!"), "maggi_2-min_noodles");
        assert_eq!(sanitize_name("  Tata Salt  "), "__tata_salt");
        assert_eq!(sanitize_name("चाय"), "चाय");
    }

    #[test]
    fn matches_exact_then_numbered_suffix() {
        let map = ledger(&[("pantene_ss_1", "https://cdn.example/ss1")]);
        assert_eq!(match_url(&map, "Pantene SS"), Some("https://cdn.example/ss1"));

        let map = ledger(&[("pantene_ss", "https://cdn.example/ss")]);
        assert_eq!(match_url(&map, "Pantene SS"), Some("https://cdn.example/ss"));
    }

    #[test]
    fn does_not_match_unrelated_key_sharing_no_prefix_relation() {
        let map = ledger(&[("pantene_conditioner", "https://cdn.example/c")]);
        assert_eq!(match_url(&map, "Pantene SS"), None);
    }

    #[test]
    fn prefix_fallbacks_work_both_directions() {
        // ledger filename is longer than the (renamed) product
        let map = ledger(&[("masala_chai_premium", "https://cdn.example/long")]);
        assert_eq!(match_url(&map, "Masala Chai"), Some("https://cdn.example/long"));

        // product name grew longer after enrichment
        let map = ledger(&[("masala_chai", "https://cdn.example/short")]);
        assert_eq!(
            match_url(&map, "Masala Chai Premium Blend"),
            Some("https://cdn.example/short")
        );
    }

    #[test]
    fn empty_name_never_matches() {
        let map = ledger(&[("x", "https://cdn.example/x")]);
        assert_eq!(match_url(&map, "   "), None);
    }

    fn load_catalog(raw: &str) -> (tempfile::TempDir, Catalog) {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("catalog.json");
        fs::write(&path, raw).unwrap();
        (dir, Catalog::load(&path).unwrap())
    }

    #[test]
    fn replacement_updates_only_needing_products_in_batch() {
        let (_dir, mut catalog) = load_catalog(
            r#"[
                {"name":"Masala Chai","image":""},
                {"name":"Toor Dal","image":"https://cdn.example/existing.jpg"},
                {"name":"Basmati Rice","image":""}
            ]"#,
        );
        let map = ledger(&[
            ("masala_chai", "https://cdn.example/chai.jpeg"),
            ("toor_dal", "https://cdn.example/dal.jpeg"),
            ("basmati_rice", "https://cdn.example/rice.jpeg"),
        ]);
        let batch: HashSet<String> =
            ["Masala Chai".to_string(), "Toor Dal".to_string()].into();

        let stats = replace_images_for_names(&mut catalog, Some(&batch), &map, "");
        assert_eq!(stats.updated, 1);
        assert_eq!(stats.not_needing, 1);
        assert_eq!(stats.not_in_batch, 1);
        assert_eq!(catalog.products[0].image, "https://cdn.example/chai.jpeg");
        assert_eq!(catalog.products[1].image, "https://cdn.example/existing.jpg");
        assert_eq!(catalog.products[2].image, "");
    }

    #[test]
    fn replacement_pass_is_idempotent() {
        let (_dir, mut catalog) =
            load_catalog(r#"[{"name":"Masala Chai","image":""},{"name":"Toor Dal","image":""}]"#);
        let map = ledger(&[("masala_chai", "https://cdn.example/chai.jpeg")]);

        let first = replace_images_for_names(&mut catalog, None, &map, "");
        assert_eq!(first.updated, 1);
        let before = catalog.products.clone();

        let second = replace_images_for_names(&mut catalog, None, &map, "");
        assert_eq!(second.updated, 0);
        assert_eq!(catalog.products, before);
    }

    #[test]
    fn three_item_end_to_end_replacement() {
        // all three marked with the sentinel; links exist for two
        let sentinel = "https://dummy.example/placeholder.png";
        let raw = format!(
            r#"[
                {{"name":"Masala Chai","image":"{sentinel}"}},
                {{"name":"Toor Dal","image":"{sentinel}"}},
                {{"name":"Amul Butter","image":"{sentinel}"}}
            ]"#
        );
        let (_dir, mut catalog) = load_catalog(&raw);
        let map = ledger(&[
            ("masala_chai", "https://cdn.example/chai.jpeg"),
            ("toor_dal_2", "https://cdn.example/dal.jpeg"),
        ]);

        let stats = replace_images_for_names(&mut catalog, None, &map, sentinel);
        assert_eq!(stats.updated, 2);
        assert_eq!(stats.no_link, 1);
        assert_eq!(catalog.products[0].image, "https://cdn.example/chai.jpeg");
        assert_eq!(catalog.products[1].image, "https://cdn.example/dal.jpeg");
        assert_eq!(catalog.products[2].image, sentinel);
    }
}

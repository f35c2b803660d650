//! The command-table loader: reads a JSON catalog document into a
//! [`Catalog`](super::Catalog), once, at startup.
//!
//! A baked-in default (`data/catalog.json`, embedded at compile time)
//! ships with the crate so the server needs no external files to run;
//! `--catalog <path>` lets an operator substitute a different table.

use std::path::Path;

use super::{Catalog, Descriptor};

const DEFAULT_CATALOG_JSON: &str = include_str!("../../data/catalog.json");

#[derive(Debug, thiserror::Error)]
pub enum CatalogLoadError {
    #[error("failed to read catalog file {path}: {source}")]
    Io { path: String, #[source] source: std::io::Error },
    #[error("malformed catalog document: {0}")]
    Malformed(#[from] serde_json::Error),
}

/// Loads the catalog baked into the binary at compile time.
pub fn load_default() -> Catalog {
    let descriptors: Vec<Descriptor> =
        serde_json::from_str(DEFAULT_CATALOG_JSON).expect("embedded catalog.json is valid");
    Catalog::from_descriptors(descriptors)
}

/// Loads a catalog from an external JSON document.
///
/// Per spec.md §6, a missing or malformed source is tolerated for the
/// *virtual filesystem* seed (falls back to an empty tree); the
/// command catalog has no such fallback since an empty catalog would
/// make the server unable to serve anything, so malformed/missing
/// catalog files are a hard startup error.
pub fn load_from_path(path: &Path) -> Result<Catalog, CatalogLoadError> {
    let text = std::fs::read_to_string(path).map_err(|source| CatalogLoadError::Io {
        path: path.display().to_string(),
        source,
    })?;
    let descriptors: Vec<Descriptor> = serde_json::from_str(&text)?;
    Ok(Catalog::from_descriptors(descriptors))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_catalog_parses_and_covers_core_surface() {
        let catalog = load_default();
        assert!(catalog.lookup("G0").is_some());
        assert!(catalog.lookup("M3").is_some());
        assert!(catalog.lookup("ls").is_some());
        assert!(catalog.lookup("$G").is_some());
        assert!(catalog.lookup("?").is_some());
        assert!(!catalog.is_empty());
    }

    #[test]
    fn instant_commands_are_question_mark_and_dollar_i() {
        let catalog = load_default();
        let prefixes = catalog.instant_prefixes();
        assert!(prefixes.contains("?"));
        assert!(prefixes.contains("$I"));
    }

    #[test]
    fn missing_file_is_an_error() {
        let result = load_from_path(Path::new("/nonexistent/catalog.json"));
        assert!(result.is_err());
    }
}

//! Loads the initial virtual filesystem layout from an external JSON
//! document at startup (spec.md §6). A missing or malformed source
//! yields an empty VFS with only `/` — this loader never fails loudly;
//! callers get an empty `Vec` and log the reason.

use std::path::Path;

use super::entry::FileEntry;

const DEFAULT_SEED_JSON: &str = include_str!("../../data/vfs_layout.json");

#[derive(Debug, serde::Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
enum SeedNode {
    Directory { path: String },
    File { path: String, contents: String },
}

#[derive(Debug, thiserror::Error)]
pub enum SeedLoadError {
    #[error("failed to read seed file {path}: {source}")]
    Io { path: String, #[source] source: std::io::Error },
    #[error("malformed seed document: {0}")]
    Malformed(#[from] serde_json::Error),
}

fn nodes_to_entries(nodes: Vec<SeedNode>) -> Vec<FileEntry> {
    nodes
        .into_iter()
        .map(|node| match node {
            SeedNode::Directory { path } => FileEntry::new_directory(path),
            SeedNode::File { path, contents } => FileEntry::new_file(path, contents.into_bytes()),
        })
        .collect()
}

/// The canonical layout baked into the binary: `/sd/config.txt`,
/// `/sd/gcodes/` with sample files, `/ud/temp/temp_file.tmp`,
/// `/ud/logs/`.
pub fn default_layout() -> Vec<FileEntry> {
    let nodes: Vec<SeedNode> =
        serde_json::from_str(DEFAULT_SEED_JSON).expect("embedded vfs_layout.json is valid");
    nodes_to_entries(nodes)
}

/// Loads an alternate seed document. Returns `Ok(vec![])` (an
/// effectively empty VFS once the root is added back by
/// [`super::Vfs::from_entries`]) when the file is missing or
/// malformed, per spec.md §6; the `Err` variant exists for the caller
/// to log *why* it fell back.
pub fn load_seed_from_path(path: &Path) -> Result<Vec<FileEntry>, SeedLoadError> {
    let text = std::fs::read_to_string(path)
        .map_err(|source| SeedLoadError::Io { path: path.display().to_string(), source })?;
    let nodes: Vec<SeedNode> = serde_json::from_str(&text)?;
    Ok(nodes_to_entries(nodes))
}

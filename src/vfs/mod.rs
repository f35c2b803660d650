//! The Virtual Filesystem: an in-memory, POSIX-like namespace shared by
//! every connection (spec.md §4.2).
//!
//! A single mutex guards the whole map; per spec.md §5 this is
//! acceptable because per-operation work is trivial next to the
//! network I/O surrounding it. A mutation made by one connection is
//! visible to the next operation any other connection performs.

pub mod entry;
mod seed;

use std::collections::HashMap;

use async_trait::async_trait;
use tokio::sync::Mutex;

pub use entry::FileEntry;
pub use seed::{default_layout, load_seed_from_path, SeedLoadError};

pub type VfsResult<T> = Result<T, VfsError>;

/// Errors raised by [`VfsOps`] methods. `Display` renders exactly the
/// message body the dispatcher wraps as `error:<message>` (spec.md §7).
#[derive(Debug, thiserror::Error, Clone, PartialEq, Eq)]
pub enum VfsError {
    #[error("{0} not found")]
    NotFound(String),
    #[error("already exists")]
    AlreadyExists,
    #[error("{0} is not a directory")]
    NotADirectory(String),
    #[error("{0} is a directory")]
    IsADirectory(String),
}

/// The operations spec.md §4.2 specifies, all resolved relative to a
/// connection's current working directory.
#[async_trait]
pub trait VfsOps: Send + Sync {
    async fn list(&self, cwd: &str, path: &str, with_sizes: bool) -> VfsResult<String>;
    async fn cd(&self, cwd: &str, path: &str) -> VfsResult<String>;
    async fn cat(&self, cwd: &str, path: &str, limit: Option<usize>) -> VfsResult<Vec<u8>>;
    async fn mv(&self, cwd: &str, src: &str, dst: &str) -> VfsResult<()>;
    async fn rm(&self, cwd: &str, path: &str) -> VfsResult<()>;
    async fn mkdir(&self, cwd: &str, path: &str) -> VfsResult<()>;
    async fn upload_accept(&self, cwd: &str, path: &str, contents: Vec<u8>) -> VfsResult<()>;
    async fn download_fetch(&self, cwd: &str, path: &str) -> VfsResult<(Vec<u8>, String)>;
}

/// Normalizes `input` against `cwd` into a canonical absolute path with
/// no `.`/`..` components, no repeated separators, and no trailing
/// slash (except the root itself, `"/"`).
pub fn resolve(cwd: &str, input: &str) -> String {
    let joined = if input.starts_with('/') {
        input.to_string()
    } else {
        format!("{}/{}", cwd.trim_end_matches('/'), input)
    };
    normalize_components(&joined)
}

fn normalize_components(path: &str) -> String {
    let mut stack: Vec<&str> = Vec::new();
    for component in path.split('/') {
        match component {
            "" | "." => continue,
            ".." => {
                stack.pop();
            }
            other => stack.push(other),
        }
    }
    if stack.is_empty() {
        "/".to_string()
    } else {
        format!("/{}", stack.join("/"))
    }
}

/// The map key under which a directory at canonical `path` is stored
/// (always trailing-slash-terminated, per spec.md §3).
fn directory_key(path: &str) -> String {
    if path == "/" {
        "/".to_string()
    } else {
        format!("{}/", path)
    }
}

/// The directory key that `entry_path` (a stored map key, file or
/// directory) lives directly under.
fn parent_directory_key(entry_path: &str) -> Option<String> {
    let trimmed = entry_path.trim_end_matches('/');
    if trimmed.is_empty() {
        return None; // root has no parent
    }
    match trimmed.rsplit_once('/') {
        Some(("", _name)) => Some("/".to_string()),
        Some((parent, _name)) => Some(format!("{}/", parent)),
        None => Some("/".to_string()),
    }
}

/// Checks that `entry_path`'s parent directory is present in `nodes`
/// and is itself a directory. Every non-root path must satisfy this
/// (spec.md §3's "every non-root path has a parent directory entry
/// present in the map") before an insert at `entry_path` is allowed.
fn require_parent_directory(
    nodes: &HashMap<String, FileEntry>,
    entry_path: &str,
) -> VfsResult<()> {
    let parent_key = parent_directory_key(entry_path).unwrap_or_else(|| "/".to_string());
    match nodes.get(&parent_key) {
        Some(entry) if entry.is_directory() => Ok(()),
        Some(_) => Err(VfsError::NotADirectory(parent_key)),
        None => Err(VfsError::NotFound(parent_key)),
    }
}

/// In-memory implementation of [`VfsOps`], guarded by one mutex.
pub struct Vfs {
    nodes: Mutex<HashMap<String, FileEntry>>,
}

impl Vfs {
    /// An empty VFS containing only the root directory.
    pub fn empty() -> Self {
        let mut nodes = HashMap::new();
        nodes.insert("/".to_string(), FileEntry::new_directory("/".to_string()));
        Self { nodes: Mutex::new(nodes) }
    }

    /// Seeds the VFS from a pre-built set of entries (used by the
    /// default canonical layout and by JSON-seeded startup). Always
    /// includes the root directory even if `entries` omits it.
    pub fn from_entries(entries: Vec<FileEntry>) -> Self {
        let mut nodes = HashMap::with_capacity(entries.len() + 1);
        nodes.insert("/".to_string(), FileEntry::new_directory("/".to_string()));
        for entry in entries {
            nodes.insert(entry.path.clone(), entry);
        }
        Self { nodes: Mutex::new(nodes) }
    }
}

#[async_trait]
impl VfsOps for Vfs {
    async fn list(&self, cwd: &str, path: &str, with_sizes: bool) -> VfsResult<String> {
        let resolved = resolve(cwd, path);
        let dir_key = directory_key(&resolved);
        let nodes = self.nodes.lock().await;
        match nodes.get(&dir_key) {
            Some(entry) if entry.is_directory() => {}
            Some(_) => return Err(VfsError::NotADirectory(resolved)),
            None => return Err(VfsError::NotFound(resolved)),
        }

        let mut children: Vec<&FileEntry> = nodes
            .values()
            .filter(|entry| {
                entry.path != dir_key && parent_directory_key(&entry.path).as_deref() == Some(dir_key.as_str())
            })
            .collect();
        children.sort_by(|a, b| a.name().cmp(b.name()));

        let lines: Vec<String> = children
            .iter()
            .map(|entry| {
                if entry.is_directory() {
                    if with_sizes {
                        format!("{}/ -1", entry.name())
                    } else {
                        format!("{}/", entry.name())
                    }
                } else if with_sizes {
                    format!("{} {}", entry.name(), entry.size)
                } else {
                    entry.name().to_string()
                }
            })
            .collect();
        Ok(lines.join("\n"))
    }

    async fn cd(&self, cwd: &str, path: &str) -> VfsResult<String> {
        let resolved = resolve(cwd, path);
        let dir_key = directory_key(&resolved);
        let nodes = self.nodes.lock().await;
        match nodes.get(&dir_key) {
            Some(entry) if entry.is_directory() => Ok(resolved),
            Some(_) => Err(VfsError::NotADirectory(resolved)),
            None => Err(VfsError::NotFound(resolved)),
        }
    }

    async fn cat(&self, cwd: &str, path: &str, limit: Option<usize>) -> VfsResult<Vec<u8>> {
        let resolved = resolve(cwd, path);
        let nodes = self.nodes.lock().await;
        let entry = nodes.get(&resolved).ok_or_else(|| VfsError::NotFound(resolved.clone()))?;
        if entry.is_directory() {
            return Err(VfsError::IsADirectory(resolved));
        }
        Ok(match limit {
            Some(limit) => first_lines(&entry.contents, limit),
            None => entry.contents.clone(),
        })
    }

    async fn mv(&self, cwd: &str, src: &str, dst: &str) -> VfsResult<()> {
        let src_resolved = resolve(cwd, src);
        let dst_resolved = resolve(cwd, dst);
        let mut nodes = self.nodes.lock().await;

        let src_entry = nodes
            .get(&src_resolved)
            .cloned()
            .ok_or_else(|| VfsError::NotFound(src_resolved.clone()))?;
        if src_entry.is_directory() {
            return Err(VfsError::IsADirectory(src_resolved));
        }

        let dst_dir_key = directory_key(&dst_resolved);
        let moves_into_directory =
            nodes.get(&dst_dir_key).map(|e| e.is_directory()).unwrap_or(false);

        let new_path = if moves_into_directory {
            format!("{}{}", dst_dir_key, src_entry.name())
        } else {
            dst_resolved.clone()
        };

        if new_path != src_resolved {
            if let Some(existing) = nodes.get(&new_path) {
                if existing.is_directory() {
                    return Err(VfsError::AlreadyExists);
                }
            }
        }
        require_parent_directory(&nodes, &new_path)?;

        nodes.remove(&src_resolved);
        let mut moved = src_entry;
        moved.path = new_path.clone();
        nodes.insert(new_path, moved);
        Ok(())
    }

    async fn rm(&self, cwd: &str, path: &str) -> VfsResult<()> {
        let resolved = resolve(cwd, path);
        let mut nodes = self.nodes.lock().await;
        match nodes.get(&resolved) {
            Some(entry) if entry.is_directory() => Err(VfsError::IsADirectory(resolved)),
            Some(_) => {
                nodes.remove(&resolved);
                Ok(())
            }
            None => Err(VfsError::NotFound(resolved)),
        }
    }

    async fn mkdir(&self, cwd: &str, path: &str) -> VfsResult<()> {
        let resolved = resolve(cwd, path);
        let dir_key = directory_key(&resolved);
        let mut nodes = self.nodes.lock().await;

        if nodes.contains_key(&dir_key) || nodes.contains_key(&resolved) {
            return Err(VfsError::AlreadyExists);
        }
        require_parent_directory(&nodes, &dir_key)?;

        nodes.insert(dir_key.clone(), FileEntry::new_directory(dir_key));
        Ok(())
    }

    async fn upload_accept(&self, cwd: &str, path: &str, contents: Vec<u8>) -> VfsResult<()> {
        let resolved = resolve(cwd, path);
        let mut nodes = self.nodes.lock().await;
        if nodes.get(&directory_key(&resolved)).map(|e| e.is_directory()).unwrap_or(false) {
            return Err(VfsError::IsADirectory(resolved));
        }
        require_parent_directory(&nodes, &resolved)?;
        nodes.insert(resolved.clone(), FileEntry::new_file(resolved, contents));
        Ok(())
    }

    async fn download_fetch(&self, cwd: &str, path: &str) -> VfsResult<(Vec<u8>, String)> {
        let resolved = resolve(cwd, path);
        let nodes = self.nodes.lock().await;
        let entry = nodes.get(&resolved).ok_or_else(|| VfsError::NotFound(resolved.clone()))?;
        if entry.is_directory() {
            return Err(VfsError::IsADirectory(resolved));
        }
        Ok((entry.contents.clone(), entry.md5.clone()))
    }
}

fn first_lines(contents: &[u8], limit: usize) -> Vec<u8> {
    if limit == 0 {
        return Vec::new();
    }
    let mut out = Vec::new();
    let mut lines_taken = 0usize;
    let mut start = 0usize;
    for (i, &byte) in contents.iter().enumerate() {
        if byte == b'\n' {
            out.extend_from_slice(&contents[start..=i]);
            start = i + 1;
            lines_taken += 1;
            if lines_taken >= limit {
                return out;
            }
        }
    }
    if lines_taken < limit {
        out.extend_from_slice(&contents[start..]);
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_vfs() -> Vfs {
        Vfs::from_entries(vec![
            FileEntry::new_directory("/sd/".to_string()),
            FileEntry::new_file("/sd/config.txt".to_string(), b"speed=100\n".to_vec()),
            FileEntry::new_directory("/sd/gcodes/".to_string()),
            FileEntry::new_file("/sd/gcodes/part.nc".to_string(), b"G0 X0\nG1 X10\n".to_vec()),
        ])
    }

    #[tokio::test]
    async fn list_root_shows_direct_children_only() {
        let vfs = sample_vfs();
        let body = vfs.list("/", "/", false).await.unwrap();
        assert_eq!(body, "sd/");
    }

    #[tokio::test]
    async fn list_with_sizes_marks_directories_with_negative_one() {
        let vfs = sample_vfs();
        let body = vfs.list("/", "/sd", true).await.unwrap();
        let lines: Vec<&str> = body.lines().collect();
        assert!(lines.contains(&"config.txt 10"));
        assert!(lines.contains(&"gcodes/ -1"));
    }

    #[tokio::test]
    async fn cd_into_existing_directory_then_relative_resolution_works() {
        let vfs = sample_vfs();
        let cwd = vfs.cd("/", "/sd").await.unwrap();
        assert_eq!(cwd, "/sd");
        let body = vfs.list(&cwd, "gcodes", false).await.unwrap();
        assert_eq!(body, "part.nc");
    }

    #[tokio::test]
    async fn cd_into_missing_directory_errors() {
        let vfs = sample_vfs();
        let err = vfs.cd("/", "/nope").await.unwrap_err();
        assert_eq!(err, VfsError::NotFound("/nope".to_string()));
    }

    #[tokio::test]
    async fn cat_returns_contents_and_errors_on_directory() {
        let vfs = sample_vfs();
        let contents = vfs.cat("/", "/sd/config.txt", None).await.unwrap();
        assert_eq!(contents, b"speed=100\n");
        let err = vfs.cat("/", "/sd", None).await.unwrap_err();
        assert_eq!(err, VfsError::IsADirectory("/sd".to_string()));
    }

    #[tokio::test]
    async fn cat_with_limit_returns_first_n_lines() {
        let vfs = sample_vfs();
        let contents = vfs.cat("/", "/sd/gcodes/part.nc", Some(1)).await.unwrap();
        assert_eq!(contents, b"G0 X0\n");
    }

    #[tokio::test]
    async fn mkdir_then_visible_immediately_in_ls() {
        let vfs = sample_vfs();
        vfs.mkdir("/", "/sd/new").await.unwrap();
        let body = vfs.list("/", "/sd", false).await.unwrap();
        assert!(body.lines().any(|line| line == "new/"));
    }

    #[tokio::test]
    async fn mkdir_existing_name_errors() {
        let vfs = sample_vfs();
        let err = vfs.mkdir("/", "/sd").await.unwrap_err();
        assert_eq!(err, VfsError::AlreadyExists);
    }

    #[tokio::test]
    async fn rm_removes_file_but_rejects_directories() {
        let vfs = sample_vfs();
        vfs.rm("/", "/sd/config.txt").await.unwrap();
        assert!(vfs.cat("/", "/sd/config.txt", None).await.is_err());
        let err = vfs.rm("/", "/sd").await.unwrap_err();
        assert_eq!(err, VfsError::IsADirectory("/sd".to_string()));
    }

    #[tokio::test]
    async fn mv_renames_within_same_directory() {
        let vfs = sample_vfs();
        vfs.mv("/", "/sd/config.txt", "/sd/config.bak").await.unwrap();
        assert!(vfs.cat("/", "/sd/config.txt", None).await.is_err());
        assert_eq!(vfs.cat("/", "/sd/config.bak", None).await.unwrap(), b"speed=100\n");
    }

    #[tokio::test]
    async fn mv_into_existing_directory_moves_by_basename() {
        let vfs = sample_vfs();
        vfs.mv("/", "/sd/config.txt", "/sd/gcodes").await.unwrap();
        let body = vfs.list("/", "/sd/gcodes", false).await.unwrap();
        assert!(body.lines().any(|line| line == "config.txt"));
    }

    #[tokio::test]
    async fn mv_into_nonexistent_parent_directory_errors_without_orphaning_an_entry() {
        let vfs = sample_vfs();
        let err = vfs.mv("/", "/sd/config.txt", "/nonexistent/x").await.unwrap_err();
        assert_eq!(err, VfsError::NotFound("/nonexistent/".to_string()));
        // the source must still be in place — a rejected move isn't a delete.
        assert!(vfs.cat("/", "/sd/config.txt", None).await.is_ok());
    }

    #[tokio::test]
    async fn upload_then_download_round_trips_bytes_and_md5() {
        let vfs = sample_vfs();
        let payload = vec![0xAB; 20_000];
        vfs.upload_accept("/", "/sd/x.bin", payload.clone()).await.unwrap();
        let (bytes, md5) = vfs.download_fetch("/", "/sd/x.bin").await.unwrap();
        assert_eq!(bytes, payload);
        assert_eq!(md5, entry::md5_hex(&payload));
    }

    #[tokio::test]
    async fn upload_into_nonexistent_parent_directory_errors() {
        let vfs = sample_vfs();
        let err = vfs.upload_accept("/", "/nonexistent/x.bin", vec![1, 2, 3]).await.unwrap_err();
        assert_eq!(err, VfsError::NotFound("/nonexistent/".to_string()));
    }

    #[test]
    fn resolve_normalizes_dot_dot_and_repeated_slashes() {
        assert_eq!(resolve("/sd", "../ud//logs"), "/ud/logs");
        assert_eq!(resolve("/", "./sd/./gcodes"), "/sd/gcodes");
        assert_eq!(resolve("/sd/gcodes", ".."), "/sd");
        assert_eq!(resolve("/", "../../.."), "/");
    }
}

//! Immutable, content-addressed source trees.
//!
//! A [`SourceSnapshot`] is a map of normalized relative file paths to file
//! contents. Every transformation returns a new snapshot; the receiver is
//! never modified. The snapshot digest is derived from the sorted
//! `(path, content digest)` entries, so identical trees share a digest no
//! matter how they were produced.

use std::collections::BTreeMap;
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use sha2::{Digest as _, Sha256};
use thiserror::Error;

/// SHA-256 digest identifying a snapshot's contents.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct SnapshotDigest([u8; 32]);

impl SnapshotDigest {
    /// Hex-encoded string.
    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }

    /// Short form (first 12 hex chars).
    pub fn short(&self) -> String {
        self.to_hex()[..12].to_string()
    }
}

impl fmt::Display for SnapshotDigest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_hex())
    }
}

impl fmt::Debug for SnapshotDigest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "SnapshotDigest({})", self.short())
    }
}

/// Errors from snapshot construction and traversal.
#[derive(Debug, Error)]
pub enum SnapshotError {
    #[error("invalid snapshot path: {0:?}")]
    InvalidPath(String),

    #[error("path not found in snapshot: {0}")]
    NotFound(String),

    #[error("file is not valid UTF-8: {0}")]
    NotUtf8(String),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("walk error: {0}")]
    Walk(#[from] ignore::Error),
}

pub type SnapshotResult<T> = std::result::Result<T, SnapshotError>;

type FileMap = BTreeMap<String, Arc<[u8]>>;

/// An immutable directory tree.
///
/// Cloning is cheap: the file map is shared behind an `Arc`.
#[derive(Clone)]
pub struct SourceSnapshot {
    files: Arc<FileMap>,
    digest: SnapshotDigest,
}

impl SourceSnapshot {
    /// The empty tree.
    pub fn empty() -> Self {
        Self::from_map(FileMap::new())
    }

    /// Build a snapshot from `(path, contents)` pairs.
    pub fn from_files<I, P, B>(files: I) -> SnapshotResult<Self>
    where
        I: IntoIterator<Item = (P, B)>,
        P: AsRef<str>,
        B: Into<Vec<u8>>,
    {
        let mut map = FileMap::new();
        for (path, contents) in files {
            let path = normalize_file_path(path.as_ref())?;
            let bytes: Vec<u8> = contents.into();
            map.insert(path, Arc::from(bytes));
        }
        Ok(Self::from_map(map))
    }

    /// Load a snapshot from a host directory.
    ///
    /// Any path component whose name appears in `exclude` is skipped along
    /// with everything below it. Symbolic links are never followed or
    /// recorded.
    pub fn from_dir(root: &Path, exclude: &[&str]) -> SnapshotResult<Self> {
        if !root.is_dir() {
            return Err(SnapshotError::NotFound(root.display().to_string()));
        }
        let mut map = FileMap::new();
        walk(root, root, exclude, &mut map)?;
        Ok(Self::from_map(map))
    }

    /// Load a snapshot from a source checkout, honouring `.gitignore` and
    /// `.ignore` files as git would. `exclude` and symlinks are handled as
    /// in [`SourceSnapshot::from_dir`].
    pub fn from_checkout(root: &Path, exclude: &[&str]) -> SnapshotResult<Self> {
        if !root.is_dir() {
            return Err(SnapshotError::NotFound(root.display().to_string()));
        }
        let excluded: Vec<String> = exclude.iter().map(|s| s.to_string()).collect();
        let walker = ignore::WalkBuilder::new(root)
            .hidden(false)
            .follow_links(false)
            .require_git(false)
            .git_global(false)
            .filter_entry(move |entry| {
                let name = entry.file_name().to_string_lossy();
                !excluded.iter().any(|e| *e == name)
            })
            .build();

        let mut map = FileMap::new();
        for entry in walker {
            let entry = entry?;
            if !entry.file_type().map_or(false, |t| t.is_file()) {
                continue;
            }
            let key = relative_key(root, entry.path())?;
            map.insert(key, Arc::from(std::fs::read(entry.path())?));
        }
        Ok(Self::from_map(map))
    }

    /// Materialize the snapshot below `root`, creating directories as needed.
    pub fn write_to(&self, root: &Path) -> SnapshotResult<()> {
        std::fs::create_dir_all(root)?;
        for (path, contents) in self.files.iter() {
            let target = root.join(path);
            if let Some(parent) = target.parent() {
                std::fs::create_dir_all(parent)?;
            }
            std::fs::write(&target, contents)?;
        }
        Ok(())
    }

    fn from_map(files: FileMap) -> Self {
        let digest = compute_digest(&files);
        Self {
            files: Arc::new(files),
            digest,
        }
    }

    pub fn digest(&self) -> SnapshotDigest {
        self.digest
    }

    /// Number of files.
    pub fn len(&self) -> usize {
        self.files.len()
    }

    pub fn is_empty(&self) -> bool {
        self.files.is_empty()
    }

    /// All file paths, sorted.
    pub fn paths(&self) -> impl Iterator<Item = &str> {
        self.files.keys().map(String::as_str)
    }

    /// All `(path, contents)` pairs, sorted by path.
    pub fn files(&self) -> impl Iterator<Item = (&str, &[u8])> {
        self.files.iter().map(|(p, c)| (p.as_str(), c.as_ref()))
    }

    /// Contents of a single file.
    pub fn file(&self, path: &str) -> Option<&[u8]> {
        let path = normalize_file_path(path).ok()?;
        self.files.get(&path).map(|c| c.as_ref())
    }

    /// Contents of a single file decoded as UTF-8.
    pub fn read_to_string(&self, path: &str) -> SnapshotResult<String> {
        let bytes = self
            .file(path)
            .ok_or_else(|| SnapshotError::NotFound(path.to_string()))?;
        String::from_utf8(bytes.to_vec()).map_err(|_| SnapshotError::NotUtf8(path.to_string()))
    }

    /// Whether any file lives at or below `path`.
    pub fn has_directory(&self, path: &str) -> bool {
        match normalize_dir_path(path) {
            Ok(prefix) if prefix.is_empty() => !self.files.is_empty(),
            Ok(prefix) => self.entries_under(&prefix).next().is_some(),
            Err(_) => false,
        }
    }

    /// Return a new snapshot with `path` set to `contents`.
    pub fn with_file(&self, path: &str, contents: impl Into<Vec<u8>>) -> SnapshotResult<Self> {
        let path = normalize_file_path(path)?;
        let bytes: Vec<u8> = contents.into();
        let mut map = (*self.files).clone();
        map.insert(path, Arc::from(bytes));
        Ok(Self::from_map(map))
    }

    /// Return a new snapshot with everything at or below `path` removed.
    ///
    /// Removing a directory that does not exist returns an identical
    /// snapshot, so the operation is idempotent.
    pub fn without_directory(&self, path: &str) -> SnapshotResult<Self> {
        let prefix = normalize_dir_path(path)?;
        if prefix.is_empty() {
            return Ok(Self::empty());
        }
        if self.entries_under(&prefix).next().is_none() {
            return Ok(self.clone());
        }
        let map = self
            .files
            .iter()
            .filter(|(p, _)| !is_under(p, &prefix))
            .map(|(p, c)| (p.clone(), c.clone()))
            .collect();
        Ok(Self::from_map(map))
    }

    /// The subtree rooted at `path`, re-rooted so its paths are relative.
    pub fn directory(&self, path: &str) -> SnapshotResult<Self> {
        let prefix = normalize_dir_path(path)?;
        if prefix.is_empty() {
            return Ok(self.clone());
        }
        let map: FileMap = self
            .entries_under(&prefix)
            .map(|(p, c)| (p[prefix.len() + 1..].to_string(), c.clone()))
            .collect();
        if map.is_empty() {
            return Err(SnapshotError::NotFound(prefix));
        }
        Ok(Self::from_map(map))
    }

    /// Overlay `other` below `path`. Files in `other` win on conflict.
    pub fn with_directory(&self, path: &str, other: &SourceSnapshot) -> SnapshotResult<Self> {
        let prefix = normalize_dir_path(path)?;
        let mut map = (*self.files).clone();
        for (p, c) in other.files.iter() {
            let target = if prefix.is_empty() {
                p.clone()
            } else {
                format!("{prefix}/{p}")
            };
            map.insert(target, c.clone());
        }
        Ok(Self::from_map(map))
    }

    fn entries_under<'a>(
        &'a self,
        prefix: &'a str,
    ) -> impl Iterator<Item = (&'a String, &'a Arc<[u8]>)> + 'a {
        self.files.iter().filter(move |(p, _)| is_under(p, prefix))
    }
}

impl PartialEq for SourceSnapshot {
    fn eq(&self, other: &Self) -> bool {
        self.digest == other.digest
    }
}

impl Eq for SourceSnapshot {}

impl fmt::Debug for SourceSnapshot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SourceSnapshot")
            .field("digest", &self.digest)
            .field("files", &self.files.len())
            .finish()
    }
}

impl Default for SourceSnapshot {
    fn default() -> Self {
        Self::empty()
    }
}

fn is_under(path: &str, prefix: &str) -> bool {
    path.len() > prefix.len() && path.starts_with(prefix) && path.as_bytes()[prefix.len()] == b'/'
}

fn compute_digest(files: &FileMap) -> SnapshotDigest {
    let mut hasher = Sha256::new();
    for (path, contents) in files {
        hasher.update(path.as_bytes());
        hasher.update(b"\0");
        hasher.update(Sha256::digest(contents));
    }
    let mut bytes = [0u8; 32];
    bytes.copy_from_slice(&hasher.finalize());
    SnapshotDigest(bytes)
}

/// Normalize a directory path; the root normalizes to `""`.
///
/// Leading `/` and `./` are dropped, `.` segments collapse, and `..` is
/// rejected.
pub fn normalize_dir_path(path: &str) -> SnapshotResult<String> {
    let mut parts = Vec::new();
    for segment in path.split(['/', '\\']) {
        match segment {
            "" | "." => {}
            ".." => return Err(SnapshotError::InvalidPath(path.to_string())),
            s => parts.push(s),
        }
    }
    Ok(parts.join("/"))
}

fn normalize_file_path(path: &str) -> SnapshotResult<String> {
    let normalized = normalize_dir_path(path)?;
    if normalized.is_empty() {
        return Err(SnapshotError::InvalidPath(path.to_string()));
    }
    Ok(normalized)
}

fn walk(root: &Path, dir: &Path, exclude: &[&str], out: &mut FileMap) -> SnapshotResult<()> {
    let mut entries: Vec<(PathBuf, std::fs::FileType)> = std::fs::read_dir(dir)?
        .map(|e| e.and_then(|e| Ok((e.path(), e.file_type()?))))
        .collect::<std::io::Result<_>>()?;
    entries.sort_by(|a, b| a.0.cmp(&b.0));

    for (path, file_type) in entries {
        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_default();
        if exclude.contains(&name.as_str()) {
            continue;
        }
        // DirEntry::file_type does not follow links, so symlinks land here.
        if file_type.is_dir() {
            walk(root, &path, exclude, out)?;
        } else if file_type.is_file() {
            let key = relative_key(root, &path)?;
            out.insert(key, Arc::from(std::fs::read(&path)?));
        }
    }
    Ok(())
}

fn relative_key(root: &Path, path: &Path) -> SnapshotResult<String> {
    let rel = path
        .strip_prefix(root)
        .map_err(|_| SnapshotError::InvalidPath(path.display().to_string()))?;
    Ok(rel
        .components()
        .map(|c| c.as_os_str().to_string_lossy().to_string())
        .collect::<Vec<_>>()
        .join("/"))
}
